//! Row types for every table and their field codecs.

use crate::calendar::{ClinicDate, TimeSlot};
use crate::constants::{EMPTY_MARKER, HISTORY_ENTRY_SEPARATOR, HISTORY_PART_SEPARATOR};
use crate::store::{Record, Table};
use clinic_types::{FieldText, NonEmptyText};
use serde::Serialize;
use std::str::FromStr;

fn text(field: &str, name: &str) -> Result<NonEmptyText, String> {
    NonEmptyText::new(field).map_err(|e| format!("{name}: {e}"))
}

fn free_text(field: &str, name: &str) -> Result<FieldText, String> {
    FieldText::new(field).map_err(|e| format!("{name}: {e}"))
}

fn optional_text(field: &str, name: &str) -> Result<Option<NonEmptyText>, String> {
    if field.trim() == EMPTY_MARKER {
        Ok(None)
    } else {
        text(field, name).map(Some)
    }
}

fn number<T: FromStr>(field: &str, name: &str) -> Result<T, String> {
    field
        .trim()
        .parse()
        .map_err(|_| format!("{name}: {field:?} is not a valid number"))
}

fn date(field: &str) -> Result<ClinicDate, String> {
    ClinicDate::parse(field).map_err(|e| e.to_string())
}

fn slot(field: &str) -> Result<TimeSlot, String> {
    TimeSlot::parse(field).map_err(|e| e.to_string())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
            Self::Completed => "COMPLETED",
        }
    }

    /// Whether an appointment in this status still holds its slot.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "CONFIRMED" => Ok(Self::Confirmed),
            "CANCELLED" => Ok(Self::Cancelled),
            "COMPLETED" => Ok(Self::Completed),
            other => Err(format!("unknown appointment status {other:?}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Appointment {
    pub id: NonEmptyText,
    pub doctor_id: NonEmptyText,
    pub patient_id: NonEmptyText,
    pub date: ClinicDate,
    pub slot: TimeSlot,
    pub status: AppointmentStatus,
}

impl Appointment {
    pub fn is_at(&self, doctor_id: &NonEmptyText, date: ClinicDate, slot: TimeSlot) -> bool {
        &self.doctor_id == doctor_id && self.date == date && self.slot == slot
    }
}

impl Record for Appointment {
    const TABLE: Table = Table::Appointment;

    fn key(&self) -> String {
        self.id.to_string()
    }

    fn to_fields(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.doctor_id.to_string(),
            self.patient_id.to_string(),
            self.date.to_string(),
            self.slot.to_string(),
            self.status.as_str().to_string(),
        ]
    }

    fn from_fields(fields: &[&str]) -> Result<Self, String> {
        Ok(Self {
            id: text(fields[0], "AppointmentID")?,
            doctor_id: text(fields[1], "DoctorID")?,
            patient_id: text(fields[2], "PatientID")?,
            date: date(fields[3])?,
            slot: slot(fields[4])?,
            status: fields[5].parse()?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotStatus {
    Available,
    Unavailable,
    Booked,
}

impl SlotStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Unavailable => "UNAVAILABLE",
            Self::Booked => "BOOKED",
        }
    }
}

impl FromStr for SlotStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AVAILABLE" => Ok(Self::Available),
            "UNAVAILABLE" => Ok(Self::Unavailable),
            "BOOKED" => Ok(Self::Booked),
            other => Err(format!("unknown slot status {other:?}")),
        }
    }
}

/// One doctor's status for one slot on one date.
///
/// `booked_by` names the appointment holding the slot and is set exactly when the status is
/// [`SlotStatus::Booked`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AvailabilitySlot {
    pub doctor_id: NonEmptyText,
    pub date: ClinicDate,
    pub slot: TimeSlot,
    pub status: SlotStatus,
    pub booked_by: Option<NonEmptyText>,
}

impl AvailabilitySlot {
    pub fn is_at(&self, doctor_id: &NonEmptyText, date: ClinicDate, slot: TimeSlot) -> bool {
        &self.doctor_id == doctor_id && self.date == date && self.slot == slot
    }
}

impl Record for AvailabilitySlot {
    const TABLE: Table = Table::DoctorAvailability;

    fn key(&self) -> String {
        format!("{}/{}/{}", self.doctor_id, self.date, self.slot)
    }

    fn to_fields(&self) -> Vec<String> {
        vec![
            self.doctor_id.to_string(),
            self.date.to_string(),
            self.slot.to_string(),
            self.status.as_str().to_string(),
            self.booked_by
                .as_ref()
                .map_or_else(|| EMPTY_MARKER.to_string(), |id| id.to_string()),
        ]
    }

    fn from_fields(fields: &[&str]) -> Result<Self, String> {
        let status: SlotStatus = fields[3].parse()?;
        let booked_by = optional_text(fields[4], "BookedBy")?;
        if (status == SlotStatus::Booked) != booked_by.is_some() {
            return Err(format!(
                "slot status {} disagrees with BookedBy {:?}",
                status.as_str(),
                fields[4]
            ));
        }
        Ok(Self {
            doctor_id: text(fields[0], "DoctorID")?,
            date: date(fields[1])?,
            slot: slot(fields[2])?,
            status,
            booked_by,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrescriptionStatus {
    Pending,
    Dispensed,
}

impl PrescriptionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Dispensed => "DISPENSED",
        }
    }
}

impl FromStr for PrescriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "DISPENSED" => Ok(Self::Dispensed),
            other => Err(format!("unknown prescription status {other:?}")),
        }
    }
}

/// Clinical summary of a completed appointment and the prescription to dispense.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutcomeRecord {
    pub appointment_id: NonEmptyText,
    pub diagnosis: NonEmptyText,
    pub medicine: NonEmptyText,
    pub quantity: u32,
    pub prescription_status: PrescriptionStatus,
    pub treatment_plan: FieldText,
    pub date: ClinicDate,
    pub service_type: FieldText,
    pub notes: FieldText,
}

impl Record for OutcomeRecord {
    const TABLE: Table = Table::AppointmentRecord;

    fn key(&self) -> String {
        self.appointment_id.to_string()
    }

    fn to_fields(&self) -> Vec<String> {
        vec![
            self.appointment_id.to_string(),
            self.diagnosis.to_string(),
            self.medicine.to_string(),
            self.quantity.to_string(),
            self.prescription_status.as_str().to_string(),
            self.treatment_plan.to_string(),
            self.date.to_string(),
            self.service_type.to_string(),
            self.notes.to_string(),
        ]
    }

    fn from_fields(fields: &[&str]) -> Result<Self, String> {
        Ok(Self {
            appointment_id: text(fields[0], "AppointmentID")?,
            diagnosis: text(fields[1], "Diagnosis")?,
            medicine: text(fields[2], "Medicine")?,
            quantity: number(fields[3], "Quantity")?,
            prescription_status: fields[4].parse()?,
            treatment_plan: free_text(fields[5], "TreatmentPlan")?,
            date: date(fields[6])?,
            service_type: free_text(fields[7], "ServiceType")?,
            notes: free_text(fields[8], "Notes")?,
        })
    }
}

/// One past treatment in a patient's history, keyed by appointment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub appointment_id: NonEmptyText,
    pub diagnosis: NonEmptyText,
    pub treatment_plan: FieldText,
}

impl HistoryEntry {
    fn encode(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.appointment_id,
            self.diagnosis,
            self.treatment_plan,
            sep = HISTORY_PART_SEPARATOR
        )
    }

    fn decode(entry: &str) -> Result<Self, String> {
        let parts: Vec<&str> = entry.split(HISTORY_PART_SEPARATOR).collect();
        let [appointment_id, diagnosis, treatment_plan] = parts.as_slice() else {
            return Err(format!("malformed history entry {entry:?}"));
        };
        Ok(Self {
            appointment_id: text(appointment_id, "PastTreatments")?,
            diagnosis: text(diagnosis, "PastTreatments")?,
            treatment_plan: free_text(treatment_plan, "PastTreatments")?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Patient {
    pub id: NonEmptyText,
    pub name: NonEmptyText,
    pub date_of_birth: FieldText,
    pub gender: FieldText,
    pub contact_no: FieldText,
    pub email: FieldText,
    pub blood_type: FieldText,
    pub history: Vec<HistoryEntry>,
}

impl Patient {
    /// Replaces the history entry for the same appointment, or appends a new one.
    pub fn upsert_history(&mut self, entry: HistoryEntry) {
        match self
            .history
            .iter_mut()
            .find(|existing| existing.appointment_id == entry.appointment_id)
        {
            Some(existing) => *existing = entry,
            None => self.history.push(entry),
        }
    }
}

impl Record for Patient {
    const TABLE: Table = Table::Patient;

    fn key(&self) -> String {
        self.id.to_string()
    }

    fn to_fields(&self) -> Vec<String> {
        let history: Vec<String> = self.history.iter().map(HistoryEntry::encode).collect();
        vec![
            self.id.to_string(),
            self.name.to_string(),
            self.date_of_birth.to_string(),
            self.gender.to_string(),
            self.contact_no.to_string(),
            self.email.to_string(),
            self.blood_type.to_string(),
            history.join(&HISTORY_ENTRY_SEPARATOR.to_string()),
        ]
    }

    fn from_fields(fields: &[&str]) -> Result<Self, String> {
        let history = fields[7]
            .split(HISTORY_ENTRY_SEPARATOR)
            .filter(|entry| !entry.trim().is_empty())
            .map(HistoryEntry::decode)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            id: text(fields[0], "PatientID")?,
            name: text(fields[1], "Name")?,
            date_of_birth: free_text(fields[2], "DateOfBirth")?,
            gender: free_text(fields[3], "Gender")?,
            contact_no: free_text(fields[4], "ContactNo")?,
            email: free_text(fields[5], "Email")?,
            blood_type: free_text(fields[6], "BloodType")?,
            history,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Medicine {
    pub name: NonEmptyText,
    pub stock: u32,
    pub low_stock_threshold: u32,
}

impl Medicine {
    pub fn is_low(&self) -> bool {
        self.stock < self.low_stock_threshold
    }
}

impl Record for Medicine {
    const TABLE: Table = Table::Medicine;

    fn key(&self) -> String {
        self.name.to_string()
    }

    fn to_fields(&self) -> Vec<String> {
        vec![
            self.name.to_string(),
            self.stock.to_string(),
            self.low_stock_threshold.to_string(),
        ]
    }

    fn from_fields(fields: &[&str]) -> Result<Self, String> {
        Ok(Self {
            name: text(fields[0], "Name")?,
            stock: number(fields[1], "Stock")?,
            low_stock_threshold: number(fields[2], "LowStockThreshold")?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            other => Err(format!("unknown request status {other:?}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReplenishmentRequest {
    pub id: NonEmptyText,
    pub medicine: NonEmptyText,
    pub quantity: u32,
    pub status: RequestStatus,
}

impl Record for ReplenishmentRequest {
    const TABLE: Table = Table::ReplenishmentRequest;

    fn key(&self) -> String {
        self.id.to_string()
    }

    fn to_fields(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.medicine.to_string(),
            self.quantity.to_string(),
            self.status.as_str().to_string(),
        ]
    }

    fn from_fields(fields: &[&str]) -> Result<Self, String> {
        Ok(Self {
            id: text(fields[0], "RequestID")?,
            medicine: text(fields[1], "Medicine")?,
            quantity: number(fields[2], "Quantity")?,
            status: fields[3].parse()?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillStatus {
    Pending,
    Paid,
}

impl BillStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
        }
    }
}

impl FromStr for BillStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "PAID" => Ok(Self::Paid),
            other => Err(format!("unknown bill status {other:?}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Bill {
    pub appointment_id: NonEmptyText,
    pub amount: f64,
    pub status: BillStatus,
    pub feedback: FieldText,
}

impl Record for Bill {
    const TABLE: Table = Table::Bill;

    fn key(&self) -> String {
        self.appointment_id.to_string()
    }

    fn to_fields(&self) -> Vec<String> {
        vec![
            self.appointment_id.to_string(),
            self.amount.to_string(),
            self.status.as_str().to_string(),
            self.feedback.to_string(),
        ]
    }

    fn from_fields(fields: &[&str]) -> Result<Self, String> {
        let amount: f64 = number(fields[1], "Amount")?;
        if !amount.is_finite() || amount < 0.0 {
            return Err(format!("Amount: {} is not a valid bill amount", fields[1]));
        }
        Ok(Self {
            appointment_id: text(fields[0], "AppointmentID")?,
            amount,
            status: fields[2].parse()?,
            feedback: free_text(fields[3], "Feedback")?,
        })
    }
}
