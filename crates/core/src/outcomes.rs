//! Outcome recording and medical-record updates.
//!
//! Completing an appointment writes four tables in one commit: the outcome record, the
//! appointment status, the slot (retired from the ledger) and the patient's treatment history.

use crate::availability;
use crate::calendar::ClinicDate;
use crate::error::{ClinicError, ClinicResult};
use crate::records::{
    Appointment, AppointmentStatus, AvailabilitySlot, HistoryEntry, OutcomeRecord, Patient,
    PrescriptionStatus,
};
use crate::store::{RecordStore, Table, Transaction};
use clinic_types::{FieldText, NonEmptyText};
use std::sync::Arc;

/// Clinical details captured when a doctor completes an appointment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewOutcome {
    pub diagnosis: NonEmptyText,
    pub medicine: NonEmptyText,
    pub quantity: u32,
    pub treatment_plan: FieldText,
    /// Must equal the appointment's scheduled date.
    pub date: ClinicDate,
    pub service_type: FieldText,
    pub notes: FieldText,
}

/// The clinical fields a doctor may revise after completion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClinicalUpdate {
    pub diagnosis: NonEmptyText,
    pub medicine: NonEmptyText,
    pub quantity: u32,
    pub treatment_plan: FieldText,
    pub notes: FieldText,
}

fn history_entry(outcome: &OutcomeRecord) -> HistoryEntry {
    HistoryEntry {
        appointment_id: outcome.appointment_id.clone(),
        diagnosis: outcome.diagnosis.clone(),
        treatment_plan: outcome.treatment_plan.clone(),
    }
}

fn upsert_history(
    tx: &mut Transaction<'_>,
    patient_id: &NonEmptyText,
    outcome: &OutcomeRecord,
) -> ClinicResult<()> {
    let mut patients: Vec<Patient> = tx.load()?;
    let patient = patients
        .iter_mut()
        .find(|patient| &patient.id == patient_id)
        .ok_or_else(|| ClinicError::PatientNotFound(patient_id.to_string()))?;
    patient.upsert_history(history_entry(outcome));
    tx.stage(&patients)
}

#[derive(Clone, Debug)]
pub struct OutcomeService {
    store: Arc<RecordStore>,
}

impl OutcomeService {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    /// Completes a confirmed appointment and records its outcome.
    ///
    /// The prescription starts `PENDING`. The patient's history gains (or refreshes) the entry
    /// for this appointment.
    ///
    /// # Errors
    ///
    /// - [`ClinicError::AppointmentNotFound`] if the appointment does not exist.
    /// - [`ClinicError::OutcomeAlreadyRecorded`] if an outcome exists for it already.
    /// - [`ClinicError::InvalidTransition`] if the appointment is not `CONFIRMED`.
    /// - [`ClinicError::DateMismatch`] if `outcome.date` is not the scheduled date.
    /// - [`ClinicError::PatientNotFound`] if the appointment's patient is not registered.
    pub fn record_outcome(
        &self,
        appointment_id: &NonEmptyText,
        outcome: NewOutcome,
    ) -> ClinicResult<OutcomeRecord> {
        let mut tx = self.store.begin(&[
            Table::Appointment,
            Table::DoctorAvailability,
            Table::AppointmentRecord,
            Table::Patient,
        ])?;
        let mut appointments: Vec<Appointment> = tx.load()?;
        let mut ledger: Vec<AvailabilitySlot> = tx.load()?;
        let mut records: Vec<OutcomeRecord> = tx.load()?;

        let appt = appointments
            .iter_mut()
            .find(|appt| &appt.id == appointment_id)
            .ok_or_else(|| ClinicError::AppointmentNotFound(appointment_id.to_string()))?;
        if records
            .iter()
            .any(|record| &record.appointment_id == appointment_id)
        {
            return Err(ClinicError::OutcomeAlreadyRecorded(
                appointment_id.to_string(),
            ));
        }
        if appt.status != AppointmentStatus::Confirmed {
            return Err(ClinicError::InvalidTransition {
                appointment_id: appointment_id.to_string(),
                from: appt.status.as_str(),
                to: AppointmentStatus::Completed.as_str(),
            });
        }
        if appt.date != outcome.date {
            return Err(ClinicError::DateMismatch {
                expected: appt.date.to_string(),
                actual: outcome.date.to_string(),
            });
        }

        let record = OutcomeRecord {
            appointment_id: appointment_id.clone(),
            diagnosis: outcome.diagnosis,
            medicine: outcome.medicine,
            quantity: outcome.quantity,
            prescription_status: PrescriptionStatus::Pending,
            treatment_plan: outcome.treatment_plan,
            date: outcome.date,
            service_type: outcome.service_type,
            notes: outcome.notes,
        };
        upsert_history(&mut tx, &appt.patient_id, &record)?;

        availability::mark_consumed(&mut ledger, &appt.doctor_id, appt.date, appt.slot, &appt.id)?;
        appt.status = AppointmentStatus::Completed;
        records.push(record.clone());

        tx.stage(&appointments)?;
        tx.stage(&ledger)?;
        tx.stage(&records)?;
        tx.commit()?;

        tracing::info!(
            appointment_id = %appointment_id,
            medicine = %record.medicine,
            quantity = record.quantity,
            "outcome recorded"
        );
        Ok(record)
    }

    /// Overwrites the clinical fields of an existing outcome and refreshes the history entry.
    ///
    /// Prescription status and appointment status are left as they are.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::OutcomeNotFound`] if no outcome has been recorded.
    pub fn update_medical_record(
        &self,
        appointment_id: &NonEmptyText,
        update: ClinicalUpdate,
    ) -> ClinicResult<OutcomeRecord> {
        let mut tx = self.store.begin(&[
            Table::Appointment,
            Table::AppointmentRecord,
            Table::Patient,
        ])?;
        let appointments: Vec<Appointment> = tx.load()?;
        let mut records: Vec<OutcomeRecord> = tx.load()?;

        let record = records
            .iter_mut()
            .find(|record| &record.appointment_id == appointment_id)
            .ok_or_else(|| ClinicError::OutcomeNotFound(appointment_id.to_string()))?;
        record.diagnosis = update.diagnosis;
        record.medicine = update.medicine;
        record.quantity = update.quantity;
        record.treatment_plan = update.treatment_plan;
        record.notes = update.notes;
        let updated = record.clone();

        let patient_id = appointments
            .iter()
            .find(|appt| &appt.id == appointment_id)
            .map(|appt| appt.patient_id.clone())
            .ok_or_else(|| ClinicError::AppointmentNotFound(appointment_id.to_string()))?;
        upsert_history(&mut tx, &patient_id, &updated)?;

        tx.stage(&records)?;
        tx.commit()?;

        tracing::info!(appointment_id = %appointment_id, "medical record updated");
        Ok(updated)
    }

    pub fn outcome(&self, appointment_id: &NonEmptyText) -> ClinicResult<OutcomeRecord> {
        self.store
            .find_by_key(appointment_id.as_str())?
            .ok_or_else(|| ClinicError::OutcomeNotFound(appointment_id.to_string()))
    }
}
