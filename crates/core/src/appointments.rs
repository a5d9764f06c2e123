//! Appointment lifecycle.
//!
//! ```text
//! PENDING ──accept──▶ CONFIRMED ──record outcome──▶ COMPLETED
//!    │                    │
//!    └─decline/cancel─▶ CANCELLED ◀──cancel──┘
//! ```
//!
//! A request is only taken when the slot is `AVAILABLE` and no other active (`PENDING` or
//! `CONFIRMED`) appointment already references it, so each (doctor, date, slot) has at most one
//! active appointment. Confirmation books the slot in the availability ledger in the same commit
//! as the status change.

use crate::availability;
use crate::calendar::{ClinicDate, TimeSlot};
use crate::config::ClinicConfig;
use crate::constants::APPOINTMENT_ID_PREFIX;
use crate::error::{ClinicError, ClinicResult};
use crate::records::{Appointment, AppointmentStatus, AvailabilitySlot};
use crate::store::{RecordStore, Table};
use clinic_types::NonEmptyText;
use std::sync::Arc;

const LIFECYCLE_TABLES: [Table; 2] = [Table::Appointment, Table::DoctorAvailability];

/// Next sequential appointment id (`A1`, `A2`, ...).
fn next_appointment_id(appointments: &[Appointment]) -> ClinicResult<NonEmptyText> {
    let highest = appointments
        .iter()
        .filter_map(|appt| {
            appt.id
                .as_str()
                .strip_prefix(APPOINTMENT_ID_PREFIX)
                .and_then(|n| n.parse::<u64>().ok())
        })
        .max()
        .unwrap_or(0);
    let next = highest.checked_add(1).ok_or_else(|| {
        ClinicError::InvalidInput(format!(
            "appointment ids exhausted at {APPOINTMENT_ID_PREFIX}{highest}"
        ))
    })?;
    Ok(NonEmptyText::new(format!("{APPOINTMENT_ID_PREFIX}{next}"))?)
}

/// Whether an active appointment other than `except` references the slot.
fn slot_held(
    appointments: &[Appointment],
    doctor_id: &NonEmptyText,
    date: ClinicDate,
    slot: TimeSlot,
    except: Option<&NonEmptyText>,
) -> bool {
    appointments.iter().any(|appt| {
        appt.status.is_active()
            && appt.is_at(doctor_id, date, slot)
            && except.is_none_or(|id| &appt.id != id)
    })
}

fn ensure_requestable(
    ledger: &[AvailabilitySlot],
    appointments: &[Appointment],
    doctor_id: &NonEmptyText,
    date: ClinicDate,
    slot: TimeSlot,
    except: Option<&NonEmptyText>,
) -> ClinicResult<()> {
    if !availability::is_available(ledger, doctor_id, date, slot)
        || slot_held(appointments, doctor_id, date, slot, except)
    {
        return Err(ClinicError::SlotUnavailable(format!(
            "doctor {doctor_id} on {date} at {slot}"
        )));
    }
    Ok(())
}

fn position(appointments: &[Appointment], appointment_id: &NonEmptyText) -> ClinicResult<usize> {
    appointments
        .iter()
        .position(|appt| &appt.id == appointment_id)
        .ok_or_else(|| ClinicError::AppointmentNotFound(appointment_id.to_string()))
}

/// Appointment requests, doctor decisions and the related queries.
#[derive(Clone, Debug)]
pub struct AppointmentService {
    store: Arc<RecordStore>,
    cfg: Arc<ClinicConfig>,
}

impl AppointmentService {
    pub fn new(store: Arc<RecordStore>, cfg: Arc<ClinicConfig>) -> Self {
        Self { store, cfg }
    }

    /// Creates a `PENDING` appointment for an open slot.
    ///
    /// The slot is not booked until the doctor accepts.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::SlotUnavailable`] if the slot is outside the day's grid, is not
    /// `AVAILABLE`, or is already requested by another active appointment.
    pub fn request_appointment(
        &self,
        doctor_id: &NonEmptyText,
        patient_id: &NonEmptyText,
        date: ClinicDate,
        slot: TimeSlot,
    ) -> ClinicResult<Appointment> {
        if !self.cfg.slot_grid().contains(&slot) {
            return Err(ClinicError::SlotUnavailable(format!(
                "{slot} is outside clinic hours"
            )));
        }

        let mut tx = self.store.begin(&LIFECYCLE_TABLES)?;
        let mut appointments: Vec<Appointment> = tx.load()?;
        let ledger: Vec<AvailabilitySlot> = tx.load()?;
        ensure_requestable(&ledger, &appointments, doctor_id, date, slot, None)?;

        let appointment = Appointment {
            id: next_appointment_id(&appointments)?,
            doctor_id: doctor_id.clone(),
            patient_id: patient_id.clone(),
            date,
            slot,
            status: AppointmentStatus::Pending,
        };
        appointments.push(appointment.clone());
        tx.stage(&appointments)?;
        tx.commit()?;

        tracing::info!(
            appointment_id = %appointment.id,
            doctor_id = %doctor_id,
            patient_id = %patient_id,
            date = %date,
            slot = %slot,
            "appointment requested"
        );
        Ok(appointment)
    }

    /// Confirms a `PENDING` appointment and books its slot.
    ///
    /// Any other `PENDING` request for the same slot is cancelled in the same commit.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::AlreadyDecided`] if the appointment is no longer `PENDING`, or
    /// [`ClinicError::SlotConflict`] if the slot can no longer be booked.
    pub fn accept(&self, appointment_id: &NonEmptyText) -> ClinicResult<Appointment> {
        let mut tx = self.store.begin(&LIFECYCLE_TABLES)?;
        let mut appointments: Vec<Appointment> = tx.load()?;
        let mut ledger: Vec<AvailabilitySlot> = tx.load()?;

        let index = position(&appointments, appointment_id)?;
        let current = appointments[index].clone();
        if current.status != AppointmentStatus::Pending {
            return Err(ClinicError::AlreadyDecided {
                appointment_id: appointment_id.to_string(),
                status: current.status.as_str(),
            });
        }

        availability::mark_booked(
            &mut ledger,
            &current.doctor_id,
            current.date,
            current.slot,
            appointment_id,
        )?;
        appointments[index].status = AppointmentStatus::Confirmed;

        for other in appointments.iter_mut().filter(|appt| {
            &appt.id != appointment_id
                && appt.status == AppointmentStatus::Pending
                && appt.is_at(&current.doctor_id, current.date, current.slot)
        }) {
            other.status = AppointmentStatus::Cancelled;
            tracing::warn!(
                appointment_id = %other.id,
                confirmed = %appointment_id,
                "cancelled competing request for a confirmed slot"
            );
        }

        let confirmed = appointments[index].clone();
        tx.stage(&appointments)?;
        tx.stage(&ledger)?;
        tx.commit()?;

        tracing::info!(
            appointment_id = %appointment_id,
            doctor_id = %confirmed.doctor_id,
            "appointment confirmed"
        );
        Ok(confirmed)
    }

    /// Turns down a `PENDING` appointment.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::AlreadyDecided`] if the appointment is no longer `PENDING`.
    pub fn decline(&self, appointment_id: &NonEmptyText) -> ClinicResult<Appointment> {
        let mut tx = self.store.begin(&LIFECYCLE_TABLES)?;
        let mut appointments: Vec<Appointment> = tx.load()?;
        let mut ledger: Vec<AvailabilitySlot> = tx.load()?;

        let index = position(&appointments, appointment_id)?;
        let appt = &mut appointments[index];
        if appt.status != AppointmentStatus::Pending {
            return Err(ClinicError::AlreadyDecided {
                appointment_id: appointment_id.to_string(),
                status: appt.status.as_str(),
            });
        }
        availability::mark_free(&mut ledger, &appt.doctor_id, appt.date, appt.slot, &appt.id)?;
        appt.status = AppointmentStatus::Cancelled;

        let declined = appt.clone();
        tx.stage(&appointments)?;
        tx.stage(&ledger)?;
        tx.commit()?;

        tracing::info!(appointment_id = %appointment_id, "appointment declined");
        Ok(declined)
    }

    /// Moves an active appointment to another date and slot.
    ///
    /// A `PENDING` appointment stays `PENDING` at the new slot. A `CONFIRMED` appointment stays
    /// `CONFIRMED`: the new slot is booked and the old one released in the same commit.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::InvalidTransition`] for a `COMPLETED` or `CANCELLED` appointment,
    /// and [`ClinicError::SlotUnavailable`] if the new slot cannot be taken. On error the
    /// original appointment and its slot are unchanged.
    pub fn reschedule(
        &self,
        appointment_id: &NonEmptyText,
        new_date: ClinicDate,
        new_slot: TimeSlot,
    ) -> ClinicResult<Appointment> {
        let mut tx = self.store.begin(&LIFECYCLE_TABLES)?;
        let mut appointments: Vec<Appointment> = tx.load()?;
        let mut ledger: Vec<AvailabilitySlot> = tx.load()?;

        let index = position(&appointments, appointment_id)?;
        let current = appointments[index].clone();
        if !current.status.is_active() {
            return Err(ClinicError::InvalidTransition {
                appointment_id: appointment_id.to_string(),
                from: current.status.as_str(),
                to: "rescheduled",
            });
        }
        if current.date == new_date && current.slot == new_slot {
            return Ok(current);
        }

        ensure_requestable(
            &ledger,
            &appointments,
            &current.doctor_id,
            new_date,
            new_slot,
            Some(appointment_id),
        )?;

        if current.status == AppointmentStatus::Confirmed {
            availability::mark_free(
                &mut ledger,
                &current.doctor_id,
                current.date,
                current.slot,
                appointment_id,
            )?;
            availability::mark_booked(
                &mut ledger,
                &current.doctor_id,
                new_date,
                new_slot,
                appointment_id,
            )?;
        }

        let appt = &mut appointments[index];
        appt.date = new_date;
        appt.slot = new_slot;
        let moved = appt.clone();
        tx.stage(&appointments)?;
        tx.stage(&ledger)?;
        tx.commit()?;

        tracing::info!(
            appointment_id = %appointment_id,
            from_date = %current.date,
            from_slot = %current.slot,
            date = %new_date,
            slot = %new_slot,
            "appointment rescheduled"
        );
        Ok(moved)
    }

    /// Cancels a `PENDING` or `CONFIRMED` appointment, releasing its slot if booked.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::InvalidTransition`] from `COMPLETED` or `CANCELLED`.
    pub fn cancel(&self, appointment_id: &NonEmptyText) -> ClinicResult<Appointment> {
        let mut tx = self.store.begin(&LIFECYCLE_TABLES)?;
        let mut appointments: Vec<Appointment> = tx.load()?;
        let mut ledger: Vec<AvailabilitySlot> = tx.load()?;

        let index = position(&appointments, appointment_id)?;
        let appt = &mut appointments[index];
        if !appt.status.is_active() {
            return Err(ClinicError::InvalidTransition {
                appointment_id: appointment_id.to_string(),
                from: appt.status.as_str(),
                to: AppointmentStatus::Cancelled.as_str(),
            });
        }
        let released =
            availability::mark_free(&mut ledger, &appt.doctor_id, appt.date, appt.slot, &appt.id)?;
        appt.status = AppointmentStatus::Cancelled;

        let cancelled = appt.clone();
        tx.stage(&appointments)?;
        tx.stage(&ledger)?;
        tx.commit()?;

        tracing::info!(appointment_id = %appointment_id, released, "appointment cancelled");
        Ok(cancelled)
    }

    pub fn appointment(&self, appointment_id: &NonEmptyText) -> ClinicResult<Appointment> {
        self.store
            .find_by_key(appointment_id.as_str())?
            .ok_or_else(|| ClinicError::AppointmentNotFound(appointment_id.to_string()))
    }

    pub fn appointment_status(
        &self,
        appointment_id: &NonEmptyText,
    ) -> ClinicResult<AppointmentStatus> {
        Ok(self.appointment(appointment_id)?.status)
    }

    /// The doctor's `PENDING` requests, oldest first.
    pub fn pending_requests(&self, doctor_id: &NonEmptyText) -> ClinicResult<Vec<Appointment>> {
        self.filtered(|appt| {
            &appt.doctor_id == doctor_id && appt.status == AppointmentStatus::Pending
        })
    }

    /// The doctor's `CONFIRMED` appointments ordered by date then slot.
    pub fn upcoming_appointments(
        &self,
        doctor_id: &NonEmptyText,
    ) -> ClinicResult<Vec<Appointment>> {
        let mut upcoming = self.filtered(|appt| {
            &appt.doctor_id == doctor_id && appt.status == AppointmentStatus::Confirmed
        })?;
        upcoming.sort_by_key(|appt| (appt.date, appt.slot));
        Ok(upcoming)
    }

    pub fn appointments_on(
        &self,
        doctor_id: &NonEmptyText,
        date: ClinicDate,
    ) -> ClinicResult<Vec<Appointment>> {
        let mut day = self.filtered(|appt| {
            &appt.doctor_id == doctor_id
                && appt.date == date
                && appt.status == AppointmentStatus::Confirmed
        })?;
        day.sort_by_key(|appt| appt.slot);
        Ok(day)
    }

    pub fn appointments_for_patient(
        &self,
        patient_id: &NonEmptyText,
    ) -> ClinicResult<Vec<Appointment>> {
        self.filtered(|appt| &appt.patient_id == patient_id)
    }

    fn filtered(&self, keep: impl Fn(&Appointment) -> bool) -> ClinicResult<Vec<Appointment>> {
        Ok(self
            .store
            .load_all::<Appointment>()?
            .into_iter()
            .filter(|appt| keep(appt))
            .collect())
    }
}
