//! Doctor availability ledger.
//!
//! Each doctor has, per date, one row per slot of the daily grid with a status of
//! `AVAILABLE`, `UNAVAILABLE` or `BOOKED`. The doctor controls the first two. `BOOKED` is only
//! ever set by confirming an appointment and records which appointment holds the slot.
//!
//! The free functions in this module operate on a ledger already loaded inside a
//! [`Transaction`](crate::store::Transaction), so the appointment and outcome engines can
//! combine slot changes with their own table changes in one commit.

use crate::calendar::{ClinicDate, SlotGrid, TimeSlot};
use crate::config::ClinicConfig;
use crate::error::{ClinicError, ClinicResult};
use crate::records::{Appointment, AppointmentStatus, AvailabilitySlot, SlotStatus};
use crate::store::{RecordStore, Table};
use clinic_types::NonEmptyText;
use std::sync::Arc;

fn describe(doctor_id: &NonEmptyText, date: ClinicDate, slot: TimeSlot) -> String {
    format!("doctor {doctor_id} on {date} at {slot}")
}

pub(crate) fn find_slot<'a>(
    ledger: &'a [AvailabilitySlot],
    doctor_id: &NonEmptyText,
    date: ClinicDate,
    slot: TimeSlot,
) -> Option<&'a AvailabilitySlot> {
    ledger.iter().find(|row| row.is_at(doctor_id, date, slot))
}

pub(crate) fn is_available(
    ledger: &[AvailabilitySlot],
    doctor_id: &NonEmptyText,
    date: ClinicDate,
    slot: TimeSlot,
) -> bool {
    find_slot(ledger, doctor_id, date, slot).is_some_and(|row| row.status == SlotStatus::Available)
}

/// Marks the slot `BOOKED` by `appointment_id`.
///
/// Booking a slot already held by the same appointment is a no-op.
///
/// # Errors
///
/// Returns [`ClinicError::SlotConflict`] if the doctor never opened the slot, closed it, or it
/// is booked by a different appointment.
pub(crate) fn mark_booked(
    ledger: &mut [AvailabilitySlot],
    doctor_id: &NonEmptyText,
    date: ClinicDate,
    slot: TimeSlot,
    appointment_id: &NonEmptyText,
) -> ClinicResult<()> {
    let Some(row) = ledger
        .iter_mut()
        .find(|row| row.is_at(doctor_id, date, slot))
    else {
        return Err(ClinicError::SlotConflict(format!(
            "{} was never made available",
            describe(doctor_id, date, slot)
        )));
    };

    match (row.status, row.booked_by.as_ref()) {
        (SlotStatus::Booked, Some(holder)) if holder == appointment_id => Ok(()),
        (SlotStatus::Booked, holder) => Err(ClinicError::SlotConflict(format!(
            "{} is already booked by {}",
            describe(doctor_id, date, slot),
            holder.map_or("another appointment", NonEmptyText::as_str)
        ))),
        (SlotStatus::Unavailable, _) => Err(ClinicError::SlotConflict(format!(
            "{} is not available",
            describe(doctor_id, date, slot)
        ))),
        (SlotStatus::Available, _) => {
            row.status = SlotStatus::Booked;
            row.booked_by = Some(appointment_id.clone());
            Ok(())
        }
    }
}

/// Returns the slot to `AVAILABLE` if `appointment_id` holds it.
///
/// Returns whether the slot was released. A slot that is not booked is left alone.
///
/// # Errors
///
/// Returns [`ClinicError::SlotConflict`] if the slot is booked by a different appointment.
pub(crate) fn mark_free(
    ledger: &mut [AvailabilitySlot],
    doctor_id: &NonEmptyText,
    date: ClinicDate,
    slot: TimeSlot,
    appointment_id: &NonEmptyText,
) -> ClinicResult<bool> {
    release(ledger, doctor_id, date, slot, appointment_id, SlotStatus::Available)
}

/// Retires a slot whose appointment has been completed.
///
/// The slot leaves `BOOKED` (no confirmed appointment references it any more) but is not
/// offered again.
pub(crate) fn mark_consumed(
    ledger: &mut [AvailabilitySlot],
    doctor_id: &NonEmptyText,
    date: ClinicDate,
    slot: TimeSlot,
    appointment_id: &NonEmptyText,
) -> ClinicResult<bool> {
    release(ledger, doctor_id, date, slot, appointment_id, SlotStatus::Unavailable)
}

fn release(
    ledger: &mut [AvailabilitySlot],
    doctor_id: &NonEmptyText,
    date: ClinicDate,
    slot: TimeSlot,
    appointment_id: &NonEmptyText,
    next: SlotStatus,
) -> ClinicResult<bool> {
    let Some(row) = ledger
        .iter_mut()
        .find(|row| row.is_at(doctor_id, date, slot))
    else {
        return Ok(false);
    };

    match (row.status, row.booked_by.as_ref()) {
        (SlotStatus::Booked, Some(holder)) if holder == appointment_id => {
            row.status = next;
            row.booked_by = None;
            Ok(true)
        }
        (SlotStatus::Booked, _) => Err(ClinicError::SlotConflict(format!(
            "{} is booked by a different appointment",
            describe(doctor_id, date, slot)
        ))),
        _ => Ok(false),
    }
}

/// Rewrites the doctor's rows for `date`: listed slots become `AVAILABLE`, the rest of the
/// grid `UNAVAILABLE`. `BOOKED` rows are kept as they are.
pub(crate) fn apply_availability(
    ledger: &mut Vec<AvailabilitySlot>,
    grid: SlotGrid,
    doctor_id: &NonEmptyText,
    date: ClinicDate,
    wanted: &[TimeSlot],
) -> ClinicResult<()> {
    if let Some(outside) = wanted.iter().find(|slot| !grid.contains(slot)) {
        return Err(ClinicError::SlotConflict(format!(
            "{outside} is outside the daily grid {:02}:00-{:02}:00",
            grid.start_hour(),
            grid.end_hour()
        )));
    }

    let booked: Vec<AvailabilitySlot> = ledger
        .iter()
        .filter(|row| {
            &row.doctor_id == doctor_id && row.date == date && row.status == SlotStatus::Booked
        })
        .cloned()
        .collect();
    ledger.retain(|row| !(&row.doctor_id == doctor_id && row.date == date));

    let grid_slots = grid.slots();
    for slot in &grid_slots {
        if let Some(row) = booked.iter().find(|row| row.slot == *slot) {
            ledger.push(row.clone());
            continue;
        }
        let status = if wanted.contains(slot) {
            SlotStatus::Available
        } else {
            SlotStatus::Unavailable
        };
        ledger.push(AvailabilitySlot {
            doctor_id: doctor_id.clone(),
            date,
            slot: *slot,
            status,
            booked_by: None,
        });
    }
    ledger.extend(
        booked
            .into_iter()
            .filter(|row| !grid_slots.contains(&row.slot)),
    );
    Ok(())
}

/// Doctor-facing operations on the availability ledger.
#[derive(Clone, Debug)]
pub struct AvailabilityService {
    store: Arc<RecordStore>,
    cfg: Arc<ClinicConfig>,
}

impl AvailabilityService {
    pub fn new(store: Arc<RecordStore>, cfg: Arc<ClinicConfig>) -> Self {
        Self { store, cfg }
    }

    /// Replaces the doctor's `AVAILABLE` slots for `date` with `slots`.
    ///
    /// Slots already `BOOKED` are unaffected. Returns the resulting available slots.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::SlotConflict`] if a slot lies outside the configured grid.
    pub fn set_availability(
        &self,
        doctor_id: &NonEmptyText,
        date: ClinicDate,
        slots: &[TimeSlot],
    ) -> ClinicResult<Vec<TimeSlot>> {
        let mut tx = self.store.begin(&[Table::DoctorAvailability])?;
        let mut ledger: Vec<AvailabilitySlot> = tx.load()?;
        apply_availability(&mut ledger, self.cfg.slot_grid(), doctor_id, date, slots)?;
        tx.stage(&ledger)?;
        tx.commit()?;

        let available = available_slots(&ledger, doctor_id, date);
        tracing::info!(
            doctor_id = %doctor_id,
            date = %date,
            available = available.len(),
            "availability set"
        );
        Ok(available)
    }

    /// The doctor's `AVAILABLE` slots for `date`, in chronological order.
    pub fn view_availability(
        &self,
        doctor_id: &NonEmptyText,
        date: ClinicDate,
    ) -> ClinicResult<Vec<TimeSlot>> {
        let ledger: Vec<AvailabilitySlot> = self.store.load_all()?;
        Ok(available_slots(&ledger, doctor_id, date))
    }

    /// Every slot row the doctor has for `date`, in chronological order.
    pub fn schedule(
        &self,
        doctor_id: &NonEmptyText,
        date: ClinicDate,
    ) -> ClinicResult<Vec<AvailabilitySlot>> {
        let mut rows: Vec<AvailabilitySlot> = self
            .store
            .load_all::<AvailabilitySlot>()?
            .into_iter()
            .filter(|row| &row.doctor_id == doctor_id && row.date == date)
            .collect();
        rows.sort_by_key(|row| row.slot);
        Ok(rows)
    }

    /// Books the slot for `appointment_id`, which must be a `CONFIRMED` appointment at that
    /// doctor, date and slot. Re-syncs a confirmed appointment whose booking is missing.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::SlotConflict`] if no such confirmed appointment exists, or the
    /// slot is closed, unopened or held by another appointment.
    pub fn mark_booked(
        &self,
        doctor_id: &NonEmptyText,
        date: ClinicDate,
        slot: TimeSlot,
        appointment_id: &NonEmptyText,
    ) -> ClinicResult<()> {
        let mut tx = self
            .store
            .begin(&[Table::Appointment, Table::DoctorAvailability])?;
        let appointments: Vec<Appointment> = tx.load()?;
        if !confirmed_at(&appointments, doctor_id, date, slot, appointment_id) {
            return Err(ClinicError::SlotConflict(format!(
                "{} can only be booked by a confirmed appointment, not {appointment_id}",
                describe(doctor_id, date, slot)
            )));
        }

        let mut ledger: Vec<AvailabilitySlot> = tx.load()?;
        mark_booked(&mut ledger, doctor_id, date, slot, appointment_id)?;
        tx.stage(&ledger)?;
        tx.commit()
    }

    /// Releases a booking that no confirmed appointment backs any more.
    ///
    /// Returns whether the slot was released.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::SlotConflict`] if `appointment_id` is still `CONFIRMED` for the
    /// slot (cancel it instead), or the slot is held by another appointment.
    pub fn mark_free(
        &self,
        doctor_id: &NonEmptyText,
        date: ClinicDate,
        slot: TimeSlot,
        appointment_id: &NonEmptyText,
    ) -> ClinicResult<bool> {
        let mut tx = self
            .store
            .begin(&[Table::Appointment, Table::DoctorAvailability])?;
        let appointments: Vec<Appointment> = tx.load()?;
        if confirmed_at(&appointments, doctor_id, date, slot, appointment_id) {
            return Err(ClinicError::SlotConflict(format!(
                "{} is held by confirmed appointment {appointment_id}",
                describe(doctor_id, date, slot)
            )));
        }

        let mut ledger: Vec<AvailabilitySlot> = tx.load()?;
        let released = mark_free(&mut ledger, doctor_id, date, slot, appointment_id)?;
        if released {
            tx.stage(&ledger)?;
            tx.commit()?;
            tracing::warn!(
                appointment_id = %appointment_id,
                slot = %describe(doctor_id, date, slot),
                "released stale booking"
            );
        }
        Ok(released)
    }
}

fn confirmed_at(
    appointments: &[Appointment],
    doctor_id: &NonEmptyText,
    date: ClinicDate,
    slot: TimeSlot,
    appointment_id: &NonEmptyText,
) -> bool {
    appointments.iter().any(|appt| {
        &appt.id == appointment_id
            && appt.status == AppointmentStatus::Confirmed
            && appt.is_at(doctor_id, date, slot)
    })
}

fn available_slots(
    ledger: &[AvailabilitySlot],
    doctor_id: &NonEmptyText,
    date: ClinicDate,
) -> Vec<TimeSlot> {
    let mut slots: Vec<TimeSlot> = ledger
        .iter()
        .filter(|row| {
            &row.doctor_id == doctor_id && row.date == date && row.status == SlotStatus::Available
        })
        .map(|row| row.slot)
        .collect();
    slots.sort();
    slots
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::PriceTable;
    use std::path::Path;
    use tempfile::TempDir;

    pub(crate) fn test_cfg(data_dir: &Path) -> Arc<ClinicConfig> {
        Arc::new(ClinicConfig::new(
            data_dir.to_path_buf(),
            SlotGrid::new(9, 17).expect("SlotGrid::new should succeed"),
            PriceTable::default(),
        ))
    }

    pub(crate) fn id(value: &str) -> NonEmptyText {
        NonEmptyText::new(value).unwrap()
    }

    pub(crate) fn slot(value: &str) -> TimeSlot {
        TimeSlot::parse(value).unwrap()
    }

    pub(crate) fn date(value: &str) -> ClinicDate {
        ClinicDate::parse(value).unwrap()
    }

    fn service(temp_dir: &TempDir) -> AvailabilityService {
        let cfg = test_cfg(temp_dir.path());
        let store = Arc::new(RecordStore::open(cfg.data_dir()).unwrap());
        AvailabilityService::new(store, cfg)
    }

    fn appointment(appointment_id: &str, at: &str, status: AppointmentStatus) -> Appointment {
        Appointment {
            id: id(appointment_id),
            doctor_id: id("D001"),
            patient_id: id("P001"),
            date: date("2024-01-10"),
            slot: slot(at),
            status,
        }
    }

    fn record_appointments(service: &AvailabilityService, appointments: &[Appointment]) {
        service.store.save_all(appointments).unwrap();
    }

    #[test]
    fn set_availability_lists_open_slots_in_order() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let service = service(&temp_dir);

        let available = service
            .set_availability(
                &id("D001"),
                date("2024-01-10"),
                &[slot("09:30-10:00"), slot("09:00-09:30")],
            )
            .unwrap();
        assert_eq!(available, vec![slot("09:00-09:30"), slot("09:30-10:00")]);

        let schedule = service.schedule(&id("D001"), date("2024-01-10")).unwrap();
        assert_eq!(schedule.len(), 16);
        assert_eq!(schedule[2].status, SlotStatus::Unavailable);
    }

    #[test]
    fn set_availability_replaces_previous_set() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let service = service(&temp_dir);
        let doctor = id("D001");
        let day = date("2024-01-10");

        service
            .set_availability(&doctor, day, &[slot("09:00-09:30"), slot("10:00-10:30")])
            .unwrap();
        service
            .set_availability(&doctor, day, &[slot("11:00-11:30")])
            .unwrap();

        assert_eq!(
            service.view_availability(&doctor, day).unwrap(),
            vec![slot("11:00-11:30")]
        );
        assert_eq!(service.schedule(&doctor, day).unwrap().len(), 16);
    }

    #[test]
    fn set_availability_keeps_booked_slots() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let service = service(&temp_dir);
        let doctor = id("D001");
        let day = date("2024-01-10");
        record_appointments(
            &service,
            &[appointment("A1", "09:00-09:30", AppointmentStatus::Confirmed)],
        );

        service
            .set_availability(&doctor, day, &[slot("09:00-09:30")])
            .unwrap();
        service
            .mark_booked(&doctor, day, slot("09:00-09:30"), &id("A1"))
            .unwrap();
        service.set_availability(&doctor, day, &[]).unwrap();

        let schedule = service.schedule(&doctor, day).unwrap();
        assert_eq!(schedule[0].status, SlotStatus::Booked);
        assert_eq!(schedule[0].booked_by, Some(id("A1")));
    }

    #[test]
    fn set_availability_rejects_slots_outside_grid() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let service = service(&temp_dir);

        let err = service
            .set_availability(&id("D001"), date("2024-01-10"), &[slot("18:00-18:30")])
            .expect_err("outside grid");
        assert!(matches!(err, ClinicError::SlotConflict(_)));
    }

    #[test]
    fn availability_is_per_doctor_and_date() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let service = service(&temp_dir);

        service
            .set_availability(&id("D001"), date("2024-01-10"), &[slot("09:00-09:30")])
            .unwrap();

        assert!(service
            .view_availability(&id("D002"), date("2024-01-10"))
            .unwrap()
            .is_empty());
        assert!(service
            .view_availability(&id("D001"), date("2024-01-11"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn mark_booked_requires_confirmed_appointment() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let service = service(&temp_dir);
        let doctor = id("D001");
        let day = date("2024-01-10");
        service
            .set_availability(&doctor, day, &[slot("09:00-09:30")])
            .unwrap();

        let unknown = service
            .mark_booked(&doctor, day, slot("09:00-09:30"), &id("GHOST"))
            .expect_err("no such appointment");
        assert!(matches!(unknown, ClinicError::SlotConflict(_)));

        record_appointments(
            &service,
            &[appointment("A1", "09:00-09:30", AppointmentStatus::Pending)],
        );
        let pending = service
            .mark_booked(&doctor, day, slot("09:00-09:30"), &id("A1"))
            .expect_err("not confirmed");
        assert!(matches!(pending, ClinicError::SlotConflict(_)));

        assert_eq!(
            service.view_availability(&doctor, day).unwrap(),
            vec![slot("09:00-09:30")]
        );
    }

    #[test]
    fn mark_booked_conflicts() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let service = service(&temp_dir);
        let doctor = id("D001");
        let day = date("2024-01-10");
        record_appointments(
            &service,
            &[
                appointment("A1", "09:00-09:30", AppointmentStatus::Confirmed),
                appointment("A2", "09:00-09:30", AppointmentStatus::Confirmed),
                appointment("A3", "10:00-10:30", AppointmentStatus::Confirmed),
            ],
        );

        let never_opened = service
            .mark_booked(&doctor, day, slot("09:00-09:30"), &id("A1"))
            .expect_err("never opened");
        assert!(matches!(never_opened, ClinicError::SlotConflict(_)));

        service
            .set_availability(&doctor, day, &[slot("09:00-09:30")])
            .unwrap();
        service
            .mark_booked(&doctor, day, slot("09:00-09:30"), &id("A1"))
            .unwrap();
        service
            .mark_booked(&doctor, day, slot("09:00-09:30"), &id("A1"))
            .expect("re-booking by the holder is a no-op");

        let taken = service
            .mark_booked(&doctor, day, slot("09:00-09:30"), &id("A2"))
            .expect_err("held by A1");
        assert!(matches!(taken, ClinicError::SlotConflict(_)));

        let closed = service
            .mark_booked(&doctor, day, slot("10:00-10:30"), &id("A3"))
            .expect_err("unavailable");
        assert!(matches!(closed, ClinicError::SlotConflict(_)));

        let elsewhere = service
            .mark_booked(&doctor, day, slot("10:00-10:30"), &id("A1"))
            .expect_err("A1 is not at this slot");
        assert!(matches!(elsewhere, ClinicError::SlotConflict(_)));
    }

    #[test]
    fn mark_free_only_releases_stale_bookings() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let service = service(&temp_dir);
        let doctor = id("D001");
        let day = date("2024-01-10");
        record_appointments(
            &service,
            &[appointment("A1", "09:00-09:30", AppointmentStatus::Confirmed)],
        );

        service
            .set_availability(&doctor, day, &[slot("09:00-09:30")])
            .unwrap();
        service
            .mark_booked(&doctor, day, slot("09:00-09:30"), &id("A1"))
            .unwrap();

        let confirmed = service
            .mark_free(&doctor, day, slot("09:00-09:30"), &id("A1"))
            .expect_err("still confirmed");
        assert!(matches!(confirmed, ClinicError::SlotConflict(_)));

        record_appointments(
            &service,
            &[appointment("A1", "09:00-09:30", AppointmentStatus::Cancelled)],
        );
        let err = service
            .mark_free(&doctor, day, slot("09:00-09:30"), &id("A2"))
            .expect_err("not the holder");
        assert!(matches!(err, ClinicError::SlotConflict(_)));

        assert!(service
            .mark_free(&doctor, day, slot("09:00-09:30"), &id("A1"))
            .unwrap());
        assert!(!service
            .mark_free(&doctor, day, slot("09:00-09:30"), &id("A1"))
            .unwrap());
        assert_eq!(
            service.view_availability(&doctor, day).unwrap(),
            vec![slot("09:00-09:30")]
        );
    }

    #[test]
    fn consumed_slot_is_not_offered_again() {
        let doctor = id("D001");
        let day = date("2024-01-10");
        let mut ledger = Vec::new();
        apply_availability(
            &mut ledger,
            SlotGrid::new(9, 10).unwrap(),
            &doctor,
            day,
            &[slot("09:00-09:30")],
        )
        .unwrap();
        mark_booked(&mut ledger, &doctor, day, slot("09:00-09:30"), &id("A1")).unwrap();

        assert!(mark_consumed(&mut ledger, &doctor, day, slot("09:00-09:30"), &id("A1")).unwrap());
        assert!(!is_available(&ledger, &doctor, day, slot("09:00-09:30")));
        assert_eq!(ledger[0].status, SlotStatus::Unavailable);
        assert_eq!(ledger[0].booked_by, None);
    }
}
