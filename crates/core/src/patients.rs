//! Patient registration and medical records.

use crate::error::{ClinicError, ClinicResult};
use crate::records::{Appointment, OutcomeRecord, Patient};
use crate::store::{RecordStore, Table};
use clinic_types::{FieldText, NonEmptyText};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct PatientService {
    store: Arc<RecordStore>,
}

impl PatientService {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    /// Registers a new patient.
    ///
    /// Any treatment history on `patient` is kept as given.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::DuplicateKey`] if the patient id is already registered.
    pub fn register_patient(&self, patient: Patient) -> ClinicResult<Patient> {
        self.store.insert(patient.clone())?;
        tracing::info!(patient_id = %patient.id, "patient registered");
        Ok(patient)
    }

    /// The patient row, including past treatments.
    pub fn medical_record(&self, patient_id: &NonEmptyText) -> ClinicResult<Patient> {
        self.store
            .find_by_key(patient_id.as_str())?
            .ok_or_else(|| ClinicError::PatientNotFound(patient_id.to_string()))
    }

    /// Replaces the patient's email and contact number.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::PatientNotFound`] if the patient is not registered.
    pub fn update_contact(
        &self,
        patient_id: &NonEmptyText,
        email: FieldText,
        contact_no: FieldText,
    ) -> ClinicResult<Patient> {
        let updated = self
            .store
            .update_by_key::<Patient, _>(patient_id.as_str(), |patient| {
                patient.email = email;
                patient.contact_no = contact_no;
                Ok(())
            })?
            .ok_or_else(|| ClinicError::PatientNotFound(patient_id.to_string()))?;
        tracing::info!(patient_id = %patient_id, "patient contact updated");
        Ok(updated)
    }

    /// Outcome records of every appointment the patient has had.
    pub fn past_outcomes(&self, patient_id: &NonEmptyText) -> ClinicResult<Vec<OutcomeRecord>> {
        let mut tx = self.store.begin(&[
            Table::Appointment,
            Table::AppointmentRecord,
            Table::Patient,
        ])?;
        let patients: Vec<Patient> = tx.load()?;
        if !patients.iter().any(|patient| &patient.id == patient_id) {
            return Err(ClinicError::PatientNotFound(patient_id.to_string()));
        }

        let appointments: Vec<Appointment> = tx.load()?;
        let theirs: HashSet<&NonEmptyText> = appointments
            .iter()
            .filter(|appt| &appt.patient_id == patient_id)
            .map(|appt| &appt.id)
            .collect();

        Ok(tx
            .load::<OutcomeRecord>()?
            .into_iter()
            .filter(|record| theirs.contains(&record.appointment_id))
            .collect())
    }
}
