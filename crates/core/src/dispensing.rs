//! Dispensing and inventory.
//!
//! A dispense touches up to four tables: the outcome's prescription status, the medicine's
//! stock, the new bill and (with automatic replenishment configured) a restock request. All of
//! them are staged in one [`Transaction`](crate::store::Transaction) and become visible together
//! or not at all.

use crate::config::ClinicConfig;
use crate::constants::DEFAULT_BILL_FEEDBACK;
use crate::error::{ClinicError, ClinicResult};
use crate::records::{
    Appointment, AppointmentStatus, Bill, BillStatus, Medicine, OutcomeRecord, PrescriptionStatus,
    ReplenishmentRequest, RequestStatus,
};
use crate::replenishment::allocate_request_id;
use crate::store::{RecordStore, Table};
use clinic_types::{FieldText, NonEmptyText};
use serde::Serialize;
use std::sync::Arc;

/// Everything a successful dispense produced.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DispenseReceipt {
    pub outcome: OutcomeRecord,
    /// The medicine after its stock was decremented.
    pub medicine: Medicine,
    pub bill: Bill,
    pub low_stock: bool,
    pub replenishment: Option<ReplenishmentRequest>,
}

#[derive(Clone, Debug)]
pub struct DispensingService {
    store: Arc<RecordStore>,
    cfg: Arc<ClinicConfig>,
}

impl DispensingService {
    pub fn new(store: Arc<RecordStore>, cfg: Arc<ClinicConfig>) -> Self {
        Self { store, cfg }
    }

    /// Fulfils the pending prescription of `appointment_id` and bills for it.
    ///
    /// # Errors
    ///
    /// - [`ClinicError::AppointmentNotFound`] if there is no outcome for the appointment.
    /// - [`ClinicError::AlreadyDispensed`] if the prescription is no longer `PENDING`.
    /// - [`ClinicError::MedicineNotFound`] if the prescribed medicine is not stocked.
    /// - [`ClinicError::InsufficientStock`] if stock is below the prescribed quantity.
    ///
    /// No table changes on any of these errors.
    pub fn dispense(&self, appointment_id: &NonEmptyText) -> ClinicResult<DispenseReceipt> {
        let mut tx = self.store.begin(&[
            Table::AppointmentRecord,
            Table::Medicine,
            Table::ReplenishmentRequest,
            Table::Bill,
        ])?;
        let mut records: Vec<OutcomeRecord> = tx.load()?;
        let mut medicines: Vec<Medicine> = tx.load()?;
        let mut bills: Vec<Bill> = tx.load()?;

        let outcome = records
            .iter_mut()
            .find(|record| &record.appointment_id == appointment_id)
            .ok_or_else(|| ClinicError::AppointmentNotFound(appointment_id.to_string()))?;
        if outcome.prescription_status != PrescriptionStatus::Pending
            || bills.iter().any(|bill| &bill.appointment_id == appointment_id)
        {
            return Err(ClinicError::AlreadyDispensed(appointment_id.to_string()));
        }

        let medicine = medicines
            .iter_mut()
            .find(|medicine| medicine.name.eq_ignore_case(outcome.medicine.as_str()))
            .ok_or_else(|| ClinicError::MedicineNotFound(outcome.medicine.to_string()))?;
        let remaining = medicine.stock.checked_sub(outcome.quantity).ok_or_else(|| {
            ClinicError::InsufficientStock {
                medicine: medicine.name.to_string(),
                available: medicine.stock,
                requested: outcome.quantity,
            }
        })?;

        medicine.stock = remaining;
        outcome.prescription_status = PrescriptionStatus::Dispensed;
        let bill = Bill {
            appointment_id: appointment_id.clone(),
            amount: self.cfg.price_table().unit_price(outcome.medicine.as_str())
                * f64::from(outcome.quantity),
            status: BillStatus::Pending,
            feedback: FieldText::new(DEFAULT_BILL_FEEDBACK)?,
        };
        bills.push(bill.clone());

        let outcome = outcome.clone();
        let medicine = medicine.clone();
        let low_stock = medicine.is_low();

        let replenishment = match self.cfg.auto_replenish_quantity() {
            Some(quantity) if low_stock => {
                let mut requests: Vec<ReplenishmentRequest> = tx.load()?;
                let request = ReplenishmentRequest {
                    id: allocate_request_id(&requests, &mut rand::thread_rng())?,
                    medicine: medicine.name.clone(),
                    quantity,
                    status: RequestStatus::Pending,
                };
                requests.push(request.clone());
                tx.stage(&requests)?;
                Some(request)
            }
            _ => None,
        };

        tx.stage(&records)?;
        tx.stage(&medicines)?;
        tx.stage(&bills)?;
        tx.commit()?;

        tracing::info!(
            appointment_id = %appointment_id,
            medicine = %medicine.name,
            quantity = outcome.quantity,
            remaining,
            amount = bill.amount,
            "prescription dispensed"
        );
        if low_stock {
            tracing::warn!(
                medicine = %medicine.name,
                remaining,
                threshold = medicine.low_stock_threshold,
                replenishment = ?replenishment.as_ref().map(|request| request.id.as_str()),
                "medicine below low-stock threshold"
            );
        }

        Ok(DispenseReceipt {
            outcome,
            medicine,
            bill,
            low_stock,
            replenishment,
        })
    }

    /// The outcome of a completed appointment.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::AppointmentNotFound`] for an unknown appointment and
    /// [`ClinicError::OutcomeNotFound`] while it is not `COMPLETED`.
    pub fn view_outcome(&self, appointment_id: &NonEmptyText) -> ClinicResult<OutcomeRecord> {
        let mut tx = self
            .store
            .begin(&[Table::Appointment, Table::AppointmentRecord])?;
        let appointments: Vec<Appointment> = tx.load()?;
        let appt = appointments
            .iter()
            .find(|appt| &appt.id == appointment_id)
            .ok_or_else(|| ClinicError::AppointmentNotFound(appointment_id.to_string()))?;
        if appt.status != AppointmentStatus::Completed {
            return Err(ClinicError::OutcomeNotFound(appointment_id.to_string()));
        }

        tx.load::<OutcomeRecord>()?
            .into_iter()
            .find(|record| &record.appointment_id == appointment_id)
            .ok_or_else(|| ClinicError::OutcomeNotFound(appointment_id.to_string()))
    }

    pub fn pending_prescriptions(&self) -> ClinicResult<Vec<OutcomeRecord>> {
        Ok(self
            .store
            .load_all::<OutcomeRecord>()?
            .into_iter()
            .filter(|record| record.prescription_status == PrescriptionStatus::Pending)
            .collect())
    }

    pub fn inventory(&self) -> ClinicResult<Vec<Medicine>> {
        self.store.load_all()
    }

    /// Medicines whose stock is strictly below their threshold.
    pub fn low_stock(&self) -> ClinicResult<Vec<Medicine>> {
        Ok(self
            .inventory()?
            .into_iter()
            .filter(Medicine::is_low)
            .collect())
    }

    /// Adds a medicine to the inventory.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::DuplicateKey`] if a medicine of the same name (ignoring case) is
    /// already stocked.
    pub fn add_medicine(&self, medicine: Medicine) -> ClinicResult<Medicine> {
        let mut tx = self.store.begin(&[Table::Medicine])?;
        let mut medicines: Vec<Medicine> = tx.load()?;
        if let Some(existing) = medicines
            .iter()
            .find(|existing| existing.name.eq_ignore_case(medicine.name.as_str()))
        {
            return Err(ClinicError::DuplicateKey {
                table: Table::Medicine,
                key: existing.name.to_string(),
            });
        }
        medicines.push(medicine.clone());
        tx.stage(&medicines)?;
        tx.commit()?;

        tracing::info!(medicine = %medicine.name, stock = medicine.stock, "medicine added");
        Ok(medicine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::tests::{date, id, test_cfg};
    use crate::outcomes::tests::{confirmed_appointment, new_outcome, patient};
    use crate::outcomes::OutcomeService;
    use crate::replenishment::ReplenishmentService;
    use crate::store::force_replace_failure;
    use std::fs;
    use tempfile::TempDir;

    fn medicine(name: &str, stock: u32, threshold: u32) -> Medicine {
        Medicine {
            name: id(name),
            stock,
            low_stock_threshold: threshold,
        }
    }

    fn prescription(appointment_id: &str, medicine: &str, quantity: u32) -> OutcomeRecord {
        OutcomeRecord {
            appointment_id: id(appointment_id),
            diagnosis: id("Fever"),
            medicine: id(medicine),
            quantity,
            prescription_status: PrescriptionStatus::Pending,
            treatment_plan: FieldText::default(),
            date: date("2024-01-10"),
            service_type: FieldText::default(),
            notes: FieldText::default(),
        }
    }

    fn setup_with(cfg: Arc<ClinicConfig>) -> (Arc<RecordStore>, DispensingService) {
        let store = Arc::new(RecordStore::open(cfg.data_dir()).unwrap());
        store.save_all(&[medicine("paracetamol", 10, 5)]).unwrap();
        store
            .save_all(&[prescription("A1", "paracetamol", 4)])
            .unwrap();
        let service = DispensingService::new(store.clone(), cfg);
        (store, service)
    }

    fn setup(temp_dir: &TempDir) -> (Arc<RecordStore>, DispensingService) {
        setup_with(test_cfg(temp_dir.path()))
    }

    fn stock(store: &RecordStore) -> u32 {
        store
            .find_by_key::<Medicine>("paracetamol")
            .unwrap()
            .unwrap()
            .stock
    }

    fn table_snapshot(store: &RecordStore) -> Vec<String> {
        Table::ALL
            .iter()
            .map(|table| fs::read_to_string(store.table_path(*table)).unwrap())
            .collect()
    }

    #[test]
    fn dispense_decrements_stock_and_bills() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let (store, service) = setup(&temp_dir);

        let receipt = service.dispense(&id("A1")).unwrap();
        assert_eq!(receipt.medicine.stock, 6);
        assert_eq!(
            receipt.outcome.prescription_status,
            PrescriptionStatus::Dispensed
        );
        assert_eq!(
            receipt.bill,
            Bill {
                appointment_id: id("A1"),
                amount: 0.5,
                status: BillStatus::Pending,
                feedback: FieldText::new("na").unwrap(),
            }
        );
        assert!(!receipt.low_stock);
        assert_eq!(stock(&store), 6);
        assert_eq!(store.load_all::<Bill>().unwrap(), vec![receipt.bill]);

        let err = service.dispense(&id("A1")).expect_err("second dispense");
        assert!(matches!(err, ClinicError::AlreadyDispensed(_)));
        assert_eq!(stock(&store), 6);
        assert_eq!(store.load_all::<Bill>().unwrap().len(), 1);
    }

    #[test]
    fn insufficient_stock_changes_nothing() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let (store, service) = setup(&temp_dir);
        store.save_all(&[medicine("paracetamol", 3, 5)]).unwrap();
        let before = table_snapshot(&store);

        let err = service.dispense(&id("A1")).expect_err("not enough stock");
        assert!(matches!(
            err,
            ClinicError::InsufficientStock {
                available: 3,
                requested: 4,
                ..
            }
        ));
        assert_eq!(table_snapshot(&store), before);
    }

    #[test]
    fn unknown_medicine_and_appointment_are_reported() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let (store, service) = setup(&temp_dir);
        store
            .save_all(&[
                prescription("A1", "paracetamol", 4),
                prescription("A2", "NA", 0),
            ])
            .unwrap();

        assert!(matches!(
            service.dispense(&id("A2")),
            Err(ClinicError::MedicineNotFound(name)) if name == "NA"
        ));
        assert!(matches!(
            service.dispense(&id("A3")),
            Err(ClinicError::AppointmentNotFound(_))
        ));
    }

    #[test]
    fn medicine_lookup_ignores_case_and_unpriced_bills_zero() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let (store, service) = setup(&temp_dir);
        store
            .save_all(&[medicine("Paracetamol", 10, 5), medicine("Cetirizine", 5, 1)])
            .unwrap();
        store
            .save_all(&[
                prescription("A1", "PARACETAMOL", 2),
                prescription("A2", "cetirizine", 1),
            ])
            .unwrap();

        assert_eq!(service.dispense(&id("A1")).unwrap().bill.amount, 0.25);
        assert_eq!(service.dispense(&id("A2")).unwrap().bill.amount, 0.0);
    }

    #[test]
    fn failed_bill_write_rolls_back_stock_and_status() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let (store, service) = setup(&temp_dir);
        let before = table_snapshot(&store);

        force_replace_failure(Table::Bill);
        let err = service.dispense(&id("A1")).expect_err("bill write fails");
        assert!(matches!(
            err,
            ClinicError::StoreUnavailable {
                table: Table::Bill,
                ..
            }
        ));
        assert_eq!(table_snapshot(&store), before);

        let receipt = service.dispense(&id("A1")).expect("retry succeeds");
        assert_eq!(receipt.medicine.stock, 6);
    }

    #[test]
    fn low_stock_is_flagged_and_listed() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let (store, service) = setup(&temp_dir);
        store
            .save_all(&[prescription("A1", "paracetamol", 6)])
            .unwrap();

        let receipt = service.dispense(&id("A1")).unwrap();
        assert!(receipt.low_stock);
        assert_eq!(receipt.replenishment, None);
        assert_eq!(service.low_stock().unwrap(), vec![medicine("paracetamol", 4, 5)]);
        assert!(store.load_all::<ReplenishmentRequest>().unwrap().is_empty());
    }

    #[test]
    fn auto_replenish_files_request_in_same_commit() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let cfg = test_cfg(temp_dir.path());
        let cfg = Arc::new((*cfg).clone().with_auto_replenish(Some(25)));
        let (store, service) = setup_with(cfg);
        store
            .save_all(&[prescription("A1", "paracetamol", 6)])
            .unwrap();

        let receipt = service.dispense(&id("A1")).unwrap();
        let request = receipt.replenishment.expect("auto request");
        assert_eq!(request.quantity, 25);
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(
            store.load_all::<ReplenishmentRequest>().unwrap(),
            vec![request]
        );
    }

    #[test]
    fn replenishment_round_trip_unblocks_dispense() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let (store, service) = setup(&temp_dir);
        store.save_all(&[medicine("paracetamol", 1, 5)]).unwrap();
        let replenishment = ReplenishmentService::new(store.clone());

        assert!(matches!(
            service.dispense(&id("A1")),
            Err(ClinicError::InsufficientStock { .. })
        ));

        let filed = replenishment.submit(&id("paracetamol"), 10).unwrap();
        replenishment.approve(&filed.id).unwrap();

        let receipt = service.dispense(&id("A1")).unwrap();
        assert_eq!(receipt.medicine.stock, 7);
    }

    #[test]
    fn concurrent_dispenses_never_oversell() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let (store, service) = setup(&temp_dir);
        let prescriptions: Vec<_> = (1..=8)
            .map(|n| prescription(&format!("A{n}"), "paracetamol", 3))
            .collect();
        store.save_all(&prescriptions).unwrap();

        let dispensed = std::thread::scope(|scope| {
            let handles: Vec<_> = (1..=8)
                .map(|n| {
                    let service = &service;
                    scope.spawn(move || service.dispense(&id(&format!("A{n}"))).is_ok())
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("thread panicked"))
                .filter(|ok| *ok)
                .count()
        });

        assert_eq!(dispensed, 3);
        assert_eq!(stock(&store), 1);
        assert_eq!(store.load_all::<Bill>().unwrap().len(), 3);
        assert_eq!(service.pending_prescriptions().unwrap().len(), 5);
    }

    #[test]
    fn separate_sessions_dispense_a_prescription_once() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let cfg = test_cfg(temp_dir.path());
        let (store, _) = setup_with(cfg.clone());
        let sessions: Vec<DispensingService> = (0..4)
            .map(|_| {
                let own_store = Arc::new(RecordStore::open(temp_dir.path()).unwrap());
                DispensingService::new(own_store, cfg.clone())
            })
            .collect();

        let dispensed = std::thread::scope(|scope| {
            let handles: Vec<_> = sessions
                .iter()
                .map(|session| scope.spawn(move || session.dispense(&id("A1")).is_ok()))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("thread panicked"))
                .filter(|ok| *ok)
                .count()
        });

        assert_eq!(dispensed, 1);
        assert_eq!(stock(&store), 6);
        assert_eq!(store.load_all::<Bill>().unwrap().len(), 1);
    }

    #[test]
    fn view_outcome_requires_completed_appointment() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let cfg = test_cfg(temp_dir.path());
        let store = Arc::new(RecordStore::open(cfg.data_dir()).unwrap());
        store.insert(patient("P001")).unwrap();
        let appt = confirmed_appointment(&store, &temp_dir);
        let service = DispensingService::new(store.clone(), cfg);

        assert!(matches!(
            service.view_outcome(&appt.id),
            Err(ClinicError::OutcomeNotFound(_))
        ));

        OutcomeService::new(store.clone())
            .record_outcome(&appt.id, new_outcome("2024-01-10", "paracetamol", 4))
            .unwrap();
        let outcome = service.view_outcome(&appt.id).unwrap();
        assert_eq!(outcome.quantity, 4);
    }

    #[test]
    fn add_medicine_rejects_case_insensitive_duplicates() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let (_store, service) = setup(&temp_dir);

        service.add_medicine(medicine("Ibuprofen", 30, 10)).unwrap();
        let err = service
            .add_medicine(medicine("PARACETAMOL", 1, 1))
            .expect_err("duplicate");
        assert!(matches!(
            err,
            ClinicError::DuplicateKey {
                table: Table::Medicine,
                ..
            }
        ));
        assert_eq!(service.inventory().unwrap().len(), 2);
    }
}
