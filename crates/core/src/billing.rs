//! Bills raised by dispensing, and their payment.

use crate::constants::DEFAULT_BILL_FEEDBACK;
use crate::error::{ClinicError, ClinicResult};
use crate::records::{Bill, BillStatus};
use crate::store::RecordStore;
use clinic_types::{FieldText, NonEmptyText};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct BillingService {
    store: Arc<RecordStore>,
}

impl BillingService {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    pub fn bill(&self, appointment_id: &NonEmptyText) -> ClinicResult<Bill> {
        self.store
            .find_by_key(appointment_id.as_str())?
            .ok_or_else(|| ClinicError::BillNotFound(appointment_id.to_string()))
    }

    pub fn bills(&self) -> ClinicResult<Vec<Bill>> {
        self.store.load_all()
    }

    /// Settles a `PENDING` bill, storing the patient's feedback (`na` when none is given).
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::BillNotFound`] if no bill exists for the appointment and
    /// [`ClinicError::BillAlreadyPaid`] if it was settled before.
    pub fn pay_bill(
        &self,
        appointment_id: &NonEmptyText,
        feedback: Option<FieldText>,
    ) -> ClinicResult<Bill> {
        let feedback = match feedback.filter(|text| !text.is_empty()) {
            Some(text) => text,
            None => FieldText::new(DEFAULT_BILL_FEEDBACK)?,
        };

        let paid = self
            .store
            .update_by_key::<Bill, _>(appointment_id.as_str(), |bill| {
                if bill.status == BillStatus::Paid {
                    return Err(ClinicError::BillAlreadyPaid(appointment_id.to_string()));
                }
                bill.status = BillStatus::Paid;
                bill.feedback = feedback;
                Ok(())
            })?
            .ok_or_else(|| ClinicError::BillNotFound(appointment_id.to_string()))?;

        tracing::info!(appointment_id = %appointment_id, amount = paid.amount, "bill paid");
        Ok(paid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::tests::id;
    use tempfile::TempDir;

    fn setup() -> (TempDir, BillingService) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(RecordStore::open(temp_dir.path()).unwrap());
        store
            .save_all(&[Bill {
                appointment_id: id("A1"),
                amount: 0.5,
                status: BillStatus::Pending,
                feedback: FieldText::new("na").unwrap(),
            }])
            .unwrap();
        (temp_dir, BillingService::new(store))
    }

    #[test]
    fn pay_bill_records_feedback_once() {
        let (_temp_dir, service) = setup();

        let paid = service
            .pay_bill(&id("A1"), Some(FieldText::new("Quick service").unwrap()))
            .unwrap();
        assert_eq!(paid.status, BillStatus::Paid);
        assert_eq!(paid.feedback.as_str(), "Quick service");
        assert_eq!(service.bill(&id("A1")).unwrap(), paid);

        let err = service.pay_bill(&id("A1"), None).expect_err("already paid");
        assert!(matches!(err, ClinicError::BillAlreadyPaid(_)));
        assert_eq!(service.bill(&id("A1")).unwrap().feedback.as_str(), "Quick service");
    }

    #[test]
    fn missing_feedback_defaults_to_na() {
        let (_temp_dir, service) = setup();
        let paid = service
            .pay_bill(&id("A1"), Some(FieldText::default()))
            .unwrap();
        assert_eq!(paid.feedback.as_str(), "na");
    }

    #[test]
    fn unknown_bill_is_reported() {
        let (_temp_dir, service) = setup();
        assert!(matches!(
            service.bill(&id("A9")),
            Err(ClinicError::BillNotFound(_))
        ));
        assert!(matches!(
            service.pay_bill(&id("A9"), None),
            Err(ClinicError::BillNotFound(_))
        ));
        assert_eq!(service.bills().unwrap().len(), 1);
    }
}
