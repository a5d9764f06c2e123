//! Replenishment requests and their approval.
//!
//! Pharmacists (or automatic low-stock detection during a dispense) file requests. An
//! administrator approves a request, which restocks the medicine in the same commit, or
//! rejects it.

use crate::constants::REPLENISHMENT_ID_PREFIX;
use crate::error::{ClinicError, ClinicResult};
use crate::records::{Medicine, ReplenishmentRequest, RequestStatus};
use crate::store::{RecordStore, Table};
use clinic_types::NonEmptyText;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;

const RANDOM_ID_ATTEMPTS: usize = 5;
const MIN_ID_DIGITS: u32 = 3;

/// Picks an `RR` id not used by any request in `existing`.
///
/// Random three-digit ids are tried first. If those keep colliding the id space is scanned in
/// order, widening to more digits once every three-digit id is taken.
pub(crate) fn allocate_request_id<R: Rng + ?Sized>(
    existing: &[ReplenishmentRequest],
    rng: &mut R,
) -> ClinicResult<NonEmptyText> {
    let taken: HashSet<&str> = existing.iter().map(|request| request.id.as_str()).collect();
    let random_limit = 10u64.pow(MIN_ID_DIGITS);

    for _ in 0..RANDOM_ID_ATTEMPTS {
        let candidate = format!(
            "{REPLENISHMENT_ID_PREFIX}{:0width$}",
            rng.gen_range(0..random_limit),
            width = MIN_ID_DIGITS as usize
        );
        if !taken.contains(candidate.as_str()) {
            return Ok(NonEmptyText::new(candidate)?);
        }
    }

    tracing::debug!(
        outstanding = taken.len(),
        "random replenishment ids collided, scanning for a free id"
    );
    let mut digits = MIN_ID_DIGITS;
    loop {
        for n in 0..10u64.pow(digits) {
            let candidate = format!(
                "{REPLENISHMENT_ID_PREFIX}{n:0width$}",
                width = digits as usize
            );
            if !taken.contains(candidate.as_str()) {
                return Ok(NonEmptyText::new(candidate)?);
            }
        }
        digits += 1;
    }
}

/// Adds `quantity` to the stock of the medicine named `name` (case-insensitive).
pub(crate) fn restock(medicines: &mut [Medicine], name: &str, quantity: u32) -> ClinicResult<u32> {
    let medicine = medicines
        .iter_mut()
        .find(|medicine| medicine.name.eq_ignore_case(name))
        .ok_or_else(|| ClinicError::MedicineNotFound(name.to_string()))?;
    medicine.stock = medicine.stock.checked_add(quantity).ok_or_else(|| {
        ClinicError::InvalidInput(format!(
            "restocking {} by {quantity} overflows its stock count",
            medicine.name
        ))
    })?;
    Ok(medicine.stock)
}

#[derive(Clone, Debug)]
pub struct ReplenishmentService {
    store: Arc<RecordStore>,
}

impl ReplenishmentService {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    /// Files a `PENDING` request to restock `medicine` by `quantity`.
    ///
    /// Stock is not consulted; any caller may ask for a restock.
    pub fn submit(
        &self,
        medicine: &NonEmptyText,
        quantity: u32,
    ) -> ClinicResult<ReplenishmentRequest> {
        let mut tx = self.store.begin(&[Table::ReplenishmentRequest])?;
        let mut requests: Vec<ReplenishmentRequest> = tx.load()?;

        let request = ReplenishmentRequest {
            id: allocate_request_id(&requests, &mut rand::thread_rng())?,
            medicine: medicine.clone(),
            quantity,
            status: RequestStatus::Pending,
        };
        requests.push(request.clone());
        tx.stage(&requests)?;
        tx.commit()?;

        tracing::info!(
            request_id = %request.id,
            medicine = %medicine,
            quantity,
            "replenishment requested"
        );
        Ok(request)
    }

    /// Approves a `PENDING` request and adds its quantity to the medicine's stock.
    ///
    /// Returns the approved request and the medicine's new stock level.
    ///
    /// # Errors
    ///
    /// - [`ClinicError::ReplenishmentNotFound`] if no request has that id.
    /// - [`ClinicError::RequestAlreadyDecided`] if it is no longer `PENDING`.
    /// - [`ClinicError::MedicineNotFound`] if the medicine is not in the inventory.
    pub fn approve(&self, request_id: &NonEmptyText) -> ClinicResult<(ReplenishmentRequest, u32)> {
        let mut tx = self
            .store
            .begin(&[Table::Medicine, Table::ReplenishmentRequest])?;
        let mut medicines: Vec<Medicine> = tx.load()?;
        let mut requests: Vec<ReplenishmentRequest> = tx.load()?;

        let request = pending_request(&mut requests, request_id)?;
        let stock = restock(&mut medicines, request.medicine.as_str(), request.quantity)?;
        request.status = RequestStatus::Approved;
        let approved = request.clone();

        tx.stage(&medicines)?;
        tx.stage(&requests)?;
        tx.commit()?;

        tracing::info!(
            request_id = %request_id,
            medicine = %approved.medicine,
            stock,
            "replenishment approved"
        );
        Ok((approved, stock))
    }

    pub fn reject(&self, request_id: &NonEmptyText) -> ClinicResult<ReplenishmentRequest> {
        let mut tx = self.store.begin(&[Table::ReplenishmentRequest])?;
        let mut requests: Vec<ReplenishmentRequest> = tx.load()?;

        let request = pending_request(&mut requests, request_id)?;
        request.status = RequestStatus::Rejected;
        let rejected = request.clone();

        tx.stage(&requests)?;
        tx.commit()?;

        tracing::info!(request_id = %request_id, "replenishment rejected");
        Ok(rejected)
    }

    pub fn pending(&self) -> ClinicResult<Vec<ReplenishmentRequest>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|request| request.status == RequestStatus::Pending)
            .collect())
    }

    pub fn list(&self) -> ClinicResult<Vec<ReplenishmentRequest>> {
        self.store.load_all()
    }
}

fn pending_request<'a>(
    requests: &'a mut [ReplenishmentRequest],
    request_id: &NonEmptyText,
) -> ClinicResult<&'a mut ReplenishmentRequest> {
    let request = requests
        .iter_mut()
        .find(|request| &request.id == request_id)
        .ok_or_else(|| ClinicError::ReplenishmentNotFound(request_id.to_string()))?;
    if request.status != RequestStatus::Pending {
        return Err(ClinicError::RequestAlreadyDecided {
            id: request_id.to_string(),
            status: request.status.as_str(),
        });
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::tests::id;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn request(request_id: &str) -> ReplenishmentRequest {
        ReplenishmentRequest {
            id: id(request_id),
            medicine: id("paracetamol"),
            quantity: 10,
            status: RequestStatus::Approved,
        }
    }

    fn setup() -> (TempDir, Arc<RecordStore>, ReplenishmentService) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(RecordStore::open(temp_dir.path()).unwrap());
        store
            .save_all(&[Medicine {
                name: id("Paracetamol"),
                stock: 2,
                low_stock_threshold: 5,
            }])
            .unwrap();
        let service = ReplenishmentService::new(store.clone());
        (temp_dir, store, service)
    }

    #[test]
    fn allocated_ids_use_three_digits() {
        let mut rng = StdRng::seed_from_u64(7);
        let allocated = allocate_request_id(&[], &mut rng).unwrap();
        let digits = allocated.as_str().strip_prefix("RR").expect("RR prefix");
        assert_eq!(digits.len(), 3);
        assert!(digits.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn allocation_avoids_every_existing_id() {
        let existing: Vec<_> = (0..999).map(|n| request(&format!("RR{n:03}"))).collect();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(allocate_request_id(&existing, &mut rng).unwrap().as_str(), "RR999");
    }

    #[test]
    fn allocation_widens_when_three_digits_are_exhausted() {
        let existing: Vec<_> = (0..1000).map(|n| request(&format!("RR{n:03}"))).collect();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(allocate_request_id(&existing, &mut rng).unwrap().as_str(), "RR0000");
    }

    #[test]
    fn submit_creates_pending_request_with_unique_id() {
        let (_temp_dir, _store, service) = setup();

        let first = service.submit(&id("paracetamol"), 20).unwrap();
        let second = service.submit(&id("paracetamol"), 20).unwrap();
        assert_eq!(first.status, RequestStatus::Pending);
        assert_ne!(first.id, second.id);
        assert_eq!(service.pending().unwrap().len(), 2);
    }

    #[test]
    fn approve_restocks_case_insensitively() {
        let (_temp_dir, store, service) = setup();
        let filed = service.submit(&id("paracetamol"), 20).unwrap();

        let (approved, stock) = service.approve(&filed.id).unwrap();
        assert_eq!(approved.status, RequestStatus::Approved);
        assert_eq!(stock, 22);
        let medicine: Medicine = store.find_by_key("Paracetamol").unwrap().unwrap();
        assert_eq!(medicine.stock, 22);

        let again = service.approve(&filed.id).expect_err("decided");
        assert!(matches!(
            again,
            ClinicError::RequestAlreadyDecided {
                status: "APPROVED",
                ..
            }
        ));
        let medicine: Medicine = store.find_by_key("Paracetamol").unwrap().unwrap();
        assert_eq!(medicine.stock, 22);
    }

    #[test]
    fn approve_for_unknown_medicine_changes_nothing() {
        let (_temp_dir, _store, service) = setup();
        let filed = service.submit(&id("aspirin"), 5).unwrap();

        let err = service.approve(&filed.id).expect_err("no such medicine");
        assert!(matches!(err, ClinicError::MedicineNotFound(_)));
        assert_eq!(service.pending().unwrap(), vec![filed]);
    }

    #[test]
    fn reject_is_terminal() {
        let (_temp_dir, _store, service) = setup();
        let filed = service.submit(&id("paracetamol"), 5).unwrap();

        let rejected = service.reject(&filed.id).unwrap();
        assert_eq!(rejected.status, RequestStatus::Rejected);
        assert!(service.pending().unwrap().is_empty());
        assert!(matches!(
            service.approve(&filed.id),
            Err(ClinicError::RequestAlreadyDecided { .. })
        ));
        assert!(matches!(
            service.reject(&id("RR404")),
            Err(ClinicError::ReplenishmentNotFound(_))
        ));
    }

    #[test]
    fn restock_refuses_overflow() {
        let mut medicines = vec![Medicine {
            name: id("paracetamol"),
            stock: u32::MAX,
            low_stock_threshold: 5,
        }];
        let err = restock(&mut medicines, "PARACETAMOL", 1).expect_err("overflow");
        assert!(matches!(err, ClinicError::InvalidInput(_)));
        assert_eq!(medicines[0].stock, u32::MAX);
    }
}
