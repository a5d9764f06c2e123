//! # Clinic Core
//!
//! Core business logic for the clinic management system.
//!
//! This crate owns every invariant of the system:
//! - Doctor availability per date on a fixed half-hour grid
//! - The appointment lifecycle and its slot bookings
//! - Outcome records and patient treatment history
//! - Dispensing against stock, billing and replenishment
//!
//! All state lives in delimited table files managed by [`RecordStore`]. Every state-changing
//! operation runs as a single [`store::Transaction`] over the tables it touches.
//!
//! **No presentation concerns**: argument parsing and output formatting belong in `clinic-cli`.

pub mod appointments;
pub mod availability;
pub mod billing;
pub mod calendar;
pub mod config;
pub mod constants;
pub mod dispensing;
pub mod error;
pub mod outcomes;
pub mod patients;
pub mod records;
pub mod replenishment;
pub mod store;

pub use appointments::AppointmentService;
pub use availability::AvailabilityService;
pub use billing::BillingService;
pub use calendar::{ClinicDate, SlotGrid, TimeSlot};
pub use config::{ClinicConfig, PriceTable};
pub use dispensing::{DispenseReceipt, DispensingService};
pub use error::{ClinicError, ClinicResult};
pub use outcomes::{ClinicalUpdate, NewOutcome, OutcomeService};
pub use patients::PatientService;
pub use replenishment::ReplenishmentService;
pub use store::RecordStore;

pub use clinic_types::{FieldText, NonEmptyText, TextError};

use std::sync::Arc;

/// Every service, sharing one store and one configuration.
#[derive(Clone, Debug)]
pub struct Clinic {
    pub availability: AvailabilityService,
    pub appointments: AppointmentService,
    pub outcomes: OutcomeService,
    pub dispensing: DispensingService,
    pub replenishment: ReplenishmentService,
    pub billing: BillingService,
    pub patients: PatientService,
}

impl Clinic {
    /// Opens the store in `cfg.data_dir()` and wires up the services.
    pub fn open(cfg: Arc<ClinicConfig>) -> ClinicResult<Self> {
        let store = Arc::new(RecordStore::open(cfg.data_dir())?);
        tracing::debug!(data_dir = %cfg.data_dir().display(), "clinic store opened");
        Ok(Self::with_store(store, cfg))
    }

    pub fn with_store(store: Arc<RecordStore>, cfg: Arc<ClinicConfig>) -> Self {
        Self {
            availability: AvailabilityService::new(store.clone(), cfg.clone()),
            appointments: AppointmentService::new(store.clone(), cfg.clone()),
            outcomes: OutcomeService::new(store.clone()),
            dispensing: DispensingService::new(store.clone(), cfg),
            replenishment: ReplenishmentService::new(store.clone()),
            billing: BillingService::new(store.clone()),
            patients: PatientService::new(store),
        }
    }
}
