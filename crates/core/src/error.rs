use crate::store::Table;

#[derive(Debug, thiserror::Error)]
pub enum ClinicError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Text(#[from] clinic_types::TextError),

    #[error("appointment not found: {0}")]
    AppointmentNotFound(String),
    #[error("patient not found: {0}")]
    PatientNotFound(String),
    #[error("medicine not found: {0}")]
    MedicineNotFound(String),
    #[error("no outcome recorded for appointment {0}")]
    OutcomeNotFound(String),
    #[error("bill not found for appointment {0}")]
    BillNotFound(String),
    #[error("replenishment request not found: {0}")]
    ReplenishmentNotFound(String),

    #[error("appointment {appointment_id} cannot move from {from} to {to}")]
    InvalidTransition {
        appointment_id: String,
        from: &'static str,
        to: &'static str,
    },
    #[error("appointment {appointment_id} was already decided ({status})")]
    AlreadyDecided {
        appointment_id: String,
        status: &'static str,
    },
    #[error("slot conflict: {0}")]
    SlotConflict(String),
    #[error("slot unavailable: {0}")]
    SlotUnavailable(String),

    #[error("insufficient stock for {medicine}: {available} available, {requested} requested")]
    InsufficientStock {
        medicine: String,
        available: u32,
        requested: u32,
    },
    #[error("prescription for appointment {0} was already dispensed")]
    AlreadyDispensed(String),
    #[error("outcome already recorded for appointment {0}")]
    OutcomeAlreadyRecorded(String),
    #[error("date {actual} does not match the scheduled date {expected}")]
    DateMismatch { expected: String, actual: String },
    #[error("bill for appointment {0} is already paid")]
    BillAlreadyPaid(String),
    #[error("replenishment request {id} was already {status}")]
    RequestAlreadyDecided { id: String, status: &'static str },

    #[error("{table} table unavailable: {source}")]
    StoreUnavailable {
        table: Table,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to create data directory: {0}")]
    StorageDirCreation(std::io::Error),
    #[error("malformed record in {table} at line {line}: {reason}")]
    MalformedRecord {
        table: Table,
        line: usize,
        reason: String,
    },
    #[error("{table} already has a record keyed {key}")]
    DuplicateKey { table: Table, key: String },
    #[error("{0} table is not part of this transaction")]
    TableNotLocked(Table),
    #[error(
        "write to {table} failed and restoring {restore_table} also failed: write={write_error}; restore={restore_error}"
    )]
    RollbackFailed {
        table: Table,
        #[source]
        write_error: std::io::Error,
        restore_table: Table,
        restore_error: std::io::Error,
    },

    #[error("failed to read price table: {0}")]
    PriceTableRead(std::io::Error),
    #[error("failed to parse price table: {0}")]
    PriceTableParse(serde_yaml::Error),
}

pub type ClinicResult<T> = std::result::Result<T, ClinicError>;
