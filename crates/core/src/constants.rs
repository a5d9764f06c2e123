//! Constants used throughout the clinic core crate.
//!
//! Table filenames and defaults live here so the store, configuration and tests agree on them.

/// Default directory for table storage when no explicit directory is configured.
pub const DEFAULT_DATA_DIR: &str = "clinic_data";

/// First hour of the default daily slot grid.
pub const DEFAULT_DAY_START_HOUR: u32 = 9;

/// Hour at which the default daily slot grid ends (exclusive).
pub const DEFAULT_DAY_END_HOUR: u32 = 17;

/// Length of one slot in minutes.
pub const SLOT_MINUTES: i64 = 30;

/// Wire format for dates in every table.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Wire format for slot boundaries.
pub const TIME_FORMAT: &str = "%H:%M";

/// Field separator within a table line.
pub const FIELD_SEPARATOR: char = ',';

/// Separator between patient history entries.
pub const HISTORY_ENTRY_SEPARATOR: char = ';';

/// Separator between the parts of one patient history entry.
pub const HISTORY_PART_SEPARATOR: char = '|';

/// Placeholder written for an absent optional field.
pub const EMPTY_MARKER: &str = "-";

/// Feedback stored on a freshly generated bill.
pub const DEFAULT_BILL_FEEDBACK: &str = "na";

/// Prefix of generated replenishment request ids.
pub const REPLENISHMENT_ID_PREFIX: &str = "RR";

/// Prefix of generated appointment ids.
pub const APPOINTMENT_ID_PREFIX: &str = "A";

pub const APPOINTMENT_FILENAME: &str = "Appointment.csv";
pub const AVAILABILITY_FILENAME: &str = "DoctorAvailability.csv";
pub const APPOINTMENT_RECORD_FILENAME: &str = "AppointmentRecord.csv";
pub const PATIENT_FILENAME: &str = "Patient_List.csv";
pub const MEDICINE_FILENAME: &str = "Medicine_List.csv";
pub const REPLENISHMENT_FILENAME: &str = "ReplenishmentRequest.csv";
pub const BILL_FILENAME: &str = "Bill.csv";
