//! Table storage with whole-table transactions.
//!
//! Every table is a single delimited file in the data directory: a fixed header line followed
//! by one line per record. Tables are always read and rewritten whole.
//!
//! ## Consistency
//!
//! - **Per-table locks**: each table has an in-process mutex and an exclusive advisory lock on a
//!   `.<table>.lock` file beside it, so sessions in other processes sharing the data directory
//!   are excluded too. A [`Transaction`] names its tables up front and acquires their locks in
//!   [`Table`] declaration order, so two transactions touching overlapping tables cannot
//!   deadlock.
//! - **Staged writes**: new table contents are written to a staging file in the same directory,
//!   fsynced, and renamed over the live table. Readers see either the old table or the new one.
//! - **Multi-table commits**: every staged table is written to disk before any rename happens.
//!   If a rename fails part way, tables already replaced are restored from the contents read
//!   when the transaction first touched them.
//!
//! Dropping a transaction without calling [`Transaction::commit`] writes nothing.

use crate::constants::{
    APPOINTMENT_FILENAME, APPOINTMENT_RECORD_FILENAME, AVAILABILITY_FILENAME, BILL_FILENAME,
    FIELD_SEPARATOR, MEDICINE_FILENAME, PATIENT_FILENAME, REPLENISHMENT_FILENAME,
};
use crate::error::{ClinicError, ClinicResult};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use fs2::FileExt;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tempfile::NamedTempFile;

#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::LazyLock;

/// The tables managed by the store.
///
/// Declaration order is the global lock order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    Appointment,
    DoctorAvailability,
    AppointmentRecord,
    Patient,
    Medicine,
    ReplenishmentRequest,
    Bill,
}

impl Table {
    pub const COUNT: usize = 7;

    pub const ALL: [Table; Self::COUNT] = [
        Table::Appointment,
        Table::DoctorAvailability,
        Table::AppointmentRecord,
        Table::Patient,
        Table::Medicine,
        Table::ReplenishmentRequest,
        Table::Bill,
    ];

    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Appointment => APPOINTMENT_FILENAME,
            Self::DoctorAvailability => AVAILABILITY_FILENAME,
            Self::AppointmentRecord => APPOINTMENT_RECORD_FILENAME,
            Self::Patient => PATIENT_FILENAME,
            Self::Medicine => MEDICINE_FILENAME,
            Self::ReplenishmentRequest => REPLENISHMENT_FILENAME,
            Self::Bill => BILL_FILENAME,
        }
    }

    pub const fn header(self) -> &'static [&'static str] {
        match self {
            Self::Appointment => &[
                "AppointmentID",
                "DoctorID",
                "PatientID",
                "Date",
                "TimeSlot",
                "Status",
            ],
            Self::DoctorAvailability => &["DoctorID", "Date", "TimeSlot", "Status", "BookedBy"],
            Self::AppointmentRecord => &[
                "AppointmentID",
                "Diagnosis",
                "Medicine",
                "Quantity",
                "PrescriptionStatus",
                "TreatmentPlan",
                "Date",
                "ServiceType",
                "Notes",
            ],
            Self::Patient => &[
                "PatientID",
                "Name",
                "DateOfBirth",
                "Gender",
                "ContactNo",
                "Email",
                "BloodType",
                "PastTreatments",
            ],
            Self::Medicine => &["Name", "Stock", "LowStockThreshold"],
            Self::ReplenishmentRequest => &["RequestID", "Medicine", "Quantity", "Status"],
            Self::Bill => &["AppointmentID", "Amount", "Status", "Feedback"],
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Appointment => "Appointment",
            Self::DoctorAvailability => "DoctorAvailability",
            Self::AppointmentRecord => "AppointmentRecord",
            Self::Patient => "Patient",
            Self::Medicine => "Medicine",
            Self::ReplenishmentRequest => "ReplenishmentRequest",
            Self::Bill => "Bill",
        }
    }

    fn header_line(self) -> String {
        self.header().join(&FIELD_SEPARATOR.to_string())
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row type persisted in one table.
pub trait Record: Sized {
    const TABLE: Table;

    /// Primary key used by [`RecordStore::find_by_key`] and duplicate checks.
    fn key(&self) -> String;

    /// Fields in header order. Values must not contain reserved table characters.
    fn to_fields(&self) -> Vec<String>;

    fn from_fields(fields: &[&str]) -> Result<Self, String>;
}

pub(crate) fn encode<R: Record>(records: &[R]) -> String {
    let separator = FIELD_SEPARATOR.to_string();
    let mut out = R::TABLE.header_line();
    out.push('\n');
    for record in records {
        out.push_str(&record.to_fields().join(&separator));
        out.push('\n');
    }
    out
}

pub(crate) fn decode<R: Record>(contents: &str) -> ClinicResult<Vec<R>> {
    let table = R::TABLE;
    let malformed = |line: usize, reason: String| ClinicError::MalformedRecord {
        table,
        line,
        reason,
    };

    let mut lines = contents
        .lines()
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .enumerate();

    match lines.next() {
        Some((_, header)) if header == table.header_line() => {}
        Some((_, header)) => return Err(malformed(1, format!("unexpected header {header:?}"))),
        None => return Err(malformed(1, "missing header".into())),
    }

    let width = table.header().len();
    let mut records = Vec::new();
    for (index, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
        if fields.len() != width {
            return Err(malformed(
                index + 1,
                format!("expected {width} fields, found {}", fields.len()),
            ));
        }
        records.push(R::from_fields(&fields).map_err(|reason| malformed(index + 1, reason))?);
    }
    Ok(records)
}

/// Owner of every table file and its lock.
#[derive(Debug)]
pub struct RecordStore {
    data_dir: PathBuf,
    locks: [Mutex<()>; Table::COUNT],
}

impl RecordStore {
    /// Opens the store rooted at `data_dir`, provisioning the directory and any missing table.
    ///
    /// A freshly provisioned table holds only its header. Tables that already exist are left
    /// untouched and are not validated until first read.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::StorageDirCreation`] if the directory cannot be created, or
    /// [`ClinicError::StoreUnavailable`] if a missing table cannot be provisioned.
    pub fn open(data_dir: &Path) -> ClinicResult<Self> {
        fs::create_dir_all(data_dir).map_err(ClinicError::StorageDirCreation)?;

        let store = Self {
            data_dir: data_dir.to_path_buf(),
            locks: std::array::from_fn(|_| Mutex::new(())),
        };

        for table in Table::ALL {
            if store.table_path(table).exists() {
                continue;
            }
            let mut header = table.header_line();
            header.push('\n');
            store
                .write_table(table, &header)
                .map_err(|source| ClinicError::StoreUnavailable { table, source })?;
            tracing::info!(table = %table, "provisioned empty table");
        }

        Ok(store)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn table_path(&self, table: Table) -> PathBuf {
        self.data_dir.join(table.file_name())
    }

    pub fn lock_path(&self, table: Table) -> PathBuf {
        self.data_dir.join(format!(".{}.lock", table.file_name()))
    }

    /// Starts a transaction over `tables`, blocking until every lock is held.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::StoreUnavailable`] if a table's lock file cannot be opened or
    /// locked. Locks already taken are released.
    pub fn begin(&self, tables: &[Table]) -> ClinicResult<Transaction<'_>> {
        let mut tables = tables.to_vec();
        tables.sort();
        tables.dedup();

        let mut locks = Vec::with_capacity(tables.len());
        for table in &tables {
            locks.push(self.lock_table(*table)?);
        }

        Ok(Transaction {
            store: self,
            tables,
            _locks: locks,
            snapshots: BTreeMap::new(),
            staged: BTreeMap::new(),
        })
    }

    fn lock_table(&self, table: Table) -> ClinicResult<TableLock<'_>> {
        let guard = self.locks[table as usize]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path(table))
            .and_then(|file| file.lock_exclusive().map(|()| file))
            .map_err(|source| ClinicError::StoreUnavailable { table, source })?;
        Ok(TableLock {
            _file: file,
            _guard: guard,
        })
    }

    /// Loads every record of `R`'s table.
    pub fn load_all<R: Record>(&self) -> ClinicResult<Vec<R>> {
        self.begin(&[R::TABLE])?.load()
    }

    /// Replaces `R`'s table with `records`.
    pub fn save_all<R: Record>(&self, records: &[R]) -> ClinicResult<()> {
        let mut tx = self.begin(&[R::TABLE])?;
        tx.stage(records)?;
        tx.commit()
    }

    pub fn find_by_key<R: Record>(&self, key: &str) -> ClinicResult<Option<R>> {
        Ok(self
            .load_all::<R>()?
            .into_iter()
            .find(|record| record.key() == key))
    }

    /// Applies `update` to the record keyed `key` and saves the table.
    ///
    /// Returns `Ok(None)` without writing if no record has that key. If `update` fails the
    /// table is left untouched.
    pub fn update_by_key<R, F>(&self, key: &str, update: F) -> ClinicResult<Option<R>>
    where
        R: Record + Clone,
        F: FnOnce(&mut R) -> ClinicResult<()>,
    {
        let mut tx = self.begin(&[R::TABLE])?;
        let mut records: Vec<R> = tx.load()?;
        let Some(record) = records.iter_mut().find(|record| record.key() == key) else {
            return Ok(None);
        };
        update(record)?;
        let updated = record.clone();
        tx.stage(&records)?;
        tx.commit()?;
        Ok(Some(updated))
    }

    /// Appends `record`, rejecting a duplicate key.
    pub fn insert<R: Record>(&self, record: R) -> ClinicResult<()> {
        let mut tx = self.begin(&[R::TABLE])?;
        let mut records: Vec<R> = tx.load()?;
        let key = record.key();
        if records.iter().any(|existing| existing.key() == key) {
            return Err(ClinicError::DuplicateKey {
                table: R::TABLE,
                key,
            });
        }
        records.push(record);
        tx.stage(&records)?;
        tx.commit()
    }

    fn read_table(&self, table: Table) -> ClinicResult<String> {
        let contents = fs::read_to_string(self.table_path(table))
            .map_err(|source| ClinicError::StoreUnavailable { table, source })?;
        tracing::debug!(table = %table, bytes = contents.len(), "loaded table");
        Ok(contents)
    }

    fn stage_file(&self, table: Table, contents: &str) -> io::Result<NamedTempFile> {
        let mut staging = tempfile::Builder::new()
            .prefix(&format!(".{}.", table.file_name()))
            .suffix(".staging")
            .tempfile_in(&self.data_dir)?;
        staging.write_all(contents.as_bytes())?;
        staging.as_file().sync_all()?;
        Ok(staging)
    }

    fn replace(&self, table: Table, staging: NamedTempFile) -> io::Result<()> {
        #[cfg(test)]
        {
            let current_id = std::thread::current().id();
            let mut guard = FORCE_REPLACE_FAILURE_FOR_THREADS
                .lock()
                .expect("FORCE_REPLACE_FAILURE_FOR_THREADS mutex poisoned");
            if guard.get(&current_id) == Some(&table) {
                guard.remove(&current_id);
                return Err(io::Error::other("forced replace failure (test hook)"));
            }
        }

        staging
            .persist(self.table_path(table))
            .map(|_| ())
            .map_err(|e| e.error)?;
        tracing::debug!(table = %table, "replaced table");
        Ok(())
    }

    fn write_table(&self, table: Table, contents: &str) -> io::Result<()> {
        let staging = self.stage_file(table, contents)?;
        self.replace(table, staging)
    }
}

#[cfg(test)]
static FORCE_REPLACE_FAILURE_FOR_THREADS: LazyLock<
    Mutex<HashMap<std::thread::ThreadId, Table>>,
> = LazyLock::new(|| Mutex::new(HashMap::new()));

/// Makes the next replace of `table` on the current thread fail.
#[cfg(test)]
pub(crate) fn force_replace_failure(table: Table) {
    FORCE_REPLACE_FAILURE_FOR_THREADS
        .lock()
        .expect("FORCE_REPLACE_FAILURE_FOR_THREADS mutex poisoned")
        .insert(std::thread::current().id(), table);
}

/// Both locks on one table. The file lock is released when the file is closed.
struct TableLock<'s> {
    _file: File,
    _guard: MutexGuard<'s, ()>,
}

/// A read-modify-write unit over a fixed set of locked tables.
pub struct Transaction<'s> {
    store: &'s RecordStore,
    tables: Vec<Table>,
    _locks: Vec<TableLock<'s>>,
    snapshots: BTreeMap<Table, String>,
    staged: BTreeMap<Table, String>,
}

impl Transaction<'_> {
    /// Loads `R`'s table, seeing any contents already staged in this transaction.
    pub fn load<R: Record>(&mut self) -> ClinicResult<Vec<R>> {
        self.ensure_locked(R::TABLE)?;
        if let Some(staged) = self.staged.get(&R::TABLE) {
            return decode(staged);
        }
        decode(self.snapshot(R::TABLE)?)
    }

    /// Stages `records` as the new contents of `R`'s table.
    pub fn stage<R: Record>(&mut self, records: &[R]) -> ClinicResult<()> {
        self.ensure_locked(R::TABLE)?;
        self.snapshot(R::TABLE)?;
        self.staged.insert(R::TABLE, encode(records));
        Ok(())
    }

    /// Writes every staged table.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::StoreUnavailable`] if any table cannot be written; every table is
    /// then back to its prior contents. Returns [`ClinicError::RollbackFailed`] if restoring a
    /// table that was already replaced also failed.
    pub fn commit(mut self) -> ClinicResult<()> {
        let store = self.store;
        let staged = std::mem::take(&mut self.staged);

        let mut prepared = Vec::with_capacity(staged.len());
        for (table, contents) in &staged {
            if self.snapshots.get(table) == Some(contents) {
                continue;
            }
            let staging = store
                .stage_file(*table, contents)
                .map_err(|source| ClinicError::StoreUnavailable {
                    table: *table,
                    source,
                })?;
            prepared.push((*table, staging));
        }

        let mut replaced = Vec::with_capacity(prepared.len());
        for (table, staging) in prepared {
            if let Err(write_error) = store.replace(table, staging) {
                return Err(self.roll_back(&replaced, table, write_error));
            }
            replaced.push(table);
        }

        if !replaced.is_empty() {
            tracing::debug!(tables = ?replaced, "committed transaction");
        }
        Ok(())
    }

    fn roll_back(&self, replaced: &[Table], failed: Table, write_error: io::Error) -> ClinicError {
        for table in replaced.iter().rev() {
            let Some(previous) = self.snapshots.get(table) else {
                continue;
            };
            if let Err(restore_error) = self.store.write_table(*table, previous) {
                tracing::error!(table = %failed, restore_table = %table, "rollback failed");
                return ClinicError::RollbackFailed {
                    table: failed,
                    write_error,
                    restore_table: *table,
                    restore_error,
                };
            }
            tracing::warn!(table = %table, failed = %failed, "restored table after failed commit");
        }
        ClinicError::StoreUnavailable {
            table: failed,
            source: write_error,
        }
    }

    fn ensure_locked(&self, table: Table) -> ClinicResult<()> {
        if self.tables.contains(&table) {
            Ok(())
        } else {
            Err(ClinicError::TableNotLocked(table))
        }
    }

    fn snapshot(&mut self, table: Table) -> ClinicResult<&str> {
        let store = self.store;
        let contents = match self.snapshots.entry(table) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(store.read_table(table)?),
        };
        Ok(contents.as_str())
    }
}
