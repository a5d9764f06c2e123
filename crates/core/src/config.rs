//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into services. Services
//! never read process-wide environment variables while handling an operation, which keeps
//! behaviour consistent across threads and test harnesses.

use crate::calendar::SlotGrid;
use crate::constants::{DEFAULT_DATA_DIR, DEFAULT_DAY_END_HOUR, DEFAULT_DAY_START_HOUR};
use crate::{ClinicError, ClinicResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Unit prices per medicine, looked up case-insensitively.
///
/// A medicine with no listed price is billed at `0.0`.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceTable {
    prices: BTreeMap<String, f64>,
}

impl Default for PriceTable {
    fn default() -> Self {
        Self::from_entries([
            ("paracetamol", 0.125),
            ("ibuprofen", 0.50),
            ("amoxicillin", 0.95),
        ])
        .unwrap_or_else(|_| Self::empty())
    }
}

impl PriceTable {
    pub fn empty() -> Self {
        Self {
            prices: BTreeMap::new(),
        }
    }

    pub fn from_entries<K: AsRef<str>>(
        entries: impl IntoIterator<Item = (K, f64)>,
    ) -> ClinicResult<Self> {
        let mut prices = BTreeMap::new();
        for (name, price) in entries {
            let name = name.as_ref().trim().to_ascii_lowercase();
            if name.is_empty() {
                return Err(ClinicError::InvalidInput(
                    "price table entry has an empty medicine name".into(),
                ));
            }
            if !price.is_finite() || price < 0.0 {
                return Err(ClinicError::InvalidInput(format!(
                    "price for {name} must be a non-negative number"
                )));
            }
            prices.insert(name, price);
        }
        Ok(Self { prices })
    }

    /// Load a YAML mapping of `medicine: unit_price`.
    pub fn load(path: &Path) -> ClinicResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(ClinicError::PriceTableRead)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> ClinicResult<Self> {
        let raw: BTreeMap<String, f64> =
            serde_yaml::from_str(contents).map_err(ClinicError::PriceTableParse)?;
        Self::from_entries(raw)
    }

    pub fn unit_price(&self, medicine: &str) -> f64 {
        self.prices
            .get(&medicine.trim().to_ascii_lowercase())
            .copied()
            .unwrap_or(0.0)
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct ClinicConfig {
    data_dir: PathBuf,
    slot_grid: SlotGrid,
    price_table: PriceTable,
    auto_replenish_quantity: Option<u32>,
}

impl ClinicConfig {
    pub fn new(data_dir: PathBuf, slot_grid: SlotGrid, price_table: PriceTable) -> Self {
        Self {
            data_dir,
            slot_grid,
            price_table,
            auto_replenish_quantity: None,
        }
    }

    /// File a replenishment request of `quantity` whenever a dispense leaves a medicine below
    /// its low-stock threshold.
    pub fn with_auto_replenish(mut self, quantity: Option<u32>) -> Self {
        self.auto_replenish_quantity = quantity.filter(|q| *q > 0);
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn slot_grid(&self) -> SlotGrid {
        self.slot_grid
    }

    pub fn price_table(&self) -> &PriceTable {
        &self.price_table
    }

    pub fn auto_replenish_quantity(&self) -> Option<u32> {
        self.auto_replenish_quantity
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_number<T: std::str::FromStr>(
    name: &str,
    value: Option<String>,
) -> ClinicResult<Option<T>> {
    non_blank(value)
        .map(|v| {
            v.parse::<T>().map_err(|_| {
                ClinicError::InvalidInput(format!("{name} must be a number, got {v:?}"))
            })
        })
        .transpose()
}

/// Resolve the data directory from an optional value, falling back to `clinic_data`.
pub fn data_dir_from_env_value(value: Option<String>) -> PathBuf {
    non_blank(value)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

/// Build the slot grid from optional start/end hour strings.
///
/// Missing or blank values fall back to the default 09:00 to 17:00 day.
pub fn slot_grid_from_env_values(
    start_hour: Option<String>,
    end_hour: Option<String>,
) -> ClinicResult<SlotGrid> {
    let start =
        parse_number("CLINIC_DAY_START_HOUR", start_hour)?.unwrap_or(DEFAULT_DAY_START_HOUR);
    let end = parse_number("CLINIC_DAY_END_HOUR", end_hour)?.unwrap_or(DEFAULT_DAY_END_HOUR);
    SlotGrid::new(start, end)
}

/// Load the price table named by an optional path, or the built-in table when absent.
pub fn price_table_from_env_value(path: Option<String>) -> ClinicResult<PriceTable> {
    match non_blank(path) {
        Some(path) => PriceTable::load(Path::new(&path)),
        None => Ok(PriceTable::default()),
    }
}

/// Parse the optional automatic replenishment quantity.
pub fn auto_replenish_from_env_value(value: Option<String>) -> ClinicResult<Option<u32>> {
    parse_number("CLINIC_AUTO_REPLENISH_QUANTITY", value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_price_table_matches_pharmacy_list() {
        let prices = PriceTable::default();
        assert_eq!(prices.unit_price("paracetamol"), 0.125);
        assert_eq!(prices.unit_price("IBUPROFEN"), 0.50);
        assert_eq!(prices.unit_price(" Amoxicillin "), 0.95);
        assert_eq!(prices.unit_price("aspirin"), 0.0);
    }

    #[test]
    fn price_table_loads_from_yaml_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("prices.yaml");
        std::fs::write(&path, "Aspirin: 0.2\nparacetamol: 0.1\n").unwrap();

        let prices = price_table_from_env_value(Some(path.display().to_string())).unwrap();
        assert_eq!(prices.unit_price("aspirin"), 0.2);
        assert_eq!(prices.unit_price("paracetamol"), 0.1);
        assert_eq!(prices.unit_price("ibuprofen"), 0.0);
    }

    #[test]
    fn price_table_rejects_negative_prices() {
        let err = PriceTable::from_yaml("aspirin: -1.0\n").expect_err("negative price");
        assert!(matches!(err, ClinicError::InvalidInput(_)));
    }

    #[test]
    fn price_table_reports_missing_file() {
        let err = price_table_from_env_value(Some("/definitely/not/here.yaml".into()))
            .expect_err("missing file");
        assert!(matches!(err, ClinicError::PriceTableRead(_)));
    }

    #[test]
    fn blank_price_table_path_uses_defaults() {
        let prices = price_table_from_env_value(Some("  ".into())).unwrap();
        assert_eq!(prices, PriceTable::default());
    }

    #[test]
    fn slot_grid_defaults_and_overrides() {
        let grid = slot_grid_from_env_values(None, None).unwrap();
        assert_eq!((grid.start_hour(), grid.end_hour()), (9, 17));

        let grid = slot_grid_from_env_values(Some("8".into()), Some("12".into())).unwrap();
        assert_eq!(grid.slots().len(), 8);

        assert!(slot_grid_from_env_values(Some("nine".into()), None).is_err());
        assert!(slot_grid_from_env_values(Some("18".into()), None).is_err());
    }

    #[test]
    fn data_dir_falls_back_when_unset_or_blank() {
        assert_eq!(data_dir_from_env_value(None), PathBuf::from("clinic_data"));
        assert_eq!(data_dir_from_env_value(Some(" ".into())), PathBuf::from("clinic_data"));
        assert_eq!(
            data_dir_from_env_value(Some("/srv/clinic".into())),
            PathBuf::from("/srv/clinic")
        );
    }

    #[test]
    fn auto_replenish_zero_is_disabled() {
        let cfg = ClinicConfig::new(
            PathBuf::from("data"),
            SlotGrid::new(9, 17).unwrap(),
            PriceTable::default(),
        )
        .with_auto_replenish(auto_replenish_from_env_value(Some("0".into())).unwrap());
        assert_eq!(cfg.auto_replenish_quantity(), None);
    }
}
