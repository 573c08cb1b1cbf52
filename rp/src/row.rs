//! Per-row configuration of the main table
//!
//! Each data row of the main table describes one marketplace offer: its link,
//! how to compare it, the jitter band used to undercut, and references to
//! cells in other tables holding the floor, ceiling, stock and blacklist.
//! [`RowLoader`] reads rows through the cache registry and validates them
//! into [`RowConfig`] values.

use serde::{Deserialize, Serialize};
use sheetcache::{CacheError, CacheRegistry, CellCache, TableAddress, column_index};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::marketplace::MarketplaceError;
use crate::scrape::ScrapeError;

/// Errors raised while loading or processing a row
#[derive(Debug, Error)]
pub enum RowError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid column layout: {0}")]
    Layout(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Scrape(#[from] ScrapeError),

    #[error(transparent)]
    Marketplace(#[from] MarketplaceError),

    #[error("Processing failed: {0}")]
    Processing(String),
}

impl RowError {
    /// Check if the row itself is malformed (as opposed to a failure while processing it)
    pub fn is_validation(&self) -> bool {
        matches!(self, RowError::Validation(_))
    }
}

/// How a row is compared against the competition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompareMode {
    /// No scraping; price at the floor
    Off,
    /// Undercut the cheapest eligible competitor
    Undercut,
    /// Undercut, but leave the price alone if it already beats the competitor
    HoldIfBeating,
}

impl CompareMode {
    pub fn from_cell(value: &str) -> Result<Self, RowError> {
        match value.trim().parse::<i64>() {
            Ok(0) => Ok(CompareMode::Off),
            Ok(1) => Ok(CompareMode::Undercut),
            Ok(2) => Ok(CompareMode::HoldIfBeating),
            _ => Err(RowError::Validation(format!("compare mode must be 0, 1 or 2, got '{}'", value))),
        }
    }

    pub fn scrapes(&self) -> bool {
        !matches!(self, CompareMode::Off)
    }
}

impl fmt::Display for CompareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareMode::Off => write!(f, "off"),
            CompareMode::Undercut => write!(f, "undercut"),
            CompareMode::HoldIfBeating => write!(f, "hold-if-beating"),
        }
    }
}

/// Undercut band and rounding precision
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JitterBand {
    pub delta_min: f64,
    pub delta_max: f64,
    pub precision: i32,
}

impl JitterBand {
    /// Band with `delta_min <= delta_max`
    pub fn normalized(&self) -> Self {
        if self.delta_min <= self.delta_max {
            *self
        } else {
            Self {
                delta_min: self.delta_max,
                delta_max: self.delta_min,
                precision: self.precision,
            }
        }
    }
}

/// A cell or range in another table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRef {
    pub table_id: String,
    pub table_name: String,
    pub cell: String,
}

impl ExternalRef {
    pub fn table(&self) -> TableAddress {
        TableAddress::new(&self.table_id, &self.table_name)
    }
}

impl fmt::Display for ExternalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}!{}", self.table_id, self.table_name, self.cell)
    }
}

/// One validated catalog row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowConfig {
    /// 1-based row number in the main table
    pub index: usize,
    pub name: String,
    pub link: String,
    pub offer_id: String,
    pub mode: CompareMode,
    pub compare_url: Option<String>,
    pub floor: f64,
    pub ceiling: Option<f64>,
    pub stock: u32,
    pub blacklist: Vec<String>,
    pub jitter: JitterBand,
    /// Marketplace units per table unit
    pub unit_stock: u32,
    pub min_units_per_order: Option<u32>,
    /// Seconds the worker rests after this row
    pub relax_secs: f64,
    pub note: Option<String>,
    pub last_update: Option<String>,
}

impl RowConfig {
    /// Marketplace units in one order
    pub fn order_quantity(&self) -> u32 {
        match self.min_units_per_order {
            Some(min) => self.unit_stock.saturating_mul(min),
            None => 1,
        }
    }

    /// Stock declared to the marketplace
    pub fn declared_stock(&self) -> u32 {
        self.stock.saturating_mul(self.unit_stock)
    }

    /// Minimum marketplace quantity per order, if the row sets one
    pub fn min_quantity(&self) -> Option<u32> {
        self.min_units_per_order.map(|min| min.saturating_mul(self.unit_stock))
    }

    pub fn relax(&self) -> Duration {
        Duration::try_from_secs_f64(self.relax_secs).unwrap_or_default()
    }
}

/// Offer id from a product link: its last path segment
pub fn offer_id_from_link(link: &str) -> Option<&str> {
    link.trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
}

/// Column letters of the three cells that make up an external reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RefColumns {
    pub table_id: String,
    pub table_name: String,
    pub cell: String,
}

impl RefColumns {
    fn new(table_id: &str, table_name: &str, cell: &str) -> Self {
        Self {
            table_id: table_id.to_string(),
            table_name: table_name.to_string(),
            cell: cell.to_string(),
        }
    }
}

/// Column letters of the main table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ColumnLayout {
    /// Rows before the first data row
    pub header_rows: usize,
    pub run_flag: String,
    pub name: String,
    pub note: String,
    pub last_update: String,
    pub link: String,
    pub mode: String,
    pub compare_url: String,
    pub delta_min: String,
    pub delta_max: String,
    pub precision: String,
    pub floor: RefColumns,
    pub ceiling: RefColumns,
    pub stock: RefColumns,
    pub unit_stock: String,
    pub min_units: String,
    pub blacklist: RefColumns,
    pub relax: String,
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self {
            header_rows: 1,
            run_flag: "B".to_string(),
            name: "C".to_string(),
            note: "D".to_string(),
            last_update: "E".to_string(),
            link: "F".to_string(),
            mode: "G".to_string(),
            compare_url: "H".to_string(),
            delta_min: "I".to_string(),
            delta_max: "J".to_string(),
            precision: "K".to_string(),
            floor: RefColumns::new("L", "M", "N"),
            ceiling: RefColumns::new("O", "P", "Q"),
            stock: RefColumns::new("R", "S", "T"),
            unit_stock: "U".to_string(),
            min_units: "V".to_string(),
            blacklist: RefColumns::new("W", "X", "Y"),
            relax: "Z".to_string(),
        }
    }
}

impl ColumnLayout {
    /// Check every column is a valid letter sequence
    pub fn validate(&self) -> Result<(), RowError> {
        self.resolve().map(|_| ())
    }

    fn resolve(&self) -> Result<Columns, RowError> {
        let col = |letters: &str| {
            column_index(letters.trim()).ok_or_else(|| RowError::Layout(format!("'{}' is not a column", letters)))
        };
        let refs = |r: &RefColumns| -> Result<[usize; 3], RowError> {
            Ok([col(&r.table_id)?, col(&r.table_name)?, col(&r.cell)?])
        };

        Ok(Columns {
            run_flag: col(&self.run_flag)?,
            name: col(&self.name)?,
            link: col(&self.link)?,
            mode: col(&self.mode)?,
            compare_url: col(&self.compare_url)?,
            delta_min: col(&self.delta_min)?,
            delta_max: col(&self.delta_max)?,
            precision: col(&self.precision)?,
            floor: refs(&self.floor)?,
            ceiling: refs(&self.ceiling)?,
            stock: refs(&self.stock)?,
            unit_stock: col(&self.unit_stock)?,
            min_units: col(&self.min_units)?,
            blacklist: refs(&self.blacklist)?,
            relax: col(&self.relax)?,
            note: col(&self.note)?,
            last_update: col(&self.last_update)?,
        })
    }
}

#[derive(Debug, Clone)]
struct Columns {
    run_flag: usize,
    name: usize,
    link: usize,
    mode: usize,
    compare_url: usize,
    delta_min: usize,
    delta_max: usize,
    precision: usize,
    floor: [usize; 3],
    ceiling: [usize; 3],
    stock: [usize; 3],
    unit_stock: usize,
    min_units: usize,
    blacklist: [usize; 3],
    relax: usize,
    note: usize,
    last_update: usize,
}

/// Raw cells of one row
struct RowCells(Vec<Option<String>>);

impl RowCells {
    fn get(&self, col: usize) -> Option<&str> {
        self.0
            .get(col)
            .and_then(|v| v.as_deref())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn external(&self, cols: [usize; 3]) -> Option<ExternalRef> {
        Some(ExternalRef {
            table_id: self.get(cols[0])?.to_string(),
            table_name: self.get(cols[1])?.to_string(),
            cell: self.get(cols[2])?.to_string(),
        })
    }
}

fn parse_number(field: &str, value: &str) -> Result<f64, RowError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| RowError::Validation(format!("{} is not a number: '{}'", field, value)))
}

fn parse_count(field: &str, value: &str) -> Result<u32, RowError> {
    let number = parse_number(field, value)?;
    if number < 0.0 || number.fract() != 0.0 || number > u32::MAX as f64 {
        return Err(RowError::Validation(format!("{} must be a whole number >= 0, got '{}'", field, value)));
    }
    Ok(number as u32)
}

/// Reads and validates rows of the main table
pub struct RowLoader {
    registry: Arc<CacheRegistry>,
    table: TableAddress,
    layout: ColumnLayout,
    columns: Columns,
    default_relax_secs: f64,
}

impl fmt::Debug for RowLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowLoader").field("table", &self.table).finish()
    }
}

impl RowLoader {
    pub fn new(
        registry: Arc<CacheRegistry>,
        table: TableAddress,
        layout: ColumnLayout,
        default_relax_secs: f64,
    ) -> Result<Self, RowError> {
        let columns = layout.resolve()?;
        registry.get_or_create(&table.table_id, &table.table_name);
        Ok(Self {
            registry,
            table,
            layout,
            columns,
            default_relax_secs,
        })
    }

    pub fn registry(&self) -> &Arc<CacheRegistry> {
        &self.registry
    }

    pub fn table(&self) -> &TableAddress {
        &self.table
    }

    pub fn layout(&self) -> &ColumnLayout {
        &self.layout
    }

    /// Cache of the main table
    pub fn main_cache(&self) -> Arc<CellCache> {
        self.registry.get_or_create(&self.table.table_id, &self.table.table_name)
    }

    /// Relax interval for rows that cannot be loaded
    pub fn default_relax(&self) -> Duration {
        Duration::try_from_secs_f64(self.default_relax_secs).unwrap_or_default()
    }

    /// A1 addresses of the note and last-update cells of a row
    pub fn note_cells(&self, index: usize) -> (String, String) {
        (
            format!("{}{}", self.layout.note.trim().to_uppercase(), index),
            format!("{}{}", self.layout.last_update.trim().to_uppercase(), index),
        )
    }

    /// Start a new run: re-read the main table and drop external tables
    pub fn refresh(&self) -> Result<(), RowError> {
        debug!(table = %self.table, "refresh: called");
        for address in self.registry.addresses() {
            if address != self.table {
                self.registry.remove(&address.table_id, &address.table_name);
            }
        }
        self.main_cache().reload()?;
        Ok(())
    }

    /// Data rows whose run flag is 1, in table order
    pub fn run_indexes(&self) -> Result<Vec<usize>, RowError> {
        let letters = sheetcache::column_letters(self.columns.run_flag);
        let column = self.main_cache().get_range(&format!("{0}:{0}", letters))?;

        let indexes: Vec<usize> = column
            .iter()
            .enumerate()
            .filter(|(row, _)| *row >= self.layout.header_rows)
            .filter(|(_, cells)| {
                cells
                    .first()
                    .and_then(|v| v.as_deref())
                    .and_then(|v| v.trim().parse::<i64>().ok())
                    == Some(1)
            })
            .map(|(row, _)| row + 1)
            .collect();

        info!(count = indexes.len(), "Found rows to run");
        Ok(indexes)
    }

    /// Load every external table referenced by `indexes` with one bulk read each
    ///
    /// Rows that cannot be read are skipped; they fail again when loaded.
    pub fn prefetch(&self, indexes: &[usize]) -> usize {
        let mut tables = BTreeSet::new();
        for &index in indexes {
            let Ok(cells) = self.row_cells(index) else {
                continue;
            };
            for cols in [self.columns.floor, self.columns.ceiling, self.columns.stock, self.columns.blacklist] {
                if let Some(reference) = cells.external(cols) {
                    tables.insert(reference.table());
                }
            }
        }

        let mut loaded = 0;
        for table in &tables {
            let cache = self.registry.get_or_create(&table.table_id, &table.table_name);
            match cache.dimensions() {
                Ok(_) => loaded += 1,
                Err(e) => warn!(table = %table, error = %e, "Failed to prefetch external table"),
            }
        }
        info!(tables = loaded, "Prefetched external tables");
        loaded
    }

    /// Load and validate one row
    pub fn load(&self, index: usize) -> Result<RowConfig, RowError> {
        debug!(index, "load: called");
        if index <= self.layout.header_rows {
            return Err(RowError::Validation(format!("row {} is a header row", index)));
        }
        let cells = self.row_cells(index)?;
        if cells.0.iter().all(Option::is_none) {
            return Err(RowError::Validation(format!("row {} is empty or out of range", index)));
        }
        let c = &self.columns;

        let link = cells
            .get(c.link)
            .ok_or_else(|| RowError::Validation("product link is empty".to_string()))?
            .to_string();
        let offer_id = offer_id_from_link(&link)
            .ok_or_else(|| RowError::Validation(format!("no offer id in link '{}'", link)))?
            .to_string();

        let mode = CompareMode::from_cell(cells.get(c.mode).unwrap_or("0"))?;
        let compare_url = cells.get(c.compare_url).map(str::to_string);
        if mode.scrapes() && compare_url.is_none() {
            return Err(RowError::Validation("compare URL is empty".to_string()));
        }

        let floor_ref = cells
            .external(c.floor)
            .ok_or_else(|| RowError::Validation("floor reference is incomplete".to_string()))?;
        let floor = self
            .external_value(&floor_ref)?
            .ok_or_else(|| RowError::Validation(format!("floor cell {} is blank", floor_ref)))?;
        let floor = parse_number("floor", &floor)?;

        let ceiling = match cells.external(c.ceiling) {
            Some(reference) => match self.external_value(&reference)? {
                Some(value) => Some(parse_number("ceiling", &value)?),
                None => None,
            },
            None => None,
        };
        if let Some(ceiling) = ceiling
            && ceiling < floor
        {
            return Err(RowError::Validation(format!("ceiling {} is below floor {}", ceiling, floor)));
        }

        let stock_ref = cells
            .external(c.stock)
            .ok_or_else(|| RowError::Validation("stock reference is incomplete".to_string()))?;
        let stock = self
            .external_value(&stock_ref)?
            .ok_or_else(|| RowError::Validation(format!("stock cell {} is blank", stock_ref)))?;
        let stock = parse_count("stock", &stock)?;

        let blacklist = match cells.external(c.blacklist) {
            Some(reference) => self.external_list(&reference)?,
            None => Vec::new(),
        };

        let jitter = JitterBand {
            delta_min: cells.get(c.delta_min).map(|v| parse_number("delta min", v)).transpose()?.unwrap_or(0.0),
            delta_max: cells.get(c.delta_max).map(|v| parse_number("delta max", v)).transpose()?.unwrap_or(0.0),
            precision: cells.get(c.precision).map(|v| parse_count("precision", v)).transpose()?.unwrap_or(0) as i32,
        };

        let unit_stock = cells.get(c.unit_stock).map(|v| parse_count("unit stock", v)).transpose()?.unwrap_or(1);
        if unit_stock == 0 {
            return Err(RowError::Validation("unit stock must be at least 1".to_string()));
        }
        let min_units_per_order = cells
            .get(c.min_units)
            .map(|v| parse_count("min units per order", v))
            .transpose()?
            .filter(|min| *min > 0);

        let relax_secs = match cells.get(c.relax) {
            Some(v) => parse_number("relax", v)?.max(0.0),
            None => self.default_relax_secs,
        };

        let row = RowConfig {
            index,
            name: cells.get(c.name).unwrap_or_default().to_string(),
            link,
            offer_id,
            mode,
            compare_url,
            floor,
            ceiling,
            stock,
            blacklist,
            jitter,
            unit_stock,
            min_units_per_order,
            relax_secs,
            note: cells.get(c.note).map(str::to_string),
            last_update: cells.get(c.last_update).map(str::to_string),
        };
        debug!(index, name = %row.name, "load: row validated");
        Ok(row)
    }

    fn row_cells(&self, index: usize) -> Result<RowCells, RowError> {
        let mut rows = self.main_cache().get_range(&format!("{0}:{0}", index))?;
        Ok(RowCells(rows.pop().unwrap_or_default()))
    }

    fn external_cache(&self, reference: &ExternalRef) -> Arc<CellCache> {
        self.registry.get_or_create(&reference.table_id, &reference.table_name)
    }

    fn external_value(&self, reference: &ExternalRef) -> Result<Option<String>, RowError> {
        Ok(self
            .external_cache(reference)
            .get_value(&reference.cell)?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()))
    }

    fn external_list(&self, reference: &ExternalRef) -> Result<Vec<String>, RowError> {
        let range = self.external_cache(reference).get_range(&reference.cell)?;
        Ok(range
            .into_iter()
            .flatten()
            .flatten()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect())
    }
}
