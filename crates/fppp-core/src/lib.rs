//! Core domain model for the FPPP sheet sync: cell values, the FPPP
//! record, header-row column resolution, and tolerant date handling.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const CRATE_NAME: &str = "fppp-core";

/// A single cell as returned by the tabular store. Sheets hand back
/// heterogeneous JSON values; everything is normalized to text at the
/// point of comparison via [`Cell::to_text`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Text(String),
    Number(f64),
    Bool(bool),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Renders the cell as plain text. Integral numbers drop the
    /// trailing `.0` so key comparisons survive numeric business ids.
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => {
                if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Self::Bool(b) => b.to_string(),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// One merged production-workflow record, keyed by `business_id`.
/// Every field is plain text; dates are only typed transiently while
/// deriving `waktu_produksi`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FpppRecord {
    pub business_id: String,
    pub title_form: String,
    pub divisi: String,
    pub tgl_fppp: String,
    pub no_fppp: String,
    pub deadline_pengiriman: String,
    pub waktu_produksi: String,
    pub finance_stage: String,
    pub end_time: String,
}

impl FpppRecord {
    pub fn to_row(&self) -> Vec<Cell> {
        vec![
            Cell::text(&self.business_id),
            Cell::text(&self.title_form),
            Cell::text(&self.divisi),
            Cell::text(&self.tgl_fppp),
            Cell::text(&self.no_fppp),
            Cell::text(&self.deadline_pengiriman),
            Cell::text(&self.waktu_produksi),
            Cell::text(&self.finance_stage),
            Cell::text(&self.end_time),
        ]
    }
}

/// Fixed destination header, column-for-column with [`FpppRecord::to_row`].
pub fn header_row() -> Vec<Cell> {
    [
        "business_id",
        "Title Form",
        "Divisi",
        "Tgl FPPP",
        "No. FPPP",
        "Deadline Pengiriman",
        "Waktu Produksi",
        "Finance Stage",
        "End Time",
    ]
    .into_iter()
    .map(Cell::from)
    .collect()
}

/// Mapping from logical field name to zero-based column position.
///
/// Source sheets get columns reordered by hand, so positions are always
/// resolved from the header row rather than assumed. Unresolved names
/// stay `None` and read back as empty strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    positions: HashMap<String, Option<usize>>,
}

impl ColumnMap {
    /// Resolves `names` against a header row. Matching is trimmed,
    /// case-insensitive, and exact; the first header cell matching a
    /// name wins, later duplicates are ignored.
    pub fn resolve(header: &[Cell], names: &[&str]) -> Self {
        let mut positions: HashMap<String, Option<usize>> = names
            .iter()
            .map(|name| ((*name).to_string(), None))
            .collect();

        for (i, cell) in header.iter().enumerate() {
            let label = cell.to_text();
            let label = label.trim().to_lowercase();
            for name in names {
                let taken = positions.get(*name).copied().flatten().is_some();
                if !taken && label == name.to_lowercase() {
                    positions.insert((*name).to_string(), Some(i));
                    break;
                }
            }
        }

        let map = Self { positions };
        debug!(columns = ?map.positions, "resolved header columns");
        map
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied().flatten()
    }

    /// Cell text for `name` in `row`, or `""` when the column is
    /// unresolved or the row is too short.
    pub fn text(&self, row: &[Cell], name: &str) -> String {
        match self.get(name) {
            Some(i) => row.get(i).map(Cell::to_text).unwrap_or_default(),
            None => String::new(),
        }
    }
}

/// Trims the value and maps a literal `"null"` (any case) to empty.
/// Sheets formulas leak the string "null" into otherwise-empty cells.
pub fn normalize_null(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("null") {
        String::new()
    } else {
        trimmed.to_string()
    }
}

const DATE_LAYOUTS: &[&str] = &[
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%Y/%m/%d",
    "%d-%m-%Y",
    "%B %d, %Y",
    "%d %B %Y",
];

/// Tolerant multi-format date parser: first layout that parses wins.
pub fn parse_flexible_date(value: &str) -> Option<NaiveDate> {
    DATE_LAYOUTS
        .iter()
        .find_map(|layout| NaiveDate::parse_from_str(value, layout).ok())
}

/// Derives the production duration as `"<N> hari"` from the form date
/// and the delivery deadline, or `""` when either side fails to parse.
/// The day count is signed; a deadline before the form date is the
/// sheet's problem to flag, not ours to clamp.
pub fn derive_waktu_produksi(tgl_fppp: &str, deadline: &str) -> String {
    let (Some(start), Some(end)) = (
        parse_flexible_date(tgl_fppp),
        parse_flexible_date(deadline),
    ) else {
        return String::new();
    };
    let days = (end - start).num_days();
    format!("{days} hari")
}
