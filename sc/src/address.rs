//! A1 notation parsing
//!
//! Converts "B5", "A1:C10", "A:A", "2:4" and friends into 0-based,
//! half-open grid bounds. Unbounded sides stay `None` until they are
//! resolved against a concrete grid.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

use crate::error::{CacheError, Result};

static CELL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z]+)([0-9]+)$").expect("cell pattern is valid"));

static PART_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z]*)([0-9]*)$").expect("range part pattern is valid"));

/// A single cell, 0-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef {
    pub row: usize,
    pub col: usize,
}

impl CellRef {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Parse a single cell such as "B5" (an optional `Sheet!` prefix is ignored)
    pub fn parse(a1: &str) -> Result<Self> {
        let cell = strip_table_prefix(a1.trim());
        let caps = CELL_RE
            .captures(cell)
            .ok_or_else(|| CacheError::Address(a1.to_string()))?;

        let col = column_index(&caps[1]).ok_or_else(|| CacheError::Address(a1.to_string()))?;
        let row: usize = caps[2].parse().map_err(|_| CacheError::Address(a1.to_string()))?;
        if row == 0 {
            return Err(CacheError::Address(a1.to_string()));
        }

        Ok(Self { row: row - 1, col })
    }

    /// Render as A1 notation
    pub fn to_a1(&self) -> String {
        format!("{}{}", column_letters(self.col), self.row + 1)
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_a1())
    }
}

/// A rectangular range, 0-based and half-open; `None` means unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GridRange {
    pub start_row: Option<usize>,
    pub end_row: Option<usize>,
    pub start_col: Option<usize>,
    pub end_col: Option<usize>,
}

/// A range resolved against a grid: concrete half-open bounds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bounds {
    pub rows: std::ops::Range<usize>,
    pub cols: std::ops::Range<usize>,
}

impl GridRange {
    /// Parse a cell or range reference
    pub fn parse(a1: &str) -> Result<Self> {
        let range = strip_table_prefix(a1.trim());
        let invalid = || CacheError::Address(a1.to_string());

        let (start, end) = match range.split_once(':') {
            Some((start, end)) => (start, Some(end)),
            None => (range, None),
        };

        let (start_col, start_row) = parse_part(start).ok_or_else(invalid)?;

        let (end_col, end_row) = match end {
            // A lone cell covers exactly itself
            None => {
                if start_col.is_none() || start_row.is_none() {
                    return Err(invalid());
                }
                (start_col, start_row)
            }
            Some(end) => parse_part(end).ok_or_else(invalid)?,
        };

        Ok(Self {
            start_row,
            end_row: end_row.map(|r| r + 1),
            start_col,
            end_col: end_col.map(|c| c + 1),
        })
    }

    /// Resolve unbounded sides against a grid of `height` rows and `width` columns
    pub fn resolve(&self, height: usize, width: usize) -> Bounds {
        let row_start = self.start_row.unwrap_or(0);
        let col_start = self.start_col.unwrap_or(0);
        let row_end = self.end_row.unwrap_or(height).max(row_start);
        let col_end = self.end_col.unwrap_or(width).max(col_start);

        Bounds {
            rows: row_start..row_end,
            cols: col_start..col_end,
        }
    }
}

/// Parse one side of a range ("A1", "A", "1"); at least one part must be present
fn parse_part(part: &str) -> Option<(Option<usize>, Option<usize>)> {
    let caps = PART_RE.captures(part)?;
    let letters = &caps[1];
    let digits = &caps[2];

    if letters.is_empty() && digits.is_empty() {
        return None;
    }

    let col = if letters.is_empty() {
        None
    } else {
        Some(column_index(letters)?)
    };

    let row = if digits.is_empty() {
        None
    } else {
        let row: usize = digits.parse().ok()?;
        if row == 0 {
            return None;
        }
        Some(row - 1)
    };

    Some((col, row))
}

fn strip_table_prefix(a1: &str) -> &str {
    match a1.rsplit_once('!') {
        Some((_, range)) => range,
        None => a1,
    }
}

/// Convert column letters ("A", "Z", "AA") to a 0-based index
pub fn column_index(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }

    let mut index = 0usize;
    for ch in letters.chars() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        let digit = (ch.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        index = index.checked_mul(26)?.checked_add(digit)?;
    }
    Some(index - 1)
}

/// Convert a 0-based column index to letters ("A", "Z", "AA")
pub fn column_letters(col: usize) -> String {
    let mut letters = Vec::new();
    let mut n = col + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_roundtrip() {
        assert_eq!(column_index("A"), Some(0));
        assert_eq!(column_index("z"), Some(25));
        assert_eq!(column_index("AA"), Some(26));
        assert_eq!(column_index("AZ"), Some(51));
        assert_eq!(column_index("1"), None);
        assert_eq!(column_letters(0), "A");
        assert_eq!(column_letters(25), "Z");
        assert_eq!(column_letters(26), "AA");
        assert_eq!(column_letters(701), "ZZ");
        assert_eq!(column_letters(702), "AAA");
    }

    #[test]
    fn test_parse_cell() {
        assert_eq!(CellRef::parse("A1").unwrap(), CellRef::new(0, 0));
        assert_eq!(CellRef::parse("b5").unwrap(), CellRef::new(4, 1));
        assert_eq!(CellRef::parse("Sheet1!C3").unwrap(), CellRef::new(2, 2));
        assert_eq!(CellRef::new(9, 27).to_a1(), "AB10");
    }

    #[test]
    fn test_parse_cell_rejects_garbage() {
        for bad in ["", "A", "1", "A0", "1A", "A1:B2", "A-1"] {
            assert!(CellRef::parse(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_parse_single_cell_range() {
        let range = GridRange::parse("A1").unwrap();
        assert_eq!(
            range,
            GridRange {
                start_row: Some(0),
                end_row: Some(1),
                start_col: Some(0),
                end_col: Some(1),
            }
        );
    }

    #[test]
    fn test_parse_bounded_range() {
        let range = GridRange::parse("A1:B10").unwrap();
        assert_eq!(range.start_row, Some(0));
        assert_eq!(range.end_row, Some(10));
        assert_eq!(range.start_col, Some(0));
        assert_eq!(range.end_col, Some(2));
    }

    #[test]
    fn test_parse_column_and_row_ranges() {
        let cols = GridRange::parse("A:A").unwrap();
        assert_eq!(cols.start_col, Some(0));
        assert_eq!(cols.end_col, Some(1));
        assert_eq!(cols.start_row, None);
        assert_eq!(cols.end_row, None);

        let rows = GridRange::parse("2:4").unwrap();
        assert_eq!(rows.start_row, Some(1));
        assert_eq!(rows.end_row, Some(4));
        assert_eq!(rows.start_col, None);

        let open = GridRange::parse("'My Sheet'!B2:C").unwrap();
        assert_eq!(open.start_row, Some(1));
        assert_eq!(open.end_row, None);
        assert_eq!(open.end_col, Some(3));
    }

    #[test]
    fn test_parse_range_rejects_garbage() {
        for bad in ["", ":", "A1:", "A1:B2:C3", "A0:B1", "$A$1"] {
            assert!(GridRange::parse(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_resolve() {
        let bounds = GridRange::parse("A:B").unwrap().resolve(7, 5);
        assert_eq!(bounds.rows, 0..7);
        assert_eq!(bounds.cols, 0..2);

        let bounds = GridRange::parse("C3:D").unwrap().resolve(2, 1);
        assert_eq!(bounds.rows, 2..2);
        assert_eq!(bounds.cols, 2..4);
    }
}
