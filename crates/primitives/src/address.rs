//! Address and range helpers for spreadsheet-style A1 references.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MAX_ROW_COUNT: u32 = 1_048_576;
pub const MAX_COLUMN_COUNT: u32 = 16_384;
pub const MAX_SHEET_NAME_LEN: usize = 31;

/// Characters Excel refuses in sheet names.
const FORBIDDEN_SHEET_CHARS: [char; 7] = ['[', ']', ':', '*', '?', '/', '\\'];

/// Errors that can occur when parsing addresses
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("Empty cell address")]
    Empty,
    #[error("Malformed cell address '{0}': expected column letters followed by a row number")]
    Malformed(String),
    #[error("Invalid row in cell address '{0}'")]
    InvalidRow(String),
    #[error("Cell address '{0}' is outside the sheet bounds (max XFD1048576)")]
    OutOfBounds(String),
    #[error("Invalid sheet name '{name}': {reason}")]
    InvalidSheetName { name: String, reason: &'static str },
}

/// A zero-based cell position. The external form is "A1"-style with a
/// 1-based row and base-26 column letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellAddress {
    pub row: u32,
    pub col: u32,
}

impl CellAddress {
    /// Create a new cell address
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Parse A1 notation (case-insensitive, `$` markers allowed).
    ///
    /// ```
    /// use sheetstore_primitives::CellAddress;
    ///
    /// let addr = CellAddress::parse("b12").unwrap();
    /// assert_eq!((addr.row, addr.col), (11, 1));
    /// assert_eq!(addr.to_a1(), "B12");
    /// ```
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }
        let (letters, digits) =
            split_a1(trimmed).ok_or_else(|| AddressError::Malformed(trimmed.to_string()))?;

        // Anything longer than XFD cannot be in bounds; checking early avoids overflow.
        if letters.len() > 3 {
            return Err(AddressError::OutOfBounds(trimmed.to_string()));
        }
        let col = column_letters_to_index(letters)?;

        let row_number: u32 = digits
            .parse()
            .map_err(|_| AddressError::OutOfBounds(trimmed.to_string()))?;
        if row_number == 0 {
            return Err(AddressError::InvalidRow(trimmed.to_string()));
        }
        if row_number > MAX_ROW_COUNT || col >= MAX_COLUMN_COUNT {
            return Err(AddressError::OutOfBounds(trimmed.to_string()));
        }

        Ok(Self {
            row: row_number - 1,
            col,
        })
    }

    /// Convert to A1 notation
    pub fn to_a1(&self) -> String {
        format!("{}{}", column_index_to_letters(self.col), self.row + 1)
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_index_to_letters(self.col), self.row + 1)
    }
}

impl FromStr for CellAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A rectangular block of cells (e.g., A1:B10)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellRange {
    pub start: CellAddress,
    pub end: CellAddress,
}

impl CellRange {
    /// Create a range; corners are normalized so that start <= end.
    pub fn new(a: CellAddress, b: CellAddress) -> Self {
        Self {
            start: CellAddress::new(a.row.min(b.row), a.col.min(b.col)),
            end: CellAddress::new(a.row.max(b.row), a.col.max(b.col)),
        }
    }

    /// Number of rows in the range
    pub fn rows(&self) -> u32 {
        self.end.row - self.start.row + 1
    }

    /// Number of columns in the range
    pub fn cols(&self) -> u32 {
        self.end.col - self.start.col + 1
    }

    /// Total number of cells
    pub fn size(&self) -> u64 {
        u64::from(self.rows()) * u64::from(self.cols())
    }

    pub fn contains(&self, addr: &CellAddress) -> bool {
        (self.start.row..=self.end.row).contains(&addr.row)
            && (self.start.col..=self.end.col).contains(&addr.col)
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

/// Normalize an address string to its canonical form ("b$2" => "B2").
pub fn normalize(text: &str) -> Result<String, AddressError> {
    CellAddress::parse(text).map(|addr| addr.to_a1())
}

/// Convert column letters to a zero-based index (A -> 0, Z -> 25, AA -> 26).
pub fn column_letters_to_index(letters: &str) -> Result<u32, AddressError> {
    if letters.is_empty() {
        return Err(AddressError::Malformed(letters.to_string()));
    }
    let mut result: u32 = 0;
    for ch in letters.chars() {
        if !ch.is_ascii_alphabetic() {
            return Err(AddressError::Malformed(letters.to_string()));
        }
        let value = u32::from(ch.to_ascii_uppercase() as u8 - b'A' + 1);
        result = result
            .checked_mul(26)
            .and_then(|v| v.checked_add(value))
            .ok_or_else(|| AddressError::OutOfBounds(letters.to_string()))?;
    }
    Ok(result - 1)
}

/// Convert a zero-based column index to letters (0 -> A, 25 -> Z, 26 -> AA).
pub fn column_index_to_letters(index: u32) -> String {
    let mut n = index;
    let mut out = Vec::new();
    loop {
        out.push(b'A' + (n % 26) as u8);
        n /= 26;
        if n == 0 {
            break;
        }
        n -= 1;
    }
    out.iter().rev().map(|&b| b as char).collect()
}

/// Check a sheet name against the rules Excel enforces.
pub fn validate_sheet_name(name: &str) -> Result<(), AddressError> {
    let invalid = |reason| {
        Err(AddressError::InvalidSheetName {
            name: name.to_string(),
            reason,
        })
    };
    if name.trim().is_empty() {
        return invalid("name is empty");
    }
    if name.chars().count() > MAX_SHEET_NAME_LEN {
        return invalid("name is longer than 31 characters");
    }
    if name.chars().any(|c| FORBIDDEN_SHEET_CHARS.contains(&c)) {
        return invalid("name contains one of [ ] : * ? / \\");
    }
    if name.starts_with('\'') || name.ends_with('\'') {
        return invalid("name starts or ends with an apostrophe");
    }
    Ok(())
}

/// Split "$AB$12" into ("AB", "12"). Returns None unless the input is
/// exactly a letter run followed by a digit run.
fn split_a1(address: &str) -> Option<(&str, &str)> {
    let bytes = address.as_bytes();
    let mut j = 0;
    if bytes.get(j) == Some(&b'$') {
        j += 1;
    }
    let letters_start = j;
    while j < bytes.len() && bytes[j].is_ascii_alphabetic() {
        j += 1;
    }
    let letters = &address[letters_start..j];
    if j < bytes.len() && bytes[j] == b'$' {
        j += 1;
    }
    let digits_start = j;
    while j < bytes.len() && bytes[j].is_ascii_digit() {
        j += 1;
    }
    if letters.is_empty() || digits_start == j || j != bytes.len() {
        return None;
    }
    Some((letters, &address[digits_start..j]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letters() {
        assert_eq!(column_letters_to_index("A").unwrap(), 0);
        assert_eq!(column_letters_to_index("z").unwrap(), 25);
        assert_eq!(column_letters_to_index("AA").unwrap(), 26);
        assert_eq!(column_letters_to_index("XFD").unwrap(), 16_383);
        assert_eq!(column_index_to_letters(0), "A");
        assert_eq!(column_index_to_letters(25), "Z");
        assert_eq!(column_index_to_letters(26), "AA");
        assert_eq!(column_index_to_letters(701), "ZZ");
        assert_eq!(column_index_to_letters(702), "AAA");
    }

    #[test]
    fn test_split_a1() {
        assert_eq!(split_a1("$B$2"), Some(("B", "2")));
        assert_eq!(split_a1("AZ27"), Some(("AZ", "27")));
        assert_eq!(split_a1("27"), None);
        assert_eq!(split_a1("AZ"), None);
        assert_eq!(split_a1("A1B"), None);
    }

    #[test]
    fn test_range_normalizes_corners() {
        let range = CellRange::new(CellAddress::new(5, 4), CellAddress::new(3, 2));
        assert_eq!(range.start, CellAddress::new(3, 2));
        assert_eq!(range.end, CellAddress::new(5, 4));
        assert_eq!(range.rows(), 3);
        assert_eq!(range.cols(), 3);
        assert_eq!(range.size(), 9);
        assert!(range.contains(&CellAddress::new(4, 3)));
        assert!(!range.contains(&CellAddress::new(6, 3)));
        assert_eq!(range.to_string(), "C4:E6");
    }
}
