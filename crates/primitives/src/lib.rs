//! # sheetstore primitives
//!
//! Cell addressing (A1 notation, sheet-name rules), Excel serial dates, and
//! the value types produced by formula evaluation.

pub mod address;
pub mod datetime;
mod value;

pub use address::{normalize, validate_sheet_name, AddressError, CellAddress, CellRange};
pub use value::{ErrorValue, Value};
