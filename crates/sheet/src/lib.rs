//! Document model for sheetstore
//!
//! A [`Book`] is an ordered set of named [`Sheet`]s, each a sparse grid of
//! [`Cell`]s. Books are persisted as xlsx and always read and written whole.
//!
//! ```
//! use sheetstore_sheet::{Book, Cell};
//!
//! let mut book = Book::new();
//! let sheet = book.get_or_create_sheet("Sheet1").unwrap();
//! sheet.set_a1("A1", Cell::number(10.0)).unwrap();
//! sheet.set_a1("B1", Cell::formula("=A1*2")).unwrap();
//!
//! let bytes = book.to_xlsx_bytes().unwrap();
//! let decoded = Book::from_xlsx_bytes(&bytes).unwrap();
//! assert_eq!(decoded, book);
//! ```

mod book;
mod cell;
mod error;
mod sheet;
mod xlsx;

pub use book::Book;
pub use cell::{Cell, CellValue, NumberFormat};
pub use error::{Result, SheetError};
pub use sheet::Sheet;
