use crate::error::{Result, SheetError};
use crate::sheet::Sheet;
use indexmap::IndexMap;
use sheetstore_formulas::{CellContent, CellSource};
use sheetstore_primitives::{validate_sheet_name, CellAddress};

/// A book containing multiple sheets (preserves insertion order)
///
/// Sheet names are unique ignoring case, as in Excel. Lookups accept any
/// casing; the sheet keeps the name it was created with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Book {
    sheets: IndexMap<String, Sheet>,
}

fn key(name: &str) -> String {
    name.to_lowercase()
}

impl Book {
    /// Create a new empty book
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of sheets
    #[must_use]
    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }

    /// Get all sheet names in order
    #[must_use]
    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.values().map(Sheet::name).collect()
    }

    #[must_use]
    pub fn has_sheet(&self, name: &str) -> bool {
        self.sheets.contains_key(&key(name))
    }

    /// Get a sheet by name
    #[must_use]
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.get(&key(name))
    }

    /// Get a mutable sheet by name
    pub fn sheet_mut(&mut self, name: &str) -> Option<&mut Sheet> {
        self.sheets.get_mut(&key(name))
    }

    /// Iterate sheets in order
    pub fn sheets(&self) -> impl Iterator<Item = &Sheet> {
        self.sheets.values()
    }

    /// Add an empty sheet
    pub fn add_sheet(&mut self, name: &str) -> Result<&mut Sheet> {
        validate_sheet_name(name)?;
        let key = key(name);
        if self.sheets.contains_key(&key) {
            return Err(SheetError::SheetAlreadyExists {
                name: name.to_string(),
            });
        }
        Ok(self.sheets.entry(key).or_insert_with(|| Sheet::with_name(name)))
    }

    /// Get a sheet, creating it at the end of the book if it does not exist.
    pub fn get_or_create_sheet(&mut self, name: &str) -> Result<&mut Sheet> {
        if self.has_sheet(name) {
            return self
                .sheet_mut(name)
                .ok_or_else(|| SheetError::SheetNotFound {
                    name: name.to_string(),
                });
        }
        self.add_sheet(name)
    }

    /// Remove a sheet, keeping the order of the rest
    pub fn remove_sheet(&mut self, name: &str) -> Result<Sheet> {
        self.sheets
            .shift_remove(&key(name))
            .ok_or_else(|| SheetError::SheetNotFound {
                name: name.to_string(),
            })
    }
}

impl CellSource for Book {
    fn has_sheet(&self, sheet: &str) -> bool {
        Book::has_sheet(self, sheet)
    }

    fn cell(&self, sheet: &str, addr: CellAddress) -> Option<CellContent<'_>> {
        let cell = self.sheet(sheet)?.get(addr)?;
        match cell.formula_source() {
            Some(expr) => Some(CellContent::Formula(expr)),
            None => cell.literal().map(CellContent::Value),
        }
    }
}
