use crate::cell::Cell;
use crate::error::Result;
use sheetstore_primitives::CellAddress;
use std::collections::BTreeMap;

/// A named, sparse grid of cells.
///
/// Cells are kept in row-major order; blank cells have no entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    name: String,
    cells: BTreeMap<CellAddress, Cell>,
}

impl Sheet {
    /// Create an empty sheet. The name is not validated here; see [`crate::Book`].
    #[must_use]
    pub fn with_name(name: &str) -> Self {
        Self {
            name: name.to_string(),
            cells: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of non-blank cells
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[must_use]
    pub fn get(&self, addr: CellAddress) -> Option<&Cell> {
        self.cells.get(&addr)
    }

    /// Store a cell, returning the previous one.
    pub fn set(&mut self, addr: CellAddress, cell: Cell) -> Option<Cell> {
        self.cells.insert(addr, cell)
    }

    /// Make a cell blank, returning what it held.
    pub fn clear(&mut self, addr: CellAddress) -> Option<Cell> {
        self.cells.remove(&addr)
    }

    /// Get a cell by A1 notation
    pub fn get_a1(&self, notation: &str) -> Result<Option<&Cell>> {
        Ok(self.get(CellAddress::parse(notation)?))
    }

    /// Set a cell by A1 notation
    pub fn set_a1(&mut self, notation: &str, cell: Cell) -> Result<Option<Cell>> {
        Ok(self.set(CellAddress::parse(notation)?, cell))
    }

    /// Non-blank cells in row-major order
    pub fn cells(&self) -> impl Iterator<Item = (CellAddress, &Cell)> {
        self.cells.iter().map(|(addr, cell)| (*addr, cell))
    }
}
