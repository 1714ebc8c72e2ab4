//! Document mutation engine.
//!
//! Every operation validates its whole input first, then takes the
//! document's lock for a bounded wait, and only then touches storage. A
//! request that fails validation or times out has no side effects.

use crate::error::{Result, StoreError};
use crate::model::{CellRead, CellResult, CellWrite, ResultType, WriteSummary, WriteType};
use crate::storage::Storage;
use crate::versions::{SnapshotInfo, VersionStore};
use serde_json::Value as Json;
use sheetstore_formulas::{parse_formula, Evaluator};
use sheetstore_lock::{Acquisition, LockGuard, LockManager, LockMode};
use sheetstore_primitives::datetime::{datetime_to_serial, parse_date_text, serial_to_datetime};
use sheetstore_primitives::{validate_sheet_name, CellAddress, Value};
use sheetstore_sheet::{Book, Cell, CellValue};
use std::sync::Arc;
use std::time::Duration;

/// Reads and writes cells of stored documents under the document's lock.
pub struct DocumentEngine {
    storage: Arc<dyn Storage>,
    locks: Arc<dyn LockManager>,
    versions: Option<VersionStore>,
    wait_budget: Duration,
}

/// A validated cell write. `cell: None` clears the cell.
struct PlannedWrite {
    sheet: String,
    addr: CellAddress,
    cell: Option<Cell>,
}

impl DocumentEngine {
    pub fn new(storage: Arc<dyn Storage>, locks: Arc<dyn LockManager>, wait_budget: Duration) -> Self {
        Self {
            storage,
            locks,
            versions: None,
            wait_budget,
        }
    }

    /// Keep snapshots of overwritten versions.
    #[must_use]
    pub fn with_versions(mut self, versions: VersionStore) -> Self {
        self.versions = Some(versions);
        self
    }

    pub fn wait_budget(&self) -> Duration {
        self.wait_budget
    }

    pub fn lock_manager(&self) -> &dyn LockManager {
        self.locks.as_ref()
    }

    /// Apply `cells` to `document`, creating the document and any missing
    /// sheets.
    pub fn write(
        &self,
        document: &str,
        default_sheet: Option<&str>,
        cells: &[CellWrite],
    ) -> Result<WriteSummary> {
        validate_document_name(document)?;
        if cells.is_empty() {
            return Err(StoreError::validation("write request contains no cells"));
        }
        let plan = cells
            .iter()
            .map(|item| plan_write(item, default_sheet))
            .collect::<Result<Vec<_>>>()?;

        let _guard = self.lock(document, LockMode::Exclusive)?;

        let prior = self.storage.read(document)?;
        let mut book = match &prior {
            Some(bytes) => Book::from_xlsx_bytes(bytes)?,
            None => Book::new(),
        };

        let cells_written = plan.len();
        let mut sheets: Vec<String> = Vec::new();
        for write in plan {
            let sheet = book.get_or_create_sheet(&write.sheet)?;
            if !sheets.iter().any(|s| s == sheet.name()) {
                sheets.push(sheet.name().to_string());
            }
            match write.cell {
                Some(cell) => {
                    sheet.set(write.addr, cell);
                }
                None => {
                    sheet.clear(write.addr);
                }
            }
        }
        let bytes = book.to_xlsx_bytes()?;

        let snapshot = match (&prior, &self.versions) {
            (Some(prior), Some(versions)) => {
                Some(versions.snapshot(document, prior).inspect_err(|err| {
                    tracing::error!(document, error = %err, "failed to snapshot previous version");
                })?)
            }
            _ => None,
        };

        if let Err(err) = self.storage.write(document, &bytes) {
            tracing::error!(document, error = %err, "failed to persist document");
            self.discard_snapshot(snapshot.as_ref());
            return Err(err.into());
        }
        if let (Some(_), Some(versions)) = (&snapshot, &self.versions) {
            // The document is persisted; a prune failure does not fail the write.
            if let Err(err) = versions.prune(document) {
                tracing::warn!(document, error = %err, "failed to prune old snapshots");
            }
        }

        tracing::info!(
            document,
            cells = cells_written,
            sheets = sheets.len(),
            created = prior.is_none(),
            "write completed"
        );
        Ok(WriteSummary {
            document: document.to_string(),
            cells_written,
            sheets,
            created: prior.is_none(),
            snapshot: snapshot.map(|s| s.name),
        })
    }

    /// Read `cells` from `document`. Formula cells are evaluated unless
    /// `read_formula` is set; evaluation failures become `ERROR` results.
    ///
    /// Shared access is held only while the document bytes are loaded.
    /// Decoding and evaluation run on that complete version after release.
    pub fn read(
        &self,
        document: &str,
        default_sheet: Option<&str>,
        cells: &[CellRead],
        read_formula: bool,
    ) -> Result<Vec<CellResult>> {
        validate_document_name(document)?;
        let targets = cells
            .iter()
            .map(|item| {
                let sheet =
                    resolve_sheet(item.sheet_name.as_deref(), default_sheet, &item.cell_address)?;
                Ok((sheet, parse_address(&item.cell_address)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let bytes = {
            let _guard = self.lock(document, LockMode::Shared)?;
            self.storage.read(document)?
        }
        .ok_or_else(|| StoreError::DocumentNotFound(document.to_string()))?;

        if targets.is_empty() {
            return Ok(Vec::new());
        }
        let book = Book::from_xlsx_bytes(&bytes)?;
        let evaluator = Evaluator::new(&book);

        let mut results = Vec::with_capacity(targets.len());
        for (sheet_name, addr) in targets {
            let sheet = book
                .sheet(&sheet_name)
                .ok_or_else(|| StoreError::SheetNotFound {
                    document: document.to_string(),
                    sheet: sheet_name.clone(),
                })?;
            let result = describe_cell(&evaluator, &sheet_name, addr, sheet.get(addr), read_formula);
            results.push(result);
        }

        tracing::info!(
            document,
            cells = results.len(),
            evaluated = evaluator.cached_cells(),
            "read completed"
        );
        Ok(results)
    }

    /// Snapshots of `document`, oldest first. Empty when versioning is off.
    pub fn versions(&self, document: &str) -> Result<Vec<SnapshotInfo>> {
        validate_document_name(document)?;
        match &self.versions {
            Some(versions) => Ok(versions.list(document)?),
            None => Ok(Vec::new()),
        }
    }

    fn lock(&self, document: &str, mode: LockMode) -> Result<LockGuard> {
        match self.locks.try_acquire(document, mode, self.wait_budget) {
            Acquisition::Acquired(guard) => Ok(guard),
            Acquisition::TimedOut => {
                tracing::warn!(
                    document,
                    %mode,
                    wait_ms = self.wait_budget.as_millis() as u64,
                    "lock wait timed out"
                );
                Err(StoreError::LockTimeout {
                    resource: document.to_string(),
                    mode,
                    waited: self.wait_budget,
                })
            }
        }
    }

    fn discard_snapshot(&self, snapshot: Option<&SnapshotInfo>) {
        let (Some(snapshot), Some(versions)) = (snapshot, &self.versions) else {
            return;
        };
        if let Err(err) = versions.discard(snapshot) {
            tracing::warn!(snapshot = %snapshot.name, error = %err, "failed to discard snapshot");
        }
    }
}

/// Reject names that are empty or could leave the storage root.
pub fn validate_document_name(name: &str) -> Result<()> {
    let problem = if name.trim().is_empty() {
        Some("document name is empty")
    } else if name.contains(['/', '\\']) {
        Some("document name contains a path separator")
    } else if name.contains("..") {
        Some("document name contains '..'")
    } else if name.starts_with('.') {
        Some("document name starts with '.'")
    } else if name.chars().any(char::is_control) {
        Some("document name contains control characters")
    } else {
        None
    };
    match problem {
        Some(reason) => Err(StoreError::validation(format!("{reason}: {name:?}"))),
        None => Ok(()),
    }
}

fn resolve_sheet(item: Option<&str>, default: Option<&str>, address: &str) -> Result<String> {
    let name = item
        .or(default)
        .ok_or_else(|| StoreError::validation(format!("no sheet name given for cell {address}")))?;
    validate_sheet_name(name).map_err(|e| StoreError::validation(e.to_string()))?;
    Ok(name.to_string())
}

fn parse_address(address: &str) -> Result<CellAddress> {
    CellAddress::parse(address).map_err(|e| StoreError::validation(e.to_string()))
}

fn plan_write(item: &CellWrite, default_sheet: Option<&str>) -> Result<PlannedWrite> {
    let sheet = resolve_sheet(item.sheet_name.as_deref(), default_sheet, &item.cell_address)?;
    let addr = parse_address(&item.cell_address)?;
    let cell = literal_cell(item.value.as_ref(), item.value_type)
        .map_err(|reason| StoreError::validation(format!("cell {addr}: {reason}")))?;
    Ok(PlannedWrite { sheet, addr, cell })
}

/// The cell a tagged value stores, or `None` for a blank.
fn literal_cell(value: Option<&Json>, tag: WriteType) -> std::result::Result<Option<Cell>, String> {
    let value = match value {
        None | Some(Json::Null) => return Ok(None),
        Some(value) => value,
    };
    let mismatch = || format!("{value} is not a valid {tag} value");

    let cell = match tag {
        WriteType::Blank => return Ok(None),
        WriteType::String => match value {
            Json::String(s) => Cell::text(s.as_str()),
            Json::Number(n) => Cell::text(n.to_string()),
            Json::Bool(b) => Cell::text(b.to_string()),
            _ => return Err(mismatch()),
        },
        WriteType::Number => {
            let n = match value {
                Json::Number(n) => n.as_f64(),
                Json::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            Cell::number(n.filter(|n| n.is_finite()).ok_or_else(mismatch)?)
        }
        WriteType::Boolean => match value {
            Json::Bool(b) => Cell::boolean(*b),
            Json::String(s) if s.trim().eq_ignore_ascii_case("true") => Cell::boolean(true),
            Json::String(s) if s.trim().eq_ignore_ascii_case("false") => Cell::boolean(false),
            _ => return Err(mismatch()),
        },
        WriteType::Formula => {
            let Json::String(text) = value else {
                return Err(mismatch());
            };
            let cell = Cell::formula(text);
            let expr = cell.formula_source().unwrap_or_default();
            if expr.is_empty() {
                return Err("formula is empty".to_string());
            }
            parse_formula(expr).map_err(|e| format!("invalid formula '{expr}': {e}"))?;
            cell
        }
        WriteType::Date => {
            let serial = match value {
                Json::String(s) => parse_date_text(s).and_then(datetime_to_serial),
                Json::Number(n) => n
                    .as_f64()
                    .filter(|serial| serial_to_datetime(*serial).is_some()),
                _ => None,
            };
            Cell::date(serial.ok_or_else(mismatch)?)
        }
    };
    Ok(Some(cell))
}

fn describe_cell(
    evaluator: &Evaluator<'_, Book>,
    sheet: &str,
    addr: CellAddress,
    cell: Option<&Cell>,
    read_formula: bool,
) -> CellResult {
    let mut result = CellResult {
        sheet_name: sheet.to_string(),
        cell_address: addr.to_a1(),
        value: None,
        formula: None,
        value_type: ResultType::Blank,
    };
    let Some(cell) = cell else {
        return result;
    };

    let (value, value_type) = if let CellValue::Formula(expr) = &cell.value {
        result.formula = Some(expr.clone());
        if read_formula {
            (Some(Json::from(format!("={expr}"))), ResultType::Formula)
        } else {
            match evaluator.evaluate_cell(sheet, addr) {
                Ok(value) => classify(value),
                Err(err) => {
                    tracing::warn!(sheet, cell = %addr, formula = %expr, error = %err, "formula evaluation failed");
                    (Some(Json::from(format!("#ERROR: {err}"))), ResultType::Error)
                }
            }
        }
    } else if let Some(date) = cell.date_text() {
        (Some(Json::from(date)), ResultType::Date)
    } else {
        cell.literal()
            .map_or((None, ResultType::Blank), classify)
    };

    result.value = value;
    result.value_type = value_type;
    result
}

fn classify(value: Value) -> (Option<Json>, ResultType) {
    match value {
        Value::Empty => (None, ResultType::Blank),
        Value::Bool(b) => (Some(Json::from(b)), ResultType::Boolean),
        Value::Number(n) => (Some(Json::from(n)), ResultType::Numeric),
        Value::String(s) => (Some(Json::from(s)), ResultType::String),
        Value::Error(e) => (Some(Json::from(e.label())), ResultType::Error),
        Value::Array(_) => (Some(Json::from("#VALUE!")), ResultType::Error),
    }
}
