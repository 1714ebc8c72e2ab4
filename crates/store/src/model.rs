//! Request and response shapes for document operations.
//!
//! Field names are camelCase on the wire.

use crate::error::{ErrorKind, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Type tag for a written value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum WriteType {
    #[default]
    String,
    Number,
    Boolean,
    Formula,
    Blank,
    /// ISO date text stored as a date-formatted serial number.
    Date,
}

impl WriteType {
    pub fn as_str(self) -> &'static str {
        match self {
            WriteType::String => "STRING",
            WriteType::Number => "NUMBER",
            WriteType::Boolean => "BOOLEAN",
            WriteType::Formula => "FORMULA",
            WriteType::Blank => "BLANK",
            WriteType::Date => "DATE",
        }
    }
}

impl TryFrom<String> for WriteType {
    type Error = String;

    fn try_from(tag: String) -> Result<Self, Self::Error> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "STRING" | "TEXT" => Ok(WriteType::String),
            "NUMBER" | "NUMERIC" => Ok(WriteType::Number),
            "BOOLEAN" | "BOOL" => Ok(WriteType::Boolean),
            "FORMULA" => Ok(WriteType::Formula),
            "BLANK" => Ok(WriteType::Blank),
            "DATE" => Ok(WriteType::Date),
            _ => Err(format!("unknown value type '{tag}'")),
        }
    }
}

impl From<WriteType> for String {
    fn from(tag: WriteType) -> Self {
        tag.as_str().to_string()
    }
}

impl fmt::Display for WriteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type tag on a read result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResultType {
    String,
    Numeric,
    Boolean,
    Formula,
    Blank,
    Error,
    Date,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellWrite {
    /// Overrides the request's sheet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,
    pub cell_address: String,
    /// `null` or missing clears the cell.
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub value_type: WriteType,
}

impl CellWrite {
    pub fn new(cell_address: &str, value: impl Into<serde_json::Value>, value_type: WriteType) -> Self {
        Self {
            sheet_name: None,
            cell_address: cell_address.to_string(),
            value: Some(value.into()),
            value_type,
        }
    }

    pub fn blank(cell_address: &str) -> Self {
        Self {
            sheet_name: None,
            cell_address: cell_address.to_string(),
            value: None,
            value_type: WriteType::Blank,
        }
    }

    pub fn on_sheet(mut self, sheet_name: &str) -> Self {
        self.sheet_name = Some(sheet_name.to_string());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,
    #[serde(default)]
    pub cells: Vec<CellWrite>,
}

impl WriteRequest {
    pub fn new(file_name: &str, sheet_name: &str) -> Self {
        Self {
            file_name: Some(file_name.to_string()),
            sheet_name: Some(sheet_name.to_string()),
            cells: Vec::new(),
        }
    }

    pub fn cell(mut self, cell: CellWrite) -> Self {
        self.cells.push(cell);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellRead {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,
    pub cell_address: String,
}

impl CellRead {
    pub fn new(cell_address: &str) -> Self {
        Self {
            sheet_name: None,
            cell_address: cell_address.to_string(),
        }
    }

    pub fn on_sheet(mut self, sheet_name: &str) -> Self {
        self.sheet_name = Some(sheet_name.to_string());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,
    #[serde(default)]
    pub cells: Vec<CellRead>,
    /// Return formula text instead of evaluating.
    #[serde(default)]
    pub read_formula: bool,
}

impl ReadRequest {
    pub fn new(file_name: &str, sheet_name: &str) -> Self {
        Self {
            file_name: Some(file_name.to_string()),
            sheet_name: Some(sheet_name.to_string()),
            cells: Vec::new(),
            read_formula: false,
        }
    }

    pub fn cell(mut self, cell_address: &str) -> Self {
        self.cells.push(CellRead::new(cell_address));
        self
    }

    pub fn formulas(mut self) -> Self {
        self.read_formula = true;
        self
    }
}

/// Write, then read, as two independent steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    /// Used by inner requests that do not name a document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_request: Option<WriteRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_request: Option<ReadRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellResult {
    pub sheet_name: String,
    pub cell_address: String,
    pub value: Option<serde_json::Value>,
    /// Stored expression, without the leading `=`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    pub value_type: ResultType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<CellResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl OperationResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            error: None,
        }
    }

    pub fn with_data(message: impl Into<String>, data: Vec<CellResult>) -> Self {
        Self {
            data: Some(data),
            ..Self::ok(message)
        }
    }

    pub fn failure(err: &StoreError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            data: None,
            error: Some(err.kind()),
        }
    }
}

/// What a write changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteSummary {
    pub document: String,
    pub cells_written: usize,
    /// Sheets touched, in first-touch order.
    pub sheets: Vec<String>,
    /// The document did not exist before this write.
    pub created: bool,
    /// Snapshot of the previous version, if one was taken.
    pub snapshot: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_write_request_wire_shape() {
        let request: WriteRequest = serde_json::from_value(json!({
            "fileName": "data.xlsx",
            "sheetName": "Sheet1",
            "cells": [
                {"cellAddress": "A1", "value": 10, "valueType": "number"},
                {"cellAddress": "B1", "value": "hi"},
                {"cellAddress": "C1", "value": null, "valueType": "Text", "sheetName": "Other"}
            ]
        }))
        .unwrap();
        assert_eq!(request.file_name.as_deref(), Some("data.xlsx"));
        assert_eq!(request.cells[0].value_type, WriteType::Number);
        assert_eq!(request.cells[1].value_type, WriteType::String);
        assert_eq!(request.cells[2].value, None);
        assert_eq!(request.cells[2].sheet_name.as_deref(), Some("Other"));
    }

    #[test]
    fn test_unknown_write_type_rejected() {
        let err = serde_json::from_value::<CellWrite>(json!({
            "cellAddress": "A1", "value": 1, "valueType": "IMAGE"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("unknown value type"));
    }

    #[test]
    fn test_response_shape() {
        let response = OperationResponse::with_data(
            "read succeeded",
            vec![CellResult {
                sheet_name: "Sheet1".into(),
                cell_address: "C1".into(),
                value: Some(json!(30.0)),
                formula: Some("A1+B1".into()),
                value_type: ResultType::Numeric,
            }],
        );
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "success": true,
                "message": "read succeeded",
                "data": [{
                    "sheetName": "Sheet1",
                    "cellAddress": "C1",
                    "value": 30.0,
                    "formula": "A1+B1",
                    "valueType": "NUMERIC"
                }]
            })
        );

        let failure = OperationResponse::failure(&StoreError::DocumentNotFound("x.xlsx".into()));
        let wire = serde_json::to_value(&failure).unwrap();
        assert_eq!(wire["success"], json!(false));
        assert_eq!(wire["error"], json!("notFound"));
        assert!(wire.get("data").is_none());
    }
}
