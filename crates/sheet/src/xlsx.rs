//! xlsx codec: decode with `calamine`, encode with `rust_xlsxwriter`.

use crate::book::Book;
use crate::cell::{Cell, CellValue, NumberFormat};
use crate::error::{Result, SheetError};
use calamine::{Data, Range, Reader, Xlsx};
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use sheetstore_primitives::CellAddress;
use std::io::Cursor;

const DATE_FORMAT: &str = "yyyy-mm-dd";
const DATETIME_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";

/// Convert calamine Data to a stored cell. `None` for blanks.
fn data_to_cell(data: &Data) -> Option<Cell> {
    let cell = match data {
        Data::Empty => return None,
        Data::Bool(b) => Cell::boolean(*b),
        Data::Int(i) => Cell::number(*i as f64),
        Data::Float(f) => Cell::number(*f),
        Data::String(s) => Cell::text(s.clone()),
        Data::DateTime(dt) => Cell::date(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::text(s.clone()),
        // Cached error results; the error label is the best literal we have.
        Data::Error(e) => Cell::text(e.to_string()),
    };
    Some(cell)
}

fn offset(range_start: Option<(u32, u32)>, row: usize, col: usize) -> Result<CellAddress> {
    let (row0, col0) = range_start.unwrap_or((0, 0));
    let row = u32::try_from(row)
        .ok()
        .and_then(|r| r.checked_add(row0))
        .ok_or_else(|| SheetError::Decode("row index overflow".to_string()))?;
    let col = u32::try_from(col)
        .ok()
        .and_then(|c| c.checked_add(col0))
        .ok_or_else(|| SheetError::Decode("column index overflow".to_string()))?;
    Ok(CellAddress::new(row, col))
}

fn decode_error(e: impl std::fmt::Display) -> SheetError {
    SheetError::Decode(e.to_string())
}

fn encode_error(e: XlsxError) -> SheetError {
    SheetError::Encode(e.to_string())
}

impl Book {
    /// Decode a book from xlsx bytes.
    ///
    /// Literal cells keep their type; formula cells keep their expression and
    /// drop any cached result. Date-formatted numbers keep the date flag.
    pub fn from_xlsx_bytes(bytes: &[u8]) -> Result<Self> {
        let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes)).map_err(decode_error)?;
        let mut book = Book::new();

        for sheet_name in workbook.sheet_names() {
            let values: Range<Data> = workbook
                .worksheet_range(&sheet_name)
                .map_err(decode_error)?;
            let formulas: Range<String> = workbook
                .worksheet_formula(&sheet_name)
                .map_err(decode_error)?;

            let sheet = book.add_sheet(&sheet_name)?;
            for (row, col, data) in values.used_cells() {
                if let Some(cell) = data_to_cell(data) {
                    sheet.set(offset(values.start(), row, col)?, cell);
                }
            }
            for (row, col, expr) in formulas.used_cells() {
                if !expr.trim().is_empty() {
                    sheet.set(offset(formulas.start(), row, col)?, Cell::formula(expr));
                }
            }
        }

        Ok(book)
    }

    /// Encode the full book as xlsx bytes.
    pub fn to_xlsx_bytes(&self) -> Result<Vec<u8>> {
        let mut workbook = Workbook::new();
        let date = Format::new().set_num_format(DATE_FORMAT);
        let datetime = Format::new().set_num_format(DATETIME_FORMAT);

        for sheet in self.sheets() {
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(sheet.name()).map_err(encode_error)?;
            for (addr, cell) in sheet.cells() {
                write_cell(worksheet, addr, cell, &date, &datetime)?;
            }
        }

        workbook.save_to_buffer().map_err(encode_error)
    }
}

fn write_cell(
    worksheet: &mut Worksheet,
    addr: CellAddress,
    cell: &Cell,
    date: &Format,
    datetime: &Format,
) -> Result<()> {
    let row = addr.row;
    let col = u16::try_from(addr.col)
        .map_err(|_| SheetError::Encode(format!("column index overflow at {addr}")))?;

    match (&cell.value, cell.format) {
        (CellValue::Number(n), NumberFormat::Date) => {
            let format = if n.fract() == 0.0 { date } else { datetime };
            worksheet.write_number_with_format(row, col, *n, format)
        }
        (CellValue::Number(n), NumberFormat::General) => worksheet.write_number(row, col, *n),
        (CellValue::Text(s), _) => worksheet.write_string(row, col, s),
        (CellValue::Bool(b), _) => worksheet.write_boolean(row, col, *b),
        (CellValue::Formula(expr), _) => worksheet.write_formula(row, col, format!("={expr}").as_str()),
    }
    .map_err(encode_error)?;
    Ok(())
}
