use sheetstore_primitives::CellAddress;
use sheetstore_sheet::{Book, Cell, CellValue, NumberFormat, SheetError};
use tempfile::tempdir;

fn addr(a1: &str) -> CellAddress {
    CellAddress::parse(a1).expect("address")
}

fn sample_book() -> Book {
    let mut book = Book::new();
    let sheet = book.get_or_create_sheet("Sheet1").unwrap();
    sheet.set(addr("A1"), Cell::number(10.0));
    sheet.set(addr("B1"), Cell::number(20.5));
    sheet.set(addr("C1"), Cell::formula("=A1+B1"));
    sheet.set(addr("A2"), Cell::text("hello"));
    sheet.set(addr("B2"), Cell::boolean(true));
    sheet.set(addr("C2"), Cell::date(44562.0));
    sheet.set(addr("D2"), Cell::date(45352.5));

    let other = book.get_or_create_sheet("Other Data").unwrap();
    other.set(addr("B3"), Cell::formula("SUM(Sheet1!A1:B1)"));
    book
}

#[test]
fn test_round_trip_every_cell_kind() {
    let book = sample_book();
    let bytes = book.to_xlsx_bytes().unwrap();
    let decoded = Book::from_xlsx_bytes(&bytes).unwrap();

    assert_eq!(decoded.sheet_names(), vec!["Sheet1", "Other Data"]);
    let sheet = decoded.sheet("sheet1").unwrap();
    assert_eq!(sheet.len(), 7);
    assert_eq!(sheet.get(addr("A1")), Some(&Cell::number(10.0)));
    assert_eq!(sheet.get(addr("B1")), Some(&Cell::number(20.5)));
    assert_eq!(sheet.get(addr("A2")), Some(&Cell::text("hello")));
    assert_eq!(sheet.get(addr("B2")), Some(&Cell::boolean(true)));

    let c1 = sheet.get(addr("C1")).unwrap();
    assert_eq!(c1.value, CellValue::Formula("A1+B1".to_string()));

    let other = decoded.sheet("Other Data").unwrap();
    assert_eq!(
        other.get(addr("B3")).and_then(Cell::formula_source),
        Some("SUM(Sheet1!A1:B1)")
    );
    assert_eq!(decoded, book);
}

#[test]
fn test_date_format_survives_round_trip() {
    let book = sample_book();
    let decoded = Book::from_xlsx_bytes(&book.to_xlsx_bytes().unwrap()).unwrap();
    let sheet = decoded.sheet("Sheet1").unwrap();

    let date = sheet.get(addr("C2")).unwrap();
    assert_eq!(date.format, NumberFormat::Date);
    assert_eq!(date.date_text().as_deref(), Some("2022-01-01"));

    let datetime = sheet.get(addr("D2")).unwrap();
    assert!(datetime.is_date());
    assert_eq!(datetime.date_text().as_deref(), Some("2024-03-01 12:00:00"));
}

#[test]
fn test_empty_sheets_are_kept() {
    let mut book = Book::new();
    book.get_or_create_sheet("Empty").unwrap();
    book.get_or_create_sheet("Sheet2")
        .unwrap()
        .set(addr("A1"), Cell::number(1.0));

    let decoded = Book::from_xlsx_bytes(&book.to_xlsx_bytes().unwrap()).unwrap();
    assert_eq!(decoded.sheet_names(), vec!["Empty", "Sheet2"]);
    assert!(decoded.sheet("Empty").unwrap().is_empty());
}

#[test]
fn test_cells_away_from_origin_keep_their_address() {
    let mut book = Book::new();
    book.get_or_create_sheet("Sheet1")
        .unwrap()
        .set(addr("D7"), Cell::number(3.0));

    let decoded = Book::from_xlsx_bytes(&book.to_xlsx_bytes().unwrap()).unwrap();
    let sheet = decoded.sheet("Sheet1").unwrap();
    assert_eq!(sheet.get(addr("D7")), Some(&Cell::number(3.0)));
    assert_eq!(sheet.len(), 1);
}

#[test]
fn test_corrupt_bytes_are_a_decode_error() {
    assert!(matches!(
        Book::from_xlsx_bytes(b"definitely not a zip archive"),
        Err(SheetError::Decode(_))
    ));
}

#[test]
fn test_bytes_written_to_disk_decode() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("book.xlsx");
    std::fs::write(&path, sample_book().to_xlsx_bytes().unwrap()).unwrap();

    let decoded = Book::from_xlsx_bytes(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(decoded.sheet_count(), 2);
}
