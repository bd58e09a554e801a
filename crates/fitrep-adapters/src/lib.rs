//! Spreadsheet adapters: first-sheet reading, header/row layout and
//! per-entity row mapping with cell coercion, plus the `.xlsx` writer used
//! by the analysis exports.

use std::collections::HashMap;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Range, Reader};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use fitrep_core::{
    EntityKind, MonthlyConversionRow, PackageRecord, SaleRecord, ServiceRecord, TestingFunnelRow,
    TouchSaleRow,
};
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use thiserror::Error;

pub const CRATE_NAME: &str = "fitrep-adapters";

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("opening workbook: {0}")]
    Open(#[from] calamine::Error),
    #[error("workbook has no sheets")]
    NoSheets,
    #[error("header row {0} not found")]
    MissingHeader(usize),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MapError {
    #[error("row has no id")]
    MissingId,
    #[error("column `{column}`: not a number: {value}")]
    InvalidNumber { column: &'static str, value: String },
    #[error("column `{column}`: not an integer: {value}")]
    InvalidInteger { column: &'static str, value: String },
    #[error("column `{column}`: not a date/time: {value}")]
    InvalidTimestamp { column: &'static str, value: String },
}

/// Where the header sits and which data rows are export artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetLayout {
    /// Rows above the header row (title blocks).
    pub skip_rows: usize,
    /// Data rows dropped after the header.
    pub drop_leading: usize,
    /// Data rows dropped at the bottom (totals lines).
    pub drop_trailing: usize,
}

impl SheetLayout {
    pub fn for_entity(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Services | EntityKind::Sales => Self {
                skip_rows: 0,
                drop_leading: 1,
                drop_trailing: 1,
            },
            EntityKind::Packages => Self {
                skip_rows: 2,
                drop_leading: 0,
                drop_trailing: 0,
            },
        }
    }
}

/// One data row keyed by header name.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetRow {
    /// 1-based row number in the sheet, for log messages.
    pub line: usize,
    cells: HashMap<String, Data>,
}

static EMPTY: Data = Data::Empty;

impl SheetRow {
    pub fn new(line: usize, cells: HashMap<String, Data>) -> Self {
        Self { line, cells }
    }

    pub fn get(&self, column: &str) -> &Data {
        self.cells.get(column).unwrap_or(&EMPTY)
    }

    pub fn text(&self, column: &str) -> Option<String> {
        cell_text(self.get(column))
    }

    pub fn number(&self, column: &'static str) -> Result<Option<f64>, MapError> {
        cell_number(column, self.get(column))
    }

    pub fn integer(&self, column: &'static str) -> Result<Option<i64>, MapError> {
        cell_integer(column, self.get(column))
    }

    pub fn timestamp(&self, column: &'static str) -> Result<Option<NaiveDateTime>, MapError> {
        cell_timestamp(column, self.get(column))
    }

    pub fn id(&self) -> Result<String, MapError> {
        self.text("id").ok_or(MapError::MissingId)
    }
}

/// Read the first worksheet of an `.xlsx`/`.xls`/`.ods` file.
pub fn read_first_sheet(path: impl AsRef<Path>) -> Result<Range<Data>, SheetError> {
    let mut workbook = open_workbook_auto(path.as_ref())?;
    match workbook.worksheet_range_at(0) {
        Some(range) => Ok(range?),
        None => Err(SheetError::NoSheets),
    }
}

/// Turn a sheet into header-keyed rows, skipping blank rows and the
/// layout's artifact rows.
pub fn sheet_rows(range: &Range<Data>, layout: SheetLayout) -> Result<Vec<SheetRow>, SheetError> {
    // `skip_rows` counts from the top of the sheet; the range starts at the
    // first populated row, so blank title rows are already gone.
    let first_row = range.start().map(|(r, _)| r as usize).unwrap_or(0);
    let mut rows = range
        .rows()
        .enumerate()
        .skip(layout.skip_rows.saturating_sub(first_row));
    let (_, header) = rows
        .next()
        .ok_or(SheetError::MissingHeader(layout.skip_rows))?;
    let header: Vec<Option<String>> = header.iter().map(cell_text).collect();

    let mut out = Vec::new();
    for (idx, cells) in rows {
        if cells.iter().all(|c| cell_text(c).is_none()) {
            continue;
        }
        let mut keyed = HashMap::with_capacity(header.len());
        for (name, cell) in header.iter().zip(cells.iter()) {
            if let Some(name) = name {
                keyed.insert(name.clone(), cell.clone());
            }
        }
        out.push(SheetRow::new(first_row + idx + 1, keyed));
    }

    let end = out.len().saturating_sub(layout.drop_trailing);
    let start = layout.drop_leading.min(end);
    Ok(out.drain(start..end).collect())
}

pub fn cell_text(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty | Data::Error(_) => return None,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => dt.as_f64().to_string(),
        },
    };
    (!text.is_empty()).then_some(text)
}

pub fn cell_number(column: &'static str, cell: &Data) -> Result<Option<f64>, MapError> {
    match cell {
        Data::Empty => Ok(None),
        Data::Float(f) => Ok(Some(*f)),
        Data::Int(i) => Ok(Some(*i as f64)),
        Data::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
                .map(|c| if c == ',' { '.' } else { c })
                .collect();
            if cleaned.is_empty() {
                return Ok(None);
            }
            cleaned
                .parse::<f64>()
                .map(Some)
                .map_err(|_| MapError::InvalidNumber {
                    column,
                    value: s.clone(),
                })
        }
        other => Err(MapError::InvalidNumber {
            column,
            value: format!("{other:?}"),
        }),
    }
}

pub fn cell_integer(column: &'static str, cell: &Data) -> Result<Option<i64>, MapError> {
    match cell_number(column, cell) {
        Ok(Some(n)) if n.fract() == 0.0 => Ok(Some(n as i64)),
        Ok(Some(n)) => Err(MapError::InvalidInteger {
            column,
            value: n.to_string(),
        }),
        Ok(None) => Ok(None),
        Err(_) => Err(MapError::InvalidInteger {
            column,
            value: format!("{cell:?}"),
        }),
    }
}

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y"];

pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim().trim_end_matches('Z');
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Excel serial date (1900 system): days since 1899-12-30, fraction is time of day.
pub fn excel_serial_to_timestamp(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let days = serial.trunc() as i64;
    let seconds = ((serial - serial.trunc()) * 86_400.0).round() as i64;
    base.checked_add_signed(Duration::days(days))?
        .checked_add_signed(Duration::seconds(seconds))
}

pub fn cell_timestamp(column: &'static str, cell: &Data) -> Result<Option<NaiveDateTime>, MapError> {
    let invalid = || MapError::InvalidTimestamp {
        column,
        value: format!("{cell:?}"),
    };
    match cell {
        Data::Empty => Ok(None),
        Data::String(s) if s.trim().is_empty() => Ok(None),
        Data::String(s) | Data::DateTimeIso(s) => parse_timestamp(s).map(Some).ok_or_else(invalid),
        Data::DateTime(dt) => dt.as_datetime().map(Some).ok_or_else(invalid),
        Data::Float(f) => excel_serial_to_timestamp(*f).map(Some).ok_or_else(invalid),
        Data::Int(i) => excel_serial_to_timestamp(*i as f64).map(Some).ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

/// Maps header-keyed sheet rows into one entity's records.
pub trait RowMapper: Send + Sync {
    type Record: Send + Sync;

    fn kind(&self) -> EntityKind;

    fn layout(&self) -> SheetLayout {
        SheetLayout::for_entity(self.kind())
    }

    fn map_row(&self, row: &SheetRow) -> Result<Self::Record, MapError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceMapper;

impl RowMapper for ServiceMapper {
    type Record = ServiceRecord;

    fn kind(&self) -> EntityKind {
        EntityKind::Services
    }

    fn map_row(&self, row: &SheetRow) -> Result<ServiceRecord, MapError> {
        Ok(ServiceRecord {
            id: row.id()?,
            name: row.text("name"),
            division: row.text("division"),
            trainer: row.text("trainer"),
            client: row.text("client"),
            basis: row.text("basis"),
            comment: row.text("comment"),
            datetime: row.timestamp("datetime")?,
            price: row.number("price")?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SaleMapper;

impl RowMapper for SaleMapper {
    type Record = SaleRecord;

    fn kind(&self) -> EntityKind {
        EntityKind::Sales
    }

    fn map_row(&self, row: &SheetRow) -> Result<SaleRecord, MapError> {
        Ok(SaleRecord {
            id: row.id()?,
            datetime: row.timestamp("datetime")?,
            division: row.text("division"),
            name: row.text("name"),
            client: row.text("client"),
            author: row.text("author"),
            trainer: row.text("trainer"),
            sale_type: row.text("type"),
            order_count: row.integer("order_count")?,
            order_price: row.number("order_price")?,
            refund_count: row.integer("refund_count")?,
            refund_price: row.number("refund_price")?,
            final_price: row.number("final_price")?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PackageMapper;

impl RowMapper for PackageMapper {
    type Record = PackageRecord;

    fn kind(&self) -> EntityKind {
        EntityKind::Packages
    }

    fn map_row(&self, row: &SheetRow) -> Result<PackageRecord, MapError> {
        Ok(PackageRecord {
            id: row.id()?,
            date_sale: row.timestamp("dateSale")?,
            date_activation: row.timestamp("dateActivation")?,
            date_closing: row.timestamp("dateClosing")?,
            name: row.text("name"),
            division: row.text("division"),
            comment: row.text("comment"),
            client: row.text("client"),
            client_birthday: row.timestamp("clientBirthday")?,
            client_phone: row.text("clientPhone"),
            trainer: row.text("trainer"),
            price: row.number("price")?,
            count: row.integer("count")?,
            date_prodl: row.timestamp("dateProdl")?,
            status: row.text("status"),
        })
    }
}

/// Records mapped from one sheet plus the rows that could not be mapped.
#[derive(Debug)]
pub struct ParsedSheet<R> {
    pub records: Vec<R>,
    pub rejected: Vec<(usize, MapError)>,
}

pub fn map_rows<M: RowMapper>(mapper: &M, rows: &[SheetRow]) -> ParsedSheet<M::Record> {
    let mut records = Vec::with_capacity(rows.len());
    let mut rejected = Vec::new();
    for row in rows {
        match mapper.map_row(row) {
            Ok(record) => records.push(record),
            Err(err) => rejected.push((row.line, err)),
        }
    }
    ParsedSheet { records, rejected }
}

/// Read, lay out and map a whole export file.
pub fn parse_file<M: RowMapper>(
    mapper: &M,
    path: impl AsRef<Path>,
) -> Result<ParsedSheet<M::Record>, SheetError> {
    let range = read_first_sheet(path)?;
    let rows = sheet_rows(&range, mapper.layout())?;
    Ok(map_rows(mapper, &rows))
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("writing workbook: {0}")]
    Xlsx(#[from] XlsxError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportCell {
    Empty,
    Text(String),
    Number(f64),
    DateTime(NaiveDateTime),
}

impl From<Option<String>> for ExportCell {
    fn from(value: Option<String>) -> Self {
        value.map(ExportCell::Text).unwrap_or(ExportCell::Empty)
    }
}

impl From<Option<NaiveDateTime>> for ExportCell {
    fn from(value: Option<NaiveDateTime>) -> Self {
        value.map(ExportCell::DateTime).unwrap_or(ExportCell::Empty)
    }
}

impl From<Option<i64>> for ExportCell {
    fn from(value: Option<i64>) -> Self {
        value
            .map(|n| ExportCell::Number(n as f64))
            .unwrap_or(ExportCell::Empty)
    }
}

/// A report row that can be laid out as one spreadsheet line.
pub trait ExportRow {
    fn headers() -> Vec<String>;

    fn cells(&self) -> Vec<ExportCell>;
}

fn headers(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

impl ExportRow for TouchSaleRow {
    fn headers() -> Vec<String> {
        headers(&[
            "service_name",
            "service_datetime",
            "service_trainer",
            "sale_after_days",
            "service_client",
            "sale_datetime",
            "sale_division",
            "sale_name",
            "sale_trainer",
            "sale_final_price",
        ])
    }

    fn cells(&self) -> Vec<ExportCell> {
        vec![
            self.service_name.clone().into(),
            ExportCell::DateTime(self.service_datetime),
            self.service_trainer.clone().into(),
            ExportCell::Number(self.sale_after_days as f64),
            ExportCell::Text(self.service_client.clone()),
            ExportCell::DateTime(self.sale_datetime),
            self.sale_division.clone().into(),
            self.sale_name.clone().into(),
            self.sale_trainer.clone().into(),
            ExportCell::Number(self.sale_final_price),
        ]
    }
}

impl ExportRow for TestingFunnelRow {
    fn headers() -> Vec<String> {
        headers(&[
            "testing_name",
            "testing_datetime",
            "testing_client",
            "testing_trainer",
            "days_between",
            "vpt_name",
            "vpt_datetime",
            "vpt_trainer",
        ])
    }

    fn cells(&self) -> Vec<ExportCell> {
        vec![
            self.testing_name.clone().into(),
            ExportCell::DateTime(self.testing_datetime),
            self.testing_client.clone().into(),
            self.testing_trainer.clone().into(),
            self.days_between.into(),
            self.vpt_name.clone().into(),
            self.vpt_datetime.into(),
            self.vpt_trainer.clone().into(),
        ]
    }
}

/// One worksheet's worth of cells: a header line and data lines.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExportTable {
    pub sheet_name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<ExportCell>>,
}

impl ExportTable {
    pub fn from_rows<R: ExportRow>(sheet_name: &str, rows: &[R]) -> Self {
        Self {
            sheet_name: sheet_name.to_string(),
            headers: R::headers(),
            rows: rows.iter().map(R::cells).collect(),
        }
    }

    /// Trainer column, then a sessions/sales/amount group per month.
    pub fn monthly_conversion(sheet_name: &str, rows: &[MonthlyConversionRow]) -> Self {
        let mut header = vec!["trainer".to_string()];
        if let Some(first) = rows.first() {
            for cell in &first.months {
                let tag = format!("{}-{:02}", cell.year, cell.month);
                header.push(format!("sessions {tag}"));
                header.push(format!("sales {tag}"));
                header.push(format!("amount {tag}"));
            }
        }
        let body = rows
            .iter()
            .map(|row| {
                let mut cells = vec![ExportCell::Text(row.trainer.clone())];
                for month in &row.months {
                    cells.push(ExportCell::Number(month.sessions_count as f64));
                    cells.push(ExportCell::Number(month.first_sales_count as f64));
                    cells.push(ExportCell::Number(month.first_sales_amount));
                }
                cells
            })
            .collect();
        Self {
            sheet_name: sheet_name.to_string(),
            headers: header,
            rows: body,
        }
    }
}

/// Inverse of [`excel_serial_to_timestamp`].
pub fn timestamp_to_excel_serial(ts: NaiveDateTime) -> f64 {
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default();
    (ts - base).num_seconds() as f64 / 86_400.0
}

pub fn write_xlsx(path: impl AsRef<Path>, table: &ExportTable) -> Result<(), ExportError> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let datetime = Format::new().set_num_format("yyyy-mm-dd hh:mm:ss");

    let sheet = workbook.add_worksheet();
    sheet.set_name(table.sheet_name.as_str())?;
    for (col, header) in table.headers.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, header.as_str(), &bold)?;
    }
    for (idx, row) in table.rows.iter().enumerate() {
        let line = idx as u32 + 1;
        for (col, cell) in row.iter().enumerate() {
            let col = col as u16;
            match cell {
                ExportCell::Empty => {}
                ExportCell::Text(text) => {
                    sheet.write_string(line, col, text.as_str())?;
                }
                ExportCell::Number(n) => {
                    sheet.write_number(line, col, *n)?;
                }
                ExportCell::DateTime(ts) => {
                    sheet.write_number_with_format(line, col, timestamp_to_excel_serial(*ts), &datetime)?;
                }
            }
        }
    }
    workbook.save(path.as_ref())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(rows: &[&[Data]]) -> Range<Data> {
        let width = rows.iter().map(|r| r.len()).max().unwrap_or(1) as u32;
        let mut range = Range::new((0, 0), (rows.len() as u32 - 1, width - 1));
        for (r, row) in rows.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                range.set_value((r as u32, c as u32), cell.clone());
            }
        }
        range
    }

    fn s(v: &str) -> Data {
        Data::String(v.to_string())
    }

    #[test]
    fn services_layout_drops_first_and_last_data_rows() {
        let range = sheet(&[
            &[s("id"), s("name"), s("datetime"), s("price")],
            &[s("Итого за период"), Data::Empty, Data::Empty, Data::Empty],
            &[Data::Float(101.0), s("ПТ 60 мин"), s("2024-10-05 10:00:00"), Data::Float(2500.0)],
            &[Data::Float(102.0), s("МГ 3 чел"), s("05.10.2024 12:30"), s("1 200,50")],
            &[s("Всего"), Data::Empty, Data::Empty, Data::Float(3700.5)],
        ]);
        let rows = sheet_rows(&range, SheetLayout::for_entity(EntityKind::Services)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].line, 3);

        let parsed = map_rows(&ServiceMapper, &rows);
        assert!(parsed.rejected.is_empty());
        assert_eq!(parsed.records[0].id, "101");
        assert_eq!(parsed.records[0].name.as_deref(), Some("ПТ 60 мин"));
        assert_eq!(parsed.records[1].price, Some(1200.5));
        assert_eq!(
            parsed.records[1].datetime.unwrap().to_string(),
            "2024-10-05 12:30:00"
        );
        assert_eq!(parsed.records[1].basis, None);
    }

    #[test]
    fn packages_layout_skips_title_block() {
        let range = sheet(&[
            &[s("Отчет по пакетам")],
            &[Data::Empty],
            &[s("id"), s("dateSale"), s("client"), s("count"), s("price")],
            &[s("P-1"), Data::Float(45570.5), s("Петров"), Data::Float(10.0), Data::Empty],
        ]);
        let rows = sheet_rows(&range, SheetLayout::for_entity(EntityKind::Packages)).unwrap();
        assert_eq!(rows.len(), 1);
        let parsed = map_rows(&PackageMapper, &rows);
        let pkg = &parsed.records[0];
        assert_eq!(pkg.id, "P-1");
        assert_eq!(pkg.count, Some(10));
        assert_eq!(pkg.price, None);
        assert_eq!(pkg.date_sale.unwrap().to_string(), "2024-10-05 12:00:00");
    }

    #[test]
    fn packages_layout_counts_from_sheet_top_when_title_rows_are_blank() {
        let mut range = Range::new((2, 0), (3, 1));
        range.set_value((2, 0), s("id"));
        range.set_value((2, 1), s("client"));
        range.set_value((3, 0), s("P-1"));
        range.set_value((3, 1), s("Петров"));

        let rows = sheet_rows(&range, SheetLayout::for_entity(EntityKind::Packages)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].line, 4);
        let parsed = map_rows(&PackageMapper, &rows);
        assert_eq!(parsed.records[0].id, "P-1");
        assert_eq!(parsed.records[0].client.as_deref(), Some("Петров"));
    }

    #[test]
    fn rows_without_id_or_with_bad_values_are_rejected() {
        let range = sheet(&[
            &[s("id"), s("datetime"), s("final_price"), s("order_count")],
            &[s("skip")],
            &[Data::Empty, s("2024-10-20"), Data::Float(3000.0), Data::Float(1.0)],
            &[Data::Int(7), s("not a date"), Data::Float(3000.0), Data::Float(1.0)],
            &[Data::Int(8), s("2024-10-20"), s("abc"), Data::Float(1.0)],
            &[Data::Int(9), s("2024-10-20"), Data::Float(3000.0), Data::Float(1.5)],
            &[Data::Int(10), s("2024-10-20"), Data::Float(3000.0), Data::Float(1.0)],
            &[s("total")],
        ]);
        let rows = sheet_rows(&range, SheetLayout::for_entity(EntityKind::Sales)).unwrap();
        let parsed = map_rows(&SaleMapper, &rows);
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].id, "10");
        assert_eq!(parsed.rejected.len(), 4);
        assert_eq!(parsed.rejected[0].1, MapError::MissingId);
        assert!(matches!(parsed.rejected[1].1, MapError::InvalidTimestamp { column: "datetime", .. }));
        assert!(matches!(parsed.rejected[2].1, MapError::InvalidNumber { column: "final_price", .. }));
        assert!(matches!(parsed.rejected[3].1, MapError::InvalidInteger { column: "order_count", .. }));
    }

    #[test]
    fn blank_rows_are_ignored_before_trimming() {
        let range = sheet(&[
            &[s("id")],
            &[s("first")],
            &[Data::Empty],
            &[s("1")],
            &[s("  ")],
            &[s("last")],
        ]);
        let rows = sheet_rows(&range, SheetLayout::for_entity(EntityKind::Sales)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text("id").as_deref(), Some("1"));
    }

    #[test]
    fn short_sheet_trims_to_nothing() {
        let range = sheet(&[&[s("id")], &[s("only")]]);
        let rows = sheet_rows(&range, SheetLayout::for_entity(EntityKind::Services)).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn excel_serial_dates_convert() {
        assert_eq!(
            excel_serial_to_timestamp(45570.0).unwrap().to_string(),
            "2024-10-05 00:00:00"
        );
        assert!(excel_serial_to_timestamp(-1.0).is_none());
    }

    #[test]
    fn excel_serial_conversion_is_reversible() {
        let ts = NaiveDate::from_ymd_opt(2024, 10, 5)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert_eq!(timestamp_to_excel_serial(ts), 45570.5);
        assert_eq!(excel_serial_to_timestamp(45570.5), Some(ts));
    }

    fn month(year: i32, month: u32, sessions: i64, sales: i64, amount: f64) -> fitrep_core::MonthConversion {
        fitrep_core::MonthConversion {
            year,
            month,
            sessions_count: sessions,
            first_sales_count: sales,
            first_sales_amount: amount,
        }
    }

    #[test]
    fn monthly_conversion_table_groups_columns_per_month() {
        let rows = vec![MonthlyConversionRow {
            trainer: "Иванов".into(),
            months: vec![month(2024, 10, 4, 1, 3000.0), month(2024, 11, 0, 0, 0.0)],
        }];
        let table = ExportTable::monthly_conversion("Conversion", &rows);
        assert_eq!(
            table.headers,
            vec![
                "trainer",
                "sessions 2024-10",
                "sales 2024-10",
                "amount 2024-10",
                "sessions 2024-11",
                "sales 2024-11",
                "amount 2024-11",
            ]
        );
        assert_eq!(table.rows[0].len(), 7);
        assert_eq!(table.rows[0][3], ExportCell::Number(3000.0));
    }

    #[test]
    fn written_workbook_reads_back_with_dates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("funnel.xlsx");
        let tested = NaiveDate::from_ymd_opt(2024, 10, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let rows = vec![
            TestingFunnelRow {
                testing_name: Some("Фитнес-тестирование".into()),
                testing_datetime: tested,
                testing_client: Some("Петров".into()),
                testing_trainer: Some("Иванов".into()),
                days_between: Some(3),
                vpt_name: Some("Персональная тренировка в тренажерном зале".into()),
                vpt_datetime: Some(tested + Duration::days(3)),
                vpt_trainer: Some("Иванов".into()),
            },
            TestingFunnelRow {
                testing_name: Some("Фитнес-тестирование".into()),
                testing_datetime: tested,
                testing_client: Some("Сидоров".into()),
                testing_trainer: None,
                days_between: None,
                vpt_name: None,
                vpt_datetime: None,
                vpt_trainer: None,
            },
        ];
        write_xlsx(&path, &ExportTable::from_rows("ServicesReport", &rows)).unwrap();

        let range = read_first_sheet(&path).unwrap();
        let layout = SheetLayout {
            skip_rows: 0,
            drop_leading: 0,
            drop_trailing: 0,
        };
        let read = sheet_rows(&range, layout).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[0].text("testing_client").as_deref(), Some("Петров"));
        assert_eq!(read[0].integer("days_between").unwrap(), Some(3));
        assert_eq!(read[0].timestamp("testing_datetime").unwrap(), Some(tested));
        assert_eq!(read[1].text("vpt_name"), None);
    }

    #[test]
    fn text_cells_render_integral_floats_without_fraction() {
        assert_eq!(cell_text(&Data::Float(1234567.0)).as_deref(), Some("1234567"));
        assert_eq!(cell_text(&Data::Float(12.5)).as_deref(), Some("12.5"));
        assert_eq!(cell_text(&s("   ")), None);
    }
}
