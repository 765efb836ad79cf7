//! Builds one in-memory [`TransactionSet`] from a bank CSV export and a
//! declarative column-mapping profile. The result feeds straight into a
//! store; no serialization round trip is needed first.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::str::FromStr;
use thiserror::Error;

use tabula_core::transaction::RESERVED_FIELDS;
use tabula_core::{BalanceError, Money, Transaction, TransactionSet};

/// Maps logical transaction fields onto CSV column indices, with
/// per-field parsing rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub date_column: usize,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    /// Single signed amount column...
    pub value_column: Option<usize>,
    /// ...or a debit/credit pair (debit negated, credit positive).
    pub debit_column: Option<usize>,
    pub credit_column: Option<usize>,
    /// European exports: `.` as thousands grouping, `,` as decimal mark.
    #[serde(default)]
    pub decimal_comma: bool,
    /// Extra columns to carry along as open text fields, in order.
    #[serde(default)]
    pub field_columns: Vec<FieldColumn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldColumn {
    pub name: String,
    pub column: usize,
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_true() -> bool {
    true
}

fn default_delimiter() -> String {
    ",".to_string()
}

/// One bank's CSV layout: mapping plus reader options and, when the
/// export states them, declared balance anchors. Absent anchors mean
/// "unknown, do not validate".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportProfile {
    pub name: String,
    #[serde(default = "default_true")]
    pub has_header: bool,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    pub opening_balance: Option<Money>,
    pub closing_balance: Option<Money>,
    pub mapping: ColumnMapping,
}

#[derive(Debug, Error)]
pub enum CsvImportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid profile: {0}")]
    Profile(String),
    #[error("row {row}: missing column {column}")]
    MissingColumn { row: usize, column: usize },
    #[error("row {row}: invalid date '{value}'")]
    InvalidDate { row: usize, value: String },
    #[error("row {row}: invalid amount '{value}'")]
    InvalidAmount { row: usize, value: String },
    #[error("no data rows")]
    NoDataRows,
    #[error("declared balances do not match the imported rows: {0}")]
    Balance(#[from] BalanceError),
}

impl ImportProfile {
    pub fn from_toml(content: &str) -> Result<Self, CsvImportError> {
        let profile: ImportProfile =
            toml::from_str(content).map_err(|e| CsvImportError::Profile(e.to_string()))?;
        profile.validate()?;
        Ok(profile)
    }

    fn validate(&self) -> Result<(), CsvImportError> {
        let m = &self.mapping;
        let pair = m.debit_column.is_some() && m.credit_column.is_some();
        if m.value_column.is_some() == pair {
            return Err(CsvImportError::Profile(
                "exactly one of value_column or the debit/credit column pair is required".into(),
            ));
        }
        for fc in &m.field_columns {
            if RESERVED_FIELDS.contains(&fc.name.as_str()) {
                return Err(CsvImportError::Profile(format!(
                    "field name '{}' is reserved",
                    fc.name
                )));
            }
        }
        Ok(())
    }
}

/// Imports one CSV into a single transaction set labelled `source`.
/// Entries come out date-ordered with the profile's balance anchors
/// applied and validated (when declared).
pub fn import_csv<R: Read>(
    data: R,
    profile: &ImportProfile,
    source: &str,
) -> Result<TransactionSet, CsvImportError> {
    profile.validate()?;

    let delimiter = profile.delimiter.as_bytes().first().copied().unwrap_or(b',');
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(profile.has_header)
        .delimiter(delimiter)
        .from_reader(data);

    let mapping = &profile.mapping;
    let mut set = TransactionSet::new(source);
    set.opening_balance = profile.opening_balance;
    set.closing_balance = profile.closing_balance;

    // Row numbers count the physical CSV lines, header included.
    let offset = if profile.has_header { 2 } else { 1 };
    for (idx, result) in reader.records().enumerate() {
        let row = idx + offset;
        let record = result?;
        if record.is_empty() || record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }

        let raw_date = record
            .get(mapping.date_column)
            .ok_or(CsvImportError::MissingColumn { row, column: mapping.date_column })?;
        let date = parse_date(raw_date, &mapping.date_format)
            .ok_or_else(|| CsvImportError::InvalidDate { row, value: raw_date.trim().to_owned() })?;

        let value = if let Some(col) = mapping.value_column {
            let raw = record
                .get(col)
                .ok_or(CsvImportError::MissingColumn { row, column: col })?;
            parse_amount(raw, mapping.decimal_comma)
                .ok_or_else(|| CsvImportError::InvalidAmount { row, value: raw.trim().to_owned() })?
        } else {
            // Validated: both columns are present in pair mode.
            let debit = mapping.debit_column.unwrap_or_default();
            let credit = mapping.credit_column.unwrap_or_default();
            let d = amount_cell(&record, debit, row, mapping.decimal_comma)?;
            let c = amount_cell(&record, credit, row, mapping.decimal_comma)?;
            match (d, c) {
                (Some(d), None) => -d,
                (None, Some(c)) => c,
                (None, None) => Money::zero(),
                (Some(_), Some(_)) => {
                    return Err(CsvImportError::InvalidAmount {
                        row,
                        value: "both debit and credit set".to_owned(),
                    })
                }
            }
        };

        let mut trn = Transaction::new(date, value);
        for fc in &mapping.field_columns {
            let text = record.get(fc.column).unwrap_or_default().trim();
            trn.insert_field(&fc.name, text);
        }
        set.push(trn);
    }

    if set.is_empty() {
        return Err(CsvImportError::NoDataRows);
    }

    set.sort_entries();
    set.recompute_balances()?;
    Ok(set)
}

fn amount_cell(
    record: &csv::StringRecord,
    column: usize,
    row: usize,
    decimal_comma: bool,
) -> Result<Option<Money>, CsvImportError> {
    let Some(raw) = record.get(column) else {
        return Ok(None);
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    parse_amount(raw, decimal_comma)
        .map(Some)
        .ok_or_else(|| CsvImportError::InvalidAmount { row, value: raw.trim().to_owned() })
}

fn parse_date(s: &str, format: &str) -> Option<NaiveDate> {
    let s = s.trim();

    if let Ok(date) = NaiveDate::parse_from_str(s, format) {
        return Some(date);
    }

    // Common bank layouts, tried after the declared format.
    for fmt in &["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date);
        }
    }

    None
}

fn parse_amount(s: &str, decimal_comma: bool) -> Option<Money> {
    let s = s.trim();
    let (negative, s) = if s.starts_with('(') && s.ends_with(')') && s.len() >= 2 {
        (true, &s[1..s.len() - 1])
    } else {
        (false, s)
    };

    let mut s = s.replace(['$', '€', ' ', '\u{a0}'], "");
    if decimal_comma {
        s = s.replace('.', "").replace(',', ".");
    } else {
        s = s.replace(',', "");
    }
    let s = s.strip_prefix('+').unwrap_or(&s);

    let mut dec = Decimal::from_str(s).ok()?;
    if negative {
        dec = -dec;
    }
    Some(Money::from_decimal(dec))
}
