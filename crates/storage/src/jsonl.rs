//! Round-trips one transaction file to and from a [`TransactionSet`].
//!
//! File layout, one JSON object per line:
//! - line 1: header with `opening_balance` and `closing_balance`
//!   (decimal string, number, or null for "unknown") plus arbitrary
//!   extra fields, preserved on rewrite;
//! - lines 2..N: one transaction each.
//!
//! Loading validates shape and balances up front; a bad line fails the
//! whole load. Saving rewrites the file atomically via a temporary
//! sibling file.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tabula_core::{Money, Transaction, TransactionSet};

use crate::error::StoreError;

#[derive(Debug, Serialize, Deserialize)]
struct SetHeader {
    opening_balance: Option<Money>,
    closing_balance: Option<Money>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Loads one transaction set. Entries end up date-ordered (stable for
/// same-date ties) with verified, recomputed running balances.
pub fn read_set(path: &Path) -> Result<TransactionSet, StoreError> {
    let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
    let reader = BufReader::new(file);

    let mut lines = Vec::new();
    for line in reader.lines() {
        lines.push(line.map_err(|e| StoreError::io(path, e))?);
    }
    // A trailing newline is fine; blank lines inside the stream are not.
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }

    let Some(header_line) = lines.first() else {
        return Err(StoreError::malformed(path, 1, "empty file, expected header line"));
    };
    let header = parse_header(path, header_line)?;

    let mut set = TransactionSet::new(path.display().to_string());
    set.opening_balance = header.opening_balance;
    set.closing_balance = header.closing_balance;
    set.header_fields = header.extra;

    for (idx, line) in lines.iter().enumerate().skip(1) {
        let line_num = idx + 1;
        if line.trim().is_empty() {
            return Err(StoreError::malformed(path, line_num, "blank line inside record stream"));
        }
        let trn: Transaction = serde_json::from_str(line)
            .map_err(|e| StoreError::malformed(path, line_num, e.to_string()))?;
        if let Some(name) = trn.non_string_field() {
            return Err(StoreError::malformed(
                path,
                line_num,
                format!("field '{name}' must be a JSON string"),
            ));
        }
        set.push(trn);
    }

    set.sort_entries();
    set.recompute_balances()
        .map_err(|source| StoreError::BalanceMismatch { path: path.into(), source })?;

    tracing::debug!(path = %path.display(), entries = set.len(), "loaded transaction set");
    Ok(set)
}

fn parse_header(path: &Path, line: &str) -> Result<SetHeader, StoreError> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| StoreError::malformed(path, 1, e.to_string()))?;

    let Value::Object(ref obj) = value else {
        return Err(StoreError::malformed(path, 1, "header must be a JSON object"));
    };
    // Serde would default missing keys to null; require them spelled out
    // so a transaction line can never pass as a header.
    for key in ["opening_balance", "closing_balance"] {
        if !obj.contains_key(key) {
            return Err(StoreError::malformed(path, 1, format!("header is missing '{key}'")));
        }
    }

    serde_json::from_value(value).map_err(|e| StoreError::malformed(path, 1, e.to_string()))
}

/// Writes the set to `path`: header line first, then one compact record
/// per entry in current order, with current in-memory values. The write
/// goes to a temporary sibling which is renamed into place on success
/// and removed on any failure.
pub fn write_set(path: &Path, set: &TransactionSet) -> Result<(), StoreError> {
    let tmp = tmp_path(path);

    if let Err(e) = write_contents(&tmp, set) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        StoreError::io(path, e)
    })?;

    tracing::debug!(path = %path.display(), entries = set.len(), "wrote transaction set");
    Ok(())
}

fn write_contents(tmp: &Path, set: &TransactionSet) -> Result<(), StoreError> {
    let file = File::create(tmp).map_err(|e| StoreError::io(tmp, e))?;
    let mut writer = BufWriter::new(file);

    let header = SetHeader {
        opening_balance: set.opening_balance,
        closing_balance: set.closing_balance,
        extra: set.header_fields.clone(),
    };
    let header_json =
        serde_json::to_string(&header).map_err(|e| StoreError::io(tmp, e.into()))?;
    writeln!(writer, "{header_json}").map_err(|e| StoreError::io(tmp, e))?;

    for trn in set.entries() {
        let json = serde_json::to_string(trn).map_err(|e| StoreError::io(tmp, e.into()))?;
        writeln!(writer, "{json}").map_err(|e| StoreError::io(tmp, e))?;
    }

    writer.flush().map_err(|e| StoreError::io(tmp, e))?;
    // Flush to disk before the rename makes the new contents visible.
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| StoreError::io(tmp, e))?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample_set(source: &str) -> TransactionSet {
        let mut set = TransactionSet::new(source);
        set.opening_balance = Some(Money::from_cents(10000));

        let mut a = Transaction::new(date(2020, 1, 1), Money::from_cents(-2000));
        a.insert_field("details", "Rent January");
        a.insert_field("addressee", "ACME Housing");
        a.set_category(Some("Housing"));
        set.push(a);

        let mut b = Transaction::new(date(2020, 1, 5), Money::from_cents(500));
        b.insert_field("details", "Refund");
        set.push(b);

        set.recompute_balances().unwrap();
        set.clear_modified();
        set
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transactions_2020-01-01.jsonl");

        let mut original = sample_set(&path.display().to_string());
        original
            .header_fields
            .insert("currency".into(), Value::String("EUR".into()));

        write_set(&path, &original).unwrap();
        let loaded = read_set(&path).unwrap();

        assert_eq!(loaded, original);
        assert_eq!(loaded.header_fields.get("currency"), Some(&Value::String("EUR".into())));
    }

    #[test]
    fn edits_survive_the_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.jsonl");

        let mut set = sample_set("t.jsonl");
        write_set(&path, &set).unwrap();

        set.entry_mut(1).unwrap().set_category(Some("Transfers"));
        write_set(&path, &set).unwrap();

        let loaded = read_set(&path).unwrap();
        assert_eq!(loaded.entries()[1].category(), Some("Transfers"));
    }

    #[test]
    fn malformed_second_line_cites_line_two() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.jsonl");
        fs::write(
            &path,
            "{\"opening_balance\":\"100.00\",\"closing_balance\":null}\nnot json at all\n",
        )
        .unwrap();

        match read_set(&path).unwrap_err() {
            StoreError::MalformedRecord { line, .. } => assert_eq!(line, 2),
            other => panic!("expected MalformedRecord, got {other:?}"),
        }
    }

    #[test]
    fn missing_required_record_keys_are_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.jsonl");
        fs::write(
            &path,
            "{\"opening_balance\":null,\"closing_balance\":null}\n{\"value\":\"1.00\"}\n",
        )
        .unwrap();

        match read_set(&path).unwrap_err() {
            StoreError::MalformedRecord { line, reason, .. } => {
                assert_eq!(line, 2);
                assert!(reason.contains("date"), "reason was: {reason}");
            }
            other => panic!("expected MalformedRecord, got {other:?}"),
        }
    }

    #[test]
    fn non_string_open_field_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.jsonl");
        fs::write(
            &path,
            "{\"opening_balance\":null,\"closing_balance\":null}\n\
             {\"date\":\"2020-01-01\",\"value\":\"1.00\",\"flags\":[1,2]}\n",
        )
        .unwrap();

        match read_set(&path).unwrap_err() {
            StoreError::MalformedRecord { line, reason, .. } => {
                assert_eq!(line, 2);
                assert!(reason.contains("flags"), "reason was: {reason}");
            }
            other => panic!("expected MalformedRecord, got {other:?}"),
        }
    }

    #[test]
    fn header_without_balance_keys_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.jsonl");
        fs::write(&path, "{\"date\":\"2020-01-01\",\"value\":\"1.00\"}\n").unwrap();

        match read_set(&path).unwrap_err() {
            StoreError::MalformedRecord { line, reason, .. } => {
                assert_eq!(line, 1);
                assert!(reason.contains("opening_balance"), "reason was: {reason}");
            }
            other => panic!("expected MalformedRecord, got {other:?}"),
        }
    }

    #[test]
    fn stored_balance_mismatch_fails_the_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.jsonl");
        fs::write(
            &path,
            "{\"opening_balance\":\"100.00\",\"closing_balance\":\"85.00\"}\n\
             {\"date\":\"2020-01-01\",\"value\":\"-20.00\",\"balance_after\":\"79.00\"}\n\
             {\"date\":\"2020-01-05\",\"value\":\"5.00\"}\n",
        )
        .unwrap();

        assert!(matches!(
            read_set(&path).unwrap_err(),
            StoreError::BalanceMismatch { .. }
        ));
    }

    #[test]
    fn closing_balance_mismatch_fails_the_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.jsonl");
        fs::write(
            &path,
            "{\"opening_balance\":\"100.00\",\"closing_balance\":\"90.00\"}\n\
             {\"date\":\"2020-01-01\",\"value\":\"-20.00\"}\n\
             {\"date\":\"2020-01-05\",\"value\":\"5.00\"}\n",
        )
        .unwrap();

        assert!(matches!(
            read_set(&path).unwrap_err(),
            StoreError::BalanceMismatch { .. }
        ));
    }

    #[test]
    fn concrete_scenario_balances() {
        // Opening 100.00, entries -20.00 and +5.00: balances 80.00 and
        // 85.00, closing 85.00.
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.jsonl");
        fs::write(
            &path,
            "{\"opening_balance\":\"100.00\",\"closing_balance\":\"85.00\"}\n\
             {\"date\":\"2020-01-01\",\"value\":\"-20.00\"}\n\
             {\"date\":\"2020-01-05\",\"value\":\"+5.00\"}\n",
        )
        .unwrap();

        let set = read_set(&path).unwrap();
        assert_eq!(set.entries()[0].balance_after, Some(Money::from_cents(8000)));
        assert_eq!(set.entries()[1].balance_after, Some(Money::from_cents(8500)));
        assert_eq!(set.closing_balance, Some(Money::from_cents(8500)));
    }

    #[test]
    fn numeric_balances_are_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.jsonl");
        fs::write(
            &path,
            "{\"opening_balance\":100.00,\"closing_balance\":80}\n\
             {\"date\":\"2020-01-01\",\"value\":-20}\n",
        )
        .unwrap();

        let set = read_set(&path).unwrap();
        assert_eq!(set.opening_balance, Some(Money::from_cents(10000)));
        assert_eq!(set.closing_balance, Some(Money::from_cents(8000)));
    }

    #[test]
    fn null_anchors_skip_balance_validation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.jsonl");
        fs::write(
            &path,
            "{\"opening_balance\":null,\"closing_balance\":null}\n\
             {\"date\":\"2020-01-01\",\"value\":\"-20.00\"}\n",
        )
        .unwrap();

        let set = read_set(&path).unwrap();
        assert_eq!(set.opening_balance, None);
        assert_eq!(set.entries()[0].balance_after, None);
    }

    #[test]
    fn blank_line_inside_stream_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.jsonl");
        fs::write(
            &path,
            "{\"opening_balance\":null,\"closing_balance\":null}\n\
             \n\
             {\"date\":\"2020-01-01\",\"value\":\"1.00\"}\n",
        )
        .unwrap();

        match read_set(&path).unwrap_err() {
            StoreError::MalformedRecord { line, .. } => assert_eq!(line, 2),
            other => panic!("expected MalformedRecord, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_reports_the_path() {
        let err = read_set(Path::new("/no/such/file.jsonl")).unwrap_err();
        match err {
            StoreError::Io { path, .. } => assert_eq!(path, Path::new("/no/such/file.jsonl")),
            other => panic!("expected Io, got {other:?}"),
        }
    }

    #[test]
    fn save_leaves_no_temp_file_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.jsonl");
        write_set(&path, &sample_set("t.jsonl")).unwrap();

        assert!(path.exists());
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn failed_save_keeps_the_original_intact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.jsonl");
        let set = sample_set("t.jsonl");
        write_set(&path, &set).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        // Writing into a directory that no longer exists must fail
        // without touching the original.
        let gone = dir.path().join("missing").join("t.jsonl");
        assert!(write_set(&gone, &set).is_err());

        assert_eq!(fs::read_to_string(&path).unwrap(), before);
        assert!(!tmp_path(&gone).exists());
    }

    #[test]
    fn out_of_order_entries_are_date_sorted_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.jsonl");
        fs::write(
            &path,
            "{\"opening_balance\":null,\"closing_balance\":null}\n\
             {\"date\":\"2020-01-05\",\"value\":\"5.00\"}\n\
             {\"date\":\"2020-01-01\",\"value\":\"-20.00\"}\n",
        )
        .unwrap();

        let set = read_set(&path).unwrap();
        assert_eq!(set.entries()[0].date, date(2020, 1, 1));
        assert_eq!(set.entries()[1].date, date(2020, 1, 5));
    }
}
