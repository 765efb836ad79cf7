use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::money::Money;
use super::period::DateRange;

/// Record keys with fixed meaning; open fields must not shadow them.
pub const RESERVED_FIELDS: [&str; 4] = ["date", "value", "balance_after", "category"];

/// One dated, signed monetary movement plus free-form descriptive fields.
///
/// The open `fields` map carries whatever columns the bank export had
/// (addressee, subject, remote account, ...), in source order. All values
/// are text; the persistence layer rejects anything else at the load
/// boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub date: NaiveDate,
    pub value: Money,
    /// Running balance immediately after this transaction. Derived and
    /// cached; recomputed from the set's opening balance on load.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_after: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<String>,
    #[serde(flatten)]
    fields: Map<String, Value>,
    // Volatile; true once the category changed since load or last save.
    #[serde(skip)]
    modified: bool,
}

impl Transaction {
    pub fn new(date: NaiveDate, value: Money) -> Self {
        Transaction {
            date,
            value,
            balance_after: None,
            category: None,
            fields: Map::new(),
            modified: false,
        }
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// Assigns or clears the category, marking the transaction modified
    /// only on an actual change.
    pub fn set_category(&mut self, category: Option<&str>) {
        if self.category.as_deref() != category {
            self.category = category.map(str::to_owned);
            self.modified = true;
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// The open fields in source order. Non-string values (rejected at
    /// load time) are skipped.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.as_str(), s)))
    }

    pub fn insert_field(&mut self, name: &str, value: &str) {
        debug_assert!(!RESERVED_FIELDS.contains(&name));
        self.fields.insert(name.to_owned(), Value::String(value.to_owned()));
    }

    /// Name of the first open field whose value is not a JSON string,
    /// if any. Used by the codec for shape validation.
    pub fn non_string_field(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|(_, v)| !v.is_string())
            .map(|(k, _)| k.as_str())
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn clear_modified(&mut self) {
        self.modified = false;
    }
}

/// Disagreement between recomputed running balances and stored anchors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BalanceError {
    #[error("entry {index} ({date}): stored balance {stored} disagrees with computed {computed}")]
    Entry {
        index: usize,
        date: NaiveDate,
        stored: Money,
        computed: Money,
    },
    #[error("declared closing balance {declared} disagrees with computed {computed}")]
    Closing { declared: Money, computed: Money },
}

/// The transactions from one source file plus its declared balance
/// anchors. `None` anchors mean "unknown, do not validate", the shape a
/// CSV import produces when the export carries no balance column.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionSet {
    /// Identity of the backing file, used in error messages.
    pub source: String,
    pub opening_balance: Option<Money>,
    pub closing_balance: Option<Money>,
    /// Extra header fields from line 1, preserved verbatim on rewrite.
    pub header_fields: Map<String, Value>,
    entries: Vec<Transaction>,
}

impl TransactionSet {
    pub fn new(source: impl Into<String>) -> Self {
        TransactionSet {
            source: source.into(),
            opening_balance: None,
            closing_balance: None,
            header_fields: Map::new(),
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[Transaction] {
        &self.entries
    }

    pub fn entry_mut(&mut self, index: usize) -> Option<&mut Transaction> {
        self.entries.get_mut(index)
    }

    pub fn push(&mut self, trn: Transaction) {
        self.entries.push(trn);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Orders entries by date; same-date entries keep their original
    /// relative order (stable sort).
    pub fn sort_entries(&mut self) {
        self.entries.sort_by_key(|t| t.date);
    }

    /// First to last entry date, or `None` for an empty set.
    pub fn date_range(&self) -> Option<DateRange> {
        let first = self.entries.iter().map(|t| t.date).min()?;
        let last = self.entries.iter().map(|t| t.date).max()?;
        Some(DateRange::new(first, last))
    }

    pub fn value_sum(&self) -> Money {
        self.entries
            .iter()
            .map(|t| t.value)
            .fold(Money::zero(), |a, b| a + b)
    }

    /// Recomputes every `balance_after` from the opening balance,
    /// cross-checking stored values and the declared closing balance on
    /// the way. With an unknown opening balance this is a no-op: there
    /// is no anchor to validate against.
    ///
    /// A missing closing balance is filled in with the computed total.
    pub fn recompute_balances(&mut self) -> Result<(), BalanceError> {
        let Some(opening) = self.opening_balance else {
            return Ok(());
        };

        let mut running = opening;
        for (index, trn) in self.entries.iter_mut().enumerate() {
            running += trn.value;
            if let Some(stored) = trn.balance_after {
                if stored != running {
                    return Err(BalanceError::Entry {
                        index,
                        date: trn.date,
                        stored,
                        computed: running,
                    });
                }
            }
            trn.balance_after = Some(running);
        }

        match self.closing_balance {
            Some(declared) if declared != running => {
                Err(BalanceError::Closing { declared, computed: running })
            }
            _ => {
                self.closing_balance = Some(running);
                Ok(())
            }
        }
    }

    pub fn is_modified(&self) -> bool {
        self.entries.iter().any(Transaction::is_modified)
    }

    pub fn clear_modified(&mut self) {
        for trn in &mut self.entries {
            trn.clear_modified();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn trn(y: i32, m: u32, d: u32, cents: i64) -> Transaction {
        Transaction::new(date(y, m, d), Money::from_cents(cents))
    }

    fn sample_set() -> TransactionSet {
        let mut set = TransactionSet::new("test.jsonl");
        set.opening_balance = Some(Money::from_cents(10000));
        set.push(trn(2020, 1, 1, -2000));
        set.push(trn(2020, 1, 5, 500));
        set
    }

    #[test]
    fn balances_recomputed_from_opening() {
        let mut set = sample_set();
        set.recompute_balances().unwrap();
        assert_eq!(set.entries()[0].balance_after, Some(Money::from_cents(8000)));
        assert_eq!(set.entries()[1].balance_after, Some(Money::from_cents(8500)));
        assert_eq!(set.closing_balance, Some(Money::from_cents(8500)));
    }

    #[test]
    fn prefix_sums_match_balances() {
        let mut set = sample_set();
        set.recompute_balances().unwrap();
        let opening = set.opening_balance.unwrap();
        let mut sum = Money::zero();
        for trn in set.entries() {
            sum += trn.value;
            assert_eq!(trn.balance_after, Some(opening + sum));
        }
        assert_eq!(set.closing_balance, Some(opening + sum));
    }

    #[test]
    fn stored_balance_mismatch_names_the_entry() {
        let mut set = sample_set();
        set.entry_mut(1).unwrap().balance_after = Some(Money::from_cents(9999));
        let err = set.recompute_balances().unwrap_err();
        assert_eq!(
            err,
            BalanceError::Entry {
                index: 1,
                date: date(2020, 1, 5),
                stored: Money::from_cents(9999),
                computed: Money::from_cents(8500),
            }
        );
    }

    #[test]
    fn declared_closing_mismatch_is_an_error() {
        let mut set = sample_set();
        set.closing_balance = Some(Money::from_cents(8600));
        assert!(matches!(
            set.recompute_balances(),
            Err(BalanceError::Closing { .. })
        ));
    }

    #[test]
    fn unknown_opening_skips_validation() {
        let mut set = TransactionSet::new("import.csv");
        set.push(trn(2020, 1, 1, -2000));
        set.closing_balance = Some(Money::from_cents(123));
        set.recompute_balances().unwrap();
        assert_eq!(set.entries()[0].balance_after, None);
    }

    #[test]
    fn empty_set_closing_equals_opening() {
        let mut set = TransactionSet::new("empty.jsonl");
        set.opening_balance = Some(Money::from_cents(4200));
        set.recompute_balances().unwrap();
        assert_eq!(set.closing_balance, Some(Money::from_cents(4200)));
    }

    #[test]
    fn sort_is_stable_for_same_date() {
        let mut set = TransactionSet::new("test.jsonl");
        let mut a = trn(2020, 1, 5, 100);
        a.insert_field("details", "first");
        let b = trn(2020, 1, 1, 200);
        let mut c = trn(2020, 1, 5, 300);
        c.insert_field("details", "second");
        set.push(a);
        set.push(b);
        set.push(c);
        set.sort_entries();

        assert_eq!(set.entries()[0].date, date(2020, 1, 1));
        assert_eq!(set.entries()[1].field("details"), Some("first"));
        assert_eq!(set.entries()[2].field("details"), Some("second"));
    }

    #[test]
    fn set_category_tracks_modification() {
        let mut t = trn(2020, 1, 1, 100);
        assert!(!t.is_modified());

        t.set_category(Some("Food/Restaurants"));
        assert!(t.is_modified());
        assert_eq!(t.category(), Some("Food/Restaurants"));

        t.clear_modified();
        // No-op assignment does not re-mark.
        t.set_category(Some("Food/Restaurants"));
        assert!(!t.is_modified());

        t.set_category(None);
        assert!(t.is_modified());
        assert_eq!(t.category(), None);
    }

    #[test]
    fn date_range_spans_entries() {
        let set = sample_set();
        let range = set.date_range().unwrap();
        assert_eq!(range.start, date(2020, 1, 1));
        assert_eq!(range.end, date(2020, 1, 5));
        assert!(TransactionSet::new("x").date_range().is_none());
    }

    #[test]
    fn serde_round_trips_open_fields_in_order() {
        let mut t = trn(2020, 1, 1, -2000);
        t.insert_field("details", "Rent January");
        t.insert_field("addressee", "ACME Housing");
        t.set_category(Some("Housing"));

        let json = serde_json::to_string(&t).unwrap();
        // Open fields flatten into the record, after the fixed keys.
        assert!(json.contains("\"details\":\"Rent January\""));
        assert!(json.find("details").unwrap() < json.find("addressee").unwrap());

        let mut back: Transaction = serde_json::from_str(&json).unwrap();
        back.clear_modified();
        let mut expected = t.clone();
        expected.clear_modified();
        assert_eq!(back, expected);
    }
}
