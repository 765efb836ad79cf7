//! The merged, multi-file ledger: one [`TransactionSet`] per backing
//! file, exposed as a single date-ordered sequence. Edits are routed
//! back to the owning set; persistence is explicit via [`Store::save_all`].

use std::path::{Path, PathBuf};

use tabula_core::{Catalog, Selection, Transaction, TransactionSet};

use crate::error::StoreError;
use crate::jsonl;

/// Stable handle to one transaction: index of its owning set (in load
/// order) plus the entry index within that set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrnId {
    pub set: usize,
    pub entry: usize,
}

struct LoadedSet {
    path: PathBuf,
    set: TransactionSet,
}

/// Counts reported by an auto-assignment sweep over the whole store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutoAssignSummary {
    /// Uncategorized transactions that got their unique candidate.
    pub assigned: usize,
    /// More than one category rule matched; left untouched.
    pub ambiguous: usize,
    /// Already categorized; never overwritten.
    pub already_categorized: usize,
    /// No rule matched.
    pub unmatched: usize,
}

#[derive(Default)]
pub struct Store {
    sets: Vec<LoadedSet>,
}

impl Store {
    pub fn new() -> Self {
        Store::default()
    }

    /// Loads every file independently, then merges. Two files claiming
    /// overlapping date ranges fail the whole construction.
    pub fn load(paths: &[PathBuf]) -> Result<Self, StoreError> {
        let mut store = Store::new();
        for path in paths {
            let set = jsonl::read_set(path)?;
            store.add_set(path.clone(), set)?;
        }
        tracing::info!(
            files = store.sets.len(),
            transactions = store.entry_count(),
            "store loaded"
        );
        Ok(store)
    }

    /// Adds one set, checking its declared date range against every set
    /// already present. This is also the entry point for feeding an
    /// in-memory CSV import straight into a store; `path` is where the
    /// set will be written back on save.
    pub fn add_set(&mut self, path: PathBuf, set: TransactionSet) -> Result<(), StoreError> {
        if let Some(range) = set.date_range() {
            for loaded in &self.sets {
                let Some(existing) = loaded.set.date_range() else {
                    continue;
                };
                if existing.overlaps(range) {
                    return Err(StoreError::OverlappingPeriods {
                        a: loaded.set.source.clone(),
                        b: set.source.clone(),
                    });
                }
            }
        }
        self.sets.push(LoadedSet { path, set });
        Ok(())
    }

    pub fn sets(&self) -> impl Iterator<Item = &TransactionSet> {
        self.sets.iter().map(|l| &l.set)
    }

    pub fn entry_count(&self) -> usize {
        self.sets.iter().map(|l| l.set.len()).sum()
    }

    /// The merged view: every transaction in date order. Sets are
    /// non-overlapping, so ordering whole sets by their first date and
    /// keeping each set's internal order yields global date order.
    /// Restartable: call again for a fresh pass.
    pub fn all(&self) -> impl Iterator<Item = (TrnId, &Transaction)> {
        let mut order: Vec<usize> = (0..self.sets.len()).collect();
        order.sort_by_key(|&i| self.sets[i].set.date_range().map(|r| r.start));

        order.into_iter().flat_map(move |set_idx| {
            self.sets[set_idx]
                .set
                .entries()
                .iter()
                .enumerate()
                .map(move |(entry_idx, trn)| (TrnId { set: set_idx, entry: entry_idx }, trn))
        })
    }

    pub fn get(&self, id: TrnId) -> Option<&Transaction> {
        self.sets.get(id.set)?.set.entries().get(id.entry)
    }

    /// Applies a compiled selection to the merged view: a pure filter,
    /// preserving `all()` order, never mutating.
    pub fn select(&self, selection: &Selection, catalog: &Catalog) -> Vec<TrnId> {
        self.all()
            .filter(|(_, trn)| selection.matches(trn, catalog))
            .map(|(id, _)| id)
            .collect()
    }

    /// Union of all open field names across the store, in first
    /// appearance order of the merged view.
    pub fn field_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for (_, trn) in self.all() {
            for (name, _) in trn.fields() {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_owned());
                }
            }
        }
        names
    }

    /// Assigns or clears one transaction's category. The category must
    /// exist in the catalog; on any error the store is left unchanged.
    pub fn set_category(
        &mut self,
        id: TrnId,
        category: Option<&str>,
        catalog: &Catalog,
    ) -> Result<(), StoreError> {
        if let Some(name) = category {
            if !catalog.exists(name) {
                return Err(StoreError::UnknownCategory(name.to_owned()));
            }
        }
        let trn = self
            .sets
            .get_mut(id.set)
            .and_then(|l| l.set.entry_mut(id.entry))
            .ok_or(StoreError::NoSuchTransaction)?;
        trn.set_category(category);
        Ok(())
    }

    /// One pass over every transaction: uncategorized entries whose
    /// catalog rules name exactly one candidate get it; everything else
    /// is counted and left alone.
    pub fn auto_assign(&mut self, catalog: &Catalog) -> AutoAssignSummary {
        let mut summary = AutoAssignSummary::default();
        for loaded in &mut self.sets {
            for idx in 0..loaded.set.len() {
                let trn = loaded.set.entry_mut(idx).expect("index in range");
                if trn.category().is_some() {
                    summary.already_categorized += 1;
                    continue;
                }
                let candidates = catalog.candidates(trn);
                match candidates.as_slice() {
                    [] => summary.unmatched += 1,
                    [single] => {
                        let name = (*single).to_owned();
                        loaded
                            .set
                            .entry_mut(idx)
                            .expect("index in range")
                            .set_category(Some(&name));
                        summary.assigned += 1;
                    }
                    _ => summary.ambiguous += 1,
                }
            }
        }
        tracing::debug!(?summary, "auto-assignment sweep finished");
        summary
    }

    pub fn is_modified(&self) -> bool {
        self.sets.iter().any(|l| l.set.is_modified())
    }

    /// Persists every modified set; untouched sets are skipped. Returns
    /// the number of files written. Modified flags clear only after the
    /// owning file was written successfully.
    pub fn save_all(&mut self) -> Result<usize, StoreError> {
        let mut written = 0;
        for loaded in &mut self.sets {
            if !loaded.set.is_modified() {
                tracing::debug!(path = %loaded.path.display(), "unchanged, skipping");
                continue;
            }
            jsonl::write_set(&loaded.path, &loaded.set)?;
            loaded.set.clear_modified();
            written += 1;
            tracing::info!(path = %loaded.path.display(), "saved");
        }
        Ok(written)
    }

    /// Write-back target of the given set, as registered at load time.
    pub fn path_of(&self, set: usize) -> Option<&Path> {
        self.sets.get(set).map(|l| l.path.as_path())
    }
}
