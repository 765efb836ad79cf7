//! The category catalog: a tree of category names loaded from a JSON
//! side file, consulted read-only by the store and the selection engine.
//!
//! File shape: nested objects declare children, leaf arrays hold
//! auto-assignment rules. Each rule is a selection expression compiled
//! at load time:
//!
//! ```json
//! {
//!     "Food": {
//!         "Restaurants": ["text~pizza or text~restaurant"],
//!         "Groceries": ["text~supermarket"]
//!     },
//!     "Transfers": []
//! }
//! ```

use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

use super::selection::{Selection, SelectionError};
use super::transaction::Transaction;

/// Separator between parent and child in a category path,
/// e.g. `Food/Restaurants`.
pub const SEPARATOR: char = '/';

#[derive(Debug, Clone)]
struct Node {
    path: String,
    rules: Vec<Selection>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("invalid catalog JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("catalog entry '{path}': {reason}")]
    Shape { path: String, reason: String },
    #[error("category '{category}', rule '{rule}': {source}")]
    Rule {
        category: String,
        rule: String,
        #[source]
        source: SelectionError,
    },
}

/// Hierarchical classification reference. Paths are stored in
/// declaration order, parents before their children.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
}

impl Catalog {
    pub fn from_json_str(data: &str) -> Result<Self, CatalogError> {
        let root: Value = serde_json::from_str(data)?;
        let Value::Object(tree) = root else {
            return Err(CatalogError::Shape {
                path: String::new(),
                reason: "top level must be an object".into(),
            });
        };

        let mut catalog = Catalog::default();
        catalog.add_tree(&tree, "")?;
        Ok(catalog)
    }

    fn add_tree(&mut self, tree: &Map<String, Value>, prefix: &str) -> Result<(), CatalogError> {
        for (name, value) in tree {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}{SEPARATOR}{name}")
            };

            if name.is_empty() || name.contains(SEPARATOR) {
                return Err(CatalogError::Shape {
                    path,
                    reason: format!("category names must be non-empty and free of '{SEPARATOR}'"),
                });
            }

            match value {
                Value::Object(children) => {
                    self.add_node(path.clone(), &[])?;
                    self.add_tree(children, &path)?;
                }
                Value::Array(raw_rules) => {
                    let mut rules = Vec::with_capacity(raw_rules.len());
                    for raw in raw_rules {
                        let Some(rule) = raw.as_str() else {
                            return Err(CatalogError::Shape {
                                path,
                                reason: "rules must be strings".into(),
                            });
                        };
                        rules.push(rule.to_owned());
                    }
                    self.add_node(path, &rules)?;
                }
                _ => {
                    return Err(CatalogError::Shape {
                        path,
                        reason: "value must be an object (children) or an array (rules)".into(),
                    })
                }
            }
        }
        Ok(())
    }

    fn add_node(&mut self, path: String, rules: &[String]) -> Result<(), CatalogError> {
        let compiled = rules
            .iter()
            .map(|rule| {
                Selection::compile(rule).map_err(|source| CatalogError::Rule {
                    category: path.clone(),
                    rule: rule.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.index.insert(path.clone(), self.nodes.len());
        self.nodes.push(Node { path, rules: compiled });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// True if `name` is a strict descendant of `ancestor`; both must be
    /// declared. A node is not its own descendant.
    pub fn is_descendant(&self, name: &str, ancestor: &str) -> bool {
        self.exists(name)
            && self.exists(ancestor)
            && name.len() > ancestor.len()
            && name.starts_with(ancestor)
            && name.as_bytes()[ancestor.len()] == SEPARATOR as u8
    }

    /// All category paths in declaration order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.path.as_str())
    }

    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.paths().filter(|p| !p.contains(SEPARATOR))
    }

    /// Case-insensitive substring search over paths.
    pub fn search(&self, hint: &str) -> Vec<&str> {
        let hint = hint.to_lowercase();
        self.paths()
            .filter(|p| p.to_lowercase().contains(&hint))
            .collect()
    }

    /// Categories whose rules match the transaction, in declaration
    /// order. Empty when no rule fires; more than one entry means the
    /// assignment is ambiguous and left to the user.
    pub fn candidates(&self, trn: &Transaction) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.rules.iter().any(|rule| rule.matches(trn, self)))
            .map(|n| n.path.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;
    use chrono::NaiveDate;

    fn catalog() -> Catalog {
        Catalog::from_json_str(
            r#"{
                "Food": {
                    "Restaurants": ["text~pizza", "text~restaurant"],
                    "Groceries": ["text~supermarket"]
                },
                "Housing": ["text~rent and value<0"],
                "Transfers": []
            }"#,
        )
        .unwrap()
    }

    fn trn(details: &str, cents: i64) -> Transaction {
        let mut t = Transaction::new(
            NaiveDate::from_ymd_opt(2020, 1, 15).unwrap(),
            Money::from_cents(cents),
        );
        t.insert_field("details", details);
        t
    }

    #[test]
    fn paths_are_flattened_in_declaration_order() {
        let cats: Vec<_> = catalog().paths().map(str::to_owned).collect();
        assert_eq!(
            cats,
            ["Food", "Food/Restaurants", "Food/Groceries", "Housing", "Transfers"]
        );
    }

    #[test]
    fn exists_and_roots() {
        let c = catalog();
        assert!(c.exists("Food"));
        assert!(c.exists("Food/Restaurants"));
        assert!(!c.exists("Restaurants"));
        assert_eq!(c.roots().collect::<Vec<_>>(), ["Food", "Housing", "Transfers"]);
    }

    #[test]
    fn descendants_are_strict_and_declared() {
        let c = catalog();
        assert!(c.is_descendant("Food/Restaurants", "Food"));
        assert!(!c.is_descendant("Food", "Food"));
        assert!(!c.is_descendant("Food/Restaurants", "Housing"));
        // Prefix alone is not enough: both paths must be declared.
        assert!(!c.is_descendant("Food/Bars", "Food"));
    }

    #[test]
    fn search_is_case_insensitive() {
        let c = catalog();
        assert_eq!(c.search("rest"), ["Food/Restaurants"]);
        assert_eq!(c.search("FOOD"), ["Food", "Food/Restaurants", "Food/Groceries"]);
        assert!(c.search("xyz").is_empty());
    }

    #[test]
    fn candidates_collect_all_matching_rules() {
        let c = catalog();
        assert_eq!(c.candidates(&trn("PIZZA PALACE", -1500)), ["Food/Restaurants"]);
        assert_eq!(c.candidates(&trn("Monthly rent", -80000)), ["Housing"]);
        // Rule with a value guard: positive "rent" does not match.
        assert!(c.candidates(&trn("rent deposit refund", 80000)).is_empty());
        assert!(c.candidates(&trn("nothing relevant", 100)).is_empty());
    }

    #[test]
    fn ambiguous_candidates_are_all_reported() {
        let c = Catalog::from_json_str(
            r#"{"A": ["text~market"], "B": ["text~super"]}"#,
        )
        .unwrap();
        assert_eq!(c.candidates(&trn("SUPERMARKET", -100)), ["A", "B"]);
    }

    #[test]
    fn bad_shapes_are_rejected() {
        assert!(matches!(
            Catalog::from_json_str("[]").unwrap_err(),
            CatalogError::Shape { .. }
        ));
        assert!(matches!(
            Catalog::from_json_str(r#"{"A": 3}"#).unwrap_err(),
            CatalogError::Shape { .. }
        ));
        assert!(matches!(
            Catalog::from_json_str(r#"{"A": [3]}"#).unwrap_err(),
            CatalogError::Shape { .. }
        ));
        assert!(matches!(
            Catalog::from_json_str(r#"{"A/B": []}"#).unwrap_err(),
            CatalogError::Shape { .. }
        ));
        assert!(matches!(
            Catalog::from_json_str("not json").unwrap_err(),
            CatalogError::Json(_)
        ));
    }

    #[test]
    fn uncompilable_rule_is_rejected_with_context() {
        let err = Catalog::from_json_str(r#"{"A": ["value~3"]}"#).unwrap_err();
        match err {
            CatalogError::Rule { category, rule, .. } => {
                assert_eq!(category, "A");
                assert_eq!(rule, "value~3");
            }
            other => panic!("expected rule error, got {other:?}"),
        }
    }

    #[test]
    fn empty_catalog_knows_nothing() {
        let c = Catalog::default();
        assert!(c.is_empty());
        assert!(!c.exists("Food"));
        assert!(c.candidates(&trn("pizza", -100)).is_empty());
    }
}
