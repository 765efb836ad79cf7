pub mod error;
pub mod jsonl;
pub mod store;

pub use error::StoreError;
pub use jsonl::{read_set, write_set};
pub use store::{AutoAssignSummary, Store, TrnId};
