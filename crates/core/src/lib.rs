pub mod category;
pub mod money;
pub mod period;
pub mod selection;
pub mod transaction;

pub use category::{Catalog, CatalogError};
pub use money::Money;
pub use period::DateRange;
pub use selection::{Selection, SelectionError};
pub use transaction::{BalanceError, Transaction, TransactionSet};
