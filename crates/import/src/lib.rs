pub mod csv;

pub use csv::{import_csv, ColumnMapping, CsvImportError, FieldColumn, ImportProfile};
