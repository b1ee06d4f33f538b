pub mod error;
pub mod query;
pub mod types;
pub mod value;

pub use error::{DbError, ErrorKind, Result};
pub use query::{QueryDescriptor, TableDescriptor};
pub use types::{Column, Row, RowBatch, Rows, Schema};
pub use value::{DataType, Value};
