//! Relational row layer for the filecat catalog.
//!
//! Every statement goes through [`DbConnection`] with `?` placeholders and a
//! `&[DbValue]` parameter slice. Values are never formatted into SQL text.
//!
//! ```rust,ignore
//! use filecat_db::{DbConnection, DbValue};
//!
//! let conn = DbConnection::open(path)?;
//! let count: i64 = conn.query_scalar("SELECT COUNT(*) FROM blobs WHERE size > ?", &[1000_i64.into()])?;
//! ```

mod backend;

pub use backend::{
    AccessMode, BackendError, DbConnection, DbRow, DbTransaction, DbValue, FromDbValue,
};

/// Current time as Unix milliseconds, the storage format for every timestamp column.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
