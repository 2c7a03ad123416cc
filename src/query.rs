//! Reusable query descriptions.

use crate::params::{BindFrame, IntoParams};
use crate::protocol::types::Oid;

/// A query with its bound parameters and transaction policy.
///
/// The parameter frame is encoded eagerly by [`bind`](Query::bind); executing
/// the same `Query` twice sends identical bytes. Rebinding replaces the frame
/// wholesale.
#[derive(Debug, Clone, Default)]
pub struct Query {
    sql: String,
    start_transaction: bool,
    autocommit: bool,
    param_types: Vec<Oid>,
    frame: BindFrame,
}

impl Query {
    /// A plain query executed on the connection's current transaction state.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Self::default()
        }
    }

    /// A query that opens a transaction before running. With `autocommit`
    /// the transaction is committed right after the query succeeds (and
    /// rolled back if it fails); otherwise it is left open for the caller.
    pub fn with_transaction(sql: impl Into<String>, autocommit: bool) -> Self {
        Self {
            sql: sql.into(),
            start_transaction: true,
            autocommit,
            ..Self::default()
        }
    }

    /// Bind parameters, replacing any previous binding.
    pub fn bind(&mut self, params: impl IntoParams) -> &mut Self {
        self.frame = BindFrame::encode(&params.into_params());
        self
    }

    /// Declare explicit parameter type OIDs for the Parse message. When
    /// empty (the default) the server infers types from the query text.
    pub fn param_types(&mut self, oids: impl Into<Vec<Oid>>) -> &mut Self {
        self.param_types = oids.into();
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn starts_transaction(&self) -> bool {
        self.start_transaction
    }

    pub fn is_autocommit(&self) -> bool {
        self.autocommit
    }

    pub fn types(&self) -> &[Oid] {
        &self.param_types
    }

    pub fn frame(&self) -> &BindFrame {
        &self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebind_replaces_frame() {
        let mut q = Query::new("SELECT $1");
        q.bind((1_i32,));
        let first = q.frame().clone();
        q.bind((2_i32, 3_i32));
        assert_ne!(q.frame(), &first);
        assert_eq!(q.frame().param_count(), 2);
    }

    #[test]
    fn transaction_flags() {
        let q = Query::with_transaction("INSERT INTO t VALUES ($1)", true);
        assert!(q.starts_transaction());
        assert!(q.is_autocommit());
        assert!(!Query::new("SELECT 1").starts_transaction());
    }
}
