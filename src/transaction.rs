//! Exclusive connection leases.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::connection::{Connection, Request, TxControl};
use crate::error::Result;
use crate::query::Query;
use crate::result::QueryResult;

/// An exclusive lease on a connection.
///
/// While a `Transaction` is alive no other task's requests reach the engine;
/// lock requests from elsewhere queue FIFO behind it. Dropping (or calling
/// [`finish`](Transaction::finish)) releases the lease exactly once, handing
/// it to the next waiter.
///
/// Despite the name, holding a lease does not by itself open a transaction
/// block; call [`begin`](Transaction::begin) (or run a
/// [`Query::with_transaction`]) for that.
pub struct Transaction {
    conn: Connection,
    lease: u64,
    released: AtomicBool,
}

impl Transaction {
    pub(crate) fn new(conn: Connection, lease: u64) -> Self {
        Self {
            conn,
            lease,
            released: AtomicBool::new(false),
        }
    }

    /// Open a transaction block (`BEGIN`).
    pub async fn begin(&self) -> Result<()> {
        self.conn.leased_control(TxControl::Begin, self.lease).await
    }

    /// Commit the open transaction block.
    pub async fn commit(&self) -> Result<()> {
        self.conn
            .leased_control(TxControl::Commit, self.lease)
            .await
    }

    /// Roll back the open transaction block.
    pub async fn rollback(&self) -> Result<()> {
        self.conn
            .leased_control(TxControl::Rollback, self.lease)
            .await
    }

    /// Run a query under this lease via the simple protocol.
    pub async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        self.conn.leased_query(self.lease, sql).await
    }

    /// Run a bound [`Query`] under this lease, honoring its transaction
    /// flags: BEGIN first when it starts a transaction, COMMIT after success
    /// (ROLLBACK after failure) when it is autocommit.
    pub async fn execute(&self, query: &Query) -> Result<QueryResult> {
        if query.starts_transaction() {
            self.begin().await?;
        }

        let result = self
            .conn
            .leased_prepared(self.lease, query.sql(), query.types(), query.frame())
            .await;

        if query.starts_transaction() && query.is_autocommit() {
            match &result {
                Ok(_) => self.commit().await?,
                Err(_) => {
                    // Best effort; the original error is the one to surface.
                    let _ = self.rollback().await;
                }
            }
        }

        result
    }

    /// The connection this lease belongs to.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Release the lease. Equivalent to dropping, but reads better at call
    /// sites.
    pub fn finish(self) {}

    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            let _ = self.conn.send(Request::Unlock { lease: self.lease });
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.release();
    }
}
