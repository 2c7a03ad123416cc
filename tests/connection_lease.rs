//! Connection serialization over a scripted engine.

use std::sync::{Arc, Mutex};

use postgres_async::engine::BoxFuture;
use postgres_async::{
    BindFrame, Connection, EngineState, Error, Oid, ProtocolEngine, Query, QueryResult,
};

/// Engine that records calls and succeeds with empty results.
struct RecordingEngine {
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingEngine {
    fn push(&self, entry: impl Into<String>) {
        self.log.lock().unwrap().push(entry.into());
    }
}

impl ProtocolEngine for RecordingEngine {
    fn state(&self) -> EngineState {
        EngineState::Ready
    }

    fn execute_query<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<QueryResult, Error>> {
        self.push(format!("query:{sql}"));
        Box::pin(async { Ok(QueryResult::default()) })
    }

    fn execute_prepared<'a>(
        &'a mut self,
        sql: &'a str,
        _param_types: &'a [Oid],
        _frame: &'a BindFrame,
    ) -> BoxFuture<'a, Result<QueryResult, Error>> {
        self.push(format!("prepared:{sql}"));
        Box::pin(async { Ok(QueryResult::default()) })
    }

    fn begin_transaction(&mut self) -> BoxFuture<'_, Result<(), Error>> {
        self.push("begin");
        Box::pin(async { Ok(()) })
    }

    fn commit_transaction(&mut self) -> BoxFuture<'_, Result<(), Error>> {
        self.push("commit");
        Box::pin(async { Ok(()) })
    }

    fn rollback_transaction(&mut self) -> BoxFuture<'_, Result<(), Error>> {
        self.push("rollback");
        Box::pin(async { Ok(()) })
    }

    fn terminate(&mut self) -> BoxFuture<'_, Result<(), Error>> {
        self.push("terminate");
        Box::pin(async { Ok(()) })
    }

    fn lock(&mut self) -> Result<(), Error> {
        self.push("lock");
        Ok(())
    }

    fn unlock(&mut self) {
        self.push("unlock");
    }
}

fn recording() -> (Connection, Arc<Mutex<Vec<String>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let conn = Connection::with_engine(Box::new(RecordingEngine { log: log.clone() }), ());
    (conn, log)
}

#[tokio::test]
async fn concurrent_locks_are_granted_in_request_order() {
    let (conn, _log) = recording();
    let order = Arc::new(Mutex::new(Vec::new()));

    let held = conn.lock().await.unwrap();

    let mut tasks = Vec::new();
    for name in ["first", "second", "third"] {
        let conn = conn.clone();
        let order = Arc::clone(&order);
        tasks.push(tokio::spawn(async move {
            let lease = conn.lock().await.unwrap();
            order.lock().unwrap().push(name);
            lease.finish();
        }));
        // Let the task register its lock request before spawning the next.
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    held.finish();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(*order.lock().unwrap(), ["first", "second", "third"]);
}

#[tokio::test]
async fn dropping_a_lease_releases_it() {
    let (conn, log) = recording();

    {
        let _lease = conn.lock().await.unwrap();
    }
    // The next lock only resolves once the drop's unlock was processed.
    conn.lock().await.unwrap().finish();

    let log = log.lock().unwrap();
    assert_eq!(&log[..3], ["lock", "unlock", "lock"]);
}

#[tokio::test]
async fn explicit_transaction_stays_open_until_commit() {
    let (conn, log) = recording();

    let tx = conn.lock().await.unwrap();
    let mut query = Query::with_transaction("UPDATE t SET n = $1", false);
    query.bind((9_i16,));
    tx.execute(&query).await.unwrap();
    // Not autocommit: the block is still open for more statements.
    tx.execute_query("SELECT 1").await.unwrap();
    tx.commit().await.unwrap();
    tx.finish();

    conn.lock().await.unwrap().finish();

    let log = log.lock().unwrap();
    assert_eq!(
        &log[..6],
        [
            "lock",
            "begin",
            "prepared:UPDATE t SET n = $1",
            "query:SELECT 1",
            "commit",
            "unlock"
        ]
    );
}

#[tokio::test]
async fn terminated_connection_rejects_everything() {
    let (conn, _log) = recording();

    conn.terminate().await.unwrap();

    assert_eq!(conn.state(), EngineState::Terminated);
    assert!(matches!(conn.lock().await, Err(Error::Terminated)));
    assert!(matches!(
        conn.execute_query("SELECT 1").await,
        Err(Error::Terminated)
    ));
}
