//! Connection handle and the per-connection actor.
//!
//! A `Connection` is a cheap clonable handle to an actor task that owns the
//! protocol engine. The actor serializes all work: requests arrive over an
//! mpsc channel and replies travel back over oneshot channels, so completion
//! order on one connection equals engine completion order.

use std::collections::VecDeque;

use tokio::sync::{mpsc, oneshot, watch};

use crate::engine::{self, EngineState, ProtocolEngine};
use crate::error::{Error, Result};
use crate::opts::ConnectOpts;
use crate::params::BindFrame;
use crate::protocol::types::Oid;
use crate::query::Query;
use crate::result::QueryResult;
use crate::transaction::Transaction;

/// Connection lifecycle events, delivered from the actor task with a
/// re-attached [`Connection`] handle.
pub trait EventHandler: Send + Sync + 'static {
    /// The connection finished startup and accepts requests.
    fn on_ready(&self, conn: Connection) {
        let _ = conn;
    }

    /// The connection was terminated; pending requests have failed.
    fn on_terminated(&self, conn: Connection) {
        let _ = conn;
    }

    /// An operation failed with a server or protocol error.
    fn on_error(&self, conn: Connection, error: &Error) {
        let _ = (conn, error);
    }
}

/// The no-op handler.
impl EventHandler for () {}

pub(crate) enum TxControl {
    Begin,
    Commit,
    Rollback,
}

pub(crate) enum Request {
    Lock {
        reply: oneshot::Sender<Result<u64>>,
    },
    Unlock {
        lease: u64,
    },
    Query {
        sql: String,
        lease: u64,
        reply: oneshot::Sender<Result<QueryResult>>,
    },
    Prepared {
        sql: String,
        param_types: Vec<Oid>,
        frame: BindFrame,
        lease: u64,
        reply: oneshot::Sender<Result<QueryResult>>,
    },
    Control {
        op: TxControl,
        lease: u64,
        reply: oneshot::Sender<Result<()>>,
    },
    Terminate {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// An async PostgreSQL connection.
///
/// All methods may be called concurrently from any task; the underlying
/// engine runs one request at a time. Exclusive multi-statement access goes
/// through [`lock`](Connection::lock).
#[derive(Clone)]
pub struct Connection {
    tx: mpsc::UnboundedSender<Request>,
    state: watch::Receiver<EngineState>,
}

impl Connection {
    /// Connect with lifecycle events.
    ///
    /// The schema is validated before any I/O: anything other than `"tcp"`
    /// or `"socket"` fails with [`Error::Config`] and no engine is created.
    pub async fn create(opts: &ConnectOpts, handler: impl EventHandler) -> Result<Self> {
        opts.validate_schema()?;
        let engine = engine::connect(opts).await?;
        Ok(Self::with_engine(engine, handler))
    }

    /// Connect without lifecycle events.
    pub async fn connect(opts: &ConnectOpts) -> Result<Self> {
        Self::create(opts, ()).await
    }

    /// Wire a connection over a caller-supplied engine.
    ///
    /// This is the seam for custom transports, instrumentation wrappers,
    /// and scripted engines in tests.
    pub fn with_engine(engine: Box<dyn ProtocolEngine>, handler: impl EventHandler) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(engine.state());
        let conn = Self {
            tx: tx.clone(),
            state: state_rx.clone(),
        };

        let actor = Actor {
            engine,
            rx,
            weak_tx: tx.downgrade(),
            state_tx,
            state_rx,
            handler,
            current_lease: None,
            next_lease: 0,
            waiters: VecDeque::new(),
        };
        tokio::spawn(actor.run());

        conn
    }

    /// The engine's last reported lifecycle state.
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Acquire the exclusive lease.
    ///
    /// If another lease is outstanding the request queues FIFO and resolves
    /// when the current holder releases.
    pub async fn lock(&self) -> Result<Transaction> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Lock { reply })?;
        let lease = rx.await.map_err(|_| Error::Terminated)??;
        Ok(Transaction::new(self.clone(), lease))
    }

    /// Run one query under a fresh implicit lease.
    pub async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        let tx = self.lock().await?;
        let result = tx.execute_query(sql).await;
        tx.finish();
        result
    }

    /// Run a bound [`Query`] under a fresh implicit lease, honoring its
    /// transaction flags.
    pub async fn execute(&self, query: &Query) -> Result<QueryResult> {
        let tx = self.lock().await?;
        let result = tx.execute(query).await;
        tx.finish();
        result
    }

    /// Terminate the connection unconditionally.
    ///
    /// Queued lease requests and every subsequent request fail with
    /// [`Error::Terminated`].
    pub async fn terminate(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Terminate { reply })?;
        rx.await.map_err(|_| Error::Terminated)?
    }

    pub(crate) fn send(&self, request: Request) -> Result<()> {
        self.tx.send(request).map_err(|_| Error::Terminated)
    }

    pub(crate) async fn leased_query(&self, lease: u64, sql: &str) -> Result<QueryResult> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Query {
            sql: sql.to_owned(),
            lease,
            reply,
        })?;
        rx.await.map_err(|_| Error::Terminated)?
    }

    pub(crate) async fn leased_prepared(
        &self,
        lease: u64,
        sql: &str,
        param_types: &[Oid],
        frame: &BindFrame,
    ) -> Result<QueryResult> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Prepared {
            sql: sql.to_owned(),
            param_types: param_types.to_vec(),
            frame: frame.clone(),
            lease,
            reply,
        })?;
        rx.await.map_err(|_| Error::Terminated)?
    }

    pub(crate) async fn leased_control(&self, op: TxControl, lease: u64) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Control { op, lease, reply })?;
        rx.await.map_err(|_| Error::Terminated)?
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .finish()
    }
}

struct Actor<H> {
    engine: Box<dyn ProtocolEngine>,
    rx: mpsc::UnboundedReceiver<Request>,
    /// Weak handle so the actor can re-attach a `Connection` in event
    /// callbacks without keeping itself alive.
    weak_tx: mpsc::WeakUnboundedSender<Request>,
    state_tx: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,
    handler: H,
    current_lease: Option<u64>,
    next_lease: u64,
    waiters: VecDeque<oneshot::Sender<Result<u64>>>,
}

impl<H: EventHandler> Actor<H> {
    async fn run(mut self) {
        if let Some(conn) = self.reattach() {
            self.handler.on_ready(conn);
        }

        while let Some(request) = self.rx.recv().await {
            match request {
                Request::Lock { reply } => {
                    if self.current_lease.is_some() {
                        self.waiters.push_back(reply);
                    } else {
                        self.waiters.push_front(reply);
                        self.grant_next();
                    }
                }
                Request::Unlock { lease } => {
                    if self.current_lease == Some(lease) {
                        self.current_lease = None;
                        self.engine.unlock();
                        tracing::trace!(lease, "lease released");
                        self.grant_next();
                    }
                }
                Request::Query { sql, lease, reply } => {
                    let result = match self.check_lease(lease) {
                        Ok(()) => self.engine.execute_query(&sql).await,
                        Err(error) => Err(error),
                    };
                    self.publish_state();
                    self.report(&result);
                    let _ = reply.send(result);
                }
                Request::Prepared {
                    sql,
                    param_types,
                    frame,
                    lease,
                    reply,
                } => {
                    let result = match self.check_lease(lease) {
                        Ok(()) => self.engine.execute_prepared(&sql, &param_types, &frame).await,
                        Err(error) => Err(error),
                    };
                    self.publish_state();
                    self.report(&result);
                    let _ = reply.send(result);
                }
                Request::Control { op, lease, reply } => {
                    let result = match self.check_lease(lease) {
                        Ok(()) => match op {
                            TxControl::Begin => self.engine.begin_transaction().await,
                            TxControl::Commit => self.engine.commit_transaction().await,
                            TxControl::Rollback => self.engine.rollback_transaction().await,
                        },
                        Err(error) => Err(error),
                    };
                    self.publish_state();
                    self.report(&result);
                    let _ = reply.send(result);
                }
                Request::Terminate { reply } => {
                    let result = self.engine.terminate().await;
                    self.current_lease = None;
                    for waiter in self.waiters.drain(..) {
                        let _ = waiter.send(Err(Error::Terminated));
                    }
                    let _ = self.state_tx.send_replace(EngineState::Terminated);
                    let _ = reply.send(result);
                    if let Some(conn) = self.reattach() {
                        self.handler.on_terminated(conn);
                    }
                    // Requests still queued (and all future sends) fail with
                    // Error::Terminated once the receiver drops.
                    break;
                }
            }
        }
    }

    fn reattach(&self) -> Option<Connection> {
        self.weak_tx.upgrade().map(|tx| Connection {
            tx,
            state: self.state_rx.clone(),
        })
    }

    fn check_lease(&self, lease: u64) -> Result<()> {
        if self.current_lease == Some(lease) {
            Ok(())
        } else {
            Err(Error::InvalidUsage("stale transaction lease".into()))
        }
    }

    /// Grant the lease to the first waiter that is still listening.
    fn grant_next(&mut self) {
        while let Some(waiter) = self.waiters.pop_front() {
            match self.engine.lock() {
                Ok(()) => {
                    let lease = self.next_lease;
                    self.next_lease += 1;
                    if waiter.send(Ok(lease)).is_ok() {
                        self.current_lease = Some(lease);
                        tracing::trace!(lease, "lease granted");
                        return;
                    }
                    // Receiver gone before the grant arrived.
                    self.engine.unlock();
                }
                Err(error) => {
                    let _ = waiter.send(Err(error));
                    return;
                }
            }
        }
    }

    fn publish_state(&self) {
        let _ = self.state_tx.send_replace(self.engine.state());
    }

    fn report<T>(&self, result: &Result<T>) {
        if let Err(error) = result
            && let Some(conn) = self.reattach()
        {
            self.handler.on_error(conn, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::engine::BoxFuture;

    /// Records every engine call; all operations succeed with empty results.
    struct ScriptedEngine {
        log: Arc<Mutex<Vec<String>>>,
        locked: bool,
    }

    impl ScriptedEngine {
        fn new(log: Arc<Mutex<Vec<String>>>) -> Self {
            Self { log, locked: false }
        }

        fn push(&self, entry: impl Into<String>) {
            self.log.lock().unwrap().push(entry.into());
        }
    }

    impl ProtocolEngine for ScriptedEngine {
        fn state(&self) -> EngineState {
            EngineState::Ready
        }

        fn execute_query<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<QueryResult>> {
            self.push(format!("query:{sql}"));
            Box::pin(async { Ok(QueryResult::default()) })
        }

        fn execute_prepared<'a>(
            &'a mut self,
            sql: &'a str,
            _param_types: &'a [Oid],
            frame: &'a BindFrame,
        ) -> BoxFuture<'a, Result<QueryResult>> {
            self.push(format!("prepared:{sql}:{}", frame.param_count()));
            Box::pin(async { Ok(QueryResult::default()) })
        }

        fn begin_transaction(&mut self) -> BoxFuture<'_, Result<()>> {
            self.push("begin");
            Box::pin(async { Ok(()) })
        }

        fn commit_transaction(&mut self) -> BoxFuture<'_, Result<()>> {
            self.push("commit");
            Box::pin(async { Ok(()) })
        }

        fn rollback_transaction(&mut self) -> BoxFuture<'_, Result<()>> {
            self.push("rollback");
            Box::pin(async { Ok(()) })
        }

        fn terminate(&mut self) -> BoxFuture<'_, Result<()>> {
            self.push("terminate");
            Box::pin(async { Ok(()) })
        }

        fn lock(&mut self) -> Result<()> {
            assert!(!self.locked, "engine double-locked");
            self.locked = true;
            self.push("lock");
            Ok(())
        }

        fn unlock(&mut self) {
            self.locked = false;
            self.push("unlock");
        }
    }

    fn scripted() -> (Connection, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let conn = Connection::with_engine(Box::new(ScriptedEngine::new(log.clone())), ());
        (conn, log)
    }

    #[tokio::test]
    async fn second_lock_queues_until_release() {
        let (conn, _log) = scripted();

        let first = conn.lock().await.unwrap();
        let second_conn = conn.clone();
        let waiter = tokio::spawn(async move { second_conn.lock().await });

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(first);
        let second = waiter.await.unwrap().unwrap();
        second.finish();
    }

    #[tokio::test]
    async fn transaction_ops_run_in_order_with_one_unlock() {
        let (conn, log) = scripted();

        let tx = conn.lock().await.unwrap();
        tx.begin().await.unwrap();
        tx.execute_query("SELECT 1").await.unwrap();
        tx.commit().await.unwrap();
        tx.finish();

        // A follow-up lock completes only after the unlock was processed.
        conn.lock().await.unwrap().finish();

        let log = log.lock().unwrap();
        assert_eq!(
            &log[..6],
            ["lock", "begin", "query:SELECT 1", "commit", "unlock", "lock"]
        );
    }

    #[tokio::test]
    async fn terminate_fails_queued_waiters_and_later_requests() {
        let (conn, log) = scripted();

        let held = conn.lock().await.unwrap();
        let second_conn = conn.clone();
        let waiter = tokio::spawn(async move { second_conn.lock().await });
        tokio::task::yield_now().await;

        conn.terminate().await.unwrap();

        assert!(matches!(waiter.await.unwrap(), Err(Error::Terminated)));
        assert!(matches!(
            conn.execute_query("SELECT 1").await,
            Err(Error::Terminated)
        ));
        assert_eq!(conn.state(), EngineState::Terminated);
        assert!(log.lock().unwrap().contains(&"terminate".to_string()));

        drop(held);
    }

    #[tokio::test]
    async fn stale_lease_is_rejected() {
        let (conn, _log) = scripted();

        let tx = conn.lock().await.unwrap();
        // A request under a lease id that was never granted.
        let result = conn.leased_query(999, "SELECT 1").await;
        assert!(matches!(result, Err(Error::InvalidUsage(_))));
        tx.finish();
    }

    #[tokio::test]
    async fn implicit_lease_wraps_single_query() {
        let (conn, log) = scripted();

        conn.execute_query("SELECT 2").await.unwrap();
        conn.lock().await.unwrap().finish();

        let log = log.lock().unwrap();
        assert_eq!(&log[..4], ["lock", "query:SELECT 2", "unlock", "lock"]);
    }

    #[tokio::test]
    async fn autocommit_query_brackets_with_begin_commit() {
        let (conn, log) = scripted();

        let mut query = Query::with_transaction("INSERT INTO t VALUES ($1)", true);
        query.bind((1_i32,));
        conn.execute(&query).await.unwrap();
        conn.lock().await.unwrap().finish();

        let log = log.lock().unwrap();
        assert_eq!(
            &log[..5],
            [
                "lock",
                "begin",
                "prepared:INSERT INTO t VALUES ($1):1",
                "commit",
                "unlock"
            ]
        );
    }

    #[tokio::test]
    async fn bad_schema_fails_before_any_engine() {
        let opts = ConnectOpts {
            schema: "ftp".into(),
            ..ConnectOpts::default()
        };
        let err = Connection::connect(&opts).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn ready_and_terminated_events_fire() {
        struct Events {
            ready: AtomicBool,
            terminated: AtomicBool,
        }

        impl EventHandler for Arc<Events> {
            fn on_ready(&self, _conn: Connection) {
                self.ready.store(true, Ordering::SeqCst);
            }

            fn on_terminated(&self, _conn: Connection) {
                self.terminated.store(true, Ordering::SeqCst);
            }
        }

        let events = Arc::new(Events {
            ready: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
        });
        let log = Arc::new(Mutex::new(Vec::new()));
        let conn = Connection::with_engine(
            Box::new(ScriptedEngine::new(log)),
            Arc::clone(&events),
        );

        conn.terminate().await.unwrap();
        assert!(events.ready.load(Ordering::SeqCst));
        assert!(events.terminated.load(Ordering::SeqCst));
    }
}
