//! Protocol engines: the seam between the connection layer and a transport.

mod session;
mod stream;

pub use session::Session;
pub use stream::Stream;

use std::future::Future;
use std::pin::Pin;

use tokio::net::{TcpStream, UnixStream};

use crate::error::{Error, Result};
use crate::opts::ConnectOpts;
use crate::params::BindFrame;
use crate::protocol::types::Oid;
use crate::result::QueryResult;

/// Boxed future used by the object-safe engine trait.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Lifecycle state an engine reports to the connection layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// Connected, no transaction open
    #[default]
    Ready,
    /// A transaction block is open
    InTransaction,
    /// The open transaction failed; queries are rejected until rollback
    TransactionFailed,
    /// The connection was terminated
    Terminated,
}

/// The driving surface of one protocol session.
///
/// The connection actor owns the engine exclusively and calls one method at
/// a time; implementations do not need interior synchronization. `lock` and
/// `unlock` are plain bookkeeping so an engine can assert the exclusivity
/// contract - the FIFO queueing of lease requests lives above, in the
/// connection actor.
pub trait ProtocolEngine: Send {
    /// Current lifecycle state.
    fn state(&self) -> EngineState;

    /// Run a query via the simple protocol.
    fn execute_query<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<QueryResult>>;

    /// Run a query via the extended protocol with a pre-encoded parameter
    /// frame.
    fn execute_prepared<'a>(
        &'a mut self,
        sql: &'a str,
        param_types: &'a [Oid],
        frame: &'a BindFrame,
    ) -> BoxFuture<'a, Result<QueryResult>>;

    /// Open a transaction block.
    fn begin_transaction(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Commit the open transaction block.
    fn commit_transaction(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Roll back the open transaction block.
    fn rollback_transaction(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Close the session. Idempotent.
    fn terminate(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Mark the engine leased. Double-lock is an engine error.
    fn lock(&mut self) -> Result<()>;

    /// Release the lease taken by [`lock`](ProtocolEngine::lock).
    fn unlock(&mut self);
}

/// Connect the transport named by `opts.schema` and run the startup
/// handshake.
pub async fn connect(opts: &ConnectOpts) -> Result<Box<dyn ProtocolEngine>> {
    opts.validate_schema()?;
    let stream = match opts.schema.as_str() {
        "tcp" => {
            let tcp = TcpStream::connect((opts.host.as_str(), opts.port)).await?;
            tcp.set_nodelay(true)?;
            Stream::tcp(tcp)
        }
        "socket" => {
            let path = opts.socket.as_deref().ok_or_else(|| {
                Error::Config("socket schema requires a socket path".into())
            })?;
            Stream::unix(UnixStream::connect(path).await?)
        }
        other => {
            return Err(Error::Config(format!(
                "unsupported connection schema: {:?} (expected \"tcp\" or \"socket\")",
                other
            )));
        }
    };

    let session = Session::connect(stream, opts).await?;
    Ok(Box::new(session))
}
