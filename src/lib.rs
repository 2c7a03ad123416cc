//! An async PostgreSQL client built on the extended query protocol.
//!
//! # Features
//!
//! - **Typed wire codec**: each supported type declares the wire format it
//!   prefers; values encode/decode for both TEXT and BINARY
//! - **Eager parameter encoding**: parameters are encoded into a reusable
//!   Bind frame when bound, not when executed
//! - **Serialized connections**: a per-connection actor runs one request at
//!   a time; exclusive multi-statement access via FIFO leases
//!
//! # Example
//!
//! ```no_run
//! use postgres_async::{ConnectOpts, Connection, Query};
//!
//! #[tokio::main]
//! async fn main() -> postgres_async::Result<()> {
//!     let opts = ConnectOpts::try_from("tcp://postgres@localhost:5432/mydb")?;
//!     let conn = Connection::connect(&opts).await?;
//!
//!     let mut query = Query::new("SELECT id, name FROM users WHERE id = $1");
//!     query.bind((42_i32,));
//!     let result = conn.execute(&query).await?;
//!     for row in 0..result.len() {
//!         let name: Option<String> = result.get(row, 1)?;
//!         println!("name: {name:?}");
//!     }
//!
//!     conn.terminate().await
//! }
//! ```

pub mod connection;
pub mod engine;
pub mod error;
pub mod opts;
pub mod params;
pub mod protocol;
pub mod query;
pub mod result;
pub mod transaction;
pub mod wire;

pub use connection::{Connection, EventHandler};
pub use engine::{EngineState, ProtocolEngine};
pub use error::{Error, Result};
pub use opts::ConnectOpts;
pub use params::{BindFrame, IntoParams, Parameter, ToParam};
pub use protocol::types::{FormatCode, Oid, TransactionStatus};
pub use query::Query;
pub use result::{Column, QueryResult};
pub use transaction::Transaction;
pub use wire::{FromWire, Symbol, ToWire};
