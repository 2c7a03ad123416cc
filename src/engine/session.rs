//! Protocol session: the default engine over a TCP or Unix socket stream.

use crate::error::{Error, Result};
use crate::opts::ConnectOpts;
use crate::params::BindFrame;
use crate::protocol::backend::{
    self, AuthenticationMessage, BackendKeyData, CommandComplete, DataRow, ErrorResponse,
    NoticeResponse, ParameterStatus, ReadyForQuery, RowDescription,
};
use crate::protocol::codec::read_i32;
use crate::protocol::frontend;
use crate::protocol::types::{FormatCode, Oid, TransactionStatus};
use crate::result::{Column, QueryResult};

use super::stream::Stream;
use super::{BoxFuture, EngineState, ProtocolEngine};

/// A live protocol session over one stream.
///
/// Drives the startup handshake, then the simple and extended query
/// protocols. One request runs at a time; the connection actor above
/// guarantees that.
pub struct Session {
    stream: Stream,
    status: TransactionStatus,
    locked: bool,
    terminated: bool,
    /// Payload of the last message read, reused across reads.
    read_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl Session {
    /// Run the startup handshake and return the ready session.
    ///
    /// Handles AuthenticationOk and CleartextPassword; any other
    /// authentication demand fails with [`Error::Unsupported`].
    pub async fn connect(stream: Stream, opts: &ConnectOpts) -> Result<Self> {
        let mut session = Self {
            stream,
            status: TransactionStatus::Idle,
            locked: false,
            terminated: false,
            read_buf: Vec::new(),
            write_buf: Vec::new(),
        };

        let mut params: Vec<(&str, &str)> = vec![("user", &opts.user)];
        if let Some(database) = &opts.database {
            params.push(("database", database));
        }
        if let Some(app) = &opts.application_name {
            params.push(("application_name", app));
        }
        for (name, value) in &opts.params {
            params.push((name, value));
        }

        session.write_buf.clear();
        frontend::write_startup(&mut session.write_buf, &params);
        session.flush_writes().await?;

        loop {
            let type_byte = session.read_message().await?;
            match type_byte {
                backend::msg_type::AUTHENTICATION => {
                    let needs_password = match AuthenticationMessage::parse(&session.read_buf)? {
                        AuthenticationMessage::Ok => false,
                        AuthenticationMessage::CleartextPassword => true,
                        AuthenticationMessage::Md5Password { .. } => {
                            return Err(Error::Unsupported(
                                "MD5 password authentication".into(),
                            ));
                        }
                        AuthenticationMessage::Sasl { mechanisms } => {
                            return Err(Error::Unsupported(format!(
                                "SASL authentication ({})",
                                mechanisms.join(", ")
                            )));
                        }
                    };
                    if needs_password {
                        let password = opts
                            .password
                            .as_deref()
                            .ok_or_else(|| Error::Config("server requires a password".into()))?;
                        session.write_buf.clear();
                        frontend::write_password(&mut session.write_buf, password);
                        session.flush_writes().await?;
                    }
                }
                backend::msg_type::PARAMETER_STATUS => {
                    let status = ParameterStatus::parse(&session.read_buf)?;
                    tracing::debug!(name = status.name, value = status.value, "parameter status");
                }
                backend::msg_type::BACKEND_KEY_DATA => {
                    let key = BackendKeyData::parse(&session.read_buf)?;
                    tracing::debug!(pid = key.process_id(), "backend key data");
                }
                backend::msg_type::NOTICE_RESPONSE => {
                    let notice = NoticeResponse::parse(&session.read_buf)?;
                    tracing::warn!(notice = %notice.fields, "server notice");
                }
                backend::msg_type::ERROR_RESPONSE => {
                    return Err(ErrorResponse::parse(&session.read_buf)?.into_error());
                }
                backend::msg_type::READY_FOR_QUERY => {
                    session.update_status()?;
                    return Ok(session);
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message during startup: {:?}",
                        other as char
                    )));
                }
            }
        }
    }

    /// Read one message: type byte, then length-prefixed payload into
    /// `read_buf`. Returns the type byte.
    async fn read_message(&mut self) -> Result<u8> {
        let mut header = [0u8; 5];
        self.stream.read_exact(&mut header).await?;
        let type_byte = header[0];
        let (len, _) = read_i32(&header[1..])?;
        let payload_len = (len - 4).max(0) as usize;

        self.read_buf.resize(payload_len, 0);
        self.stream.read_exact(&mut self.read_buf).await?;
        Ok(type_byte)
    }

    async fn flush_writes(&mut self) -> Result<()> {
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;
        self.write_buf.clear();
        Ok(())
    }

    fn update_status(&mut self) -> Result<()> {
        let ready = ReadyForQuery::parse(&self.read_buf)?;
        self.status = ready.transaction_status().ok_or_else(|| {
            Error::Protocol(format!("unknown transaction status: {}", ready.status))
        })?;
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.terminated {
            return Err(Error::Terminated);
        }
        Ok(())
    }

    /// Collect the response stream of one query into a result, consuming
    /// messages up to ReadyForQuery. Shared by both protocols.
    async fn collect_result(&mut self) -> Result<QueryResult> {
        let mut result = QueryResult::new(Vec::new());
        let mut error: Option<Error> = None;

        loop {
            let type_byte = self.read_message().await?;
            match type_byte {
                backend::msg_type::PARSE_COMPLETE
                | backend::msg_type::BIND_COMPLETE
                | backend::msg_type::NO_DATA
                | backend::msg_type::PORTAL_SUSPENDED
                | backend::msg_type::EMPTY_QUERY_RESPONSE => {}
                backend::msg_type::ROW_DESCRIPTION => {
                    let desc = RowDescription::parse(&self.read_buf)?;
                    let columns = desc
                        .iter()
                        .map(|field| Column {
                            name: field.name.to_owned(),
                            type_oid: field.type_oid(),
                            format: field.format(),
                        })
                        .collect();
                    result = QueryResult::new(columns);
                }
                backend::msg_type::DATA_ROW => {
                    let row = DataRow::parse(&self.read_buf)?;
                    result.push_row(row.iter().map(|cell| cell.map(<[u8]>::to_vec)).collect());
                }
                backend::msg_type::COMMAND_COMPLETE => {
                    let complete = CommandComplete::parse(&self.read_buf)?;
                    tracing::debug!(tag = complete.tag, "command complete");
                    result.finish(complete.rows_affected());
                }
                backend::msg_type::NOTICE_RESPONSE => {
                    let notice = NoticeResponse::parse(&self.read_buf)?;
                    tracing::warn!(notice = %notice.fields, "server notice");
                }
                backend::msg_type::PARAMETER_STATUS => {
                    let status = ParameterStatus::parse(&self.read_buf)?;
                    tracing::debug!(name = status.name, value = status.value, "parameter status");
                }
                backend::msg_type::NOTIFICATION_RESPONSE => {}
                backend::msg_type::ERROR_RESPONSE => {
                    let response = ErrorResponse::parse(&self.read_buf)?;
                    // Keep draining until ReadyForQuery so the stream stays
                    // in sync.
                    error.get_or_insert(response.into_error());
                }
                backend::msg_type::READY_FOR_QUERY => {
                    self.update_status()?;
                    return match error {
                        Some(error) => Err(error),
                        None => Ok(result),
                    };
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message in query response: {:?}",
                        other as char
                    )));
                }
            }
        }
    }

    async fn run_simple(&mut self, sql: &str) -> Result<QueryResult> {
        self.check_open()?;
        tracing::trace!(sql, "simple query");
        self.write_buf.clear();
        frontend::write_query(&mut self.write_buf, sql);
        self.flush_writes().await?;
        self.collect_result().await
    }

    async fn run_extended(
        &mut self,
        sql: &str,
        param_types: &[Oid],
        frame: &BindFrame,
    ) -> Result<QueryResult> {
        self.check_open()?;
        tracing::trace!(sql, params = frame.param_count(), "extended query");
        self.write_buf.clear();
        frontend::write_parse(&mut self.write_buf, "", sql, param_types);
        // A single result-format code applies to every column.
        frontend::write_bind(&mut self.write_buf, "", "", frame, &[FormatCode::Binary]);
        frontend::write_describe_portal(&mut self.write_buf, "");
        frontend::write_execute(&mut self.write_buf, "", 0);
        frontend::write_sync(&mut self.write_buf);
        self.flush_writes().await?;
        self.collect_result().await
    }
}

impl ProtocolEngine for Session {
    fn state(&self) -> EngineState {
        if self.terminated {
            EngineState::Terminated
        } else {
            match self.status {
                TransactionStatus::Idle => EngineState::Ready,
                TransactionStatus::InTransaction => EngineState::InTransaction,
                TransactionStatus::Failed => EngineState::TransactionFailed,
            }
        }
    }

    fn execute_query<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<QueryResult>> {
        Box::pin(self.run_simple(sql))
    }

    fn execute_prepared<'a>(
        &'a mut self,
        sql: &'a str,
        param_types: &'a [Oid],
        frame: &'a BindFrame,
    ) -> BoxFuture<'a, Result<QueryResult>> {
        Box::pin(self.run_extended(sql, param_types, frame))
    }

    fn begin_transaction(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.run_simple("BEGIN").await.map(|_| ()) })
    }

    fn commit_transaction(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.run_simple("COMMIT").await.map(|_| ()) })
    }

    fn rollback_transaction(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.run_simple("ROLLBACK").await.map(|_| ()) })
    }

    fn terminate(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !self.terminated {
                self.terminated = true;
                self.write_buf.clear();
                frontend::write_terminate(&mut self.write_buf);
                self.flush_writes().await?;
            }
            Ok(())
        })
    }

    fn lock(&mut self) -> Result<()> {
        if self.locked {
            return Err(Error::InvalidUsage("engine is already locked".into()));
        }
        self.locked = true;
        Ok(())
    }

    fn unlock(&mut self) {
        self.locked = false;
    }
}
