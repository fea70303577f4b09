use std::time::Instant;

use lazy_static::lazy_static;

use super::{session::ClientSession, Client};
use crate::{
    bson::Document,
    cmap::{conn::PinnedConnectionHandle, Connection},
    error::{Error, ErrorKind, Result, RETRYABLE_WRITE_ERROR},
    event::command::{
        bounded_document,
        CommandEvent,
        CommandFailedEvent,
        CommandStartedEvent,
        CommandSucceededEvent,
        DEFAULT_MAX_EVENT_DOCUMENT_LENGTH_BYTES,
    },
    event::emit,
    operation::{Operation, Retryability},
    sdam::HandshakePhase,
};

lazy_static! {
    static ref REDACTED_COMMANDS: std::collections::HashSet<&'static str> = {
        let mut hash_set = std::collections::HashSet::new();
        hash_set.insert("authenticate");
        hash_set.insert("saslstart");
        hash_set.insert("saslcontinue");
        hash_set.insert("getnonce");
        hash_set.insert("createuser");
        hash_set.insert("updateuser");
        hash_set.insert("copydbgetnonce");
        hash_set.insert("copydbsaslstart");
        hash_set.insert("copydb");
        hash_set
    };
}

impl Client {
    /// Execute the given operation.
    ///
    /// Server selection is performed using the criteria specified on the operation, if any,
    /// and an implicit session is created if the operation and write concern are compatible
    /// with sessions and an explicit session is not provided.
    pub(crate) async fn execute_operation<T: Operation>(
        &self,
        op: T,
        session: impl Into<Option<&mut ClientSession>>,
    ) -> Result<T::O> {
        match session.into() {
            Some(session) => {
                self.validate_session(session)?;
                self.execute_operation_with_retry(op, Some(session)).await
            }
            None => {
                let mut implicit_session = self.start_implicit_session(&op).await;
                self.execute_operation_with_retry(op, implicit_session.as_mut())
                    .await
            }
        }
    }

    /// Execute the given cursor-producing operation, returning the pinned connection handle
    /// (when the topology requires cursors to bind to their originating connection) and the
    /// implicit session created for it (if one was) so that the cursor can continue to use
    /// both for its getMores.
    pub(crate) async fn execute_cursor_operation<T: Operation>(
        &self,
        mut op: T,
    ) -> Result<(T::O, Option<PinnedConnectionHandle>, Option<ClientSession>)> {
        let mut implicit_session = self.start_implicit_session(&op).await;

        // On a load-balanced deployment, re-selecting by address cannot identify the backend
        // the cursor lives on, so the cursor must carry its originating connection.
        if self.inner.topology.topology_type() != crate::TopologyType::LoadBalanced {
            let output = self
                .execute_operation_with_retry(op, implicit_session.as_mut())
                .await?;
            return Ok((output, None, implicit_session));
        }

        let server = self.select_server(op.selection_criteria()).await?;
        let mut conn = server.pool.check_out().await?;
        let mut session_ref = implicit_session.as_mut();
        let output = self
            .execute_operation_on_connection(&mut op, &mut conn, &mut session_ref, None)
            .await?;
        let handle = conn.pin()?;
        Ok((output, Some(handle), implicit_session))
    }

    /// Execute the given operation on a specific connection, skipping server selection
    /// entirely. Used by operations bound to the connection their cursor originated on.
    pub(crate) async fn execute_operation_on_pinned_connection<T: Operation>(
        &self,
        op: T,
        connection: &mut Connection,
        session: Option<&mut ClientSession>,
    ) -> Result<T::O> {
        let mut op = op;
        let mut session = session;
        self.execute_operation_on_connection(&mut op, connection, &mut session, None)
            .await
    }

    /// Ensure the session was started by this client: sessions minted by one client are
    /// meaningless to another, since lsids are tracked per deployment connection.
    fn validate_session(&self, session: &ClientSession) -> Result<()> {
        if session.client().id() != self.id() {
            return Err(ErrorKind::InvalidArgument {
                message: "the session provided to an operation must be started from the same \
                          client as the operation"
                    .to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Selects a server and executes the given operation on it, optionally using a provided
    /// session. Retries the operation once upon a retryable failure if retryability is
    /// supported.
    async fn execute_operation_with_retry<T: Operation>(
        &self,
        mut op: T,
        mut session: Option<&mut ClientSession>,
    ) -> Result<T::O> {
        let server = self.select_server(op.selection_criteria()).await?;

        let mut conn = match server.pool.check_out().await {
            Ok(conn) => conn,
            Err(err) => {
                // A cleared pool means the server just transitioned; a fresh selection is
                // allowed to find a healthy one.
                drop(server);
                return if err.is_pool_cleared() && self.retryability_enabled(&op) {
                    self.retry_operation(op, session, None, err).await
                } else {
                    Err(err)
                };
            }
        };

        let retryability = self.get_retryability(&conn, &op)?;

        let txn_number = match session {
            Some(ref mut session) if retryability == Retryability::Write => {
                Some(session.get_and_increment_txn_number())
            }
            _ => None,
        };

        let first_error = match self
            .execute_operation_on_connection(&mut op, &mut conn, &mut session, txn_number)
            .await
        {
            Ok(result) => return Ok(result),
            Err(err) => {
                // On pre-4.4 servers the driver labels write-retryable errors itself; newer
                // servers attach the label.
                let err = match retryability {
                    Retryability::Write => add_retryable_write_label(&conn, err)?,
                    _ => err,
                };

                self.inner
                    .topology
                    .handle_application_error(
                        conn.address().clone(),
                        err.clone(),
                        HandshakePhase::after_completion(&conn),
                    )
                    .await;
                // Release the connection to be processed by the connection pool.
                drop(conn);
                // Release the selected server to decrement its operation count.
                drop(server);

                if retryability == Retryability::Read && err.is_read_retryable()
                    || retryability == Retryability::Write && err.is_write_retryable()
                {
                    err
                } else {
                    return Err(err);
                }
            }
        };

        self.retry_operation(op, session, txn_number, first_error)
            .await
    }

    /// One retry attempt: a fresh server selection and checkout, reusing the transaction
    /// number allocated for the first attempt. The original error surfaces if the retry
    /// cannot proceed.
    async fn retry_operation<T: Operation>(
        &self,
        mut op: T,
        mut session: Option<&mut ClientSession>,
        txn_number: Option<i64>,
        first_error: Error,
    ) -> Result<T::O> {
        let server = match self.select_server(op.selection_criteria()).await {
            Ok(server) => server,
            Err(_) => {
                return Err(first_error);
            }
        };

        let mut conn = match server.pool.check_out().await {
            Ok(c) => c,
            Err(_) => return Err(first_error),
        };

        let retryability = self.get_retryability(&conn, &op)?;
        if retryability == Retryability::None {
            return Err(first_error);
        }

        match self
            .execute_operation_on_connection(&mut op, &mut conn, &mut session, txn_number)
            .await
        {
            Ok(result) => Ok(result),
            Err(err) => {
                let err = match retryability {
                    Retryability::Write => add_retryable_write_label(&conn, err)?,
                    _ => err,
                };
                self.inner
                    .topology
                    .handle_application_error(
                        conn.address().clone(),
                        err.clone(),
                        HandshakePhase::after_completion(&conn),
                    )
                    .await;
                drop(conn);
                drop(server);

                if err.is_server_error() || err.is_read_retryable() || err.is_write_retryable() {
                    Err(err)
                } else {
                    Err(first_error)
                }
            }
        }
    }

    /// Executes an operation on a given connection, optionally using a provided session.
    async fn execute_operation_on_connection<T: Operation>(
        &self,
        op: &mut T,
        connection: &mut Connection,
        session: &mut Option<&mut ClientSession>,
        txn_number: Option<i64>,
    ) -> Result<T::O> {
        if let Some(wc) = op.write_concern() {
            wc.validate()?;
        }

        let stream_description = connection.stream_description()?.clone();
        let mut cmd = op.build(&stream_description)?;
        self.inner.topology.update_command_with_read_pref(
            connection.address(),
            &mut cmd,
            op.selection_criteria(),
        );

        match session {
            Some(ref mut session) if op.supports_sessions() && op.is_acknowledged() => {
                if stream_description.supports_sessions() {
                    cmd.set_session_id(session.id());
                    if let Some(txn_number) = txn_number {
                        cmd.set_txn_number(txn_number);
                    }
                    if op.supports_read_concern()
                        && session.causal_consistency()
                    {
                        // The first operation in the session has no operation time yet and
                        // sends no afterClusterTime.
                        if let Some(operation_time) = session.operation_time() {
                            cmd.set_after_cluster_time(operation_time);
                        }
                    }
                    session.update_last_use();
                } else if !session.is_implicit() {
                    return Err(ErrorKind::SessionsUnsupported.into());
                }
            }
            Some(ref session) if !op.supports_sessions() && !session.is_implicit() => {
                return Err(ErrorKind::InvalidArgument {
                    message: format!("{} does not support sessions", cmd.name),
                }
                .into());
            }
            Some(ref session) if !op.is_acknowledged() && !session.is_implicit() => {
                return Err(ErrorKind::InvalidArgument {
                    message: "cannot use ClientSessions with unacknowledged write concern"
                        .to_string(),
                }
                .into());
            }
            _ => {}
        }

        // The deployment's cluster time gossips through every command once any server has
        // revealed one.
        let session_cluster_time = session.as_ref().and_then(|session| session.cluster_time());
        let client_cluster_time = self.inner.topology.cluster_time();
        let max_cluster_time =
            std::cmp::max(session_cluster_time, client_cluster_time.as_ref());
        if let Some(cluster_time) = max_cluster_time {
            cmd.set_cluster_time(cluster_time);
        }

        let connection_info = connection.info();
        let request_id = crate::cmap::next_request_id();
        let max_event_length = self
            .inner
            .options
            .max_event_document_length_bytes
            .unwrap_or(DEFAULT_MAX_EVENT_DOCUMENT_LENGTH_BYTES);

        let should_redact = REDACTED_COMMANDS.contains(cmd.name.to_lowercase().as_str());
        self.emit_command_event(|| {
            let command_body = if should_redact {
                Document::new()
            } else {
                bounded_document(&cmd.body, max_event_length)
            };
            CommandEvent::Started(CommandStartedEvent {
                command: command_body,
                db: cmd.target_db.clone(),
                command_name: cmd.name.clone(),
                request_id,
                connection: connection_info.clone(),
            })
        });

        let start_time = Instant::now();

        let response_result = match connection.send_command(cmd.clone(), request_id).await {
            Ok(response) => {
                if let Some(cluster_time) = response.cluster_time() {
                    self.inner.topology.advance_cluster_time(cluster_time.clone()).await;
                    if let Some(ref mut session) = session {
                        session.advance_cluster_time(&cluster_time)
                    }
                }
                if op.is_acknowledged() {
                    if let (Some(ref mut session), Some(operation_time)) =
                        (session.as_mut(), response.operation_time())
                    {
                        session.advance_operation_time(operation_time);
                    }
                }
                response.validate().map(|_| response)
            }
            Err(err) => Err(err),
        };

        let duration = start_time.elapsed();

        match response_result {
            Err(error) => {
                self.emit_command_event(|| {
                    CommandEvent::Failed(CommandFailedEvent {
                        duration,
                        command_name: cmd.name.clone(),
                        failure: error.clone(),
                        request_id,
                        connection: connection_info,
                    })
                });

                if let Some(session) = session {
                    if error.is_network_error() {
                        session.mark_dirty();
                    }
                }

                Err(error)
            }
            Ok(response) => {
                self.emit_command_event(|| {
                    let reply = if should_redact {
                        Document::new()
                    } else {
                        bounded_document(&response.raw_response, max_event_length)
                    };
                    CommandEvent::Succeeded(CommandSucceededEvent {
                        duration,
                        reply,
                        command_name: cmd.name.clone(),
                        request_id,
                        connection: connection_info,
                    })
                });

                op.handle_response(response, &stream_description)
            }
        }
    }

    /// Start an implicit session if the operation and write concern are compatible with
    /// sessions.
    pub(crate) async fn start_implicit_session<T: Operation>(
        &self,
        op: &T,
    ) -> Option<ClientSession> {
        if op.supports_sessions() && op.is_acknowledged() {
            Some(self.start_session_internal(None, true).await)
        } else {
            None
        }
    }

    fn retryability_enabled<T: Operation>(&self, op: &T) -> bool {
        match op.retryability() {
            Retryability::Read => self.inner.options.retry_reads != Some(false),
            Retryability::Write => self.inner.options.retry_writes != Some(false),
            Retryability::None => false,
        }
    }

    /// Returns the retryability level for the execution of this operation on this connection.
    fn get_retryability<T: Operation>(
        &self,
        conn: &Connection,
        op: &T,
    ) -> Result<Retryability> {
        match op.retryability() {
            Retryability::Read if self.inner.options.retry_reads != Some(false) => {
                Ok(Retryability::Read)
            }
            Retryability::Write
                if self.inner.options.retry_writes != Some(false)
                    && conn.stream_description()?.supports_retryable_writes() =>
            {
                Ok(Retryability::Write)
            }
            _ => Ok(Retryability::None),
        }
    }

    pub(crate) fn emit_command_event(&self, make_event: impl FnOnce() -> CommandEvent) {
        emit(&self.inner.options.command_event_handler, make_event);
    }
}

/// Returns an error with the `RetryableWriteError` label added if the driver is responsible
/// for labeling it on this connection's wire version.
fn add_retryable_write_label(conn: &Connection, err: Error) -> Result<Error> {
    if let Some(max_wire_version) = conn.stream_description()?.max_wire_version {
        if err.should_add_retryable_write_label(max_wire_version) {
            return Ok(err.with_label(RETRYABLE_WRITE_ERROR));
        }
    }
    Ok(err)
}
