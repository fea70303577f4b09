use std::{collections::VecDeque, time::Duration};

use tokio::sync::Mutex;

use super::ServerSession;
use crate::bson::Document;

/// A pool of server sessions, reused most-recently-returned-first so that the fewest sessions
/// stay alive server-side.
#[derive(Debug, Default)]
pub(crate) struct ServerSessionPool {
    pool: Mutex<VecDeque<ServerSession>>,
}

impl ServerSessionPool {
    pub(crate) fn new() -> Self {
        Default::default()
    }

    /// Checks out a server session from the pool. Before doing so, it first discards any
    /// expired sessions at the front. If no unexpired sessions remain, a new one is created.
    pub(crate) async fn check_out(&self, logical_session_timeout: Option<Duration>) -> ServerSession {
        let mut pool = self.pool.lock().await;
        while let Some(session) = pool.pop_front() {
            if session.is_about_to_expire(logical_session_timeout) {
                continue;
            }
            return session;
        }
        ServerSession::new()
    }

    /// Checks in a server session to the pool. If it is about to expire or is dirty, it is
    /// discarded instead.
    ///
    /// This method also clears out any sessions at the back of the pool that have expired,
    /// since anything behind them is at least as old.
    pub(crate) async fn check_in(
        &self,
        session: ServerSession,
        logical_session_timeout: Option<Duration>,
    ) {
        let mut pool = self.pool.lock().await;
        while let Some(pooled_session) = pool.pop_back() {
            if pooled_session.is_about_to_expire(logical_session_timeout) {
                continue;
            }
            pool.push_back(pooled_session);
            break;
        }

        if !session.dirty && !session.is_about_to_expire(logical_session_timeout) {
            pool.push_front(session);
        }
    }

    /// Remove and return every pooled session id, leaving the pool empty. Used to end the
    /// sessions server-side on shutdown.
    pub(crate) async fn drain(&self) -> Vec<Document> {
        let mut pool = self.pool.lock().await;
        pool.drain(..).map(|session| session.id).collect()
    }
}
