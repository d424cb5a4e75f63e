use std::{
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use crate::{
    config::ClientSettings,
    error::{ClientError, ClientResult},
    transport::BackendApi,
    types::Credentials,
};

/// Bearer credential for one login.
///
/// `epoch` increases with every login so results computed under an older
/// session can be told apart from the current one.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    token: Arc<str>,
    epoch: u64,
    opened_at: DateTime<Utc>,
}

impl Session {
    pub fn bearer(&self) -> &str {
        &self.token
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("epoch", &self.epoch)
            .field("opened_at", &self.opened_at)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    Explicit,
    Unauthorized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { epoch: u64 },
    LoggedOut { epoch: u64, reason: LogoutReason },
}

pub struct SessionManager {
    backend: Arc<dyn BackendApi>,
    current: RwLock<Option<Session>>,
    last_epoch: AtomicU64,
    request_timeout: Duration,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn BackendApi>, settings: &ClientSettings) -> Arc<Self> {
        Self::with_request_timeout(backend, settings.request_timeout())
    }

    pub fn with_request_timeout(
        backend: Arc<dyn BackendApi>,
        request_timeout: Duration,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            backend,
            current: RwLock::new(None),
            last_epoch: AtomicU64::new(0),
            request_timeout,
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn login(&self, credentials: &Credentials) -> ClientResult<Session> {
        let credentials = credentials.validated()?;
        let token = bounded("login", self.request_timeout, self.backend.login(&credentials))
            .await
            .inspect_err(|err| warn!("session: login failed: {err}"))?;
        Ok(self.open(token).await)
    }

    /// Creates an account. Returns a session when the backend hands out a token
    /// straight away, `None` when the operator still has to log in.
    pub async fn signup(&self, credentials: &Credentials) -> ClientResult<Option<Session>> {
        let credentials = credentials.validated()?;
        let token = bounded("signup", self.request_timeout, self.backend.signup(&credentials))
            .await
            .inspect_err(|err| warn!("session: signup failed: {err}"))?;
        info!(email = %credentials.email, "session: account created");
        match token {
            Some(token) => Ok(Some(self.open(token).await)),
            None => Ok(None),
        }
    }

    pub async fn logout(&self) -> bool {
        let previous = self.current.write().await.take();
        match previous {
            Some(session) => {
                info!(epoch = session.epoch, "session: logged out");
                let _ = self.events.send(SessionEvent::LoggedOut {
                    epoch: session.epoch,
                    reason: LogoutReason::Explicit,
                });
                true
            }
            None => false,
        }
    }

    pub async fn whoami(&self) -> ClientResult<String> {
        let me = self
            .authenticated("whoami", |backend, session| async move {
                backend.whoami(&session).await
            })
            .await?;
        Ok(me.email)
    }

    pub async fn current(&self) -> Option<Session> {
        self.current.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.current.read().await.is_some()
    }

    pub async fn is_current(&self, session: &Session) -> bool {
        self.current
            .read()
            .await
            .as_ref()
            .is_some_and(|current| current.epoch == session.epoch)
    }

    pub async fn require(&self) -> ClientResult<Session> {
        self.current()
            .await
            .ok_or_else(|| ClientError::Auth("not logged in".into()))
    }

    pub async fn authenticated<T, F, Fut>(&self, op: &'static str, call: F) -> ClientResult<T>
    where
        F: FnOnce(Arc<dyn BackendApi>, Session) -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        self.authenticated_within(op, self.request_timeout, call)
            .await
    }

    /// Runs `call` with the current session attached.
    ///
    /// An `Auth` failure ends the session instead of retrying with the same
    /// token. A result that lands after the session ended is dropped and
    /// reported as [`ClientError::SessionEnded`].
    pub async fn authenticated_within<T, F, Fut>(
        &self,
        op: &'static str,
        limit: Duration,
        call: F,
    ) -> ClientResult<T>
    where
        F: FnOnce(Arc<dyn BackendApi>, Session) -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        let session = self.require().await?;
        let outcome = bounded(op, limit, call(Arc::clone(&self.backend), session.clone())).await;
        match outcome {
            Err(ClientError::Auth(reason)) => {
                warn!(
                    op,
                    epoch = session.epoch,
                    "session: authorization rejected; forcing logout"
                );
                self.invalidate(&session, LogoutReason::Unauthorized).await;
                Err(ClientError::Auth(reason))
            }
            Err(err) => Err(err),
            Ok(value) => {
                if self.is_current(&session).await {
                    Ok(value)
                } else {
                    info!(
                        op,
                        epoch = session.epoch,
                        "session: discarding result that completed after logout"
                    );
                    Err(ClientError::SessionEnded)
                }
            }
        }
    }

    /// Ends `session` if it is still the current one.
    pub async fn invalidate(&self, session: &Session, reason: LogoutReason) -> bool {
        let mut guard = self.current.write().await;
        if guard
            .as_ref()
            .is_some_and(|current| current.epoch == session.epoch)
        {
            guard.take();
            drop(guard);
            let _ = self.events.send(SessionEvent::LoggedOut {
                epoch: session.epoch,
                reason,
            });
            return true;
        }
        false
    }

    async fn open(&self, token: String) -> Session {
        let session = Session {
            token: Arc::from(token),
            epoch: self.last_epoch.fetch_add(1, Ordering::SeqCst) + 1,
            opened_at: Utc::now(),
        };
        let replaced = self.current.write().await.replace(session.clone());
        if let Some(previous) = replaced {
            let _ = self.events.send(SessionEvent::LoggedOut {
                epoch: previous.epoch,
                reason: LogoutReason::Explicit,
            });
        }
        info!(epoch = session.epoch, "session: logged in");
        let _ = self.events.send(SessionEvent::LoggedIn {
            epoch: session.epoch,
        });
        session
    }
}

async fn bounded<T, Fut>(op: &'static str, limit: Duration, call: Fut) -> ClientResult<T>
where
    Fut: Future<Output = ClientResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::Timeout(format!(
            "{op} did not complete within {}s",
            limit.as_secs_f64()
        ))),
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
