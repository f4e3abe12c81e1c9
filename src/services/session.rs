//! Broker session manager
//!
//! Owns the validity of the Kite login. The status moves
//! `Unknown -> Checking -> LoggedIn | LoggedOut`, and to `Expired` whenever
//! any downstream call fails with an authorization error. The persisted
//! `kiteLoggedIn` flag only seeds the UI until the first live check.

use crate::client::Backend;
use crate::config::KiteLogin;
use crate::errors::ApiError;
use crate::services::persistence::{Persistence, StoreKey};
use crate::types::SessionState;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Unknown,
    Checking,
    LoggedIn,
    LoggedOut,
    Expired,
}

impl SessionStatus {
    pub fn is_logged_in(&self) -> bool {
        matches!(self, SessionStatus::LoggedIn)
    }
}

/// Query parameters the OAuth provider sends back to `/kite-callback`
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct CallbackParams {
    pub request_token: Option<String>,
    pub status: Option<String>,
}

/// Result of the login handshake; the caller always redirects to `redirect_to`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackOutcome {
    pub status: SessionStatus,
    pub redirect_to: String,
}

/// Settings for building the login URL and finishing the handshake
#[derive(Debug, Clone, Default)]
pub struct LoginSettings {
    pub api_key: Option<String>,
    pub redirect_uri: Option<String>,
    pub default_view: String,
}

pub struct SessionManager {
    backend: Arc<dyn Backend>,
    persistence: Persistence,
    login: LoginSettings,
    status_tx: watch::Sender<SessionStatus>,
    /// Last persisted flag, shown while the live check is pending
    advisory_logged_in: AtomicBool,
    login_url: RwLock<Option<String>>,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn Backend>, persistence: Persistence, login: LoginSettings) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Unknown);
        Self {
            backend,
            persistence,
            login,
            status_tx,
            advisory_logged_in: AtomicBool::new(false),
            login_url: RwLock::new(None),
        }
    }

    /// Seed the advisory flag from the persisted store
    pub async fn restore(&self) {
        let flag = self.persistence.load_or(StoreKey::SessionFlag, false).await;
        self.advisory_logged_in.store(flag, Ordering::SeqCst);
        debug!("Restored advisory session flag: {}", flag);
    }

    pub fn status(&self) -> SessionStatus {
        *self.status_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// UI view of the session
    pub fn state(&self) -> SessionState {
        match self.status() {
            SessionStatus::LoggedIn => SessionState {
                logged_in: true,
                token_expired: false,
            },
            SessionStatus::Expired => SessionState {
                logged_in: false,
                token_expired: true,
            },
            SessionStatus::LoggedOut => SessionState::default(),
            SessionStatus::Unknown | SessionStatus::Checking => SessionState {
                logged_in: self.advisory_logged_in.load(Ordering::SeqCst),
                token_expired: false,
            },
        }
    }

    async fn transition(&self, next: SessionStatus) {
        let previous = self.status_tx.send_replace(next);
        if previous != next {
            info!("Kite session: {:?} -> {:?}", previous, next);
        }

        let logged_in = next.is_logged_in();
        if matches!(next, SessionStatus::LoggedIn | SessionStatus::LoggedOut | SessionStatus::Expired) {
            self.advisory_logged_in.store(logged_in, Ordering::SeqCst);
            self.persistence.save(StoreKey::SessionFlag, &logged_in).await;
        }
    }

    /// Query the live session status
    pub async fn check_session(&self) -> SessionState {
        let was_expired = self.status() == SessionStatus::Expired;
        self.status_tx.send_replace(SessionStatus::Checking);

        let next = match self.backend.session_status().await {
            Ok(true) => SessionStatus::LoggedIn,
            // Keep the re-login banner until the user logs in again
            Ok(false) if was_expired => SessionStatus::Expired,
            Ok(false) => SessionStatus::LoggedOut,
            Err(e) if e.is_auth_expired() => SessionStatus::Expired,
            Err(e) => {
                warn!("Error checking Kite session: {}", e);
                if was_expired {
                    SessionStatus::Expired
                } else {
                    SessionStatus::LoggedOut
                }
            }
        };

        self.transition(next).await;
        self.state()
    }

    /// Force `Expired` after an authorization failure
    pub async fn mark_expired(&self, reason: &str) {
        if self.status() != SessionStatus::Expired {
            warn!("Kite session expired: {}", reason);
        }
        self.transition(SessionStatus::Expired).await;
    }

    /// Route a failed call through the session: auth failures expire the
    /// session and trigger one live re-check. Returns true if it was one.
    pub async fn handle_failure(&self, err: &ApiError) -> bool {
        if !err.is_auth_expired() {
            return false;
        }
        self.mark_expired(&err.to_string()).await;
        self.check_session().await;
        true
    }

    /// Login URL from the backend, or built from the OAuth template
    pub async fn login_url(&self) -> Result<String, ApiError> {
        if let Some(url) = self.login_url.read().await.clone() {
            return Ok(url);
        }

        let url = match self.backend.login_url().await {
            Ok(url) => url,
            Err(e) => {
                let api_key = self.login.api_key.as_deref().ok_or_else(|| {
                    warn!("Backend login URL unavailable and no KITE_API_KEY configured: {}", e);
                    e.clone()
                })?;
                debug!("Backend login URL unavailable ({}), using template", e);
                KiteLogin::url(api_key, self.login.redirect_uri.as_deref())
            }
        };

        *self.login_url.write().await = Some(url.clone());
        Ok(url)
    }

    /// Finish the OAuth handshake. Never fails: a missing token or a failed
    /// exchange is a logout, and the caller always redirects back.
    pub async fn handle_callback(&self, params: &CallbackParams) -> CallbackOutcome {
        let token = params.request_token.as_deref().filter(|t| !t.trim().is_empty());
        let success = params.status.as_deref() == Some("success");

        let next = match token {
            Some(token) if success => match self.backend.complete_login(token, "success").await {
                Ok(()) => {
                    info!("Kite login completed");
                    SessionStatus::LoggedIn
                }
                Err(e) => {
                    warn!("Kite login exchange failed: {}", e);
                    SessionStatus::LoggedOut
                }
            },
            _ => {
                warn!("Kite login failed or missing request_token");
                SessionStatus::LoggedOut
            }
        };

        self.transition(next).await;

        CallbackOutcome {
            status: next,
            redirect_to: self.login.default_view.clone(),
        }
    }
}
