use super::models::{RefreshRequest, RefreshResponse};
use super::transport::{ApiRequest, Transport};
use crate::error::{ClientError, Result};
use crate::storage::{CredentialStore, Credentials};
use crate::utils::token_hint;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

pub const REFRESH_PATH: &str = "/auth/refresh";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Authenticated,
    LoggedOut,
}

/// Exchanges the refresh token for a new access token.
///
/// Exchanges are serialized. A caller that waited behind another exchange
/// and finds a different access token in the store than the one its request
/// carried reuses that token instead of refreshing again.
pub struct RefreshCoordinator<T> {
    transport: Arc<T>,
    store: CredentialStore,
    gate: Mutex<()>,
    state: watch::Sender<SessionState>,
}

impl<T: Transport> RefreshCoordinator<T> {
    pub fn new(transport: Arc<T>, store: CredentialStore) -> Self {
        let initial = match store.get() {
            Ok(creds) if creds.is_authenticated() => SessionState::Authenticated,
            _ => SessionState::LoggedOut,
        };
        let (state, _) = watch::channel(initial);
        Self { transport, store, gate: Mutex::new(()), state }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub(crate) fn mark_authenticated(&self) {
        self.state.send_replace(SessionState::Authenticated);
    }

    /// Drops both tokens and tells subscribers the session is over.
    pub fn invalidate(&self) {
        if let Err(e) = self.store.clear() {
            log::error!("Failed to clear credentials: {}", e);
        }
        self.state.send_replace(SessionState::LoggedOut);
    }

    pub async fn refresh(&self) -> Result<String> {
        self.refresh_stale(None).await
    }

    /// `stale` is the access token the rejected request was sent with.
    pub async fn refresh_stale(&self, stale: Option<&str>) -> Result<String> {
        let _guard = self.gate.lock().await;
        let creds = self.store.get()?;

        if let (Some(stale), Some(current)) = (stale, creds.access()) {
            if stale != current {
                log::debug!("Access token was refreshed while waiting, reusing it");
                return Ok(current.to_string());
            }
        }

        let Some(refresh) = creds.refresh().map(str::to_string) else {
            log::warn!("No refresh token, ending session");
            self.invalidate();
            return Err(ClientError::SessionExpired);
        };

        log::info!("Refreshing access token");
        match self.exchange(&refresh).await {
            Ok(resp) => {
                let next_refresh = resp.refresh_token.unwrap_or_else(|| refresh.clone());
                let next = Credentials::new(resp.access_token.clone(), next_refresh);
                if !self.store.replace_if_refresh(&refresh, &next)? {
                    // Logged out or logged in again while the exchange was in flight.
                    log::info!("Session changed during refresh, discarding new token");
                    if !self.store.get()?.is_authenticated() {
                        self.state.send_replace(SessionState::LoggedOut);
                    }
                    return Err(ClientError::SessionExpired);
                }
                log::info!("Access token refreshed ({})", token_hint(&resp.access_token));
                Ok(resp.access_token)
            }
            Err(e) => {
                log::warn!("Refresh failed, ending session: {}", e);
                self.invalidate();
                Err(ClientError::SessionExpired)
            }
        }
    }

    async fn exchange(&self, refresh_token: &str) -> Result<RefreshResponse> {
        let req = ApiRequest::post(REFRESH_PATH).json(&RefreshRequest { refresh_token })?;
        let resp = self.transport.execute(&req).await?;
        if !resp.status.is_success() {
            return Err(ClientError::Refresh(format!("HTTP {}", resp.status)));
        }
        let body: RefreshResponse = resp
            .json()
            .map_err(|e| ClientError::Refresh(format!("malformed response: {}", e)))?;
        if body.access_token.is_empty() {
            return Err(ClientError::Refresh("empty access token".into()));
        }
        Ok(body)
    }
}
