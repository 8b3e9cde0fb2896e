use super::middleware::{default_chain, run_chain, RequestLayer};
use super::refresh::RefreshCoordinator;
use super::transport::{ApiRequest, ApiResponse, Transport};
use crate::error::Result;
use crate::storage::CredentialStore;
use reqwest::StatusCode;
use std::sync::Arc;

/// Authenticated request path for every outbound call.
///
/// Runs the layer chain, dispatches, and on a 401 refreshes once and replays
/// the original request. A replayed request is never refreshed again.
pub struct SessionClient<T> {
    transport: Arc<T>,
    store: CredentialStore,
    refresher: Arc<RefreshCoordinator<T>>,
    layers: Vec<Box<dyn RequestLayer>>,
}

impl<T: Transport> SessionClient<T> {
    pub fn new(transport: Arc<T>, store: CredentialStore) -> Self {
        let refresher = Arc::new(RefreshCoordinator::new(transport.clone(), store.clone()));
        Self { transport, store, refresher, layers: default_chain() }
    }

    /// Appends a layer after the defaults.
    pub fn with_layer(mut self, layer: impl RequestLayer + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn refresher(&self) -> &Arc<RefreshCoordinator<T>> {
        &self.refresher
    }

    /// Sends without the chain or any refresh handling (log-in, sign-up).
    pub async fn request_unauthenticated(&self, req: ApiRequest) -> Result<ApiResponse> {
        log::debug!("{} {} (unauthenticated)", req.method, req.path);
        self.transport.execute(&req).await?.error_for_status()
    }

    pub async fn request(&self, req: ApiRequest) -> Result<ApiResponse> {
        let (resp, sent_with) = self.dispatch(&req).await?;
        if resp.status != StatusCode::UNAUTHORIZED || req.is_retried() {
            return resp.error_for_status();
        }

        log::info!("{} {} was rejected as unauthenticated", req.method, req.path);
        if let Err(e) = self.refresher.refresh_stale(sent_with.as_deref()).await {
            log::warn!("Not replaying {} {}: {}", req.method, req.path, e);
            return resp.error_for_status();
        }

        let replay = req.into_retry();
        let (resp, _) = self.dispatch(&replay).await?;
        resp.error_for_status()
    }

    /// One attempt. Also returns the stored access token the request went out
    /// with; `None` when the caller set its own Authorization header.
    async fn dispatch(&self, req: &ApiRequest) -> Result<(ApiResponse, Option<String>)> {
        let creds = self.store.get()?;
        let sent_with = if req.has_authorization() {
            None
        } else {
            creds.access().map(str::to_string)
        };
        let prepared = run_chain(&self.layers, req.clone(), &creds)?;
        log::debug!("{} {}", prepared.method, prepared.path);
        let resp = self.transport.execute(&prepared).await?;
        Ok((resp, sent_with))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::refresh::{SessionState, REFRESH_PATH};
    use crate::api::testing::{store_with, FakeTransport};
    use crate::error::ClientError;
    use crate::storage::Credentials;

    /// `/ai/chat` accepts only `Bearer A2`; refresh hands out `A2`.
    fn server() -> FakeTransport {
        FakeTransport::new(|req| {
            if req.path == REFRESH_PATH {
                return (StatusCode::OK, r#"{"access_token":"A2"}"#.into());
            }
            match req.authorization() {
                Some("Bearer A2") => (StatusCode::OK, r#"{"ai_response":"hey"}"#.into()),
                _ => (StatusCode::UNAUTHORIZED, r#"{"detail":"expired"}"#.into()),
            }
        })
    }

    #[tokio::test]
    async fn valid_token_makes_one_call() {
        let transport = Arc::new(server());
        let client = SessionClient::new(transport.clone(), store_with(Some(("A2", "R1"))));

        let resp = client.request(ApiRequest::post("/ai/chat")).await.unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(transport.calls(), 1);
        assert_eq!(transport.calls_to(REFRESH_PATH), 0);
    }

    #[tokio::test]
    async fn expired_token_refreshes_and_replays_once() {
        let transport = Arc::new(server());
        let store = store_with(Some(("A1", "R1")));
        let client = SessionClient::new(transport.clone(), store.clone());

        let resp = client.request(ApiRequest::post("/ai/chat")).await.unwrap();
        assert_eq!(resp.text(), r#"{"ai_response":"hey"}"#);

        let seen = transport.requests();
        let paths: Vec<_> = seen.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, ["/ai/chat", REFRESH_PATH, "/ai/chat"]);
        assert_eq!(seen[0].authorization(), Some("Bearer A1"));
        assert_eq!(seen[2].authorization(), Some("Bearer A2"));
        assert!(seen[2].is_retried());
        assert_eq!(store.get().unwrap(), Credentials::new("A2", "R1"));
    }

    #[tokio::test]
    async fn second_rejection_is_not_refreshed_again() {
        let transport = Arc::new(FakeTransport::new(|req| {
            if req.path == REFRESH_PATH {
                (StatusCode::OK, r#"{"access_token":"A2"}"#.into())
            } else {
                (StatusCode::UNAUTHORIZED, String::new())
            }
        }));
        let client = SessionClient::new(transport.clone(), store_with(Some(("A1", "R1"))));

        let err = client.request(ApiRequest::get("/personas/")).await.unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(transport.calls_to(REFRESH_PATH), 1);
        assert_eq!(transport.calls_to("/personas/"), 2);
    }

    #[tokio::test]
    async fn failed_refresh_logs_out_without_replay() {
        let transport =
            Arc::new(FakeTransport::new(|_| (StatusCode::UNAUTHORIZED, String::new())));
        let store = store_with(Some(("A1", "BAD")));
        let client = SessionClient::new(transport.clone(), store.clone());
        let state = client.refresher().subscribe();

        let err = client.request(ApiRequest::post("/ai/chat")).await.unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(transport.calls_to("/ai/chat"), 1);
        assert_eq!(transport.calls_to(REFRESH_PATH), 1);
        assert!(!store.get().unwrap().is_authenticated());
        assert_eq!(*state.borrow(), SessionState::LoggedOut);
    }

    #[tokio::test]
    async fn other_failures_pass_through() {
        let transport =
            Arc::new(FakeTransport::new(|_| (StatusCode::UNPROCESSABLE_ENTITY, "bad".into())));
        let client = SessionClient::new(transport.clone(), store_with(Some(("A1", "R1"))));

        let err = client.request(ApiRequest::post("/personas/")).await.unwrap_err();
        assert!(matches!(err, ClientError::Status { .. }));
        assert!(err.is_validation());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_rejections_share_one_refresh() {
        let transport = Arc::new(server());
        let store = store_with(Some(("A1", "R1")));
        let client = SessionClient::new(transport.clone(), store);

        let (a, b) = tokio::join!(
            client.request(ApiRequest::post("/ai/chat")),
            client.request(ApiRequest::get("/ai/history")),
        );
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(transport.calls_to(REFRESH_PATH), 1);
    }

    #[tokio::test]
    async fn caller_supplied_bearer_is_refreshed_and_replayed() {
        let transport = Arc::new(server());
        let store = store_with(Some(("A1", "R1")));
        let client = SessionClient::new(transport.clone(), store.clone());

        let req = ApiRequest::post("/ai/chat").bearer("A1-OLD").unwrap();
        let resp = client.request(req).await.unwrap();
        assert_eq!(resp.status, StatusCode::OK);

        let seen = transport.requests();
        let paths: Vec<_> = seen.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, ["/ai/chat", REFRESH_PATH, "/ai/chat"]);
        assert_eq!(seen[0].authorization(), Some("Bearer A1-OLD"));
        assert_eq!(seen[2].authorization(), Some("Bearer A2"));
        assert_eq!(store.get().unwrap(), Credentials::new("A2", "R1"));
    }

    #[tokio::test]
    async fn logout_during_refresh_is_not_undone() {
        let store = store_with(Some(("A1", "R1")));
        let during = store.clone();
        let transport = Arc::new(FakeTransport::new(move |req| {
            if req.path == REFRESH_PATH {
                during.clear().unwrap();
                return (StatusCode::OK, r#"{"access_token":"A2"}"#.into());
            }
            match req.authorization() {
                Some("Bearer A2") => (StatusCode::OK, r#"{"history":[]}"#.into()),
                _ => (StatusCode::UNAUTHORIZED, r#"{"detail":"expired"}"#.into()),
            }
        }));
        let client = SessionClient::new(transport.clone(), store.clone());
        let state = client.refresher().subscribe();

        let err = client.request(ApiRequest::get("/ai/history")).await.unwrap_err();
        assert!(err.is_unauthorized());
        assert!(!store.get().unwrap().is_authenticated());
        assert_eq!(transport.calls_to("/ai/history"), 1);
        assert_eq!(transport.calls_to(REFRESH_PATH), 1);
        assert_eq!(*state.borrow(), SessionState::LoggedOut);
    }
}
