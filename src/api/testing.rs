use super::transport::{ApiRequest, ApiResponse, Transport};
use crate::error::Result;
use crate::storage::{CredentialStore, Credentials, KvStore};
use reqwest::StatusCode;
use std::sync::{Arc, Mutex};

type Handler = Box<dyn Fn(&ApiRequest) -> (StatusCode, String) + Send + Sync>;

/// Records every request and answers from a closure. Yields once before
/// answering so concurrent callers interleave like real network calls.
pub(crate) struct FakeTransport {
    handler: Handler,
    seen: Mutex<Vec<ApiRequest>>,
}

impl FakeTransport {
    pub(crate) fn new(
        handler: impl Fn(&ApiRequest) -> (StatusCode, String) + Send + Sync + 'static,
    ) -> Self {
        Self { handler: Box::new(handler), seen: Mutex::new(Vec::new()) }
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub(crate) fn calls_to(&self, path: &str) -> usize {
        self.seen.lock().unwrap().iter().filter(|r| r.path == path).count()
    }
}

impl Transport for FakeTransport {
    async fn execute(&self, req: &ApiRequest) -> Result<ApiResponse> {
        self.seen.lock().unwrap().push(req.clone());
        tokio::task::yield_now().await;
        let (status, body) = (self.handler)(req);
        Ok(ApiResponse::new(status, body))
    }
}

pub(crate) fn store_with(tokens: Option<(&str, &str)>) -> CredentialStore {
    let store = CredentialStore::new(Arc::new(KvStore::open_in_memory().unwrap()));
    if let Some((access, refresh)) = tokens {
        store.set(&Credentials::new(access, refresh)).unwrap();
    }
    store
}
