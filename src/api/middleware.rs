//! Request layers applied, in order, before every dispatch.
//!
//! A layer sees the outgoing request and the credentials read for this
//! dispatch, and returns the request to send. Layers hold no per-request
//! state, so a replay after a refresh simply runs the chain again.

use super::transport::{bearer_value, ApiRequest};
use crate::error::Result;
use crate::storage::Credentials;
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};

pub trait RequestLayer: Send + Sync {
    fn apply(&self, req: ApiRequest, creds: &Credentials) -> Result<ApiRequest>;
}

/// Accept JSON and identify the client, unless the caller set these already.
pub struct DefaultHeaders {
    user_agent: HeaderValue,
}

impl DefaultHeaders {
    pub fn new() -> Self {
        Self {
            user_agent: HeaderValue::from_static(concat!(
                "persona-chat/",
                env!("CARGO_PKG_VERSION")
            )),
        }
    }
}

impl Default for DefaultHeaders {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestLayer for DefaultHeaders {
    fn apply(&self, mut req: ApiRequest, _creds: &Credentials) -> Result<ApiRequest> {
        req.headers
            .entry(ACCEPT)
            .or_insert(HeaderValue::from_static("application/json"));
        req.headers.entry(USER_AGENT).or_insert(self.user_agent.clone());
        Ok(req)
    }
}

/// Attaches `Authorization: Bearer <access>` when logged in and the caller
/// did not supply its own authorization header.
pub struct BearerAuth;

impl RequestLayer for BearerAuth {
    fn apply(&self, mut req: ApiRequest, creds: &Credentials) -> Result<ApiRequest> {
        if req.has_authorization() {
            return Ok(req);
        }
        if let Some(token) = creds.access() {
            req.headers.insert(AUTHORIZATION, bearer_value(token)?);
        }
        Ok(req)
    }
}

pub fn default_chain() -> Vec<Box<dyn RequestLayer>> {
    vec![Box::new(DefaultHeaders::new()), Box::new(BearerAuth)]
}

pub fn run_chain(
    layers: &[Box<dyn RequestLayer>],
    req: ApiRequest,
    creds: &Credentials,
) -> Result<ApiRequest> {
    layers.iter().try_fold(req, |req, layer| layer.apply(req, creds))
}
