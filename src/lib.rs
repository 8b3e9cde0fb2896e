//! Session and conversation core of the persona chat client.
//!
//! [`api::session::SessionClient`] attaches credentials to every call and
//! recovers once from an expired access token. [`cache::ConversationCache`]
//! keeps per-contact history, hydrated from the server at most once per
//! session and persisted locally. [`app::Session`] ties both to durable
//! storage for the view layer.

pub mod api;
pub mod app;
pub mod cache;
pub mod chat;
pub mod contacts;
pub mod error;
pub mod storage;
pub mod utils;

pub use app::{AppConfig, Session};
pub use error::{ClientError, Result};
