use crate::api::client::ApiClient;
use crate::api::transport::Transport;
use crate::cache::{ConversationCache, Message, Sender};
use crate::contacts::Contact;

pub const SEND_FAILED_TEXT: &str = "Failed to get response from server.";
pub const EMPTY_REPLY_TEXT: &str = "No response received.";

/// What the view does with the cache and the client. Holds no retry or
/// auth logic of its own.
pub struct ChatOrchestrator<'a, T> {
    api: &'a ApiClient<T>,
    cache: &'a ConversationCache,
}

impl<'a, T: Transport> ChatOrchestrator<'a, T> {
    pub fn new(api: &'a ApiClient<T>, cache: &'a ConversationCache) -> Self {
        Self { api, cache }
    }

    /// Opens a conversation, pulling history the first time.
    pub async fn select(&self, contact: &Contact) -> Vec<Message> {
        self.cache.ensure_hydrated(self.api, contact).await;
        self.cache.get_messages(&contact.id)
    }

    /// Appends the user's message right away, then the reply or an error
    /// notice. The user's message is never taken back. Returns the message
    /// that filled the reply slot, or `None` for blank input.
    ///
    /// The local copy is trimmed; the server gets the text as typed.
    pub async fn send(&self, contact: &Contact, text: &str) -> Option<Message> {
        let shown = text.trim();
        if shown.is_empty() {
            return None;
        }
        self.cache.append(&contact.id, Message::mine(shown));

        let reply = match self.api.send_message(contact, text).await {
            Ok(reply) if reply.trim().is_empty() => {
                Message::new(Sender::Contact(contact.id.clone()), EMPTY_REPLY_TEXT)
            }
            Ok(reply) => Message::new(Sender::Contact(contact.id.clone()), reply),
            Err(e) => {
                log::error!("Sending to {} failed: {}", contact.id, e);
                Message::system(SEND_FAILED_TEXT)
            }
        };
        self.cache.append(&contact.id, reply.clone());
        Some(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::session::SessionClient;
    use crate::api::testing::{store_with, FakeTransport};
    use crate::api::transport::{ApiRequest, Body};
    use crate::storage::KvStore;
    use reqwest::StatusCode;
    use std::sync::Arc;

    fn setup(
        handler: impl Fn(&ApiRequest) -> (StatusCode, String) + Send + Sync + 'static,
    ) -> (Arc<FakeTransport>, ApiClient<FakeTransport>, ConversationCache) {
        let transport = Arc::new(FakeTransport::new(handler));
        let store = store_with(Some(("A1", "R1")));
        let cache = ConversationCache::load(Arc::new(KvStore::open_in_memory().unwrap()));
        let api = ApiClient::new(SessionClient::new(transport.clone(), store));
        (transport, api, cache)
    }

    #[tokio::test]
    async fn reply_follows_optimistic_message() {
        let (transport, api, cache) =
            setup(|_| (StatusCode::OK, r#"{"ai_response":"hello!"}"#.into()));
        let chat = ChatOrchestrator::new(&api, &cache);
        let alice = Contact::builtin("Alice");

        let reply = chat.send(&alice, " hi ").await.unwrap();
        assert_eq!(reply.text, "hello!");
        let messages = cache.get_messages(&alice.id);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, Sender::Me);
        assert_eq!(messages[0].text, "hi");
        assert_eq!(messages[1].sender, Sender::Contact(alice.id.clone()));

        let sent = serde_json::json!({"message": " hi ", "persona": "Alice"});
        assert_eq!(transport.requests()[0].body, Some(Body::Json(sent)));
    }

    #[tokio::test]
    async fn failure_keeps_user_message_and_adds_notice() {
        let (_, api, cache) = setup(|_| (StatusCode::INTERNAL_SERVER_ERROR, String::new()));
        let chat = ChatOrchestrator::new(&api, &cache);
        let alice = Contact::builtin("Alice");

        let reply = chat.send(&alice, "hi").await.unwrap();
        assert_eq!(reply.sender, Sender::System);
        assert_eq!(reply.text, SEND_FAILED_TEXT);
        let messages = cache.get_messages(&alice.id);
        assert_eq!(messages[0].text, "hi");
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn empty_reply_gets_placeholder() {
        let (_, api, cache) = setup(|_| (StatusCode::OK, r#"{"ai_response":""}"#.into()));
        let chat = ChatOrchestrator::new(&api, &cache);
        let reply = chat.send(&Contact::builtin("Alice"), "hi").await.unwrap();
        assert_eq!(reply.text, EMPTY_REPLY_TEXT);
    }

    #[tokio::test]
    async fn blank_input_sends_nothing() {
        let (transport, api, cache) = setup(|_| (StatusCode::OK, "{}".into()));
        let chat = ChatOrchestrator::new(&api, &cache);
        assert!(chat.send(&Contact::builtin("Alice"), "   ").await.is_none());
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn history_failure_does_not_block_sending() {
        let (transport, api, cache) = setup(|req| match req.path.as_str() {
            "/ai/history" => (StatusCode::INTERNAL_SERVER_ERROR, String::new()),
            _ => (StatusCode::OK, r#"{"ai_response":"still here"}"#.into()),
        });
        let chat = ChatOrchestrator::new(&api, &cache);
        let alice = Contact::builtin("Alice");

        assert!(chat.select(&alice).await.is_empty());
        assert!(chat.select(&alice).await.is_empty());
        assert_eq!(transport.calls_to("/ai/history"), 1);
        assert_eq!(chat.send(&alice, "hi").await.unwrap().text, "still here");
    }
}
