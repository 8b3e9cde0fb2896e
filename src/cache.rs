use crate::api::client::ApiClient;
use crate::api::models::{HistoryAuthor, HistoryEntry};
use crate::api::transport::Transport;
use crate::contacts::{Contact, ContactId};
use crate::error::Result;
use crate::storage::{KvStore, CHAT_MESSAGES_KEY};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;

pub type Conversations = BTreeMap<ContactId, Vec<Message>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Sender {
    Me,
    /// Client-generated notices such as a failed send.
    System,
    Contact(ContactId),
}

impl From<String> for Sender {
    fn from(s: String) -> Self {
        match s.as_str() {
            "self" => Sender::Me,
            "system" => Sender::System,
            _ => Sender::Contact(ContactId::new(s)),
        }
    }
}

impl From<Sender> for String {
    fn from(s: Sender) -> Self {
        match s {
            Sender::Me => "self".into(),
            Sender::System => "system".into(),
            Sender::Contact(id) => id.as_str().to_string(),
        }
    }
}

/// Timestamps are for display only; order is insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: Sender,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self { sender, text: text.into(), timestamp: Utc::now() }
    }

    pub fn mine(text: impl Into<String>) -> Self {
        Self::new(Sender::Me, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Sender::System, text)
    }

    fn from_history(contact: &ContactId, entry: HistoryEntry) -> Self {
        let sender = match entry.from {
            HistoryAuthor::Ai => Sender::Contact(contact.clone()),
            HistoryAuthor::User => Sender::Me,
        };
        let timestamp = entry
            .timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);
        Self { sender, text: entry.content, timestamp }
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Where hydration pulls a contact's past messages from.
pub trait HistorySource: Send + Sync {
    fn fetch_history(
        &self,
        contact: &Contact,
    ) -> impl Future<Output = Result<Vec<HistoryEntry>>> + Send;
}

impl<T: Transport> HistorySource for ApiClient<T> {
    async fn fetch_history(&self, contact: &Contact) -> Result<Vec<HistoryEntry>> {
        self.history(contact, None).await
    }
}

/// Per-contact message lists, persisted as one JSON document under
/// `chat_messages` after every change.
pub struct ConversationCache {
    kv: Arc<KvStore>,
    conversations: Mutex<Conversations>,
    hydration: Mutex<HashMap<ContactId, Arc<OnceCell<()>>>>,
}

impl ConversationCache {
    /// Reads the persisted mapping once. Unreadable data starts an empty cache.
    pub fn load(kv: Arc<KvStore>) -> Self {
        let conversations = match kv.get(CHAT_MESSAGES_KEY) {
            Ok(Some(raw)) => from_json(&raw).unwrap_or_else(|e| {
                log::warn!("Discarding unreadable chat cache: {}", e);
                Conversations::new()
            }),
            Ok(None) => Conversations::new(),
            Err(e) => {
                log::warn!("Could not read chat cache: {}", e);
                Conversations::new()
            }
        };
        log::debug!("Loaded {} cached conversations", conversations.len());
        Self {
            kv,
            conversations: Mutex::new(conversations),
            hydration: Mutex::new(HashMap::new()),
        }
    }

    fn conversations(&self) -> MutexGuard<'_, Conversations> {
        self.conversations.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn get_messages(&self, contact: &ContactId) -> Vec<Message> {
        self.conversations().get(contact).cloned().unwrap_or_default()
    }

    pub fn snapshot(&self) -> Conversations {
        self.conversations().clone()
    }

    pub fn append(&self, contact: &ContactId, message: Message) {
        let mut all = self.conversations();
        all.entry(contact.clone()).or_default().push(message);
        self.persist(&all);
    }

    /// Fetches a contact's history the first time it is asked for in this
    /// session. Concurrent callers wait on the same fetch. A failed fetch
    /// still counts, leaving the conversation local-only.
    pub async fn ensure_hydrated<S: HistorySource>(&self, source: &S, contact: &Contact) {
        let cell = {
            let mut guard = self.hydration.lock().unwrap_or_else(|p| p.into_inner());
            guard.entry(contact.id.clone()).or_default().clone()
        };
        cell.get_or_init(|| async {
            log::debug!("Hydrating conversation with {}", contact.id);
            match source.fetch_history(contact).await {
                Ok(entries) => self.seed(&contact.id, entries),
                Err(e) => {
                    log::warn!("History for {} unavailable, starting empty: {}", contact.id, e)
                }
            }
        })
        .await;
    }

    pub fn is_hydrated(&self, contact: &ContactId) -> bool {
        self.hydration
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(contact)
            .is_some_and(|cell| cell.initialized())
    }

    /// Forgets which contacts were hydrated, for the next session.
    pub fn reset_hydration(&self) {
        self.hydration.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    fn seed(&self, contact: &ContactId, entries: Vec<HistoryEntry>) {
        let mut all = self.conversations();
        if all.get(contact).is_some_and(|local| !local.is_empty()) {
            log::debug!("{} already has local messages, ignoring server history", contact);
            return;
        }
        if entries.is_empty() {
            return;
        }
        let seeded = entries.into_iter().map(|e| Message::from_history(contact, e)).collect();
        all.insert(contact.clone(), seeded);
        self.persist(&all);
    }

    fn persist(&self, all: &Conversations) {
        let result = to_json(all).and_then(|json| self.kv.set(CHAT_MESSAGES_KEY, &json));
        if let Err(e) = result {
            log::error!("Failed to persist chat cache: {}", e);
        }
    }
}

pub fn to_json(conversations: &Conversations) -> Result<String> {
    Ok(serde_json::to_string(conversations)?)
}

pub fn from_json(raw: &str) -> Result<Conversations> {
    Ok(serde_json::from_str(raw)?)
}
