use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    /// Present only when the server rotates refresh tokens.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SignUpRequest<'a> {
    pub email: &'a str,
    pub username: &'a str,
    pub password: &'a str,
    pub country: &'a str,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub country: String,
}

#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub message: &'a str,
    pub persona: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub ai_response: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HistoryAuthor {
    Ai,
    User,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    pub from: HistoryAuthor,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryResponse {
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExampleMessage {
    pub input: String,
    pub output: String,
}

/// Body for persona create.
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct PersonaInput {
    pub name: String,
    pub system_prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub example_messages: Vec<ExampleMessage>,
}

/// Body for persona update. Only the fields that are set are sent.
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct PersonaUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example_messages: Option<Vec<ExampleMessage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PersonaRecord {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub example_messages: Vec<ExampleMessage>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PersonaListItem {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct PersonaList {
    pub personas: Vec<PersonaListItem>,
    #[serde(default)]
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct PersonaDeleted {
    pub message: String,
    pub deleted_persona_id: i64,
}

fn default_active() -> bool {
    true
}
