use crate::api::models::{
    ExampleMessage, PersonaInput, PersonaListItem, PersonaRecord, PersonaUpdate,
};
use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Persona used when a contact has no usable name.
pub const FALLBACK_PERSONA: &str = "Alice";

const MAX_NAME: usize = 50;
const MIN_PROMPT: usize = 10;
const MAX_PROMPT: usize = 2000;
const MAX_DESCRIPTION: usize = 500;
const MAX_EXAMPLES: usize = 20;
const MAX_EXAMPLE_INPUT: usize = 500;
const MAX_EXAMPLE_OUTPUT: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(String);

impl ContactId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for ContactId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustomPersona {
    pub persona_id: i64,
    pub active: bool,
}

/// A chat counterpart: one of the built-in personas or one the user authored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub id: ContactId,
    pub display_name: String,
    pub avatar_ref: Option<String>,
    pub custom: Option<CustomPersona>,
}

impl Contact {
    pub fn builtin(name: &str) -> Self {
        Self {
            id: ContactId::new(name.trim().to_lowercase()),
            display_name: name.trim().to_string(),
            avatar_ref: None,
            custom: None,
        }
    }

    pub fn is_custom(&self) -> bool {
        self.custom.is_some()
    }

    /// Soft-deleted custom personas are inactive; built-ins always are active.
    pub fn is_active(&self) -> bool {
        self.custom.map_or(true, |c| c.active)
    }

    pub fn persona_id(&self) -> Option<i64> {
        self.custom.map(|c| c.persona_id)
    }

    /// Name sent as `persona` to the chat endpoints.
    pub fn persona_name(&self) -> &str {
        let name = self.display_name.trim();
        if name.is_empty() { FALLBACK_PERSONA } else { name }
    }

    fn custom_id(persona_id: i64) -> ContactId {
        ContactId::new(format!("custom-{}", persona_id))
    }
}

impl From<&PersonaListItem> for Contact {
    fn from(item: &PersonaListItem) -> Self {
        Self {
            id: Contact::custom_id(item.id),
            display_name: item.name.clone(),
            avatar_ref: item.avatar_url.clone(),
            custom: Some(CustomPersona { persona_id: item.id, active: item.is_active }),
        }
    }
}

impl From<&PersonaRecord> for Contact {
    fn from(rec: &PersonaRecord) -> Self {
        Self {
            id: Contact::custom_id(rec.id),
            display_name: rec.name.clone(),
            avatar_ref: rec.avatar_url.clone(),
            custom: Some(CustomPersona { persona_id: rec.id, active: rec.is_active }),
        }
    }
}

/// Contacts known to this session, built-ins first.
#[derive(Debug, Clone, Default)]
pub struct ContactBook {
    contacts: Vec<Contact>,
}

impl ContactBook {
    pub fn new(builtin_names: &[String]) -> Self {
        let contacts = builtin_names
            .iter()
            .filter(|n| !n.trim().is_empty())
            .map(|n| Contact::builtin(n))
            .collect();
        Self { contacts }
    }

    /// Replaces all custom contacts, keeping built-ins.
    pub fn set_custom(&mut self, items: &[PersonaListItem]) {
        self.contacts.retain(|c| !c.is_custom());
        self.contacts.extend(items.iter().map(Contact::from));
    }

    /// Default listing: soft-deleted contacts are left out.
    pub fn listing(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.iter().filter(|c| c.is_active())
    }

    pub fn all(&self) -> &[Contact] {
        &self.contacts
    }

    /// Resolves by id, including soft-deleted contacts, or by display name.
    pub fn find(&self, key: &str) -> Option<&Contact> {
        self.contacts
            .iter()
            .find(|c| c.id.as_str() == key)
            .or_else(|| self.contacts.iter().find(|c| c.display_name.eq_ignore_ascii_case(key)))
    }
}

/// Checks and normalizes a persona body the way the server would, so bad
/// input is reported before a round trip.
pub fn validate_persona(input: &PersonaInput) -> Result<PersonaInput> {
    let example_messages = input.example_messages.clone();
    check_examples(&example_messages)?;
    Ok(PersonaInput {
        name: check_name(&input.name)?,
        system_prompt: check_prompt(&input.system_prompt)?,
        description: check_description(input.description.as_deref())?,
        avatar_url: check_avatar(input.avatar_url.as_deref())?,
        example_messages,
    })
}

/// Same rules for a partial update; absent fields are left alone. An empty
/// description or avatar URL is sent as-is so the server can clear it.
pub fn validate_persona_update(update: &PersonaUpdate) -> Result<PersonaUpdate> {
    if let Some(examples) = &update.example_messages {
        check_examples(examples)?;
    }
    Ok(PersonaUpdate {
        name: update.name.as_deref().map(check_name).transpose()?,
        system_prompt: update.system_prompt.as_deref().map(check_prompt).transpose()?,
        description: match update.description.as_deref() {
            Some(d) => Some(check_description(Some(d))?.unwrap_or_default()),
            None => None,
        },
        avatar_url: match update.avatar_url.as_deref() {
            Some(url) => Some(check_avatar(Some(url))?.unwrap_or_default()),
            None => None,
        },
        example_messages: update.example_messages.clone(),
        is_active: update.is_active,
    })
}

fn check_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME {
        return Err(ClientError::Validation(format!("name must be 1-{} characters", MAX_NAME)));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '-' || c == '_')
    {
        return Err(ClientError::Validation(
            "name can only contain letters, numbers, spaces, hyphens, and underscores".into(),
        ));
    }
    Ok(name.to_string())
}

fn check_prompt(prompt: &str) -> Result<String> {
    let prompt = prompt.trim();
    let prompt_len = prompt.chars().count();
    if !(MIN_PROMPT..=MAX_PROMPT).contains(&prompt_len) {
        return Err(ClientError::Validation(format!(
            "system prompt must be {}-{} characters",
            MIN_PROMPT, MAX_PROMPT
        )));
    }
    Ok(prompt.to_string())
}

fn check_description(description: Option<&str>) -> Result<Option<String>> {
    let description = non_empty(description);
    if description.as_ref().is_some_and(|d| d.chars().count() > MAX_DESCRIPTION) {
        return Err(ClientError::Validation(format!(
            "description must be at most {} characters",
            MAX_DESCRIPTION
        )));
    }
    Ok(description)
}

fn check_avatar(avatar_url: Option<&str>) -> Result<Option<String>> {
    let avatar_url = non_empty(avatar_url);
    if let Some(url) = &avatar_url {
        if !(url.starts_with("http://") || url.starts_with("https://") || url.starts_with('/')) {
            return Err(ClientError::Validation(
                "avatar URL must be a valid URL or path starting with /".into(),
            ));
        }
    }
    Ok(avatar_url)
}

fn check_examples(examples: &[ExampleMessage]) -> Result<()> {
    if examples.len() > MAX_EXAMPLES {
        return Err(ClientError::Validation(format!(
            "at most {} example messages are allowed",
            MAX_EXAMPLES
        )));
    }
    for ex in examples {
        let (i, o) = (ex.input.chars().count(), ex.output.chars().count());
        if i == 0 || i > MAX_EXAMPLE_INPUT || o == 0 || o > MAX_EXAMPLE_OUTPUT {
            return Err(ClientError::Validation(format!(
                "example input must be 1-{} and output 1-{} characters",
                MAX_EXAMPLE_INPUT, MAX_EXAMPLE_OUTPUT
            )));
        }
    }
    Ok(())
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, name: &str, active: bool) -> PersonaListItem {
        PersonaListItem {
            id,
            name: name.into(),
            avatar_url: None,
            description: None,
            is_active: active,
        }
    }

    #[test]
    fn listing_hides_soft_deleted_but_find_does_not() {
        let mut book = ContactBook::new(&["Alice".to_string()]);
        book.set_custom(&[item(1, "Pirate", true), item(2, "Old Friend", false)]);

        let listed: Vec<_> = book.listing().map(|c| c.display_name.as_str()).collect();
        assert_eq!(listed, ["Alice", "Pirate"]);

        let gone = book.find("custom-2").unwrap();
        assert!(gone.is_custom());
        assert!(!gone.is_active());
        assert_eq!(book.find("alice").unwrap().id.as_str(), "alice");
        assert_eq!(book.find("pirate").unwrap().persona_id(), Some(1));
    }

    #[test]
    fn set_custom_keeps_builtins() {
        let mut book = ContactBook::new(&["Alice".to_string(), " ".to_string()]);
        book.set_custom(&[item(1, "Pirate", true)]);
        book.set_custom(&[item(3, "Chef", true)]);
        let ids: Vec<_> = book.all().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["alice", "custom-3"]);
    }

    #[test]
    fn empty_name_falls_back() {
        let mut c = Contact::builtin("Alice");
        c.display_name = "  ".into();
        assert_eq!(c.persona_name(), FALLBACK_PERSONA);
    }

    fn input() -> PersonaInput {
        PersonaInput {
            name: "  Captain_Bob-2 ".into(),
            system_prompt: "  You are a pirate captain.  ".into(),
            description: Some("".into()),
            avatar_url: Some("/avatars/bob.png".into()),
            example_messages: vec![ExampleMessage { input: "hi".into(), output: "arr".into() }],
        }
    }

    #[test]
    fn validation_normalizes() {
        let ok = validate_persona(&input()).unwrap();
        assert_eq!(ok.name, "Captain_Bob-2");
        assert_eq!(ok.system_prompt, "You are a pirate captain.");
        assert_eq!(ok.description, None);
        assert_eq!(ok.avatar_url.as_deref(), Some("/avatars/bob.png"));
    }

    #[test]
    fn validation_rejects_bad_fields() {
        let mut bad_name = input();
        bad_name.name = "Bob!".into();
        assert!(validate_persona(&bad_name).is_err());

        let mut short_prompt = input();
        short_prompt.system_prompt = "too short".into();
        assert!(validate_persona(&short_prompt).is_err());

        let mut bad_avatar = input();
        bad_avatar.avatar_url = Some("ftp://x".into());
        assert!(validate_persona(&bad_avatar).is_err());

        let mut many = input();
        let example = ExampleMessage { input: "a".into(), output: "b".into() };
        many.example_messages = vec![example; 21];
        assert!(validate_persona(&many).unwrap_err().is_validation());
    }

    #[test]
    fn partial_update_checks_only_present_fields() {
        let update = PersonaUpdate { is_active: Some(false), ..Default::default() };
        assert_eq!(validate_persona_update(&update).unwrap(), update);

        let renamed = PersonaUpdate {
            name: Some(" Chef_2 ".into()),
            description: Some("  ".into()),
            ..Default::default()
        };
        let ok = validate_persona_update(&renamed).unwrap();
        assert_eq!(ok.name.as_deref(), Some("Chef_2"));
        assert_eq!(ok.description.as_deref(), Some(""));
        assert_eq!(ok.system_prompt, None);

        let short = PersonaUpdate { system_prompt: Some("short".into()), ..Default::default() };
        assert!(validate_persona_update(&short).unwrap_err().is_validation());
        let avatar = PersonaUpdate { avatar_url: Some("ftp://x".into()), ..Default::default() };
        assert!(validate_persona_update(&avatar).is_err());
    }
}
