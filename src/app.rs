use crate::api::client::ApiClient;
use crate::api::refresh::SessionState;
use crate::api::session::SessionClient;
use crate::api::transport::{HttpTransport, Transport};
use crate::cache::ConversationCache;
use crate::chat::ChatOrchestrator;
use crate::contacts::ContactBook;
use crate::error::{ClientError, Result};
use crate::storage::{default_db_path, CredentialStore, KvStore};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub base_url: String,
    pub data_dir: Option<PathBuf>,
    pub request_timeout_secs: u64,
    pub default_personas: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            data_dir: None,
            request_timeout_secs: 30,
            default_personas: vec![crate::contacts::FALLBACK_PERSONA.to_string()],
        }
    }
}

impl AppConfig {
    fn toml_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        Some(base.config_dir().join("persona-chat").join("config.toml"))
    }

    pub fn load() -> Self {
        match Self::toml_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Missing or unreadable files yield the defaults.
    pub fn load_from(path: &Path) -> Self {
        let Ok(text) = fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str::<AppConfig>(&text) {
            Ok(cfg) => cfg,
            Err(e) => {
                log::warn!("Ignoring unreadable config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::toml_path()
            .ok_or_else(|| ClientError::Config("no config dir".into()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn db_path(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.join("session.sqlite")),
            None => default_db_path().ok_or_else(|| ClientError::Config("no data dir".into())),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Everything one signed-in user session owns. Built once at startup from
/// durable storage and handed by reference to the view.
pub struct Session<T> {
    api: ApiClient<T>,
    cache: ConversationCache,
    contacts: ContactBook,
}

impl Session<HttpTransport> {
    pub fn open(config: &AppConfig) -> Result<Self> {
        let base_url = crate::utils::normalize_url(&config.base_url);
        let transport = Arc::new(HttpTransport::new(&base_url, config.timeout())?);
        let kv = Arc::new(KvStore::open(&config.db_path()?)?);
        log::info!("Session store at {}", config.db_path()?.display());
        Ok(Self::with_transport(transport, kv, &config.default_personas))
    }
}

impl<T: Transport> Session<T> {
    pub fn with_transport(
        transport: Arc<T>,
        kv: Arc<KvStore>,
        default_personas: &[String],
    ) -> Self {
        let store = CredentialStore::new(kv.clone());
        let api = ApiClient::new(SessionClient::new(transport, store));
        let cache = ConversationCache::load(kv);
        Self { api, cache, contacts: ContactBook::new(default_personas) }
    }

    pub fn api(&self) -> &ApiClient<T> {
        &self.api
    }

    pub fn cache(&self) -> &ConversationCache {
        &self.cache
    }

    pub fn contacts(&self) -> &ContactBook {
        &self.contacts
    }

    pub fn chat(&self) -> ChatOrchestrator<'_, T> {
        ChatOrchestrator::new(&self.api, &self.cache)
    }

    pub fn state(&self) -> SessionState {
        self.api.session().refresher().state()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.api.session().refresher().subscribe()
    }

    pub async fn log_in(&self, email: &str, password: &str) -> Result<()> {
        self.api.log_in(email, password).await?;
        self.cache.reset_hydration();
        Ok(())
    }

    /// Drops credentials and per-session hydration state. Cached
    /// conversations stay on disk.
    pub fn log_out(&self) {
        self.api.log_out();
        self.cache.reset_hydration();
    }

    /// Reloads custom personas into the contact book. Soft-deleted ones are
    /// kept so their history stays reachable.
    pub async fn refresh_contacts(&mut self) -> Result<()> {
        let list = self.api.personas(true).await?;
        log::debug!("Fetched {} custom personas", list.personas.len());
        self.contacts.set_custom(&list.personas);
        Ok(())
    }
}
