use super::models::{
    ChatRequest, ChatResponse, HistoryEntry, HistoryResponse, LoginResponse, PersonaDeleted,
    PersonaInput, PersonaList, PersonaRecord, PersonaUpdate, SignUpRequest, UserProfile,
};
use super::session::SessionClient;
use super::transport::{ApiRequest, Transport};
use crate::contacts::{validate_persona, validate_persona_update, Contact};
use crate::error::{ClientError, Result};
use crate::storage::Credentials;

/// Typed calls against the chat server. Everything but log-in and sign-up
/// goes through the [`SessionClient`].
pub struct ApiClient<T> {
    session: SessionClient<T>,
}

impl<T: Transport> ApiClient<T> {
    pub fn new(session: SessionClient<T>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &SessionClient<T> {
        &self.session
    }

    /// Exchanges email and password for tokens and stores them.
    pub async fn log_in(&self, email: &str, password: &str) -> Result<Credentials> {
        let req =
            ApiRequest::post("/log-in").form(&[("username", email), ("password", password)]);
        let resp: LoginResponse = self.session.request_unauthenticated(req).await?.json()?;
        let (Some(access), Some(refresh)) = (resp.access_token, resp.refresh_token) else {
            log::warn!("Log-in response is missing a token, nothing stored");
            return Err(ClientError::MissingToken);
        };
        let creds = Credentials::new(access, refresh);
        self.session.store().set(&creds)?;
        self.session.refresher().mark_authenticated();
        log::info!("Logged in as {}", email);
        Ok(creds)
    }

    pub fn log_out(&self) {
        log::info!("Logging out");
        self.session.refresher().invalidate();
    }

    pub async fn sign_up(
        &self,
        email: &str,
        username: &str,
        password: &str,
        country: &str,
    ) -> Result<UserProfile> {
        let body = SignUpRequest { email, username, password, country };
        let req = ApiRequest::post("/sign-up").json(&body)?;
        self.session.request_unauthenticated(req).await?.json()
    }

    /// Returns the AI reply text.
    pub async fn send_message(&self, contact: &Contact, message: &str) -> Result<String> {
        let mut req = ApiRequest::post("/ai/chat").json(&ChatRequest {
            message,
            persona: contact.persona_name(),
        })?;
        if let Some(id) = contact.persona_id() {
            req = req.query("custom_persona_id", id);
        }
        let resp: ChatResponse = self.session.request(req).await?.json()?;
        Ok(resp.ai_response)
    }

    pub async fn history(
        &self,
        contact: &Contact,
        session_id: Option<&str>,
    ) -> Result<Vec<HistoryEntry>> {
        let mut req = ApiRequest::get("/ai/history");
        if let Some(id) = contact.persona_id() {
            req = req.query("custom_persona_id", id);
        }
        req = req.query("persona", contact.persona_name());
        if let Some(sid) = session_id {
            req = req.query("session_id", sid);
        }
        let resp: HistoryResponse = self.session.request(req).await?.json()?;
        Ok(resp.history)
    }

    pub async fn personas(&self, include_inactive: bool) -> Result<PersonaList> {
        let req = ApiRequest::get("/personas/").query("include_inactive", include_inactive);
        self.session.request(req).await?.json()
    }

    pub async fn persona(&self, id: i64) -> Result<PersonaRecord> {
        self.session.request(ApiRequest::get(format!("/personas/{}", id))).await?.json()
    }

    pub async fn create_persona(&self, input: &PersonaInput) -> Result<PersonaRecord> {
        let body = validate_persona(input)?;
        let req = ApiRequest::post("/personas/").json(&body)?;
        self.session.request(req).await?.json()
    }

    /// Partial update; fields left as `None` keep their server-side value.
    pub async fn update_persona(&self, id: i64, update: &PersonaUpdate) -> Result<PersonaRecord> {
        let body = validate_persona_update(update)?;
        let req = ApiRequest::put(format!("/personas/{}", id)).json(&body)?;
        self.session.request(req).await?.json()
    }

    /// Soft delete; the persona stays addressable by id.
    pub async fn delete_persona(&self, id: i64) -> Result<PersonaDeleted> {
        self.session.request(ApiRequest::delete(format!("/personas/{}", id))).await?.json()
    }

    pub async fn activate_persona(&self, id: i64) -> Result<PersonaRecord> {
        self.session
            .request(ApiRequest::post(format!("/personas/{}/activate", id)))
            .await?
            .json()
    }
}
