//! Auth client for the Manduvi portal.
//!
//! This crate wraps the portal's GoTrue-compatible `/auth/v1` surface:
//! credential flows, an in-memory session cache with refresh-on-read, and
//! a broadcast feed of auth-state changes that the portal's session layer
//! subscribes to.

use chrono::{DateTime, Utc};
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;

/// Error type
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Missing session")]
    MissingSession,

    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

/// Identity record issued by the auth service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub app_metadata: Value,
    #[serde(default)]
    pub user_metadata: Value,
    pub email_confirmed_at: Option<DateTime<Utc>>,
    pub phone_confirmed_at: Option<DateTime<Utc>>,
    pub last_sign_in_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl User {
    /// Whether the auth service has confirmed this identity's email address.
    pub fn email_confirmed(&self) -> bool {
        self.email_confirmed_at.is_some()
    }
}

/// Access/refresh token pair with the identity it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub expires_at: Option<i64>,
    pub token_type: String,
    pub user: User,
}

impl Session {
    /// Whether the access token's lifetime has elapsed. A session with no
    /// known expiry is treated as live.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => Utc::now().timestamp() >= at,
            None => false,
        }
    }

    /// Fills `expires_at` when the server omitted it: the token's own `exp`
    /// claim wins, with `now + expires_in` as the last resort.
    fn ensure_expiry(&mut self) {
        if self.expires_at.is_none() {
            self.expires_at = token_expiry(&self.access_token)
                .or_else(|| Some(Utc::now().timestamp() + self.expires_in));
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    exp: i64,
}

/// Reads the `exp` claim out of a JWT without verifying its signature.
/// Only used to schedule refreshes, never to grant access.
fn token_expiry(access_token: &str) -> Option<i64> {
    let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;

    jsonwebtoken::decode::<TokenClaims>(
        access_token,
        &jsonwebtoken::DecodingKey::from_secret(&[]),
        &validation,
    )
    .ok()
    .map(|data| data.claims.exp)
}

/// Auth lifecycle events, in the wire vocabulary of the auth service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

/// Payload delivered to auth-state subscribers.
#[derive(Debug, Clone)]
pub struct AuthStateChange {
    pub event: AuthEvent,
    pub session: Option<Session>,
}

/// Outcome of a sign-up. The auth service only hands out a session when
/// email confirmation is disabled; otherwise the identity stays pending
/// until the confirmation link is followed.
#[derive(Debug, Clone)]
pub enum SignUp {
    Session(Session),
    ConfirmationPending(User),
}

/// Client options
#[derive(Debug, Clone)]
pub struct AuthOptions {
    pub auto_refresh_token: bool,
    pub persist_session: bool,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            auto_refresh_token: true,
            persist_session: true,
        }
    }
}

/// Auth client holding the session cache and the change feed.
pub struct AuthClient {
    url: String,
    key: String,
    http_client: Client,
    options: AuthOptions,
    current_session: Arc<RwLock<Option<Session>>>,
    events: broadcast::Sender<AuthStateChange>,
}

impl AuthClient {
    /// Creates a new auth client.
    pub fn new(url: &str, key: &str, http_client: Client, options: AuthOptions) -> Self {
        let (events, _) = broadcast::channel(32);

        Self {
            url: url.to_string(),
            key: key.to_string(),
            http_client,
            options,
            current_session: Arc::new(RwLock::new(None)),
            events,
        }
    }

    /// Subscribes to auth-state changes. Every sign-in, sign-out and token
    /// refresh is mirrored here, including refreshes triggered internally
    /// by [`current_session`](Self::current_session).
    pub fn on_auth_state_change(&self) -> broadcast::Receiver<AuthStateChange> {
        self.events.subscribe()
    }

    /// Registers a new identity.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        data: Option<Value>,
    ) -> Result<SignUp, AuthError> {
        let url = format!("{}/auth/v1/signup", self.url);

        let mut payload = serde_json::json!({
            "email": email,
            "password": password,
        });
        if let Some(data) = data {
            payload["data"] = data;
        }

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body: Value = response.json().await?;
        if body.get("access_token").is_some() {
            let mut session: Session = serde_json::from_value(body)?;
            session.ensure_expiry();
            self.store_session(&session);
            self.emit(AuthEvent::SignedIn, Some(session.clone()));
            Ok(SignUp::Session(session))
        } else {
            let user: User = serde_json::from_value(body)?;
            debug!("sign-up for {} pending email confirmation", email);
            Ok(SignUp::ConfirmationPending(user))
        }
    }

    /// Signs in with email and password.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let url = format!("{}/auth/v1/token?grant_type=password", self.url);

        let payload = serde_json::json!({
            "email": email,
            "password": password,
        });

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let mut session: Session = response.json().await?;
        session.ensure_expiry();
        self.store_session(&session);
        self.emit(AuthEvent::SignedIn, Some(session.clone()));

        Ok(session)
    }

    /// Returns the cached session without touching the network.
    pub fn get_session(&self) -> Option<Session> {
        let read_guard = self.current_session.read().unwrap();
        read_guard.clone()
    }

    /// Seeds the session cache, typically from persisted tokens, without
    /// emitting a change event; the next bootstrap picks it up.
    pub fn set_session(&self, mut session: Session) {
        session.ensure_expiry();
        let mut write_guard = self.current_session.write().unwrap();
        *write_guard = Some(session);
    }

    /// Returns the current session, refreshing it first when the cached one
    /// has expired.
    ///
    /// `Ok(None)` means nobody is signed in. An `Err` only happens on the
    /// refresh path and is worth retrying; the caller decides how often.
    pub async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        let cached = self.get_session();

        match cached {
            None => Ok(None),
            Some(session) if !session.is_expired() => Ok(Some(session)),
            Some(session) => {
                if !self.options.auto_refresh_token {
                    debug!("cached session expired with auto-refresh disabled; discarding");
                    let mut write_guard = self.current_session.write().unwrap();
                    *write_guard = None;
                    return Ok(None);
                }

                debug!("cached session expired; refreshing");
                let refreshed = self.refresh_with_token(&session.refresh_token).await?;
                Ok(Some(refreshed))
            }
        }
    }

    /// Exchanges the cached refresh token for a new session.
    pub async fn refresh_session(&self) -> Result<Session, AuthError> {
        let session = self.get_session().ok_or(AuthError::MissingSession)?;
        self.refresh_with_token(&session.refresh_token).await
    }

    async fn refresh_with_token(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let url = format!("{}/auth/v1/token?grant_type=refresh_token", self.url);

        let payload = serde_json::json!({
            "refresh_token": refresh_token,
        });

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let mut session: Session = response.json().await?;
        session.ensure_expiry();
        self.store_session(&session);
        self.emit(AuthEvent::TokenRefreshed, Some(session.clone()));

        Ok(session)
    }

    /// Fetches the identity behind the cached session from the auth service.
    pub async fn get_user(&self) -> Result<User, AuthError> {
        let session = self.get_session().ok_or(AuthError::MissingSession)?;

        let url = format!("{}/auth/v1/user", self.url);

        let response = self
            .http_client
            .get(&url)
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let user: User = response.json().await?;

        Ok(user)
    }

    /// Updates the signed-in user's attributes (email, password, metadata).
    /// The cached session adopts the returned identity and subscribers hear
    /// about it as a [`AuthEvent::UserUpdated`] change.
    pub async fn update_user(&self, attributes: Value) -> Result<User, AuthError> {
        let mut session = self.get_session().ok_or(AuthError::MissingSession)?;

        let url = format!("{}/auth/v1/user", self.url);

        let response = self
            .http_client
            .put(&url)
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .header("Content-Type", "application/json")
            .json(&attributes)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let user: User = response.json().await?;

        session.user = user.clone();
        self.store_session(&session);
        self.emit(AuthEvent::UserUpdated, Some(session));

        Ok(user)
    }

    /// Signs out. The local session is dropped and the change event fires
    /// even when the server call fails, so the rest of the portal never
    /// keeps acting on revoked credentials.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let session = match self.get_session() {
            Some(session) => session,
            None => {
                self.emit(AuthEvent::SignedOut, None);
                return Ok(());
            }
        };

        let url = format!("{}/auth/v1/logout", self.url);

        let result = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .send()
            .await;

        {
            let mut write_guard = self.current_session.write().unwrap();
            *write_guard = None;
        }
        self.emit(AuthEvent::SignedOut, None);

        let response = result?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        Ok(())
    }

    /// Sends a password recovery email.
    pub async fn reset_password_for_email(&self, email: &str) -> Result<(), AuthError> {
        let url = format!("{}/auth/v1/recover", self.url);

        let payload = serde_json::json!({
            "email": email,
        });

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        Ok(())
    }

    fn store_session(&self, session: &Session) {
        if self.options.persist_session {
            let mut write_guard = self.current_session.write().unwrap();
            *write_guard = Some(session.clone());
        }
    }

    fn emit(&self, event: AuthEvent, session: Option<Session>) {
        // A send error just means nobody is subscribed yet.
        let _ = self.events.send(AuthStateChange { event, session });
    }

    /// Maps an error response to the message the auth service put in it.
    /// Credential-shaped failures get their own variant so callers can show
    /// them to the user instead of treating them as infrastructure faults.
    async fn error_from_response(response: reqwest::Response) -> AuthError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        let message = match serde_json::from_str::<Value>(&text) {
            Ok(body) => body
                .get("msg")
                .or_else(|| body.get("error_description"))
                .or_else(|| body.get("message"))
                .or_else(|| body.get("error"))
                .and_then(Value::as_str)
                .map(|s| s.to_string())
                .unwrap_or(text),
            Err(_) => text,
        };

        match status.as_u16() {
            400 | 401 | 403 | 422 => AuthError::AuthenticationError(message),
            _ => AuthError::ApiError(message),
        }
    }
}
