//! Manduvi portal client library
//!
//! Session bootstrap, profile resolution and admin user management for the
//! Manduvi portal, backed by its Supabase-compatible services: auth,
//! PostgREST data access and privileged Edge Functions.
//!
//! The portal's rule of thumb is that an authenticated user always gets a
//! usable state: session fetches are retried, missing or unreachable
//! profile rows are replaced by a synthesized fallback, and a safety timer
//! guarantees the loading phase ends.

pub mod access;
pub mod admin;
pub mod config;
pub mod error;
pub mod profile;
pub mod retry;
pub mod session;
pub mod state;

use std::sync::Arc;

use reqwest::Client;

use manduvi_portal_auth::{AuthClient, AuthOptions};
use manduvi_portal_functions::FunctionsClient;
use manduvi_portal_postgrest::PostgrestClient;

use crate::admin::AdminUsersClient;
use crate::config::{ClientOptions, PortalConfig};
use crate::profile::ProfileResolver;
use crate::session::SessionManager;

pub use manduvi_portal_auth as auth;
pub use manduvi_portal_functions as functions;
pub use manduvi_portal_postgrest as postgrest;

/// The main entry point for the portal client
pub struct Portal {
    /// The base URL of the portal's backend project
    pub url: String,
    /// The anonymous API key
    pub key: String,
    /// HTTP client used for requests
    pub http_client: Client,
    /// Auth client holding the session cache and change feed
    pub auth: Arc<AuthClient>,
    /// Client options
    pub options: ClientOptions,
}

impl Portal {
    /// Create a new portal client
    ///
    /// # Arguments
    ///
    /// * `url` - The base URL of the backend project
    /// * `key` - The anonymous API key
    ///
    /// # Example
    ///
    /// ```
    /// use manduvi_portal::Portal;
    ///
    /// let portal = Portal::new("https://project.supabase.co", "anon-key");
    /// ```
    pub fn new(url: &str, key: &str) -> Self {
        Self::new_with_options(url, key, ClientOptions::default())
    }

    /// Create a new portal client with custom options
    ///
    /// # Example
    ///
    /// ```
    /// use manduvi_portal::Portal;
    /// use manduvi_portal::config::ClientOptions;
    ///
    /// let options = ClientOptions::default().with_auto_refresh_token(true);
    /// let portal = Portal::new_with_options(
    ///     "https://project.supabase.co",
    ///     "anon-key",
    ///     options,
    /// );
    /// ```
    pub fn new_with_options(url: &str, key: &str, options: ClientOptions) -> Self {
        let mut builder = Client::builder();
        if let Some(timeout) = options.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build().unwrap_or_else(|_| Client::new());

        let auth_options = AuthOptions {
            auto_refresh_token: options.auto_refresh_token,
            persist_session: options.persist_session,
        };

        let url = url.trim_end_matches('/');
        let auth = Arc::new(AuthClient::new(url, key, http_client.clone(), auth_options));

        Self {
            url: url.to_string(),
            key: key.to_string(),
            http_client,
            auth,
            options,
        }
    }

    /// Create a new portal client from a [`PortalConfig`], typically read
    /// from the environment
    ///
    /// # Example
    ///
    /// ```no_run
    /// use manduvi_portal::Portal;
    /// use manduvi_portal::config::PortalConfig;
    ///
    /// let config = PortalConfig::from_env().expect("missing portal environment");
    /// let portal = Portal::from_config(&config);
    /// ```
    pub fn from_config(config: &PortalConfig) -> Self {
        Self::new(&config.url, &config.anon_key)
    }

    /// Get a reference to the auth client
    pub fn auth(&self) -> &AuthClient {
        &self.auth
    }

    /// Create a query builder for a table or view
    ///
    /// # Example
    ///
    /// ```
    /// use manduvi_portal::Portal;
    ///
    /// let portal = Portal::new("https://project.supabase.co", "anon-key");
    /// let query = portal.from("users");
    /// ```
    pub fn from(&self, table: &str) -> PostgrestClient {
        PostgrestClient::new(&self.url, &self.key, table, self.http_client.clone())
    }

    /// Get a client for the portal's Edge Functions
    pub fn functions(&self) -> FunctionsClient {
        FunctionsClient::new(&self.url, &self.key, self.http_client.clone())
    }

    /// Create a profile resolver reading the configured profiles table
    pub fn profile_resolver(&self) -> ProfileResolver {
        ProfileResolver::new(
            &self.url,
            &self.key,
            self.http_client.clone(),
            &self.options.bootstrap.profiles_table,
        )
    }

    /// Create the session manager that owns the shared auth state
    ///
    /// Must be called from within a Tokio runtime: the manager spawns its
    /// auth-change listener on construction.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use manduvi_portal::Portal;
    ///
    /// # async fn run() {
    /// let portal = Portal::new("https://project.supabase.co", "anon-key");
    /// let sessions = portal.session_manager();
    /// let snapshot = sessions.bootstrap().await;
    /// println!("signed in: {}", snapshot.is_authenticated());
    /// # }
    /// ```
    pub fn session_manager(&self) -> SessionManager {
        SessionManager::new(
            self.auth.clone(),
            self.profile_resolver(),
            self.options.bootstrap.clone(),
        )
    }

    /// Get a client for the privileged admin user operations
    pub fn admin_users(&self) -> AdminUsersClient {
        AdminUsersClient::new(
            &self.url,
            &self.key,
            self.http_client.clone(),
            &self.options.bootstrap.activity_log_table,
        )
    }
}

/// A convenience module for common imports
pub mod prelude {
    pub use crate::access::{evaluate, AccessDecision, AccessRequirement};
    pub use crate::config::{BootstrapOptions, ClientOptions, PortalConfig};
    pub use crate::error::Error;
    pub use crate::profile::{AccountStatus, Profile, ProfileOrigin, Role};
    pub use crate::session::SessionManager;
    pub use crate::state::{AuthPhase, AuthSnapshot};
    pub use crate::Portal;
}
