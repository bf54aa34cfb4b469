//! Configuration options for the portal client

use std::env;
use std::time::Duration;

use url::Url;

use crate::error::Error;

/// Configuration options for the portal client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Whether to automatically refresh the token
    pub auto_refresh_token: bool,

    /// Whether to keep the session cached between calls
    pub persist_session: bool,

    /// The request timeout
    pub request_timeout: Option<Duration>,

    /// Knobs for the session bootstrap flow
    pub bootstrap: BootstrapOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            auto_refresh_token: true,
            persist_session: true,
            request_timeout: Some(Duration::from_secs(30)),
            bootstrap: BootstrapOptions::default(),
        }
    }
}

impl ClientOptions {
    /// Set whether to automatically refresh the token
    pub fn with_auto_refresh_token(mut self, value: bool) -> Self {
        self.auto_refresh_token = value;
        self
    }

    /// Set whether to persist the session
    pub fn with_persist_session(mut self, value: bool) -> Self {
        self.persist_session = value;
        self
    }

    /// Set the request timeout
    pub fn with_request_timeout(mut self, value: Option<Duration>) -> Self {
        self.request_timeout = value;
        self
    }

    /// Set the bootstrap options
    pub fn with_bootstrap(mut self, value: BootstrapOptions) -> Self {
        self.bootstrap = value;
        self
    }
}

/// Knobs for the session bootstrap flow.
///
/// One configurable bootstrap replaces the divergent copies of this logic
/// the portal's screens used to carry; tests shrink the delays, production
/// keeps the defaults.
#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    /// How many times the initial session fetch is attempted
    pub session_attempts: u32,

    /// Base for the linear backoff between attempts (base x attempt)
    pub backoff_base: Duration,

    /// Backstop that forces the loading flag off if nothing else has
    pub safety_timeout: Duration,

    /// Table the profile resolver reads
    pub profiles_table: String,

    /// Table receiving admin activity entries
    pub activity_log_table: String,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            session_attempts: 3,
            backoff_base: Duration::from_secs(1),
            safety_timeout: Duration::from_secs(30),
            profiles_table: "users".to_string(),
            activity_log_table: "admin_activity_log".to_string(),
        }
    }
}

impl BootstrapOptions {
    /// Set how many times the initial session fetch is attempted
    pub fn with_session_attempts(mut self, value: u32) -> Self {
        self.session_attempts = value;
        self
    }

    /// Set the base for the linear backoff between attempts
    pub fn with_backoff_base(mut self, value: Duration) -> Self {
        self.backoff_base = value;
        self
    }

    /// Set the loading-flag backstop
    pub fn with_safety_timeout(mut self, value: Duration) -> Self {
        self.safety_timeout = value;
        self
    }

    /// Set the table the profile resolver reads
    pub fn with_profiles_table(mut self, value: &str) -> Self {
        self.profiles_table = value.to_string();
        self
    }

    /// Set the table receiving admin activity entries
    pub fn with_activity_log_table(mut self, value: &str) -> Self {
        self.activity_log_table = value.to_string();
        self
    }
}

/// Connection settings for a portal backend, usually read from the
/// environment.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    /// Project base URL
    pub url: String,

    /// Anonymous API key
    pub anon_key: String,
}

impl PortalConfig {
    /// Creates a config after checking the URL is well formed.
    pub fn new(url: &str, anon_key: &str) -> Result<Self, Error> {
        Url::parse(url).map_err(|_| Error::config(format!("invalid portal URL: {}", url)))?;

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        })
    }

    /// Reads `SUPABASE_URL` and `SUPABASE_ANON_KEY` from the environment.
    pub fn from_env() -> Result<Self, Error> {
        let url = env::var("SUPABASE_URL")
            .map_err(|_| Error::config("SUPABASE_URL must be set"))?;
        let anon_key = env::var("SUPABASE_ANON_KEY")
            .map_err(|_| Error::config("SUPABASE_ANON_KEY must be set"))?;

        Self::new(&url, &anon_key)
    }
}
