//! Session lifecycle: bootstrap, auth-change listening and the credential
//! flows the portal's screens call.
//!
//! The [`SessionManager`] owns the shared [`SessionStore`] and is the only
//! place that talks to the auth service on the portal's behalf. Its
//! bootstrap settles the initial state (session fetch with retries, profile
//! resolution, safety timeout), and a background listener keeps the store
//! in line with every later sign-in, sign-out and token refresh.

use std::sync::Arc;

use log::{debug, warn};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use manduvi_portal_auth::{AuthClient, AuthStateChange, Session, SignUp};

use crate::config::BootstrapOptions;
use crate::error::Error;
use crate::profile::ProfileResolver;
use crate::retry::{linear_backoff, retry_with_backoff};
use crate::state::{AuthSnapshot, SessionStore};

/// Message shown when the initial session fetch keeps failing. The portal
/// still loads; the user just is not signed in.
pub const SESSION_FETCH_ERROR: &str = "Erro ao verificar autenticação";

/// Aborts the auth-change listener task when dropped.
struct ListenerGuard {
    handle: JoinHandle<()>,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Coordinates the auth state for one portal client.
///
/// Created from within a Tokio runtime; the auth-change listener task is
/// spawned on construction and detached again when the manager is dropped.
pub struct SessionManager {
    auth: Arc<AuthClient>,
    store: Arc<SessionStore>,
    resolver: Arc<ProfileResolver>,
    options: BootstrapOptions,
    _listener: ListenerGuard,
}

impl SessionManager {
    pub fn new(auth: Arc<AuthClient>, resolver: ProfileResolver, options: BootstrapOptions) -> Self {
        let store = Arc::new(SessionStore::new());
        let resolver = Arc::new(resolver);

        let listener = spawn_listener(auth.on_auth_state_change(), store.clone(), resolver.clone());

        Self {
            auth,
            store,
            resolver,
            options,
            _listener: listener,
        }
    }

    /// Current auth state.
    pub fn snapshot(&self) -> AuthSnapshot {
        self.store.snapshot()
    }

    /// Subscribes to auth-state snapshots.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthSnapshot> {
        self.store.subscribe()
    }

    /// Settles the initial auth state and returns it.
    ///
    /// The session fetch is retried with a linear backoff; when every
    /// attempt fails the portal comes up anonymous with
    /// [`SESSION_FETCH_ERROR`] noted instead of staying stuck. A safety
    /// timer forces the loading phase off if resolution outlives
    /// [`BootstrapOptions::safety_timeout`].
    pub async fn bootstrap(&self) -> AuthSnapshot {
        let generation = self.store.begin_loading();
        let safety = self.spawn_safety_timeout();

        let auth = self.auth.clone();
        let fetched = retry_with_backoff(
            || {
                let auth = auth.clone();
                async move { auth.current_session().await }
            },
            self.options.session_attempts,
            linear_backoff(self.options.backoff_base),
        )
        .await;

        match fetched {
            Ok(Some(session)) => {
                debug!("bootstrap found a session for {}", session.user.id);
                self.store.set_session(generation, Some(session.clone()));
                let (profile, origin) = self
                    .resolver
                    .resolve(&session.user, Some(&session.access_token))
                    .await;
                self.store.set_profile(generation, profile, origin);
            }
            Ok(None) => {
                debug!("bootstrap found no session");
                self.store.set_anonymous(generation);
            }
            Err(err) => {
                warn!(
                    "session fetch failed after {} attempts: {}",
                    self.options.session_attempts, err
                );
                self.store.fail_bootstrap(generation, SESSION_FETCH_ERROR);
            }
        }

        // Settled on our own; the timer has nothing left to guard.
        safety.abort();
        self.store.snapshot()
    }

    /// Re-resolves the signed-in user's profile, re-entering the loading
    /// phase while the lookup runs. A no-op when nobody is signed in.
    pub async fn refresh_profile(&self) -> AuthSnapshot {
        let snapshot = self.store.snapshot();
        let user = match snapshot.user {
            Some(user) => user,
            None => return snapshot,
        };
        let token = snapshot.session.as_ref().map(|s| s.access_token.clone());

        let generation = self.store.begin_loading();
        let (profile, origin) = self.resolver.resolve(&user, token.as_deref()).await;
        self.store.set_profile(generation, profile, origin);

        self.store.snapshot()
    }

    /// Signs in and synchronizes the profiles table with the fresh session.
    /// The auth-change listener takes care of resolving the profile.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, Error> {
        self.store.clear_error();

        match self.auth.sign_in_with_password(email, password).await {
            Ok(session) => {
                if let Err(err) = self.resolver.ensure_row(&session).await {
                    warn!("profile row sync failed for {}: {}", session.user.id, err);
                }
                Ok(session)
            }
            Err(err) => {
                self.store.set_error(err.to_string());
                Err(err.into())
            }
        }
    }

    /// Registers a new identity. When the auth service hands back a live
    /// session (email confirmation disabled) the profiles table is
    /// synchronized right away.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        data: Option<Value>,
    ) -> Result<SignUp, Error> {
        self.store.clear_error();

        match self.auth.sign_up(email, password, data).await {
            Ok(outcome) => {
                if let SignUp::Session(session) = &outcome {
                    if let Err(err) = self.resolver.ensure_row(session).await {
                        warn!("profile row sync failed for {}: {}", session.user.id, err);
                    }
                }
                Ok(outcome)
            }
            Err(err) => {
                self.store.set_error(err.to_string());
                Err(err.into())
            }
        }
    }

    /// Signs out and settles the anonymous state immediately; the listener
    /// processes the same sign-out event idempotently.
    pub async fn sign_out(&self) -> Result<(), Error> {
        let result = self.auth.sign_out().await;

        let generation = self.store.begin_event();
        self.store.set_anonymous(generation);

        result.map_err(Error::from)
    }

    /// Sends the password recovery email.
    pub async fn reset_password(&self, email: &str) -> Result<(), Error> {
        self.auth
            .reset_password_for_email(email)
            .await
            .map_err(Error::from)
    }

    fn spawn_safety_timeout(&self) -> JoinHandle<()> {
        let store = self.store.clone();
        let deadline = self.options.safety_timeout;

        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            store.force_ready();
        })
    }
}

fn spawn_listener(
    mut changes: broadcast::Receiver<AuthStateChange>,
    store: Arc<SessionStore>,
    resolver: Arc<ProfileResolver>,
) -> ListenerGuard {
    let handle = tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => handle_change(&store, &resolver, change).await,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("auth-change listener lagged by {} events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    ListenerGuard { handle }
}

/// Mirrors one auth-state change into the store: a session-carrying event
/// re-resolves the profile, a session-less one settles the anonymous state.
async fn handle_change(store: &SessionStore, resolver: &ProfileResolver, change: AuthStateChange) {
    let generation = store.begin_event();

    match change.session {
        Some(session) => {
            debug!("auth change {:?} for {}", change.event, session.user.id);
            store.set_session(generation, Some(session.clone()));
            let (profile, origin) = resolver
                .resolve(&session.user, Some(&session.access_token))
                .await;
            store.set_profile(generation, profile, origin);
        }
        None => {
            debug!("auth change {:?} without a session", change.event);
            store.set_anonymous(generation);
        }
    }
}
