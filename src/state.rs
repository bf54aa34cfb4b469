//! Shared auth-state container.
//!
//! Session, identity, profile and bootstrap progress live in a single
//! snapshot owned by the [`SessionStore`]. Every event source (bootstrap,
//! auth-change listener, safety timeout, explicit refresh) mutates through
//! its own entry point here, and each applied mutation broadcasts the new
//! snapshot to subscribers.
//!
//! Writes from async work carry the generation they were started under;
//! a write whose generation is no longer current is discarded, so a slow
//! lookup can never clobber the outcome of a newer one.

use std::sync::RwLock;

use log::{debug, warn};
use tokio::sync::broadcast;

use manduvi_portal_auth::{Session, User};

use crate::profile::{Profile, ProfileOrigin, Role};

/// Bootstrap progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    /// No bootstrap has run yet.
    Idle,
    /// A bootstrap or an explicit refresh is in flight.
    Loading,
    /// Terminal: signed in or anonymous, but usable either way.
    Ready,
}

/// Point-in-time view of the auth state.
#[derive(Debug, Clone)]
pub struct AuthSnapshot {
    pub phase: AuthPhase,
    pub session: Option<Session>,
    pub user: Option<User>,
    pub profile: Option<Profile>,
    /// Non-blocking, user-displayable failure note (session fetch
    /// exhaustion, rejected credentials). The portal stays usable.
    pub error: Option<String>,
    /// Set when the current profile is a fallback caused by a failing
    /// lookup rather than an absent row.
    pub degraded: bool,
    /// Monotonic counter identifying the event that produced this state.
    pub generation: u64,
}

impl AuthSnapshot {
    fn initial() -> Self {
        Self {
            phase: AuthPhase::Idle,
            session: None,
            user: None,
            profile: None,
            error: None,
            degraded: false,
            generation: 0,
        }
    }

    /// Whether the portal is still waiting for the auth state to settle.
    pub fn loading(&self) -> bool {
        self.phase == AuthPhase::Loading
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.profile.as_ref().map(|p| p.role), Some(Role::Admin))
    }
}

/// Owner of the mutable auth state.
pub struct SessionStore {
    inner: RwLock<AuthSnapshot>,
    changed: broadcast::Sender<AuthSnapshot>,
}

impl SessionStore {
    pub fn new() -> Self {
        let (changed, _) = broadcast::channel(32);

        Self {
            inner: RwLock::new(AuthSnapshot::initial()),
            changed,
        }
    }

    /// Current state, cloned out of the lock.
    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.read().unwrap().clone()
    }

    /// Subscribes to state changes. Every applied mutation is delivered;
    /// discarded stale writes are not.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthSnapshot> {
        self.changed.subscribe()
    }

    /// Claims a new generation and enters the loading phase. Used by the
    /// bootstrap and by explicit profile refreshes.
    pub fn begin_loading(&self) -> u64 {
        let mut generation = 0;
        self.apply(|state| {
            state.generation += 1;
            generation = state.generation;
            state.phase = AuthPhase::Loading;
            state.error = None;
        });
        generation
    }

    /// Claims a new generation for an auth-change event. The phase is left
    /// alone; events settle into readiness through their resolution.
    pub fn begin_event(&self) -> u64 {
        let mut generation = 0;
        self.apply(|state| {
            state.generation += 1;
            generation = state.generation;
            state.error = None;
        });
        generation
    }

    /// Records the fetched session (or its confirmed absence) for
    /// `generation`. Returns whether the write was applied.
    pub fn set_session(&self, generation: u64, session: Option<Session>) -> bool {
        self.apply_if_current(generation, |state| {
            state.user = session.as_ref().map(|s| s.user.clone());
            state.session = session;
        })
    }

    /// Adopts a resolved profile and leaves the loading phase.
    pub fn set_profile(&self, generation: u64, profile: Profile, origin: ProfileOrigin) -> bool {
        self.apply_if_current(generation, |state| {
            state.degraded = origin.is_degraded();
            state.profile = Some(profile);
            state.phase = AuthPhase::Ready;
        })
    }

    /// Terminal anonymous state: no session, no identity, no profile.
    pub fn set_anonymous(&self, generation: u64) -> bool {
        self.apply_if_current(generation, |state| {
            state.session = None;
            state.user = None;
            state.profile = None;
            state.degraded = false;
            state.phase = AuthPhase::Ready;
        })
    }

    /// Records a bootstrap failure. The user stays anonymous and the portal
    /// becomes usable with the error noted.
    pub fn fail_bootstrap(&self, generation: u64, message: impl Into<String>) -> bool {
        let message = message.into();
        self.apply_if_current(generation, |state| {
            state.session = None;
            state.user = None;
            state.profile = None;
            state.degraded = false;
            state.error = Some(message);
            state.phase = AuthPhase::Ready;
        })
    }

    /// Notes a user-facing error (a rejected sign-in, for example) without
    /// touching the rest of the state.
    pub fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.apply(|state| {
            state.error = Some(message);
        });
    }

    pub fn clear_error(&self) {
        let has_error = { self.inner.read().unwrap().error.is_some() };
        if has_error {
            self.apply(|state| {
                state.error = None;
            });
        }
    }

    /// Safety-timeout entry point: forces the ready state if the loading
    /// phase is still active. Returns whether this call performed the
    /// transition; later resolutions still apply, earlier ones already won.
    pub fn force_ready(&self) -> bool {
        let next = {
            let mut state = self.inner.write().unwrap();
            if state.phase != AuthPhase::Loading {
                return false;
            }
            state.phase = AuthPhase::Ready;
            state.clone()
        };

        warn!("auth bootstrap missed its deadline; forcing the ready state");
        let _ = self.changed.send(next);
        true
    }

    fn apply(&self, change: impl FnOnce(&mut AuthSnapshot)) {
        let next = {
            let mut state = self.inner.write().unwrap();
            change(&mut state);
            state.clone()
        };

        let _ = self.changed.send(next);
    }

    fn apply_if_current(&self, generation: u64, change: impl FnOnce(&mut AuthSnapshot)) -> bool {
        let next = {
            let mut state = self.inner.write().unwrap();
            if state.generation != generation {
                debug!(
                    "discarding stale write for generation {} (current {})",
                    generation, state.generation
                );
                return false;
            }
            change(&mut state);
            state.clone()
        };

        let _ = self.changed.send(next);
        true
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
