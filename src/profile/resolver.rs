//! Always-usable profile lookup.

use log::{debug, warn};
use reqwest::Client;

use manduvi_portal_auth::User;
use manduvi_portal_postgrest::{PostgrestClient, PostgrestError, CODE_UNDEFINED_TABLE};

use super::Profile;

/// Where a resolved profile came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileOrigin {
    /// The row stored in the profiles table.
    Stored,
    /// Synthesized: the backend answered but has no row for the identity
    /// yet, or the profiles table itself is missing.
    FallbackMissing,
    /// Synthesized: the lookup failed for a reason other than absence, so
    /// the stored role and status are unknown right now.
    FallbackDegraded,
}

impl ProfileOrigin {
    pub fn is_fallback(&self) -> bool {
        !matches!(self, ProfileOrigin::Stored)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, ProfileOrigin::FallbackDegraded)
    }
}

/// Resolves profiles for signed-in identities.
///
/// Resolution never fails: when the stored row cannot be produced the
/// resolver synthesizes [`Profile::fallback_for`] and reports why through
/// the [`ProfileOrigin`].
pub struct ProfileResolver {
    base_url: String,
    api_key: String,
    http_client: Client,
    table: String,
}

impl ProfileResolver {
    /// Creates a resolver reading from `table`.
    pub fn new(base_url: &str, api_key: &str, http_client: Client, table: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            http_client,
            table: table.to_string(),
        }
    }

    pub(super) fn query(&self) -> PostgrestClient {
        PostgrestClient::new(
            &self.base_url,
            &self.api_key,
            &self.table,
            self.http_client.clone(),
        )
    }

    /// Fetches the profile row for `user`, or synthesizes a fallback when
    /// the row is absent or the lookup fails.
    ///
    /// `access_token` scopes the read to the caller under row-level
    /// security; without it the anonymous policy applies.
    pub async fn resolve(&self, user: &User, access_token: Option<&str>) -> (Profile, ProfileOrigin) {
        match self.fetch(&user.id, access_token).await {
            Ok(Some(profile)) => {
                debug!("profile row loaded for {}", user.id);
                (profile, ProfileOrigin::Stored)
            }
            Ok(None) => {
                debug!("no profile row for {}; using the fallback", user.id);
                (Profile::fallback_for(user), ProfileOrigin::FallbackMissing)
            }
            Err(err) if is_missing_relation(&err) => {
                debug!("profiles table missing; using the fallback for {}", user.id);
                (Profile::fallback_for(user), ProfileOrigin::FallbackMissing)
            }
            Err(err) => {
                warn!("profile lookup failed for {}: {}; using the fallback", user.id, err);
                (Profile::fallback_for(user), ProfileOrigin::FallbackDegraded)
            }
        }
    }

    async fn fetch(
        &self,
        user_id: &str,
        access_token: Option<&str>,
    ) -> Result<Option<Profile>, PostgrestError> {
        let mut query = self.query().select("*").eq("id", user_id);
        if let Some(token) = access_token {
            query = query.with_auth(token)?;
        }

        query.maybe_single::<Profile>().await
    }
}

/// A missing relation means the environment simply has not provisioned the
/// profiles table; the portal treats that like an absent row.
fn is_missing_relation(err: &PostgrestError) -> bool {
    if err.code() == Some(CODE_UNDEFINED_TABLE) {
        return true;
    }

    match err {
        PostgrestError::ApiError { details, .. } => details
            .message
            .as_deref()
            .map(|message| message.contains("does not exist"))
            .unwrap_or(false),
        _ => false,
    }
}
