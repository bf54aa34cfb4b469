//! Sign-in synchronization of the profiles table.

use chrono::Utc;
use log::debug;
use serde_json::{json, Value};
use std::collections::HashMap;

use manduvi_portal_auth::{Session, User};
use manduvi_portal_postgrest::PostgrestError;

use super::{AccountStatus, Profile, ProfileResolver, Role};

/// What [`ProfileResolver::ensure_row`] did to the profiles table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSync {
    /// First sign-in: a fresh row was inserted with default role and status.
    Created,
    /// The existing row got its last-login stamp and metadata refreshed.
    Refreshed,
}

impl ProfileResolver {
    /// Brings the profiles table in line with a successful sign-in.
    ///
    /// A first sign-in inserts the default row (`usuario`/`active`); later
    /// sign-ins only refresh `last_login_at` and fold the identity's
    /// metadata into the stored map. Role and status are never touched
    /// here, those belong to the admin flows.
    pub async fn ensure_row(&self, session: &Session) -> Result<RowSync, PostgrestError> {
        let user = &session.user;
        let token = session.access_token.as_str();

        let existing = self
            .query()
            .select("*")
            .eq("id", &user.id)
            .with_auth(token)?
            .maybe_single::<Profile>()
            .await?;

        match existing {
            None => {
                let row = json!({
                    "id": user.id,
                    "email": user.email.clone().unwrap_or_default(),
                    "role": Role::Usuario,
                    "status": AccountStatus::Active,
                    "email_verified": user.email_confirmed(),
                    "profile_completed": true,
                    "last_login_at": Utc::now(),
                    "metadata": seed_metadata(user),
                });

                self.query().with_auth(token)?.insert(row).await?;
                debug!("created profile row for {}", user.id);
                Ok(RowSync::Created)
            }
            Some(profile) => {
                let row = json!({
                    "last_login_at": Utc::now(),
                    "metadata": merged_metadata(&profile.metadata, user),
                });

                self.query()
                    .eq("id", &user.id)
                    .with_auth(token)?
                    .update(row)
                    .await?;
                debug!("refreshed profile row for {}", user.id);
                Ok(RowSync::Refreshed)
            }
        }
    }
}

/// Metadata for a brand-new row: creation stamp, last sign-in, then the
/// identity's own metadata on top.
fn seed_metadata(user: &User) -> HashMap<String, Value> {
    let mut metadata = HashMap::new();
    metadata.insert("created_at".to_string(), json!(user.created_at));
    fold_identity(&mut metadata, user);
    metadata
}

/// The stored map with the latest sign-in facts folded in. Identity
/// metadata wins over stale stored keys.
fn merged_metadata(stored: &HashMap<String, Value>, user: &User) -> HashMap<String, Value> {
    let mut metadata = stored.clone();
    fold_identity(&mut metadata, user);
    metadata
}

fn fold_identity(metadata: &mut HashMap<String, Value>, user: &User) {
    metadata.insert("last_sign_in".to_string(), json!(user.last_sign_in_at));
    if let Value::Object(user_metadata) = &user.user_metadata {
        for (key, value) in user_metadata {
            metadata.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> User {
        serde_json::from_value(json!({
            "id": "user-1",
            "email": "ana@example.com",
            "user_metadata": { "name": "Ana Lima", "city": "Campo Grande" },
            "last_sign_in_at": "2024-06-01T08:00:00Z",
            "created_at": "2024-01-01T00:00:00Z"
        }))
        .unwrap()
    }

    #[test]
    fn seed_metadata_carries_identity_facts() {
        let metadata = seed_metadata(&identity());

        assert_eq!(metadata["name"], "Ana Lima");
        assert_eq!(metadata["created_at"], "2024-01-01T00:00:00Z");
        assert_eq!(metadata["last_sign_in"], "2024-06-01T08:00:00Z");
    }

    #[test]
    fn merged_metadata_prefers_fresh_identity_keys() {
        let mut stored = HashMap::new();
        stored.insert("name".to_string(), json!("Old Name"));
        stored.insert("theme".to_string(), json!("dark"));

        let metadata = merged_metadata(&stored, &identity());

        assert_eq!(metadata["name"], "Ana Lima");
        assert_eq!(metadata["theme"], "dark");
        assert_eq!(metadata["city"], "Campo Grande");
    }
}
