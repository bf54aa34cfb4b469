//! Profile model and resolution.
//!
//! Once an identity is established the portal always has a profile in
//! memory: either the row stored in the profiles table, or a synthesized
//! fallback that keeps the portal usable when the backend has no row for
//! the identity or cannot be asked. Fallbacks are never persisted.

mod resolver;
mod sync;

pub use resolver::{ProfileOrigin, ProfileResolver};
pub use sync::RowSync;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use manduvi_portal_auth::User;

/// Portal role, in the wire vocabulary of the profiles table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Empresa,
    TerceiroSetor,
    OrgaoPublico,
    Colaborador,
    Usuario,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Empresa => "empresa",
            Role::TerceiroSetor => "terceiro_setor",
            Role::OrgaoPublico => "orgao_publico",
            Role::Colaborador => "colaborador",
            Role::Usuario => "usuario",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account lifecycle status. Deletion is a status transition here, not a
/// row removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Pending,
    Active,
    Suspended,
    Deleted,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Pending => "pending",
            AccountStatus::Active => "active",
            AccountStatus::Suspended => "suspended",
            AccountStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-level record for an identity: role, status, verification
/// flags and free-form metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub role: Role,
    pub status: AccountStatus,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub phone_verified: bool,
    #[serde(default)]
    pub profile_completed: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    /// Open string-keyed map. The column is nullable, so absent and null
    /// both normalize to an empty map on the way in.
    #[serde(default, deserialize_with = "metadata_or_empty")]
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

fn metadata_or_empty<'de, D>(deserializer: D) -> Result<HashMap<String, Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<HashMap<String, Value>>::deserialize(deserializer)?;
    Ok(value.unwrap_or_default())
}

impl Profile {
    /// Synthesizes the fallback profile for `user`: plain end-user role,
    /// active status, empty metadata. Used whenever the stored row cannot
    /// be produced, so the portal keeps working with ordinary permissions.
    pub fn fallback_for(user: &User) -> Self {
        let now = Utc::now();

        Self {
            id: user.id.clone(),
            email: user.email.clone().unwrap_or_default(),
            role: Role::Usuario,
            status: AccountStatus::Active,
            email_verified: user.email_confirmed(),
            phone_verified: false,
            profile_completed: true,
            last_login_at: Some(now),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
            name: user
                .user_metadata
                .get("name")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
        }
    }

    /// Whether this profile grants the admin area.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
