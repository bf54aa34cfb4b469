//! Admin user management.
//!
//! Role and status changes never go through PostgREST directly: they pass
//! through the portal's privileged `admin-users` endpoint, which verifies
//! the acting user's admin role server-side before touching anything. The
//! caller's session token rides along so the endpoint knows who is asking.

use log::{debug, warn};
use reqwest::{Client, Method};
use serde_json::json;

use manduvi_portal_auth::Session;
use manduvi_portal_functions::{FunctionOptions, FunctionsClient};
use manduvi_portal_postgrest::{PostgrestClient, PostgrestError};

use crate::error::Error;
use crate::profile::{AccountStatus, Profile};

/// Name of the privileged user-management endpoint.
pub const ADMIN_USERS_FUNCTION: &str = "admin-users";

/// Client for the portal's admin user operations.
pub struct AdminUsersClient {
    functions: FunctionsClient,
    base_url: String,
    api_key: String,
    http_client: Client,
    activity_table: String,
}

impl AdminUsersClient {
    pub(crate) fn new(
        base_url: &str,
        api_key: &str,
        http_client: Client,
        activity_table: &str,
    ) -> Self {
        Self {
            functions: FunctionsClient::new(base_url, api_key, http_client.clone()),
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            http_client,
            activity_table: activity_table.to_string(),
        }
    }

    /// Lists every portal account, newest first.
    ///
    /// `session` must belong to an admin; the endpoint answers 403
    /// otherwise.
    pub async fn list(&self, session: &Session) -> Result<Vec<Profile>, Error> {
        let response = self
            .functions
            .request(
                Method::GET,
                ADMIN_USERS_FUNCTION,
                None::<serde_json::Value>,
                Some(FunctionOptions::with_bearer_token(&session.access_token)),
            )
            .await?;

        let users: Vec<Profile> = serde_json::from_value(response)?;
        debug!("listed {} portal accounts", users.len());
        Ok(users)
    }

    /// Moves an account to `status` and records the change in the activity
    /// log. A failed log write is reported but does not undo the change.
    pub async fn update_status(
        &self,
        session: &Session,
        user_id: &str,
        status: AccountStatus,
    ) -> Result<(), Error> {
        self.functions
            .request(
                Method::PUT,
                ADMIN_USERS_FUNCTION,
                Some(json!({ "userId": user_id, "status": status })),
                Some(FunctionOptions::with_bearer_token(&session.access_token)),
            )
            .await?;

        debug!("updated status of {} to {}", user_id, status);

        if let Err(err) = self.record_activity(session, user_id, status).await {
            warn!("could not record admin activity for {}: {}", user_id, err);
        }

        Ok(())
    }

    async fn record_activity(
        &self,
        session: &Session,
        user_id: &str,
        status: AccountStatus,
    ) -> Result<(), PostgrestError> {
        let entry = json!({
            "user_id": session.user.id,
            "action": "update",
            "entity_type": "user_status",
            "entity_id": user_id,
            "changes": { "status": status },
        });

        PostgrestClient::new(
            &self.base_url,
            &self.api_key,
            &self.activity_table,
            self.http_client.clone(),
        )
        .with_auth(&session.access_token)?
        .insert(entry)
        .await?;

        Ok(())
    }
}
