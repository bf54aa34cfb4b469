//! Edge Functions client for the Manduvi portal.
//!
//! This crate invokes the portal's privileged `/functions/v1` endpoints.
//! Calls default to the anon key, but the portal's admin surface passes the
//! caller's session token instead so the function can check the actor's
//! role before doing anything.

use log::debug;
use reqwest::{Client, Method};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

/// Error type
#[derive(Debug, Error)]
pub enum FunctionsError {
    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Function error: {message} (Status: {status})")]
    FunctionError {
        message: String,
        status: reqwest::StatusCode,
    },
}

pub type Result<T> = std::result::Result<T, FunctionsError>;

/// Per-invocation options.
#[derive(Default)]
pub struct FunctionOptions {
    /// Extra request headers.
    pub headers: Option<std::collections::HashMap<String, String>>,
    /// Replaces the default anon-key Authorization header, so the function
    /// sees the calling user rather than the anonymous role.
    pub bearer_token: Option<String>,
}

impl FunctionOptions {
    /// Options carrying the caller's access token.
    pub fn with_bearer_token(token: impl Into<String>) -> Self {
        Self {
            headers: None,
            bearer_token: Some(token.into()),
        }
    }
}

/// Edge Functions client
pub struct FunctionsClient {
    base_url: String,
    api_key: String,
    http_client: Client,
}

impl FunctionsClient {
    /// Creates a new Edge Functions client.
    pub fn new(base_url: &str, api_key: &str, http_client: Client) -> Self {
        Self {
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            http_client,
        }
    }

    /// Invokes a function with a POST, the conventional invocation verb.
    pub async fn invoke<T: Serialize>(
        &self,
        function_name: &str,
        body: Option<T>,
        options: Option<FunctionOptions>,
    ) -> Result<Value> {
        self.request(Method::POST, function_name, body, options)
            .await
    }

    /// Invokes a function with an explicit HTTP method, for functions that
    /// route on the verb.
    pub async fn request<T: Serialize>(
        &self,
        method: Method,
        function_name: &str,
        body: Option<T>,
        options: Option<FunctionOptions>,
    ) -> Result<Value> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| FunctionsError::UrlError(url::ParseError::EmptyHost))?
            .push("functions")
            .push("v1")
            .push(function_name);

        let opts = options.unwrap_or_default();
        let bearer = opts.bearer_token.as_deref().unwrap_or(&self.api_key);

        debug!("invoking edge function {} via {}", function_name, method);

        let mut request = self
            .http_client
            .request(method, url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", bearer));

        if let Some(headers) = opts.headers {
            for (key, value) in headers {
                request = request.header(key, value);
            }
        }

        if let Some(body_data) = body {
            request = request.json(&body_data);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<Value>(&error_text) {
                Ok(body) => body
                    .get("error")
                    .and_then(Value::as_str)
                    .map(|s| s.to_string())
                    .unwrap_or(error_text),
                Err(_) => error_text,
            };
            return Err(FunctionsError::FunctionError { message, status });
        }

        let json_response = response.json::<Value>().await?;
        Ok(json_response)
    }
}
