pub mod client;
pub mod sharepoint;
pub mod types;

use crate::config::GraphSettings;
use crate::provider::ProviderError;
use serde::de::DeserializeOwned;
use std::time::Duration;
use types::TokenResponse;

pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Blocking agent with the configured timeouts, shared by every client.
pub fn build_agent(settings: &GraphSettings) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(settings.connect_timeout_secs))
        .timeout_read(Duration::from_secs(settings.read_timeout_secs))
        .build()
}

/// OAuth2 client-credentials grant against the tenant's token endpoint.
pub fn fetch_token(
    agent: &ureq::Agent,
    settings: &GraphSettings,
    tenant_id: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<String, ProviderError> {
    let url = format!(
        "{}/{}/oauth2/v2.0/token",
        settings.authority_url.trim_end_matches('/'),
        tenant_id
    );
    log_debug!("[Graph] Requesting token from {}", url);

    let response = agent
        .post(&url)
        .send_form(&[
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("scope", GRAPH_SCOPE),
            ("grant_type", "client_credentials"),
        ])
        .map_err(|e| request_error("token request", e))?;

    let token: TokenResponse = response
        .into_json()
        .map_err(|e| ProviderError::Parse(format!("Failed to parse token response: {}", e)))?;
    Ok(token.access_token)
}

pub(crate) fn request_error(operation: &str, err: ureq::Error) -> ProviderError {
    match err {
        ureq::Error::Status(401, _) => ProviderError::Http(format!(
            "{}: authentication failed (401 Unauthorized)",
            operation
        )),
        ureq::Error::Status(code, resp) => {
            let body = resp.into_string().unwrap_or_default();
            log_error!("[Graph] {} returned HTTP {}: {}", operation, code, truncate_str(&body, 500));
            ProviderError::Http(format!(
                "{} failed with HTTP {}: {}",
                operation,
                code,
                if body.is_empty() {
                    "(empty response)".to_string()
                } else {
                    truncate_str(&body, 200).to_string()
                }
            ))
        }
        ureq::Error::Transport(t) => {
            log_error!("[Graph] {} connection error: {}", operation, t);
            ProviderError::Http(t.to_string())
        }
    }
}

pub(crate) fn get_json<T: DeserializeOwned>(
    agent: &ureq::Agent,
    url: &str,
    token: &str,
    operation: &str,
) -> Result<T, ProviderError> {
    log_debug!("[Graph] GET {}", url);
    let response = agent
        .get(url)
        .set("Authorization", &format!("Bearer {}", token))
        .call()
        .map_err(|e| request_error(operation, e))?;

    let text = response
        .into_string()
        .map_err(|e| ProviderError::Parse(format!("Failed to read response: {}", e)))?;
    serde_json::from_str(&text).map_err(|e| {
        ProviderError::Parse(format!(
            "{}: {}. Response was: {}",
            operation,
            e,
            truncate_str(&text, 500)
        ))
    })
}

pub(crate) fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
