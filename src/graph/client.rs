use base64::Engine;

use super::types::*;
use super::{fetch_token, get_json, request_error};
use crate::config::{AccountConfig, GraphSettings};
use crate::message::{Attachment, Body, Message};
use crate::provider::{MailConnector, MailProvider, ProviderError};

const MESSAGE_FIELDS: &str = "id,subject,from,toRecipients,receivedDateTime,hasAttachments";

/// Mailbox access for one user over Microsoft Graph.
pub struct GraphClient {
    agent: ureq::Agent,
    api_url: String,
    token: String,
    user_id: String,
    page_size: u32,
}

impl GraphClient {
    pub fn new(agent: ureq::Agent, settings: &GraphSettings, token: String, user_id: &str) -> Self {
        GraphClient {
            agent,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            token,
            user_id: user_id.to_string(),
            page_size: settings.page_size,
        }
    }

    fn user_url(&self) -> String {
        format!("{}/users/{}", self.api_url, urlencoding::encode(&self.user_id))
    }

    fn message_url(&self, message_id: &str) -> String {
        format!("{}/messages/{}", self.user_url(), urlencoding::encode(message_id))
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn unread_url(&self) -> String {
        format!(
            "{}/mailFolders/inbox/messages?$filter=isRead%20eq%20false&$orderby=receivedDateTime%20desc&$top={}&$select={}",
            self.user_url(),
            self.page_size,
            MESSAGE_FIELDS
        )
    }
}

impl MailProvider for GraphClient {
    fn list_unread(&self) -> Result<Vec<Message>, ProviderError> {
        log_info!("[Graph] Listing unread messages for {}", self.user_id);

        let mut messages = Vec::new();
        let mut next = Some(self.unread_url());
        while let Some(url) = next {
            let page: Page<GraphMessage> = get_json(&self.agent, &url, &self.token, "list unread")?;
            log_debug!("[Graph] Page returned {} message(s)", page.value.len());
            messages.extend(page.value.into_iter().map(GraphMessage::into_message));
            next = page.next_link;
        }

        log_info!("[Graph] {} unread message(s)", messages.len());
        Ok(messages)
    }

    fn get_body(&self, message_id: &str) -> Result<Body, ProviderError> {
        let url = format!("{}?$select=body", self.message_url(message_id));
        log_debug!("[Graph] GET {}", url);

        let response = self
            .agent
            .get(&url)
            .set("Authorization", &self.auth())
            .set("Prefer", "outlook.body-content-type=\"text\"")
            .call()
            .map_err(|e| request_error("get body", e))?;
        let msg: GraphMessage = response
            .into_json()
            .map_err(|e| ProviderError::Parse(format!("Failed to parse message body: {}", e)))?;

        let body = msg.body.unwrap_or_default();
        Ok(Body {
            base64: body.is_base64(),
            content_type: body.content_type.unwrap_or_else(|| "text".to_string()),
            content: body.content.unwrap_or_default(),
        })
    }

    fn list_attachments(&self, message_id: &str) -> Result<Vec<Attachment>, ProviderError> {
        let mut attachments = Vec::new();
        let mut next = Some(format!("{}/attachments", self.message_url(message_id)));

        while let Some(url) = next {
            let page: Page<GraphAttachment> =
                get_json(&self.agent, &url, &self.token, "list attachments")?;
            for raw in page.value {
                let name = raw.name.clone().unwrap_or_default();
                if !raw.is_file() {
                    log_debug!("[Graph] Skipping non-file attachment '{}'", name);
                    continue;
                }
                let content = match raw.content_bytes {
                    Some(ref b64) => base64::engine::general_purpose::STANDARD
                        .decode(b64)
                        .map_err(|e| {
                            ProviderError::Parse(format!("Attachment '{}' is not valid base64: {}", name, e))
                        })?,
                    None => Vec::new(),
                };
                attachments.push(Attachment { name, content });
            }
            next = page.next_link;
        }

        log_debug!(
            "[Graph] Message {} has {} file attachment(s)",
            message_id,
            attachments.len()
        );
        Ok(attachments)
    }

    fn mark_read(&self, message_id: &str) -> Result<(), ProviderError> {
        log_debug!("[Graph] Marking {} read", message_id);
        self.agent
            .request("PATCH", &self.message_url(message_id))
            .set("Authorization", &self.auth())
            .send_json(serde_json::json!({ "isRead": true }))
            .map_err(|e| request_error("mark read", e))?;
        Ok(())
    }

    fn forward(
        &self,
        message_id: &str,
        recipients: &[String],
        comment: &str,
    ) -> Result<(), ProviderError> {
        let request = ForwardRequest {
            comment,
            to_recipients: recipients.iter().map(|r| Recipient::to(r)).collect(),
        };
        self.agent
            .post(&format!("{}/forward", self.message_url(message_id)))
            .set("Authorization", &self.auth())
            .send_json(&request)
            .map_err(|e| request_error("forward", e))?;
        Ok(())
    }
}

/// Authenticates mail accounts with the client-credentials flow.
pub struct GraphConnector {
    agent: ureq::Agent,
    settings: GraphSettings,
}

impl GraphConnector {
    pub fn new(agent: ureq::Agent, settings: GraphSettings) -> Self {
        GraphConnector { agent, settings }
    }
}

impl MailConnector for GraphConnector {
    fn connect(
        &self,
        account: &AccountConfig,
        secret: &str,
    ) -> Result<Box<dyn MailProvider>, ProviderError> {
        log_info!(
            "[Graph] Authenticating '{}' as {} (tenant {})",
            account.name,
            account.username.as_deref().unwrap_or(&account.user_id),
            account.tenant_id
        );
        let token = fetch_token(
            &self.agent,
            &self.settings,
            &account.tenant_id,
            &account.client_id,
            secret,
        )?;
        Ok(Box::new(GraphClient::new(
            self.agent.clone(),
            &self.settings,
            token,
            &account.user_id,
        )))
    }
}
