use crate::message::{parse_received, Message};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
}

/// One page of a Graph collection.
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink", default)]
    pub next_link: Option<String>,
}

// Mail types

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct EmailAddress {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub email_address: EmailAddress,
}

impl Recipient {
    pub fn to(address: &str) -> Self {
        Recipient {
            email_address: EmailAddress {
                address: Some(address.to_string()),
                name: None,
            },
        }
    }

    fn address_lowercase(&self) -> Option<String> {
        self.email_address.address.as_ref().map(|a| a.to_lowercase())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ItemBody {
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub content_encoding: Option<String>,
    #[serde(default)]
    pub base64: Option<serde_json::Value>,
}

impl ItemBody {
    pub fn is_base64(&self) -> bool {
        self.base64.is_some()
            || self
                .content_encoding
                .as_deref()
                .is_some_and(|e| e.eq_ignore_ascii_case("base64"))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GraphMessage {
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub from: Option<Recipient>,
    #[serde(default)]
    pub to_recipients: Vec<Recipient>,
    #[serde(default)]
    pub received_date_time: Option<String>,
    #[serde(default)]
    pub has_attachments: bool,
    #[serde(default)]
    pub body: Option<ItemBody>,
}

impl GraphMessage {
    /// Normalize into the core message model: addresses lowercased, body
    /// and attachments left for the runner to fetch.
    pub fn into_message(self) -> Message {
        let received_at = self.received_date_time.as_deref().and_then(parse_received);
        Message {
            from_address: self
                .from
                .as_ref()
                .and_then(|r| r.address_lowercase())
                .unwrap_or_default(),
            to_addresses: self
                .to_recipients
                .iter()
                .filter_map(|r| r.address_lowercase())
                .collect(),
            subject: self.subject.unwrap_or_default(),
            received_at,
            body: String::new(),
            has_attachments: self.has_attachments,
            attachments: Vec::new(),
            id: self.id,
        }
    }
}

pub const FILE_ATTACHMENT_TYPE: &str = "#microsoft.graph.fileAttachment";

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GraphAttachment {
    #[serde(rename = "@odata.type", default)]
    pub odata_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub content_bytes: Option<String>,
}

impl GraphAttachment {
    pub fn is_file(&self) -> bool {
        match self.odata_type.as_deref() {
            Some(t) => t == FILE_ATTACHMENT_TYPE,
            None => self.content_bytes.is_some(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardRequest<'a> {
    pub comment: &'a str,
    pub to_recipients: Vec<Recipient>,
}

// Sharepoint types

#[derive(Debug, Deserialize)]
pub struct Site {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct Drive {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DriveItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub folder: Option<serde_json::Value>,
    #[serde(rename = "@microsoft.graph.downloadUrl", default)]
    pub download_url: Option<String>,
}

impl DriveItem {
    pub fn is_folder(&self) -> bool {
        self.folder.is_some()
    }
}
