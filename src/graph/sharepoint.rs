use std::io::Read as _;

use super::types::{Drive, DriveItem, Page, Site};
use super::{fetch_token, get_json, request_error};
use crate::config::{GraphSettings, SharepointConfig};
use crate::error::ImportError;
use crate::import::{ImportConnector, RemoteFile, RuleImportSource};
use crate::provider::ProviderError;

const DOCUMENTS_DRIVE: &str = "Documents";
const MAX_WORKBOOK_BYTES: u64 = 50 * 1024 * 1024;

/// Rule spreadsheets stored in a Sharepoint site's document library.
pub struct SharepointSource {
    agent: ureq::Agent,
    api_url: String,
    token: String,
    site_address: String,
    site_name: String,
}

impl SharepointSource {
    pub fn new(
        agent: ureq::Agent,
        settings: &GraphSettings,
        token: String,
        account: &SharepointConfig,
    ) -> Self {
        SharepointSource {
            agent,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            token,
            site_address: account.site_address.clone(),
            site_name: account.site_name.clone(),
        }
    }

    fn get<T: serde::de::DeserializeOwned>(&self, url: &str, operation: &str) -> Result<T, ImportError> {
        get_json(&self.agent, url, &self.token, operation).map_err(source_error)
    }

    fn children(&self, url: String) -> Result<Vec<DriveItem>, ImportError> {
        let mut items = Vec::new();
        let mut next = Some(url);
        while let Some(url) = next {
            let page: Page<DriveItem> = self.get(&url, "list folder")?;
            items.extend(page.value);
            next = page.next_link;
        }
        Ok(items)
    }

    fn documents_drive(&self) -> Result<String, ImportError> {
        let site: Site = self.get(
            &format!(
                "{}/sites/{}:/sites/{}",
                self.api_url,
                self.site_address,
                urlencoding::encode(&self.site_name).replace("%2F", "/")
            ),
            "resolve site",
        )?;
        log_debug!("[Import] Site '{}' resolved to {}", self.site_name, site.id);

        let drives: Page<Drive> = self.get(
            &format!("{}/sites/{}/drives?$select=id,name", self.api_url, site.id),
            "list drives",
        )?;
        drives
            .value
            .into_iter()
            .find(|d| d.name == DOCUMENTS_DRIVE)
            .map(|d| d.id)
            .ok_or_else(|| {
                ImportError::Source(format!(
                    "site '{}' has no '{}' library",
                    self.site_name, DOCUMENTS_DRIVE
                ))
            })
    }
}

impl RuleImportSource for SharepointSource {
    fn list_files(&self, folder: &str) -> Result<Vec<RemoteFile>, ImportError> {
        let drive_id = self.documents_drive()?;
        let mut items = self.children(format!("{}/drives/{}/root/children", self.api_url, drive_id))?;

        // The first segment is the library itself.
        for segment in folder.split('/').filter(|s| !s.is_empty()).skip(1) {
            let next = items
                .iter()
                .find(|item| item.is_folder() && item.name == segment)
                .ok_or_else(|| {
                    ImportError::Source(format!("folder '{}' not found in '{}'", segment, folder))
                })?;
            let url = format!("{}/drives/{}/items/{}/children", self.api_url, drive_id, next.id);
            items = self.children(url)?;
        }

        Ok(items
            .into_iter()
            .filter(|item| !item.is_folder())
            .map(|item| RemoteFile {
                location: item.download_url.clone().unwrap_or_else(|| {
                    format!("{}/drives/{}/items/{}/content", self.api_url, drive_id, item.id)
                }),
                name: item.name,
            })
            .collect())
    }

    fn download(&self, file: &RemoteFile) -> Result<Vec<u8>, ImportError> {
        log_debug!("[Import] Downloading '{}'", file.name);
        let mut request = self.agent.get(&file.location);
        // Download URLs are pre-authenticated; only API URLs take the token.
        if file.location.starts_with(&self.api_url) {
            request = request.set("Authorization", &format!("Bearer {}", self.token));
        }
        let response = request
            .call()
            .map_err(|e| source_error(request_error("download", e)))?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_WORKBOOK_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|e| ImportError::Source(format!("reading '{}': {}", file.name, e)))?;
        Ok(bytes)
    }
}

fn source_error(e: ProviderError) -> ImportError {
    ImportError::Source(e.to_string())
}

pub struct SharepointConnector {
    agent: ureq::Agent,
    settings: GraphSettings,
}

impl SharepointConnector {
    pub fn new(agent: ureq::Agent, settings: GraphSettings) -> Self {
        SharepointConnector { agent, settings }
    }
}

impl ImportConnector for SharepointConnector {
    fn connect(
        &self,
        account: &SharepointConfig,
        secret: &str,
    ) -> Result<Box<dyn RuleImportSource>, ImportError> {
        log_info!(
            "[Import] Authenticating Sharepoint account '{}'",
            account.account_name
        );
        let token = fetch_token(
            &self.agent,
            &self.settings,
            &account.tenant_id,
            &account.client_id,
            secret,
        )
        .map_err(source_error)?;
        Ok(Box::new(SharepointSource::new(
            self.agent.clone(),
            &self.settings,
            token,
            account,
        )))
    }
}
