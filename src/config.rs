use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const LOCAL_REGISTRY_FILE: &str = "o365_accounts_local.json";
pub const REGISTRY_FILE: &str = "o365_accounts.json";

/// How an account's secrets are looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordMethod {
    Keyring,
    SecretsManager,
    ParameterStore,
    Custom,
}

impl PasswordMethod {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "keyring" => Some(PasswordMethod::Keyring),
            "secretsmanager" => Some(PasswordMethod::SecretsManager),
            "ssm" | "parameterstore" => Some(PasswordMethod::ParameterStore),
            "custom" => Some(PasswordMethod::Custom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SharepointConfig {
    pub account_name: String,
    pub site_address: String,
    pub site_name: String,
    pub folder_path: String,
    pub tenant_id: String,
    pub client_id: String,
    pub password_key: String,
}

#[derive(Debug, Clone)]
pub struct AccountConfig {
    pub name: String,
    pub username: Option<String>,
    pub user_id: String,
    pub tenant_id: String,
    pub client_id: String,
    pub password_key: String,
    pub password_method: PasswordMethod,
    pub sharepoint: Option<SharepointConfig>,
}

#[derive(Debug)]
pub struct Settings {
    pub rules_dir: Option<PathBuf>,
    pub sheet_name: String,
    pub graph: GraphSettings,
    pub aws: AwsSettings,
    pub custom_secret_command: Option<String>,
    pub log: LogSettings,
}

#[derive(Debug, Clone)]
pub struct GraphSettings {
    pub authority_url: String,
    pub api_url: String,
    pub page_size: u32,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AwsSettings {
    pub region: Option<String>,
    pub secrets_manager_endpoint: Option<String>,
    pub ssm_endpoint: Option<String>,
    pub ssm_path_prefix: String,
    pub s3_endpoint: Option<String>,
}

#[derive(Debug)]
pub struct LogSettings {
    pub verbose: bool,
    pub file: Option<PathBuf>,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(String),
    NotFound(Vec<PathBuf>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "failed to read {}: {}", path.display(), e),
            ConfigError::Parse(e) => write!(f, "failed to parse config: {}", e),
            ConfigError::NotFound(paths) => {
                let paths: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
                write!(f, "no account registry found (looked for {})", paths.join(", "))
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// --- settings.toml ---

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSettings {
    #[serde(default)]
    rules: RawRulesSettings,
    #[serde(default)]
    graph: RawGraphSettings,
    #[serde(default)]
    aws: RawAwsSettings,
    #[serde(default)]
    secrets: RawSecretSettings,
    #[serde(default)]
    log: RawLogSettings,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRulesSettings {
    #[serde(default)]
    dir: Option<PathBuf>,
    #[serde(default = "default_sheet_name")]
    sheet_name: String,
}

impl Default for RawRulesSettings {
    fn default() -> Self {
        Self {
            dir: None,
            sheet_name: default_sheet_name(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGraphSettings {
    #[serde(default = "default_authority_url")]
    authority_url: String,
    #[serde(default = "default_api_url")]
    api_url: String,
    #[serde(default = "default_page_size")]
    page_size: u32,
    #[serde(default = "default_connect_timeout_secs")]
    connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    read_timeout_secs: u64,
}

impl Default for RawGraphSettings {
    fn default() -> Self {
        Self {
            authority_url: default_authority_url(),
            api_url: default_api_url(),
            page_size: default_page_size(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAwsSettings {
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    secrets_manager_endpoint: Option<String>,
    #[serde(default)]
    ssm_endpoint: Option<String>,
    #[serde(default)]
    ssm_path_prefix: Option<String>,
    #[serde(default)]
    s3_endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSecretSettings {
    #[serde(default)]
    custom_command: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLogSettings {
    #[serde(default)]
    verbose: bool,
    #[serde(default)]
    file: Option<PathBuf>,
}

fn default_sheet_name() -> String {
    "Email Rules".to_string()
}

fn default_authority_url() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_api_url() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}

fn default_page_size() -> u32 {
    50
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_read_timeout_secs() -> u64 {
    120
}

fn default_ssm_path_prefix() -> String {
    "/aws/prod/email_processor/passwords".to_string()
}

impl Settings {
    /// Load settings from `path`; a missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Self::parse("");
        }
        let contents =
            fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::parse(&contents)
    }

    fn parse(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawSettings =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;

        if raw.graph.page_size == 0 {
            return Err(ConfigError::Parse(
                "page_size must be greater than 0 in [graph]".to_string(),
            ));
        }
        if raw.rules.sheet_name.trim().is_empty() {
            return Err(ConfigError::Parse(
                "sheet_name must not be empty in [rules]".to_string(),
            ));
        }

        Ok(Settings {
            rules_dir: raw.rules.dir,
            sheet_name: raw.rules.sheet_name,
            graph: GraphSettings {
                authority_url: raw.graph.authority_url.trim_end_matches('/').to_string(),
                api_url: raw.graph.api_url.trim_end_matches('/').to_string(),
                page_size: raw.graph.page_size,
                connect_timeout_secs: raw.graph.connect_timeout_secs,
                read_timeout_secs: raw.graph.read_timeout_secs,
            },
            aws: AwsSettings {
                region: raw.aws.region,
                secrets_manager_endpoint: raw.aws.secrets_manager_endpoint,
                ssm_endpoint: raw.aws.ssm_endpoint,
                ssm_path_prefix: raw
                    .aws
                    .ssm_path_prefix
                    .unwrap_or_else(default_ssm_path_prefix),
                s3_endpoint: raw.aws.s3_endpoint,
            },
            custom_secret_command: raw.secrets.custom_command,
            log: LogSettings {
                verbose: raw.log.verbose,
                file: raw.log.file,
            },
        })
    }
}

// --- account registry (JSON) ---

#[derive(Debug, Deserialize)]
struct RawRegistry {
    #[serde(default)]
    o365_accounts: Vec<RawAccountEntry>,
}

#[derive(Debug, Deserialize)]
struct RawAccountEntry {
    #[serde(default)]
    password_method: Option<String>,
    #[serde(default)]
    email_account: Option<RawMailAccount>,
    #[serde(default)]
    sharepoint_account: Option<RawSharepointAccount>,
}

#[derive(Debug, Deserialize)]
struct RawMailAccount {
    account_name: Option<String>,
    #[serde(default)]
    o365_username: Option<String>,
    o365_user_id: Option<String>,
    o365_tenant_id: Option<String>,
    o365_client_id: Option<String>,
    o365_password_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSharepointAccount {
    account_name: Option<String>,
    o365_site_address: Option<String>,
    o365_site_name: Option<String>,
    o365_site_folderpath: Option<String>,
    o365_tenant_id: Option<String>,
    o365_client_id: Option<String>,
    o365_password_key: Option<String>,
}

/// Find the account registry in `dir`, preferring the `_local` variant.
pub fn registry_path(dir: &Path) -> Result<PathBuf, ConfigError> {
    let local = dir.join(LOCAL_REGISTRY_FILE);
    if local.exists() {
        return Ok(local);
    }
    let shared = dir.join(REGISTRY_FILE);
    if shared.exists() {
        return Ok(shared);
    }
    Err(ConfigError::NotFound(vec![local, shared]))
}

pub fn load_accounts(dir: &Path) -> Result<Vec<AccountConfig>, ConfigError> {
    let path = registry_path(dir)?;
    let contents = fs::read_to_string(&path).map_err(|e| ConfigError::Io(path.clone(), e))?;
    parse_accounts(&contents)
}

fn parse_accounts(contents: &str) -> Result<Vec<AccountConfig>, ConfigError> {
    let raw: RawRegistry =
        serde_json::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let mut accounts = Vec::new();
    for (idx, entry) in raw.o365_accounts.into_iter().enumerate() {
        let label = format!("o365_accounts[{}]", idx);
        let mail = entry
            .email_account
            .ok_or_else(|| ConfigError::Parse(format!("missing email_account in {}", label)))?;
        let name = require_field(
            mail.account_name,
            &format!("missing account_name in {}.email_account", label),
        )?;

        let method_str = require_field(
            entry.password_method,
            &format!("missing password_method for account '{}'", name),
        )?;
        let password_method = PasswordMethod::parse(&method_str).ok_or_else(|| {
            ConfigError::Parse(format!(
                "unknown password_method '{}' for account '{}'",
                method_str, name
            ))
        })?;

        let sharepoint = match entry.sharepoint_account {
            Some(sp) => Some(parse_sharepoint(sp, &name)?),
            None => None,
        };

        accounts.push(AccountConfig {
            username: mail.o365_username,
            user_id: require_field(
                mail.o365_user_id,
                &format!("missing o365_user_id for account '{}'", name),
            )?,
            tenant_id: require_field(
                mail.o365_tenant_id,
                &format!("missing o365_tenant_id for account '{}'", name),
            )?,
            client_id: require_field(
                mail.o365_client_id,
                &format!("missing o365_client_id for account '{}'", name),
            )?,
            password_key: require_field(
                mail.o365_password_key,
                &format!("missing o365_password_key for account '{}'", name),
            )?,
            name,
            password_method,
            sharepoint,
        });
    }

    Ok(accounts)
}

fn parse_sharepoint(sp: RawSharepointAccount, owner: &str) -> Result<SharepointConfig, ConfigError> {
    let field = |value: Option<String>, name: &str| {
        require_field(
            value,
            &format!("missing {} in sharepoint_account of '{}'", name, owner),
        )
    };
    Ok(SharepointConfig {
        account_name: field(sp.account_name, "account_name")?,
        site_address: field(sp.o365_site_address, "o365_site_address")?,
        site_name: field(sp.o365_site_name, "o365_site_name")?,
        folder_path: field(sp.o365_site_folderpath, "o365_site_folderpath")?,
        tenant_id: field(sp.o365_tenant_id, "o365_tenant_id")?,
        client_id: field(sp.o365_client_id, "o365_client_id")?,
        password_key: field(sp.o365_password_key, "o365_password_key")?,
    })
}

fn require_field(value: Option<String>, err: &str) -> Result<String, ConfigError> {
    value.ok_or_else(|| ConfigError::Parse(err.to_string()))
}
