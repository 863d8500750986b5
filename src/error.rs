use std::fmt;
use std::path::PathBuf;

/// Failure to resolve or read the rule set for an account.
#[derive(Debug)]
pub enum RuleError {
    ConfigNotFound {
        account: String,
        searched: Vec<PathBuf>,
    },
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, String),
}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleError::ConfigNotFound { account, searched } => {
                let paths: Vec<String> = searched.iter().map(|p| p.display().to_string()).collect();
                write!(
                    f,
                    "no rule file found for account '{}' (searched: {})",
                    account,
                    paths.join(", ")
                )
            }
            RuleError::Io(path, e) => write!(f, "failed to read {}: {}", path.display(), e),
            RuleError::Parse(path, e) => write!(f, "failed to parse {}: {}", path.display(), e),
        }
    }
}

impl std::error::Error for RuleError {}

/// Rule import source unreachable or returned something unusable.
#[derive(Debug)]
pub enum ImportError {
    Source(String),
    Malformed { file: String, reason: String },
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportError::Source(e) => write!(f, "rule import source error: {}", e),
            ImportError::Malformed { file, reason } => {
                write!(f, "malformed rule import file '{}': {}", file, reason)
            }
        }
    }
}

impl std::error::Error for ImportError {}

#[derive(Debug)]
pub enum SecretError {
    NotFound { scope: String, key: String },
    Backend(String),
}

impl fmt::Display for SecretError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretError::NotFound { scope, key } => {
                write!(f, "secret not found: {} / {}", scope, key)
            }
            SecretError::Backend(e) => write!(f, "secret backend error: {}", e),
        }
    }
}

impl std::error::Error for SecretError {}

#[derive(Debug)]
pub enum DeliveryError {
    MissingField {
        target: &'static str,
        field: &'static str,
    },
    NoRecipients,
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Secret(SecretError),
    Transport(String),
    /// Some attachments failed; the rest were delivered.
    Partial {
        delivered: usize,
        failures: Vec<(String, DeliveryError)>,
    },
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::MissingField { target, field } => {
                write!(f, "delivery target '{}' requires '{}'", target, field)
            }
            DeliveryError::NoRecipients => write!(f, "email_forward delivery has no recipients"),
            DeliveryError::Io { path, source } => {
                write!(f, "failed to write {}: {}", path.display(), source)
            }
            DeliveryError::Secret(e) => write!(f, "credential lookup failed: {}", e),
            DeliveryError::Transport(e) => write!(f, "transport error: {}", e),
            DeliveryError::Partial {
                delivered,
                failures,
            } => {
                let parts: Vec<String> = failures
                    .iter()
                    .map(|(name, e)| format!("{}: {}", name, e))
                    .collect();
                write!(
                    f,
                    "{} attachment(s) delivered, {} failed ({})",
                    delivered,
                    failures.len(),
                    parts.join("; ")
                )
            }
        }
    }
}

impl std::error::Error for DeliveryError {}

impl From<SecretError> for DeliveryError {
    fn from(e: SecretError) -> Self {
        DeliveryError::Secret(e)
    }
}
