use crate::aws::AwsContext;
use crate::config::{PasswordMethod, Settings};
use crate::error::SecretError;
use std::process::Command;
use std::rc::Rc;

/// Resolves a secret by `(scope, key)`, e.g. `("invoices", "GraphSecret")`
/// or `("supplier statements", "S3AccessKey")`.
pub trait SecretLookup {
    fn get(&self, scope: &str, key: &str) -> Result<String, SecretError>;
}

/// Secret backend, chosen once per account at startup.
pub enum SecretProvider {
    Keyring,
    SecretsManager(Rc<AwsContext>),
    ParameterStore {
        aws: Rc<AwsContext>,
        path_prefix: String,
    },
    Custom {
        command: String,
    },
}

impl SecretProvider {
    pub fn from_method(
        method: PasswordMethod,
        settings: &Settings,
        aws: &Rc<AwsContext>,
    ) -> Result<Self, String> {
        Ok(match method {
            PasswordMethod::Keyring => SecretProvider::Keyring,
            PasswordMethod::SecretsManager => SecretProvider::SecretsManager(aws.clone()),
            PasswordMethod::ParameterStore => SecretProvider::ParameterStore {
                aws: aws.clone(),
                path_prefix: settings.aws.ssm_path_prefix.clone(),
            },
            PasswordMethod::Custom => SecretProvider::Custom {
                command: settings.custom_secret_command.clone().ok_or_else(|| {
                    "password_method 'custom' requires [secrets] custom_command".to_string()
                })?,
            },
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SecretProvider::Keyring => "keyring",
            SecretProvider::SecretsManager(_) => "secretsmanager",
            SecretProvider::ParameterStore { .. } => "ssm",
            SecretProvider::Custom { .. } => "custom",
        }
    }
}

impl SecretLookup for SecretProvider {
    fn get(&self, scope: &str, key: &str) -> Result<String, SecretError> {
        log_debug!("[Secrets] Looking up {}/{} via {}", scope, key, self.kind());
        let found = match self {
            SecretProvider::Keyring => keyring_lookup(scope, key)?,
            SecretProvider::SecretsManager(aws) => aws.secret_value(&secret_id(scope, key))?,
            SecretProvider::ParameterStore { aws, path_prefix } => {
                aws.parameter_value(&parameter_name(path_prefix, scope, key))?
            }
            SecretProvider::Custom { command } => run_secret_command(command, scope, key)?,
        };

        found.ok_or_else(|| SecretError::NotFound {
            scope: scope.to_string(),
            key: key.to_string(),
        })
    }
}

fn keyring_lookup(scope: &str, key: &str) -> Result<Option<String>, SecretError> {
    let entry = keyring::Entry::new(scope, key)
        .map_err(|e| SecretError::Backend(format!("keyring: {}", e)))?;
    match entry.get_password() {
        Ok(password) => Ok(Some(password)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(SecretError::Backend(format!("keyring: {}", e))),
    }
}

pub fn secret_id(scope: &str, key: &str) -> String {
    format!("{}_{}", scope, key)
}

pub fn parameter_name(prefix: &str, scope: &str, key: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        secret_id(scope, key)
    } else {
        format!("{}/{}", prefix, secret_id(scope, key))
    }
}

/// Run `command` through `sh -c` with scope and key as `$1` and `$2`.
/// Empty output means the secret does not exist.
pub fn run_secret_command(command: &str, scope: &str, key: &str) -> Result<Option<String>, SecretError> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .arg("mailroute")
        .arg(scope)
        .arg(key)
        .output()
        .map_err(|e| SecretError::Backend(format!("failed to execute secret command: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SecretError::Backend(format!(
            "secret command exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let secret = String::from_utf8(output.stdout).map_err(|e| {
        SecretError::Backend(format!("secret command output is not valid UTF-8: {}", e))
    })?;
    let secret = secret.trim_end_matches(&['\r', '\n'][..]).to_string();
    Ok(if secret.is_empty() { None } else { Some(secret) })
}
