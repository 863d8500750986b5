pub mod s3;

use crate::config::AwsSettings;
use crate::error::SecretError;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use std::cell::OnceCell;
use std::future::Future;
use tokio::runtime::Runtime;

/// S3 keys resolved from the secret store for one condition.
#[derive(Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn new(access_key: String, secret_key: String) -> Self {
        Credentials {
            access_key,
            secret_key,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Blocking front for the AWS SDK: one current-thread runtime, and the
/// shared SDK configuration loaded the first time a service needs it.
pub struct AwsContext {
    runtime: Runtime,
    settings: AwsSettings,
    shared: OnceCell<SdkConfig>,
}

impl AwsContext {
    pub fn new(settings: &AwsSettings) -> Result<Self, String> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| format!("failed to start AWS runtime: {}", e))?;
        Ok(AwsContext {
            runtime,
            settings: settings.clone(),
            shared: OnceCell::new(),
        })
    }

    pub(crate) fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Default credential and region chains, with `[aws] region` first.
    pub(crate) fn sdk_config(&self) -> &SdkConfig {
        self.shared.get_or_init(|| {
            log_debug!("[AWS] Loading SDK configuration");
            let mut loader = aws_config::defaults(BehaviorVersion::latest());
            if let Some(ref region) = self.settings.region {
                loader = loader.region(Region::new(region.clone()));
            }
            self.runtime.block_on(loader.load())
        })
    }

    pub(crate) fn s3_endpoint(&self) -> Option<&str> {
        self.settings.s3_endpoint.as_deref()
    }

    fn require_region(&self, service: &str) -> Result<(), SecretError> {
        match self.sdk_config().region() {
            Some(_) => Ok(()),
            None => Err(SecretError::Backend(format!(
                "no AWS region configured for {} (set [aws] region or AWS_REGION)",
                service
            ))),
        }
    }

    /// `GetSecretValue`; `Ok(None)` when the secret does not exist.
    pub fn secret_value(&self, secret_id: &str) -> Result<Option<String>, SecretError> {
        use aws_sdk_secretsmanager::error::DisplayErrorContext;

        self.require_region("secretsmanager")?;
        let mut config = aws_sdk_secretsmanager::config::Builder::from(self.sdk_config());
        if let Some(ref endpoint) = self.settings.secrets_manager_endpoint {
            config = config.endpoint_url(endpoint);
        }
        let client = aws_sdk_secretsmanager::Client::from_conf(config.build());

        log_debug!("[Secrets] GetSecretValue {}", secret_id);
        match self.block_on(client.get_secret_value().secret_id(secret_id).send()) {
            Ok(output) => Ok(output.secret_string().map(str::to_string)),
            Err(e)
                if e.as_service_error()
                    .is_some_and(|s| s.is_resource_not_found_exception()) =>
            {
                Ok(None)
            }
            Err(e) => Err(SecretError::Backend(format!(
                "GetSecretValue failed: {}",
                DisplayErrorContext(&e)
            ))),
        }
    }

    /// `GetParameter` with decryption; `Ok(None)` when the parameter does
    /// not exist.
    pub fn parameter_value(&self, name: &str) -> Result<Option<String>, SecretError> {
        use aws_sdk_ssm::error::DisplayErrorContext;

        self.require_region("ssm")?;
        let mut config = aws_sdk_ssm::config::Builder::from(self.sdk_config());
        if let Some(ref endpoint) = self.settings.ssm_endpoint {
            config = config.endpoint_url(endpoint);
        }
        let client = aws_sdk_ssm::Client::from_conf(config.build());

        log_debug!("[Secrets] GetParameter {}", name);
        let request = client.get_parameter().name(name).with_decryption(true);
        match self.block_on(request.send()) {
            Ok(output) => Ok(output
                .parameter()
                .and_then(|p| p.value())
                .map(str::to_string)),
            Err(e) if e.as_service_error().is_some_and(|s| s.is_parameter_not_found()) => Ok(None),
            Err(e) => Err(SecretError::Backend(format!(
                "GetParameter failed: {}",
                DisplayErrorContext(&e)
            ))),
        }
    }

    /// Context whose SDK configuration is fixed up front, so tests never
    /// consult the environment or instance metadata.
    #[cfg(test)]
    pub(crate) fn with_static_credentials(settings: &AwsSettings, region: &str) -> Self {
        let context = AwsContext::new(settings).unwrap();
        let config = context.block_on(
            aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(region.to_string()))
                .credentials_provider(aws_sdk_s3::config::Credentials::new(
                    "AKIDEXAMPLE",
                    "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
                    None,
                    None,
                    "test",
                ))
                .load(),
        );
        let _ = context.shared.set(config);
        context
    }
}
