use super::{AwsContext, Credentials};
use crate::delivery::ObjectStore;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use std::rc::Rc;

/// `PutObject` with per-condition credentials. Virtual-hosted addressing
/// against AWS, path-style when `[aws] s3_endpoint` points elsewhere.
pub struct S3Client {
    aws: Rc<AwsContext>,
}

impl S3Client {
    pub fn new(aws: Rc<AwsContext>) -> Self {
        S3Client { aws }
    }

    fn client(&self, region: &str, credentials: &Credentials) -> aws_sdk_s3::Client {
        let mut config = aws_sdk_s3::config::Builder::from(self.aws.sdk_config())
            .region(Region::new(region.to_string()))
            .credentials_provider(aws_sdk_s3::config::Credentials::new(
                credentials.access_key.clone(),
                credentials.secret_key.clone(),
                None,
                None,
                "mailroute-secrets",
            ));
        if let Some(endpoint) = self.aws.s3_endpoint() {
            config = config.endpoint_url(endpoint).force_path_style(true);
        }
        aws_sdk_s3::Client::from_conf(config.build())
    }
}

impl ObjectStore for S3Client {
    fn put_object(
        &self,
        bucket: &str,
        region: &str,
        key: &str,
        bytes: &[u8],
        credentials: &Credentials,
    ) -> Result<(), String> {
        log_debug!("[S3] PUT s3://{}/{} ({} bytes)", bucket, key, bytes.len());
        let client = self.client(region, credentials);
        let request = client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type("application/octet-stream")
            .body(ByteStream::from(bytes.to_vec()));

        match self.aws.block_on(request.send()) {
            Ok(_) => {
                log_info!("[S3] Uploaded s3://{}/{}", bucket, key);
                Ok(())
            }
            Err(e) => Err(format!("PutObject failed: {}", DisplayErrorContext(&e))),
        }
    }
}
