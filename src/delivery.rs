use crate::aws::Credentials;
use crate::error::DeliveryError;
use crate::message::{Attachment, Message};
use crate::provider::MailProvider;
use crate::rules::{Delivery, Target};
use crate::secrets::SecretLookup;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

pub const S3_ACCESS_KEY: &str = "S3AccessKey";
pub const S3_SECRET_KEY: &str = "S3SecretKey";

/// Object storage the dispatcher uploads to.
pub trait ObjectStore {
    fn put_object(
        &self,
        bucket: &str,
        region: &str,
        key: &str,
        bytes: &[u8],
        credentials: &Credentials,
    ) -> Result<(), String>;
}

/// Routes a matched condition to its delivery target.
pub struct Dispatcher<'a> {
    mail: &'a dyn MailProvider,
    secrets: &'a dyn SecretLookup,
    store: &'a dyn ObjectStore,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        mail: &'a dyn MailProvider,
        secrets: &'a dyn SecretLookup,
        store: &'a dyn ObjectStore,
    ) -> Self {
        Dispatcher {
            mail,
            secrets,
            store,
        }
    }

    /// Deliver and return how many items went out (attachments written or
    /// uploaded, or 1 for a forward).
    pub fn dispatch(
        &self,
        condition_name: &str,
        delivery: &Delivery,
        message: &Message,
        matched_attachments: &[&Attachment],
    ) -> Result<usize, DeliveryError> {
        log_debug!(
            "[Delivery] Condition '{}' -> {} for email {} ({} matched attachment(s))",
            condition_name,
            delivery.target.as_str(),
            message.id,
            matched_attachments.len()
        );

        match delivery.target {
            Target::EmailForward => self.forward(condition_name, delivery, message),
            Target::Local | Target::S3 if matched_attachments.is_empty() => {
                log_info!(
                    "[Delivery] Condition '{}' matched email {} but has no attachments to deliver",
                    condition_name,
                    message.id
                );
                Ok(0)
            }
            Target::Local => {
                let dir = delivery.path.as_deref().ok_or(DeliveryError::MissingField {
                    target: "local",
                    field: "path",
                })?;
                deliver_each(delivery, message, matched_attachments, |name, content| {
                    write_local(Path::new(dir), name, content).map(|path| {
                        log_info!(
                            "[Delivery] Wrote '{}' for condition '{}'",
                            path.display(),
                            condition_name
                        );
                    })
                })
            }
            Target::S3 => self.upload(condition_name, delivery, message, matched_attachments),
        }
    }

    fn forward(
        &self,
        condition_name: &str,
        delivery: &Delivery,
        message: &Message,
    ) -> Result<usize, DeliveryError> {
        let recipients: Vec<String> = delivery
            .recipients
            .iter()
            .flatten()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        if recipients.is_empty() {
            return Err(DeliveryError::NoRecipients);
        }

        let comment = delivery.body.as_deref().unwrap_or("");
        self.mail
            .forward(&message.id, &recipients, comment)
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        log_info!(
            "[Delivery] Forwarded email {} to {} (condition: {})",
            message.id,
            recipients.join(", "),
            condition_name
        );
        Ok(1)
    }

    fn upload(
        &self,
        condition_name: &str,
        delivery: &Delivery,
        message: &Message,
        matched_attachments: &[&Attachment],
    ) -> Result<usize, DeliveryError> {
        let bucket = delivery.bucket.as_deref().ok_or(DeliveryError::MissingField {
            target: "s3",
            field: "bucket",
        })?;
        let region = delivery.region.as_deref().ok_or(DeliveryError::MissingField {
            target: "s3",
            field: "region",
        })?;

        let credentials = Credentials::new(
            self.secrets.get(condition_name, S3_ACCESS_KEY)?,
            self.secrets.get(condition_name, S3_SECRET_KEY)?,
        );
        let prefix = delivery.subfolder.as_deref().unwrap_or("");

        deliver_each(delivery, message, matched_attachments, |name, content| {
            let key = format!("{}{}", prefix, name);
            self.store
                .put_object(bucket, region, &key, content, &credentials)
                .map_err(DeliveryError::Transport)
        })
    }
}

/// Deliver every attachment independently and aggregate the failures.
fn deliver_each<F>(
    delivery: &Delivery,
    message: &Message,
    attachments: &[&Attachment],
    mut send: F,
) -> Result<usize, DeliveryError>
where
    F: FnMut(&str, &[u8]) -> Result<(), DeliveryError>,
{
    let mut delivered = 0usize;
    let mut failures = Vec::new();

    for attachment in attachments {
        let name = delivery_name(&attachment.name, delivery, message);
        match send(&name, &attachment.content) {
            Ok(()) => delivered += 1,
            Err(e) => {
                log_warn!(
                    "[Delivery] Failed to deliver '{}' from email {}: {}",
                    name,
                    message.id,
                    e
                );
                failures.push((name, e));
            }
        }
    }

    if failures.is_empty() {
        Ok(delivered)
    } else {
        Err(DeliveryError::Partial {
            delivered,
            failures,
        })
    }
}

/// File name used at the destination: path components stripped, optionally
/// stamped with the message's received time.
fn delivery_name(raw: &str, delivery: &Delivery, message: &Message) -> String {
    let name = sanitize_file_name(raw);
    if !delivery.appends_datetime() {
        return name;
    }
    match message.received_at {
        Some(received) => timestamped_name(&name, received),
        None => {
            log_warn!(
                "[Delivery] Email {} has no received time; keeping name '{}'",
                message.id,
                name
            );
            name
        }
    }
}

/// `invoice.pdf` received at 2024-03-01T10:15:00Z becomes
/// `invoice_2024-03-01_101500.pdf`.
pub fn timestamped_name(name: &str, received: DateTime<Utc>) -> String {
    let stamp = received.format("%Y-%m-%d_%H%M%S");
    match name.rsplit_once('.') {
        Some((stem, ext)) => format!("{}_{}.{}", stem, stamp, ext),
        None => format!("{}_{}", name, stamp),
    }
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "attachment".to_string(),
        other => other.to_string(),
    }
}

fn write_local(dir: &Path, name: &str, content: &[u8]) -> Result<PathBuf, DeliveryError> {
    fs::create_dir_all(dir).map_err(|e| DeliveryError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let path = dir.join(name);
    fs::write(&path, content).map_err(|e| DeliveryError::Io {
        path: path.clone(),
        source: e,
    })?;
    Ok(path)
}
