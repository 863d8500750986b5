use crate::config::AccountConfig;
use crate::delivery::{Dispatcher, ObjectStore};
use crate::error::DeliveryError;
use crate::import::{load_with_import, ImportConnector, RuleImportSource};
use crate::matcher::first_match;
use crate::message::Message;
use crate::provider::{MailConnector, MailProvider};
use crate::rules::{RuleSet, RuleStore};
use crate::secrets::SecretLookup;

/// An account together with the secret backend chosen for it at startup.
pub struct ConfiguredAccount {
    pub config: AccountConfig,
    pub secrets: Box<dyn SecretLookup>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub accounts: usize,
    pub accounts_failed: usize,
    pub messages_seen: usize,
    pub matched: usize,
    pub delivered: usize,
    pub delivery_failures: usize,
}

/// Everything message processing needs for one account.
pub struct AccountContext<'a> {
    pub account: &'a AccountConfig,
    pub client: &'a dyn MailProvider,
    pub rules: &'a RuleSet,
    pub dispatcher: &'a Dispatcher<'a>,
}

pub struct Runner<'a> {
    pub mail: &'a dyn MailConnector,
    pub import: &'a dyn ImportConnector,
    pub object_store: &'a dyn ObjectStore,
    pub rule_store: &'a RuleStore,
    pub sheet_name: &'a str,
}

impl<'a> Runner<'a> {
    /// Process every account (or only `only`) in order. Failures are
    /// contained to the account, message or attachment they hit.
    pub fn run(&self, accounts: &[ConfiguredAccount], only: Option<&str>) -> RunSummary {
        let mut summary = RunSummary::default();

        for entry in accounts {
            if only.map_or(false, |name| name != entry.config.name) {
                continue;
            }
            summary.accounts += 1;
            log_info!("[Runner] Processing account '{}'", entry.config.name);
            if let Err(e) = self.run_account(entry, &mut summary) {
                summary.accounts_failed += 1;
                log_error!("[Runner] Skipping account '{}': {}", entry.config.name, e);
            }
        }

        if let Some(name) = only {
            if summary.accounts == 0 {
                log_warn!("[Runner] No configured account named '{}'", name);
            }
        }

        log_info!(
            "[Runner] Done: {} account(s), {} message(s), {} matched, {} delivered, {} delivery failure(s)",
            summary.accounts,
            summary.messages_seen,
            summary.matched,
            summary.delivered,
            summary.delivery_failures
        );
        summary
    }

    fn run_account(
        &self,
        entry: &ConfiguredAccount,
        summary: &mut RunSummary,
    ) -> Result<(), String> {
        let account = &entry.config;
        let secrets = entry.secrets.as_ref();

        let password = secrets
            .get(&account.name, &account.password_key)
            .map_err(|e| format!("password lookup failed: {}", e))?;
        let client = self
            .mail
            .connect(account, &password)
            .map_err(|e| format!("authentication failed: {}", e))?;

        let messages = client
            .list_unread()
            .map_err(|e| format!("listing unread messages failed: {}", e))?;
        if messages.is_empty() {
            log_info!("[Runner] No unread messages for '{}'", account.name);
            return Ok(());
        }

        let source = self.import_source(account, secrets);
        let import = match (source.as_deref(), account.sharepoint.as_ref()) {
            (Some(source), Some(sp)) => Some((source, sp.folder_path.as_str())),
            _ => None,
        };
        let rules = load_with_import(self.rule_store, &account.name, import, self.sheet_name)
            .map_err(|e| e.to_string())?;

        let dispatcher = Dispatcher::new(client.as_ref(), secrets, self.object_store);
        let ctx = AccountContext {
            account,
            client: client.as_ref(),
            rules: &rules,
            dispatcher: &dispatcher,
        };

        for message in messages {
            process_message(&ctx, message, summary);
        }
        Ok(())
    }

    /// Sharepoint import source for the account, if one is configured and
    /// reachable. Failures only cost the import.
    fn import_source(
        &self,
        account: &AccountConfig,
        secrets: &dyn SecretLookup,
    ) -> Option<Box<dyn RuleImportSource>> {
        let sp = account.sharepoint.as_ref()?;
        let connected = secrets
            .get(&sp.account_name, &sp.password_key)
            .map_err(|e| e.to_string())
            .and_then(|secret| self.import.connect(sp, &secret).map_err(|e| e.to_string()));
        match connected {
            Ok(source) => Some(source),
            Err(e) => {
                log_error!(
                    "[Import] Sharepoint account '{}' unavailable, using local rules only: {}",
                    sp.account_name,
                    e
                );
                None
            }
        }
    }
}

/// Evaluate one unread message and dispatch the first matching condition.
///
/// The message is marked read before evaluation so a crash mid-delivery
/// never delivers it twice. If the body or attachments cannot be fetched it
/// stays unread for the next run.
pub fn process_message(ctx: &AccountContext, mut message: Message, summary: &mut RunSummary) {
    summary.messages_seen += 1;
    let id = message.id.clone();
    log_debug!(
        "[Runner] Email {} from {} to {}: '{}'",
        id,
        message.from_address,
        message.to_addresses.join(", "),
        message.subject
    );

    if message.is_undeliverable_notice() {
        log_info!(
            "[Runner] Email {} is a bounce notice ('{}'), marking read",
            id,
            message.subject
        );
        if let Err(e) = ctx.client.mark_read(&id) {
            log_error!("[Runner] Failed to mark bounce {} read: {}", id, e);
        }
        return;
    }

    match ctx.client.get_body(&id) {
        Ok(body) => message.body = body.plain_text(),
        Err(e) => {
            log_warn!("[Runner] Could not fetch body of {}, leaving unread: {}", id, e);
            return;
        }
    }

    if message.has_attachments {
        match ctx.client.list_attachments(&id) {
            Ok(attachments) => message.attachments = attachments,
            Err(e) => {
                log_warn!(
                    "[Runner] Could not fetch attachments of {}, leaving unread: {}",
                    id,
                    e
                );
                return;
            }
        }
    }

    if let Err(e) = ctx.client.mark_read(&id) {
        log_error!(
            "[Runner] Could not mark {} read, not evaluating until next run: {}",
            id,
            e
        );
        return;
    }

    let (condition, result) = match first_match(ctx.rules, &message) {
        Some(found) => found,
        None => {
            log_debug!("[Runner] Email {} matched no condition", id);
            return;
        }
    };
    summary.matched += 1;
    log_info!(
        "[Runner] Email {} ('{}' from {}) matched condition '{}' for '{}'",
        id,
        message.subject,
        message.from_address,
        condition.name,
        ctx.account.name
    );

    let delivery = match condition.delivery {
        Some(ref d) => d,
        None => {
            log_warn!(
                "[Runner] Condition '{}' has no delivery configured, nothing sent",
                condition.name
            );
            return;
        }
    };

    match ctx
        .dispatcher
        .dispatch(&condition.name, delivery, &message, &result.matched_attachments)
    {
        Ok(count) => summary.delivered += count,
        Err(DeliveryError::Partial {
            delivered,
            failures,
        }) => {
            summary.delivered += delivered;
            summary.delivery_failures += failures.len();
            for (name, e) in &failures {
                log_error!(
                    "[Runner] Condition '{}': '{}' not delivered: {}",
                    condition.name,
                    name,
                    e
                );
            }
        }
        Err(e) => {
            summary.delivery_failures += 1;
            log_error!(
                "[Runner] Condition '{}': delivery failed for {}: {}",
                condition.name,
                id,
                e
            );
        }
    }
}
