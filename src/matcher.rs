use crate::message::{Attachment, Message};
use crate::rules::{Condition, Pattern, RuleSet};

/// Outcome of evaluating one condition against one message. Scoped to a
/// single evaluation; never reused across conditions.
#[derive(Debug, Default)]
pub struct MatchResult<'m> {
    pub matched: bool,
    pub matched_attachments: Vec<&'m Attachment>,
}

impl<'m> MatchResult<'m> {
    fn no_match() -> Self {
        MatchResult::default()
    }
}

/// Evaluate one condition, short-circuiting at the first failing clause.
pub fn evaluate<'m>(message: &'m Message, condition: &Condition) -> MatchResult<'m> {
    let pattern = &condition.pattern;

    if pattern.is_empty() {
        log_debug!(
            "[Match] Condition '{}' has an empty pattern, skipping",
            condition.name
        );
        return MatchResult::no_match();
    }

    if let Some(ref sender) = pattern.sender {
        if !contains_ci(&message.from_address, sender) {
            return MatchResult::no_match();
        }
    }

    if let Some(ref alternatives) = pattern.subject {
        if !any_contained(&message.subject, alternatives) {
            return MatchResult::no_match();
        }
    }

    if let Some(ref alternatives) = pattern.body {
        if !any_contained(&message.body, alternatives) {
            return MatchResult::no_match();
        }
    }

    let mut matched_attachments = Vec::new();
    if pattern.attachments.is_some() {
        matched_attachments = matching_attachments(message, pattern);
        if matched_attachments.is_empty() {
            return MatchResult::no_match();
        }
        for attachment in &matched_attachments {
            log_info!(
                "[Match] Attachment '{}' meets condition '{}'",
                attachment.name,
                condition.name
            );
        }
    }

    MatchResult {
        matched: true,
        matched_attachments,
    }
}

/// Evaluate conditions in list order and return the first full match.
pub fn first_match<'r, 'm>(
    rules: &'r RuleSet,
    message: &'m Message,
) -> Option<(&'r Condition, MatchResult<'m>)> {
    for condition in &rules.conditions {
        if condition.is_placeholder() {
            continue;
        }
        let result = evaluate(message, condition);
        if result.matched {
            return Some((condition, result));
        }
    }
    None
}

/// Attachments whose lowercased name contains every filename fragment of
/// the pattern's first attachment entry.
fn matching_attachments<'m>(message: &'m Message, pattern: &Pattern) -> Vec<&'m Attachment> {
    let fragments: Vec<String> = match pattern.attachments.as_ref().and_then(|a| a.first()) {
        Some(entry) => entry.filename.iter().map(|f| f.to_lowercase()).collect(),
        None => return Vec::new(),
    };

    message
        .attachments
        .iter()
        .filter(|attachment| {
            let name = attachment.name.to_lowercase();
            fragments.iter().all(|fragment| name.contains(fragment.as_str()))
        })
        .collect()
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn any_contained(haystack: &str, alternatives: &[String]) -> bool {
    let haystack = haystack.to_lowercase();
    alternatives
        .iter()
        .any(|alt| haystack.contains(&alt.to_lowercase()))
}
