use crate::error::RuleError;
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Condition name reserved for the sample entry shipped in rule templates.
pub const PLACEHOLDER_CONDITION: &str = "example_entry_will_be_ignored";

pub const DEFAULT_RULES_FILE: &str = "default_email_rules.json";

// --- JSON rule types ---

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Condition {
    pub name: String,
    #[serde(default)]
    pub pattern: Pattern,
    #[serde(default)]
    pub delivery: Option<Delivery>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pattern {
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub subject: Option<Vec<String>>,
    #[serde(default)]
    pub body: Option<Vec<String>>,
    #[serde(default)]
    pub attachments: Option<Vec<AttachmentPattern>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttachmentPattern {
    #[serde(default)]
    pub filename: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Local,
    S3,
    EmailForward,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Local => "local",
            Target::S3 => "s3",
            Target::EmailForward => "email_forward",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Delivery {
    pub target: Target,
    #[serde(default)]
    pub recipients: Option<Vec<String>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub subfolder: Option<String>,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub append_datetime: Option<bool>,
}

impl Delivery {
    pub fn email_forward(recipients: Vec<String>, body: Option<String>) -> Self {
        Delivery {
            target: Target::EmailForward,
            recipients: Some(recipients),
            body,
            path: None,
            region: None,
            bucket: None,
            subfolder: None,
            append_datetime: None,
        }
    }

    pub fn appends_datetime(&self) -> bool {
        self.append_datetime.unwrap_or(false)
    }
}

/// Rule files in the wild carry both `true` and `"True"`.
fn flexible_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        Str(String),
    }

    Ok(match Option::<BoolOrString>::deserialize(deserializer)? {
        None => None,
        Some(BoolOrString::Bool(b)) => Some(b),
        Some(BoolOrString::Str(s)) => Some(s.trim().eq_ignore_ascii_case("true")),
    })
}

impl Pattern {
    /// A pattern with no clause at all can never match.
    pub fn is_empty(&self) -> bool {
        self.sender.is_none()
            && self.subject.is_none()
            && self.body.is_none()
            && self.attachments.is_none()
    }
}

impl Condition {
    pub fn is_placeholder(&self) -> bool {
        self.name == PLACEHOLDER_CONDITION
    }
}

impl RuleSet {
    pub fn append(&mut self, conditions: Vec<Condition>) {
        self.conditions.extend(conditions);
    }

    /// Names that appear more than once, in first-seen order.
    pub fn duplicate_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut dups = Vec::new();
        for c in &self.conditions {
            if !seen.insert(c.name.as_str()) && !dups.contains(&c.name) {
                dups.push(c.name.clone());
            }
        }
        dups
    }
}

// --- Loading ---

pub struct RuleStore {
    dir: PathBuf,
}

impl RuleStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        RuleStore { dir: dir.into() }
    }

    pub fn account_file(&self, account_name: &str) -> PathBuf {
        self.dir.join(format!("{}_email_rules.json", account_name))
    }

    pub fn default_file(&self) -> PathBuf {
        self.dir.join(DEFAULT_RULES_FILE)
    }

    /// The account-specific rule file replaces the default one entirely.
    pub fn resolve(&self, account_name: &str) -> Result<PathBuf, RuleError> {
        let account_file = self.account_file(account_name);
        if account_file.exists() {
            return Ok(account_file);
        }
        let default_file = self.default_file();
        if default_file.exists() {
            return Ok(default_file);
        }
        Err(RuleError::ConfigNotFound {
            account: account_name.to_string(),
            searched: vec![account_file, default_file],
        })
    }

    pub fn load(&self, account_name: &str) -> Result<RuleSet, RuleError> {
        let path = self.resolve(account_name)?;
        let rules = load_rule_file(&path)?;
        log_info!(
            "[Rules] Loaded {} condition(s) for '{}' from {}",
            rules.conditions.len(),
            account_name,
            path.display()
        );
        for name in rules.duplicate_names() {
            log_warn!(
                "[Rules] Condition name '{}' appears more than once in {}",
                name,
                path.display()
            );
        }
        Ok(rules)
    }
}

pub fn load_rule_file(path: &Path) -> Result<RuleSet, RuleError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| RuleError::Io(path.to_path_buf(), e))?;
    parse_rules(&content).map_err(|e| RuleError::Parse(path.to_path_buf(), e))
}

/// Backslashes are doubled before parsing so unescaped Windows paths load
/// verbatim.
pub fn parse_rules(content: &str) -> Result<RuleSet, String> {
    let escaped = content.replace('\\', "\\\\");
    serde_json::from_str(&escaped).map_err(|e| e.to_string())
}

pub fn format_rules_for_display(rules: &RuleSet) -> String {
    if rules.conditions.is_empty() {
        return "No conditions defined.".to_string();
    }

    let mut out = String::new();
    for (idx, condition) in rules.conditions.iter().enumerate() {
        out.push_str(&format!("Condition {}: {}\n", idx + 1, condition.name));
        if condition.is_placeholder() {
            out.push_str("  (placeholder, ignored)\n");
            continue;
        }
        out.push_str(&format!(
            "  Match: {}\n",
            format_pattern_for_display(&condition.pattern)
        ));
        out.push_str(&format!(
            "  Delivery: {}\n",
            format_delivery_for_display(condition.delivery.as_ref())
        ));
    }
    out
}

fn format_pattern_for_display(pattern: &Pattern) -> String {
    if pattern.is_empty() {
        return "(empty, never matches)".to_string();
    }

    let mut parts = Vec::new();
    if let Some(ref sender) = pattern.sender {
        parts.push(format!("sender~'{}'", sender));
    }
    if let Some(ref subject) = pattern.subject {
        parts.push(format!("subject~any({})", subject.join(" | ")));
    }
    if let Some(ref body) = pattern.body {
        parts.push(format!("body~any({})", body.join(" | ")));
    }
    if let Some(ref attachments) = pattern.attachments {
        match attachments.first() {
            Some(a) => parts.push(format!("attachment~all({})", a.filename.join(" & "))),
            None => parts.push("attachment~(no usable entry)".to_string()),
        }
    }
    parts.join(", ")
}

fn format_delivery_for_display(delivery: Option<&Delivery>) -> String {
    let d = match delivery {
        Some(d) => d,
        None => return "(none)".to_string(),
    };
    match d.target {
        Target::EmailForward => format!(
            "email_forward -> {}",
            d.recipients.as_deref().unwrap_or(&[]).join(", ")
        ),
        Target::Local => format!(
            "local -> {}{}",
            d.path.as_deref().unwrap_or("(no path)"),
            if d.appends_datetime() { " (timestamped)" } else { "" }
        ),
        Target::S3 => format!(
            "s3 -> {}/{}{}",
            d.bucket.as_deref().unwrap_or("(no bucket)"),
            d.subfolder.as_deref().unwrap_or(""),
            if d.appends_datetime() { " (timestamped)" } else { "" }
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const DEFAULT_RULES: &str = r#"
{
  "conditions": [
    {"name": "example_entry_will_be_ignored", "pattern": {"sender": "x"}},
    {"name": "default invoices", "pattern": {"subject": ["invoice"]},
     "delivery": {"target": "local", "path": "/srv/invoices"}}
  ]
}
"#;

    #[test]
    fn test_parse_full_condition() {
        let rules = parse_rules(
            r#"
{
  "conditions": [
    {
      "name": "supplier statements",
      "pattern": {
        "sender": "accounts@supplier.com",
        "subject": ["Statement", "Remittance"],
        "attachments": [{"filename": ["statement", ".pdf"]}]
      },
      "delivery": {
        "target": "s3",
        "region": "eu-west-2",
        "bucket": "finance-inbox",
        "subfolder": "statements/",
        "append_datetime": "True"
      }
    }
  ]
}
"#,
        )
        .unwrap();
        assert_eq!(rules.conditions.len(), 1);
        let c = &rules.conditions[0];
        assert_eq!(c.pattern.sender.as_deref(), Some("accounts@supplier.com"));
        assert_eq!(c.pattern.subject.as_ref().unwrap().len(), 2);
        let d = c.delivery.as_ref().unwrap();
        assert_eq!(d.target, Target::S3);
        assert!(d.appends_datetime());
    }

    #[test]
    fn test_append_datetime_accepts_bool_and_string() {
        let rules = parse_rules(
            r#"{"conditions": [
                {"name": "a", "pattern": {"sender": "x"},
                 "delivery": {"target": "local", "path": "/a", "append_datetime": true}},
                {"name": "b", "pattern": {"sender": "x"},
                 "delivery": {"target": "local", "path": "/b", "append_datetime": "false"}},
                {"name": "c", "pattern": {"sender": "x"},
                 "delivery": {"target": "local", "path": "/c"}}
            ]}"#,
        )
        .unwrap();
        let flags: Vec<bool> = rules
            .conditions
            .iter()
            .map(|c| c.delivery.as_ref().unwrap().appends_datetime())
            .collect();
        assert_eq!(flags, vec![true, false, false]);
    }

    #[test]
    fn test_windows_paths_load_verbatim() {
        let rules = parse_rules(
            r#"{"conditions": [{"name": "w", "pattern": {"sender": "x"},
                "delivery": {"target": "local", "path": "C:\exports\invoices"}}]}"#,
        )
        .unwrap();
        assert_eq!(
            rules.conditions[0]
                .delivery
                .as_ref()
                .unwrap()
                .path
                .as_deref(),
            Some("C:\\exports\\invoices")
        );
    }

    #[test]
    fn test_unknown_target_is_error() {
        let result = parse_rules(
            r#"{"conditions": [{"name": "x", "pattern": {"sender": "x"},
                "delivery": {"target": "ftp"}}]}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_account_file_replaces_default() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(DEFAULT_RULES_FILE), DEFAULT_RULES).unwrap();
        fs::write(
            dir.path().join("ap_email_rules.json"),
            r#"{"conditions": [{"name": "ap only", "pattern": {"sender": "ap@"}}]}"#,
        )
        .unwrap();

        let store = RuleStore::new(dir.path());
        let rules = store.load("ap").unwrap();
        assert_eq!(rules.conditions.len(), 1);
        assert_eq!(rules.conditions[0].name, "ap only");

        let fallback = store.load("sales").unwrap();
        assert_eq!(fallback.conditions.len(), 2);
        assert_eq!(fallback.conditions[1].name, "default invoices");
    }

    #[test]
    fn test_config_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuleStore::new(dir.path());
        match store.load("ap") {
            Err(RuleError::ConfigNotFound { account, searched }) => {
                assert_eq!(account, "ap");
                assert_eq!(searched.len(), 2);
            }
            other => panic!("expected ConfigNotFound, got {:?}", other.map(|r| r.conditions.len())),
        }
    }

    #[test]
    fn test_malformed_rule_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(DEFAULT_RULES_FILE), "{not json").unwrap();
        let store = RuleStore::new(dir.path());
        assert!(matches!(store.load("ap"), Err(RuleError::Parse(_, _))));
    }

    #[test]
    fn test_empty_pattern_and_placeholder() {
        let rules = parse_rules(DEFAULT_RULES).unwrap();
        assert!(rules.conditions[0].is_placeholder());
        assert!(!rules.conditions[1].is_placeholder());
        assert!(Pattern::default().is_empty());
        assert!(!rules.conditions[1].pattern.is_empty());
    }

    #[test]
    fn test_duplicate_names() {
        let rules = parse_rules(
            r#"{"conditions": [
                {"name": "a", "pattern": {"sender": "x"}},
                {"name": "b", "pattern": {"sender": "y"}},
                {"name": "a", "pattern": {"sender": "z"}},
                {"name": "a", "pattern": {"sender": "w"}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(rules.duplicate_names(), vec!["a".to_string()]);
    }

    #[test]
    fn test_format_rules_for_display() {
        let rules = parse_rules(DEFAULT_RULES).unwrap();
        let out = format_rules_for_display(&rules);
        assert!(out.contains("Condition 1: example_entry_will_be_ignored"));
        assert!(out.contains("(placeholder, ignored)"));
        assert!(out.contains("subject~any(invoice)"));
        assert!(out.contains("local -> /srv/invoices"));
    }
}
