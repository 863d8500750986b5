#[macro_use]
mod log;

mod aws;
mod config;
mod delivery;
mod error;
mod graph;
mod import;
mod matcher;
mod message;
mod provider;
mod rules;
mod runner;
mod secrets;

use aws::s3::S3Client;
use aws::AwsContext;
use config::Settings;
use graph::client::GraphConnector;
use graph::sharepoint::SharepointConnector;
use rules::RuleStore;
use runner::{ConfiguredAccount, Runner};
use secrets::SecretProvider;
use std::path::{Path, PathBuf};
use std::rc::Rc;

fn default_config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("mailroute")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".config").join("mailroute")
    } else {
        PathBuf::from(".")
    }
}

fn flag_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    let prefix = format!("--{}=", name);
    args.iter()
        .find(|a| a.starts_with(&prefix))
        .map(|a| &a[prefix.len()..])
}

/// Rule files live next to the account registry unless `[rules] dir` says
/// otherwise; a relative `dir` is taken from the config directory.
fn rules_dir(config_dir: &Path, settings: &Settings) -> PathBuf {
    match settings.rules_dir {
        Some(ref dir) if dir.is_absolute() => dir.clone(),
        Some(ref dir) => config_dir.join(dir),
        None => config_dir.to_path_buf(),
    }
}

fn print_rules(rules_dir: &Path, account: &str) {
    let store = RuleStore::new(rules_dir);
    let path = match store.resolve(account) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    let loaded = match rules::load_rule_file(&path) {
        Ok(rules) => rules,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    println!("Rules file: {}", path.display());
    println!("Conditions loaded: {}", loaded.conditions.len());
    for name in loaded.duplicate_names() {
        println!("Warning: condition name '{}' is used more than once", name);
    }
    println!();
    print!("{}", rules::format_rules_for_display(&loaded));
}

fn print_help() {
    eprintln!("Usage: mailroute [OPTIONS]");
    eprintln!();
    eprintln!("Polls unread mail for every configured account and delivers matches.");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config-dir=DIR        Directory holding o365_accounts[_local].json and rule files");
    eprintln!("                          (default: $XDG_CONFIG_HOME/mailroute or ~/.config/mailroute)");
    eprintln!("  --settings=PATH         settings.toml to use (default: DIR/settings.toml, optional)");
    eprintln!("  --account=NAME          Only process the account named NAME");
    eprintln!("  --print-rules=ACCOUNT   Parse and print the rule file ACCOUNT would use");
    eprintln!("  --verbose               Log debug output");
    eprintln!("  --help                  Show this help");
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        std::process::exit(0);
    }

    let config_dir = flag_value(&args, "config-dir")
        .map(PathBuf::from)
        .unwrap_or_else(default_config_dir);
    let settings_path = flag_value(&args, "settings")
        .map(PathBuf::from)
        .unwrap_or_else(|| config_dir.join("settings.toml"));

    let settings = match Settings::load(&settings_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading settings from {}: {}", settings_path.display(), e);
            std::process::exit(1);
        }
    };

    log::set_verbose(settings.log.verbose || args.iter().any(|a| a == "--verbose"));
    if let Some(ref file) = settings.log.file {
        if let Err(e) = log::init_file(file) {
            eprintln!("Warning: {}", e);
        }
    }

    let rules_dir = rules_dir(&config_dir, &settings);

    if let Some(account) = flag_value(&args, "print-rules") {
        print_rules(&rules_dir, account);
        std::process::exit(0);
    }

    let accounts = match config::load_accounts(&config_dir) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error loading accounts from {}: {}", config_dir.display(), e);
            std::process::exit(1);
        }
    };
    log_info!(
        "[Runner] {} account(s) configured in {}",
        accounts.len(),
        config_dir.display()
    );

    let agent = graph::build_agent(&settings.graph);
    let aws = match AwsContext::new(&settings.aws) {
        Ok(a) => Rc::new(a),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let mut configured = Vec::new();
    let mut rejected = 0;
    for account in accounts {
        match SecretProvider::from_method(account.password_method, &settings, &aws) {
            Ok(provider) => {
                log_debug!(
                    "[Secrets] Account '{}' uses {} secrets",
                    account.name,
                    provider.kind()
                );
                configured.push(ConfiguredAccount {
                    config: account,
                    secrets: Box::new(provider),
                });
            }
            Err(e) => {
                rejected += 1;
                log_error!("[Secrets] Account '{}' skipped: {}", account.name, e);
            }
        }
    }

    let mail = GraphConnector::new(agent.clone(), settings.graph.clone());
    let import = SharepointConnector::new(agent, settings.graph.clone());
    let object_store = S3Client::new(aws);
    let rule_store = RuleStore::new(&rules_dir);

    let runner = Runner {
        mail: &mail,
        import: &import,
        object_store: &object_store,
        rule_store: &rule_store,
        sheet_name: &settings.sheet_name,
    };
    let summary = runner.run(&configured, flag_value(&args, "account"));

    if rejected > 0 || summary.accounts_failed > 0 {
        std::process::exit(1);
    }
}
