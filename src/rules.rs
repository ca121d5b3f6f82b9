// src/rules.rs

//! Rule engine for install/upgrade file filtering.
//!
//! The rule file is line oriented: blank lines and `#` comments are
//! skipped, every other line is `EVENT PATTERN ACTION` with
//! event ∈ {INSTALL, UPGRADE} and action ∈ {YES, NO}. Patterns are
//! regular expressions matched (unanchored) against the file path
//! prefixed with `/`. Declaration order matters: rules are scanned in
//! reverse, so later declarations win.

use crate::db::PackageRecord;
use crate::{Error, Result};
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Which operation a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleEvent {
    /// Filters which archive entries are extracted at all.
    Install,
    /// Marks existing files to keep when clearing for an upgrade.
    Upgrade,
}

/// One parsed rule. Immutable once parsed.
#[derive(Debug, Clone)]
pub struct Rule {
    pub event: RuleEvent,
    pub pattern: Regex,
    /// true = YES, false = NO
    pub action: bool,
}

impl Rule {
    fn applies_to(&self, file: &str) -> bool {
        self.pattern.is_match(&format!("/{file}"))
    }
}

/// Parse a rule file. A missing file is an empty rule set, anything
/// malformed is a fatal error naming the file and line.
pub fn read_rules(path: &Path) -> Result<Vec<Rule>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io("read", path, e)),
    };

    let mut rules = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let lineno = idx + 1;

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let [event, pattern, action] = tokens[..] else {
            return Err(Error::Rules {
                file: path.to_path_buf(),
                line: lineno,
                message: "wrong number of arguments".to_string(),
            });
        };

        let event = match event {
            "INSTALL" => RuleEvent::Install,
            "UPGRADE" => RuleEvent::Upgrade,
            other => {
                return Err(Error::Rules {
                    file: path.to_path_buf(),
                    line: lineno,
                    message: format!("'{other}' unknown event"),
                });
            }
        };

        let action = match action {
            "YES" => true,
            "NO" => false,
            other => {
                return Err(Error::Rules {
                    file: path.to_path_buf(),
                    line: lineno,
                    message: format!("'{other}' unknown action, should be YES or NO"),
                });
            }
        };

        let pattern = Regex::new(pattern).map_err(|e| Error::Rules {
            file: path.to_path_buf(),
            line: lineno,
            message: format!("error compiling regular expression '{pattern}': {e}"),
        })?;

        rules.push(Rule {
            event,
            pattern,
            action,
        });
    }

    debug!("{} rules read from {}", rules.len(), path.display());

    Ok(rules)
}

/// Filter a manifest through the INSTALL rules.
///
/// The record is left holding the install set; the returned set holds
/// the files excluded from extraction. Files with no matching rule
/// default to install.
pub fn apply_install_rules(record: &mut PackageRecord, rules: &[Rule]) -> BTreeSet<String> {
    let install_rules: Vec<&Rule> = rules
        .iter()
        .filter(|r| r.event == RuleEvent::Install)
        .collect();

    let mut install_set = BTreeSet::new();
    let mut non_install_set = BTreeSet::new();

    for file in &record.files {
        let mut install = true;
        for rule in install_rules.iter().rev() {
            if rule.applies_to(file) {
                install = rule.action;
                break;
            }
        }
        if install {
            install_set.insert(file.clone());
        } else {
            non_install_set.insert(file.clone());
        }
    }

    record.files = install_set;
    non_install_set
}

/// Compute the keep list: files an UPGRADE/NO rule protects from
/// deletion during upgrade or forced conflict clearing.
pub fn make_keep_list(files: &BTreeSet<String>, rules: &[Rule]) -> BTreeSet<String> {
    let upgrade_rules: Vec<&Rule> = rules
        .iter()
        .filter(|r| r.event == RuleEvent::Upgrade)
        .collect();

    let mut keep_list = BTreeSet::new();

    for file in files {
        for rule in upgrade_rules.iter().rev() {
            if rule.applies_to(file) {
                if !rule.action {
                    keep_list.insert(file.clone());
                }
                break;
            }
        }
    }

    keep_list
}
