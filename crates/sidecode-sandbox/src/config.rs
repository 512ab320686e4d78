//! Command policy configuration.

use serde::{Deserialize, Serialize};

/// Rules for the command policy.
///
/// Each rule is either a bare program name (`"curl"`) or a wildcard pattern
/// over a whole command segment (`"git push *"`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Always denied, on top of the built-in dangerous patterns.
    pub deny: Vec<String>,

    /// Need a human in the loop before they run.
    pub confirm: Vec<String>,

    /// When set, only these programs may run. Anything else is denied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow: Option<Vec<String>>,

    /// Built-in patterns for destructive commands (recursive deletion, disk
    /// formatting, fork bombs, exfiltration, privilege escalation).
    pub builtin_denylist: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            deny: Vec::new(),
            confirm: default_confirm_rules(),
            allow: None,
            builtin_denylist: true,
        }
    }
}

impl PolicyConfig {
    /// A config with an allowlist of program names.
    pub fn allowlist<I, S>(programs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow: Some(programs.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Merge with another config (other takes precedence for the allowlist,
    /// rule lists are concatenated).
    pub fn merge(mut self, other: Self) -> Self {
        self.deny.extend(other.deny);
        for rule in other.confirm {
            if !self.confirm.contains(&rule) {
                self.confirm.push(rule);
            }
        }
        if other.allow.is_some() {
            self.allow = other.allow;
        }
        self.builtin_denylist = self.builtin_denylist && other.builtin_denylist;
        self
    }
}

fn default_confirm_rules() -> Vec<String> {
    ["rm *", "git push *", "git reset --hard *", "chmod *", "chown *", "kill *"]
        .into_iter()
        .map(String::from)
        .collect()
}
