//! Shell command classification.
//!
//! A command string is split into segments on shell separators (`;`, `&&`,
//! `||`, `|`, `&`, newlines and command substitutions). Each segment yields a
//! program name with leading `VAR=value` assignments and wrappers such as
//! `env` or `nohup` skipped. Rules are then applied in this order:
//!
//! 1. built-in dangerous patterns
//! 2. configured deny rules
//! 3. the allowlist, when configured (a miss is a denial)
//! 4. confirmation rules
//!
//! Anything left over is allowed.
//!
//! Command strings handed to another interpreter (`sh -c`, `bash -c`,
//! `eval`, `find -exec`) are classified recursively, and a denial or
//! confirmation inside them applies to the whole command.

use crate::config::PolicyConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use sidecode_util::wildcard;
use tracing::{debug, warn};

/// Outcome of classifying a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Allowed,
    Denied(String),
    RequiresConfirmation(String),
}

impl Classification {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Allowed => None,
            Self::Denied(reason) | Self::RequiresConfirmation(reason) => Some(reason),
        }
    }
}

struct DangerPattern {
    regex: Regex,
    reason: &'static str,
}

/// Patterns checked against the raw command, before any splitting.
static DANGEROUS_PATTERNS: Lazy<Vec<DangerPattern>> = Lazy::new(|| {
    [
        (r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:?\s*&\s*\}", "fork bomb"),
        (
            r"\b(curl|wget|fetch)\b[^;&|]*\|\s*(sudo\s+)?(ba|z|k|da)?sh\b",
            "piping downloaded content into a shell",
        ),
        (
            r"\b(nc|ncat|netcat)\b[^;&|]*\s-[a-zA-Z]*[ec]\b",
            "netcat with command execution",
        ),
        (
            r"\bcurl\b[^;&|]*(\s-d\s*@|\s--data(-binary|-raw|-urlencode)?[=\s]+@|\s-F\s*\S+=@|\s--upload-file\b|\s-T\s)",
            "uploading local files",
        ),
        (r"/dev/(tcp|udp)/", "raw network socket access"),
        (r"\b(scp|sftp)\s", "copying files to a remote host"),
        (
            r">\s*/dev/(sd[a-z]|nvme\d|hd[a-z]|disk\d|mmcblk\d)",
            "writing to a block device",
        ),
        (
            r"\bchmod\s+(-[a-zA-Z]+\s+)*[ugoa]*\+[rwx]*s",
            "setting setuid or setgid bits",
        ),
        (
            r"\bchmod\s+(-[a-zA-Z]+\s+)*0?777\s+/(\s|$)",
            "making the filesystem root world-writable",
        ),
        (r"\bchown\s+(-[a-zA-Z]+\s+)*root\b", "changing ownership to root"),
    ]
    .into_iter()
    .map(|(pattern, reason)| DangerPattern {
        regex: Regex::new(pattern).expect("Invalid regex pattern - this is a compile-time constant"),
        reason,
    })
    .collect()
});

/// Wrappers that run another program given as their first argument.
const WRAPPERS: &[&str] = &[
    "env", "nohup", "time", "command", "builtin", "exec", "xargs", "nice", "timeout",
];

const SHELLS: &[&str] = &["sh", "bash", "zsh", "dash", "ksh"];

/// Depth limit for commands nested inside `sh -c` and friends.
const MAX_NESTING: usize = 4;

const PRIVILEGE_PROGRAMS: &[&str] = &["sudo", "su", "doas", "pkexec"];

const DISK_PROGRAMS: &[&str] = &["fdisk", "sfdisk", "parted", "wipefs", "mkswap"];

/// Pure command classifier built from a [`PolicyConfig`].
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    deny: Vec<String>,
    confirm: Vec<String>,
    allow: Option<Vec<String>>,
    builtin_denylist: bool,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::new(&PolicyConfig::default())
    }
}

impl CommandPolicy {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            deny: config.deny.clone(),
            confirm: config.confirm.clone(),
            allow: config.allow.clone(),
            builtin_denylist: config.builtin_denylist,
        }
    }

    pub fn has_allowlist(&self) -> bool {
        self.allow.is_some()
    }

    /// Classify a command string.
    pub fn classify(&self, command: &str) -> Classification {
        let result = self.classify_inner(command.trim(), 0);
        match &result {
            Classification::Allowed => debug!(command, "Command allowed"),
            Classification::Denied(reason) => warn!(command, reason = %reason, "Command denied"),
            Classification::RequiresConfirmation(reason) => {
                debug!(command, reason = %reason, "Command requires confirmation")
            }
        }
        result
    }

    fn classify_inner(&self, command: &str, depth: usize) -> Classification {
        if command.is_empty() {
            return Classification::Denied("empty command".to_string());
        }

        if self.builtin_denylist {
            if let Some(pattern) = DANGEROUS_PATTERNS.iter().find(|p| p.regex.is_match(command)) {
                return Classification::Denied(format!("{} is not allowed", pattern.reason));
            }
        }

        let segments: Vec<Segment> = split_segments(command)
            .iter()
            .filter_map(|s| Segment::parse(s))
            .collect();

        if segments.is_empty() {
            return Classification::Denied("no program found in command".to_string());
        }

        if self.builtin_denylist {
            if let Some(reason) = segments.iter().find_map(dangerous_program) {
                return Classification::Denied(reason);
            }
        }

        for segment in &segments {
            if let Some(rule) = segment.find_rule(&self.deny) {
                return Classification::Denied(format!(
                    "'{}' matches deny rule '{}'",
                    segment.text, rule
                ));
            }
        }

        let mut nested_confirmation = None;
        for segment in &segments {
            for nested in segment.nested_commands() {
                if depth >= MAX_NESTING {
                    return Classification::Denied("shell commands nested too deeply".to_string());
                }
                match self.classify_inner(nested.trim(), depth + 1) {
                    Classification::Allowed => {}
                    Classification::Denied(reason) => {
                        return Classification::Denied(format!(
                            "'{}' runs a denied command: {}",
                            segment.program, reason
                        ));
                    }
                    Classification::RequiresConfirmation(reason) => {
                        nested_confirmation.get_or_insert(reason);
                    }
                }
            }
        }

        if let Some(allow) = &self.allow {
            if let Some(segment) = segments.iter().find(|s| s.find_rule(allow).is_none()) {
                return Classification::Denied(format!(
                    "program '{}' is not on the allowlist",
                    segment.program
                ));
            }
        }

        for segment in &segments {
            if let Some(rule) = segment.find_rule(&self.confirm) {
                return Classification::RequiresConfirmation(format!(
                    "'{}' matches confirmation rule '{}'",
                    segment.text, rule
                ));
            }
        }

        match nested_confirmation {
            Some(reason) => Classification::RequiresConfirmation(reason),
            None => Classification::Allowed,
        }
    }
}

/// One simple command out of a pipeline or list.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    program: String,
    args: Vec<String>,
    /// Program and arguments joined by single spaces, quotes removed.
    text: String,
}

impl Segment {
    fn parse(raw: &str) -> Option<Self> {
        let words = split_words(raw);
        let mut rest = words.as_slice();

        loop {
            match rest.first() {
                Some(word) if is_assignment(word) => rest = &rest[1..],
                Some(word) if WRAPPERS.contains(&basename(word)) => {
                    let wrapper = basename(word);
                    rest = &rest[1..];
                    while let Some(option) = rest.first().filter(|w| w.starts_with('-')) {
                        rest = &rest[1..];
                        if wrapper_option_takes_value(wrapper, option) && !rest.is_empty() {
                            rest = &rest[1..];
                        }
                    }
                    // timeout DURATION COMMAND
                    if wrapper == "timeout" && !rest.is_empty() {
                        rest = &rest[1..];
                    }
                }
                _ => break,
            }
        }

        let (first, args) = rest.split_first()?;
        let program = basename(first).to_string();
        let args = args.to_vec();
        let text = std::iter::once(program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");

        Some(Self {
            program,
            args,
            text,
        })
    }

    /// Command strings this segment hands to another interpreter.
    fn nested_commands(&self) -> Vec<String> {
        let program = self.program.as_str();
        if SHELLS.contains(&program) {
            let mut args = self.args.iter();
            while let Some(arg) = args.next() {
                if arg.starts_with('-') && !arg.starts_with("--") && arg.contains('c') {
                    return args.next().cloned().into_iter().collect();
                }
            }
            return Vec::new();
        }

        match program {
            "eval" if !self.args.is_empty() => vec![self.args.join(" ")],
            "find" => {
                let mut commands = Vec::new();
                let mut args = self.args.iter();
                while let Some(arg) = args.next() {
                    if matches!(arg.as_str(), "-exec" | "-execdir" | "-ok" | "-okdir") {
                        let words: Vec<&str> = args
                            .by_ref()
                            .take_while(|w| *w != ";" && *w != "+")
                            .map(String::as_str)
                            .collect();
                        if !words.is_empty() {
                            commands.push(words.join(" "));
                        }
                    }
                }
                commands
            }
            _ => Vec::new(),
        }
    }

    /// The most specific rule matching either the program name or the
    /// whole segment.
    fn find_rule<'a>(&self, rules: &'a [String]) -> Option<&'a str> {
        let by_program =
            wildcard::find_most_specific_match(rules.iter().map(String::as_str), &self.program);
        let by_text =
            wildcard::find_most_specific_match(rules.iter().map(String::as_str), &self.text);
        match (by_program, by_text) {
            (Some(a), Some(b)) => Some(if wildcard::specificity(b) > wildcard::specificity(a) {
                b
            } else {
                a
            }),
            (a, b) => a.or(b),
        }
    }
}

fn dangerous_program(segment: &Segment) -> Option<String> {
    let program = segment.program.as_str();

    if PRIVILEGE_PROGRAMS.contains(&program) {
        return Some(format!(
            "privilege escalation via '{}' is not allowed",
            program
        ));
    }
    if program == "rm" && is_recursive_delete(&segment.args) {
        return Some("recursive deletion is not allowed".to_string());
    }
    if program.starts_with("mkfs") || DISK_PROGRAMS.contains(&program) {
        return Some(format!("disk formatting via '{}' is not allowed", program));
    }
    if program == "find" && segment.args.iter().any(|a| a == "-delete") {
        return Some("deleting files with 'find -delete' is not allowed".to_string());
    }
    if program == "dd" && segment.args.iter().any(|a| a.starts_with("of=/dev/")) {
        return Some("writing raw data to a device is not allowed".to_string());
    }
    None
}

/// `rm` with a recursive flag that is either forced or aimed at a sweeping
/// target such as `/`, `~` or `*`.
fn is_recursive_delete(args: &[String]) -> bool {
    let mut recursive = false;
    let mut force = false;
    let mut targets = Vec::new();
    let mut options_done = false;

    for arg in args {
        if options_done {
            targets.push(arg.as_str());
        } else if arg == "--" {
            options_done = true;
        } else if let Some(long) = arg.strip_prefix("--") {
            match long {
                "recursive" => recursive = true,
                "force" => force = true,
                "no-preserve-root" => return true,
                _ => {}
            }
        } else if arg.len() > 1 && arg.starts_with('-') {
            recursive |= arg.contains('r') || arg.contains('R');
            force |= arg.contains('f');
        } else {
            targets.push(arg.as_str());
        }
    }

    let sweeping = targets.iter().any(|t| {
        matches!(
            t.trim_end_matches('/'),
            "" | "~" | "*" | "." | ".." | "/*" | "$HOME" | "${HOME}"
        )
    });

    recursive && (force || sweeping)
}

/// Wrapper options whose value is the next word.
fn wrapper_option_takes_value(wrapper: &str, option: &str) -> bool {
    matches!(
        (wrapper, option),
        ("env", "-u" | "-C" | "-S")
            | ("xargs", "-n" | "-I" | "-L" | "-P" | "-s" | "-d" | "-E" | "-a")
            | ("time", "-f" | "-o")
            | ("nice", "-n")
            | ("timeout", "-s" | "-k")
    )
}

fn is_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            let mut chars = name.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

fn basename(word: &str) -> &str {
    word.rsplit('/').next().unwrap_or(word)
}

/// Split a command line into simple commands.
fn split_segments(command: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = command.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;

    let mut flush = |current: &mut String| {
        let trimmed = current.trim();
        if !trimmed.is_empty() {
            segments.push(trimmed.to_string());
        }
        current.clear();
    };

    while let Some(c) = chars.next() {
        if in_single {
            current.push(c);
            if c == '\'' {
                in_single = false;
            }
            continue;
        }

        match c {
            '\\' => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '\'' if !in_double => {
                in_single = true;
                current.push(c);
            }
            '"' => {
                in_double = !in_double;
                current.push(c);
            }
            '$' if chars.peek() == Some(&'(') => {
                chars.next();
                flush(&mut current);
            }
            '`' => flush(&mut current),
            // Redirections like `2>&1` and `&>file` are not separators.
            '&' if !in_double
                && (current.ends_with('>')
                    || current.ends_with('<')
                    || chars.peek() == Some(&'>')) =>
            {
                current.push(c);
            }
            ';' | '\n' | '|' | '&' | '(' | ')' if !in_double => flush(&mut current),
            _ => current.push(c),
        }
    }
    flush(&mut current);

    segments
}

/// Split a simple command into words, removing quotes.
fn split_words(segment: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut has_word = false;
    let mut chars = segment.chars();
    let mut in_single = false;
    let mut in_double = false;

    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                has_word = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                has_word = true;
            }
            '\\' if !in_single => {
                if let Some(next) = chars.next() {
                    current.push(next);
                    has_word = true;
                }
            }
            c if c.is_whitespace() && !in_single && !in_double => {
                if has_word {
                    words.push(std::mem::take(&mut current));
                    has_word = false;
                }
            }
            c => {
                current.push(c);
                has_word = true;
            }
        }
    }
    if has_word {
        words.push(current);
    }

    words
}
