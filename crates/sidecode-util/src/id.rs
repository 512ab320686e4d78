//! ULID-based identifier generation with prefixes.
//!
//! Identifiers follow the pattern `prefix_ulid`, for example `cnv_01hqxyz...`.
//! The ULID carries the creation time in its high bits and 80 random bits
//! below it, so ids sort by creation time and never collide in practice.

use ulid::Ulid;

/// Known identifier prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPrefix {
    Conversation,
    Message,
    Call,
    Operation,
}

impl IdPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdPrefix::Conversation => "cnv",
            IdPrefix::Message => "msg",
            IdPrefix::Call => "call",
            IdPrefix::Operation => "op",
        }
    }

    /// Parse a prefix from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cnv" => Some(IdPrefix::Conversation),
            "msg" => Some(IdPrefix::Message),
            "call" => Some(IdPrefix::Call),
            "op" => Some(IdPrefix::Operation),
            _ => None,
        }
    }
}

/// Identifier generation and parsing utilities.
pub struct Identifier;

impl Identifier {
    /// Generate a new identifier. Newer identifiers sort after older ones.
    pub fn generate(prefix: IdPrefix) -> String {
        Self::with_ulid(prefix, Ulid::new())
    }

    /// Build an identifier from a known ULID (imports and tests).
    pub fn with_ulid(prefix: IdPrefix, ulid: Ulid) -> String {
        format!("{}_{}", prefix.as_str(), ulid.to_string().to_lowercase())
    }

    /// Split an identifier into its prefix and ULID.
    pub fn parse(id: &str) -> Option<(IdPrefix, Ulid)> {
        let (prefix, ulid) = id.split_once('_')?;
        let prefix = IdPrefix::parse(prefix)?;
        let ulid = Ulid::from_string(ulid).ok()?;
        Some((prefix, ulid))
    }

    /// Check that an identifier is well formed and carries the given prefix.
    pub fn is_valid(id: &str, prefix: IdPrefix) -> bool {
        matches!(Self::parse(id), Some((p, _)) if p == prefix)
    }

    /// Creation time encoded in the identifier, in milliseconds since the epoch.
    pub fn timestamp_ms(id: &str) -> Option<u64> {
        Self::parse(id).map(|(_, ulid)| ulid.timestamp_ms())
    }

    pub fn conversation() -> String {
        Self::generate(IdPrefix::Conversation)
    }

    pub fn message() -> String {
        Self::generate(IdPrefix::Message)
    }

    pub fn call() -> String {
        Self::generate(IdPrefix::Call)
    }

    pub fn operation() -> String {
        Self::generate(IdPrefix::Operation)
    }
}
