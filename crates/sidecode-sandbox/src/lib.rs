//! Sandbox enforcement for sidecode tools.
//!
//! Two independent guards sit in front of every tool that touches the host:
//!
//! - [`SandboxResolver`] confines filesystem paths to a project root. Symlinks
//!   are followed before the containment check, and paths that do not exist
//!   yet are checked the same way as existing ones.
//! - [`CommandPolicy`] classifies shell commands as allowed, denied or
//!   requiring confirmation. Deny rules always win.
//!
//! # Example
//!
//! ```rust,no_run
//! use sidecode_sandbox::{Classification, CommandPolicy, PolicyConfig, SandboxResolver};
//!
//! let resolver = SandboxResolver::new("/home/dev/project").unwrap();
//! assert!(resolver.resolve("../../etc/passwd").is_err());
//!
//! let policy = CommandPolicy::new(&PolicyConfig::default());
//! assert!(matches!(policy.classify("rm -rf /"), Classification::Denied(_)));
//! ```

pub mod config;
pub mod error;
pub mod policy;
pub mod resolver;

pub use config::PolicyConfig;
pub use error::{SandboxError, SandboxResult};
pub use policy::{Classification, CommandPolicy};
pub use resolver::{resolve, SandboxResolver, SandboxedPath};
