//! Command handlers for the sidecode CLI.

pub mod conversation;
pub mod inspect;
pub mod logging;
pub mod run;

pub use conversation::*;
pub use inspect::*;
pub use logging::*;
pub use run::*;
