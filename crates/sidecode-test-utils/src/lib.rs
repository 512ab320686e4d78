//! Testing utilities for sidecode.
//!
//! - **Fixtures**: temporary project directories and ready-made tool contexts
//! - **Providers**: a scripted [`LanguageModel`](sidecode_provider::LanguageModel)
//!   that records every request
//!
//! ```rust,ignore
//! use sidecode_test_utils::{RecordingProvider, TestProject};
//!
//! let project = TestProject::new().with_file("a.txt", "hi").build();
//! let provider = RecordingProvider::new()
//!     .with_tool_call("call_1", "read_file", json!({"path": "a.txt"}))
//!     .with_response("The file says hi.");
//! ```

pub mod fixtures;
pub mod providers;

pub use fixtures::{BuiltTestProject, TestProject};
pub use providers::{RecordingProvider, ScriptedResponse};
