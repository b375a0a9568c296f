//! sketchforge - Board Toolchain Orchestration
//!
//! sketchforge is the build/flash backend for a block-based sketch editor.
//! It detects attached serial devices, bootstraps a local toolchain
//! environment on first run, dispatches the correct external compiler or
//! uploader for the selected board family, normalizes tool output into
//! diagnostics, and tracks the verify/flash state machine the editor UI
//! gates its buttons on.

pub mod bootstrap;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod logging;
pub mod models;
pub mod ports;
pub mod session;
pub mod toolchain;

// Re-export commonly used types
pub use errors::*;
pub use models::*;
pub use session::BuildSession;
pub use toolchain::{CommandRunner, Dispatcher, SystemRunner};

/// sketchforge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// sketchforge application name
pub const APP_NAME: &str = "sketchforge";
