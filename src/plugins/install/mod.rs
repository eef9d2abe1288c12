//! Installation plugins put stored certificates to use.

mod script;

pub use script::{ScriptInstaller, ScriptInstallerOptions};
