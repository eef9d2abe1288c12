pub mod prompt;
pub mod run_level;
pub mod script;
pub mod settings;
pub mod types;
