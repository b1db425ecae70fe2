//! Command handlers for CLI subcommands
//!
//! This module contains the implementation logic for each CLI subcommand.

mod completions;
mod config;
mod cookies;
mod fetch;
mod hosts;
pub mod utils;

pub use completions::handle_completions;
pub use config::handle_config;
pub use cookies::handle_cookies;
pub use fetch::{handle_get, handle_post_form, handle_post_json};
pub use hosts::handle_hosts;
