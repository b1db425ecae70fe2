//! Command-line interface argument parsing and definitions
//!
//! This module defines the CLI structure using clap's derive API.

use clap::{Parser, Subcommand, ValueEnum};
use is_terminal::IsTerminal;
use std::path::PathBuf;

/// ehnet - resilient HTTP client for the E-Hentai origin family
///
/// Fetches pages and posts forms through the same retrying, fronting-aware
/// transport the library exposes, keeping a cookie jar between runs.
#[derive(Parser, Debug)]
#[command(
    name = "ehnet",
    version,
    author,
    about,
    long_about = None,
    propagate_version = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Enable verbose output (can be used multiple times for increased verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "EHNET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format for results
    #[arg(short, long, value_enum, global = true, default_value = "human")]
    pub output: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Do not load or save the cookie jar
    #[arg(long, global = true)]
    pub no_cookies: bool,

    /// The subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch a URL
    Get(GetArgs),

    /// Post a URL-form encoded body
    PostForm(PostFormArgs),

    /// Post a JSON body
    PostJson(PostJsonArgs),

    /// Show the fronting table, or the candidates for one host
    Hosts(HostsArgs),

    /// Inspect and manage the cookie jar
    Cookies(CookiesArgs),

    /// Manage configuration files
    Config(ConfigArgs),

    /// Generate shell completions for the specified shell
    Completions(CompletionsArgs),
}

/// Arguments for the get command
#[derive(Parser, Debug)]
pub struct GetArgs {
    /// URL to fetch
    #[arg(value_name = "URL")]
    pub url: String,

    /// Referer header
    #[arg(short, long)]
    pub referer: Option<String>,

    /// Return 3xx responses instead of following them
    #[arg(long, conflicts_with = "image")]
    pub no_redirect: bool,

    /// Fetch as an image (image Accept header, quota detection)
    #[arg(long)]
    pub image: bool,

    /// Also print response headers
    #[arg(short = 'i', long)]
    pub include_headers: bool,

    /// Write the body to a file instead of stdout
    #[arg(long = "save-to", value_name = "FILE")]
    pub save_to: Option<PathBuf>,
}

/// Arguments for the post-form command
#[derive(Parser, Debug)]
pub struct PostFormArgs {
    /// URL to post to
    #[arg(value_name = "URL")]
    pub url: String,

    /// Form field as key=value (repeatable)
    #[arg(short, long = "field", value_name = "KEY=VALUE", conflicts_with = "raw")]
    pub fields: Vec<String>,

    /// Send this already encoded body as-is
    #[arg(long, value_name = "BODY")]
    pub raw: Option<String>,

    /// Referer header
    #[arg(short, long)]
    pub referer: Option<String>,

    /// Origin header
    #[arg(long)]
    pub origin: Option<String>,

    /// Also print response headers
    #[arg(short = 'i', long)]
    pub include_headers: bool,
}

/// Arguments for the post-json command
#[derive(Parser, Debug)]
pub struct PostJsonArgs {
    /// URL to post to
    #[arg(value_name = "URL")]
    pub url: String,

    /// JSON payload, or @FILE to read it from a file
    #[arg(short, long, value_name = "JSON")]
    pub json: String,

    /// Referer header
    #[arg(short, long)]
    pub referer: Option<String>,

    /// Origin header
    #[arg(long)]
    pub origin: Option<String>,

    /// Pretty-print a JSON response
    #[arg(long)]
    pub pretty: bool,
}

/// Arguments for the hosts command
#[derive(Parser, Debug)]
pub struct HostsArgs {
    /// Host to look up; all hosts when omitted
    #[arg(value_name = "HOST")]
    pub host: Option<String>,

    /// Resolve HOST over DNS-over-HTTPS instead of reading the table
    #[arg(
        long,
        value_enum,
        value_name = "PROVIDER",
        num_args = 0..=1,
        default_missing_value = "cloudflare",
        requires = "host"
    )]
    pub doh: Option<DohChoice>,
}

/// DNS-over-HTTPS resolvers
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum DohChoice {
    Cloudflare,
    Google,
    Alidns,
}

impl DohChoice {
    pub fn to_provider(self) -> ehnet_core::DohProvider {
        match self {
            DohChoice::Cloudflare => ehnet_core::DohProvider::Cloudflare,
            DohChoice::Google => ehnet_core::DohProvider::Google,
            DohChoice::Alidns => ehnet_core::DohProvider::AliDns,
        }
    }
}

/// Arguments for the cookies command
#[derive(Parser, Debug)]
pub struct CookiesArgs {
    #[command(subcommand)]
    pub action: CookiesAction,
}

/// Cookie jar actions
#[derive(Subcommand, Debug)]
pub enum CookiesAction {
    /// List stored cookies and the login state
    Show(CookiesShowArgs),

    /// Write the jar to a JSON file
    Export(CookiesFileArgs),

    /// Merge cookies from a JSON file
    Import(CookiesFileArgs),

    /// Remove the session cookies of every domain
    SignOut,
}

/// Arguments for cookies show
#[derive(Parser, Debug)]
pub struct CookiesShowArgs {
    /// Print cookie values instead of masking them
    #[arg(long)]
    pub reveal: bool,
}

/// File argument shared by cookies export and import
#[derive(Parser, Debug)]
pub struct CookiesFileArgs {
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a default configuration file
    Init(ConfigInitArgs),

    /// Show the effective configuration
    Show(ConfigShowArgs),

    /// Validate the effective configuration
    Validate,
}

/// Arguments for config init
#[derive(Parser, Debug)]
pub struct ConfigInitArgs {
    /// Where to write; the user config path when omitted
    #[arg(value_name = "FILE")]
    pub path: Option<PathBuf>,

    /// Force overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

/// Arguments for config show
#[derive(Parser, Debug)]
pub struct ConfigShowArgs {
    /// Show configuration in specified format
    #[arg(short, long, value_enum, default_value = "yaml")]
    pub format: ConfigFormat,
}

/// Configuration file formats
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    /// TOML format
    Toml,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

/// Arguments for generating shell completions
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

/// Output format options
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable formatted output
    Human,
    /// JSON output
    Json,
    /// YAML output
    Yaml,
    /// Pretty-printed JSON output
    JsonPretty,
}

/// Supported shells for completion generation
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the effective verbosity level (considering quiet flag)
    pub fn verbosity_level(&self) -> u8 {
        if self.quiet {
            0
        } else {
            self.verbose
        }
    }

    /// Check if colored output should be used
    pub fn use_color(&self) -> bool {
        !self.no_color && std::io::stdout().is_terminal()
    }
}

impl Shell {
    /// Convert to clap_complete shell type
    pub fn to_clap_shell(self) -> clap_complete::Shell {
        match self {
            Shell::Bash => clap_complete::Shell::Bash,
            Shell::Zsh => clap_complete::Shell::Zsh,
            Shell::Fish => clap_complete::Shell::Fish,
            Shell::PowerShell => clap_complete::Shell::PowerShell,
            Shell::Elvish => clap_complete::Shell::Elvish,
        }
    }
}
