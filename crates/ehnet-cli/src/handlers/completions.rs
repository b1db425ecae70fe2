//! Shell completions command handler

use crate::cli::{Cli, CompletionsArgs};
use crate::error::Result;
use clap::CommandFactory;
use std::io::Write;

/// Print a completion script for the requested shell
pub fn handle_completions(args: CompletionsArgs, writer: &mut dyn Write) -> Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(args.shell.to_clap_shell(), &mut cmd, name, writer);
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Shell;

    #[test]
    fn test_bash_script_names_subcommands() {
        let mut buffer = Vec::new();
        handle_completions(CompletionsArgs { shell: Shell::Bash }, &mut buffer).unwrap();
        let script = String::from_utf8(buffer).unwrap();
        assert!(script.contains("ehnet"));
        assert!(script.contains("post-form"));
        assert!(script.contains("cookies"));
    }
}
