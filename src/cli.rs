//! Command-line interface definitions for the `galaxy` core.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Terminal bridge with AI-assisted error diagnostics
#[derive(Parser, Debug)]
#[command(name = "galaxy", version, about, long_about = None)]
#[command(
    after_help = "EXAMPLES:\n    galaxy open ~/projects/demo\n    galaxy chat \"why does my build fail?\"\n    echo 'fn main() {' | galaxy predict"
)]
pub struct Cli {
    /// Generate shell completions
    #[arg(long, value_enum, value_name = "SHELL")]
    pub completions: Option<Shell>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Open a project and attach the interactive terminal bridge
    Open {
        /// Project directory (defaults to the current directory)
        path: Option<PathBuf>,
    },

    /// Chat with the local model, one-shot or as a REPL
    Chat {
        /// Prompt to send; starts a REPL when omitted
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,

        /// File whose contents are attached as project context
        #[arg(long, value_name = "PATH")]
        context_file: Option<PathBuf>,

        /// Wait for the full reply instead of streaming tokens
        #[arg(long)]
        no_stream: bool,
    },

    /// Complete a code fragment read from stdin
    Predict,

    /// Configuration helpers
    Config {
        /// Print the default configuration to stdout
        #[arg(long)]
        init: bool,
    },
}
