use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "conductor",
    version,
    about = "Personal-assistant orchestrator with on-demand domain specialists"
)]
pub struct Cli {
    /// Path to config file (overrides ./conductor.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Default model name (overrides [model] default)
    #[arg(short, long, global = true)]
    pub model: Option<String>,

    /// Log at debug level (RUST_LOG still wins when set)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Do not emit debug bus events
    #[arg(long, global = true)]
    pub no_debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Interactive conversation with the orchestrator (/clear, /usage, /quit)
    Chat,

    /// Send one message to the orchestrator and print the answer
    Ask {
        /// Message text; multiple words are joined with spaces
        #[arg(required = true)]
        message: Vec<String>,
    },

    /// Run one specialist directly and print its result as JSON
    Spawn {
        /// Specialist name
        specialist: String,

        /// Task for the specialist
        task: String,

        /// Extra context prepended to the task
        #[arg(long)]
        context: Option<String>,

        /// Turn budget override
        #[arg(long)]
        max_turns: Option<u32>,
    },

    /// List configured specialists
    Specialists,

    /// Show configured tool providers
    Providers {
        /// Connect to each provider, list its tools, then disconnect
        #[arg(long)]
        check: bool,
    },

    /// Run the debug event listener
    DebugListen {
        /// Bind address (defaults to [debug] listener_addr)
        #[arg(long)]
        addr: Option<String>,
    },
}
