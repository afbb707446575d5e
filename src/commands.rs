//! CLI command definitions
//!
//! Defines the clap commands for the inspector CLI.

use clap::Subcommand;
use std::path::PathBuf;

use crate::inspect::ScopeFilter;

#[derive(Subcommand)]
pub enum Commands {
    /// Launch a program, wait for it to pause and print its variables as JSON
    Inspect {
        /// Path to the program (or script) to debug
        program: PathBuf,

        /// Arguments to pass to the program
        #[arg(last = true)]
        args: Vec<String>,

        /// Debug adapter to use (default from config, then debugpy)
        #[arg(long)]
        adapter: Option<String>,

        /// Breakpoint to pause at (file:line or function name)
        /// Can be specified multiple times: --break main --break app.py:42
        #[arg(long = "break", short = 'b')]
        breakpoints: Vec<String>,

        /// How many levels of structured values to expand
        #[arg(long)]
        depth: Option<usize>,

        /// Maximum children expanded per container
        #[arg(long)]
        children: Option<usize>,

        /// Which scopes to list: all, local, closure or global
        #[arg(long, default_value_t = ScopeFilter::All)]
        scope: ScopeFilter,

        /// Also list scopes the adapter marks as expensive
        #[arg(long)]
        include_expensive: bool,

        /// Assign a variable before listing (name=value, repeatable)
        #[arg(long = "set")]
        assignments: Vec<String>,

        /// Evaluate an expression after listing (repeatable)
        #[arg(long = "eval", short = 'e')]
        expressions: Vec<String>,

        /// Write every top-level variable to this JSONL file instead of
        /// printing the listing
        #[arg(long)]
        stream: Option<PathBuf>,
    },

    /// Run scripted inspection scenarios
    Test {
        /// Path(s) to YAML scenario files
        #[arg(required = true)]
        scenarios: Vec<PathBuf>,

        /// Print every step result
        #[arg(long, short)]
        verbose: bool,
    },

    /// List the runtimes and session types the inspector understands
    Types,
}
