use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands;

/// Flowdeck CLI - validate and walk multi-step flows
#[derive(Parser, Debug)]
#[command(name = "flowdeckctl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse and validate a flow or template file
    Validate {
        /// Flow or template definition (YAML)
        file: PathBuf,
    },

    /// List flows and templates found in a directory
    List {
        /// Directory of .yaml/.yml definitions
        #[arg(long, env = "FLOWDECK_FLOWS_DIR", default_value = "flows")]
        dir: PathBuf,

        /// Only templates of this category
        #[arg(long)]
        category: Option<String>,
    },

    /// Start a flow and apply a navigation script, printing every event
    Run {
        /// Flow or template definition (YAML)
        file: PathBuf,

        /// Initial data entries (key=value, value parsed as JSON when possible)
        #[arg(short, long = "data", value_name = "KEY=VALUE")]
        data: Vec<String>,

        /// Comma-separated commands: next, back, goto:<step>, set:<key>=<value>,
        /// pause, resume, complete, cancel
        #[arg(short, long, default_value = "")]
        script: String,

        /// Persist state snapshots in this directory
        #[arg(long, env = "FLOWDECK_STATE_DIR")]
        state_dir: Option<PathBuf>,

        /// Final state format (json, yaml)
        #[arg(short, long, default_value = "json")]
        output: String,
    },
}

impl Cli {
    pub async fn execute(self) -> anyhow::Result<()> {
        match self.command {
            Commands::Validate { file } => commands::validate::execute(&file),
            Commands::List { dir, category } => {
                commands::list::execute(&dir, category.as_deref())
            }
            Commands::Run {
                file,
                data,
                script,
                state_dir,
                output,
            } => {
                commands::run::execute(&file, &data, &script, state_dir.as_deref(), &output).await
            }
        }
    }
}
