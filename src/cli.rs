use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "qabot",
    about = "Train and serve retrieval chatbots from question/answer datasets"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the embedding dimension
    #[arg(long, global = true)]
    pub dimension: Option<usize>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a new inactive chatbot
    Create(CreateArgs),
    /// List all chatbots
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a single chatbot record as JSON
    Show {
        /// Chatbot id
        id: String,
    },
    /// Build a chatbot's index from a dataset
    Train {
        /// Chatbot id
        id: String,
        /// Dataset id
        meta_id: String,
    },
    /// Activate a trained chatbot
    Deploy {
        /// Chatbot id
        id: String,
        /// Prefix for the deployment URL
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Ask a trained chatbot a question
    Ask(AskArgs),
    /// Manage training datasets
    Dataset {
        #[command(subcommand)]
        action: DatasetAction,
    },
    /// Read and write persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Start the HTTP API
    Serve {
        /// Address to listen on
        #[arg(long)]
        bind: Option<String>,
    },
    /// Show system status and statistics
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

#[derive(Debug, Parser)]
pub struct CreateArgs {
    /// Human-readable name
    #[arg(long)]
    pub name: Option<String>,

    /// Free-text description
    #[arg(long)]
    pub description: Option<String>,
}

#[derive(Debug, Parser)]
pub struct AskArgs {
    /// Chatbot id
    pub id: String,

    /// The question
    pub query: String,

    /// Neighbors to retrieve before picking the answer
    #[arg(short, long)]
    pub k: Option<usize>,

    /// Print every ranked neighbor with its similarity
    #[arg(long)]
    pub explain: bool,
}

// -- Dataset subcommands --

#[derive(Debug, Subcommand)]
pub enum DatasetAction {
    /// Import a JSON or JSON Lines file of {question, answer} objects
    Import {
        /// Path to the dataset file
        file: PathBuf,
        /// Dataset id (defaults to a new UUID)
        #[arg(long)]
        id: Option<String>,
    },
    /// List stored datasets
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a stored dataset
    Remove {
        /// Dataset id
        id: String,
    },
}

// -- Config subcommands --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print a stored setting
    Get {
        key: String,
    },
    /// Persist a setting
    Set {
        key: String,
        value: String,
    },
    /// Clear a stored setting
    Unset {
        key: String,
    },
    /// List stored settings
    List,
}

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "qabot",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_ask_defaults() {
        let cli = Cli::parse_from(["qabot", "ask", "abc", "what is this?"]);
        match cli.command {
            Command::Ask(args) => {
                assert_eq!(args.id, "abc");
                assert_eq!(args.query, "what is this?");
                assert_eq!(args.k, None);
                assert!(!args.explain);
            }
            _ => panic!("expected ask command"),
        }
    }

    #[test]
    fn parse_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "qabot",
            "train",
            "bot",
            "data",
            "--dimension",
            "64",
            "-vv",
        ]);
        assert_eq!(cli.dimension, Some(64));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::Train { .. }));
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["qabot", "-q", "-v", "list"]).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
