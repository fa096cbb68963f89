use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "chatrelay")]
#[command(about = "Chat backend that routes between a primary and a fallback model provider")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the HTTP API (default)
    Serve {
        /// Address to bind, overriding the configuration
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Probe both providers and print their health
    Check,

    /// Send one message through the router and print the reply
    Ask {
        /// Message text; multiple words are joined with spaces
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Serve { bind: None }
    }
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration with secrets redacted
    Show,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_is_the_default() {
        let cli = Cli::try_parse_from(["chatrelay"]).unwrap();
        assert_eq!(cli.command.unwrap_or_default(), Commands::Serve { bind: None });
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "chatrelay",
            "serve",
            "--bind",
            "0.0.0.0:9000",
            "--debug",
            "--config",
            "/tmp/chatrelay.toml",
        ])
        .unwrap();

        assert!(cli.debug);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/chatrelay.toml")));
        assert_eq!(
            cli.command,
            Some(Commands::Serve {
                bind: Some("0.0.0.0:9000".to_string())
            })
        );
    }

    #[test]
    fn test_ask_joins_words() {
        let cli = Cli::try_parse_from(["chatrelay", "ask", "hello", "there"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Ask {
                text: vec!["hello".to_string(), "there".to_string()]
            })
        );
        assert!(Cli::try_parse_from(["chatrelay", "ask"]).is_err());
    }

    #[test]
    fn test_config_subcommands() {
        let cli = Cli::try_parse_from(["chatrelay", "config", "init", "--force"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Config {
                action: ConfigCommand::Init { force: true }
            })
        );
    }
}
