use clap::{Parser, Subcommand};
use uuid::Uuid;

/// patgate: personal access token authorization
#[derive(Parser)]
#[command(name = "patgate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (overrides PATGATE_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage personal access tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Print the permission hierarchy in use
    Scopes,
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue a token. The secret is printed once and never again.
    Create {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        name: String,
        /// Comma-separated `resource:permission` list
        #[arg(long, value_delimiter = ',', required = true)]
        scopes: Vec<String>,
        #[arg(long)]
        expires_in_days: Option<i64>,
        #[arg(long, value_delimiter = ',')]
        allowed_ips: Option<Vec<String>>,
    },
    /// List an owner's tokens
    List {
        #[arg(long)]
        owner: String,
    },
    /// Revoke a token
    Revoke {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        id: Uuid,
    },
    /// Show recent audit entries for a token
    Logs {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        id: Uuid,
        #[arg(long, default_value = "100")]
        limit: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_create() {
        let cli = Cli::try_parse_from([
            "patgate",
            "token",
            "create",
            "--owner",
            "alice",
            "--name",
            "ci",
            "--scopes",
            "fcs:read,workspaces:write",
            "--expires-in-days",
            "30",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Token {
                command: TokenCommands::Create { scopes, expires_in_days, .. },
            }) => {
                assert_eq!(scopes, vec!["fcs:read", "workspaces:write"]);
                assert_eq!(expires_in_days, Some(30));
            }
            _ => panic!("expected token create"),
        }
    }
}
