use clap::{Parser, Subcommand};

/// Command-line options for mailarch.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List mailboxes known to the server.
    #[command(alias = "l")]
    List,
    /// Download mailboxes into the local catalogue.
    #[command(alias = "d")]
    Sync {
        /// Restrict this run to the named mailboxes (the LIMIT_TO/SKIP
        /// filters still apply on top).
        mailboxes: Vec<String>,
    },
    /// Full-text search over archived emails.
    #[command(alias = "s")]
    Search { term: String },
}
