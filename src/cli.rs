//! Command line interface built on clap.
//!
//! [`Cli`] holds the [`Command`] subcommands and the global flags
//! (--config, --store, --verbose). Commands that open the configured TMS and
//! the store file are grouped in [`StoreCommand`].

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use lingotrack::bulk::BulkOperation;
use lingotrack::state_machine::RecordKey;

/// lingotrack: translation document status tracker.
#[derive(Debug, Parser)]
#[command(name = "lingotrack", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file.
    #[arg(long, global = true, default_value = "lingotrack.toml")]
    pub config: PathBuf,

    /// JSON file holding records, units and queued downloads between runs.
    #[arg(long, global = true, default_value = "lingotrack-store.json")]
    pub store: PathBuf,

    /// Enable verbose output.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    #[command(flatten)]
    Store(StoreCommand),

    /// Run the built-in lifecycle demonstration against an in-memory TMS.
    Demo,
}

#[derive(Debug, Subcommand)]
pub enum StoreCommand {
    /// Register saved units from a JSON file (a list of content entities or
    /// config objects).
    Save {
        file: PathBuf,
    },

    /// Show source and target statuses.
    Status {
        /// Only this record, as `<type>:<id>`.
        key: Option<RecordKey>,
    },

    /// Apply one operation to many records.
    Bulk {
        /// e.g. `upload`, `download:es_MX`, `change_profile:automatic`.
        operation: BulkOperation,

        /// Records as `<type>:<id>`; all records when empty.
        keys: Vec<RecordKey>,
    },

    /// Handle a TMS callback given as its query string.
    Notify {
        /// e.g. `document_id=..&locale_code=es-MX&complete=true&type=target`.
        query: String,
    },

    /// Run the deferred downloads that are due.
    Cron,

    /// Lift the account block after a payment-required answer was settled.
    Resume,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_bulk_subcommand() {
        let cli = Cli::parse_from(["lingotrack", "bulk", "download:es_MX", "node:1", "config:system.site"]);
        match cli.command {
            Command::Store(StoreCommand::Bulk { operation, keys }) => {
                assert_eq!(operation, BulkOperation::Download(Some("es_MX".into())));
                assert_eq!(
                    keys,
                    vec![
                        RecordKey::new("node", "1"),
                        RecordKey::new("config", "system.site")
                    ]
                );
            }
            _ => panic!("expected Bulk command"),
        }
    }

    #[test]
    fn cli_rejects_unknown_operation() {
        assert!(Cli::try_parse_from(["lingotrack", "bulk", "explode"]).is_err());
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "lingotrack",
            "--config",
            "site.toml",
            "--store",
            "/tmp/store.json",
            "--verbose",
            "cron",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("site.toml"));
        assert_eq!(cli.store, PathBuf::from("/tmp/store.json"));
        assert!(matches!(cli.command, Command::Store(StoreCommand::Cron)));
    }

    #[test]
    fn cli_defaults() {
        let cli = Cli::parse_from(["lingotrack", "status"]);
        assert!(!cli.verbose);
        assert_eq!(cli.config, PathBuf::from("lingotrack.toml"));
        assert!(matches!(
            cli.command,
            Command::Store(StoreCommand::Status { key: None })
        ));
    }

    #[test]
    fn cli_parses_notify_query() {
        let cli = Cli::parse_from(["lingotrack", "notify", "type=document_uploaded&document_id=abc"]);
        match cli.command {
            Command::Store(StoreCommand::Notify { query }) => assert!(query.contains("document_uploaded")),
            _ => panic!("expected Notify command"),
        }
    }

    #[test]
    fn cli_parses_resume_and_demo() {
        let cli = Cli::parse_from(["lingotrack", "resume"]);
        assert!(matches!(cli.command, Command::Store(StoreCommand::Resume)));
        let cli = Cli::parse_from(["lingotrack", "demo"]);
        assert!(matches!(cli.command, Command::Demo));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
