//! Configuration for the mongo-boiler smoke runner
//!
//! CLI arguments with environment variable fallbacks, using clap.

use std::time::Duration;

use clap::Parser;
use uuid::Uuid;

use crate::context::ExecContext;
use crate::types::BoilerError;

/// Exercise the CRUD helpers end to end against a MongoDB deployment
#[derive(Parser, Debug, Clone)]
#[command(name = "mongo-boiler")]
#[command(about = "Run the mongo-boiler CRUD round trip against MongoDB")]
pub struct Args {
    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "mongo_boiler")]
    pub mongodb_db: String,

    /// Collection to run in (defaults to a fresh, uniquely named one)
    #[arg(long, env = "BOILER_COLLECTION")]
    pub collection: Option<String>,

    /// Leave the collection in place instead of dropping it afterwards
    #[arg(long, env = "BOILER_KEEP", default_value = "false")]
    pub keep: bool,

    /// Deadline for the whole run in milliseconds (0 disables it)
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), BoilerError> {
        let uri = &self.mongodb_uri;
        if !uri.starts_with("mongodb://") && !uri.starts_with("mongodb+srv://") {
            return Err(BoilerError::Config(format!(
                "MONGODB_URI must start with mongodb:// or mongodb+srv://, got '{}'",
                uri
            )));
        }

        let db = &self.mongodb_db;
        if db.is_empty() || db.contains(['/', '\\', '.', ' ', '"', '$']) {
            return Err(BoilerError::Config(format!(
                "invalid database name '{}'",
                self.mongodb_db
            )));
        }

        if let Some(name) = &self.collection {
            if name.is_empty() || name.starts_with("system.") || name.contains('$') {
                return Err(BoilerError::Config(format!(
                    "invalid collection name '{}'",
                    name
                )));
            }
        }

        match self.log_level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(BoilerError::Config(format!("unknown log level '{}'", other))),
        }
    }

    /// Collection name to use, generating a throw-away one when unset
    pub fn collection_name(&self) -> String {
        self.collection
            .clone()
            .unwrap_or_else(|| format!("boiler_smoke_{}", Uuid::new_v4().simple()))
    }

    /// Execution context bounded by the configured timeout
    pub fn exec_context(&self) -> ExecContext {
        match self.request_timeout_ms {
            0 => ExecContext::background(),
            ms => ExecContext::with_timeout(Duration::from_millis(ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        let argv = std::iter::once("mongo-boiler").chain(args.iter().copied());
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_validate() {
        let args = parse(&["--mongodb-uri", "mongodb://db:27017", "--mongodb-db", "app"]);
        assert!(args.validate().is_ok());
        assert!(!args.keep);
        assert_eq!(args.request_timeout_ms, 30000);
    }

    #[test]
    fn test_rejects_bad_uri_and_names() {
        let args = parse(&["--mongodb-uri", "http://db", "--mongodb-db", "app"]);
        assert!(matches!(args.validate(), Err(BoilerError::Config(_))));

        let args = parse(&["--mongodb-uri", "mongodb://db", "--mongodb-db", "a.b"]);
        assert!(args.validate().is_err());

        let args = parse(&[
            "--mongodb-uri",
            "mongodb://db",
            "--mongodb-db",
            "app",
            "--collection",
            "system.users",
        ]);
        assert!(args.validate().is_err());

        let args = parse(&[
            "--mongodb-uri",
            "mongodb://db",
            "--mongodb-db",
            "app",
            "--log-level",
            "loud",
        ]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_collection_name_generated_when_unset() {
        let args = parse(&["--mongodb-uri", "mongodb://db", "--mongodb-db", "app"]);
        let first = args.collection_name();
        assert!(first.starts_with("boiler_smoke_"));
        assert_ne!(first, args.collection_name());

        let args = parse(&["--mongodb-db", "app", "--collection", "fixed"]);
        assert_eq!(args.collection_name(), "fixed");
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let args = parse(&["--mongodb-db", "app", "--request-timeout-ms", "0"]);
        assert!(args.exec_context().deadline().is_none());

        let args = parse(&["--mongodb-db", "app", "--request-timeout-ms", "5"]);
        assert!(args.exec_context().deadline().is_some());
    }
}
