//! mongo-boiler smoke runner
//!
//! Connects to MongoDB, runs an insert / find / update / delete round trip in
//! a scratch collection through the CRUD helpers, then drops the collection.

use std::future::IntoFuture;

use anyhow::{ensure, Context as _};
use bson::{doc, oid::ObjectId, Bson};
use clap::Parser;
use mongodb::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mongo_boiler::{config::Args, Collection, Database};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Probe {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    name: String,
    #[serde(default)]
    touched: bool,
}

impl Probe {
    fn new(name: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            touched: false,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("mongo_boiler={},info", args.log_level).into());
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let collection_name = args.collection_name();
    info!("MongoDB: {}", args.mongodb_uri);
    info!("Database: {}", args.mongodb_db);
    info!("Collection: {}", collection_name);

    let client = connect(&args.mongodb_uri).await?;
    let ctx = args.exec_context();

    let admin = client.database(&args.mongodb_db);
    let ping = admin.run_command(doc! { "ping": 1 }).into_future();
    ctx.run(ping)
        .await?
        .context("MongoDB ping failed")?;
    info!("Connected to MongoDB database '{}'", args.mongodb_db);

    let db = Database::new(&client, &args.mongodb_db, ctx);
    let probes = db.collection(&collection_name);

    let outcome = round_trip(&probes).await;

    if args.keep {
        info!("Keeping collection {}", probes.namespace());
    } else if let Err(e) = probes.drop().await {
        error!("Failed to drop {}: {}", probes.namespace(), e);
    }

    match outcome {
        Ok(()) => {
            info!("Round trip succeeded");
            Ok(())
        }
        Err(e) => {
            error!("Round trip failed: {:#}", e);
            Err(e)
        }
    }
}

async fn connect(uri: &str) -> anyhow::Result<Client> {
    // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
    let has_path = uri
        .split_once("://")
        .is_some_and(|(_, rest)| rest.contains('/'));
    let separator = match (uri.contains('?'), has_path) {
        (true, _) => "&",
        (false, true) => "?",
        (false, false) => "/?",
    };
    let timeout_uri = format!(
        "{}{}serverSelectionTimeoutMS=3000&connectTimeoutMS=3000",
        uri, separator
    );

    Client::with_uri_str(&timeout_uri)
        .await
        .context("Failed to connect to MongoDB")
}

async fn round_trip(probes: &Collection) -> anyhow::Result<()> {
    let ids = probes
        .insert_many(&[Probe::new("a"), Probe::new("a"), Probe::new("b")])
        .await?;
    ensure!(ids.len() == 3, "expected 3 inserted ids, got {}", ids.len());
    info!("Inserted {} documents", ids.len());

    let first: Probe = probes.find_one(doc! { "_id": ids[0].clone() }).await?;
    ensure!(
        first.name == "a" && first.id.map(Bson::ObjectId).as_ref() == Some(&ids[0]),
        "round trip returned {:?}",
        first
    );
    info!("Fetched {}", render(&bson::to_document(&first)?.into()));

    let a: Vec<Probe> = probes.find_many(doc! { "name": "a" }).await?;
    ensure!(a.len() == 2, "expected 2 documents named a, got {}", a.len());

    let counts = probes
        .update_many(doc! { "name": "a" }, doc! { "$set": { "touched": true } })
        .await?;
    ensure!(counts.matched == 2, "update matched {}", counts.matched);
    info!(
        "Updated: matched {}, modified {}",
        counts.matched, counts.modified
    );

    let deleted = probes.delete_many(doc! { "name": "a" }).await?;
    ensure!(deleted == 2, "expected to delete 2, deleted {}", deleted);

    let a: Vec<Probe> = probes.find_many(doc! { "name": "a" }).await?;
    let b: Vec<Probe> = probes.find_many(doc! { "name": "b" }).await?;
    ensure!(a.is_empty(), "{} documents named a survived", a.len());
    ensure!(b.len() == 1, "expected 1 document named b, got {}", b.len());
    info!("Deleted {} documents, {} remaining", deleted, b.len());

    Ok(())
}

/// Relaxed extended JSON for log output
fn render(value: &Bson) -> String {
    serde_json::to_string(&value.clone().into_relaxed_extjson())
        .unwrap_or_else(|_| value.to_string())
}
