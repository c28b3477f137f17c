use std::time::Duration;

use mongodb::options::ClientOptions;
use mongodb::{Client, Database};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::Config;
use crate::error::{LoadError, Target};

/// Connect to the relational target. `phase` names the pipeline phase for
/// error reporting (e.g. "schema init", "full load").
pub async fn connect_postgres(config: &Config, phase: &str) -> Result<PgPool, LoadError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.postgres.url)
        .await
        .map_err(|e| LoadError::Connectivity {
            target: Target::Postgres,
            phase: phase.to_string(),
            source: e.into(),
        })?;

    Ok(pool)
}

/// Connect to the document target and return the database handle. Server
/// selection is bounded so an unreachable store fails fast instead of
/// hanging the phase.
pub async fn connect_mongo(config: &Config, phase: &str) -> Result<Database, LoadError> {
    let mut options = ClientOptions::parse(&config.mongodb.uri)
        .await
        .map_err(|e| LoadError::Connectivity {
            target: Target::Mongodb,
            phase: phase.to_string(),
            source: e.into(),
        })?;
    options.server_selection_timeout = Some(Duration::from_secs(10));
    options.app_name = Some("wbench".to_string());

    let client = Client::with_options(options).map_err(|e| LoadError::Connectivity {
        target: Target::Mongodb,
        phase: phase.to_string(),
        source: e.into(),
    })?;

    let db = client.database(&config.mongodb.database);

    // The driver connects lazily; issue a ping so connectivity failures
    // surface here with the phase name attached.
    db.run_command(bson::doc! { "ping": 1 })
        .await
        .map_err(|e| LoadError::Connectivity {
            target: Target::Mongodb,
            phase: phase.to_string(),
            source: e.into(),
        })?;

    Ok(db)
}
