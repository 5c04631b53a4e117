//! MongoDB storage collaborator.
//!
//! The kernel only needs two things from storage: schema creation for the
//! `install` mode and the stale-session sweep behind the `/cleansessions`
//! scheduled job. Game-state reads and writes belong to the command layer,
//! which is not part of the kernel.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mongodb::bson::doc;
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, IndexModel};
use tracing::{info, warn};

use crate::cron::JobExecutor;
use crate::error::KernelError;

const SESSIONS: &str = "sessions";

/// Database wrapper for MongoDB operations.
#[derive(Debug, Clone)]
pub struct Database {
    db: mongodb::Database,
}

impl Database {
    /// Connect and verify the connection with a ping.
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self, KernelError> {
        let options = ClientOptions::parse(uri).await?;
        let client = Client::with_options(options)?;

        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;

        info!("connected to MongoDB");
        Ok(Self {
            db: client.database(db_name),
        })
    }

    fn sessions(&self) -> Collection<mongodb::bson::Document> {
        self.db.collection(SESSIONS)
    }

    /// Create the persistent-storage schema: the game-session collection and
    /// its indexes. Safe to run repeatedly.
    pub async fn install_schema(&self) -> Result<(), KernelError> {
        // create_collection errors if it already exists; treat that as done.
        if let Err(err) = self.db.create_collection(SESSIONS).await {
            warn!(%err, "create_collection skipped");
        }

        let sessions = self.sessions();
        sessions
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "id": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await?;
        sessions
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "updated_at": 1 })
                    .build(),
            )
            .await?;

        Ok(())
    }

    /// Delete sessions untouched for longer than `ttl`. Returns how many
    /// were removed.
    pub async fn clean_stale_sessions(&self, ttl: Duration) -> Result<u64, KernelError> {
        let cutoff = Utc::now() - chrono::Duration::seconds(ttl.as_secs() as i64);
        let cutoff = mongodb::bson::DateTime::from_millis(cutoff.timestamp_millis());

        let result = self
            .sessions()
            .delete_many(doc! { "updated_at": { "$lt": cutoff } })
            .await?;

        Ok(result.deleted_count)
    }
}

/// Job-execution collaborator backed by storage maintenance.
pub struct StorageJobExecutor {
    db: Database,
    session_ttl: Duration,
}

impl StorageJobExecutor {
    pub fn new(db: Database, session_ttl: Duration) -> Self {
        Self { db, session_ttl }
    }
}

#[async_trait]
impl JobExecutor for StorageJobExecutor {
    async fn run_jobs(&self, jobs: &[String]) -> Result<(), KernelError> {
        for job in jobs {
            match job.as_str() {
                "/cleansessions" => {
                    let removed = self.db.clean_stale_sessions(self.session_ttl).await?;
                    info!(removed, "cleaned stale sessions");
                }
                other => warn!(job = other, "unknown scheduled job, skipping"),
            }
        }
        Ok(())
    }
}
