use anyhow::Result;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection};
use std::path::Path;

pub mod audit;
pub mod channel;
pub mod client;
pub mod notification;
pub mod template;

pub use audit::AuditLogRow;
pub use channel::ChannelConfigRow;
pub use client::ApiClientRow;
pub use notification::{NotificationFilter, NotificationRow};
pub use template::MessageTemplateRow;

/// Unified access layer over the courier database.
///
/// All methods are `async fn` backed by SeaORM + SQLite. A single `Store`
/// is shared between the HTTP ingress, the dispatcher workers, and the
/// retry scheduler; SQLite WAL mode handles the concurrent readers while
/// row leases (see [`notification`]) serialize writers per notification.
pub struct Store {
    pub(crate) db: DatabaseConnection,
}

impl Store {
    /// Open (creating if necessary) the database under `data_dir` and run
    /// any pending migrations.
    pub async fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("courier.db");
        let url = format!(
            "sqlite://{}?mode=rwc",
            db_path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("non-UTF-8 data_dir path"))?
        );
        let store = Self::connect(&url).await?;
        tracing::info!(path = %db_path.display(), "Initialized courier store");
        Ok(store)
    }

    /// Connect to an explicit database URL and run pending migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let db = Database::connect(url).await?;
        db.execute_unprepared("PRAGMA journal_mode=WAL;").await?;
        Migrator::up(&db, None).await?;
        Ok(Self { db })
    }

    /// Liveness probe for the health endpoint.
    pub async fn ping(&self) -> bool {
        self.db.ping().await.is_ok()
    }

    pub(crate) fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}
