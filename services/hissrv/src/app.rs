//! Service assembly and lifecycle
//!
//! `HistoryService` owns the point-value stores, the running points, the
//! user event cache and, when enabled, the migration engine. Background
//! loops all stop on one `ShutdownHandle`.

use anyhow::Context;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use common::ShutdownHandle;
use voltage_events::{EventNotifier, EventStore, MemoryEventStore, UserEventCache};
use voltage_migration::{MigrationEngine, MigrationPointValueStore, StaticSeriesResolver};
use voltage_rtdb::{MemoryPointValueStore, PointValueStore, RuntimeManager, TimeProvider};

use crate::config::HissrvConfig;
use crate::Result;

/// Open (creating if needed) the SQLite file holding migration progress
pub async fn open_progress_pool(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    info!("SQLite: {}", path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&format!("sqlite:{}?mode=rwc", path.display()))
        .await
        .with_context(|| format!("Failed to connect to SQLite at {}", path.display()))?;
    Ok(pool)
}

pub struct HistoryService {
    config: HissrvConfig,
    primary: Arc<MemoryPointValueStore>,
    secondary: Arc<MemoryPointValueStore>,
    runtimes: Arc<RuntimeManager>,
    notifier: Arc<EventNotifier>,
    migration: Option<Arc<MigrationEngine>>,
    shutdown: ShutdownHandle,
    tasks: Vec<JoinHandle<()>>,
    started: bool,
}

impl HistoryService {
    /// Build every component without starting any background work
    pub async fn new(config: HissrvConfig, time: Arc<dyn TimeProvider>) -> Result<Self> {
        config.validate()?;

        let primary = Arc::new(MemoryPointValueStore::with_config(
            config.write_buffer.clone(),
        ));
        let secondary = Arc::new(MemoryPointValueStore::with_config(
            config.write_buffer.clone(),
        ));

        let migration = if config.migration.enabled {
            let pool = open_progress_pool(&config.database.path).await?;
            let resolver = Arc::new(StaticSeriesResolver::new(config.points.iter().cloned()));
            let engine = MigrationEngine::new(
                config.migration.clone(),
                Arc::clone(&primary) as Arc<dyn PointValueStore>,
                Arc::clone(&secondary) as Arc<dyn PointValueStore>,
                resolver,
                pool,
                Arc::clone(&time),
            )?;
            Some(Arc::new(engine))
        } else {
            None
        };

        // Points write through the routing store while a migration runs
        let store: Arc<dyn PointValueStore> = match &migration {
            Some(engine) => Arc::new(MigrationPointValueStore::new(
                Arc::clone(&primary) as Arc<dyn PointValueStore>,
                Arc::clone(&secondary) as Arc<dyn PointValueStore>,
                engine.registry(),
            )),
            None => Arc::clone(&primary) as Arc<dyn PointValueStore>,
        };

        let runtimes = Arc::new(RuntimeManager::new(
            store,
            Arc::clone(&time),
            config.cache.default_size,
        ));

        let event_store: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());
        let cache = Arc::new(UserEventCache::new(
            Arc::clone(&event_store),
            time,
            config.events.time_to_live,
        ));
        let notifier = Arc::new(EventNotifier::new(event_store, cache));

        Ok(Self {
            config,
            primary,
            secondary,
            runtimes,
            notifier,
            migration,
            shutdown: ShutdownHandle::new(),
            tasks: Vec::new(),
            started: false,
        })
    }

    pub fn config(&self) -> &HissrvConfig {
        &self.config
    }

    pub fn runtimes(&self) -> &Arc<RuntimeManager> {
        &self.runtimes
    }

    pub fn notifier(&self) -> &Arc<EventNotifier> {
        &self.notifier
    }

    pub fn migration(&self) -> Option<&Arc<MigrationEngine>> {
        self.migration.as_ref()
    }

    /// New-generation store
    pub fn primary(&self) -> &Arc<MemoryPointValueStore> {
        &self.primary
    }

    /// Old-generation store, only read and written while migrating
    pub fn secondary(&self) -> &Arc<MemoryPointValueStore> {
        &self.secondary
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Start background loops, the migration and every configured point
    ///
    /// Migration progress is loaded before any point starts so the first
    /// writes are already routed to the right store.
    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            anyhow::bail!("service already started");
        }
        self.started = true;

        for store in [Arc::clone(&self.primary), Arc::clone(&self.secondary)] {
            let shutdown = self.shutdown.notifier();
            self.tasks.push(tokio::spawn(async move {
                store.buffer().flush_loop_with_shutdown(&*store, shutdown).await
            }));
        }

        {
            let cache = Arc::clone(self.notifier.cache());
            let period = self.config.events.cleaner_period;
            let shutdown = self.shutdown.notifier();
            self.tasks.push(tokio::spawn(async move {
                cache.cleaner_loop_with_shutdown(period, shutdown).await
            }));
        }

        if let Some(engine) = &self.migration {
            engine.start().await.context("Failed to start migration")?;
        }

        for point in &self.config.points {
            self.runtimes
                .start_point(point.clone())
                .await
                .with_context(|| format!("Failed to start point {}", point.id))?;
        }

        info!(
            points = self.runtimes.len(),
            migration = self.migration.is_some(),
            "hissrv started"
        );
        Ok(())
    }

    /// Stop points, migration and background loops
    ///
    /// Pending async writes are flushed before the flush loops exit.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(engine) = &self.migration {
            if let Err(e) = engine.shutdown().await {
                warn!("Migration shutdown: {}", e);
            }
        }

        let stopped = self.runtimes.stop_all().await;

        self.shutdown.trigger();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("Background task failed: {}", e);
            }
        }

        stopped.context("Failed to flush point values on stop")?;
        info!("hissrv stopped");
        Ok(())
    }

    /// Start, wait for Ctrl+C or SIGTERM, stop
    pub async fn run_until_shutdown(mut self) -> Result<()> {
        self.start().await?;
        common::wait_for_shutdown().await;
        info!("Shutdown signal received");
        self.stop().await
    }
}
