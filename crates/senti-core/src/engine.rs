use crate::analysis::backend::AnalysisBackend;
use crate::analysis::command::CommandBackend;
use crate::analysis::comprehend::ComprehendBackend;
use crate::analysis::lexicon::LexiconAnalyzer;
use crate::analysis::{Router, RouterSettings};
use crate::cache::CacheStore;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::cost::CostMonitor;
use crate::db;
use crate::errors::CoreError;
use crate::models::{AnalysisRequest, AnalysisResult, BackendKind, CacheStats, DailyReport};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Process-wide wiring: one cache, one cost monitor and one router, built
/// from config and backed by a database for state that survives restarts.
///
/// `open` restores persisted state; `flush` writes it back.
pub struct Engine {
    config: Config,
    conn: Connection,
    router: Router,
}

impl Engine {
    /// Open the engine on a database file, restoring today's budget and,
    /// when cache persistence is on, the cache.
    pub fn open(config: Config, db_path: &Path) -> Result<Self, CoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CoreError::Io(format!("creating data dir: {e}")))?;
        }
        let conn = db::open_db(db_path)?;
        Self::build(config, conn, Arc::new(SystemClock))
    }

    /// An engine with nothing persisted across runs.
    pub fn in_memory(config: Config) -> Result<Self, CoreError> {
        let conn = db::open_in_memory()?;
        Self::build(config, conn, Arc::new(SystemClock))
    }

    fn build(config: Config, conn: Connection, clock: Arc<dyn Clock>) -> Result<Self, CoreError> {
        config.validate()?;
        let settings = RouterSettings::from_config(&config.backends);
        let backends = build_backends(&config, settings.request_timeout);
        Self::with_backends(config, conn, backends, clock)
    }

    /// Wire an engine around an explicit remote chain.
    pub fn with_backends(
        config: Config,
        conn: Connection,
        backends: Vec<Arc<dyn AnalysisBackend>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CoreError> {
        let cache = Arc::new(CacheStore::new(
            config.cache.max_entries,
            chrono::Duration::hours(i64::from(config.cache.ttl_hours)),
            clock.clone(),
        ));
        let pricing: HashMap<BackendKind, _> = [BackendKind::Comprehend, BackendKind::Command]
            .into_iter()
            .map(|kind| (kind, config.pricing_for(kind).clone()))
            .collect();
        let cost = Arc::new(CostMonitor::new(
            config.budget.daily_limit,
            pricing,
            clock.clone(),
        ));

        if config.cache.persist {
            let entries = db::load_cache_entries(&conn)?;
            let loaded = cache.restore(entries);
            info!(loaded, "restored cache entries");
        }
        if let Some(saved) = db::load_budget(&conn, clock.today())? {
            if cost.restore(&saved) {
                info!(spent = saved.spent_today, "restored today's budget");
            }
        }

        let router = Router::new(
            cache,
            cost,
            backends,
            LexiconAnalyzer::new(&config.lexicon),
            RouterSettings::from_config(&config.backends),
            clock,
        );

        Ok(Self {
            config,
            conn,
            router,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, CoreError> {
        self.router.analyze(request)
    }

    pub fn analyze_batch(&self, requests: &[AnalysisRequest]) -> Vec<Result<AnalysisResult, CoreError>> {
        self.router.analyze_batch(requests)
    }

    /// Analyze records keyed by a caller id and store every successful
    /// result under that id.
    pub fn analyze_records(
        &self,
        records: &[(String, AnalysisRequest)],
    ) -> Result<Vec<Result<AnalysisResult, CoreError>>, CoreError> {
        let requests: Vec<AnalysisRequest> = records.iter().map(|(_, r)| r.clone()).collect();
        let results = self.router.analyze_batch(&requests);
        for ((id, _), result) in records.iter().zip(&results) {
            if let Ok(result) = result {
                db::store_result(&self.conn, id, result)?;
            }
        }
        Ok(results)
    }

    pub fn stored_result(&self, record_id: &str) -> Result<Option<AnalysisResult>, CoreError> {
        db::get_result(&self.conn, record_id)
    }

    pub fn stored_result_count(&self) -> Result<u64, CoreError> {
        db::result_count(&self.conn)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.router.cache().stats()
    }

    pub fn daily_report(&self) -> DailyReport {
        self.router.cost().daily_report()
    }

    /// Empty the cache, in memory and on disk.
    pub fn clear_cache(&self) -> Result<usize, CoreError> {
        let size = self.router.cache().stats().size;
        self.router.cache().clear();
        let persisted = db::clear_cache_entries(&self.conn)?;
        Ok(size.max(persisted))
    }

    pub fn purge_expired(&self) -> usize {
        self.router.cache().purge_expired()
    }

    /// Write budget counters and, when enabled, the cache to the database.
    pub fn flush(&self) -> Result<(), CoreError> {
        db::save_budget(&self.conn, &self.router.cost().snapshot())?;
        if self.config.cache.persist {
            let written = db::save_cache_entries(&self.conn, &self.router.cache().snapshot())?;
            info!(written, "flushed cache entries");
        }
        Ok(())
    }
}

/// Construct the configured remote chain. Backends that cannot work as
/// configured are skipped with a warning.
fn build_backends(config: &Config, timeout: Duration) -> Vec<Arc<dyn AnalysisBackend>> {
    let mut backends: Vec<Arc<dyn AnalysisBackend>> = Vec::new();
    for kind in config.enabled_backends() {
        match kind {
            BackendKind::Comprehend => {
                backends.push(Arc::new(ComprehendBackend::new(
                    &config.backends.comprehend,
                    timeout,
                )));
            }
            BackendKind::Command => {
                let backend = CommandBackend::new(&config.backends.command, timeout);
                if backend.is_configured() {
                    backends.push(Arc::new(backend));
                } else {
                    warn!("command backend enabled but backends.command.program is empty; skipping");
                }
            }
        }
    }
    backends
}
