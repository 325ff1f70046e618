// =============================================================================
// Per-Symbol Config Store
// =============================================================================
//
// In-memory cache of indicator configs, optionally backed by a repository.
//
// Consistency is write-back: `update` writes the cache and publishes a change
// event first, then persists. A failed save is reported to the caller but the
// cache keeps the new value, so the engine keeps serving it.
//
// A failed repository lookup caches the default for a short retry window, so
// a broken store costs one read and one warning per window instead of one per
// recompute.
// =============================================================================

pub mod indicator_config;
pub mod repository;

pub use indicator_config::IndicatorConfig;
pub use repository::{ConfigRepository, JsonFileConfigRepository};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::EngineResult;

const EVENT_CAPACITY: usize = 64;
const DEFAULT_LOOKUP_RETRY: Duration = Duration::from_secs(5);

/// Published after every cache update.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigEvent {
    pub symbol: String,
    pub config: IndicatorConfig,
}

#[derive(Debug, Clone, Copy)]
struct CachedConfig {
    config: IndicatorConfig,
    /// Set when the lookup failed; the repository is asked again after it.
    retry_after: Option<Instant>,
}

impl CachedConfig {
    fn loaded(config: IndicatorConfig) -> Self {
        Self {
            config,
            retry_after: None,
        }
    }

    fn is_fresh(&self, now: Instant) -> bool {
        self.retry_after.map_or(true, |at| now < at)
    }
}

pub struct ConfigStore {
    cache: RwLock<HashMap<String, CachedConfig>>,
    repository: Option<Arc<dyn ConfigRepository>>,
    events: broadcast::Sender<ConfigEvent>,
    lookup_retry: Duration,
}

impl ConfigStore {
    pub fn new(repository: Option<Arc<dyn ConfigRepository>>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            cache: RwLock::new(HashMap::new()),
            repository,
            events,
            lookup_retry: DEFAULT_LOOKUP_RETRY,
        }
    }

    /// How long a failed repository lookup is served from cache before the
    /// repository is asked again.
    pub fn with_lookup_retry(mut self, retry: Duration) -> Self {
        self.lookup_retry = retry;
        self
    }

    /// Config for `symbol`, loading it from the repository on first access.
    ///
    /// A repository error yields the default, cached until the retry window
    /// runs out.
    pub fn get(&self, symbol: &str) -> IndicatorConfig {
        let symbol = normalize(symbol);
        if let Some(cached) = self.cache.read().get(&symbol) {
            if cached.is_fresh(Instant::now()) {
                return cached.config;
            }
        }

        let loaded = match &self.repository {
            None => CachedConfig::loaded(IndicatorConfig::default()),
            Some(repo) => match repo.get(&symbol) {
                Ok(Some(config)) => CachedConfig::loaded(config),
                Ok(None) => CachedConfig::loaded(IndicatorConfig::default()),
                Err(e) => {
                    warn!(
                        symbol = %symbol,
                        error = %e,
                        retry_in = ?self.lookup_retry,
                        "config lookup failed, serving defaults"
                    );
                    CachedConfig {
                        config: IndicatorConfig::default(),
                        retry_after: Some(Instant::now() + self.lookup_retry),
                    }
                }
            },
        };

        // A concurrent update may have landed while the lock was released;
        // only a stale negative entry is overwritten.
        let mut cache = self.cache.write();
        let now = Instant::now();
        let entry = cache.entry(symbol).or_insert(loaded);
        if !entry.is_fresh(now) {
            *entry = loaded;
        }
        entry.config
    }

    /// Replace the config for `symbol`. The caller validates first.
    pub fn update(&self, symbol: &str, config: IndicatorConfig) -> EngineResult<()> {
        let symbol = normalize(symbol);
        self.cache
            .write()
            .insert(symbol.clone(), CachedConfig::loaded(config));

        // No subscribers is not an error.
        let _ = self.events.send(ConfigEvent {
            symbol: symbol.clone(),
            config,
        });
        debug!(symbol = %symbol, "indicator config updated");

        match &self.repository {
            Some(repo) => repo.save(&symbol, &config).map_err(|e| {
                warn!(symbol = %symbol, error = %e, "config persistence failed, cache keeps new value");
                e
            }),
            None => Ok(()),
        }
    }

    /// Receiver for config-change events.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ConfigEvent> {
        self.events.subscribe()
    }
}

fn normalize(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use parking_lot::Mutex;

    /// In-memory repository that counts lookups and can be told to fail.
    #[derive(Default)]
    struct MemoryRepository {
        stored: Mutex<HashMap<String, IndicatorConfig>>,
        lookups: Mutex<u32>,
        fail_get: bool,
        fail_save: bool,
    }

    impl ConfigRepository for MemoryRepository {
        fn get(&self, symbol: &str) -> EngineResult<Option<IndicatorConfig>> {
            *self.lookups.lock() += 1;
            if self.fail_get {
                return Err(EngineError::Persistence("store offline".into()));
            }
            Ok(self.stored.lock().get(symbol).copied())
        }

        fn save(&self, symbol: &str, config: &IndicatorConfig) -> EngineResult<()> {
            if self.fail_save {
                return Err(EngineError::Persistence("disk full".into()));
            }
            self.stored.lock().insert(symbol.to_string(), *config);
            Ok(())
        }
    }

    fn custom() -> IndicatorConfig {
        IndicatorConfig {
            boll_period: 12,
            ..IndicatorConfig::default()
        }
    }

    #[test]
    fn no_repository_serves_defaults() {
        let store = ConfigStore::new(None);
        assert_eq!(store.get("BTCUSDT"), IndicatorConfig::default());
        store.update("btcusdt", custom()).unwrap();
        assert_eq!(store.get("BTCUSDT"), custom());
    }

    #[test]
    fn repository_hit_is_cached() {
        let repo = Arc::new(MemoryRepository::default());
        repo.stored.lock().insert("BTCUSDT".into(), custom());
        let store = ConfigStore::new(Some(repo.clone()));

        assert_eq!(store.get("BTCUSDT"), custom());
        assert_eq!(store.get("BTCUSDT"), custom());
        assert_eq!(*repo.lookups.lock(), 1);
    }

    #[test]
    fn not_found_default_is_cached() {
        let repo = Arc::new(MemoryRepository::default());
        let store = ConfigStore::new(Some(repo.clone()));

        assert_eq!(store.get("ETHUSDT"), IndicatorConfig::default());
        store.get("ETHUSDT");
        assert_eq!(*repo.lookups.lock(), 1);
    }

    fn failing_repository() -> Arc<MemoryRepository> {
        Arc::new(MemoryRepository {
            fail_get: true,
            ..MemoryRepository::default()
        })
    }

    #[test]
    fn repository_error_is_not_reread_within_window() {
        let repo = failing_repository();
        let store = ConfigStore::new(Some(repo.clone()));

        for _ in 0..10 {
            assert_eq!(store.get("BTCUSDT"), IndicatorConfig::default());
        }
        assert_eq!(*repo.lookups.lock(), 1);
    }

    #[test]
    fn repository_error_is_retried_after_window() {
        let repo = failing_repository();
        let store = ConfigStore::new(Some(repo.clone())).with_lookup_retry(Duration::ZERO);

        assert_eq!(store.get("BTCUSDT"), IndicatorConfig::default());
        assert_eq!(store.get("BTCUSDT"), IndicatorConfig::default());
        assert_eq!(*repo.lookups.lock(), 2);
    }

    #[test]
    fn recovered_repository_is_read_after_window() {
        let repo = Arc::new(MemoryRepository::default());
        repo.stored.lock().insert("BTCUSDT".into(), custom());
        let store = ConfigStore::new(Some(repo.clone())).with_lookup_retry(Duration::ZERO);
        store.cache.write().insert(
            "BTCUSDT".into(),
            CachedConfig {
                config: IndicatorConfig::default(),
                retry_after: Some(Instant::now()),
            },
        );

        assert_eq!(store.get("BTCUSDT"), custom());
        assert_eq!(store.get("BTCUSDT"), custom());
        assert_eq!(*repo.lookups.lock(), 1);
    }

    #[test]
    fn update_replaces_failed_lookup() {
        let repo = failing_repository();
        let store = ConfigStore::new(Some(repo.clone()));

        assert_eq!(store.get("BTCUSDT"), IndicatorConfig::default());
        store.update("BTCUSDT", custom()).unwrap();
        assert_eq!(store.get("BTCUSDT"), custom());
        assert_eq!(*repo.lookups.lock(), 1);
    }

    #[test]
    fn update_persists() {
        let repo = Arc::new(MemoryRepository::default());
        let store = ConfigStore::new(Some(repo.clone()));

        store.update("BTCUSDT", custom()).unwrap();
        assert_eq!(repo.stored.lock().get("BTCUSDT"), Some(&custom()));
    }

    #[test]
    fn failed_persist_keeps_cache() {
        let repo = Arc::new(MemoryRepository {
            fail_save: true,
            ..MemoryRepository::default()
        });
        let store = ConfigStore::new(Some(repo));

        let err = store.update("BTCUSDT", custom()).unwrap_err();
        assert!(matches!(err, EngineError::Persistence(_)));
        assert_eq!(store.get("BTCUSDT"), custom());
    }

    #[test]
    fn update_publishes_event() {
        let store = ConfigStore::new(None);
        let mut events = store.subscribe_changes();

        store.update("solusdt", custom()).unwrap();
        let event = events.try_recv().unwrap();
        assert_eq!(event.symbol, "SOLUSDT");
        assert_eq!(event.config, custom());
    }

    #[test]
    fn works_with_file_repository() {
        let path = std::env::temp_dir().join(format!("indicator-store-{}.json", uuid::Uuid::new_v4()));
        let store = ConfigStore::new(Some(Arc::new(JsonFileConfigRepository::new(&path))));
        store.update("BTCUSDT", custom()).unwrap();

        let reopened = ConfigStore::new(Some(Arc::new(JsonFileConfigRepository::new(&path))));
        assert_eq!(reopened.get("BTCUSDT"), custom());
        let _ = std::fs::remove_file(&path);
    }
}
