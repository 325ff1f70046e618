// =============================================================================
// Config repositories — durable storage behind the config cache
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::info;

use super::IndicatorConfig;
use crate::error::{EngineError, EngineResult};

/// Durable per-symbol config storage. `get` returns `Ok(None)` when nothing is
/// stored for the symbol.
pub trait ConfigRepository: Send + Sync {
    fn get(&self, symbol: &str) -> EngineResult<Option<IndicatorConfig>>;
    fn save(&self, symbol: &str, config: &IndicatorConfig) -> EngineResult<()>;
}

/// One JSON document mapping symbol → config. A missing file is an empty
/// store. Writes are atomic (tmp + rename) and serialised.
pub struct JsonFileConfigRepository {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileConfigRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> EngineResult<HashMap<String, IndicatorConfig>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                return Err(EngineError::Persistence(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }

        serde_json::from_str(&content).map_err(|e| {
            EngineError::Persistence(format!("failed to parse {}: {e}", self.path.display()))
        })
    }
}

impl ConfigRepository for JsonFileConfigRepository {
    fn get(&self, symbol: &str) -> EngineResult<Option<IndicatorConfig>> {
        Ok(self.read_document()?.get(symbol).copied())
    }

    fn save(&self, symbol: &str, config: &IndicatorConfig) -> EngineResult<()> {
        let _guard = self.write_lock.lock();

        let mut document = self.read_document()?;
        document.insert(symbol.to_string(), *config);

        let content = serde_json::to_string_pretty(&document)
            .map_err(|e| EngineError::Persistence(format!("failed to serialise configs: {e}")))?;

        // Atomic write: write to a temporary sibling file, then rename.
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content).map_err(|e| {
            EngineError::Persistence(format!("failed to write {}: {e}", tmp_path.display()))
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            EngineError::Persistence(format!("failed to rename to {}: {e}", self.path.display()))
        })?;

        info!(path = %self.path.display(), symbol, "indicator config saved (atomic)");
        Ok(())
    }
}
