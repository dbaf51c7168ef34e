use crate::app::config::AdagioConfig;
use anyhow::{Error, bail};
use parking_lot::{RwLock, RwLockReadGuard};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Holds the config loaded from the local yaml file, reloadable
/// in place
pub struct ConfigManager {
    path: PathBuf,
    cfg: Arc<RwLock<AdagioConfig>>,
    started: AtomicBool,
}

impl ConfigManager {
    pub fn new(cfg_path: PathBuf) -> ConfigManager {
        ConfigManager {
            path: cfg_path,
            cfg: Arc::new(RwLock::new(AdagioConfig::default())),
            started: AtomicBool::new(false),
        }
    }

    /// Re-reads the file, keeping the current config if it fails to load
    pub fn reload(&self) -> Result<(), Error> {
        let cfg = AdagioConfig::load(&self.path)?;
        *self.cfg.write() = cfg;

        debug!("Loaded config from {}", self.path.display());

        Ok(())
    }

    pub fn start(&self) -> Result<(), Error> {
        self.reload()?;
        self.started.store(true, Ordering::Release);

        Ok(())
    }

    pub fn get(&self) -> Result<RwLockReadGuard<'_, AdagioConfig>, Error> {
        if !self.started.load(Ordering::Acquire) {
            bail!("ConfigManager not started yet but fetching config");
        }

        Ok(self.cfg.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_before_start_fails() {
        let manager = ConfigManager::new(PathBuf::from("missing.yaml"));
        assert!(manager.get().is_err());
    }

    #[test]
    fn test_start_with_missing_file_fails() {
        let manager = ConfigManager::new(PathBuf::from("/nonexistent/adagio.yaml"));
        assert!(manager.start().is_err());
        assert!(manager.get().is_err());
    }

    #[test]
    fn test_start_and_reload() {
        let path = std::env::temp_dir().join(format!("adagio-cfg-{}.yaml", std::process::id()));
        std::fs::write(&path, "adapter:\n  endpoint: \"http://one.local\"\n").unwrap();

        let manager = ConfigManager::new(path.clone());
        manager.start().unwrap();
        assert_eq!(manager.get().unwrap().adapter.endpoint, "http://one.local");

        std::fs::write(&path, "adapter:\n  endpoint: \"http://two.local\"\n").unwrap();
        manager.reload().unwrap();
        let endpoint = manager.get().unwrap().adapter.endpoint.clone();

        std::fs::remove_file(&path).unwrap();
        assert_eq!(endpoint, "http://two.local");
    }
}
