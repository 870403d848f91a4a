use anyhow::Context;
use std::io::Write;
use std::path::{Path, PathBuf};
use voxlive_core::config::SessionConfig;

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> anyhow::Result<SessionConfig> {
        let bytes = std::fs::read(&self.path)
            .with_context(|| format!("read config: {}", self.path.display()))?;
        let cfg: SessionConfig = serde_json::from_slice(&bytes).context("decode config JSON")?;
        Ok(cfg)
    }

    /// Like `load`, but a missing file yields the defaults.
    pub fn load_or_default(&self) -> anyhow::Result<SessionConfig> {
        if !self.path.exists() {
            log::info!(
                "no config at {}; using defaults",
                self.path.display()
            );
            return Ok(SessionConfig::default());
        }
        self.load()
    }

    pub fn save(&self, cfg: &SessionConfig) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(cfg).context("encode config JSON")?;
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)
            .with_context(|| format!("create config directory: {}", parent.display()))?;

        // Write a sibling temp file, then rename over the target.
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)
            .with_context(|| format!("create temp file in {}", parent.display()))?;
        tmp.write_all(&json).context("write temp config")?;
        tmp.as_file().sync_all().context("flush temp config")?;
        tmp.persist(&self.path)
            .map_err(|e| anyhow::Error::new(e.error))
            .with_context(|| format!("replace file: {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_config() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::at_path(dir.path().join("nested").join("voxlive.json"));

        let cfg = SessionConfig {
            model: "models/other-live".into(),
            reconnect_delay_ms: 250,
            max_reconnect_attempts: 2,
            ..Default::default()
        };

        store.save(&cfg).unwrap();
        assert_eq!(store.load().unwrap(), cfg);

        // Overwrite in place.
        let cfg2 = SessionConfig {
            max_reconnect_attempts: 9,
            ..cfg
        };
        store.save(&cfg2).unwrap();
        assert_eq!(store.load().unwrap().max_reconnect_attempts, 9);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::at_path(dir.path().join("absent.json"));
        assert!(store.load().is_err());
        assert_eq!(store.load_or_default().unwrap(), SessionConfig::default());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voxlive.json");
        std::fs::write(&path, b"{ nope").unwrap();
        assert!(ConfigStore::at_path(path).load_or_default().is_err());
    }
}
