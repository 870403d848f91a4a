use std::path::PathBuf;
use voxlive_core::config::SessionConfig;

pub const CONFIG_FILE_NAME: &str = "voxlive.json";

pub const ENV_CONFIG_PATH: &str = "VOXLIVE_CONFIG";
pub const ENV_WS_URL: &str = "VOXLIVE_WS_URL";
pub const ENV_MODEL: &str = "VOXLIVE_MODEL";
pub const ENV_TRANSCRIPTION_BASE_URL: &str = "VOXLIVE_TRANSCRIPTION_BASE_URL";

/// `$VOXLIVE_CONFIG`, else `voxlive/voxlive.json` under the user config directory,
/// else the working directory.
pub fn default_config_path() -> PathBuf {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        if !p.trim().is_empty() {
            return PathBuf::from(p);
        }
    }

    let base = if cfg!(windows) {
        std::env::var_os("APPDATA").map(PathBuf::from)
    } else if cfg!(target_os = "macos") {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join("Library/Application Support"))
    } else {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
    };

    match base {
        Some(dir) => dir.join("voxlive").join(CONFIG_FILE_NAME),
        None => PathBuf::from(CONFIG_FILE_NAME),
    }
}

/// Apply environment overrides on top of a loaded config. Blank values are ignored.
pub fn apply_env_overrides(cfg: &mut SessionConfig, lookup: impl Fn(&str) -> Option<String>) {
    let get = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());

    if let Some(v) = get(ENV_WS_URL) {
        cfg.ws_url = v;
    }
    if let Some(v) = get(ENV_MODEL) {
        cfg.model = v;
    }
    if let Some(v) = get(ENV_TRANSCRIPTION_BASE_URL) {
        cfg.transcription_base_url = v;
    }
}
