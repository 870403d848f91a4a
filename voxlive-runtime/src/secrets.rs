use anyhow::Context;

/// Where we store secrets in the OS keyring.
///
/// This is intentionally constant so upgrades don't orphan secrets.
const SERVICE: &str = "voxlive";

pub const ENV_API_KEY: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKey {
    GeminiApiKey,
}

impl SecretKey {
    fn user(self) -> &'static str {
        match self {
            SecretKey::GeminiApiKey => "gemini_api_key",
        }
    }
}

pub fn set_secret(key: SecretKey, value: &str) -> anyhow::Result<()> {
    let entry = keyring::Entry::new(SERVICE, key.user()).context("create keyring entry")?;
    entry.set_password(value).context("set secret")
}

pub fn get_secret(key: SecretKey) -> anyhow::Result<Option<String>> {
    let entry = keyring::Entry::new(SERVICE, key.user()).context("create keyring entry")?;

    match entry.get_password() {
        Ok(v) => Ok(Some(v)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(anyhow::Error::new(e)).context("get secret"),
    }
}

pub fn delete_secret(key: SecretKey) -> anyhow::Result<()> {
    let entry = keyring::Entry::new(SERVICE, key.user()).context("create keyring entry")?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(anyhow::Error::new(e)).context("delete secret"),
    }
}

/// The environment wins over the keyring; an unreadable keyring is treated as empty.
pub fn resolve_api_key(
    env_lookup: impl Fn(&str) -> Option<String>,
    keyring_lookup: impl FnOnce() -> anyhow::Result<Option<String>>,
) -> Option<String> {
    if let Some(v) = env_lookup(ENV_API_KEY).filter(|v| !v.trim().is_empty()) {
        return Some(v.trim().to_string());
    }

    match keyring_lookup() {
        Ok(v) => v.filter(|v| !v.trim().is_empty()),
        Err(e) => {
            log::warn!("keyring unavailable: {e:#}");
            None
        }
    }
}
