use std::{fs, io, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;

use crate::cache::CachePolicy;

pub const SETTINGS_FILE: &str = "sales.toml";

const METADATA_MAX_ENTRIES: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_base: String,
    pub results_ttl_secs: u64,
    pub metadata_ttl_secs: u64,
    pub gc_grace_secs: u64,
    pub max_cache_entries: usize,
    pub page_size: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000/api".into(),
            results_ttl_secs: 30,
            metadata_ttl_secs: 5 * 60,
            gc_grace_secs: 5 * 60,
            max_cache_entries: 200,
            page_size: 10,
        }
    }
}

impl Settings {
    pub fn results_policy(&self) -> CachePolicy {
        CachePolicy::new(Duration::from_secs(self.results_ttl_secs))
            .with_gc_grace(Duration::from_secs(self.gc_grace_secs))
            .with_max_entries(self.max_cache_entries)
    }

    pub fn metadata_policy(&self) -> CachePolicy {
        CachePolicy::new(Duration::from_secs(self.metadata_ttl_secs))
            .with_gc_grace(Duration::from_secs(self.gc_grace_secs))
            .with_max_entries(METADATA_MAX_ENTRIES)
    }
}

pub fn load_settings() -> anyhow::Result<Settings> {
    load_settings_from(Path::new(SETTINGS_FILE))
}

pub fn load_settings_from(path: &Path) -> anyhow::Result<Settings> {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => toml::from_str::<Settings>(&raw)
            .with_context(|| format!("failed to parse settings file '{}'", path.display()))?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => Settings::default(),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read settings file '{}'", path.display()))
        }
    };

    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("SALES_API_BASE") {
        settings.api_base = v;
    }
    if let Some(v) = lookup("APP__API_BASE") {
        settings.api_base = v;
    }

    override_parsed(&lookup, "APP__RESULTS_TTL_SECS", &mut settings.results_ttl_secs);
    override_parsed(&lookup, "APP__METADATA_TTL_SECS", &mut settings.metadata_ttl_secs);
    override_parsed(&lookup, "APP__GC_GRACE_SECS", &mut settings.gc_grace_secs);
    override_parsed(&lookup, "APP__MAX_CACHE_ENTRIES", &mut settings.max_cache_entries);
    override_parsed(&lookup, "APP__PAGE_SIZE", &mut settings.page_size);
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    slot: &mut T,
) {
    if let Some(parsed) = lookup(name).and_then(|v| v.trim().parse::<T>().ok()) {
        *slot = parsed;
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
