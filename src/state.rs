use std::path::PathBuf;

use anyhow::Context;
use tera::Tera;

use crate::cache::TimedCache;
use crate::config::Config;
use crate::extract::Extractor;
use crate::upstream::Upstream;

/// Upstream snapshot markup keyed on `(verify, channel)`.
pub type ApiCache = TimedCache<(String, String), String>;
pub type HowCache = TimedCache<(), String>;

pub struct AppState {
    pub tera: Tera,
    pub upstream: Upstream,
    pub extractor: Extractor,
    pub api_cache: ApiCache,
    pub how_cache: HowCache,
    pub instance_url: String,
    pub external_url: Option<String>,
    pub static_dir: PathBuf,
}

impl AppState {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let tera = Tera::new(&config.templates_glob())
            .with_context(|| format!("failed to parse templates in {}", config.templates_dir.display()))?;
        let upstream = Upstream::new(&config.upstream_url, config.upstream_timeout())
            .context("failed to build upstream client")?;
        let extractor = Extractor::new().context("failed to compile board selectors")?;

        Ok(Self {
            tera,
            upstream,
            extractor,
            api_cache: TimedCache::new(config.api_cache_ttl()),
            how_cache: TimedCache::new(config.how_cache_ttl()),
            instance_url: config.instance_url.clone(),
            external_url: config.external_url.clone(),
            static_dir: config.static_dir.clone(),
        })
    }
}
