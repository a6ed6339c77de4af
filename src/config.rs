use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

pub const DEFAULT_UPSTREAM_URL: &str = "https://yukibbs-server.onrender.com/";
pub const DEFAULT_INSTANCE_URL: &str =
    "https://raw.githubusercontent.com/mochidukiyukimi/yuki-youtube-instance/main/instance.txt";

/// Gateway settings. Every flag can also come from the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "bbs-gateway", version, about = "Caching JSON gateway in front of a remote bulletin board")]
pub struct Config {
    #[arg(long, env = "BBS_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Board service used until the first instance reload.
    #[arg(long, env = "BBS_UPSTREAM_URL", default_value = DEFAULT_UPSTREAM_URL)]
    pub upstream_url: String,

    /// Text file holding the current board base URL.
    #[arg(long, env = "BBS_INSTANCE_URL", default_value = DEFAULT_INSTANCE_URL)]
    pub instance_url: String,

    /// Public URL of this gateway, reported to the board with each post.
    #[arg(long, env = "RENDER_EXTERNAL_URL")]
    pub external_url: Option<String>,

    #[arg(long, env = "BBS_UPSTREAM_TIMEOUT_SECS", default_value_t = 3)]
    pub upstream_timeout_secs: u64,

    #[arg(long, env = "BBS_API_CACHE_SECS", default_value_t = 5)]
    pub api_cache_secs: u64,

    #[arg(long, env = "BBS_HOW_CACHE_SECS", default_value_t = 30)]
    pub how_cache_secs: u64,

    #[arg(long, env = "BBS_TEMPLATES_DIR", default_value = "templates")]
    pub templates_dir: PathBuf,

    #[arg(long, env = "BBS_STATIC_DIR", default_value = "static")]
    pub static_dir: PathBuf,
}

impl Config {
    pub fn bind_address(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn api_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.api_cache_secs)
    }

    pub fn how_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.how_cache_secs)
    }

    /// Glob handed to tera.
    pub fn templates_glob(&self) -> String {
        format!("{}/**/*.html", self.templates_dir.display())
    }
}
