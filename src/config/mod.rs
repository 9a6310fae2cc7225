use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Base URL of the document extraction engine.
    pub engine_url: String,

    /// Bearer token for the extraction engine (optional for local engines).
    #[serde(default)]
    pub engine_api_token: Option<String>,

    /// Directory for per-job temp artifacts.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,

    /// Larger image dimension is capped to this many pixels before extraction.
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,

    /// Timeout for fetching a source image by URL, in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Timeout for the completion callback POST, in seconds.
    #[serde(default = "default_callback_timeout_secs")]
    pub callback_timeout_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_temp_dir() -> String {
    std::env::temp_dir()
        .join("docverify")
        .to_string_lossy()
        .into_owned()
}

fn default_max_dimension() -> u32 {
    1800
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_callback_timeout_secs() -> u64 {
    10
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
