//! Relay configuration
//!
//! Per-subsystem config structs with `Default` + `from_env`, composed into
//! one `Config`. All environment variables carry the `RELAY_` prefix.

use std::path::PathBuf;

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str) -> bool {
    std::env::var(name)
        .map(|s| s == "true" || s == "1")
        .unwrap_or(false)
}

/// Top-level configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub github: GithubConfig,
    pub gitlab: GitlabConfig,
    pub tsa: TsaConfig,
    pub rekor: RekorConfig,
    pub queue: QueueConfig,
    pub dispatch: DispatchConfig,
}

impl Config {
    /// Load the whole configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            github: GithubConfig::from_env(),
            gitlab: GitlabConfig::from_env(),
            tsa: TsaConfig::from_env(),
            rekor: RekorConfig::from_env(),
            queue: QueueConfig::from_env(),
            dispatch: DispatchConfig::from_env(),
        }
    }
}

/// GitHub-style git host settings
#[derive(Debug, Clone)]
pub struct GithubConfig {
    /// API token; empty means the provider is inactive
    pub token: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    /// Repository folder the anchor files are committed under
    pub folder: String,
    pub api_base: String,
    pub timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            owner: String::new(),
            repo: String::new(),
            branch: "main".to_string(),
            folder: "anchors".to_string(),
            api_base: "https://api.github.com".to_string(),
            timeout_secs: 30,
        }
    }
}

impl GithubConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            token: env_string("RELAY_GITHUB_TOKEN").unwrap_or(defaults.token),
            owner: env_string("RELAY_GITHUB_OWNER").unwrap_or(defaults.owner),
            repo: env_string("RELAY_GITHUB_REPO").unwrap_or(defaults.repo),
            branch: env_string("RELAY_GITHUB_BRANCH").unwrap_or(defaults.branch),
            folder: env_string("RELAY_GITHUB_FOLDER").unwrap_or(defaults.folder),
            api_base: env_string("RELAY_GITHUB_API_BASE").unwrap_or(defaults.api_base),
            timeout_secs: env_parse("RELAY_GITHUB_TIMEOUT_SECS", defaults.timeout_secs),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.token.is_empty() && !self.owner.is_empty() && !self.repo.is_empty()
    }
}

/// GitLab-style git host settings
#[derive(Debug, Clone)]
pub struct GitlabConfig {
    /// API token; empty means the provider is inactive
    pub token: String,
    /// Numeric project id or URL-encoded path
    pub project_id: String,
    pub branch: String,
    pub folder: String,
    pub api_base: String,
    pub timeout_secs: u64,
}

impl Default for GitlabConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            project_id: String::new(),
            branch: "main".to_string(),
            folder: "anchors".to_string(),
            api_base: "https://gitlab.com/api/v4".to_string(),
            timeout_secs: 30,
        }
    }
}

impl GitlabConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            token: env_string("RELAY_GITLAB_TOKEN").unwrap_or(defaults.token),
            project_id: env_string("RELAY_GITLAB_PROJECT_ID").unwrap_or(defaults.project_id),
            branch: env_string("RELAY_GITLAB_BRANCH").unwrap_or(defaults.branch),
            folder: env_string("RELAY_GITLAB_FOLDER").unwrap_or(defaults.folder),
            api_base: env_string("RELAY_GITLAB_API_BASE").unwrap_or(defaults.api_base),
            timeout_secs: env_parse("RELAY_GITLAB_TIMEOUT_SECS", defaults.timeout_secs),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.token.is_empty() && !self.project_id.is_empty()
    }
}

/// RFC 3161 TSA settings
#[derive(Debug, Clone)]
pub struct TsaConfig {
    pub enabled: bool,
    pub url: String,
    /// Optional HTTP Basic credentials
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_ms: u64,
    /// Directory for raw request/response sidecars plus the audit manifest;
    /// None disables sidecar persistence
    pub artifact_dir: Option<PathBuf>,
    /// Where the TSA certificate can be fetched for offline verification;
    /// None means the system trust store is assumed
    pub cert_url: Option<String>,
}

impl Default for TsaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "https://freetsa.org/tsr".to_string(),
            username: None,
            password: None,
            timeout_ms: 30_000,
            artifact_dir: None,
            cert_url: None,
        }
    }
}

impl TsaConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_bool("RELAY_TSA_ENABLED"),
            url: env_string("RELAY_TSA_URL").unwrap_or(defaults.url),
            username: env_string("RELAY_TSA_USERNAME"),
            password: env_string("RELAY_TSA_PASSWORD"),
            timeout_ms: env_parse("RELAY_TSA_TIMEOUT_MS", defaults.timeout_ms),
            artifact_dir: env_string("RELAY_TSA_ARTIFACT_DIR").map(PathBuf::from),
            cert_url: env_string("RELAY_TSA_CERT_URL"),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && !self.url.is_empty()
    }
}

/// Transparency-log settings
#[derive(Debug, Clone)]
pub struct RekorConfig {
    pub enabled: bool,
    pub url: String,
    /// Hex-encoded 64-byte Ed25519 secret keypair; None falls back to
    /// per-request ephemeral keys
    pub secret_key_hex: Option<String>,
    /// Hex-encoded 32-byte public key, cross-checked against the secret
    pub public_key_hex: Option<String>,
    /// Where the long-lived public key can be independently fetched
    pub public_key_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RekorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "https://rekor.sigstore.dev".to_string(),
            secret_key_hex: None,
            public_key_hex: None,
            public_key_url: None,
            timeout_secs: 30,
        }
    }
}

impl RekorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_bool("RELAY_REKOR_ENABLED"),
            url: env_string("RELAY_REKOR_URL").unwrap_or(defaults.url),
            secret_key_hex: env_string("RELAY_REKOR_SECRET_KEY"),
            public_key_hex: env_string("RELAY_REKOR_PUBLIC_KEY"),
            public_key_url: env_string("RELAY_REKOR_PUBLIC_KEY_URL"),
            timeout_secs: env_parse("RELAY_REKOR_TIMEOUT_SECS", defaults.timeout_secs),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Queue and lock settings
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Enqueue beyond this size is a silent drop
    pub max_size: usize,
    pub lock_ttl_secs: u64,
    pub lock_attempts: u32,
    pub lock_retry_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 500,
            lock_ttl_secs: 15,
            lock_attempts: 3,
            lock_retry_ms: 250,
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_size: env_parse("RELAY_QUEUE_MAX_SIZE", defaults.max_size),
            lock_ttl_secs: env_parse("RELAY_QUEUE_LOCK_TTL_SECS", defaults.lock_ttl_secs),
            lock_attempts: env_parse("RELAY_QUEUE_LOCK_ATTEMPTS", defaults.lock_attempts),
            lock_retry_ms: env_parse("RELAY_QUEUE_LOCK_RETRY_MS", defaults.lock_retry_ms),
        }
    }
}

/// Dispatcher scheduling settings
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Seconds between dispatch ticks
    pub interval_secs: u64,
    /// Seconds between log-pruning ticks
    pub prune_interval_secs: u64,
    /// Log rows older than this many days are pruned
    pub log_retention_days: i64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            prune_interval_secs: 86_400,
            log_retention_days: 90,
        }
    }
}

impl DispatchConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            interval_secs: env_parse("RELAY_DISPATCH_INTERVAL_SECS", defaults.interval_secs),
            prune_interval_secs: env_parse(
                "RELAY_PRUNE_INTERVAL_SECS",
                defaults.prune_interval_secs,
            ),
            log_retention_days: env_parse("RELAY_LOG_RETENTION_DAYS", defaults.log_retention_days),
        }
    }
}
