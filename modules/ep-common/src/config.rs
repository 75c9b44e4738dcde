use std::env;

/// Event-plane core configuration, loaded from environment variables (§6).
///
/// Each binary (`ep-sin`, `ep-iaf`, `ep-anc`, `ep-server`) only needs a
/// subset of these; role-specific constructors below pull exactly the vars
/// that role uses and leave the rest at their defaults, the way the
/// teacher's `Config::scout_from_env` / `Config::web_from_env` split a
/// single struct across binaries without forcing every binary to declare
/// every variable it doesn't use.
#[derive(Debug, Clone)]
pub struct Config {
    // Datastores (external collaborators, §6)
    pub tenant_db_url: String,
    pub product_db_url: String,

    // Policy bundle sourcing
    pub policy_bundle_path: Option<String>,
    pub config_service_url: Option<String>,
    pub use_api_refresh: bool,

    // Collaborator endpoints
    pub iam_service_url: String,
    pub kms_service_url: String,
    pub budget_service_url: String,
    pub eris_service_url: String,

    // HTTP client
    pub http_timeout_secs: u64,
    pub http_max_retries: u32,

    // Circuit breaker defaults (policy bundle values win when present, §9)
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_success_threshold: u32,
    pub circuit_breaker_timeout_secs: u64,

    // SIN / IAF windows
    pub dedup_window_hours: u64,
    pub webhook_timestamp_tolerance_secs: i64,
    pub signature_cache_ttl_secs: u64,

    // Web server
    pub web_host: String,
    pub web_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tenant_db_url: String::new(),
            product_db_url: String::new(),
            policy_bundle_path: None,
            config_service_url: None,
            use_api_refresh: false,
            iam_service_url: String::new(),
            kms_service_url: String::new(),
            budget_service_url: String::new(),
            eris_service_url: String::new(),
            http_timeout_secs: 30,
            http_max_retries: 3,
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_success_threshold: 2,
            circuit_breaker_timeout_secs: 60,
            dedup_window_hours: 24,
            webhook_timestamp_tolerance_secs: 300,
            signature_cache_ttl_secs: 3600,
            web_host: "0.0.0.0".to_string(),
            web_port: 8080,
        }
    }
}

impl Config {
    /// Load configuration for the SIN pipeline binary/library.
    pub fn sin_from_env() -> Self {
        Self {
            tenant_db_url: required_env("TENANT_DB_URL"),
            product_db_url: required_env("PRODUCT_DB_URL"),
            policy_bundle_path: env::var("POLICY_BUNDLE_PATH").ok(),
            config_service_url: env::var("CONFIG_SERVICE_URL").ok(),
            use_api_refresh: bool_env("USE_API_REFRESH", false),
            dedup_window_hours: u64_env("DEDUP_WINDOW_HOURS", 24),
            ..Self::default()
        }
    }

    /// Load configuration for the IAF runtime (adapters, webhook, poller).
    pub fn iaf_from_env() -> Self {
        Self {
            tenant_db_url: required_env("TENANT_DB_URL"),
            product_db_url: env::var("PRODUCT_DB_URL").unwrap_or_default(),
            policy_bundle_path: env::var("POLICY_BUNDLE_PATH").ok(),
            config_service_url: env::var("CONFIG_SERVICE_URL").ok(),
            use_api_refresh: bool_env("USE_API_REFRESH", false),
            iam_service_url: required_env("IAM_SERVICE_URL"),
            kms_service_url: required_env("KMS_SERVICE_URL"),
            budget_service_url: env::var("BUDGET_SERVICE_URL").unwrap_or_default(),
            eris_service_url: env::var("ERIS_SERVICE_URL").unwrap_or_default(),
            http_timeout_secs: u64_env("HTTP_TIMEOUT", 30),
            http_max_retries: u64_env("HTTP_MAX_RETRIES", 3) as u32,
            circuit_breaker_failure_threshold: u64_env("CIRCUIT_BREAKER_FAILURE_THRESHOLD", 5)
                as u32,
            circuit_breaker_success_threshold: u64_env("CIRCUIT_BREAKER_SUCCESS_THRESHOLD", 2)
                as u32,
            circuit_breaker_timeout_secs: u64_env("CIRCUIT_BREAKER_TIMEOUT", 60),
            webhook_timestamp_tolerance_secs: u64_env("WEBHOOK_TIMESTAMP_TOLERANCE_SEC", 300)
                as i64,
            signature_cache_ttl_secs: u64_env("SIGNATURE_CACHE_TTL_SEC", 3600),
            ..Self::default()
        }
    }

    /// Load configuration for ANC (alerting/notification core).
    pub fn anc_from_env() -> Self {
        Self {
            tenant_db_url: required_env("TENANT_DB_URL"),
            product_db_url: env::var("PRODUCT_DB_URL").unwrap_or_default(),
            policy_bundle_path: env::var("POLICY_BUNDLE_PATH").ok(),
            config_service_url: env::var("CONFIG_SERVICE_URL").ok(),
            use_api_refresh: bool_env("USE_API_REFRESH", false),
            ..Self::default()
        }
    }

    /// Load configuration for the wired-together HTTP surface.
    pub fn server_from_env() -> Self {
        Self {
            web_host: env::var("WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            web_port: u64_env("WEB_PORT", 8080) as u16,
            ..Self::iaf_from_env()
        }
    }

    /// Log variable presence and length, never the value (mirrors the
    /// teacher's `Config::log_redacted`).
    pub fn log_redacted(&self) {
        let vars = [
            ("TENANT_DB_URL", &self.tenant_db_url),
            ("PRODUCT_DB_URL", &self.product_db_url),
            ("IAM_SERVICE_URL", &self.iam_service_url),
            ("KMS_SERVICE_URL", &self.kms_service_url),
        ];
        for (name, value) in vars {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn bool_env(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn u64_env(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
