use std::env;

/// Config holds all application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub db_max_connections: u32,
    pub listen_addr: String,
    pub default_vrf_id: String,
    pub sync_enabled: bool,
    pub sync_interval_secs: u64,
    pub aws_region: String,
    pub aws_page_size: usize,
    pub max_subnets_per_vpc: usize,
    pub db_batch_size: usize,
    pub batch_size: usize,
    pub cloud_api_url: String,
    pub cloud_api_token: String,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn load() -> Self {
        Self {
            db_path: get_env("DATABASE_PATH", "/data/ipam.db"),
            db_max_connections: get_env("DB_MAX_CONNECTIONS", "5")
                .parse()
                .unwrap_or(5),
            listen_addr: get_env("LISTEN_ADDR", "0.0.0.0:8080"),
            default_vrf_id: get_env("DEFAULT_VRF_ID", "prod-vrf"),
            sync_enabled: get_env("SYNC_ENABLED", "true") == "true",
            sync_interval_secs: get_env("SYNC_INTERVAL", "300").parse().unwrap_or(300),
            aws_region: get_env("AWS_REGION", "us-east-2"),
            aws_page_size: get_env("AWS_PAGE_SIZE", "50").parse().unwrap_or(50),
            max_subnets_per_vpc: get_env("MAX_SUBNETS_PER_VPC", "10000")
                .parse()
                .unwrap_or(10000),
            db_batch_size: get_env("DB_BATCH_SIZE", "100").parse().unwrap_or(100),
            batch_size: get_env("BATCH_SIZE", "10").parse().unwrap_or(10),
            cloud_api_url: get_env("CLOUD_API_URL", "http://localhost:4566"),
            cloud_api_token: get_env("CLOUD_API_TOKEN", ""),
        }
    }
}

fn get_env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
