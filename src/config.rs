// Configuration for reposcope
// Reads from environment variables with sensible defaults

use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::warn;

/// Global configuration instance
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Read connection pool size (REPOSCOPE_POOL_SIZE)
    pub pool_size: u32,

    /// Read connection pool minimum idle connections (REPOSCOPE_POOL_MIN_IDLE)
    pub pool_min_idle: u32,

    /// Concurrent fetch/pull tasks (REPOSCOPE_FETCH_CONCURRENCY)
    pub fetch_concurrency: usize,

    /// Worker threads used to extract projects during a scan (REPOSCOPE_SCAN_WORKERS)
    pub scan_workers: usize,

    /// Branches a fetch is allowed to pull on (REPOSCOPE_ALLOWED_BRANCHES, comma separated)
    pub allowed_branches: Vec<String>,

    /// Row cap for search-style queries (REPOSCOPE_SEARCH_LIMIT)
    pub search_limit: usize,

    /// Row cap for listing queries (REPOSCOPE_LIST_LIMIT)
    pub list_limit: usize,

    /// Default and maximum flow-trace depth (REPOSCOPE_MAX_FLOW_DEPTH)
    pub max_flow_depth: usize,

    /// Injected dependencies at which a type is reported as highly coupled
    /// (REPOSCOPE_HIGH_COUPLING_THRESHOLD)
    pub high_coupling_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: 8,
            pool_min_idle: 2,
            fetch_concurrency: 4,
            scan_workers: 4,
            allowed_branches: vec![
                "main".to_string(),
                "master".to_string(),
                "develop".to_string(),
            ],
            search_limit: 50,
            list_limit: 100,
            max_flow_depth: 3,
            high_coupling_threshold: 5,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let mut config = Config::default();

        override_from_env("REPOSCOPE_POOL_SIZE", &mut config.pool_size);
        override_from_env("REPOSCOPE_POOL_MIN_IDLE", &mut config.pool_min_idle);
        override_from_env("REPOSCOPE_FETCH_CONCURRENCY", &mut config.fetch_concurrency);
        override_from_env("REPOSCOPE_SCAN_WORKERS", &mut config.scan_workers);
        override_from_env("REPOSCOPE_SEARCH_LIMIT", &mut config.search_limit);
        override_from_env("REPOSCOPE_LIST_LIMIT", &mut config.list_limit);
        override_from_env("REPOSCOPE_MAX_FLOW_DEPTH", &mut config.max_flow_depth);
        override_from_env(
            "REPOSCOPE_HIGH_COUPLING_THRESHOLD",
            &mut config.high_coupling_threshold,
        );

        if let Ok(val) = env::var("REPOSCOPE_ALLOWED_BRANCHES") {
            let branches = parse_branch_list(&val);
            if branches.is_empty() {
                warn!(
                    "invalid REPOSCOPE_ALLOWED_BRANCHES value: {:?}, using default: {:?}",
                    val, config.allowed_branches
                );
            } else {
                config.allowed_branches = branches;
            }
        }

        config.fetch_concurrency = config.fetch_concurrency.max(1);
        config.scan_workers = config.scan_workers.max(1);
        config
    }

    /// Get the global configuration instance
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(Config::from_env)
    }
}

fn override_from_env<T>(key: &str, slot: &mut T)
where
    T: FromStr + std::fmt::Debug,
{
    if let Ok(val) = env::var(key) {
        match val.trim().parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => warn!("invalid {} value: {}, using default: {:?}", key, val, slot),
        }
    }
}

pub fn parse_branch_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|branch| !branch.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pool_size, 8);
        assert_eq!(config.fetch_concurrency, 4);
        assert_eq!(config.search_limit, 50);
        assert_eq!(config.list_limit, 100);
        assert_eq!(config.high_coupling_threshold, 5);
        assert_eq!(config.allowed_branches, vec!["main", "master", "develop"]);
    }

    #[test]
    fn test_parse_branch_list() {
        assert_eq!(parse_branch_list(" main, release ,,"), vec!["main", "release"]);
        assert!(parse_branch_list(" , ").is_empty());
    }
}
