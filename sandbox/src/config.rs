//! Runtime configuration.

use std::collections::BTreeMap;

/// Configuration for one guest instance.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Maximum linear memory pages (1 page = 64 KiB).
    /// Default: 16384 pages = 1 GiB.
    pub max_memory_pages: u32,

    /// Wasmtime fuel limit (instruction metering). `None` disables
    /// metering.
    pub fuel_limit: Option<u64>,

    /// Program arguments, `argv[0]` first.
    pub argv: Vec<String>,

    /// Environment variables, passed to the guest sorted by key.
    pub env: BTreeMap<String, String>,

    /// Keep a copy of everything the guest writes to stdout and stderr.
    pub capture_output: bool,

    /// How many times a fired timeout is re-delivered before the runtime
    /// gives up on it.
    pub missed_timeout_retries: u32,

    /// Global function `invoke` calls.
    pub entry_point: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_memory_pages: 16384, // 1 GiB
            fuel_limit: None,
            argv: vec!["js".into()],
            env: BTreeMap::new(),
            capture_output: false,
            missed_timeout_retries: 100,
            entry_point: "processReader".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_memory_pages, 16384);
        assert_eq!(config.fuel_limit, None);
        assert_eq!(config.argv, vec!["js".to_string()]);
        assert!(config.env.is_empty());
        assert!(!config.capture_output);
        assert_eq!(config.missed_timeout_retries, 100);
        assert_eq!(config.entry_point, "processReader");
    }
}
