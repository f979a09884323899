use std::sync::OnceLock;

use serde::Deserialize;

fn default_partitions() -> usize {
    8
}

fn default_threads() -> usize {
    match std::thread::available_parallelism() {
        Ok(n) => n.into(),
        Err(_) => 4,
    }
}

fn default_partition_capacity() -> usize {
    1 << 30
}

fn default_migration_hints() -> bool {
    true
}

fn default_pin_threads() -> bool {
    false
}

fn default_deadlock_timeout() -> f64 {
    600.0
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    /// The number of partitions in a world, default: 8
    #[serde(default = "default_partitions")]
    pub partitions: usize,

    /// The number of worker threads shared by all partitions, default: available parallelism
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Bytes of backing storage each partition can hand out, default: 1 GiB
    #[serde(default = "default_partition_capacity")]
    pub partition_capacity: usize,

    /// Whether `TaskContext::migrate` relocates the task context, default: true
    /// (when false migration calls are ignored)
    #[serde(default = "default_migration_hints")]
    pub migration_hints: bool,

    /// Pin each worker thread to a core, default: false
    #[serde(default = "default_pin_threads")]
    pub pin_threads: bool,

    /// A timeout in seconds after which a join that has not completed is reported as a potential deadlock, default: 600.0
    #[serde(default = "default_deadlock_timeout")]
    pub deadlock_timeout: f64,

    /// flag used to print warnings when a join exceeds the deadlock timeout. Default: true
    pub join_warning: Option<bool>,

    /// flag used to print warnings when a task handle is dropped without being joined or detached. Default: true
    pub dropped_handle_warning: Option<bool>,

    /// flag used to print warnings when a blocking call is made from a worker thread. Default: true
    pub blocking_call_warning: Option<bool>,
}

impl Config {
    /// Build a configuration from `MIGRANT_*` style key/value pairs instead of the process environment
    pub fn from_iter<I>(vars: I) -> Result<Config, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed("MIGRANT_").from_iter(vars)
    }
}

/// Get the current Environment Variable configuration
pub fn config() -> &'static Config {
    static CONFIG: OnceLock<Config> = OnceLock::new();
    CONFIG.get_or_init(|| match envy::prefixed("MIGRANT_").from_env::<Config>() {
        Ok(config) => config,
        Err(error) => panic!("{}", error),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::from_iter(Vec::<(String, String)>::new()).unwrap();
        assert_eq!(config.partitions, 8);
        assert_eq!(config.partition_capacity, 1 << 30);
        assert!(config.migration_hints);
        assert!(!config.pin_threads);
        assert_eq!(config.join_warning, None);
        assert!(config.threads > 0);
    }

    #[test]
    fn overrides() {
        let vars = vec![
            ("MIGRANT_PARTITIONS".to_string(), "4".to_string()),
            ("MIGRANT_THREADS".to_string(), "2".to_string()),
            ("MIGRANT_MIGRATION_HINTS".to_string(), "false".to_string()),
            ("MIGRANT_DEADLOCK_TIMEOUT".to_string(), "1.5".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
        ];
        let config = Config::from_iter(vars).unwrap();
        assert_eq!(config.partitions, 4);
        assert_eq!(config.threads, 2);
        assert!(!config.migration_hints);
        assert_eq!(config.deadlock_timeout, 1.5);
    }

    #[test]
    fn malformed_value() {
        let vars = vec![("MIGRANT_PARTITIONS".to_string(), "many".to_string())];
        assert!(Config::from_iter(vars).is_err());
    }
}
