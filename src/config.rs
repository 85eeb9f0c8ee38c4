use std::path::PathBuf;
use std::str::FromStr;

/// Name of the log file inside the data directory.
pub const WAL_FILE_NAME: &str = "bookings.wal";

/// Server settings, read from `RENTDESK_*` environment variables.
///
/// A variable that is unset or fails to parse leaves its default in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "rentdesk".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind: lookup("RENTDESK_BIND").unwrap_or(defaults.bind),
            port: parsed(&lookup, "RENTDESK_PORT").unwrap_or(defaults.port),
            data_dir: lookup("RENTDESK_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            password: lookup("RENTDESK_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed::<usize>(&lookup, "RENTDESK_MAX_CONNECTIONS")
                .filter(|&n| n > 0)
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "RENTDESK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&lookup, "RENTDESK_METRICS_PORT"),
            tls_cert: lookup("RENTDESK_TLS_CERT").map(PathBuf::from),
            tls_key: lookup("RENTDESK_TLS_KEY").map(PathBuf::from),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE_NAME)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring {key}={raw:?}: not a valid value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = config_from(&[]);
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.listen_addr(), "0.0.0.0:5433");
        assert_eq!(config.wal_path(), PathBuf::from("./data/bookings.wal"));
    }

    #[test]
    fn every_variable_is_read() {
        let config = config_from(&[
            ("RENTDESK_BIND", "127.0.0.1"),
            ("RENTDESK_PORT", "6000"),
            ("RENTDESK_DATA_DIR", "/var/lib/rentdesk"),
            ("RENTDESK_PASSWORD", "hunter2"),
            ("RENTDESK_MAX_CONNECTIONS", "8"),
            ("RENTDESK_COMPACT_THRESHOLD", "50"),
            ("RENTDESK_METRICS_PORT", "9100"),
            ("RENTDESK_TLS_CERT", "/etc/rentdesk/cert.pem"),
            ("RENTDESK_TLS_KEY", "/etc/rentdesk/key.pem"),
        ]);
        assert_eq!(config.listen_addr(), "127.0.0.1:6000");
        assert_eq!(config.wal_path(), PathBuf::from("/var/lib/rentdesk/bookings.wal"));
        assert_eq!(config.password, "hunter2");
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.compact_threshold, 50);
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.tls_cert, Some(PathBuf::from("/etc/rentdesk/cert.pem")));
        assert_eq!(config.tls_key, Some(PathBuf::from("/etc/rentdesk/key.pem")));
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let config = config_from(&[
            ("RENTDESK_PORT", "not-a-port"),
            ("RENTDESK_MAX_CONNECTIONS", "0"),
            ("RENTDESK_COMPACT_THRESHOLD", "-3"),
            ("RENTDESK_METRICS_PORT", "99999"),
        ]);
        assert_eq!(config.port, 5433);
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.compact_threshold, 1000);
        assert_eq!(config.metrics_port, None);
    }
}
