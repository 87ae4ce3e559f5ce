//! The server's typed configuration plus the string-map façade. The
//! original keeps configuration as a bare
//! `std::map<std::string, std::string>`; this crate resolves that in favor
//! of a typed `Config` applied at `mobilize()` time, while keeping
//! `ConfigMap` around so `configuration_item`/`set_configuration_item`
//! still work as a string-keyed interface.

use std::collections::HashMap;

use crate::util::parse_decimal;

pub const DEFAULT_HEADER_LINE_LIMIT: usize = 1000;
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: f64 = 10.0;
pub const DEFAULT_INACTIVITY_INTERVAL_SECONDS: f64 = 60.0;
pub const CONNECTION_POLLING_PERIOD_MILLISECONDS: u64 = 50;

/// The server's typed configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// When set, every request's `Host` header and target authority must
    /// agree with this value.
    pub host: Option<String>,
    pub header_line_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self { host: None, header_line_limit: DEFAULT_HEADER_LINE_LIMIT }
    }
}

/// The string-keyed façade over `Config`, kept for interface parity with
/// the original's `GetConfigurationItem`/`SetConfigurationItem`. Setting
/// `"HeaderLineLimit"` to a value that parses as a non-negative integer
/// updates the runtime limit immediately; setting `"host"` updates the
/// Host-validation target.
#[derive(Debug, Clone, Default)]
pub struct ConfigMap {
    items: HashMap<String, String>,
}

impl ConfigMap {
    pub fn from_config(config: &Config) -> Self {
        let mut items = HashMap::new();
        items.insert("HeaderLineLimit".to_string(), config.header_line_limit.to_string());
        items.insert("host".to_string(), config.host.clone().unwrap_or_default());
        Self { items }
    }

    pub fn get(&self, key: &str) -> String {
        self.items.get(key).cloned().unwrap_or_default()
    }

    /// Returns `Some(new_header_line_limit)` when this set changed the
    /// runtime header-line limit, so the caller can apply the side effect
    /// to the live `Config`.
    pub fn set(&mut self, key: &str, value: &str) -> Option<usize> {
        self.items.insert(key.to_string(), value.to_string());
        if key == "HeaderLineLimit" {
            parse_decimal(value.as_bytes())
        } else {
            None
        }
    }
}
