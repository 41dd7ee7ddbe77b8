//! Service configuration – reads `~/.megg/config.toml` (or `$MEGG_CONFIG`)
//! and layers environment overrides on top.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use megg_cockpit::{DEFAULT_PORT, HubConfig};
use megg_hal::{LinkSettings, SimSettings};
use megg_kernel::{MessageTable, WorkConfig};
use megg_types::{Component, MeggError};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Controller-board connection settings as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Preferred serial port. `None` picks the platform default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    pub baud_rate: u32,
    pub timeout_secs: f64,
    pub settle_secs: f64,
    pub force_simulation: bool,
    /// Latency injected by the simulated board.
    pub sim_latency_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 9600,
            timeout_secs: 1.0,
            settle_secs: 2.0,
            force_simulation: false,
            sim_latency_ms: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Coordinator tick period.
    pub tick_ms: u64,
    pub rate_limit_per_sec: u32,
    pub link: LinkConfig,
    pub work: WorkConfig,
    /// Calibration message rows keyed by component id (`load-cell`, ...).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub messages: BTreeMap<String, Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            tick_ms: 500,
            rate_limit_per_sec: 20,
            link: LinkConfig::default(),
            work: WorkConfig::default(),
            messages: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn link_settings(&self) -> LinkSettings {
        let mut settings = LinkSettings::default();
        if let Some(port) = &self.link.port {
            settings.port = port.clone();
        }
        settings.baud_rate = self.link.baud_rate;
        settings.timeout = secs(self.link.timeout_secs, settings.timeout);
        settings.settle = secs(self.link.settle_secs, settings.settle);
        settings.force_simulation = self.link.force_simulation;
        settings.sim = SimSettings {
            latency: Duration::from_millis(self.link.sim_latency_ms),
            ..SimSettings::default()
        };
        settings
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            host: self.host.clone(),
            port: self.port,
            rate_limit_per_sec: self.rate_limit_per_sec,
            ..HubConfig::default()
        }
    }

    /// Default message table with the configured rows applied. Rows that
    /// name an unknown component or have the wrong shape are returned
    /// alongside and otherwise ignored.
    pub fn message_table(&self) -> (MessageTable, Vec<MeggError>) {
        let mut table = MessageTable::default();
        let mut rejected = Vec::new();
        let mut rows = BTreeMap::new();
        for (key, row) in &self.messages {
            match key.parse::<Component>() {
                Ok(component) => {
                    rows.insert(component, row.clone());
                }
                Err(_) => rejected.push(MeggError::Config(format!(
                    "messages: unknown component `{key}`"
                ))),
            }
        }
        rejected.extend(table.merge(rows));
        (table, rejected)
    }
}

fn secs(value: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(fallback)
}

/// `$MEGG_CONFIG` when set, otherwise `~/.megg/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("MEGG_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".megg").join("config.toml")
}

/// Load the config file (if any) and apply environment overrides.
pub fn load() -> Result<Config, MeggError> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Parse the file at `path`. `None` when it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, MeggError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        MeggError::Config(format!("failed to read {}: {e}", path.display()))
    })?;
    toml::from_str(&raw)
        .map(Some)
        .map_err(|e| MeggError::Config(format!("failed to parse {}: {e}", path.display())))
}

/// Apply environment overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `HOST` / `MEGG_HOST` | `host` |
/// | `PORT` / `MEGG_PORT` | `port` |
/// | `ARDUINO_PORT` | `link.port` |
/// | `ARDUINO_BAUDRATE` | `link.baud_rate` |
/// | `ARDUINO_TIMEOUT` | `link.timeout_secs` |
/// | `MEGG_SIMULATE` | `link.force_simulation` |
/// | `MEGG_TICK_MS` | `tick_ms` |
/// | `MEGG_BATCH_SIZE` | `work.default_batch_size` |
///
/// The `MEGG_` spelling wins over the bare one.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let var = |keys: &[&'static str]| first_set(&lookup, keys);

    if let Some((_, host)) = var(&["MEGG_HOST", "HOST"]) {
        cfg.host = host;
    }
    if let Some((key, v)) = var(&["MEGG_PORT", "PORT"]) {
        parse_into(key, &v, &mut cfg.port);
    }
    if let Some((_, port)) = var(&["ARDUINO_PORT"]) {
        cfg.link.port = Some(port);
    }
    if let Some((key, v)) = var(&["ARDUINO_BAUDRATE"]) {
        parse_into(key, &v, &mut cfg.link.baud_rate);
    }
    if let Some((key, v)) = var(&["ARDUINO_TIMEOUT"]) {
        match v.trim().parse::<f64>() {
            Ok(t) if t.is_finite() && t > 0.0 => cfg.link.timeout_secs = t,
            _ => warn!(variable = key, value = %v, "ignoring invalid override"),
        }
    }
    if let Some((key, v)) = var(&["MEGG_SIMULATE"]) {
        match parse_flag(&v) {
            Some(flag) => cfg.link.force_simulation = flag,
            None => warn!(variable = key, value = %v, "ignoring invalid override"),
        }
    }
    if let Some((key, v)) = var(&["MEGG_TICK_MS"]) {
        parse_into(key, &v, &mut cfg.tick_ms);
    }
    if let Some((key, v)) = var(&["MEGG_BATCH_SIZE"]) {
        parse_into(key, &v, &mut cfg.work.default_batch_size);
    }
}

/// First of `keys` that is set, with its value.
fn first_set(
    lookup: &impl Fn(&str) -> Option<String>,
    keys: &[&'static str],
) -> Option<(&'static str, String)> {
    keys.iter().find_map(|&k| lookup(k).map(|v| (k, v)))
}

fn parse_into<T: std::str::FromStr>(key: &str, value: &str, field: &mut T) {
    match value.trim().parse::<T>() {
        Ok(parsed) => *field = parsed,
        Err(_) => warn!(variable = key, value, "ignoring invalid override"),
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn config_path_points_to_megg_dir() {
        let path = config_path_for_home("/home/operator");
        assert_eq!(path, PathBuf::from("/home/operator/.megg/config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        assert_eq!(load_from(&path).unwrap(), None);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
port = 9000

[link]
port = "/dev/ttyACM1"

[work]
default_batch_size = 30
"#,
        )
        .unwrap();

        let cfg = load_from(&path).unwrap().unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.link.port.as_deref(), Some("/dev/ttyACM1"));
        assert_eq!(cfg.link.baud_rate, 9600);
        assert_eq!(cfg.work.default_batch_size, 30);
        assert_eq!(cfg.work.ready_ticks, WorkConfig::default().ready_ticks);
        assert_eq!(cfg.tick_ms, 500);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "port = \"not a number\"").unwrap();
        assert!(matches!(load_from(&path), Err(MeggError::Config(_))));
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, toml::to_string_pretty(&Config::default()).unwrap()).unwrap();
        assert_eq!(load_from(&path).unwrap().unwrap(), Config::default());
    }

    #[test]
    fn env_overrides_replace_fields() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            env(&[
                ("HOST", "127.0.0.1"),
                ("PORT", "9100"),
                ("ARDUINO_PORT", "COM7"),
                ("ARDUINO_BAUDRATE", "115200"),
                ("ARDUINO_TIMEOUT", "2.5"),
                ("MEGG_SIMULATE", "true"),
                ("MEGG_TICK_MS", "250"),
                ("MEGG_BATCH_SIZE", "12"),
            ]),
        );
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.link.port.as_deref(), Some("COM7"));
        assert_eq!(cfg.link.baud_rate, 115_200);
        assert_eq!(cfg.link.timeout_secs, 2.5);
        assert!(cfg.link.force_simulation);
        assert_eq!(cfg.tick_ms, 250);
        assert_eq!(cfg.work.default_batch_size, 12);
    }

    #[test]
    fn prefixed_variable_wins() {
        let mut cfg = Config::default();
        apply_overrides(&mut cfg, env(&[("PORT", "9100"), ("MEGG_PORT", "9200")]));
        assert_eq!(cfg.port, 9200);
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            env(&[
                ("PORT", "not-a-port"),
                ("ARDUINO_BAUDRATE", "fast"),
                ("ARDUINO_TIMEOUT", "-1"),
                ("MEGG_SIMULATE", "maybe"),
            ]),
        );
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn link_settings_follow_config() {
        let cfg = Config {
            link: LinkConfig {
                port: Some("/dev/ttyUSB3".to_string()),
                baud_rate: 19_200,
                timeout_secs: 0.5,
                settle_secs: 0.0,
                force_simulation: true,
                sim_latency_ms: 5,
            },
            ..Config::default()
        };
        let settings = cfg.link_settings();
        assert_eq!(settings.port, "/dev/ttyUSB3");
        assert_eq!(settings.baud_rate, 19_200);
        assert_eq!(settings.timeout, Duration::from_millis(500));
        assert_eq!(settings.settle, Duration::ZERO);
        assert!(settings.force_simulation);
        assert_eq!(settings.sim.latency, Duration::from_millis(5));
    }

    #[test]
    fn hub_config_carries_bind_address() {
        let cfg = Config {
            host: "127.0.0.1".to_string(),
            port: 9001,
            rate_limit_per_sec: 5,
            ..Config::default()
        };
        let hub = cfg.hub_config();
        assert_eq!(hub.host, "127.0.0.1");
        assert_eq!(hub.port, 9001);
        assert_eq!(hub.rate_limit_per_sec, 5);
    }

    #[test]
    fn message_rows_are_validated() {
        let row = |m: &str| (0..5).map(|i| format!("{m} {i}")).collect::<Vec<_>>();
        let mut cfg = Config::default();
        cfg.messages.insert("load-cell".to_string(), row("Weighing"));
        cfg.messages.insert("flux-capacitor".to_string(), row("Nope"));
        cfg.messages.insert("stepper".to_string(), vec!["too short".to_string()]);

        let (table, rejected) = cfg.message_table();
        assert_eq!(rejected.len(), 2);
        assert_eq!(table.message(Component::LoadCell, 2), "Weighing 2");
        assert_eq!(
            table.message(Component::Stepper, 0),
            MessageTable::default().message(Component::Stepper, 0)
        );
    }
}
