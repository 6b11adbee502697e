//! Application configuration.
//!
//! Loaded from a JSON file; every key is optional and falls back to the
//! library defaults. Example:
//!
//! ```json
//! {
//!   "transport": "serial",
//!   "stations": [
//!     { "id": 1, "serial_port": "/dev/ttyUSB0" },
//!     { "id": 2, "serial_port": "/dev/ttyUSB1" }
//!   ],
//!   "database_path": "data/parklink.db",
//!   "base_fee": 1000,
//!   "log_level": "info"
//! }
//! ```

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use clap::ValueEnum;
use parklink_core::constants::{
    BILLING_UNIT_SECS, DEFAULT_ACCEPT_TIMEOUT_MS, DEFAULT_AUTO_CLOSE_DELAY_MS, DEFAULT_BASE_FEE,
    DEFAULT_CONNECT_ATTEMPTS, DEFAULT_DATABASE_PATH, DEFAULT_EXCHANGE_RATE,
    DEFAULT_RECONNECT_INTERVAL_MS, DEFAULT_RETRY_DELAY_MS, DEFAULT_SERIAL_SETTLE_MS,
    DEFAULT_TCP_BASE_PORT, DEFAULT_TOTAL_SPACES, EXCHANGE_REFRESH_INTERVAL_SECS, MAX_STATION_ID,
    MIN_STATION_ID,
};
use parklink_core::StationId;
use parklink_network::{
    AnyConnector, LinkConfig, SerialConnector, SerialConnectorConfig, TcpConnector,
    TcpConnectorConfig,
};
use parklink_parking::ParkingConfig;
use parklink_supervisor::HubConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("No stations configured")]
    NoStations,

    #[error("Station id {0} is outside {MIN_STATION_ID}..={MAX_STATION_ID}")]
    InvalidStationId(u8),

    #[error("Station {0} configured twice")]
    DuplicateStation(u8),

    #[error("Port {base_port} + station {station} exceeds {}", u16::MAX)]
    PortOverflow { base_port: u16, station: u8 },

    #[error("Station {0} has no serial_port")]
    MissingSerialPort(u8),

    #[error("Invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Tcp,
    Serial,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationEntry {
    pub id: u8,

    /// Device path; required for the serial transport.
    #[serde(default)]
    pub serial_port: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub transport: TransportKind,

    #[serde(default = "default_stations")]
    pub stations: Vec<StationEntry>,

    /// Interface the station listeners bind to.
    #[serde(default = "default_bind_host")]
    pub bind_host: IpAddr,

    #[serde(default = "default_base_port")]
    pub base_port: u16,

    #[serde(default = "default_accept_timeout_ms")]
    pub accept_timeout_ms: u64,

    #[serde(default = "default_serial_settle_ms")]
    pub serial_settle_ms: u64,

    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "default_total_spaces")]
    pub total_spaces: u8,

    #[serde(default = "default_base_fee")]
    pub base_fee: u64,

    /// Local currency units per US dollar until the first refresh.
    #[serde(default = "default_exchange_rate")]
    pub exchange_rate: f64,

    #[serde(default = "default_auto_close_delay_ms")]
    pub auto_close_delay_ms: u64,

    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Periodic save; 0 saves on shutdown only.
    #[serde(default)]
    pub autosave_interval_secs: u64,

    /// Period of the station status log; 0 disables it.
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_stations() -> Vec<StationEntry> {
    (1..=2)
        .map(|id| StationEntry {
            id,
            serial_port: None,
        })
        .collect()
}

fn default_bind_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_base_port() -> u16 {
    DEFAULT_TCP_BASE_PORT
}

fn default_accept_timeout_ms() -> u64 {
    DEFAULT_ACCEPT_TIMEOUT_MS
}

fn default_serial_settle_ms() -> u64 {
    DEFAULT_SERIAL_SETTLE_MS
}

fn default_connect_attempts() -> u32 {
    DEFAULT_CONNECT_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

fn default_reconnect_interval_ms() -> u64 {
    DEFAULT_RECONNECT_INTERVAL_MS
}

fn default_total_spaces() -> u8 {
    DEFAULT_TOTAL_SPACES
}

fn default_base_fee() -> u64 {
    DEFAULT_BASE_FEE
}

fn default_exchange_rate() -> f64 {
    DEFAULT_EXCHANGE_RATE
}

fn default_auto_close_delay_ms() -> u64 {
    DEFAULT_AUTO_CLOSE_DELAY_MS
}

fn default_database_path() -> String {
    DEFAULT_DATABASE_PATH.to_string()
}

fn default_status_interval_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            stations: default_stations(),
            bind_host: default_bind_host(),
            base_port: default_base_port(),
            accept_timeout_ms: default_accept_timeout_ms(),
            serial_settle_ms: default_serial_settle_ms(),
            connect_attempts: default_connect_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            total_spaces: default_total_spaces(),
            base_fee: default_base_fee(),
            exchange_rate: default_exchange_rate(),
            auto_close_delay_ms: default_auto_close_delay_ms(),
            database_path: default_database_path(),
            autosave_interval_secs: 0,
            status_interval_secs: default_status_interval_secs(),
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Check everything that would otherwise fail after startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stations.is_empty() {
            return Err(ConfigError::NoStations);
        }

        let mut seen = HashSet::new();
        for station in &self.stations {
            if !(MIN_STATION_ID..=MAX_STATION_ID).contains(&station.id) {
                return Err(ConfigError::InvalidStationId(station.id));
            }
            if !seen.insert(station.id) {
                return Err(ConfigError::DuplicateStation(station.id));
            }

            match self.transport {
                TransportKind::Tcp => {
                    if self.base_port.checked_add(u16::from(station.id)).is_none() {
                        return Err(ConfigError::PortOverflow {
                            base_port: self.base_port,
                            station: station.id,
                        });
                    }
                }
                TransportKind::Serial => {
                    if station.serial_port.as_deref().is_none_or(str::is_empty) {
                        return Err(ConfigError::MissingSerialPort(station.id));
                    }
                }
            }
        }

        if self.total_spaces == 0 {
            return Err(ConfigError::invalid("total_spaces", "must be at least 1"));
        }
        if self.base_fee == 0 {
            return Err(ConfigError::invalid("base_fee", "must be positive"));
        }
        if !self.exchange_rate.is_finite() || self.exchange_rate <= 0.0 {
            return Err(ConfigError::invalid(
                "exchange_rate",
                format!("{} is not a positive number", self.exchange_rate),
            ));
        }
        if self.connect_attempts == 0 {
            return Err(ConfigError::invalid("connect_attempts", "must be at least 1"));
        }

        Ok(())
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            link: LinkConfig {
                connect_attempts: self.connect_attempts,
                retry_delay: Duration::from_millis(self.retry_delay_ms),
                reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            },
            parking: ParkingConfig {
                total_spaces: self.total_spaces,
                base_fee: self.base_fee,
                billing_unit_secs: BILLING_UNIT_SECS,
                exchange_refresh_interval: Duration::from_secs(EXCHANGE_REFRESH_INTERVAL_SECS),
                initial_exchange_rate: self.exchange_rate,
            },
            auto_close_delay: Duration::from_millis(self.auto_close_delay_ms),
            autosave_interval: (self.autosave_interval_secs > 0)
                .then(|| Duration::from_secs(self.autosave_interval_secs)),
        }
    }

    /// Build the transport of one station.
    pub fn connector_for(&self, station: &StationEntry) -> Result<(StationId, AnyConnector), ConfigError> {
        let id = StationId::new(station.id).map_err(|_| ConfigError::InvalidStationId(station.id))?;

        let connector = match self.transport {
            TransportKind::Tcp => {
                let port = id.port_from(self.base_port).ok_or(ConfigError::PortOverflow {
                    base_port: self.base_port,
                    station: station.id,
                })?;
                let config = TcpConnectorConfig {
                    bind_addr: SocketAddr::new(self.bind_host, port),
                    accept_timeout: Duration::from_millis(self.accept_timeout_ms),
                    ..TcpConnectorConfig::default()
                };
                AnyConnector::Tcp(TcpConnector::new(id, config))
            }
            TransportKind::Serial => {
                let path = station
                    .serial_port
                    .clone()
                    .ok_or(ConfigError::MissingSerialPort(station.id))?;
                let config = SerialConnectorConfig {
                    settle_delay: Duration::from_millis(self.serial_settle_ms),
                    ..SerialConnectorConfig::new(path)
                };
                AnyConnector::Serial(SerialConnector::new(id, config))
            }
        };

        Ok((id, connector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.stations.len(), 2);
        assert_eq!(config.base_port, 5000);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parklink.json");
        std::fs::write(
            &path,
            r#"{"transport":"serial","stations":[{"id":3,"serial_port":"/dev/ttyUSB0"}],"base_fee":500}"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.transport, TransportKind::Serial);
        assert_eq!(config.base_fee, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            AppConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            AppConfig::load(&dir.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[rstest]
    #[case::no_stations(r#"{"stations":[]}"#)]
    #[case::station_zero(r#"{"stations":[{"id":0}]}"#)]
    #[case::station_too_high(r#"{"stations":[{"id":100}]}"#)]
    #[case::duplicate(r#"{"stations":[{"id":1},{"id":1}]}"#)]
    #[case::port_overflow(r#"{"base_port":65500,"stations":[{"id":40}]}"#)]
    #[case::serial_without_port(r#"{"transport":"serial","stations":[{"id":1}]}"#)]
    #[case::zero_fee(r#"{"base_fee":0}"#)]
    #[case::negative_rate(r#"{"exchange_rate":-2.0}"#)]
    #[case::no_spaces(r#"{"total_spaces":0}"#)]
    fn test_invalid_configs(#[case] json: &str) {
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tcp_connector_uses_station_port() {
        let config = AppConfig::default();
        let (id, connector) = config.connector_for(&config.stations[1]).unwrap();

        assert_eq!(id.as_u8(), 2);
        assert!(matches!(connector, AnyConnector::Tcp(_)));
        assert_eq!(
            parklink_network::Connector::endpoint(&connector),
            "tcp://0.0.0.0:5002"
        );
    }

    #[test]
    fn test_hub_config_autosave() {
        let mut config = AppConfig::default();
        assert!(config.hub_config().autosave_interval.is_none());

        config.autosave_interval_secs = 30;
        assert_eq!(
            config.hub_config().autosave_interval,
            Some(Duration::from_secs(30))
        );
    }
}
