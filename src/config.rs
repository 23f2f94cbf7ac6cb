use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use serde::Deserialize;

use crate::feed::ServiceType;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Default storage used by every provider without an override.
    pub storage: StorageConfig,
    pub providers: Vec<ProviderConfig>,
}

/// One transit agency: a named group of feeds under a single timezone.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    /// IANA zone; all persisted timestamps for this provider are local to it.
    pub timezone: Tz,
    /// Provider-specific storage, taking precedence over the global one.
    #[serde(default)]
    pub storage: Option<StorageConfig>,
    pub apis: Vec<ApiConfig>,
}

/// One fetchable GTFS-RT endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub url: String,
    /// Service types expected in this feed.
    pub services: Vec<ServiceType>,
    /// Seconds between fetches.
    pub refresh_seconds: u64,
    /// Width of the aggregation window in minutes (default: 60)
    #[serde(default = "ApiConfig::default_frequency_minutes")]
    pub frequency_minutes: u32,
    /// Seconds between aggregation passes (default: 300)
    #[serde(default = "ApiConfig::default_check_interval_seconds")]
    pub check_interval_seconds: u64,
}

impl ApiConfig {
    fn default_frequency_minutes() -> u32 {
        60
    }
    fn default_check_interval_seconds() -> u64 {
        300
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: StorageParams,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageParams {
    /// Root directory for the filesystem backend.
    pub root: Option<PathBuf>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;

        Ok(config)
    }

    /// Reject configurations the pipeline cannot run on. Called by `load`;
    /// exposed for configs assembled in code.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            return Err(ConfigError::NoProviders);
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(ConfigError::EmptyProviderName);
            }
            if !seen.insert(provider.name.as_str()) {
                return Err(ConfigError::DuplicateProvider(provider.name.clone()));
            }
            if provider.apis.is_empty() {
                return Err(ConfigError::NoApis(provider.name.clone()));
            }
            for api in &provider.apis {
                api.validate()?;
            }
        }

        Ok(())
    }
}

impl ApiConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.services.is_empty() {
            return Err(ConfigError::EmptyServices(self.url.clone()));
        }
        if self.refresh_seconds == 0 {
            return Err(ConfigError::ZeroInterval {
                field: "refresh_seconds",
                url: self.url.clone(),
            });
        }
        if self.frequency_minutes == 0 {
            return Err(ConfigError::ZeroInterval {
                field: "frequency_minutes",
                url: self.url.clone(),
            });
        }
        if self.check_interval_seconds == 0 {
            return Err(ConfigError::ZeroInterval {
                field: "check_interval_seconds",
                url: self.url.clone(),
            });
        }
        // A fetch cadence slower than the window would leave windows with at
        // most one snapshot and nothing to compact.
        if self.refresh_seconds >= u64::from(self.frequency_minutes) * 60 {
            return Err(ConfigError::RefreshExceedsWindow(self.url.clone()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
    #[error("No providers configured")]
    NoProviders,
    #[error("Provider name must not be empty")]
    EmptyProviderName,
    #[error("Duplicate provider name: {0}")]
    DuplicateProvider(String),
    #[error("Provider '{0}' has no apis")]
    NoApis(String),
    #[error("Api '{0}' has an empty service list")]
    EmptyServices(String),
    #[error("Api '{url}' has {field} = 0")]
    ZeroInterval { field: &'static str, url: String },
    #[error("Api '{0}': refresh_seconds must be shorter than the aggregation window")]
    RefreshExceedsWindow(String),
    #[error("Unknown storage type: {0}")]
    UnknownStorageType(String),
    #[error("Storage type '{0}' requires params.root")]
    MissingStorageRoot(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_toml() -> &'static str {
        r#"
            [storage]
            type = "filesystem"
            [storage.params]
            root = "/tmp/gtfs-data"

            [[providers]]
            name = "test_provider"
            timezone = "UTC"

            [[providers.apis]]
            url = "http://localhost:8788/vehicle_positions"
            services = ["VehiclePosition"]
            refresh_seconds = 60
            frequency_minutes = 15
        "#
    }

    #[test]
    fn parse_minimal_config() {
        let config: Config = toml::from_str(base_toml()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.storage.kind, "filesystem");
        assert_eq!(config.providers.len(), 1);

        let provider = &config.providers[0];
        assert_eq!(provider.name, "test_provider");
        assert_eq!(provider.timezone, chrono_tz::UTC);

        let api = &provider.apis[0];
        assert_eq!(api.services, vec![ServiceType::VehiclePosition]);
        assert_eq!(api.refresh_seconds, 60);
        assert_eq!(api.frequency_minutes, 15);
        // Unset fields fall back to their defaults
        assert_eq!(api.check_interval_seconds, 300);
    }

    #[test]
    fn frequency_defaults_to_an_hour() {
        let toml_str = r#"
            [storage]
            type = "memory"

            [[providers]]
            name = "p"
            timezone = "Europe/Berlin"

            [[providers.apis]]
            url = "http://h/feed"
            services = ["TripUpdate", "Alert"]
            refresh_seconds = 30
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        assert_eq!(config.providers[0].apis[0].frequency_minutes, 60);
    }

    #[test]
    fn invalid_timezone_is_a_parse_error() {
        let toml_str = base_toml().replace("\"UTC\"", "\"Mars/Olympus\"");
        let result: Result<Config, _> = toml::from_str(&toml_str);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_service_is_a_parse_error() {
        let toml_str = base_toml().replace("VehiclePosition", "HoverBoard");
        let result: Result<Config, _> = toml::from_str(&toml_str);
        assert!(result.is_err());
    }

    #[test]
    fn empty_services_rejected() {
        let toml_str = base_toml().replace("[\"VehiclePosition\"]", "[]");
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyServices(_))
        ));
    }

    #[test]
    fn zero_refresh_rejected() {
        let toml_str = base_toml().replace("refresh_seconds = 60", "refresh_seconds = 0");
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroInterval {
                field: "refresh_seconds",
                ..
            })
        ));
    }

    #[test]
    fn refresh_slower_than_window_rejected() {
        let toml_str = base_toml().replace("refresh_seconds = 60", "refresh_seconds = 900");
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RefreshExceedsWindow(_))
        ));
    }

    #[test]
    fn duplicate_provider_rejected() {
        let toml_str = format!(
            "{}\n{}",
            base_toml(),
            r#"
            [[providers]]
            name = "test_provider"
            timezone = "UTC"

            [[providers.apis]]
            url = "http://localhost:8788/alerts"
            services = ["Alert"]
            refresh_seconds = 60
            "#
        );
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateProvider(_))
        ));
    }

    #[test]
    fn missing_config_file_is_read_error() {
        let result = Config::load("definitely/not/a/real/config.toml");
        assert!(matches!(result, Err(ConfigError::ReadError(_))));
    }
}
