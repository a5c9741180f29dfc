use std::path::Path;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::catalog::cache::DEFAULT_CATALOG_TTL;
use crate::query::executor::DEFAULT_AUDIT_COLUMNS;
use crate::query::export::DEFAULT_EXPORT_BATCH_SIZE;
use crate::query::pagination::{
    DEFAULT_KEYSET_THRESHOLD, DEFAULT_MAX_PAGE_SIZE, DEFAULT_PAGE_SIZE,
};

pub const ENV_PREFIX: &str = "ROWSCOPE";
const ENV_SEPARATOR: &str = "__";

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct RowscopeConfig {
    pub store: Store,
    #[serde(default)]
    pub browser: Browser,
    #[serde(default)]
    pub misc: Misc,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Store {
    #[cfg(feature = "store-postgres")]
    Postgres(Postgres),
    Sqlite(Sqlite),
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Postgres {
    pub dsn: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Sqlite {
    pub dsn: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    16
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Browser {
    /// Schemas that may be browsed; empty allows all
    pub schemas: Vec<String>,
    pub page_size: u64,
    pub max_page_size: u64,
    pub keyset_threshold: u64,
    /// Seconds
    pub catalog_ttl: u64,
    pub export_batch_size: u64,
    pub audit_columns: Vec<String>,
}

impl Default for Browser {
    fn default() -> Self {
        Self {
            schemas: vec![],
            page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            keyset_threshold: DEFAULT_KEYSET_THRESHOLD,
            catalog_ttl: DEFAULT_CATALOG_TTL.as_secs(),
            export_batch_size: DEFAULT_EXPORT_BATCH_SIZE,
            audit_columns: DEFAULT_AUDIT_COLUMNS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq, Default, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Default, Clone)]
#[serde(default)]
pub struct Misc {
    pub log_format: LogFormat,
}

pub fn validate_config(config: RowscopeConfig) -> Result<RowscopeConfig, ConfigError> {
    let browser = &config.browser;

    if browser.page_size == 0 {
        return Err(ConfigError::Message(
            "browser.page_size must be at least 1".to_string(),
        ));
    }
    if browser.page_size > browser.max_page_size {
        return Err(ConfigError::Message(format!(
            "browser.page_size ({}) can't exceed browser.max_page_size ({})",
            browser.page_size, browser.max_page_size
        )));
    }
    if browser.export_batch_size == 0 {
        return Err(ConfigError::Message(
            "browser.export_batch_size must be at least 1".to_string(),
        ));
    }

    Ok(config)
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .list_separator(",")
        .with_list_parse_key("browser.schemas")
        .with_list_parse_key("browser.audit_columns")
        .try_parsing(true)
}

pub fn load_config(path: &Path) -> Result<RowscopeConfig, ConfigError> {
    let path = path.to_str().ok_or_else(|| {
        ConfigError::Message(format!("Config path {path:?} isn't valid UTF-8"))
    })?;

    let config = Config::builder()
        .add_source(File::with_name(path))
        .add_source(environment());

    config.build()?.try_deserialize().and_then(validate_config)
}

// Load a config from a string (to test our structs are defined correctly)
pub fn load_config_from_string(
    config_str: &str,
    skip_validation: bool,
) -> Result<RowscopeConfig, ConfigError> {
    let config =
        Config::builder().add_source(File::from_str(config_str, FileFormat::Toml));

    if skip_validation {
        config.build()?.try_deserialize()
    } else {
        config.build()?.try_deserialize().and_then(validate_config)
    }
}
