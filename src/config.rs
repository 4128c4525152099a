//! Indexer settings and how they are resolved.

use crate::{
    config_db::ConfigDb,
    error::{Error, Result},
};

pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;
pub const DEFAULT_PAGE_SIZE: usize = 100;
/// Largest page a scroll may request.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Setting keys, shared by the environment and the config database.
pub mod keys {
    pub const BATCH_SIZE: &str = "batch_size";
    pub const MAX_IN_FLIGHT: &str = "max_in_flight";
    pub const PAGE_SIZE: &str = "page_size";

    pub const ALL: [&str; 3] = [BATCH_SIZE, MAX_IN_FLIGHT, PAGE_SIZE];

    /// Environment variable overriding a setting.
    pub fn env_var(key: &str) -> String {
        format!("CHEMDEX_{}", key.to_ascii_uppercase())
    }
}

/// Settings for one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerConfig {
    collection: String,
    batch_size: usize,
    max_in_flight: usize,
    page_size: usize,
}

impl IndexerConfig {
    pub fn new(collection: impl Into<String>) -> Result<Self> {
        let collection = collection.into();
        if collection.trim().is_empty() {
            return Err(Error::InvalidConfiguration(
                "collection name must not be empty".into(),
            ));
        }
        Ok(Self {
            collection,
            batch_size: DEFAULT_BATCH_SIZE,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_batch_size(self, batch_size: usize) -> Result<Self> {
        Ok(Self {
            batch_size: positive(keys::BATCH_SIZE, batch_size)?,
            ..self
        })
    }

    pub fn with_max_in_flight(self, max_in_flight: usize) -> Result<Self> {
        Ok(Self {
            max_in_flight: positive(keys::MAX_IN_FLIGHT, max_in_flight)?,
            ..self
        })
    }

    pub fn with_page_size(self, page_size: usize) -> Result<Self> {
        let page_size = positive(keys::PAGE_SIZE, page_size)?;
        if page_size > MAX_PAGE_SIZE {
            return Err(Error::InvalidConfiguration(format!(
                "{} must be at most {MAX_PAGE_SIZE}, got {page_size}",
                keys::PAGE_SIZE
            )));
        }
        Ok(Self { page_size, ..self })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }
}

fn positive(key: &str, value: usize) -> Result<usize> {
    if value == 0 {
        return Err(Error::InvalidConfiguration(format!(
            "{key} must be a positive integer, got 0"
        )));
    }
    Ok(value)
}

/// Parse a user-supplied setting. Zero, negative and non-numeric values
/// are rejected.
pub fn parse_positive(key: &str, raw: &str) -> Result<usize> {
    let value: i64 = raw.trim().parse().map_err(|_| {
        Error::InvalidConfiguration(format!(
            "{key} must be a positive integer, got '{raw}'"
        ))
    })?;
    if value <= 0 {
        return Err(Error::InvalidConfiguration(format!(
            "{key} must be a positive integer, got {value}"
        )));
    }
    usize::try_from(value).map_err(|_| {
        Error::InvalidConfiguration(format!("{key} is too large: {value}"))
    })
}

/// Resolve one numeric setting: explicit value, then the environment, then
/// the config database, then `default`.
pub fn resolve_setting(
    key: &str,
    explicit: Option<i64>,
    config_db: Option<&ConfigDb>,
    default: usize,
) -> Result<usize> {
    if let Some(value) = explicit {
        return parse_positive(key, &value.to_string());
    }
    if let Ok(raw) = std::env::var(keys::env_var(key)) {
        return parse_positive(key, &raw);
    }
    if let Some(db) = config_db
        && let Some(raw) = db.get_setting(key)?
    {
        return parse_positive(key, &raw);
    }
    Ok(default)
}

/// Command-line overrides for [`IndexerConfig::resolve`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Overrides {
    pub batch_size: Option<i64>,
    pub max_in_flight: Option<i64>,
    pub page_size: Option<i64>,
}

impl IndexerConfig {
    /// Build a config for `collection`, resolving every setting.
    pub fn resolve(
        collection: &str,
        overrides: Overrides,
        config_db: Option<&ConfigDb>,
    ) -> Result<Self> {
        Self::new(collection)?
            .with_batch_size(resolve_setting(
                keys::BATCH_SIZE,
                overrides.batch_size,
                config_db,
                DEFAULT_BATCH_SIZE,
            )?)?
            .with_max_in_flight(resolve_setting(
                keys::MAX_IN_FLIGHT,
                overrides.max_in_flight,
                config_db,
                DEFAULT_MAX_IN_FLIGHT,
            )?)?
            .with_page_size(resolve_setting(
                keys::PAGE_SIZE,
                overrides.page_size,
                config_db,
                DEFAULT_PAGE_SIZE,
            )?)
    }
}
