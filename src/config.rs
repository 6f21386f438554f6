use crate::domain::entities::{
    CollectionRef, ExtractionSettings, StreamDescriptor, DEFAULT_OPERATION_TYPES,
};
use crate::domain::value_objects::parse_timestamp;
use serde::Deserialize;
use std::time::Duration;

/// Configuration errors detected before any stream is opened.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no connection string configured (set DOCTAP_CONNECTION_STRING or DOCTAP_CONNECTION_STRING_FILE)")]
    MissingConnectionString,

    #[error("cannot read connection string file {path}: {source}")]
    ConnectionStringFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid start_date '{0}'; expected YYYY-MM-DD, YYYY-MM-DDTHH:MM:SS or RFC 3339")]
    InvalidStartDate(String),

    #[error("invalid collection '{0}'; expected database.collection")]
    InvalidCollection(String),
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // Source settings
    pub connection_string: Option<String>,
    pub connection_string_file: Option<String>,
    pub database: Option<String>,
    pub collections: Vec<String>,
    pub stream_prefix: Option<String>,
    /// Filter the databases named in `collections`; there is no discovery
    pub database_includes: Vec<String>,
    pub database_excludes: Vec<String>,

    // Replication settings
    pub replication_method: String,
    pub replication_key: String,
    pub start_date: String,
    pub add_record_metadata: bool,
    pub operation_types: Vec<String>,
    pub max_await_time_ms: Option<u64>,

    // State settings
    pub state_path: String,
    pub partition: Option<String>,

    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection_string: None,
            connection_string_file: None,
            database: None,
            collections: Vec::new(),
            stream_prefix: None,
            database_includes: Vec::new(),
            database_excludes: Vec::new(),
            replication_method: "INCREMENTAL".to_string(),
            replication_key: "_id".to_string(),
            start_date: "1970-01-01".to_string(),
            add_record_metadata: false,
            operation_types: DEFAULT_OPERATION_TYPES.iter().map(|s| s.to_string()).collect(),
            max_await_time_ms: None,
            state_path: "state.db".to_string(),
            partition: None,
            debug: false,
        }
    }
}

/// A collection selected for replication and the stream it feeds.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedStream {
    pub collection: CollectionRef,
    pub descriptor: StreamDescriptor,
}

impl Config {
    /// Resolve the connection string. A readable file wins over the
    /// inline value.
    pub fn connection_string(&self) -> Result<String, ConfigError> {
        if let Some(path) = &self.connection_string_file {
            if std::path::Path::new(path).exists() {
                let contents = std::fs::read_to_string(path).map_err(|source| {
                    ConfigError::ConnectionStringFile {
                        path: path.clone(),
                        source,
                    }
                })?;
                return Ok(contents.trim().to_string());
            }
        }
        self.connection_string
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingConnectionString)
    }

    /// Streams for the configured collections, after database filtering.
    ///
    /// The include/exclude lists only narrow the explicit `collections`
    /// list; databases are never discovered.
    pub fn streams(&self) -> Result<Vec<SelectedStream>, ConfigError> {
        let mut selected = Vec::new();
        for entry in &self.collections {
            let collection = self.collection_ref(entry)?;
            if !self.database_selected(&collection.database) {
                tracing::debug!(
                    database = %collection.database,
                    collection = %collection.collection,
                    "skipping filtered database"
                );
                continue;
            }

            let key = Some(self.replication_key.clone()).filter(|k| !k.is_empty());
            let mut descriptor = StreamDescriptor::new(
                collection.stream_name(self.stream_prefix.as_deref()),
                self.replication_method.clone(),
            )
            .with_replication_key(key);
            if let Some(partition) = &self.partition {
                descriptor = descriptor.with_partition(partition.clone());
            }

            selected.push(SelectedStream {
                collection,
                descriptor,
            });
        }
        Ok(selected)
    }

    pub fn extraction_settings(&self) -> Result<ExtractionSettings, ConfigError> {
        let start_date = parse_timestamp(&self.start_date)
            .ok_or_else(|| ConfigError::InvalidStartDate(self.start_date.clone()))?;
        Ok(ExtractionSettings {
            add_record_metadata: self.add_record_metadata,
            start_date,
            operation_types: self.operation_types.iter().cloned().collect(),
            max_await_time: self.max_await_time_ms.map(Duration::from_millis),
        })
    }

    fn collection_ref(&self, entry: &str) -> Result<CollectionRef, ConfigError> {
        if let Some(parsed) = CollectionRef::parse(entry) {
            return Ok(parsed);
        }
        match (&self.database, entry.trim()) {
            (Some(database), name) if !name.is_empty() && !name.contains('.') => {
                Ok(CollectionRef::new(database.clone(), name))
            }
            _ => Err(ConfigError::InvalidCollection(entry.to_string())),
        }
    }

    /// Exclusion wins over inclusion; an empty include list admits all.
    fn database_selected(&self, database: &str) -> bool {
        if self.database_excludes.iter().any(|d| d == database) {
            return false;
        }
        self.database_includes.is_empty() || self.database_includes.iter().any(|d| d == database)
    }
}

pub fn load_config() -> anyhow::Result<Config> {
    Ok(load_config_from(|key| std::env::var(key).ok())?)
}

/// Build the configuration from `lookup`, which maps variable names to
/// values.
pub fn load_config_from<F>(lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = Config::default();
    let list = |key: &str| -> Option<Vec<String>> {
        lookup(key).map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
    };
    let flag = |key: &str| {
        lookup(key)
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false)
    };

    let connection_string = lookup("DOCTAP_CONNECTION_STRING");
    let connection_string_file = lookup("DOCTAP_CONNECTION_STRING_FILE");
    let database = lookup("DOCTAP_DATABASE").filter(|s| !s.is_empty());
    let collections = list("DOCTAP_COLLECTIONS").unwrap_or_default();
    let stream_prefix = lookup("DOCTAP_STREAM_PREFIX").filter(|s| !s.is_empty());
    let database_includes = list("DOCTAP_DATABASE_INCLUDES").unwrap_or_default();
    let database_excludes = list("DOCTAP_DATABASE_EXCLUDES").unwrap_or_default();

    let replication_method =
        lookup("DOCTAP_REPLICATION_METHOD").unwrap_or(defaults.replication_method);
    let replication_key = lookup("DOCTAP_REPLICATION_KEY").unwrap_or(defaults.replication_key);

    let start_date = lookup("DOCTAP_START_DATE").unwrap_or(defaults.start_date);
    if parse_timestamp(&start_date).is_none() {
        return Err(ConfigError::InvalidStartDate(start_date));
    }

    let add_record_metadata = flag("DOCTAP_ADD_RECORD_METADATA");
    let operation_types = list("DOCTAP_OPERATION_TYPES").unwrap_or(defaults.operation_types);
    let max_await_time_ms = lookup("DOCTAP_MAX_AWAIT_TIME_MS").and_then(|v| v.parse().ok());

    let state_path = lookup("DOCTAP_STATE_PATH").unwrap_or(defaults.state_path);
    let partition = lookup("DOCTAP_PARTITION").filter(|s| !s.is_empty());

    let debug = lookup("DEBUG").is_some();

    Ok(Config {
        connection_string,
        connection_string_file,
        database,
        collections,
        stream_prefix,
        database_includes,
        database_excludes,
        replication_method,
        replication_key,
        start_date,
        add_record_metadata,
        operation_types,
        max_await_time_ms,
        state_path,
        partition,
        debug,
    })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        load_config_from(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.replication_method, "INCREMENTAL");
        assert_eq!(cfg.replication_key, "_id");
        assert_eq!(cfg.start_date, "1970-01-01");
        assert_eq!(cfg.state_path, "state.db");
        assert!(!cfg.add_record_metadata);
        assert_eq!(cfg.operation_types.len(), 4);
    }

    #[test]
    fn test_load_config_defaults() {
        let cfg = load(&[]).unwrap();
        assert!(cfg.collections.is_empty());
        assert!(cfg.connection_string.is_none());
        assert_eq!(cfg.replication_method, "INCREMENTAL");
        assert!(!cfg.debug);
    }

    #[test]
    fn test_load_config_from_environment() {
        std::env::set_var("DOCTAP_STREAM_PREFIX", "tap");
        let cfg = load_config().unwrap();
        assert_eq!(cfg.stream_prefix, Some("tap".to_string()));
        std::env::remove_var("DOCTAP_STREAM_PREFIX");
    }

    #[test]
    fn test_collections_list_trimmed() {
        let cfg = load(&[("DOCTAP_COLLECTIONS", " shop.orders, shop.items ,,")]).unwrap();
        assert_eq!(cfg.collections, vec!["shop.orders", "shop.items"]);
    }

    #[test]
    fn test_add_record_metadata_flag() {
        assert!(load(&[("DOCTAP_ADD_RECORD_METADATA", "TRUE")]).unwrap().add_record_metadata);
        assert!(load(&[("DOCTAP_ADD_RECORD_METADATA", "1")]).unwrap().add_record_metadata);
        assert!(!load(&[("DOCTAP_ADD_RECORD_METADATA", "no")]).unwrap().add_record_metadata);
    }

    #[test]
    fn test_invalid_start_date_rejected() {
        let result = load(&[("DOCTAP_START_DATE", "yesterday")]);
        assert!(matches!(result, Err(ConfigError::InvalidStartDate(_))));
    }

    #[test]
    fn test_parse_error_uses_default() {
        let cfg = load(&[("DOCTAP_MAX_AWAIT_TIME_MS", "soon")]).unwrap();
        assert!(cfg.max_await_time_ms.is_none());
    }

    #[test]
    fn test_extraction_settings() {
        let cfg = load(&[
            ("DOCTAP_START_DATE", "2023-01-01"),
            ("DOCTAP_OPERATION_TYPES", "insert,delete"),
            ("DOCTAP_MAX_AWAIT_TIME_MS", "250"),
        ])
        .unwrap();
        let settings = cfg.extraction_settings().unwrap();
        assert_eq!(settings.start_date.timestamp(), 1_672_531_200);
        assert_eq!(settings.operation_types.len(), 2);
        assert!(settings.operation_types.contains("delete"));
        assert_eq!(settings.max_await_time, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_streams_named_with_prefix() {
        let cfg = load(&[
            ("DOCTAP_COLLECTIONS", "shop.orders"),
            ("DOCTAP_STREAM_PREFIX", "tap"),
            ("DOCTAP_REPLICATION_METHOD", "LOG_BASED"),
        ])
        .unwrap();
        let streams = cfg.streams().unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].descriptor.name, "tap_shop_orders");
        assert_eq!(streams[0].descriptor.replication_method, "LOG_BASED");
        assert_eq!(streams[0].collection, CollectionRef::new("shop", "orders"));
    }

    #[test]
    fn test_bare_collection_uses_default_database() {
        let cfg = load(&[("DOCTAP_COLLECTIONS", "orders"), ("DOCTAP_DATABASE", "shop")]).unwrap();
        let streams = cfg.streams().unwrap();
        assert_eq!(streams[0].descriptor.name, "shop_orders");
    }

    #[test]
    fn test_bare_collection_without_database_rejected() {
        let cfg = load(&[("DOCTAP_COLLECTIONS", "orders")]).unwrap();
        assert!(matches!(cfg.streams(), Err(ConfigError::InvalidCollection(_))));
    }

    #[test]
    fn test_database_filters_exclusion_wins() {
        let cfg = load(&[
            ("DOCTAP_COLLECTIONS", "shop.orders,crm.contacts,logs.events"),
            ("DOCTAP_DATABASE_INCLUDES", "shop,crm"),
            ("DOCTAP_DATABASE_EXCLUDES", "crm"),
        ])
        .unwrap();
        let names: Vec<String> = cfg
            .streams()
            .unwrap()
            .into_iter()
            .map(|s| s.descriptor.name)
            .collect();
        assert_eq!(names, vec!["shop_orders"]);
    }

    #[test]
    fn test_database_includes_do_not_add_collections() {
        let cfg = load(&[
            ("DOCTAP_COLLECTIONS", "shop.orders"),
            ("DOCTAP_DATABASE_INCLUDES", "analytics"),
        ])
        .unwrap();
        assert!(cfg.streams().unwrap().is_empty());
    }

    #[test]
    fn test_partition_and_empty_key() {
        let cfg = load(&[
            ("DOCTAP_COLLECTIONS", "shop.orders"),
            ("DOCTAP_PARTITION", "tenant-1"),
            ("DOCTAP_REPLICATION_KEY", ""),
        ])
        .unwrap();
        let stream = &cfg.streams().unwrap()[0].descriptor;
        assert_eq!(stream.partition.as_deref(), Some("tenant-1"));
        assert!(stream.replication_key().is_none());
    }

    #[test]
    fn test_connection_string_inline() {
        let cfg = load(&[("DOCTAP_CONNECTION_STRING", "mongodb://localhost:27017")]).unwrap();
        assert_eq!(cfg.connection_string().unwrap(), "mongodb://localhost:27017");
    }

    #[test]
    fn test_connection_string_file_wins() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "mongodb://secret:27017").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cfg = load(&[
            ("DOCTAP_CONNECTION_STRING", "mongodb://localhost:27017"),
            ("DOCTAP_CONNECTION_STRING_FILE", &path),
        ])
        .unwrap();
        assert_eq!(cfg.connection_string().unwrap(), "mongodb://secret:27017");
    }

    #[test]
    fn test_missing_file_falls_back_to_inline() {
        let cfg = load(&[
            ("DOCTAP_CONNECTION_STRING", "mongodb://localhost:27017"),
            ("DOCTAP_CONNECTION_STRING_FILE", "/nonexistent/conn.txt"),
        ])
        .unwrap();
        assert_eq!(cfg.connection_string().unwrap(), "mongodb://localhost:27017");
    }

    #[test]
    fn test_missing_connection_string() {
        let cfg = load(&[]).unwrap();
        assert!(matches!(
            cfg.connection_string(),
            Err(ConfigError::MissingConnectionString)
        ));
    }

    #[test]
    fn test_config_clone() {
        let cfg = load(&[("DOCTAP_COLLECTIONS", "shop.orders")]).unwrap();
        let cloned = cfg.clone();
        assert_eq!(cfg.collections, cloned.collections);
    }
}
