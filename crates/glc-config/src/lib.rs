//! glc-config
//!
//! Layered configuration: YAML files merged in order (later overrides
//! earlier), then `GLC_*` environment variables on top, then defaults for
//! anything still unset. The merged document is canonicalized (sorted keys,
//! compact JSON) and fingerprinted with SHA-256 so runs can be correlated
//! with the exact configuration that produced them.
//!
//! All validation happens here, at startup; every failure is
//! `DataError::Config` and fatal.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use glc_core::DataError;

// ---------------------------------------------------------------------------
// Typed settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DbConfig {
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default = "default_db_user")]
    pub user: String,
    /// Never logged; see `Config::fingerprint` which hashes a redacted copy.
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_db_database")]
    pub database: String,
    /// Enable TLS to the database HTTP endpoint.
    #[serde(default)]
    pub secure: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            user: default_db_user(),
            password: String::new(),
            database: default_db_database(),
            secure: false,
        }
    }
}

impl DbConfig {
    /// Base URL of the database HTTP interface.
    pub fn http_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    #[serde(default = "default_archive_root")]
    pub archive_root: String,
    #[serde(default = "default_rest_spot_root")]
    pub rest_spot_root: String,
    #[serde(default = "default_rest_futures_root")]
    pub rest_futures_root: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            archive_root: default_archive_root(),
            rest_spot_root: default_rest_spot_root(),
            rest_futures_root: default_rest_futures_root(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Csv,
    Parquet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_chunk_size_spot")]
    pub chunk_size_spot: usize,
    #[serde(default = "default_chunk_size_futures")]
    pub chunk_size_futures: usize,
    #[serde(default = "default_gap_workers")]
    pub parallel_gap_workers: usize,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_output_format")]
    pub output_format: OutputFormat,
    #[serde(default = "default_strict_schema")]
    pub strict_schema: bool,
}

impl Default for Config {
    fn default() -> Self {
        // The empty document deserializes entirely from field defaults.
        serde_json::from_value(Value::Object(Default::default()))
            .expect("default config must deserialize")
    }
}

fn default_db_host() -> String {
    "localhost".to_string()
}
fn default_db_port() -> u16 {
    8123
}
fn default_db_user() -> String {
    "default".to_string()
}
fn default_db_database() -> String {
    "market_data".to_string()
}
fn default_archive_root() -> String {
    "https://data.binance.vision/data".to_string()
}
fn default_rest_spot_root() -> String {
    "https://api.binance.com/api/v3".to_string()
}
fn default_rest_futures_root() -> String {
    "https://fapi.binance.com/fapi/v1".to_string()
}
fn default_http_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_chunk_size_spot() -> usize {
    1_000
}
fn default_chunk_size_futures() -> usize {
    1_500
}
fn default_gap_workers() -> usize {
    4
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_output_format() -> OutputFormat {
    OutputFormat::Csv
}
fn default_strict_schema() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Environment variable prefix. `GLC_DB_HOST` overrides `db.host`, etc.
pub const ENV_PREFIX: &str = "GLC_";

const ENV_KEYS: &[(&str, &[&str])] = &[
    ("GLC_DB_HOST", &["db", "host"]),
    ("GLC_DB_PORT", &["db", "port"]),
    ("GLC_DB_USER", &["db", "user"]),
    ("GLC_DB_PASSWORD", &["db", "password"]),
    ("GLC_DB_DATABASE", &["db", "database"]),
    ("GLC_DB_SECURE", &["db", "secure"]),
    ("GLC_ARCHIVE_ROOT", &["upstream", "archive_root"]),
    ("GLC_REST_SPOT_ROOT", &["upstream", "rest_spot_root"]),
    ("GLC_REST_FUTURES_ROOT", &["upstream", "rest_futures_root"]),
    ("GLC_HTTP_TIMEOUT_SECONDS", &["http_timeout_seconds"]),
    ("GLC_MAX_RETRIES", &["max_retries"]),
    ("GLC_CHUNK_SIZE_SPOT", &["chunk_size_spot"]),
    ("GLC_CHUNK_SIZE_FUTURES", &["chunk_size_futures"]),
    ("GLC_PARALLEL_GAP_WORKERS", &["parallel_gap_workers"]),
    ("GLC_OUTPUT_DIR", &["output_dir"]),
    ("GLC_OUTPUT_FORMAT", &["output_format"]),
    ("GLC_STRICT_SCHEMA", &["strict_schema"]),
];

/// Load configuration from YAML files merged in order, then environment
/// overrides, then validate.
pub fn load(paths: &[&Path]) -> Result<LoadedConfig, DataError> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let s = fs::read_to_string(p)
            .map_err(|e| DataError::Config(format!("read config {}: {e}", p.display())))?;
        let yaml_val: serde_yaml::Value = serde_yaml::from_str(&s)
            .map_err(|e| DataError::Config(format!("parse yaml {}: {e}", p.display())))?;
        let json_val = serde_json::to_value(yaml_val)
            .map_err(|e| DataError::Config(format!("yaml->json conversion failed: {e}")))?;
        merge_layer(&mut merged, json_val);
    }

    apply_env_overrides(&mut merged, |k| std::env::var(k).ok())?;
    finish(merged)
}

/// Load from environment and defaults only (no files).
pub fn load_from_env() -> Result<LoadedConfig, DataError> {
    let mut merged = Value::Object(Default::default());
    apply_env_overrides(&mut merged, |k| std::env::var(k).ok())?;
    finish(merged)
}

fn finish(merged: Value) -> Result<LoadedConfig, DataError> {
    let config: Config = serde_json::from_value(merged)
        .map_err(|e| DataError::Config(format!("invalid configuration: {e}")))?;
    config.validate()?;
    let fingerprint = config.fingerprint();
    Ok(LoadedConfig {
        config,
        fingerprint,
    })
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    /// SHA-256 over the canonical redacted document.
    pub fingerprint: String,
}

impl Config {
    pub fn validate(&self) -> Result<(), DataError> {
        if self.db.host.is_empty() {
            return Err(DataError::Config("db_host must not be empty".into()));
        }
        if self.db.database.is_empty() {
            return Err(DataError::Config("db_database must not be empty".into()));
        }
        for (name, url) in [
            ("archive_root", &self.upstream.archive_root),
            ("rest_spot_root", &self.upstream.rest_spot_root),
            ("rest_futures_root", &self.upstream.rest_futures_root),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(DataError::Config(format!(
                    "{name} must be an http(s) url, got '{url}'"
                )));
            }
        }
        if self.http_timeout_seconds == 0 {
            return Err(DataError::Config("http_timeout_seconds must be > 0".into()));
        }
        if self.max_retries == 0 {
            return Err(DataError::Config("max_retries must be > 0".into()));
        }
        if self.chunk_size_spot == 0 || self.chunk_size_spot > 1_000 {
            return Err(DataError::Config(format!(
                "chunk_size_spot must be in 1..=1000, got {}",
                self.chunk_size_spot
            )));
        }
        if self.chunk_size_futures == 0 || self.chunk_size_futures > 1_500 {
            return Err(DataError::Config(format!(
                "chunk_size_futures must be in 1..=1500, got {}",
                self.chunk_size_futures
            )));
        }
        if self.parallel_gap_workers == 0 {
            return Err(DataError::Config("parallel_gap_workers must be > 0".into()));
        }
        Ok(())
    }

    /// Canonical fingerprint with the password redacted, so the hash can be
    /// logged and persisted.
    ///
    /// The serde_json maps in this crate are BTreeMap-backed (the
    /// `preserve_order` feature is off), so compact serialization is already
    /// key-sorted and stable across processes.
    pub fn fingerprint(&self) -> String {
        let mut v = serde_json::to_value(self).expect("config serializes");
        if let Some(db) = v.get_mut("db").and_then(Value::as_object_mut) {
            db.insert("password".to_string(), Value::String("<redacted>".into()));
        }
        let canonical =
            serde_json::to_string(&v).expect("json serialization must not fail");
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }
}

fn apply_env_overrides<F>(merged: &mut Value, get: F) -> Result<(), DataError>
where
    F: Fn(&str) -> Option<String>,
{
    for (env_key, path) in ENV_KEYS {
        let Some(raw) = get(env_key) else { continue };
        let leaf = coerce_env_value(&raw);
        insert_path(merged, path, leaf);
    }
    Ok(())
}

/// Environment values arrive as strings; numbers and booleans must become
/// JSON scalars or typed deserialization rejects them.
fn coerce_env_value(raw: &str) -> Value {
    let t = raw.trim();
    if t.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if t.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(n) = t.parse::<u64>() {
        return Value::Number(n.into());
    }
    Value::String(t.to_string())
}

fn insert_path(dst: &mut Value, path: &[&str], leaf: Value) {
    let mut cur = dst;
    for (i, key) in path.iter().enumerate() {
        let obj = match cur {
            Value::Object(m) => m,
            other => {
                *other = Value::Object(Default::default());
                other
                    .as_object_mut()
                    .expect("value was just assigned an object")
            }
        };
        if i == path.len() - 1 {
            obj.insert((*key).to_string(), leaf);
            return;
        }
        cur = obj
            .entry((*key).to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }
}

/// Merge one configuration layer over the accumulated document.
///
/// Mappings merge key-by-key and recurse, so a later file can override
/// `db.host` without clobbering `db.port`. Anything that is not a
/// mapping-over-mapping (scalars, arrays, or a type change between layers)
/// is replaced outright by the later layer.
fn merge_layer(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Object(overlay_map) if base.is_object() => {
            let base_map = base.as_object_mut().expect("guard checked is_object");
            for (key, val) in overlay_map {
                merge_layer(base_map.entry(key).or_insert(Value::Null), val);
            }
        }
        other => *base = other,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.chunk_size_spot, 1_000);
        assert_eq!(cfg.chunk_size_futures, 1_500);
        assert_eq!(cfg.http_timeout_seconds, 30);
        assert_eq!(cfg.max_retries, 3);
        assert!(cfg.strict_schema);
        assert_eq!(cfg.output_format, OutputFormat::Csv);
    }

    #[test]
    fn db_http_url_scheme_follows_secure() {
        let mut db = DbConfig::default();
        assert_eq!(db.http_url(), "http://localhost:8123");
        db.secure = true;
        db.host = "ch.internal".into();
        db.port = 8443;
        assert_eq!(db.http_url(), "https://ch.internal:8443");
    }

    #[test]
    fn yaml_layering_later_overrides_earlier() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.yaml");
        let over = dir.path().join("override.yaml");
        let mut f = fs::File::create(&base).unwrap();
        writeln!(f, "db:\n  host: base-host\n  port: 9000\nmax_retries: 5").unwrap();
        let mut f = fs::File::create(&over).unwrap();
        writeln!(f, "db:\n  host: override-host").unwrap();

        let loaded = load(&[base.as_path(), over.as_path()]).unwrap();
        assert_eq!(loaded.config.db.host, "override-host");
        // Non-overridden keys survive the merge.
        assert_eq!(loaded.config.db.port, 9000);
        assert_eq!(loaded.config.max_retries, 5);
    }

    #[test]
    fn merge_layer_mappings_merge_scalars_replace() {
        let mut doc = serde_json::json!({
            "db": {"host": "a", "port": 9000},
            "max_retries": 3,
        });
        merge_layer(
            &mut doc,
            serde_json::json!({"db": {"host": "b"}, "max_retries": 5}),
        );
        assert_eq!(doc["db"]["host"], "b");
        assert_eq!(doc["db"]["port"], 9000);
        assert_eq!(doc["max_retries"], 5);

        // A type change between layers replaces the whole subtree.
        merge_layer(&mut doc, serde_json::json!({"db": "unset"}));
        assert_eq!(doc["db"], "unset");
    }

    #[test]
    fn env_overrides_beat_files() {
        let mut merged = Value::Object(Default::default());
        merge_layer(
            &mut merged,
            serde_json::json!({"db": {"host": "from-file"}}),
        );
        apply_env_overrides(&mut merged, |k| match k {
            "GLC_DB_HOST" => Some("from-env".to_string()),
            "GLC_DB_PORT" => Some("9440".to_string()),
            "GLC_DB_SECURE" => Some("true".to_string()),
            _ => None,
        })
        .unwrap();
        let loaded = finish(merged).unwrap();
        assert_eq!(loaded.config.db.host, "from-env");
        assert_eq!(loaded.config.db.port, 9440);
        assert!(loaded.config.db.secure);
    }

    #[test]
    fn invalid_chunk_size_rejected() {
        let mut cfg = Config::default();
        cfg.chunk_size_spot = 2_000;
        assert!(matches!(cfg.validate(), Err(DataError::Config(_))));
    }

    #[test]
    fn non_http_url_rejected() {
        let mut cfg = Config::default();
        cfg.upstream.archive_root = "ftp://example.com".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_yaml_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("bad.yaml");
        fs::write(&p, "no_such_key: 1\n").unwrap();
        assert!(matches!(
            load(&[p.as_path()]),
            Err(DataError::Config(_))
        ));
    }

    #[test]
    fn fingerprint_stable_and_redacts_password() {
        let mut a = Config::default();
        let mut b = Config::default();
        assert_eq!(a.fingerprint(), b.fingerprint());
        // Password differences must not change the fingerprint...
        a.db.password = "secret-1".into();
        b.db.password = "secret-2".into();
        assert_eq!(a.fingerprint(), b.fingerprint());
        // ...but real settings must.
        b.db.host = "elsewhere".into();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
