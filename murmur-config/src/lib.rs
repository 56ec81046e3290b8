//! Configuration for the `murmur` relay.
//!
//! Sources, later ones win:
//! 1. built-in defaults (below), which bind the three required settings to
//!    `${BEARER_TOKEN}`, `${GCP_PROJECT}` and `${TOPIC_ID}`
//! 2. YAML files or snippets added on the loader
//! 3. `MURMUR_`-prefixed environment variables, `__` between path segments
//!    (`MURMUR_PUBSUB__TOPIC_ID=tweets`)
//!
//! `${VAR}` placeholders are expanded after merging, so a file can reference
//! the environment the same way the defaults do.
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use thiserror::Error;

const MAXIMUM_ENV_EXPANSION_DEPTH: usize = 8;
const ENV_PREFIX: &str = "MURMUR";
/// Recent search only reaches this far back (seven days).
pub const MAX_WINDOW_REACH_SECS: u64 = 7 * 24 * 60 * 60;

const DEFAULTS: &str = r#"
search:
  endpoint: "https://api.twitter.com"
  bearer_token: "${BEARER_TOKEN}"
  query: "corona"
  max_results: 10
  window_lag_secs: 60
  window_width_secs: 60
  retries: 0
pubsub:
  project_id: "${GCP_PROJECT}"
  topic_id: "${TOPIC_ID}"
  attach_id_attribute: false
  max_in_flight: 64
  retries: 2
schedule:
  interval_secs: 60
  deadline_secs: 60
logging:
  format: "text"
  filter: "info"
"#;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Source(#[from] config::ConfigError),
    #[error("missing setting `{key}`: set the {env} environment variable")]
    Missing { key: &'static str, env: String },
    #[error("invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct MurmurConfig {
    pub search: SearchConfig,
    pub pubsub: PubSubConfig,
    pub schedule: ScheduleConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Deserialize)]
pub struct SearchConfig {
    pub endpoint: String,
    pub bearer_token: String,
    pub query: String,
    pub max_results: u32,
    pub window_lag_secs: u64,
    pub window_width_secs: u64,
    pub retries: usize,
}

impl fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchConfig")
            .field("endpoint", &self.endpoint)
            .field("bearer_token", &"<redacted>")
            .field("query", &self.query)
            .field("max_results", &self.max_results)
            .field("window_lag_secs", &self.window_lag_secs)
            .field("window_width_secs", &self.window_width_secs)
            .field("retries", &self.retries)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct PubSubConfig {
    pub project_id: String,
    pub topic_id: String,
    /// Alternative REST endpoint, e.g. a local emulator. Requests to it carry no token.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Pre-minted OAuth token; the metadata server is used when absent.
    #[serde(default)]
    pub access_token: Option<String>,
    pub attach_id_attribute: bool,
    pub max_in_flight: usize,
    pub retries: usize,
}

impl PubSubConfig {
    pub fn endpoint_override(&self) -> Option<&str> {
        non_empty(self.endpoint.as_deref())
    }

    pub fn static_token(&self) -> Option<&str> {
        non_empty(self.access_token.as_deref())
    }
}

impl fmt::Debug for PubSubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PubSubConfig")
            .field("project_id", &self.project_id)
            .field("topic_id", &self.topic_id)
            .field("endpoint", &self.endpoint)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("attach_id_attribute", &self.attach_id_attribute)
            .field("max_in_flight", &self.max_in_flight)
            .field("retries", &self.retries)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    pub interval_secs: u64,
    /// Upper bound on one invocation before it is cancelled.
    pub deadline_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `text` or `json`.
    pub format: String,
    #[serde(default)]
    pub dir: Option<String>,
    pub filter: String,
}

fn non_empty(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

/// Name of the first `${VAR}` (or `$VAR`) left in `s`, if any.
fn unresolved_var(s: &str) -> Option<String> {
    let rest = &s[s.find('$')? + 1..];
    let name: String = rest
        .trim_start_matches('{')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    (!name.is_empty()).then_some(name)
}

fn require(key: &'static str, value: &str, env: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Missing {
            key,
            env: env.to_string(),
        });
    }
    if let Some(var) = unresolved_var(value) {
        return Err(ConfigError::Missing { key, env: var });
    }
    Ok(())
}

fn positive(key: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid(format!("{key} must be greater than zero")));
    }
    Ok(())
}

impl MurmurConfig {
    /// Check required settings and value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require("search.bearer_token", &self.search.bearer_token, "BEARER_TOKEN")?;
        require("pubsub.project_id", &self.pubsub.project_id, "GCP_PROJECT")?;
        require("pubsub.topic_id", &self.pubsub.topic_id, "TOPIC_ID")?;
        if let Some(token) = self.pubsub.static_token() {
            require("pubsub.access_token", token, "MURMUR_PUBSUB__ACCESS_TOKEN")?;
        }

        if self.search.query.trim().is_empty() {
            return Err(ConfigError::Invalid("search.query is empty".into()));
        }
        positive("search.max_results", u64::from(self.search.max_results))?;
        positive("search.window_width_secs", self.search.window_width_secs)?;
        let reach = self
            .search
            .window_lag_secs
            .checked_add(self.search.window_width_secs)
            .filter(|secs| *secs <= MAX_WINDOW_REACH_SECS);
        if reach.is_none() {
            return Err(ConfigError::Invalid(format!(
                "search.window_lag_secs + search.window_width_secs must not exceed {MAX_WINDOW_REACH_SECS}"
            )));
        }
        positive("pubsub.max_in_flight", self.pubsub.max_in_flight as u64)?;
        positive("schedule.interval_secs", self.schedule.interval_secs)?;
        positive("schedule.deadline_secs", self.schedule.deadline_secs)?;

        match self.logging.format.to_ascii_lowercase().as_str() {
            "text" | "json" => Ok(()),
            other => Err(ConfigError::Invalid(format!(
                "logging.format `{other}` is not one of text, json"
            ))),
        }
    }
}

fn expand_env_in_value(v: &mut Value) {
    match v {
        Value::String(s) => {
            if s.contains('$') {
                let mut cur = std::mem::take(s);
                for _ in 0..MAXIMUM_ENV_EXPANSION_DEPTH {
                    let expanded = match shellexpand::env(&cur) {
                        Ok(cow) => cow.into_owned(),
                        Err(_) => break,
                    };
                    if expanded == cur {
                        break;
                    }
                    cur = expanded;
                }
                *s = cur;
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(expand_env_in_value),
        Value::Object(obj) => obj.values_mut().for_each(expand_env_in_value),
        _ => {}
    }
}

/// Builder over the `config` crate sources.
pub struct MurmurConfigLoader {
    builder: config::ConfigBuilder<config::builder::DefaultState>,
}

impl Default for MurmurConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl MurmurConfigLoader {
    /// Start from the built-in defaults.
    ///
    /// ```
    /// use murmur_config::MurmurConfigLoader;
    ///
    /// let cfg = MurmurConfigLoader::new()
    ///     .with_yaml_str("search:\n  bearer_token: abc\npubsub:\n  project_id: p\n  topic_id: t\n")
    ///     .load()
    ///     .expect("valid config");
    ///
    /// assert_eq!(cfg.search.query, "corona");
    /// assert_eq!(cfg.search.max_results, 10);
    /// assert_eq!(cfg.pubsub.max_in_flight, 64);
    /// assert!(!cfg.pubsub.attach_id_attribute);
    /// ```
    pub fn new() -> Self {
        let builder = Config::builder().add_source(File::from_str(DEFAULTS, FileFormat::Yaml));
        Self { builder }
    }

    /// Merge a config file that must exist; format follows the extension.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).required(true));
        self
    }

    /// Merge a config file if it exists.
    pub fn with_optional_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).required(false));
        self
    }

    pub fn with_yaml_str(mut self, yaml: &str) -> Self {
        self.builder = self
            .builder
            .add_source(File::from_str(yaml, FileFormat::Yaml));
        self
    }

    /// Merge all sources, expand `${VAR}` placeholders, and validate.
    pub fn load(self) -> Result<MurmurConfig, ConfigError> {
        let merged = self
            .builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut v: Value = merged.try_deserialize()?;
        expand_env_in_value(&mut v);

        // Back through `config` so "60" from the environment still lands in a u64.
        let typed: MurmurConfig = Config::try_from(&v)?.try_deserialize()?;
        typed.validate()?;
        Ok(typed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serial_test::serial;

    const REQUIRED: [(&str, Option<&str>); 3] = [
        ("BEARER_TOKEN", Some("bearer-abc")),
        ("GCP_PROJECT", Some("proj")),
        ("TOPIC_ID", Some("tweets")),
    ];

    #[test]
    fn expands_in_array_and_object() {
        temp_env::with_vars([("CITY", Some("Winston")), ("STATE", Some("NC"))], || {
            let mut v = json!(["hello-$CITY", { "loc": "${CITY}-${STATE}" }, 42, null]);
            expand_env_in_value(&mut v);
            assert_eq!(v, json!(["hello-Winston", { "loc": "Winston-NC" }, 42, null]));
        });
    }

    #[test]
    fn expands_through_nested_references() {
        temp_env::with_vars([("INNER", Some("qux")), ("OUTER", Some("mid-${INNER}"))], || {
            let mut v = json!("x=${OUTER}");
            expand_env_in_value(&mut v);
            assert_eq!(v, json!("x=mid-qux"));
        });
    }

    #[test]
    fn cyclic_references_terminate() {
        temp_env::with_vars([("LOOP_A", Some("${LOOP_B}")), ("LOOP_B", Some("${LOOP_A}"))], || {
            let mut v = json!("${LOOP_A}");
            expand_env_in_value(&mut v);
            assert!(v.as_str().unwrap().contains("${"));
        });
    }

    #[test]
    fn unresolved_var_names_the_variable() {
        assert_eq!(unresolved_var("${TOPIC_ID}").as_deref(), Some("TOPIC_ID"));
        assert_eq!(unresolved_var("pre-$GCP_PROJECT").as_deref(), Some("GCP_PROJECT"));
        assert_eq!(unresolved_var("plain"), None);
    }

    #[test]
    #[serial]
    fn defaults_resolve_from_environment() {
        temp_env::with_vars(REQUIRED, || {
            let cfg = MurmurConfigLoader::new().load().unwrap();
            assert_eq!(cfg.search.bearer_token, "bearer-abc");
            assert_eq!(cfg.pubsub.project_id, "proj");
            assert_eq!(cfg.pubsub.topic_id, "tweets");
            assert_eq!(cfg.search.window_lag_secs, 60);
            assert_eq!(cfg.schedule.deadline_secs, 60);
            assert_eq!(cfg.pubsub.endpoint_override(), None);
            assert_eq!(cfg.logging.filter, "info");
        });
    }

    #[test]
    #[serial]
    fn missing_topic_names_its_variable() {
        temp_env::with_vars(
            [
                ("BEARER_TOKEN", Some("b")),
                ("GCP_PROJECT", Some("p")),
                ("TOPIC_ID", None),
            ],
            || {
                let err = MurmurConfigLoader::new().load().unwrap_err();
                match &err {
                    ConfigError::Missing { key, env } => {
                        assert_eq!(*key, "pubsub.topic_id");
                        assert_eq!(env, "TOPIC_ID");
                    }
                    other => panic!("expected missing setting, got {other:?}"),
                }
                assert!(err.to_string().contains("TOPIC_ID"));
            },
        );
    }

    #[test]
    #[serial]
    fn empty_bearer_is_missing() {
        temp_env::with_vars(
            [
                ("BEARER_TOKEN", Some("")),
                ("GCP_PROJECT", Some("p")),
                ("TOPIC_ID", Some("t")),
            ],
            || {
                let err = MurmurConfigLoader::new().load().unwrap_err();
                assert!(matches!(err, ConfigError::Missing { key: "search.bearer_token", .. }));
            },
        );
    }

    #[test]
    #[serial]
    fn prefixed_env_overrides_files_and_parses_numbers() {
        temp_env::with_vars(
            [
                ("BEARER_TOKEN", Some("b")),
                ("GCP_PROJECT", Some("p")),
                ("TOPIC_ID", Some("t")),
                ("MURMUR_PUBSUB__MAX_IN_FLIGHT", Some("8")),
                ("MURMUR_PUBSUB__ATTACH_ID_ATTRIBUTE", Some("true")),
            ],
            || {
                let cfg = MurmurConfigLoader::new()
                    .with_yaml_str("pubsub:\n  max_in_flight: 4\n")
                    .load()
                    .unwrap();
                assert_eq!(cfg.pubsub.max_in_flight, 8);
                assert!(cfg.pubsub.attach_id_attribute);
            },
        );
    }

    #[test]
    #[serial]
    fn zero_in_flight_is_rejected() {
        temp_env::with_vars(REQUIRED, || {
            let err = MurmurConfigLoader::new()
                .with_yaml_str("pubsub:\n  max_in_flight: 0\n")
                .load()
                .unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "got {err:?}");
        });
    }

    #[test]
    #[serial]
    fn window_beyond_search_horizon_is_rejected() {
        temp_env::with_vars(
            [
                ("BEARER_TOKEN", Some("b")),
                ("GCP_PROJECT", Some("p")),
                ("TOPIC_ID", Some("t")),
                ("MURMUR_SEARCH__WINDOW_LAG_SECS", Some("100000000000000")),
            ],
            || {
                let err = MurmurConfigLoader::new().load().unwrap_err();
                assert!(matches!(err, ConfigError::Invalid(_)), "got {err:?}");
                assert!(err.to_string().contains("window_lag_secs"));
            },
        );
        temp_env::with_vars(REQUIRED, || {
            let cfg = MurmurConfigLoader::new()
                .with_yaml_str("search:\n  window_lag_secs: 604740\n  window_width_secs: 60\n")
                .load()
                .unwrap();
            assert_eq!(cfg.search.window_lag_secs + cfg.search.window_width_secs, MAX_WINDOW_REACH_SECS);
        });
    }

    #[test]
    #[serial]
    fn unknown_log_format_is_rejected() {
        temp_env::with_vars(REQUIRED, || {
            let err = MurmurConfigLoader::new()
                .with_yaml_str("logging:\n  format: xml\n")
                .load()
                .unwrap_err();
            assert!(err.to_string().contains("logging.format"));
        });
    }

    #[test]
    fn debug_output_hides_secrets() {
        let search = SearchConfig {
            endpoint: "https://api.twitter.com".into(),
            bearer_token: "very-secret".into(),
            query: "corona".into(),
            max_results: 10,
            window_lag_secs: 60,
            window_width_secs: 60,
            retries: 0,
        };
        let rendered = format!("{search:?}");
        assert!(!rendered.contains("very-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
