use murmur_config::{ConfigError, MurmurConfigLoader};
use serial_test::serial;
use std::{fs, path::PathBuf};
use tempfile::TempDir;

fn write_yaml(tmp: &TempDir, name: &str, yaml: &str) -> PathBuf {
    let p = tmp.path().join(name);
    fs::write(&p, yaml).expect("write yaml");
    p
}

#[test]
#[serial]
fn file_overrides_defaults_and_expands_placeholders() {
    let tmp = TempDir::new().unwrap();
    let p = write_yaml(
        &tmp,
        "murmur.yaml",
        r#"
search:
  query: "${MURMUR_TEST_QUERY}"
  max_results: 25
pubsub:
  endpoint: "http://localhost:8085"
  attach_id_attribute: true
logging:
  format: json
  dir: "/var/log/murmur"
"#,
    );

    temp_env::with_vars(
        [
            ("BEARER_TOKEN", Some("b")),
            ("GCP_PROJECT", Some("proj")),
            ("TOPIC_ID", Some("tweets")),
            ("MURMUR_TEST_QUERY", Some("covid lang:en")),
        ],
        || {
            let cfg = MurmurConfigLoader::new().with_file(&p).load().expect("load config");
            assert_eq!(cfg.search.query, "covid lang:en");
            assert_eq!(cfg.search.max_results, 25);
            assert_eq!(cfg.search.window_width_secs, 60);
            assert_eq!(cfg.pubsub.endpoint_override(), Some("http://localhost:8085"));
            assert!(cfg.pubsub.attach_id_attribute);
            assert_eq!(cfg.logging.format, "json");
            assert_eq!(cfg.logging.dir.as_deref(), Some("/var/log/murmur"));
        },
    );
}

#[test]
#[serial]
fn env_wins_over_file() {
    let tmp = TempDir::new().unwrap();
    let p = write_yaml(&tmp, "murmur.yaml", "pubsub:\n  topic_id: from-file\n");

    temp_env::with_vars(
        [
            ("BEARER_TOKEN", Some("b")),
            ("GCP_PROJECT", Some("proj")),
            ("MURMUR_PUBSUB__TOPIC_ID", Some("from-env")),
        ],
        || {
            let cfg = MurmurConfigLoader::new().with_file(&p).load().unwrap();
            assert_eq!(cfg.pubsub.topic_id, "from-env");
        },
    );
}

#[test]
#[serial]
fn optional_file_may_be_absent() {
    let tmp = TempDir::new().unwrap();
    temp_env::with_vars(
        [
            ("BEARER_TOKEN", Some("b")),
            ("GCP_PROJECT", Some("proj")),
            ("TOPIC_ID", Some("tweets")),
        ],
        || {
            let cfg = MurmurConfigLoader::new()
                .with_optional_file(tmp.path().join("absent.yaml"))
                .load()
                .unwrap();
            assert_eq!(cfg.pubsub.topic_id, "tweets");
        },
    );
}

#[test]
#[serial]
fn required_file_must_exist() {
    let tmp = TempDir::new().unwrap();
    let err = MurmurConfigLoader::new()
        .with_file(tmp.path().join("absent.yaml"))
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigError::Source(_)), "got {err:?}");
}
