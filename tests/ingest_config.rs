// tests/ingest_config.rs
//
// Config loading order: $AGGREGATOR_CONFIG_PATH, then config/aggregator.toml,
// then built-in defaults. Tests touch the process env and CWD, so they run
// serially inside a temp dir.

use std::{env, fs};

use serial_test::serial;
use timeline_aggregator::config::{load_config_default, load_config_from, ENV_CONFIG_PATH};
use timeline_aggregator::ingest::types::SourceKind;

const SAMPLE: &str = r#"
user_agent = "custom-agent/2"
fetch_timeout_secs = 90

[[feeds]]
name = "papers"
cache_max_age_secs = 30

[[feeds.sources]]
name = "arXiv cs.LG"
kind = "rss"
url = "https://rss.arxiv.org/rss/cs.LG"
default_tags = ["papers"]
"#;

struct CwdGuard(std::path::PathBuf);

impl Drop for CwdGuard {
    fn drop(&mut self) {
        let _ = env::set_current_dir(&self.0);
        env::remove_var(ENV_CONFIG_PATH);
    }
}

fn enter_tempdir() -> (tempfile::TempDir, CwdGuard) {
    let guard = CwdGuard(env::current_dir().unwrap());
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    env::remove_var(ENV_CONFIG_PATH);
    (tmp, guard)
}

#[serial]
#[test]
fn defaults_when_nothing_on_disk() {
    let (_tmp, _guard) = enter_tempdir();
    let cfg = load_config_default().unwrap();
    assert!(cfg.feed("web").is_some());
    assert!(cfg.feed("social").is_some());
    assert_eq!(cfg.fetch_timeout_secs, 15);
}

#[serial]
#[test]
fn repo_config_file_is_picked_up_and_sanitized() {
    let (tmp, _guard) = enter_tempdir();
    fs::create_dir_all(tmp.path().join("config")).unwrap();
    fs::write(tmp.path().join("config/aggregator.toml"), SAMPLE).unwrap();

    let cfg = load_config_default().unwrap();
    assert_eq!(cfg.user_agent, "custom-agent/2");
    assert_eq!(cfg.fetch_timeout_secs, 60);
    assert_eq!(cfg.feeds.len(), 1);
    let papers = &cfg.feeds[0];
    assert_eq!(papers.key, "papers:items");
    assert_eq!(papers.cache_max_age_secs, 60);
    assert_eq!(papers.sources[0].kind, SourceKind::Rss);
    assert_eq!(papers.sources[0].normalized_id(), "arxiv_cs_lg");
}

#[serial]
#[test]
fn env_path_wins_and_must_exist() {
    let (tmp, _guard) = enter_tempdir();
    fs::create_dir_all(tmp.path().join("config")).unwrap();
    fs::write(tmp.path().join("config/aggregator.toml"), SAMPLE).unwrap();

    let json_path = tmp.path().join("override.json");
    fs::write(
        &json_path,
        r#"{"feeds":[{"name":"only","sources":[{"name":"A","url":"https://a.example/feed","kind":"rss"}]}]}"#,
    )
    .unwrap();
    env::set_var(ENV_CONFIG_PATH, json_path.display().to_string());
    let cfg = load_config_default().unwrap();
    assert_eq!(cfg.feeds.len(), 1);
    assert_eq!(cfg.feeds[0].name, "only");

    env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
    assert!(load_config_default().is_err());
}

#[test]
fn invalid_file_is_an_error_with_path_context() {
    let tmp = tempfile::tempdir().unwrap();
    let p = tmp.path().join("bad.toml");
    fs::write(&p, "feeds = 3").unwrap();
    let err = load_config_from(&p).unwrap_err();
    assert!(format!("{err:#}").contains("bad.toml"));
}
