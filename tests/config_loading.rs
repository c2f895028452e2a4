// tests/config_loading.rs
use artfight_monitor::config::{
    load_config_default, load_config_from, ENV_BATTLE_OVER, ENV_CONFIG_PATH, ENV_NEWS, ENV_USERS,
};
use std::{env, fs};

fn clear_env() {
    for var in [ENV_CONFIG_PATH, ENV_USERS, ENV_NEWS, ENV_BATTLE_OVER] {
        env::remove_var(var);
    }
}

#[test]
fn parse_toml_and_json_paths() {
    let dir = tempfile::tempdir().unwrap();

    let p_toml = dir.path().join("monitor.toml");
    fs::write(
        &p_toml,
        r#"
news_check_interval_secs = 900
store_path = "data/state.json"

[teams]
team1 = "Fossils"
team2 = "Fairies"

[[users]]
username = "alice"
"#,
    )
    .unwrap();
    let cfg = load_config_from(&p_toml).unwrap();
    assert_eq!(cfg.news_check_interval_secs, 900);
    assert_eq!(cfg.team_check_interval_secs, 3600);
    assert_eq!(cfg.store_path, std::path::PathBuf::from("data/state.json"));
    assert_eq!(cfg.teams.as_ref().map(|t| t.team2.as_str()), Some("Fairies"));
    assert_eq!(cfg.monitored_users(), vec!["alice".to_string()]);

    let p_json = dir.path().join("monitor.json");
    fs::write(&p_json, r#"{"battle_over_detection": true, "cache_ttl_secs": 60}"#).unwrap();
    let cj = load_config_from(&p_json).unwrap();
    assert!(cj.battle_over_detection);
    assert_eq!(cj.cache_ttl_secs, 60);

    let p_bad = dir.path().join("broken.toml");
    fs::write(&p_bad, "users = 5").unwrap();
    assert!(load_config_from(&p_bad).is_err());
}

#[serial_test::serial]
#[test]
fn default_uses_env_then_fallbacks() {
    // isolate CWD so the repo's own config/ is not picked up
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    clear_env();

    // 1) nothing on disk → defaults
    let cfg = load_config_default().unwrap();
    assert!(cfg.users.is_empty());
    assert!(cfg.monitor_news);
    assert!(!cfg.battle_over_detection);

    // 2) ./config/monitor.toml
    let cfg_dir = tmp.path().join("config");
    fs::create_dir_all(&cfg_dir).unwrap();
    fs::write(
        cfg_dir.join("monitor.toml"),
        "request_interval_secs = 120\n[[users]]\nusername = \"bob\"\n",
    )
    .unwrap();
    let cfg = load_config_default().unwrap();
    assert_eq!(cfg.request_interval_secs, 120);
    assert_eq!(cfg.monitored_users(), vec!["bob".to_string()]);

    // 3) env path wins over the fallback
    let p_env = tmp.path().join("elsewhere.json");
    fs::write(&p_env, r#"{"request_interval_secs": 30}"#).unwrap();
    env::set_var(ENV_CONFIG_PATH, p_env.display().to_string());
    let cfg = load_config_default().unwrap();
    assert_eq!(cfg.request_interval_secs, 30);
    assert!(cfg.users.is_empty());

    // 4) a dangling env path is an error
    env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
    assert!(load_config_default().is_err());

    clear_env();
    env::set_current_dir(&old).unwrap();
}

#[serial_test::serial]
#[test]
fn env_overrides_apply_on_top_of_file() {
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    clear_env();

    env::set_var(ENV_USERS, "alice, bob ,alice");
    env::set_var(ENV_NEWS, "false");
    env::set_var(ENV_BATTLE_OVER, "1");
    let cfg = load_config_default().unwrap();
    assert_eq!(cfg.monitored_users(), vec!["alice".to_string(), "bob".to_string()]);
    assert!(!cfg.monitor_news);
    assert!(cfg.battle_over_detection);

    env::set_var(ENV_NEWS, "sometimes");
    assert!(load_config_default().is_err());

    clear_env();
    env::set_current_dir(&old).unwrap();
}
