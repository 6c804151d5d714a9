mod support;

use std::fs;

use predicates::str::contains;

use support::TestStore;

#[test]
fn actor_show_uses_env_when_set() {
    let store = TestStore::new();

    store
        .cmd()
        .env("REVKEEP_ACTOR", "env-actor")
        .args(["actor", "show"])
        .assert()
        .success()
        .stdout(contains("env-actor"));
}

#[test]
fn actor_set_persists_and_show_reads() -> Result<(), Box<dyn std::error::Error>> {
    let store = TestStore::new();

    store
        .cmd()
        .env_remove("REVKEEP_ACTOR")
        .args(["actor", "set", "persisted-actor"])
        .assert()
        .success();

    let contents = fs::read_to_string(store.store_dir().join("actor"))?;
    assert!(contents.contains("persisted-actor"));

    store
        .cmd()
        .env_remove("REVKEEP_ACTOR")
        .args(["actor", "show"])
        .assert()
        .success()
        .stdout(contains("persisted-actor"));

    Ok(())
}

#[test]
fn actor_show_falls_back_to_config_default() -> Result<(), Box<dyn std::error::Error>> {
    let store = TestStore::new();
    store.write_config("[actor]\ndefault = \"config-actor\"\n")?;

    store
        .cmd()
        .env_remove("REVKEEP_ACTOR")
        .args(["actor", "show"])
        .assert()
        .success()
        .stdout(contains("config-actor"));

    Ok(())
}

#[test]
fn actor_flag_wins_and_is_recorded_on_versions() {
    let store = TestStore::new();
    store
        .cmd()
        .args(["--actor", "flag-actor", "init", "nb1"])
        .write_stdin(r#"{"cell1": "a"}"#)
        .assert()
        .success();

    let log = store.json(&["log", "nb1"]);
    assert_eq!(log["versions"][0]["author_id"], "flag-actor");
}

#[test]
fn actor_set_rejects_empty_name() {
    let store = TestStore::new();
    store
        .cmd()
        .args(["actor", "set", "  "])
        .assert()
        .code(2)
        .stderr(contains("actor name cannot be empty"));
}
