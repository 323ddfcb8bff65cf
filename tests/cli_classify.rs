use assert_cmd::Command;
use predicates::str::contains;
use std::io::Write;
use tempfile::Builder;

fn classify() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("offline-cache"));
    cmd.env_remove("OFFLINE_CACHE_CONFIG_FILE")
        .env_remove("OFFLINE_CACHE__ORIGIN__BASE_URL")
        .arg("classify");
    cmd
}

#[test]
fn classify_prints_strategy_partition_and_protection() {
    let assert = classify()
        .arg("/src/main.js")
        .arg("/src/core/GameEngine.js")
        .arg("/api/scores")
        .assert()
        .success();

    let output = String::from_utf8_lossy(&assert.get_output().stdout);
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(
        lines[0],
        "/src/main.js\tcache-first\thigh\tstatic\tprotected"
    );
    assert_eq!(
        lines[1],
        "/src/core/GameEngine.js\tstale-while-revalidate\tmedium\tdynamic\t-"
    );
    assert_eq!(lines[2], "/api/scores\tnetwork-only\t-\tapi\t-");
}

#[test]
fn classify_honours_rules_from_config_file() {
    let mut file = Builder::new().suffix(".toml").tempfile().expect("tmp file");
    writeln!(
        file,
        "[[rules.explicit]]\npattern = \"^/offline/\"\nstrategy = \"cache-only\""
    )
    .expect("write config");

    classify()
        .arg("--config-file")
        .arg(file.path())
        .arg("/offline/help.html")
        .assert()
        .success()
        .stdout(contains("/offline/help.html\tcache-only"));
}

#[test]
fn classify_requires_a_path() {
    classify().assert().failure();
}

#[test]
fn invalid_rules_fail_fast() {
    let mut file = Builder::new().suffix(".toml").tempfile().expect("tmp file");
    writeln!(file, "[rules]\nprotected = [\"^/not-high$\"]").expect("write config");

    classify()
        .arg("--config-file")
        .arg(file.path())
        .arg("/")
        .assert()
        .failure()
        .stdout(contains("not-high"));
}
