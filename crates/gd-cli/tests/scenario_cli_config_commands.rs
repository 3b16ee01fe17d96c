//! Config and argument handling of the `gd` binary. None of these touch the
//! database.

use std::path::PathBuf;

use assert_cmd::prelude::*;
use predicates::prelude::*;

fn repo_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

fn config_path(rel: &str) -> String {
    repo_root().join(rel).to_string_lossy().to_string()
}

fn hash_line(stdout: &[u8]) -> String {
    String::from_utf8_lossy(stdout)
        .lines()
        .find(|l| l.starts_with("config_hash="))
        .expect("config_hash line")
        .to_string()
}

#[test]
fn config_hash_is_stable_and_layer_sensitive() -> anyhow::Result<()> {
    let base = config_path("config/defaults/base.yaml");
    let prod = config_path("config/environments/production.yaml");

    let a = std::process::Command::cargo_bin("gd")?
        .args(["config-hash", &base])
        .output()?;
    let b = std::process::Command::cargo_bin("gd")?
        .args(["config-hash", &base])
        .output()?;
    let c = std::process::Command::cargo_bin("gd")?
        .args(["config-hash", &base, &prod])
        .output()?;
    assert!(a.status.success());
    assert!(c.status.success());
    assert_eq!(hash_line(&a.stdout), hash_line(&b.stdout));
    assert_ne!(hash_line(&a.stdout), hash_line(&c.stdout));
    Ok(())
}

#[test]
fn literal_secret_in_yaml_is_refused() -> anyhow::Result<()> {
    let path = std::env::temp_dir().join(format!("gd-secret-{}.yaml", uuid::Uuid::new_v4()));
    std::fs::write(&path, "rye:\n  api_key: \"sk_live_abcdef123456\"\n")?;

    let mut cmd = assert_cmd::Command::cargo_bin("gd")?;
    cmd.args(["config-hash", &path.to_string_lossy()]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_SECRET_DETECTED"))
        .stderr(predicate::str::contains("sk_live_abcdef123456").not());

    let _ = std::fs::remove_file(&path);
    Ok(())
}

#[test]
fn config_check_in_production_requires_the_api_key() -> anyhow::Result<()> {
    let mut cmd = assert_cmd::Command::cargo_bin("gd")?;
    cmd.env_remove("RYE_API_KEY").args([
        "config-check",
        &config_path("config/defaults/base.yaml"),
        &config_path("config/environments/production.yaml"),
    ]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("SECRETS_MISSING"));
    Ok(())
}

#[test]
fn config_check_in_sandbox_reports_clean_config() -> anyhow::Result<()> {
    let mut cmd = assert_cmd::Command::cargo_bin("gd")?;
    cmd.env_remove("RYE_API_KEY")
        .args(["config-check", "--strict", &config_path("config/defaults/base.yaml")]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("mode=SANDBOX"))
        .stdout(predicate::str::contains("unused_keys=0"))
        .stdout(predicate::str::contains("secret RYE_API_KEY=missing"));
    Ok(())
}

#[test]
fn need_with_unknown_kind_fails_before_connecting() -> anyhow::Result<()> {
    let mut cmd = assert_cmd::Command::cargo_bin("gd")?;
    cmd.env_remove(gd_db::ENV_DB_URL).args([
        "need",
        "--kind",
        "sibling",
        "--id",
        &uuid::Uuid::new_v4().to_string(),
    ]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("unknown need kind: sibling"));
    Ok(())
}
