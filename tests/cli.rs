use assert_cmd::prelude::*;
use color_eyre::Result;
use std::fs;
use std::process::Command;

const RECORD: &str = r#"id: node-1
ipv4: 10.0.0.20/24
hostname: node-1
mac:
  - 52:54:00:00:00:01
"#;

#[test]
fn test_help_lists_commands() -> Result<()> {
    let output = Command::cargo_bin("bootherd")?.arg("--help").output()?;
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage: bootherd"), "Missing usage text");
    assert!(stdout.contains("serve"), "Missing serve command");
    assert!(stdout.contains("arp-inject"), "Missing arp-inject command");
    assert!(stdout.contains("check"), "Missing check command");
    Ok(())
}

#[test]
fn test_check_reports_loaded_and_skipped() -> Result<()> {
    let dir = tempfile::tempdir()?;
    fs::write(dir.path().join("node-1.yaml"), RECORD)?;

    let output = Command::cargo_bin("bootherd")?
        .arg("check")
        .arg(dir.path())
        .output()?;
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ok    node-1 10.0.0.20/24 [52:54:00:00:00:01]"));
    assert!(stdout.contains("1 loaded, 0 skipped"));

    fs::write(dir.path().join("no-address.yaml"), "id: no-address\n")?;
    let output = Command::cargo_bin("bootherd")?
        .arg("check")
        .arg(dir.path())
        .output()?;
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("skip"));
    assert!(stdout.contains("1 loaded, 1 skipped"));
    Ok(())
}

#[test]
fn test_check_missing_directory_fails() -> Result<()> {
    let dir = tempfile::tempdir()?;
    Command::cargo_bin("bootherd")?
        .arg("check")
        .arg(dir.path().join("absent"))
        .assert()
        .failure();
    Ok(())
}

#[test]
fn test_arp_inject_rejects_bad_mac() -> Result<()> {
    Command::cargo_bin("bootherd")?
        .args(["arp-inject", "--ip", "10.0.0.20", "--mac", "not-a-mac", "--device", "eth0"])
        .assert()
        .failure();
    Ok(())
}
