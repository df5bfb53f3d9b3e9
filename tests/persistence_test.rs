#![cfg(feature = "storage-rocksdb")]

use assert_cmd::cargo_bin;
use std::io::Write;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    // 1. First run: register an application.
    let mut seed = tempfile::NamedTempFile::new().unwrap();
    writeln!(seed, "application_id,user_id").unwrap();
    writeln!(seed, "1,user-1").unwrap();

    let mut cmd1 = Command::new(cargo_bin!("permit-recon"));
    cmd1.arg("--db-path")
        .arg(&db_path)
        .arg("--seed")
        .arg(seed.path())
        .arg("export-events");
    let output1 = cmd1.output().expect("Failed to execute command");
    assert!(output1.status.success());

    // 2. Second run: the stored application is expired by the sweep.
    let mut cmd2 = Command::new(cargo_bin!("permit-recon"));
    cmd2.arg("--db-path")
        .arg(&db_path)
        .arg("sweep")
        .arg("--webhook-secret")
        .arg("whsec_x")
        .arg("--expire-unpaid-after-secs")
        .arg("0");
    let output2 = cmd2.output().expect("Failed to execute command");
    assert!(output2.status.success());
    let stdout2 = String::from_utf8_lossy(&output2.stdout);
    assert!(stdout2.contains(r#""expired":1"#));

    // 3. Third run: the transition survived in the event log.
    let mut cmd3 = Command::new(cargo_bin!("permit-recon"));
    cmd3.arg("--db-path").arg(&db_path).arg("export-events");
    let output3 = cmd3.output().expect("Failed to execute command");
    assert!(output3.status.success());
    let stdout3 = String::from_utf8_lossy(&output3.stdout);
    assert!(stdout3.contains("applied,AWAITING_PAYMENT,EXPIRED"));
}
