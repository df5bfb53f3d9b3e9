use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use permit_recon::application::signature::WebhookVerifier;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;
use std::time::Duration;

const SECRET: &str = "whsec_cli_secret";

fn payload_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"id":"evt_1","type":"payment_intent.succeeded","data":{{"object":{{"id":"pi_1"}}}}}}"#
    )
    .unwrap();
    file
}

#[test]
fn test_verify_webhook() -> Result<(), Box<dyn std::error::Error>> {
    let payload = payload_file();
    let body = std::fs::read(payload.path())?;
    let signature = WebhookVerifier::new(SECRET, Duration::from_secs(300)).sign(&body, 1_700_000_000)?;

    let mut cmd = Command::new(cargo_bin!("permit-recon"));
    cmd.arg("verify-webhook")
        .arg("--payload")
        .arg(payload.path())
        .arg("--signature")
        .arg(&signature)
        .arg("--webhook-secret")
        .arg(SECRET)
        .arg("--at")
        .arg("1700000010");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("signature valid"));

    // Same signature, wrong secret.
    let mut cmd = Command::new(cargo_bin!("permit-recon"));
    cmd.arg("verify-webhook")
        .arg("--payload")
        .arg(payload.path())
        .arg("--signature")
        .arg(&signature)
        .arg("--webhook-secret")
        .arg("whsec_other")
        .arg("--at")
        .arg("1700000010");
    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("signature valid").not());

    Ok(())
}

#[test]
fn test_export_events_empty_log() {
    let mut cmd = Command::new(cargo_bin!("permit-recon"));
    cmd.arg("export-events");
    cmd.assert().success().stdout(predicate::str::contains(
        "event_id,source,application_id,event_type,result,from_status,to_status,reason,processed_at",
    ));
}

#[test]
fn test_seeded_sweep_reports() {
    let mut seed = tempfile::NamedTempFile::new().unwrap();
    writeln!(seed, "application_id,user_id").unwrap();
    writeln!(seed, "1,user-1").unwrap();
    writeln!(seed, "2,user-2").unwrap();

    let mut cmd = Command::new(cargo_bin!("permit-recon"));
    cmd.arg("--seed")
        .arg(seed.path())
        .arg("sweep")
        .arg("--webhook-secret")
        .arg(SECRET);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(r#""scanned":0"#))
        .stdout(predicate::str::contains(r#""expired":0"#));
}

#[test]
fn test_sweep_requires_webhook_secret() {
    let mut cmd = Command::new(cargo_bin!("permit-recon"));
    cmd.arg("sweep").env_remove("PERMIT_WEBHOOK_SECRET");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--webhook-secret"));
}
