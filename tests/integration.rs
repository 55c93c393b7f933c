#![cfg(unix)]

use anyhow::Result;
use assert_cmd::Command;
use gamrelay::cli::{OpKind, RunArgs, ScanArgs, TargetArgs};
use gamrelay::config::Settings;
use gamrelay::events::{Status, Terminal};
use gamrelay::journal::read_journal;
use predicates::prelude::*;
use serde_json::json;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const FILELIST: &str = r#"Owner,id,name,permissions
a@school.edu,f1,Budget,"{""type"":""anyone"",""role"":""reader""}"
a@school.edu,f2,Notes,"[{""type"":""user"",""emailAddress"":""b@school.edu"",""role"":""writer""}]""#;

/// Write a shell script that behaves like GAM for the calls these tests make
/// and records every invocation in `calls.log`.
fn fake_gam(dir: &Path) -> Result<PathBuf> {
    let log = dir.join("calls.log");
    let listing = dir.join("filelist.csv");
    let flaky = dir.join("flaky.state");
    fs::write(&listing, format!("{}\n", FILELIST))?;

    let script = format!(
        r#"#!/bin/sh
echo "$*" >> "{log}"
case "$*" in
  version)
    echo "GAM 7.05.01 - https://github.com/GAM-team/GAM"
    echo "Python 3.12.1" ;;
  *bad@school.edu*)
    echo "ERROR: User bad@school.edu does not exist" >&2
    exit 1 ;;
  *slow@school.edu*)
    if [ ! -f "{flaky}" ]; then
      touch "{flaky}"
      echo "ERROR: Rate limit exceeded" >&2
      exit 1
    fi ;;
  "print users")
    printf 'primaryEmail,name.fullName\na@school.edu,A\nc@school.edu,C\n' ;;
  "print orgs")
    printf 'orgUnitPath,name\n/Staff,Staff\n' ;;
  *"print filelist"*)
    cat "{listing}" ;;
esac
exit 0
"#,
        log = log.display(),
        listing = listing.display(),
        flaky = flaky.display(),
    );

    let path = dir.join("gam");
    fs::write(&path, script)?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

fn calls(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("calls.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

fn settings_for(gam: &Path) -> Settings {
    Settings {
        gam_path: Some(gam.to_path_buf()),
        poll_interval_ms: 5,
        ..Settings::default()
    }
}

fn email_targets(list: &[&str]) -> TargetArgs {
    TargetArgs {
        targets: list.iter().map(|s| s.to_string()).collect(),
        csv: None,
    }
}

#[test]
fn test_partial_failure_is_journaled() -> Result<()> {
    let dir = tempdir()?;
    let gam = fake_gam(dir.path())?;
    let journal_path = dir.path().join("run.jsonl");

    let args = RunArgs {
        op: Some(OpKind::SuspendUser),
        targets: email_targets(&["a@school.edu", "bad@school.edu"]),
        journal: Some(journal_path.clone()),
        ..Default::default()
    };
    let exit_code = gamrelay::engine::run(&settings_for(&gam), args)?;
    assert_eq!(exit_code, 2);

    assert_eq!(
        calls(dir.path()),
        vec![
            "update user a@school.edu suspended on",
            "update user bad@school.edu suspended on",
        ]
    );

    let entries = read_journal(journal_path)?;
    assert_eq!(entries.len(), 5);
    let statuses: Vec<Status> = entries.iter().filter_map(|e| e.event.as_ref()).map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![Status::Processing, Status::Success, Status::Processing, Status::Error]
    );
    let Some(Terminal::Done { summary }) = &entries[4].terminal else {
        panic!("last journal line should be the terminal record");
    };
    assert_eq!(summary.success_count, 1);
    assert_eq!(summary.failure_count, 1);
    assert_eq!(summary.errors[0].0, "bad@school.edu");
    assert!(summary.errors[0].1.contains("does not exist"));
    Ok(())
}

#[test]
fn test_rate_limit_is_retried() -> Result<()> {
    let dir = tempdir()?;
    let gam = fake_gam(dir.path())?;

    let args = RunArgs {
        op: Some(OpKind::DisableForwarding),
        targets: email_targets(&["slow@school.edu"]),
        backoff_factor: Some(1),
        ..Default::default()
    };
    let exit_code = gamrelay::engine::run(&settings_for(&gam), args)?;
    assert_eq!(exit_code, 0);
    assert_eq!(calls(dir.path()).len(), 2);
    Ok(())
}

#[test]
fn test_transfer_manifest() -> Result<()> {
    let dir = tempdir()?;
    let gam = fake_gam(dir.path())?;
    let job_path = dir.path().join("job.json");
    let job = json!({
        "operation": { "op": "transfer_ownership" },
        "targets": [
            { "file_id": "f1", "current_owner": "a@school.edu", "new_owner": "c@school.edu" }
        ]
    });
    fs::write(&job_path, job.to_string())?;

    let args = RunArgs {
        job: Some(job_path),
        ..Default::default()
    };
    assert_eq!(gamrelay::engine::run(&settings_for(&gam), args)?, 0);
    assert_eq!(
        calls(dir.path()),
        vec!["user a@school.edu transfer ownership f1 c@school.edu sendemailemail false"]
    );
    Ok(())
}

#[test]
fn test_csv_targets() -> Result<()> {
    let dir = tempdir()?;
    let gam = fake_gam(dir.path())?;
    let csv = dir.path().join("users.csv");
    fs::write(&csv, "email,name\na@school.edu,A\n,blank\nc@school.edu,C\na@school.edu,dup\n")?;

    let args = RunArgs {
        op: Some(OpKind::AddGroupMember),
        group: Some("staff@school.edu".into()),
        targets: TargetArgs {
            targets: Vec::new(),
            csv: Some(csv),
        },
        ..Default::default()
    };
    assert_eq!(gamrelay::engine::run(&settings_for(&gam), args)?, 0);
    assert_eq!(
        calls(dir.path()),
        vec![
            "update group staff@school.edu add member user a@school.edu",
            "update group staff@school.edu add member user c@school.edu",
        ]
    );
    Ok(())
}

#[test]
fn test_scan_all_users() -> Result<()> {
    let dir = tempdir()?;
    let gam = fake_gam(dir.path())?;

    let args = ScanArgs {
        domain: Some("school.edu".into()),
        ..Default::default()
    };
    assert_eq!(gamrelay::engine::scan(&settings_for(&gam), args)?, 0);

    let calls = calls(dir.path());
    assert_eq!(calls[0], "print users");
    assert_eq!(
        calls[1..],
        [
            "user a@school.edu print filelist fields id,name,permissions,owners",
            "user c@school.edu print filelist fields id,name,permissions,owners",
        ]
    );
    Ok(())
}

#[test]
fn test_dry_run_json_output() -> Result<()> {
    let dir = tempdir()?;
    let gam = fake_gam(dir.path())?;

    let output = Command::new(env!("CARGO_BIN_EXE_gamrelay"))
        .arg("--gam-path")
        .arg(&gam)
        .args(["run", "--op", "delete-user", "--target", "a@school.edu", "--dry-run", "--json"])
        .output()?;
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout)?;
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .filter(|l| !l.is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["status"], "processing");
    assert_eq!(lines[1]["status"], "dry_run");
    assert_eq!(lines[1]["message"], "[DRY RUN] Would delete user: a@school.edu");
    assert_eq!(lines[2]["type"], "done");
    assert_eq!(lines[2]["summary"]["success_count"], 1);
    assert!(calls(dir.path()).is_empty());
    Ok(())
}

#[test]
fn test_human_output_and_exit_code() -> Result<()> {
    let dir = tempdir()?;
    let gam = fake_gam(dir.path())?;

    Command::new(env!("CARGO_BIN_EXE_gamrelay"))
        .arg("--gam-path")
        .arg(&gam)
        .args(["run", "--op", "delete-group", "--target", "bad@school.edu"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("Processing bad@school.edu... (1/1)"))
        .stdout(predicate::str::contains("✗ ERROR: User bad@school.edu does not exist"))
        .stdout(predicate::str::contains("Delete Group finished with errors: 0 succeeded, 1 failed"))
        .stdout(predicate::str::contains("Resource not found"));
    Ok(())
}

#[test]
fn test_check_command() -> Result<()> {
    let dir = tempdir()?;
    let gam = fake_gam(dir.path())?;

    Command::new(env!("CARGO_BIN_EXE_gamrelay"))
        .arg("--gam-path")
        .arg(&gam)
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("GAM 7.05.01"))
        .stdout(predicate::str::contains("GAM is authenticated"));

    Command::new(env!("CARGO_BIN_EXE_gamrelay"))
        .args(["--gam-path", "/nonexistent/gam", "check"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("GAM is not installed"));
    Ok(())
}

#[test]
fn test_check_reports_missing_credentials() -> Result<()> {
    let dir = tempdir()?;
    let gam = dir.path().join("gam");
    fs::write(
        &gam,
        r#"#!/bin/sh
case "$*" in
  version) echo "GAM 7.05.01" ;;
  "info domain")
    echo "ERROR: Missing OAuth credentials, run gam oauth create" >&2
    exit 1 ;;
esac
"#,
    )?;
    fs::set_permissions(&gam, fs::Permissions::from_mode(0o755))?;

    Command::new(env!("CARGO_BIN_EXE_gamrelay"))
        .arg("--gam-path")
        .arg(&gam)
        .arg("check")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("GAM 7.05.01"))
        .stderr(predicate::str::contains("GAM is not authenticated"));
    Ok(())
}

#[test]
fn test_remove_external_permissions_from_csv() -> Result<()> {
    let dir = tempdir()?;
    let gam = fake_gam(dir.path())?;
    let csv = dir.path().join("findings.csv");
    fs::write(
        &csv,
        "file_id,owner,permission_email\nf2,a@school.edu,b@other.org\nf3,a@school.edu,not an address\n",
    )?;

    let args = RunArgs {
        op: Some(OpKind::RemoveExternalPermission),
        targets: TargetArgs {
            targets: Vec::new(),
            csv: Some(csv),
        },
        ..Default::default()
    };
    assert_eq!(gamrelay::engine::run(&settings_for(&gam), args)?, 0);
    assert_eq!(
        calls(dir.path()),
        vec!["user a@school.edu delete drivefileacl f2 b@other.org"]
    );
    Ok(())
}

#[test]
fn test_list_org_units_includes_root() -> Result<()> {
    let dir = tempdir()?;
    let gam = fake_gam(dir.path())?;

    Command::new(env!("CARGO_BIN_EXE_gamrelay"))
        .arg("--gam-path")
        .arg(&gam)
        .args(["list", "org-units"])
        .assert()
        .success()
        .stdout("/\n/Staff\n");
    Ok(())
}

#[test]
fn test_scan_report_json() -> Result<()> {
    let dir = tempdir()?;
    let gam = fake_gam(dir.path())?;

    let output = Command::new(env!("CARGO_BIN_EXE_gamrelay"))
        .arg("--gam-path")
        .arg(&gam)
        .args(["scan-acls", "--domain", "school.edu", "--target", "a@school.edu", "--json"])
        .output()?;
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout)?;
    let last = stdout.lines().filter(|l| !l.is_empty()).last().unwrap();
    let report: serde_json::Value = serde_json::from_str(last)?;
    assert_eq!(report["users_scanned"], 1);
    assert_eq!(report["files_scanned"], 2);
    assert_eq!(report["files_with_external_acls"], 1);
    assert_eq!(report["findings"][0]["file_id"], "f1");
    assert_eq!(report["findings"][0]["external_permissions"][0]["grantee"], "Anyone with the link");
    Ok(())
}

#[test]
fn test_missing_targets_is_operational_failure() {
    Command::new(env!("CARGO_BIN_EXE_gamrelay"))
        .args(["run", "--op", "suspend-user", "--dry-run"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("job has no targets"));
}
