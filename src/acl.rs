//! Drive sharing scan: finds files shared outside the organization's domain.

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::command::CommandError;
use crate::executor::{Action, Outcome};
use crate::gam::Gam;
use crate::logging::ErrorLog;

pub const OPERATION: &str = "Drive ACL Scan";

const ERROR_TEXT_LIMIT: usize = 500;

/// One Drive permission as GAM prints it inside the `permissions` column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Permission {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "emailAddress")]
    pub email_address: String,
    pub role: String,
    pub domain: String,
}

/// GAM prints a single permission as an object and several as an array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Permissions {
    Many(Vec<Permission>),
    One(Permission),
}

impl Permissions {
    fn into_vec(self) -> Vec<Permission> {
        match self {
            Permissions::Many(v) => v,
            Permissions::One(p) => vec![p],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalShare {
    #[serde(rename = "type")]
    pub kind: String,
    /// Who has access: an address, a domain, or "Anyone with the link".
    pub grantee: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub user: String,
    pub file_id: String,
    pub file_name: String,
    pub external_permissions: Vec<ExternalShare>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub users_scanned: usize,
    pub files_scanned: usize,
    pub files_with_external_acls: usize,
    pub external_shares_found: usize,
    pub findings: Vec<Finding>,
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub domain: String,
    pub include_anyone_links: bool,
}

/// Decide whether `perm` reaches outside `options.domain`.
pub fn classify_permission(perm: &Permission, options: &ScanOptions) -> Option<ExternalShare> {
    let share = |grantee: String| ExternalShare {
        kind: perm.kind.clone(),
        grantee,
        role: perm.role.clone(),
    };
    match perm.kind.as_str() {
        "anyone" if options.include_anyone_links => Some(share("Anyone with the link".to_string())),
        "user" | "group" => {
            let internal_suffix = format!("@{}", options.domain);
            (!perm.email_address.is_empty() && !perm.email_address.ends_with(&internal_suffix))
                .then(|| share(perm.email_address.clone()))
        }
        "domain" => (!perm.domain.is_empty() && perm.domain != options.domain)
            .then(|| share(format!("{} (entire domain)", perm.domain))),
        _ => None,
    }
}

/// Per-user totals from one `print filelist` listing.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct UserScan {
    pub files: usize,
    pub findings: Vec<Finding>,
}

/// Parse GAM's file list CSV for `user`. Rows without permission data, or with
/// permission data that is not JSON, count as scanned but clean.
pub fn scan_filelist(csv_text: &str, user: &str, options: &ScanOptions) -> Result<UserScan> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(csv_text.as_bytes());
    let headers = reader.headers()?.clone();
    let col = |name: &str| headers.iter().position(|h| h == name);
    let (id_col, name_col, perm_col) = (col("id"), col("name"), col("permissions"));

    let mut scan = UserScan::default();
    for record in reader.records() {
        let record = record?;
        scan.files += 1;
        let field = |c: Option<usize>| c.and_then(|c| record.get(c)).unwrap_or("").to_string();

        let raw = field(perm_col);
        if raw.is_empty() {
            continue;
        }
        let Ok(permissions) = serde_json::from_str::<Permissions>(&raw) else {
            continue;
        };
        let external: Vec<ExternalShare> = permissions
            .into_vec()
            .iter()
            .filter_map(|p| classify_permission(p, options))
            .collect();
        if !external.is_empty() {
            scan.findings.push(Finding {
                user: user.to_string(),
                file_id: field(id_col),
                file_name: field(name_col),
                external_permissions: external,
            });
        }
    }
    Ok(scan)
}

/// Executor action scanning one user's Drive per target.
pub struct AclScanner {
    gam: Gam,
    options: ScanOptions,
    timeout: Duration,
    error_log: Arc<dyn ErrorLog>,
    report: Arc<Mutex<ScanReport>>,
}

impl AclScanner {
    pub fn new(gam: Gam, options: ScanOptions, timeout: Duration, error_log: Arc<dyn ErrorLog>) -> Self {
        Self {
            gam,
            options,
            timeout,
            error_log,
            report: Arc::new(Mutex::new(ScanReport::default())),
        }
    }

    /// Shared view of the running totals; stays valid after the scanner moves
    /// onto a worker thread.
    pub fn report(&self) -> Arc<Mutex<ScanReport>> {
        Arc::clone(&self.report)
    }

    fn fail(&self, log: String, message: String) -> Outcome {
        self.error_log.log_error(OPERATION, &log);
        Outcome::failure(message)
    }
}

impl Action<String> for AclScanner {
    fn invoke(&mut self, user: &String) -> Result<Outcome> {
        let args: Vec<String> = ["user", user.as_str(), "print", "filelist", "fields", "id,name,permissions,owners"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        tracing::info!(operation = OPERATION, "Scanning files for {}", user);

        let output = match self.gam.run_with_retry(&args, self.timeout) {
            Ok(output) => output,
            Err(CommandError::Timeout(_)) => {
                return Ok(self.fail(
                    format!("Timeout for {}", user),
                    format!("Timeout scanning {} (drive too large or slow network)", user),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        if !output.success() {
            let error = output.error_text(ERROR_TEXT_LIMIT);
            return Ok(self.fail(
                format!("Failed for {}: {}", user, error),
                format!("Failed to scan {}: {}", user, error),
            ));
        }

        let scan = scan_filelist(&output.stdout, user, &self.options)?;
        for finding in &scan.findings {
            tracing::warn!(
                operation = OPERATION,
                "{}: \"{}\" shared with {} external parties",
                user,
                finding.file_name,
                finding.external_permissions.len()
            );
        }

        let flagged = scan.findings.len();
        let message = if flagged > 0 {
            format!("{}: {} files with external sharing (out of {} files)", user, flagged, scan.files)
        } else {
            format!("{}: No external sharing detected ({} files scanned)", user, scan.files)
        };

        let mut report = self.report.lock();
        report.users_scanned += 1;
        report.files_scanned += scan.files;
        report.files_with_external_acls += flagged;
        report.external_shares_found += scan
            .findings
            .iter()
            .map(|f| f.external_permissions.len())
            .sum::<usize>();
        report.findings.extend(scan.findings);
        Ok(Outcome::success(message))
    }

    fn describe(&self, user: &String) -> String {
        format!("scan Drive sharing for {}", user)
    }
}
