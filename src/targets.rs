//! Loading and checking bulk targets.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::{AliasAssignment, OwnershipTransfer, PasswordReset, PermissionRemoval};

#[derive(Debug, Error)]
pub enum TargetError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("File is empty")]
    Empty,
    #[error("CSV file must have '{column}' column in header. Found: {found}")]
    MissingColumn { column: String, found: String },
    #[error("No valid {0} found in CSV file")]
    NoRows(&'static str),
    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Error reading file: {0}")]
    Io(#[from] std::io::Error),
}

/// Loose `local@domain.tld` check, same character classes GAM accepts.
pub fn validate_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    let local_ok = !local.is_empty()
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._%+-".contains(c));
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    let host_ok = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    let tld_ok = tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic());
    local_ok && host_ok && tld_ok
}

fn open_with_headers(path: &Path, required: &[&str]) -> Result<csv::Reader<std::fs::File>, TargetError> {
    if !path.exists() {
        return Err(TargetError::NotFound(path.to_path_buf()));
    }
    if std::fs::metadata(path)?.len() == 0 {
        return Err(TargetError::Empty);
    }
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    for column in required {
        if !headers.iter().any(|h| h == *column) {
            return Err(TargetError::MissingColumn {
                column: column.to_string(),
                found: headers.iter().collect::<Vec<_>>().join(", "),
            });
        }
    }
    Ok(reader)
}

/// Rows of `columns`, numbered as in the file (the header is row 1).
/// Rows where any of the columns is blank are skipped.
fn read_rows(path: &Path, columns: &[&str]) -> Result<Vec<(usize, Vec<String>)>, TargetError> {
    let mut reader = open_with_headers(path, columns)?;
    let headers = reader.headers()?.clone();
    let indices: Vec<usize> = columns
        .iter()
        .filter_map(|name| headers.iter().position(|h| h == *name))
        .collect();

    let mut rows = Vec::new();
    for (row_num, record) in reader.records().enumerate().map(|(i, r)| (i + 2, r)) {
        let record = record?;
        let values: Vec<String> = indices
            .iter()
            .map(|&col| record.get(col).unwrap_or("").trim().to_string())
            .collect();
        if values.iter().any(String::is_empty) {
            continue;
        }
        rows.push((row_num, values));
    }
    Ok(rows)
}

fn skip_invalid(row_num: usize, email: &str) -> bool {
    if validate_email(email) {
        return false;
    }
    tracing::error!(operation = "Read CSV", "Invalid email format in row {}: {}", row_num, email);
    true
}

/// Read the `email` column of a CSV file.
///
/// Blank rows are skipped; malformed addresses are logged and skipped.
pub fn read_csv_emails(path: &Path) -> Result<Vec<String>, TargetError> {
    let emails: Vec<String> = read_rows(path, &["email"])?
        .into_iter()
        .filter_map(|(row_num, mut values)| {
            let email = values.remove(0);
            (!skip_invalid(row_num, &email)).then_some(email)
        })
        .collect();
    if emails.is_empty() {
        return Err(TargetError::NoRows("email addresses"));
    }
    Ok(emails)
}

/// Read a column of opaque identifiers, such as calendar IDs.
pub fn read_csv_ids(path: &Path, column: &str) -> Result<Vec<String>, TargetError> {
    let ids: Vec<String> = read_rows(path, &[column])?
        .into_iter()
        .map(|(_, mut values)| values.remove(0))
        .collect();
    if ids.is_empty() {
        return Err(TargetError::NoRows("identifiers"));
    }
    Ok(ids)
}

/// Read `file_id,current_owner,new_owner` records.
pub fn read_csv_transfers(path: &Path) -> Result<Vec<OwnershipTransfer>, TargetError> {
    let transfers: Vec<OwnershipTransfer> = read_rows(path, &["file_id", "current_owner", "new_owner"])?
        .into_iter()
        .filter(|(row_num, v)| !skip_invalid(*row_num, &v[1]) && !skip_invalid(*row_num, &v[2]))
        .map(|(_, v)| {
            let [file_id, current_owner, new_owner] = fields(v);
            OwnershipTransfer {
                file_id,
                current_owner,
                new_owner,
            }
        })
        .collect();
    if transfers.is_empty() {
        return Err(TargetError::NoRows("transfer records"));
    }
    Ok(transfers)
}

/// Read `email,alias` records.
pub fn read_csv_aliases(path: &Path) -> Result<Vec<AliasAssignment>, TargetError> {
    let aliases: Vec<AliasAssignment> = read_rows(path, &["email", "alias"])?
        .into_iter()
        .filter(|(row_num, v)| !skip_invalid(*row_num, &v[0]) && !skip_invalid(*row_num, &v[1]))
        .map(|(_, v)| {
            let [email, alias] = fields(v);
            AliasAssignment { email, alias }
        })
        .collect();
    if aliases.is_empty() {
        return Err(TargetError::NoRows("alias records"));
    }
    Ok(aliases)
}

/// Read `email,password` records. Rows without a password are skipped.
pub fn read_csv_passwords(path: &Path) -> Result<Vec<PasswordReset>, TargetError> {
    let resets: Vec<PasswordReset> = read_rows(path, &["email", "password"])?
        .into_iter()
        .filter(|(row_num, v)| !skip_invalid(*row_num, &v[0]))
        .map(|(_, v)| {
            let [email, password] = fields(v);
            PasswordReset { email, password }
        })
        .collect();
    if resets.is_empty() {
        return Err(TargetError::NoRows("password records"));
    }
    Ok(resets)
}

/// Read `file_id,owner,permission_email` records.
pub fn read_csv_acl_removals(path: &Path) -> Result<Vec<PermissionRemoval>, TargetError> {
    let removals: Vec<PermissionRemoval> = read_rows(path, &["file_id", "owner", "permission_email"])?
        .into_iter()
        .filter(|(row_num, v)| !skip_invalid(*row_num, &v[1]) && !skip_invalid(*row_num, &v[2]))
        .map(|(_, v)| {
            let [file_id, owner, permission_email] = fields(v);
            PermissionRemoval {
                file_id,
                owner,
                permission_email,
            }
        })
        .collect();
    if removals.is_empty() {
        return Err(TargetError::NoRows("permission records"));
    }
    Ok(removals)
}

/// `read_rows` yields exactly one value per requested column.
fn fields<const N: usize>(values: Vec<String>) -> [String; N] {
    let mut values = values.into_iter();
    std::array::from_fn(|_| values.next().unwrap_or_default())
}

/// Drop repeated targets, keeping first occurrences in order.
pub fn dedup(targets: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    targets
        .into_iter()
        .filter(|t| seen.insert(t.to_lowercase()))
        .collect()
}
