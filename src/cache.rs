//! Session cache of Workspace users, groups, and organizational units.

use anyhow::{Result, bail};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::gam::Gam;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Users,
    Groups,
    OrgUnits,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [ResourceKind::Users, ResourceKind::Groups, ResourceKind::OrgUnits];

    /// `gam print ...` arguments that list this resource.
    pub fn print_args(self) -> Vec<String> {
        let args: &[&str] = match self {
            ResourceKind::Users => &["print", "users"],
            ResourceKind::Groups => &["print", "groups"],
            ResourceKind::OrgUnits => &["print", "orgs"],
        };
        args.iter().map(|s| s.to_string()).collect()
    }

    /// Header names tried in order when picking the identifying column.
    fn columns(self) -> &'static [&'static str] {
        match self {
            ResourceKind::Users => &["primaryEmail", "email", "Email"],
            ResourceKind::Groups => &["email", "Email", "id"],
            ResourceKind::OrgUnits => &["orgUnitPath", "Path", "path"],
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::Users => "users",
            ResourceKind::Groups => "groups",
            ResourceKind::OrgUnits => "org units",
        })
    }
}

/// Produces the full list for a resource kind.
pub trait ResourceFetcher: Send + Sync {
    fn fetch(&self, kind: ResourceKind) -> Result<Vec<String>>;
}

/// Pull one column out of GAM's CSV output. Rows missing the column, or with
/// an empty value, are skipped.
pub fn extract_column(csv_text: &str, names: &[&str]) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(csv_text.as_bytes());
    let headers = reader.headers()?.clone();
    let Some(col) = names
        .iter()
        .find_map(|name| headers.iter().position(|h| h == *name))
    else {
        return Ok(Vec::new());
    };
    let mut values = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(value) = record.get(col).map(str::trim).filter(|v| !v.is_empty()) {
            values.push(value.to_string());
        }
    }
    Ok(values)
}

/// Fetches resources by running GAM.
pub struct GamFetcher {
    gam: Gam,
    timeout: Duration,
}

impl GamFetcher {
    pub fn new(gam: Gam, timeout: Duration) -> Self {
        Self { gam, timeout }
    }

    fn print(&self, args: &[String]) -> Result<String> {
        let output = self.gam.run_with_retry(args, self.timeout)?;
        if !output.success() {
            bail!("{}", output.error_text(200));
        }
        Ok(output.stdout)
    }

    /// Member addresses of `group`. Not cached: membership changes with the
    /// operations this tool runs.
    pub fn fetch_group_members(&self, group: &str) -> Result<Vec<String>> {
        let args: Vec<String> = ["print", "group-members", "group", group]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let stdout = self.print(&args)?;
        extract_column(&stdout, &["email", "Email"])
    }
}

impl ResourceFetcher for GamFetcher {
    fn fetch(&self, kind: ResourceKind) -> Result<Vec<String>> {
        let stdout = self.print(&kind.print_args())?;
        let mut values = extract_column(&stdout, kind.columns())?;
        if kind == ResourceKind::OrgUnits && !values.iter().any(|v| v == "/") {
            values.insert(0, "/".to_string());
        }
        Ok(values)
    }
}

/// Lazily filled, explicitly invalidated lists. A failed fetch leaves the
/// entry empty so the next lookup tries again.
pub struct WorkspaceCache {
    fetcher: Arc<dyn ResourceFetcher>,
    entries: RwLock<HashMap<ResourceKind, Arc<Vec<String>>>>,
}

impl WorkspaceCache {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>) -> Self {
        Self {
            fetcher,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_or_fetch(&self, kind: ResourceKind) -> Result<Arc<Vec<String>>> {
        if let Some(hit) = self.entries.read().get(&kind) {
            tracing::debug!(%kind, count = hit.len(), "cache hit");
            return Ok(Arc::clone(hit));
        }
        let values = Arc::new(self.fetcher.fetch(kind)?);
        tracing::info!(%kind, count = values.len(), "fetched");
        self.entries.write().insert(kind, Arc::clone(&values));
        Ok(values)
    }

    /// Drop one kind, or everything when `kind` is `None`.
    pub fn invalidate(&self, kind: Option<ResourceKind>) {
        let mut entries = self.entries.write();
        match kind {
            Some(kind) => {
                entries.remove(&kind);
            }
            None => entries.clear(),
        }
    }

    /// Which kinds are cached and how many entries each holds.
    pub fn status(&self) -> Vec<(ResourceKind, Option<usize>)> {
        let entries = self.entries.read();
        ResourceKind::ALL
            .iter()
            .map(|kind| (*kind, entries.get(kind).map(|v| v.len())))
            .collect()
    }
}
