use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Settings;
use crate::model::{CalendarRole, MemberRole};

/// Bulk Google Workspace administration through GAM.
#[derive(Parser)]
#[command(name = "gamrelay", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Clone, Default)]
pub struct GlobalArgs {
    /// Settings file (JSON).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// GAM executable; overrides the settings file and PATH lookup.
    #[arg(long, global = true)]
    pub gam_path: Option<PathBuf>,

    /// Also write diagnostics to this file (truncated each run).
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// More diagnostics on stderr (-v info, -vv debug).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

impl GlobalArgs {
    /// Settings file values with command-line overrides applied.
    pub fn settings(&self) -> Result<Settings> {
        let mut settings = Settings::load(self.config.as_deref())?;
        if let Some(gam_path) = &self.gam_path {
            settings.gam_path = Some(gam_path.clone());
        }
        if let Some(log_file) = &self.log_file {
            settings.log_file = Some(log_file.clone());
        }
        Ok(settings)
    }

    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Print JSON Schema for job manifests and settings.
    Schema,
    /// Locate GAM and verify it is GAM7.
    Check,
    /// List users, groups, org units, or a group's members.
    List(ListArgs),
    /// Apply one operation to a batch of targets.
    Run(RunArgs),
    /// Scan users' Drive files for sharing outside the domain.
    ScanAcls(ScanArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ListKind {
    Users,
    Groups,
    OrgUnits,
    Members,
}

#[derive(Args)]
pub struct ListArgs {
    #[arg(value_enum)]
    pub kind: ListKind,

    /// Group whose members to list.
    #[arg(long, required_if_eq("kind", "members"))]
    pub group: Option<String>,

    /// Output a JSON array.
    #[arg(long)]
    pub json: bool,
}

/// Where the batch targets come from.
#[derive(Args, Clone, Default)]
pub struct TargetArgs {
    /// Target email address; repeatable.
    #[arg(long = "target", value_name = "EMAIL")]
    pub targets: Vec<String>,

    /// CSV of targets: an `email` column, `calendar_id` for calendar
    /// operations, or the record columns of record operations.
    #[arg(long)]
    pub csv: Option<PathBuf>,
}

/// Operations selectable with `--op`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OpKind {
    DeleteUser,
    SuspendUser,
    RestoreUser,
    ResetPassword,
    AddAlias,
    RemoveAlias,
    ChangeOrgUnit,
    EnableMfa,
    DisableMfa,
    DeleteGroup,
    AddGroupMember,
    RemoveGroupMember,
    AddDelegate,
    RemoveDelegate,
    EnableForwarding,
    DisableForwarding,
    SetSignature,
    RemoveSignature,
    CreateLabel,
    DeleteLabel,
    DeleteMessages,
    EmptyDriveTrash,
    TransferOwnership,
    RemoveExternalPermission,
    AddCalendarPermission,
    RemoveCalendarPermission,
    Custom,
}

#[derive(Args, Default)]
pub struct RunArgs {
    /// Job manifest (JSON).
    #[arg(long, conflicts_with = "op", required_unless_present = "op")]
    pub job: Option<PathBuf>,

    /// Operation to run instead of a manifest.
    #[arg(long, value_enum)]
    pub op: Option<OpKind>,

    /// Destination org unit for change-org-unit.
    #[arg(long)]
    pub org_unit: Option<String>,

    /// Group for add-group-member and remove-group-member.
    #[arg(long)]
    pub group: Option<String>,

    /// Membership role for add-group-member.
    #[arg(long, value_enum)]
    pub role: Option<MemberRole>,

    /// Delegate address for add-delegate and remove-delegate.
    #[arg(long)]
    pub delegate: Option<String>,

    /// Forwarding address for enable-forwarding.
    #[arg(long)]
    pub forward_to: Option<String>,

    /// Signature HTML for set-signature.
    #[arg(long)]
    pub signature: Option<String>,

    /// Gmail label for create-label and delete-label.
    #[arg(long)]
    pub label: Option<String>,

    /// Gmail search query for delete-messages.
    #[arg(long)]
    pub query: Option<String>,

    /// Only messages after this date (YYYY/MM/DD).
    #[arg(long)]
    pub date_from: Option<String>,

    /// Only messages before this date (YYYY/MM/DD).
    #[arg(long)]
    pub date_to: Option<String>,

    /// User granted or losing calendar access; targets are calendar IDs.
    #[arg(long)]
    pub user: Option<String>,

    #[arg(long, value_enum)]
    pub calendar_role: Option<CalendarRole>,

    /// Email the user about a new calendar permission.
    #[arg(long)]
    pub send_notifications: bool,

    /// Notify new owners on transfer-ownership.
    #[arg(long)]
    pub send_email: bool,

    /// GAM arguments for custom; `__USER__` or `EMAIL` stand for the target.
    #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
    pub args: Vec<String>,

    #[command(flatten)]
    pub targets: TargetArgs,

    /// Report what would happen without invoking GAM.
    #[arg(long)]
    pub dry_run: bool,

    /// Output structured JSON to stdout.
    #[arg(long)]
    pub json: bool,

    /// Append events to an NDJSON journal.
    #[arg(long)]
    pub journal: Option<PathBuf>,

    /// Retries after the first attempt on rate-limit or timeout.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Exponential backoff base in seconds.
    #[arg(long)]
    pub backoff_factor: Option<u32>,

    /// Per-command timeout, e.g. `30s` or `2m`.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,
}

#[derive(Args, Default)]
pub struct ScanArgs {
    /// Organization domain; files shared outside it are reported.
    #[arg(long)]
    pub domain: Option<String>,

    /// Do not report "anyone with the link" sharing.
    #[arg(long)]
    pub no_anyone_links: bool,

    // Every user in the domain when no targets are given.
    #[command(flatten)]
    pub targets: TargetArgs,

    #[arg(long)]
    pub dry_run: bool,

    #[arg(long)]
    pub json: bool,

    #[arg(long)]
    pub journal: Option<PathBuf>,

    /// Per-user timeout.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,
}
