use anyhow::{Result, bail};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::Settings;
use crate::executor::Target;
use crate::targets::validate_email;

/// A bulk job: one operation applied to a list of targets.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Operation to apply to every target.
    pub operation: Operation,
    /// Targets, processed in order.
    #[serde(default)]
    pub targets: Vec<JobTarget>,
    /// Report what would happen without invoking GAM.
    #[serde(default)]
    pub dry_run: bool,
}

impl Job {
    /// Check that every target has the shape the operation expects.
    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            bail!("job has no targets");
        }
        let expected = self.operation.target_kind();
        for target in &self.targets {
            if !expected.accepts(target.kind()) {
                bail!("{} needs {} targets, got: {}", self.operation.name(), expected, target.label());
            }
            match target {
                JobTarget::Email(id) if expected == TargetKind::CalendarId => {
                    if id.trim().is_empty() {
                        bail!("empty calendar ID");
                    }
                }
                JobTarget::Email(email) => {
                    if !validate_email(email) {
                        bail!("invalid email address: {}", email);
                    }
                }
                _ => {
                    for email in target.addresses() {
                        if !validate_email(email) {
                            bail!("invalid email address in {}: {}", target.label(), email);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Shape of target an operation consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Email,
    CalendarId,
    Transfer,
    Alias,
    Password,
    PermissionRemoval,
}

impl TargetKind {
    /// Calendar IDs travel as plain string targets.
    pub fn accepts(self, kind: TargetKind) -> bool {
        self == kind || (self == TargetKind::CalendarId && kind == TargetKind::Email)
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TargetKind::Email => "email",
            TargetKind::CalendarId => "calendar ID",
            TargetKind::Transfer => "file transfer",
            TargetKind::Alias => "alias",
            TargetKind::Password => "password reset",
            TargetKind::PermissionRemoval => "permission removal",
        })
    }
}

/// Subject of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum JobTarget {
    /// A user or group email address, or a calendar ID for calendar operations.
    Email(String),
    /// A Drive file whose ownership changes hands.
    Transfer(OwnershipTransfer),
    /// One sharing entry to strip from a Drive file.
    PermissionRemoval(PermissionRemoval),
    Alias(AliasAssignment),
    Password(PasswordReset),
}

impl JobTarget {
    pub fn kind(&self) -> TargetKind {
        match self {
            JobTarget::Email(_) => TargetKind::Email,
            JobTarget::Transfer(_) => TargetKind::Transfer,
            JobTarget::PermissionRemoval(_) => TargetKind::PermissionRemoval,
            JobTarget::Alias(_) => TargetKind::Alias,
            JobTarget::Password(_) => TargetKind::Password,
        }
    }

    /// Addresses inside record targets that must be well formed.
    fn addresses(&self) -> Vec<&str> {
        match self {
            JobTarget::Email(_) => Vec::new(),
            JobTarget::Transfer(t) => vec![t.current_owner.as_str(), t.new_owner.as_str()],
            JobTarget::PermissionRemoval(r) => vec![r.owner.as_str(), r.permission_email.as_str()],
            JobTarget::Alias(a) => vec![a.email.as_str(), a.alias.as_str()],
            JobTarget::Password(p) => vec![p.email.as_str()],
        }
    }
}

impl Target for JobTarget {
    fn label(&self) -> String {
        match self {
            JobTarget::Email(email) => email.clone(),
            JobTarget::Transfer(t) => format!("{} ({} → {})", t.file_id, t.current_owner, t.new_owner),
            JobTarget::PermissionRemoval(r) => format!("{} on {}", r.permission_email, r.file_id),
            JobTarget::Alias(a) => format!("{} ({})", a.email, a.alias),
            JobTarget::Password(p) => p.email.clone(),
        }
    }
}

impl From<String> for JobTarget {
    fn from(email: String) -> Self {
        JobTarget::Email(email)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct OwnershipTransfer {
    pub file_id: String,
    pub current_owner: String,
    pub new_owner: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PermissionRemoval {
    pub file_id: String,
    /// Owner of the file, whose Drive the command runs as.
    pub owner: String,
    pub permission_email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AliasAssignment {
    /// Primary address of the user receiving the alias.
    pub email: String,
    pub alias: String,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PasswordReset {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for PasswordReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordReset")
            .field("email", &self.email)
            .field("password", &"********")
            .finish()
    }
}

/// Role a member is added to a group with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    #[default]
    Member,
    Manager,
    Owner,
}

impl MemberRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MemberRole::Member => "member",
            MemberRole::Manager => "manager",
            MemberRole::Owner => "owner",
        }
    }
}

/// Access granted on a calendar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CalendarRole {
    Freebusy,
    #[default]
    Reader,
    Writer,
    Owner,
}

impl CalendarRole {
    pub fn as_str(self) -> &'static str {
        match self {
            CalendarRole::Freebusy => "freebusy",
            CalendarRole::Reader => "reader",
            CalendarRole::Writer => "writer",
            CalendarRole::Owner => "owner",
        }
    }
}

/// Operations GAM can apply per target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Permanently delete user accounts.
    DeleteUser,
    SuspendUser,
    RestoreUser,
    /// Set a new password; targets are `email,password` records.
    ResetPassword,
    /// Targets are `email,alias` records.
    AddAlias,
    /// Targets are the alias addresses themselves.
    RemoveAlias,
    /// Move users into an organizational unit.
    ChangeOrgUnit { org_unit: String },
    /// Enroll users in 2-step verification.
    EnableMfa,
    DisableMfa,
    DeleteGroup,
    /// Add each target user to `group`.
    AddGroupMember {
        group: String,
        #[serde(default)]
        role: MemberRole,
    },
    /// Remove each target user from `group`.
    RemoveGroupMember { group: String },
    /// Give `delegate` access to each target's mailbox.
    AddDelegate { delegate: String },
    RemoveDelegate { delegate: String },
    EnableForwarding { forward_to: String },
    DisableForwarding,
    /// Replace each target's Gmail signature (HTML).
    SetSignature { signature: String },
    RemoveSignature,
    CreateLabel { label: String },
    DeleteLabel { label: String },
    /// Move messages matching a Gmail query to trash, optionally bounded by
    /// `YYYY/MM/DD` dates.
    DeleteMessages {
        query: String,
        #[serde(default)]
        date_from: Option<String>,
        #[serde(default)]
        date_to: Option<String>,
    },
    EmptyDriveTrash,
    /// Strip one sharing entry per record; pairs with `scan-acls` findings.
    RemoveExternalPermission,
    /// Grant `user` access to each target calendar.
    AddCalendarPermission {
        user: String,
        #[serde(default)]
        role: CalendarRole,
        #[serde(default)]
        send_notifications: bool,
    },
    /// Revoke `user`'s access to each target calendar.
    RemoveCalendarPermission { user: String },
    /// Transfer file ownership; targets are transfer records.
    TransferOwnership {
        #[serde(default)]
        send_email: bool,
    },
    /// Raw GAM arguments; `__USER__` and `EMAIL` are replaced by the target.
    Custom { args: Vec<String> },
}

/// Placeholders substituted by [`Operation::Custom`].
pub const TARGET_PLACEHOLDERS: [&str; 2] = ["__USER__", "EMAIL"];

impl Operation {
    /// Display name used in logs and the progress surface.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::DeleteUser => "Delete User",
            Operation::SuspendUser => "Suspend User",
            Operation::RestoreUser => "Restore User",
            Operation::ResetPassword => "Reset Password",
            Operation::AddAlias => "Add Alias",
            Operation::RemoveAlias => "Remove Alias",
            Operation::ChangeOrgUnit { .. } => "Change Org Unit",
            Operation::EnableMfa => "Enable MFA",
            Operation::DisableMfa => "Disable MFA",
            Operation::DeleteGroup => "Delete Group",
            Operation::AddGroupMember { .. } => "Add Members",
            Operation::RemoveGroupMember { .. } => "Remove Members",
            Operation::AddDelegate { .. } => "Add Delegate",
            Operation::RemoveDelegate { .. } => "Remove Delegate",
            Operation::EnableForwarding { .. } => "Enable Forwarding",
            Operation::DisableForwarding => "Disable Forwarding",
            Operation::SetSignature { .. } => "Set Signature",
            Operation::RemoveSignature => "Remove Signature",
            Operation::CreateLabel { .. } => "Create Label",
            Operation::DeleteLabel { .. } => "Delete Label",
            Operation::DeleteMessages { .. } => "Delete Messages",
            Operation::EmptyDriveTrash => "Empty Drive Trash",
            Operation::RemoveExternalPermission => "Remove External Permissions",
            Operation::AddCalendarPermission { .. } => "Add Calendar Permission",
            Operation::RemoveCalendarPermission { .. } => "Remove Calendar Permission",
            Operation::TransferOwnership { .. } => "Transfer Ownership",
            Operation::Custom { .. } => "Custom Command",
        }
    }

    pub fn target_kind(&self) -> TargetKind {
        match self {
            Operation::TransferOwnership { .. } => TargetKind::Transfer,
            Operation::ResetPassword => TargetKind::Password,
            Operation::AddAlias => TargetKind::Alias,
            Operation::RemoveExternalPermission => TargetKind::PermissionRemoval,
            Operation::AddCalendarPermission { .. } | Operation::RemoveCalendarPermission { .. } => {
                TargetKind::CalendarId
            }
            _ => TargetKind::Email,
        }
    }

    /// Per-command timeout for this operation.
    pub fn timeout(&self, settings: &Settings) -> Duration {
        match self {
            Operation::EmptyDriveTrash => settings.scan_timeout(),
            Operation::DeleteMessages { .. } | Operation::TransferOwnership { .. } => settings.list_timeout(),
            _ => settings.command_timeout(),
        }
    }

    /// GAM arguments (without the program) for one target.
    pub fn args(&self, target: &JobTarget) -> Result<Vec<String>> {
        match (self, target) {
            (Operation::TransferOwnership { send_email }, JobTarget::Transfer(t)) => {
                return Ok(owned(&[
                    "user",
                    t.current_owner.as_str(),
                    "transfer",
                    "ownership",
                    t.file_id.as_str(),
                    t.new_owner.as_str(),
                    "sendemailemail",
                    if *send_email { "true" } else { "false" },
                ]));
            }
            (Operation::RemoveExternalPermission, JobTarget::PermissionRemoval(r)) => {
                return Ok(owned(&[
                    "user",
                    r.owner.as_str(),
                    "delete",
                    "drivefileacl",
                    r.file_id.as_str(),
                    r.permission_email.as_str(),
                ]));
            }
            (Operation::AddAlias, JobTarget::Alias(a)) => {
                return Ok(owned(&["create", "alias", a.alias.as_str(), "user", a.email.as_str()]));
            }
            (Operation::ResetPassword, JobTarget::Password(p)) => {
                return Ok(owned(&["update", "user", p.email.as_str(), "password", p.password.as_str()]));
            }
            _ => {}
        }

        let JobTarget::Email(t) = target else {
            bail!("{} needs {} targets", self.name(), self.target_kind());
        };
        let t = t.as_str();
        let args = match self {
            Operation::DeleteUser => owned(&["delete", "user", t]),
            Operation::SuspendUser => owned(&["update", "user", t, "suspended", "on"]),
            Operation::RestoreUser => owned(&["update", "user", t, "suspended", "off"]),
            Operation::RemoveAlias => owned(&["delete", "alias", t]),
            Operation::ChangeOrgUnit { org_unit } => owned(&["update", "user", t, "ou", org_unit.as_str()]),
            Operation::EnableMfa => owned(&["update", "user", t, "enroll2sv"]),
            Operation::DisableMfa => owned(&["update", "user", t, "turn2svoff"]),
            Operation::DeleteGroup => owned(&["delete", "group", t]),
            Operation::AddGroupMember { group, role } => {
                owned(&["update", "group", group.as_str(), "add", role.as_str(), "user", t])
            }
            Operation::RemoveGroupMember { group } => {
                owned(&["update", "group", group.as_str(), "remove", "member", "user", t])
            }
            Operation::AddDelegate { delegate } => owned(&["user", t, "delegate", "to", delegate.as_str()]),
            Operation::RemoveDelegate { delegate } => owned(&["user", t, "delegate", "delete", delegate.as_str()]),
            Operation::EnableForwarding { forward_to } => owned(&["user", t, "forward", "on", forward_to.as_str()]),
            Operation::DisableForwarding => owned(&["user", t, "forward", "off"]),
            Operation::SetSignature { signature } => owned(&["user", t, "signature", signature.as_str()]),
            Operation::RemoveSignature => owned(&["user", t, "signature", ""]),
            Operation::CreateLabel { label } => owned(&["user", t, "label", label.as_str()]),
            Operation::DeleteLabel { label } => owned(&["user", t, "delete", "label", label.as_str()]),
            Operation::DeleteMessages { .. } => {
                let query = self.full_query();
                owned(&["user", t, "delete", "messages", "query", query.as_str(), "trash", "excludetrash"])
            }
            Operation::EmptyDriveTrash => owned(&["user", t, "empty", "drivetrash"]),
            Operation::AddCalendarPermission {
                user,
                role,
                send_notifications,
            } => owned(&[
                "calendar",
                t,
                "add",
                role.as_str(),
                "user",
                user.as_str(),
                "sendnotifications",
                if *send_notifications { "true" } else { "false" },
            ]),
            Operation::RemoveCalendarPermission { user } => owned(&["calendar", t, "delete", "user", user.as_str()]),
            Operation::Custom { args } => substitute_target(args, t),
            Operation::TransferOwnership { .. }
            | Operation::RemoveExternalPermission
            | Operation::AddAlias
            | Operation::ResetPassword => bail!("{} needs {} targets", self.name(), self.target_kind()),
        };
        Ok(args)
    }

    /// Gmail query for `DeleteMessages`, with the date bounds appended.
    pub fn full_query(&self) -> String {
        let Operation::DeleteMessages {
            query,
            date_from,
            date_to,
        } = self
        else {
            return String::new();
        };
        let mut full = query.clone();
        if let Some(from) = date_from.as_deref().filter(|d| !d.is_empty()) {
            full.push_str(&format!(" after:{}", from));
        }
        if let Some(to) = date_to.as_deref().filter(|d| !d.is_empty()) {
            full.push_str(&format!(" before:{}", to));
        }
        full
    }

    /// What a dry run reports it would do.
    pub fn describe(&self, target: &JobTarget) -> String {
        let label = target.label();
        match self {
            Operation::DeleteUser => format!("delete user: {}", label),
            Operation::SuspendUser => format!("suspend user: {}", label),
            Operation::RestoreUser => format!("restore user: {}", label),
            Operation::ResetPassword => format!("reset password for: {}", label),
            Operation::AddAlias => match target {
                JobTarget::Alias(a) => format!("add alias {} to: {}", a.alias, a.email),
                _ => format!("add alias for {}", label),
            },
            Operation::RemoveAlias => format!("remove alias: {}", label),
            Operation::ChangeOrgUnit { org_unit } => format!("move {} to {}", label, org_unit),
            Operation::EnableMfa => format!("enable MFA for {}", label),
            Operation::DisableMfa => format!("disable MFA for {}", label),
            Operation::DeleteGroup => format!("delete group: {}", label),
            Operation::AddGroupMember { group, role } => {
                format!("add {} to {} as {}", label, group, role.as_str())
            }
            Operation::RemoveGroupMember { group } => format!("remove {} from {}", label, group),
            Operation::AddDelegate { delegate } => format!("add delegate {} for {}", delegate, label),
            Operation::RemoveDelegate { delegate } => format!("remove delegate {} for {}", delegate, label),
            Operation::EnableForwarding { forward_to } => format!("forward mail for {} to {}", label, forward_to),
            Operation::DisableForwarding => format!("disable forwarding for {}", label),
            Operation::SetSignature { .. } => format!("set signature for {}", label),
            Operation::RemoveSignature => format!("remove signature for {}", label),
            Operation::CreateLabel { label: name } => format!("create label '{}' for {}", name, label),
            Operation::DeleteLabel { label: name } => format!("delete label '{}' for {}", name, label),
            Operation::DeleteMessages { .. } => {
                format!("delete messages for {} matching query: {}", label, self.full_query())
            }
            Operation::EmptyDriveTrash => format!("empty Drive trash for {}", label),
            Operation::RemoveExternalPermission => match target {
                JobTarget::PermissionRemoval(r) => format!("remove {} from {}", r.permission_email, r.file_id),
                _ => format!("remove external permission {}", label),
            },
            Operation::AddCalendarPermission { user, role, .. } => {
                format!("add {} permission for {} to calendar {}", role.as_str(), user, label)
            }
            Operation::RemoveCalendarPermission { user } => {
                format!("remove permission for {} from calendar {}", user, label)
            }
            Operation::TransferOwnership { .. } => format!("transfer ownership of {}", label),
            Operation::Custom { .. } => match self.args(target) {
                Ok(args) => format!("run: gam {}", args.join(" ")),
                Err(_) => format!("run custom command for {}", label),
            },
        }
    }

    /// Message reported when GAM exits successfully.
    pub fn success_message(&self, target: &JobTarget) -> String {
        let label = target.label();
        match self {
            Operation::DeleteUser => format!("Deleted user {}", label),
            Operation::SuspendUser => format!("Suspended user {}", label),
            Operation::RestoreUser => format!("Restored user {}", label),
            Operation::ResetPassword => format!("Reset password for {}", label),
            Operation::AddAlias => match target {
                JobTarget::Alias(a) => format!("Added alias {} to {}", a.alias, a.email),
                _ => format!("Added alias for {}", label),
            },
            Operation::RemoveAlias => format!("Removed alias {}", label),
            Operation::ChangeOrgUnit { org_unit } => format!("Moved {} to {}", label, org_unit),
            Operation::EnableMfa => format!("Enabled MFA for {}", label),
            Operation::DisableMfa => format!("Disabled MFA for {}", label),
            Operation::DeleteGroup => format!("Deleted group {}", label),
            Operation::AddGroupMember { group, role } => {
                format!("Added {} to {} as {}", label, group, role.as_str())
            }
            Operation::RemoveGroupMember { group } => format!("Removed {} from {}", label, group),
            Operation::AddDelegate { .. } => format!("Added delegate for {}", label),
            Operation::RemoveDelegate { .. } => format!("Removed delegate for {}", label),
            Operation::EnableForwarding { .. } => format!("Enabled forwarding for {}", label),
            Operation::DisableForwarding => format!("Disabled forwarding for {}", label),
            Operation::SetSignature { .. } => format!("Set signature for {}", label),
            Operation::RemoveSignature => format!("Removed signature for {}", label),
            Operation::CreateLabel { .. } => format!("Created label for {}", label),
            Operation::DeleteLabel { .. } => format!("Deleted label for {}", label),
            Operation::DeleteMessages { .. } => format!("Successfully deleted messages for {}", label),
            Operation::EmptyDriveTrash => format!("Emptied trash for {}", label),
            Operation::RemoveExternalPermission => match target {
                JobTarget::PermissionRemoval(r) => format!("Removed {} from {}", r.permission_email, r.file_id),
                _ => format!("Removed external permission {}", label),
            },
            Operation::AddCalendarPermission { user, role, .. } => {
                format!("Added {} permission for {} to calendar {}", role.as_str(), user, label)
            }
            Operation::RemoveCalendarPermission { user } => {
                format!("Removed permission for {} from calendar {}", user, label)
            }
            Operation::TransferOwnership { .. } => match target {
                JobTarget::Transfer(t) => format!("Transferred ownership: {} → {}", t.current_owner, t.new_owner),
                _ => format!("Transferred ownership of {}", label),
            },
            Operation::Custom { .. } => format!("Command succeeded for {}", label),
        }
    }
}

fn owned(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

/// Replace target placeholders in a raw argument list.
pub fn substitute_target(args: &[String], target: &str) -> Vec<String> {
    args.iter()
        .map(|arg| {
            if TARGET_PLACEHOLDERS.contains(&arg.as_str()) {
                target.to_string()
            } else {
                arg.clone()
            }
        })
        .collect()
}

/// Generate JSON Schemas for the job manifest and the settings file.
pub fn generate_schema() -> String {
    let schema = serde_json::json!({
        "job": schemars::schema_for!(Job),
        "settings": schemars::schema_for!(crate::config::Settings),
    });
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// Load a Job from a JSON file.
pub fn load_job(path: &std::path::Path) -> Result<Job> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let job = serde_json::from_reader(reader)?;
    Ok(job)
}

/// Create a Job from a JSON string.
pub fn from_json(json: &str) -> Result<Job> {
    let job = serde_json::from_str(json)?;
    Ok(job)
}
