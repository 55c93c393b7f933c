use anyhow::{Context, Result, bail};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::acl::{self, AclScanner, ScanOptions};
use crate::actions::GamAction;
use crate::cache::{GamFetcher, ResourceKind, WorkspaceCache};
use crate::cli::{ListArgs, ListKind, OpKind, RunArgs, ScanArgs, TargetArgs};
use crate::config::Settings;
use crate::events::Terminal;
use crate::executor::{Action, BulkExecutor, Target};
use crate::exit_codes::{exit, for_terminal};
use crate::gam::{self, Gam, GamCheckError};
use crate::journal::JournalWriter;
use crate::logging::{ErrorLog, TracingErrorLog};
use crate::model::{self, Job, JobTarget, Operation, TargetKind};
use crate::relay::ProgressRelay;
use crate::reporter::{Reporter, estimate_duration};
use crate::targets;

/// Batches at least this large get a time estimate up front.
const ESTIMATE_THRESHOLD: usize = 50;
const SECONDS_PER_TARGET: Duration = Duration::from_secs(1);

/// GAM invoker for `settings`. Without `required`, a missing executable is
/// tolerated (dry runs never spawn it).
fn gam_for(settings: &Settings, required: bool) -> Result<Gam> {
    let program = match gam::locate(settings.gam_path.as_deref()) {
        Some(path) => path,
        None if !required => PathBuf::from("gam"),
        None => return Err(GamCheckError::NotInstalled.into()),
    };
    tracing::debug!("using GAM at {}", program.display());
    Ok(Gam::at(program).with_retry(settings.retry_policy()))
}

fn email_targets(args: &TargetArgs) -> Result<Vec<String>> {
    let mut emails = args.targets.clone();
    if let Some(csv) = &args.csv {
        emails.extend(targets::read_csv_emails(csv)?);
    }
    Ok(targets::dedup(emails))
}

fn require(value: &Option<String>, flag: &str, op: OpKind) -> Result<String> {
    value
        .clone()
        .with_context(|| format!("{} is required for {:?}", flag, op))
}

/// Build the operation named on the command line from its parameter flags.
pub fn operation_from_args(op: OpKind, args: &RunArgs) -> Result<Operation> {
    Ok(match op {
        OpKind::DeleteUser => Operation::DeleteUser,
        OpKind::SuspendUser => Operation::SuspendUser,
        OpKind::RestoreUser => Operation::RestoreUser,
        OpKind::ResetPassword => Operation::ResetPassword,
        OpKind::AddAlias => Operation::AddAlias,
        OpKind::RemoveAlias => Operation::RemoveAlias,
        OpKind::ChangeOrgUnit => Operation::ChangeOrgUnit {
            org_unit: require(&args.org_unit, "--org-unit", op)?,
        },
        OpKind::EnableMfa => Operation::EnableMfa,
        OpKind::DisableMfa => Operation::DisableMfa,
        OpKind::DeleteGroup => Operation::DeleteGroup,
        OpKind::AddGroupMember => Operation::AddGroupMember {
            group: require(&args.group, "--group", op)?,
            role: args.role.unwrap_or_default(),
        },
        OpKind::RemoveGroupMember => Operation::RemoveGroupMember {
            group: require(&args.group, "--group", op)?,
        },
        OpKind::AddDelegate => Operation::AddDelegate {
            delegate: require(&args.delegate, "--delegate", op)?,
        },
        OpKind::RemoveDelegate => Operation::RemoveDelegate {
            delegate: require(&args.delegate, "--delegate", op)?,
        },
        OpKind::EnableForwarding => Operation::EnableForwarding {
            forward_to: require(&args.forward_to, "--forward-to", op)?,
        },
        OpKind::DisableForwarding => Operation::DisableForwarding,
        OpKind::SetSignature => Operation::SetSignature {
            signature: require(&args.signature, "--signature", op)?,
        },
        OpKind::RemoveSignature => Operation::RemoveSignature,
        OpKind::CreateLabel => Operation::CreateLabel {
            label: require(&args.label, "--label", op)?,
        },
        OpKind::DeleteLabel => Operation::DeleteLabel {
            label: require(&args.label, "--label", op)?,
        },
        OpKind::DeleteMessages => Operation::DeleteMessages {
            query: require(&args.query, "--query", op)?,
            date_from: args.date_from.clone(),
            date_to: args.date_to.clone(),
        },
        OpKind::EmptyDriveTrash => Operation::EmptyDriveTrash,
        OpKind::TransferOwnership => Operation::TransferOwnership {
            send_email: args.send_email,
        },
        OpKind::RemoveExternalPermission => Operation::RemoveExternalPermission,
        OpKind::AddCalendarPermission => Operation::AddCalendarPermission {
            user: require(&args.user, "--user", op)?,
            role: args.calendar_role.unwrap_or_default(),
            send_notifications: args.send_notifications,
        },
        OpKind::RemoveCalendarPermission => Operation::RemoveCalendarPermission {
            user: require(&args.user, "--user", op)?,
        },
        OpKind::Custom => {
            if args.args.is_empty() {
                bail!("--arg is required for {:?}", op);
            }
            Operation::Custom { args: args.args.clone() }
        }
    })
}

fn record_targets(kind: TargetKind, csv: &Path) -> Result<Vec<JobTarget>> {
    Ok(match kind {
        TargetKind::Transfer => targets::read_csv_transfers(csv)?
            .into_iter()
            .map(JobTarget::Transfer)
            .collect(),
        TargetKind::Alias => targets::read_csv_aliases(csv)?.into_iter().map(JobTarget::Alias).collect(),
        TargetKind::Password => targets::read_csv_passwords(csv)?
            .into_iter()
            .map(JobTarget::Password)
            .collect(),
        TargetKind::PermissionRemoval => targets::read_csv_acl_removals(csv)?
            .into_iter()
            .map(JobTarget::PermissionRemoval)
            .collect(),
        TargetKind::Email | TargetKind::CalendarId => Vec::new(),
    })
}

/// Assemble the job from a manifest and/or command-line flags.
pub fn build_job(args: &RunArgs) -> Result<Job> {
    let mut job = match (&args.job, args.op) {
        (Some(path), _) => model::load_job(path).context("failed to load job")?,
        (None, Some(op)) => Job {
            operation: operation_from_args(op, args)?,
            targets: Vec::new(),
            dry_run: false,
        },
        (None, None) => bail!("either --job or --op is required"),
    };
    job.dry_run |= args.dry_run;

    let kind = job.operation.target_kind();
    match kind {
        TargetKind::Email => job.targets.extend(email_targets(&args.targets)?.into_iter().map(JobTarget::Email)),
        TargetKind::CalendarId => {
            let mut ids = args.targets.targets.clone();
            if let Some(csv) = &args.targets.csv {
                ids.extend(targets::read_csv_ids(csv, "calendar_id")?);
            }
            job.targets.extend(targets::dedup(ids).into_iter().map(JobTarget::Email));
        }
        _ => {
            if !args.targets.targets.is_empty() {
                bail!("{} takes {} records from --csv, not --target", job.operation.name(), kind);
            }
            if let Some(csv) = &args.targets.csv {
                job.targets.extend(record_targets(kind, csv)?);
            }
        }
    }
    job.validate()?;
    Ok(job)
}

/// Drive one batch through the relay, rendering events as they arrive.
fn relay_batch<T, A>(
    settings: &Settings,
    executor: BulkExecutor,
    targets: Vec<T>,
    action: A,
    reporter: &RefCell<Reporter>,
) -> Result<Terminal>
where
    T: Target + 'static,
    A: Action<T> + Send + 'static,
{
    if targets.len() >= ESTIMATE_THRESHOLD {
        let estimate = estimate_duration(targets.len(), SECONDS_PER_TARGET);
        reporter
            .borrow_mut()
            .notice(&format!("Processing {} targets, estimated time: {}", targets.len(), estimate));
    }

    let mut relay = ProgressRelay::new(settings.poll_interval());
    relay.start_bulk(
        executor,
        targets,
        action,
        move |event| reporter.borrow_mut().event(event),
        move |terminal| reporter.borrow_mut().terminal(terminal),
    )?;
    relay.wait().context("operation ended without a terminal state")
}

pub fn run(settings: &Settings, args: RunArgs) -> Result<i32> {
    let mut settings = settings.clone();
    if let Some(max_retries) = args.max_retries {
        settings.max_retries = max_retries;
    }
    if let Some(backoff_factor) = args.backoff_factor {
        settings.backoff_factor = backoff_factor;
    }
    settings.validate()?;

    let job = build_job(&args)?;
    let timeout = args.timeout.unwrap_or_else(|| job.operation.timeout(&settings));
    let gam = gam_for(&settings, !job.dry_run)?;
    let journal = args.journal.map(JournalWriter::open).transpose()?;

    let name = job.operation.name();
    let error_log: Arc<dyn ErrorLog> = Arc::new(TracingErrorLog);
    let reporter = RefCell::new(Reporter::new(name, args.json).journal(journal));
    tracing::info!(
        operation = name,
        targets = job.targets.len(),
        dry_run = job.dry_run,
        run_id = %reporter.borrow().run_id(),
        "starting batch"
    );

    let executor = BulkExecutor::new(name)
        .dry_run(job.dry_run)
        .error_log(Arc::clone(&error_log));
    let action = GamAction::new(job.operation.clone(), gam, timeout, error_log);
    let terminal = relay_batch(&settings, executor, job.targets, action, &reporter)?;
    Ok(for_terminal(&terminal))
}

pub fn scan(settings: &Settings, args: ScanArgs) -> Result<i32> {
    let domain = args
        .domain
        .clone()
        .or_else(|| settings.domain.clone())
        .context("--domain is required (or set `domain` in the settings file)")?;
    let timeout = args.timeout.unwrap_or(settings.scan_timeout());

    let mut users = email_targets(&args.targets)?;
    let gam = gam_for(settings, !args.dry_run || users.is_empty())?;
    if users.is_empty() {
        let cache = WorkspaceCache::new(Arc::new(GamFetcher::new(gam.clone(), settings.list_timeout())));
        users = cache.get_or_fetch(ResourceKind::Users)?.to_vec();
        if users.is_empty() {
            bail!("no users found to scan");
        }
    }

    let journal = args.journal.map(JournalWriter::open).transpose()?;
    let error_log: Arc<dyn ErrorLog> = Arc::new(TracingErrorLog);
    let reporter = RefCell::new(Reporter::new(acl::OPERATION, args.json).journal(journal));

    let options = ScanOptions {
        domain,
        include_anyone_links: !args.no_anyone_links,
    };
    let scanner = AclScanner::new(gam, options, timeout, Arc::clone(&error_log));
    let report = scanner.report();
    let executor = BulkExecutor::new(acl::OPERATION)
        .dry_run(args.dry_run)
        .error_log(error_log);
    let terminal = relay_batch(settings, executor, users, scanner, &reporter)?;

    if !args.dry_run && !matches!(terminal, Terminal::Error { .. }) {
        let report = report.lock().clone();
        reporter.borrow_mut().scan_report(&report);
    }
    Ok(for_terminal(&terminal))
}

pub fn list(settings: &Settings, args: ListArgs) -> Result<i32> {
    let gam = gam_for(settings, true)?;
    let fetcher = Arc::new(GamFetcher::new(gam, settings.list_timeout()));
    let items: Vec<String> = match args.kind {
        ListKind::Members => {
            let group = args.group.as_deref().context("--group is required for members")?;
            fetcher.fetch_group_members(group)?
        }
        kind => {
            let kind = match kind {
                ListKind::Users => ResourceKind::Users,
                ListKind::Groups => ResourceKind::Groups,
                _ => ResourceKind::OrgUnits,
            };
            let cache = WorkspaceCache::new(fetcher);
            cache
                .get_or_fetch(kind)
                .with_context(|| format!("failed to fetch {}", kind))?
                .to_vec()
        }
    };

    if args.json {
        println!("{}", serde_json::to_string(&items)?);
    } else {
        for item in &items {
            println!("{}", item);
        }
    }
    Ok(exit::SUCCESS)
}

pub fn check(settings: &Settings) -> Result<i32> {
    let Some(path) = gam::locate(settings.gam_path.as_deref()) else {
        eprintln!("{}", GamCheckError::NotInstalled);
        return Ok(exit::OPERATIONAL_FAILURE);
    };
    let gam = Gam::at(&path);
    let version = match gam.check_version() {
        Ok(version) => version,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(exit::OPERATIONAL_FAILURE);
        }
    };
    println!("GAM found: {}", path.display());
    println!("{}", version);
    match gam.check_auth() {
        Ok(()) => {
            println!("GAM is authenticated");
            Ok(exit::SUCCESS)
        }
        Err(e) => {
            eprintln!("{}", e);
            Ok(exit::OPERATIONAL_FAILURE)
        }
    }
}
