//! Invocation orchestration: one function per CLI command.
//!
//! Blocking work (directory listings, ssh, checksum walks) runs on the
//! blocking pool; the mirroring subprocess is driven on the async runtime.

use crate::backend::{BackupDestination, RemoteTarget};
use crate::config::Config;
use crate::fs::LocalLister;
use crate::remote::{KeyAuth, RemoteSession};
use crate::sizes::{self, Aggregation};
use crate::snapshot::{resolve_chain, ChainState, SnapshotName, SnapshotRef};
use crate::transfer::{RsyncEngine, TransferEngine, TransferSpec};
use crate::utils::{ChainError, Result};
use crate::verify::{Verifier, VerifyReport};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Output format for the size report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text { verbose: bool },
    Json,
}

/// Produce the next snapshot. Returns the snapshot that was written.
pub async fn run_backup(config: &Config) -> Result<SnapshotRef> {
    config.validate()?;
    let settings = &config.settings;

    let (state, engine) = match &config.destination {
        BackupDestination::Local(root) => {
            let state = resolve_local(root).await?;
            let engine = RsyncEngine::local(&settings.mirror_program, settings.dry_run);
            (state, engine)
        }
        BackupDestination::Remote(target) => {
            let session = Arc::new(open_session(config, target).await?);
            let state = resolve_remote(&session, &target.path).await?;
            let engine = RsyncEngine::remote(
                &settings.mirror_program,
                settings.remote_shell_command(),
                session,
                settings.dry_run,
            );
            (state, engine)
        }
    };
    log_chain(&state);

    let spec = TransferSpec {
        source_root: config.layout.source.clone(),
        dest: state.next.path.clone(),
        exclude_from: config.layout.exclude.clone(),
        include_from: config.layout.include.clone(),
        link_from: state.latest.as_ref().map(|latest| latest.path.clone()),
    };
    engine.transfer(&spec).await?;

    info!("Backup written to {}", state.next.path.display());
    Ok(state.next)
}

/// Verify the latest snapshot against the source.
///
/// Returns `None` for remote destinations, which are not checked. A report
/// with mismatches is still `Ok`; failure is reported through the log.
pub async fn run_check(config: &Config, subdir: Option<PathBuf>) -> Result<Option<VerifyReport>> {
    config.validate()?;

    let root = match &config.destination {
        BackupDestination::Local(root) => root,
        BackupDestination::Remote(_) => {
            info!("Can not check remote directory");
            return Ok(None);
        }
    };

    let state = resolve_local(root).await?;
    log_chain(&state);
    let latest = state
        .latest
        .ok_or_else(|| ChainError::config(format!("no snapshot to verify in {}", root.display())))?;

    let verifier = Verifier::new(config.settings.verify_chunk_size);
    let source = config.layout.source.clone();
    let report = tokio::task::spawn_blocking(move || {
        verifier.verify(&source, &latest.path, subdir.as_deref())
    })
    .await??;

    if report.ok() {
        info!(
            compared = report.compared,
            skipped = report.skipped.len(),
            "All files checked correctly"
        );
    } else {
        warn!(
            compared = report.compared,
            failed = report.mismatches.len(),
            "Some files did not check correctly"
        );
    }
    Ok(Some(report))
}

/// Aggregate a size report and print it to `out`.
pub fn run_size_report<W: Write>(report: &Path, format: ReportFormat, out: &mut W) -> Result<Aggregation> {
    let reader = sizes::report::open_report(report)?;
    let aggregation = sizes::aggregate(reader)?;
    match format {
        ReportFormat::Text { verbose } => aggregation.write_text(out, verbose)?,
        ReportFormat::Json => aggregation.write_json(out)?,
    }
    Ok(aggregation)
}

async fn resolve_local(root: &Path) -> Result<ChainState> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || resolve_chain(&LocalLister, &root, SnapshotName::now())).await?
}

async fn resolve_remote(session: &Arc<RemoteSession>, root: &Path) -> Result<ChainState> {
    let session = Arc::clone(session);
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || resolve_chain(&*session, &root, SnapshotName::now())).await?
}

async fn open_session(config: &Config, target: &RemoteTarget) -> Result<RemoteSession> {
    let identity = config.settings.identity_path()?;
    let port = config.settings.ssh_port;
    let dry_run = config.settings.dry_run;
    let target = target.clone();

    tokio::task::spawn_blocking(move || {
        let key = KeyAuth::load(&identity)?;
        RemoteSession::connect(&target, port, &key, dry_run)
    })
    .await?
}

fn log_chain(state: &ChainState) {
    match &state.latest {
        Some(latest) => info!(
            "Last backup directory is: {}, next: {}",
            latest.path.display(),
            state.next.path.display()
        ),
        None => info!(
            "No previous backup, next: {} (full copy)",
            state.next.path.display()
        ),
    }
}
