//! Running external programs with live output forwarding.

use crate::utils::{ChainError, Result};
use std::process::Stdio;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::info;

/// Human readable form of a command line, for logs and errors.
pub fn describe(command: &std::process::Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|part| part.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run `command` to completion, forwarding its stdout and stderr to ours.
pub async fn run_forwarded(command: Command, dry_run: bool) -> Result<()> {
    run_with_sinks(command, dry_run, tokio::io::stdout(), tokio::io::stderr()).await?;
    Ok(())
}

/// Run `command`, copying stdout into `out` and stderr into `err` concurrently.
///
/// Each stream has its own task so a full pipe on one side never stalls
/// the other. Any spawn failure or non-zero exit is an error.
pub async fn run_with_sinks<O, E>(
    mut command: Command,
    dry_run: bool,
    mut out: O,
    mut err: E,
) -> Result<(O, E)>
where
    O: AsyncWrite + Unpin + Send + 'static,
    E: AsyncWrite + Unpin + Send + 'static,
{
    let command_line = describe(command.as_std());
    info!("Executing {}", command_line);
    if dry_run {
        return Ok((out, err));
    }

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|e| ChainError::Transfer {
        command: command_line.clone(),
        status: format!("could not start: {}", e),
    })?;

    let missing_pipe = |which: &str| ChainError::Transfer {
        command: command_line.clone(),
        status: format!("could not capture {}", which),
    };
    let mut stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
    let mut stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

    let out_task = tokio::spawn(async move {
        tokio::io::copy(&mut stdout, &mut out).await?;
        out.flush().await?;
        Ok::<_, std::io::Error>(out)
    });
    let err_task = tokio::spawn(async move {
        tokio::io::copy(&mut stderr, &mut err).await?;
        err.flush().await?;
        Ok::<_, std::io::Error>(err)
    });

    let status = child.wait().await?;
    let out = out_task.await??;
    let err = err_task.await??;

    if !status.success() {
        return Err(ChainError::Transfer {
            command: command_line,
            status: status.to_string(),
        });
    }
    Ok((out, err))
}
