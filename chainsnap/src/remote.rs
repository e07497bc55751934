//! Remote shell session used for remote destinations.
//!
//! One authenticated ssh connection per invocation. It is opened on first
//! need, shared by every remote operation of the run and disconnected when
//! dropped.

use crate::backend::RemoteTarget;
use crate::fs::{DirLister, EntryKind, ListedEntry};
use crate::utils::{ChainError, Result};
use ssh2::Session;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const DRAIN_BUF_SIZE: usize = 32 * 1024;
const IDLE_WAIT: Duration = Duration::from_millis(5);

/// Command execution on the remote host of a destination.
pub trait RemoteExec: Send + Sync {
    fn target(&self) -> &RemoteTarget;

    /// Run a command remotely. A non-zero exit status is an error.
    fn exec(&self, args: &[&str]) -> Result<()>;
}

/// Private key used for public-key authentication.
#[derive(Debug, Clone)]
pub struct KeyAuth {
    pub path: PathBuf,
}

impl KeyAuth {
    /// Make sure the key exists, is readable and looks like a private key.
    pub fn load(path: &Path) -> Result<Self> {
        let key_err = |reason: String| ChainError::Key {
            path: path.to_path_buf(),
            reason,
        };

        let mut contents = String::new();
        std::fs::File::open(path)
            .map_err(|e| key_err(format!("could not open: {}", e)))?
            .read_to_string(&mut contents)
            .map_err(|e| key_err(format!("could not read: {}", e)))?;

        if !contents.contains("PRIVATE KEY-----") {
            return Err(key_err("could not parse: not a PEM/OpenSSH private key".into()));
        }

        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

pub struct RemoteSession {
    session: Session,
    target: RemoteTarget,
    dry_run: bool,
}

impl RemoteSession {
    /// Connect and authenticate with the given key. No password fallback.
    pub fn connect(target: &RemoteTarget, port: u16, key: &KeyAuth, dry_run: bool) -> Result<Self> {
        info!("Connecting to {} {}", target.user, target.host);

        let tcp = TcpStream::connect((target.host.as_str(), port)).map_err(|e| {
            ChainError::config(format!(
                "error connecting to {}:{}: {}",
                target.host, port, e
            ))
        })?;
        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;

        session
            .userauth_pubkey_file(&target.user, None, &key.path, None)
            .map_err(|e| ChainError::Key {
                path: key.path.clone(),
                reason: format!("public key authentication failed: {}", e),
            })?;
        if !session.authenticated() {
            return Err(ChainError::Key {
                path: key.path.clone(),
                reason: "public key authentication failed".into(),
            });
        }

        Ok(Self {
            session,
            target: target.clone(),
            dry_run,
        })
    }

    pub fn target(&self) -> &RemoteTarget {
        &self.target
    }

    /// Run a command remotely, forwarding its stdout and stderr as it runs.
    /// A non-zero exit status is an error.
    pub fn exec(&self, args: &[&str]) -> Result<()> {
        let command = shell_join(args);
        info!("Executing (remotely) {}", command);
        if self.dry_run {
            return Ok(());
        }

        let mut channel = self.session.channel_session()?;
        channel.exec(&command)?;

        {
            let _mode = NonBlocking::enter(&self.session);
            drain_streams(
                channel.stream(0),
                channel.stderr(),
                &mut io::stdout(),
                &mut io::stderr(),
            )?;
        }

        channel.wait_close()?;
        let status = channel.exit_status()?;
        if status != 0 {
            return Err(ChainError::Transfer {
                command,
                status: format!("exit status {}", status),
            });
        }
        Ok(())
    }

    /// List a remote directory over SFTP.
    pub fn read_dir(&self, path: &Path) -> Result<Vec<ListedEntry>> {
        let sftp = self.session.sftp()?;
        let entries = sftp.readdir(path)?;
        debug!(count = entries.len(), path = %path.display(), "Listed remote directory");

        Ok(entries
            .into_iter()
            .filter_map(|(entry_path, stat)| {
                let name = entry_path.file_name()?.to_string_lossy().into_owned();
                let file_type = stat.file_type();
                let kind = if file_type.is_dir() {
                    EntryKind::Dir
                } else if file_type.is_file() {
                    EntryKind::File
                } else if file_type.is_symlink() {
                    EntryKind::Symlink
                } else {
                    EntryKind::Other
                };
                Some(ListedEntry::new(name, kind))
            })
            .collect())
    }
}

impl RemoteExec for RemoteSession {
    fn target(&self) -> &RemoteTarget {
        RemoteSession::target(self)
    }

    fn exec(&self, args: &[&str]) -> Result<()> {
        RemoteSession::exec(self, args)
    }
}

impl DirLister for RemoteSession {
    fn list(&self, dir: &Path) -> Result<Vec<ListedEntry>> {
        self.read_dir(dir)
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        debug!("Closing connection to {}", self.target.host);
        let _ = self.session.disconnect(None, "chainsnap done", None);
    }
}

/// Puts the session in non-blocking mode until dropped.
///
/// SFTP and `wait_close` expect a blocking session again afterwards.
struct NonBlocking<'a>(&'a Session);

impl<'a> NonBlocking<'a> {
    fn enter(session: &'a Session) -> Self {
        session.set_blocking(false);
        Self(session)
    }
}

impl Drop for NonBlocking<'_> {
    fn drop(&mut self) {
        self.0.set_blocking(true);
    }
}

/// Copy two non-blocking sources into their sinks until both reach end of
/// stream, alternating between them.
///
/// `WouldBlock` means no data yet. When neither source had anything the
/// loop waits briefly before trying again.
pub(crate) fn drain_streams<A, B, O, E>(
    mut out_src: A,
    mut err_src: B,
    out: &mut O,
    err: &mut E,
) -> io::Result<()>
where
    A: Read,
    B: Read,
    O: Write,
    E: Write,
{
    let mut buf = vec![0u8; DRAIN_BUF_SIZE];
    let mut out_done = false;
    let mut err_done = false;

    while !(out_done && err_done) {
        let moved_out = pump(&mut out_src, out, &mut buf, &mut out_done)?;
        let moved_err = pump(&mut err_src, err, &mut buf, &mut err_done)?;
        if !moved_out && !moved_err {
            std::thread::sleep(IDLE_WAIT);
        }
    }
    Ok(())
}

/// One read from `src` into `sink`. Returns whether anything happened.
fn pump<R: Read, W: Write>(
    src: &mut R,
    sink: &mut W,
    buf: &mut [u8],
    done: &mut bool,
) -> io::Result<bool> {
    if *done {
        return Ok(false);
    }
    match src.read(buf) {
        Ok(0) => {
            *done = true;
            sink.flush()?;
            Ok(true)
        }
        Ok(n) => {
            sink.write_all(&buf[..n])?;
            Ok(true)
        }
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Join arguments into a POSIX shell command line, quoting where needed.
pub fn shell_join(args: &[&str]) -> String {
    args.iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./=:,+@%".contains(&b));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
