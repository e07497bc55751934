//! Snapshot transfers through an external mirroring tool.
//!
//! Two operations are needed: a full copy for the first snapshot, and an
//! incremental copy that deletes vanished entries and hardlinks unchanged
//! files against the previous snapshot. For a remote destination the
//! previous snapshot is first cloned on the remote host with a
//! metadata-preserving hardlink copy, then mirrored into.

pub mod process;

use crate::backend::RemoteTarget;
use crate::remote::RemoteExec;
use crate::utils::Result;
use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;

/// Everything a single transfer needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSpec {
    pub source_root: PathBuf,

    /// New snapshot directory (a path on the remote host in remote mode)
    pub dest: PathBuf,

    pub exclude_from: PathBuf,
    pub include_from: PathBuf,

    /// Previous snapshot to hardlink against; `None` for a full copy
    pub link_from: Option<PathBuf>,
}

/// Boundary to the mirroring tool.
pub trait TransferEngine: Sync {
    fn full_copy(&self, spec: &TransferSpec) -> impl Future<Output = Result<()>> + Send;

    fn incremental_copy(
        &self,
        spec: &TransferSpec,
        link_from: &Path,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Full copy when there is no previous snapshot, incremental otherwise.
    fn transfer(&self, spec: &TransferSpec) -> impl Future<Output = Result<()>> + Send {
        async move {
            match &spec.link_from {
                Some(link_from) => self.incremental_copy(spec, link_from).await,
                None => self.full_copy(spec).await,
            }
        }
    }
}

enum Target {
    Local,
    Remote {
        remote: Arc<dyn RemoteExec>,
        remote_shell: String,
    },
}

/// rsync-compatible mirroring engine.
pub struct RsyncEngine {
    program: String,
    dry_run: bool,
    target: Target,
}

impl RsyncEngine {
    pub fn local(program: impl Into<String>, dry_run: bool) -> Self {
        Self {
            program: program.into(),
            dry_run,
            target: Target::Local,
        }
    }

    pub fn remote(
        program: impl Into<String>,
        remote_shell: impl Into<String>,
        remote: Arc<dyn RemoteExec>,
        dry_run: bool,
    ) -> Self {
        Self {
            program: program.into(),
            dry_run,
            target: Target::Remote {
                remote,
                remote_shell: remote_shell.into(),
            },
        }
    }

    fn command(&self, spec: &TransferSpec, options: MirrorOptions<'_>) -> Command {
        let (remote_shell, dest) = match &self.target {
            Target::Local => (None, spec.dest.clone().into_os_string()),
            Target::Remote {
                remote,
                remote_shell,
            } => (
                Some(remote_shell.as_str()),
                remote_location(remote.target(), &spec.dest),
            ),
        };

        let mut command = Command::new(&self.program);
        command
            .current_dir(&spec.source_root)
            .args(mirror_args(spec, remote_shell, options, dest));
        command
    }
}

impl TransferEngine for RsyncEngine {
    async fn full_copy(&self, spec: &TransferSpec) -> Result<()> {
        let command = self.command(spec, MirrorOptions::default());
        process::run_forwarded(command, self.dry_run).await
    }

    async fn incremental_copy(&self, spec: &TransferSpec, link_from: &Path) -> Result<()> {
        let options = match &self.target {
            Target::Local => MirrorOptions {
                delete: true,
                link_dest: Some(link_from),
            },
            Target::Remote { remote, .. } => {
                // The mirror only runs once the clone has succeeded.
                let remote = Arc::clone(remote);
                let args = clone_args(link_from, &spec.dest);
                tokio::task::spawn_blocking(move || {
                    let args: Vec<&str> = args.iter().map(String::as_str).collect();
                    remote.exec(&args)
                })
                .await??;
                MirrorOptions {
                    delete: true,
                    link_dest: None,
                }
            }
        };

        let command = self.command(spec, options);
        process::run_forwarded(command, self.dry_run).await
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct MirrorOptions<'a> {
    delete: bool,
    link_dest: Option<&'a Path>,
}

fn flag_with_path(flag: &str, path: &Path) -> OsString {
    let mut arg = OsString::from(flag);
    arg.push(path);
    arg
}

fn remote_location(target: &RemoteTarget, path: &Path) -> OsString {
    OsString::from(target.rsync_location(path))
}

/// Arguments for one mirror run. The source is always `.`, the command runs
/// inside the source root.
fn mirror_args(
    spec: &TransferSpec,
    remote_shell: Option<&str>,
    options: MirrorOptions<'_>,
    dest: OsString,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    if let Some(shell) = remote_shell {
        args.push("-e".into());
        args.push(shell.into());
    }
    args.push("-v".into());
    args.push("-a".into());
    if options.delete {
        args.push("--delete".into());
    }
    if let Some(link_dest) = options.link_dest {
        args.push(flag_with_path("--link-dest=", link_dest));
    }
    args.push(flag_with_path("--exclude-from=", &spec.exclude_from));
    args.push(flag_with_path("--include-from=", &spec.include_from));
    args.push(".".into());
    args.push(dest);
    args
}

/// Remote command cloning `old` into `new` as hardlinks, keeping all metadata.
fn clone_args(old: &Path, new: &Path) -> Vec<String> {
    vec![
        "cp".to_string(),
        "--preserve=all".to_string(),
        "-l".to_string(),
        "--no-dereference".to_string(),
        "-R".to_string(),
        old.to_string_lossy().into_owned(),
        new.to_string_lossy().into_owned(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::MetadataExt;
    use tempfile::TempDir;

    fn spec(root: &Path, link_from: Option<&str>) -> TransferSpec {
        TransferSpec {
            source_root: root.join("src"),
            dest: root.join("dst/backup.20230102000000"),
            exclude_from: root.join("exclude"),
            include_from: root.join("include"),
            link_from: link_from.map(PathBuf::from),
        }
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_full_copy_args() {
        let spec = spec(Path::new("/c"), None);
        let args = mirror_args(&spec, None, MirrorOptions::default(), spec.dest.clone().into());
        assert_eq!(
            strings(args),
            vec![
                "-v",
                "-a",
                "--exclude-from=/c/exclude",
                "--include-from=/c/include",
                ".",
                "/c/dst/backup.20230102000000",
            ]
        );
    }

    #[test]
    fn test_incremental_args_exclude_before_include() {
        let spec = spec(Path::new("/c"), Some("/c/dst/backup.20230101000000"));
        let options = MirrorOptions {
            delete: true,
            link_dest: spec.link_from.as_deref(),
        };
        let args = strings(mirror_args(&spec, None, options, spec.dest.clone().into()));
        assert_eq!(args[2], "--delete");
        assert_eq!(args[3], "--link-dest=/c/dst/backup.20230101000000");

        let exclude = args.iter().position(|a| a.starts_with("--exclude-from")).unwrap();
        let include = args.iter().position(|a| a.starts_with("--include-from")).unwrap();
        assert!(exclude < include);
    }

    #[test]
    fn test_remote_args() {
        let target = RemoteTarget {
            user: "alice".into(),
            host: "nas".into(),
            path: "/srv".into(),
        };
        let spec = TransferSpec {
            dest: "/srv/backup.20230102000000".into(),
            ..spec(Path::new("/c"), Some("/srv/backup.20230101000000"))
        };
        let options = MirrorOptions {
            delete: true,
            link_dest: None,
        };
        let dest = remote_location(&target, &spec.dest);
        let args = strings(mirror_args(&spec, Some("ssh -p 2222"), options, dest));
        assert_eq!(&args[..5], &["-e", "ssh -p 2222", "-v", "-a", "--delete"]);
        assert!(!args.iter().any(|a| a.starts_with("--link-dest")));
        assert_eq!(args.last().unwrap(), "alice@nas:/srv/backup.20230102000000");
    }

    #[test]
    fn test_clone_args() {
        assert_eq!(
            clone_args(Path::new("/srv/backup.1"), Path::new("/srv/backup.2")),
            vec![
                "cp",
                "--preserve=all",
                "-l",
                "--no-dereference",
                "-R",
                "/srv/backup.1",
                "/srv/backup.2"
            ]
        );
    }

    fn rsync_available() -> bool {
        std::process::Command::new("rsync")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn fixture() -> std::io::Result<TempDir> {
        let root = TempDir::new()?;
        let src = root.path().join("src");
        fs::create_dir_all(src.join("docs"))?;
        fs::create_dir(root.path().join("dst"))?;
        fs::write(src.join("a.txt"), b"alpha")?;
        fs::write(src.join("docs/b.txt"), b"bravo")?;
        fs::write(src.join("scratch.tmp"), b"junk")?;
        fs::write(root.path().join("exclude"), "*.tmp\n")?;
        fs::write(root.path().join("include"), "")?;
        Ok(root)
    }

    #[tokio::test]
    async fn test_local_chain_shares_unchanged_files() -> anyhow::Result<()> {
        if !rsync_available() {
            eprintln!("rsync not installed, skipping");
            return Ok(());
        }
        let root = fixture()?;
        let engine = RsyncEngine::local("rsync", false);

        let first = TransferSpec {
            dest: root.path().join("dst/backup.20230101000000"),
            ..spec(root.path(), None)
        };
        engine.transfer(&first).await?;
        assert!(first.dest.join("docs/b.txt").exists());
        assert!(!first.dest.join("scratch.tmp").exists());

        let second = spec(root.path(), first.dest.to_str());
        engine.transfer(&second).await?;

        for file in ["a.txt", "docs/b.txt"] {
            let old = fs::metadata(first.dest.join(file))?;
            let new = fs::metadata(second.dest.join(file))?;
            assert_eq!(old.ino(), new.ino(), "{} was copied, not linked", file);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_local_incremental_drops_deleted_files() -> anyhow::Result<()> {
        if !rsync_available() {
            eprintln!("rsync not installed, skipping");
            return Ok(());
        }
        let root = fixture()?;
        let engine = RsyncEngine::local("rsync", false);

        let first = TransferSpec {
            dest: root.path().join("dst/backup.20230101000000"),
            ..spec(root.path(), None)
        };
        engine.transfer(&first).await?;

        fs::remove_file(root.path().join("src/a.txt"))?;
        fs::write(root.path().join("src/docs/b.txt"), b"bravo, revised")?;

        let second = spec(root.path(), first.dest.to_str());
        engine.transfer(&second).await?;

        assert!(!second.dest.join("a.txt").exists());
        assert!(first.dest.join("a.txt").exists());
        assert_eq!(fs::read(second.dest.join("docs/b.txt"))?, b"bravo, revised");
        assert_eq!(fs::read(first.dest.join("docs/b.txt"))?, b"bravo");
        Ok(())
    }

    /// Remote host stand-in: records clone commands in a shared log file.
    struct FakeRemote {
        target: RemoteTarget,
        log: PathBuf,
        fail: bool,
        calls: std::sync::Mutex<Vec<Vec<String>>>,
    }

    impl RemoteExec for FakeRemote {
        fn target(&self) -> &RemoteTarget {
            &self.target
        }

        fn exec(&self, args: &[&str]) -> Result<()> {
            use std::io::Write;

            if let Ok(mut calls) = self.calls.lock() {
                calls.push(args.iter().map(|a| a.to_string()).collect());
            }
            let mut log = fs::OpenOptions::new().create(true).append(true).open(&self.log)?;
            writeln!(log, "clone")?;
            if self.fail {
                return Err(crate::utils::ChainError::Transfer {
                    command: args.join(" "),
                    status: "exit status 1".into(),
                });
            }
            Ok(())
        }
    }

    /// A fixture plus a fake remote and a mirror program that appends its
    /// arguments to the same log.
    fn remote_fixture(fail: bool) -> anyhow::Result<(TempDir, Arc<FakeRemote>, String)> {
        use std::os::unix::fs::PermissionsExt;

        let root = fixture()?;
        let log = root.path().join("calls.log");
        let mirror = root.path().join("fake-rsync");
        fs::write(&mirror, format!("#!/bin/sh\necho \"mirror $*\" >> '{}'\n", log.display()))?;
        fs::set_permissions(&mirror, fs::Permissions::from_mode(0o755))?;

        let remote = Arc::new(FakeRemote {
            target: RemoteTarget {
                user: "alice".into(),
                host: "nas".into(),
                path: "/srv".into(),
            },
            log,
            fail,
            calls: std::sync::Mutex::new(Vec::new()),
        });
        Ok((root, remote, mirror.to_string_lossy().into_owned()))
    }

    fn remote_spec(root: &Path, link_from: Option<&str>) -> TransferSpec {
        TransferSpec {
            dest: "/srv/backup.20230102000000".into(),
            ..spec(root, link_from)
        }
    }

    fn log_lines(path: &Path) -> std::io::Result<Vec<String>> {
        Ok(fs::read_to_string(path)?.lines().map(String::from).collect())
    }

    #[tokio::test]
    async fn test_remote_incremental_clones_before_mirroring() -> anyhow::Result<()> {
        let (root, remote, mirror) = remote_fixture(false)?;
        let engine = RsyncEngine::remote(mirror, "ssh -p 2222", remote.clone(), false);

        let spec = remote_spec(root.path(), Some("/srv/backup.20230101000000"));
        engine.transfer(&spec).await?;

        let calls = remote.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![clone_args(Path::new("/srv/backup.20230101000000"), &spec.dest)]
        );

        let lines = log_lines(&remote.log)?;
        assert_eq!(lines.len(), 2, "{:?}", lines);
        assert_eq!(lines[0], "clone");
        assert!(lines[1].starts_with("mirror -e ssh -p 2222 -v -a --delete "), "{}", lines[1]);
        assert!(!lines[1].contains("--link-dest"));
        assert!(lines[1].ends_with(" . alice@nas:/srv/backup.20230102000000"), "{}", lines[1]);
        Ok(())
    }

    #[tokio::test]
    async fn test_remote_failed_clone_skips_mirror() -> anyhow::Result<()> {
        let (root, remote, mirror) = remote_fixture(true)?;
        let engine = RsyncEngine::remote(mirror, "ssh", remote.clone(), false);

        let spec = remote_spec(root.path(), Some("/srv/backup.20230101000000"));
        let err = engine.transfer(&spec).await.unwrap_err();
        assert!(err.to_string().contains("cp --preserve=all"), "{}", err);
        assert_eq!(log_lines(&remote.log)?, vec!["clone"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_remote_full_copy_does_not_clone() -> anyhow::Result<()> {
        let (root, remote, mirror) = remote_fixture(false)?;
        let engine = RsyncEngine::remote(mirror, "ssh", remote.clone(), false);

        engine.transfer(&remote_spec(root.path(), None)).await?;

        assert!(remote.calls.lock().unwrap().is_empty());
        let lines = log_lines(&remote.log)?;
        assert_eq!(lines.len(), 1, "{:?}", lines);
        assert!(lines[0].starts_with("mirror -e ssh -v -a --exclude-from="), "{}", lines[0]);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_mirror_is_fatal() -> anyhow::Result<()> {
        let root = fixture()?;
        let engine = RsyncEngine::local("false", false);
        assert!(engine.transfer(&spec(root.path(), None)).await.is_err());
        Ok(())
    }
}
