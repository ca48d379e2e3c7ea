//! `/etc/resolv.conf` management.
//!
//! [`ResolverConfigManager`] swaps the system nameservers with a
//! backup, write, verify, rollback protocol, restores the backup on
//! request, and hands the file back to `systemd-resolved`.
//!
//! All three mutating operations hold one mutex for their whole
//! duration, so at most one of them touches the resolver file at a time.

use crate::error::{Error, FileStep, ReleaseStep, Result};
use crate::resolver::executor::{ExecError, PrivilegedExecutor};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use atomicwrites::{AtomicFile, OverwriteBehavior};

/// System resolver file.
pub const DEFAULT_RESOLV_CONF: &str = "/etc/resolv.conf";

/// Backup written before every apply.
pub const DEFAULT_BACKUP: &str = "/etc/resolv.conf.bak";

/// Stub file managed by `systemd-resolved`.
pub const DEFAULT_STUB_RESOLV_CONF: &str = "/run/systemd/resolve/stub-resolv.conf";

/// Files the manager operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverPaths {
    /// The resolver file
    pub resolv: PathBuf,
    /// Where the resolver file is backed up
    pub backup: PathBuf,
    /// Link target used when handing control back to the system
    pub stub: PathBuf,
}

impl ResolverPaths {
    /// Create a custom set of paths.
    pub fn new(
        resolv: impl Into<PathBuf>,
        backup: impl Into<PathBuf>,
        stub: impl Into<PathBuf>,
    ) -> Self {
        Self {
            resolv: resolv.into(),
            backup: backup.into(),
            stub: stub.into(),
        }
    }

    /// `resolv.conf`, `resolv.conf.bak` and `stub-resolv.conf` inside `dir`
    /// (useful for testing).
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::new(
            dir.join("resolv.conf"),
            dir.join("resolv.conf.bak"),
            dir.join("stub-resolv.conf"),
        )
    }

    /// Records the content written by the last apply, next to the backup.
    ///
    /// Present only while an apply is outstanding.
    #[must_use]
    pub fn marker(&self) -> PathBuf {
        let mut marker = self.backup.clone().into_os_string();
        marker.push(".applied");
        PathBuf::from(marker)
    }
}

impl Default for ResolverPaths {
    fn default() -> Self {
        Self::new(DEFAULT_RESOLV_CONF, DEFAULT_BACKUP, DEFAULT_STUB_RESOLV_CONF)
    }
}

/// Lifecycle of the resolver file as seen by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigState {
    /// Not touched since start or restored from backup
    Unmodified,
    /// Backup taken, new content not yet written
    BackedUp,
    /// Custom nameservers written and verified
    Applied,
    /// A write failed and the backup was copied back
    RolledBack,
    /// A write failed and copying the backup back failed too
    RollbackFailed,
    /// Control handed back to the system resolver service
    Off,
}

impl fmt::Display for ConfigState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unmodified => write!(f, "unmodified"),
            Self::BackedUp => write!(f, "backed up"),
            Self::Applied => write!(f, "applied"),
            Self::RolledBack => write!(f, "rolled back"),
            Self::RollbackFailed => write!(f, "rollback failed"),
            Self::Off => write!(f, "off"),
        }
    }
}

/// Filesystem access used by the manager.
pub trait ResolverStore: Send + Sync {
    /// Read a whole file.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Replace a file's content.
    fn replace(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    /// Whether `path` resolves to an existing file.
    fn exists(&self, path: &Path) -> bool;

    /// Whether `path` itself is a symbolic link.
    fn is_link(&self, path: &Path) -> bool;

    /// Delete a file. A missing file is not an error.
    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Byte-for-byte copy.
    fn copy(&self, from: &Path, to: &Path) -> io::Result<()> {
        let data = self.read(from)?;
        self.replace(to, &data)
    }
}

/// [`ResolverStore`] backed by the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStore;

impl ResolverStore for FileStore {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    /// Written to a temporary file, synced and renamed into place, so a
    /// crash leaves either the old or the new content. A symlink at
    /// `path` is replaced by a regular file rather than written through.
    fn replace(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        if self.is_link(path) {
            tracing::debug!(path = %path.display(), "Replacing symlink with a regular file");
            fs::remove_file(path)?;
        }

        let file = AtomicFile::new(path, OverwriteBehavior::AllowOverwrite);
        match file.write(|f| f.write_all(contents)) {
            Ok(()) => Ok(()),
            Err(atomicwrites::Error::Internal(e)) if is_mount_point_error(&e) => {
                // Containers bind-mount resolv.conf; it cannot be renamed over
                tracing::debug!(path = %path.display(), error = %e, "Rewriting in place");
                write_in_place(path, contents)
            }
            Err(atomicwrites::Error::Internal(e) | atomicwrites::Error::User(e)) => Err(e),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_link(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// EBUSY or EXDEV from the final rename.
fn is_mount_point_error(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(16 | 18))
}

fn write_in_place(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

/// Commands that hand the resolver file back to the system service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRestorePlan {
    /// Removes the custom resolver file
    pub unlink: Vec<String>,
    /// Links the resolver file to the stub
    pub relink: Vec<String>,
    /// Restarts the resolver service
    pub restart: Vec<String>,
    /// Must exist before anything is removed
    pub link_target: PathBuf,
}

impl LinkRestorePlan {
    /// `systemd-resolved`: link to the stub file and restart the service.
    #[must_use]
    pub fn systemd(paths: &ResolverPaths) -> Self {
        let resolv = paths.resolv.display().to_string();
        let stub = paths.stub.display().to_string();
        Self {
            unlink: vec!["rm".into(), "-f".into(), resolv.clone()],
            relink: vec!["ln".into(), "-rsf".into(), stub, resolv],
            restart: vec![
                "systemctl".into(),
                "restart".into(),
                "systemd-resolved".into(),
            ],
            link_target: paths.stub.clone(),
        }
    }

    /// The three steps in execution order.
    #[must_use]
    pub fn steps(&self) -> [(ReleaseStep, &[String]); 3] {
        [
            (ReleaseStep::Unlink, self.unlink.as_slice()),
            (ReleaseStep::Relink, self.relink.as_slice()),
            (ReleaseStep::ServiceRestart, self.restart.as_slice()),
        ]
    }
}

/// Snapshot of the resolver configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ResolverStatus {
    /// Manager state
    pub state: ConfigState,
    /// Nameservers currently listed in the resolver file
    pub nameservers: Vec<String>,
    /// Whether a backup file exists
    pub backup_present: bool,
    /// Whether the resolver file is a symlink (service-managed)
    pub linked: bool,
}

/// Owns every mutation of the resolver file.
///
/// # Example
///
/// ```ignore
/// let manager = ResolverConfigManager::new(ResolverPaths::default(), SystemExecutor::default());
/// manager.apply(&["1.1.1.1", "1.0.0.1"])?;
/// // ...
/// manager.restore()?;
/// ```
pub struct ResolverConfigManager {
    paths: ResolverPaths,
    plan: LinkRestorePlan,
    executor: Box<dyn PrivilegedExecutor>,
    store: Box<dyn ResolverStore>,
    state: Mutex<ConfigState>,
}

impl ResolverConfigManager {
    /// Create a manager using the real filesystem and the systemd plan.
    pub fn new(paths: ResolverPaths, executor: impl PrivilegedExecutor + 'static) -> Self {
        Self {
            plan: LinkRestorePlan::systemd(&paths),
            paths,
            executor: Box::new(executor),
            store: Box::new(FileStore),
            state: Mutex::new(ConfigState::Unmodified),
        }
    }

    /// Use a different filesystem implementation.
    #[must_use]
    pub fn with_store(mut self, store: impl ResolverStore + 'static) -> Self {
        self.store = Box::new(store);
        self
    }

    /// Use a different release plan.
    #[must_use]
    pub fn with_plan(mut self, plan: LinkRestorePlan) -> Self {
        self.plan = plan;
        self
    }

    /// Paths this manager operates on.
    #[must_use]
    pub fn paths(&self) -> &ResolverPaths {
        &self.paths
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConfigState {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, ConfigState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Infer the state left behind by an earlier process.
    ///
    /// An earlier apply that was never undone leaves its
    /// [marker](ResolverPaths::marker) behind. If the resolver file still
    /// holds exactly what that apply wrote and the backup is present, the
    /// state becomes [`ConfigState::Applied`]. A file rewritten since then
    /// belongs to someone else and leaves the state alone.
    pub fn recover_state(&self) -> ConfigState {
        let mut state = self.lock();
        let (resolv, marker) = (&self.paths.resolv, self.paths.marker());

        if *state == ConfigState::Unmodified
            && self.store.exists(&marker)
            && self.store.exists(&self.paths.backup)
            && !self.store.is_link(resolv)
        {
            match (self.store.read(resolv), self.store.read(&marker)) {
                (Ok(current), Ok(applied)) if current == applied => {
                    tracing::info!(
                        backup = %self.paths.backup.display(),
                        "Resolver file holds nameservers from an earlier apply"
                    );
                    *state = ConfigState::Applied;
                }
                _ => tracing::debug!(
                    path = %resolv.display(),
                    "Resolver file changed since the last apply"
                ),
            }
        }
        *state
    }

    /// Point the resolver file at `addresses`, in order.
    ///
    /// Backs up the current file, writes one `nameserver` line per
    /// address and reads it back. If writing or verification fails the
    /// backup is copied back and the original error is returned.
    ///
    /// # Errors
    ///
    /// - [`Error::State`] if a previous apply has not been undone, or its
    ///   rollback failed and the file still needs a [`restore`](Self::restore)
    /// - [`Error::Config`] / [`Error::Parse`] for an empty or invalid address list
    /// - [`Error::ResolverFile`] naming the failed step
    pub fn apply<S: AsRef<str>>(&self, addresses: &[S]) -> Result<()> {
        let mut state = self.lock();
        if matches!(*state, ConfigState::Applied | ConfigState::RollbackFailed) {
            return Err(Error::State {
                operation: "apply",
                state: *state,
            });
        }

        let contents = render_nameservers(addresses)?;
        let (resolv, backup) = (&self.paths.resolv, &self.paths.backup);

        let original = self
            .store
            .read(resolv)
            .map_err(|e| Error::file(FileStep::Backup, resolv, e))?;
        self.store
            .replace(backup, &original)
            .map_err(|e| Error::file(FileStep::Backup, backup, e))?;
        *state = ConfigState::BackedUp;
        tracing::debug!(backup = %backup.display(), "Backed up resolver file");

        if let Err(e) = self.write_verified(contents.as_bytes()) {
            tracing::warn!(error = %e, "Writing resolver file failed, rolling back");
            *state = match self.rollback() {
                Ok(()) => ConfigState::RolledBack,
                Err(rollback) => {
                    tracing::error!(
                        error = %rollback,
                        backup = %backup.display(),
                        "Rollback of resolver file failed, restore from backup required"
                    );
                    ConfigState::RollbackFailed
                }
            };
            return Err(e);
        }

        let marker = self.paths.marker();
        if let Err(e) = self.store.replace(&marker, contents.as_bytes()) {
            tracing::warn!(path = %marker.display(), error = %e, "Could not record apply");
        }
        *state = ConfigState::Applied;
        let nameservers: Vec<&str> = addresses.iter().map(|a| a.as_ref()).collect();
        tracing::info!(path = %resolv.display(), ?nameservers, "Applied nameservers");
        Ok(())
    }

    fn write_verified(&self, contents: &[u8]) -> Result<()> {
        let resolv = &self.paths.resolv;
        self.store
            .replace(resolv, contents)
            .map_err(|e| Error::file(FileStep::Write, resolv, e))?;

        let written = self
            .store
            .read(resolv)
            .map_err(|e| Error::file(FileStep::Verify, resolv, e))?;
        if written != contents {
            return Err(Error::file(
                FileStep::Verify,
                resolv,
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    "content read back differs from what was written",
                ),
            ));
        }
        Ok(())
    }

    fn rollback(&self) -> io::Result<()> {
        self.store.copy(&self.paths.backup, &self.paths.resolv)?;
        tracing::info!("Restored resolver file from backup");
        Ok(())
    }

    fn clear_marker(&self) {
        let marker = self.paths.marker();
        if let Err(e) = self.store.remove(&marker) {
            tracing::warn!(path = %marker.display(), error = %e, "Could not clear apply record");
        }
    }

    /// Copy the backup back over the resolver file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResolverFile`] with [`FileStep::Restore`] if there is
    /// no backup or it cannot be copied.
    pub fn restore(&self) -> Result<()> {
        let mut state = self.lock();
        let backup = &self.paths.backup;

        if !self.store.exists(backup) {
            return Err(Error::file(
                FileStep::Restore,
                backup,
                io::Error::new(io::ErrorKind::NotFound, "no backup to restore"),
            ));
        }

        self.store
            .copy(backup, &self.paths.resolv)
            .map_err(|e| Error::file(FileStep::Restore, &self.paths.resolv, e))?;

        self.clear_marker();
        *state = ConfigState::Unmodified;
        tracing::info!(from = %backup.display(), "Restored resolver file");
        Ok(())
    }

    /// Hand the resolver file back to the system resolver service.
    ///
    /// Nothing is rolled back if a step fails.
    ///
    /// # Errors
    ///
    /// [`Error::Privilege`] when elevation is unavailable or refused,
    /// [`Error::Process`] when a command is missing or fails, or when the
    /// link target does not exist. Both name the failed [`ReleaseStep`].
    pub fn release(&self) -> Result<()> {
        let mut state = self.lock();

        if !self.store.exists(&self.plan.link_target) {
            return Err(Error::Process {
                step: ReleaseStep::Relink,
                reason: format!(
                    "link target {} does not exist",
                    self.plan.link_target.display()
                ),
            });
        }

        for (step, argv) in self.plan.steps() {
            tracing::debug!(%step, command = %argv.join(" "), "Running release step");
            self.executor
                .run(argv)
                .map_err(|e| release_error(step, e))?;
        }

        self.clear_marker();
        *state = ConfigState::Off;
        tracing::info!(target = %self.plan.link_target.display(), "Released resolver file to system service");
        Ok(())
    }

    /// Current state and the nameservers listed in the resolver file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResolverFile`] if the resolver file cannot be read.
    pub fn status(&self) -> Result<ResolverStatus> {
        let state = self.lock();
        let resolv = &self.paths.resolv;
        let content = self
            .store
            .read(resolv)
            .map_err(|e| Error::file(FileStep::Verify, resolv, e))?;

        Ok(ResolverStatus {
            state: *state,
            nameservers: read_nameservers(&String::from_utf8_lossy(&content)),
            backup_present: self.store.exists(&self.paths.backup),
            linked: self.store.is_link(resolv),
        })
    }
}

fn release_error(step: ReleaseStep, err: ExecError) -> Error {
    tracing::error!(%step, error = %err, "Release step failed");
    if err.is_privilege() {
        Error::Privilege {
            step,
            reason: err.to_string(),
        }
    } else {
        Error::Process {
            step,
            reason: err.to_string(),
        }
    }
}

/// Render one `nameserver` line per address.
///
/// # Errors
///
/// Returns [`Error::Config`] for an empty list and [`Error::Parse`] for
/// anything that is not an IP address.
pub fn render_nameservers<S: AsRef<str>>(addresses: &[S]) -> Result<String> {
    if addresses.is_empty() {
        return Err(Error::config("no nameserver addresses given"));
    }

    let mut out = String::new();
    for addr in addresses {
        let addr = addr.as_ref().trim();
        let ip: IpAddr = addr
            .parse()
            .map_err(|_| Error::parse(format!("invalid nameserver address: '{addr}'")))?;
        out.push_str(&format!("nameserver {ip}\n"));
    }
    Ok(out)
}

/// Nameserver addresses listed in resolver file content.
#[must_use]
pub fn read_nameservers(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("nameserver"))
        .filter(|rest| rest.starts_with(char::is_whitespace))
        .filter_map(|rest| rest.split_whitespace().next())
        .map(str::to_string)
        .collect()
}
