use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::checksum;
use crate::engine::models::{FileEntry, Manifest};
use crate::env;
use crate::error::InstallError;
use crate::networking::ApiClient;
use crate::process::{ProcessLauncher, SystemLauncher};
use crate::progress::{InstallProgress, ProgressReporter, ProgressSnapshot};
use crate::prompt::{InstallPathPrompt, NoticeLevel, Notifier};
use crate::storage::SettingsStore;
use crate::transfer::{FileTransfer, HttpTransfer, TransferRequest};
use crate::util::CancelToken;

/// How long to wait when the installer could not be started.
pub const INSTALLER_FALLBACK_DELAY: Duration = Duration::from_secs(5);

const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Source of the file list for one run. `None` means the provider already told
/// the user what went wrong and there is nothing to do.
#[async_trait]
pub trait ManifestProvider: Send + Sync {
    async fn fetch_manifest(&self) -> Option<Manifest>;
}

/// Manifest from the patch server; failures become a user notice and `None`.
pub struct RemoteManifest {
    api: ApiClient,
    notifier: Arc<dyn Notifier>,
}

impl RemoteManifest {
    pub fn new(api: ApiClient, notifier: Arc<dyn Notifier>) -> Self {
        Self { api, notifier }
    }
}

#[async_trait]
impl ManifestProvider for RemoteManifest {
    async fn fetch_manifest(&self) -> Option<Manifest> {
        match self.api.fetch_manifest().await {
            Ok(manifest) => {
                info!(
                    "install: manifest version {} with {} files ({} bytes)",
                    manifest.version,
                    manifest.files.len(),
                    manifest.total_size
                );
                Some(manifest)
            }
            Err(err) => {
                error!("install: {err}");
                let notifier = Arc::clone(&self.notifier);
                let message = format!("Failed to fetch game manifest:\n{err}");
                // A dialog notifier blocks until dismissed.
                let shown = tokio::task::spawn_blocking(move || {
                    notifier.notify(NoticeLevel::Error, "Download Error", &message)
                })
                .await;
                if let Err(join_err) = shown {
                    warn!("install: notice task failed: {join_err}");
                }
                None
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstallPhase {
    Idle,
    FetchingManifest,
    Checking { index: usize, total: usize },
    Transferring { index: usize, total: usize },
    LaunchingInstaller,
    AwaitingInstallerExit,
    ResolvingInstallPath,
    Done,
    Cancelled,
    Failed,
}

impl fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallPhase::Idle => write!(f, "Idle"),
            InstallPhase::FetchingManifest => write!(f, "Fetching file list..."),
            InstallPhase::Checking { index, total } => {
                write!(f, "Checking file {index} of {total}...")
            }
            InstallPhase::Transferring { index, total } => {
                write!(f, "Downloading file {index} of {total}...")
            }
            InstallPhase::LaunchingInstaller => write!(f, "Starting installer..."),
            InstallPhase::AwaitingInstallerExit => write!(f, "Waiting for the installer to finish..."),
            InstallPhase::ResolvingInstallPath => write!(f, "Select the game install path"),
            InstallPhase::Done => write!(f, "Download completed successfully!"),
            InstallPhase::Cancelled => write!(f, "Download cancelled"),
            InstallPhase::Failed => write!(f, "Installation failed"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The manifest provider came back empty-handed.
    NothingToDo,
    /// Another run holds the installer; this call did nothing.
    AlreadyRunning,
    /// All files are in place and the manifest has no installer to run.
    Downloaded { transferred: usize, skipped: usize },
    /// The installer ran and the user picked the installed client.
    Installed { path: PathBuf },
}

#[derive(Clone, Debug)]
pub struct InstallerConfig {
    pub download_dir: PathBuf,
    pub installer_fallback_delay: Duration,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            download_dir: env::download_dir(),
            installer_fallback_delay: INSTALLER_FALLBACK_DELAY,
        }
    }
}

/// Collaborators the orchestrator drives.
pub struct InstallerParts {
    pub manifests: Arc<dyn ManifestProvider>,
    pub transfer: Arc<dyn FileTransfer>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub prompt: Arc<dyn InstallPathPrompt>,
    pub settings: SettingsStore,
}

/// Turns a manifest into verified files on disk, runs the bundled installer and
/// records where the game ended up.
///
/// One run at a time: a `run` issued while another is in flight returns
/// [`InstallOutcome::AlreadyRunning`] without touching anything.
pub struct Installer {
    config: InstallerConfig,
    parts: InstallerParts,
    running: AtomicBool,
    phase: watch::Sender<InstallPhase>,
}

struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct BatchStats {
    transferred: usize,
    skipped: usize,
}

impl Installer {
    pub fn new(config: InstallerConfig, parts: InstallerParts) -> Self {
        let (phase, _) = watch::channel(InstallPhase::Idle);
        Self {
            config,
            parts,
            running: AtomicBool::new(false),
            phase,
        }
    }

    /// Production wiring: manifest and files from the patch server, installer run as a real process.
    pub fn remote(
        config: InstallerConfig,
        api: ApiClient,
        settings: SettingsStore,
        notifier: Arc<dyn Notifier>,
        prompt: Arc<dyn InstallPathPrompt>,
    ) -> Self {
        Self::new(
            config,
            InstallerParts {
                manifests: Arc::new(RemoteManifest::new(api, notifier)),
                transfer: Arc::new(HttpTransfer::new()),
                launcher: Arc::new(SystemLauncher::new()),
                prompt,
                settings,
            },
        )
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<InstallPhase> {
        self.phase.subscribe()
    }

    pub fn download_dir(&self) -> &Path {
        &self.config.download_dir
    }

    pub async fn run(
        &self,
        cancel: &CancelToken,
        progress: Option<mpsc::Sender<InstallProgress>>,
    ) -> Result<InstallOutcome, InstallError> {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            warn!("install: run requested while another is active; ignoring");
            return Ok(InstallOutcome::AlreadyRunning);
        };

        let result = self.run_batch(cancel, progress).await;
        match &result {
            Ok(outcome) => {
                info!("install: finished with {outcome:?}");
                self.enter(InstallPhase::Done);
            }
            Err(err) if err.is_cancelled() => {
                warn!("install: cancelled");
                self.enter(InstallPhase::Cancelled);
            }
            Err(err) => {
                error!("install: {err}");
                self.enter(InstallPhase::Failed);
            }
        }
        result
    }

    async fn run_batch(
        &self,
        cancel: &CancelToken,
        progress: Option<mpsc::Sender<InstallProgress>>,
    ) -> Result<InstallOutcome, InstallError> {
        self.enter(InstallPhase::FetchingManifest);
        let Some(manifest) = self.parts.manifests.fetch_manifest().await else {
            info!("install: no manifest; nothing to do");
            return Ok(InstallOutcome::NothingToDo);
        };

        tokio::fs::create_dir_all(&self.config.download_dir)
            .await
            .map_err(|e| InstallError::io("create directory", &self.config.download_dir, e))?;

        let mut reporter = ProgressReporter::new(progress);
        let stats = self.fetch_files(&manifest, cancel, &mut reporter).await?;
        info!(
            "install: {}/{} files in place ({} transferred, {} already valid)",
            reporter.completed_files(),
            manifest.files.len(),
            stats.transferred,
            stats.skipped
        );

        let Some(installer) = manifest.installer() else {
            info!("install: manifest carries no installer");
            return Ok(InstallOutcome::Downloaded {
                transferred: stats.transferred,
                skipped: stats.skipped,
            });
        };
        let exe_path = self.config.download_dir.join(&installer.name);
        self.run_installer(&exe_path, cancel).await?;

        self.enter(InstallPhase::ResolvingInstallPath);
        let path = self.ask_install_path().await?;
        let recorded = path.display().to_string();
        self.parts
            .settings
            .update(|s| s.game_install_path = recorded)
            .await
            .map_err(InstallError::Settings)?;
        info!("install: game install path set to {}", path.display());
        Ok(InstallOutcome::Installed { path })
    }

    async fn fetch_files(
        &self,
        manifest: &Manifest,
        cancel: &CancelToken,
        reporter: &mut ProgressReporter,
    ) -> Result<BatchStats, InstallError> {
        let total = manifest.files.len();
        let mut stats = BatchStats::default();

        for (offset, entry) in manifest.files.iter().enumerate() {
            cancel.check()?;
            let index = offset + 1;
            let dest = self.destination(entry)?;
            let done = ProgressSnapshot {
                file_index: index,
                total_files: total,
                file_name: entry.name.clone(),
                percentage: 100.0,
            };

            self.enter(InstallPhase::Checking { index, total });
            if already_valid(&dest, entry).await? {
                debug!("install: {} is already valid; skipping", entry.name);
                reporter.report(&done);
                stats.skipped += 1;
                continue;
            }

            self.enter(InstallPhase::Transferring { index, total });
            let request = TransferRequest {
                url: manifest.file_url(entry),
                dest,
                file_index: index,
                total_files: total,
                display_name: entry.name.clone(),
                expected_checksum: entry.expected_checksum().map(str::to_owned),
            };
            {
                let mut sink = |snapshot: ProgressSnapshot| reporter.report(&snapshot);
                self.parts
                    .transfer
                    .transfer(&request, cancel, &mut sink)
                    .await?;
            }
            reporter.complete(&done);
            stats.transferred += 1;
        }
        Ok(stats)
    }

    async fn run_installer(&self, exe_path: &Path, cancel: &CancelToken) -> Result<(), InstallError> {
        self.enter(InstallPhase::LaunchingInstaller);
        match self.parts.launcher.spawn(exe_path) {
            Ok(mut handle) => {
                self.enter(InstallPhase::AwaitingInstallerExit);
                let code = handle.wait(cancel).await?;
                info!("install: installer exited with code {code:?}");
            }
            Err(err) => {
                warn!(
                    "install: {err}; waiting {:?} for an out-of-band install",
                    self.config.installer_fallback_delay
                );
                self.enter(InstallPhase::AwaitingInstallerExit);
                cancellable_sleep(self.config.installer_fallback_delay, cancel).await?;
            }
        }
        Ok(())
    }

    async fn ask_install_path(&self) -> Result<PathBuf, InstallError> {
        let prompt = Arc::clone(&self.parts.prompt);
        let answer = tokio::task::spawn_blocking(move || prompt.ask())
            .await
            .map_err(|e| InstallError::io("prompt for", "install path", std::io::Error::other(e)))?;
        answer.ok_or_else(|| {
            warn!("install: user declined to pick the install path");
            InstallError::UserDeclined
        })
    }

    fn destination(&self, entry: &FileEntry) -> Result<PathBuf, InstallError> {
        if !is_safe_relative(&entry.name) {
            return Err(InstallError::InvalidEntry {
                name: entry.name.clone(),
            });
        }
        Ok(self.config.download_dir.join(&entry.name))
    }

    fn enter(&self, phase: InstallPhase) {
        match phase {
            InstallPhase::Checking { .. } | InstallPhase::Transferring { .. } => {
                debug!("install: phase {phase:?}")
            }
            _ => info!("install: phase {phase:?}"),
        }
        self.phase.send_replace(phase);
    }
}

/// Existing file whose checksum matches the manifest; nothing to fetch.
async fn already_valid(dest: &Path, entry: &FileEntry) -> Result<bool, InstallError> {
    let Some(expected) = entry.expected_checksum() else {
        return Ok(false);
    };
    let exists = tokio::fs::try_exists(dest)
        .await
        .map_err(|e| InstallError::io("stat", dest, e))?;
    if !exists {
        return Ok(false);
    }
    let path = dest.to_path_buf();
    let expected = expected.to_owned();
    tokio::task::spawn_blocking(move || checksum::validate(&path, &expected))
        .await
        .map_err(|e| InstallError::io("hash", dest, std::io::Error::other(e)))?
        .map_err(|e| InstallError::io("hash", dest, e))
}

async fn cancellable_sleep(delay: Duration, cancel: &CancelToken) -> Result<(), InstallError> {
    let deadline = Instant::now() + delay;
    loop {
        cancel.check()?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        tokio::time::sleep((deadline - now).min(CANCEL_POLL)).await;
    }
}

fn is_safe_relative(name: &str) -> bool {
    if name.trim().is_empty() || name.starts_with('/') || name.starts_with('\\') {
        return false;
    }
    if name.split(['/', '\\']).any(|segment| segment == "..") {
        return false;
    }
    Path::new(name)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
