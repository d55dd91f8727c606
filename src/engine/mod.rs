use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};
use tokio::runtime::Handle;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::task::JoinHandle;

use crate::account::AccountService;
use crate::engine::state::{AppState, UserAction};
use crate::env;
use crate::error::InstallError;
use crate::installer::{InstallOutcome, InstallPhase, Installer, InstallerConfig};
use crate::networking::{ApiClient, Endpoints};
use crate::process::SystemLauncher;
use crate::progress::InstallProgress;
use crate::prompt::{DialogNotifier, DialogPathPrompt, NoticeLevel, Notifier};
use crate::storage::SettingsStore;
use crate::util::CancelToken;

pub mod models;
pub mod state;

const MAINTENANCE_MESSAGE: &str =
    "The game is currently in maintenance mode. Please try again later.";

/// Cancellation handle the UI keeps while the engine is busy.
///
/// Every installation run gets a fresh token; `cancel` raises whichever one is current.
#[derive(Clone, Default)]
pub struct CancelSlot(Arc<Mutex<CancelToken>>);

impl CancelSlot {
    fn arm(&self) -> CancelToken {
        let token = CancelToken::new();
        *self.0.lock().unwrap_or_else(|p| p.into_inner()) = token.clone();
        token
    }

    pub fn cancel(&self) {
        warn!("action: cancel requested");
        self.0.lock().unwrap_or_else(|p| p.into_inner()).cancel();
    }
}

/// Everything the host needs to wire the engine, adjustable from the command line.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub endpoints: Endpoints,
    pub installer: InstallerConfig,
    pub settings_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            installer: InstallerConfig::default(),
            settings_path: env::settings_path(),
        }
    }
}

pub struct LauncherEngine {
    pub state: AppState,
    settings: SettingsStore,
    account: AccountService,
    installer: Arc<Installer>,
    launcher: SystemLauncher,
    notifier: Arc<dyn Notifier>,
    cancel: CancelSlot,
    progress_tx: mpsc::Sender<InstallProgress>,
}

impl LauncherEngine {
    pub fn new(
        settings: SettingsStore,
        account: AccountService,
        installer: Arc<Installer>,
        notifier: Arc<dyn Notifier>,
        progress_tx: mpsc::Sender<InstallProgress>,
    ) -> Self {
        Self {
            state: AppState::Initialising,
            settings,
            account,
            installer,
            launcher: SystemLauncher::new(),
            notifier,
            cancel: CancelSlot::default(),
            progress_tx,
        }
    }

    /// Engine for the windowed launcher: native dialogs for notices and the install-path prompt.
    pub fn desktop(config: AppConfig, progress_tx: mpsc::Sender<InstallProgress>) -> Self {
        let settings = SettingsStore::new(config.settings_path);
        let api = ApiClient::new(config.endpoints);
        let notifier: Arc<dyn Notifier> = Arc::new(DialogNotifier);
        let installer = Installer::remote(
            config.installer,
            api.clone(),
            settings.clone(),
            notifier.clone(),
            Arc::new(DialogPathPrompt),
        );
        let account = AccountService::new(api, settings.clone());
        Self::new(
            settings,
            account,
            Arc::new(installer),
            notifier,
            progress_tx,
        )
    }

    pub fn cancel_slot(&self) -> CancelSlot {
        self.cancel.clone()
    }

    pub fn phase_updates(&self) -> watch::Receiver<InstallPhase> {
        self.installer.subscribe_phase()
    }

    pub async fn bootstrap(&mut self, updates: &mpsc::UnboundedSender<AppState>) {
        info!("bootstrap: loading settings from {}", self.settings.path().display());
        if let Err(err) = self.settings.load().await {
            error!("bootstrap: {err}");
            self.publish(
                AppState::Error(format!("An error occurred during startup:\n{err}")),
                updates,
            );
            return;
        }
        let state = self.resting_state();
        self.publish(state, updates);
    }

    /// Run `action` on `runtime` if nothing else holds the engine.
    ///
    /// The lock is taken before this returns, so a second click that lands while an
    /// install (or any other action) is in flight is dropped instead of queueing.
    pub fn dispatch(
        engine: &Arc<AsyncMutex<Self>>,
        runtime: &Handle,
        action: UserAction,
        updates: mpsc::UnboundedSender<AppState>,
    ) -> Option<JoinHandle<()>> {
        let Ok(mut locked) = Arc::clone(engine).try_lock_owned() else {
            warn!("action: engine busy; ignoring request");
            return None;
        };
        Some(runtime.spawn(async move {
            locked.handle_action(action, &updates).await;
        }))
    }

    pub async fn handle_action(
        &mut self,
        action: UserAction,
        updates: &mpsc::UnboundedSender<AppState>,
    ) {
        match action {
            UserAction::Play { username, password } => {
                info!("action: Play as {}", username.trim());
                let state = match self.play(&username, &password, updates).await {
                    Ok(()) => AppState::Exit,
                    Err(err) => {
                        error!("play failed: {err}");
                        AppState::Error(err)
                    }
                };
                self.publish(state, updates);
            }
            UserAction::Logout => {
                info!("action: Logout");
                if let Err(err) = self.account.logout().await {
                    error!("logout failed: {err}");
                    self.publish(AppState::Error(err), updates);
                    return;
                }
                let state = self.resting_state();
                self.publish(state, updates);
            }
            UserAction::StartInstall => {
                info!("action: StartInstall");
                self.install(updates).await;
            }
            UserAction::SelectInstallPath => {
                info!("action: SelectInstallPath");
                self.select_install_path(updates).await;
            }
            UserAction::Refresh => {
                let state = self.resting_state();
                self.publish(state, updates);
            }
        }
    }

    async fn play(
        &mut self,
        username: &str,
        password: &str,
        updates: &mpsc::UnboundedSender<AppState>,
    ) -> Result<(), String> {
        self.publish(AppState::Working("Logging in...".into()), updates);
        self.account
            .login(username, password)
            .await
            .map_err(|e| format!("Login failed. {e}"))?;

        self.publish(
            AppState::Working("Login successful! Starting game...".into()),
            updates,
        );
        match self.account.member_info().await {
            Ok(member) => info!("play: signed in as {}", member.nick_name),
            Err(err) => warn!("play: {err}"),
        }

        if !self.account.can_play().await {
            self.notify(NoticeLevel::Warning, "Maintenance Mode", MAINTENANCE_MESSAGE)
                .await;
            return Err(MAINTENANCE_MESSAGE.into());
        }

        let code = self
            .account
            .auth_code()
            .await
            .map_err(|_| "Failed to retrieve authentication code.".to_string())?;
        let install_dir = self.settings.snapshot().game_install_path;
        self.launcher
            .launch_client(Path::new(&install_dir), &code)
            .map_err(|e| format!("Failed to start the game:\n{e}"))
    }

    async fn install(&mut self, updates: &mpsc::UnboundedSender<AppState>) {
        let token = self.cancel.arm();
        self.publish(AppState::Installing, updates);

        let state = match self
            .installer
            .run(&token, Some(self.progress_tx.clone()))
            .await
        {
            Ok(InstallOutcome::AlreadyRunning) => return,
            Ok(InstallOutcome::Installed { path }) => AppState::InstallFinished { path: Some(path) },
            Ok(InstallOutcome::Downloaded { .. }) => AppState::InstallFinished { path: None },
            Ok(InstallOutcome::NothingToDo) => {
                AppState::Error("Failed to fetch game manifest.".into())
            }
            Err(err) if err.is_cancelled() => AppState::Cancelled,
            Err(InstallError::UserDeclined) => {
                warn!("install: no game path selected; closing");
                AppState::Exit
            }
            Err(err) => AppState::Error(format!("Error: {err}")),
        };
        self.publish(state, updates);
    }

    async fn select_install_path(&mut self, updates: &mpsc::UnboundedSender<AppState>) {
        let first_run = self.state == AppState::NeedsInstallPath;
        let picked = tokio::task::spawn_blocking(DialogPathPrompt::pick_client_dir)
            .await
            .unwrap_or_else(|err| {
                error!("select path: dialog task failed: {err}");
                None
            });

        let Some(dir) = picked else {
            if first_run {
                warn!("select path: no install directory selected; closing");
                self.notify(
                    NoticeLevel::Info,
                    "Notice",
                    "No install directory selected. The application will now close.",
                )
                .await;
                self.publish(AppState::Exit, updates);
            }
            return;
        };

        let recorded = dir.display().to_string();
        match self.settings.update(|s| s.game_install_path = recorded).await {
            Ok(_) => {
                info!("select path: game install path set to {}", dir.display());
                let state = self.resting_state();
                self.publish(state, updates);
            }
            Err(err) => {
                error!("select path: {err}");
                self.publish(AppState::Error(err), updates);
            }
        }
    }

    /// Notices may block on a modal dialog, so they run off the async workers.
    async fn notify(&self, level: NoticeLevel, title: &'static str, message: &'static str) {
        let notifier = Arc::clone(&self.notifier);
        if let Err(err) =
            tokio::task::spawn_blocking(move || notifier.notify(level, title, message)).await
        {
            error!("notice: dialog task failed: {err}");
        }
    }

    fn resting_state(&self) -> AppState {
        let settings = self.settings.snapshot();
        if !settings.has_install_path() {
            return AppState::NeedsInstallPath;
        }
        AppState::LoggedOut {
            username: self.account.username(),
            session: self.account.is_logged_in(),
        }
    }

    fn publish(&mut self, state: AppState, updates: &mpsc::UnboundedSender<AppState>) {
        debug!("engine: state -> {state:?}");
        self.state = state.clone();
        updates.send(state).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::engine::models::Manifest;
    use crate::installer::{InstallerParts, ManifestProvider};
    use crate::prompt::{FixedPathPrompt, LogNotifier};
    use crate::transfer::HttpTransfer;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct StaticManifest(Option<Manifest>);

    #[async_trait]
    impl ManifestProvider for StaticManifest {
        async fn fetch_manifest(&self) -> Option<Manifest> {
            self.0.clone()
        }
    }

    /// Holds the run in FetchingManifest until released.
    #[derive(Default)]
    struct GatedManifest {
        fetches: AtomicUsize,
        release: Notify,
    }

    #[async_trait]
    impl ManifestProvider for GatedManifest {
        async fn fetch_manifest(&self) -> Option<Manifest> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            Some(Manifest::default())
        }
    }

    fn engine(
        dir: &Path,
        manifest: Option<Manifest>,
        answer: Option<&str>,
    ) -> (LauncherEngine, SettingsStore) {
        engine_with(dir, Arc::new(StaticManifest(manifest)), answer)
    }

    fn engine_with(
        dir: &Path,
        manifests: Arc<dyn ManifestProvider>,
        answer: Option<&str>,
    ) -> (LauncherEngine, SettingsStore) {
        let settings = SettingsStore::new(dir.join("settings.json"));
        // Nothing listens on the discard port; every API call fails fast.
        let unreachable = |path: &str| format!("http://127.0.0.1:9/{path}");
        let endpoints = Endpoints {
            manifest: unreachable("file.json"),
            login: unreachable("login"),
            member_info: unreachable("member_info"),
            auth_code: unreachable("make_auth_code"),
            maintenance: unreachable("maintenance"),
        };
        let account = AccountService::new(ApiClient::new(endpoints), settings.clone());
        let installer = Installer::new(
            InstallerConfig {
                download_dir: dir.join("staging"),
                ..InstallerConfig::default()
            },
            InstallerParts {
                manifests,
                transfer: Arc::new(HttpTransfer::new()),
                launcher: Arc::new(SystemLauncher::new()),
                prompt: Arc::new(FixedPathPrompt::new(answer.map(Into::into))),
                settings: settings.clone(),
            },
        );
        let (progress_tx, _progress_rx) = mpsc::channel(8);
        (
            LauncherEngine::new(
                settings.clone(),
                account,
                Arc::new(installer),
                Arc::new(LogNotifier),
                progress_tx,
            ),
            settings,
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<AppState>) -> Vec<AppState> {
        let mut states = Vec::new();
        while let Ok(state) = rx.try_recv() {
            states.push(state);
        }
        states
    }

    #[tokio::test]
    async fn bootstrap_without_path_asks_for_one() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _) = engine(dir.path(), None, None);
        let (tx, mut rx) = mpsc::unbounded_channel();

        engine.bootstrap(&tx).await;
        assert_eq!(drain(&mut rx), vec![AppState::NeedsInstallPath]);
    }

    #[tokio::test]
    async fn bootstrap_with_path_shows_login() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("settings.json"),
            r#"{"GameInstallPath":"/games/s4","Username":"bob"}"#,
        )
        .unwrap();
        let (mut engine, _) = engine(dir.path(), None, None);
        let (tx, mut rx) = mpsc::unbounded_channel();

        engine.bootstrap(&tx).await;
        assert_eq!(
            engine.state,
            AppState::LoggedOut {
                username: "bob".into(),
                session: false
            }
        );
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn corrupt_settings_surface_as_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("settings.json"), "{").unwrap();
        let (mut engine, _) = engine(dir.path(), None, None);
        let (tx, _rx) = mpsc::unbounded_channel();

        engine.bootstrap(&tx).await;
        assert!(matches!(engine.state, AppState::Error(_)));
    }

    #[tokio::test]
    async fn missing_manifest_ends_in_error() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _) = engine(dir.path(), None, None);
        let (tx, mut rx) = mpsc::unbounded_channel();

        engine.handle_action(UserAction::StartInstall, &tx).await;
        let states = drain(&mut rx);
        assert_eq!(states[0], AppState::Installing);
        assert!(matches!(states[1], AppState::Error(_)));
    }

    #[tokio::test]
    async fn empty_manifest_finishes_without_path() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _) = engine(dir.path(), Some(Manifest::default()), None);
        let (tx, _rx) = mpsc::unbounded_channel();

        engine.handle_action(UserAction::StartInstall, &tx).await;
        assert_eq!(engine.state, AppState::InstallFinished { path: None });
    }

    #[tokio::test]
    async fn second_install_while_busy_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let manifests = Arc::new(GatedManifest::default());
        let (engine, _) = engine_with(dir.path(), manifests.clone(), None);
        let engine = Arc::new(AsyncMutex::new(engine));
        let runtime = Handle::current();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first =
            LauncherEngine::dispatch(&engine, &runtime, UserAction::StartInstall, tx.clone())
                .unwrap();
        let second =
            LauncherEngine::dispatch(&engine, &runtime, UserAction::StartInstall, tx.clone());
        assert!(second.is_none());

        manifests.release.notify_one();
        first.await.unwrap();
        assert_eq!(manifests.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(
            drain(&mut rx),
            vec![
                AppState::Installing,
                AppState::InstallFinished { path: None }
            ]
        );

        // Once the run is over the engine takes new work again.
        let again = LauncherEngine::dispatch(&engine, &runtime, UserAction::Refresh, tx);
        again.unwrap().await.unwrap();
    }

    #[test]
    fn cancel_slot_targets_the_current_run() {
        let slot = CancelSlot::default();
        let first = slot.arm();
        slot.cancel();
        assert!(first.is_cancelled());

        let second = slot.arm();
        assert!(!second.is_cancelled());
        slot.cancel();
        assert!(second.is_cancelled());
    }

    #[tokio::test]
    async fn maintenance_failure_blocks_play() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, settings) = engine(dir.path(), None, None);
        settings
            .update(|s| {
                s.game_install_path = "/games/s4".into();
                s.username = "bob".into();
                s.auth_token = "tok".into();
                s.auth_token_expiry = chrono::Utc::now().timestamp() + 3600;
            })
            .await
            .unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();

        engine
            .handle_action(
                UserAction::Play {
                    username: "bob".into(),
                    password: String::new(),
                },
                &tx,
            )
            .await;
        assert_eq!(engine.state, AppState::Error(MAINTENANCE_MESSAGE.into()));
    }
}
