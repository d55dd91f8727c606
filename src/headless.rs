use std::path::PathBuf;
use std::sync::Arc;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{info, warn};
use tokio::sync::mpsc;

use crate::engine::AppConfig;
use crate::installer::{InstallOutcome, Installer};
use crate::networking::ApiClient;
use crate::prompt::{FixedPathPrompt, LogNotifier};
use crate::storage::SettingsStore;
use crate::util::CancelToken;

const PROGRESS_BUFFER: usize = 64;

/// Run one installation in the terminal. Ctrl-C cancels the run.
pub fn run(config: AppConfig, game_path: Option<PathBuf>) -> Result<InstallOutcome, String> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("failed to start async runtime: {e}"))?;
    runtime.block_on(install(config, game_path))
}

async fn install(config: AppConfig, game_path: Option<PathBuf>) -> Result<InstallOutcome, String> {
    let settings = SettingsStore::new(config.settings_path);
    settings.load().await?;
    let installer = Arc::new(Installer::remote(
        config.installer,
        ApiClient::new(config.endpoints),
        settings,
        Arc::new(LogNotifier),
        Arc::new(FixedPathPrompt::new(game_path)),
    ));
    info!(
        "headless: staging files in {}",
        installer.download_dir().display()
    );

    let cancel = CancelToken::new();
    let (tx, mut rx) = mpsc::channel(PROGRESS_BUFFER);
    let run_handle = {
        let installer = installer.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { installer.run(&cancel, Some(tx)).await })
    };
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("headless: interrupted; cancelling");
                cancel.cancel();
            }
        })
    };

    let bars = MultiProgress::new();
    let style = ProgressStyle::with_template("{prefix:>6} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
        .map_err(|e| format!("invalid progress template: {e}"))?
        .progress_chars("=>-");
    let file_bar = bars.add(ProgressBar::new(100));
    file_bar.set_style(style.clone());
    file_bar.set_prefix("File");
    let total_bar = bars.add(ProgressBar::new(100));
    total_bar.set_style(style);
    total_bar.set_prefix("Total");

    let mut phase = installer.subscribe_phase();
    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(progress) = frame else { break };
                file_bar.set_position(progress.file_percent.round() as u64);
                file_bar.set_message(format!(
                    "{}/{} {}",
                    progress.file_index, progress.total_files, progress.file_name
                ));
                total_bar.set_position(progress.overall_percent.round() as u64);
            }
            Ok(()) = phase.changed() => {
                total_bar.set_message(phase.borrow_and_update().to_string());
            }
        }
    }

    let outcome = run_handle
        .await
        .map_err(|e| format!("install task failed: {e}"))?;
    interrupt.abort();
    match &outcome {
        Ok(_) => {
            file_bar.finish();
            total_bar.finish_with_message("done");
        }
        Err(_) => {
            file_bar.abandon();
            total_bar.abandon();
        }
    }
    outcome.map_err(|e| e.to_string())
}
