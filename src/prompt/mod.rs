use std::path::{Path, PathBuf};

use log::{error, info, warn};
use rfd::{FileDialog, MessageButtons, MessageDialog, MessageLevel};

use crate::env::{CLIENT_EXECUTABLE, DEFAULT_GAME_INSTALL_DIR};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Tells the user about something they have to react to.
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NoticeLevel, title: &str, message: &str);
}

/// Asks the user where the game client lives.
///
/// Runs synchronously on the installer worker; blocking is fine there because
/// every transfer has already finished.
pub trait InstallPathPrompt: Send + Sync {
    /// Directory containing the client executable, or `None` if the user declined.
    fn ask(&self) -> Option<PathBuf>;
}

/// Native message boxes.
#[derive(Clone, Copy, Debug, Default)]
pub struct DialogNotifier;

impl Notifier for DialogNotifier {
    fn notify(&self, level: NoticeLevel, title: &str, message: &str) {
        log_notice(level, title, message);
        let level = match level {
            NoticeLevel::Info => MessageLevel::Info,
            NoticeLevel::Warning => MessageLevel::Warning,
            NoticeLevel::Error => MessageLevel::Error,
        };
        MessageDialog::new()
            .set_title(title)
            .set_description(message)
            .set_level(level)
            .set_buttons(MessageButtons::Ok)
            .show();
    }
}

/// Terminal runs have nobody to click a dialog; notices go to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, level: NoticeLevel, title: &str, message: &str) {
        log_notice(level, title, message);
    }
}

fn log_notice(level: NoticeLevel, title: &str, message: &str) {
    match level {
        NoticeLevel::Info => info!("notice: {title}: {message}"),
        NoticeLevel::Warning => warn!("notice: {title}: {message}"),
        NoticeLevel::Error => error!("notice: {title}: {message}"),
    }
}

/// File picker filtered to the game client executable.
#[derive(Clone, Copy, Debug, Default)]
pub struct DialogPathPrompt;

impl DialogPathPrompt {
    /// Show the picker without the lead-in notice; used from the startup screen.
    pub fn pick_client_dir() -> Option<PathBuf> {
        let mut dialog = FileDialog::new()
            .set_title("Select S4League Game Executable")
            .add_filter("S4Client Executable", &["exe"]);

        let default_dir = Path::new(DEFAULT_GAME_INSTALL_DIR);
        if default_dir.join(CLIENT_EXECUTABLE).is_file() {
            dialog = dialog
                .set_directory(default_dir)
                .set_file_name(CLIENT_EXECUTABLE);
        }

        let picked = dialog.pick_file()?;
        client_dir_of(&picked)
    }
}

impl InstallPathPrompt for DialogPathPrompt {
    fn ask(&self) -> Option<PathBuf> {
        DialogNotifier.notify(
            NoticeLevel::Info,
            "Notice",
            "Please select the game install path.",
        );
        let chosen = Self::pick_client_dir();
        if chosen.is_none() {
            DialogNotifier.notify(NoticeLevel::Info, "Notice", "Game path was not selected.");
        }
        chosen
    }
}

/// Answer decided up front, e.g. from `--game-path`.
#[derive(Clone, Debug, Default)]
pub struct FixedPathPrompt {
    answer: Option<PathBuf>,
}

impl FixedPathPrompt {
    pub fn new(answer: Option<PathBuf>) -> Self {
        Self { answer }
    }
}

impl InstallPathPrompt for FixedPathPrompt {
    fn ask(&self) -> Option<PathBuf> {
        match &self.answer {
            Some(path) => {
                info!("prompt: using preset game path {}", path.display());
                Some(path.clone())
            }
            None => {
                warn!("prompt: no game path supplied (use --game-path)");
                None
            }
        }
    }
}

fn client_dir_of(executable: &Path) -> Option<PathBuf> {
    executable
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_prompt_returns_its_answer() {
        let prompt = FixedPathPrompt::new(Some(PathBuf::from("/games/s4")));
        assert_eq!(prompt.ask(), Some(PathBuf::from("/games/s4")));
        assert_eq!(FixedPathPrompt::new(None).ask(), None);
    }

    #[test]
    fn client_dir_is_the_executables_parent() {
        let exe = Path::new("/games/s4").join(CLIENT_EXECUTABLE);
        assert_eq!(client_dir_of(&exe), Some(PathBuf::from("/games/s4")));
        assert_eq!(client_dir_of(Path::new(CLIENT_EXECUTABLE)), None);
    }
}
