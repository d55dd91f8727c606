use std::path::PathBuf;

// The central source of truth for the UI.
#[derive(Clone, Debug, PartialEq)]
pub enum AppState {
    Initialising,
    /// No game folder recorded yet; offer download, folder selection or quit.
    NeedsInstallPath,
    /// Login form. `session` is true when a stored token lets Play skip the password.
    LoggedOut { username: String, session: bool },
    /// Login or launch in flight; the string is the status line.
    Working(String),
    /// An installation run is active; frames arrive on the progress channel.
    Installing,
    InstallFinished { path: Option<PathBuf> },
    Cancelled,
    Error(String),
    /// The launcher should close.
    Exit,
}

// Actions triggered by the user from the UI layer.
#[derive(Clone, Debug)]
pub enum UserAction {
    Play { username: String, password: String },
    Logout,
    StartInstall,
    SelectInstallPath,
    /// Go back to whatever the stored settings call for.
    Refresh,
}
