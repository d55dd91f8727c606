use std::env;
use std::path::PathBuf;

/// Game client binary the user points us at after installation.
pub const CLIENT_EXECUTABLE: &str = "Client_Release.exe";

/// Where the official installer puts the game unless told otherwise.
pub const DEFAULT_GAME_INSTALL_DIR: &str = r"C:\VFUN\s4league";

const SETTINGS_FILE: &str = "settings.json";

/// Returns the root directory used by the patcher for its own state.
pub fn default_app_dir() -> PathBuf {
    let base = match env::consts::OS {
        "windows" => env::var_os("LOCALAPPDATA")
            .or_else(|| env::var_os("APPDATA"))
            .map(PathBuf::from),
        "macos" => env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join("Library").join("Application Support")),
        _ => env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join(".local").join("share")),
    }
    .unwrap_or_else(|| PathBuf::from("."));

    base.join("s4-patcher")
}

pub fn settings_path() -> PathBuf {
    default_app_dir().join(SETTINGS_FILE)
}

/// Staging folder for installer downloads. Survives restarts so reruns can skip valid files.
pub fn download_dir() -> PathBuf {
    env::temp_dir().join("S4LeagueInstaller")
}

pub fn client_path(install_dir: &std::path::Path) -> PathBuf {
    install_dir.join(CLIENT_EXECUTABLE)
}
