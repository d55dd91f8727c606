use std::path::PathBuf;

use clap::Parser;
use env_logger::Env;
use log::error;

mod account;
mod checksum;
mod engine;
mod env;
mod error;
mod headless;
mod installer;
mod networking;
mod process;
mod progress;
mod prompt;
mod storage;
mod transfer;
mod ui;
mod util;

use crate::engine::AppConfig;
use crate::installer::InstallOutcome;

#[derive(Parser, Debug)]
#[command(
    name = "S4 League Patcher",
    author,
    version,
    about = "Downloads, verifies and installs the S4 League client, then launches it"
)]
struct Cli {
    /// Print launcher version and exit without starting the UI.
    #[arg(long)]
    version_only: bool,
    /// Run the download and installer in the terminal instead of the launcher window.
    #[arg(long)]
    install: bool,
    /// Game folder to record once the installer finishes (answers the path prompt).
    #[arg(long, value_name = "DIR")]
    game_path: Option<PathBuf>,
    /// Override the manifest URL.
    #[arg(long, value_name = "URL")]
    manifest_url: Option<String>,
    /// Override the staging directory for downloaded files.
    #[arg(long, value_name = "DIR")]
    download_dir: Option<PathBuf>,
}

impl Cli {
    fn app_config(&self) -> AppConfig {
        let mut config = AppConfig::default();
        if let Some(url) = &self.manifest_url {
            config.endpoints.manifest = url.clone();
        }
        if let Some(dir) = &self.download_dir {
            config.installer.download_dir = dir.clone();
        }
        config
    }
}

fn main() -> eframe::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if cli.version_only {
        println!("S4 League Patcher {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = cli.app_config();
    if cli.install {
        match headless::run(config, cli.game_path) {
            Ok(InstallOutcome::Installed { path }) => {
                println!("Game installed at {}", path.display());
            }
            Ok(outcome) => println!("{outcome:?}"),
            Err(err) => {
                error!("install failed: {err}");
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let options = eframe::NativeOptions {
        viewport: eframe::egui::ViewportBuilder::default()
            .with_icon(default_icon())
            .with_inner_size(eframe::egui::vec2(520.0, 420.0)),
        ..Default::default()
    };
    eframe::run_native(
        "S4 League Patcher",
        options,
        Box::new(|cc| Ok(Box::new(ui::LauncherApp::new(cc, config)))),
    )
}

fn default_icon() -> eframe::egui::IconData {
    // Simple 2x2 icon: dark background with a teal accent.
    let rgba: Vec<u8> = vec![
        20, 24, 32, 255, 92, 219, 195, 255, //
        20, 24, 32, 255, 63, 140, 125, 255,
    ];
    eframe::egui::IconData {
        rgba,
        width: 2,
        height: 2,
    }
}
