use std::sync::Arc;
use std::time::Duration;

use eframe::egui::{self, Align, Color32, Frame, Layout, Margin, RichText, Stroke, Vec2};
use log::{error, info, warn};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::{Mutex, mpsc, watch};

use crate::engine::state::{AppState, UserAction};
use crate::engine::{AppConfig, CancelSlot, LauncherEngine};
use crate::installer::InstallPhase;
use crate::progress::InstallProgress;
use crate::util::format_percent;

const PROGRESS_BUFFER: usize = 64;
const BUSY_REPAINT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ThemePalette {
    bg: Color32,
    panel: Color32,
    surface: Color32,
    border: Color32,
    border_strong: Color32,
    text_primary: Color32,
    text_muted: Color32,
    accent: Color32,
    accent_soft: Color32,
    warning: Color32,
    danger: Color32,
}

impl ThemePalette {
    const fn dark() -> Self {
        Self {
            bg: Color32::from_rgb(11, 14, 19),
            panel: Color32::from_rgb(17, 22, 29),
            surface: Color32::from_rgb(24, 31, 39),
            border: Color32::from_rgb(45, 57, 72),
            border_strong: Color32::from_rgb(63, 79, 97),
            text_primary: Color32::from_rgb(228, 235, 244),
            text_muted: Color32::from_rgb(167, 182, 197),
            accent: Color32::from_rgb(92, 219, 195),
            accent_soft: Color32::from_rgb(63, 140, 125),
            warning: Color32::from_rgb(246, 195, 111),
            danger: Color32::from_rgb(239, 117, 117),
        }
    }
}

fn build_runtime() -> Arc<Runtime> {
    match Runtime::new() {
        Ok(rt) => Arc::new(rt),
        Err(err) => {
            warn!(
                "ui: failed to create multithreaded runtime ({}); trying single-threaded runtime",
                err
            );
            match Builder::new_current_thread().enable_all().build() {
                Ok(rt) => Arc::new(rt),
                Err(fallback_err) => {
                    error!(
                        "ui: failed to create any Tokio runtime ({}); terminating launcher",
                        fallback_err
                    );
                    std::process::exit(1);
                }
            }
        }
    }
}

fn section_frame(colors: &ThemePalette) -> Frame {
    Frame::new()
        .fill(colors.surface)
        .stroke(Stroke::new(1.0, colors.border))
        .corner_radius(14.0)
        .inner_margin(14.0)
}

fn primary_cta_button(
    label: impl Into<egui::WidgetText>,
    colors: &ThemePalette,
    min_width: f32,
) -> egui::Button<'_> {
    egui::Button::new(label)
        .fill(colors.accent_soft)
        .stroke(Stroke::new(1.0, colors.accent))
        .min_size(Vec2::new(min_width, 34.0))
}

fn secondary_button(label: impl Into<egui::WidgetText>, colors: &ThemePalette) -> egui::Button<'_> {
    egui::Button::new(label)
        .fill(colors.panel)
        .stroke(Stroke::new(1.0, colors.border_strong))
        .min_size(Vec2::new(110.0, 32.0))
}

fn apply_theme(ctx: &egui::Context, colors: &ThemePalette) {
    let mut visuals = egui::Visuals::dark();
    visuals.panel_fill = colors.bg;
    visuals.window_fill = visuals.panel_fill;
    visuals.override_text_color = Some(colors.text_primary);
    visuals.selection.bg_fill = colors.accent;
    visuals.widgets.inactive.bg_stroke = Stroke::new(1.0, colors.border);
    visuals.widgets.hovered.bg_stroke = Stroke::new(1.5, colors.accent);
    visuals.extreme_bg_color = colors.panel;
    ctx.set_visuals(visuals);
}

/// Download view bookkeeping, separate from `AppState` so it survives the
/// terminal state that ends a run.
#[derive(Default)]
struct DownloadView {
    open: bool,
    cancelling: bool,
    progress: Option<InstallProgress>,
}

pub struct LauncherApp {
    runtime: Arc<Runtime>,
    engine: Arc<Mutex<LauncherEngine>>,
    cancel: CancelSlot,
    updates_rx: mpsc::UnboundedReceiver<AppState>,
    updates_tx: mpsc::UnboundedSender<AppState>,
    progress_rx: mpsc::Receiver<InstallProgress>,
    phase_rx: watch::Receiver<InstallPhase>,
    state: AppState,
    download: DownloadView,
    username: String,
    password: String,
    colors: ThemePalette,
    launcher_version: &'static str,
}

impl LauncherApp {
    pub fn new(cc: &eframe::CreationContext<'_>, config: AppConfig) -> Self {
        let runtime = build_runtime();
        let colors = ThemePalette::dark();
        apply_theme(&cc.egui_ctx, &colors);

        let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_BUFFER);
        let engine = LauncherEngine::desktop(config, progress_tx);
        let cancel = engine.cancel_slot();
        let phase_rx = engine.phase_updates();
        let engine = Arc::new(Mutex::new(engine));
        let (tx, rx) = mpsc::unbounded_channel();

        let bootstrap_engine = engine.clone();
        let bootstrap_tx = tx.clone();
        runtime.spawn(async move {
            let mut locked = bootstrap_engine.lock().await;
            locked.bootstrap(&bootstrap_tx).await;
        });

        Self {
            runtime,
            engine,
            cancel,
            updates_rx: rx,
            updates_tx: tx,
            progress_rx,
            phase_rx,
            state: AppState::Initialising,
            download: DownloadView::default(),
            username: String::new(),
            password: String::new(),
            colors,
            launcher_version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Clicks while the engine is busy are dropped.
    fn trigger_action(&self, action: UserAction) {
        LauncherEngine::dispatch(
            &self.engine,
            self.runtime.handle(),
            action,
            self.updates_tx.clone(),
        );
    }

    /// Waits for the engine instead; used for the return-to-rest navigation.
    fn queue_refresh(&self) {
        let engine = self.engine.clone();
        let tx = self.updates_tx.clone();
        self.runtime.spawn(async move {
            let mut locked = engine.lock().await;
            locked.handle_action(UserAction::Refresh, &tx).await;
        });
    }

    fn sync_state(&mut self, ctx: &egui::Context) {
        while let Ok(state) = self.updates_rx.try_recv() {
            match &state {
                AppState::Installing => {
                    self.download = DownloadView {
                        open: true,
                        ..DownloadView::default()
                    };
                }
                AppState::LoggedOut { username, .. } => {
                    if self.username.is_empty() {
                        self.username = username.clone();
                    }
                }
                AppState::InstallFinished { .. } => {
                    if let Some(progress) = self.download.progress.as_mut() {
                        progress.file_percent = 100.0;
                        progress.overall_percent = 100.0;
                    }
                }
                AppState::Exit => {
                    info!("ui: closing launcher");
                    ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                }
                _ => {}
            }
            self.state = state;
        }
        while let Ok(progress) = self.progress_rx.try_recv() {
            self.download.progress = Some(progress);
        }
    }

    fn is_busy(&self) -> bool {
        matches!(
            self.state,
            AppState::Initialising | AppState::Working(_) | AppState::Installing
        )
    }

    fn render_install_choice(&mut self, ui: &mut egui::Ui) {
        let colors = self.colors;
        section_frame(&colors).show(ui, |ui| {
            ui.heading(RichText::new("Game Not Found").color(colors.warning));
            ui.add_space(6.0);
            ui.label("Game install path is not set.");
            ui.label("Do you want to download the game or select an existing folder?");
            ui.add_space(12.0);
            ui.horizontal(|ui| {
                let idle = !self.is_busy();
                if ui
                    .add_enabled(idle, primary_cta_button("Download", &colors, 120.0))
                    .clicked()
                {
                    self.trigger_action(UserAction::StartInstall);
                }
                ui.add_space(8.0);
                if ui
                    .add_enabled(idle, secondary_button("Select folder", &colors))
                    .clicked()
                {
                    self.trigger_action(UserAction::SelectInstallPath);
                }
                ui.add_space(8.0);
                if ui.add(secondary_button("Quit", &colors)).clicked() {
                    ui.ctx().send_viewport_cmd(egui::ViewportCommand::Close);
                }
            });
        });
    }

    fn render_login(&mut self, ui: &mut egui::Ui, session: bool) {
        let colors = self.colors;
        section_frame(&colors).show(ui, |ui| {
            ui.label(RichText::new("Username").color(colors.text_muted));
            ui.add(
                egui::TextEdit::singleline(&mut self.username)
                    .hint_text("VFUN ID")
                    .desired_width(f32::INFINITY),
            );
            ui.add_space(6.0);
            ui.label(RichText::new("Password").color(colors.text_muted));
            let hint = if session {
                "Saved session; leave empty"
            } else {
                "Password"
            };
            let password = ui.add(
                egui::TextEdit::singleline(&mut self.password)
                    .password(true)
                    .hint_text(hint)
                    .desired_width(f32::INFINITY),
            );
            let submitted =
                password.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));

            ui.add_space(12.0);
            let can_play = !self.username.trim().is_empty() && (session || !self.password.is_empty());
            ui.horizontal(|ui| {
                let play = primary_cta_button(RichText::new("Play").strong(), &colors, 120.0);
                if (ui.add_enabled(can_play, play).clicked() || (submitted && can_play))
                    && !self.is_busy()
                {
                    let action = UserAction::Play {
                        username: self.username.clone(),
                        password: std::mem::take(&mut self.password),
                    };
                    self.trigger_action(action);
                }
                ui.add_space(8.0);
                if session && ui.add(secondary_button("Log out", &colors)).clicked() {
                    self.trigger_action(UserAction::Logout);
                }
            });
        });

        ui.add_space(12.0);
        let idle = !self.is_busy();
        ui.horizontal(|ui| {
            if ui
                .add_enabled(idle, secondary_button("Repair game", &colors))
                .clicked()
            {
                self.trigger_action(UserAction::StartInstall);
            }
            ui.add_space(8.0);
            if ui
                .add_enabled(idle, secondary_button("Change folder", &colors))
                .clicked()
            {
                self.trigger_action(UserAction::SelectInstallPath);
            }
        });
    }

    fn download_status(&self) -> (String, Color32) {
        let colors = &self.colors;
        match &self.state {
            AppState::Installing if self.download.cancelling => {
                ("Cancelling download...".into(), colors.warning)
            }
            AppState::Installing => {
                let phase = *self.phase_rx.borrow();
                let text = match (phase, &self.download.progress) {
                    (InstallPhase::Transferring { .. }, Some(progress)) => {
                        format!("Downloading {}...", progress.file_name)
                    }
                    _ => phase.to_string(),
                };
                (text, colors.text_primary)
            }
            AppState::InstallFinished { .. } => {
                ("Download completed successfully!".into(), colors.accent)
            }
            AppState::Cancelled => ("Download cancelled".into(), colors.warning),
            AppState::Error(msg) => (msg.clone(), colors.danger),
            _ => ("Starting download...".into(), colors.text_muted),
        }
    }

    fn render_download(&mut self, ui: &mut egui::Ui) {
        let colors = self.colors;
        let (file_index, total_files, file_name, file_percent, overall_percent) =
            match &self.download.progress {
                Some(p) => (
                    p.file_index,
                    p.total_files,
                    p.file_name.clone(),
                    p.file_percent,
                    p.overall_percent,
                ),
                None => (0, 0, String::new(), 0.0, 0.0),
            };
        let (status, status_color) = self.download_status();

        section_frame(&colors).show(ui, |ui| {
            ui.horizontal(|ui| {
                ui.label(RichText::new(format!("File {file_index}")).strong());
                ui.label(RichText::new(format!("of {total_files}")).color(colors.text_muted));
            });
            ui.label(RichText::new(file_name).color(colors.text_muted));
            ui.add_space(6.0);
            ui.add(
                egui::ProgressBar::new((file_percent / 100.0) as f32)
                    .fill(colors.accent)
                    .desired_height(20.0)
                    .text(format_percent(file_percent)),
            );
            ui.add_space(10.0);
            ui.label(RichText::new("Total").color(colors.text_muted));
            ui.add(
                egui::ProgressBar::new((overall_percent / 100.0) as f32)
                    .fill(colors.accent_soft)
                    .desired_height(20.0)
                    .text(format_percent(overall_percent)),
            );
            ui.add_space(10.0);
            ui.colored_label(status_color, status);
            ui.add_space(10.0);

            let running = matches!(self.state, AppState::Installing);
            ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                if running {
                    let cancel = secondary_button("Cancel", &colors);
                    if ui.add_enabled(!self.download.cancelling, cancel).clicked() {
                        self.download.cancelling = true;
                        self.cancel.cancel();
                    }
                } else if ui.add(secondary_button("Close", &colors)).clicked() {
                    self.download = DownloadView::default();
                    self.queue_refresh();
                }
            });
        });
    }

    fn render_main(&mut self, ui: &mut egui::Ui) {
        if self.download.open {
            self.render_download(ui);
            return;
        }
        let colors = self.colors;
        match self.state.clone() {
            AppState::Initialising
            | AppState::Installing
            | AppState::InstallFinished { .. }
            | AppState::Cancelled
            | AppState::Exit => {
                ui.horizontal(|ui| {
                    ui.add(egui::Spinner::new());
                    ui.label("Loading...");
                });
            }
            AppState::NeedsInstallPath => self.render_install_choice(ui),
            AppState::LoggedOut { session, .. } => self.render_login(ui, session),
            AppState::Working(status) => {
                ui.horizontal(|ui| {
                    ui.add(egui::Spinner::new());
                    ui.label(status);
                });
            }
            AppState::Error(msg) => {
                section_frame(&colors).show(ui, |ui| {
                    ui.colored_label(colors.danger, msg);
                    ui.add_space(10.0);
                    if ui.add(secondary_button("Back", &colors)).clicked() {
                        self.queue_refresh();
                    }
                });
            }
        }
    }
}

impl eframe::App for LauncherApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.sync_state(ctx);
        let colors = self.colors;

        egui::TopBottomPanel::top("top_bar")
            .frame(
                Frame::new()
                    .fill(colors.panel)
                    .stroke(Stroke::new(1.0, colors.border))
                    .inner_margin(Margin::symmetric(16, 12)),
            )
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.heading(RichText::new("S4 League").color(colors.accent));
                    ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                        ui.label(
                            RichText::new(format!("v{}", self.launcher_version))
                                .color(colors.text_muted)
                                .small(),
                        );
                    });
                });
            });

        egui::CentralPanel::default()
            .frame(Frame::new().fill(colors.bg).inner_margin(Margin::symmetric(18, 16)))
            .show(ctx, |ui| self.render_main(ui));

        if self.is_busy() {
            ctx.request_repaint_after(BUSY_REPAINT);
        }
    }
}
