use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;

use crate::error::InstallError;

/// Cooperative cancellation flag shared between the UI and one installation run.
///
/// The run only reads it; any clone may raise it, any number of times.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            debug!("cancel token raised");
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Bail out with [`InstallError::Cancelled`] once the flag is raised.
    pub fn check(&self) -> Result<(), InstallError> {
        if self.is_cancelled() {
            return Err(InstallError::Cancelled);
        }
        Ok(())
    }
}

/// Percentage of a transfer, `downloaded * 100 / total`.
///
/// A missing or zero `Content-Length` counts as a total of one byte so the
/// value stays finite; the result is then meaningless but harmless.
#[must_use]
pub fn transfer_percent(downloaded: u64, total: Option<u64>) -> f64 {
    let total = total.filter(|t| *t > 0).unwrap_or(1);
    downloaded as f64 * 100.0 / total as f64
}

/// Whole-number percentage label, e.g. `"42%"`.
pub fn format_percent(value: f64) -> String {
    format!("{:.0}%", value.clamp(0.0, 100.0))
}
