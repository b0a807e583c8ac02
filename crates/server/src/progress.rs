//! Terminal progress bars for uploads

use indicatif::{ProgressBar, ProgressStyle};
use s3gate_core::ProgressObserver;

/// Draws one progress bar per upload on stderr
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new(object: &str) -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(bar_style());
        bar.set_message(object.to_string());
        Self { bar }
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-")
}

impl ProgressObserver for BarProgress {
    fn on_progress(&self, transferred: u64, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(transferred);
    }

    fn on_finish(&self, succeeded: bool) {
        if succeeded {
            self.bar.finish();
        } else {
            self.bar.abandon_with_message("upload failed");
        }
    }
}
