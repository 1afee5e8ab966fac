use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::error::Result;
use crate::queue::ChangeHandle;

/// Create a progress bar for bookmark processing
pub fn create_bookmark_progress_bar(total: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("static template")
            .progress_chars("=>-"),
    );
    pb.set_message(message.to_string());
    pb
}

/// Create a spinner for indeterminate operations
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .expect("static template"),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub fn finish_with_success(pb: &ProgressBar, message: &str) {
    pb.finish_with_message(format!("✅ {}", message));
}

pub fn finish_with_error(pb: &ProgressBar, message: &str) {
    pb.finish_with_message(format!("❌ {}", message));
}

/// Waits for a queued job behind a spinner.
pub async fn wait_for_job(handle: ChangeHandle, message: &str) -> Result<()> {
    let pb = create_spinner(message);
    let outcome = handle.wait().await;
    match &outcome {
        Ok(()) => finish_with_success(&pb, message),
        Err(e) => finish_with_error(&pb, &format!("{}: {}", message, e)),
    }
    outcome
}
