use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use slipstream_core::prelude::ShutdownListener;

/// Ticks a terminal progress bar from zero up to the run deadline.
///
/// The bar tracks wall-clock time rather than iterations because the deadline is the only
/// run-wide quantity known up front. On a drain it clears itself; on an abort it is left
/// on screen marked as aborted so the early stop is visible.
pub(crate) fn start_progress(deadline: Duration, listener: ShutdownListener) {
    let bar = ProgressBar::new(deadline.as_secs());
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/dim} {elapsed_precise} of {msg} {percent:>3}%")
            .expect("progress template is valid")
            .progress_chars("=> "),
    );
    bar.set_message(clock(deadline));

    let spawned = std::thread::Builder::new()
        .name("progress".to_string())
        .spawn(move || {
            let started = Instant::now();
            while !listener.should_stop() {
                bar.set_position(started.elapsed().as_secs().min(deadline.as_secs()));
                std::thread::sleep(Duration::from_millis(500));
            }
            if listener.is_aborted() {
                bar.abandon_with_message("aborted");
            } else {
                bar.finish_and_clear();
            }
        });
    if let Err(e) = spawned {
        log::warn!("Progress bar disabled, could not spawn its thread: {e}");
    }
}

fn clock(d: Duration) -> String {
    let secs = d.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    )
}
