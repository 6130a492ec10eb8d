//! Progress reporting for long reconcile passes. Compiles to a no-op when the
//! `progress` feature is disabled.

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};
#[cfg(feature = "progress")]
use std::time::Duration;

/// Progress display for one phase of work; hidden unless requested
pub struct Progress {
    #[cfg(feature = "progress")]
    bar: Option<ProgressBar>,
}

impl Progress {
    pub fn hidden() -> Self {
        Self {
            #[cfg(feature = "progress")]
            bar: None,
        }
    }

    /// Spinner for phases of unknown length
    #[cfg_attr(not(feature = "progress"), allow(unused_variables))]
    pub fn spinner(visible: bool, message: &str) -> Self {
        #[cfg(feature = "progress")]
        if visible {
            let bar = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
                bar.set_style(style);
            }
            bar.set_message(message.to_string());
            bar.enable_steady_tick(Duration::from_millis(80));
            return Self { bar: Some(bar) };
        }
        Self::hidden()
    }

    /// Bar counting up to `len` items
    #[cfg_attr(not(feature = "progress"), allow(unused_variables))]
    pub fn bar(visible: bool, len: u64, message: &str) -> Self {
        #[cfg(feature = "progress")]
        if visible {
            let bar = ProgressBar::new(len);
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
            ) {
                bar.set_style(style.progress_chars("█▓▒░  "));
            }
            bar.set_message(message.to_string());
            bar.enable_steady_tick(Duration::from_millis(120));
            return Self { bar: Some(bar) };
        }
        Self::hidden()
    }

    #[cfg_attr(not(feature = "progress"), allow(unused_variables))]
    pub fn inc(&self, delta: u64) {
        #[cfg(feature = "progress")]
        if let Some(bar) = &self.bar {
            bar.inc(delta);
        }
    }

    #[cfg_attr(not(feature = "progress"), allow(unused_variables))]
    pub fn finish(&self, message: String) {
        #[cfg(feature = "progress")]
        if let Some(bar) = &self.bar {
            bar.finish_with_message(message);
        }
    }
}
