use std::io::{self, Write};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::fmt::MakeWriter;

/// Bar resolution; fractional progress is scaled to this length
const PROGRESS_SCALE: u64 = 1000;

fn fetch_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {msg}\n[{elapsed_precise}] [{bar:40.green/white}] {percent}%")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

#[derive(Clone)]
pub struct ProgressManager {
    multi: MultiProgress,
    disabled: bool,
}

impl ProgressManager {
    pub fn new(multi: MultiProgress) -> Self {
        Self {
            multi,
            disabled: false,
        }
    }

    pub fn new_disabled(multi: MultiProgress) -> Self {
        Self {
            multi,
            disabled: true,
        }
    }

    /// Bar tracking one URL
    pub fn add(&self, url: &str) -> FetchBar {
        if self.disabled {
            return FetchBar(ProgressBar::hidden());
        }

        let bar = self.multi.add(ProgressBar::new(PROGRESS_SCALE));
        bar.set_style(fetch_style());
        bar.set_message(format!("Fetching {url}"));
        FetchBar(bar)
    }

    /// Log writer that keeps log lines from tearing through the bars
    pub fn log_writer(&self) -> LogWriter {
        LogWriter {
            multi: self.multi.clone(),
        }
    }
}

pub struct FetchBar(ProgressBar);

impl FetchBar {
    pub fn set_fraction(&self, fraction: f32) {
        let position = (fraction.clamp(0.0, 1.0) as f64 * PROGRESS_SCALE as f64) as u64;
        self.0.set_position(position);
    }

    pub fn finish(&self, message: String) {
        self.0.finish_with_message(message);
    }

    pub fn abandon(&self, message: String) {
        self.0.abandon_with_message(message);
    }
}

/// Writes to stderr with every bar suspended
#[derive(Clone)]
pub struct LogWriter {
    multi: MultiProgress,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.multi.suspend(|| io::stderr().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
