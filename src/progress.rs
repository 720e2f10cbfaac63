//! Document progress bars that stay pinned below log output
//!
//! Log lines are routed through the shared [`MultiProgress`] so they print above
//! the bars instead of tearing through them.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, Write};
use std::sync::OnceLock;
use tracing_subscriber::fmt::MakeWriter;

const LABEL_WIDTH: usize = 24;

static MULTI_PROGRESS: OnceLock<MultiProgress> = OnceLock::new();

fn multi_progress() -> &'static MultiProgress {
    MULTI_PROGRESS.get_or_init(|| {
        let mp = MultiProgress::new();
        mp.set_draw_target(ProgressDrawTarget::stderr_with_hz(10));
        mp
    })
}

/// Stop drawing bars, e.g. when stdout carries JSON
pub fn hide_progress() {
    multi_progress().set_draw_target(ProgressDrawTarget::hidden());
}

/// A 0..=100 percentage bar labelled with a file name
pub fn document_bar(filename: &str) -> ProgressBar {
    let style = ProgressStyle::with_template("{prefix:>24} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");

    let bar = multi_progress().add(ProgressBar::new(100));
    bar.set_style(style);
    bar.set_prefix(label(filename));
    bar
}

fn label(name: &str) -> String {
    if name.chars().count() <= LABEL_WIDTH {
        return name.to_string();
    }
    let head: String = name.chars().take(LABEL_WIDTH - 1).collect();
    format!("{}…", head)
}

/// `MakeWriter` for tracing-subscriber that prints through the progress bars
#[derive(Default, Clone)]
pub struct LogWriterFactory;

pub struct LogWriter {
    pending: String,
}

impl LogWriter {
    fn emit(line: &str) {
        let _ = multi_progress().println(line.trim_end_matches('\r'));
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.push_str(&String::from_utf8_lossy(buf));

        while let Some(idx) = self.pending.find('\n') {
            Self::emit(&self.pending[..idx]);
            self.pending.drain(..=idx);
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            Self::emit(&self.pending);
            self.pending.clear();
        }
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

impl<'a> MakeWriter<'a> for LogWriterFactory {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            pending: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_truncates_long_names() {
        assert_eq!(label("q3.pdf"), "q3.pdf");
        let long = "a-very-long-annual-report-name-2024.pdf";
        let cut = label(long);
        assert_eq!(cut.chars().count(), LABEL_WIDTH);
        assert!(cut.ends_with('…'));
    }

    #[test]
    fn test_writer_accepts_partial_lines() {
        hide_progress();
        let mut writer = LogWriterFactory.make_writer();
        writer.write_all(b"first half ").unwrap();
        assert_eq!(writer.pending, "first half ");
        writer.write_all(b"second half\nnext").unwrap();
        assert_eq!(writer.pending, "next");
        writer.flush().unwrap();
        assert!(writer.pending.is_empty());
    }
}
