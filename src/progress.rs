// ABOUTME: One-way progress notifications from the pipeline to the console
// ABOUTME: ProgressSink trait with an indicatif-backed console sink and a no-op sink

use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressStyle};

/// Something that happened inside the pipeline worth showing to a user.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    PhaseStarted {
        phase: &'static str,
        table: String,
    },
    TableCreated {
        table: String,
    },
    RowsExtracted {
        table: String,
        rows: usize,
    },
    BatchInserted {
        table: String,
        batch: usize,
        total: usize,
        rows: usize,
    },
    LoadFinished {
        table: String,
        rows: usize,
    },
    PollCycle {
        table: String,
        rows: usize,
        watermark: String,
    },
    PollFailed {
        table: String,
        error: String,
    },
    IngestComplete {
        table: String,
        rows: usize,
    },
}

/// Receives progress events. The pipeline never reads anything back.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, event: &ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn notify(&self, _event: &ProgressEvent) {}
}

/// Console renderer: status lines plus a progress bar while loading.
#[derive(Default)]
pub struct ConsoleProgress {
    bar: Mutex<Option<ProgressBar>>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn start_bar(&self, rows: usize) {
        let bar = ProgressBar::new(rows as u64);
        if let Ok(style) = ProgressStyle::with_template(
            "  {bar:40.cyan/blue} {pos}/{len} rows ({elapsed_precise}) {msg}",
        ) {
            bar.set_style(style.progress_chars("=> "));
        }
        if let Ok(mut slot) = self.bar.lock() {
            *slot = Some(bar);
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(slot) = self.bar.lock() {
            if let Some(bar) = slot.as_ref() {
                f(bar);
            }
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut slot) = self.bar.lock() {
            if let Some(bar) = slot.take() {
                bar.finish_and_clear();
            }
        }
    }
}

impl ProgressSink for ConsoleProgress {
    fn notify(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::PhaseStarted { phase, table } => {
                println!("→ {} ({})", phase, table);
            }
            ProgressEvent::TableCreated { table } => {
                println!("✓ Destination table {} is ready", table);
            }
            ProgressEvent::RowsExtracted { table, rows } => {
                println!("✓ Extracted {} rows from {}", rows, table);
                if *rows > 0 {
                    self.start_bar(*rows);
                }
            }
            ProgressEvent::BatchInserted {
                batch, total, rows, ..
            } => {
                self.with_bar(|bar| {
                    bar.inc(*rows as u64);
                    bar.set_message(format!("batch {}/{}", batch, total));
                });
            }
            ProgressEvent::LoadFinished { table, rows } => {
                self.finish_bar();
                println!("✓ Inserted {} rows into {}", rows, table);
            }
            ProgressEvent::PollCycle {
                table,
                rows,
                watermark,
            } => {
                if *rows > 0 {
                    println!(
                        "✓ Polled {} new rows from {} (watermark: {})",
                        rows, table, watermark
                    );
                }
            }
            ProgressEvent::PollFailed { table, error } => {
                self.finish_bar();
                eprintln!("⚠ Poll cycle for {} failed: {}", table, error);
            }
            ProgressEvent::IngestComplete { table, rows } => {
                println!("✓ Ingest of {} complete ({} rows)", table, rows);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Collects events for assertions.
    #[derive(Default)]
    pub(crate) struct RecordingProgress {
        pub events: Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressSink for RecordingProgress {
        fn notify(&self, event: &ProgressEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_console_progress_bar_lifecycle() {
        let progress = ConsoleProgress::new();
        progress.notify(&ProgressEvent::RowsExtracted {
            table: "users".to_string(),
            rows: 3,
        });
        assert!(progress.bar.lock().unwrap().is_some());

        progress.notify(&ProgressEvent::BatchInserted {
            table: "users".to_string(),
            batch: 1,
            total: 2,
            rows: 2,
        });
        let position = progress.bar.lock().unwrap().as_ref().map(|b| b.position());
        assert_eq!(position, Some(2));

        progress.notify(&ProgressEvent::LoadFinished {
            table: "users".to_string(),
            rows: 3,
        });
        assert!(progress.bar.lock().unwrap().is_none());
    }

    #[test]
    fn test_no_bar_for_empty_extract() {
        let progress = ConsoleProgress::new();
        progress.notify(&ProgressEvent::RowsExtracted {
            table: "users".to_string(),
            rows: 0,
        });
        assert!(progress.bar.lock().unwrap().is_none());
    }
}
