//! Spinner driven by processing state events.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use research_core::{EventKind, StateEvent, StateSnapshot};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Renders run progress until the run finishes or [`finish`](Self::finish)
/// is called.
pub(crate) struct RunProgress {
    spinner: ProgressBar,
    task: JoinHandle<()>,
}

impl RunProgress {
    pub(crate) fn attach(mut events: broadcast::Receiver<StateEvent>) -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));

        let task = tokio::spawn({
            let spinner = spinner.clone();
            async move {
                loop {
                    match events.recv().await {
                        Ok(event) => {
                            spinner.set_message(status_line(&event.snapshot));
                            if event.kind == EventKind::Finished {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        });

        Self { spinner, task }
    }

    pub(crate) async fn finish(mut self) {
        if tokio::time::timeout(Duration::from_millis(200), &mut self.task)
            .await
            .is_err()
        {
            self.task.abort();
        }
        self.spinner.finish_and_clear();
    }
}

/// `[4/9] Generating AI summaries: Summarizing: Issue 12`
pub(crate) fn status_line(snapshot: &StateSnapshot) -> String {
    let mut line = if snapshot.total_steps > 0 {
        format!(
            "[{}/{}] {}",
            snapshot.progress, snapshot.total_steps, snapshot.current_step
        )
    } else {
        snapshot.current_step.clone()
    };
    if let Some(last) = snapshot.logs.last() {
        if last.message != snapshot.current_step {
            line.push_str(": ");
            line.push_str(&last.message);
        }
    }
    line
}
