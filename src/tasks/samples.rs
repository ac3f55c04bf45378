//! Demo bodies backing the example factory endpoints.
//!
//! [`CpuDemoBody`] models a serial CPU-bound job (`single` class): an
//! indeterminate warm-up, then steady determinate progress.
//! [`IoDemoBody`] models a parallel I/O job (`multiple` class) whose
//! progress is written to a file by the work and read back through
//! [`TaskBody::progress_hook`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TaskFailure;
use crate::tasks::body::{BodyRef, TaskBody};
use crate::tasks::control::TaskControl;

/// Serial demo task: warm-up, then 100 progress steps.
#[derive(Clone)]
pub struct CpuDemoBody {
    /// Display name shown as the heading once warm-up ends.
    pub name: String,
    /// Duration of the indeterminate warm-up phase.
    pub warmup: Duration,
    /// Delay between progress steps.
    pub step_delay: Duration,
}

impl Default for CpuDemoBody {
    fn default() -> Self {
        Self {
            name: "Example Task".to_string(),
            warmup: Duration::from_secs(3),
            step_delay: Duration::from_millis(100),
        }
    }
}

#[async_trait]
impl TaskBody for CpuDemoBody {
    fn kind(&self) -> &str {
        "CpuDemoTask"
    }

    fn semaphore(&self) -> &str {
        "single"
    }

    async fn run(&self, ctl: TaskControl, ctx: CancellationToken) -> Result<(), TaskFailure> {
        ctl.set_body("This is an example task. It runs for a while and updates progress as it goes.");
        ctl.set_heading("Starting up...");
        ctl.set_progress(-1);

        tokio::select! {
            _ = tokio::time::sleep(self.warmup) => {}
            _ = ctx.cancelled() => return Err(TaskFailure::cancelled()),
        }

        ctl.set_heading(&self.name);
        for step in 0..100 {
            if ctx.is_cancelled() {
                return Err(TaskFailure::cancelled());
            }
            ctl.set_progress(step);
            tokio::time::sleep(self.step_delay).await;
        }

        ctl.set_progress(100);
        ctl.set_body("Task completed successfully!");
        Ok(())
    }

    fn clone_body(&self) -> BodyRef {
        Arc::new(self.clone())
    }
}

/// Parallel demo task: writes progress to a file, reads it back in the hook.
#[derive(Clone)]
pub struct IoDemoBody {
    /// File the work writes its progress into.
    pub progress_path: PathBuf,
    /// Delay between progress writes.
    pub step_delay: Duration,
}

impl Default for IoDemoBody {
    fn default() -> Self {
        Self {
            progress_path: std::env::temp_dir().join("taskloom_progress.txt"),
            step_delay: Duration::from_millis(20),
        }
    }
}

#[async_trait]
impl TaskBody for IoDemoBody {
    fn kind(&self) -> &str {
        "IoDemoTask"
    }

    fn semaphore(&self) -> &str {
        "multiple"
    }

    fn progress_hook(&self, ctl: &TaskControl) {
        // Keep the current value when the file is missing or garbled.
        if let Ok(text) = std::fs::read_to_string(&self.progress_path) {
            if let Ok(value) = text.trim().parse::<i32>() {
                ctl.set_progress(value);
            }
        }
    }

    async fn run(&self, ctl: TaskControl, ctx: CancellationToken) -> Result<(), TaskFailure> {
        ctl.set_heading("Progress Hook Example Task");
        ctl.set_body("Progress is written to a file and read back through the progress hook.");

        let _ = tokio::fs::remove_file(&self.progress_path).await;

        for step in 0..100 {
            if ctx.is_cancelled() {
                let _ = tokio::fs::remove_file(&self.progress_path).await;
                return Err(TaskFailure::cancelled());
            }
            if let Err(e) = tokio::fs::write(&self.progress_path, step.to_string()).await {
                return Err(TaskFailure::new("IoError", e.to_string()));
            }
            tokio::time::sleep(self.step_delay).await;
        }

        let _ = tokio::fs::write(&self.progress_path, "100").await;
        ctl.set_progress(100);
        ctl.set_body("Task completed successfully!");

        let _ = tokio::fs::remove_file(&self.progress_path).await;
        Ok(())
    }

    fn clone_body(&self) -> BodyRef {
        Arc::new(self.clone())
    }
}
