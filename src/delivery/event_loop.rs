//! Single-consumer delivery context.
//!
//! `EventLoopHandle` is the `Executor` side; `EventLoop` drains tasks in
//! submission order, either inside a tokio runtime, on a dedicated thread,
//! or manually via `run_pending`.

use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;

use super::{panic_message, Executor, Task};

pub fn event_loop() -> (EventLoopHandle, EventLoop) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventLoopHandle { tx }, EventLoop { rx })
}

/// Submits tasks to an `EventLoop`.
#[derive(Clone)]
pub struct EventLoopHandle {
    tx: mpsc::UnboundedSender<Task>,
}

impl Executor for EventLoopHandle {
    fn execute(&self, task: Task) {
        if self.tx.send(task).is_err() {
            tracing::warn!("delivery event loop closed, dropping task");
        }
    }
}

/// Runs submitted tasks one at a time. Ends when every handle is dropped.
pub struct EventLoop {
    rx: mpsc::UnboundedReceiver<Task>,
}

impl EventLoop {
    pub async fn run(mut self) {
        while let Some(task) = self.rx.recv().await {
            run_task(task);
        }
        tracing::debug!("delivery event loop finished");
    }

    /// Blocking variant of `run`. Must not be called from async context.
    pub fn run_blocking(mut self) {
        while let Some(task) = self.rx.blocking_recv() {
            run_task(task);
        }
        tracing::debug!("delivery event loop finished");
    }

    /// Run the loop on its own named thread.
    pub fn spawn_thread(self, name: impl Into<String>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(name.into())
            .spawn(move || self.run_blocking())
    }

    /// Run whatever is queued right now. Returns the number of tasks run.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            run_task(task);
            ran += 1;
        }
        ran
    }
}

fn run_task(task: Task) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
        tracing::error!(panic = %panic_message(&*panic), "delivery task panicked");
    }
}
