//! Task queue capture for asserting on emissions.

use std::sync::Mutex;

use hookwise_core::{tasks::TaskQueue, Result, Task};

/// Queue that records every enqueued task for later inspection.
#[derive(Debug, Default)]
pub struct RecordingQueue {
    tasks: Mutex<Vec<Task>>,
}

impl RecordingQueue {
    /// Creates an empty recording queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded tasks in emission order.
    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.lock().expect("queue mutex poisoned").clone()
    }

    /// Removes and returns all recorded tasks.
    pub fn drain(&self) -> Vec<Task> {
        std::mem::take(&mut *self.tasks.lock().expect("queue mutex poisoned"))
    }

    /// Number of recorded tasks with the given topic.
    pub fn count_topic(&self, topic: &str) -> usize {
        self.tasks().iter().filter(|t| t.topic() == topic).count()
    }
}

#[async_trait::async_trait]
impl TaskQueue for RecordingQueue {
    async fn enqueue(&self, task: Task) -> Result<()> {
        self.tasks.lock().expect("queue mutex poisoned").push(task);
        Ok(())
    }
}
