use serde::Serialize;

use crate::error::WorkerError;
use crate::pipeline::{StageContext, StageMessage};

/// One delivery of a stage message to a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub task_id: String,
    pub attempt: u32,
    pub message: StageMessage,
}

impl Delivery {
    pub fn new(message: StageMessage) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            attempt: 1,
            message,
        }
    }

    /// The same task, one attempt later.
    pub fn redelivery(mut self) -> Self {
        self.attempt += 1;
        self
    }

    pub fn context(&self) -> StageContext {
        StageContext {
            job_id: self.message.job_id().to_string(),
            task_id: self.task_id.clone(),
            attempt: self.attempt,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueHealth {
    pub accepting: bool,
    pub active_workers: usize,
    pub active_tasks: usize,
    pub queued: usize,
}

impl QueueHealth {
    pub fn is_healthy(&self) -> bool {
        self.accepting && self.active_workers > 0
    }
}

pub trait TaskQueue: Send + Sync {
    /// Queues `message` as a new task and returns its task id.
    fn enqueue(&self, message: StageMessage) -> Result<String, WorkerError>;

    fn health(&self) -> QueueHealth;
}
