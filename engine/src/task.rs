use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::job::JobTracker;

/// Una tarea que terminó con error (o con panic) dentro de una acción.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailure {
    pub partition: usize,
    pub message: String,
}

/// Lo que ve una tarea mientras procesa su partición.
#[derive(Debug, Clone)]
pub(crate) struct TaskContext {
    partition: usize,
    job: Arc<JobTracker>,
}

impl TaskContext {
    pub fn new(partition: usize, job: Arc<JobTracker>) -> Self {
        Self { partition, job }
    }

    pub fn partition_index(&self) -> usize {
        self.partition
    }

    /// Registra un aviso no fatal en el job y lo manda al log.
    pub fn warn(&self, message: String) {
        warn!("job {} partición {}: {}", self.job.id(), self.partition, message);
        self.job.warn(message);
    }
}
