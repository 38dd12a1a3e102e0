use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

pub type JobId = String;

/// Cada acción (collect, count, ...) se ejecuta como un job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Accepted,
    Running,
    Failed,
    Cancelled,
    Succeeded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    /// Nombre de la acción que disparó el job, ej: "collect".
    pub name: String,
    pub status: JobStatus,

    /// -------- Métricas del job --------
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stages: u32,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub failed_tasks: u32,
    /// Registros que cruzaron alguna frontera de shuffle.
    pub shuffled_records: u64,

    /// Avisos no fatales (p.ej. cardinalidad de joins).
    pub warnings: Vec<String>,
}

impl JobInfo {
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(s), Some(f)) => Some((f - s).num_milliseconds()),
            _ => None,
        }
    }
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Estado vivo de un job mientras corre. Lo comparten el ejecutor y
/// las tareas (vía `TaskContext`).
#[derive(Debug)]
pub(crate) struct JobTracker {
    info: Mutex<JobInfo>,
}

impl JobTracker {
    pub fn new(name: &str) -> Self {
        Self {
            info: Mutex::new(JobInfo {
                id: Uuid::new_v4().to_string(),
                name: name.to_string(),
                status: JobStatus::Accepted,
                submitted_at: Utc::now(),
                started_at: None,
                finished_at: None,
                stages: 0,
                total_tasks: 0,
                completed_tasks: 0,
                failed_tasks: 0,
                shuffled_records: 0,
                warnings: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> JobId {
        lock(&self.info).id.clone()
    }

    pub fn start(&self) {
        let mut info = lock(&self.info);
        info.status = JobStatus::Running;
        info.started_at = Some(Utc::now());
    }

    pub fn stage_submitted(&self, tasks: usize) {
        let mut info = lock(&self.info);
        info.stages += 1;
        info.total_tasks += tasks as u32;
    }

    pub fn task_finished(&self, ok: bool) {
        let mut info = lock(&self.info);
        if ok {
            info.completed_tasks += 1;
        } else {
            info.failed_tasks += 1;
        }
    }

    pub fn add_shuffled(&self, records: usize) {
        lock(&self.info).shuffled_records += records as u64;
    }

    pub fn warn(&self, message: String) {
        lock(&self.info).warnings.push(message);
    }

    pub fn finish(&self, status: JobStatus) -> JobInfo {
        let mut info = lock(&self.info);
        info.status = status;
        info.finished_at = Some(Utc::now());
        info.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_acumula_metricas_del_job() {
        let t = JobTracker::new("collect");
        t.start();
        t.stage_submitted(3);
        t.task_finished(true);
        t.task_finished(true);
        t.task_finished(false);
        t.add_shuffled(10);
        t.warn("join sesgado".to_string());

        let info = t.finish(JobStatus::Failed);
        assert_eq!(info.name, "collect");
        assert_eq!(info.stages, 1);
        assert_eq!(info.total_tasks, 3);
        assert_eq!(info.completed_tasks, 2);
        assert_eq!(info.failed_tasks, 1);
        assert_eq!(info.shuffled_records, 10);
        assert_eq!(info.warnings.len(), 1);
        assert!(info.duration_ms().is_some());
    }

    #[test]
    fn job_status_se_serializa_en_mayusculas() {
        let s = serde_json::to_string(&JobStatus::Succeeded).unwrap();
        assert_eq!(s, "\"SUCCEEDED\"");
    }
}
