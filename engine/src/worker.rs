use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Instant,
};
use tokio::{
    runtime::{Builder, Handle, Runtime},
    sync::Semaphore,
};
use tracing::{debug, warn};

use crate::{
    error::{EngineError, Result},
    job::{lock, JobTracker},
    task::TaskFailure,
};

/// Trabajo de una partición: corre en un hilo de bloqueo del pool.
pub(crate) type TaskFn<R> = Box<dyn FnOnce() -> Result<R> + Send + 'static>;

/// Bandera compartida de cancelación. Se consulta al despachar cada
/// tarea; las que ya están corriendo terminan y su resultado se descarta.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct WorkerMetrics {
    pub max_concurrency: u32,
    pub active_tasks: u32,
    pub tasks_started: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub total_task_time_ms: u64,
    pub avg_task_ms: Option<f64>,
}

/// Pool acotado de workers.
/// - Un runtime tokio propio; cada tarea va a `spawn_blocking`.
/// - Un semáforo con `max_concurrency` permisos limita las tareas vivas.
/// - Los resultados vuelven en el orden de las particiones.
pub struct WorkerPool {
    runtime: Runtime,
    slots: Arc<Semaphore>,
    max_concurrency: usize,
    metrics: Arc<Mutex<WorkerMetrics>>,
}

impl WorkerPool {
    pub fn new(max_concurrency: usize) -> Result<Self> {
        if max_concurrency == 0 {
            return Err(EngineError::InvalidConfig(
                "el pool necesita al menos un worker".to_string(),
            ));
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(max_concurrency)
            .thread_name("minispark-worker")
            .build()
            .map_err(|e| EngineError::Runtime(e.to_string()))?;

        Ok(Self {
            runtime,
            slots: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            metrics: Arc::new(Mutex::new(WorkerMetrics {
                max_concurrency: max_concurrency as u32,
                ..WorkerMetrics::default()
            })),
        })
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn metrics(&self) -> WorkerMetrics {
        let mut m = lock(&self.metrics).clone();
        let finished = m.tasks_succeeded + m.tasks_failed;
        m.avg_task_ms = if finished > 0 {
            Some(m.total_task_time_ms as f64 / finished as f64)
        } else {
            None
        };
        m
    }

    /// Ejecuta una etapa: una tarea por partición. Los errores de todas
    /// las tareas se juntan en un único `ActionFailed`.
    pub(crate) fn run<R: Send + 'static>(
        &self,
        job: &Arc<JobTracker>,
        cancel: &CancelToken,
        tasks: Vec<TaskFn<R>>,
    ) -> Result<Vec<R>> {
        // Una acción lanzada desde dentro de una tarea (o de otro runtime)
        // bloquearía un hilo del runtime esperando permisos.
        if Handle::try_current().is_ok() {
            return Err(EngineError::Runtime(
                "no se pueden lanzar acciones desde un contexto async o desde una tarea"
                    .to_string(),
            ));
        }

        job.stage_submitted(tasks.len());
        self.runtime.block_on(self.dispatch(job, cancel, tasks))
    }

    async fn dispatch<R: Send + 'static>(
        &self,
        job: &Arc<JobTracker>,
        cancel: &CancelToken,
        tasks: Vec<TaskFn<R>>,
    ) -> Result<Vec<R>> {
        let total = tasks.len();
        let mut handles = Vec::with_capacity(total);
        let mut cancelled = false;

        for task in tasks {
            let permit = Arc::clone(&self.slots)
                .acquire_owned()
                .await
                .map_err(|e| EngineError::Runtime(e.to_string()))?;

            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            {
                let mut m = lock(&self.metrics);
                m.tasks_started += 1;
                m.active_tasks += 1;
            }

            let metrics = Arc::clone(&self.metrics);
            handles.push(tokio::task::spawn_blocking(move || {
                let started = Instant::now();
                let out = task();
                let elapsed = started.elapsed().as_millis() as u64;
                {
                    let mut m = lock(&metrics);
                    m.active_tasks = m.active_tasks.saturating_sub(1);
                    m.total_task_time_ms += elapsed;
                    if out.is_ok() {
                        m.tasks_succeeded += 1;
                    } else {
                        m.tasks_failed += 1;
                    }
                }
                // liberar el slot al terminar
                drop(permit);
                out
            }));
        }

        debug!("etapa despachada: {} de {} tareas", handles.len(), total);

        let mut results = Vec::with_capacity(handles.len());
        let mut failures = Vec::new();

        for (partition, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(Ok(value)) => {
                    job.task_finished(true);
                    results.push(value);
                }
                Ok(Err(e)) => {
                    job.task_finished(false);
                    warn!("error procesando partición {}: {}", partition, e);
                    failures.push(TaskFailure {
                        partition,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    job.task_finished(false);
                    {
                        let mut m = lock(&self.metrics);
                        m.active_tasks = m.active_tasks.saturating_sub(1);
                        m.tasks_failed += 1;
                    }
                    warn!("panic o join error en partición {}: {:?}", partition, e);
                    failures.push(TaskFailure {
                        partition,
                        message: format!("panic en la tarea: {e}"),
                    });
                }
            }
        }

        if cancelled {
            return Err(EngineError::Cancelled);
        }
        if !failures.is_empty() {
            return Err(EngineError::ActionFailed { total, failures });
        }
        Ok(results)
    }
}
