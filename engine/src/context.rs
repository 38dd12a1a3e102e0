use serde::Serialize;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};
use tracing::{info, warn};

use crate::{
    broadcast::{self, Broadcast},
    config::EngineConfig,
    dataset::{Data, Dataset, Key},
    error::{EngineError, Result},
    executor::Executor,
    job::{lock, JobInfo, JobStatus, JobTracker},
    partitioner::{check_partitions, hash_partition, PartitioningKind},
    plan::{boxed, loader_from_partitions, Batch, Node, Op},
    source::SourceAdapter,
    worker::{CancelToken, WorkerMetrics, WorkerPool},
};

const MAX_JOB_HISTORY: usize = 256;

/// Punto de entrada del engine: dueño del pool de workers, de la
/// configuración y del historial de jobs. Clonarlo es barato.
///
/// Las acciones bloquean el hilo que las llama; no se deben lanzar desde
/// un contexto async ni desde dentro de una transformación.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    config: EngineConfig,
    pool: WorkerPool,
    cancel: CancelToken,
    jobs: Mutex<VecDeque<JobInfo>>,
}

impl Context {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::new(config.max_workers)?;
        info!(
            "contexto '{}' listo: {} workers, {} particiones por defecto",
            config.app_name, config.max_workers, config.default_partitions
        );
        Ok(Self {
            inner: Arc::new(ContextInner {
                config,
                pool,
                cancel: CancelToken::new(),
                jobs: Mutex::new(VecDeque::new()),
            }),
        })
    }

    /// Configuración por defecto sobreescrita por las variables MINISPARK_*.
    pub fn from_env() -> Result<Self> {
        Self::new(EngineConfig::from_env())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn default_partitions(&self) -> usize {
        self.inner.config.default_partitions
    }

    /* =========================
       Fuentes
       ========================= */

    /// Reparte `data` en `num_partitions` trozos contiguos.
    pub fn parallelize<T: Data>(&self, data: Vec<T>, num_partitions: usize) -> Result<Dataset<T>> {
        check_partitions(num_partitions)?;
        let parts = slice_contiguous(data, num_partitions);
        Ok(self.in_memory("parallelize", parts, PartitioningKind::Contiguous))
    }

    /// Reparte `data` con una función de particionado propia.
    /// `partition_fn(registro, n)` debe devolver un índice menor que n.
    pub fn parallelize_with<T, F>(
        &self,
        data: Vec<T>,
        num_partitions: usize,
        partition_fn: F,
    ) -> Result<Dataset<T>>
    where
        T: Data,
        F: Fn(&T, usize) -> usize,
    {
        check_partitions(num_partitions)?;
        let mut parts: Vec<Vec<T>> = (0..num_partitions).map(|_| Vec::new()).collect();
        for rec in data {
            let idx = partition_fn(&rec, num_partitions);
            let part = parts.get_mut(idx).ok_or_else(|| {
                EngineError::PartitionCount(format!(
                    "la función de particionado devolvió {} con {} particiones",
                    idx, num_partitions
                ))
            })?;
            part.push(rec);
        }
        Ok(self.in_memory(
            "parallelize_with",
            parts,
            PartitioningKind::Custom("parallelize_with".to_string()),
        ))
    }

    /// Pares clave-valor repartidos con hash(clave) mod N.
    pub fn parallelize_pairs<K: Key, V: Data>(
        &self,
        data: Vec<(K, V)>,
        num_partitions: usize,
    ) -> Result<Dataset<(K, V)>> {
        check_partitions(num_partitions)?;
        let mut parts: Vec<Vec<(K, V)>> = (0..num_partitions).map(|_| Vec::new()).collect();
        for (k, v) in data {
            let idx = hash_partition(&k, num_partitions);
            parts[idx].push((k, v));
        }
        Ok(self.in_memory("parallelize_pairs", parts, PartitioningKind::Hash))
    }

    /// Colección con un layout de particiones explícito.
    pub fn from_partitions<T: Data>(&self, partitions: Vec<Vec<T>>) -> Result<Dataset<T>> {
        check_partitions(partitions.len())?;
        Ok(self.in_memory("from_partitions", partitions, PartitioningKind::Unknown))
    }

    pub fn read<T: Data, S: SourceAdapter<T>>(&self, source: &S, path: &str) -> Result<Dataset<T>> {
        source.read(self, path)
    }

    fn in_memory<T: Data>(
        &self,
        label: &str,
        parts: Vec<Vec<T>>,
        kind: PartitioningKind,
    ) -> Dataset<T> {
        let n = parts.len();
        let node = Node::new(
            label,
            n,
            Op::Source {
                load: loader_from_partitions(Arc::new(parts)),
            },
        );
        Dataset::from_node(self.clone(), node, kind)
    }

    /// Fuente perezosa: `load(i)` se ejecuta dentro de la tarea de la
    /// partición i (p.ej. leer el archivo i).
    pub(crate) fn lazy_source<T, F>(
        &self,
        label: &str,
        num_partitions: usize,
        kind: PartitioningKind,
        load: F,
    ) -> Result<Dataset<T>>
    where
        T: Data,
        F: Fn(usize) -> Result<Vec<T>> + Send + Sync + 'static,
    {
        check_partitions(num_partitions)?;
        let node = Node::new(
            label,
            num_partitions,
            Op::Source {
                load: Arc::new(move |i| Ok(boxed(load(i)?))),
            },
        );
        Ok(Dataset::from_node(self.clone(), node, kind))
    }

    /* =========================
       Broadcast
       ========================= */

    /// Crea un valor broadcast. Falla con `BroadcastSizeExceeded` si su
    /// tamaño serializado supera `broadcast_max_bytes`.
    pub fn broadcast<T: Serialize + Send + Sync + 'static>(&self, value: T) -> Result<Broadcast<T>> {
        let size = broadcast::measure(&value)?;
        self.broadcast_measured(value, size)
    }

    pub(crate) fn broadcast_measured<T>(&self, value: T, size: usize) -> Result<Broadcast<T>> {
        broadcast::check_size(size, self.inner.config.broadcast_max_bytes)?;
        let b = Broadcast::new(value, size);
        info!("broadcast {} creado ({} bytes)", b.id(), size);
        Ok(b)
    }

    /* =========================
       Cancelación y métricas
       ========================= */

    /// Las acciones en curso dejan de despachar tareas y las siguientes
    /// fallan con `Cancelled` hasta llamar a `reset_cancellation`.
    pub fn cancel(&self) {
        warn!("cancelación solicitada para '{}'", self.inner.config.app_name);
        self.inner.cancel.cancel();
    }

    pub fn reset_cancellation(&self) {
        self.inner.cancel.reset();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.inner.cancel.clone()
    }

    pub fn jobs(&self) -> Vec<JobInfo> {
        lock(&self.inner.jobs).iter().cloned().collect()
    }

    pub fn last_job(&self) -> Option<JobInfo> {
        lock(&self.inner.jobs).back().cloned()
    }

    pub fn worker_metrics(&self) -> WorkerMetrics {
        self.inner.pool.metrics()
    }

    /// Ejecuta una acción sobre el nodo y devuelve sus particiones.
    pub(crate) fn run_job(&self, name: &str, node: &Arc<Node>) -> Result<Vec<Batch>> {
        let tracker = Arc::new(JobTracker::new(name));
        let job_id = tracker.id();
        info!(
            "job {} ({}) aceptado sobre '{}' con {} particiones",
            job_id, name, node.label, node.num_partitions
        );

        tracker.start();
        let result =
            Executor::new(&self.inner.pool, Arc::clone(&tracker), &self.inner.cancel).execute(node);

        let status = match &result {
            Ok(_) => JobStatus::Succeeded,
            Err(EngineError::Cancelled) => JobStatus::Cancelled,
            Err(_) => JobStatus::Failed,
        };
        let info = tracker.finish(status);

        match &result {
            Ok(_) => info!(
                "job {} ({}) terminado: {} etapas, {} tareas, {} registros en shuffle",
                info.id, info.name, info.stages, info.total_tasks, info.shuffled_records
            ),
            Err(e) => warn!("job {} ({}) terminó en {:?}: {}", info.id, info.name, status, e),
        }

        let mut jobs = lock(&self.inner.jobs);
        if jobs.len() >= MAX_JOB_HISTORY {
            jobs.pop_front();
        }
        jobs.push_back(info);
        drop(jobs);

        result
    }
}

/// Trozos contiguos: la partición i recibe [i*len/n, (i+1)*len/n).
fn slice_contiguous<T>(data: Vec<T>, n: usize) -> Vec<Vec<T>> {
    let len = data.len();
    let mut rows = data.into_iter();
    (0..n)
        .map(|i| {
            let size = (i + 1) * len / n - i * len / n;
            rows.by_ref().take(size).collect()
        })
        .collect()
}
