//! Intérprete del grafo. Recorre los nodos sólo cuando una acción lo
//! pide y arma las etapas:
//! - los nodos estrechos consecutivos se fusionan en una tarea por partición;
//! - un shuffle corta el job en etapa map (fusionada con la cadena de
//!   arriba) y etapa reduce (fusionada con la cadena de abajo).

use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

use crate::{
    error::{EngineError, Result},
    job::JobTracker,
    plan::{Batch, Buckets, ConcatFn, LoadFn, NarrowFn, Node, Op, PinFn, ReduceFn, WriteFn},
    task::TaskContext,
    worker::{CancelToken, TaskFn, WorkerPool},
};

pub(crate) struct Executor<'a> {
    pool: &'a WorkerPool,
    job: Arc<JobTracker>,
    cancel: &'a CancelToken,
}

impl<'a> Executor<'a> {
    pub fn new(pool: &'a WorkerPool, job: Arc<JobTracker>, cancel: &'a CancelToken) -> Self {
        Self { pool, job, cancel }
    }

    /// Materializa todas las particiones del nodo, en orden.
    pub fn execute(&self, node: &Arc<Node>) -> Result<Vec<Batch>> {
        self.compute(node, Vec::new())
    }

    /// `tail`: operaciones estrechas a aplicar sobre la salida de `node`,
    /// en orden de aplicación.
    fn compute(&self, node: &Arc<Node>, mut tail: Vec<NarrowFn>) -> Result<Vec<Batch>> {
        let mut current = Arc::clone(node);
        loop {
            let next = match &current.op {
                Op::Narrow { input, f, .. } => {
                    tail.insert(0, Arc::clone(f));
                    Arc::clone(input)
                }
                _ => break,
            };
            current = next;
        }

        match &current.op {
            Op::Source { load } => self.run_loaded(Arc::clone(load), current.num_partitions, tail),
            Op::Cached { input, slot, pin } => {
                let load = self.ensure_cached(&current, input, slot, pin)?;
                self.run_loaded(load, current.num_partitions, tail)
            }
            Op::Union { inputs } => {
                let mut parts = Vec::with_capacity(current.num_partitions);
                for input in inputs {
                    parts.extend(self.compute(input, Vec::new())?);
                }
                self.run_tail(parts, tail)
            }
            Op::Coalesce {
                input,
                groups,
                concat,
            } => {
                let parts = self.compute(input, Vec::new())?;
                let merged = merge_adjacent(parts, groups, concat)?;
                self.run_tail(merged, tail)
            }
            Op::Shuffle {
                kind,
                input,
                write,
                reduce,
            } => {
                let map_outputs = self.map_stage(input, write)?;
                let per_reducer = self.regroup(map_outputs, current.num_partitions)?;
                debug!(
                    "shuffle {} ({}): {} particiones de salida",
                    current.id, kind, current.num_partitions
                );
                self.reduce_stage(per_reducer, Arc::clone(reduce), tail)
            }
            Op::Narrow { .. } => Err(EngineError::TypeMismatch("nodo no estrecho")),
        }
    }

    fn run_loaded(&self, load: LoadFn, partitions: usize, tail: Vec<NarrowFn>) -> Result<Vec<Batch>> {
        let tail = Arc::new(tail);
        let tasks: Vec<TaskFn<Batch>> = (0..partitions)
            .map(|i| {
                let load = Arc::clone(&load);
                let tail = Arc::clone(&tail);
                let ctx = TaskContext::new(i, Arc::clone(&self.job));
                Box::new(move || apply_tail(&ctx, load(i)?, &tail)) as TaskFn<Batch>
            })
            .collect();
        self.pool.run(&self.job, self.cancel, tasks)
    }

    fn run_tail(&self, parts: Vec<Batch>, tail: Vec<NarrowFn>) -> Result<Vec<Batch>> {
        if tail.is_empty() {
            return Ok(parts);
        }
        let tail = Arc::new(tail);
        let tasks: Vec<TaskFn<Batch>> = parts
            .into_iter()
            .enumerate()
            .map(|(i, batch)| {
                let tail = Arc::clone(&tail);
                let ctx = TaskContext::new(i, Arc::clone(&self.job));
                Box::new(move || apply_tail(&ctx, batch, &tail)) as TaskFn<Batch>
            })
            .collect();
        self.pool.run(&self.job, self.cancel, tasks)
    }

    fn map_stage(&self, input: &Arc<Node>, write: &WriteFn) -> Result<Vec<Buckets>> {
        let write = Arc::clone(write);
        let write_op: NarrowFn = Arc::new(move |ctx, batch| {
            let buckets = write(ctx, batch)?;
            Ok(Box::new(buckets) as Batch)
        });

        self.compute(input, vec![write_op])?
            .into_iter()
            .map(|b| {
                b.downcast::<Buckets>()
                    .map(|b| *b)
                    .map_err(|_| EngineError::TypeMismatch("Buckets"))
            })
            .collect()
    }

    /// Transpone las cubetas: la cubeta j de cada tarea map va al reducer j.
    fn regroup(&self, map_outputs: Vec<Buckets>, partitions: usize) -> Result<Vec<Vec<Batch>>> {
        let mut per_reducer: Vec<Vec<Batch>> = (0..partitions)
            .map(|_| Vec::with_capacity(map_outputs.len()))
            .collect();
        let mut shuffled = 0;

        for buckets in map_outputs {
            if buckets.batches.len() != partitions {
                return Err(EngineError::PartitionCount(format!(
                    "la etapa map produjo {} cubetas para {} particiones",
                    buckets.batches.len(),
                    partitions
                )));
            }
            shuffled += buckets.records;
            for (j, b) in buckets.batches.into_iter().enumerate() {
                per_reducer[j].push(b);
            }
        }

        self.job.add_shuffled(shuffled);
        Ok(per_reducer)
    }

    fn reduce_stage(
        &self,
        per_reducer: Vec<Vec<Batch>>,
        reduce: ReduceFn,
        tail: Vec<NarrowFn>,
    ) -> Result<Vec<Batch>> {
        let tail = Arc::new(tail);
        let tasks: Vec<TaskFn<Batch>> = per_reducer
            .into_iter()
            .enumerate()
            .map(|(j, inputs)| {
                let reduce = Arc::clone(&reduce);
                let tail = Arc::clone(&tail);
                let ctx = TaskContext::new(j, Arc::clone(&self.job));
                Box::new(move || {
                    let batch = reduce(&ctx, inputs)?;
                    apply_tail(&ctx, batch, &tail)
                }) as TaskFn<Batch>
            })
            .collect();
        self.pool.run(&self.job, self.cancel, tasks)
    }

    fn ensure_cached(
        &self,
        node: &Node,
        input: &Arc<Node>,
        slot: &OnceLock<LoadFn>,
        pin: &PinFn,
    ) -> Result<LoadFn> {
        if let Some(load) = slot.get() {
            return Ok(Arc::clone(load));
        }
        let parts = self.compute(input, Vec::new())?;
        let load = pin(parts)?;
        // si otra acción llenó el slot antes, se queda la suya
        let _ = slot.set(Arc::clone(&load));
        info!(
            "nodo {} ({}) cacheado con {} particiones",
            node.id, node.label, node.num_partitions
        );
        Ok(slot.get().map(Arc::clone).unwrap_or(load))
    }
}

fn apply_tail(ctx: &TaskContext, mut batch: Batch, tail: &[NarrowFn]) -> Result<Batch> {
    for f in tail {
        batch = f(ctx, batch)?;
    }
    Ok(batch)
}

fn merge_adjacent(
    parts: Vec<Batch>,
    groups: &[std::ops::Range<usize>],
    concat: &ConcatFn,
) -> Result<Vec<Batch>> {
    let total = parts.len();
    let mut parts = parts.into_iter();
    let mut merged = Vec::with_capacity(groups.len());
    let mut consumed = 0;

    for g in groups {
        if g.start != consumed || g.end > total {
            return Err(EngineError::PartitionCount(format!(
                "grupo de coalesce {:?} fuera de orden para {} particiones",
                g, total
            )));
        }
        let batch: Vec<Batch> = parts.by_ref().take(g.len()).collect();
        consumed = g.end;
        merged.push(concat(batch)?);
    }
    Ok(merged)
}
