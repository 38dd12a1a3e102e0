//! Grafo perezoso de transformaciones.
//!
//! Cada `Dataset<T>` apunta a un `Node`. Los lotes de partición viajan
//! con el tipo borrado (`Box<dyn Any + Send>`, siempre un `Vec<T>` por
//! dentro) y se recuperan con `downcast`, que falla con `TypeMismatch` en
//! lugar de hacer panic.

use serde::{Deserialize, Serialize};
use std::{
    any::{type_name, Any},
    fmt,
    ops::Range,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, OnceLock,
    },
};

use crate::{
    error::{EngineError, Result},
    task::TaskContext,
};

pub(crate) type Batch = Box<dyn Any + Send>;

/// Carga la partición i de una fuente (o de un nodo cacheado).
pub(crate) type LoadFn = Arc<dyn Fn(usize) -> Result<Batch> + Send + Sync>;

/// Transformación estrecha: partición de entrada -> partición de salida.
pub(crate) type NarrowFn = Arc<dyn Fn(&TaskContext, Batch) -> Result<Batch> + Send + Sync>;

/// Lado map de un shuffle: reparte la partición en N cubetas.
pub(crate) type WriteFn = Arc<dyn Fn(&TaskContext, Batch) -> Result<Buckets> + Send + Sync>;

/// Lado reduce: recibe la cubeta j de cada tarea map, en orden.
pub(crate) type ReduceFn = Arc<dyn Fn(&TaskContext, Vec<Batch>) -> Result<Batch> + Send + Sync>;

/// Concatena particiones adyacentes (coalesce).
pub(crate) type ConcatFn = Arc<dyn Fn(Vec<Batch>) -> Result<Batch> + Send + Sync>;

/// Fija particiones materializadas y devuelve cómo volver a cargarlas.
pub(crate) type PinFn = Arc<dyn Fn(Vec<Batch>) -> Result<LoadFn> + Send + Sync>;

pub(crate) struct Buckets {
    pub batches: Vec<Batch>,
    pub records: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrowKind {
    Map,
    Filter,
    FlatMap,
    MapPartitions,
    MapValues,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShuffleKind {
    Combine,
    GroupByKey,
    Repartition,
    PartitionBy,
    Sort,
}

impl fmt::Display for NarrowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NarrowKind::Map => "map",
            NarrowKind::Filter => "filter",
            NarrowKind::FlatMap => "flat_map",
            NarrowKind::MapPartitions => "map_partitions",
            NarrowKind::MapValues => "map_values",
        };
        f.write_str(s)
    }
}

impl fmt::Display for ShuffleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShuffleKind::Combine => "combine",
            ShuffleKind::GroupByKey => "group_by_key",
            ShuffleKind::Repartition => "repartition",
            ShuffleKind::PartitionBy => "partition_by",
            ShuffleKind::Sort => "sort",
        };
        f.write_str(s)
    }
}

pub(crate) enum Op {
    Source {
        load: LoadFn,
    },
    Narrow {
        kind: NarrowKind,
        input: Arc<Node>,
        f: NarrowFn,
    },
    Union {
        inputs: Vec<Arc<Node>>,
    },
    Coalesce {
        input: Arc<Node>,
        groups: Vec<Range<usize>>,
        concat: ConcatFn,
    },
    /// Frontera de shuffle: separa la etapa map de la etapa reduce.
    Shuffle {
        kind: ShuffleKind,
        input: Arc<Node>,
        write: WriteFn,
        reduce: ReduceFn,
    },
    Cached {
        input: Arc<Node>,
        slot: Arc<OnceLock<LoadFn>>,
        pin: PinFn,
    },
}

pub(crate) struct Node {
    pub id: usize,
    /// Nombre de la operación de usuario, ej: "reduce_by_key".
    pub label: String,
    pub num_partitions: usize,
    pub op: Op,
}

static NEXT_NODE_ID: AtomicUsize = AtomicUsize::new(0);

impl Node {
    pub fn new(label: impl Into<String>, num_partitions: usize, op: Op) -> Arc<Node> {
        Arc::new(Node {
            id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
            label: label.into(),
            num_partitions,
            op,
        })
    }

    pub fn inputs(&self) -> Vec<&Arc<Node>> {
        match &self.op {
            Op::Source { .. } => Vec::new(),
            Op::Narrow { input, .. }
            | Op::Coalesce { input, .. }
            | Op::Shuffle { input, .. }
            | Op::Cached { input, .. } => vec![input],
            Op::Union { inputs } => inputs.iter().collect(),
        }
    }

    /// Etiqueta estructural para `explain`, ej: "shuffle:combine".
    pub fn kind_tag(&self) -> String {
        match &self.op {
            Op::Source { .. } => "source".to_string(),
            Op::Narrow { kind, .. } => kind.to_string(),
            Op::Union { .. } => "union".to_string(),
            Op::Coalesce { .. } => "coalesce".to_string(),
            Op::Shuffle { kind, .. } => format!("shuffle:{kind}"),
            Op::Cached { slot, .. } => {
                if slot.get().is_some() {
                    "cached".to_string()
                } else {
                    "cached (pendiente)".to_string()
                }
            }
        }
    }

    pub fn is_materialized_cache(&self) -> bool {
        matches!(&self.op, Op::Cached { slot, .. } if slot.get().is_some())
    }
}

pub(crate) fn boxed<T: Send + 'static>(rows: Vec<T>) -> Batch {
    Box::new(rows)
}

pub(crate) fn downcast<T: 'static>(batch: Batch) -> Result<Vec<T>> {
    batch
        .downcast::<Vec<T>>()
        .map(|b| *b)
        .map_err(|_| EngineError::TypeMismatch(type_name::<Vec<T>>()))
}

/// Adapta una función tipada partición -> partición al formato del grafo.
pub(crate) fn narrow_fn<T, U, F>(f: F) -> NarrowFn
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(&TaskContext, Vec<T>) -> Result<Vec<U>> + Send + Sync + 'static,
{
    Arc::new(move |ctx, batch| {
        let rows = downcast::<T>(batch)?;
        Ok(boxed(f(ctx, rows)?))
    })
}

pub(crate) fn concat_fn<T: Send + 'static>() -> ConcatFn {
    Arc::new(|batches| {
        let mut out = Vec::new();
        for b in batches {
            out.extend(downcast::<T>(b)?);
        }
        Ok(boxed::<T>(out))
    })
}

pub(crate) fn pin_fn<T: Clone + Send + Sync + 'static>() -> PinFn {
    Arc::new(|batches| {
        let mut parts: Vec<Vec<T>> = Vec::with_capacity(batches.len());
        for b in batches {
            parts.push(downcast::<T>(b)?);
        }
        Ok(loader_from_partitions(Arc::new(parts)))
    })
}

/// Loader que clona particiones ya residentes en memoria.
pub(crate) fn loader_from_partitions<T: Clone + Send + Sync + 'static>(
    parts: Arc<Vec<Vec<T>>>,
) -> LoadFn {
    Arc::new(move |i| {
        let part = parts.get(i).ok_or_else(|| {
            EngineError::PartitionCount(format!(
                "se pidió la partición {} de {}",
                i,
                parts.len()
            ))
        })?;
        Ok(boxed(part.clone()))
    })
}
