//! Piezas comunes de los shuffles: reparto en cubetas del lado map y
//! reagrupado por clave del lado reduce.

use std::sync::Arc;

use crate::{
    combine::KeyedAccumulator,
    dataset::{Data, Dataset, Key},
    error::Result,
    partitioner::PartitioningKind,
    plan::{boxed, downcast, Buckets, Node, Op, ReduceFn, ShuffleKind, WriteFn},
    task::TaskContext,
};

/// Arma un nodo de shuffle tipado.
/// - `write(ctx, filas)` corre en la etapa map y devuelve N cubetas.
/// - `reduce(ctx, cubetas)` corre en la etapa reduce con la cubeta j de
///   cada tarea map, en orden de partición de origen.
pub(crate) fn exchange<T, X, U, W, R>(
    input: &Dataset<T>,
    label: &str,
    kind: ShuffleKind,
    num_partitions: usize,
    partitioning: PartitioningKind,
    write: W,
    reduce: R,
) -> Dataset<U>
where
    T: Data,
    X: Send + 'static,
    U: Data,
    W: Fn(&TaskContext, Vec<T>) -> Result<Vec<Vec<X>>> + Send + Sync + 'static,
    R: Fn(&TaskContext, Vec<Vec<X>>) -> Result<Vec<U>> + Send + Sync + 'static,
{
    let write_fn: WriteFn = Arc::new(move |ctx, batch| {
        let buckets = write(ctx, downcast::<T>(batch)?)?;
        let records = buckets.iter().map(Vec::len).sum();
        Ok(Buckets {
            batches: buckets.into_iter().map(boxed::<X>).collect(),
            records,
        })
    });

    let reduce_fn: ReduceFn = Arc::new(move |ctx, inputs| {
        let mut parts = Vec::with_capacity(inputs.len());
        for b in inputs {
            parts.push(downcast::<X>(b)?);
        }
        Ok(boxed(reduce(ctx, parts)?))
    });

    let node = Node::new(
        label,
        num_partitions,
        Op::Shuffle {
            kind,
            input: Arc::clone(&input.node),
            write: write_fn,
            reduce: reduce_fn,
        },
    );
    Dataset::from_node(input.ctx.clone(), node, partitioning)
}

/// Reparte las filas en `n` cubetas. `target(posición, fila)` elige la cubeta.
pub(crate) fn bucketize<T>(
    rows: Vec<T>,
    n: usize,
    mut target: impl FnMut(usize, &T) -> usize,
) -> Vec<Vec<T>> {
    let mut buckets: Vec<Vec<T>> = (0..n).map(|_| Vec::new()).collect();
    for (pos, row) in rows.into_iter().enumerate() {
        let j = target(pos, &row) % n;
        buckets[j].push(row);
    }
    buckets
}

pub(crate) fn concat_in_order<X>(parts: Vec<Vec<X>>) -> Vec<X> {
    parts.into_iter().flatten().collect()
}

/// Agrupa los valores por clave sin combinar: el orden de cada grupo es el
/// de llegada (partición de origen, luego posición).
pub(crate) fn group_in_order<K: Key, V>(parts: Vec<Vec<(K, V)>>) -> Vec<(K, Vec<V>)> {
    let mut groups = KeyedAccumulator::new();
    for part in parts {
        for (k, v) in part {
            groups.upsert(
                k,
                v,
                |v| vec![v],
                |mut acc: Vec<V>, v| {
                    acc.push(v);
                    acc
                },
            );
        }
    }
    groups.into_entries()
}
