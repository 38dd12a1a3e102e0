//! Joins por clave.
//!
//! - Shuffle: se etiqueta cada registro con su lado, se unen las dos
//!   colecciones y un `group_by_key` junta los registros de cada clave.
//!   El producto cruzado se arma del lado reduce.
//! - Broadcast: el lado chico se materializa como `HashMap<K, Vec<W>>`
//!   compartido y el lado grande se recorre una vez por partición, sin
//!   shuffle. Nunca se elige solo: hay que pedirlo.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::{
    broadcast,
    dataset::{Data, Dataset, Key},
    error::Result,
    partitioner::{Partitioner, PartitioningKind},
    plan::NarrowKind,
    shuffle::group_in_order,
    task::TaskContext,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    /// Todo registro izquierdo con todo registro derecho; la salida queda
    /// con la clave izquierda.
    Cross,
}

impl JoinType {
    fn keeps_unmatched_left(self) -> bool {
        matches!(self, JoinType::Left | JoinType::Full)
    }

    fn keeps_unmatched_right(self) -> bool {
        matches!(self, JoinType::Right | JoinType::Full)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JoinStrategy {
    Shuffle,
    Broadcast,
}

/// Fila de un join con los lados opcionales (`None` = no hubo match).
pub type JoinRow<K, V, W> = (K, (Option<V>, Option<W>));

#[derive(Clone)]
enum Side<V, W> {
    Left(V),
    Right(W),
}

fn split<V, W>(tagged: Vec<Side<V, W>>) -> (Vec<V>, Vec<W>) {
    let mut left = Vec::new();
    let mut right = Vec::new();
    for t in tagged {
        match t {
            Side::Left(v) => left.push(v),
            Side::Right(w) => right.push(w),
        }
    }
    (left, right)
}

/// Avisa (sin fallar) cuando una clave genera demasiados pares.
fn check_cardinality(task: &TaskContext, left: usize, right: usize, threshold: usize) {
    let pairs = left.saturating_mul(right);
    if pairs > threshold {
        task.warn(format!(
            "join: una clave genera {} x {} = {} pares (umbral {})",
            left, right, pairs, threshold
        ));
    }
}

/// Producto de los dos grupos de una clave según el tipo de join.
fn expand<K: Clone, V: Clone, W: Clone>(
    how: JoinType,
    key: K,
    left: Vec<V>,
    right: Vec<W>,
    out: &mut Vec<JoinRow<K, V, W>>,
) {
    match (left.is_empty(), right.is_empty()) {
        (false, false) => {
            for v in &left {
                for w in &right {
                    out.push((key.clone(), (Some(v.clone()), Some(w.clone()))));
                }
            }
        }
        (false, true) if how.keeps_unmatched_left() => {
            out.extend(left.into_iter().map(|v| (key.clone(), (Some(v), None))));
        }
        (true, false) if how.keeps_unmatched_right() => {
            out.extend(right.into_iter().map(|w| (key.clone(), (None, Some(w)))));
        }
        _ => {}
    }
}

impl<K: Key, V: Data> Dataset<(K, V)> {
    /// Para cada clave, todos los valores de cada lado.
    pub fn cogroup<W: Data>(&self, other: &Dataset<(K, W)>) -> Dataset<(K, (Vec<V>, Vec<W>))> {
        let n = self.num_partitions().max(other.num_partitions());
        self.cogroup_with(other, Partitioner::hash_of(n))
    }

    pub fn cogroup_with<W: Data>(
        &self,
        other: &Dataset<(K, W)>,
        partitioner: Partitioner<K>,
    ) -> Dataset<(K, (Vec<V>, Vec<W>))> {
        let left = self.map_values(Side::<V, W>::Left);
        let right = other.map_values(Side::<V, W>::Right);
        left.union(&right)
            .group_labeled("cogroup", partitioner)
            .map_values(split)
    }

    /// Shuffle join de cualquier tipo.
    pub fn join_with<W: Data>(&self, other: &Dataset<(K, W)>, how: JoinType) -> Dataset<JoinRow<K, V, W>> {
        let threshold = self.ctx.config().join_warn_threshold;

        if how == JoinType::Cross {
            // clave unitaria: todos los registros van al mismo reducer
            let left = self.map(|row| ((), row));
            let right = other.values().map(|w| ((), w));
            return left.cogroup(&right).narrow(
                "cross_join",
                NarrowKind::FlatMap,
                PartitioningKind::Unknown,
                move |task, groups| {
                    let mut out = Vec::new();
                    for ((), (lefts, rights)) in groups {
                        check_cardinality(task, lefts.len(), rights.len(), threshold);
                        for (k, v) in lefts {
                            for w in &rights {
                                out.push((k.clone(), (Some(v.clone()), Some(w.clone()))));
                            }
                        }
                    }
                    Ok(out)
                },
            );
        }

        self.cogroup(other).narrow(
            "join",
            NarrowKind::FlatMap,
            PartitioningKind::Hash,
            move |task, groups| {
                let mut out = Vec::new();
                for (k, (lefts, rights)) in groups {
                    check_cardinality(task, lefts.len(), rights.len(), threshold);
                    expand(how, k, lefts, rights, &mut out);
                }
                Ok(out)
            },
        )
    }

    /// Inner join: sólo las claves presentes en los dos lados.
    pub fn join<W: Data>(&self, other: &Dataset<(K, W)>) -> Dataset<(K, (V, W))> {
        self.join_with(other, JoinType::Inner)
            .flat_map_values(|(v, w)| v.zip(w))
    }

    pub fn left_outer_join<W: Data>(&self, other: &Dataset<(K, W)>) -> Dataset<(K, (V, Option<W>))> {
        self.join_with(other, JoinType::Left)
            .flat_map_values(|(v, w)| v.map(|v| (v, w)))
    }

    pub fn right_outer_join<W: Data>(&self, other: &Dataset<(K, W)>) -> Dataset<(K, (Option<V>, W))> {
        self.join_with(other, JoinType::Right)
            .flat_map_values(|(v, w)| w.map(|w| (v, w)))
    }

    pub fn full_outer_join<W: Data>(&self, other: &Dataset<(K, W)>) -> Dataset<JoinRow<K, V, W>> {
        self.join_with(other, JoinType::Full)
    }

    /// Broadcast join: `small` se junta en el driver, se mide y se comparte
    /// con todas las tareas. Si supera `broadcast_max_bytes` falla con
    /// `BroadcastSizeExceeded` antes de lanzar tareas sobre `self`.
    ///
    /// Right/Full necesitan además las filas de `small` sin match: se
    /// juntan las claves distintas de `self` y esas filas se agregan desde
    /// el driver en una partición extra.
    pub fn broadcast_join_with<W>(&self, small: &Dataset<(K, W)>, how: JoinType) -> Result<Dataset<JoinRow<K, V, W>>>
    where
        K: Serialize,
        W: Data + Serialize,
    {
        let threshold = self.ctx.config().join_warn_threshold;
        let rows = small.collect_as("broadcast_join (lado chico)")?;

        if how == JoinType::Cross {
            let values: Vec<W> = rows.into_iter().map(|(_, w)| w).collect();
            let size = broadcast::measure(&values)?;
            let shared = self.ctx.broadcast_measured(values, size)?;
            return Ok(self.narrow(
                "broadcast_cross_join",
                NarrowKind::FlatMap,
                PartitioningKind::Unknown,
                move |task, rows| {
                    check_cardinality(task, rows.len(), shared.len(), threshold);
                    let mut out = Vec::with_capacity(rows.len() * shared.len());
                    for (k, v) in rows {
                        for w in shared.iter() {
                            out.push((k.clone(), (Some(v.clone()), Some(w.clone()))));
                        }
                    }
                    Ok(out)
                },
            ));
        }

        let entries = group_in_order(vec![rows]);
        let size = broadcast::measure(&entries)?;
        let right_keys: Vec<K> = entries.iter().map(|(k, _)| k.clone()).collect();
        let table: HashMap<K, Vec<W>> = entries.into_iter().collect();
        let shared = self.ctx.broadcast_measured(table, size)?;

        let scan = {
            let shared = shared.clone();
            self.narrow(
                "broadcast_join",
                NarrowKind::FlatMap,
                self.partitioning.clone(),
                move |task, rows| {
                    // cardinalidad por clave con los conteos locales
                    let mut local: HashMap<&K, usize> = HashMap::new();
                    for (k, _) in &rows {
                        *local.entry(k).or_default() += 1;
                    }
                    for (k, count) in local {
                        if let Some(ws) = shared.get(k) {
                            check_cardinality(task, count, ws.len(), threshold);
                        }
                    }

                    let mut out = Vec::with_capacity(rows.len());
                    for (k, v) in rows {
                        match shared.get(&k) {
                            Some(ws) => {
                                for w in ws {
                                    out.push((k.clone(), (Some(v.clone()), Some(w.clone()))));
                                }
                            }
                            None if how.keeps_unmatched_left() => out.push((k, (Some(v), None))),
                            None => {}
                        }
                    }
                    Ok(out)
                },
            )
        };

        if !how.keeps_unmatched_right() {
            return Ok(scan);
        }

        let seen: HashSet<K> = self
            .keys()
            .map_partitions(|keys| {
                let mut local = HashSet::new();
                keys.into_iter()
                    .filter(|k| local.insert(k.clone()))
                    .collect::<Vec<_>>()
            })
            .collect_as("broadcast_join (claves izquierdas)")?
            .into_iter()
            .collect();

        let mut unmatched = Vec::new();
        for k in right_keys {
            if seen.contains(&k) {
                continue;
            }
            if let Some(ws) = shared.get(&k) {
                unmatched.extend(ws.iter().map(|w| (k.clone(), (None, Some(w.clone())))));
            }
        }
        Ok(scan.union(&self.ctx.parallelize(unmatched, 1)?))
    }

    /// Join con estrategia explícita.
    pub fn join_using<W>(
        &self,
        other: &Dataset<(K, W)>,
        how: JoinType,
        strategy: JoinStrategy,
    ) -> Result<Dataset<JoinRow<K, V, W>>>
    where
        K: Serialize,
        W: Data + Serialize,
    {
        match strategy {
            JoinStrategy::Shuffle => Ok(self.join_with(other, how)),
            JoinStrategy::Broadcast => self.broadcast_join_with(other, how),
        }
    }
}
