//! Combinadores por clave: los tres pasos algebraicos de una agregación
//! (create_combiner / merge_value / merge_combiners) y los acumuladores
//! que la aplican dentro de una partición y después del shuffle.

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, hash::Hash, ops::Add, sync::Arc};

/// Agregación por clave en tres pasos.
///
/// `merge_combiners` debe ser asociativa y `merge_value(c, v)` equivalente
/// a `merge_combiners(c, create_combiner(v))`; si no, el resultado depende
/// del particionado (ver `monoid`).
pub trait Combiner<V, C>: Send + Sync + 'static {
    /// Primer valor de una clave dentro de una partición.
    fn create_combiner(&self, value: V) -> C;

    /// Siguientes valores de la misma clave en la misma partición.
    fn merge_value(&self, acc: C, value: V) -> C;

    /// Acumuladores parciales de distintas particiones.
    fn merge_combiners(&self, left: C, right: C) -> C;
}

/// Combinador armado con tres closures.
pub struct CombinerSpec<V, C> {
    create: Arc<dyn Fn(V) -> C + Send + Sync>,
    merge_value: Arc<dyn Fn(C, V) -> C + Send + Sync>,
    merge_combiners: Arc<dyn Fn(C, C) -> C + Send + Sync>,
}

impl<V, C> Clone for CombinerSpec<V, C> {
    fn clone(&self) -> Self {
        Self {
            create: Arc::clone(&self.create),
            merge_value: Arc::clone(&self.merge_value),
            merge_combiners: Arc::clone(&self.merge_combiners),
        }
    }
}

impl<V, C> CombinerSpec<V, C> {
    pub fn new<F1, F2, F3>(create: F1, merge_value: F2, merge_combiners: F3) -> Self
    where
        F1: Fn(V) -> C + Send + Sync + 'static,
        F2: Fn(C, V) -> C + Send + Sync + 'static,
        F3: Fn(C, C) -> C + Send + Sync + 'static,
    {
        Self {
            create: Arc::new(create),
            merge_value: Arc::new(merge_value),
            merge_combiners: Arc::new(merge_combiners),
        }
    }
}

impl<V: 'static, C: 'static> Combiner<V, C> for CombinerSpec<V, C> {
    fn create_combiner(&self, value: V) -> C {
        (self.create)(value)
    }

    fn merge_value(&self, acc: C, value: V) -> C {
        (self.merge_value)(acc, value)
    }

    fn merge_combiners(&self, left: C, right: C) -> C {
        (self.merge_combiners)(left, right)
    }
}

/* =========================
   Combinadores de uso común
   ========================= */

#[derive(Debug, Clone, Copy, Default)]
pub struct Sum;

impl<V: Add<Output = V>> Combiner<V, V> for Sum {
    fn create_combiner(&self, value: V) -> V {
        value
    }

    fn merge_value(&self, acc: V, value: V) -> V {
        acc + value
    }

    fn merge_combiners(&self, left: V, right: V) -> V {
        left + right
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Count;

impl<V> Combiner<V, u64> for Count {
    fn create_combiner(&self, _value: V) -> u64 {
        1
    }

    fn merge_value(&self, acc: u64, _value: V) -> u64 {
        acc + 1
    }

    fn merge_combiners(&self, left: u64, right: u64) -> u64 {
        left + right
    }
}

/// Acumulador (suma, cantidad). El promedio se calcula al final; promediar
/// promedios parciales da otro número.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MeanAcc {
    pub sum: f64,
    pub count: u64,
}

impl MeanAcc {
    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Average;

impl<V: Into<f64>> Combiner<V, MeanAcc> for Average {
    fn create_combiner(&self, value: V) -> MeanAcc {
        MeanAcc {
            sum: value.into(),
            count: 1,
        }
    }

    fn merge_value(&self, acc: MeanAcc, value: V) -> MeanAcc {
        MeanAcc {
            sum: acc.sum + value.into(),
            count: acc.count + 1,
        }
    }

    fn merge_combiners(&self, left: MeanAcc, right: MeanAcc) -> MeanAcc {
        MeanAcc {
            sum: left.sum + right.sum,
            count: left.count + right.count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinMaxCount<V> {
    pub min: V,
    pub max: V,
    pub count: u64,
}

/// Mínimo, máximo y cantidad por clave en una sola pasada.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinMax;

impl<V: PartialOrd + Clone> Combiner<V, MinMaxCount<V>> for MinMax {
    fn create_combiner(&self, value: V) -> MinMaxCount<V> {
        MinMaxCount {
            min: value.clone(),
            max: value,
            count: 1,
        }
    }

    fn merge_value(&self, acc: MinMaxCount<V>, value: V) -> MinMaxCount<V> {
        let single = self.create_combiner(value);
        self.merge_combiners(acc, single)
    }

    fn merge_combiners(&self, left: MinMaxCount<V>, right: MinMaxCount<V>) -> MinMaxCount<V> {
        MinMaxCount {
            min: if right.min < left.min { right.min } else { left.min },
            max: if right.max > left.max { right.max } else { left.max },
            count: left.count + right.count,
        }
    }
}

/* =========================
   Acumulador por clave
   ========================= */

/// Mapa clave -> acumulador que conserva el orden de primera aparición.
pub(crate) struct KeyedAccumulator<K, C> {
    index: HashMap<K, usize>,
    entries: Vec<(K, Option<C>)>,
}

impl<K: Eq + Hash + Clone, C> KeyedAccumulator<K, C> {
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }

    /// `create` la primera vez que aparece la clave, `merge` las siguientes.
    pub fn upsert<V>(
        &mut self,
        key: K,
        value: V,
        create: impl FnOnce(V) -> C,
        merge: impl FnOnce(C, V) -> C,
    ) {
        match self.index.get(&key) {
            Some(&pos) => {
                let slot = &mut self.entries[pos].1;
                if let Some(acc) = slot.take() {
                    *slot = Some(merge(acc, value));
                }
            }
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, Some(create(value))));
            }
        }
    }

    pub fn into_entries(self) -> Vec<(K, C)> {
        self.entries
            .into_iter()
            .filter_map(|(k, c)| c.map(|c| (k, c)))
            .collect()
    }
}

/// Paso 1: pre-agregación dentro de la partición. Deja un único
/// acumulador por clave.
pub(crate) fn combine_locally<K, V, C, S>(rows: Vec<(K, V)>, combiner: &S) -> Vec<(K, C)>
where
    K: Eq + Hash + Clone,
    S: Combiner<V, C> + ?Sized,
{
    let mut acc = KeyedAccumulator::new();
    for (k, v) in rows {
        acc.upsert(
            k,
            v,
            |v| combiner.create_combiner(v),
            |c, v| combiner.merge_value(c, v),
        );
    }
    acc.into_entries()
}

/// Paso 3: fusión de los acumuladores parciales que llegaron por el shuffle.
pub(crate) fn merge_partials<K, V, C, S>(parts: Vec<Vec<(K, C)>>, combiner: &S) -> Vec<(K, C)>
where
    K: Eq + Hash + Clone,
    S: Combiner<V, C> + ?Sized,
{
    let mut acc = KeyedAccumulator::new();
    for part in parts {
        for (k, partial) in part {
            acc.upsert(k, partial, |p| p, |a, p| combiner.merge_combiners(a, p));
        }
    }
    acc.into_entries()
}
