//! Operaciones sobre colecciones de pares (K, V): agregaciones por clave
//! (combine / reduce / aggregate / group) y utilidades asociadas.

use std::{collections::HashMap, sync::Arc};

use crate::{
    combine::{combine_locally, merge_partials, Combiner, CombinerSpec},
    dataset::{Data, Dataset, Key},
    error::Result,
    partitioner::{check_partitions, Partitioner, PartitioningKind},
    plan::{NarrowKind, ShuffleKind},
    shuffle::{bucketize, concat_in_order, exchange, group_in_order},
};

impl<K: Key, V: Data> Dataset<(K, V)> {
    /* =========================
       Transformaciones estrechas
       ========================= */

    /// map_values: no toca la clave, así que el particionado se conserva.
    pub fn map_values<U, F>(&self, f: F) -> Dataset<(K, U)>
    where
        U: Data,
        F: Fn(V) -> U + Send + Sync + 'static,
    {
        self.narrow(
            "map_values",
            NarrowKind::MapValues,
            self.partitioning.clone(),
            move |_, rows| Ok(rows.into_iter().map(|(k, v)| (k, f(v))).collect()),
        )
    }

    pub fn flat_map_values<U, I, F>(&self, f: F) -> Dataset<(K, U)>
    where
        U: Data,
        I: IntoIterator<Item = U>,
        F: Fn(V) -> I + Send + Sync + 'static,
    {
        self.narrow(
            "flat_map_values",
            NarrowKind::MapValues,
            self.partitioning.clone(),
            move |_, rows| {
                let mut out = Vec::with_capacity(rows.len());
                for (k, v) in rows {
                    for u in f(v) {
                        out.push((k.clone(), u));
                    }
                }
                Ok(out)
            },
        )
    }

    pub fn keys(&self) -> Dataset<K> {
        self.narrow("keys", NarrowKind::Map, PartitioningKind::Unknown, |_, rows| {
            Ok(rows.into_iter().map(|(k, _)| k).collect())
        })
    }

    pub fn values(&self) -> Dataset<V> {
        self.narrow("values", NarrowKind::Map, PartitioningKind::Unknown, |_, rows| {
            Ok(rows.into_iter().map(|(_, v)| v).collect())
        })
    }

    /// Mueve cada par a la partición que indica el particionador.
    pub fn partition_by(&self, partitioner: Partitioner<K>) -> Dataset<(K, V)> {
        let n = partitioner.num_partitions();
        let kind = partitioner.kind().clone();
        exchange(
            self,
            "partition_by",
            ShuffleKind::PartitionBy,
            n,
            kind,
            move |_, rows: Vec<(K, V)>| {
                Ok(bucketize(rows, n, |_, (k, _)| partitioner.partition_for(k)))
            },
            |_, parts: Vec<Vec<(K, V)>>| Ok(concat_in_order(parts)),
        )
    }

    /* =========================
       Combine / shuffle
       ========================= */

    /// combine_by_key con tantas particiones de salida como de entrada.
    ///
    /// 1. Dentro de cada partición: `create_combiner` en la primera
    ///    aparición de una clave y `merge_value` en las siguientes.
    /// 2. Shuffle: cada (K, C) va a la partición hash(K) mod N.
    /// 3. Del otro lado: `merge_combiners` de todos los parciales.
    pub fn combine_by_key<C, S>(&self, combiner: S) -> Dataset<(K, C)>
    where
        C: Data,
        S: Combiner<V, C>,
    {
        let partitioner = self.default_partitioner();
        self.combine_labeled("combine_by_key", combiner, partitioner)
    }

    pub fn combine_by_key_into<C, S>(&self, combiner: S, num_partitions: usize) -> Result<Dataset<(K, C)>>
    where
        C: Data,
        S: Combiner<V, C>,
    {
        check_partitions(num_partitions)?;
        Ok(self.combine_labeled("combine_by_key", combiner, Partitioner::hash(num_partitions)?))
    }

    pub fn combine_by_key_with<C, S>(&self, combiner: S, partitioner: Partitioner<K>) -> Dataset<(K, C)>
    where
        C: Data,
        S: Combiner<V, C>,
    {
        self.combine_labeled("combine_by_key", combiner, partitioner)
    }

    pub(crate) fn combine_labeled<C, S>(
        &self,
        label: &str,
        combiner: S,
        partitioner: Partitioner<K>,
    ) -> Dataset<(K, C)>
    where
        C: Data,
        S: Combiner<V, C>,
    {
        let combiner = Arc::new(combiner);
        let map_side = Arc::clone(&combiner);
        let n = partitioner.num_partitions();
        let kind = partitioner.kind().clone();

        exchange(
            self,
            label,
            ShuffleKind::Combine,
            n,
            kind,
            move |_, rows: Vec<(K, V)>| {
                let local: Vec<(K, C)> = combine_locally::<K, V, C, S>(rows, &*map_side);
                Ok(bucketize(local, n, |_, (k, _)| partitioner.partition_for(k)))
            },
            move |_, parts: Vec<Vec<(K, C)>>| Ok(merge_partials::<K, V, C, S>(parts, &*combiner)),
        )
    }

    /// reduce_by_key(f) = combine_by_key(identidad, f, f).
    pub fn reduce_by_key<F>(&self, f: F) -> Dataset<(K, V)>
    where
        F: Fn(V, V) -> V + Send + Sync + 'static,
    {
        let partitioner = self.default_partitioner();
        self.combine_labeled("reduce_by_key", reducer(f), partitioner)
    }

    pub fn reduce_by_key_into<F>(&self, f: F, num_partitions: usize) -> Result<Dataset<(K, V)>>
    where
        F: Fn(V, V) -> V + Send + Sync + 'static,
    {
        let partitioner = Partitioner::hash(num_partitions)?;
        Ok(self.combine_labeled("reduce_by_key", reducer(f), partitioner))
    }

    /// aggregate_by_key: `zero` se clona una vez por clave y por partición;
    /// una clave presente en N particiones ve `zero` N veces.
    pub fn aggregate_by_key<C, S, M>(&self, zero: C, seq: S, comb: M) -> Dataset<(K, C)>
    where
        C: Data,
        S: Fn(C, V) -> C + Send + Sync + 'static,
        M: Fn(C, C) -> C + Send + Sync + 'static,
    {
        let seq = Arc::new(seq);
        let first = Arc::clone(&seq);
        let spec = CombinerSpec::<V, C>::new(
            move |v| first(zero.clone(), v),
            move |acc, v| seq(acc, v),
            comb,
        );
        let partitioner = self.default_partitioner();
        self.combine_labeled("aggregate_by_key", spec, partitioner)
    }

    /// fold_by_key = aggregate_by_key con la misma función en los dos pasos.
    pub fn fold_by_key<F>(&self, zero: V, f: F) -> Dataset<(K, V)>
    where
        F: Fn(V, V) -> V + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let g = Arc::clone(&f);
        self.aggregate_by_key(zero, move |a, v| f(a, v), move |a, b| g(a, b))
    }

    /// group_by_key: sin combinación local, todos los valores cruzan el
    /// shuffle. Cada grupo mantiene el orden de llegada.
    pub fn group_by_key(&self) -> Dataset<(K, Vec<V>)> {
        self.group_labeled("group_by_key", self.default_partitioner())
    }

    pub fn group_by_key_into(&self, num_partitions: usize) -> Result<Dataset<(K, Vec<V>)>> {
        Ok(self.group_labeled("group_by_key", Partitioner::hash(num_partitions)?))
    }

    pub fn group_by_key_with(&self, partitioner: Partitioner<K>) -> Dataset<(K, Vec<V>)> {
        self.group_labeled("group_by_key", partitioner)
    }

    pub(crate) fn group_labeled(&self, label: &str, partitioner: Partitioner<K>) -> Dataset<(K, Vec<V>)> {
        let n = partitioner.num_partitions();
        let kind = partitioner.kind().clone();
        exchange(
            self,
            label,
            ShuffleKind::GroupByKey,
            n,
            kind,
            move |_, rows: Vec<(K, V)>| {
                Ok(bucketize(rows, n, |_, (k, _)| partitioner.partition_for(k)))
            },
            |_, parts: Vec<Vec<(K, V)>>| Ok(group_in_order(parts)),
        )
    }

    /// Orden global por clave: un job previo toma las claves para fijar los
    /// límites de rango, después un shuffle por rangos y un orden local.
    pub fn sort_by_key(&self, ascending: bool) -> Result<Dataset<(K, V)>>
    where
        K: Ord,
    {
        self.sort_by_key_into(ascending, self.num_partitions())
    }

    pub fn sort_by_key_into(&self, ascending: bool, num_partitions: usize) -> Result<Dataset<(K, V)>>
    where
        K: Ord,
    {
        check_partitions(num_partitions)?;
        let per_partition = (SORT_SAMPLES_PER_OUTPUT * num_partitions)
            .div_ceil(self.num_partitions().max(1))
            .max(1);
        let mut keys = self
            .keys()
            .map_partitions(move |keys| sample_evenly(keys, per_partition))
            .collect_as("sort_by_key (muestreo)")?;
        keys.sort();
        let partitioner = Partitioner::range(
            range_boundaries(&keys, num_partitions),
            ascending,
            num_partitions,
        );
        let n = partitioner.num_partitions();
        let kind = partitioner.kind().clone();

        Ok(exchange(
            self,
            "sort_by_key",
            ShuffleKind::Sort,
            n,
            kind,
            move |_, rows: Vec<(K, V)>| {
                Ok(bucketize(rows, n, |_, (k, _)| partitioner.partition_for(k)))
            },
            move |_, parts: Vec<Vec<(K, V)>>| {
                let mut rows = concat_in_order(parts);
                if ascending {
                    rows.sort_by(|a, b| a.0.cmp(&b.0));
                } else {
                    rows.sort_by(|a, b| b.0.cmp(&a.0));
                }
                Ok(rows)
            },
        ))
    }

    /* =========================
       Acciones
       ========================= */

    pub fn count_by_key(&self) -> Result<HashMap<K, u64>> {
        let counts = self
            .map_values(|_| 1_u64)
            .reduce_by_key(|a, b| a + b)
            .collect_as("count_by_key")?;
        Ok(counts.into_iter().collect())
    }

    /// Si una clave se repite gana el último valor en orden de partición.
    pub fn collect_as_map(&self) -> Result<HashMap<K, V>> {
        Ok(self.collect_as("collect_as_map")?.into_iter().collect())
    }

    /// Todos los valores de una clave.
    pub fn lookup(&self, key: &K) -> Result<Vec<V>> {
        let wanted = key.clone();
        self.filter(move |(k, _)| *k == wanted)
            .values()
            .collect_as("lookup")
    }

    fn default_partitioner(&self) -> Partitioner<K> {
        Partitioner::hash_of(self.num_partitions())
    }
}

fn reducer<V, F>(f: F) -> CombinerSpec<V, V>
where
    V: 'static,
    F: Fn(V, V) -> V + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let g = Arc::clone(&f);
    CombinerSpec::<V, V>::new(|v| v, move |a, v| f(a, v), move |a, b| g(a, b))
}

/// n-1 límites tomados en los cuantiles de las claves ya ordenadas.
/// Claves muestreadas por partición de salida al calcular los rangos.
const SORT_SAMPLES_PER_OUTPUT: usize = 20;

/// Hasta `k` claves tomadas a paso fijo sobre la partición.
fn sample_evenly<K>(keys: Vec<K>, k: usize) -> Vec<K> {
    let len = keys.len();
    if len <= k {
        return keys;
    }
    let mut taken = 0;
    keys.into_iter()
        .enumerate()
        .filter_map(|(j, key)| {
            if taken < k && j == taken * len / k {
                taken += 1;
                Some(key)
            } else {
                None
            }
        })
        .collect()
}

fn range_boundaries<K: Clone>(sorted: &[K], num_partitions: usize) -> Vec<K> {
    if sorted.is_empty() || num_partitions <= 1 {
        return Vec::new();
    }
    let len = sorted.len();
    (1..num_partitions)
        .map(|i| sorted[(i * len / num_partitions).min(len - 1)].clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        combine::{Average, Count, MeanAcc, MinMax, MinMaxCount, Sum},
        config::EngineConfig,
        context::Context,
    };

    fn ctx() -> Context {
        Context::new(EngineConfig::default().with_workers(3)).unwrap()
    }

    fn sorted<K: Ord + Clone, V: Clone>(mut v: Vec<(K, V)>) -> Vec<(K, V)> {
        v.sort_by(|a, b| a.0.cmp(&b.0));
        v
    }

    fn words(c: &Context) -> Dataset<(String, u64)> {
        let data = ["a", "b", "a", "c", "b", "a", "d"]
            .iter()
            .map(|w| (w.to_string(), 1_u64))
            .collect();
        c.parallelize(data, 3).unwrap()
    }

    #[test]
    fn reduce_by_key_agrupa_y_suma() {
        let c = ctx();
        let out = words(&c).reduce_by_key(|a, b| a + b).collect().unwrap();
        assert_eq!(
            sorted(out),
            vec![
                ("a".to_string(), 3),
                ("b".to_string(), 2),
                ("c".to_string(), 1),
                ("d".to_string(), 1),
            ]
        );
    }

    #[test]
    fn combine_by_key_solo_manda_un_parcial_por_clave_y_particion() {
        let c = ctx();
        let ds = c
            .from_partitions(vec![
                vec![("x", 1_u64), ("x", 1), ("x", 1), ("y", 1)],
                vec![("x", 1), ("x", 1)],
            ])
            .unwrap();

        let out = ds.combine_by_key::<u64, _>(Sum).collect().unwrap();
        assert_eq!(sorted(out), vec![("x", 5), ("y", 1)]);
        // p0 manda x,y y p1 manda x
        assert_eq!(c.last_job().unwrap().shuffled_records, 3);
    }

    #[test]
    fn group_by_key_no_combina_y_mantiene_orden_de_llegada() {
        let c = ctx();
        let ds = c
            .from_partitions(vec![vec![("k", 1), ("j", 9)], vec![("k", 2)], vec![("k", 3)]])
            .unwrap();
        let grouped = ds.group_by_key().collect_as_map().unwrap();
        assert_eq!(grouped["k"], vec![1, 2, 3]);
        assert_eq!(grouped["j"], vec![9]);
        assert_eq!(c.last_job().unwrap().shuffled_records, 4);
    }

    #[test]
    fn aggregate_by_key_aplica_zero_una_vez_por_particion() {
        let c = ctx();
        // la clave "a" aparece en 3 particiones
        let ds = c
            .from_partitions(vec![vec![("a", 1)], vec![("a", 2), ("a", 3)], vec![("a", 4), ("b", 5)]])
            .unwrap();
        let out = ds
            .aggregate_by_key(100, |acc, v| acc + v, |x, y| x + y)
            .collect_as_map()
            .unwrap();
        assert_eq!(out["a"], 10 + 300);
        assert_eq!(out["b"], 105);
    }

    #[test]
    fn aggregate_by_key_clona_zero_en_profundidad() {
        let c = ctx();
        let ds = c
            .from_partitions(vec![vec![("a", 1), ("b", 2)], vec![("a", 3)]])
            .unwrap();
        let out = ds
            .aggregate_by_key(
                Vec::<i32>::new(),
                |mut acc, v| {
                    acc.push(v);
                    acc
                },
                |mut x, y| {
                    x.extend(y);
                    x
                },
            )
            .collect_as_map()
            .unwrap();
        assert_eq!(out["a"], vec![1, 3]);
        assert_eq!(out["b"], vec![2]);
    }

    #[test]
    fn fold_by_key_usa_zero_por_particion() {
        let c = ctx();
        let ds = c
            .from_partitions(vec![vec![("a", 1)], vec![("a", 2)]])
            .unwrap();
        assert_eq!(ds.fold_by_key(0, |a, b| a + b).collect().unwrap(), vec![("a", 3)]);
    }

    #[test]
    fn promedio_por_clave_con_suma_y_cantidad() {
        let c = ctx();
        let ds = c
            .from_partitions(vec![
                vec![("t", 1_u32), ("t", 2), ("t", 3)],
                vec![("t", 4), ("t", 5)],
                vec![("t", 6)],
            ])
            .unwrap();
        let means = ds
            .combine_by_key::<MeanAcc, _>(Average)
            .map_values(|acc| acc.mean().unwrap_or(0.0))
            .collect()
            .unwrap();
        assert_eq!(means, vec![("t", 3.5)]);
    }

    #[test]
    fn count_y_min_max_por_clave() {
        let c = ctx();
        let ds = c
            .parallelize(vec![("x", 3), ("y", 1), ("x", 9), ("x", -4)], 2)
            .unwrap();
        let counts = ds.combine_by_key::<u64, _>(Count).collect_as_map().unwrap();
        assert_eq!(counts["x"], 3);

        let mm = ds.combine_by_key::<MinMaxCount<i32>, _>(MinMax).collect_as_map().unwrap();
        assert_eq!(
            mm["x"],
            MinMaxCount {
                min: -4,
                max: 9,
                count: 3
            }
        );
        assert_eq!(ds.count_by_key().unwrap()["y"], 1);
    }

    #[test]
    fn into_variantes_eligen_particiones_de_salida() {
        let c = ctx();
        let ds = words(&c);
        let reduced = ds.reduce_by_key_into(|a, b| a + b, 5).unwrap();
        assert_eq!(reduced.num_partitions(), 5);
        assert_eq!(reduced.count().unwrap(), 4);
        assert!(ds.reduce_by_key_into(|a, b| a + b, 0).is_err());
        assert_eq!(ds.group_by_key_into(2).unwrap().num_partitions(), 2);
        assert_eq!(ds.combine_by_key_into::<u64, _>(Sum, 1).unwrap().count().unwrap(), 4);
    }

    #[test]
    fn partition_by_con_particionador_propio() {
        let c = ctx();
        let ds = c
            .parallelize(vec![(0_usize, "a"), (1, "b"), (2, "c"), (3, "d")], 1)
            .unwrap();
        let p = Partitioner::custom("par_impar", 2, |k: &usize, _| k % 2).unwrap();
        let parts = ds.partition_by(p).collect_partitions().unwrap();
        assert_eq!(parts[0], vec![(0, "a"), (2, "c")]);
        assert_eq!(parts[1], vec![(1, "b"), (3, "d")]);
    }

    #[test]
    fn sort_by_key_ordena_entre_particiones() {
        let c = ctx();
        let data: Vec<(u32, char)> = vec![(5, 'e'), (1, 'a'), (4, 'd'), (2, 'b'), (3, 'c'), (6, 'f')];
        let ds = c.parallelize(data, 3).unwrap();

        let asc = ds.sort_by_key(true).unwrap();
        let parts = asc.collect_partitions().unwrap();
        assert_eq!(parts.len(), 3);
        let flat: Vec<u32> = parts.into_iter().flatten().map(|(k, _)| k).collect();
        assert_eq!(flat, vec![1, 2, 3, 4, 5, 6]);

        let desc: Vec<u32> = ds
            .sort_by_key(false)
            .unwrap()
            .keys()
            .collect()
            .unwrap();
        assert_eq!(desc, vec![6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn sort_by_key_vacio_no_falla() {
        let c = ctx();
        let ds = c.parallelize(Vec::<(u32, u32)>::new(), 2).unwrap();
        assert!(ds.sort_by_key(true).unwrap().collect().unwrap().is_empty());

        let wide = ds.sort_by_key_into(false, 5).unwrap();
        assert_eq!(wide.num_partitions(), 5);
        assert_eq!(wide.collect_partitions().unwrap().len(), 5);
    }

    #[test]
    fn sort_by_key_muestrea_y_reparte_entradas_grandes() {
        let c = ctx();
        let data: Vec<(u32, ())> = (0..2000).rev().map(|k| (k, ())).collect();
        let ds = c.parallelize(data, 4).unwrap();

        let parts = ds.sort_by_key_into(true, 4).unwrap().collect_partitions().unwrap();
        assert_eq!(parts.len(), 4);
        assert!(parts.iter().all(|p| !p.is_empty()));
        let flat: Vec<u32> = parts.into_iter().flatten().map(|(k, _)| k).collect();
        assert_eq!(flat, (0..2000).collect::<Vec<u32>>());
    }

    #[test]
    fn sample_evenly_acota_la_muestra() {
        let sample = sample_evenly((0..1000).collect::<Vec<u32>>(), 10);
        assert_eq!(sample, vec![0, 100, 200, 300, 400, 500, 600, 700, 800, 900]);
        assert_eq!(sample_evenly(vec![3, 1], 10), vec![3, 1]);
        assert!(sample_evenly(Vec::<u32>::new(), 5).is_empty());
    }

    #[test]
    fn map_values_conserva_el_particionado() {
        let c = ctx();
        let ds = c.parallelize_pairs(vec![("a", 1), ("b", 2)], 2).unwrap();
        let doubled = ds.map_values(|v| v * 2);
        assert_eq!(doubled.partitioning(), ds.partitioning());
        assert_eq!(
            ds.map(|(k, v)| (k, v)).partitioning().kind,
            PartitioningKind::Unknown
        );
    }

    #[test]
    fn flat_map_values_keys_values_y_lookup() {
        let c = ctx();
        let ds = c.parallelize(vec![("a", "1 2"), ("b", "3")], 2).unwrap();
        let exploded = ds.flat_map_values(|s| s.split(' ').map(str::to_string).collect::<Vec<_>>());
        assert_eq!(exploded.count().unwrap(), 3);
        assert_eq!(exploded.lookup(&"a").unwrap(), vec!["1", "2"]);
        assert_eq!(ds.keys().collect().unwrap(), vec!["a", "b"]);
        assert_eq!(ds.values().collect().unwrap(), vec!["1 2", "3"]);
    }

    #[test]
    fn range_boundaries_toma_cuantiles() {
        assert_eq!(range_boundaries(&[1, 2, 3, 4, 5, 6], 3), vec![3, 5]);
        assert!(range_boundaries::<u32>(&[], 3).is_empty());
        assert!(range_boundaries(&[1], 1).is_empty());
    }
}
