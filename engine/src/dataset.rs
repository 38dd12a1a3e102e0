use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
    fmt,
    hash::Hash,
    marker::PhantomData,
    sync::{Arc, OnceLock},
};

use crate::{
    context::Context,
    dag::Dag,
    error::{EngineError, Result},
    partitioner::{check_partitions, hash_partition, PartitioningInfo, PartitioningKind},
    plan::{
        concat_fn, downcast, loader_from_partitions, narrow_fn, pin_fn, NarrowKind, Node, Op,
        ShuffleKind,
    },
    shuffle::{bucketize, concat_in_order, exchange},
    task::TaskContext,
};

/// Registro que puede viajar entre tareas.
pub trait Data: Clone + Send + Sync + 'static {}
impl<T: Clone + Send + Sync + 'static> Data for T {}

/// Clave de un par (K, V).
pub trait Key: Data + Eq + Hash {}
impl<T: Data + Eq + Hash> Key for T {}

/// Colección particionada e inmutable. Las transformaciones sólo agregan
/// nodos al grafo; nada se ejecuta hasta una acción (`collect`, `count`...).
pub struct Dataset<T> {
    pub(crate) ctx: Context,
    pub(crate) node: Arc<Node>,
    pub(crate) partitioning: PartitioningKind,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Dataset<T> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            node: Arc::clone(&self.node),
            partitioning: self.partitioning.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Dataset<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("node", &self.node.id)
            .field("op", &self.node.label)
            .field("partitions", &self.node.num_partitions)
            .field("partitioning", &self.partitioning)
            .finish()
    }
}

impl<T: Data> Dataset<T> {
    pub(crate) fn from_node(ctx: Context, node: Arc<Node>, partitioning: PartitioningKind) -> Self {
        Self {
            ctx,
            node,
            partitioning,
            _marker: PhantomData,
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Se conoce sin ejecutar nada.
    pub fn num_partitions(&self) -> usize {
        self.node.num_partitions
    }

    pub fn partitioning(&self) -> PartitioningInfo {
        PartitioningInfo::new(self.partitioning.clone(), self.num_partitions())
    }

    /// Linaje de la colección como DAG serializable.
    pub fn explain(&self) -> Dag {
        Dag::from_plan(&self.node)
    }

    pub fn is_cached(&self) -> bool {
        self.node.is_materialized_cache()
    }

    pub(crate) fn narrow<U, F>(
        &self,
        label: &str,
        kind: NarrowKind,
        partitioning: PartitioningKind,
        f: F,
    ) -> Dataset<U>
    where
        U: Data,
        F: Fn(&TaskContext, Vec<T>) -> Result<Vec<U>> + Send + Sync + 'static,
    {
        let node = Node::new(
            label,
            self.num_partitions(),
            Op::Narrow {
                kind,
                input: Arc::clone(&self.node),
                f: narrow_fn(f),
            },
        );
        Dataset::from_node(self.ctx.clone(), node, partitioning)
    }

    /* =========================
       Transformaciones estrechas
       ========================= */

    /// map: aplica una función a cada registro.
    pub fn map<U, F>(&self, f: F) -> Dataset<U>
    where
        U: Data,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.narrow("map", NarrowKind::Map, PartitioningKind::Unknown, move |_, rows| {
            Ok(rows.into_iter().map(&f).collect())
        })
    }

    /// filter: deja pasar sólo los registros que cumplan el predicado.
    pub fn filter<F>(&self, f: F) -> Dataset<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.narrow("filter", NarrowKind::Filter, self.partitioning.clone(), move |_, rows| {
            Ok(rows.into_iter().filter(|r| f(r)).collect())
        })
    }

    /// flat_map: cada registro genera cero, uno o muchos registros.
    pub fn flat_map<U, I, F>(&self, f: F) -> Dataset<U>
    where
        U: Data,
        I: IntoIterator<Item = U>,
        F: Fn(T) -> I + Send + Sync + 'static,
    {
        self.narrow("flat_map", NarrowKind::FlatMap, PartitioningKind::Unknown, move |_, rows| {
            Ok(rows.into_iter().flat_map(&f).collect())
        })
    }

    /// map fallible: el primer error aborta la tarea de la partición y la
    /// acción termina con un único `ActionFailed`.
    pub fn try_map<U, E, F>(&self, f: F) -> Dataset<U>
    where
        U: Data,
        E: fmt::Display,
        F: Fn(T) -> std::result::Result<U, E> + Send + Sync + 'static,
    {
        self.narrow("try_map", NarrowKind::Map, PartitioningKind::Unknown, move |ctx, rows| {
            rows.into_iter()
                .map(|r| {
                    f(r).map_err(|e| EngineError::Record {
                        partition: ctx.partition_index(),
                        message: e.to_string(),
                    })
                })
                .collect()
        })
    }

    /// map_partitions: la función ve la partición completa.
    pub fn map_partitions<U, I, F>(&self, f: F) -> Dataset<U>
    where
        U: Data,
        I: IntoIterator<Item = U>,
        F: Fn(Vec<T>) -> I + Send + Sync + 'static,
    {
        self.narrow(
            "map_partitions",
            NarrowKind::MapPartitions,
            PartitioningKind::Unknown,
            move |_, rows| Ok(f(rows).into_iter().collect()),
        )
    }

    pub fn map_partitions_with_index<U, I, F>(&self, f: F) -> Dataset<U>
    where
        U: Data,
        I: IntoIterator<Item = U>,
        F: Fn(usize, Vec<T>) -> I + Send + Sync + 'static,
    {
        self.narrow(
            "map_partitions_with_index",
            NarrowKind::MapPartitions,
            PartitioningKind::Unknown,
            move |ctx, rows| Ok(f(ctx.partition_index(), rows).into_iter().collect()),
        )
    }

    /// Una fila por partición con su contenido completo.
    pub fn glom(&self) -> Dataset<Vec<T>> {
        self.narrow(
            "glom",
            NarrowKind::MapPartitions,
            PartitioningKind::Unknown,
            |_, rows| Ok(vec![rows]),
        )
    }

    pub fn key_by<K, F>(&self, f: F) -> Dataset<(K, T)>
    where
        K: Key,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        self.narrow("key_by", NarrowKind::Map, PartitioningKind::Unknown, move |_, rows| {
            Ok(rows.into_iter().map(|r| (f(&r), r)).collect())
        })
    }

    /// Concatena particiones: primero las de `self`, luego las de `other`.
    pub fn union(&self, other: &Dataset<T>) -> Dataset<T> {
        let node = Node::new(
            "union",
            self.num_partitions() + other.num_partitions(),
            Op::Union {
                inputs: vec![Arc::clone(&self.node), Arc::clone(&other.node)],
            },
        );
        Dataset::from_node(self.ctx.clone(), node, PartitioningKind::Unknown)
    }

    /* =========================
       Particiones
       ========================= */

    /// Shuffle completo a `num_partitions` particiones. El destino de cada
    /// registro es hash(partición de origen, posición) mod N.
    pub fn repartition(&self, num_partitions: usize) -> Result<Dataset<T>> {
        check_partitions(num_partitions)?;
        let n = num_partitions;
        Ok(exchange(
            self,
            "repartition",
            ShuffleKind::Repartition,
            n,
            PartitioningKind::Positional,
            move |ctx, rows: Vec<T>| {
                let origin = ctx.partition_index();
                Ok(bucketize(rows, n, |pos, _| hash_partition(&(origin, pos), n)))
            },
            |_, parts: Vec<Vec<T>>| Ok(concat_in_order(parts)),
        ))
    }

    /// Junta particiones adyacentes sin shuffle. Sólo puede reducir el
    /// número de particiones; el resultado puede quedar desbalanceado.
    pub fn coalesce(&self, num_partitions: usize) -> Result<Dataset<T>> {
        check_partitions(num_partitions)?;
        let current = self.num_partitions();
        if num_partitions > current {
            return Err(EngineError::PartitionCount(format!(
                "coalesce({}) no puede aumentar las {} particiones actuales, use repartition",
                num_partitions, current
            )));
        }

        let groups = (0..num_partitions)
            .map(|i| (i * current / num_partitions)..((i + 1) * current / num_partitions))
            .collect();
        let node = Node::new(
            "coalesce",
            num_partitions,
            Op::Coalesce {
                input: Arc::clone(&self.node),
                groups,
                concat: concat_fn::<T>(),
            },
        );
        let kind = match self.partitioning {
            PartitioningKind::Contiguous => PartitioningKind::Contiguous,
            _ => PartitioningKind::Unknown,
        };
        Ok(Dataset::from_node(self.ctx.clone(), node, kind))
    }

    /// Fija las particiones la primera vez que una acción las materializa.
    pub fn cache(&self) -> Dataset<T> {
        if matches!(self.node.op, Op::Cached { .. }) {
            return self.clone();
        }
        let node = Node::new(
            "cache",
            self.num_partitions(),
            Op::Cached {
                input: Arc::clone(&self.node),
                slot: Arc::new(OnceLock::new()),
                pin: pin_fn::<T>(),
            },
        );
        Dataset::from_node(self.ctx.clone(), node, self.partitioning.clone())
    }

    /// Materializa ya y devuelve una fuente en memoria con las mismas
    /// particiones. El resultado no referencia el linaje anterior, así que
    /// los estados viejos de una iteración se liberan al soltarlos.
    pub fn checkpoint(&self) -> Result<Dataset<T>> {
        let parts = self.run_partitions("checkpoint")?;
        let node = Node::new(
            "checkpoint",
            parts.len(),
            Op::Source {
                load: loader_from_partitions(Arc::new(parts)),
            },
        );
        Ok(Dataset::from_node(self.ctx.clone(), node, self.partitioning.clone()))
    }

    /* =========================
       Acciones
       ========================= */

    pub(crate) fn run_partitions(&self, action: &str) -> Result<Vec<Vec<T>>> {
        self.ctx
            .run_job(action, &self.node)?
            .into_iter()
            .map(downcast::<T>)
            .collect()
    }

    pub(crate) fn collect_as(&self, action: &str) -> Result<Vec<T>> {
        Ok(self.run_partitions(action)?.into_iter().flatten().collect())
    }

    /// Todas las filas, en orden de partición.
    pub fn collect(&self) -> Result<Vec<T>> {
        self.collect_as("collect")
    }

    pub fn collect_partitions(&self) -> Result<Vec<Vec<T>>> {
        self.run_partitions("collect_partitions")
    }

    pub fn count(&self) -> Result<usize> {
        let sizes = self
            .narrow::<usize, _>("count", NarrowKind::MapPartitions, PartitioningKind::Unknown, |_, rows| {
                Ok(vec![rows.len()])
            })
            .collect_as("count")?;
        Ok(sizes.into_iter().sum())
    }

    /// Reduce primero dentro de cada partición y después en el driver.
    pub fn reduce<F>(&self, f: F) -> Result<Option<T>>
    where
        F: Fn(T, T) -> T + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let local = Arc::clone(&f);
        let partials = self
            .narrow("reduce", NarrowKind::MapPartitions, PartitioningKind::Unknown, move |_, rows| {
                Ok(rows.into_iter().reduce(|a, b| local(a, b)).into_iter().collect())
            })
            .collect_as("reduce")?;
        Ok(partials.into_iter().reduce(|a, b| f(a, b)))
    }

    /// `zero` se usa una vez por partición y otra vez en el driver.
    pub fn fold<F>(&self, zero: T, f: F) -> Result<T>
    where
        F: Fn(T, T) -> T + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let g = Arc::clone(&f);
        self.aggregate(zero, move |acc, x| f(acc, x), move |a, b| g(a, b))
    }

    pub fn aggregate<U, S, C>(&self, zero: U, seq: S, comb: C) -> Result<U>
    where
        U: Data,
        S: Fn(U, T) -> U + Send + Sync + 'static,
        C: Fn(U, U) -> U + Send + Sync + 'static,
    {
        let local_zero = zero.clone();
        let partials = self
            .narrow(
                "aggregate",
                NarrowKind::MapPartitions,
                PartitioningKind::Unknown,
                move |_, rows| Ok(vec![rows.into_iter().fold(local_zero.clone(), &seq)]),
            )
            .collect_as("aggregate")?;
        Ok(partials.into_iter().fold(zero, comb))
    }

    /// Las primeras `n` filas en orden de partición.
    pub fn take(&self, n: usize) -> Result<Vec<T>> {
        let mut rows = self
            .narrow("take", NarrowKind::MapPartitions, PartitioningKind::Unknown, move |_, rows| {
                Ok(rows.into_iter().take(n).collect())
            })
            .collect_as("take")?;
        rows.truncate(n);
        Ok(rows)
    }

    pub fn first(&self) -> Result<Option<T>> {
        Ok(self.take(1)?.into_iter().next())
    }

    /// Los `n` registros con la clave más alta (top-N). Cada partición
    /// selecciona sus candidatos con un heap acotado y el driver los junta.
    pub fn top_by<K, F>(&self, n: usize, key: F) -> Result<Vec<T>>
    where
        K: Ord + 'static,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        self.select_n("top_by", n, key, true)
    }

    /// Los `n` registros con la clave más baja (bottom-N).
    pub fn take_ordered_by<K, F>(&self, n: usize, key: F) -> Result<Vec<T>>
    where
        K: Ord + 'static,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        self.select_n("take_ordered_by", n, key, false)
    }

    fn select_n<K, F>(&self, label: &str, n: usize, key: F, largest: bool) -> Result<Vec<T>>
    where
        K: Ord + 'static,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        if n == 0 {
            return Ok(Vec::new());
        }
        let key = Arc::new(key);
        let local_key = Arc::clone(&key);
        let candidates = self
            .narrow(label, NarrowKind::MapPartitions, PartitioningKind::Unknown, move |_, rows| {
                Ok(best_n(rows, n, &*local_key, largest))
            })
            .collect_as(label)?;
        Ok(best_n(candidates, n, &*key, largest))
    }

    /// Índice global estable (orden de partición y posición). Lanza un job
    /// previo para contar filas por partición.
    pub fn zip_with_index(&self) -> Result<Dataset<(T, u64)>> {
        let sizes = self
            .narrow::<usize, _>(
                "zip_with_index",
                NarrowKind::MapPartitions,
                PartitioningKind::Unknown,
                |_, rows| Ok(vec![rows.len()]),
            )
            .collect_as("zip_with_index (conteo)")?;

        let mut offsets = Vec::with_capacity(sizes.len());
        let mut acc = 0_u64;
        for s in sizes {
            offsets.push(acc);
            acc += s as u64;
        }
        let offsets = Arc::new(offsets);

        Ok(self.narrow(
            "zip_with_index",
            NarrowKind::MapPartitions,
            self.partitioning.clone(),
            move |ctx, rows| {
                let base = offsets.get(ctx.partition_index()).copied().unwrap_or(0);
                Ok(rows
                    .into_iter()
                    .enumerate()
                    .map(|(i, r)| (r, base + i as u64))
                    .collect())
            },
        ))
    }

    /// Orden global por una clave derivada (ver `sort_by_key`).
    pub fn sort_by<K, F>(&self, f: F, ascending: bool) -> Result<Dataset<T>>
    where
        K: Key + Ord,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        Ok(self.key_by(f).sort_by_key(ascending)?.values())
    }

    /// Producto cartesiano con clave unitaria: todo pasa por un único
    /// reducer. Para un lado chico conviene `broadcast_join_with(.., Cross)`.
    pub fn cartesian<U: Data>(&self, other: &Dataset<U>) -> Dataset<(T, U)> {
        self.map(|t| ((), t)).join(&other.map(|u| ((), u))).values()
    }
}

impl<T: Key> Dataset<T> {
    pub fn distinct(&self) -> Dataset<T> {
        self.map(|x| (x, ())).reduce_by_key(|a, _| a).keys()
    }
}

/* =========================
   Selección acotada (top-N)
   ========================= */

/// Mayor = mejor candidato. Con empate gana el que llegó antes.
struct Ranked<K, T> {
    key: K,
    seq: usize,
    largest: bool,
    row: T,
}

impl<K: Ord, T> Ord for Ranked<K, T> {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_key = if self.largest {
            self.key.cmp(&other.key)
        } else {
            other.key.cmp(&self.key)
        };
        by_key.then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<K: Ord, T> PartialOrd for Ranked<K, T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord, T> PartialEq for Ranked<K, T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K: Ord, T> Eq for Ranked<K, T> {}

fn best_n<T, K, F>(rows: Vec<T>, n: usize, key: &F, largest: bool) -> Vec<T>
where
    K: Ord,
    F: Fn(&T) -> K + ?Sized,
{
    // min-heap de los n mejores: la cima es el peor de ellos
    let mut heap: BinaryHeap<Reverse<Ranked<K, T>>> = BinaryHeap::with_capacity(n + 1);
    for (seq, row) in rows.into_iter().enumerate() {
        heap.push(Reverse(Ranked {
            key: key(&row),
            seq,
            largest,
            row,
        }));
        if heap.len() > n {
            heap.pop();
        }
    }
    heap.into_sorted_vec()
        .into_iter()
        .map(|Reverse(r)| r.row)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn ctx() -> Context {
        Context::new(EngineConfig::default().with_workers(3)).unwrap()
    }

    #[test]
    fn map_aplica_funcion_a_cada_registro() {
        let c = ctx();
        let ds = c.parallelize(vec![1, 2, 3, 4], 2).unwrap();
        assert_eq!(ds.map(|x| x * 10).collect().unwrap(), vec![10, 20, 30, 40]);
    }

    #[test]
    fn filter_y_flat_map_preservan_el_orden_dentro_de_la_particion() {
        let c = ctx();
        let lines = c
            .parallelize(vec!["a b".to_string(), "".to_string(), "c d e".to_string()], 2)
            .unwrap();
        let words = lines
            .filter(|l| !l.is_empty())
            .flat_map(|l| l.split_whitespace().map(str::to_string).collect::<Vec<_>>());
        assert_eq!(words.collect().unwrap(), vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn transformaciones_son_perezosas() {
        let c = ctx();
        let ds = c.parallelize(vec![1, 2, 3], 3).unwrap();
        let _mapped = ds.map(|x| x + 1).filter(|x| x % 2 == 0);
        assert!(c.jobs().is_empty());
    }

    #[test]
    fn try_map_con_error_aborta_la_accion() {
        let c = ctx();
        let ds = c.parallelize(vec!["1", "2", "x", "4"], 2).unwrap();
        let parsed = ds.try_map(|s| s.parse::<i32>());
        match parsed.collect() {
            Err(EngineError::ActionFailed { total, failures }) => {
                assert_eq!(total, 2);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].partition, 1);
            }
            other => panic!("se esperaba ActionFailed, llegó {other:?}"),
        }
    }

    #[test]
    fn map_partitions_calcula_min_y_max_por_particion() {
        let c = ctx();
        let ds = c.from_partitions(vec![vec![3, 9, 1], vec![7], vec![]]).unwrap();
        let minmax = ds.map_partitions(|rows| {
            let min = rows.iter().min().copied();
            let max = rows.iter().max().copied();
            min.zip(max)
        });
        assert_eq!(minmax.collect().unwrap(), vec![(1, 9), (7, 7)]);
    }

    #[test]
    fn glom_y_map_partitions_with_index_muestran_el_layout() {
        let c = ctx();
        let ds = c.parallelize((1..=5).collect::<Vec<u32>>(), 2).unwrap();
        assert_eq!(ds.glom().collect().unwrap(), vec![vec![1, 2], vec![3, 4, 5]]);

        let tagged = ds.map_partitions_with_index(|i, rows| rows.into_iter().map(move |r| (i, r)));
        assert_eq!(
            tagged.collect().unwrap(),
            vec![(0, 1), (0, 2), (1, 3), (1, 4), (1, 5)]
        );
    }

    #[test]
    fn union_concatena_particiones() {
        let c = ctx();
        let a = c.parallelize(vec![1, 2], 1).unwrap();
        let b = c.parallelize(vec![3, 4, 5], 2).unwrap();
        let u = a.union(&b);
        assert_eq!(u.num_partitions(), 3);
        assert_eq!(u.collect().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn coalesce_junta_solo_particiones_adyacentes() {
        let c = ctx();
        let ds = c
            .from_partitions(vec![vec![1], vec![2], vec![3], vec![4], vec![5]])
            .unwrap();
        let merged = ds.coalesce(2).unwrap();
        assert_eq!(merged.num_partitions(), 2);
        assert_eq!(
            merged.collect_partitions().unwrap(),
            vec![vec![1, 2], vec![3, 4, 5]]
        );
    }

    #[test]
    fn coalesce_no_puede_aumentar_particiones() {
        let c = ctx();
        let ds = c.parallelize(vec![1, 2, 3], 2).unwrap();
        assert!(matches!(ds.coalesce(3), Err(EngineError::PartitionCount(_))));
        assert!(matches!(ds.coalesce(0), Err(EngineError::PartitionCount(_))));
    }

    #[test]
    fn repartition_conserva_los_registros() {
        let c = ctx();
        let ds = c.parallelize((0..100).collect::<Vec<u32>>(), 2).unwrap();
        let wide = ds.repartition(7).unwrap();
        assert_eq!(wide.num_partitions(), 7);

        let parts = wide.collect_partitions().unwrap();
        assert_eq!(parts.len(), 7);
        let mut all: Vec<u32> = parts.into_iter().flatten().collect();
        all.sort();
        assert_eq!(all, (0..100).collect::<Vec<u32>>());

        let job = c.last_job().unwrap();
        assert_eq!(job.stages, 2);
        assert_eq!(job.shuffled_records, 100);
    }

    #[test]
    fn cache_evita_recalcular_el_linaje() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let c = ctx();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let ds = c
            .parallelize(vec![1, 2, 3, 4], 2)
            .unwrap()
            .map(move |x| {
                seen.fetch_add(1, Ordering::SeqCst);
                x * 2
            })
            .cache();

        assert!(!ds.is_cached());
        assert_eq!(ds.count().unwrap(), 4);
        assert!(ds.is_cached());
        assert_eq!(ds.collect().unwrap(), vec![2, 4, 6, 8]);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn checkpoint_corta_el_linaje_y_conserva_particiones() {
        let c = ctx();
        let sums = c
            .parallelize(vec![("a", 1), ("b", 2), ("a", 3)], 2)
            .unwrap()
            .reduce_by_key(|a, b| a + b);
        assert!(sums.explain().nodes.len() > 1);

        let fixed = sums.checkpoint().unwrap();
        let dag = fixed.explain();
        assert_eq!(dag.nodes.len(), 1);
        assert_eq!(dag.nodes[0].op, "source");
        assert_eq!(fixed.num_partitions(), sums.num_partitions());
        assert_eq!(fixed.partitioning(), sums.partitioning());

        let mut rows = fixed.collect().unwrap();
        rows.sort();
        assert_eq!(rows, vec![("a", 4), ("b", 2)]);
    }

    #[test]
    fn reduce_fold_y_aggregate() {
        let c = ctx();
        let ds = c.parallelize((1..=10).collect::<Vec<i64>>(), 3).unwrap();
        assert_eq!(ds.reduce(|a, b| a + b).unwrap(), Some(55));
        // zero se aplica por partición (3) y en el driver (1)
        assert_eq!(ds.fold(1, |a, b| a + b).unwrap(), 59);

        let (sum, count) = ds
            .aggregate((0_i64, 0_u64), |(s, n), x| (s + x, n + 1), |a, b| (a.0 + b.0, a.1 + b.1))
            .unwrap();
        assert_eq!((sum, count), (55, 10));

        let empty = c.parallelize(Vec::<i64>::new(), 2).unwrap();
        assert_eq!(empty.reduce(|a, b| a + b).unwrap(), None);
    }

    #[test]
    fn take_first_y_count() {
        let c = ctx();
        let ds = c.parallelize((1..=9).collect::<Vec<u32>>(), 4).unwrap();
        assert_eq!(ds.take(3).unwrap(), vec![1, 2, 3]);
        assert_eq!(ds.first().unwrap(), Some(1));
        assert_eq!(ds.count().unwrap(), 9);
    }

    #[test]
    fn top_by_y_take_ordered_by_seleccionan_n() {
        let c = ctx();
        let ds = c
            .parallelize(
                vec![("a", 5), ("b", 1), ("c", 9), ("d", 7), ("e", 3), ("f", 9)],
                3,
            )
            .unwrap();

        let top = ds.top_by(3, |(_, v)| *v).unwrap();
        assert_eq!(top, vec![("c", 9), ("f", 9), ("d", 7)]);

        let bottom = ds.take_ordered_by(2, |(_, v)| *v).unwrap();
        assert_eq!(bottom, vec![("b", 1), ("e", 3)]);

        assert!(ds.top_by(0, |(_, v)| *v).unwrap().is_empty());
    }

    #[test]
    fn zip_with_index_numera_en_orden_global() {
        let c = ctx();
        let ds = c.parallelize(vec!["a", "b", "c", "d", "e"], 3).unwrap();
        let indexed = ds.zip_with_index().unwrap().collect().unwrap();
        assert_eq!(
            indexed,
            vec![("a", 0), ("b", 1), ("c", 2), ("d", 3), ("e", 4)]
        );
    }

    #[test]
    fn sort_by_ordena_globalmente() {
        let c = ctx();
        let ds = c.parallelize(vec![5, 3, 9, 1, 7, 2, 8], 3).unwrap();
        assert_eq!(
            ds.sort_by(|x| *x, true).unwrap().collect().unwrap(),
            vec![1, 2, 3, 5, 7, 8, 9]
        );
        assert_eq!(
            ds.sort_by(|x| *x, false).unwrap().collect().unwrap(),
            vec![9, 8, 7, 5, 3, 2, 1]
        );
    }

    #[test]
    fn distinct_elimina_duplicados() {
        let c = ctx();
        let ds = c.parallelize(vec![1, 2, 2, 3, 1, 3, 3], 3).unwrap();
        let mut out = ds.distinct().collect().unwrap();
        out.sort();
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn cartesian_cruza_todo_con_todo() {
        let c = ctx();
        let a = c.parallelize(vec![1, 2], 2).unwrap();
        let b = c.parallelize(vec!['x', 'y', 'z'], 2).unwrap();
        let mut out = a.cartesian(&b).collect().unwrap();
        out.sort();
        assert_eq!(out.len(), 6);
        assert_eq!(out[0], (1, 'x'));
        assert_eq!(out[5], (2, 'z'));
    }
}
