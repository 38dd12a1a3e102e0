use serde::{Deserialize, Serialize};
use std::{
    collections::hash_map::DefaultHasher,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::error::{EngineError, Result};

/// Cómo quedaron repartidos los registros de una colección.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitioningKind {
    /// Tras un map arbitrario ya no se sabe nada de la clave.
    Unknown,
    /// Trozos contiguos de la entrada (parallelize).
    Contiguous,
    /// hash(partición de origen, posición) mod N (repartition).
    Positional,
    /// hash(clave) mod N.
    Hash,
    Range { ascending: bool },
    Custom(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitioningInfo {
    pub kind: PartitioningKind,
    pub num_partitions: usize,
}

impl PartitioningInfo {
    pub fn new(kind: PartitioningKind, num_partitions: usize) -> Self {
        Self {
            kind,
            num_partitions,
        }
    }
}

/// Hash determinista de una clave al rango [0, n).
pub fn hash_partition<K: Hash + ?Sized>(key: &K, num_partitions: usize) -> usize {
    let mut h = DefaultHasher::new();
    key.hash(&mut h);
    (h.finish() % num_partitions.max(1) as u64) as usize
}

pub(crate) fn check_partitions(num_partitions: usize) -> Result<()> {
    if num_partitions == 0 {
        return Err(EngineError::PartitionCount(
            "se necesita al menos una partición".to_string(),
        ));
    }
    Ok(())
}

/// Función de particionado por clave (el `partitionFn` de una colección).
pub struct Partitioner<K> {
    num_partitions: usize,
    kind: PartitioningKind,
    assign: Arc<dyn Fn(&K) -> usize + Send + Sync>,
}

impl<K> Clone for Partitioner<K> {
    fn clone(&self) -> Self {
        Self {
            num_partitions: self.num_partitions,
            kind: self.kind.clone(),
            assign: Arc::clone(&self.assign),
        }
    }
}

impl<K> fmt::Debug for Partitioner<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partitioner")
            .field("kind", &self.kind)
            .field("num_partitions", &self.num_partitions)
            .finish()
    }
}

impl<K: Hash + 'static> Partitioner<K> {
    /// Particionador por defecto: hash-mod-N sobre la clave.
    pub fn hash(num_partitions: usize) -> Result<Self> {
        check_partitions(num_partitions)?;
        Ok(Self {
            num_partitions,
            kind: PartitioningKind::Hash,
            assign: Arc::new(move |k: &K| hash_partition(k, num_partitions)),
        })
    }

    /// Igual que `hash` para un N que ya viene validado.
    pub(crate) fn hash_of(num_partitions: usize) -> Self {
        let n = num_partitions.max(1);
        Self {
            num_partitions: n,
            kind: PartitioningKind::Hash,
            assign: Arc::new(move |k: &K| hash_partition(k, n)),
        }
    }
}

impl<K: 'static> Partitioner<K> {
    /// Particionador de usuario. `f(clave, n)` devuelve el índice; un índice
    /// fuera de rango se reduce con mod N para que cada registro caiga en
    /// exactamente una partición.
    pub fn custom<F>(name: &str, num_partitions: usize, f: F) -> Result<Self>
    where
        F: Fn(&K, usize) -> usize + Send + Sync + 'static,
    {
        check_partitions(num_partitions)?;
        Ok(Self {
            num_partitions,
            kind: PartitioningKind::Custom(name.to_string()),
            assign: Arc::new(move |k: &K| f(k, num_partitions) % num_partitions),
        })
    }

    /// Particionado por rangos. Con menos límites que particiones (entrada
    /// vacía o muestra chica) las particiones sobrantes quedan vacías.
    pub(crate) fn range(boundaries: Vec<K>, ascending: bool, num_partitions: usize) -> Self
    where
        K: Ord + Send + Sync,
    {
        let used = boundaries.len() + 1;
        Self {
            num_partitions: num_partitions.max(used),
            kind: PartitioningKind::Range { ascending },
            assign: Arc::new(move |k: &K| {
                let idx = boundaries.partition_point(|b| b < k);
                if ascending {
                    idx
                } else {
                    used - 1 - idx
                }
            }),
        }
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    pub fn kind(&self) -> &PartitioningKind {
        &self.kind
    }

    pub fn info(&self) -> PartitioningInfo {
        PartitioningInfo::new(self.kind.clone(), self.num_partitions)
    }

    pub fn partition_for(&self, key: &K) -> usize {
        (self.assign)(key)
    }
}
