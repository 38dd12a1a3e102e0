//! Consultas de grafos armadas con joins y agregaciones sobre una
//! colección de aristas dirigidas (src, dst).

use serde::{Deserialize, Serialize};

use crate::dataset::{Dataset, Key};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Degree {
    pub in_degree: u64,
    pub out_degree: u64,
}

impl Degree {
    pub fn total(&self) -> u64 {
        self.in_degree + self.out_degree
    }
}

/// Destinos de cada nodo, sin aristas repetidas.
pub fn adjacency_list<K: Key>(edges: &Dataset<(K, K)>) -> Dataset<(K, Vec<K>)> {
    edges.distinct().group_by_key()
}

pub fn out_degrees<K: Key>(edges: &Dataset<(K, K)>) -> Dataset<(K, u64)> {
    edges.map_values(|_| 1_u64).reduce_by_key(|a, b| a + b)
}

pub fn in_degrees<K: Key>(edges: &Dataset<(K, K)>) -> Dataset<(K, u64)> {
    edges.map(|(_, dst)| (dst, 1_u64)).reduce_by_key(|a, b| a + b)
}

/// Grado de entrada y salida por nodo; el lado que falta cuenta 0.
pub fn degrees<K: Key>(edges: &Dataset<(K, K)>) -> Dataset<(K, Degree)> {
    in_degrees(edges)
        .full_outer_join(&out_degrees(edges))
        .map_values(|(i, o)| Degree {
            in_degree: i.unwrap_or(0),
            out_degree: o.unwrap_or(0),
        })
}

/// Pares con aristas en los dos sentidos, cada par una vez (a < b).
pub fn find_bidirectional<K: Key + Ord>(edges: &Dataset<(K, K)>) -> Dataset<(K, K)> {
    let forward = edges.map(|e| (e, ()));
    let backward = edges.map(|(src, dst)| ((dst, src), ()));
    forward
        .join(&backward)
        .keys()
        .filter(|(a, b)| a < b)
        .distinct()
}

/// Caminos de dos saltos a -> b -> c con a != c: (persona, intermedio,
/// sugerencia).
pub fn friends_of_friends<K: Key>(edges: &Dataset<(K, K)>) -> Dataset<(K, K, K)> {
    let by_dst = edges.map(|(src, dst)| (dst, src));
    by_dst
        .join(edges)
        .filter(|(_, (a, c))| a != c)
        .map(|(b, (a, c))| (a, b, c))
        .distinct()
}

/// Triángulos a -> b -> c -> a por composición de self-joins. Se exige
/// a < b < c sobre el camino, así cada triángulo sale una sola vez.
pub fn find_triangles<K: Key + Ord>(edges: &Dataset<(K, K)>) -> Dataset<(K, K, K)> {
    let first = edges
        .filter(|(a, b)| a < b)
        .map(|(a, b)| (b, a));
    let second = edges.filter(|(b, c)| b < c);
    let closing = edges.map(|e| (e, ()));

    first
        .join(&second)
        .map(|(b, (a, c))| ((c, a), b))
        .join(&closing)
        .map(|((c, a), (b, ()))| (a, b, c))
        .distinct()
}
