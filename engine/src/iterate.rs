//! Iteración de punto fijo sobre una relación fija cacheada (PageRank y
//! similares).

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    dataset::{Data, Dataset, Key},
    error::{EngineError, Result},
    graph,
};

/// Relación que no cambia entre iteraciones. Sólo se construye cacheando
/// y materializando la colección, así que el solver nunca la recalcula.
#[derive(Debug, Clone)]
pub struct FixedRelation<T> {
    data: Dataset<T>,
    records: usize,
}

impl<T: Data> FixedRelation<T> {
    pub fn pin(dataset: &Dataset<T>) -> Result<Self> {
        let data = dataset.cache();
        let records = data.count()?;
        info!(
            "relación fija '{}' materializada: {} registros en {} particiones",
            dataset.node.label,
            records,
            data.num_partitions()
        );
        Ok(Self { data, records })
    }

    pub fn dataset(&self) -> &Dataset<T> {
        &self.data
    }

    pub fn records(&self) -> usize {
        self.records
    }
}

/// Resultado de una iteración. `converged == false` no es un error por sí
/// mismo: el llamador decide con `require_converged`.
#[derive(Debug, Clone)]
pub struct IterationOutcome<S> {
    pub state: S,
    pub iterations: usize,
    pub converged: bool,
    pub last_delta: Option<f64>,
}

impl<S> IterationOutcome<S> {
    pub fn require_converged(self) -> Result<S> {
        if self.converged {
            Ok(self.state)
        } else {
            Err(EngineError::ConvergenceNotReached {
                iterations: self.iterations,
                last_delta: self.last_delta,
            })
        }
    }

    pub fn into_state(self) -> S {
        self.state
    }
}

type DeltaFn<S> = Box<dyn Fn(&S, &S) -> Result<f64>>;

/// Bucle acotado: el estado viaja de paso en paso como valor.
pub struct Solver<S> {
    max_iterations: usize,
    criterion: Option<(f64, DeltaFn<S>)>,
}

impl<S> Solver<S> {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            criterion: None,
        }
    }

    /// Corta cuando `delta(anterior, nuevo) < tolerance`.
    pub fn until<F>(mut self, tolerance: f64, delta: F) -> Self
    where
        F: Fn(&S, &S) -> Result<f64> + 'static,
    {
        self.criterion = Some((tolerance, Box::new(delta)));
        self
    }

    /// Sin criterio de corte se hacen exactamente `max_iterations` pasos y
    /// el resultado cuenta como convergido.
    pub fn run<R, F>(&self, initial: S, relation: &FixedRelation<R>, mut step: F) -> Result<IterationOutcome<S>>
    where
        R: Data,
        F: FnMut(&S, &FixedRelation<R>) -> Result<S>,
    {
        let mut state = initial;
        let mut last_delta = None;

        for i in 1..=self.max_iterations {
            let next = step(&state, relation)?;

            if let Some((tolerance, delta)) = &self.criterion {
                let d = delta(&state, &next)?;
                debug!("iteración {}: delta = {:e}", i, d);
                last_delta = Some(d);
                if d < *tolerance {
                    info!("convergió en {} iteraciones (delta {:e})", i, d);
                    return Ok(IterationOutcome {
                        state: next,
                        iterations: i,
                        converged: true,
                        last_delta,
                    });
                }
            }
            state = next;
        }

        Ok(IterationOutcome {
            state,
            iterations: self.max_iterations,
            converged: self.criterion.is_none(),
            last_delta,
        })
    }
}

/// Atajo sin criterio de convergencia.
pub fn iterate<S, R, F>(initial: S, relation: &FixedRelation<R>, max_iterations: usize, step: F) -> Result<S>
where
    R: Data,
    F: FnMut(&S, &FixedRelation<R>) -> Result<S>,
{
    Ok(Solver::new(max_iterations).run(initial, relation, step)?.state)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankConfig {
    pub damping: f64,
    pub max_iterations: usize,
    /// `None`: siempre se hacen `max_iterations` pasos.
    pub tolerance: Option<f64>,
    pub initial_rank: f64,
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            damping: 0.85,
            max_iterations: 20,
            tolerance: Some(1e-6),
            initial_rank: 1.0,
        }
    }
}

impl RankConfig {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerance(mut self, tolerance: Option<f64>) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_initial_rank(mut self, initial_rank: f64) -> Self {
        self.initial_rank = initial_rank;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.damping) {
            return Err(EngineError::InvalidConfig(format!(
                "damping debe estar en [0, 1], llegó {}",
                self.damping
            )));
        }
        Ok(())
    }
}

/// Mayor diferencia absoluta de rank entre dos estados. Una clave que
/// falta en un lado cuenta como 0.
pub fn max_rank_delta<K: Key>(prev: &Dataset<(K, f64)>, next: &Dataset<(K, f64)>) -> Result<f64> {
    prev.full_outer_join(next)
        .map(|(_, (a, b))| (a.unwrap_or(0.0) - b.unwrap_or(0.0)).abs())
        .fold(0.0, f64::max)
}

/// Propagación de rank sobre una lista de adyacencia fija.
///
/// En cada paso: join de links con ranks, cada nodo reparte su rank en
/// partes iguales entre sus destinos, `reduce_by_key(+)` y
/// `(1 - d) + d * suma`. Cada estado pasa por `checkpoint`: el siguiente
/// paso parte de una fuente en memoria y el estado anterior se libera, así
/// el plan no crece con las iteraciones.
pub fn rank_propagation<K: Key>(
    links: &FixedRelation<(K, Vec<K>)>,
    config: &RankConfig,
) -> Result<IterationOutcome<Dataset<(K, f64)>>> {
    config.validate()?;
    let damping = config.damping;
    let initial_rank = config.initial_rank;

    let initial = links.dataset().map_values(move |_| initial_rank).checkpoint()?;

    let mut solver: Solver<Dataset<(K, f64)>> = Solver::new(config.max_iterations);
    if let Some(tolerance) = config.tolerance {
        solver = solver.until(tolerance, |prev, next| max_rank_delta(prev, next));
    }

    solver.run(initial, links, |ranks, links| {
        let contributions = links
            .dataset()
            .join(ranks)
            .flat_map(|(_, (dests, rank))| {
                let share = rank / dests.len().max(1) as f64;
                dests.into_iter().map(move |d| (d, share))
            });
        // un nodo con links conserva su rank aunque nadie le apunte
        let keep = links.dataset().map_values(|_| 0.0);

        let next = contributions
            .union(&keep)
            .reduce_by_key(|a, b| a + b)
            .map_values(move |sum| (1.0 - damping) + damping * sum)
            .checkpoint()?;
        Ok(next)
    })
}

/// PageRank desde una lista de aristas (src, dst).
pub fn pagerank_from_edges<K: Key>(
    edges: &Dataset<(K, K)>,
    config: &RankConfig,
) -> Result<IterationOutcome<Dataset<(K, f64)>>> {
    let links = FixedRelation::pin(&graph::adjacency_list(edges))?;
    rank_propagation(&links, config)
}
