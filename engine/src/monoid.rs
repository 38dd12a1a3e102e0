//! Chequeos de ley de monoide para tests y depuración. El runtime nunca
//! los invoca: un combinador que no es asociativo da resultados que
//! dependen del particionado, y esto sirve para detectarlo a tiempo.

use std::fmt::Debug;

use crate::{
    combine::Combiner,
    context::Context,
    dataset::{Data, Key},
    error::{EngineError, Result},
};

/// `merge(merge(a, b), c) == merge(a, merge(b, c))` para cada terna
/// consecutiva de `samples`.
pub fn check_associative<C, F>(samples: &[C], merge: F) -> Result<()>
where
    C: Clone + PartialEq + Debug,
    F: Fn(C, C) -> C,
{
    for w in samples.windows(3) {
        let (a, b, c) = (&w[0], &w[1], &w[2]);
        let left = merge(merge(a.clone(), b.clone()), c.clone());
        let right = merge(a.clone(), merge(b.clone(), c.clone()));
        if left != right {
            return Err(EngineError::MonoidViolation(format!(
                "merge no es asociativa con {:?}, {:?}, {:?}: {:?} != {:?}",
                a, b, c, left, right
            )));
        }
    }
    Ok(())
}

/// Revisa un combinador completo sobre `values`:
/// - `merge_value(c, v) == merge_combiners(c, create_combiner(v))`
/// - `merge_combiners` asociativa sobre los acumuladores de cada valor.
pub fn check_combiner<V, C, S>(combiner: &S, values: &[V]) -> Result<()>
where
    V: Clone + Debug,
    C: Clone + PartialEq + Debug,
    S: Combiner<V, C>,
{
    for pair in values.windows(2) {
        let acc = combiner.create_combiner(pair[0].clone());
        let by_value = combiner.merge_value(acc.clone(), pair[1].clone());
        let by_merge = combiner.merge_combiners(acc, combiner.create_combiner(pair[1].clone()));
        if by_value != by_merge {
            return Err(EngineError::MonoidViolation(format!(
                "merge_value({:?}) = {:?} pero merge_combiners da {:?}",
                pair[1], by_value, by_merge
            )));
        }
    }

    let singles: Vec<C> = values
        .iter()
        .map(|v| combiner.create_combiner(v.clone()))
        .collect();
    check_associative(&singles, |a, b| combiner.merge_combiners(a, b))
}

/// Corre `combine_by_key` con cada número de particiones y exige el mismo
/// resultado en todos los casos.
pub fn check_partition_invariance<K, V, C, S>(
    ctx: &Context,
    data: Vec<(K, V)>,
    combiner: S,
    partition_counts: &[usize],
) -> Result<()>
where
    K: Key + Ord + Debug,
    V: Data,
    C: Data + PartialEq + Debug,
    S: Combiner<V, C> + Clone,
{
    let mut baseline: Option<(usize, Vec<(K, C)>)> = None;

    for &n in partition_counts {
        let mut result = ctx
            .parallelize(data.clone(), n)?
            .combine_by_key::<C, S>(combiner.clone())
            .collect()?;
        result.sort_by(|a, b| a.0.cmp(&b.0));

        if let Some((base_n, expected)) = &baseline {
            if *expected != result {
                return Err(EngineError::MonoidViolation(format!(
                    "combine_by_key cambia con el particionado: {} particiones dan {:?}, {} dan {:?}",
                    base_n, expected, n, result
                )));
            }
        } else {
            baseline = Some((n, result));
        }
    }
    Ok(())
}
