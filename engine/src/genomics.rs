//! Algoritmos de bioinformática: conteo de bases en FASTA con combinación
//! dentro de la partición y rank product entre estudios.

use serde::{Deserialize, Serialize};
use std::{
    cmp::{Ordering, Reverse},
    collections::{BTreeMap, HashMap},
    hash::{Hash, Hasher},
};

use crate::{
    combine::{Average, CombinerSpec, MeanAcc},
    dataset::{Dataset, Key},
    error::{EngineError, Result},
};

/// Clave que cuenta registros FASTA (líneas de encabezado `>`).
pub const RECORD_KEY: char = 'z';

/// Bases válidas, en el orden en que se reportan.
pub const DNA_BASES: [char; 5] = ['A', 'T', 'C', 'G', 'N'];

/// Cuenta toda la partición en un único mapa: a lo sumo un par por base
/// más uno de `RECORD_KEY`.
fn count_partition(lines: Vec<String>) -> Vec<(char, u64)> {
    let mut local: HashMap<char, u64> = HashMap::new();
    for line in &lines {
        if line.starts_with('>') {
            *local.entry(RECORD_KEY).or_insert(0) += 1;
            continue;
        }
        for base in line.chars().map(|c| c.to_ascii_uppercase()) {
            if DNA_BASES.contains(&base) {
                *local.entry(base).or_insert(0) += 1;
            }
        }
    }
    local.into_iter().collect()
}

/// Frecuencia de cada base sobre líneas FASTA. Los encabezados cuentan
/// bajo `RECORD_KEY`.
pub fn dna_base_count(lines: &Dataset<String>) -> Dataset<(char, u64)> {
    lines.map_partitions(count_partition).reduce_by_key(|a, b| a + b)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseCounts {
    pub records: u64,
    pub bases: BTreeMap<char, u64>,
}

impl BaseCounts {
    pub fn get(&self, base: char) -> u64 {
        self.bases.get(&base).copied().unwrap_or(0)
    }

    pub fn total_bases(&self) -> u64 {
        self.bases.values().sum()
    }
}

pub fn count_bases(lines: &Dataset<String>) -> Result<BaseCounts> {
    let mut counts = BaseCounts::default();
    for (key, n) in dna_base_count(lines).collect()? {
        if key == RECORD_KEY {
            counts.records = n;
        } else {
            counts.bases.insert(key, n);
        }
    }
    Ok(counts)
}

/* =========================
   Rank product
   ========================= */

/// f64 con orden total, para usarlo como clave de orden.
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for Score {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

/// Media geométrica de ranks de un ítem y en cuántos estudios apareció.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankProduct {
    pub rank_product: f64,
    pub studies: u32,
}

/// Suma de ln(rank) y cantidad de estudios.
#[derive(Debug, Clone, Copy)]
struct LogRankAcc {
    log_sum: f64,
    studies: u32,
}

impl LogRankAcc {
    fn of(rank: u64) -> Self {
        Self {
            log_sum: (rank as f64).ln(),
            studies: 1,
        }
    }

    fn merge(self, other: Self) -> Self {
        Self {
            log_sum: self.log_sum + other.log_sum,
            studies: self.studies + other.studies,
        }
    }

    fn finish(self) -> RankProduct {
        RankProduct {
            rank_product: (self.log_sum / self.studies as f64).exp(),
            studies: self.studies,
        }
    }
}

/// Media por ítem dentro de un estudio, con el acumulador (suma, cantidad).
pub fn study_means<K: Key>(values: &Dataset<(K, f64)>) -> Dataset<(K, f64)> {
    values
        .combine_by_key::<MeanAcc, _>(Average)
        .flat_map_values(|acc| acc.mean())
}

/// Rank 1 para el mayor valor absoluto. Orden global por rangos y después
/// `zip_with_index`; los empates se desempatan por clave.
pub fn assign_ranks<K: Key + Ord>(means: &Dataset<(K, f64)>) -> Result<Dataset<(K, u64)>> {
    let sorted = means
        .map(|(k, m)| ((Score(m.abs()), Reverse(k)), ()))
        .sort_by_key(false)?
        .keys();
    Ok(sorted
        .zip_with_index()?
        .map(|((_, Reverse(k)), i)| (k, i + 1)))
}

/// Rank product entre estudios: medias por estudio, ranks por estudio,
/// unión de todos los ranks y media geométrica por ítem. Un valor menor
/// indica un ítem que aparece arriba de forma consistente.
pub fn rank_product<K: Key + Ord>(studies: &[Dataset<(K, f64)>]) -> Result<Dataset<(K, RankProduct)>> {
    let mut ranked = Vec::with_capacity(studies.len());
    for study in studies {
        ranked.push(assign_ranks(&study_means(study))?);
    }
    let Some((first, rest)) = ranked.split_first() else {
        return Err(EngineError::InvalidConfig(
            "rank_product necesita al menos un estudio".to_string(),
        ));
    };
    let all = rest.iter().fold(first.clone(), |acc, r| acc.union(r));

    let spec = CombinerSpec::new(
        LogRankAcc::of,
        |acc: LogRankAcc, rank: u64| acc.merge(LogRankAcc::of(rank)),
        |a: LogRankAcc, b: LogRankAcc| a.merge(b),
    );
    Ok(all
        .combine_by_key::<LogRankAcc, _>(spec)
        .map_values(LogRankAcc::finish))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::EngineConfig, context::Context};

    fn ctx() -> Context {
        Context::new(EngineConfig::default().with_workers(2)).unwrap()
    }

    fn fasta() -> Vec<String> {
        [
            ">sequence1",
            "ATCGATCGATCG",
            "GCTAGCTAGCTA",
            ">sequence2",
            "AAATTTTCCCCGGGG",
            "nnnnatcgatcg",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    #[test]
    fn cuenta_bases_y_registros() {
        let c = ctx();
        let lines = c.parallelize(fasta(), 2).unwrap();
        let counts = count_bases(&lines).unwrap();

        assert_eq!(counts.records, 2);
        assert_eq!(counts.get('A'), 11);
        assert_eq!(counts.get('T'), 12);
        assert_eq!(counts.get('C'), 12);
        assert_eq!(counts.get('G'), 12);
        assert_eq!(counts.get('N'), 4);
        assert_eq!(counts.total_bases(), 51);
    }

    #[test]
    fn combina_dentro_de_la_particion_antes_del_shuffle() {
        let c = ctx();
        let lines = c.parallelize(fasta(), 2).unwrap();
        dna_base_count(&lines).collect().unwrap();

        // a lo sumo 6 claves por partición
        let job = c.last_job().unwrap();
        assert!(job.shuffled_records <= 12, "shuffle de {}", job.shuffled_records);
    }

    #[test]
    fn ranks_por_valor_absoluto_descendente() {
        let c = ctx();
        let means = c
            .parallelize(vec![("g1", 15.0), ("g2", 5.0), ("g3", -30.0), ("g4", 5.0)], 2)
            .unwrap();
        let ranks = assign_ranks(&means).unwrap().collect_as_map().unwrap();
        assert_eq!(ranks["g3"], 1);
        assert_eq!(ranks["g1"], 2);
        // empate: decide la clave
        assert_eq!(ranks["g2"], 3);
        assert_eq!(ranks["g4"], 4);
    }

    #[test]
    fn rank_product_es_la_media_geometrica_entre_estudios() {
        let c = ctx();
        let study1 = c
            .parallelize(vec![("g1", 10.0), ("g1", 20.0), ("g2", 5.0), ("g3", -30.0)], 2)
            .unwrap();
        let study2 = c
            .parallelize(vec![("g1", 50.0), ("g2", 40.0), ("g3", 1.0), ("g4", 0.5)], 3)
            .unwrap();

        let rp = rank_product(&[study1, study2]).unwrap().collect_as_map().unwrap();
        assert_eq!(rp.len(), 4);
        assert!((rp["g1"].rank_product - 2.0_f64.sqrt()).abs() < 1e-9);
        assert!((rp["g2"].rank_product - 6.0_f64.sqrt()).abs() < 1e-9);
        assert!((rp["g3"].rank_product - 3.0_f64.sqrt()).abs() < 1e-9);
        assert_eq!(rp["g1"].studies, 2);
        assert_eq!(rp["g4"].studies, 1);
        assert!((rp["g4"].rank_product - 4.0).abs() < 1e-9);
    }

    #[test]
    fn rank_product_sin_estudios_es_invalido() {
        assert!(matches!(
            rank_product::<&str>(&[]),
            Err(EngineError::InvalidConfig(_))
        ));
    }
}
