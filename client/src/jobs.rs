//! Pipelines de ejemplo armados sobre el engine.

use anyhow::{Context as _, Result};
use minispark::{
    genomics, graph, iterate,
    text::{self, tokenize},
    Average, BaseCounts, Context, CsvSource, Dag, Dataset, JoinStrategy, JoinType, JsonLinesSink,
    MeanAcc, Posting, RankConfig, RankProduct, SinkAdapter, TextSource, WholeTextSource, WriteMode,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};
use tracing::info;

/// Fila CSV genérica: columna -> valor.
pub type Row = HashMap<String, String>;

#[derive(Debug, Clone, Deserialize)]
pub struct Edge {
    pub src: String,
    pub dst: String,
}

/// Medición de un estudio: columnas gene_id,value.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneValue {
    pub gene_id: String,
    pub value: f64,
}

fn word_counts(ctx: &Context, input: &str) -> Result<Dataset<(String, u64)>> {
    let lines = ctx.read(&TextSource, input)?;
    Ok(lines
        .flat_map(|l| tokenize(&l))
        .map(|w| (w, 1_u64))
        .reduce_by_key(|a, b| a + b))
}

/// Las `top` palabras más frecuentes; con `output` escribe además el
/// conteo completo en JSONL.
pub fn wordcount(ctx: &Context, input: &str, top: usize, output: Option<&str>) -> Result<Vec<(String, u64)>> {
    let counts = word_counts(ctx, input)?.cache();

    if let Some(dir) = output {
        let files = JsonLinesSink.write(&counts, dir, WriteMode::Overwrite)?;
        info!("wordcount: {} partes escritas en {}", files.len(), dir);
    }

    let mut best = counts.top_by(top, |(_, n)| *n)?;
    // desempate estable por palabra
    best.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Ok(best)
}

pub fn explain_wordcount(ctx: &Context, input: &str) -> Result<Dag> {
    Ok(word_counts(ctx, input)?.explain())
}

fn read_rows(ctx: &Context, input: &str) -> Result<Dataset<Row>> {
    ctx.read(&CsvSource::<Row>::new(), input)
        .with_context(|| format!("leyendo CSV {}", input))
}

/// Promedio de `value` por `key` con el acumulador (suma, cantidad).
pub fn average_by_key(ctx: &Context, input: &str, key: &str, value: &str) -> Result<Vec<(String, f64)>> {
    let key = key.to_string();
    let value = value.to_string();

    let pairs = read_rows(ctx, input)?.try_map(move |row| {
        let k = row.get(&key).cloned().unwrap_or_default();
        let raw = row.get(&value).map(String::as_str).unwrap_or("");
        raw.parse::<f64>()
            .map(|v| (k, v))
            .map_err(|e| format!("valor '{}' inválido en columna '{}': {}", raw, value, e))
    });

    let mut means: Vec<(String, f64)> = pairs
        .combine_by_key::<MeanAcc, _>(Average)
        .flat_map_values(|acc| acc.mean())
        .collect()?;
    means.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(means)
}

/// Fila izquierda con las columnas de la derecha; si un nombre choca, la
/// columna derecha va con prefijo "right_".
fn merge_rows(key: &str, k: String, left: Option<Row>, right: Option<Row>) -> Value {
    let mut obj = Map::new();
    obj.insert(key.to_string(), Value::String(k));
    for (col, v) in left.into_iter().flatten() {
        if col != key {
            obj.insert(col, Value::String(v));
        }
    }
    for (col, v) in right.into_iter().flatten() {
        if col == key {
            continue;
        }
        let name = if obj.contains_key(&col) {
            format!("right_{}", col)
        } else {
            col
        };
        obj.insert(name, Value::String(v));
    }
    Value::Object(obj)
}

pub fn join_csv(
    ctx: &Context,
    left: &str,
    right: &str,
    key: &str,
    how: JoinType,
    strategy: JoinStrategy,
    output: &str,
) -> Result<Vec<PathBuf>> {
    let left_key = key.to_string();
    let right_key = key.to_string();
    let l = read_rows(ctx, left)?.key_by(move |r| r.get(&left_key).cloned().unwrap_or_default());
    let r = read_rows(ctx, right)?.key_by(move |r| r.get(&right_key).cloned().unwrap_or_default());

    let column = key.to_string();
    let joined = l
        .join_using(&r, how, strategy)?
        .map(move |(k, (lv, rv))| merge_rows(&column, k, lv, rv));

    Ok(JsonLinesSink.write(&joined, output, WriteMode::Overwrite)?)
}

fn read_edges(ctx: &Context, input: &str) -> Result<Dataset<(String, String)>> {
    let edges = ctx
        .read(&CsvSource::<Edge>::new(), input)
        .with_context(|| format!("leyendo aristas {}", input))?;
    Ok(edges.map(|e| (e.src, e.dst)))
}

/// Ranks ordenados de mayor a menor.
pub fn pagerank(ctx: &Context, input: &str, config: &RankConfig) -> Result<(Vec<(String, f64)>, usize, bool)> {
    let edges = read_edges(ctx, input)?;
    let outcome = iterate::pagerank_from_edges(&edges, config)?;
    let (iterations, converged) = (outcome.iterations, outcome.converged);
    let mut ranks = outcome.state.collect()?;
    ranks.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Ok((ranks, iterations, converged))
}

pub fn triangles(ctx: &Context, input: &str) -> Result<Vec<(String, String, String)>> {
    let edges = read_edges(ctx, input)?;
    let mut found = graph::find_triangles(&edges).collect()?;
    found.sort();
    Ok(found)
}

/// Conteo de bases sobre archivos FASTA.
pub fn base_count(ctx: &Context, input: &str) -> Result<BaseCounts> {
    let lines = ctx
        .read(&TextSource, input)
        .with_context(|| format!("leyendo FASTA {}", input))?;
    Ok(genomics::count_bases(&lines)?)
}

/// Un CSV por estudio; resultado de menor a mayor rank product.
pub fn rank_product(ctx: &Context, studies: &[String]) -> Result<Vec<(String, RankProduct)>> {
    let mut data = Vec::with_capacity(studies.len());
    for path in studies {
        let values = ctx
            .read(&CsvSource::<GeneValue>::new(), path)
            .with_context(|| format!("leyendo estudio {}", path))?;
        data.push(values.map(|g| (g.gene_id, g.value)));
    }
    info!("rank_product: {} estudios", data.len());

    let mut out = genomics::rank_product(&data)?.collect()?;
    out.sort_by(|a, b| {
        a.1.rank_product
            .total_cmp(&b.1.rank_product)
            .then_with(|| a.0.cmp(&b.0))
    });
    Ok(out)
}

/// Nombre del archivo sin directorios; el documento se identifica así.
fn document_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Índice invertido de los archivos que matchean `input`, ordenado por
/// palabra.
pub fn inverted_index(ctx: &Context, input: &str) -> Result<Vec<(String, Vec<Posting>)>> {
    let docs = ctx
        .read(&WholeTextSource, input)?
        .map(|(path, content)| (document_name(&path), content));
    let mut index = text::inverted_index(&docs, text::DEFAULT_STOPWORDS).collect()?;
    index.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use minispark::EngineConfig;
    use std::{env, fs, path::PathBuf};

    fn temp_dir(sub: &str) -> PathBuf {
        let base = env::temp_dir().join("minispark_cli_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn ctx() -> Context {
        Context::new(EngineConfig::default().with_workers(2)).unwrap()
    }

    #[test]
    fn wordcount_cuenta_entre_archivos() {
        let tmp = temp_dir("wordcount");
        fs::write(tmp.join("a.txt"), "el gato y el perro\n").unwrap();
        fs::write(tmp.join("b.txt"), "El gato.\n").unwrap();
        let out = tmp.join("out");

        let top = wordcount(
            &ctx(),
            &format!("{}/*.txt", tmp.display()),
            2,
            Some(&out.display().to_string()),
        )
        .unwrap();
        assert_eq!(top, vec![("el".to_string(), 3), ("gato".to_string(), 2)]);
        assert!(fs::read_dir(&out).unwrap().count() >= 1);
    }

    #[test]
    fn average_by_key_usa_suma_y_cantidad() {
        let tmp = temp_dir("average");
        fs::write(tmp.join("t.csv"), "sensor,temp\na,1\na,2\nb,10\na,3\n").unwrap();
        let means = average_by_key(&ctx(), &format!("{}/*.csv", tmp.display()), "sensor", "temp").unwrap();
        assert_eq!(means, vec![("a".to_string(), 2.0), ("b".to_string(), 10.0)]);
    }

    #[test]
    fn average_by_key_falla_con_valores_invalidos() {
        let tmp = temp_dir("average_invalido");
        fs::write(tmp.join("t.csv"), "sensor,temp\na,uno\n").unwrap();
        assert!(average_by_key(&ctx(), &format!("{}/*.csv", tmp.display()), "sensor", "temp").is_err());
    }

    #[test]
    fn merge_rows_prefija_columnas_repetidas() {
        let left: Row = [("id", "1"), ("name", "A")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let right: Row = [("id", "1"), ("name", "B"), ("price", "9")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let merged = merge_rows("id", "1".to_string(), Some(left), Some(right));
        assert_eq!(merged["name"], "A");
        assert_eq!(merged["right_name"], "B");
        assert_eq!(merged["price"], "9");

        let only_right = merge_rows("id", "2".to_string(), None, Some(Row::new()));
        assert_eq!(only_right["id"], "2");
    }

    #[test]
    fn join_csv_broadcast_y_shuffle_escriben_lo_mismo() {
        let tmp = temp_dir("join");
        fs::write(tmp.join("ventas.csv"), "product_id,amount\np1,10\np2,5\np9,1\n").unwrap();
        fs::write(tmp.join("catalogo.csv"), "product_id,name\np1,Lapiz\np2,Goma\n").unwrap();

        let c = ctx();
        let mut outputs = Vec::new();
        for (strategy, dir) in [(JoinStrategy::Shuffle, "s"), (JoinStrategy::Broadcast, "b")] {
            let out = tmp.join(dir).display().to_string();
            let files = join_csv(
                &c,
                &tmp.join("ventas.csv").display().to_string(),
                &tmp.join("catalogo.csv").display().to_string(),
                "product_id",
                JoinType::Left,
                strategy,
                &out,
            )
            .unwrap();
            let mut lines: Vec<String> = files
                .iter()
                .flat_map(|f| {
                    fs::read_to_string(f)
                        .unwrap()
                        .lines()
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                })
                .collect();
            lines.sort();
            outputs.push(lines);
        }
        assert_eq!(outputs[0].len(), 3);
        assert_eq!(outputs[0], outputs[1]);
    }

    #[test]
    fn triangles_y_pagerank_desde_csv() {
        let tmp = temp_dir("grafo");
        fs::write(
            tmp.join("edges.csv"),
            "src,dst,relationship\nA,B,amigo\nB,C,amigo\nC,A,amigo\nA,D,colega\n",
        )
        .unwrap();
        let input = tmp.join("edges.csv").display().to_string();
        let c = ctx();

        assert_eq!(
            triangles(&c, &input).unwrap(),
            vec![("A".to_string(), "B".to_string(), "C".to_string())]
        );

        let (ranks, iterations, _) = pagerank(&c, &input, &RankConfig::default()).unwrap();
        assert_eq!(ranks.len(), 4);
        assert!(iterations <= 20);
        assert_eq!(ranks[0].0, "A");
    }

    #[test]
    fn base_count_lee_fasta() {
        let tmp = temp_dir("fasta");
        fs::write(tmp.join("s1.fasta"), ">seq1\nATCG\nGGNN\n").unwrap();
        fs::write(tmp.join("s2.fasta"), ">seq2\natta\n").unwrap();

        let counts = base_count(&ctx(), &format!("{}/*.fasta", tmp.display())).unwrap();
        assert_eq!(counts.records, 2);
        assert_eq!(counts.get('A'), 3);
        assert_eq!(counts.get('T'), 3);
        assert_eq!(counts.get('G'), 3);
        assert_eq!(counts.get('N'), 2);
        assert_eq!(counts.total_bases(), 12);
    }

    #[test]
    fn rank_product_ordena_de_menor_a_mayor() {
        let tmp = temp_dir("rank_product");
        fs::write(tmp.join("e1.csv"), "gene_id,value\ng1,10\ng1,20\ng2,5\ng3,-30\n").unwrap();
        fs::write(tmp.join("e2.csv"), "gene_id,value\ng1,50\ng2,40\ng3,1\n").unwrap();
        let studies = vec![
            tmp.join("e1.csv").display().to_string(),
            tmp.join("e2.csv").display().to_string(),
        ];

        let out = rank_product(&ctx(), &studies).unwrap();
        let genes: Vec<&str> = out.iter().map(|(g, _)| g.as_str()).collect();
        assert_eq!(genes, vec!["g1", "g3", "g2"]);
        assert!(out.iter().all(|(_, rp)| rp.studies == 2));
    }

    #[test]
    fn rank_product_falla_sin_estudios() {
        assert!(rank_product(&ctx(), &[]).is_err());
    }

    #[test]
    fn inverted_index_usa_el_nombre_de_archivo() {
        let tmp = temp_dir("indice");
        fs::write(tmp.join("doc1.txt"), "the fox and the dog\n").unwrap();
        fs::write(tmp.join("doc2.txt"), "Fox, fox!\n").unwrap();

        let index = inverted_index(&ctx(), &format!("{}/*.txt", tmp.display())).unwrap();
        let words: Vec<&str> = index.iter().map(|(w, _)| w.as_str()).collect();
        assert_eq!(words, vec!["dog", "fox"]);
        assert_eq!(
            index[1].1,
            vec![("doc2.txt".to_string(), 2), ("doc1.txt".to_string(), 1)]
        );
    }
}
