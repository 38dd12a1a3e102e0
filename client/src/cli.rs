use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use minispark::{Context, EngineConfig, JoinStrategy, JoinType, RankConfig};
use std::path::PathBuf;
use tracing::info;

use crate::jobs;

#[derive(Parser)]
#[command(name = "minispark-cli")]
#[command(about = "Pipelines clave-valor sobre el engine local")]
struct Cli {
    /// Máximo de tareas concurrentes (pisa MINISPARK_WORKERS)
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Particiones por defecto de las fuentes
    #[arg(long, global = true)]
    partitions: Option<usize>,

    /// Configuración en JSON; las variables de entorno y los flags la pisan
    #[arg(long, global = true, value_name = "JSON")]
    config: Option<PathBuf>,

    /// Al terminar, imprime los jobs ejecutados y las métricas del pool
    #[arg(long, global = true)]
    stats: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cuenta palabras de uno o más archivos de texto
    Wordcount {
        /// Ruta o patrón glob, ej: "data/*.txt"
        #[arg(value_name = "INPUT")]
        input: String,

        #[arg(long, default_value_t = 10)]
        top: usize,

        /// Directorio donde escribir el conteo completo (JSONL)
        #[arg(long)]
        output: Option<String>,
    },

    /// Promedio de una columna numérica agrupado por otra
    Average {
        #[arg(value_name = "CSV")]
        input: String,

        #[arg(long)]
        key: String,

        #[arg(long)]
        value: String,
    },

    /// Join entre dos CSV por una columna
    Join {
        #[arg(value_name = "LEFT_CSV")]
        left: String,

        #[arg(value_name = "RIGHT_CSV")]
        right: String,

        #[arg(long)]
        key: String,

        #[arg(long, value_enum, default_value_t = How::Inner)]
        how: How,

        /// Replica el CSV derecho en vez de hacer shuffle de ambos lados
        #[arg(long)]
        broadcast: bool,

        #[arg(long, default_value = "out/join")]
        output: String,
    },

    /// PageRank sobre un CSV de aristas con columnas src,dst
    Pagerank {
        #[arg(value_name = "EDGES_CSV")]
        edges: String,

        #[arg(long, default_value_t = 20)]
        iterations: usize,

        /// Corte por delta máximo; sin valor se hacen todas las iteraciones
        #[arg(long)]
        tolerance: Option<f64>,

        #[arg(long, default_value_t = 0.85)]
        damping: f64,

        #[arg(long, default_value_t = 10)]
        top: usize,
    },

    /// Triángulos dirigidos a -> b -> c -> a
    Triangles {
        #[arg(value_name = "EDGES_CSV")]
        edges: String,
    },

    /// Conteo de bases A, T, C, G, N sobre archivos FASTA
    Bases {
        #[arg(value_name = "FASTA")]
        input: String,
    },

    /// Rank product entre estudios; cada CSV con columnas gene_id,value
    RankProduct {
        #[arg(value_name = "STUDY_CSV", required = true)]
        studies: Vec<String>,

        #[arg(long, default_value_t = 10)]
        top: usize,
    },

    /// Índice invertido palabra -> documentos
    Index {
        /// Ruta o patrón glob; cada archivo es un documento
        #[arg(value_name = "INPUT")]
        input: String,

        /// Sólo muestra estas palabras
        #[arg(long)]
        search: Vec<String>,
    },

    /// Muestra el plan de wordcount sin ejecutarlo
    Explain {
        #[arg(value_name = "INPUT")]
        input: String,

        /// Imprime el DAG en JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum How {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl From<How> for JoinType {
    fn from(how: How) -> Self {
        match how {
            How::Inner => JoinType::Inner,
            How::Left => JoinType::Left,
            How::Right => JoinType::Right,
            How::Full => JoinType::Full,
            How::Cross => JoinType::Cross,
        }
    }
}

fn build_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("leyendo configuración {}", path.display()))?,
        None => EngineConfig::default(),
    }
    .apply_env();

    if let Some(n) = cli.workers {
        config = config.with_workers(n);
    }
    if let Some(n) = cli.partitions {
        config = config.with_default_partitions(n);
    }
    Ok(config)
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let ctx = Context::new(build_config(&cli)?)?;
    info!(
        "engine listo: {} workers, {} particiones por defecto",
        ctx.config().max_workers,
        ctx.default_partitions()
    );

    match &cli.command {
        Commands::Wordcount { input, top, output } => {
            let best = jobs::wordcount(&ctx, input, *top, output.as_deref())?;
            for (word, count) in best {
                println!("{:>8}  {}", count, word);
            }
        }
        Commands::Average { input, key, value } => {
            for (k, mean) in jobs::average_by_key(&ctx, input, key, value)? {
                println!("{}\t{:.4}", k, mean);
            }
        }
        Commands::Join {
            left,
            right,
            key,
            how,
            broadcast,
            output,
        } => {
            let strategy = if *broadcast {
                JoinStrategy::Broadcast
            } else {
                JoinStrategy::Shuffle
            };
            let files = jobs::join_csv(&ctx, left, right, key, (*how).into(), strategy, output)?;
            println!("Join escrito en {} archivos:", files.len());
            for f in files {
                println!("  {}", f.display());
            }
        }
        Commands::Pagerank {
            edges,
            iterations,
            tolerance,
            damping,
            top,
        } => {
            let config = RankConfig {
                damping: *damping,
                ..RankConfig::default()
            }
            .with_max_iterations(*iterations)
            .with_tolerance(*tolerance);

            let (ranks, done, converged) = jobs::pagerank(&ctx, edges, &config)?;
            println!(
                "PageRank: {} iteraciones ({})",
                done,
                if converged { "convergió" } else { "sin converger" }
            );
            for (node, rank) in ranks.into_iter().take(*top) {
                println!("{:>10.6}  {}", rank, node);
            }
        }
        Commands::Triangles { edges } => {
            let found = jobs::triangles(&ctx, edges)?;
            println!("{} triángulos", found.len());
            for (a, b, c) in found {
                println!("  {} -> {} -> {} -> {}", a, b, c, a);
            }
        }
        Commands::Bases { input } => {
            let counts = jobs::base_count(&ctx, input)?;
            println!("registros: {}", counts.records);
            for (base, n) in &counts.bases {
                println!("{}\t{}", base, n);
            }
            println!("total\t{}", counts.total_bases());
        }
        Commands::RankProduct { studies, top } => {
            let ranked = jobs::rank_product(&ctx, studies)?;
            println!("Rank product sobre {} estudios", studies.len());
            for (gene, rp) in ranked.into_iter().take(*top) {
                println!("{:>10.4}  {} ({} estudios)", rp.rank_product, gene, rp.studies);
            }
        }
        Commands::Index { input, search } => {
            let wanted: Vec<String> = search.iter().map(|w| w.to_lowercase()).collect();
            for (word, postings) in jobs::inverted_index(&ctx, input)? {
                if !wanted.is_empty() && !wanted.contains(&word) {
                    continue;
                }
                let docs: Vec<String> = postings
                    .iter()
                    .map(|(doc, freq)| format!("{}:{}", doc, freq))
                    .collect();
                println!("{}\t{}", word, docs.join(" "));
            }
        }
        Commands::Explain { input, json } => {
            let dag = jobs::explain_wordcount(&ctx, input)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&dag)?);
            } else {
                print!("{}", dag.render());
                println!("shuffles: {}", dag.shuffle_count());
            }
        }
    }

    if cli.stats {
        print_stats(&ctx);
    }
    Ok(())
}

fn print_stats(ctx: &Context) {
    println!();
    println!("Jobs:");
    for job in ctx.jobs() {
        println!(
            "  {} {:<28} {:?} etapas={} tareas={}/{} fallidas={} shuffle={} ms={}",
            &job.id[..8.min(job.id.len())],
            job.name,
            job.status,
            job.stages,
            job.completed_tasks,
            job.total_tasks,
            job.failed_tasks,
            job.shuffled_records,
            job.duration_ms().map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
        );
        for w in &job.warnings {
            println!("    aviso: {}", w);
        }
    }

    let m = ctx.worker_metrics();
    println!("Workers:");
    println!("  max_concurrency: {}", m.max_concurrency);
    println!(
        "  tareas: {} iniciadas, {} ok, {} fallidas",
        m.tasks_started, m.tasks_succeeded, m.tasks_failed
    );
    if let Some(avg) = m.avg_task_ms {
        println!("  promedio por tarea: {:.2} ms", avg);
    }
}
