//! Adaptadores de entrada y salida. El engine sólo exige que una fuente
//! entregue un `Dataset` con particiones bien formadas; los formatos
//! concretos viven acá.
//!
//! Las fuentes leen cada archivo dentro de la tarea de su partición y los
//! sinks escriben un `part-NNNNN` por partición desde las tareas.

use glob::glob;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{self, BufRead, BufReader, BufWriter, Write},
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{info, warn};

use crate::{
    context::Context,
    dataset::{Data, Dataset},
    error::{EngineError, Result},
    partitioner::PartitioningKind,
    plan::NarrowKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Falla si el directorio ya tiene archivos.
    ErrorIfExists,
    Overwrite,
    /// Agrega partes nuevas numeradas después de las existentes.
    Append,
}

pub trait SourceAdapter<T> {
    fn read(&self, ctx: &Context, path: &str) -> Result<Dataset<T>>;
}

pub trait SinkAdapter<T> {
    /// Devuelve los archivos escritos, en orden de partición.
    fn write(&self, dataset: &Dataset<T>, path: &str, mode: WriteMode) -> Result<Vec<PathBuf>>;
}

/// Archivos que matchean el patrón, ordenados. Sin matches es un error:
/// una colección necesita al menos una partición.
fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in glob(pattern)? {
        let path = entry.map_err(|e| EngineError::Io(e.into_error()))?;
        if path.is_file() {
            files.push(path);
        }
    }
    if files.is_empty() {
        return Err(EngineError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("ningún archivo coincide con '{}'", pattern),
        )));
    }
    files.sort();
    Ok(files)
}

/// Una partición por archivo; `load(i, ruta)` corre dentro de la tarea i.
fn files_source<T, F>(ctx: &Context, label: &str, pattern: &str, load: F) -> Result<Dataset<T>>
where
    T: Data,
    F: Fn(usize, &Path) -> Result<Vec<T>> + Send + Sync + 'static,
{
    let files = Arc::new(expand_glob(pattern)?);
    info!("{}: {} archivos para '{}'", label, files.len(), pattern);
    let n = files.len();
    ctx.lazy_source(label, n, PartitioningKind::Unknown, move |i| {
        let path = files.get(i).ok_or_else(|| {
            EngineError::PartitionCount(format!("se pidió el archivo {} de {}", i, files.len()))
        })?;
        load(i, path)
    })
}

/* =========================
   Fuentes
   ========================= */

/// Líneas de texto, una partición por archivo.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextSource;

impl SourceAdapter<String> for TextSource {
    fn read(&self, ctx: &Context, path: &str) -> Result<Dataset<String>> {
        files_source(ctx, "read_text", path, |_, file| {
            let reader = BufReader::new(File::open(file)?);
            let mut out = Vec::new();
            for (n, line) in reader.lines().enumerate() {
                let line = line?;
                // BOM de archivos guardados en Windows
                if n == 0 {
                    out.push(line.trim_start_matches('\u{feff}').to_string());
                } else {
                    out.push(line);
                }
            }
            Ok(out)
        })
    }
}

/// (ruta, contenido completo) por archivo.
#[derive(Debug, Clone, Copy, Default)]
pub struct WholeTextSource;

impl SourceAdapter<(String, String)> for WholeTextSource {
    fn read(&self, ctx: &Context, path: &str) -> Result<Dataset<(String, String)>> {
        files_source(ctx, "read_whole_text", path, |_, file| {
            let content = fs::read_to_string(file)?;
            Ok(vec![(file.display().to_string(), content)])
        })
    }
}

/// Un objeto JSON por línea; las líneas vacías se saltean.
pub struct JsonLinesSource<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonLinesSource<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonLinesSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Data + DeserializeOwned> SourceAdapter<T> for JsonLinesSource<T> {
    fn read(&self, ctx: &Context, path: &str) -> Result<Dataset<T>> {
        files_source(ctx, "read_jsonl", path, |partition, file| {
            let reader = BufReader::new(File::open(file)?);
            let mut out = Vec::new();
            for (n, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let rec = serde_json::from_str(&line).map_err(|e| EngineError::Record {
                    partition,
                    message: format!("{}:{}: {}", file.display(), n + 1, e),
                })?;
                out.push(rec);
            }
            Ok(out)
        })
    }
}

/// CSV deserializado con serde. Con encabezados, las columnas se asocian
/// por nombre.
pub struct CsvSource<T> {
    pub has_headers: bool,
    pub delimiter: u8,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CsvSource<T> {
    pub fn new() -> Self {
        Self {
            has_headers: true,
            delimiter: b',',
            _marker: PhantomData,
        }
    }

    pub fn with_headers(mut self, has_headers: bool) -> Self {
        self.has_headers = has_headers;
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }
}

impl<T> Default for CsvSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Data + DeserializeOwned> SourceAdapter<T> for CsvSource<T> {
    fn read(&self, ctx: &Context, path: &str) -> Result<Dataset<T>> {
        let has_headers = self.has_headers;
        let delimiter = self.delimiter;
        files_source(ctx, "read_csv", path, move |_, file| {
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(has_headers)
                .delimiter(delimiter)
                .trim(csv::Trim::All)
                .from_path(file)?;
            let mut out = Vec::new();
            for rec in reader.deserialize() {
                out.push(rec?);
            }
            Ok(out)
        })
    }
}

/* =========================
   Sinks
   ========================= */

/// Prepara el directorio de salida y devuelve el primer número de parte.
fn prepare_output(dir: &Path, mode: WriteMode) -> Result<usize> {
    let existing = if dir.exists() {
        fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("part-"))
            .count()
    } else {
        0
    };

    match mode {
        WriteMode::ErrorIfExists if dir.exists() && fs::read_dir(dir)?.next().is_some() => {
            Err(EngineError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("el directorio de salida {} no está vacío", dir.display()),
            )))
        }
        WriteMode::Overwrite => {
            if dir.exists() {
                fs::remove_dir_all(dir)?;
            }
            fs::create_dir_all(dir)?;
            Ok(0)
        }
        WriteMode::Append => {
            fs::create_dir_all(dir)?;
            Ok(existing)
        }
        WriteMode::ErrorIfExists => {
            fs::create_dir_all(dir)?;
            Ok(0)
        }
    }
}

/// Escribe cada partición con `write_part(ruta, filas)` desde su tarea.
fn write_parts<T, F>(
    dataset: &Dataset<T>,
    label: &str,
    path: &str,
    mode: WriteMode,
    extension: &'static str,
    write_part: F,
) -> Result<Vec<PathBuf>>
where
    T: Data,
    F: Fn(&Path, Vec<T>) -> Result<()> + Send + Sync + 'static,
{
    let dir = PathBuf::from(path);
    let offset = prepare_output(&dir, mode)?;
    let part_path = move |dir: &Path, index: usize| {
        dir.join(format!("part-{:05}.{}", offset + index, extension))
    };

    let task_dir = dir.clone();
    let result = dataset
        .narrow(label, NarrowKind::MapPartitions, PartitioningKind::Unknown, move |task, rows| {
            let file = part_path(&task_dir, task.partition_index());
            write_part(&file, rows)?;
            Ok(vec![file])
        })
        .collect_as(label);

    match result {
        Ok(written) => {
            info!("{}: {} archivos escritos en {}", label, written.len(), path);
            Ok(written)
        }
        Err(e) => {
            // las partes de esta escritura que alcanzaron a crearse se borran;
            // en Append las anteriores quedan intactas
            let mut removed = 0;
            for i in 0..dataset.num_partitions() {
                if fs::remove_file(part_path(&dir, i)).is_ok() {
                    removed += 1;
                }
            }
            warn!("{}: falló la escritura en {}, {} partes borradas", label, path, removed);
            Err(e)
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesSink;

impl<T: Data + Serialize> SinkAdapter<T> for JsonLinesSink {
    fn write(&self, dataset: &Dataset<T>, path: &str, mode: WriteMode) -> Result<Vec<PathBuf>> {
        write_parts(dataset, "write_jsonl", path, mode, "jsonl", |file, rows| {
            let mut w = BufWriter::new(File::create(file)?);
            for row in &rows {
                serde_json::to_writer(&mut w, row)?;
                w.write_all(b"\n")?;
            }
            w.flush()?;
            Ok(())
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CsvSink {
    pub has_headers: bool,
}

impl Default for CsvSink {
    fn default() -> Self {
        Self { has_headers: true }
    }
}

impl<T: Data + Serialize> SinkAdapter<T> for CsvSink {
    fn write(&self, dataset: &Dataset<T>, path: &str, mode: WriteMode) -> Result<Vec<PathBuf>> {
        let has_headers = self.has_headers;
        write_parts(dataset, "write_csv", path, mode, "csv", move |file, rows| {
            let mut w = csv::WriterBuilder::new()
                .has_headers(has_headers)
                .from_path(file)?;
            for row in &rows {
                w.serialize(row)?;
            }
            w.flush()?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use std::env;

    fn temp_dir(sub: &str) -> PathBuf {
        let base = env::temp_dir().join("minispark_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn ctx() -> Context {
        Context::new(EngineConfig::default().with_workers(2)).unwrap()
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Venta {
        product_id: String,
        amount: f64,
    }

    #[test]
    fn text_source_una_particion_por_archivo() {
        let tmp = temp_dir("text_source");
        fs::write(tmp.join("a.txt"), "\u{feff}hola mundo\nchau\n").unwrap();
        fs::write(tmp.join("b.txt"), "otra linea").unwrap();

        let c = ctx();
        let pattern = format!("{}/*.txt", tmp.display());
        let lines = c.read(&TextSource, &pattern).unwrap();
        assert_eq!(lines.num_partitions(), 2);
        // la lectura es perezosa
        assert!(c.jobs().is_empty());
        assert_eq!(
            lines.collect_partitions().unwrap(),
            vec![
                vec!["hola mundo".to_string(), "chau".to_string()],
                vec!["otra linea".to_string()]
            ]
        );
    }

    #[test]
    fn glob_sin_archivos_es_error() {
        let tmp = temp_dir("glob_vacio");
        let pattern = format!("{}/*.txt", tmp.display());
        assert!(matches!(ctx().read(&TextSource, &pattern), Err(EngineError::Io(_))));
    }

    #[test]
    fn whole_text_source_devuelve_ruta_y_contenido() {
        let tmp = temp_dir("whole_text");
        fs::write(tmp.join("x.txt"), "uno\ndos").unwrap();
        let pattern = format!("{}/*.txt", tmp.display());
        let files = ctx().read(&WholeTextSource, &pattern).unwrap().collect().unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].0.ends_with("x.txt"));
        assert_eq!(files[0].1, "uno\ndos");
    }

    #[test]
    fn csv_source_deserializa_con_encabezados() {
        let tmp = temp_dir("csv_source");
        fs::write(
            tmp.join("ventas.csv"),
            "product_id, amount\np1, 10.5\np2,3\n",
        )
        .unwrap();
        let pattern = format!("{}/*.csv", tmp.display());
        let ventas: Vec<Venta> = ctx()
            .read(&CsvSource::new(), &pattern)
            .unwrap()
            .collect()
            .unwrap();
        assert_eq!(
            ventas,
            vec![
                Venta {
                    product_id: "p1".to_string(),
                    amount: 10.5
                },
                Venta {
                    product_id: "p2".to_string(),
                    amount: 3.0
                },
            ]
        );
    }

    #[test]
    fn jsonl_source_reporta_la_linea_invalida() {
        let tmp = temp_dir("jsonl_invalido");
        fs::write(
            tmp.join("a.jsonl"),
            "{\"product_id\":\"p1\",\"amount\":1}\n\n{no es json}\n",
        )
        .unwrap();
        let pattern = format!("{}/*.jsonl", tmp.display());
        let ds = ctx().read(&JsonLinesSource::<Venta>::new(), &pattern).unwrap();
        match ds.collect() {
            Err(EngineError::ActionFailed { failures, .. }) => {
                assert!(failures[0].message.contains("a.jsonl:3"));
            }
            other => panic!("se esperaba ActionFailed, llegó {other:?}"),
        }
    }

    #[test]
    fn jsonl_sink_escribe_una_parte_por_particion_y_se_relee() {
        let tmp = temp_dir("jsonl_sink");
        let out = tmp.join("out");
        let c = ctx();
        let ventas = c
            .parallelize(
                vec![
                    Venta {
                        product_id: "p1".to_string(),
                        amount: 1.0,
                    },
                    Venta {
                        product_id: "p2".to_string(),
                        amount: 2.0,
                    },
                    Venta {
                        product_id: "p3".to_string(),
                        amount: 3.0,
                    },
                ],
                2,
            )
            .unwrap();

        let out_str = out.display().to_string();
        let files = JsonLinesSink.write(&ventas, &out_str, WriteMode::ErrorIfExists).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("part-00000.jsonl"));

        let back = c
            .read(&JsonLinesSource::<Venta>::new(), &format!("{}/part-*", out_str))
            .unwrap()
            .collect()
            .unwrap();
        assert_eq!(back, ventas.collect().unwrap());

        // el directorio ya tiene archivos
        assert!(JsonLinesSink.write(&ventas, &out_str, WriteMode::ErrorIfExists).is_err());

        let appended = JsonLinesSink.write(&ventas, &out_str, WriteMode::Append).unwrap();
        assert!(appended[0].ends_with("part-00002.jsonl"));

        let replaced = JsonLinesSink.write(&ventas, &out_str, WriteMode::Overwrite).unwrap();
        assert_eq!(replaced.len(), 2);
        assert_eq!(fs::read_dir(&out).unwrap().count(), 2);
    }

    #[test]
    fn sink_que_falla_no_deja_partes_a_medias() {
        let tmp = temp_dir("sink_fallido");
        let out = tmp.join("out");
        let out_str = out.display().to_string();
        let c = ctx();

        let previas = c.parallelize(vec![1_i64, 2], 1).unwrap();
        JsonLinesSink.write(&previas, &out_str, WriteMode::Overwrite).unwrap();

        // la partición 0 escribe bien, la 1 falla en su último registro
        let rows = c
            .from_partitions(vec![vec![1_i64, 2], vec![3, -1]])
            .unwrap()
            .try_map(|v| if v < 0 { Err(format!("valor negativo {}", v)) } else { Ok(v) });

        let err = JsonLinesSink.write(&rows, &out_str, WriteMode::Append).unwrap_err();
        assert!(matches!(err, EngineError::ActionFailed { .. }));

        let mut left: Vec<String> = fs::read_dir(&out)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, vec!["part-00000.jsonl"]);

        assert!(JsonLinesSink.write(&rows, &out_str, WriteMode::Overwrite).is_err());
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn csv_sink_escribe_encabezados() {
        let tmp = temp_dir("csv_sink");
        let out = tmp.join("out");
        let c = ctx();
        let rows = c
            .parallelize(
                vec![Venta {
                    product_id: "p9".to_string(),
                    amount: 9.5,
                }],
                1,
            )
            .unwrap();
        let files = CsvSink::default()
            .write(&rows, &out.display().to_string(), WriteMode::Overwrite)
            .unwrap();
        let content = fs::read_to_string(&files[0]).unwrap();
        assert_eq!(content, "product_id,amount\np9,9.5\n");
    }
}
