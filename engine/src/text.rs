//! Texto: tokenización de palabras e índice invertido.

use std::{collections::HashSet, sync::Arc};

use crate::dataset::Dataset;

/// Palabras vacías que el índice ignora por defecto.
pub const DEFAULT_STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "in", "on", "at", "to", "of", "is",
];

/// (documento, frecuencia de la palabra en el documento).
pub type Posting = (String, u64);

/// Palabras de una línea: sólo alfanuméricos y '_', en minúsculas.
pub fn tokenize(line: &str) -> Vec<String> {
    line.split_whitespace()
        .map(|raw| {
            raw.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Índice invertido sobre pares (documento, contenido).
///
/// `((palabra, doc), 1)` -> `reduce_by_key` -> `(palabra, (doc, freq))` ->
/// `group_by_key`. Las postings de cada palabra quedan ordenadas por
/// frecuencia descendente y después por documento.
pub fn inverted_index(docs: &Dataset<(String, String)>, stopwords: &[&str]) -> Dataset<(String, Vec<Posting>)> {
    let stop: Arc<HashSet<String>> = Arc::new(stopwords.iter().map(|w| w.to_string()).collect());

    docs.flat_map(move |(doc, content)| {
        content
            .lines()
            .flat_map(tokenize)
            .filter(|w| !stop.contains(w))
            .map(|w| ((w, doc.clone()), 1_u64))
            .collect::<Vec<_>>()
    })
    .reduce_by_key(|a, b| a + b)
    .map(|((word, doc), freq)| (word, (doc, freq)))
    .group_by_key()
    .map_values(|mut postings: Vec<Posting>| {
        postings.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        postings
    })
}
