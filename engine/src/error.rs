use thiserror::Error;

use crate::task::TaskFailure;

/// Errores del engine. Los errores estructurales (particiones, broadcast)
/// se detectan al definir la operación, antes de despachar tareas.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("número de particiones inválido: {0}")]
    PartitionCount(String),

    #[error("el broadcast ocupa {size} bytes y el límite configurado es {limit}")]
    BroadcastSizeExceeded { size: usize, limit: usize },

    #[error("la combinación no es un monoide: {0}")]
    MonoidViolation(String),

    #[error("no hubo convergencia tras {iterations} iteraciones (último delta: {last_delta:?})")]
    ConvergenceNotReached {
        iterations: usize,
        last_delta: Option<f64>,
    },

    #[error("falló un registro en la partición {partition}: {message}")]
    Record { partition: usize, message: String },

    #[error("la acción falló en {} de {total} tareas (primera: {})", .failures.len(), first_failure(.failures))]
    ActionFailed {
        total: usize,
        failures: Vec<TaskFailure>,
    },

    #[error("la acción fue cancelada")]
    Cancelled,

    /// Un lote del plan no tenía el tipo esperado. Indica un bug del engine.
    #[error("tipo inesperado en el plan, se esperaba {0}")]
    TypeMismatch(&'static str),

    #[error("configuración inválida: {0}")]
    InvalidConfig(String),

    #[error("runtime de workers: {0}")]
    Runtime(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

fn first_failure(failures: &[TaskFailure]) -> String {
    failures
        .first()
        .map(|f| format!("partición {}: {}", f.partition, f.message))
        .unwrap_or_default()
}
