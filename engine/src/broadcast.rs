use serde::Serialize;
use std::{fmt, ops::Deref, sync::Arc};
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// Valor de sólo lectura compartido con todas las tareas de una acción.
///
/// Es un `Arc`: cada closure que lo captura tiene una referencia y el
/// valor se libera cuando suelta la última (no hay registro global).
pub struct Broadcast<T> {
    id: String,
    value: Arc<T>,
    size_bytes: usize,
}

impl<T> Clone for Broadcast<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            value: Arc::clone(&self.value),
            size_bytes: self.size_bytes,
        }
    }
}

impl<T> fmt::Debug for Broadcast<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcast")
            .field("id", &self.id)
            .field("size_bytes", &self.size_bytes)
            .finish()
    }
}

impl<T> Broadcast<T> {
    pub(crate) fn new(value: T, size_bytes: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            value: Arc::new(value),
            size_bytes,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// Tamaño serializado medido al crearlo.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Cuántos handles siguen vivos (driver + closures pendientes).
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.value)
    }
}

impl<T> Deref for Broadcast<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// Tamaño en JSON: una cota práctica de lo que ocuparía enviarlo.
pub(crate) fn measure<T: Serialize + ?Sized>(value: &T) -> Result<usize> {
    Ok(serde_json::to_vec(value)?.len())
}

pub(crate) fn check_size(size: usize, limit: usize) -> Result<()> {
    if size > limit {
        return Err(EngineError::BroadcastSizeExceeded { size, limit });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measure_usa_el_tamano_serializado() {
        assert_eq!(measure(&vec![1, 2, 3]).unwrap(), "[1,2,3]".len());
    }

    #[test]
    fn check_size_rechaza_valores_grandes() {
        assert!(check_size(10, 10).is_ok());
        match check_size(11, 10) {
            Err(EngineError::BroadcastSizeExceeded { size, limit }) => {
                assert_eq!((size, limit), (11, 10));
            }
            other => panic!("se esperaba BroadcastSizeExceeded, llegó {other:?}"),
        }
    }

    #[test]
    fn holders_cuenta_referencias_vivas() {
        let b = Broadcast::new(vec!["x".to_string()], 5);
        assert_eq!(b.holders(), 1);
        let c = b.clone();
        assert_eq!(b.holders(), 2);
        assert_eq!(c.id(), b.id());
        drop(c);
        assert_eq!(b.holders(), 1);
        assert_eq!(b.len(), 1);
    }
}
