pub mod youtube;

use async_trait::async_trait;

use crate::error::Result;

pub use youtube::YouTubeResolver;

/// Una pista lista para encolar: referencia reproducible más título visible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub url: String,
    pub title: String,
}

impl Track {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
        }
    }
}

/// Convierte una búsqueda libre o un enlace directo en una pista reproducible.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Resuelve la entrada del usuario a una pista `(url, título)`.
    ///
    /// Falla con `NoResults` cuando la búsqueda no devuelve nada y con
    /// `InvalidResult` cuando el mejor resultado no trae una URL utilizable.
    /// Un fallo al consultar el título de un enlace directo nunca falla la
    /// operación: se usa un título genérico.
    async fn resolve(&self, input: &str) -> Result<Track>;
}
