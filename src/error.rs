use thiserror::Error;

/// Errores del núcleo de reproducción.
///
/// Los errores de resolución y de conexión se devuelven al usuario que invocó
/// el comando; los fallos de pipeline y de sink ocurren después del
/// acknowledgment y solo se registran en el log mientras la cola avanza.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no se encontraron resultados para la búsqueda")]
    NoResults,

    #[error("el mejor resultado no tiene una URL utilizable")]
    InvalidResult,

    #[error("no se pudo establecer la conexión de voz: {0}")]
    VoiceConnect(String),

    #[error("fallo en el pipeline de audio: {0}")]
    Pipeline(String),

    #[error("fallo en el sink de voz: {0}")]
    Sink(String),

    #[error("la cola está llena (máximo {0} pistas)")]
    QueueFull(usize),

    #[error("la sesión de reproducción ya no está activa")]
    SessionClosed,

    #[error("error de E/S: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PlaybackError>;
