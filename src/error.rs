use serenity::model::id::ChannelId;
use thiserror::Error;

/// Errores tipados del orquestador de música.
///
/// Las fallas de validación y resolución se devuelven al comando que las
/// provocó con su razón exacta; los errores internos inesperados se loguean
/// con contexto de guild/canal y el usuario ve un aviso genérico.
#[derive(Error, Debug)]
pub enum MusicError {
    /// El solicitante no está en un canal de voz.
    #[error("no estás en un canal de voz")]
    NotInVoiceChannel,

    /// La guild ya tiene otro canal de texto vinculado a la sesión.
    #[error("la sesión ya está vinculada al canal {bound}")]
    AlreadyBound { bound: ChannelId },

    /// No existe sesión vinculada para la guild.
    #[error("no hay ninguna sesión activa en esta guild")]
    NotBound,

    /// Faltan permisos de conexión o de voz en el canal.
    #[error("me faltan permisos para conectar o hablar en ese canal")]
    NoPermission,

    /// La fuente resuelta excede la duración máxima admitida.
    #[error("la fuente dura {seconds}s y excede el máximo de {max}s")]
    SourceTooLong { seconds: u64, max: u64 },

    /// El proveedor de metadatos no encontró ningún video.
    #[error("no se encontró ningún video para esa fuente")]
    NoVideoFound,

    /// La playlist existe pero no tiene elementos utilizables.
    #[error("la playlist no tiene elementos")]
    EmptyPlaylist,

    /// Falla de red contra un proveedor externo. Reintentable una vez.
    #[error("error de red consultando al proveedor: {0}")]
    Network(String),

    /// La descarga local del payload falló. Nunca afecta al resolve.
    #[error("falló la descarga local del audio: {0}")]
    DownloadFailure(String),

    /// La operación fue cancelada porque la sesión se desvinculó.
    #[error("operación cancelada: la sesión ya no existe")]
    Cancelled,

    /// Falla del transporte de voz (join, arranque de stream, etc).
    #[error("error del transporte de voz: {0}")]
    Transport(String),
}

impl MusicError {
    /// Indica si el llamador puede reintentar la operación una vez.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MusicError::Network(_))
    }
}

impl From<reqwest::Error> for MusicError {
    fn from(err: reqwest::Error) -> Self {
        MusicError::Network(err.to_string())
    }
}

pub type MusicResult<T> = Result<T, MusicError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_is_the_only_retryable_error() {
        assert!(MusicError::Network("timeout".into()).is_retryable());
        assert!(!MusicError::NoVideoFound.is_retryable());
        assert!(!MusicError::EmptyPlaylist.is_retryable());
        assert!(!MusicError::Cancelled.is_retryable());
    }

    #[test]
    fn test_display_includes_context() {
        let err = MusicError::SourceTooLong {
            seconds: 6000,
            max: 5400,
        };
        assert!(err.to_string().contains("6000"));
        assert!(err.to_string().contains("5400"));

        let err = MusicError::AlreadyBound {
            bound: ChannelId::new(42),
        };
        assert!(err.to_string().contains("42"));
    }
}
