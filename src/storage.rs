//! Almacenamiento local de payloads de audio descargados.
//!
//! Cada payload se guarda como `<hash>.<ext>` bajo el directorio configurado,
//! donde el hash es el de la URL canónica de la fuente. La escritura es de
//! una sola vez: si el archivo ya existe, la descarga se omite.

use bytes::Bytes;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{MusicError, MusicResult};
use crate::sources::AudioFormat;

pub struct AudioStore {
    dir: PathBuf,
    http: reqwest::Client,
}

impl AudioStore {
    pub async fn new(dir: impl AsRef<Path>) -> MusicResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| MusicError::DownloadFailure(format!("creando {}: {}", dir.display(), e)))?;
        info!("📁 Almacén de audio en {}", dir.display());
        Ok(Self {
            dir,
            http: reqwest::Client::new(),
        })
    }

    /// Ruta que tendría el payload de un hash dado.
    pub fn path_for(&self, hash: &str, format: AudioFormat) -> PathBuf {
        self.dir.join(format!("{}.{}", hash, format.extension()))
    }

    /// Devuelve la ruta local si el payload ya fue descargado.
    pub async fn lookup(&self, hash: &str, format: AudioFormat) -> Option<PathBuf> {
        let path = self.path_for(hash, format);
        match fs::try_exists(&path).await {
            Ok(true) => Some(path),
            _ => None,
        }
    }

    /// Descarga el stream de audio a disco. Escritura de una sola vez:
    /// un payload existente gana y la función devuelve su ruta sin tocar red.
    /// Un archivo parcial se elimina antes de propagar el error.
    pub async fn persist(
        &self,
        hash: &str,
        format: AudioFormat,
        audio_url: &str,
    ) -> MusicResult<PathBuf> {
        if let Some(path) = self.lookup(hash, format).await {
            debug!("💾 Payload {} ya descargado, omitiendo", hash);
            return Ok(path);
        }
        let path = self.path_for(hash, format);

        let response = self
            .http
            .get(audio_url)
            .send()
            .await
            .map_err(|e| MusicError::DownloadFailure(e.to_string()))?;
        if !response.status().is_success() {
            return Err(MusicError::DownloadFailure(format!(
                "estado HTTP {} descargando {}",
                response.status(),
                hash
            )));
        }

        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| MusicError::DownloadFailure(e.to_string()))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk: Bytes = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    let _ = fs::remove_file(&path).await;
                    return Err(MusicError::DownloadFailure(e.to_string()));
                }
            };
            if let Err(e) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&path).await;
                return Err(MusicError::DownloadFailure(e.to_string()));
            }
        }
        if let Err(e) = file.flush().await {
            let _ = fs::remove_file(&path).await;
            return Err(MusicError::DownloadFailure(e.to_string()));
        }

        info!("💾 Audio {} guardado en {}", hash, path.display());
        Ok(path)
    }
}
