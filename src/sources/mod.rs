//! Resolución de fuentes de audio.
//!
//! Este módulo reúne los tipos de medio (`MediaInfo`), los traits de
//! proveedor contra los que se programa el resto del bot, y el
//! [`AudioResolver`], que convierte un pedido (URL, búsqueda o id) en un
//! descriptor reproducible siguiendo siempre el mismo camino:
//!
//! 1. Normaliza a URL canónica y busca en cache por su hash.
//! 2. En miss, consulta al proveedor de metadatos con timeout acotado,
//!    carrera contra el token de cancelación de la sesión y un único
//!    reintento ante error de red.
//! 3. Elige el mejor stream de audio, cachea el resultado y dispara la
//!    descarga local en segundo plano (best effort, nunca bloquea).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub mod formats;
pub mod links;
pub mod radio;
pub mod soundcloud;
pub mod youtube;

pub use formats::{AudioFormat, FormatVariant};

use crate::cache::{content_hash, MediaCache, PlaylistCache};
use crate::config::Config;
use crate::error::{MusicError, MusicResult};
use crate::storage::AudioStore;

/// Clase de fuente de la que salió un descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Video,
    SoundCloud,
    RadioStream,
}

/// Descriptor completo de una fuente, listo para arrancar el transporte.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    pub source_id: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub canonical_url: String,
    pub audio_url: String,
    pub format: AudioFormat,
    pub codec_tag: Option<u32>,
    pub duration_secs: Option<u64>,
    pub kind: SourceKind,
}

impl MediaInfo {
    /// Clave bajo la que este descriptor vive en la cache y en disco.
    pub fn cache_key(&self) -> String {
        content_hash(&self.canonical_url)
    }

    /// Duración legible para avisos, o `en vivo` si no se conoce.
    pub fn duration_display(&self) -> String {
        match self.duration_secs {
            Some(secs) => humantime::format_duration(Duration::from_secs(secs)).to_string(),
            None => "en vivo".to_string(),
        }
    }
}

/// Metadatos crudos del proveedor, antes de elegir formato.
#[derive(Debug, Clone)]
pub struct RawMediaInfo {
    pub source_id: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub duration_secs: Option<u64>,
    pub formats: Vec<FormatVariant>,
}

/// Página de playlist: ids de video en orden, acotada por el proveedor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistPage {
    pub id: String,
    pub total: u64,
    pub items: Vec<String>,
}

/// Pedido de reproducción tal como llega del comando o la ruta pasiva.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// URL de la plataforma, en cualquiera de sus formas.
    Url(String),
    /// Búsqueda de texto libre.
    Query(String),
    /// Id de video ya conocido.
    Id(String),
}

/// Metadatos y variantes de formato de un video.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn fetch(&self, video_id: &str) -> MusicResult<RawMediaInfo>;

    /// Sondeo barato de existencia, sin traer formatos.
    async fn probe(&self, video_id: &str) -> MusicResult<()>;
}

/// Búsqueda de texto libre que devuelve el id del mejor candidato.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> MusicResult<String>;
}

/// Listado de los elementos de una playlist.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlaylistProvider: Send + Sync {
    async fn fetch_playlist(&self, playlist_id: &str) -> MusicResult<PlaylistPage>;
}

/// Búsqueda que devuelve un descriptor completo de una pasada.
/// Es el contrato del proveedor de SoundCloud, cuyos streams mp3 no
/// necesitan selección de formato.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackSearchProvider: Send + Sync {
    async fn find_track(&self, query: &str) -> MusicResult<MediaInfo>;
}

/// Resolutor central de fuentes. Ver la doc del módulo para el flujo.
pub struct AudioResolver {
    metadata: Arc<dyn MetadataProvider>,
    search: Arc<dyn SearchProvider>,
    playlists: Arc<dyn PlaylistProvider>,
    soundcloud: Arc<dyn TrackSearchProvider>,
    cache: MediaCache,
    playlist_cache: PlaylistCache,
    store: Arc<AudioStore>,
    resolve_timeout: Duration,
    playlist_ttl: Duration,
}

impl AudioResolver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        metadata: Arc<dyn MetadataProvider>,
        search: Arc<dyn SearchProvider>,
        playlists: Arc<dyn PlaylistProvider>,
        soundcloud: Arc<dyn TrackSearchProvider>,
        cache: MediaCache,
        playlist_cache: PlaylistCache,
        store: Arc<AudioStore>,
    ) -> Self {
        Self {
            metadata,
            search,
            playlists,
            soundcloud,
            cache,
            playlist_cache,
            store,
            resolve_timeout: Duration::from_secs(config.resolve_timeout_secs),
            playlist_ttl: Duration::from_secs(config.playlist_ttl_secs),
        }
    }

    /// Resuelve un pedido a un descriptor reproducible.
    pub async fn resolve(
        &self,
        source: &Source,
        cancel: &CancellationToken,
    ) -> MusicResult<MediaInfo> {
        match source {
            Source::Url(url) => {
                let id = links::video_id_from_url(url).ok_or(MusicError::NoVideoFound)?;
                self.resolve_video(&id, cancel).await
            }
            Source::Id(id) => self.resolve_video(id, cancel).await,
            Source::Query(query) => {
                let id = self
                    .call_provider(cancel, || self.search.search(query))
                    .await?;
                self.resolve_video(&id, cancel).await
            }
        }
    }

    async fn resolve_video(
        &self,
        video_id: &str,
        cancel: &CancellationToken,
    ) -> MusicResult<MediaInfo> {
        let canonical = links::canonical_watch_url(video_id);
        let key = content_hash(&canonical);

        if let Some(hit) = self.cache.get(&key) {
            debug!("🎯 Cache hit para {}", video_id);
            return Ok(hit);
        }

        let raw = self
            .call_provider(cancel, || self.metadata.fetch(video_id))
            .await?;
        let best = formats::best_audio(&raw.formats).ok_or(MusicError::NoVideoFound)?;

        let media = MediaInfo {
            source_id: raw.source_id,
            title: raw.title,
            thumbnail_url: raw.thumbnail_url,
            canonical_url: canonical,
            audio_url: best.url,
            format: best.format,
            codec_tag: best.codec_tag,
            duration_secs: raw.duration_secs,
            kind: SourceKind::Video,
        };

        self.cache.insert(key.clone(), media.clone());
        self.spawn_download(key, media.clone(), cancel.child_token());

        Ok(media)
    }

    /// Búsqueda en SoundCloud. Los descriptores mp3 no pasan por cache:
    /// sus URLs de stream expiran con la sesión del cliente.
    pub async fn resolve_soundcloud(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> MusicResult<MediaInfo> {
        self.call_provider(cancel, || self.soundcloud.find_track(query))
            .await
    }

    /// Página de playlist, cacheada con TTL propio.
    pub async fn resolve_playlist(
        &self,
        playlist_id: &str,
        cancel: &CancellationToken,
    ) -> MusicResult<PlaylistPage> {
        let key = content_hash(playlist_id);
        if let Some(hit) = self.playlist_cache.get(&key) {
            debug!("🎯 Cache hit para playlist {}", playlist_id);
            return Ok(hit);
        }

        let page = self
            .call_provider(cancel, || self.playlists.fetch_playlist(playlist_id))
            .await?;
        if page.items.is_empty() {
            return Err(MusicError::EmptyPlaylist);
        }

        self.playlist_cache
            .insert_with_ttl(key, page.clone(), Some(self.playlist_ttl));
        Ok(page)
    }

    /// Comprueba que un video existe y es visible antes de encolarlo en
    /// diferido. Cualquier falla que no sea cancelación se reporta como
    /// video inexistente.
    pub async fn validate(&self, video_id: &str, cancel: &CancellationToken) -> MusicResult<()> {
        self.bounded(cancel, self.metadata.probe(video_id))
            .await
            .map_err(|e| match e {
                MusicError::Cancelled => MusicError::Cancelled,
                _ => MusicError::NoVideoFound,
            })
    }

    /// Descarga el payload en una tarea desacoplada. Una falla se loguea y
    /// no afecta la reproducción, que sale del stream remoto.
    fn spawn_download(&self, hash: String, media: MediaInfo, cancel: CancellationToken) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("⏹️ Descarga de {} cancelada junto con la sesión", hash);
                }
                result = store.persist(&hash, media.format, &media.audio_url) => {
                    if let Err(e) = result {
                        warn!("⚠️ Descarga de «{}» falló: {}", media.title, e);
                    }
                }
            }
        });
    }

    /// Llama a un proveedor con timeout, cancelación y un único reintento
    /// ante error de red.
    async fn call_provider<T, F, Fut>(&self, cancel: &CancellationToken, op: F) -> MusicResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = MusicResult<T>>,
    {
        match self.bounded(cancel, op()).await {
            Err(e) if e.is_retryable() => {
                debug!("🔁 Reintentando tras error de red: {}", e);
                self.bounded(cancel, op()).await
            }
            other => other,
        }
    }

    async fn bounded<T>(
        &self,
        cancel: &CancellationToken,
        fut: impl Future<Output = MusicResult<T>>,
    ) -> MusicResult<T> {
        tokio::select! {
            // La cancelación se atiende antes de tocar al proveedor.
            biased;
            _ = cancel.cancelled() => Err(MusicError::Cancelled),
            result = timeout(self.resolve_timeout, fut) => match result {
                Ok(inner) => inner,
                Err(_) => Err(MusicError::Network(format!(
                    "timeout de {}s consultando al proveedor",
                    self.resolve_timeout.as_secs()
                ))),
            }
        }
    }
}
