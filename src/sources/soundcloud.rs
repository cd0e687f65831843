//! Proveedor de SoundCloud: búsqueda que devuelve descriptores mp3 completos.
//!
//! El stream es siempre mp3 progresivo, así que no hay selección de formato:
//! una búsqueda resuelve directo a un [`MediaInfo`] con la URL final del CDN
//! (la API redirige; nos quedamos con la URL a la que aterriza el redirect).

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{AudioFormat, MediaInfo, SourceKind, TrackSearchProvider};
use crate::error::{MusicError, MusicResult};

const API_BASE: &str = "https://api.soundcloud.com";

pub struct SoundCloudProvider {
    http: reqwest::Client,
    client_id: Option<String>,
}

impl SoundCloudProvider {
    pub fn new(client_id: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { http, client_id }
    }

    fn client_id(&self) -> MusicResult<&str> {
        self.client_id.as_deref().ok_or_else(|| {
            MusicError::Network("falta SOUNDCLOUD_CLIENT_ID para buscar en SoundCloud".to_string())
        })
    }

    /// URL final del stream mp3 de un track, tras seguir los redirects.
    async fn stream_url(&self, track_id: u64) -> MusicResult<String> {
        let client_id = self.client_id()?;
        let response = self
            .http
            .head(format!("{API_BASE}/tracks/{track_id}/stream"))
            .query(&[("client_id", client_id)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MusicError::Network(format!(
                "stream de track {} devolvió {}",
                track_id,
                response.status()
            )));
        }
        Ok(response.url().to_string())
    }
}

#[async_trait]
impl TrackSearchProvider for SoundCloudProvider {
    async fn find_track(&self, query: &str) -> MusicResult<MediaInfo> {
        let client_id = self.client_id()?;
        debug!("🔍 Buscando en SoundCloud «{}»", query);

        let response = self
            .http
            .get(format!("{API_BASE}/tracks"))
            .query(&[("q", query), ("limit", "1"), ("client_id", client_id)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MusicError::Network(format!(
                "búsqueda de SoundCloud devolvió {}",
                response.status()
            )));
        }

        let tracks: Vec<ScTrack> = response.json().await?;
        let track = tracks
            .into_iter()
            .find(|t| t.streamable.unwrap_or(true))
            .ok_or(MusicError::NoVideoFound)?;

        let audio_url = self.stream_url(track.id).await?;
        Ok(media_from_track(track, audio_url))
    }
}

fn media_from_track(track: ScTrack, audio_url: String) -> MediaInfo {
    MediaInfo {
        source_id: track.id.to_string(),
        title: track.title,
        thumbnail_url: track.artwork_url,
        canonical_url: track.permalink_url,
        audio_url,
        format: AudioFormat::Mp3,
        codec_tag: None,
        // La API reporta milisegundos.
        duration_secs: Some(track.duration / 1000),
        kind: SourceKind::SoundCloud,
    }
}

#[derive(Debug, Deserialize)]
struct ScTrack {
    id: u64,
    title: String,
    permalink_url: String,
    artwork_url: Option<String>,
    duration: u64,
    streamable: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_maps_to_mp3_descriptor() {
        let track: ScTrack = serde_json::from_value(serde_json::json!({
            "id": 128406724,
            "title": "Noche de neón",
            "permalink_url": "https://soundcloud.com/artista/noche-de-neon",
            "artwork_url": "https://i1.sndcdn.com/artworks-grande.jpg",
            "duration": 215000,
            "streamable": true
        }))
        .unwrap();

        let media = media_from_track(track, "https://cf-media.sndcdn.com/x.mp3".to_string());
        assert_eq!(media.kind, SourceKind::SoundCloud);
        assert_eq!(media.format, AudioFormat::Mp3);
        assert_eq!(media.duration_secs, Some(215));
        assert_eq!(media.source_id, "128406724");
        assert_eq!(media.canonical_url, "https://soundcloud.com/artista/noche-de-neon");
    }

    #[tokio::test]
    async fn test_search_without_client_id_fails_clearly() {
        let provider = SoundCloudProvider::new(None);
        let err = provider.find_track("algo").await.unwrap_err();
        assert!(err.to_string().contains("SOUNDCLOUD_CLIENT_ID"));
    }
}
