//! Proveedor de video: metadatos, búsqueda y playlists.
//!
//! Los metadatos y las variantes de formato salen del endpoint `player`
//! (cliente Android, que devuelve URLs de stream directas y no necesita
//! clave). La búsqueda y las playlists usan la Data API v3, que sí requiere
//! `METADATA_API_KEY`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{FormatVariant, MetadataProvider, PlaylistPage, PlaylistProvider, RawMediaInfo, SearchProvider};
use crate::error::{MusicError, MusicResult};

const PLAYER_ENDPOINT: &str = "https://www.youtube.com/youtubei/v1/player";
const DATA_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const ANDROID_CLIENT_VERSION: &str = "19.09.37";

/// Elementos por página de playlist. El orquestador nunca expande más.
pub const PLAYLIST_PAGE_SIZE: u32 = 50;

pub struct YouTubeProvider {
    http: reqwest::Client,
    api_key: Option<String>,
}

impl YouTubeProvider {
    pub fn new(api_key: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { http, api_key }
    }

    fn api_key(&self) -> MusicResult<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            MusicError::Network("falta METADATA_API_KEY para búsqueda y playlists".to_string())
        })
    }
}

#[async_trait]
impl MetadataProvider for YouTubeProvider {
    async fn fetch(&self, video_id: &str) -> MusicResult<RawMediaInfo> {
        debug!("🔍 Pidiendo metadatos de {}", video_id);
        let body = json!({
            "context": {
                "client": {
                    "clientName": "ANDROID",
                    "clientVersion": ANDROID_CLIENT_VERSION,
                    "androidSdkVersion": 30,
                    "hl": "es",
                }
            },
            "videoId": video_id,
        });

        let response = self
            .http
            .post(PLAYER_ENDPOINT)
            .header(
                "User-Agent",
                format!("com.google.android.youtube/{ANDROID_CLIENT_VERSION} (Linux; U; Android 11) gzip"),
            )
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MusicError::Network(format!(
                "endpoint player devolvió {}",
                response.status()
            )));
        }

        let payload: PlayerResponse = response.json().await?;
        raw_from_player(payload)
    }

    async fn probe(&self, video_id: &str) -> MusicResult<()> {
        let watch = super::links::canonical_watch_url(video_id);
        let oembed = format!(
            "https://www.youtube.com/oembed?format=json&url={}",
            urlencoding::encode(&watch)
        );
        let response = self
            .http
            .head(&oembed)
            .send()
            .await
            .map_err(|_| MusicError::NoVideoFound)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(MusicError::NoVideoFound)
        }
    }
}

#[async_trait]
impl SearchProvider for YouTubeProvider {
    async fn search(&self, query: &str) -> MusicResult<String> {
        let key = self.api_key()?;
        debug!("🔍 Buscando «{}»", query);

        let response = self
            .http
            .get(format!("{DATA_API_BASE}/search"))
            .query(&[
                ("part", "snippet"),
                ("type", "video"),
                ("maxResults", "1"),
                ("q", query),
                ("key", key),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MusicError::Network(format!(
                "búsqueda devolvió {}",
                response.status()
            )));
        }

        let payload: SearchResponse = response.json().await?;
        payload
            .items
            .into_iter()
            .filter_map(|item| item.id.video_id)
            .next()
            .ok_or(MusicError::NoVideoFound)
    }
}

#[async_trait]
impl PlaylistProvider for YouTubeProvider {
    async fn fetch_playlist(&self, playlist_id: &str) -> MusicResult<PlaylistPage> {
        let key = self.api_key()?;
        debug!("🔍 Pidiendo playlist {}", playlist_id);

        let max_results = PLAYLIST_PAGE_SIZE.to_string();
        let response = self
            .http
            .get(format!("{DATA_API_BASE}/playlistItems"))
            .query(&[
                ("part", "contentDetails"),
                ("maxResults", max_results.as_str()),
                ("playlistId", playlist_id),
                ("key", key),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MusicError::Network(format!(
                "playlistItems devolvió {}",
                response.status()
            )));
        }

        let payload: PlaylistItemsResponse = response.json().await?;
        Ok(page_from_items(playlist_id, payload))
    }
}

fn raw_from_player(payload: PlayerResponse) -> MusicResult<RawMediaInfo> {
    if payload.playability_status.status != "OK" {
        debug!(
            "🚫 Video no reproducible: {}",
            payload.playability_status.reason.as_deref().unwrap_or("sin razón")
        );
        return Err(MusicError::NoVideoFound);
    }
    let details = payload.video_details.ok_or(MusicError::NoVideoFound)?;

    let duration_secs = details
        .length_seconds
        .as_deref()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|&s| s > 0);

    let thumbnail_url = details
        .thumbnail
        .and_then(|t| t.thumbnails.into_iter().last())
        .map(|t| t.url);

    let formats = payload
        .streaming_data
        .map(|data| {
            data.adaptive_formats
                .into_iter()
                .chain(data.formats)
                .filter_map(variant_from_stream)
                .collect()
        })
        .unwrap_or_default();

    Ok(RawMediaInfo {
        source_id: details.video_id,
        title: details.title,
        thumbnail_url,
        duration_secs,
        formats,
    })
}

/// Traduce un formato del endpoint player al modelo de selección.
/// El bitrate de video queda en `None` para los streams de solo audio,
/// que es lo que los vuelve preferibles en su clase.
fn variant_from_stream(stream: StreamFormat) -> Option<FormatVariant> {
    let url = stream.url?;
    let mime = stream.mime_type.unwrap_or_default();
    let container = mime
        .split('/')
        .nth(1)
        .and_then(|rest| rest.split(';').next())
        .unwrap_or("")
        .to_string();
    let audio_only = mime.starts_with("audio/");
    let has_audio = audio_only || stream.audio_quality.is_some();

    Some(FormatVariant {
        itag: stream.itag,
        container,
        audio_bitrate: if has_audio {
            stream.average_bitrate.or(stream.bitrate)
        } else {
            None
        },
        bitrate: if audio_only { None } else { stream.bitrate },
        url,
    })
}

fn page_from_items(playlist_id: &str, payload: PlaylistItemsResponse) -> PlaylistPage {
    let items: Vec<String> = payload
        .items
        .into_iter()
        .map(|item| item.content_details.video_id)
        .collect();
    let total = payload
        .page_info
        .map(|info| info.total_results)
        .unwrap_or(items.len() as u64);
    PlaylistPage {
        id: playlist_id.to_string(),
        total,
        items,
    }
}

// Estructuras de respuesta del endpoint player

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerResponse {
    playability_status: PlayabilityStatus,
    video_details: Option<VideoDetails>,
    streaming_data: Option<StreamingData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayabilityStatus {
    status: String,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoDetails {
    video_id: String,
    title: String,
    length_seconds: Option<String>,
    thumbnail: Option<ThumbnailSet>,
}

#[derive(Debug, Deserialize)]
struct ThumbnailSet {
    thumbnails: Vec<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamingData {
    #[serde(default)]
    formats: Vec<StreamFormat>,
    #[serde(default)]
    adaptive_formats: Vec<StreamFormat>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamFormat {
    itag: Option<u32>,
    url: Option<String>,
    mime_type: Option<String>,
    bitrate: Option<u32>,
    average_bitrate: Option<u32>,
    audio_quality: Option<String>,
}

// Estructuras de respuesta de la Data API

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemsResponse {
    #[serde(default)]
    items: Vec<PlaylistItem>,
    page_info: Option<PageInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    content_details: ContentDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentDetails {
    video_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    total_results: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::formats;

    #[test]
    fn test_player_response_maps_to_raw_info() {
        let payload: PlayerResponse = serde_json::from_value(json!({
            "playabilityStatus": { "status": "OK" },
            "videoDetails": {
                "videoId": "dQw4w9WgXcQ",
                "title": "Una canción",
                "lengthSeconds": "213",
                "thumbnail": { "thumbnails": [
                    { "url": "https://i.example/chica.jpg" },
                    { "url": "https://i.example/grande.jpg" }
                ]}
            },
            "streamingData": {
                "formats": [
                    { "itag": 18, "url": "https://cdn/18", "mimeType": "video/mp4; codecs=\"avc1, mp4a\"",
                      "bitrate": 500000, "audioQuality": "AUDIO_QUALITY_LOW" }
                ],
                "adaptiveFormats": [
                    { "itag": 251, "url": "https://cdn/251", "mimeType": "audio/webm; codecs=\"opus\"",
                      "bitrate": 140000, "averageBitrate": 130000, "audioQuality": "AUDIO_QUALITY_MEDIUM" },
                    { "itag": 137, "url": "https://cdn/137", "mimeType": "video/mp4; codecs=\"avc1\"",
                      "bitrate": 4000000 }
                ]
            }
        }))
        .unwrap();

        let raw = raw_from_player(payload).unwrap();
        assert_eq!(raw.source_id, "dQw4w9WgXcQ");
        assert_eq!(raw.duration_secs, Some(213));
        assert_eq!(raw.thumbnail_url.as_deref(), Some("https://i.example/grande.jpg"));
        assert_eq!(raw.formats.len(), 3);

        // La variante 137 es solo video: sin bitrate de audio no es elegible.
        let best = formats::best_audio(&raw.formats).unwrap();
        assert_eq!(best.codec_tag, Some(251));
    }

    #[test]
    fn test_unplayable_video_is_rejected() {
        let payload: PlayerResponse = serde_json::from_value(json!({
            "playabilityStatus": { "status": "LOGIN_REQUIRED", "reason": "video privado" }
        }))
        .unwrap();
        assert!(matches!(
            raw_from_player(payload),
            Err(MusicError::NoVideoFound)
        ));
    }

    #[test]
    fn test_formats_without_direct_url_are_dropped() {
        let stream: StreamFormat = serde_json::from_value(json!({
            "itag": 251,
            "mimeType": "audio/webm; codecs=\"opus\"",
            "bitrate": 140000
        }))
        .unwrap();
        assert!(variant_from_stream(stream).is_none());
    }

    #[test]
    fn test_playlist_items_keep_provider_order() {
        let payload: PlaylistItemsResponse = serde_json::from_value(json!({
            "items": [
                { "contentDetails": { "videoId": "aaaaaaaaaaa" } },
                { "contentDetails": { "videoId": "bbbbbbbbbbb" } },
                { "contentDetails": { "videoId": "ccccccccccc" } }
            ],
            "pageInfo": { "totalResults": 120 }
        }))
        .unwrap();

        let page = page_from_items("PLxyz", payload);
        assert_eq!(page.id, "PLxyz");
        assert_eq!(page.total, 120);
        assert_eq!(
            page.items,
            vec!["aaaaaaaaaaa", "bbbbbbbbbbb", "ccccccccccc"]
        );
    }

    #[tokio::test]
    async fn test_search_without_key_fails_clearly() {
        let provider = YouTubeProvider::new(None);
        let err = provider.search("algo").await.unwrap_err();
        assert!(err.to_string().contains("METADATA_API_KEY"));
    }
}
