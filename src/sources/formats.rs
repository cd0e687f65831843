//! Selección del mejor stream de audio entre las variantes de una fuente.
//!
//! El orden de preferencia es por clase de contenedor: primero los itags de
//! audio webm/opus, después los de audio mp4/aac, y como último recurso
//! cualquier variante mp4 con bitrate de audio. Dentro de una clase gana la
//! variante de mayor bitrate de audio, prefiriendo las que no llevan video.

use serde::{Deserialize, Serialize};

/// Itags de audio webm (opus), en orden de calidad descendente.
pub const WEBM_AUDIO_TAGS: [u32; 3] = [251, 250, 249];

/// Itags de audio mp4 (aac), en orden de calidad descendente.
pub const MP4_AUDIO_TAGS: [u32; 3] = [141, 140, 139];

/// Contenedor del stream de audio elegido.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Webm,
    Mp4,
    Mp3,
}

impl AudioFormat {
    /// Extensión con la que se persiste el payload en disco.
    /// El contenedor mp4 se guarda con extensión `flv`.
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Webm => "webm",
            AudioFormat::Mp4 => "flv",
            AudioFormat::Mp3 => "mp3",
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioFormat::Webm => write!(f, "webm"),
            AudioFormat::Mp4 => write!(f, "mp4"),
            AudioFormat::Mp3 => write!(f, "mp3"),
        }
    }
}

/// Variante de formato tal como la reporta el proveedor de metadatos.
///
/// `bitrate` es el bitrate de video: las variantes de solo audio lo traen
/// en `None`, y eso las hace preferibles dentro de su clase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatVariant {
    pub itag: Option<u32>,
    pub container: String,
    pub audio_bitrate: Option<u32>,
    pub bitrate: Option<u32>,
    pub url: String,
}

/// Stream elegido por [`best_audio`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedAudio {
    pub url: String,
    pub format: AudioFormat,
    pub codec_tag: Option<u32>,
}

/// Elige el mejor stream de audio disponible, o `None` si ninguna variante
/// trae audio utilizable.
pub fn best_audio(variants: &[FormatVariant]) -> Option<SelectedAudio> {
    let webm: Vec<&FormatVariant> = variants
        .iter()
        .filter(|v| v.itag.is_some_and(|t| WEBM_AUDIO_TAGS.contains(&t)))
        .collect();
    if let Some(pick) = pick_by_audio_bitrate(&webm) {
        return Some(selected(pick, AudioFormat::Webm));
    }

    let mp4: Vec<&FormatVariant> = variants
        .iter()
        .filter(|v| v.itag.is_some_and(|t| MP4_AUDIO_TAGS.contains(&t)))
        .collect();
    if let Some(pick) = pick_by_audio_bitrate(&mp4) {
        return Some(selected(pick, AudioFormat::Mp4));
    }

    let fallback: Vec<&FormatVariant> = variants
        .iter()
        .filter(|v| v.container == "mp4" && v.audio_bitrate.unwrap_or(0) > 0)
        .collect();
    pick_by_audio_bitrate(&fallback).map(|pick| selected(pick, AudioFormat::Mp4))
}

/// Dentro de una clase gana la variante sin pista de video de mayor bitrate
/// de audio; si todas llevan video, la de mayor bitrate a secas.
fn pick_by_audio_bitrate<'a>(class: &[&'a FormatVariant]) -> Option<&'a FormatVariant> {
    let mut with_audio: Vec<&FormatVariant> = class
        .iter()
        .copied()
        .filter(|v| v.audio_bitrate.unwrap_or(0) > 0)
        .collect();
    with_audio.sort_by(|a, b| b.audio_bitrate.cmp(&a.audio_bitrate));
    with_audio
        .iter()
        .find(|v| v.bitrate.is_none())
        .copied()
        .or_else(|| with_audio.first().copied())
}

fn selected(variant: &FormatVariant, format: AudioFormat) -> SelectedAudio {
    SelectedAudio {
        url: variant.url.clone(),
        format,
        codec_tag: variant.itag,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(itag: Option<u32>, container: &str, audio: Option<u32>, video: Option<u32>) -> FormatVariant {
        FormatVariant {
            itag,
            container: container.to_string(),
            audio_bitrate: audio,
            bitrate: video,
            url: format!("https://cdn.example/{}", itag.unwrap_or(0)),
        }
    }

    #[test]
    fn test_webm_class_beats_mp4_class() {
        let variants = vec![
            variant(Some(141), "mp4", Some(256), None),
            variant(Some(249), "webm", Some(50), None),
        ];
        let pick = best_audio(&variants).unwrap();
        assert_eq!(pick.format, AudioFormat::Webm);
        assert_eq!(pick.codec_tag, Some(249));
    }

    #[test]
    fn test_highest_audio_bitrate_wins_within_class() {
        let variants = vec![
            variant(Some(250), "webm", Some(70), None),
            variant(Some(251), "webm", Some(160), None),
            variant(Some(249), "webm", Some(50), None),
        ];
        let pick = best_audio(&variants).unwrap();
        assert_eq!(pick.codec_tag, Some(251));
    }

    #[test]
    fn test_audio_only_preferred_over_muxed() {
        let variants = vec![
            variant(Some(251), "webm", Some(160), Some(2_000_000)),
            variant(Some(250), "webm", Some(70), None),
        ];
        let pick = best_audio(&variants).unwrap();
        // La variante muxeada tiene más bitrate pero lleva video.
        assert_eq!(pick.codec_tag, Some(250));
    }

    #[test]
    fn test_mp4_container_fallback_without_known_itags() {
        let variants = vec![
            variant(Some(18), "mp4", Some(96), Some(500_000)),
            variant(Some(396), "mp4", None, Some(700_000)),
        ];
        let pick = best_audio(&variants).unwrap();
        assert_eq!(pick.format, AudioFormat::Mp4);
        assert_eq!(pick.codec_tag, Some(18));
    }

    #[test]
    fn test_no_usable_audio_returns_none() {
        let variants = vec![
            variant(Some(396), "mp4", None, Some(700_000)),
            variant(Some(247), "webm", None, Some(1_000_000)),
        ];
        assert!(best_audio(&variants).is_none());
    }

    #[test]
    fn test_extension_mapping() {
        assert_eq!(AudioFormat::Webm.extension(), "webm");
        assert_eq!(AudioFormat::Mp4.extension(), "flv");
        assert_eq!(AudioFormat::Mp3.extension(), "mp3");
    }
}
