//! Reconocimiento de links de la plataforma de video.
//!
//! Hay dos niveles: el match estricto de URLs `watch?v=` sin parámetros
//! extra, que usa la ruta pasiva de mensajes, y el parseo laxo con el que
//! los comandos aceptan cualquier forma de URL y que además extrae el
//! parámetro de playlist (`list=`) y los ids en links `youtu.be`.

use regex::Regex;
use std::sync::OnceLock;
use url::Url;

/// Link reconocido: puede traer id de video, id de playlist, o ambos.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedLink {
    pub video: Option<String>,
    pub playlist: Option<String>,
}

fn watch_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^https://(www\.)?youtube\.com/watch\?v=(\S{11})$").expect("regex válida")
    })
}

/// Match estricto del formato `https://www.youtube.com/watch?v=<id>` sin
/// parámetros extra. Devuelve el id de 11 caracteres.
pub fn strict_watch_id(text: &str) -> Option<String> {
    watch_regex()
        .captures(text.trim())
        .and_then(|caps| caps.get(2))
        .map(|m| m.as_str().to_string())
}

/// Parseo laxo: acepta cualquier URL de `youtube.com` o `youtu.be` y extrae
/// lo que traiga. Devuelve `None` si el texto no es una URL de la plataforma.
pub fn parse_link(text: &str) -> Option<ParsedLink> {
    let parsed = Url::parse(text.trim()).ok()?;
    let host = parsed.host_str()?;

    let mut link = ParsedLink::default();
    if host == "youtu.be" || host.ends_with(".youtu.be") {
        let id = parsed.path().trim_start_matches('/');
        if !id.is_empty() {
            link.video = Some(id.to_string());
        }
    } else if host == "youtube.com" || host.ends_with(".youtube.com") {
        link.video = query_param(&parsed, "v");
    } else {
        return None;
    }
    link.playlist = query_param(&parsed, "list");

    Some(link)
}

/// Id de video de una URL en cualquiera de las formas aceptadas.
pub fn video_id_from_url(url: &str) -> Option<String> {
    parse_link(url).and_then(|link| link.video)
}

/// URL canónica de un id de video, la que se hashea para cachear.
pub fn canonical_watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}
