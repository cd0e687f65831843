//! Directorio de radios en vivo.
//!
//! El «ahora suena» de cada emisora llega empujado por un canal: la tarea de
//! feed sondea el endpoint de metadatos de cada emisora configurada y empuja
//! las novedades al directorio. Consultar el directorio nunca toca la red;
//! si todavía no llegó ningún descriptor, la respuesta es `None`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Emisora conocida: URL del stream de audio y URL del feed de metadatos.
pub struct RadioStation {
    pub name: &'static str,
    pub stream_url: &'static str,
    pub feed_url: &'static str,
}

/// Tabla fija de emisoras soportadas.
pub const STATIONS: &[RadioStation] = &[RadioStation {
    name: "listen.moe",
    stream_url: "http://listen.moe/stream",
    feed_url: "https://listen.moe/api/v3/socket",
}];

/// Emisora por nombre, para el comando `/radio`.
pub fn station_by_name(name: &str) -> Option<&'static RadioStation> {
    STATIONS.iter().find(|s| s.name == name)
}

/// Descriptor de lo que suena en una emisora.
#[derive(Debug, Clone)]
pub struct RadioTrack {
    pub title: String,
    pub artist: Option<String>,
    pub requested_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl RadioTrack {
    pub fn display(&self) -> String {
        match &self.artist {
            Some(artist) => format!("{} — {}", artist, self.title),
            None => self.title.clone(),
        }
    }
}

/// Novedad empujada al directorio, con la emisora a la que pertenece.
#[derive(Debug)]
pub struct RadioUpdate {
    pub stream_url: String,
    pub track: RadioTrack,
}

/// Último descriptor conocido por emisora, clave = URL del stream.
pub struct RadioDirectory {
    descriptors: DashMap<String, RadioTrack>,
}

impl RadioDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            descriptors: DashMap::new(),
        })
    }

    /// Último «ahora suena» de la emisora, o `None` si no llegó ninguno.
    pub fn now_playing(&self, stream_url: &str) -> Option<RadioTrack> {
        self.descriptors.get(stream_url).map(|t| t.clone())
    }

    /// Aplica una novedad. Solo lo llaman el consumidor del canal y los tests.
    pub fn apply(&self, update: RadioUpdate) {
        debug!(
            "📻 {} ahora suena: {}",
            update.stream_url,
            update.track.display()
        );
        self.descriptors.insert(update.stream_url, update.track);
    }

    /// Abre el canal de entrada del directorio y arranca su consumidor.
    pub fn subscribe(self: &Arc<Self>) -> mpsc::UnboundedSender<RadioUpdate> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let directory = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                directory.apply(update);
            }
        });
        tx
    }
}

/// Tarea de feed: sondea el endpoint de metadatos de cada emisora y empuja
/// las novedades al canal del directorio. Las fallas de una emisora se
/// loguean y no frenan a las demás.
pub fn spawn_feed(
    refresh: Duration,
    updates: mpsc::UnboundedSender<RadioUpdate>,
) -> JoinHandle<()> {
    info!(
        "📻 Feed de radio activo para {} emisoras cada {}s",
        STATIONS.len(),
        refresh.as_secs()
    );
    tokio::spawn(async move {
        let http = reqwest::Client::new();
        let mut interval = tokio::time::interval(refresh);
        loop {
            interval.tick().await;
            for station in STATIONS {
                match poll_station(&http, station).await {
                    Ok(track) => {
                        let update = RadioUpdate {
                            stream_url: station.stream_url.to_string(),
                            track,
                        };
                        if updates.send(update).is_err() {
                            // Directorio cerrado, el feed ya no tiene destino.
                            return;
                        }
                    }
                    Err(e) => debug!("📻 Feed de {} falló: {}", station.name, e),
                }
            }
        }
    })
}

async fn poll_station(
    http: &reqwest::Client,
    station: &RadioStation,
) -> Result<RadioTrack, reqwest::Error> {
    let payload: FeedPayload = http.get(station.feed_url).send().await?.json().await?;
    Ok(RadioTrack {
        title: payload.song_name.unwrap_or_else(|| "desconocido".to_string()),
        artist: payload.artist_name,
        requested_by: payload.requested_by,
        updated_at: Utc::now(),
    })
}

#[derive(Debug, Deserialize)]
struct FeedPayload {
    song_name: Option<String>,
    artist_name: Option<String>,
    requested_by: Option<String>,
}
