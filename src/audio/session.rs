//! Sesiones de reproducción por guild.
//!
//! Una sesión nace al vincular un canal de texto y muere al desvincularlo.
//! Todo su estado mutable vive detrás de un único mutex async: tomarlo es lo
//! que serializa los comandos y los eventos de transporte de esa guild, sin
//! bloquear a las demás. El canal de eventos y el token de cancelación están
//! fuera del mutex porque los tocan los reenviadores y las resoluciones en
//! vuelo.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::audio::votes::VoteLedger;
use crate::error::{MusicError, MusicResult};
use crate::sources::{AudioFormat, MediaInfo};
use crate::transport::{EventSink, TransportEvent};

/// Lo que está sonando en una sesión.
#[derive(Debug, Clone)]
pub enum NowPlaying {
    Media(MediaInfo),
    /// Stream de radio en vivo, identificado por su URL.
    Radio(String),
}

impl NowPlaying {
    pub fn title(&self) -> String {
        match self {
            NowPlaying::Media(media) => media.title.clone(),
            NowPlaying::Radio(url) => format!("radio {}", url),
        }
    }

    pub fn audio_url(&self) -> &str {
        match self {
            NowPlaying::Media(media) => &media.audio_url,
            NowPlaying::Radio(url) => url,
        }
    }

    pub fn format(&self) -> AudioFormat {
        match self {
            NowPlaying::Media(media) => media.format,
            NowPlaying::Radio(_) => AudioFormat::Mp3,
        }
    }
}

/// Máquina de estados de reproducción.
///
/// `attempts` cuenta los rearranques por error de stream de la pista
/// actual; se vuelve a cero con cada pista nueva.
#[derive(Debug, Clone, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing {
        media: NowPlaying,
        attempts: u8,
    },
    /// El driver de voz se cayó; estado terminal de la sesión.
    Disconnected,
}

/// Factor interno de volumen a partir del porcentaje que ve el usuario.
/// 100% equivale a factor 2.0, el valor histórico del filtro de volumen.
pub fn volume_factor(percent: u8) -> f32 {
    f32::from(percent.min(100)) * 2.0 / 100.0
}

/// Estado mutable de la sesión, siempre detrás del mutex del handle.
#[derive(Debug)]
pub struct GuildSession {
    pub playback: PlaybackState,
    pub volume: f32,
    pub votes: VoteLedger,
    play_seq: u64,
}

impl GuildSession {
    fn new(volume: f32) -> Self {
        Self {
            playback: PlaybackState::Idle,
            volume,
            votes: VoteLedger::new(),
            play_seq: 0,
        }
    }

    /// Avanza la generación de reproducción. Los eventos de transporte de
    /// generaciones anteriores quedan huérfanos y el driver los descarta.
    pub fn next_seq(&mut self) -> u64 {
        self.play_seq += 1;
        self.play_seq
    }

    pub fn current_seq(&self) -> u64 {
        self.play_seq
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.playback, PlaybackState::Playing { .. })
    }
}

/// Puerta de entrada a una sesión viva.
pub struct SessionHandle {
    guild_id: GuildId,
    text_channel: ChannelId,
    state: Mutex<GuildSession>,
    events: EventSink,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Canal de texto vinculado. Inmutable: cambiar de canal es desvincular
    /// y volver a vincular.
    pub fn text_channel(&self) -> ChannelId {
        self.text_channel
    }

    pub async fn lock(&self) -> MutexGuard<'_, GuildSession> {
        self.state.lock().await
    }

    pub fn event_sink(&self) -> EventSink {
        self.events.clone()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Resultado de vincular: sesión nueva (con el extremo receptor de su canal
/// de eventos, para arrancarle el driver) o la existente.
pub enum Bound {
    Created {
        handle: Arc<SessionHandle>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    },
    Existing(Arc<SessionHandle>),
}

/// Registro de sesiones vivas.
pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
        })
    }

    /// Vincula el canal de texto de la guild. Volver a vincular el mismo
    /// canal es idempotente y conserva la reproducción en curso; un canal
    /// distinto se rechaza con el canal ya vinculado.
    pub fn bind(
        &self,
        guild: GuildId,
        text_channel: ChannelId,
        volume: f32,
    ) -> MusicResult<Bound> {
        match self.sessions.entry(guild) {
            Entry::Occupied(entry) => {
                let existing = entry.get();
                if existing.text_channel == text_channel {
                    debug!("🔗 Guild {} ya vinculada a {}", guild, text_channel);
                    Ok(Bound::Existing(Arc::clone(existing)))
                } else {
                    Err(MusicError::AlreadyBound {
                        bound: existing.text_channel,
                    })
                }
            }
            Entry::Vacant(entry) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let handle = Arc::new(SessionHandle {
                    guild_id: guild,
                    text_channel,
                    state: Mutex::new(GuildSession::new(volume)),
                    events: tx,
                    cancel: CancellationToken::new(),
                });
                entry.insert(Arc::clone(&handle));
                info!("🔗 Sesión creada para guild {} en canal {}", guild, text_channel);
                Ok(Bound::Created { handle, events: rx })
            }
        }
    }

    pub fn get(&self, guild: GuildId) -> Option<Arc<SessionHandle>> {
        self.sessions.get(&guild).map(|entry| Arc::clone(entry.value()))
    }

    pub fn bound_channel(&self, guild: GuildId) -> Option<ChannelId> {
        self.sessions.get(&guild).map(|entry| entry.text_channel)
    }

    /// Quita la sesión y cancela su token, lo que frena su driver y toda
    /// resolución en vuelo. Idempotente.
    pub fn unbind(&self, guild: GuildId) -> Option<Arc<SessionHandle>> {
        let (_, handle) = self.sessions.remove(&guild)?;
        handle.cancel.cancel();
        info!("🔗 Sesión de guild {} desvinculada", guild);
        Some(handle)
    }

    pub fn guilds(&self) -> Vec<GuildId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const GUILD: GuildId = GuildId::new(100);
    const TEXTO: ChannelId = ChannelId::new(200);
    const OTRO: ChannelId = ChannelId::new(201);

    #[test]
    fn test_bind_then_rebind_same_channel_is_idempotent() {
        let registry = SessionRegistry::new();
        let first = registry.bind(GUILD, TEXTO, 2.0).unwrap();
        assert!(matches!(first, Bound::Created { .. }));

        let second = registry.bind(GUILD, TEXTO, 2.0).unwrap();
        assert!(matches!(second, Bound::Existing(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_bind_other_channel_is_rejected_with_bound_one() {
        let registry = SessionRegistry::new();
        registry.bind(GUILD, TEXTO, 2.0).unwrap();

        match registry.bind(GUILD, OTRO, 2.0) {
            Err(MusicError::AlreadyBound { bound }) => assert_eq!(bound, TEXTO),
            other => panic!("esperaba AlreadyBound, llegó {:?}", other.is_ok()),
        }
    }

    #[tokio::test]
    async fn test_unbind_cancels_the_session_token() {
        let registry = SessionRegistry::new();
        let Bound::Created { handle, .. } = registry.bind(GUILD, TEXTO, 2.0).unwrap() else {
            panic!("sesión nueva");
        };
        let token = handle.cancel_token().clone();
        assert!(!token.is_cancelled());

        registry.unbind(GUILD);
        assert!(token.is_cancelled());
        assert!(registry.get(GUILD).is_none());
        // Doble desvinculación no explota.
        assert!(registry.unbind(GUILD).is_none());
    }

    #[tokio::test]
    async fn test_seq_advances_monotonically() {
        let registry = SessionRegistry::new();
        let Bound::Created { handle, .. } = registry.bind(GUILD, TEXTO, 2.0).unwrap() else {
            panic!("sesión nueva");
        };
        let mut session = handle.lock().await;
        let a = session.next_seq();
        let b = session.next_seq();
        assert!(b > a);
        assert_eq!(session.current_seq(), b);
    }

    #[test]
    fn test_volume_factor_mapping() {
        assert_eq!(volume_factor(100), 2.0);
        assert_eq!(volume_factor(50), 1.0);
        assert_eq!(volume_factor(0), 0.0);
        // Por encima de 100 se recorta.
        assert_eq!(volume_factor(255), 2.0);
    }

    #[test]
    fn test_now_playing_accessors() {
        let radio = NowPlaying::Radio("http://listen.moe/stream".to_string());
        assert_eq!(radio.audio_url(), "http://listen.moe/stream");
        assert_eq!(radio.format(), AudioFormat::Mp3);
        assert!(radio.title().contains("listen.moe"));
    }
}
