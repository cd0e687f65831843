//! Transporte de voz y vista de ocupación de canales.
//!
//! [`VoiceTransport`] es la costura entre el orquestador y songbird: el
//! orquestador nunca toca `Call` directamente. Los eventos del driver no se
//! procesan en los handlers de songbird; los reenviadores solo los empujan,
//! etiquetados con la generación de reproducción que los originó, al canal
//! ordenado de la sesión, donde el driver de la sesión los consume uno a uno.

use async_trait::async_trait;
use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId, UserId};
use songbird::input::HttpRequest;
use songbird::{
    Call, CoreEvent, Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler,
    Songbird, TrackEvent,
};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{MusicError, MusicResult};
use crate::sources::AudioFormat;

/// Evento de transporte rumbo al driver de la sesión.
///
/// `seq` es la generación de reproducción que registró el handler: el driver
/// descarta los eventos cuya generación ya no es la vigente, que es como un
/// stop «gracioso» desengancha los eventos del stream anterior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    Ended { seq: u64 },
    Errored { seq: u64 },
    Disconnected,
}

pub type EventSink = mpsc::UnboundedSender<TransportEvent>;

/// Parámetros de arranque de un stream.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaySpec {
    pub audio_url: String,
    pub format: AudioFormat,
    pub volume: f32,
    pub seq: u64,
}

/// Operaciones de voz que necesita el orquestador.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Se une al canal y registra el reenviador de desconexión del driver.
    async fn join(&self, guild: GuildId, channel: ChannelId, events: EventSink)
        -> MusicResult<()>;

    /// Arranca un stream. Si había uno sonando lo frena primero; el evento
    /// de fin del stream viejo queda huérfano por generación.
    async fn play(&self, guild: GuildId, spec: PlaySpec, events: EventSink) -> MusicResult<()>;

    /// Frena el stream actual. No-op si no hay nada sonando.
    async fn stop(&self, guild: GuildId) -> MusicResult<()>;

    /// Abandona el canal de voz y libera la conexión.
    async fn leave(&self, guild: GuildId) -> MusicResult<()>;

    /// Libera los recursos de la guild sin despedirse del gateway.
    /// Para cuando la desconexión ya ocurrió del otro lado.
    async fn release(&self, guild: GuildId);

    fn is_connected(&self, guild: GuildId) -> bool;

    async fn current_channel(&self, guild: GuildId) -> Option<ChannelId>;
}

/// Implementación sobre songbird.
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    calls: DashMap<GuildId, Arc<tokio::sync::Mutex<Call>>>,
    tracks: DashMap<GuildId, songbird::tracks::TrackHandle>,
    http: reqwest::Client,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            calls: DashMap::new(),
            tracks: DashMap::new(),
            http: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn join(
        &self,
        guild: GuildId,
        channel: ChannelId,
        events: EventSink,
    ) -> MusicResult<()> {
        let call = self
            .manager
            .join(guild, channel)
            .await
            .map_err(|e| MusicError::Transport(format!("join: {}", e)))?;

        {
            let mut guard = call.lock().await;
            // Un re-join no debe acumular reenviadores duplicados.
            guard.remove_all_global_events();
            guard.add_global_event(
                VoiceEvent::Core(CoreEvent::DriverDisconnect),
                DisconnectForwarder { guild, events },
            );
        }

        self.calls.insert(guild, call);
        info!("🔊 Conectado al canal de voz {} en guild {}", channel, guild);
        Ok(())
    }

    async fn play(&self, guild: GuildId, spec: PlaySpec, events: EventSink) -> MusicResult<()> {
        let call = self
            .calls
            .get(&guild)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(MusicError::NotInVoiceChannel)?;

        if let Some((_, previous)) = self.tracks.remove(&guild) {
            let _ = previous.stop();
        }

        let input = HttpRequest::new(self.http.clone(), spec.audio_url.clone());
        let handle = {
            let mut guard = call.lock().await;
            guard.play_input(input.into())
        };

        let _ = handle.set_volume(spec.volume);
        handle
            .add_event(
                VoiceEvent::Track(TrackEvent::End),
                EndForwarder {
                    seq: spec.seq,
                    events: events.clone(),
                },
            )
            .map_err(|e| MusicError::Transport(format!("evento end: {}", e)))?;
        handle
            .add_event(
                VoiceEvent::Track(TrackEvent::Error),
                ErrorForwarder {
                    seq: spec.seq,
                    events,
                },
            )
            .map_err(|e| MusicError::Transport(format!("evento error: {}", e)))?;

        debug!(
            "▶️ Stream {} (gen {}) arrancado en guild {}",
            spec.format, spec.seq, guild
        );
        self.tracks.insert(guild, handle);
        Ok(())
    }

    async fn stop(&self, guild: GuildId) -> MusicResult<()> {
        if let Some((_, handle)) = self.tracks.remove(&guild) {
            let _ = handle.stop();
        }
        Ok(())
    }

    async fn leave(&self, guild: GuildId) -> MusicResult<()> {
        self.tracks.remove(&guild);
        self.calls.remove(&guild);
        if self.manager.get(guild).is_some() {
            self.manager
                .remove(guild)
                .await
                .map_err(|e| MusicError::Transport(format!("leave: {}", e)))?;
        }
        info!("👋 Desconectado del canal de voz en guild {}", guild);
        Ok(())
    }

    async fn release(&self, guild: GuildId) {
        self.tracks.remove(&guild);
        self.calls.remove(&guild);
        if self.manager.get(guild).is_some() {
            let _ = self.manager.remove(guild).await;
        }
        debug!("🧹 Conexión de voz de guild {} liberada", guild);
    }

    fn is_connected(&self, guild: GuildId) -> bool {
        self.calls.contains_key(&guild)
    }

    async fn current_channel(&self, guild: GuildId) -> Option<ChannelId> {
        let call = self
            .calls
            .get(&guild)
            .map(|entry| Arc::clone(entry.value()))?;
        let guard = call.lock().await;
        guard
            .current_channel()
            .map(|channel| ChannelId::new(channel.0.get()))
    }
}

struct EndForwarder {
    seq: u64,
    events: EventSink,
}

#[async_trait]
impl VoiceEventHandler for EndForwarder {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        let _ = self.events.send(TransportEvent::Ended { seq: self.seq });
        None
    }
}

struct ErrorForwarder {
    seq: u64,
    events: EventSink,
}

#[async_trait]
impl VoiceEventHandler for ErrorForwarder {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        if let EventContext::Track(tracks) = ctx {
            for (state, _) in *tracks {
                warn!("⚠️ Error de stream (gen {}): {:?}", self.seq, state.playing);
            }
        }
        let _ = self.events.send(TransportEvent::Errored { seq: self.seq });
        None
    }
}

struct DisconnectForwarder {
    guild: GuildId,
    events: EventSink,
}

#[async_trait]
impl VoiceEventHandler for DisconnectForwarder {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        warn!("🔌 Driver de voz desconectado en guild {}", self.guild);
        let _ = self.events.send(TransportEvent::Disconnected);
        None
    }
}

/// Foto de la ocupación de un canal de voz en un instante.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelOccupancy {
    /// Miembros en el canal, bot incluido.
    pub total: usize,
    /// Miembros no ensordecidos (ni por servidor ni por sí mismos).
    pub eligible: usize,
    pub bot_present: bool,
}

impl ChannelOccupancy {
    /// El bot quedó solo en el canal.
    pub fn bot_is_alone(&self) -> bool {
        self.bot_present && self.total == 1
    }
}

/// Vista de miembros y permisos que el orquestador consulta en caliente.
pub trait MemberDirectory: Send + Sync {
    fn occupancy(&self, guild: GuildId, channel: ChannelId) -> ChannelOccupancy;

    /// El bot puede conectarse y hablar en el canal.
    fn can_join(&self, guild: GuildId, channel: ChannelId) -> bool;
}

/// Directorio respaldado por la cache del gateway. La cache no existe hasta
/// que el cliente arranca, así que se engancha en el evento `ready`.
pub struct CacheDirectory {
    cache: OnceLock<Arc<serenity::cache::Cache>>,
    bot_id: OnceLock<UserId>,
}

impl CacheDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            cache: OnceLock::new(),
            bot_id: OnceLock::new(),
        })
    }

    pub fn attach(&self, cache: Arc<serenity::cache::Cache>, bot_id: UserId) {
        let _ = self.cache.set(cache);
        let _ = self.bot_id.set(bot_id);
    }
}

impl MemberDirectory for CacheDirectory {
    fn occupancy(&self, guild: GuildId, channel: ChannelId) -> ChannelOccupancy {
        let (Some(cache), Some(bot_id)) = (self.cache.get(), self.bot_id.get()) else {
            return ChannelOccupancy::default();
        };
        let Some(guild) = cache.guild(guild) else {
            return ChannelOccupancy::default();
        };

        let mut occupancy = ChannelOccupancy::default();
        for (user_id, state) in &guild.voice_states {
            if state.channel_id != Some(channel) {
                continue;
            }
            occupancy.total += 1;
            if user_id == bot_id {
                occupancy.bot_present = true;
            }
            if !state.deaf && !state.self_deaf {
                occupancy.eligible += 1;
            }
        }
        occupancy
    }

    fn can_join(&self, guild_id: GuildId, channel_id: ChannelId) -> bool {
        let (Some(cache), Some(bot_id)) = (self.cache.get(), self.bot_id.get()) else {
            return true;
        };
        let Some(guild) = cache.guild(guild_id) else {
            return true;
        };
        let (Some(channel), Some(member)) =
            (guild.channels.get(&channel_id), guild.members.get(bot_id))
        else {
            // Sin datos en cache dejamos que el join falle solo.
            return true;
        };
        let permissions = guild.user_permissions_in(channel, member);
        permissions.contains(serenity::model::permissions::Permissions::CONNECT)
            && permissions.contains(serenity::model::permissions::Permissions::SPEAK)
    }
}
