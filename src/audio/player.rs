//! Controlador de reproducción por guild.
//!
//! Cada sesión tiene un *driver*: una tarea que consume los eventos del
//! transporte en orden y aplica las transiciones de estado bajo el mutex de
//! la sesión. Las operaciones de usuario toman el mismo mutex, así que nunca
//! hay dos transiciones en vuelo para la misma guild.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::queue::{QueueEntry, QueueRegistry};
use crate::audio::session::{
    GuildSession, NowPlaying, PlaybackState, SessionHandle, SessionRegistry,
};
use crate::error::{MusicError, MusicResult};
use crate::notify::Notifier;
use crate::sources::{AudioResolver, MediaInfo, Source, SourceKind};
use crate::transport::{MemberDirectory, PlaySpec, TransportEvent, VoiceTransport};

/// Rearranques admitidos por pista tras un error de stream.
pub const STREAM_RETRY_LIMIT: u8 = 1;

const RETRY_BASE_DELAY_MS: u64 = 500;
const RETRY_JITTER_MS: u64 = 250;

pub struct PlaybackController {
    transport: Arc<dyn VoiceTransport>,
    notifier: Arc<dyn Notifier>,
    members: Arc<dyn MemberDirectory>,
    sessions: Arc<SessionRegistry>,
    queues: Arc<QueueRegistry>,
    resolver: Arc<AudioResolver>,
}

impl PlaybackController {
    pub fn new(
        transport: Arc<dyn VoiceTransport>,
        notifier: Arc<dyn Notifier>,
        members: Arc<dyn MemberDirectory>,
        sessions: Arc<SessionRegistry>,
        queues: Arc<QueueRegistry>,
        resolver: Arc<AudioResolver>,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            notifier,
            members,
            sessions,
            queues,
            resolver,
        })
    }

    /// Arranca el driver de una sesión recién creada.
    pub fn spawn_driver(
        self: &Arc<Self>,
        handle: Arc<SessionHandle>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            debug!("🎛️ Driver de guild {} arrancado", handle.guild_id());
            loop {
                tokio::select! {
                    _ = handle.cancel_token().cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => {
                            if !controller.on_transport_event(&handle, event).await {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            debug!("🎛️ Driver de guild {} terminado", handle.guild_id());
        })
    }

    /// Aplica un evento del transporte. Devuelve `false` cuando la sesión
    /// quedó desmontada y el driver debe terminar.
    pub async fn on_transport_event(
        &self,
        handle: &Arc<SessionHandle>,
        event: TransportEvent,
    ) -> bool {
        let mut session = handle.lock().await;
        match event {
            TransportEvent::Ended { seq } | TransportEvent::Errored { seq }
                if seq != session.current_seq() =>
            {
                // Evento de una generación ya reemplazada.
                debug!(
                    "🗑️ Guild {}: evento de gen {} descartado (vigente {})",
                    handle.guild_id(),
                    seq,
                    session.current_seq()
                );
                true
            }
            TransportEvent::Ended { .. } => {
                self.handle_end(handle, &mut session).await;
                true
            }
            TransportEvent::Errored { .. } => {
                self.handle_error(handle, &mut session).await;
                true
            }
            TransportEvent::Disconnected => {
                self.handle_disconnect(handle, &mut session).await;
                false
            }
        }
    }

    /// Arranca una pista resuelta y la anuncia en el canal de texto.
    pub async fn start_media(
        &self,
        handle: &SessionHandle,
        session: &mut GuildSession,
        media: MediaInfo,
    ) -> MusicResult<()> {
        let notice = format!(
            "▶️  |  Reproduciendo: **{}** ({})\n<{}>",
            media.title,
            media.duration_display(),
            media.canonical_url
        );
        self.start(handle, session, NowPlaying::Media(media)).await?;
        self.notifier.send(handle.text_channel(), &notice).await;
        Ok(())
    }

    /// Arranca una emisora de radio en vivo.
    pub async fn start_radio(
        &self,
        handle: &SessionHandle,
        session: &mut GuildSession,
        stream_url: String,
    ) -> MusicResult<()> {
        let notice = format!("📻  |  Radio en vivo: <{}>", stream_url);
        self.start(handle, session, NowPlaying::Radio(stream_url)).await?;
        self.notifier.send(handle.text_channel(), &notice).await;
        Ok(())
    }

    async fn start(
        &self,
        handle: &SessionHandle,
        session: &mut GuildSession,
        now: NowPlaying,
    ) -> MusicResult<()> {
        let guild = handle.guild_id();
        let seq = session.next_seq();
        let spec = PlaySpec {
            audio_url: now.audio_url().to_string(),
            format: now.format(),
            volume: session.volume,
            seq,
        };
        if let Err(e) = self.transport.play(guild, spec, handle.event_sink()).await {
            session.playback = PlaybackState::Idle;
            return Err(e);
        }
        info!("▶️ Guild {} reproduce «{}» (gen {})", guild, now.title(), seq);
        session.playback = PlaybackState::Playing { media: now, attempts: 0 };
        session.votes.reset();
        Ok(())
    }

    /// Detiene la pista actual. Con `leave` además abandona el canal de voz
    /// y desmonta la sesión. Sin conexión y sin `leave` no hace nada.
    pub async fn stop(&self, handle: &SessionHandle, session: &mut GuildSession, leave: bool) {
        let guild = handle.guild_id();
        let connected = self.transport.is_connected(guild);
        if !connected && !leave {
            return;
        }
        if connected {
            // La generación nueva deja huérfano el End de la pista frenada.
            session.next_seq();
            if let Err(e) = self.transport.stop(guild).await {
                warn!("⚠️ Stop falló en guild {}: {}", guild, e);
            }
            session.playback = PlaybackState::Idle;
            session.votes.reset();
        }
        if leave {
            if connected {
                if let Err(e) = self.transport.leave(guild).await {
                    warn!("⚠️ Leave falló en guild {}: {}", guild, e);
                }
            }
            self.queues.remove(guild);
            self.sessions.unbind(guild);
        }
    }

    /// Corta la pista actual y pasa a la siguiente de la cola.
    pub async fn skip(&self, handle: &SessionHandle, session: &mut GuildSession) {
        let guild = handle.guild_id();
        if let PlaybackState::Playing { media, .. } = &session.playback {
            self.notifier
                .send(handle.text_channel(), &format!("⏭️  |  Saltando: **{}**", media.title()))
                .await;
        }
        session.next_seq();
        if let Err(e) = self.transport.stop(guild).await {
            warn!("⚠️ Stop falló en guild {}: {}", guild, e);
        }
        session.playback = PlaybackState::Idle;
        self.advance(handle, session).await;
    }

    /// Saca entradas de la cola hasta arrancar una. Las que no se dejan
    /// resolver o arrancar se saltan con aviso.
    pub async fn advance(&self, handle: &SessionHandle, session: &mut GuildSession) {
        let guild = handle.guild_id();
        let queue = self.queues.for_guild(guild);
        loop {
            let Some(item) = queue.shift() else {
                self.notifier.send(handle.text_channel(), "ℹ️  |  Cola terminada").await;
                session.playback = PlaybackState::Idle;
                session.votes.reset();
                return;
            };
            let media = match item.entry {
                QueueEntry::Resolved(media) => media,
                QueueEntry::Deferred { id, kind } => {
                    match self.resolve_deferred(&id, kind, handle).await {
                        Ok(media) => media,
                        Err(e) => {
                            warn!(
                                "⚠️ Guild {}: «{}» no se pudo resolver al salir de la cola: {}",
                                guild, id, e
                            );
                            self.notifier
                                .send(handle.text_channel(), &format!("❌  |  {}", e))
                                .await;
                            continue;
                        }
                    }
                }
            };
            match self.start_media(handle, session, media).await {
                Ok(()) => return,
                Err(e) => {
                    warn!("⚠️ Guild {}: arranque falló, probando la siguiente: {}", guild, e);
                    self.notifier
                        .send(handle.text_channel(), &format!("❌  |  {}", e))
                        .await;
                }
            }
        }
    }

    async fn resolve_deferred(
        &self,
        id: &str,
        kind: SourceKind,
        handle: &SessionHandle,
    ) -> MusicResult<MediaInfo> {
        match kind {
            // Dentro del TTL es un hit de cache; fuera, re-resolución completa.
            SourceKind::Video => {
                self.resolver
                    .resolve(&Source::Id(id.to_string()), handle.cancel_token())
                    .await
            }
            _ => Err(MusicError::NoVideoFound),
        }
    }

    async fn handle_end(&self, handle: &SessionHandle, session: &mut GuildSession) {
        let guild = handle.guild_id();
        if let PlaybackState::Playing { media, .. } = &session.playback {
            info!("⏹️ Guild {} terminó «{}»", guild, media.title());
            self.notifier
                .send(handle.text_channel(), &format!("⏹️  |  Terminó: **{}**", media.title()))
                .await;
        }
        session.playback = PlaybackState::Idle;
        session.votes.reset();

        let Some(channel) = self.transport.current_channel(guild).await else {
            return;
        };
        if self.members.occupancy(guild, channel).bot_is_alone() {
            info!("🎧 Guild {}: canal {} sin oyentes al terminar, desconectando", guild, channel);
            self.notifier
                .send(handle.text_channel(), "🎧  |  Me quedé solo, hasta luego")
                .await;
            self.stop(handle, session, true).await;
            return;
        }
        self.advance(handle, session).await;
    }

    async fn handle_error(&self, handle: &SessionHandle, session: &mut GuildSession) {
        let guild = handle.guild_id();
        let (media, attempts) = match &session.playback {
            PlaybackState::Playing { media, attempts } => (media.clone(), *attempts),
            _ => return,
        };
        if attempts >= STREAM_RETRY_LIMIT {
            self.surface_failure(handle, session, &media).await;
            return;
        }

        let delay = Duration::from_millis(
            RETRY_BASE_DELAY_MS + rand::thread_rng().gen_range(0..=RETRY_JITTER_MS),
        );
        warn!(
            "⚠️ Guild {}: error de stream en «{}», rearranque {} de {} en {:?}",
            guild,
            media.title(),
            attempts + 1,
            STREAM_RETRY_LIMIT,
            delay
        );
        if let Err(e) = self.transport.stop(guild).await {
            debug!("Stop previo al rearranque falló en guild {}: {}", guild, e);
        }
        tokio::time::sleep(delay).await;

        let seq = session.next_seq();
        let spec = PlaySpec {
            audio_url: media.audio_url().to_string(),
            format: media.format(),
            volume: session.volume,
            seq,
        };
        match self.transport.play(guild, spec, handle.event_sink()).await {
            Ok(()) => {
                // Misma pista: los votos acumulados siguen valiendo.
                session.playback = PlaybackState::Playing { media, attempts: attempts + 1 };
            }
            Err(e) => {
                warn!("⚠️ Guild {}: el rearranque también falló: {}", guild, e);
                self.surface_failure(handle, session, &media).await;
            }
        }
    }

    async fn surface_failure(
        &self,
        handle: &SessionHandle,
        session: &mut GuildSession,
        media: &NowPlaying,
    ) {
        let guild = handle.guild_id();
        self.notifier
            .send(
                handle.text_channel(),
                &format!("❌  |  **{}** falló de nuevo, pasando a la siguiente", media.title()),
            )
            .await;
        session.next_seq();
        if let Err(e) = self.transport.stop(guild).await {
            debug!("Stop tras fallo definitivo falló en guild {}: {}", guild, e);
        }
        session.playback = PlaybackState::Idle;
        session.votes.reset();
        self.advance(handle, session).await;
    }

    async fn handle_disconnect(&self, handle: &SessionHandle, session: &mut GuildSession) {
        let guild = handle.guild_id();
        warn!("🔌 Guild {} desconectada del canal de voz, desmontando sesión", guild);
        session.playback = PlaybackState::Disconnected;
        self.transport.release(guild).await;
        self.queues.remove(guild);
        self.sessions.unbind(guild);
    }
}
