//! Orquestador de reproducción.
//!
//! `Music` es la fachada que ven los comandos y los eventos del gateway:
//! vincula guilds a canales de texto, agrega fuentes, arbitra las votaciones
//! y delega las transiciones de estado en el controlador. Toda mutación de
//! una sesión pasa por su mutex; la resolución de fuentes corre afuera y el
//! resultado se admite recién tras comprobar que la sesión sigue siendo la
//! misma.

use futures::FutureExt;
use serenity::model::id::{ChannelId, GuildId, MessageId, UserId};
use std::sync::Arc;
use tracing::{info, warn};

use crate::audio::player::PlaybackController;
use crate::audio::playlist::PlaylistExpander;
use crate::audio::queue::{QueueEntry, QueueRegistry};
use crate::audio::session::{
    volume_factor, Bound, NowPlaying, PlaybackState, SessionHandle, SessionRegistry,
};
use crate::audio::votes::{VoteAction, VoteOutcome};
use crate::config::Config;
use crate::error::{MusicError, MusicResult};
use crate::notify::Notifier;
use crate::sources::links;
use crate::sources::radio::{RadioDirectory, RadioStation, RadioTrack};
use crate::sources::{AudioResolver, MediaInfo, Source, SourceKind};
use crate::transport::{MemberDirectory, VoiceTransport};

/// Población máxima del canal (bot incluido) que ejecuta sin votación.
const VOTE_EXEMPT_POPULATION: usize = 2;

/// Resultado de agregar una fuente: arrancó ya (`position: None`) o quedó
/// en cola en esa posición.
#[derive(Debug, Clone)]
pub struct Added {
    pub media: MediaInfo,
    pub position: Option<usize>,
}

/// Lo que suena en una guild.
#[derive(Debug, Clone)]
pub enum NowPlayingInfo {
    Media(MediaInfo),
    Radio {
        stream_url: String,
        track: Option<RadioTrack>,
    },
}

pub struct Music {
    config: Arc<Config>,
    sessions: Arc<SessionRegistry>,
    queues: Arc<QueueRegistry>,
    resolver: Arc<AudioResolver>,
    controller: Arc<PlaybackController>,
    expander: PlaylistExpander,
    transport: Arc<dyn VoiceTransport>,
    members: Arc<dyn MemberDirectory>,
    notifier: Arc<dyn Notifier>,
    radio: Arc<RadioDirectory>,
}

impl Music {
    pub fn new(
        config: Arc<Config>,
        transport: Arc<dyn VoiceTransport>,
        members: Arc<dyn MemberDirectory>,
        notifier: Arc<dyn Notifier>,
        resolver: Arc<AudioResolver>,
        radio: Arc<RadioDirectory>,
    ) -> Arc<Self> {
        let sessions = SessionRegistry::new();
        let queues = QueueRegistry::new();
        let controller = PlaybackController::new(
            Arc::clone(&transport),
            Arc::clone(&notifier),
            Arc::clone(&members),
            Arc::clone(&sessions),
            Arc::clone(&queues),
            Arc::clone(&resolver),
        );
        let expander = PlaylistExpander::new(Arc::clone(&resolver));
        Arc::new(Self {
            config,
            sessions,
            queues,
            resolver,
            controller,
            expander,
            transport,
            members,
            notifier,
            radio,
        })
    }

    /// Vincula la guild al canal de texto y arranca el driver de su sesión.
    /// Repetir el mismo canal es idempotente; otro canal es `AlreadyBound`.
    pub fn bind_channel(&self, guild: GuildId, text_channel: ChannelId) -> MusicResult<()> {
        match self.sessions.bind(guild, text_channel, self.config.default_volume)? {
            Bound::Created { handle, events } => {
                self.controller.spawn_driver(handle, events);
            }
            Bound::Existing(_) => {}
        }
        Ok(())
    }

    /// Desvincula: frena lo que suene, abandona la voz y desmonta la sesión.
    /// Sin sesión es un no-op.
    pub async fn unbind_channel(&self, guild: GuildId) {
        let Some(handle) = self.sessions.get(guild) else {
            return;
        };
        let mut session = handle.lock().await;
        self.controller.stop(&handle, &mut session, true).await;
    }

    pub fn bound_channel(&self, guild: GuildId) -> Option<ChannelId> {
        self.sessions.bound_channel(guild)
    }

    /// Se une al canal de voz del solicitante y vincula el canal de texto.
    pub async fn connect(
        &self,
        guild: GuildId,
        voice_channel: Option<ChannelId>,
        text_channel: ChannelId,
    ) -> MusicResult<ChannelId> {
        let channel = voice_channel.ok_or(MusicError::NotInVoiceChannel)?;
        self.bind_channel(guild, text_channel)?;
        if !self.members.can_join(guild, channel) {
            return Err(MusicError::NoPermission);
        }
        let handle = self.sessions.get(guild).ok_or(MusicError::NotBound)?;
        if let Err(e) = self.transport.join(guild, channel, handle.event_sink()).await {
            warn!("⚠️ Guild {}: no pude unirme a {}: {}", guild, channel, e);
            return Err(e);
        }
        Ok(channel)
    }

    /// Resuelve la fuente y la arranca o la encola según el estado.
    pub async fn add(&self, guild: GuildId, source: Source) -> MusicResult<Added> {
        let handle = self.guard_connected(guild)?;
        let media = self.resolver.resolve(&source, handle.cancel_token()).await?;
        self.admit(guild, handle, media).await
    }

    /// Variante SoundCloud: búsqueda de texto que trae el stream mp3 directo.
    pub async fn add_soundcloud(&self, guild: GuildId, query: &str) -> MusicResult<Added> {
        let handle = self.guard_connected(guild)?;
        let media = self
            .resolver
            .resolve_soundcloud(query, handle.cancel_token())
            .await?;
        self.admit(guild, handle, media).await
    }

    fn guard_connected(&self, guild: GuildId) -> MusicResult<Arc<SessionHandle>> {
        let handle = self.sessions.get(guild).ok_or(MusicError::NotBound)?;
        if !self.transport.is_connected(guild) {
            return Err(MusicError::NotInVoiceChannel);
        }
        Ok(handle)
    }

    async fn admit(
        &self,
        guild: GuildId,
        handle: Arc<SessionHandle>,
        media: MediaInfo,
    ) -> MusicResult<Added> {
        if let Some(seconds) = media.duration_secs {
            let max = self.config.max_media_seconds;
            if seconds > max {
                return Err(MusicError::SourceTooLong { seconds, max });
            }
        }

        // La sesión pudo desmontarse o recrearse mientras resolvíamos.
        let current = self.sessions.get(guild).ok_or(MusicError::Cancelled)?;
        if !Arc::ptr_eq(&current, &handle) {
            return Err(MusicError::Cancelled);
        }

        let mut session = handle.lock().await;
        if session.is_playing() {
            let queue = self.queues.for_guild(guild);
            queue.push(QueueEntry::for_media(media.clone()));
            let position = queue.len();
            self.notifier
                .send(
                    handle.text_channel(),
                    &format!("✅  |  En cola (#{}): **{}**", position, media.title),
                )
                .await;
            Ok(Added { media, position: Some(position) })
        } else {
            self.controller
                .start_media(&handle, &mut session, media.clone())
                .await?;
            Ok(Added { media, position: None })
        }
    }

    /// Salta la pista actual, directo o por votación según la ocupación.
    pub async fn skip(
        &self,
        guild: GuildId,
        requester: UserId,
        force: bool,
    ) -> MusicResult<VoteOutcome> {
        let handle = self.sessions.get(guild).ok_or(MusicError::NotBound)?;
        let channel = self
            .transport
            .current_channel(guild)
            .await
            .ok_or(MusicError::NotInVoiceChannel)?;
        let occupancy = self.members.occupancy(guild, channel);

        let mut session = handle.lock().await;
        if force || occupancy.total <= VOTE_EXEMPT_POPULATION {
            self.controller.skip(&handle, &mut session).await;
            return Ok(VoteOutcome::Executed);
        }
        match session
            .votes
            .register(VoteAction::Skip, requester, occupancy.eligible)
        {
            VoteOutcome::Executed => {
                self.controller.skip(&handle, &mut session).await;
                Ok(VoteOutcome::Executed)
            }
            other => Ok(other),
        }
    }

    /// Vacía la cola, directo o por votación. La pista actual no se toca.
    pub async fn clear(
        &self,
        guild: GuildId,
        requester: UserId,
        force: bool,
    ) -> MusicResult<VoteOutcome> {
        let handle = self.sessions.get(guild).ok_or(MusicError::NotBound)?;
        let channel = self
            .transport
            .current_channel(guild)
            .await
            .ok_or(MusicError::NotInVoiceChannel)?;
        let occupancy = self.members.occupancy(guild, channel);

        let mut session = handle.lock().await;
        if force || occupancy.total <= VOTE_EXEMPT_POPULATION {
            self.clear_queue(guild, &handle).await;
            return Ok(VoteOutcome::Executed);
        }
        match session
            .votes
            .register(VoteAction::Clear, requester, occupancy.eligible)
        {
            VoteOutcome::Executed => {
                self.clear_queue(guild, &handle).await;
                Ok(VoteOutcome::Executed)
            }
            other => Ok(other),
        }
    }

    async fn clear_queue(&self, guild: GuildId, handle: &SessionHandle) {
        let removed = self.queues.for_guild(guild).clear();
        info!("🗑️ Guild {}: cola limpiada ({} elementos)", guild, removed);
        self.notifier
            .send(
                handle.text_channel(),
                &format!("🗑️  |  Cola limpiada ({} elementos)", removed),
            )
            .await;
    }

    /// Fija el volumen (0–100 %); rige a partir del próximo arranque.
    pub async fn set_volume(&self, guild: GuildId, percent: u8) -> MusicResult<()> {
        let handle = self.sessions.get(guild).ok_or(MusicError::NotBound)?;
        let mut session = handle.lock().await;
        session.volume = volume_factor(percent);
        info!("🔊 Guild {}: volumen al {} %", guild, percent.min(100));
        Ok(())
    }

    /// Lo que suena ahora, con el descriptor en vivo si es radio.
    pub async fn playing(&self, guild: GuildId) -> Option<NowPlayingInfo> {
        let handle = self.sessions.get(guild)?;
        let session = handle.lock().await;
        match &session.playback {
            PlaybackState::Playing { media: NowPlaying::Media(info), .. } => {
                Some(NowPlayingInfo::Media(info.clone()))
            }
            PlaybackState::Playing { media: NowPlaying::Radio(url), .. } => {
                Some(NowPlayingInfo::Radio {
                    track: self.radio.now_playing(url),
                    stream_url: url.clone(),
                })
            }
            _ => None,
        }
    }

    /// Arranca una emisora de radio en vivo.
    pub async fn stream(&self, guild: GuildId, station: &RadioStation) -> MusicResult<()> {
        let handle = self.guard_connected(guild)?;
        let mut session = handle.lock().await;
        self.controller
            .start_radio(&handle, &mut session, station.stream_url.to_string())
            .await
    }

    /// Alguien salió de voz: si el bot quedó solo en su canal, se despide.
    pub async fn on_voice_leave(&self, guild: GuildId, channel: ChannelId) {
        let Some(handle) = self.sessions.get(guild) else {
            return;
        };
        if self.transport.current_channel(guild).await != Some(channel) {
            return;
        }
        if !self.members.occupancy(guild, channel).bot_is_alone() {
            return;
        }
        info!("🎧 Guild {}: el canal {} quedó sin oyentes", guild, channel);
        self.notifier
            .send(handle.text_channel(), "🎧  |  Me quedé solo, hasta luego")
            .await;
        let mut session = handle.lock().await;
        self.controller.stop(&handle, &mut session, true).await;
    }

    /// Encolado pasivo: un link de watch o de playlist pegado en el canal
    /// vinculado entra a la cola sin comando, y el mensaje original se borra.
    pub async fn on_message(
        &self,
        guild: GuildId,
        channel: ChannelId,
        message: MessageId,
        content: &str,
    ) {
        let Some(handle) = self.sessions.get(guild) else {
            return;
        };
        if handle.text_channel() != channel || !self.transport.is_connected(guild) {
            return;
        }

        let link = links::parse_link(content).unwrap_or_default();
        if let Some(playlist_id) = link.playlist {
            self.expand_playlist(guild, &handle, channel, message, &playlist_id)
                .await;
        } else if let Some(video_id) = links::strict_watch_id(content.trim()) {
            self.enqueue_watch_link(guild, &handle, channel, message, &video_id)
                .await;
        }
    }

    async fn enqueue_watch_link(
        &self,
        guild: GuildId,
        handle: &Arc<SessionHandle>,
        channel: ChannelId,
        message: MessageId,
        video_id: &str,
    ) {
        if let Err(e) = self.resolver.validate(video_id, handle.cancel_token()).await {
            self.notifier.send(channel, &format!("❌  |  {}", e)).await;
            return;
        }
        match self.add(guild, Source::Id(video_id.to_string())).await {
            Ok(_) => self.notifier.delete(channel, message).await,
            Err(e) => {
                self.notifier.send(channel, &format!("❌  |  {}", e)).await;
            }
        }
    }

    async fn expand_playlist(
        &self,
        guild: GuildId,
        handle: &Arc<SessionHandle>,
        channel: ChannelId,
        message: MessageId,
        playlist_id: &str,
    ) {
        let progress = self.notifier.send(channel, "⏳  |  Encolando playlist…").await;
        let queue = self.queues.for_guild(guild);
        let result = self
            .expander
            .expand(playlist_id, handle.cancel_token(), |id| {
                let queue = Arc::clone(&queue);
                let resolver = Arc::clone(&self.resolver);
                let cancel = handle.cancel_token().clone();
                async move {
                    resolver.validate(&id, &cancel).await?;
                    queue.push(QueueEntry::Deferred { id, kind: SourceKind::Video });
                    Ok(())
                }
                .boxed()
            })
            .await;

        match result {
            Ok(expanded) => {
                if let Some(progress) = &progress {
                    self.notifier
                        .edit(
                            progress,
                            &format!("✅  |  Playlist encolada: {} elementos", expanded.enqueued),
                        )
                        .await;
                }
                let mut session = handle.lock().await;
                if !session.is_playing() {
                    self.controller.advance(handle, &mut session).await;
                }
                drop(session);
                self.notifier.delete(channel, message).await;
            }
            Err(e) => match &progress {
                Some(progress) => self.notifier.edit(progress, &format!("❌  |  {}", e)).await,
                None => {
                    self.notifier.send(channel, &format!("❌  |  {}", e)).await;
                }
            },
        }
    }

    /// Apagado ordenado: avisa en cada canal vinculado y desmonta todo.
    pub async fn shutdown(&self) {
        let guilds = self.sessions.guilds();
        info!("🛑 Apagando reproducción en {} sesiones", guilds.len());
        for guild in guilds {
            let Some(handle) = self.sessions.get(guild) else {
                continue;
            };
            self.notifier
                .send(handle.text_channel(), "🛑  |  Apagando, la reproducción termina aquí")
                .await;
            let mut session = handle.lock().await;
            self.controller.stop(&handle, &mut session, true).await;
        }
    }

    /// Desmonta las sesiones cuya guild ya no existe.
    pub async fn sweep(&self, live: &[GuildId]) {
        for guild in self.sessions.guilds() {
            if live.contains(&guild) {
                continue;
            }
            warn!("🧹 Guild {} ya no existe, desmontando su sesión", guild);
            if let Some(handle) = self.sessions.get(guild) {
                let mut session = handle.lock().await;
                self.controller.stop(&handle, &mut session, true).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MediaCache, PlaylistCache};
    use crate::notify::testing::RecordingNotifier;
    use crate::sources::radio::{RadioUpdate, STATIONS};
    use crate::sources::{
        AudioFormat, FormatVariant, MockMetadataProvider, MockPlaylistProvider,
        MockSearchProvider, MockTrackSearchProvider, PlaylistPage, RawMediaInfo,
    };
    use crate::storage::AudioStore;
    use crate::transport::testing::{RecordingTransport, StaticMembers};
    use crate::transport::{ChannelOccupancy, TransportEvent};
    use pretty_assertions::assert_eq;

    const GUILD: GuildId = GuildId::new(9);
    const TEXTO: ChannelId = ChannelId::new(90);
    const VOZ: ChannelId = ChannelId::new(91);
    const USER_A: UserId = UserId::new(1001);
    const USER_B: UserId = UserId::new(1002);

    struct Mocks {
        metadata: MockMetadataProvider,
        search: MockSearchProvider,
        playlists: MockPlaylistProvider,
        soundcloud: MockTrackSearchProvider,
    }

    impl Mocks {
        fn none() -> Self {
            Self {
                metadata: MockMetadataProvider::new(),
                search: MockSearchProvider::new(),
                playlists: MockPlaylistProvider::new(),
                soundcloud: MockTrackSearchProvider::new(),
            }
        }
    }

    struct Rig {
        music: Arc<Music>,
        transport: Arc<RecordingTransport>,
        notifier: Arc<RecordingNotifier>,
        members: Arc<StaticMembers>,
        radio: Arc<RadioDirectory>,
    }

    fn raw(id: &str, title: &str, duration: u64) -> RawMediaInfo {
        RawMediaInfo {
            source_id: id.to_string(),
            title: title.to_string(),
            thumbnail_url: None,
            duration_secs: Some(duration),
            formats: vec![FormatVariant {
                itag: Some(251),
                container: "webm".to_string(),
                audio_bitrate: Some(160),
                bitrate: None,
                url: format!("https://cdn.invalid/{id}.webm"),
            }],
        }
    }

    async fn rig_with(mocks: Mocks, occupancy: ChannelOccupancy) -> Rig {
        let dir = std::env::temp_dir().join(format!(
            "cadenza-music-{}-{:p}",
            std::process::id(),
            &mocks as *const _
        ));
        let store = Arc::new(AudioStore::new(&dir).await.unwrap());
        let resolver = Arc::new(AudioResolver::new(
            &Config::default(),
            Arc::new(mocks.metadata),
            Arc::new(mocks.search),
            Arc::new(mocks.playlists),
            Arc::new(mocks.soundcloud),
            MediaCache::new(),
            PlaylistCache::new(),
            store,
        ));
        let transport = RecordingTransport::new();
        let notifier = RecordingNotifier::new();
        let members = StaticMembers::new(occupancy);
        let radio = RadioDirectory::new();
        let music = Music::new(
            Arc::new(Config::default()),
            transport.clone(),
            members.clone(),
            notifier.clone(),
            resolver,
            radio.clone(),
        );
        Rig { music, transport, notifier, members, radio }
    }

    /// Rig ya conectado a voz, con tres presentes en el canal.
    async fn connected_rig(mocks: Mocks) -> Rig {
        let rig = rig_with(
            mocks,
            ChannelOccupancy { total: 3, eligible: 3, bot_present: true },
        )
        .await;
        rig.music.connect(GUILD, Some(VOZ), TEXTO).await.unwrap();
        rig
    }

    #[tokio::test]
    async fn conectar_vincula_y_se_une() {
        let rig = rig_with(
            Mocks::none(),
            ChannelOccupancy { total: 3, eligible: 3, bot_present: true },
        )
        .await;

        let channel = rig.music.connect(GUILD, Some(VOZ), TEXTO).await.unwrap();

        assert_eq!(channel, VOZ);
        assert!(rig.transport.is_connected(GUILD));
        assert_eq!(rig.music.bound_channel(GUILD), Some(TEXTO));
    }

    #[tokio::test]
    async fn conectar_sin_canal_de_voz_falla() {
        let rig = rig_with(Mocks::none(), ChannelOccupancy::default()).await;

        let result = rig.music.connect(GUILD, None, TEXTO).await;

        assert!(matches!(result, Err(MusicError::NotInVoiceChannel)));
        assert!(rig.music.bound_channel(GUILD).is_none());
    }

    #[tokio::test]
    async fn conectar_sin_permisos_falla() {
        let rig = rig_with(Mocks::none(), ChannelOccupancy::default()).await;
        *rig.members.allow_join.lock() = false;

        let result = rig.music.connect(GUILD, Some(VOZ), TEXTO).await;

        assert!(matches!(result, Err(MusicError::NoPermission)));
        assert!(!rig.transport.is_connected(GUILD));
    }

    #[tokio::test]
    async fn otro_canal_de_texto_es_already_bound() {
        let rig = connected_rig(Mocks::none()).await;

        let result = rig.music.connect(GUILD, Some(VOZ), ChannelId::new(99)).await;

        assert!(matches!(result, Err(MusicError::AlreadyBound { bound }) if bound == TEXTO));
    }

    #[tokio::test]
    async fn agregar_arranca_o_encola_segun_el_estado() {
        let mut mocks = Mocks::none();
        mocks
            .metadata
            .expect_fetch()
            .times(2)
            .returning(|id| Ok(raw(id, id, 180)));
        let rig = connected_rig(mocks).await;

        let first = rig
            .music
            .add(GUILD, Source::Id("aaaaaaaaaaa".to_string()))
            .await
            .unwrap();
        assert!(first.position.is_none());
        assert_eq!(rig.transport.play_count(), 1);

        let second = rig
            .music
            .add(GUILD, Source::Id("bbbbbbbbbbb".to_string()))
            .await
            .unwrap();
        assert_eq!(second.position, Some(1));
        assert_eq!(rig.transport.play_count(), 1);
        assert!(rig.notifier.saw("En cola (#1): **bbbbbbbbbbb**"));
    }

    #[tokio::test]
    async fn agregados_concurrentes_arrancan_solo_uno() {
        let mut mocks = Mocks::none();
        mocks
            .metadata
            .expect_fetch()
            .times(2)
            .returning(|id| Ok(raw(id, id, 180)));
        let rig = connected_rig(mocks).await;

        let (a, b) = tokio::join!(
            rig.music.add(GUILD, Source::Id("aaaaaaaaaaa".to_string())),
            rig.music.add(GUILD, Source::Id("bbbbbbbbbbb".to_string())),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(rig.transport.play_count(), 1);
        let arrancados = usize::from(a.position.is_none()) + usize::from(b.position.is_none());
        assert_eq!(arrancados, 1);
        assert_eq!(rig.music.queues.for_guild(GUILD).len(), 1);
    }

    #[tokio::test]
    async fn la_fuente_demasiado_larga_se_rechaza() {
        let mut mocks = Mocks::none();
        mocks
            .metadata
            .expect_fetch()
            .times(1)
            .returning(|id| Ok(raw(id, "maratónica", 6000)));
        let rig = connected_rig(mocks).await;

        let result = rig
            .music
            .add(GUILD, Source::Id("ccccccccccc".to_string()))
            .await;

        assert!(matches!(
            result,
            Err(MusicError::SourceTooLong { seconds: 6000, max: 5400 })
        ));
        assert_eq!(rig.transport.play_count(), 0);
    }

    #[tokio::test]
    async fn agregar_exige_vinculo_y_conexion() {
        let rig = rig_with(Mocks::none(), ChannelOccupancy::default()).await;

        let sin_vinculo = rig
            .music
            .add(GUILD, Source::Id("aaaaaaaaaaa".to_string()))
            .await;
        assert!(matches!(sin_vinculo, Err(MusicError::NotBound)));

        rig.music.bind_channel(GUILD, TEXTO).unwrap();
        let sin_voz = rig
            .music
            .add(GUILD, Source::Id("aaaaaaaaaaa".to_string()))
            .await;
        assert!(matches!(sin_voz, Err(MusicError::NotInVoiceChannel)));
    }

    #[tokio::test]
    async fn soundcloud_entra_por_su_propio_camino() {
        let mut mocks = Mocks::none();
        mocks.soundcloud.expect_find_track().times(1).returning(|query| {
            Ok(MediaInfo {
                source_id: "77".to_string(),
                title: query.to_string(),
                thumbnail_url: None,
                canonical_url: "https://soundcloud.com/a/b".to_string(),
                audio_url: "https://cdn.invalid/b.mp3".to_string(),
                format: AudioFormat::Mp3,
                codec_tag: None,
                duration_secs: Some(200),
                kind: SourceKind::SoundCloud,
            })
        });
        let rig = connected_rig(mocks).await;

        let added = rig.music.add_soundcloud(GUILD, "lo-fi").await.unwrap();

        assert!(added.position.is_none());
        assert_eq!(added.media.kind, SourceKind::SoundCloud);
        assert_eq!(rig.transport.play_count(), 1);
    }

    #[tokio::test]
    async fn saltar_requiere_quorum_del_40_por_ciento() {
        let mut mocks = Mocks::none();
        mocks
            .metadata
            .expect_fetch()
            .times(1)
            .returning(|id| Ok(raw(id, "sonando", 180)));
        let rig = rig_with(
            mocks,
            ChannelOccupancy { total: 5, eligible: 5, bot_present: true },
        )
        .await;
        rig.music.connect(GUILD, Some(VOZ), TEXTO).await.unwrap();
        rig.music
            .add(GUILD, Source::Id("aaaaaaaaaaa".to_string()))
            .await
            .unwrap();

        let primero = rig.music.skip(GUILD, USER_A, false).await.unwrap();
        assert_eq!(primero, VoteOutcome::Pending { votes: 1, needed: 2 });

        let repetido = rig.music.skip(GUILD, USER_A, false).await.unwrap();
        assert_eq!(repetido, VoteOutcome::AlreadyVoted);

        let segundo = rig.music.skip(GUILD, USER_B, false).await.unwrap();
        assert_eq!(segundo, VoteOutcome::Executed);
        assert!(rig.notifier.saw("Saltando: **sonando**"));
        assert!(rig.notifier.saw("Cola terminada"));
    }

    #[tokio::test]
    async fn saltar_en_canal_chico_no_vota() {
        let mut mocks = Mocks::none();
        mocks
            .metadata
            .expect_fetch()
            .times(1)
            .returning(|id| Ok(raw(id, "sonando", 180)));
        let rig = rig_with(
            mocks,
            ChannelOccupancy { total: 2, eligible: 2, bot_present: true },
        )
        .await;
        rig.music.connect(GUILD, Some(VOZ), TEXTO).await.unwrap();
        rig.music
            .add(GUILD, Source::Id("aaaaaaaaaaa".to_string()))
            .await
            .unwrap();

        let outcome = rig.music.skip(GUILD, USER_A, false).await.unwrap();

        assert_eq!(outcome, VoteOutcome::Executed);
    }

    #[tokio::test]
    async fn forzar_saltea_la_votacion() {
        let mut mocks = Mocks::none();
        mocks
            .metadata
            .expect_fetch()
            .times(1)
            .returning(|id| Ok(raw(id, "sonando", 180)));
        let rig = rig_with(
            mocks,
            ChannelOccupancy { total: 5, eligible: 5, bot_present: true },
        )
        .await;
        rig.music.connect(GUILD, Some(VOZ), TEXTO).await.unwrap();
        rig.music
            .add(GUILD, Source::Id("aaaaaaaaaaa".to_string()))
            .await
            .unwrap();

        let outcome = rig.music.skip(GUILD, USER_A, true).await.unwrap();

        assert_eq!(outcome, VoteOutcome::Executed);
    }

    #[tokio::test]
    async fn limpiar_usa_su_quorum_asimetrico() {
        // Con 3 elegibles: saltar pide ceil(0.4·3) = 2 votos, limpiar pide
        // ceil(0.4·(3−1)) = 1. El mismo votante ejecuta una y deja pendiente
        // la otra.
        let rig = rig_with(
            Mocks::none(),
            ChannelOccupancy { total: 5, eligible: 3, bot_present: true },
        )
        .await;
        rig.music.connect(GUILD, Some(VOZ), TEXTO).await.unwrap();
        let queue = rig.music.queues.for_guild(GUILD);
        queue.push(QueueEntry::Deferred { id: "aaaaaaaaaaa".to_string(), kind: SourceKind::Video });
        queue.push(QueueEntry::Deferred { id: "bbbbbbbbbbb".to_string(), kind: SourceKind::Video });

        let saltar = rig.music.skip(GUILD, USER_A, false).await.unwrap();
        assert_eq!(saltar, VoteOutcome::Pending { votes: 1, needed: 2 });

        let limpiar = rig.music.clear(GUILD, USER_A, false).await.unwrap();
        assert_eq!(limpiar, VoteOutcome::Executed);
        assert!(rig.notifier.saw("Cola limpiada (2 elementos)"));
        assert!(rig.music.queues.for_guild(GUILD).is_empty());
    }

    #[tokio::test]
    async fn el_volumen_rige_el_proximo_arranque() {
        let mut mocks = Mocks::none();
        mocks
            .metadata
            .expect_fetch()
            .times(1)
            .returning(|id| Ok(raw(id, "suave", 180)));
        let rig = connected_rig(mocks).await;

        rig.music.set_volume(GUILD, 50).await.unwrap();
        rig.music
            .add(GUILD, Source::Id("aaaaaaaaaaa".to_string()))
            .await
            .unwrap();

        let (_, spec) = rig.transport.last_play().unwrap();
        assert_eq!(spec.volume, 1.0);
    }

    #[tokio::test]
    async fn la_radio_reporta_el_descriptor_en_vivo() {
        let rig = connected_rig(Mocks::none()).await;
        let station = &STATIONS[0];

        rig.music.stream(GUILD, station).await.unwrap();
        assert!(rig.notifier.saw("Radio en vivo"));

        let sin_feed = rig.music.playing(GUILD).await;
        assert!(matches!(
            sin_feed,
            Some(NowPlayingInfo::Radio { track: None, .. })
        ));

        rig.radio.apply(RadioUpdate {
            stream_url: station.stream_url.to_string(),
            track: RadioTrack {
                title: "Noche".to_string(),
                artist: Some("Luna".to_string()),
                requested_by: None,
                updated_at: chrono::Utc::now(),
            },
        });
        let Some(NowPlayingInfo::Radio { track: Some(track), stream_url }) =
            rig.music.playing(GUILD).await
        else {
            panic!("debería reportar el descriptor en vivo");
        };
        assert_eq!(stream_url, station.stream_url);
        assert_eq!(track.display(), "Luna — Noche");
    }

    #[tokio::test]
    async fn el_mensaje_pasivo_encola_un_watch_link() {
        let mut mocks = Mocks::none();
        mocks.metadata.expect_probe().times(1).returning(|_| Ok(()));
        mocks
            .metadata
            .expect_fetch()
            .times(1)
            .returning(|id| Ok(raw(id, "pegada", 180)));
        let rig = connected_rig(mocks).await;

        rig.music
            .on_message(
                GUILD,
                TEXTO,
                MessageId::new(500),
                "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            )
            .await;

        assert_eq!(rig.transport.play_count(), 1);
        assert_eq!(
            rig.notifier.deletes.lock().clone(),
            vec![(TEXTO, MessageId::new(500))]
        );
    }

    #[tokio::test]
    async fn el_mensaje_pasivo_expande_una_playlist() {
        let mut mocks = Mocks::none();
        mocks.playlists.expect_fetch_playlist().times(1).returning(|_| {
            Ok(PlaylistPage {
                id: "PLfiesta".to_string(),
                total: 2,
                items: vec!["aaaaaaaaaaa".to_string(), "bbbbbbbbbbb".to_string()],
            })
        });
        mocks.metadata.expect_probe().times(2).returning(|_| Ok(()));
        mocks
            .metadata
            .expect_fetch()
            .times(1)
            .returning(|id| Ok(raw(id, "primera", 180)));
        let rig = connected_rig(mocks).await;

        rig.music
            .on_message(
                GUILD,
                TEXTO,
                MessageId::new(501),
                "https://www.youtube.com/playlist?list=PLfiesta",
            )
            .await;

        // La primera arrancó al toque; la segunda espera en diferido.
        assert_eq!(rig.transport.play_count(), 1);
        assert_eq!(rig.music.queues.for_guild(GUILD).len(), 1);
        let edits = rig.notifier.edits.lock().clone();
        assert!(edits.iter().any(|(_, t)| t.contains("Playlist encolada: 2")));
        assert_eq!(
            rig.notifier.deletes.lock().clone(),
            vec![(TEXTO, MessageId::new(501))]
        );
    }

    #[tokio::test]
    async fn el_mensaje_fuera_del_canal_vinculado_se_ignora() {
        let rig = connected_rig(Mocks::none()).await;

        rig.music
            .on_message(
                GUILD,
                ChannelId::new(77),
                MessageId::new(502),
                "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            )
            .await;

        assert_eq!(rig.transport.play_count(), 0);
        assert!(rig.notifier.deletes.lock().is_empty());
    }

    #[tokio::test]
    async fn salir_de_voz_desmonta_si_el_bot_queda_solo() {
        let rig = connected_rig(Mocks::none()).await;
        rig.members.set_occupancy(ChannelOccupancy {
            total: 1,
            eligible: 1,
            bot_present: true,
        });

        rig.music.on_voice_leave(GUILD, VOZ).await;

        assert!(rig.notifier.saw("Me quedé solo"));
        assert_eq!(rig.transport.leaves.lock().clone(), vec![GUILD]);
        assert!(rig.music.bound_channel(GUILD).is_none());
    }

    #[tokio::test]
    async fn salir_de_voz_con_oyentes_no_hace_nada() {
        let rig = connected_rig(Mocks::none()).await;

        rig.music.on_voice_leave(GUILD, VOZ).await;

        assert!(rig.transport.leaves.lock().is_empty());
        assert_eq!(rig.music.bound_channel(GUILD), Some(TEXTO));
    }

    #[tokio::test]
    async fn el_apagado_avisa_y_desmonta_todo() {
        let rig = connected_rig(Mocks::none()).await;

        rig.music.shutdown().await;

        assert!(rig.notifier.saw("Apagando"));
        assert_eq!(rig.transport.leaves.lock().clone(), vec![GUILD]);
        assert!(rig.music.bound_channel(GUILD).is_none());
    }

    #[tokio::test]
    async fn el_barrido_desmonta_las_guilds_muertas() {
        let rig = connected_rig(Mocks::none()).await;

        rig.music.sweep(&[GUILD]).await;
        assert_eq!(rig.music.bound_channel(GUILD), Some(TEXTO));

        rig.music.sweep(&[]).await;
        assert!(rig.music.bound_channel(GUILD).is_none());
    }

    #[tokio::test]
    async fn el_fin_de_pista_avanza_por_el_driver() {
        let mut mocks = Mocks::none();
        mocks
            .metadata
            .expect_fetch()
            .times(2)
            .returning(|id| Ok(raw(id, id, 180)));
        let rig = connected_rig(mocks).await;
        rig.music
            .add(GUILD, Source::Id("aaaaaaaaaaa".to_string()))
            .await
            .unwrap();
        rig.music
            .add(GUILD, Source::Id("bbbbbbbbbbb".to_string()))
            .await
            .unwrap();

        let sink = rig.music.sessions.get(GUILD).unwrap().event_sink();
        sink.send(TransportEvent::Ended { seq: 1 }).unwrap();
        for _ in 0..50 {
            tokio::task::yield_now().await;
            if rig.transport.play_count() == 2 {
                break;
            }
        }

        assert_eq!(rig.transport.play_count(), 2);
        assert!(rig.notifier.saw("Terminó: **aaaaaaaaaaa**"));
        assert!(rig.notifier.saw("Reproduciendo: **bbbbbbbbbbb**"));
    }
}
