//! Capa de Discord.
//!
//! [`CadenzaBot`] implementa el [`EventHandler`] de serenity y traduce los
//! eventos del gateway a operaciones del orquestador: interacciones slash a
//! comandos, mensajes del canal vinculado a la ruta pasiva de encolado y
//! cambios de estado de voz al chequeo de canal vacío. También arranca la
//! tarea de mantenimiento periódico (barrido de sesiones huérfanas y de
//! caches vencidas).

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Message, Ready, VoiceState},
    async_trait,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;

use crate::cache::{MediaCache, PlaylistCache};
use crate::config::Config;
use crate::music::Music;
use crate::transport::CacheDirectory;

/// Cada cuánto se barren las sesiones cuya guild ya no existe.
const SWEEP_INTERVAL: Duration = Duration::from_secs(120);
/// Cada cuánto se barren las entradas vencidas de las caches.
const CACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

pub struct CadenzaBot {
    config: Arc<Config>,
    pub music: Arc<Music>,
    /// Directorio de miembros que se engancha a la cache en `ready`.
    members: Arc<CacheDirectory>,
    media_cache: MediaCache,
    playlist_cache: PlaylistCache,
    /// `ready` puede dispararse de nuevo en cada reconexión; la tarea de
    /// mantenimiento se arranca una sola vez.
    maintenance_started: AtomicBool,
}

impl CadenzaBot {
    pub fn new(
        config: Arc<Config>,
        music: Arc<Music>,
        members: Arc<CacheDirectory>,
        media_cache: MediaCache,
        playlist_cache: PlaylistCache,
    ) -> Self {
        Self {
            config,
            music,
            members,
            media_cache,
            playlist_cache,
            maintenance_started: AtomicBool::new(false),
        }
    }

    /// Registra los comandos slash, por guild si hay una configurada
    /// (propagación inmediata) o globalmente.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        match self.config.guild_id {
            Some(id) => {
                let guild_id = GuildId::new(id);
                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!(
                        "⚠️ El bot no está en la guild {}, no registro comandos",
                        guild_id
                    );
                    return Ok(());
                }
                commands::register_guild_commands(ctx, guild_id).await?;
                info!("✅ Comandos registrados en la guild {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await?;
                info!("✅ Comandos registrados globalmente");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for CadenzaBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(
            "🤖 {} en línea, {} servidores",
            ready.user.name,
            ready.guilds.len()
        );
        self.members.attach(ctx.cache.clone(), ready.user.id);

        if let Err(e) = self.register_commands(&ctx).await {
            error!("❌ No pude registrar los comandos: {:?}", e);
        }

        if !self.maintenance_started.swap(true, Ordering::SeqCst) {
            let music = Arc::clone(&self.music);
            let cache = ctx.cache.clone();
            let media = self.media_cache.clone();
            let playlists = self.playlist_cache.clone();
            tokio::spawn(async move {
                maintenance_loop(music, cache, media, playlists).await;
            });
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("❌ Error manejando un comando: {:?}", e);
            }
        }
    }

    /// Alguien salió de un canal de voz (o se movió): si era el canal del
    /// bot y quedó sin oyentes, el orquestador se despide.
    async fn voice_state_update(&self, _ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id.or_else(|| old.as_ref().and_then(|s| s.guild_id))
        else {
            return;
        };
        let Some(previous) = old.and_then(|state| state.channel_id) else {
            return;
        };
        if new.channel_id == Some(previous) {
            // Cambio de mute o similar, nadie salió del canal.
            return;
        }
        self.music.on_voice_leave(guild_id, previous).await;
    }

    /// Ruta pasiva: links pegados en el canal vinculado entran a la cola
    /// sin comando.
    async fn message(&self, _ctx: Context, message: Message) {
        if message.author.bot {
            return;
        }
        let Some(guild_id) = message.guild_id else {
            return;
        };
        self.music
            .on_message(guild_id, message.channel_id, message.id, &message.content)
            .await;
    }
}

async fn maintenance_loop(
    music: Arc<Music>,
    cache: Arc<serenity::cache::Cache>,
    media: MediaCache,
    playlists: PlaylistCache,
) {
    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
    let mut cleanup = tokio::time::interval(CACHE_CLEANUP_INTERVAL);
    loop {
        tokio::select! {
            _ = sweep.tick() => {
                music.sweep(&cache.guilds()).await;
            }
            _ = cleanup.tick() => {
                media.cleanup_expired();
                playlists.cleanup_expired();
            }
        }
    }
}
