use anyhow::Result;
use serenity::{http::Http, model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

mod audio;
mod bot;
mod cache;
mod config;
mod error;
mod music;
mod notify;
mod sources;
mod storage;
mod transport;

use crate::bot::CadenzaBot;
use crate::cache::{MediaCache, PlaylistCache};
use crate::config::Config;
use crate::music::Music;
use crate::notify::DiscordNotifier;
use crate::sources::radio::{self, RadioDirectory};
use crate::sources::soundcloud::SoundCloudProvider;
use crate::sources::youtube::YouTubeProvider;
use crate::sources::AudioResolver;
use crate::storage::AudioStore;
use crate::transport::{CacheDirectory, MemberDirectory, SongbirdTransport};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cadenza=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Cadenza v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    // Resolución de fuentes: proveedores, caches y almacén de payloads.
    let media_cache = MediaCache::new();
    let playlist_cache = PlaylistCache::new();
    let store = Arc::new(AudioStore::new(config.audio_dir.clone()).await?);
    let youtube = Arc::new(YouTubeProvider::new(config.metadata_api_key.clone()));
    let soundcloud = Arc::new(SoundCloudProvider::new(config.soundcloud_client_id.clone()));
    let resolver = Arc::new(AudioResolver::new(
        &config,
        youtube.clone(),
        youtube.clone(),
        youtube,
        soundcloud,
        media_cache.clone(),
        playlist_cache.clone(),
        store,
    ));

    // Directorio de radios con su feed de «ahora suena».
    let radio_directory = RadioDirectory::new();
    let radio_updates = radio_directory.subscribe();
    radio::spawn_feed(
        Duration::from_secs(config.radio_refresh_secs),
        radio_updates,
    );

    // Voz y avisos. El notificador usa su propio cliente REST porque el
    // del gateway recién existe cuando el cliente arranca.
    let manager = Songbird::serenity();
    let transport = SongbirdTransport::new(Arc::clone(&manager));
    let notifier = DiscordNotifier::new(Arc::new(Http::new(&config.discord_token)));
    let members = CacheDirectory::new();

    let music = Music::new(
        Arc::clone(&config),
        transport,
        Arc::clone(&members) as Arc<dyn MemberDirectory>,
        notifier,
        resolver,
        radio_directory,
    );

    let handler = CadenzaBot::new(
        Arc::clone(&config),
        Arc::clone(&music),
        members,
        media_cache,
        playlist_cache,
    );

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(manager)
        .await?;

    // Apagado ordenado: avisar en cada canal vinculado antes de cortar.
    let shutdown_music = Arc::clone(&music);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("❌ No pude registrar Ctrl+C: {}", e);
            return;
        }
        info!("🛑 Señal de apagado recibida");
        shutdown_music.shutdown().await;
        std::process::exit(0);
    });

    info!("🚀 Cliente en marcha");
    if let Err(why) = client.start().await {
        error!("❌ Error del cliente: {:?}", why);
    }

    Ok(())
}
