//! Traducción de interacciones slash a operaciones del orquestador.
//!
//! Los comandos lentos (`/play`, `/radio`) difieren la respuesta y la editan
//! al terminar; el resto responde en el acto. Los errores tipados del
//! orquestador llegan al usuario con su razón exacta.

use anyhow::Result;
use serenity::{
    builder::{
        CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::info;

use crate::audio::VoteOutcome;
use crate::bot::CadenzaBot;
use crate::music::{Added, NowPlayingInfo};
use crate::sources::radio::{station_by_name, STATIONS};
use crate::sources::Source;

/// Maneja un comando slash. Fuera de una guild no hay sesión posible.
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &CadenzaBot,
) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        return respond(ctx, &command, "❌ Este comando solo funciona dentro de un servidor").await;
    };

    info!(
        "📝 Comando /{} de {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "play" => handle_play(ctx, command, bot, guild_id).await,
        "skip" => handle_skip(ctx, command, bot, guild_id).await,
        "clear" => handle_clear(ctx, command, bot, guild_id).await,
        "volume" => handle_volume(ctx, command, bot, guild_id).await,
        "nowplaying" => handle_nowplaying(ctx, command, bot, guild_id).await,
        "summon" => handle_summon(ctx, command, bot, guild_id).await,
        "leave" => handle_leave(ctx, command, bot, guild_id).await,
        "radio" => handle_radio(ctx, command, bot, guild_id).await,
        _ => respond(ctx, &command, "❌ Comando no reconocido").await,
    }
}

async fn handle_play(
    ctx: &Context,
    command: CommandInteraction,
    bot: &CadenzaBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(query) = option_str(&command, "query").map(str::to_string) else {
        return respond(ctx, &command, "❌ Falta el término de búsqueda").await;
    };
    let soundcloud = option_str(&command, "fuente") == Some("soundcloud");

    // La resolución puede tardar más que la ventana de respuesta.
    defer(ctx, &command).await?;

    let voice = user_voice_channel(ctx, guild_id, command.user.id);
    if let Err(e) = bot.music.connect(guild_id, voice, command.channel_id).await {
        return edit(ctx, &command, &format!("❌ {}", e)).await;
    }

    let result = if soundcloud {
        bot.music.add_soundcloud(guild_id, &query).await
    } else {
        let source = if query.starts_with("http") {
            Source::Url(query)
        } else {
            Source::Query(query)
        };
        bot.music.add(guild_id, source).await
    };

    match result {
        Ok(Added { media, position: Some(position) }) => {
            edit(
                ctx,
                &command,
                &format!("✅ **{}** quedó #{} en la cola", media.title, position),
            )
            .await
        }
        Ok(Added { media, position: None }) => {
            edit(ctx, &command, &format!("▶️ Arrancando **{}**", media.title)).await
        }
        Err(e) => edit(ctx, &command, &format!("❌ {}", e)).await,
    }
}

async fn handle_skip(
    ctx: &Context,
    command: CommandInteraction,
    bot: &CadenzaBot,
    guild_id: GuildId,
) -> Result<()> {
    let force = option_bool(&command, "force").unwrap_or(false);
    match bot.music.skip(guild_id, command.user.id, force).await {
        Ok(outcome) => respond(ctx, &command, &vote_reply("saltar", outcome)).await,
        Err(e) => respond(ctx, &command, &format!("❌ {}", e)).await,
    }
}

async fn handle_clear(
    ctx: &Context,
    command: CommandInteraction,
    bot: &CadenzaBot,
    guild_id: GuildId,
) -> Result<()> {
    let force = option_bool(&command, "force").unwrap_or(false);
    match bot.music.clear(guild_id, command.user.id, force).await {
        Ok(outcome) => respond(ctx, &command, &vote_reply("limpiar la cola", outcome)).await,
        Err(e) => respond(ctx, &command, &format!("❌ {}", e)).await,
    }
}

async fn handle_volume(
    ctx: &Context,
    command: CommandInteraction,
    bot: &CadenzaBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(nivel) = option_i64(&command, "nivel") else {
        return respond(ctx, &command, "❌ Falta el nivel (0-100)").await;
    };
    let percent = nivel.clamp(0, 100) as u8;
    match bot.music.set_volume(guild_id, percent).await {
        Ok(()) => {
            respond(
                ctx,
                &command,
                &format!("🔊 Volumen al {} % desde la próxima pista", percent),
            )
            .await
        }
        Err(e) => respond(ctx, &command, &format!("❌ {}", e)).await,
    }
}

async fn handle_nowplaying(
    ctx: &Context,
    command: CommandInteraction,
    bot: &CadenzaBot,
    guild_id: GuildId,
) -> Result<()> {
    let reply = match bot.music.playing(guild_id).await {
        Some(NowPlayingInfo::Media(media)) => format!(
            "🎵 Ahora suena: **{}** ({})\n<{}>",
            media.title,
            media.duration_display(),
            media.canonical_url
        ),
        Some(NowPlayingInfo::Radio { stream_url, track }) => match track {
            Some(track) => format!("📻 Radio en vivo: **{}**\n<{}>", track.display(), stream_url),
            None => format!("📻 Radio en vivo\n<{}>", stream_url),
        },
        None => "ℹ️ No suena nada ahora mismo".to_string(),
    };
    respond(ctx, &command, &reply).await
}

async fn handle_summon(
    ctx: &Context,
    command: CommandInteraction,
    bot: &CadenzaBot,
    guild_id: GuildId,
) -> Result<()> {
    let voice = user_voice_channel(ctx, guild_id, command.user.id);
    match bot.music.connect(guild_id, voice, command.channel_id).await {
        Ok(channel) => respond(ctx, &command, &format!("🔊 Conectado a <#{}>", channel)).await,
        Err(e) => respond(ctx, &command, &format!("❌ {}", e)).await,
    }
}

async fn handle_leave(
    ctx: &Context,
    command: CommandInteraction,
    bot: &CadenzaBot,
    guild_id: GuildId,
) -> Result<()> {
    bot.music.unbind_channel(guild_id).await;
    respond(ctx, &command, "👋 Hasta luego").await
}

async fn handle_radio(
    ctx: &Context,
    command: CommandInteraction,
    bot: &CadenzaBot,
    guild_id: GuildId,
) -> Result<()> {
    let station = option_str(&command, "emisora").and_then(station_by_name);
    let Some(station) = station else {
        return respond(ctx, &command, &radio_usage()).await;
    };

    defer(ctx, &command).await?;

    let voice = user_voice_channel(ctx, guild_id, command.user.id);
    if let Err(e) = bot.music.connect(guild_id, voice, command.channel_id).await {
        return edit(ctx, &command, &format!("❌ {}", e)).await;
    }

    match bot.music.stream(guild_id, station).await {
        Ok(()) => edit(ctx, &command, &format!("📻 {} en el aire", station.name)).await,
        Err(e) => edit(ctx, &command, &format!("❌ {}", e)).await,
    }
}

// Auxiliares

fn option_str<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn option_i64(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}

fn option_bool(command: &CommandInteraction, name: &str) -> Option<bool> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_bool())
}

fn vote_reply(action: &str, outcome: VoteOutcome) -> String {
    match outcome {
        VoteOutcome::Executed => "✅ Hecho".to_string(),
        VoteOutcome::Pending { votes, needed } => {
            format!("🗳️ Voto para {} registrado: {} de {}", action, votes, needed)
        }
        VoteOutcome::AlreadyVoted => "🗳️ Ya habías votado".to_string(),
    }
}

fn radio_usage() -> String {
    let names: Vec<&str> = STATIONS.iter().map(|s| s.name).collect();
    format!("ℹ️ Emisoras disponibles: {}", names.join(", "))
}

/// Canal de voz del solicitante según la cache del gateway.
fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    ctx.cache.guild(guild_id).and_then(|guild| {
        guild
            .voice_states
            .get(&user_id)
            .and_then(|state| state.channel_id)
    })
}

async fn respond(ctx: &Context, command: &CommandInteraction, text: &str) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().content(text),
            ),
        )
        .await?;
    Ok(())
}

async fn defer(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;
    Ok(())
}

async fn edit(ctx: &Context, command: &CommandInteraction, text: &str) -> Result<()> {
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(text))
        .await?;
    Ok(())
}
