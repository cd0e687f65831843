//! Definición y registro de los comandos slash.

use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

use crate::sources::radio::STATIONS;

/// Registra los comandos globalmente (propagación lenta, ~1 hora).
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in command_set() {
        ctx.http.create_global_command(&command).await?;
    }
    Ok(())
}

/// Registra los comandos en una guild específica (propagación inmediata,
/// para desarrollo).
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, command_set()).await?;
    Ok(())
}

fn command_set() -> Vec<CreateCommand> {
    vec![
        play_command(),
        skip_command(),
        clear_command(),
        volume_command(),
        nowplaying_command(),
        summon_command(),
        leave_command(),
        radio_command(),
    ]
}

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Reproduce una fuente o la agrega a la cola")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "query",
                "URL o término de búsqueda",
            )
            .required(true),
        )
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "fuente", "Dónde buscar")
                .add_string_choice("YouTube", "youtube")
                .add_string_choice("SoundCloud", "soundcloud"),
        )
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip")
        .description("Salta la pista actual (a votación si el canal está concurrido)")
        .add_option(CreateCommandOption::new(
            CommandOptionType::Boolean,
            "force",
            "Saltar sin votación",
        ))
}

fn clear_command() -> CreateCommand {
    CreateCommand::new("clear")
        .description("Vacía la cola de reproducción")
        .add_option(CreateCommandOption::new(
            CommandOptionType::Boolean,
            "force",
            "Limpiar sin votación",
        ))
}

fn volume_command() -> CreateCommand {
    CreateCommand::new("volume")
        .description("Fija el volumen para los próximos arranques")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "nivel", "Porcentaje (0-100)")
                .min_int_value(0)
                .max_int_value(100)
                .required(true),
        )
}

fn nowplaying_command() -> CreateCommand {
    CreateCommand::new("nowplaying").description("Muestra lo que suena ahora")
}

fn summon_command() -> CreateCommand {
    CreateCommand::new("summon").description("Trae el bot a tu canal de voz")
}

fn leave_command() -> CreateCommand {
    CreateCommand::new("leave").description("Desconecta el bot y desmonta la sesión")
}

fn radio_command() -> CreateCommand {
    let mut emisora =
        CreateCommandOption::new(CommandOptionType::String, "emisora", "Emisora a sintonizar")
            .required(true);
    for station in STATIONS {
        emisora = emisora.add_string_choice(station.name, station.name);
    }
    CreateCommand::new("radio")
        .description("Sintoniza una radio en vivo")
        .add_option(emisora)
}
