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
use tracing::{info, warn};

use crate::audio::session::PlayOutcome;
use crate::bot::SonoraBot;

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &SonoraBot,
) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        respond_ephemeral(ctx, &command, "❌ Este comando solo funciona dentro de un servidor")
            .await?;
        return Ok(());
    };

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "play" => handle_play(ctx, command, bot, guild_id).await?,
        "skip" => handle_skip(ctx, command, bot, guild_id).await?,
        "queue" => handle_queue(ctx, command, bot, guild_id).await?,
        "leave" => handle_leave(ctx, command, bot, guild_id).await?,
        _ => {
            respond_ephemeral(ctx, &command, "❌ Comando no reconocido").await?;
        }
    }

    Ok(())
}

async fn handle_play(
    ctx: &Context,
    command: CommandInteraction,
    bot: &SonoraBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(voice_channel) = user_voice_channel(ctx, guild_id, command.user.id) else {
        respond_ephemeral(ctx, &command, "❌ ¡Debes estar en un canal de voz!").await?;
        return Ok(());
    };

    let query = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "query")
        .and_then(|opt| opt.value.as_str())
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    if query.is_empty() {
        respond_ephemeral(ctx, &command, "❌ Debes indicar qué reproducir").await?;
        return Ok(());
    }

    // Defer la respuesta: la resolución consulta yt-dlp y puede tardar
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let session = bot.registry.get_or_create(guild_id);
    let content = match session.play(voice_channel, &query).await {
        Ok(PlayOutcome::Started { title }) => format!("🎵 Reproduciendo ahora: **{}**", title),
        Ok(PlayOutcome::Enqueued { title, position }) => {
            format!("🎵 Agregada a la cola: **{}**\n📝 Posición: {}", title, position)
        }
        Ok(PlayOutcome::Discarded) => {
            "⚠️ Me desconectaron durante la búsqueda; no se encoló nada".to_string()
        }
        Err(e) => {
            warn!("⚠️ /play falló en guild {}: {}", guild_id, e);
            format!("❌ {}", e)
        }
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
        .await?;

    Ok(())
}

async fn handle_skip(
    ctx: &Context,
    command: CommandInteraction,
    bot: &SonoraBot,
    guild_id: GuildId,
) -> Result<()> {
    if user_voice_channel(ctx, guild_id, command.user.id).is_none() {
        respond_ephemeral(ctx, &command, "❌ ¡Debes estar en un canal de voz!").await?;
        return Ok(());
    }

    let skipped = match bot.registry.get(guild_id) {
        Some(session) => session.skip().await,
        None => false,
    };

    let content = if skipped {
        "⏭️ ¡Canción saltada!"
    } else {
        "❌ No hay nada reproduciéndose"
    };
    respond(ctx, &command, content).await
}

async fn handle_queue(
    ctx: &Context,
    command: CommandInteraction,
    bot: &SonoraBot,
    guild_id: GuildId,
) -> Result<()> {
    let waiting = bot
        .registry
        .get(guild_id)
        .map(|session| session.queue_len())
        .unwrap_or(0);

    let content = if waiting == 0 {
        "📭 La cola está vacía".to_string()
    } else {
        format!("📝 Canciones en espera: {}", waiting)
    };
    respond(ctx, &command, content).await
}

async fn handle_leave(
    ctx: &Context,
    command: CommandInteraction,
    bot: &SonoraBot,
    guild_id: GuildId,
) -> Result<()> {
    if user_voice_channel(ctx, guild_id, command.user.id).is_none() {
        respond_ephemeral(ctx, &command, "❌ ¡Debes estar en un canal de voz!").await?;
        return Ok(());
    }

    let content = match bot.registry.get(guild_id) {
        Some(session) => {
            session.disconnect().await;
            "👋 Desconectado y cola vaciada"
        }
        None => "❌ No estoy conectado a ningún canal",
    };
    respond(ctx, &command, content).await
}

// Funciones auxiliares

/// Canal de voz del usuario según la caché de la guild.
fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;

    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

async fn respond(
    ctx: &Context,
    command: &CommandInteraction,
    content: impl Into<String>,
) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().content(content),
            ),
        )
        .await?;

    Ok(())
}

async fn respond_ephemeral(
    ctx: &Context,
    command: &CommandInteraction,
    content: impl Into<String>,
) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(true),
            ),
        )
        .await?;

    Ok(())
}
