//! # Bot Module
//!
//! Main Discord bot implementation for Sonora.
//!
//! This module contains the gateway-facing logic, including:
//! - Command registration and handling
//! - Event handling (ready, interactions, voice state updates)
//!
//! ## Architecture
//!
//! The bot is built around the [`SonoraBot`] struct which implements
//! Serenity's [`EventHandler`] trait. Every playback operation is delegated
//! to the per-guild sessions owned by [`SessionRegistry`]; the handler layer
//! only validates the interaction and formats replies.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sonora::bot::SonoraBot;
//! use sonora::audio::SessionRegistry;
//! use sonora::config::Config;
//!
//! # fn example(config: Arc<Config>, registry: Arc<SessionRegistry>) {
//! let bot = SonoraBot::new(config, registry);
//! # }
//! ```

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;

use crate::{audio::SessionRegistry, config::Config};

/// Manejador principal de eventos del gateway.
pub struct SonoraBot {
    /// Configuración cargada desde variables de entorno
    config: Arc<Config>,
    /// Sesiones de reproducción por guild
    pub registry: Arc<SessionRegistry>,
}

impl SonoraBot {
    pub fn new(config: Arc<Config>, registry: Arc<SessionRegistry>) -> Self {
        Self { config, registry }
    }

    /// Registra los slash commands, por guild si hay una configurada.
    ///
    /// Los comandos de guild propagan en segundos; los globales pueden
    /// tardar hasta una hora.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild: {}", guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild configurada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id).await?;
                info!("✅ Comandos de guild registrados");
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for SonoraBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("❌ Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            let name = command.data.name.clone();
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("❌ Error manejando /{}: {:?}", name, e);
            }
        }
    }

    /// Limpia la sesión cuando al bot lo echan del canal de voz.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let bot_id = ctx.cache.current_user().id;
        if new.user_id != bot_id {
            return;
        }

        // el bot salió de un canal sin entrar a otro
        if old.is_some() && new.channel_id.is_none() {
            let Some(guild_id) = new.guild_id else { return };

            if let Some(session) = self.registry.get(guild_id) {
                info!("🔌 Bot desconectado del canal de voz en guild {}", guild_id);
                session.disconnect().await;
            }
        }
    }
}
