use anyhow::{Context, Result};
use serenity::{all::ApplicationId, model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod error;
mod sources;

use crate::audio::pipeline::{AudioStreamer, ProcessStreamer};
use crate::audio::voice::{SongbirdConnector, VoiceConnector};
use crate::audio::SessionRegistry;
use crate::bot::SonoraBot;
use crate::config::Config;
use crate::sources::{TrackResolver, YouTubeResolver};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sonora=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Sonora v{}", env!("CARGO_PKG_VERSION"));

    // El health check corre antes de cargar la configuración: el probe del
    // contenedor no tiene por qué conocer el token de Discord
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("📋 Configuración cargada\n{}", config.summary());

    // Intents mínimos: comandos slash y estados de voz
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    // El manager de voz se comparte entre serenity y las sesiones
    let songbird = Songbird::serenity();

    let resolver: Arc<dyn TrackResolver> = Arc::new(YouTubeResolver::new(&config));
    let voice: Arc<dyn VoiceConnector> = Arc::new(SongbirdConnector::new(
        songbird.clone(),
        config.connect_timeout(),
    ));
    let streamer: Arc<dyn AudioStreamer> = Arc::new(ProcessStreamer::new(&config));
    let registry = Arc::new(SessionRegistry::new(resolver, voice, streamer, &config));

    // Crear handler del bot
    let handler = SonoraBot::new(config.clone(), registry);

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .application_id(ApplicationId::new(config.application_id))
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            error!("❌ No se pudo registrar el manejador de Ctrl+C");
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        std::process::exit(0);
    });

    // Iniciar bot
    info!("🚀 Conectando al gateway de Discord...");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

/// Verifica que los binarios externos del pipeline estén disponibles.
async fn health_check() -> Result<()> {
    let ytdlp_bin = std::env::var("YTDLP_BIN").unwrap_or_else(|_| "yt-dlp".to_string());
    let ffmpeg_bin = std::env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string());

    let yt_dlp = async_process::Command::new(&ytdlp_bin)
        .arg("--version")
        .output()
        .await
        .with_context(|| format!("no se pudo ejecutar {}", ytdlp_bin))?;

    let ffmpeg = async_process::Command::new(&ffmpeg_bin)
        .arg("-version")
        .output()
        .await
        .with_context(|| format!("no se pudo ejecutar {}", ffmpeg_bin))?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes: yt-dlp o ffmpeg no responden");
    }
}
