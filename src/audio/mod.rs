//! # Audio Module
//!
//! Playback core for Sonora: one isolated session per guild, fed by an
//! external fetch/transcode pipeline.
//!
//! ## Architecture
//!
//! ### [`session`] - Playback Session
//! - One state loop per guild; commands and sink signals share a channel
//! - FIFO queue with explicit capacity, advanced on track end
//! - Sequence numbers discard late signals from superseded tracks
//!
//! ### [`pipeline`] - Stream Pipeline
//! - yt-dlp fetch piped into ffmpeg transcode, supervised until exit
//! - Stderr watchers separate real failures from teardown noise
//!
//! ### [`pcm`] - Sample Transport
//! - s16le bytes reassembled into f32 samples over a bounded channel
//! - Bounded buffering applies backpressure all the way to the fetch
//!
//! ### [`voice`] - Voice Transport
//! - Connector with bounded join timeout, one live connection per session
//! - Track handles wrap the driver sink behind a minimal control trait
//!
//! ## Audio Quality
//!
//! - **Sample Rate**: 48kHz (Discord standard)
//! - **Bit Depth**: 16-bit signed integers, widened to f32 for the driver
//! - **Channels**: Stereo (2 channels)
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use sonora::audio::SessionRegistry;
//! use serenity::all::{ChannelId, GuildId};
//!
//! # async fn example(registry: SessionRegistry) -> anyhow::Result<()> {
//! let session = registry.get_or_create(GuildId::new(123456789));
//!
//! session.play(ChannelId::new(987654321), "nirvana come as you are").await?;
//! session.skip().await;
//! session.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod pcm;
pub mod pipeline;
pub mod queue;
pub mod session;
pub mod voice;

use std::sync::Arc;

use dashmap::DashMap;
use serenity::model::id::GuildId;
use tracing::debug;

use crate::config::Config;
use crate::sources::TrackResolver;
use self::pipeline::AudioStreamer;
use self::session::PlaybackSession;
use self::voice::VoiceConnector;

/// Sesiones de reproducción por guild.
///
/// Cada guild obtiene exactamente una sesión, creada en el primer uso y
/// conservada mientras el proceso vive. Las entradas del mapa se crean por
/// clave, así que dos guilds nunca se bloquean entre sí.
pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<PlaybackSession>>,
    resolver: Arc<dyn TrackResolver>,
    voice: Arc<dyn VoiceConnector>,
    streamer: Arc<dyn AudioStreamer>,
    max_queue_size: usize,
}

impl SessionRegistry {
    pub fn new(
        resolver: Arc<dyn TrackResolver>,
        voice: Arc<dyn VoiceConnector>,
        streamer: Arc<dyn AudioStreamer>,
        config: &Config,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            resolver,
            voice,
            streamer,
            max_queue_size: config.max_queue_size,
        }
    }

    /// Devuelve la sesión de la guild, creándola la primera vez.
    pub fn get_or_create(&self, guild_id: GuildId) -> Arc<PlaybackSession> {
        self.sessions
            .entry(guild_id)
            .or_insert_with(|| {
                debug!("🆕 Sesión de reproducción creada para guild {}", guild_id);
                Arc::new(PlaybackSession::spawn(
                    guild_id,
                    self.resolver.clone(),
                    self.voice.clone(),
                    self.streamer.clone(),
                    self.max_queue_size,
                ))
            })
            .clone()
    }

    /// Sesión existente de la guild, si alguna vez creó una.
    pub fn get(&self, guild_id: GuildId) -> Option<Arc<PlaybackSession>> {
        self.sessions.get(&guild_id).map(|entry| entry.clone())
    }
}
