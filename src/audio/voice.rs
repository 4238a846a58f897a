use std::sync::Arc;
use std::time::Duration;

use serenity::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::input::Input;
use songbird::tracks::TrackHandle;
use songbird::{Call, Event as VoiceEvent, Songbird, TrackEvent};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::events::{TrackEndForwarder, TrackErrorForwarder, TrackStartForwarder};
use super::session::SignalSender;
use crate::error::{PlaybackError, Result};

/// Transporte de voz: establece una conexión por guild bajo demanda.
#[async_trait]
pub trait VoiceConnector: Send + Sync {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceConnection>>;
}

/// Conexión de voz viva: recibe streams y se destruye al desconectar.
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    /// Entrega `input` al sink y registra los reenviadores de eventos
    /// etiquetados con `seq`.
    async fn play(
        &self,
        input: Input,
        signals: SignalSender,
        seq: u64,
    ) -> Result<Box<dyn SinkControl>>;

    /// Libera la conexión. Tolera llamadas repetidas.
    async fn destroy(&self);
}

/// Control mínimo sobre la pista entregada al sink.
#[cfg_attr(test, mockall::automock)]
pub trait SinkControl: Send + Sync {
    fn stop(&self);
}

// ============================================================================
// Implementación sobre songbird
// ============================================================================

/// Conector respaldado por songbird, con timeout de conexión acotado.
pub struct SongbirdConnector {
    manager: Arc<Songbird>,
    connect_timeout: Duration,
}

impl SongbirdConnector {
    pub fn new(manager: Arc<Songbird>, connect_timeout: Duration) -> Self {
        Self {
            manager,
            connect_timeout,
        }
    }
}

#[async_trait]
impl VoiceConnector for SongbirdConnector {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceConnection>> {
        let joined = tokio::time::timeout(
            self.connect_timeout,
            self.manager.join(guild_id, channel_id),
        )
        .await;

        match joined {
            Ok(Ok(call)) => {
                info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);
                Ok(Arc::new(SongbirdConnection {
                    manager: self.manager.clone(),
                    guild_id,
                    call,
                }))
            }
            Ok(Err(e)) => {
                warn!("⚠️ Conexión de voz rechazada en guild {}: {}", guild_id, e);
                // songbird puede dejar un Call a medio registrar
                let _ = self.manager.remove(guild_id).await;
                Err(PlaybackError::VoiceConnect(e.to_string()))
            }
            Err(_) => {
                warn!(
                    "⚠️ Conexión de voz sin respuesta en guild {} tras {:?}",
                    guild_id, self.connect_timeout
                );
                let _ = self.manager.remove(guild_id).await;
                Err(PlaybackError::VoiceConnect(format!(
                    "sin respuesta tras {} segundos",
                    self.connect_timeout.as_secs()
                )))
            }
        }
    }
}

struct SongbirdConnection {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    call: Arc<Mutex<Call>>,
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    async fn play(
        &self,
        input: Input,
        signals: SignalSender,
        seq: u64,
    ) -> Result<Box<dyn SinkControl>> {
        let mut call = self.call.lock().await;
        let handle = call.play_input(input);

        if let Err(e) = register_forwarders(&handle, &signals, seq) {
            let _ = handle.stop();
            return Err(e);
        }

        Ok(Box::new(TrackSink { handle }))
    }

    async fn destroy(&self) {
        if let Err(e) = self.manager.remove(self.guild_id).await {
            debug!("Salida del canal de voz en guild {} reportó: {}", self.guild_id, e);
        } else {
            info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
        }
    }
}

fn register_forwarders(handle: &TrackHandle, signals: &SignalSender, seq: u64) -> Result<()> {
    handle
        .add_event(
            VoiceEvent::Track(TrackEvent::Play),
            TrackStartForwarder {
                signals: signals.clone(),
                seq,
            },
        )
        .map_err(|e| PlaybackError::Sink(format!("registro de evento Play: {}", e)))?;

    handle
        .add_event(
            VoiceEvent::Track(TrackEvent::End),
            TrackEndForwarder {
                signals: signals.clone(),
                seq,
            },
        )
        .map_err(|e| PlaybackError::Sink(format!("registro de evento End: {}", e)))?;

    handle
        .add_event(
            VoiceEvent::Track(TrackEvent::Error),
            TrackErrorForwarder {
                signals: signals.clone(),
                seq,
            },
        )
        .map_err(|e| PlaybackError::Sink(format!("registro de evento Error: {}", e)))?;

    Ok(())
}

struct TrackSink {
    handle: TrackHandle,
}

impl SinkControl for TrackSink {
    fn stop(&self) {
        // sobre una pista ya culminada el stop es un no-op para el driver
        if let Err(e) = self.handle.stop() {
            debug!("Stop sobre pista terminada: {}", e);
        }
    }
}
