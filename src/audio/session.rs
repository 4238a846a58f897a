use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serenity::model::id::{ChannelId, GuildId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::pipeline::{AudioStreamer, PipelineHandle};
use super::queue::TrackQueue;
use super::voice::{SinkControl, VoiceConnection, VoiceConnector};
use crate::error::{PlaybackError, Result};
use crate::sources::{Track, TrackResolver};

/// Resultado de un `play` ya resuelto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayOutcome {
    /// La pista pasó directo a reproducción.
    Started { title: String },
    /// La pista quedó en espera; `position` cuenta desde la que suena.
    Enqueued { title: String, position: usize },
    /// La sesión se desconectó mientras se resolvía; no se encoló nada.
    Discarded,
}

/// Señales del sink y del pipeline, etiquetadas con la secuencia de la
/// pista que las originó.
#[derive(Debug)]
pub enum SinkSignal {
    Started { seq: u64 },
    Idle { seq: u64 },
    Error { seq: u64, detail: String },
}

enum SessionCommand {
    Play {
        channel_id: ChannelId,
        track: Track,
        epoch: u64,
        reply: oneshot::Sender<Result<PlayOutcome>>,
    },
    Skip {
        reply: oneshot::Sender<bool>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Signal(SinkSignal),
}

/// Extremo de envío de señales hacia el bucle de la sesión.
///
/// Guarda un emisor débil: los reenviadores de eventos y los procesos del
/// pipeline no mantienen vivo el bucle cuando la sesión ya cayó.
#[derive(Clone)]
pub struct SignalSender {
    tx: mpsc::WeakUnboundedSender<SessionCommand>,
}

impl SignalSender {
    fn send(&self, signal: SinkSignal) {
        if let Some(tx) = self.tx.upgrade() {
            let _ = tx.send(SessionCommand::Signal(signal));
        }
    }

    pub fn started(&self, seq: u64) {
        self.send(SinkSignal::Started { seq });
    }

    pub fn idle(&self, seq: u64) {
        self.send(SinkSignal::Idle { seq });
    }

    pub fn error(&self, seq: u64, detail: impl Into<String>) {
        self.send(SinkSignal::Error {
            seq,
            detail: detail.into(),
        });
    }

    pub fn pipeline_error(&self, seq: u64, detail: impl Into<String>) {
        self.send(SinkSignal::Error {
            seq,
            detail: format!("pipeline: {}", detail.into()),
        });
    }
}

/// Sesión de reproducción de una guild.
///
/// Todo el estado mutable vive en un bucle propio; la sesión solo expone
/// operaciones que le mandan mensajes. Las señales asíncronas del sink
/// entran por el mismo canal, así que comandos y eventos quedan
/// serializados sin locks sobre el estado.
pub struct PlaybackSession {
    guild_id: GuildId,
    queue: Arc<RwLock<TrackQueue>>,
    epoch: Arc<AtomicU64>,
    resolver: Arc<dyn TrackResolver>,
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl PlaybackSession {
    /// Crea la sesión y arranca su bucle de estados.
    pub fn spawn(
        guild_id: GuildId,
        resolver: Arc<dyn TrackResolver>,
        voice: Arc<dyn VoiceConnector>,
        streamer: Arc<dyn AudioStreamer>,
        max_queue_size: usize,
    ) -> Self {
        let queue = Arc::new(RwLock::new(TrackQueue::new(max_queue_size)));
        let epoch = Arc::new(AtomicU64::new(0));
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = SessionWorker {
            guild_id,
            queue: queue.clone(),
            epoch: epoch.clone(),
            voice,
            streamer,
            signals: SignalSender { tx: tx.downgrade() },
            connection: None,
            sink: None,
            pipeline: None,
            playing: false,
            seq: 0,
        };
        tokio::spawn(worker.run(rx));

        Self {
            guild_id,
            queue,
            epoch,
            resolver,
            tx,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Resuelve `query` y encola la pista, arrancando la reproducción si
    /// no había nada sonando.
    ///
    /// La resolución corre fuera del bucle; si la sesión se desconecta
    /// mientras tanto, el resultado se descarta en vez de reconectar.
    pub async fn play(&self, channel_id: ChannelId, query: &str) -> Result<PlayOutcome> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let track = self.resolver.resolve(query).await?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Play {
                channel_id,
                track,
                epoch,
                reply: reply_tx,
            })
            .map_err(|_| PlaybackError::SessionClosed)?;
        reply_rx.await.map_err(|_| PlaybackError::SessionClosed)?
    }

    /// Detiene la pista en curso; `false` si no había nada sonando.
    pub async fn skip(&self) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(SessionCommand::Skip { reply: reply_tx })
            .is_err()
        {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Pistas en espera, sin contar la que suena.
    pub fn queue_len(&self) -> usize {
        self.queue.read().len()
    }

    /// Vacía la cola, corta el pipeline y abandona el canal de voz.
    /// Tolera llamadas repetidas.
    pub async fn disconnect(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(SessionCommand::Disconnect { reply: reply_tx })
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }
}

/// Estado interno del bucle. Solo el bucle lo toca.
struct SessionWorker {
    guild_id: GuildId,
    queue: Arc<RwLock<TrackQueue>>,
    epoch: Arc<AtomicU64>,
    voice: Arc<dyn VoiceConnector>,
    streamer: Arc<dyn AudioStreamer>,
    signals: SignalSender,
    connection: Option<Arc<dyn VoiceConnection>>,
    sink: Option<Box<dyn SinkControl>>,
    pipeline: Option<PipelineHandle>,
    playing: bool,
    seq: u64,
}

impl SessionWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionCommand>) {
        debug!("🎛️ Bucle de sesión iniciado para guild {}", self.guild_id);

        while let Some(command) = rx.recv().await {
            match command {
                SessionCommand::Play {
                    channel_id,
                    track,
                    epoch,
                    reply,
                } => {
                    let outcome = self.handle_play(channel_id, track, epoch).await;
                    let _ = reply.send(outcome);
                }
                SessionCommand::Skip { reply } => {
                    let _ = reply.send(self.handle_skip());
                }
                SessionCommand::Disconnect { reply } => {
                    self.teardown().await;
                    let _ = reply.send(());
                }
                SessionCommand::Signal(signal) => self.handle_signal(signal).await,
            }
        }

        // la sesión cayó: suelta lo que quede antes de terminar
        self.teardown().await;
        debug!("🎛️ Bucle de sesión terminado para guild {}", self.guild_id);
    }

    async fn handle_play(
        &mut self,
        channel_id: ChannelId,
        track: Track,
        epoch: u64,
    ) -> Result<PlayOutcome> {
        if epoch != self.epoch.load(Ordering::SeqCst) {
            warn!(
                "🗑️ Resolución descartada tras desconexión en guild {}: {}",
                self.guild_id, track.title
            );
            return Ok(PlayOutcome::Discarded);
        }

        if self.connection.is_none() {
            info!(
                "🔌 Conectando al canal de voz {} en guild {}",
                channel_id, self.guild_id
            );
            match self.voice.connect(self.guild_id, channel_id).await {
                Ok(connection) => self.connection = Some(connection),
                Err(e) => {
                    error!("❌ Conexión de voz fallida en guild {}: {}", self.guild_id, e);
                    return Err(e);
                }
            }
        }

        let title = track.title.clone();
        let waiting = {
            let mut queue = self.queue.write();
            queue.push(track)?;
            queue.len()
        };

        if self.playing {
            return Ok(PlayOutcome::Enqueued {
                title,
                position: waiting + 1,
            });
        }

        self.advance().await;
        Ok(PlayOutcome::Started { title })
    }

    fn handle_skip(&mut self) -> bool {
        if !self.playing {
            debug!("⏭️ Skip sin pista en curso en guild {}", self.guild_id);
            return false;
        }

        info!("⏭️ Saltando pista en guild {}", self.guild_id);
        if let Some(sink) = &self.sink {
            // el stop dispara el evento de fin, que es quien avanza la cola
            sink.stop();
        }
        true
    }

    async fn handle_signal(&mut self, signal: SinkSignal) {
        match signal {
            SinkSignal::Started { seq } if seq == self.seq => {
                info!("🎶 Audio en marcha en guild {} (pista {})", self.guild_id, seq);
            }
            SinkSignal::Started { seq } => {
                debug!(
                    "Señal de arranque obsoleta en guild {} (pista {}, actual {})",
                    self.guild_id, seq, self.seq
                );
            }
            SinkSignal::Idle { seq } => {
                if self.stale(seq) {
                    return;
                }
                debug!("🏁 Fin de pista en guild {} (pista {})", self.guild_id, seq);
                self.advance().await;
            }
            SinkSignal::Error { seq, detail } => {
                if self.stale(seq) {
                    return;
                }
                error!(
                    "💥 Pista {} falló en guild {}: {}",
                    seq, self.guild_id, detail
                );
                self.advance().await;
            }
        }
    }

    /// Una señal de una pista ya superada no debe tocar el estado.
    fn stale(&self, seq: u64) -> bool {
        if seq != self.seq || !self.playing {
            debug!(
                "Señal obsoleta en guild {} (pista {}, actual {}, sonando: {})",
                self.guild_id, seq, self.seq, self.playing
            );
            return true;
        }
        false
    }

    /// Suelta la pista en vuelo y arranca la siguiente de la cola.
    ///
    /// Si el pipeline o el sink fallan al arrancar, la pista se descarta y
    /// se intenta con la siguiente.
    async fn advance(&mut self) {
        self.playing = false;
        self.sink = None;
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.abort();
        }

        let Some(connection) = self.connection.clone() else {
            debug!("Avance sin conexión de voz en guild {}", self.guild_id);
            return;
        };

        loop {
            let next = self.queue.write().pop();
            let Some(track) = next else {
                debug!("📭 Cola vacía en guild {}, sesión en reposo", self.guild_id);
                return;
            };

            self.seq += 1;
            info!(
                "🎵 Reproduciendo en guild {}: {} ({})",
                self.guild_id, track.title, track.url
            );

            let stream = match self
                .streamer
                .open(&track.url, self.signals.clone(), self.seq)
                .await
            {
                Ok(stream) => stream,
                Err(e) => {
                    error!(
                        "❌ Pipeline no arrancó para {} en guild {}: {}",
                        track.title, self.guild_id, e
                    );
                    continue;
                }
            };

            match connection
                .play(stream.input, self.signals.clone(), self.seq)
                .await
            {
                Ok(sink) => {
                    self.sink = Some(sink);
                    self.pipeline = Some(stream.pipeline);
                    self.playing = true;
                    return;
                }
                Err(e) => {
                    error!(
                        "❌ El sink rechazó {} en guild {}: {}",
                        track.title, self.guild_id, e
                    );
                    stream.pipeline.abort();
                    continue;
                }
            }
        }
    }

    /// Limpieza total: cola, pipeline, sink y conexión de voz, en ese orden.
    async fn teardown(&mut self) {
        self.queue.write().clear();

        if let Some(pipeline) = self.pipeline.take() {
            pipeline.abort();
        }
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
        self.playing = false;

        if let Some(connection) = self.connection.take() {
            info!("👋 Cerrando sesión de voz en guild {}", self.guild_id);
            connection.destroy().await;
        }

        // invalida señales pendientes y resoluciones en vuelo
        self.seq += 1;
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use serenity::model::id::{ChannelId, GuildId};
    use tokio::sync::Notify;

    use super::test_support::*;
    use super::*;
    use crate::audio::voice::MockSinkControl;
    use crate::sources::MockTrackResolver;

    struct Harness {
        session: PlaybackSession,
        voice: Arc<FakeVoice>,
        streamer: Arc<FakeStreamer>,
        channel: ChannelId,
    }

    fn ids() -> (GuildId, ChannelId) {
        (GuildId::new(4242), ChannelId::new(99))
    }

    fn harness() -> Harness {
        harness_sized(25)
    }

    fn harness_sized(max_queue: usize) -> Harness {
        let (guild, channel) = ids();
        let voice = Arc::new(FakeVoice::default());
        let streamer = Arc::new(FakeStreamer::default());
        let session = PlaybackSession::spawn(
            guild,
            Arc::new(FakeResolver),
            voice.clone(),
            streamer.clone(),
            max_queue,
        );
        Harness {
            session,
            voice,
            streamer,
            channel,
        }
    }

    #[tokio::test]
    async fn test_first_play_connects_and_starts() {
        let h = harness();

        let outcome = h.session.play(h.channel, "uno").await.unwrap();

        assert_eq!(
            outcome,
            PlayOutcome::Started {
                title: "T-uno".to_string()
            }
        );
        assert_eq!(h.session.queue_len(), 0);
        assert_eq!(h.voice.connects.load(Ordering::SeqCst), 1);
        assert_eq!(h.streamer.launched(), vec!["https://tube.local/uno"]);
        assert_eq!(h.voice.last().plays.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_enqueue_reports_position() {
        let h = harness();

        h.session.play(h.channel, "uno").await.unwrap();
        let dos = h.session.play(h.channel, "dos").await.unwrap();
        let tres = h.session.play(h.channel, "tres").await.unwrap();

        assert_eq!(
            dos,
            PlayOutcome::Enqueued {
                title: "T-dos".to_string(),
                position: 2
            }
        );
        assert_eq!(
            tres,
            PlayOutcome::Enqueued {
                title: "T-tres".to_string(),
                position: 3
            }
        );
        assert_eq!(h.session.queue_len(), 2);
        // solo la primera llegó al pipeline
        assert_eq!(h.streamer.launched().len(), 1);
        assert_eq!(h.voice.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_skip_without_track_returns_false() {
        let h = harness();

        assert!(!h.session.skip().await);
        assert_eq!(h.session.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_skip_stops_sink_and_advances() {
        let h = harness();
        let mut sink = MockSinkControl::new();
        sink.expect_stop().times(1).return_const(());
        h.voice.sink_script.lock().push(Box::new(sink));

        h.session.play(h.channel, "uno").await.unwrap();
        h.session.play(h.channel, "dos").await.unwrap();

        assert!(h.session.skip().await);

        // el stop provoca el evento de fin; aquí lo emite el test
        let (signals, seq) = h.streamer.current();
        signals.idle(seq);

        assert!(h.session.skip().await);
        assert_eq!(
            h.streamer.launched(),
            vec!["https://tube.local/uno", "https://tube.local/dos"]
        );
        assert_eq!(h.session.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_track_end_advances_and_reuses_connection() {
        let h = harness();

        h.session.play(h.channel, "uno").await.unwrap();
        h.session.play(h.channel, "dos").await.unwrap();

        let (signals, seq) = h.streamer.current();
        signals.idle(seq);
        assert!(h.session.skip().await); // dos tomó el relevo
        assert_eq!(h.session.queue_len(), 0);

        let (signals, seq) = h.streamer.current();
        signals.idle(seq);
        assert!(!h.session.skip().await); // cola agotada, sesión en reposo

        // la conexión se conserva para la siguiente reproducción
        let outcome = h.session.play(h.channel, "tres").await.unwrap();
        assert_eq!(
            outcome,
            PlayOutcome::Started {
                title: "T-tres".to_string()
            }
        );
        assert_eq!(h.voice.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolution_failure_keeps_queue() {
        let mut resolver = MockTrackResolver::new();
        resolver
            .expect_resolve()
            .withf(|input| input == "uno")
            .returning(|input| {
                Ok(Track::new(
                    format!("https://tube.local/{input}"),
                    "T-uno".to_string(),
                ))
            });
        resolver
            .expect_resolve()
            .withf(|input| input == "nada")
            .returning(|_| Err(PlaybackError::NoResults));

        let (guild, channel) = ids();
        let voice = Arc::new(FakeVoice::default());
        let streamer = Arc::new(FakeStreamer::default());
        let session = PlaybackSession::spawn(
            guild,
            Arc::new(resolver),
            voice.clone(),
            streamer.clone(),
            25,
        );

        session.play(channel, "uno").await.unwrap();
        let err = session.play(channel, "nada").await.unwrap_err();

        assert!(matches!(err, PlaybackError::NoResults));
        assert_eq!(session.queue_len(), 0);
        assert!(session.skip().await); // uno sigue en vuelo
        assert_eq!(streamer.launched().len(), 1);
    }

    #[tokio::test]
    async fn test_voice_connect_failure_enqueues_nothing() {
        let (guild, channel) = ids();
        let voice = Arc::new(FakeVoice::rejecting());
        let streamer = Arc::new(FakeStreamer::default());
        let session = PlaybackSession::spawn(
            guild,
            Arc::new(FakeResolver),
            voice.clone(),
            streamer.clone(),
            25,
        );

        let err = session.play(channel, "uno").await.unwrap_err();

        assert!(matches!(err, PlaybackError::VoiceConnect(_)));
        assert_eq!(session.queue_len(), 0);
        assert!(streamer.launched().is_empty());

        // cada intento vuelve a conectar desde cero
        let _ = session.play(channel, "dos").await.unwrap_err();
        assert_eq!(voice.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_pipeline_spawn_failure_skips_to_next() {
        let h = harness();
        h.streamer.fail_on("https://tube.local/dos");

        h.session.play(h.channel, "uno").await.unwrap();
        h.session.play(h.channel, "dos").await.unwrap();
        h.session.play(h.channel, "tres").await.unwrap();

        let (signals, seq) = h.streamer.current();
        signals.idle(seq);

        assert!(h.session.skip().await); // tres quedó en vuelo
        assert_eq!(
            h.streamer.launched(),
            vec![
                "https://tube.local/uno",
                "https://tube.local/dos",
                "https://tube.local/tres",
            ]
        );
        assert_eq!(h.session.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_pipeline_error_signal_advances() {
        let h = harness();

        h.session.play(h.channel, "uno").await.unwrap();
        h.session.play(h.channel, "dos").await.unwrap();

        let (signals, seq) = h.streamer.current();
        signals.error(seq, "yt-dlp reportó ERROR");

        assert!(h.session.skip().await); // dos tomó el relevo
        assert_eq!(h.streamer.launched().len(), 2);
        assert_eq!(h.session.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_stale_signal_is_ignored() {
        let h = harness();

        h.session.play(h.channel, "uno").await.unwrap();
        h.session.play(h.channel, "dos").await.unwrap();

        let (signals, first_seq) = h.streamer.current();
        signals.idle(first_seq); // avanza a dos
        signals.idle(first_seq); // duplicado tardío: no debe tocar a dos

        assert!(h.session.skip().await); // dos sigue en vuelo
        assert_eq!(h.streamer.launched().len(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_resets_session() {
        let h = harness();

        h.session.play(h.channel, "uno").await.unwrap();
        h.session.play(h.channel, "dos").await.unwrap();
        h.session.play(h.channel, "tres").await.unwrap();

        let first_connection = h.voice.last();
        h.session.disconnect().await;

        assert_eq!(h.session.queue_len(), 0);
        assert_eq!(first_connection.destroys.load(Ordering::SeqCst), 1);
        assert!(!h.session.skip().await);

        // la siguiente reproducción parte de cero
        let outcome = h.session.play(h.channel, "cuatro").await.unwrap();
        assert_eq!(
            outcome,
            PlayOutcome::Started {
                title: "T-cuatro".to_string()
            }
        );
        assert_eq!(h.voice.connects.load(Ordering::SeqCst), 2);

        // dos y tres nunca llegaron al pipeline
        assert_eq!(
            h.streamer.launched(),
            vec!["https://tube.local/uno", "https://tube.local/cuatro"]
        );
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let h = harness();

        h.session.disconnect().await; // sin conexión previa
        assert_eq!(h.session.queue_len(), 0);

        h.session.play(h.channel, "uno").await.unwrap();
        let connection = h.voice.last();

        h.session.disconnect().await;
        h.session.disconnect().await;
        assert_eq!(connection.destroys.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolution_after_disconnect_is_discarded() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let resolver = Arc::new(GatedResolver {
            entered: entered.clone(),
            release: release.clone(),
        });

        let (guild, channel) = ids();
        let voice = Arc::new(FakeVoice::default());
        let streamer = Arc::new(FakeStreamer::default());
        let session = Arc::new(PlaybackSession::spawn(
            guild,
            resolver,
            voice.clone(),
            streamer.clone(),
            25,
        ));

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.play(channel, "uno").await }
        });

        entered.notified().await;
        session.disconnect().await;
        release.notify_one();

        let outcome = pending.await.unwrap().unwrap();
        assert_eq!(outcome, PlayOutcome::Discarded);
        assert_eq!(session.queue_len(), 0);
        assert_eq!(voice.connects.load(Ordering::SeqCst), 0);
        assert!(streamer.launched().is_empty());
    }

    #[tokio::test]
    async fn test_queue_full_rejects_play() {
        let h = harness_sized(2);

        h.session.play(h.channel, "uno").await.unwrap();
        h.session.play(h.channel, "dos").await.unwrap();
        h.session.play(h.channel, "tres").await.unwrap();

        let err = h.session.play(h.channel, "cuatro").await.unwrap_err();

        assert!(matches!(err, PlaybackError::QueueFull(2)));
        assert_eq!(h.session.queue_len(), 2);
    }
}
