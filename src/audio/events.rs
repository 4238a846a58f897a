use serenity::async_trait;
use songbird::{Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler};
use tracing::debug;

use super::session::SignalSender;

/// Handler para cuando el driver empieza a mezclar la pista.
pub struct TrackStartForwarder {
    pub signals: SignalSender,
    pub seq: u64,
}

#[async_trait]
impl VoiceEventHandler for TrackStartForwarder {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        debug!("🎬 Pista {} empezó a sonar", self.seq);
        self.signals.started(self.seq);
        None
    }
}

/// Handler para el fin de pista, natural o provocado por un skip.
pub struct TrackEndForwarder {
    pub signals: SignalSender,
    pub seq: u64,
}

#[async_trait]
impl VoiceEventHandler for TrackEndForwarder {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        debug!("🏁 Pista {} terminó", self.seq);
        self.signals.idle(self.seq);
        None
    }
}

/// Handler para errores del driver sobre la pista en curso.
pub struct TrackErrorForwarder {
    pub signals: SignalSender,
    pub seq: u64,
}

#[async_trait]
impl VoiceEventHandler for TrackErrorForwarder {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        let detail = match ctx {
            EventContext::Track(track_list) => track_list
                .iter()
                .map(|(state, _handle)| format!("{:?}", state.playing))
                .collect::<Vec<_>>()
                .join(", "),
            _ => "error del driver".to_string(),
        };
        self.signals.error(self.seq, detail);
        None
    }
}
