use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use songbird::input::Input;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::pcm::{self, SampleAssembler, CHANNELS, PCM_BUFFER_SAMPLES, SAMPLE_RATE};
use super::session::SignalSender;
use crate::config::Config;
use crate::error::{PlaybackError, Result};

/// Mensajes de limpieza que ffmpeg emite al cortarse el stream antes de
/// tiempo; aparecen en cada salto y no son errores.
const BENIGN_TRANSCODE_MARKERS: [&str; 4] = [
    "Error writing trailer",
    "Error closing file",
    "Error muxing a packet",
    "Error submitting a packet",
];

const BROKEN_PIPE_MARKERS: [&str; 2] = ["Broken pipe", "EPIPE"];

/// Arranca el par de procesos que convierte una referencia en audio PCM.
#[async_trait]
pub trait AudioStreamer: Send + Sync {
    /// Lanza el pipeline para `url` y entrega el stream listo para el sink.
    ///
    /// El stream se entrega en cuanto ambos procesos arrancan; un fallo
    /// posterior llega a la sesión como señal etiquetada con `seq`.
    async fn open(&self, url: &str, signals: SignalSender, seq: u64) -> Result<LiveStream>;
}

/// Stream en vivo: entrada para el sink más el control del par de procesos.
pub struct LiveStream {
    pub input: Input,
    pub pipeline: PipelineHandle,
}

/// Control del par fetch/transcode de una pista en vuelo.
///
/// Soltar el handle cancela el par; el supervisor mata y cosecha los procesos
/// rezagados, con `kill_on_drop` como red de seguridad.
pub struct PipelineHandle {
    cancel: CancellationToken,
}

impl PipelineHandle {
    /// Termina ambos procesos sin esperar a que el stream se agote.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self {
            cancel: CancellationToken::new(),
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Pipeline yt-dlp → ffmpeg con copia explícita entre ambos.
pub struct ProcessStreamer {
    ytdlp_bin: String,
    ffmpeg_bin: String,
}

impl ProcessStreamer {
    pub fn new(config: &Config) -> Self {
        Self {
            ytdlp_bin: config.ytdlp_bin.clone(),
            ffmpeg_bin: config.ffmpeg_bin.clone(),
        }
    }
}

#[async_trait]
impl AudioStreamer for ProcessStreamer {
    async fn open(&self, url: &str, signals: SignalSender, seq: u64) -> Result<LiveStream> {
        info!("🚀 Lanzando pipeline [{}] para {}", seq, url);

        let mut fetch = Command::new(&self.ytdlp_bin)
            .args(fetch_args(url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PlaybackError::Pipeline(format!("no se pudo lanzar yt-dlp: {}", e)))?;

        let mut transcode = match Command::new(&self.ffmpeg_bin)
            .args(transcode_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let _ = fetch.start_kill();
                return Err(PlaybackError::Pipeline(format!(
                    "no se pudo lanzar ffmpeg: {}",
                    e
                )));
            }
        };

        let pipes = (
            fetch.stdout.take(),
            fetch.stderr.take(),
            transcode.stdin.take(),
            transcode.stdout.take(),
            transcode.stderr.take(),
        );
        let (fetch_out, fetch_err, tc_in, tc_out, tc_err) = match pipes {
            (Some(a), Some(b), Some(c), Some(d), Some(e)) => (a, b, c, d, e),
            _ => {
                let _ = fetch.start_kill();
                let _ = transcode.start_kill();
                return Err(PlaybackError::Pipeline(
                    "pipes del pipeline incompletos".to_string(),
                ));
            }
        };

        let (tx, rx) = flume::bounded::<f32>(PCM_BUFFER_SAMPLES);
        let cancel = CancellationToken::new();
        let fetch_failed = Arc::new(AtomicBool::new(false));
        let saw_broken_pipe = Arc::new(AtomicBool::new(false));

        tokio::spawn(copy_stream(fetch_out, tc_in, seq, saw_broken_pipe.clone()));
        tokio::spawn(pump_pcm(tc_out, tx, seq));

        let watchers = vec![
            tokio::spawn(watch_fetch_stderr(
                fetch_err,
                seq,
                fetch_failed.clone(),
                saw_broken_pipe.clone(),
            )),
            tokio::spawn(watch_transcode_stderr(tc_err, seq, saw_broken_pipe.clone())),
        ];

        tokio::spawn(supervise(
            fetch,
            transcode,
            watchers,
            cancel.clone(),
            signals,
            seq,
            fetch_failed,
            saw_broken_pipe,
        ));

        Ok(LiveStream {
            input: pcm::pcm_input(rx),
            pipeline: PipelineHandle { cancel },
        })
    }
}

/// Argumentos de yt-dlp: mejor audio disponible, sin expandir playlists,
/// a stdout, con el perfil de cliente que evita el rate limiting del host.
fn fetch_args(url: &str) -> Vec<String> {
    vec![
        "-f".to_string(),
        "bestaudio/best".to_string(),
        "-o".to_string(),
        "-".to_string(),
        "--no-playlist".to_string(),
        "--extractor-args".to_string(),
        "youtube:player_client=android".to_string(),
        url.to_string(),
    ]
}

/// Argumentos de ffmpeg: stdin → PCM s16le 48 kHz estéreo, latencia mínima.
fn transcode_args() -> Vec<String> {
    vec![
        "-i".to_string(),
        "pipe:0".to_string(),
        "-fflags".to_string(),
        "+nobuffer".to_string(),
        "-flags".to_string(),
        "low_delay".to_string(),
        "-f".to_string(),
        "s16le".to_string(),
        "-ar".to_string(),
        SAMPLE_RATE.to_string(),
        "-ac".to_string(),
        CHANNELS.to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "pipe:1".to_string(),
    ]
}

fn is_fetch_error_line(line: &str) -> bool {
    line.contains("ERROR")
}

fn is_benign_transcode_line(line: &str) -> bool {
    BENIGN_TRANSCODE_MARKERS
        .iter()
        .any(|marker| line.contains(marker))
}

fn is_broken_pipe_line(line: &str) -> bool {
    BROKEN_PIPE_MARKERS
        .iter()
        .any(|marker| line.contains(marker))
}

/// Copia explícita fetch → transcode; cierra el stdin de ffmpeg al agotarse
/// la descarga para que pueda vaciar sus buffers y terminar.
async fn copy_stream(
    mut from: ChildStdout,
    mut to: ChildStdin,
    seq: u64,
    saw_broken_pipe: Arc<AtomicBool>,
) {
    match tokio::io::copy(&mut from, &mut to).await {
        Ok(bytes) => {
            debug!("📦 [{}] descarga completa: {} bytes copiados", seq, bytes);
            if let Err(e) = to.shutdown().await {
                debug!("[{}] cierre del stdin de ffmpeg: {}", seq, e);
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
            saw_broken_pipe.store(true, Ordering::Relaxed);
            debug!("🔇 [{}] pipe cortado durante la copia (esperado al saltar)", seq);
        }
        Err(e) => {
            warn!("⚠️ [{}] error copiando fetch → transcode: {}", seq, e);
        }
    }
}

/// Bombea el PCM de ffmpeg hacia el canal del sink, convirtiendo a f32.
///
/// El canal acotado frena la lectura cuando el sink va por detrás; soltar el
/// transmisor al terminar marca el fin del stream para el lector.
async fn pump_pcm(mut out: ChildStdout, tx: flume::Sender<f32>, seq: u64) {
    let mut assembler = SampleAssembler::new();
    let mut buf = vec![0u8; 8192];
    let mut samples = Vec::with_capacity(4096);

    loop {
        match out.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                samples.clear();
                assembler.feed(&buf[..n], &mut samples);
                for &sample in &samples {
                    if tx.send_async(sample).await.is_err() {
                        debug!("🔇 [{}] sink cerrado, deteniendo bomba PCM", seq);
                        return;
                    }
                }
            }
            Err(e) => {
                debug!("[{}] lectura PCM terminada: {}", seq, e);
                break;
            }
        }
    }

    debug!("🏁 [{}] bomba PCM: fin del stream", seq);
}

async fn watch_fetch_stderr(
    err: ChildStderr,
    seq: u64,
    failed: Arc<AtomicBool>,
    saw_broken_pipe: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(err).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_broken_pipe_line(&line) {
            saw_broken_pipe.store(true, Ordering::Relaxed);
            debug!("🔇 [{}] yt-dlp (pipe cortado): {}", seq, line);
        } else if is_fetch_error_line(&line) {
            error!("❌ [{}] yt-dlp: {}", seq, line);
            failed.store(true, Ordering::Relaxed);
        } else {
            debug!("[{}] yt-dlp: {}", seq, line);
        }
    }
}

async fn watch_transcode_stderr(err: ChildStderr, seq: u64, saw_broken_pipe: Arc<AtomicBool>) {
    let mut lines = BufReader::new(err).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_benign_transcode_line(&line) {
            debug!("🔇 [{}] ffmpeg (limpieza esperada): {}", seq, line);
        } else if is_broken_pipe_line(&line) {
            saw_broken_pipe.store(true, Ordering::Relaxed);
            debug!("🔇 [{}] ffmpeg (pipe cortado): {}", seq, line);
        } else {
            warn!("⚠️ [{}] ffmpeg: {}", seq, line);
        }
    }
}

/// Dueño de ambos procesos: espera sus salidas, drena los watchers de stderr
/// y avisa a la sesión solo ante fallos reales. La cancelación mata el par.
#[allow(clippy::too_many_arguments)]
async fn supervise(
    mut fetch: Child,
    mut transcode: Child,
    watchers: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
    signals: SignalSender,
    seq: u64,
    fetch_failed: Arc<AtomicBool>,
    saw_broken_pipe: Arc<AtomicBool>,
) {
    let finished = tokio::select! {
        _ = cancel.cancelled() => None,
        statuses = async { tokio::join!(fetch.wait(), transcode.wait()) } => Some(statuses),
    };

    let Some((fetch_status, transcode_status)) = finished else {
        debug!("🛑 [{}] pipeline cancelado, matando procesos", seq);
        let _ = fetch.start_kill();
        let _ = transcode.start_kill();
        let _ = fetch.wait().await;
        let _ = transcode.wait().await;
        return;
    };

    // los watchers terminan con el EOF de cada stderr; drenarlos garantiza
    // que las banderas estén completas antes de clasificar
    for watcher in watchers {
        let _ = watcher.await;
    }

    let verdict = classify_exit(
        end_of(fetch_status),
        end_of(transcode_status),
        fetch_failed.load(Ordering::Relaxed),
        saw_broken_pipe.load(Ordering::Relaxed),
    );

    match verdict {
        Some(problem) => {
            error!("❌ [{}] pipeline falló: {}", seq, problem);
            signals.pipeline_error(seq, problem);
        }
        None => debug!("✅ [{}] pipeline terminó limpio", seq),
    }
}

/// Cómo terminó un proceso del pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ProcessEnd {
    Clean,
    Code(i32),
    /// Matado por señal: el consumidor cortó primero.
    Signal,
    /// `wait()` falló.
    Unknown(String),
}

fn end_of(result: std::io::Result<ExitStatus>) -> ProcessEnd {
    match result {
        Ok(status) if status.success() => ProcessEnd::Clean,
        Ok(status) => match status.code() {
            Some(code) => ProcessEnd::Code(code),
            None => ProcessEnd::Signal,
        },
        Err(e) => ProcessEnd::Unknown(e.to_string()),
    }
}

/// Un fallo real del par, o `None` si la terminación fue limpia o benigna
/// (pipe cortado por el consumidor, proceso matado al saltar).
fn classify_exit(
    fetch: ProcessEnd,
    transcode: ProcessEnd,
    fetch_error_logged: bool,
    saw_broken_pipe: bool,
) -> Option<String> {
    let mut problems = Vec::new();

    if fetch_error_logged {
        problems.push("yt-dlp reportó ERROR".to_string());
    }

    match fetch {
        ProcessEnd::Code(code) if !saw_broken_pipe => {
            problems.push(format!("yt-dlp salió con código {}", code));
        }
        ProcessEnd::Unknown(e) => problems.push(format!("yt-dlp: {}", e)),
        _ => {}
    }

    match transcode {
        ProcessEnd::Code(code) if !saw_broken_pipe => {
            problems.push(format!("ffmpeg salió con código {}", code));
        }
        ProcessEnd::Unknown(e) => problems.push(format!("ffmpeg: {}", e)),
        _ => {}
    }

    if problems.is_empty() {
        None
    } else {
        Some(problems.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fetch_args_shape() {
        let args = fetch_args("https://youtu.be/abc");
        assert_eq!(args.first().unwrap(), "-f");
        assert!(args.contains(&"bestaudio/best".to_string()));
        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(args.contains(&"youtube:player_client=android".to_string()));
        assert_eq!(args.last().unwrap(), "https://youtu.be/abc");
    }

    #[test]
    fn test_transcode_args_shape() {
        let args = transcode_args();
        assert!(args.contains(&"s16le".to_string()));
        assert!(args.contains(&"48000".to_string()));
        assert!(args.contains(&"low_delay".to_string()));
        assert_eq!(args.last().unwrap(), "pipe:1");
    }

    #[test]
    fn test_benign_transcode_lines() {
        assert!(is_benign_transcode_line(
            "pipe:1: Error writing trailer: Broken pipe"
        ));
        assert!(is_benign_transcode_line("Error muxing a packet"));
        assert!(!is_benign_transcode_line(
            "pipe:0: Invalid data found when processing input"
        ));
    }

    #[test]
    fn test_fetch_error_lines() {
        assert!(is_fetch_error_line("ERROR: [youtube] abc: Video unavailable"));
        assert!(!is_fetch_error_line("[download] Destination: -"));
    }

    #[test]
    fn test_broken_pipe_lines() {
        assert!(is_broken_pipe_line("av_interleaved_write_frame(): Broken pipe"));
        assert!(is_broken_pipe_line("ERROR: unable to write data: EPIPE"));
        assert!(!is_broken_pipe_line("frame dropped"));
    }

    #[test]
    fn test_clean_exit_is_not_a_failure() {
        assert_eq!(
            classify_exit(ProcessEnd::Clean, ProcessEnd::Clean, false, false),
            None
        );
    }

    #[test]
    fn test_nonzero_exit_is_a_failure() {
        let verdict = classify_exit(ProcessEnd::Code(1), ProcessEnd::Clean, true, false);
        assert!(verdict.unwrap().contains("yt-dlp"));
    }

    #[test]
    fn test_broken_pipe_exit_is_benign() {
        assert_eq!(
            classify_exit(ProcessEnd::Code(1), ProcessEnd::Code(1), false, true),
            None
        );
    }

    #[test]
    fn test_killed_by_signal_is_benign() {
        assert_eq!(
            classify_exit(ProcessEnd::Signal, ProcessEnd::Signal, false, false),
            None
        );
    }

    #[test]
    fn test_wait_failure_is_reported() {
        let verdict = classify_exit(
            ProcessEnd::Clean,
            ProcessEnd::Unknown("se perdió el proceso".to_string()),
            false,
            false,
        );
        assert!(verdict.unwrap().contains("ffmpeg"));
    }
}
