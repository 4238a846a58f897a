use std::io::{Read, Seek, SeekFrom};

use flume::Receiver;
use songbird::input::{Input, RawAdapter};
use symphonia::core::io::MediaSource;

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: u32 = 2;

/// Muestras f32 que caben en el canal entre la bomba del pipeline y el sink.
/// ~1 segundo de audio estéreo a 48 kHz; llena, frena a ffmpeg vía backpressure.
pub const PCM_BUFFER_SAMPLES: usize = SAMPLE_RATE as usize * CHANNELS as usize;

/// Convierte el extremo receptor del canal PCM en un `Input` para songbird.
///
/// El driver consume f32 intercalado a través de `RawAdapter`; el fin del
/// stream (canal cerrado) se traduce en EOF, que el sink reporta como fin de
/// pista.
pub fn pcm_input(rx: Receiver<f32>) -> Input {
    let adapter = RawAdapter::new(PcmReader::new(rx), SAMPLE_RATE, CHANNELS);
    Input::from(adapter)
}

/// Ensambla muestras s16le a partir de fragmentos de bytes de tamaño arbitrario.
///
/// Los reads del stdout de ffmpeg pueden cortar una muestra por la mitad; el
/// byte suelto se recuerda hasta el siguiente fragmento.
#[derive(Debug, Default)]
pub struct SampleAssembler {
    pending: Option<u8>,
}

impl SampleAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convierte un fragmento en muestras f32 normalizadas.
    pub fn feed(&mut self, mut bytes: &[u8], out: &mut Vec<f32>) {
        if let Some(lo) = self.pending.take() {
            match bytes.split_first() {
                Some((&hi, rest)) => {
                    out.push(sample_to_f32(i16::from_le_bytes([lo, hi])));
                    bytes = rest;
                }
                None => {
                    self.pending = Some(lo);
                    return;
                }
            }
        }

        let mut pairs = bytes.chunks_exact(2);
        for pair in &mut pairs {
            out.push(sample_to_f32(i16::from_le_bytes([pair[0], pair[1]])));
        }
        self.pending = pairs.remainder().first().copied();
    }
}

fn sample_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

/// Lector bloqueante del canal PCM para el hilo de audio de songbird.
///
/// Bloquea esperando la primera muestra de cada read; el resto se toma sin
/// bloquear para no retrasar al mezclador. Canal desconectado y vacío = EOF.
struct PcmReader {
    rx: Receiver<f32>,
    staged: [u8; 4],
    staged_from: usize,
    staged_to: usize,
}

impl PcmReader {
    fn new(rx: Receiver<f32>) -> Self {
        Self {
            rx,
            staged: [0; 4],
            staged_from: 0,
            staged_to: 0,
        }
    }
}

impl Read for PcmReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut written = 0;

        // Restos de una muestra que no cupo completa en el read anterior
        while written < buf.len() && self.staged_from < self.staged_to {
            buf[written] = self.staged[self.staged_from];
            self.staged_from += 1;
            written += 1;
        }

        while written < buf.len() {
            let sample = if written == 0 {
                match self.rx.recv() {
                    Ok(sample) => sample,
                    Err(flume::RecvError::Disconnected) => return Ok(0),
                }
            } else {
                match self.rx.try_recv() {
                    Ok(sample) => sample,
                    Err(_) => break,
                }
            };

            let bytes = sample.to_le_bytes();
            let take = (buf.len() - written).min(4);
            buf[written..written + take].copy_from_slice(&bytes[..take]);
            written += take;

            if take < 4 {
                self.staged = bytes;
                self.staged_from = take;
                self.staged_to = 4;
            }
        }

        Ok(written)
    }
}

impl Seek for PcmReader {
    fn seek(&mut self, _pos: SeekFrom) -> std::io::Result<u64> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "stream en vivo, sin seek",
        ))
    }
}

impl MediaSource for PcmReader {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}
