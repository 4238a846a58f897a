use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{Track, TrackResolver};
use crate::config::Config;
use crate::error::{PlaybackError, Result};

/// Título genérico para enlaces directos cuyo título no se pudo consultar.
pub const DIRECT_LINK_TITLE: &str = "Video de YouTube";

/// Título genérico para resultados de búsqueda sin título.
pub const UNKNOWN_TITLE: &str = "Desconocido";

/// Resolver basado en yt-dlp: enlaces directos y búsqueda `ytsearch`.
pub struct YouTubeResolver {
    ytdlp_bin: String,
    lookup_timeout: Duration,
}

impl YouTubeResolver {
    pub fn new(config: &Config) -> Self {
        Self {
            ytdlp_bin: config.ytdlp_bin.clone(),
            lookup_timeout: config.lookup_timeout(),
        }
    }

    /// Verifica si la entrada es un enlace directo de YouTube.
    pub fn is_youtube_url(input: &str) -> bool {
        let youtube_regex = Regex::new(
            r"^(https?://)?(www\.)?(youtube\.com/(watch\?v=|embed/|v/)|youtu\.be/|music\.youtube\.com/)"
        ).unwrap();
        youtube_regex.is_match(input)
    }

    /// Busca en YouTube y devuelve el primer resultado.
    async fn search_first(&self, query: &str) -> Result<Track> {
        debug!("🔍 Buscando en YouTube: {}", query);

        let output = Command::new(&self.ytdlp_bin)
            .args([
                "--dump-json",
                "--flat-playlist",
                "--quiet",
                "--no-warnings",
                "--socket-timeout",
                "15",
            ])
            .arg(format!("ytsearch1:{}", query))
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                "⚠️ yt-dlp terminó con error buscando '{}': {}",
                query,
                stderr.trim()
            );
            return Err(PlaybackError::NoResults);
        }

        first_result(&String::from_utf8_lossy(&output.stdout))
    }

    /// Consulta el título de un enlace directo, con título genérico de respaldo.
    async fn lookup_title(&self, url: &str) -> String {
        match tokio::time::timeout(self.lookup_timeout, self.probe_title(url)).await {
            Ok(Ok(title)) => title,
            Ok(Err(e)) => {
                warn!(
                    "⚠️ No se pudo obtener el título de {}: {} (usando genérico)",
                    url, e
                );
                DIRECT_LINK_TITLE.to_string()
            }
            Err(_) => {
                warn!(
                    "⚠️ Timeout consultando el título de {} (usando genérico)",
                    url
                );
                DIRECT_LINK_TITLE.to_string()
            }
        }
    }

    async fn probe_title(&self, url: &str) -> Result<String> {
        let output = Command::new(&self.ytdlp_bin)
            .args([
                "--no-playlist",
                "--skip-download",
                "--no-warnings",
                "--print",
                "%(title)s",
            ])
            .arg(url)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("yt-dlp --print falló para {}: {}", url, stderr.trim());
            return Err(std::io::Error::other(format!("yt-dlp salió con {}", output.status)).into());
        }

        let title = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if title.is_empty() {
            return Err(std::io::Error::other("yt-dlp devolvió un título vacío").into());
        }

        Ok(title)
    }
}

#[async_trait]
impl TrackResolver for YouTubeResolver {
    async fn resolve(&self, input: &str) -> Result<Track> {
        if Self::is_youtube_url(input) {
            let title = self.lookup_title(input).await;
            debug!("🔗 Enlace directo: {} ({})", title, input);
            return Ok(Track::new(input, title));
        }

        self.search_first(input).await
    }
}

/// Subconjunto del JSON de yt-dlp que necesita el resolver.
#[derive(Debug, Deserialize)]
struct YtDlpEntry {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    webpage_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

impl YtDlpEntry {
    /// URL reproducible del resultado, en orden de preferencia.
    fn playable_url(&self) -> Option<String> {
        non_empty(&self.webpage_url)
            .or_else(|| non_empty(&self.url))
            .or_else(|| {
                non_empty(&self.id).map(|id| format!("https://www.youtube.com/watch?v={}", id))
            })
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Interpreta la salida `--dump-json` de una búsqueda y toma el primer resultado.
fn first_result(raw: &str) -> Result<Track> {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or(PlaybackError::NoResults)?;

    let entry: YtDlpEntry =
        serde_json::from_str(line).map_err(|_| PlaybackError::InvalidResult)?;

    let url = entry.playable_url().ok_or(PlaybackError::InvalidResult)?;

    let title = match non_empty(&entry.title) {
        Some(title) => title,
        None => {
            warn!("⚠️ Resultado sin título para {} (usando genérico)", url);
            UNKNOWN_TITLE.to_string()
        }
    };

    Ok(Track::new(url, title))
}
