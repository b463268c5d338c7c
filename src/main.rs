//! DCA encoder
//!
//! Encodes a file, URI or stdin into a DCA stream on stdout.
//!
//! Usage: `dca [INPUT] [CONFIG]`, where INPUT is `-` or omitted for stdin.

use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dca_stream::{ConfigFile, DcaError, EncodeSession, LoggingSettings, Result};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "dca";

/// Configuration read when no path is given, if present
const DEFAULT_CONFIG: &str = "dca.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let input = std::env::args().nth(1).filter(|arg| arg != "-");
    let config_path = std::env::args().nth(2);

    let config = match &config_path {
        Some(path) => ConfigFile::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => ConfigFile::from_file(DEFAULT_CONFIG)?,
        None => ConfigFile::default(),
    };

    // stdout carries the frames, so logs go to stderr
    init_logging(&config.logging);
    tracing::debug!("{} v{} starting", APP_NAME, VERSION);

    let builder = EncodeSession::builder()
        .options(config.encode.clone())
        .tools(config.tools.clone());

    let session = match input {
        Some(path) => {
            if !path.contains("://") && !Path::new(&path).exists() {
                return Err(DcaError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{}: no such file", path),
                )));
            }
            tracing::info!("encoding {}", path);
            builder.encode_file(path)?
        }
        None => {
            if std::io::stdin().is_terminal() {
                return Err(DcaError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "refusing to read audio from a terminal, pipe it in or name a file",
                )));
            }
            tracing::info!("encoding stdin");
            builder.encode_reader(tokio::io::stdin())?
        }
    };

    let session = Arc::new(session);
    let mut stdout = tokio::io::stdout();
    if let Err(e) = tokio::io::copy(&mut session.reader(), &mut stdout).await {
        tracing::warn!("copying frames to stdout failed: {}", e);
        session.truncate().await;
        return Ok(());
    }
    stdout.flush().await?;

    let stats = session.stats();
    tracing::info!(
        frames = session.frames_produced(),
        duration = ?stats.duration,
        bitrate = stats.bitrate,
        "done"
    );
    Ok(())
}

/// Initialize logging with tracing, on stderr
fn init_logging(settings: &LoggingSettings) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| settings.level.as_str().into());
    let registry = tracing_subscriber::registry().with(filter);

    if settings.is_json() {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
