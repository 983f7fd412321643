use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upload_session::config::Config;
use upload_session::session::{
    HistoryStore, JsonFileHistoryStore, MemoryHistoryStore, ProgressSnapshot, SessionEvent,
    SessionHandle, SessionState, UploadController, UploadSource,
};
use upload_session::tus::TusClient;
use upload_session::utils::{format_bytes, format_eta, format_speed};

/// Resumable upload of one file, controlled from the keyboard
#[derive(Parser, Debug)]
#[command(name = "upload-session")]
#[command(about = "Resumable tus upload with pause/resume/cancel")]
#[command(version)]
struct Args {
    /// File to upload
    file: PathBuf,

    /// Destination object key
    #[arg(short, long)]
    key: String,

    /// Path to config.toml
    #[arg(short, long, default_value = "config.toml", env = "UPLOAD_SESSION_CONFIG")]
    config: PathBuf,

    /// Ask the server to delete the partial upload when cancelling
    #[arg(long)]
    delete_on_cancel: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "upload_session=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;

    let client = TusClient::with_config(config.client_config())
        .context("Failed to create tus client")?;
    let history: Arc<dyn HistoryStore> = match &config.history_file {
        Some(path) => Arc::new(JsonFileHistoryStore::new(path)),
        None => Arc::new(MemoryHistoryStore::new()),
    };

    let (controller, worker_handle) =
        UploadController::new(Arc::new(client), history, config.controller_config());
    let mut events = controller.subscribe_events();

    info!(file = %args.file.display(), key = %args.key, "starting upload");
    let handle = controller
        .start_with(
            UploadSource::file(&args.file),
            args.key.clone(),
            config.upload_options(),
            print_progress,
        )
        .await?;

    println!("p: pause  r: resume  c: cancel  q: quit");
    let mut keys = spawn_keyboard();
    enable_raw_mode()?;

    let result = loop {
        tokio::select! {
            Some(code) = keys.recv() => {
                match handle_key(&handle, code, args.delete_on_cancel).await {
                    Ok(true) => break Ok(()),
                    Ok(false) => {}
                    Err(err) => print!("\r\n{}\r\n", err),
                }
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Completed { session_id, upload_url }) if session_id == handle.id() => {
                    print!("\r\nCompleted: {}\r\n", upload_url);
                    break Ok(());
                }
                Ok(SessionEvent::Failed { session_id, error }) if session_id == handle.id() => {
                    print!("\r\nFailed: {}\r\n", error);
                    break Err(anyhow::anyhow!("upload failed: {}", error));
                }
                Ok(SessionEvent::StateChanged { session_id, new_state, .. }) if session_id == handle.id() => {
                    if new_state == SessionState::Cancelled {
                        print!("\r\nCancelled\r\n");
                        break Ok(());
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(err) => break Err(err.into()),
            }
        }
    };

    disable_raw_mode()?;
    controller.shutdown().await?;
    worker_handle.await?;

    result
}

/// 返回 true 时退出
async fn handle_key(handle: &SessionHandle, code: KeyCode, delete_on_cancel: bool) -> Result<bool> {
    match code {
        KeyCode::Char('p') => handle.pause().await?,
        KeyCode::Char('r') => handle.resume().await?,
        KeyCode::Char('c') => handle.cancel(delete_on_cancel).await?,
        KeyCode::Char('q') => return Ok(true),
        _ => {}
    }
    Ok(false)
}

/// crossterm 的读取是阻塞的，放到单独的线程里
fn spawn_keyboard() -> mpsc::UnboundedReceiver<KeyCode> {
    let (key_tx, key_rx) = mpsc::unbounded_channel();

    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        loop {
            if event::poll(Duration::from_millis(100))? {
                if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                    if kind != KeyEventKind::Press {
                        continue;
                    }
                    if key_tx.send(code).is_err() {
                        return Ok(());
                    }
                }
            } else if key_tx.is_closed() {
                return Ok(());
            }
        }
    });

    key_rx
}

fn print_progress(snapshot: &ProgressSnapshot) {
    print!(
        "\r{} {:>5.1}% {} / {}  {}  eta {}  [{}]    ",
        snapshot.file_name,
        snapshot.progress_percent,
        format_bytes(snapshot.bytes_uploaded),
        format_bytes(snapshot.bytes_total),
        format_speed(snapshot.upload_speed),
        format_eta(snapshot.eta),
        snapshot.state,
    );
    let _ = std::io::stdout().flush();
}
