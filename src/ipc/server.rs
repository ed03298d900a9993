//! Unix domain socket server for IPC
//!
//! Provides request-response communication, and push notifications of
//! daemon events to clients that subscribed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::controller::Controller;
use crate::events::DaemonEvent;

use super::protocol::{
    read_frame, write_frame, ActiveSession, DaemonStatus, HotkeyInfo, Request, Response,
};

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    controller: Arc<Controller>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Bind the socket, replacing a stale one
    pub fn new(socket_path: &Path, controller: Arc<Controller>) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Owner-only access
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))
                .context("failed to restrict socket permissions")?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            controller,
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let controller = Arc::clone(&self.controller);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = handle_client(stream, controller) => {
                                if let Err(e) = result {
                                    warn!(error = %e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Disconnect clients and remove the socket file
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Serve one connection until it disconnects
async fn handle_client<S>(mut stream: S, controller: Arc<Controller>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let Some(body) = read_frame(&mut stream).await? else {
            debug!("client disconnected");
            return Ok(());
        };

        let request: Request = match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => {
                let response = Response::error("bad_request", e.to_string());
                write_frame(&mut stream, &response).await?;
                continue;
            }
        };

        debug!(?request, "received request");

        if request == Request::Subscribe {
            let events = controller.registry().subscribe();
            write_frame(&mut stream, &Response::Subscribed).await?;
            debug!("client subscribed to notifications");
            return forward_events(stream, events).await;
        }

        let response = process_request(request, &controller).await;
        write_frame(&mut stream, &response).await?;
    }
}

/// Push events until the client goes away
async fn forward_events<S>(
    mut stream: S,
    mut events: broadcast::Receiver<DaemonEvent>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => write_frame(&mut stream, &event).await?,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
            // Subscribed connections are push-only; any read ends them
            frame = read_frame(&mut stream) => {
                if let Ok(Some(_)) = frame {
                    debug!("ignoring request on subscribed connection");
                }
                return Ok(());
            }
        }
    }
}

/// Process a request and return a response
async fn process_request(request: Request, controller: &Controller) -> Response {
    match request {
        Request::Ping => Response::Pong,

        Request::GetStatus => Response::Status(status(controller)),

        Request::SetPaused { paused } => {
            controller.registry().set_paused(paused);
            Response::Paused { paused }
        }

        Request::TogglePause => Response::Paused {
            paused: controller.registry().toggle_pause(),
        },

        Request::Play { snippet } => match controller.play(&snippet).await {
            Ok(handle) => Response::Playing {
                session: handle.id(),
                mode: handle.mode(),
                start_index: handle.start_index(),
            },
            Err(e) => Response::error(e.code(), e.to_string()),
        },

        Request::Resume => match controller.resume().await {
            Ok(handle) => Response::Playing {
                session: handle.id(),
                mode: handle.mode(),
                start_index: handle.start_index(),
            },
            Err(e) => Response::error(e.code(), e.to_string()),
        },

        Request::Cancel => match controller.cancel().await {
            Some((session, report)) => Response::Cancelled {
                session: Some(session),
                report: Some(report),
            },
            None => Response::Cancelled {
                session: None,
                report: None,
            },
        },

        Request::ValidateHotkey { hotkey, snippet } => {
            Response::Validation(controller.validate_hotkey(&hotkey, snippet.as_deref()))
        }

        Request::PressHotkey { hotkey } => match controller.press_hotkey(&hotkey) {
            Ok(()) => Response::Pressed { hotkey },
            Err(e) => Response::error(e.code(), e.to_string()),
        },

        // Handled by the connection loop
        Request::Subscribe => Response::Subscribed,
    }
}

fn status(controller: &Controller) -> DaemonStatus {
    let registry = controller.registry();
    let engine = controller.engine();

    let session = engine
        .active()
        .filter(|handle| handle.is_running())
        .map(|handle| ActiveSession {
            id: handle.id(),
            mode: handle.mode(),
            start_index: handle.start_index(),
            progress: handle.progress(),
        });

    DaemonStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        paused: registry.is_paused(),
        state: engine.state(),
        session,
        interrupted: controller.interrupted(),
        hotkeys: registry
            .bindings()
            .into_iter()
            .map(|(id, chord)| HotkeyInfo {
                id,
                chord: chord.to_string(),
            })
            .collect(),
        toggle_hotkey: registry.toggle_chord().map(|c| c.to_string()),
        uptime_secs: controller.uptime_secs(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::{HotkeyRegistry, VirtualHotkeys};
    use crate::snippets::Snippet;
    use crate::typing::{EngineConfig, EngineState, PlaybackEngine, RecordingInjector, TypingMode};
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio::runtime::Handle;

    fn create_controller() -> Arc<Controller> {
        let sig = Snippet::new("sig", "Best regards").with_mode(TypingMode::Fast);
        create_controller_with(vec![sig])
    }

    fn create_controller_with(snippets: Vec<Snippet>) -> Arc<Controller> {
        let (tx, _) = broadcast::channel(64);
        let (backend, _fired) = VirtualHotkeys::new();
        let registry = Arc::new(HotkeyRegistry::new(Box::new(backend), tx.clone()));
        let config = EngineConfig {
            retry_backoff: Duration::ZERO,
            ..EngineConfig::default()
        };
        let engine = Arc::new(PlaybackEngine::new(
            Arc::new(RecordingInjector::new()),
            None,
            config,
            tx,
        ));
        Arc::new(Controller::new(registry, engine, snippets, None, Handle::current()))
    }

    async fn roundtrip(client: &mut DuplexStream, request: &Request) -> serde_json::Value {
        write_frame(client, request).await.unwrap();
        let body = read_frame(client).await.unwrap().unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn connect(controller: Arc<Controller>) -> DuplexStream {
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(handle_client(server, controller));
        client
    }

    #[tokio::test]
    async fn test_ping_and_status() {
        let controller = create_controller();
        let mut client = connect(Arc::clone(&controller));

        let pong = roundtrip(&mut client, &Request::Ping).await;
        assert_eq!(pong["type"], "pong");

        let status = roundtrip(&mut client, &Request::GetStatus).await;
        assert_eq!(status["type"], "status");
        assert_eq!(status["paused"], false);
        assert_eq!(status["state"], "idle");
    }

    #[tokio::test]
    async fn test_pause_requests() {
        let controller = create_controller();
        let mut client = connect(Arc::clone(&controller));

        let resp = roundtrip(&mut client, &Request::SetPaused { paused: true }).await;
        assert_eq!(resp["paused"], true);
        assert!(controller.registry().is_paused());

        let resp = roundtrip(&mut client, &Request::TogglePause).await;
        assert_eq!(resp["paused"], false);

        let resp = roundtrip(
            &mut client,
            &Request::Play {
                snippet: "missing".to_string(),
            },
        )
        .await;
        assert_eq!(resp["type"], "error");
        assert_eq!(resp["code"], "unknown_snippet");
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_and_cancel() {
        let controller = create_controller();
        let mut client = connect(Arc::clone(&controller));

        let resp = roundtrip(
            &mut client,
            &Request::Play {
                snippet: "sig".to_string(),
            },
        )
        .await;
        assert_eq!(resp["type"], "playing");
        assert_eq!(resp["mode"], "fast");
        assert_eq!(resp["start_index"], 0);

        let resp = roundtrip(&mut client, &Request::Cancel).await;
        assert_eq!(resp["type"], "cancelled");
        assert_eq!(controller.engine().state(), EngineState::Idle);

        let resp = roundtrip(&mut client, &Request::Cancel).await;
        assert!(resp["session"].is_null());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_reports_actual_start() {
        let mac = Snippet::new("mac", "ab{ENTER}cdefghij").with_mode(TypingMode::Macro);
        let controller = create_controller_with(vec![mac]);
        let mut client = connect(Arc::clone(&controller));

        let play = Request::Play {
            snippet: "mac".to_string(),
        };
        roundtrip(&mut client, &play).await;
        tokio::time::sleep(Duration::from_millis(45)).await;

        let resp = roundtrip(&mut client, &Request::Cancel).await;
        assert!(resp["report"]["progress"].as_u64().unwrap() > 2);
        tokio::time::sleep(Duration::from_millis(1)).await;

        // Past the Enter the macro can only replay from the top
        let resp = roundtrip(&mut client, &Request::Resume).await;
        assert_eq!(resp["type"], "playing");
        assert_eq!(resp["start_index"], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_press_hotkey_request() {
        let sig = Snippet::new("sig", "Best regards")
            .with_mode(TypingMode::Fast)
            .with_hotkey("Ctrl+Alt+F7");
        let controller = create_controller_with(vec![sig]);
        controller.bind_all();
        let mut client = connect(Arc::clone(&controller));

        let resp = roundtrip(
            &mut client,
            &Request::PressHotkey {
                hotkey: "Ctrl+Alt+F7".to_string(),
            },
        )
        .await;
        assert_eq!(resp["type"], "pressed");

        let resp = roundtrip(
            &mut client,
            &Request::PressHotkey {
                hotkey: "Ctrl+Alt+F9".to_string(),
            },
        )
        .await;
        assert_eq!(resp["code"], "not_bound");
    }

    #[tokio::test]
    async fn test_validate_hotkey_request() {
        let controller = create_controller();
        let mut client = connect(controller);

        let resp = roundtrip(
            &mut client,
            &Request::ValidateHotkey {
                hotkey: "Ctrl+C".to_string(),
                snippet: None,
            },
        )
        .await;
        assert_eq!(resp["type"], "validation");
        assert_eq!(resp["valid"], false);
        assert_eq!(resp["suggestions"][0], "Alt+C");
    }

    #[tokio::test]
    async fn test_bad_request_keeps_connection() {
        let controller = create_controller();
        let mut client = connect(controller);

        write_frame(&mut client, &serde_json::json!({"type": "nope"})).await.unwrap();
        let body = read_frame(&mut client).await.unwrap().unwrap();
        let resp: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp["code"], "bad_request");

        let pong = roundtrip(&mut client, &Request::Ping).await;
        assert_eq!(pong["type"], "pong");
    }

    #[tokio::test]
    async fn test_subscribe_receives_events() {
        let controller = create_controller();
        let mut client = connect(Arc::clone(&controller));

        let resp = roundtrip(&mut client, &Request::Subscribe).await;
        assert_eq!(resp["type"], "subscribed");

        controller.registry().set_paused(true);
        let body = read_frame(&mut client).await.unwrap().unwrap();
        let event: DaemonEvent = serde_json::from_slice(&body).unwrap();
        assert_eq!(event, DaemonEvent::PauseChanged { paused: true });
    }
}
