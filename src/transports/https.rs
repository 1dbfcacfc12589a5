use anyhow::Result;
use std::{net::SocketAddr, sync::Arc, time::Duration, time::Instant};

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::game::{ClientMessage, GameServer, Position, ServerMessage};

type AppState = Arc<GameServer>;

/* ------------------------------- serve() -------------------------------- */

pub async fn serve(server: AppState) -> Result<()> {
    let config = &server.config().server;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    // Socket tuning (keepalive, reuseaddr)
    let listener = tuned_listener(addr)?;

    info!("HTTP/WS listening on http://{addr}");

    let app = router(server);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/* ------------------------------- router() ------------------------------- */

pub fn router(server: AppState) -> Router {
    let max_inflight: usize = num_cpus::get().max(1) * 1024;

    let middleware = tower::ServiceBuilder::new()
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
            ),
        )
        .layer(tower_http::cors::CorsLayer::permissive())
        // Handle errors from fallible middleware BEFORE applying them
        .layer(axum::error_handling::HandleErrorLayer::new(
            |err: tower::BoxError| async move {
                if err.is::<tower::timeout::error::Elapsed>() {
                    (StatusCode::REQUEST_TIMEOUT, "request timed out")
                } else if err.is::<tower::load_shed::error::Overloaded>() {
                    (StatusCode::SERVICE_UNAVAILABLE, "service overloaded")
                } else {
                    warn!(error = %err, "middleware error");
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
                }
            },
        ))
        .timeout(Duration::from_secs(10))
        .concurrency_limit(max_inflight)
        .load_shed()
        .layer(tower_http::limit::RequestBodyLimitLayer::new(1024 * 1024));

    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/maze", get(maze).post(rebuild_maze))
        .route("/ws", get(ws_upgrade))
        .with_state(server)
        .layer(middleware)
}

/* ------------------------------- Handlers ------------------------------- */

async fn health() -> impl IntoResponse {
    "OK"
}

async fn stats(State(server): State<AppState>) -> impl IntoResponse {
    Json(server.stats())
}

async fn maze(State(server): State<AppState>) -> impl IntoResponse {
    Json(server.maze_layout())
}

#[derive(Deserialize)]
struct RebuildIn {
    seed: u64,
}

async fn rebuild_maze(State(server): State<AppState>, Json(input): Json<RebuildIn>) -> impl IntoResponse {
    match server.rebuild_maze(input.seed) {
        Ok(_) => Json(server.maze_layout()).into_response(),
        Err(e) => {
            warn!(seed = input.seed, error = %e, "Maze rebuild rejected");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

/* ---------------------------- WebSocket path ---------------------------- */

#[derive(Deserialize)]
struct WsQuery {
    player_id: Option<String>,
}

const MAX_PLAYER_ID_LEN: usize = 64;

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(server): State<AppState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let player_id = match query.player_id {
        Some(id) if id.is_empty() || id.len() > MAX_PLAYER_ID_LEN => {
            warn!(len = id.len(), "WebSocket connection rejected: invalid player_id");
            return (StatusCode::BAD_REQUEST, "invalid player_id").into_response();
        }
        Some(id) => id,
        // Anonymous sessions get a fresh id
        None => ulid::Ulid::new().to_string(),
    };

    if server.has_session(&player_id) {
        warn!(player_id = %player_id, "WebSocket connection rejected: player already connected");
        return (StatusCode::CONFLICT, "player already connected").into_response();
    }

    info!(player_id = %player_id, "WebSocket upgrade request received");

    ws.max_message_size(1 << 20)
        .max_frame_size(1 << 20)
        .on_upgrade(move |socket| ws_loop(socket, server, player_id))
}

async fn send(sender: &mut SplitSink<WebSocket, Message>, message: &ServerMessage) -> bool {
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            error!(error = %e, "Failed to serialize server message");
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}

async fn ws_loop(socket: WebSocket, server: AppState, player_id: String) {
    let (mut sender, mut receiver) = socket.split();

    // Two upgrades for one id can race past the check in ws_upgrade
    if !server.open_session(&player_id) {
        let refusal = ServerMessage::Error {
            code: "duplicate_session".to_string(),
            message: format!("player {player_id} is already connected"),
        };
        let _ = send(&mut sender, &refusal).await;
        let _ = sender.close().await;
        return;
    }

    let mut events = server.subscribe();

    // Joining on connect puts the player in range checks right away and
    // tells the client which maze to build.
    let join = ClientMessage::Join {
        position: Position::default(),
    };
    for reply in server.handle_message(&player_id, join, Instant::now()) {
        if !send(&mut sender, &reply).await {
            error!(player_id = %player_id, "Failed to send welcome message");
            server.close_session(&player_id);
            return;
        }
    }

    info!(player_id = %player_id, "WebSocket session active, listening for messages");

    let mut message_count = 0u64;
    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let Some(result) = incoming else { break };
                let msg = match result {
                    Ok(msg) => msg,
                    Err(e) => {
                        error!(
                            player_id = %player_id,
                            error = %e,
                            messages_exchanged = message_count,
                            "WebSocket error, closing connection"
                        );
                        break;
                    }
                };
                message_count += 1;
                match msg {
                    Message::Text(text) => {
                        debug!(
                            player_id = %player_id,
                            message_num = message_count,
                            text_len = text.len(),
                            "Received text message"
                        );
                        let replies = match serde_json::from_str::<ClientMessage>(text.as_str()) {
                            Ok(ClientMessage::Leave) => {
                                info!(player_id = %player_id, "Player left");
                                break;
                            }
                            Ok(message) => server.handle_message(&player_id, message, Instant::now()),
                            Err(e) => vec![ServerMessage::Error {
                                code: "bad_request".to_string(),
                                message: e.to_string(),
                            }],
                        };
                        let mut delivered = true;
                        for reply in &replies {
                            if !send(&mut sender, reply).await {
                                delivered = false;
                                break;
                            }
                        }
                        if !delivered {
                            error!(player_id = %player_id, "Failed to send reply");
                            break;
                        }
                    }
                    Message::Ping(p) => {
                        if sender.send(Message::Pong(p)).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(frame) => {
                        info!(
                            player_id = %player_id,
                            close_code = ?frame.as_ref().map(|f| f.code),
                            messages_exchanged = message_count,
                            "WebSocket connection closed by client"
                        );
                        break;
                    }
                    _ => {
                        debug!(player_id = %player_id, "Ignoring non-text WebSocket message");
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if !send(&mut sender, &ServerMessage::Event { event }).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(player_id = %player_id, skipped = skipped, "Event stream lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    server.close_session(&player_id);
    info!(
        player_id = %player_id,
        total_messages = message_count,
        "WebSocket session ended"
    );
}

/* ----------------------------- Socket tuning ---------------------------- */

fn tuned_listener(addr: SocketAddr) -> Result<TcpListener> {
    use socket2::{Domain, Protocol, Socket, Type};
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.set_keepalive(true)?;
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        use socket2::TcpKeepalive;
        let ka = TcpKeepalive::new()
            .with_time(Duration::from_secs(30))
            .with_interval(Duration::from_secs(10));
        let _ = socket.set_tcp_keepalive(&ka);
    }

    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    let std_listener = std::net::TcpListener::from(socket);
    std_listener.set_nonblocking(true)?;
    Ok(TcpListener::from_std(std_listener)?)
}

/* ----------------------------- Shutdown hook ---------------------------- */

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
