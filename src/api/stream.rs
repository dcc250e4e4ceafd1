//! Live merged price view over a websocket.
//!
//! Each connection gets a snapshot, then the re-merged view after every
//! change event in the order the store published them. A connection that
//! falls behind the broadcast buffer is sent a fresh snapshot.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::{
    controller::AppState,
    domain::{Coverage, MergedStation, PriceBoard, PriceChange},
};

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum StreamMessage {
    Snapshot { stations: Vec<MergedStation> },
    Change { change: PriceChange, stations: Vec<MergedStation> },
}

/// What the connection does with one broadcast event
#[derive(Debug)]
enum Next {
    Send(StreamMessage),
    Resync,
    Close,
}

/// Per-connection board and the messages it produces
struct LiveView {
    board: PriceBoard,
    coverage: Coverage,
}

impl LiveView {
    fn new(board: PriceBoard, coverage: Coverage) -> Self {
        Self { board, coverage }
    }

    fn snapshot(&self) -> StreamMessage {
        StreamMessage::Snapshot {
            stations: self.board.merged(self.coverage),
        }
    }

    /// Swap in a freshly loaded board after a lag
    fn reset(&mut self, board: PriceBoard) -> StreamMessage {
        self.board = board;
        self.snapshot()
    }

    fn on_event(&mut self, event: Result<PriceChange, RecvError>) -> Next {
        match event {
            Ok(change) => {
                self.board.apply(&change);
                Next::Send(StreamMessage::Change {
                    stations: self.board.merged(self.coverage),
                    change,
                })
            }
            Err(RecvError::Lagged(missed)) => {
                debug!(missed, "price stream lagged, resyncing");
                Next::Resync
            }
            Err(RecvError::Closed) => Next::Close,
        }
    }
}

pub async fn price_stream(State(st): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, st))
}

async fn load_board(st: &AppState) -> Option<PriceBoard> {
    match st.prices.tables().await {
        Ok((petrol, diesel, kerosene)) => Some(PriceBoard::new(petrol, diesel, kerosene)),
        Err(e) => {
            warn!(error = %e, "price stream snapshot failed");
            None
        }
    }
}

async fn send(socket: &mut WebSocket, msg: &StreamMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(text) => socket.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "price stream encode failed");
            false
        }
    }
}

async fn serve_socket(mut socket: WebSocket, st: AppState) {
    // subscribe first so nothing published during the snapshot load is lost
    let mut rx = st.store.subscribe();
    let Some(board) = load_board(&st).await else {
        let _ = socket.send(Message::Close(None)).await;
        return;
    };
    let mut view = LiveView::new(board, st.cfg.merge.coverage);
    if !send(&mut socket, &view.snapshot()).await {
        return;
    }

    loop {
        let msg = tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!(error = %e, "price stream client error");
                    break;
                }
            },
            event = rx.recv() => match view.on_event(event) {
                Next::Send(msg) => msg,
                Next::Resync => match load_board(&st).await {
                    Some(fresh) => view.reset(fresh),
                    None => break,
                },
                Next::Close => break,
            },
        };
        if !send(&mut socket, &msg).await {
            break;
        }
    }
    debug!("price stream closed");
}
