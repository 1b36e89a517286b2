//! Shared fixtures: a local mock exchange speaking the subscription
//! protocol, and probe handler records that forward batches to channels.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt as _, StreamExt as _};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;

use polymarket_stream_mux::GroupId;
use polymarket_stream_mux::market::{BookEvent, MarketHandlers, PriceUpdate};
use polymarket_stream_mux::user::{OrderEvent, UserHandlers};

/// A local websocket server that records subscription payloads, broadcasts
/// frames to every connected client, answers heartbeats, and can drop all
/// connections on demand.
pub struct MockExchange {
    pub addr: SocketAddr,
    /// First text frame of each accepted connection, i.e. its subscription
    /// payload, in accept order.
    pub subscriptions: mpsc::UnboundedReceiver<String>,
    frames: broadcast::Sender<String>,
    drop_connections: broadcast::Sender<()>,
}

impl MockExchange {
    pub fn endpoint(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Push one frame to every connected client.
    pub fn send_frame(&self, frame: &str) {
        let _ = self.frames.send(frame.to_owned());
    }

    /// Close every currently open connection with a normal close frame.
    pub fn drop_connections(&self) {
        let _ = self.drop_connections.send(());
    }
}

pub async fn spawn_exchange() -> MockExchange {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (subscription_tx, subscriptions) = mpsc::unbounded_channel();
    let (frames, _) = broadcast::channel::<String>(64);
    let (drop_tx, _) = broadcast::channel(4);

    let accept_frames = frames.clone();
    let accept_drop = drop_tx.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let subscription_tx = subscription_tx.clone();
            let mut frames_rx = accept_frames.subscribe();
            let mut drop_rx = accept_drop.subscribe();

            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                let (mut write, mut read) = ws.split();

                // The client sends its subscription payload once on open.
                loop {
                    match read.next().await {
                        Some(Ok(Message::Text(text))) => {
                            let _ = subscription_tx.send(text.to_string());
                            break;
                        }
                        Some(Ok(_)) => {}
                        _ => return,
                    }
                }

                loop {
                    tokio::select! {
                        frame = frames_rx.recv() => {
                            let Ok(frame) = frame else { return };
                            if write.send(Message::Text(frame.into())).await.is_err() {
                                return;
                            }
                        }
                        _ = drop_rx.recv() => {
                            let _ = write.send(Message::Close(None)).await;
                            return;
                        }
                        message = read.next() => match message {
                            Some(Ok(Message::Text(text))) => {
                                if text == "PING"
                                    && write.send(Message::Text("PONG".into())).await.is_err()
                                {
                                    return;
                                }
                            }
                            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                            Some(Ok(_)) => {}
                        }
                    }
                }
            });
        }
    });

    MockExchange {
        addr,
        subscriptions,
        frames,
        drop_connections: drop_tx,
    }
}

pub struct MarketProbe {
    books: mpsc::UnboundedSender<Vec<BookEvent>>,
    updates: mpsc::UnboundedSender<Vec<PriceUpdate>>,
    opens: mpsc::UnboundedSender<(GroupId, Vec<String>)>,
}

pub struct MarketProbeRx {
    pub books: mpsc::UnboundedReceiver<Vec<BookEvent>>,
    pub updates: mpsc::UnboundedReceiver<Vec<PriceUpdate>>,
    pub opens: mpsc::UnboundedReceiver<(GroupId, Vec<String>)>,
}

pub fn market_probe() -> (Arc<MarketProbe>, MarketProbeRx) {
    let (books_tx, books_rx) = mpsc::unbounded_channel();
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    let (opens_tx, opens_rx) = mpsc::unbounded_channel();
    (
        Arc::new(MarketProbe {
            books: books_tx,
            updates: updates_tx,
            opens: opens_tx,
        }),
        MarketProbeRx {
            books: books_rx,
            updates: updates_rx,
            opens: opens_rx,
        },
    )
}

#[async_trait]
impl MarketHandlers for MarketProbe {
    async fn on_book(&self, events: Vec<BookEvent>) {
        let _ = self.books.send(events);
    }

    async fn on_price_update(&self, events: Vec<PriceUpdate>) {
        let _ = self.updates.send(events);
    }

    async fn on_open(&self, group_id: GroupId, asset_ids: Vec<String>) {
        let _ = self.opens.send((group_id, asset_ids));
    }
}

pub struct UserProbe {
    orders: mpsc::UnboundedSender<Vec<OrderEvent>>,
    opens: mpsc::UnboundedSender<(GroupId, Vec<String>)>,
}

pub struct UserProbeRx {
    pub orders: mpsc::UnboundedReceiver<Vec<OrderEvent>>,
    pub opens: mpsc::UnboundedReceiver<(GroupId, Vec<String>)>,
}

pub fn user_probe() -> (Arc<UserProbe>, UserProbeRx) {
    let (orders_tx, orders_rx) = mpsc::unbounded_channel();
    let (opens_tx, opens_rx) = mpsc::unbounded_channel();
    (
        Arc::new(UserProbe {
            orders: orders_tx,
            opens: opens_tx,
        }),
        UserProbeRx {
            orders: orders_rx,
            opens: opens_rx,
        },
    )
}

#[async_trait]
impl UserHandlers for UserProbe {
    async fn on_order(&self, events: Vec<OrderEvent>) {
        let _ = self.orders.send(events);
    }

    async fn on_open(&self, group_id: GroupId, markets: Vec<String>) {
        let _ = self.opens.send((group_id, markets));
    }
}
