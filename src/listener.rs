use std::net::SocketAddr;

use log::{debug, error};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::packets::client::OutboundPacket;
use crate::packets::parse;
use crate::packets::server::{Handshake, Login};
use crate::packets::PROTOCOL_VERSION;

const ACCEPT_BACKLOG: usize = 16;

/// A socket whose owner already passed the handshake exchange, waiting for
/// the world loop to turn it into a player.
pub struct AcceptedConnection {
    pub username: String,
    pub(crate) stream: TcpStream,
}

pub(crate) struct Listener {
    accepted: mpsc::Receiver<AcceptedConnection>,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Listener {
    pub(crate) async fn bind(
        address: &str,
        shutdown: watch::Receiver<bool>,
    ) -> std::io::Result<Listener> {
        let listener = TcpListener::bind(address).await?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);

        let task = tokio::spawn(accept_loop(listener, tx, shutdown));

        Ok(Listener {
            accepted: rx,
            local_addr,
            task,
        })
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Non-blocking; None when no connection is waiting.
    pub(crate) fn dequeue(&mut self) -> Option<AcceptedConnection> {
        self.accepted.try_recv().ok()
    }

    pub(crate) async fn join(self) {
        let _ = self.task.await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    accepted: mpsc::Sender<AcceptedConnection>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, addr)) => {
                    debug!("new connection from {}", addr);
                    let accepted = accepted.clone();
                    tokio::spawn(async move {
                        match login(stream).await {
                            Ok(conn) => {
                                let _ = accepted.send(conn).await;
                            }
                            Err(e) => debug!("login from {} failed: {}", addr, e),
                        }
                    });
                }
                Err(e) => error!("failed to accept connection: {}", e),
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// The two-packet handshake. A failure at any point drops the socket with
/// nothing further written.
async fn login(mut stream: TcpStream) -> Result<AcceptedConnection, String> {
    let handshake: Handshake = parse::expect_packet(&mut stream).await?;

    // Legacy auth is no longer supported, so servers always respond with
    // the offline-mode handshake, which is "-" for the username.
    OutboundPacket::Handshake(Handshake {
        username: "-".into(),
    })
    .write(&mut stream)
    .await?;

    let login: Login = parse::expect_packet(&mut stream).await?;

    if login.protocol_version != PROTOCOL_VERSION {
        return Err(format!(
            "invalid protocol version {}",
            login.protocol_version
        ));
    }

    if handshake.username != login.username {
        return Err("username mismatch".into());
    }

    Ok(AcceptedConnection {
        username: handshake.username.into_string(),
        stream,
    })
}
