use std::collections::HashSet;
use std::time::Duration;

use log::{debug, warn};
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::chunk::{Chunk, ChunkObserver};
use crate::entity::{Entity, EntityBase};
use crate::level::data::ChunkPos;
use crate::listener::AcceptedConnection;
use crate::packets::client::{BlockChange, ChunkData, OutboundPacket, PreChunk, SetSlot};
use crate::packets::server::{Chat, HeldItem, InboundPacket, KeepAlive, Login, Position, DIG_FINISHED};
use crate::packets::parse;
use crate::server::{Dimension, PendingEvent, Server};

const PACKET_BACKLOG: usize = 32;
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(20);

pub const INVENTORY_SLOTS: usize = 45;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemStack {
    pub id: i16,
    pub count: u8,
    pub damage: i16,
}

impl ItemStack {
    pub fn is_empty(&self) -> bool {
        self.id < 0
    }
}

impl Default for ItemStack {
    fn default() -> Self {
        Self {
            id: -1,
            count: 0,
            damage: 0,
        }
    }
}

pub struct Player {
    base: EntityBase,
    username: String,

    // sent to the client at login, no server-side use
    biome_seed: i64,
    dimension: Dimension,

    inbound: mpsc::Receiver<InboundPacket>,
    /// None once disconnected; dropping the sender lets the write task drain
    /// and close the socket.
    outbound: Option<mpsc::Sender<OutboundPacket>>,
    read_task: AbortHandle,
    last_keep_alive: Instant,

    items: [ItemStack; INVENTORY_SLOTS],
    view_dist: i32,
    viewable_chunks: HashSet<ChunkPos>,
}

impl Player {
    pub(crate) fn new(
        base: EntityBase,
        conn: AcceptedConnection,
        view_distance: u8,
        biome_seed: i64,
        dimension: Dimension,
    ) -> Player {
        assert!(view_distance > 0, "view distance must be positive");

        let (read_half, write_half) = conn.stream.into_split();
        let (inbound_tx, inbound) = mpsc::channel(PACKET_BACKLOG);
        let (outbound_tx, outbound_rx) = mpsc::channel(PACKET_BACKLOG);

        let read_task = tokio::spawn(read_loop(BufReader::new(read_half), inbound_tx));
        let read_abort = read_task.abort_handle();
        tokio::spawn(write_loop(write_half, outbound_rx, read_task.abort_handle()));

        Player {
            base,
            username: conn.username,
            biome_seed,
            dimension,
            inbound,
            outbound: Some(outbound_tx),
            read_task: read_abort,
            last_keep_alive: Instant::now(),
            items: [ItemStack::default(); INVENTORY_SLOTS],
            view_dist: view_distance as i32,
            viewable_chunks: HashSet::new(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn message(&mut self, message: &str) {
        self.queue_packet(OutboundPacket::Chat(Chat {
            message: message.into(),
        }));
    }

    pub fn item_in_slot(&self, slot: u8) -> ItemStack {
        self.items[slot as usize]
    }

    pub fn set_item(&mut self, slot: u8, item: ItemStack) {
        self.items[slot as usize] = item;
        self.queue_packet(OutboundPacket::SetSlot(SetSlot {
            window_id: 0,
            slot: slot as i16,
            item: (!item.is_empty()).then_some(HeldItem {
                id: item.id,
                count: item.count,
                damage: item.damage,
            }),
        }));
    }

    /// Moves the player, loading and unloading chunks at the edges of the
    /// view rectangle as needed.
    pub fn teleport(&mut self, server: &mut Server, x: f64, y: f64, z: f64) {
        self.queue_packet(OutboundPacket::Position(Position {
            x,
            y,
            stance: 0.0,
            z,
            on_ground: false,
        }));

        let old = self.center_chunk();
        self.base.set_pos(x, y, z);
        let new = self.center_chunk();

        let (unload, load) = view_diff(old, new, self.view_dist);
        if !unload.is_empty() || !load.is_empty() {
            server.update_chunk_view_range(self.base.id(), &unload, &load);
        }
    }

    /// Safe to call even after the connection already went away.
    pub fn disconnect(&mut self) {
        if self.outbound.take().is_some() {
            debug!("disconnecting {}", self.username);
            self.read_task.abort();
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.outbound.is_none()
    }

    pub(crate) fn queue_packet(&mut self, packet: OutboundPacket) {
        let stalled = match &self.outbound {
            Some(queue) => match queue.try_send(packet) {
                Ok(()) => false,
                Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Closed(_)) => true,
            },
            None => return,
        };
        if stalled {
            warn!("outbound queue for {} stalled, disconnecting", self.username);
            self.disconnect();
        }
    }

    fn center_chunk(&self) -> ChunkPos {
        let (x, _, z) = self.base.pos();
        ChunkPos::new(
            (x / 16.0).floor() as i32,
            (z / 16.0).floor() as i32,
        )
    }

    fn handle_packet(&mut self, packet: InboundPacket, server: &mut Server) {
        let id = self.base.id();
        match packet {
            InboundPacket::Chat(chat) => {
                let message = chat.message.into_string();
                if let Some(command) = message.strip_prefix('/') {
                    server.push_event(PendingEvent::Command {
                        player_id: id,
                        command: command.to_owned(),
                    });
                } else {
                    server.push_event(PendingEvent::Chat {
                        player_id: id,
                        message,
                    });
                }
            }

            InboundPacket::Dig(dig) => {
                server.push_event(PendingEvent::Dig {
                    player_id: id,
                    x: dig.x,
                    y: dig.y as i32,
                    z: dig.z,
                    finished: dig.status == DIG_FINISHED,
                });
            }

            InboundPacket::PlaceBlock(place) => {
                if place.item.is_some() {
                    server.push_event(PendingEvent::Interact {
                        player_id: id,
                        clicked: (place.x, place.y as i32, place.z),
                        target: place.target(),
                    });
                }
            }

            InboundPacket::Position(pos) => {
                self.base.set_pos(pos.x, pos.y, pos.z);
            }
            InboundPacket::PositionAndLook(pos) => {
                self.base.set_pos(pos.x, pos.y, pos.z);
            }

            // No server-side state for these yet
            InboundPacket::KeepAlive(_)
            | InboundPacket::Login(_)
            | InboundPacket::Handshake(_)
            | InboundPacket::Grounded(_)
            | InboundPacket::Look(_)
            | InboundPacket::Animation(_)
            | InboundPacket::EntityAction(_)
            | InboundPacket::CloseWindow(_)
            | InboundPacket::WindowClick(_) => {}
        }
    }
}

impl Entity for Player {
    fn id(&self) -> i32 {
        self.base.id()
    }

    fn pos(&self) -> (f64, f64, f64) {
        self.base.pos()
    }

    fn on_spawned(&mut self, server: &mut Server) {
        self.queue_packet(OutboundPacket::Login(Login {
            protocol_version: self.base.id(),
            username: "".into(),
            map_seed: self.biome_seed,
            dimension: self.dimension.id() as u8,
        }));

        let (x, y, z) = self.base.pos();
        self.queue_packet(OutboundPacket::Position(Position {
            x,
            y,
            stance: 0.0,
            z,
            on_ground: false,
        }));

        let center = self.center_chunk();
        let mut load = Vec::with_capacity(((self.view_dist * 2 + 1).pow(2)) as usize);
        for cx in center.x - self.view_dist..=center.x + self.view_dist {
            for cz in center.z - self.view_dist..=center.z + self.view_dist {
                load.push(ChunkPos::new(cx, cz));
            }
        }
        server.update_chunk_view_range(self.base.id(), &[], &load);
    }

    fn tick(&mut self, server: &mut Server) {
        let now = Instant::now();
        if now.duration_since(self.last_keep_alive) > KEEP_ALIVE_INTERVAL {
            self.queue_packet(OutboundPacket::KeepAlive(KeepAlive {}));
            self.last_keep_alive = now;
        }

        loop {
            match self.inbound.try_recv() {
                Ok(packet) => self.handle_packet(packet, server),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.disconnect();
                    break;
                }
            }
        }
    }

    fn as_observer(&mut self) -> Option<&mut dyn ChunkObserver> {
        Some(self)
    }

    fn as_player(&mut self) -> Option<&mut Player> {
        Some(self)
    }

    fn is_defunct(&self) -> bool {
        self.is_disconnected()
    }
}

impl ChunkObserver for Player {
    fn initialize_chunk(&mut self, pos: ChunkPos) {
        self.viewable_chunks.insert(pos);
        self.queue_packet(OutboundPacket::PreChunk(PreChunk {
            chunk_x: pos.x,
            chunk_z: pos.z,
            load: true,
        }));
    }

    fn send_chunk(&mut self, pos: ChunkPos, chunk: &Chunk) {
        self.queue_packet(OutboundPacket::ChunkData(ChunkData {
            start_x: pos.x * 16,
            start_y: 0,
            start_z: pos.z * 16,
            x_size: 15,
            y_size: 127,
            z_size: 15,
            data: chunk.serialize_to_network(),
        }));
    }

    fn unload_chunk(&mut self, pos: ChunkPos) {
        self.viewable_chunks.remove(&pos);
        self.queue_packet(OutboundPacket::PreChunk(PreChunk {
            chunk_x: pos.x,
            chunk_z: pos.z,
            load: false,
        }));
    }

    fn send_block_change(&mut self, x: i32, y: i32, z: i32, block: crate::blocks::Block) {
        self.queue_packet(OutboundPacket::BlockChange(BlockChange {
            x,
            y: y as u8,
            z,
            block_type: block.ty().id(),
            block_data: block.data(),
        }));
    }
}

async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    queue: mpsc::Sender<InboundPacket>,
) {
    loop {
        match parse::read_next_packet(&mut reader).await {
            Ok(packet) => {
                if queue.send(packet).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("read loop ended: {}", e);
                break;
            }
        }
    }
}

async fn write_loop(
    write_half: OwnedWriteHalf,
    mut queue: mpsc::Receiver<OutboundPacket>,
    read_task: AbortHandle,
) {
    let mut writer = BufWriter::new(write_half);
    while let Some(packet) = queue.recv().await {
        let result = match packet.write(&mut writer).await {
            Ok(()) => writer.flush().await.map_err(|e| format!("{}", e)),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            debug!("write loop ended: {}", e);
            read_task.abort();
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// The chunks leaving and entering view when the view rectangle recenters
/// from `old` to `new`. Returns `(unload, load)`.
pub(crate) fn view_diff(old: ChunkPos, new: ChunkPos, dist: i32) -> (Vec<ChunkPos>, Vec<ChunkPos>) {
    let mut unload = vec![];
    for cx in old.x - dist..=old.x + dist {
        for cz in old.z - dist..=old.z + dist {
            let still_visible = (cx - new.x).abs() <= dist && (cz - new.z).abs() <= dist;
            if !still_visible {
                unload.push(ChunkPos::new(cx, cz));
            }
        }
    }

    let mut load = vec![];
    for cx in new.x - dist..=new.x + dist {
        for cz in new.z - dist..=new.z + dist {
            let was_visible = (cx - old.x).abs() <= dist && (cz - old.z).abs() <= dist;
            if !was_visible {
                load.push(ChunkPos::new(cx, cz));
            }
        }
    }

    (unload, load)
}
