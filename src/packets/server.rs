//! Packets received from the client.

use async_trait::async_trait;
use rustbeta_derive::{ReadProt, WriteProt};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::packets::PacketId;
use crate::protocol_types::primitives::McString;
use crate::protocol_types::traits::{ReadProt, WriteProt};

#[derive(Debug, PartialEq, ReadProt, WriteProt)]
pub struct KeepAlive {}

impl PacketId for KeepAlive {
    const ID: u8 = 0x00;
}

#[derive(Debug, PartialEq, ReadProt, WriteProt)]
pub struct Login {
    pub protocol_version: i32,
    pub username: McString<16>,
    pub map_seed: i64,
    pub dimension: u8,
}

impl PacketId for Login {
    const ID: u8 = 0x01;
}

#[derive(Debug, PartialEq, ReadProt, WriteProt)]
pub struct Handshake {
    pub username: McString<16>,
}

impl PacketId for Handshake {
    const ID: u8 = 0x02;
}

#[derive(Debug, PartialEq, ReadProt, WriteProt)]
pub struct Chat {
    pub message: McString<119>,
}

impl PacketId for Chat {
    const ID: u8 = 0x03;
}

#[derive(Debug, PartialEq, ReadProt, WriteProt)]
pub struct Grounded {
    pub on_ground: bool,
}

impl PacketId for Grounded {
    const ID: u8 = 0x0a;
}

#[derive(Debug, PartialEq, ReadProt, WriteProt)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub stance: f64,
    pub z: f64,
    pub on_ground: bool,
}

impl PacketId for Position {
    const ID: u8 = 0x0b;
}

#[derive(Debug, PartialEq, ReadProt, WriteProt)]
pub struct Look {
    pub yaw: f32,
    pub pitch: f32,
    pub on_ground: bool,
}

impl PacketId for Look {
    const ID: u8 = 0x0c;
}

#[derive(Debug, PartialEq, ReadProt, WriteProt)]
pub struct PositionAndLook {
    pub x: f64,
    pub y: f64,
    pub stance: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
    pub on_ground: bool,
}

impl PacketId for PositionAndLook {
    const ID: u8 = 0x0d;
}

#[derive(Debug, PartialEq, ReadProt, WriteProt)]
pub struct Dig {
    pub status: u8,
    pub x: i32,
    pub y: u8,
    pub z: i32,
    pub face: u8,
}

impl PacketId for Dig {
    const ID: u8 = 0x0e;
}

/// The digging status that means the block finished breaking.
pub const DIG_FINISHED: u8 = 2;

/// Item data appended to slot-carrying packets whenever the item id is
/// non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeldItem {
    pub id: i16,
    pub count: u8,
    pub damage: i16,
}

#[async_trait]
impl ReadProt for Option<HeldItem> {
    async fn read(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self, String>
    where
        Self: Sized,
    {
        let id = i16::read(stream).await?;
        if id < 0 {
            return Ok(None);
        }
        Ok(Some(HeldItem {
            id,
            count: u8::read(stream).await?,
            damage: i16::read(stream).await?,
        }))
    }
}

#[async_trait]
impl WriteProt for Option<HeldItem> {
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        match self {
            None => (-1i16).write(stream).await,
            Some(item) => {
                item.id.write(stream).await?;
                item.count.write(stream).await?;
                item.damage.write(stream).await
            }
        }
    }
}

#[derive(Debug, PartialEq, ReadProt, WriteProt)]
pub struct PlaceBlock {
    pub x: i32,
    pub y: u8,
    pub z: i32,
    pub direction: u8,
    pub item: Option<HeldItem>,
}

impl PacketId for PlaceBlock {
    const ID: u8 = 0x0f;
}

impl PlaceBlock {
    /// The position the placement targets: the clicked block offset along the
    /// face's outward axis. Direction 255 is a click on air and targets the
    /// clicked block itself.
    pub fn target(&self) -> (i32, i32, i32) {
        let (x, y, z) = (self.x, self.y as i32, self.z);
        match self.direction {
            0 => (x, y - 1, z),
            1 => (x, y + 1, z),
            2 => (x, y, z - 1),
            3 => (x, y, z + 1),
            4 => (x - 1, y, z),
            5 => (x + 1, y, z),
            _ => (x, y, z),
        }
    }
}

#[derive(Debug, PartialEq, ReadProt, WriteProt)]
pub struct Animation {
    pub entity_id: i32,
    pub animation: u8,
}

impl PacketId for Animation {
    const ID: u8 = 0x12;
}

#[derive(Debug, PartialEq, ReadProt, WriteProt)]
pub struct EntityAction {
    pub entity_id: i32,
    pub action: u8,
}

impl PacketId for EntityAction {
    const ID: u8 = 0x13;
}

pub const ACTION_START_SNEAK: u8 = 1;
pub const ACTION_STOP_SNEAK: u8 = 2;
pub const ACTION_WAKE_UP: u8 = 3;

#[derive(Debug, PartialEq, ReadProt, WriteProt)]
pub struct CloseWindow {
    pub window_id: u8,
}

impl PacketId for CloseWindow {
    const ID: u8 = 0x65;
}

#[derive(Debug, PartialEq, ReadProt, WriteProt)]
pub struct WindowClick {
    pub window_id: u8,
    pub slot: i16,
    pub button: u8,
    pub action_number: i16,
    pub shift: bool,
    pub item: Option<HeldItem>,
}

impl PacketId for WindowClick {
    const ID: u8 = 0x66;
}

#[derive(Debug, PartialEq)]
pub enum InboundPacket {
    KeepAlive(KeepAlive),
    Login(Login),
    Handshake(Handshake),
    Chat(Chat),
    Grounded(Grounded),
    Position(Position),
    Look(Look),
    PositionAndLook(PositionAndLook),
    Dig(Dig),
    PlaceBlock(PlaceBlock),
    Animation(Animation),
    EntityAction(EntityAction),
    CloseWindow(CloseWindow),
    WindowClick(WindowClick),
}
