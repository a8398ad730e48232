//! Packets sent to the client.

use async_trait::async_trait;
use rustbeta_derive::{ReadProt, WriteProt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::packets::server::{Chat, Handshake, HeldItem, KeepAlive, Login, Position};
use crate::packets::PacketId;
use crate::protocol_types::traits::{ReadProt, WriteProt};

#[derive(Debug, PartialEq, ReadProt, WriteProt)]
pub struct PreChunk {
    pub chunk_x: i32,
    pub chunk_z: i32,
    /// true to start tracking the chunk, false to forget it
    pub load: bool,
}

impl PacketId for PreChunk {
    const ID: u8 = 0x32;
}

/// A full-chunk snapshot. `data` is the zlib-compressed block/light payload;
/// the size fields are one less than the spans they describe.
#[derive(Debug, PartialEq)]
pub struct ChunkData {
    pub start_x: i32,
    pub start_y: i16,
    pub start_z: i32,
    pub x_size: u8,
    pub y_size: u8,
    pub z_size: u8,
    pub data: Vec<u8>,
}

impl PacketId for ChunkData {
    const ID: u8 = 0x33;
}

#[async_trait]
impl ReadProt for ChunkData {
    async fn read(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self, String>
    where
        Self: Sized,
    {
        let start_x = i32::read(stream).await?;
        let start_y = i16::read(stream).await?;
        let start_z = i32::read(stream).await?;
        let x_size = u8::read(stream).await?;
        let y_size = u8::read(stream).await?;
        let z_size = u8::read(stream).await?;

        let len = i32::read(stream).await?;
        if len < 0 {
            return Err(format!("negative chunk payload length: {}", len));
        }
        let mut data = vec![0u8; len as usize];
        stream
            .read_exact(&mut data)
            .await
            .or_else(|x| Err(format!("IO error: {:?}", x)))?;

        Ok(Self {
            start_x,
            start_y,
            start_z,
            x_size,
            y_size,
            z_size,
            data,
        })
    }
}

#[async_trait]
impl WriteProt for ChunkData {
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        self.start_x.write(stream).await?;
        self.start_y.write(stream).await?;
        self.start_z.write(stream).await?;
        self.x_size.write(stream).await?;
        self.y_size.write(stream).await?;
        self.z_size.write(stream).await?;
        (self.data.len() as i32).write(stream).await?;
        stream
            .write_all(&self.data)
            .await
            .or_else(|x| Err(format!("IO error: {:?}", x)))
    }
}

#[derive(Debug, PartialEq, ReadProt, WriteProt)]
pub struct BlockChange {
    pub x: i32,
    pub y: u8,
    pub z: i32,
    pub block_type: u8,
    pub block_data: u8,
}

impl PacketId for BlockChange {
    const ID: u8 = 0x35;
}

#[derive(Debug, PartialEq, ReadProt, WriteProt)]
pub struct SetSlot {
    pub window_id: u8,
    pub slot: i16,
    pub item: Option<HeldItem>,
}

impl PacketId for SetSlot {
    const ID: u8 = 0x67;
}

#[derive(Debug, PartialEq)]
pub enum OutboundPacket {
    KeepAlive(KeepAlive),
    Login(Login),
    Handshake(Handshake),
    Chat(Chat),
    Position(Position),
    PreChunk(PreChunk),
    ChunkData(ChunkData),
    BlockChange(BlockChange),
    SetSlot(SetSlot),
}

impl OutboundPacket {
    pub async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        match self {
            OutboundPacket::KeepAlive(p) => write_packet(KeepAlive::ID, p, stream).await,
            OutboundPacket::Login(p) => write_packet(Login::ID, p, stream).await,
            OutboundPacket::Handshake(p) => write_packet(Handshake::ID, p, stream).await,
            OutboundPacket::Chat(p) => write_packet(Chat::ID, p, stream).await,
            OutboundPacket::Position(p) => write_packet(Position::ID, p, stream).await,
            OutboundPacket::PreChunk(p) => write_packet(PreChunk::ID, p, stream).await,
            OutboundPacket::ChunkData(p) => write_packet(ChunkData::ID, p, stream).await,
            OutboundPacket::BlockChange(p) => write_packet(BlockChange::ID, p, stream).await,
            OutboundPacket::SetSlot(p) => write_packet(SetSlot::ID, p, stream).await,
        }
    }
}

async fn write_packet(
    id: u8,
    body: &impl WriteProt,
    stream: &mut (impl AsyncWrite + Unpin + Send),
) -> Result<(), String> {
    id.write(stream).await?;
    body.write(stream).await
}
