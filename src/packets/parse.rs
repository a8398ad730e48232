use tokio::io::AsyncRead;

use crate::packets::server::{
    Animation, Chat, CloseWindow, Dig, EntityAction, Grounded, Handshake, InboundPacket,
    KeepAlive, Login, Look, PlaceBlock, Position, PositionAndLook, WindowClick,
};
use crate::packets::PacketId;
use crate::protocol_types::traits::ReadProt;

/// Reads the next client packet, dispatching on the id byte. An id the
/// server doesn't accept is a protocol error and ends the connection.
pub async fn read_next_packet(
    stream: &mut (impl AsyncRead + Unpin + Send),
) -> Result<InboundPacket, String> {
    let id = u8::read(stream).await?;
    Ok(match id {
        KeepAlive::ID => InboundPacket::KeepAlive(KeepAlive::read(stream).await?),
        Login::ID => InboundPacket::Login(Login::read(stream).await?),
        Handshake::ID => InboundPacket::Handshake(Handshake::read(stream).await?),
        Chat::ID => InboundPacket::Chat(Chat::read(stream).await?),
        Grounded::ID => InboundPacket::Grounded(Grounded::read(stream).await?),
        Position::ID => InboundPacket::Position(Position::read(stream).await?),
        Look::ID => InboundPacket::Look(Look::read(stream).await?),
        PositionAndLook::ID => {
            InboundPacket::PositionAndLook(PositionAndLook::read(stream).await?)
        }
        Dig::ID => InboundPacket::Dig(Dig::read(stream).await?),
        PlaceBlock::ID => InboundPacket::PlaceBlock(PlaceBlock::read(stream).await?),
        Animation::ID => InboundPacket::Animation(Animation::read(stream).await?),
        EntityAction::ID => InboundPacket::EntityAction(EntityAction::read(stream).await?),
        CloseWindow::ID => InboundPacket::CloseWindow(CloseWindow::read(stream).await?),
        WindowClick::ID => InboundPacket::WindowClick(WindowClick::read(stream).await?),
        other => return Err(format!("unrecognized packet with id 0x{:02x}", other)),
    })
}

/// Reads one specific packet, as the handshake exchange requires.
pub async fn expect_packet<P: ReadProt + PacketId>(
    stream: &mut (impl AsyncRead + Unpin + Send),
) -> Result<P, String> {
    let id = u8::read(stream).await?;
    if id != P::ID {
        return Err(format!(
            "expected packet 0x{:02x}, got 0x{:02x}",
            P::ID,
            id
        ));
    }
    P::read(stream).await
}
