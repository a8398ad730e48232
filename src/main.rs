use std::env;
use std::sync::Arc;

use dotenv::dotenv;
use log::info;

use rustbeta::blocks::{Block, BlockType};
use rustbeta::level::{McRegionLoader, WorldLoader};
use rustbeta::{Config, Dimension, EventHandler, Server};

/// Default game behavior: echo chat, acknowledge commands, let players dig.
struct Vanilla;

impl EventHandler for Vanilla {
    fn on_player_join(&mut self, server: &mut Server, player_id: i32) {
        if let Some(player) = server.player_mut(player_id) {
            let joined = format!("{} joined the game", player.username());
            server.broadcast(&joined);
        }
    }

    fn on_chat(&mut self, server: &mut Server, player_id: i32, message: &str) {
        if let Some(player) = server.player_mut(player_id) {
            let line = format!("<{}> {}", player.username(), message);
            server.broadcast(&line);
        }
    }

    fn on_command(&mut self, server: &mut Server, player_id: i32, command: &str) {
        if let Some(player) = server.player_mut(player_id) {
            player.message(&format!("unknown command: /{}", command));
        }
    }

    fn on_dig(&mut self, server: &mut Server, _player_id: i32, x: i32, y: i32, z: i32, finished: bool) {
        if finished {
            server.set_block(x, y, z, Block::from(BlockType::Air));
        }
    }
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();

    let address = env::var("RUSTBETA_ADDR").unwrap_or_else(|_| "127.0.0.1:25565".into());
    let world_loader = env::var("RUSTBETA_WORLD")
        .ok()
        .map(|dir| Arc::new(McRegionLoader::new(dir)) as Arc<dyn WorldLoader>);

    info!("Starting up server on {}...", address);
    let mut server = Server::bind(Config {
        address,
        view_distance: 8,
        dimension: Dimension::Overworld,
        world_loader,
    })
    .await
    .expect("failed to start server");
    server.set_event_handler(Box::new(Vanilla));

    let handle = server.handle();
    let world = tokio::spawn(server.run());

    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    info!("shutting down");
    handle.shutdown().await;
    let _ = world.await;
}
