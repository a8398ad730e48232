//! The world: a single-owner execution context ticked at 20 Hz. Entities,
//! chunks, and schedules are only ever touched from here; I/O tasks reach in
//! through channels that the tick loop drains without blocking.

use std::collections::{BTreeMap, HashMap};
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::blocks::Block;
use crate::chunk::{chunk_coords_to_index, Chunk, ChunkObserver};
use crate::entity::{Entity, EntityBase};
use crate::level::data::{ChunkData, ChunkPos, ChunkReadResult, WorldInfo, WorldLoader};
use crate::listener::{AcceptedConnection, Listener};
use crate::player::Player;

const TICKS_PER_SECOND: u32 = 20;
const MESSAGE_QUEUE_BACKLOG: usize = 16;

/// A closure run on the world thread, the only way external tasks mutate
/// world state.
pub type WorldMessage = Box<dyn FnOnce(&mut Server) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dimension {
    Nether,
    #[default]
    Overworld,
    Sky,
}

impl Dimension {
    /// The tag sent to the client at login.
    pub fn id(self) -> i8 {
        match self {
            Dimension::Nether => -1,
            Dimension::Overworld => 0,
            Dimension::Sky => 1,
        }
    }
}

pub struct Config {
    pub address: String,
    pub view_distance: u8,
    /// Only used by the client.
    pub dimension: Dimension,
    /// When absent, every chunk is synthesized as air.
    pub world_loader: Option<Arc<dyn WorldLoader>>,
}

/// Game-level callbacks, dispatched on the world thread with the full world
/// available for mutation.
pub trait EventHandler: Send {
    fn on_player_join(&mut self, _server: &mut Server, _player_id: i32) {}
    fn on_chat(&mut self, _server: &mut Server, _player_id: i32, _message: &str) {}
    fn on_command(&mut self, _server: &mut Server, _player_id: i32, _command: &str) {}
    fn on_dig(
        &mut self,
        _server: &mut Server,
        _player_id: i32,
        _x: i32,
        _y: i32,
        _z: i32,
        _finished: bool,
    ) {
    }
    fn on_interact(
        &mut self,
        _server: &mut Server,
        _player_id: i32,
        _clicked: (i32, i32, i32),
        _target: (i32, i32, i32),
    ) {
    }
}

/// Events gathered while an entity ticks and dispatched once the entity map
/// is whole again.
pub(crate) enum PendingEvent {
    PlayerJoin {
        player_id: i32,
    },
    Chat {
        player_id: i32,
        message: String,
    },
    Command {
        player_id: i32,
        command: String,
    },
    Dig {
        player_id: i32,
        x: i32,
        y: i32,
        z: i32,
        finished: bool,
    },
    Interact {
        player_id: i32,
        clicked: (i32, i32, i32),
        target: (i32, i32, i32),
    },
}

/// An observer notification addressed by entity id. Deliveries aimed at the
/// entity currently detached for ticking are held until it is reinserted.
enum ObserverEvent {
    Initialize(ChunkPos),
    SendChunk(ChunkPos),
    Unload(ChunkPos),
    BlockChange { x: i32, y: i32, z: i32, block: Block },
}

struct Schedule {
    run: Box<dyn FnMut(&mut Server) -> i32 + Send>,
    next_run: u64,
}

pub struct Server {
    view_distance: u8,
    dimension: Dimension,
    info: WorldInfo,
    loader: Option<Arc<dyn WorldLoader>>,

    listener: Listener,
    messages: mpsc::Receiver<WorldMessage>,
    message_tx: mpsc::Sender<WorldMessage>,
    chunk_results: mpsc::Receiver<ChunkReadResult>,
    chunk_result_tx: mpsc::Sender<ChunkReadResult>,
    shutdown_rx: watch::Receiver<bool>,
    shutdown_tx: Arc<watch::Sender<bool>>,

    entities: BTreeMap<i32, Box<dyn Entity>>,
    next_entity_id: i32,

    /// All the chunks on the server. A present chunk with no data is one
    /// whose load is still in flight; the map never holds "nothing".
    chunks: HashMap<ChunkPos, Chunk>,

    current_tick: u64,
    schedules: Vec<Schedule>,

    event_handler: Option<Box<dyn EventHandler>>,
    pending_events: Vec<PendingEvent>,

    ticking: Option<i32>,
    deferred_events: Vec<(i32, ObserverEvent)>,
}

impl Server {
    pub async fn bind(config: Config) -> std::io::Result<Server> {
        assert!(config.view_distance > 0, "view distance must be positive");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let listener = Listener::bind(&config.address, shutdown_rx.clone()).await?;

        let info = match &config.world_loader {
            Some(loader) => loader
                .read_world_info()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?,
            None => WorldInfo {
                biome_seed: 0,
                spawn_x: 0,
                spawn_y: 64,
                spawn_z: 0,
            },
        };

        // Sized so one player logging in can't stall the loader.
        let view_diameter = config.view_distance as usize * 2 + 1;
        let (chunk_result_tx, chunk_results) = mpsc::channel(view_diameter * view_diameter);
        let (message_tx, messages) = mpsc::channel(MESSAGE_QUEUE_BACKLOG);

        Ok(Server {
            view_distance: config.view_distance,
            dimension: config.dimension,
            info,
            loader: config.world_loader,
            listener,
            messages,
            message_tx,
            chunk_results,
            chunk_result_tx,
            shutdown_rx,
            shutdown_tx: Arc::new(shutdown_tx),
            entities: BTreeMap::new(),
            next_entity_id: 0,
            chunks: HashMap::new(),
            current_tick: 0,
            schedules: vec![],
            event_handler: None,
            pending_events: vec![],
            ticking: None,
            deferred_events: vec![],
        })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.listener.local_addr()
    }

    pub fn world_info(&self) -> WorldInfo {
        self.info
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    pub fn set_event_handler(&mut self, handler: Box<dyn EventHandler>) {
        self.event_handler = Some(handler);
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            messages: self.message_tx.clone(),
            shutdown: Arc::clone(&self.shutdown_tx),
        }
    }

    /// The main tick loop. Runs until [`ServerHandle::shutdown`]; an overrun
    /// tick is followed immediately by the next one, with no catch-up burst.
    pub async fn run(mut self) {
        info!("server listening on {}", self.listener.local_addr());

        let mut ticker = tokio::time::interval(Duration::from_secs(1) / TICKS_PER_SECOND);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(),
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.listener.join().await;
        for entity in self.entities.values_mut() {
            if let Some(player) = entity.as_player() {
                player.disconnect();
            }
        }
        info!("server stopped");
    }

    fn tick(&mut self) {
        self.drain_messages();
        self.drain_accepted();
        self.dispatch_pending();
        self.tick_entities();
        self.dispatch_pending();
        self.tick_schedules();
        self.drain_chunk_results();
        self.current_tick += 1;
    }

    fn drain_messages(&mut self) {
        loop {
            let message = match self.messages.try_recv() {
                Ok(message) => message,
                Err(_) => break,
            };
            message(self);
        }
    }

    fn drain_accepted(&mut self) {
        while let Some(conn) = self.listener.dequeue() {
            self.add_player(conn);
        }
    }

    fn add_player(&mut self, conn: AcceptedConnection) {
        let id = self.new_entity_id();
        info!("{} logged in as entity {}", conn.username, id);

        let base = EntityBase::new(
            id,
            self.info.spawn_x as f64,
            self.info.spawn_y as f64 + 10.0,
            self.info.spawn_z as f64,
        );
        let player = Player::new(
            base,
            conn,
            self.view_distance,
            self.info.biome_seed,
            self.dimension,
        );
        self.entities.insert(id, Box::new(player));
        self.with_entity_detached(id, |entity, server| entity.on_spawned(server));
        self.push_event(PendingEvent::PlayerJoin { player_id: id });
    }

    /// Spawns a non-player entity. The builder receives the entity's base
    /// with its freshly allocated id.
    pub fn add_entity(&mut self, build: impl FnOnce(EntityBase) -> Box<dyn Entity>) -> i32 {
        let id = self.new_entity_id();
        let entity = build(EntityBase::new(id, 0.0, 0.0, 0.0));
        self.entities.insert(id, entity);
        self.with_entity_detached(id, |entity, server| entity.on_spawned(server));
        id
    }

    pub fn remove_entity(&mut self, id: i32) {
        if let Some(mut entity) = self.entities.remove(&id) {
            if let Some(player) = entity.as_player() {
                info!("{} disconnected", player.username());
                player.disconnect();
            }
            for chunk in self.chunks.values_mut() {
                chunk.remove_observer(id);
            }
        }
    }

    pub fn player_mut(&mut self, id: i32) -> Option<&mut Player> {
        self.entities.get_mut(&id).and_then(|e| e.as_player())
    }

    pub fn broadcast(&mut self, message: &str) {
        for entity in self.entities.values_mut() {
            if let Some(player) = entity.as_player() {
                player.message(message);
            }
        }
    }

    pub fn teleport_player(&mut self, id: i32, x: f64, y: f64, z: f64) {
        self.with_entity_detached(id, |entity, server| {
            if let Some(player) = entity.as_player() {
                player.teleport(server, x, y, z);
            }
        });
    }

    fn new_entity_id(&mut self) -> i32 {
        let id = self.next_entity_id;
        if id == i32::MAX {
            panic!("entity IDs exhausted");
        }
        self.next_entity_id += 1;
        id
    }

    fn tick_entities(&mut self) {
        let ids: Vec<i32> = self.entities.keys().copied().collect();
        for id in ids {
            self.with_entity_detached(id, |entity, server| entity.tick(server));
        }

        let defunct: Vec<i32> = self
            .entities
            .iter()
            .filter(|(_, entity)| entity.is_defunct())
            .map(|(&id, _)| id)
            .collect();
        for id in defunct {
            self.remove_entity(id);
        }
    }

    /// Runs `f` with the entity pulled out of the world so both sides can be
    /// mutated; observer events aimed at it are replayed once it is back.
    fn with_entity_detached(
        &mut self,
        id: i32,
        f: impl FnOnce(&mut Box<dyn Entity>, &mut Server),
    ) {
        let Some(mut entity) = self.entities.remove(&id) else {
            return;
        };
        let previous = self.ticking.replace(id);
        f(&mut entity, self);
        self.ticking = previous;
        self.entities.insert(id, entity);

        // Only the outermost detach replays; nested spawns during a tick
        // leave their events for the level that holds the whole map.
        if previous.is_none() {
            let deferred = mem::take(&mut self.deferred_events);
            for (target, event) in deferred {
                self.deliver_event(target, event);
            }
        }
    }

    fn tick_schedules(&mut self) {
        let mut schedules = mem::take(&mut self.schedules);
        schedules.retain_mut(|schedule| {
            if schedule.next_run != self.current_tick {
                return true;
            }
            let delay = (schedule.run)(self);
            if delay <= 0 {
                false
            } else {
                schedule.next_run += delay as u64;
                true
            }
        });
        // schedules registered while running land in self.schedules
        schedules.append(&mut self.schedules);
        self.schedules = schedules;
    }

    /// Repeatedly calls `run` on the world thread, starting next tick. The
    /// return value is the number of ticks until the next call; anything
    /// below 1 removes the schedule.
    pub fn repeat(&mut self, run: impl FnMut(&mut Server) -> i32 + Send + 'static) {
        self.schedules.push(Schedule {
            run: Box::new(run),
            next_run: self.current_tick + 1,
        });
    }

    pub(crate) fn push_event(&mut self, event: PendingEvent) {
        self.pending_events.push(event);
    }

    fn dispatch_pending(&mut self) {
        while !self.pending_events.is_empty() {
            let events = mem::take(&mut self.pending_events);
            let Some(mut handler) = self.event_handler.take() else {
                return;
            };
            for event in events {
                match event {
                    PendingEvent::PlayerJoin { player_id } => {
                        handler.on_player_join(self, player_id)
                    }
                    PendingEvent::Chat { player_id, message } => {
                        handler.on_chat(self, player_id, &message)
                    }
                    PendingEvent::Command { player_id, command } => {
                        handler.on_command(self, player_id, &command)
                    }
                    PendingEvent::Dig {
                        player_id,
                        x,
                        y,
                        z,
                        finished,
                    } => handler.on_dig(self, player_id, x, y, z, finished),
                    PendingEvent::Interact {
                        player_id,
                        clicked,
                        target,
                    } => handler.on_interact(self, player_id, clicked, target),
                }
            }
            if self.event_handler.is_none() {
                self.event_handler = Some(handler);
            }
        }
    }

    /// Registers and unregisters `observer_id` as the view rectangle
    /// changes, requesting loads for chunks nobody was watching yet.
    pub fn update_chunk_view_range(
        &mut self,
        observer_id: i32,
        unload: &[ChunkPos],
        load: &[ChunkPos],
    ) {
        for &pos in unload {
            if let Some(chunk) = self.chunks.get_mut(&pos) {
                chunk.remove_observer(observer_id);
                self.observer_event(observer_id, ObserverEvent::Unload(pos));
            }
        }

        let mut to_load = vec![];
        for &pos in load {
            use std::collections::hash_map::Entry;
            let (registered, loaded, created) = match self.chunks.entry(pos) {
                Entry::Vacant(entry) => {
                    entry.insert(Chunk::new()).add_observer(observer_id);
                    (true, false, true)
                }
                Entry::Occupied(mut entry) => {
                    let chunk = entry.get_mut();
                    (chunk.add_observer(observer_id), chunk.is_loaded(), false)
                }
            };

            if created {
                to_load.push(pos);
            }
            if registered {
                self.observer_event(observer_id, ObserverEvent::Initialize(pos));
                if loaded {
                    self.observer_event(observer_id, ObserverEvent::SendChunk(pos));
                }
            }
        }

        if !to_load.is_empty() {
            self.load_chunks(to_load);
        }
    }

    fn load_chunks(&mut self, positions: Vec<ChunkPos>) {
        debug!("requesting load of {} chunks", positions.len());
        let results = self.chunk_result_tx.clone();
        match &self.loader {
            Some(loader) => {
                let loader = Arc::clone(loader);
                tokio::task::spawn_blocking(move || loader.load_chunks(&positions, &results));
            }
            None => {
                tokio::spawn(async move {
                    for pos in positions {
                        let result = ChunkReadResult {
                            pos,
                            data: Ok(ChunkData::empty()),
                        };
                        if results.send(result).await.is_err() {
                            break;
                        }
                    }
                });
            }
        }
    }

    fn drain_chunk_results(&mut self) {
        loop {
            let result = match self.chunk_results.try_recv() {
                Ok(result) => result,
                Err(_) => break,
            };

            match result.data {
                Ok(data) => {
                    let observers = match self.chunks.get_mut(&result.pos) {
                        Some(chunk) => {
                            chunk.initialize(data);
                            chunk.observers().to_vec()
                        }
                        // everyone stopped watching while the load ran
                        None => continue,
                    };
                    for id in observers {
                        self.observer_event(id, ObserverEvent::SendChunk(result.pos));
                    }
                }
                Err(e) => {
                    warn!(
                        "failed to load chunk ({}, {}): {}",
                        result.pos.x, result.pos.z, e
                    );
                    if let Some(chunk) = self.chunks.remove(&result.pos) {
                        for &id in chunk.observers() {
                            self.observer_event(id, ObserverEvent::Unload(result.pos));
                        }
                    }
                }
            }
        }
    }

    pub fn get_block(&self, x: i32, y: i32, z: i32) -> Option<Block> {
        if !(0..128).contains(&y) {
            return None;
        }
        let chunk = self.chunks.get(&ChunkPos::of_block(x, z))?;
        if !chunk.is_loaded() {
            return None;
        }
        Some(chunk.block(chunk_coords_to_index(x.rem_euclid(16), y, z.rem_euclid(16))))
    }

    /// Updates a block and broadcasts the change to every observer of its
    /// chunk. Returns false without touching anything if the chunk holds no
    /// data yet.
    pub fn set_block(&mut self, x: i32, y: i32, z: i32, block: Block) -> bool {
        if !(0..128).contains(&y) {
            return false;
        }

        let pos = ChunkPos::of_block(x, z);
        let observers = match self.chunks.get_mut(&pos) {
            Some(chunk) if chunk.is_loaded() => {
                let index = chunk_coords_to_index(x.rem_euclid(16), y, z.rem_euclid(16));
                chunk.set_block(index, block);
                chunk.observers().to_vec()
            }
            _ => return false,
        };

        for id in observers {
            self.observer_event(id, ObserverEvent::BlockChange { x, y, z, block });
        }
        true
    }

    fn observer_event(&mut self, target: i32, event: ObserverEvent) {
        if self.ticking == Some(target) {
            self.deferred_events.push((target, event));
        } else {
            self.deliver_event(target, event);
        }
    }

    fn deliver_event(&mut self, target: i32, event: ObserverEvent) {
        let Some(entity) = self.entities.get_mut(&target) else {
            return;
        };
        let Some(observer) = entity.as_observer() else {
            return;
        };
        match event {
            ObserverEvent::Initialize(pos) => observer.initialize_chunk(pos),
            ObserverEvent::Unload(pos) => observer.unload_chunk(pos),
            ObserverEvent::BlockChange { x, y, z, block } => {
                observer.send_block_change(x, y, z, block)
            }
            ObserverEvent::SendChunk(pos) => {
                if let Some(chunk) = self.chunks.get(&pos) {
                    observer.send_chunk(pos, chunk);
                }
            }
        }
    }
}

/// A cloneable handle for talking to a running server from other tasks.
#[derive(Clone)]
pub struct ServerHandle {
    messages: mpsc::Sender<WorldMessage>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ServerHandle {
    /// Runs a closure on the world thread during its next tick.
    pub async fn execute(&self, f: impl FnOnce(&mut Server) + Send + 'static) {
        if self.messages.send(Box::new(f)).await.is_err() {
            debug!("world loop is gone, dropping message");
        }
    }

    /// Stops the tick loop and the listener, then waits until the world has
    /// wound down completely.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        self.messages.closed().await;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::blocks::BlockType;
    use crate::err::LevelError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    #[derive(Debug, Clone, PartialEq)]
    enum Observed {
        Init(ChunkPos),
        Chunk(ChunkPos),
        Unload(ChunkPos),
        Block(i32, i32, i32, Block),
    }

    struct Recorder {
        base: EntityBase,
        log: Arc<Mutex<Vec<Observed>>>,
    }

    impl Entity for Recorder {
        fn id(&self) -> i32 {
            self.base.id()
        }

        fn pos(&self) -> (f64, f64, f64) {
            self.base.pos()
        }

        fn as_observer(&mut self) -> Option<&mut dyn ChunkObserver> {
            Some(self)
        }
    }

    impl ChunkObserver for Recorder {
        fn initialize_chunk(&mut self, pos: ChunkPos) {
            self.log.lock().unwrap().push(Observed::Init(pos));
        }

        fn send_chunk(&mut self, pos: ChunkPos, chunk: &Chunk) {
            assert!(chunk.is_loaded());
            self.log.lock().unwrap().push(Observed::Chunk(pos));
        }

        fn unload_chunk(&mut self, pos: ChunkPos) {
            self.log.lock().unwrap().push(Observed::Unload(pos));
        }

        fn send_block_change(&mut self, x: i32, y: i32, z: i32, block: Block) {
            self.log.lock().unwrap().push(Observed::Block(x, y, z, block));
        }
    }

    async fn test_server(world_loader: Option<Arc<dyn WorldLoader>>) -> Server {
        Server::bind(Config {
            address: "127.0.0.1:0".into(),
            view_distance: 1,
            dimension: Dimension::Overworld,
            world_loader,
        })
        .await
        .unwrap()
    }

    fn add_recorder(server: &mut Server) -> (i32, Arc<Mutex<Vec<Observed>>>) {
        let log = Arc::new(Mutex::new(vec![]));
        let log_clone = log.clone();
        let id = server.add_entity(move |base| {
            Box::new(Recorder {
                base,
                log: log_clone,
            })
        });
        (id, log)
    }

    /// Lets background loader tasks finish streaming their results.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    fn pos(x: i32, z: i32) -> ChunkPos {
        ChunkPos::new(x, z)
    }

    #[tokio::test]
    async fn block_change_fans_out_to_every_observer() {
        let mut server = test_server(None).await;
        let (a, log_a) = add_recorder(&mut server);
        let (b, log_b) = add_recorder(&mut server);
        assert_ne!(a, b);

        server.update_chunk_view_range(a, &[], &[pos(0, 0)]);
        server.update_chunk_view_range(b, &[], &[pos(0, 0)]);
        settle().await;
        server.drain_chunk_results();

        let stone = Block::new(BlockType::Stone, 0);
        assert!(server.set_block(3, 64, 5, stone));
        assert_eq!(server.get_block(3, 64, 5), Some(stone));

        for log in [&log_a, &log_b] {
            assert_eq!(
                *log.lock().unwrap(),
                vec![
                    Observed::Init(pos(0, 0)),
                    Observed::Chunk(pos(0, 0)),
                    Observed::Block(3, 64, 5, stone),
                ]
            );
        }
    }

    #[tokio::test]
    async fn chunk_is_sent_once_its_load_completes() {
        let mut server = test_server(None).await;
        let (a, log) = add_recorder(&mut server);

        server.update_chunk_view_range(a, &[], &[pos(2, -1)]);
        assert_eq!(*log.lock().unwrap(), vec![Observed::Init(pos(2, -1))]);

        settle().await;
        server.drain_chunk_results();
        assert_eq!(
            *log.lock().unwrap(),
            vec![Observed::Init(pos(2, -1)), Observed::Chunk(pos(2, -1))]
        );

        // a second drain delivers nothing new
        server.drain_chunk_results();
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn set_block_on_pending_chunk_is_refused() {
        let mut server = test_server(None).await;
        let (a, _log) = add_recorder(&mut server);
        server.update_chunk_view_range(a, &[], &[pos(0, 0)]);

        // load still in flight
        assert!(!server.set_block(3, 64, 5, Block::new(BlockType::Stone, 0)));
        assert_eq!(server.get_block(3, 64, 5), None);

        // and entirely unknown chunks are refused too
        assert!(!server.set_block(1000, 64, 1000, Block::new(BlockType::Stone, 0)));
        assert!(!server.set_block(0, 128, 0, Block::new(BlockType::Stone, 0)));
    }

    #[tokio::test]
    async fn late_observer_of_a_loaded_chunk_is_caught_up_immediately() {
        let mut server = test_server(None).await;
        let (a, _log_a) = add_recorder(&mut server);
        server.update_chunk_view_range(a, &[], &[pos(0, 0)]);
        settle().await;
        server.drain_chunk_results();

        let (b, log_b) = add_recorder(&mut server);
        server.update_chunk_view_range(b, &[], &[pos(0, 0)]);
        assert_eq!(
            *log_b.lock().unwrap(),
            vec![Observed::Init(pos(0, 0)), Observed::Chunk(pos(0, 0))]
        );
    }

    #[tokio::test]
    async fn unloaded_observer_stops_receiving_block_changes() {
        let mut server = test_server(None).await;
        let (a, log_a) = add_recorder(&mut server);
        let (b, log_b) = add_recorder(&mut server);
        server.update_chunk_view_range(a, &[], &[pos(0, 0)]);
        server.update_chunk_view_range(b, &[], &[pos(0, 0)]);
        settle().await;
        server.drain_chunk_results();

        server.update_chunk_view_range(a, &[pos(0, 0)], &[]);
        assert_eq!(
            log_a.lock().unwrap().last(),
            Some(&Observed::Unload(pos(0, 0)))
        );

        server.set_block(0, 0, 0, Block::new(BlockType::Bedrock, 0));
        let a_events = log_a.lock().unwrap();
        assert!(!a_events.iter().any(|e| matches!(e, Observed::Block(..))));
        assert!(matches!(
            log_b.lock().unwrap().last(),
            Some(Observed::Block(0, 0, 0, _))
        ));
    }

    struct FailingLoader;

    impl WorldLoader for FailingLoader {
        fn read_world_info(&self) -> Result<WorldInfo, LevelError> {
            Ok(WorldInfo::default())
        }

        fn load_chunks(&self, positions: &[ChunkPos], results: &mpsc::Sender<ChunkReadResult>) {
            for &pos in positions {
                let _ = results.blocking_send(ChunkReadResult {
                    pos,
                    data: Err(LevelError::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "disk on fire",
                    ))),
                });
            }
        }
    }

    #[tokio::test]
    async fn failed_load_removes_the_chunk_and_notifies_observers() {
        let mut server = test_server(Some(Arc::new(FailingLoader))).await;
        let (a, log) = add_recorder(&mut server);

        server.update_chunk_view_range(a, &[], &[pos(0, 0)]);
        settle().await;
        server.drain_chunk_results();

        assert_eq!(
            *log.lock().unwrap(),
            vec![Observed::Init(pos(0, 0)), Observed::Unload(pos(0, 0))]
        );
        assert!(!server.chunks.contains_key(&pos(0, 0)));
    }

    #[tokio::test]
    async fn entity_ids_are_monotonic() {
        let mut server = test_server(None).await;
        let (a, _) = add_recorder(&mut server);
        let (b, _) = add_recorder(&mut server);
        server.remove_entity(a);
        let (c, _) = add_recorder(&mut server);
        assert_eq!((a, b, c), (0, 1, 2));
    }

    #[tokio::test]
    async fn repeating_schedule_runs_every_tick() {
        let mut server = test_server(None).await;
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        server.repeat(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            1
        });

        for _ in 0..5 {
            server.tick();
        }
        // first run happens on the tick after registration
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn schedule_returning_zero_runs_once() {
        let mut server = test_server(None).await;
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        server.repeat(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            0
        });

        for _ in 0..5 {
            server.tick();
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn schedule_interval_is_honored() {
        let mut server = test_server(None).await;
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        server.repeat(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            3
        });

        for _ in 0..7 {
            server.tick();
        }
        // runs at ticks 1 and 4
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn messages_run_on_the_world_thread() {
        let mut server = test_server(None).await;
        let handle = server.handle();

        let ran = Arc::new(AtomicUsize::new(0));
        let flag = ran.clone();
        handle
            .execute(move |server| {
                flag.fetch_add(1 + server.current_tick() as usize, Ordering::SeqCst);
            })
            .await;

        assert_eq!(ran.load(Ordering::SeqCst), 0);
        server.tick();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    struct DigRecorder(Arc<Mutex<Vec<(i32, i32, i32, i32, bool)>>>);

    impl EventHandler for DigRecorder {
        fn on_dig(
            &mut self,
            _server: &mut Server,
            player_id: i32,
            x: i32,
            y: i32,
            z: i32,
            finished: bool,
        ) {
            self.0.lock().unwrap().push((player_id, x, y, z, finished));
        }
    }

    #[tokio::test]
    async fn dig_events_reach_the_handler() {
        let mut server = test_server(None).await;
        let log = Arc::new(Mutex::new(vec![]));
        server.set_event_handler(Box::new(DigRecorder(log.clone())));

        server.push_event(PendingEvent::Dig {
            player_id: 3,
            x: 1,
            y: 64,
            z: -2,
            finished: true,
        });
        server.dispatch_pending();

        assert_eq!(*log.lock().unwrap(), vec![(3, 1, 64, -2, true)]);
    }

    struct JoinCounter(Arc<AtomicUsize>);

    impl EventHandler for JoinCounter {
        fn on_player_join(&mut self, server: &mut Server, player_id: i32) {
            self.0.fetch_add(1, Ordering::SeqCst);
            let name = server.player_mut(player_id).unwrap().username().to_owned();
            server.broadcast(&format!("{} joined", name));
        }
    }

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn join_event_reaches_the_handler() {
        let mut server = test_server(None).await;
        let joins = Arc::new(AtomicUsize::new(0));
        server.set_event_handler(Box::new(JoinCounter(joins.clone())));

        let (_client, stream) = connected_pair().await;
        server.add_player(AcceptedConnection {
            username: "steve".into(),
            stream,
        });
        server.dispatch_pending();

        assert_eq!(joins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn teleport_recenters_the_view_rectangle() {
        let mut server = test_server(None).await;
        let (_client, stream) = connected_pair().await;
        server.add_player(AcceptedConnection {
            username: "steve".into(),
            stream,
        });
        settle().await;
        server.drain_chunk_results();

        // spawn is chunk (0, 0) with view distance 1
        for z in -1..=1 {
            assert_eq!(server.chunks[&pos(-1, z)].observers(), &[0]);
        }

        // x = 32 is chunk 2, so the rectangle recenters from {-1..1} to {1..3}
        server.teleport_player(0, 32.0, 64.0, 0.0);

        for z in -1..=1 {
            assert!(server.chunks[&pos(-1, z)].observers().is_empty());
            assert!(server.chunks[&pos(0, z)].observers().is_empty());
            for x in 1..=3 {
                assert_eq!(server.chunks[&pos(x, z)].observers(), &[0]);
            }
        }
    }

    #[tokio::test]
    async fn set_item_updates_the_client_slot() {
        use crate::player::ItemStack;

        let (mut client, stream) = connected_pair().await;
        let mut player = Player::new(
            EntityBase::new(7, 0.0, 64.0, 0.0),
            AcceptedConnection {
                username: "steve".into(),
                stream,
            },
            1,
            0,
            Dimension::Overworld,
        );

        let pickaxe = ItemStack {
            id: 3,
            count: 2,
            damage: 0,
        };
        player.set_item(36, pickaxe);
        assert_eq!(player.item_in_slot(36), pickaxe);

        // SetSlot: window 0, slot 36, item 3 x2, damage 0
        let mut buf = [0u8; 9];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x67, 0x00, 0x00, 0x24, 0x00, 0x03, 0x02, 0x00, 0x00]);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_after_twenty_seconds() {
        use crate::entity::Entity as _;

        let mut server = test_server(None).await;
        let (mut client, stream) = connected_pair().await;
        let mut player = Player::new(
            EntityBase::new(99, 0.0, 64.0, 0.0),
            AcceptedConnection {
                username: "steve".into(),
                stream,
            },
            1,
            0,
            Dimension::Overworld,
        );

        // fresh connection: nothing due yet
        player.tick(&mut server);

        tokio::time::advance(Duration::from_secs(21)).await;
        player.tick(&mut server);

        let mut byte = [0u8; 1];
        client.read_exact(&mut byte).await.unwrap();
        assert_eq!(byte[0], 0x00);

        // exactly one was queued
        player.tick(&mut server);
        let extra = tokio::time::timeout(Duration::from_millis(50), client.read_u8()).await;
        assert!(extra.is_err());
    }
}
