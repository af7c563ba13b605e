//! Client session protocol handling, driven without a socket.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use voxelsrv_engine::world::block::BlockId;
use voxelsrv_engine::world::position::{BlockPos, ChunkPos};
use voxelsrv_server::block;
use voxelsrv_server::chunk_store::StoreSettings;
use voxelsrv_server::event_bus::{ChangeKind, ChangeSource, WorldChange};
use voxelsrv_server::net::ServerState;
use voxelsrv_server::net::connection::Session;
use voxelsrv_server::protocol::{ChunkUnload, ChunkUpdate, ServerMessage};
use voxelsrv_server::registry::BlockRegistry;
use voxelsrv_server::world_manager::{WorldConfig, WorldManager};

const SIZE: usize = 8;
const HEIGHT: usize = 96;

struct Harness {
    root: PathBuf,
    manager: WorldManager,
    state: Arc<ServerState>,
}

impl Harness {
    async fn new(tag: &str) -> Self {
        let root = std::env::temp_dir().join(format!("voxelsrv_session_{}_{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&root);

        let mut registry = BlockRegistry::in_memory();
        block::register_defaults(&mut registry).unwrap();
        registry.finalize().unwrap();
        let terrain = block::terrain_blocks(&registry).unwrap();

        let manager = WorldManager::new(root.clone(), terrain, StoreSettings::default());
        let world = manager
            .create_world(WorldConfig::new("w1", "flat").with_dimensions(SIZE, HEIGHT))
            .await
            .unwrap();
        let state = Arc::new(ServerState::new(Arc::new(registry), world));
        Self { root, manager, state }
    }

    fn session(&self) -> Session {
        Session::new(self.state.next_connection_id(), Arc::clone(&self.state))
    }

    async fn finish(self) {
        self.manager.shutdown_all().await;
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn request(x: i32, z: i32) -> String {
    format!(r#"{{"type":"chunk_request","data":{{"chunkX":{},"chunkZ":{}}}}}"#, x, z)
}

fn update(x: i64, y: i64, z: i64, block_id: u16) -> String {
    format!(
        r#"{{"type":"chunk_update","data":{{"chunkX":0,"chunkZ":0,"x":{},"y":{},"z":{},"blockId":{}}}}}"#,
        x, y, z, block_id
    )
}

fn is_error(messages: &[ServerMessage]) -> bool {
    matches!(messages, [ServerMessage::Error(_)])
}

// ---------------------------------------------------------------------------
// Handshake and requests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn greeting_sends_welcome_then_registry() {
    let h = Harness::new("greeting").await;
    let session = h.session();
    let greeting = session.greeting();

    match &greeting[..] {
        [ServerMessage::Welcome(welcome), ServerMessage::RegistrySync(sync)] => {
            assert_eq!(welcome.world, "w1");
            assert_eq!(welcome.chunk_size, SIZE);
            assert_eq!(welcome.height, HEIGHT);
            assert_eq!(sync.blocks[0].name, "air");
            assert!(sync.blocks.iter().any(|b| b.name == "grass" && b.id == Some(BlockId(3))));
        }
        other => panic!("unexpected greeting: {:?}", other),
    }
    h.finish().await;
}

#[tokio::test]
async fn chunk_request_returns_full_chunk() {
    let h = Harness::new("request").await;
    let mut session = h.session();
    let replies = session.handle_text(&request(0, 0)).await;

    let [ServerMessage::ChunkData(data)] = &replies[..] else {
        panic!("expected chunk data, got {:?}", replies);
    };
    assert_eq!((data.chunk_x, data.chunk_z), (0, 0));
    assert_eq!(data.height, HEIGHT);
    assert_eq!(data.data.len(), SIZE * SIZE * HEIGHT);
    assert_eq!(data.data[63 * SIZE], 3); // (0, 63, 0) is grass
    assert_eq!(data.data[62 * SIZE], 2);
    assert!(session.is_tracking(ChunkPos::new(0, 0)));
    h.finish().await;
}

#[tokio::test]
async fn ping_is_answered_with_server_time() {
    let h = Harness::new("ping").await;
    let mut session = h.session();
    let replies = session.handle_text(r#"{"type":"ping","data":{"time":1234}}"#).await;
    let [ServerMessage::Pong(pong)] = &replies[..] else {
        panic!("expected pong, got {:?}", replies);
    };
    assert!(pong.time > 1234);
    h.finish().await;
}

#[tokio::test]
async fn bad_input_gets_error_and_session_continues() {
    let h = Harness::new("bad_input").await;
    let mut session = h.session();

    assert!(is_error(&session.handle_text("garbage").await));
    assert!(is_error(&session.handle_text(r#"{"type":"fly","data":{}}"#).await));
    assert!(is_error(&session.handle_text(&update(SIZE as i64, 0, 0, 1)).await));
    assert!(is_error(&session.handle_text(&update(0, -1, 0, 1)).await));
    assert!(is_error(&session.handle_text(&update(0, 0, 0, 40000)).await));

    let replies = session.handle_text(&request(0, 0)).await;
    assert!(matches!(&replies[..], [ServerMessage::ChunkData(_)]));
    h.finish().await;
}

// ---------------------------------------------------------------------------
// Broadcast
// ---------------------------------------------------------------------------

#[tokio::test]
async fn update_is_applied_and_relayed_to_other_clients() {
    let h = Harness::new("relay").await;
    let mut changes = h.state.world.subscribe();
    let mut author = h.session();
    let mut watcher = h.session();
    let mut bystander = h.session();

    author.handle_text(&request(0, 0)).await;
    watcher.handle_text(&request(0, 0)).await;
    bystander.handle_text(&request(5, 5)).await;

    let replies = author.handle_text(&update(1, 70, 2, 4)).await;
    assert!(replies.is_empty());
    assert_eq!(h.state.world.get_block(BlockPos::new(1, 70, 2)).await, BlockId(4));

    let change = changes.recv().await.unwrap();
    assert_eq!(change.source, ChangeSource::Player(author.id()));
    assert!(author.on_world_change(&change).is_none());
    assert!(bystander.on_world_change(&change).is_none());
    let expected: ChunkUpdate = serde_json::from_str(r#"{"chunkX":0,"chunkZ":0,"x":1,"y":70,"z":2,"blockId":4}"#).unwrap();
    assert_eq!(watcher.on_world_change(&change), Some(ServerMessage::ChunkUpdate(expected)));
    h.finish().await;
}

#[tokio::test]
async fn unload_reaches_only_clients_holding_the_chunk() {
    let h = Harness::new("unload").await;
    let mut holder = h.session();
    let mut other = h.session();
    holder.handle_text(&request(2, -2)).await;

    let change = WorldChange {
        source: ChangeSource::Store,
        kind: ChangeKind::ChunkUnloaded(ChunkPos::new(2, -2)),
    };
    assert_eq!(
        holder.on_world_change(&change),
        Some(ServerMessage::ChunkUnload(ChunkUnload { chunk_x: 2, chunk_z: -2 }))
    );
    assert!(!holder.is_tracking(ChunkPos::new(2, -2)));
    // Only once.
    assert!(holder.on_world_change(&change).is_none());
    assert!(other.on_world_change(&change).is_none());
    h.finish().await;
}

#[tokio::test]
async fn lagging_client_is_resent_its_chunks() {
    let h = Harness::new("resync").await;
    let mut session = h.session();
    session.handle_text(&request(1, 0)).await;
    session.handle_text(&request(0, 0)).await;
    // An edit the client never heard about.
    h.state.world.set_block(BlockPos::new(2, 80, 3), BlockId(6)).await;

    let replies = session.resync().await;
    let [ServerMessage::ChunkData(first), ServerMessage::ChunkData(second)] = &replies[..] else {
        panic!("expected two chunks, got {:?}", replies);
    };
    assert_eq!((first.chunk_x, first.chunk_z), (0, 0));
    assert_eq!((second.chunk_x, second.chunk_z), (1, 0));
    assert_eq!(first.data[2 + 80 * SIZE + 3 * SIZE * HEIGHT], 6);
    h.finish().await;
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn edits_after_world_shutdown_are_refused() {
    let h = Harness::new("closed").await;
    let mut changes = h.state.world.subscribe();
    let mut session = h.session();
    session.handle_text(&request(0, 0)).await;
    h.state.world.shutdown().await;

    assert!(is_error(&session.handle_text(&update(1, 70, 2, 4)).await));
    assert!(changes.try_recv().is_err());
    assert_eq!(h.state.world.store().dirty_count(), 0);
    h.finish().await;
}
