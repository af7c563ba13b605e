//! Process-wide block registry with a persisted name → ID palette.
//!
//! Lifecycle: register definitions with [`BlockRegistry::add_block`], merge the
//! persisted palette with [`BlockRegistry::load_palette`], then call
//! [`BlockRegistry::finalize`] once. After that the registry is read-only and
//! can be shared behind an `Arc`.
//!
//! A block keeps the ID recorded in the palette forever. IDs of blocks that
//! are no longer registered are released at finalize and handed to new blocks
//! (smallest first) before the ID space grows.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use indexmap::IndexMap;
use thiserror::Error;
use voxelsrv_engine::world::block::BlockId;

use crate::block::{AIR_NAME, BlockType, ItemDefinition};

/// Persisted palette: block name → numeric ID.
pub type Palette = BTreeMap<String, u16>;

/// Backing store for the palette (normally `blocks.json`).
pub trait PaletteStore: Send + Sync {
    /// `Ok(None)` if nothing has been persisted yet.
    fn load(&self) -> anyhow::Result<Option<Palette>>;
    fn save(&self, palette: &Palette) -> anyhow::Result<()>;
}

/// Palette store that keeps nothing. Every run starts from a fresh palette.
pub struct MemoryPaletteStore;

impl PaletteStore for MemoryPaletteStore {
    fn load(&self) -> anyhow::Result<Option<Palette>> {
        Ok(None)
    }

    fn save(&self, _palette: &Palette) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry is finalized; no more definitions can be added")]
    AlreadyFinalized,
    #[error("'{0}' is already registered")]
    DuplicateBlock(String),
    #[error("unknown block '{0}'")]
    UnknownBlock(String),
    #[error("block ID space exhausted")]
    IdSpaceExhausted,
    #[error("block palette: {0:#}")]
    Palette(#[source] anyhow::Error),
}

pub struct BlockRegistry {
    /// Registered definitions in registration order. `air` is always first.
    blocks: IndexMap<String, BlockType>,
    items: IndexMap<String, ItemDefinition>,
    palette: HashMap<String, BlockId>,
    names_by_id: HashMap<BlockId, String>,
    free_ids: BTreeSet<u16>,
    last_id: u16,
    finalized: bool,
    store: Box<dyn PaletteStore>,
}

impl BlockRegistry {
    pub fn new(store: Box<dyn PaletteStore>) -> Self {
        let mut blocks = IndexMap::new();
        blocks.insert(AIR_NAME.to_string(), BlockType::air());
        let mut palette = HashMap::new();
        palette.insert(AIR_NAME.to_string(), BlockId::AIR);
        let mut names_by_id = HashMap::new();
        names_by_id.insert(BlockId::AIR, AIR_NAME.to_string());
        Self {
            blocks,
            items: IndexMap::new(),
            palette,
            names_by_id,
            free_ids: BTreeSet::new(),
            last_id: 0,
            finalized: false,
            store,
        }
    }

    /// Registry that never persists its palette.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryPaletteStore))
    }

    pub fn add_block(&mut self, block: BlockType) -> Result<(), RegistryError> {
        if self.finalized {
            return Err(RegistryError::AlreadyFinalized);
        }
        if self.blocks.contains_key(&block.name) {
            return Err(RegistryError::DuplicateBlock(block.name));
        }
        let name = block.name.clone();
        self.blocks.insert(name, BlockType { id: None, ..block });
        Ok(())
    }

    pub fn add_item(&mut self, item: ItemDefinition) -> Result<(), RegistryError> {
        if self.finalized {
            return Err(RegistryError::AlreadyFinalized);
        }
        if self.items.contains_key(&item.name) {
            return Err(RegistryError::DuplicateBlock(item.name));
        }
        self.items.insert(item.name.clone(), item);
        Ok(())
    }

    /// Merge the persisted palette. Entries that collide with an ID already
    /// claimed, or that try to claim ID 0, are skipped with a warning.
    pub fn load_palette(&mut self) -> Result<(), RegistryError> {
        if self.finalized {
            return Err(RegistryError::AlreadyFinalized);
        }
        let Some(persisted) = self.store.load().map_err(RegistryError::Palette)? else {
            tracing::info!("No block palette found, starting fresh");
            return Ok(());
        };

        for (name, raw) in persisted {
            let id = BlockId(raw);
            if name == AIR_NAME {
                continue;
            }
            if id.is_air() {
                tracing::warn!("Palette maps '{}' to the air ID, ignoring", name);
                continue;
            }
            if let Some(owner) = self.names_by_id.get(&id) {
                tracing::warn!("Palette ID {} claimed by both '{}' and '{}', ignoring the latter", raw, owner, name);
                continue;
            }
            self.palette.insert(name.clone(), id);
            self.names_by_id.insert(id, name);
            self.last_id = self.last_id.max(raw);
        }

        self.free_ids = (1..self.last_id)
            .filter(|raw| !self.names_by_id.contains_key(&BlockId(*raw)))
            .collect();
        tracing::info!(
            "Loaded block palette: {} entries, last ID {}, {} free",
            self.palette.len() - 1,
            self.last_id,
            self.free_ids.len()
        );
        Ok(())
    }

    /// Assign IDs to every registered block and persist the palette.
    ///
    /// Calling this again after it succeeded does nothing. If persisting
    /// fails the registry stays open and the call may be retried; the
    /// assignment it computes is the same.
    pub fn finalize(&mut self) -> Result<(), RegistryError> {
        if self.finalized {
            return Ok(());
        }

        // Release IDs of palette entries nobody registered this time.
        let orphans: Vec<String> = self
            .palette
            .keys()
            .filter(|name| !self.blocks.contains_key(*name))
            .cloned()
            .collect();
        for name in orphans {
            if let Some(id) = self.palette.remove(&name) {
                tracing::info!("Block '{}' no longer registered, releasing ID {}", name, id.0);
                self.names_by_id.remove(&id);
                self.free_ids.insert(id.0);
            }
        }

        let mut assigned = 0usize;
        for (name, block) in self.blocks.iter_mut() {
            if let Some(&id) = self.palette.get(name) {
                block.id = Some(id);
                continue;
            }
            let raw = match self.free_ids.pop_first() {
                Some(raw) => raw,
                None => {
                    self.last_id = self
                        .last_id
                        .checked_add(1)
                        .ok_or(RegistryError::IdSpaceExhausted)?;
                    self.last_id
                }
            };
            let id = BlockId(raw);
            block.id = Some(id);
            self.palette.insert(name.clone(), id);
            self.names_by_id.insert(id, name.clone());
            assigned += 1;
        }

        let persisted = self.palette();
        self.store.save(&persisted).map_err(RegistryError::Palette)?;
        self.finalized = true;
        tracing::info!(
            "Block registry finalized: {} blocks ({} newly assigned), {} items",
            self.blocks.len(),
            assigned,
            self.items.len()
        );
        Ok(())
    }

    /// Current name → ID table in its persisted form.
    pub fn palette(&self) -> Palette {
        self.palette.iter().map(|(name, id)| (name.clone(), id.0)).collect()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn get_block_by_id(&self, id: BlockId) -> Option<&BlockType> {
        self.names_by_id.get(&id).and_then(|name| self.blocks.get(name))
    }

    pub fn get_block_by_name(&self, name: &str) -> Option<&BlockType> {
        self.blocks.get(name)
    }

    /// ID recorded for `name`, if any. Before finalize this only knows
    /// persisted palette entries.
    pub fn get_id_by_name(&self, name: &str) -> Option<BlockId> {
        self.palette.get(name).copied()
    }

    /// Whether `id` names a registered block (air included).
    pub fn is_known_id(&self, id: BlockId) -> bool {
        self.get_block_by_id(id).is_some()
    }

    pub fn get_item(&self, name: &str) -> Option<&ItemDefinition> {
        self.items.get(name)
    }

    /// Registered blocks in registration order.
    pub fn blocks(&self) -> impl Iterator<Item = &BlockType> {
        self.blocks.values()
    }

    pub fn items(&self) -> impl Iterator<Item = &ItemDefinition> {
        self.items.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::ToolKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Shared in-memory palette that counts writes.
    #[derive(Clone, Default)]
    struct SharedStore {
        palette: Arc<Mutex<Option<Palette>>>,
        saves: Arc<AtomicUsize>,
    }

    impl PaletteStore for SharedStore {
        fn load(&self) -> anyhow::Result<Option<Palette>> {
            Ok(self.palette.lock().unwrap().clone())
        }

        fn save(&self, palette: &Palette) -> anyhow::Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            *self.palette.lock().unwrap() = Some(palette.clone());
            Ok(())
        }
    }

    struct FailingStore;

    impl PaletteStore for FailingStore {
        fn load(&self) -> anyhow::Result<Option<Palette>> {
            anyhow::bail!("disk on fire")
        }

        fn save(&self, _palette: &Palette) -> anyhow::Result<()> {
            anyhow::bail!("disk on fire")
        }
    }

    fn block(name: &str) -> BlockType {
        BlockType::cube(name, &[name], 1.0, ToolKind::Any)
    }

    fn session(store: &SharedStore, names: &[&str]) -> BlockRegistry {
        let mut registry = BlockRegistry::new(Box::new(store.clone()));
        for name in names {
            registry.add_block(block(name)).unwrap();
        }
        registry.load_palette().unwrap();
        registry.finalize().unwrap();
        registry
    }

    fn id(registry: &BlockRegistry, name: &str) -> u16 {
        registry.get_id_by_name(name).unwrap().0
    }

    #[test]
    fn fresh_palette_assigns_in_registration_order() {
        let store = SharedStore::default();
        let registry = session(&store, &["a", "b", "c"]);
        assert_eq!(id(&registry, "air"), 0);
        assert_eq!(id(&registry, "a"), 1);
        assert_eq!(id(&registry, "b"), 2);
        assert_eq!(id(&registry, "c"), 3);
        assert_eq!(registry.get_block_by_id(BlockId(2)).unwrap().name, "b");
        assert_eq!(registry.get_block_by_name("c").unwrap().id, Some(BlockId(3)));
    }

    #[test]
    fn ids_survive_reordering() {
        let store = SharedStore::default();
        session(&store, &["a", "b", "c"]);
        let registry = session(&store, &["c", "a", "b"]);
        assert_eq!(id(&registry, "a"), 1);
        assert_eq!(id(&registry, "b"), 2);
        assert_eq!(id(&registry, "c"), 3);
    }

    #[test]
    fn released_id_is_reused_before_growing() {
        let store = SharedStore::default();
        session(&store, &["a", "b", "c"]);
        let registry = session(&store, &["a", "c", "d"]);
        assert_eq!(id(&registry, "a"), 1);
        assert_eq!(id(&registry, "c"), 3);
        assert_eq!(id(&registry, "d"), 2);
        assert!(registry.get_id_by_name("b").is_none());

        let registry = session(&store, &["a", "c", "d", "e"]);
        assert_eq!(id(&registry, "e"), 4);
    }

    #[test]
    fn gaps_in_persisted_palette_are_filled_smallest_first() {
        let store = SharedStore::default();
        *store.palette.lock().unwrap() = Some(Palette::from([
            ("air".to_string(), 0),
            ("a".to_string(), 1),
            ("c".to_string(), 5),
        ]));
        let registry = session(&store, &["a", "c", "x", "y", "z", "w"]);
        assert_eq!(id(&registry, "x"), 2);
        assert_eq!(id(&registry, "y"), 3);
        assert_eq!(id(&registry, "z"), 4);
        assert_eq!(id(&registry, "w"), 6);
    }

    #[test]
    fn second_finalize_writes_nothing() {
        let store = SharedStore::default();
        let mut registry = session(&store, &["a"]);
        assert_eq!(store.saves.load(Ordering::SeqCst), 1);
        registry.finalize().unwrap();
        assert_eq!(store.saves.load(Ordering::SeqCst), 1);
        assert_eq!(id(&registry, "a"), 1);
    }

    #[test]
    fn definitions_rejected_after_finalize() {
        let store = SharedStore::default();
        let mut registry = session(&store, &["a"]);
        assert!(matches!(registry.add_block(block("b")), Err(RegistryError::AlreadyFinalized)));
        assert!(matches!(
            registry.add_item(ItemDefinition::block_item("b")),
            Err(RegistryError::AlreadyFinalized)
        ));
    }

    #[test]
    fn duplicate_and_air_names_rejected() {
        let mut registry = BlockRegistry::in_memory();
        registry.add_block(block("a")).unwrap();
        assert!(matches!(registry.add_block(block("a")), Err(RegistryError::DuplicateBlock(_))));
        assert!(matches!(registry.add_block(block("air")), Err(RegistryError::DuplicateBlock(_))));
    }

    #[test]
    fn colliding_palette_entries_are_skipped() {
        let store = SharedStore::default();
        *store.palette.lock().unwrap() = Some(Palette::from([
            ("a".to_string(), 1),
            ("b".to_string(), 1),
            ("bogus".to_string(), 0),
        ]));
        let registry = session(&store, &["a", "b"]);
        assert_eq!(id(&registry, "a"), 1);
        assert_eq!(id(&registry, "b"), 2);
    }

    #[test]
    fn palette_errors_surface() {
        let mut registry = BlockRegistry::new(Box::new(FailingStore));
        registry.add_block(block("a")).unwrap();
        assert!(matches!(registry.load_palette(), Err(RegistryError::Palette(_))));
        assert!(matches!(registry.finalize(), Err(RegistryError::Palette(_))));
        assert!(!registry.is_finalized());
        // Still open: definitions are accepted until a finalize succeeds.
        registry.add_block(block("b")).unwrap();
    }

    #[test]
    fn default_blocks_get_stable_low_ids() {
        let mut registry = BlockRegistry::in_memory();
        crate::block::register_defaults(&mut registry).unwrap();
        registry.finalize().unwrap();
        let terrain = crate::block::terrain_blocks(&registry).unwrap();
        assert_eq!(terrain.stone, BlockId(1));
        assert_eq!(terrain.dirt, BlockId(2));
        assert_eq!(terrain.grass, BlockId(3));
        assert!(registry.is_known_id(BlockId::AIR));
        assert!(!registry.is_known_id(BlockId(9999)));
        assert_eq!(registry.get_item("grass").unwrap().block.as_deref(), Some("grass"));
    }
}
