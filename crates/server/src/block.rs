//! Block and item definitions, and the default block set.
//!
//! Numeric IDs are not fixed here: the [`BlockRegistry`] assigns them from the
//! persisted palette at finalize time. The default list is registered in a
//! fixed order, so a fresh palette always yields `stone = 1`, `dirt = 2`,
//! `grass = 3`, and so on.

use serde::{Deserialize, Serialize};
use voxelsrv_engine::generator::TerrainBlocks;
use voxelsrv_engine::world::block::BlockId;

use crate::registry::{BlockRegistry, RegistryError};

pub const AIR_NAME: &str = "air";
pub const STONE: &str = "stone";
pub const DIRT: &str = "dirt";
pub const GRASS: &str = "grass";

/// Tool class that mines a block fastest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    #[default]
    Any,
    None,
    Pickaxe,
    Axe,
    Shovel,
}

/// A named block type. Rendering and gameplay attributes are carried along
/// for clients but never interpreted by the chunk core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockType {
    /// Assigned by the registry at finalize; absent before.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<BlockId>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub textures: Vec<String>,
    pub solid: bool,
    pub transparent: bool,
    pub hardness: f32,
    pub tool: ToolKind,
    #[serde(default)]
    pub unbreakable: bool,
}

impl BlockType {
    /// An opaque, solid, full cube.
    pub fn cube(name: &str, textures: &[&str], hardness: f32, tool: ToolKind) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            display_name: None,
            textures: textures.iter().map(|t| t.to_string()).collect(),
            solid: true,
            transparent: false,
            hardness,
            tool,
            unbreakable: false,
        }
    }

    /// A solid cube that lets light and neighbouring faces show through.
    pub fn transparent(name: &str, texture: &str, hardness: f32) -> Self {
        Self {
            transparent: true,
            ..Self::cube(name, &[texture], hardness, ToolKind::Any)
        }
    }

    /// A non-solid, transparent fluid.
    pub fn fluid(name: &str, texture: &str) -> Self {
        Self {
            solid: false,
            transparent: true,
            hardness: 100.0,
            tool: ToolKind::None,
            unbreakable: true,
            ..Self::cube(name, &[texture], 0.0, ToolKind::None)
        }
    }

    pub fn unbreakable(mut self) -> Self {
        self.unbreakable = true;
        self.tool = ToolKind::None;
        self
    }

    pub(crate) fn air() -> Self {
        Self {
            id: Some(BlockId::AIR),
            solid: false,
            transparent: true,
            ..Self::cube(AIR_NAME, &[], 0.0, ToolKind::Any)
        }
    }
}

/// A named item, optionally placing a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDefinition {
    pub name: String,
    pub stack_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<String>,
}

impl ItemDefinition {
    pub fn block_item(block: &str) -> Self {
        Self {
            name: block.to_string(),
            stack_size: 64,
            block: Some(block.to_string()),
        }
    }
}

/// The default block set, in registration order.
pub fn default_blocks() -> Vec<BlockType> {
    use ToolKind::{Axe, Pickaxe, Shovel};
    vec![
        BlockType::cube(STONE, &["block/stone"], 1.5, Pickaxe),
        BlockType::cube(DIRT, &["block/dirt"], 0.5, Shovel),
        BlockType::cube(
            GRASS,
            &["block/grass_top", "block/dirt", "block/grass_side"],
            0.6,
            Shovel,
        ),
        BlockType::cube(
            "grass_snow",
            &["block/snow", "block/dirt", "block/grass_snow"],
            0.6,
            Shovel,
        ),
        BlockType::cube("cobblestone", &["block/cobblestone"], 2.0, Pickaxe),
        BlockType::cube("log", &["block/log_top", "block/log"], 2.0, Axe),
        BlockType::cube("sand", &["block/sand"], 0.5, Shovel),
        BlockType::transparent("leaves", "block/leaves", 0.2),
        BlockType::fluid("water", "block/water"),
        BlockType::transparent("glass", "block/glass", 0.3),
        BlockType::cube("planks", &["block/planks"], 2.0, Axe),
        BlockType::cube("bricks", &["block/bricks"], 2.0, Pickaxe),
        BlockType::cube("snow", &["block/snow"], 0.1, Shovel),
        BlockType::cube("gravel", &["block/gravel"], 0.6, Shovel),
        BlockType::cube("bedrock", &["block/bedrock"], 0.0, ToolKind::None).unbreakable(),
        BlockType::cube("coal_ore", &["block/coal_ore"], 3.0, Pickaxe),
        BlockType::cube("iron_ore", &["block/iron_ore"], 3.0, Pickaxe),
    ]
}

/// Register the default blocks and their block items.
pub fn register_defaults(registry: &mut BlockRegistry) -> Result<(), RegistryError> {
    for block in default_blocks() {
        let item = ItemDefinition::block_item(&block.name);
        registry.add_block(block)?;
        registry.add_item(item)?;
    }
    Ok(())
}

/// Resolve the blocks the built-in generators place.
pub fn terrain_blocks(registry: &BlockRegistry) -> Result<TerrainBlocks, RegistryError> {
    let id = |name: &str| {
        registry
            .get_id_by_name(name)
            .ok_or_else(|| RegistryError::UnknownBlock(name.to_string()))
    };
    Ok(TerrainBlocks {
        stone: id(STONE)?,
        dirt: id(DIRT)?,
        grass: id(GRASS)?,
    })
}
