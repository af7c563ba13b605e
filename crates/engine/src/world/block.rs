use serde::{Deserialize, Serialize};

/// Numeric block identifier as stored in chunk arrays and sent over the wire.
///
/// The engine stores these without interpreting them; the block registry
/// assigns meaning to each ID. The only semantic the engine enforces is that
/// `BlockId::AIR` (0) is the "empty" block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct BlockId(pub u16);

impl BlockId {
    /// The universal "empty" block.
    pub const AIR: BlockId = BlockId(0);

    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub const fn is_air(self) -> bool {
        self.0 == 0
    }
}

impl From<u16> for BlockId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}
