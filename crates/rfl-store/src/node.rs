//! Binary content identifiers.

use std::fmt;
use std::str::FromStr;

use crate::StoreError;

/// Width of a content id on the wire and inside blobs.
pub const NODE_LEN: usize = 20;

/// Width of the hex form of a content id.
pub const NODE_HEX_LEN: usize = NODE_LEN * 2;

/// A 20-byte content id (file revision, parent or link revision).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeId([u8; NODE_LEN]);

impl NodeId {
    /// The all-zero id, used for "no parent" and "no content".
    pub const NULL: NodeId = NodeId([0u8; NODE_LEN]);

    pub const fn new(bytes: [u8; NODE_LEN]) -> Self {
        Self(bytes)
    }

    /// Build an id from a slice that must be exactly 20 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; NODE_LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Parse a 40-character hex string.
    pub fn from_hex(hex_str: &str) -> Option<Self> {
        if hex_str.len() != NODE_HEX_LEN {
            return None;
        }
        let mut bytes = [0u8; NODE_LEN];
        hex::decode_to_slice(hex_str, &mut bytes).ok()?;
        Some(Self(bytes))
    }

    #[inline]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; NODE_LEN] {
        &self.0
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; NODE_LEN]
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.to_hex())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for NodeId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s).ok_or_else(|| StoreError::InvalidNode(s.to_string()))
    }
}

/// A (path, content id) pair: the unit of every fetch request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileId {
    pub path: String,
    pub node: NodeId,
}

impl FileId {
    pub fn new(path: impl Into<String>, node: NodeId) -> Self {
        Self {
            path: path.into(),
            node,
        }
    }
}
