//! File blob format.
//!
//! A blob bundles one file revision with its ancestry:
//!
//! ```text
//! <decimal content length> \0 <raw content> <ancestry record>*
//!
//! ancestry record:
//!   node (20) | p1 (20) | p2 (20) | linknode (20) | copy-from path | \0
//! ```
//!
//! Missing parents are the null id. The first record always describes the
//! requested revision itself; the rest follow the host's ancestor order.
//! On the wire and in the server cache a blob is LZ4-compressed with a
//! 4-byte little-endian uncompressed-size prefix.

use crate::node::{NodeId, NODE_LEN};
use crate::{Result, StoreError};

const RECORD_FIXED_LEN: usize = NODE_LEN * 4;

/// One ancestor revision of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ancestor {
    pub node: NodeId,
    pub p1: NodeId,
    pub p2: NodeId,
    pub linknode: NodeId,
    /// Source path when this revision was created by a copy or rename.
    pub copy_from: Option<String>,
}

/// Serialize content and ancestry into an uncompressed blob.
pub fn create_blob(content: &[u8], ancestors: &[Ancestor]) -> Vec<u8> {
    let header = format!("{}\0", content.len());
    let mut out = Vec::with_capacity(
        header.len() + content.len() + ancestors.len() * (RECORD_FIXED_LEN + 1),
    );
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(content);
    for ancestor in ancestors {
        out.extend_from_slice(ancestor.node.as_bytes());
        out.extend_from_slice(ancestor.p1.as_bytes());
        out.extend_from_slice(ancestor.p2.as_bytes());
        out.extend_from_slice(ancestor.linknode.as_bytes());
        if let Some(copy_from) = &ancestor.copy_from {
            out.extend_from_slice(copy_from.as_bytes());
        }
        out.push(0);
    }
    out
}

/// Split a blob into its content and ancestry records.
pub fn parse_blob(data: &[u8]) -> Result<(Vec<u8>, Vec<Ancestor>)> {
    let (offset, size) = parse_header(data)?;
    let end = match offset.checked_add(size) {
        Some(end) if end <= data.len() => end,
        _ => {
            return Err(StoreError::InvalidBlob(format!(
                "content length {} exceeds blob length {}",
                size,
                data.len()
            )))
        }
    };
    let content = data[offset..end].to_vec();

    let mut ancestors = Vec::new();
    let mut rest = &data[end..];
    while !rest.is_empty() {
        if rest.len() < RECORD_FIXED_LEN + 1 {
            return Err(StoreError::InvalidBlob("truncated ancestry record".into()));
        }
        let node_at = |i: usize| NodeId::from_slice(&rest[i * NODE_LEN..(i + 1) * NODE_LEN]);
        let (Some(node), Some(p1), Some(p2), Some(linknode)) =
            (node_at(0), node_at(1), node_at(2), node_at(3))
        else {
            return Err(StoreError::InvalidBlob("short node in ancestry record".into()));
        };
        let tail = &rest[RECORD_FIXED_LEN..];
        let nul = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| StoreError::InvalidBlob("unterminated ancestry record".into()))?;
        let copy_from = if nul == 0 {
            None
        } else {
            let name = std::str::from_utf8(&tail[..nul])
                .map_err(|_| StoreError::InvalidBlob("copy source is not utf-8".into()))?;
            Some(name.to_string())
        };
        ancestors.push(Ancestor {
            node,
            p1,
            p2,
            linknode,
            copy_from,
        });
        rest = &tail[nul + 1..];
    }

    Ok((content, ancestors))
}

/// Parse `<decimal>\0`, returning (content offset, content size).
pub fn parse_header(data: &[u8]) -> Result<(usize, usize)> {
    let nul = data
        .iter()
        .take(32)
        .position(|&b| b == 0)
        .ok_or_else(|| StoreError::InvalidBlob("missing size header".into()))?;
    let size = std::str::from_utf8(&data[..nul])
        .ok()
        .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| StoreError::InvalidBlob("malformed size header".into()))?;
    Ok((nul + 1, size))
}

/// Structural check applied by cache validation: the payload must start with
/// a decimal length that is smaller than the payload and fits inside it.
pub fn is_valid_payload(data: &[u8]) -> bool {
    if data.is_empty() {
        return false;
    }
    match parse_header(data) {
        Ok((offset, size)) => offset
            .checked_add(size)
            .is_some_and(|end| end <= data.len()),
        Err(_) => false,
    }
}

/// Size of the content section of a payload, if the header parses.
pub fn content_len(data: &[u8]) -> Option<usize> {
    parse_header(data).ok().map(|(_, size)| size)
}

pub fn compress(payload: &[u8]) -> Vec<u8> {
    lz4_flex::block::compress_prepend_size(payload)
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    Ok(lz4_flex::block::decompress_size_prepended(data)?)
}
