//! Canonical wire encoding for `TreeNode`s.
//!
//! Nodes are serialized as a fixed-shape MessagePack array so that two
//! logically identical nodes always produce byte-identical output — the
//! content hash must be a function of meaning, not of field order. Decode
//! re-validates the invariants encode upholds (sorted directory links,
//! sorted metadata keys) rather than trusting the wire.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Link, TreeNode};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("serialization failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("deserialization failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("directory links are not in sorted order")]
    UnsortedLinks,
    #[error("metadata keys are not in sorted order")]
    UnsortedMetadata,
    #[error("mixed directory and file-chunk links in one node")]
    MixedLinkKinds,
    #[error("empty input")]
    Empty,
}

/// A single tagged byte distinguishes a tree node from a raw blob when a
/// caller doesn't already know which it fetched.
const TREE_NODE_TAG: u8 = 0xA1;

#[derive(Serialize, Deserialize)]
struct WireLink {
    hash: [u8; 32],
    is_tree_node: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<[u8; 32]>,
}

impl From<&Link> for WireLink {
    fn from(l: &Link) -> Self {
        WireLink {
            hash: l.hash,
            is_tree_node: l.is_tree_node,
            name: l.name.clone(),
            size: l.size,
            key: l.key,
        }
    }
}

impl From<WireLink> for Link {
    fn from(w: WireLink) -> Self {
        Link {
            hash: w.hash,
            is_tree_node: w.is_tree_node,
            name: w.name,
            size: w.size,
            key: w.key,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireNode {
    links: Vec<WireLink>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Vec<(String, Vec<u8>)>>,
}

fn validate_links(links: &[Link]) -> Result<(), CodecError> {
    let named = links.iter().filter(|l| l.name.is_some()).count();
    if named != 0 && named != links.len() {
        return Err(CodecError::MixedLinkKinds);
    }
    if named > 0 {
        for pair in links.windows(2) {
            let a = pair[0].name.as_deref().unwrap_or_default();
            let b = pair[1].name.as_deref().unwrap_or_default();
            if a >= b {
                return Err(CodecError::UnsortedLinks);
            }
        }
    }
    Ok(())
}

/// Encode a `TreeNode` into its canonical tagged byte form.
pub fn encode_tree_node(node: &TreeNode) -> Result<Vec<u8>, CodecError> {
    validate_links(&node.links)?;

    let metadata = match &node.metadata {
        Some(map) => Some(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        None => None,
    };

    let wire = WireNode {
        links: node.links.iter().map(WireLink::from).collect(),
        total_size: node.total_size,
        metadata,
    };

    let mut out = Vec::with_capacity(64);
    out.push(TREE_NODE_TAG);
    rmp_serde::encode::write(&mut out, &wire)?;
    Ok(out)
}

/// Decode previously-encoded bytes back into a `TreeNode`, re-validating
/// link ordering and metadata key ordering.
pub fn decode_tree_node(bytes: &[u8]) -> Result<TreeNode, CodecError> {
    let body = strip_tag(bytes)?;
    let wire: WireNode = rmp_serde::from_slice(body)?;

    let links: Vec<Link> = wire.links.into_iter().map(Link::from).collect();
    validate_links(&links)?;

    let metadata = match wire.metadata {
        Some(pairs) => {
            for pair in pairs.windows(2) {
                if pair[0].0 >= pair[1].0 {
                    return Err(CodecError::UnsortedMetadata);
                }
            }
            Some(pairs.into_iter().collect())
        }
        None => None,
    };

    Ok(TreeNode {
        links,
        total_size: wire.total_size,
        metadata,
    })
}

/// Best-effort decode used by readers that don't yet know whether a blob
/// is a tree node or raw file data; `None` means "treat as raw bytes".
pub fn try_decode_tree_node(bytes: &[u8]) -> Option<TreeNode> {
    decode_tree_node(bytes).ok()
}

/// Whether `bytes` is tagged as a tree node (without fully decoding it).
pub fn is_tree_node(bytes: &[u8]) -> bool {
    bytes.first() == Some(&TREE_NODE_TAG)
}

/// Coarse classification used by `reader`/CLI code that just needs to
/// branch on shape, not on contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Blob,
    TreeNode,
}

pub fn get_node_type(bytes: &[u8]) -> NodeType {
    if is_tree_node(bytes) {
        NodeType::TreeNode
    } else {
        NodeType::Blob
    }
}

fn strip_tag(bytes: &[u8]) -> Result<&[u8], CodecError> {
    match bytes.split_first() {
        Some((&TREE_NODE_TAG, rest)) => Ok(rest),
        Some(_) => Err(CodecError::Decode(rmp_serde::decode::Error::InvalidMarkerRead(
            std::io::Error::new(std::io::ErrorKind::InvalidData, "not a tree node"),
        ))),
        None => Err(CodecError::Empty),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Link;

    fn link(name: Option<&str>) -> Link {
        Link {
            hash: [1u8; 32],
            is_tree_node: false,
            name: name.map(String::from),
            size: Some(4),
            key: None,
        }
    }

    #[test]
    fn round_trips_blob_style_node() {
        let node = TreeNode {
            links: vec![link(None), link(None)],
            total_size: Some(8),
            metadata: None,
        };
        let bytes = encode_tree_node(&node).unwrap();
        assert!(is_tree_node(&bytes));
        let decoded = decode_tree_node(&bytes).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn round_trips_directory_style_node() {
        let node = TreeNode {
            links: vec![link(Some("a.txt")), link(Some("b.txt"))],
            total_size: None,
            metadata: None,
        };
        let bytes = encode_tree_node(&node).unwrap();
        let decoded = decode_tree_node(&bytes).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn encode_rejects_unsorted_directory_links() {
        let node = TreeNode {
            links: vec![link(Some("b.txt")), link(Some("a.txt"))],
            total_size: None,
            metadata: None,
        };
        assert!(matches!(
            encode_tree_node(&node),
            Err(CodecError::UnsortedLinks)
        ));
    }

    #[test]
    fn encode_rejects_mixed_named_and_unnamed_links() {
        let node = TreeNode {
            links: vec![link(Some("a.txt")), link(None)],
            total_size: None,
            metadata: None,
        };
        assert!(matches!(
            encode_tree_node(&node),
            Err(CodecError::MixedLinkKinds)
        ));
    }

    #[test]
    fn is_tree_node_false_for_raw_bytes() {
        assert!(!is_tree_node(b"just some file bytes"));
        assert_eq!(get_node_type(b"raw"), NodeType::Blob);
    }

    #[test]
    fn decode_rejects_empty_input() {
        assert!(matches!(decode_tree_node(&[]), Err(CodecError::Empty)));
    }

    #[test]
    fn encode_is_deterministic() {
        let node = TreeNode {
            links: vec![link(Some("a")), link(Some("z"))],
            total_size: Some(100),
            metadata: None,
        };
        assert_eq!(encode_tree_node(&node).unwrap(), encode_tree_node(&node).unwrap());
    }
}
