//! Core data types: hashes, content identifiers, links, and tree nodes.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// A 32-byte SHA-256 digest.
pub type Hash = [u8; 32];

/// A 32-byte CHK symmetric key.
pub type EncryptionKey = [u8; 32];

/// Encode a hash as lowercase hex.
pub fn to_hex(hash: &Hash) -> String {
    hex::encode(hash)
}

/// Decode a lowercase (or mixed-case) hex string into a 32-byte hash.
pub fn from_hex(s: &str) -> Result<Hash, hex::FromHexError> {
    let bytes = hex::decode(s)?;
    bytes
        .try_into()
        .map_err(|_| hex::FromHexError::InvalidStringLength)
}

/// Constant-time-irrelevant equality helper (hashes are public values).
pub fn hash_equals(a: &Hash, b: &Hash) -> bool {
    a == b
}

/// Error parsing a `Cid` from its hex wire form.
#[derive(Debug, Error)]
pub enum CidParseError {
    #[error("invalid hash hex: {0}")]
    Hash(#[from] hex::FromHexError),
    #[error("invalid key hex")]
    Key,
}

/// Content identifier: a hash plus an optional CHK decryption key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cid {
    pub hash: Hash,
    pub key: Option<EncryptionKey>,
}

impl Cid {
    pub fn public(hash: Hash) -> Self {
        Self { hash, key: None }
    }

    pub fn encrypted(hash: Hash, key: EncryptionKey) -> Self {
        Self {
            hash,
            key: Some(key),
        }
    }

    /// Parse `<hex>` or `<hex>:<keyhex>`.
    pub fn parse(s: &str) -> Result<Self, CidParseError> {
        if let Some((hash_part, key_part)) = s.split_once(':') {
            let hash = from_hex(hash_part)?;
            let key_bytes = hex::decode(key_part).map_err(|_| CidParseError::Key)?;
            let key: EncryptionKey = key_bytes.try_into().map_err(|_| CidParseError::Key)?;
            Ok(Self {
                hash,
                key: Some(key),
            })
        } else {
            Ok(Self {
                hash: from_hex(s)?,
                key: None,
            })
        }
    }

    pub fn to_hex_string(&self) -> String {
        match &self.key {
            Some(key) => format!("{}:{}", to_hex(&self.hash), hex::encode(key)),
            None => to_hex(&self.hash),
        }
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex_string())
    }
}

/// Whether a link points at a raw blob or a wrapped tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Blob,
    TreeNode,
}

/// A reference to a child node, carried inside a parent `TreeNode`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub hash: Hash,
    pub is_tree_node: bool,
    pub name: Option<String>,
    pub size: Option<u64>,
    pub key: Option<EncryptionKey>,
}

impl Link {
    pub fn link_type(&self) -> LinkType {
        if self.is_tree_node {
            LinkType::TreeNode
        } else {
            LinkType::Blob
        }
    }

    pub fn cid(&self) -> Cid {
        Cid {
            hash: self.hash,
            key: self.key,
        }
    }
}

/// A tree node: an ordered sequence of links plus optional size/metadata.
///
/// Directory links carry `name`; file-chunk links don't. `links` must stay
/// in strict lexicographic order by name for directories — callers build
/// nodes through `hashtree_core::builder`, which upholds this; `codec`
/// rejects a decode that violates it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TreeNode {
    pub links: Vec<Link>,
    pub total_size: Option<u64>,
    pub metadata: Option<BTreeMap<String, Vec<u8>>>,
}

impl TreeNode {
    /// A tree node is a directory iff any link carries a name. By
    /// construction either all links have names or none do.
    pub fn is_directory(&self) -> bool {
        self.links.iter().any(|l| l.name.is_some())
    }
}

/// One entry returned by `list_directory`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub cid: Cid,
    pub size: Option<u64>,
    pub is_tree: bool,
}

impl DirEntry {
    pub fn from_cid(name: impl Into<String>, cid: &Cid) -> Self {
        Self {
            name: name.into(),
            cid: *cid,
            size: None,
            is_tree: false,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn as_tree(mut self) -> Self {
        self.is_tree = true;
        self
    }

    pub(crate) fn to_link(&self) -> Link {
        Link {
            hash: self.cid.hash,
            is_tree_node: self.is_tree,
            name: Some(self.name.clone()),
            size: self.size,
            key: self.cid.key,
        }
    }
}

/// Result of a `put_file`/`put_directory` call: the resulting CID and the
/// logical (decrypted, pre-chunking) byte size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutResult {
    pub cid: Cid,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cid_parse_roundtrip_no_key() {
        let hash = [0x11u8; 32];
        let cid = Cid::public(hash);
        let s = cid.to_hex_string();
        let parsed = Cid::parse(&s).unwrap();
        assert_eq!(parsed, cid);
    }

    #[test]
    fn cid_parse_roundtrip_with_key() {
        let cid = Cid::encrypted([0x22u8; 32], [0x33u8; 32]);
        let s = cid.to_hex_string();
        let parsed = Cid::parse(&s).unwrap();
        assert_eq!(parsed, cid);
    }

    #[test]
    fn cid_parse_rejects_bad_hex() {
        assert!(Cid::parse("not-hex").is_err());
    }

    #[test]
    fn tree_node_is_directory_detection() {
        let mut node = TreeNode::default();
        assert!(!node.is_directory());
        node.links.push(Link {
            hash: [0u8; 32],
            is_tree_node: false,
            name: Some("a".into()),
            size: None,
            key: None,
        });
        assert!(node.is_directory());
    }
}
