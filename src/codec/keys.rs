//! Textual key codec.
//!
//! Key formats, with `:` as the reserved separator and backslash escaping of
//! `:` and `\` inside identifier components:
//!
//! - vertex:        `v:<space>:<part>:<vid>:<tag>`
//! - forward edge:  `e:<space>:<part>:<src>:<edge_type>:<ranking>:<dst>`
//! - reverse edge:  `r:<space>:<part>:<dst>:<edge_type>:<ranking>:<src>`
//! - index:         `i:<space>:<index>:<value>`
//!
//! All keys for one `(space, part, vid)` share a common prefix, so prefix
//! scans bracketed by [`prefix_upper_bound`] enumerate exactly that vertex's
//! rows. Scan ranges are closed-open.

use crate::error::{KvtError, Result};
use crate::model::{EdgeTypeId, PartitionId, Ranking, SpaceId, TagId, Vid};

pub const VERTEX_PREFIX: char = 'v';
pub const EDGE_PREFIX: char = 'e';
pub const REVERSE_EDGE_PREFIX: char = 'r';
pub const INDEX_PREFIX: char = 'i';
pub const SEPARATOR: char = ':';

const ESCAPE: char = '\\';

/// Decoded vertex key.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexKey {
    pub space: SpaceId,
    pub part: PartitionId,
    pub vid: Vid,
    pub tag: TagId,
}

/// Decoded edge key, always in forward orientation. Reverse-index keys decode
/// into the same struct with `src`/`dst` swapped back into place.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeKeyParts {
    pub space: SpaceId,
    pub part: PartitionId,
    pub src: Vid,
    pub edge_type: EdgeTypeId,
    pub ranking: Ranking,
    pub dst: Vid,
}

pub fn encode_vertex_key(space: SpaceId, part: PartitionId, vid: &Vid, tag: TagId) -> String {
    format!(
        "{VERTEX_PREFIX}{SEPARATOR}{space}{SEPARATOR}{part}{SEPARATOR}{}{SEPARATOR}{tag}",
        escape(&vid.to_key_string())
    )
}

pub fn encode_edge_key(
    space: SpaceId,
    part: PartitionId,
    src: &Vid,
    edge_type: EdgeTypeId,
    ranking: Ranking,
    dst: &Vid,
) -> String {
    format!(
        "{EDGE_PREFIX}{SEPARATOR}{space}{SEPARATOR}{part}{SEPARATOR}{}{SEPARATOR}{edge_type}{SEPARATOR}{ranking}{SEPARATOR}{}",
        escape(&src.to_key_string()),
        escape(&dst.to_key_string())
    )
}

/// The reverse-edge index stores the same edge under its destination's
/// prefix, which makes incoming-edge scans as cheap as outgoing ones.
pub fn encode_reverse_edge_key(
    space: SpaceId,
    part: PartitionId,
    dst: &Vid,
    edge_type: EdgeTypeId,
    ranking: Ranking,
    src: &Vid,
) -> String {
    format!(
        "{REVERSE_EDGE_PREFIX}{SEPARATOR}{space}{SEPARATOR}{part}{SEPARATOR}{}{SEPARATOR}{edge_type}{SEPARATOR}{ranking}{SEPARATOR}{}",
        escape(&dst.to_key_string()),
        escape(&src.to_key_string())
    )
}

pub fn encode_index_key(space: SpaceId, index_id: u32, index_value: &str) -> String {
    format!(
        "{INDEX_PREFIX}{SEPARATOR}{space}{SEPARATOR}{index_id}{SEPARATOR}{}",
        escape(index_value)
    )
}

/// Scan prefix for vertex rows. With a vid, covers every tag of that vertex;
/// without, every vertex in the partition.
pub fn vertex_prefix(space: SpaceId, part: PartitionId, vid: Option<&Vid>) -> String {
    let mut prefix = format!("{VERTEX_PREFIX}{SEPARATOR}{space}{SEPARATOR}{part}{SEPARATOR}");
    if let Some(vid) = vid {
        prefix.push_str(&escape(&vid.to_key_string()));
        prefix.push(SEPARATOR);
    }
    prefix
}

/// Scan prefix for outgoing edges of `src`, optionally narrowed to one edge
/// type.
pub fn edge_prefix(
    space: SpaceId,
    part: PartitionId,
    src: Option<&Vid>,
    edge_type: Option<EdgeTypeId>,
) -> String {
    let mut prefix = format!("{EDGE_PREFIX}{SEPARATOR}{space}{SEPARATOR}{part}{SEPARATOR}");
    if let Some(src) = src {
        prefix.push_str(&escape(&src.to_key_string()));
        prefix.push(SEPARATOR);
        if let Some(edge_type) = edge_type {
            prefix.push_str(&edge_type.to_string());
            prefix.push(SEPARATOR);
        }
    }
    prefix
}

/// Scan prefix for incoming edges of `dst` via the reverse-edge index.
pub fn reverse_edge_prefix(
    space: SpaceId,
    part: PartitionId,
    dst: Option<&Vid>,
    edge_type: Option<EdgeTypeId>,
) -> String {
    let mut prefix = format!("{REVERSE_EDGE_PREFIX}{SEPARATOR}{space}{SEPARATOR}{part}{SEPARATOR}");
    if let Some(dst) = dst {
        prefix.push_str(&escape(&dst.to_key_string()));
        prefix.push(SEPARATOR);
        if let Some(edge_type) = edge_type {
            prefix.push_str(&edge_type.to_string());
            prefix.push(SEPARATOR);
        }
    }
    prefix
}

/// Exclusive upper bound for a prefix scan: the prefix followed by a high
/// sentinel byte.
pub fn prefix_upper_bound(prefix: &str) -> Vec<u8> {
    let mut bound = prefix.as_bytes().to_vec();
    bound.push(0xFF);
    bound
}

pub fn decode_vertex_key(key: &[u8]) -> Result<VertexKey> {
    let tokens = tokenize(key, VERTEX_PREFIX)?;
    if tokens.len() != 5 {
        return Err(malformed("vertex", key));
    }
    Ok(VertexKey {
        space: parse_num(&tokens[1], "vertex", key)?,
        part: parse_num(&tokens[2], "vertex", key)?,
        vid: Vid::parse(&tokens[3]),
        tag: parse_num(&tokens[4], "vertex", key)?,
    })
}

pub fn decode_edge_key(key: &[u8]) -> Result<EdgeKeyParts> {
    let tokens = tokenize(key, EDGE_PREFIX)?;
    if tokens.len() != 7 {
        return Err(malformed("edge", key));
    }
    Ok(EdgeKeyParts {
        space: parse_num(&tokens[1], "edge", key)?,
        part: parse_num(&tokens[2], "edge", key)?,
        src: Vid::parse(&tokens[3]),
        edge_type: parse_num(&tokens[4], "edge", key)?,
        ranking: parse_num(&tokens[5], "edge", key)?,
        dst: Vid::parse(&tokens[6]),
    })
}

pub fn decode_reverse_edge_key(key: &[u8]) -> Result<EdgeKeyParts> {
    let tokens = tokenize(key, REVERSE_EDGE_PREFIX)?;
    if tokens.len() != 7 {
        return Err(malformed("reverse edge", key));
    }
    // Stored as dst first, src last; swap back into forward orientation.
    Ok(EdgeKeyParts {
        space: parse_num(&tokens[1], "reverse edge", key)?,
        part: parse_num(&tokens[2], "reverse edge", key)?,
        dst: Vid::parse(&tokens[3]),
        edge_type: parse_num(&tokens[4], "reverse edge", key)?,
        ranking: parse_num(&tokens[5], "reverse edge", key)?,
        src: Vid::parse(&tokens[6]),
    })
}

fn escape(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for c in component.chars() {
        match c {
            SEPARATOR => out.push_str("\\:"),
            ESCAPE => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out
}

/// Splits a key on unescaped separators, unescaping each component as it
/// goes. An escaped separator inside an identifier stays in its component.
fn split_components(key: &str) -> Vec<String> {
    let mut components = Vec::new();
    let mut current = String::new();
    let mut chars = key.chars();
    while let Some(c) = chars.next() {
        match c {
            ESCAPE => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            SEPARATOR => components.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    components.push(current);
    components
}

fn tokenize(key: &[u8], expected_prefix: char) -> Result<Vec<String>> {
    let text = std::str::from_utf8(key)
        .map_err(|_| KvtError::Corruption(format!("key is not valid utf-8: {:?}", key)))?;
    if !text.starts_with(expected_prefix) {
        return Err(KvtError::Corruption(format!(
            "key '{text}' does not start with '{expected_prefix}'"
        )));
    }
    Ok(split_components(text))
}

fn parse_num<T: std::str::FromStr>(token: &str, kind: &str, key: &[u8]) -> Result<T> {
    token.parse().map_err(|_| malformed(kind, key))
}

fn malformed(kind: &str, key: &[u8]) -> KvtError {
    KvtError::Corruption(format!(
        "malformed {kind} key '{}'",
        String::from_utf8_lossy(key)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_key_roundtrip() {
        let vid = Vid::Str("player100".into());
        let key = encode_vertex_key(1, 0, &vid, 7);
        assert_eq!(key, "v:1:0:player100:7");
        let decoded = decode_vertex_key(key.as_bytes()).unwrap();
        assert_eq!(decoded.space, 1);
        assert_eq!(decoded.part, 0);
        assert_eq!(decoded.vid, vid);
        assert_eq!(decoded.tag, 7);
    }

    #[test]
    fn edge_key_roundtrip() {
        let src = Vid::Int(100);
        let dst = Vid::Int(200);
        let key = encode_edge_key(1, 0, &src, 5, 3, &dst);
        assert_eq!(key, "e:1:0:100:5:3:200");
        let decoded = decode_edge_key(key.as_bytes()).unwrap();
        assert_eq!(decoded.src, src);
        assert_eq!(decoded.edge_type, 5);
        assert_eq!(decoded.ranking, 3);
        assert_eq!(decoded.dst, dst);
    }

    #[test]
    fn reverse_edge_key_decodes_to_forward_orientation() {
        let src = Vid::Str("a".into());
        let dst = Vid::Str("b".into());
        let key = encode_reverse_edge_key(1, 0, &dst, 5, 0, &src);
        assert!(key.starts_with("r:"));
        let decoded = decode_reverse_edge_key(key.as_bytes()).unwrap();
        assert_eq!(decoded.src, src);
        assert_eq!(decoded.dst, dst);
    }

    #[test]
    fn separator_in_vid_is_escaped_and_recovered() {
        let vid = Vid::Str("a:b".into());
        let key = encode_vertex_key(1, 0, &vid, 2);
        assert_eq!(key, "v:1:0:a\\:b:2");
        let decoded = decode_vertex_key(key.as_bytes()).unwrap();
        assert_eq!(decoded.vid, vid);
    }

    #[test]
    fn backslash_in_vid_is_escaped_and_recovered() {
        let vid = Vid::Str("a\\b:c".into());
        let key = encode_edge_key(2, 0, &vid, 1, 0, &Vid::Int(9));
        let decoded = decode_edge_key(key.as_bytes()).unwrap();
        assert_eq!(decoded.src, vid);
        assert_eq!(decoded.dst, Vid::Int(9));
    }

    #[test]
    fn vertex_prefix_brackets_all_tags() {
        let vid = Vid::Int(42);
        let prefix = vertex_prefix(1, 0, Some(&vid));
        for tag in [0u32, 1, 9, 1000] {
            let key = encode_vertex_key(1, 0, &vid, tag);
            assert!(key.starts_with(&prefix), "{key} lacks prefix {prefix}");
            assert!(key.as_bytes() < prefix_upper_bound(&prefix).as_slice());
        }
        // A different vid must fall outside the bracket.
        let other = encode_vertex_key(1, 0, &Vid::Int(43), 0);
        assert!(!other.starts_with(&prefix));
    }

    #[test]
    fn edge_prefix_narrows_by_type() {
        let src = Vid::Int(1);
        let typed = edge_prefix(1, 0, Some(&src), Some(5));
        let untyped = edge_prefix(1, 0, Some(&src), None);
        let key = encode_edge_key(1, 0, &src, 5, 0, &Vid::Int(2));
        assert!(key.starts_with(&typed));
        assert!(key.starts_with(&untyped));
        let other_type = encode_edge_key(1, 0, &src, 6, 0, &Vid::Int(2));
        assert!(!other_type.starts_with(&typed));
        assert!(other_type.starts_with(&untyped));
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert!(decode_vertex_key(b"e:1:0:x:1").is_err());
        assert!(decode_vertex_key(b"v:1:0:x").is_err());
        assert!(decode_edge_key(b"e:1:zero:a:1:0:b").is_err());
    }
}
