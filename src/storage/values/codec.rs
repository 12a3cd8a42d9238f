#![forbid(unsafe_code)]
//! Byte encodings of dictionary entries.
//!
//! ```text
//! namespace  0x0 [namespace UTF-8]
//! IRI        0x1 [namespace id: i32][local name UTF-8]
//! blank node 0x2 [label UTF-8]
//! literal    0x3 [datatype id: i32][language length: u8][language][label]
//! ```

use crate::primitives::bytes::ord::{get_i32_be, put_i32_be};
use crate::types::{Result, StoreError, ValueId};

pub(super) const NAMESPACE_TAG: u8 = 0x0;
pub(super) const IRI_TAG: u8 = 0x1;
pub(super) const BNODE_TAG: u8 = 0x2;
pub(super) const LITERAL_TAG: u8 = 0x3;

/// Decoded dictionary entry with references still unresolved.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum Entry<'a> {
    Namespace(&'a str),
    Iri { namespace: ValueId, local: &'a str },
    BNode(&'a str),
    Literal {
        datatype: ValueId,
        language: Option<&'a str>,
        label: &'a str,
    },
}

pub(super) fn encode_namespace(ns: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + ns.len());
    out.push(NAMESPACE_TAG);
    out.extend_from_slice(ns.as_bytes());
    out
}

pub(super) fn encode_iri(namespace: ValueId, local: &str) -> Vec<u8> {
    let mut out = vec![0u8; 5];
    out[0] = IRI_TAG;
    put_i32_be(&mut out[1..5], namespace.0);
    out.extend_from_slice(local.as_bytes());
    out
}

pub(super) fn encode_bnode(id: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + id.len());
    out.push(BNODE_TAG);
    out.extend_from_slice(id.as_bytes());
    out
}

pub(super) fn encode_literal(datatype: ValueId, language: Option<&str>, label: &str) -> Result<Vec<u8>> {
    let lang = language.unwrap_or("");
    let lang_len = u8::try_from(lang.len())
        .map_err(|_| StoreError::Invalid("language tag longer than 255 bytes"))?;
    let mut out = vec![0u8; 6];
    out[0] = LITERAL_TAG;
    put_i32_be(&mut out[1..5], datatype.0);
    out[5] = lang_len;
    out.extend_from_slice(lang.as_bytes());
    out.extend_from_slice(label.as_bytes());
    Ok(out)
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|_| StoreError::Corruption("value is not valid UTF-8"))
}

pub(super) fn decode(data: &[u8]) -> Result<Entry<'_>> {
    let (&tag, body) = data
        .split_first()
        .ok_or(StoreError::Corruption("empty value record"))?;
    match tag {
        NAMESPACE_TAG => Ok(Entry::Namespace(utf8(body)?)),
        IRI_TAG => {
            if body.len() < 4 {
                return Err(StoreError::Corruption("IRI record truncated"));
            }
            Ok(Entry::Iri {
                namespace: ValueId(get_i32_be(&body[0..4])),
                local: utf8(&body[4..])?,
            })
        }
        BNODE_TAG => Ok(Entry::BNode(utf8(body)?)),
        LITERAL_TAG => {
            if body.len() < 5 {
                return Err(StoreError::Corruption("literal record truncated"));
            }
            let datatype = ValueId(get_i32_be(&body[0..4]));
            let lang_len = body[4] as usize;
            if body.len() < 5 + lang_len {
                return Err(StoreError::Corruption("literal language truncated"));
            }
            let language = (lang_len > 0)
                .then(|| utf8(&body[5..5 + lang_len]))
                .transpose()?;
            Ok(Entry::Literal {
                datatype,
                language,
                label: utf8(&body[5 + lang_len..])?,
            })
        }
        _ => Err(StoreError::Corruption("unknown value record tag")),
    }
}

/// Hash used by the `values.hash` index.
pub(super) fn hash32(data: &[u8]) -> u32 {
    xxhash_rust::xxh64::xxh64(data, 0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_layout_is_stable() -> Result<()> {
        let raw = encode_literal(ValueId(7), Some("en"), "chat")?;
        assert_eq!(&raw[..8], &[LITERAL_TAG, 0, 0, 0, 7, 2, b'e', b'n']);
        assert_eq!(
            decode(&raw)?,
            Entry::Literal {
                datatype: ValueId(7),
                language: Some("en"),
                label: "chat"
            }
        );
        Ok(())
    }

    #[test]
    fn iri_and_namespace_decode() -> Result<()> {
        assert_eq!(
            decode(&encode_iri(ValueId(3), "name"))?,
            Entry::Iri {
                namespace: ValueId(3),
                local: "name"
            }
        );
        assert_eq!(
            decode(&encode_namespace("http://x/"))?,
            Entry::Namespace("http://x/")
        );
        assert_eq!(decode(&encode_bnode("n1"))?, Entry::BNode("n1"));
        Ok(())
    }

    #[test]
    fn garbage_is_corruption() {
        assert!(matches!(decode(&[]), Err(StoreError::Corruption(_))));
        assert!(matches!(decode(&[9, 1]), Err(StoreError::Corruption(_))));
        assert!(matches!(decode(&[IRI_TAG, 0]), Err(StoreError::Corruption(_))));
        assert!(encode_literal(ValueId(0), Some(&"x".repeat(300)), "l").is_err());
    }
}
