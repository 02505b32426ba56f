use std::{
    collections::BTreeMap,
    fmt::{Debug, Display, Formatter},
};

use serde_json::value::RawValue;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{
    common::ARCHIVE_LOCATION_KEY,
    error::{Error, Result},
};

/// The part of an Argo task template the key deriver needs to look at. Every field other than
/// `archiveLocation` is kept as the exact json text it arrived as.
struct TaskTemplate<'a> {
    archive_location: Option<&'a RawValue>,
    fields: BTreeMap<String, &'a RawValue>,
}

impl<'a> TaskTemplate<'a> {
    /// A repeated key keeps its last value.
    fn parse(template: &'a str) -> serde_json::Result<Self> {
        let mut fields: BTreeMap<String, &RawValue> = serde_json::from_str(template)?;
        let archive_location = fields.remove(ARCHIVE_LOCATION_KEY);
        Ok(Self {
            archive_location,
            fields,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheFingerprint {
    hash: [u8; 32],
}

impl CacheFingerprint {
    /// lowercase hex of the full 256 bit digest
    pub fn to_hex(&self) -> String {
        self.hash.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// convert to hex the first 64 bits of this hash
    pub fn shorthex(&self) -> String {
        self.hash
            .iter()
            .map(|b| format!("{:02x}", b))
            .take(8)
            .collect()
    }
}

impl Display for CacheFingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Debug for CacheFingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "CacheFingerprint({})", self.shorthex())
    }
}

/// Derive the execution cache key of a workflow template.
///
/// The template must be a json object. Its `archiveLocation` field changes on every run, so it
/// is dropped before hashing. The remainder is serialized with object keys sorted at every depth,
/// which makes the key independent of the order fields were emitted in. Number literals are hashed
/// exactly as written.
pub fn derive_key(template: &str) -> Result<CacheFingerprint> {
    let parsed = TaskTemplate::parse(template).map_err(Error::MalformedTemplate)?;
    if let Some(location) = parsed.archive_location {
        debug!(%location, "dropping {} from template before hashing", ARCHIVE_LOCATION_KEY);
    }

    let mut canonical = Vec::with_capacity(template.len());
    write_object(&parsed.fields, &mut canonical).map_err(Error::MalformedTemplate)?;

    Ok(CacheFingerprint {
        hash: Sha256::digest(canonical).into(),
    })
}

/// Write compact json with every object's keys in sorted order. serde_json keeps insertion order
/// when the `preserve_order` feature is enabled anywhere in the dependency graph, so its own map
/// type can't be relied on. Numbers are copied verbatim.
fn write_canonical(value: &RawValue, out: &mut Vec<u8>) -> serde_json::Result<()> {
    let text = value.get();
    match text.as_bytes().first() {
        Some(b'{') => {
            let fields: BTreeMap<String, &RawValue> = serde_json::from_str(text)?;
            write_object(&fields, out)
        }
        Some(b'[') => {
            let items: Vec<&RawValue> = serde_json::from_str(text)?;
            out.push(b'[');
            for (i, item) in items.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
            Ok(())
        }
        // re-escape so that equal strings hash equally however they were escaped
        Some(b'"') => serde_json::to_writer(out, &serde_json::from_str::<String>(text)?),
        _ => {
            out.extend_from_slice(text.as_bytes());
            Ok(())
        }
    }
}

fn write_object(fields: &BTreeMap<String, &RawValue>, out: &mut Vec<u8>) -> serde_json::Result<()> {
    out.push(b'{');
    for (i, (key, value)) in fields.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        serde_json::to_writer(&mut *out, key)?;
        out.push(b':');
        write_canonical(value, out)?;
    }
    out.push(b'}');
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"{
        "name": "train",
        "container": {"image": "python:3.7", "command": ["python", "train.py"]},
        "outputs": {"artifacts": [{"name": "model", "path": "/tmp/model"}]},
        "archiveLocation": {"archiveLogs": true, "s3": {"key": "run-123"}}
    }"#;

    #[test]
    fn deterministic() {
        let a = derive_key(TEMPLATE).unwrap();
        let b = derive_key(TEMPLATE).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_hex().len(), 64);
        assert!(a
            .to_hex()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn archive_location_does_not_affect_key() {
        let run_123 = r#"{"steps":[["a"],["b"]],"archiveLocation":{"key":"run-123"}}"#;
        let run_456 = r#"{"steps":[["a"],["b"]],"archiveLocation":{"key":"run-456"}}"#;
        let absent = r#"{"steps":[["a"],["b"]]}"#;
        assert_eq!(derive_key(run_123).unwrap(), derive_key(run_456).unwrap());
        assert_eq!(derive_key(run_123).unwrap(), derive_key(absent).unwrap());
    }

    #[test]
    fn other_fields_change_key() {
        let base = derive_key(r#"{"name":"train","container":{"image":"python:3.7"}}"#).unwrap();
        for other in [
            r#"{"name":"train","container":{"image":"python:3.8"}}"#,
            r#"{"name":"eval","container":{"image":"python:3.7"}}"#,
            r#"{"name":"train","container":{"image":"python:3.7"},"retries":1}"#,
            r#"{"name":"train","container":{"image":"python:3.7","archiveLocation":{}}}"#,
        ] {
            assert_ne!(base, derive_key(other).unwrap(), "{other}");
        }
    }

    #[test]
    fn numbers_are_hashed_as_written() {
        for (a, b) in [
            (
                r#"{"retries":18446744073709551616}"#,
                r#"{"retries":18446744073709551617}"#,
            ),
            (r#"{"ratio":0.1}"#, r#"{"ratio":0.10000000000000000001}"#),
            (
                r#"{"args":[{"n":-9223372036854775809}]}"#,
                r#"{"args":[{"n":-9223372036854775810}]}"#,
            ),
        ] {
            assert_ne!(derive_key(a).unwrap(), derive_key(b).unwrap(), "{a} vs {b}");
        }

        let expected: [u8; 32] = Sha256::digest(br#"{"x":1.50e3,"y":[18446744073709551616]}"#).into();
        let key = derive_key(r#"{"y": [18446744073709551616], "x": 1.50e3}"#).unwrap();
        assert_eq!(key, CacheFingerprint { hash: expected });
    }

    #[test]
    fn repeated_archive_location_is_dropped() {
        let repeated = r#"{"name":"train","archiveLocation":{"key":"a"},"archiveLocation":{"key":"b"}}"#;
        let absent = r#"{"name":"train"}"#;
        assert_eq!(derive_key(repeated).unwrap(), derive_key(absent).unwrap());

        let last_wins = r#"{"name":"train","name":"eval"}"#;
        assert_eq!(
            derive_key(last_wins).unwrap(),
            derive_key(r#"{"name":"eval"}"#).unwrap()
        );
    }

    #[test]
    fn string_escapes_are_normalized() {
        assert_eq!(
            derive_key(r#"{"name":"tr\u0061in"}"#).unwrap(),
            derive_key(r#"{"name":"train"}"#).unwrap()
        );
    }

    #[test]
    fn key_order_is_irrelevant() {
        let a = r#"{"b":1,"a":{"y":[{"q":1,"p":2}],"x":"s"}}"#;
        let b = r#"{"a":{"x":"s","y":[{"p":2,"q":1}]},"b":1}"#;
        assert_eq!(derive_key(a).unwrap(), derive_key(b).unwrap());
    }

    #[test]
    fn hashes_sorted_compact_json() {
        let expected: [u8; 32] = Sha256::digest(br#"{"a":[1,2],"b":"x"}"#).into();
        let key = derive_key(r#"{ "b": "x", "a": [1, 2], "archiveLocation": null }"#).unwrap();
        assert_eq!(key, CacheFingerprint { hash: expected });
    }

    #[test]
    fn malformed_templates() {
        for bad in ["", "not json", "{\"a\":", "[1,2,3]", "\"string\"", "42"] {
            assert!(
                matches!(derive_key(bad), Err(Error::MalformedTemplate(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn debug_is_short() {
        let key = derive_key("{}").unwrap();
        assert_eq!(format!("{:?}", key), format!("CacheFingerprint({})", key.shorthex()));
        assert_eq!(key.to_string(), key.to_hex());
    }
}
