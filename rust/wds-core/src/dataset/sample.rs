// rust/wds-core/src/dataset/sample.rs

use std::collections::btree_map;
use std::collections::BTreeMap;

use bytes::Bytes;

/// Reserved field holding the basename shared by every member of a sample.
pub const KEY_FIELD: &str = "__key__";

/// A training sample: the payloads of all files sharing one basename, keyed
/// by extension.
///
/// A file `train/0001.jpg` contributes the field `"jpg"` to the sample whose
/// key is `train/0001`; a file without an extension contributes the field
/// `""`. Fields are kept in sorted order and the reserved [`KEY_FIELD`]
/// always maps to the key itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    key: String,
    fields: BTreeMap<String, Bytes>,
}

impl Sample {
    /// Creates an empty sample for `key`.
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        let mut fields = BTreeMap::new();
        fields.insert(KEY_FIELD.to_string(), Bytes::from(key.clone()));
        Self { key, fields }
    }

    /// The shared basename of the sample's members.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Looks up a field by extension. A leading `.` is ignored, so `"jpg"`
    /// and `".jpg"` name the same field.
    pub fn get(&self, field: &str) -> Option<&Bytes> {
        self.fields.get(normalize(field))
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(normalize(field))
    }

    /// Stores a member payload, returning the one it replaced.
    ///
    /// The reserved key field cannot be overwritten.
    pub fn insert(&mut self, extension: impl Into<String>, payload: Bytes) -> Option<Bytes> {
        let extension = extension.into();
        if extension == KEY_FIELD {
            tracing::warn!("Ignoring member '{}' of sample '{}': reserved field", extension, self.key);
            return None;
        }
        self.fields.insert(extension, payload)
    }

    /// Number of members, not counting the key field.
    pub fn len(&self) -> usize {
        self.fields.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Member extensions in sorted order, without the key field.
    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.fields
            .keys()
            .map(String::as_str)
            .filter(|field| *field != KEY_FIELD)
    }

    /// All fields, including the key field.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Bytes> {
        self.fields.iter()
    }

    /// Total payload bytes of all members.
    pub fn payload_size(&self) -> usize {
        self.fields
            .iter()
            .filter(|(field, _)| field.as_str() != KEY_FIELD)
            .map(|(_, payload)| payload.len())
            .sum()
    }

    pub fn into_fields(self) -> BTreeMap<String, Bytes> {
        self.fields
    }
}

fn normalize(field: &str) -> &str {
    field.strip_prefix('.').unwrap_or(field)
}

impl<'a> IntoIterator for &'a Sample {
    type Item = (&'a String, &'a Bytes);
    type IntoIter = btree_map::Iter<'a, String, Bytes>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
