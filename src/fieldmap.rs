//! An insertion-ordered multimap of tag fields.
//!
//! Tag formats disagree on what a field identifier is (a FourCC, a case-insensitive keyword, an
//! ID3 frame id) and on how many fields may share one identifier (several covers, several `COMM`
//! frames). [`FieldMap`] stores fields in a flat vector in insertion order and delegates
//! identifier equality to the identifier type, so each format brings its own comparison rule.

use crate::value::TagValue;
use std::fmt;

/// An identifier a tag format keys its fields by.
pub trait FieldIdent: Clone + fmt::Debug {
    /// Returns whether two identifiers refer to the same field, using the format's comparison
    /// rule.
    fn matches(&self, other: &Self) -> bool;
}

/// Exact comparison, used by ID3 frame ids and Matroska tag names.
impl FieldIdent for String {
    fn matches(&self, other: &Self) -> bool {
        self == other
    }
}

/// Numeric comparison of FourCCs, used by MP4 atoms.
impl FieldIdent for u32 {
    fn matches(&self, other: &Self) -> bool {
        self == other
    }
}

/// A single field of a concrete tag format: an identifier, a value and format-specific extras.
pub trait TagField {
    /// The format's identifier type.
    type Ident: FieldIdent;

    /// Returns the identifier of this field.
    fn ident(&self) -> &Self::Ident;

    /// Returns the value of this field.
    fn value(&self) -> &TagValue;

    /// Replaces the value of this field, leaving the extras untouched.
    fn set_value(&mut self, value: TagValue);
}

/// The multimap holding the fields of a tag, preserving insertion order.
#[derive(Clone, Debug)]
pub struct FieldMap<F: TagField> {
    fields: Vec<F>,
}

impl<F: TagField> Default for FieldMap<F> {
    fn default() -> FieldMap<F> {
        FieldMap::new()
    }
}

impl<F: TagField> FieldMap<F> {
    /// Creates an empty map.
    pub fn new() -> FieldMap<F> {
        FieldMap { fields: Vec::new() }
    }

    /// Returns the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the map holds no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates over all fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &F> {
        self.fields.iter()
    }

    /// Iterates mutably over all fields in insertion order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut F> {
        self.fields.iter_mut()
    }

    /// Returns the first field with the given identifier.
    pub fn first(&self, ident: &F::Ident) -> Option<&F> {
        self.fields.iter().find(|f| f.ident().matches(ident))
    }

    /// Returns the first field with the given identifier for mutation.
    pub fn first_mut(&mut self, ident: &F::Ident) -> Option<&mut F> {
        self.fields.iter_mut().find(|f| f.ident().matches(ident))
    }

    /// Iterates over every field with the given identifier, in insertion order.
    pub fn all<'a>(&'a self, ident: &'a F::Ident) -> impl Iterator<Item = &'a F> {
        self.fields.iter().filter(move |f| f.ident().matches(ident))
    }

    /// Returns whether at least one field with the given identifier exists.
    pub fn contains(&self, ident: &F::Ident) -> bool {
        self.first(ident).is_some()
    }

    /// Returns the value of the first field with the given identifier, or the shared empty
    /// sentinel.
    pub fn value_of(&self, ident: &F::Ident) -> &TagValue {
        self.first(ident)
            .map(|f| f.value())
            .unwrap_or_else(|| TagValue::empty())
    }

    /// Appends a field, keeping any existing fields with the same identifier.
    pub fn insert(&mut self, field: F) {
        self.fields.push(field);
    }

    /// Replaces the value of the first field with the identifier of `field`, or appends `field`
    /// when no such field exists. Extras of an existing field are preserved.
    pub fn set(&mut self, field: F) {
        let ident = field.ident().clone();
        if let Some(existing) = self.first_mut(&ident) {
            existing.set_value(field.value().clone());
        } else {
            self.fields.push(field);
        }
    }

    /// Removes all fields with the given identifier and returns them in insertion order.
    pub fn remove(&mut self, ident: &F::Ident) -> Vec<F> {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.fields.len());
        for field in self.fields.drain(..) {
            if field.ident().matches(ident) {
                removed.push(field);
            } else {
                kept.push(field);
            }
        }
        self.fields = kept;
        removed
    }

    /// Keeps only the fields for which `keep` returns true.
    pub fn retain(&mut self, keep: impl FnMut(&F) -> bool) {
        self.fields.retain(keep);
    }
}

impl<F: TagField> FromIterator<F> for FieldMap<F> {
    fn from_iter<T: IntoIterator<Item = F>>(iter: T) -> FieldMap<F> {
        FieldMap {
            fields: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Key(&'static str);

    impl FieldIdent for Key {
        fn matches(&self, other: &Self) -> bool {
            self.0.eq_ignore_ascii_case(other.0)
        }
    }

    #[derive(Clone, Debug)]
    struct TestField {
        key: Key,
        value: TagValue,
    }

    impl TestField {
        fn new(key: &'static str, value: &str) -> TestField {
            TestField {
                key: Key(key),
                value: TagValue::text(value),
            }
        }
    }

    impl TagField for TestField {
        type Ident = Key;

        fn ident(&self) -> &Key {
            &self.key
        }

        fn value(&self) -> &TagValue {
            &self.value
        }

        fn set_value(&mut self, value: TagValue) {
            self.value = value;
        }
    }

    #[test]
    fn multimap_preserves_order_and_duplicates() {
        let mut map = FieldMap::new();
        map.insert(TestField::new("TITLE", "A"));
        map.insert(TestField::new("ARTIST", "B"));
        map.insert(TestField::new("ARTIST", "C"));
        assert_eq!(3, map.len());
        let artists: Vec<String> = map
            .all(&Key("artist"))
            .map(|f| f.value().to_text().unwrap())
            .collect();
        assert_eq!(vec!["B", "C"], artists);
        assert_eq!("A", map.value_of(&Key("title")).to_text().unwrap());
        assert!(map.value_of(&Key("album")).is_empty());
    }

    #[test]
    fn set_replaces_first_match_only() {
        let mut map = FieldMap::new();
        map.insert(TestField::new("ARTIST", "B"));
        map.insert(TestField::new("ARTIST", "C"));
        map.set(TestField::new("Artist", "D"));
        let artists: Vec<String> = map
            .all(&Key("ARTIST"))
            .map(|f| f.value().to_text().unwrap())
            .collect();
        assert_eq!(vec!["D", "C"], artists);
        map.set(TestField::new("ALBUM", "X"));
        assert_eq!(3, map.len());
    }

    #[test]
    fn remove_returns_all_matches() {
        let mut map = FieldMap::new();
        map.insert(TestField::new("ARTIST", "B"));
        map.insert(TestField::new("TITLE", "A"));
        map.insert(TestField::new("artist", "C"));
        let removed = map.remove(&Key("ARTIST"));
        assert_eq!(2, removed.len());
        assert_eq!(1, map.len());
        assert!(!map.contains(&Key("ARTIST")));
    }
}
