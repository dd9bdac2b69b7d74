//! Structural Type Tags
//!
//! A type tag is a named capability label with a set of declared supertypes.
//! Discovery matches publications to subscriptions with the one-directional
//! subtype test `provided <: required`.
//!
//! Tags are always held in canonical form: supertypes sorted and
//! deduplicated, recursively. Construction and deserialization both
//! canonicalize, so two tags that declare the same supertypes in a different
//! order (or were serialized in different sessions) compare and hash equal.
//! Decoding rejects tags nested deeper than [`MAX_TAG_DEPTH`].

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;

/// Deepest supertype nesting accepted when decoding a tag
pub const MAX_TAG_DEPTH: usize = 64;

/// Canonical structural type tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TypeTag {
    name: String,
    supertypes: Vec<TypeTag>,
}

/// Wire shape of a tag before canonicalization
#[derive(Deserialize)]
struct RawTypeTag {
    name: String,
    supertypes: Vec<TypeTag>,
}

thread_local! {
    static DECODE_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// One level of tag nesting on the current decoding thread
struct DepthGuard;

impl DepthGuard {
    fn enter<E: de::Error>() -> Result<Self, E> {
        DECODE_DEPTH.with(|depth| {
            let next = depth.get() + 1;
            if next > MAX_TAG_DEPTH {
                return Err(E::custom(format!(
                    "type tag nested deeper than {} levels",
                    MAX_TAG_DEPTH
                )));
            }
            depth.set(next);
            Ok(DepthGuard)
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        DECODE_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

impl<'de> Deserialize<'de> for TypeTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let _level = DepthGuard::enter::<D::Error>()?;
        let raw = RawTypeTag::deserialize(deserializer)?;
        Ok(TypeTag::with_supertypes(raw.name, raw.supertypes))
    }
}

impl TypeTag {
    /// Create a root tag with no supertypes
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            supertypes: Vec::new(),
        }
    }

    /// Create a tag declaring the given supertypes
    pub fn with_supertypes(name: impl Into<String>, supertypes: impl IntoIterator<Item = TypeTag>) -> Self {
        let mut supertypes: Vec<TypeTag> = supertypes.into_iter().collect();
        supertypes.sort();
        supertypes.dedup();
        Self {
            name: name.into(),
            supertypes,
        }
    }

    /// Builder-style: add one more declared supertype
    pub fn extending(self, supertype: TypeTag) -> Self {
        let mut supertypes = self.supertypes;
        supertypes.push(supertype);
        Self::with_supertypes(self.name, supertypes)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn supertypes(&self) -> &[TypeTag] {
        &self.supertypes
    }

    /// `self <: other`
    ///
    /// A tag is a subtype of itself and of every tag reachable through its
    /// declared supertypes. The relation is not symmetric.
    pub fn is_subtype_of(&self, other: &TypeTag) -> bool {
        self == other || self.supertypes.iter().any(|s| s.is_subtype_of(other))
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn device() -> TypeTag {
        TypeTag::new("Device")
    }

    fn sensor() -> TypeTag {
        TypeTag::new("Sensor").extending(device())
    }

    #[test]
    fn test_subtype_is_one_directional() {
        assert!(sensor().is_subtype_of(&device()));
        assert!(!device().is_subtype_of(&sensor()));
    }

    #[test]
    fn test_tag_is_subtype_of_itself() {
        assert!(device().is_subtype_of(&device()));
        assert!(sensor().is_subtype_of(&sensor()));
    }

    #[test]
    fn test_transitive_supertypes() {
        let thermometer = TypeTag::new("Thermometer").extending(sensor());
        assert!(thermometer.is_subtype_of(&device()));
        assert!(!TypeTag::new("Printer").is_subtype_of(&device()));
    }

    #[test]
    fn test_deserialization_canonicalizes_supertype_order() {
        let json = r#"{"name":"Camera","supertypes":[
            {"name":"Sensor","supertypes":[]},
            {"name":"Device","supertypes":[]},
            {"name":"Device","supertypes":[]}]}"#;
        let decoded: TypeTag = serde_json::from_str(json).unwrap();
        let built = TypeTag::with_supertypes("Camera", [TypeTag::new("Device"), TypeTag::new("Sensor")]);

        assert_eq!(decoded, built);
        assert_eq!(decoded.supertypes().len(), 2);
    }

    fn chain(depth: usize) -> TypeTag {
        (1..depth).fold(TypeTag::new("L0"), |tag, level| TypeTag::new(format!("L{}", level)).extending(tag))
    }

    #[test]
    fn test_decoding_accepts_nesting_up_to_limit() {
        let tag = chain(MAX_TAG_DEPTH);
        let bytes = bincode::serialize(&tag).unwrap();
        let decoded: TypeTag = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, tag);
        assert!(decoded.is_subtype_of(&TypeTag::new("L0")));
    }

    #[test]
    fn test_decoding_rejects_deeper_nesting() {
        let bytes = bincode::serialize(&chain(MAX_TAG_DEPTH + 1)).unwrap();
        let err = bincode::deserialize::<TypeTag>(&bytes).unwrap_err();
        assert!(err.to_string().contains("nested deeper"));

        // the failed decode leaves no depth behind
        let ok = bincode::serialize(&chain(MAX_TAG_DEPTH)).unwrap();
        assert!(bincode::deserialize::<TypeTag>(&ok).is_ok());
    }

    fn arb_names() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec("[A-Z][a-z]{1,6}", 0..6)
    }

    proptest! {
        #[test]
        fn prop_declaration_order_does_not_matter(names in arb_names()) {
            let forward = TypeTag::with_supertypes("T", names.iter().map(TypeTag::new));
            let backward = TypeTag::with_supertypes("T", names.iter().rev().map(TypeTag::new));
            prop_assert_eq!(&forward, &backward);

            let bytes = bincode::serialize(&backward).unwrap();
            let decoded: TypeTag = bincode::deserialize(&bytes).unwrap();
            prop_assert_eq!(forward, decoded);
        }

        #[test]
        fn prop_every_declared_supertype_matches(names in arb_names()) {
            let tag = TypeTag::with_supertypes("Leaf", names.iter().map(TypeTag::new));
            for name in &names {
                prop_assert!(tag.is_subtype_of(&TypeTag::new(name.clone())));
            }
        }
    }
}
