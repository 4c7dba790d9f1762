//! Opaque per-agent identity.

use nutype::nutype;
use uuid::Uuid;

/// A unique, 128-bit identity assigned to every agent (model, meta, or observer)
/// registered with a [`crate::server::Server`]. Identifiers are never reused within
/// a run, even across subsumption and dissolution.
#[nutype(
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct Identifier(Uuid);

impl Identifier {
    /// Generates a fresh, random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

impl Default for Identifier {
    fn default() -> Self {
        Self::generate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_identifiers_are_unique() {
        let a = Identifier::generate();
        let b = Identifier::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn identifier_round_trips_through_uuid() {
        let id = Identifier::generate();
        let uuid: Uuid = id.into_inner();
        assert_eq!(Identifier::new(uuid), id);
    }
}
