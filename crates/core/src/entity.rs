//! Entity trait: identity + continuity across state changes.

/// Anything addressed by a stable identifier (instances, movements).
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
