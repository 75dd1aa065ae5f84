//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Entities live inside an aggregate (e.g. an expense line inside an expense
/// report) and are addressed by an identifier that is only unique within
/// their owner.
pub trait Entity {
    /// Identifier, unique within the owning aggregate.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
