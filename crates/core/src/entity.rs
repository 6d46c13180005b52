//! Entity traits: identity + continuity across state changes.

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

/// Typed soft-delete capability.
///
/// Default reads exclude deleted rows; explicit overrides include them
/// (restore and audit flows). Deleting an order aggregate invalidates the
/// header and its items together — items never outlive their header.
pub trait SoftDeletable {
    fn is_deleted(&self) -> bool;

    /// Mark the entity deleted. Idempotent.
    fn mark_deleted(&mut self);

    /// Bring a deleted entity back. Idempotent.
    fn restore(&mut self);
}
