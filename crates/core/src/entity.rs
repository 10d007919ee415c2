//! Entity trait: identity that survives state changes.

/// Anything addressed by a stable id in the ledger store (accounts, items,
/// bookings).
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
