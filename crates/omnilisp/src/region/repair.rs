//! Escape repair policy selection (spec §4.R): at a store of a younger-
//! region value into an older-region container, the value is either
//! graph-copied into the destination region (`Transmigrate`) or left in
//! place with the source region's `external_rc` bumped (`Retain`). The
//! selection must be a pure function of byte count and region state at
//! the store site (Testable Property 7), never of insertion order or
//! allocation history.

use crate::{cfg::OwnershipClass, context::CompileOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStrategy {
    /// Graph-copy the value into the destination region. Pointers outside
    /// the source region are roots (external-root rule) and are not rewritten.
    Transmigrate,
    /// Increment the source region's `external_rc`; a matching
    /// `region_release_internal` runs when the escape handle dies.
    Retain,
}

/// Below `options.transmigrate_threshold` bytes, copy; at or above it,
/// retain — unless the variable's ownership class makes retaining unsafe.
/// A `Transferred` value no longer has a source region whose refcount
/// means anything at the store site, so it is always copied regardless
/// of size.
#[must_use]
pub fn select(bytes_allocated: usize, ownership: OwnershipClass, options: &CompileOptions) -> RepairStrategy {
    if ownership == OwnershipClass::Transferred {
        return RepairStrategy::Transmigrate;
    }
    if bytes_allocated < options.transmigrate_threshold {
        RepairStrategy::Transmigrate
    } else {
        RepairStrategy::Retain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_regions_transmigrate() {
        let options = CompileOptions::default();
        assert_eq!(select(64, OwnershipClass::Local, &options), RepairStrategy::Transmigrate);
    }

    #[test]
    fn large_regions_retain() {
        let options = CompileOptions::default();
        assert_eq!(select(1 << 20, OwnershipClass::Local, &options), RepairStrategy::Retain);
    }

    #[test]
    fn transferred_values_always_transmigrate() {
        let options = CompileOptions::default();
        assert_eq!(select(1 << 20, OwnershipClass::Transferred, &options), RepairStrategy::Transmigrate);
    }

    #[test]
    fn selection_is_deterministic_given_the_same_inputs() {
        let options = CompileOptions::default();
        let a = select(4096, OwnershipClass::Shared, &options);
        let b = select(4096, OwnershipClass::Shared, &options);
        assert_eq!(a, b);
    }
}
