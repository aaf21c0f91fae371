//! Unit operation models for household wastewater trains.
//!
//! This module provides the unit operations organized as individual files:
//!
//! - **MembraneBioreactor**: biological COD removal, optional nutrient removal
//!   and membrane solids capture (1 inlet, effluent + sludge)
//! - **AnaerobicDigester**: COD removal converted to biogas (1 inlet,
//!   digestate + biogas)
//! - **Mixer**: combines several inlets component by component
//! - **Splitter**: divides one inlet by fixed split fractions
//! - **influent**: per-capita greywater and blackwater generators
//!
//! The MBR and the digester share one biological step: a fraction of the
//! biodegradable COD pool (`S_F` + `X_B_Subst` by default) is removed, and the
//! removal is split across the pool members in proportion to their mass. See
//! [`BiodegradablePool`].
//!
//! ## Example
//!
//! ```
//! use sanitrain::{library, Stream};
//! use sanitrain::models::BiodegradablePool;
//!
//! let components = library::household();
//! let stream = Stream::with_masses("s", &components, &[("S_F", 300.0), ("X_B_Subst", 700.0)]);
//!
//! let pool = BiodegradablePool::from_stream(&stream, &["S_F", "X_B_Subst"]);
//! assert_eq!(pool.total(), 1000.0);
//!
//! let shares: Vec<f64> = pool.split(600.0).into_iter().map(|(_, d)| d).collect();
//! assert_eq!(shares, vec![180.0, 420.0]);
//! ```

use crate::{Stream, UnitError};

pub mod digester;
pub mod influent;
pub mod mbr;
pub mod mixer;
pub mod splitter;

pub use digester::{AnaerobicDigester, BiogasMode, DigesterConfig, DigesterPerformance};
pub use influent::{PerCapitaLoads, blackwater, greywater, influent_from_concentrations};
pub use mbr::{MbrConfig, MbrPerformance, MembraneBioreactor};
pub use mixer::Mixer;
pub use splitter::Splitter;

/// Soluble fermentable substrate.
pub const SOLUBLE_SUBSTRATE: &str = "S_F";
/// Particulate biodegradable substrate.
pub const PARTICULATE_SUBSTRATE: &str = "X_B_Subst";
/// Ammonium (measured as N).
pub const AMMONIUM: &str = "S_NH4";
/// Phosphate (measured as P).
pub const PHOSPHATE: &str = "S_PO4";
/// Methane.
pub const METHANE: &str = "CH4";
/// Carbon dioxide.
pub const CARBON_DIOXIDE: &str = "CO2";
/// Water.
pub const WATER: &str = "H2O";

/// Default members of the biodegradable COD pool.
pub const BIODEGRADABLE_COD: [&str; 2] = [SOLUBLE_SUBSTRATE, PARTICULATE_SUBSTRATE];

pub(crate) fn default_biodegradable_ids() -> Vec<String> {
    BIODEGRADABLE_COD.iter().map(|s| s.to_string()).collect()
}

/// Rejects a component id listed more than once.
pub(crate) fn check_distinct_ids(unit: &str, name: &str, ids: &[String]) -> Result<(), UnitError> {
    for (i, id) in ids.iter().enumerate() {
        if ids[..i].contains(id) {
            return Err(UnitError::InvalidConfiguration {
                unit: unit.to_string(),
                reason: format!("{} lists '{}' more than once", name, id),
            });
        }
    }
    Ok(())
}

/// The biodegradable COD bins of a stream that exist in its registry.
#[derive(Debug, Clone, PartialEq)]
pub struct BiodegradablePool {
    /// (registry index, mass flow [g COD/h]) for each registered member
    entries: Vec<(usize, f64)>,
    total: f64,
}

impl BiodegradablePool {
    /// Collects the pool members of `stream`, skipping unregistered ids.
    pub fn from_stream<S: AsRef<str>>(stream: &Stream, ids: &[S]) -> Self {
        let components = stream.components();
        let entries: Vec<(usize, f64)> = ids
            .iter()
            .filter_map(|id| components.index_of(id.as_ref()))
            .map(|i| (i, stream.mass_at(i)))
            .collect();
        let total = entries.iter().map(|(_, m)| m).sum();
        BiodegradablePool { entries, total }
    }

    /// Total biodegradable COD [g/h].
    pub fn total(&self) -> f64 {
        self.total
    }

    /// Number of pool members present in the registry.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no pool member is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Splits `removed` across the members in proportion to their mass.
    ///
    /// Returns `(registry index, share)` pairs; the shares sum to `removed`.
    /// An empty or non-positive pool yields no shares.
    pub fn split(&self, removed: f64) -> Vec<(usize, f64)> {
        if self.total <= 0.0 {
            return Vec::new();
        }
        self.entries.iter().map(|&(i, m)| (i, removed * m / self.total)).collect()
    }
}

/// Borrows the two outlets of a 1-in/2-out unit.
///
/// Callers check the port count first.
pub(crate) fn outlet_pair(outs: &mut [Stream]) -> (&mut Stream, &mut Stream) {
    let (first, rest) = outs.split_at_mut(1);
    (&mut first[0], &mut rest[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library;

    #[test]
    fn test_pool_skips_unregistered() {
        let components = library::household();
        let stream = Stream::with_masses("s", &components, &[("S_F", 10.0)]);
        let pool = BiodegradablePool::from_stream(&stream, &["S_F", "X_missing"]);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.total(), 10.0);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let ids = vec!["S_F".to_string(), "X_B_Subst".to_string(), "S_F".to_string()];
        let err = check_distinct_ids("U1", "biodegradable_ids", &ids).unwrap_err();
        assert!(err.to_string().contains("'S_F' more than once"));
        check_distinct_ids("U1", "biodegradable_ids", &default_biodegradable_ids()).unwrap();
    }

    #[test]
    fn test_split_sums_to_removed() {
        let components = library::household();
        let stream =
            Stream::with_masses("s", &components, &[("S_F", 123.4), ("X_B_Subst", 567.8)]);
        let pool = BiodegradablePool::from_stream(&stream, &BIODEGRADABLE_COD);
        let removed = 0.37 * pool.total();
        let shares = pool.split(removed);
        let sum: f64 = shares.iter().map(|(_, d)| d).sum();
        assert!((sum - removed).abs() < 1e-9);
        for (i, d) in shares {
            assert!((d - removed * stream.mass_at(i) / pool.total()).abs() < 1e-12);
        }
    }

    #[test]
    fn test_split_of_empty_pool() {
        let components = library::household();
        let stream = Stream::new("s", &components);
        let pool = BiodegradablePool::from_stream(&stream, &BIODEGRADABLE_COD);
        assert_eq!(pool.total(), 0.0);
        assert!(pool.split(10.0).is_empty());
    }
}
