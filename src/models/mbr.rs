//! COD-based membrane bioreactor surrogate.
//!
//! The MBR splits one influent into a treated effluent and a sludge stream in
//! three bookkeeping steps:
//!
//! 1. **Biological removal**: a fraction of the biodegradable COD pool is
//!    removed from the effluent and credited to the sludge as biomass
//!    (`X_B_Subst`), or onto the same component if no biomass id is registered.
//! 2. **Nutrient removal** (optional): fractions of ammonium and phosphate are
//!    moved to the sludge.
//! 3. **Membrane capture**: a fraction of every particulate id is moved to the
//!    sludge.
//!
//! Every step moves mass from one outlet to the other, so the total mass flow
//! of effluent + sludge equals the influent.
//!
//! # Example
//!
//! ```
//! use sanitrain::{library, Stream, UnitOp, validate_mass_conservation};
//! use sanitrain::models::{MbrConfig, MembraneBioreactor};
//!
//! let components = library::household();
//! let influent = Stream::with_masses(
//!     "greywater",
//!     &components,
//!     &[("H2O", 1.0e6), ("S_F", 300.0), ("X_B_Subst", 700.0), ("S_NH4", 40.0)],
//! );
//!
//! let config = MbrConfig::default().with_nh4_removal(0.2);
//! let mut mbr = MembraneBioreactor::new("U_MBR", config).unwrap();
//!
//! let mut outs = [Stream::new("effluent", &components), Stream::new("sludge", &components)];
//! mbr.run(&[&influent], &mut outs).unwrap();
//!
//! assert!(validate_mass_conservation(&[&influent], &[&outs[0], &outs[1]], 1e-12).is_ok());
//! assert!((mbr.last_run().unwrap().removed_cod - 850.0).abs() < 1e-9);
//! ```

use super::{
    AMMONIUM, BiodegradablePool, PARTICULATE_SUBSTRATE, PHOSPHATE, check_distinct_ids, outlet_pair,
};
use crate::*;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// MBR performance settings.
///
/// All fractions must lie in `[0, 1]`; [`MembraneBioreactor::new`] rejects
/// anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MbrConfig {
    /// Fraction of biodegradable COD removed biologically
    pub cod_removal: f64,
    /// Fraction of particulate components retained by the membrane
    pub solids_capture: f64,
    /// Fraction of ammonium moved to sludge
    pub nh4_removal: f64,
    /// Fraction of phosphate moved to sludge
    pub po4_removal: f64,
    /// Components treated as solids for membrane capture
    pub particulate_ids: Vec<String>,
    /// Members of the biodegradable COD pool
    pub biodegradable_ids: Vec<String>,
    /// Sludge component receiving the biologically removed COD
    pub biomass_id: String,
}

impl Default for MbrConfig {
    fn default() -> Self {
        MbrConfig {
            cod_removal: 0.85,
            solids_capture: 0.995,
            nh4_removal: 0.0,
            po4_removal: 0.0,
            particulate_ids: vec![PARTICULATE_SUBSTRATE.to_string()],
            biodegradable_ids: super::default_biodegradable_ids(),
            biomass_id: PARTICULATE_SUBSTRATE.to_string(),
        }
    }
}

impl MbrConfig {
    /// Sets the biological COD removal fraction.
    pub fn with_cod_removal(mut self, fraction: f64) -> Self {
        self.cod_removal = fraction;
        self
    }

    /// Sets the membrane solids capture fraction.
    pub fn with_solids_capture(mut self, fraction: f64) -> Self {
        self.solids_capture = fraction;
        self
    }

    /// Sets the ammonium removal fraction.
    pub fn with_nh4_removal(mut self, fraction: f64) -> Self {
        self.nh4_removal = fraction;
        self
    }

    /// Sets the phosphate removal fraction.
    pub fn with_po4_removal(mut self, fraction: f64) -> Self {
        self.po4_removal = fraction;
        self
    }

    /// Replaces the particulate ids captured by the membrane.
    pub fn with_particulate_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.particulate_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Checks every fraction against `[0, 1]` and rejects repeated ids.
    pub fn validate(&self, unit: &str) -> Result<(), UnitError> {
        check_fraction(unit, "cod_removal", self.cod_removal)?;
        check_fraction(unit, "solids_capture", self.solids_capture)?;
        check_fraction(unit, "nh4_removal", self.nh4_removal)?;
        check_fraction(unit, "po4_removal", self.po4_removal)?;
        check_distinct_ids(unit, "particulate_ids", &self.particulate_ids)?;
        check_distinct_ids(unit, "biodegradable_ids", &self.biodegradable_ids)
    }
}

/// Mass moved to the sludge by the last run [g/h].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MbrPerformance {
    /// Biodegradable COD removed from the effluent
    pub removed_cod: f64,
    /// Ammonium moved to sludge
    pub nh4_removed: f64,
    /// Phosphate moved to sludge
    pub po4_removed: f64,
    /// Particulate mass captured by the membrane
    pub solids_captured: f64,
}

/// Membrane bioreactor with one inlet and two outlets (effluent, sludge).
#[derive(Debug, Clone)]
pub struct MembraneBioreactor {
    id: String,
    config: MbrConfig,
    last_run: Option<MbrPerformance>,
}

impl MembraneBioreactor {
    /// Creates an MBR, rejecting fractions outside `[0, 1]`.
    pub fn new(id: &str, config: MbrConfig) -> Result<Self, UnitError> {
        config.validate(id)?;
        Ok(MembraneBioreactor { id: id.to_string(), config, last_run: None })
    }

    /// Gets the configuration.
    pub fn config(&self) -> &MbrConfig {
        &self.config
    }

    /// Performance of the last run, `None` before the first run.
    pub fn last_run(&self) -> Option<MbrPerformance> {
        self.last_run
    }
}

impl HasPorts for MembraneBioreactor {
    fn input_ports(&self) -> Vec<NamedPort> {
        vec![NamedPort::input("influent")]
    }

    fn output_ports(&self) -> Vec<NamedPort> {
        vec![NamedPort::output("effluent"), NamedPort::output("sludge")]
    }
}

impl UnitOp for MembraneBioreactor {
    fn id(&self) -> &str {
        &self.id
    }

    fn run(&mut self, ins: &[&Stream], outs: &mut [Stream]) -> Result<(), UnitError> {
        check_ports(self, ins.len(), outs.len())?;
        let influent = ins[0];
        let (effluent, sludge) = outlet_pair(outs);
        let components = Rc::clone(influent.components());

        effluent.copy_like(influent)?;
        sludge.copy_like(influent)?;
        sludge.empty();
        sludge.set_phase(Phase::Liquid);

        let mut perf = MbrPerformance::default();

        // Biological step
        let pool = BiodegradablePool::from_stream(effluent, &self.config.biodegradable_ids[..]);
        if pool.total() > 0.0 {
            let removed = self.config.cod_removal * pool.total();
            if removed > 0.0 {
                let sink = components.index_of(&self.config.biomass_id);
                for (index, share) in pool.split(removed) {
                    effluent.add_mass_at(index, -share);
                    sludge.add_mass_at(sink.unwrap_or(index), share);
                }
                perf.removed_cod = removed;
            }
        }

        // Nutrients
        if let Some(i) = components.index_of(AMMONIUM) {
            if self.config.nh4_removal > 0.0 {
                let moved = self.config.nh4_removal * effluent.mass_at(i);
                effluent.transfer_to(sludge, i, moved);
                perf.nh4_removed = moved;
            }
        }
        if let Some(i) = components.index_of(PHOSPHATE) {
            if self.config.po4_removal > 0.0 {
                let moved = self.config.po4_removal * effluent.mass_at(i);
                effluent.transfer_to(sludge, i, moved);
                perf.po4_removed = moved;
            }
        }

        // Membrane capture
        for id in &self.config.particulate_ids {
            if let Some(i) = components.index_of(id) {
                let captured = self.config.solids_capture * effluent.mass_at(i);
                effluent.transfer_to(sludge, i, captured);
                perf.solids_captured += captured;
            }
        }

        tracing::debug!(
            unit = %self.id,
            removed_cod = perf.removed_cod,
            nh4_removed = perf.nh4_removed,
            po4_removed = perf.po4_removed,
            solids_captured = perf.solids_captured,
            "MBR evaluated"
        );
        self.last_run = Some(perf);
        Ok(())
    }
}
