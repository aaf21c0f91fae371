//! Anaerobic digester with a stoichiometric biogas split.
//!
//! A fraction of the biodegradable COD pool is removed from the digestate. In
//! the default [`BiogasMode::Chemical`] mode the removed COD becomes methane
//! (1 g CH4 per 4 g COD) plus enough carbon dioxide to reach the configured
//! methane mole fraction. In [`BiogasMode::MassProxy`] mode the removed mass is
//! booked onto a single proxy component of the biogas stream instead.
//!
//! # Example
//!
//! ```
//! use sanitrain::{library, Stream, UnitOp};
//! use sanitrain::models::{AnaerobicDigester, DigesterConfig};
//!
//! let components = library::household();
//! let sludge = Stream::with_masses(
//!     "blackwater",
//!     &components,
//!     &[("H2O", 1.0e6), ("S_F", 300.0), ("X_B_Subst", 700.0)],
//! );
//!
//! let mut ad = AnaerobicDigester::new("U_AD", DigesterConfig::default()).unwrap();
//! let mut outs = [Stream::new("digestate", &components), Stream::new("biogas", &components)];
//! ad.run(&[&sludge], &mut outs).unwrap();
//!
//! let perf = ad.last_run().unwrap();
//! assert!((perf.removed_cod - 600.0).abs() < 1e-9);
//! assert!((outs[1].imass("CH4").unwrap() - 150.0).abs() < 1e-9);
//! ```

use super::{BiodegradablePool, CARBON_DIOXIDE, METHANE, check_distinct_ids, outlet_pair};
use crate::*;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// g COD per g CH4.
pub const COD_PER_METHANE: f64 = 4.0;

/// How removed COD is booked onto the biogas stream.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BiogasMode {
    /// Methane plus carbon dioxide at the configured methane mole fraction
    #[default]
    Chemical,
    /// The removed mass goes straight onto one proxy component
    MassProxy {
        /// Biogas component receiving the removed mass
        component: String,
    },
}

/// Digester settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DigesterConfig {
    /// Fraction of biodegradable COD removed, in `[0, 1]`
    pub cod_removal: f64,
    /// Methane mole fraction of the biogas, in `(0, 1)`
    pub methane_fraction: f64,
    /// Biogas bookkeeping mode
    pub biogas_mode: BiogasMode,
    /// Members of the biodegradable COD pool
    pub biodegradable_ids: Vec<String>,
}

impl Default for DigesterConfig {
    fn default() -> Self {
        DigesterConfig {
            cod_removal: 0.60,
            methane_fraction: 0.65,
            biogas_mode: BiogasMode::Chemical,
            biodegradable_ids: super::default_biodegradable_ids(),
        }
    }
}

impl DigesterConfig {
    /// Sets the COD removal fraction.
    pub fn with_cod_removal(mut self, fraction: f64) -> Self {
        self.cod_removal = fraction;
        self
    }

    /// Sets the methane mole fraction.
    pub fn with_methane_fraction(mut self, fraction: f64) -> Self {
        self.methane_fraction = fraction;
        self
    }

    /// Sets the biogas mode.
    pub fn with_biogas_mode(mut self, mode: BiogasMode) -> Self {
        self.biogas_mode = mode;
        self
    }

    /// Checks the fractions, the proxy component and the pool ids.
    pub fn validate(&self, unit: &str) -> Result<(), UnitError> {
        check_fraction(unit, "cod_removal", self.cod_removal)?;
        if !(self.methane_fraction > 0.0 && self.methane_fraction < 1.0) {
            return Err(UnitError::FractionOutOfRange {
                unit: unit.to_string(),
                name: "methane_fraction",
                value: self.methane_fraction,
                range: "(0, 1)",
            });
        }
        if let BiogasMode::MassProxy { component } = &self.biogas_mode {
            if component.is_empty() {
                return Err(UnitError::InvalidConfiguration {
                    unit: unit.to_string(),
                    reason: "mass proxy mode needs a component id".to_string(),
                });
            }
        }
        check_distinct_ids(unit, "biodegradable_ids", &self.biodegradable_ids)
    }
}

/// Figures of the last digester run [g/h].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DigesterPerformance {
    /// Biodegradable COD removed from the digestate
    pub removed_cod: f64,
    /// Methane produced (zero in proxy mode)
    pub ch4_mass: f64,
    /// Carbon dioxide produced (zero in proxy mode)
    pub co2_mass: f64,
    /// Total biogas mass flow
    pub biogas_mass: f64,
}

/// Anaerobic digester with one inlet and two outlets (digestate, biogas).
#[derive(Debug, Clone)]
pub struct AnaerobicDigester {
    id: String,
    config: DigesterConfig,
    last_run: Option<DigesterPerformance>,
}

impl AnaerobicDigester {
    /// Creates a digester, rejecting out-of-range fractions.
    pub fn new(id: &str, config: DigesterConfig) -> Result<Self, UnitError> {
        config.validate(id)?;
        Ok(AnaerobicDigester { id: id.to_string(), config, last_run: None })
    }

    /// Gets the configuration.
    pub fn config(&self) -> &DigesterConfig {
        &self.config
    }

    /// Performance of the last run, `None` before the first run.
    pub fn last_run(&self) -> Option<DigesterPerformance> {
        self.last_run
    }

    /// Books the removed COD as methane and carbon dioxide.
    fn chemical_biogas(&self, biogas: &mut Stream, removed: f64, perf: &mut DigesterPerformance) {
        let components = Rc::clone(biogas.components());
        let Some(ch4) = components.index_of(METHANE) else {
            tracing::warn!(unit = %self.id, "no methane component registered, biogas not booked");
            return;
        };
        let ch4_mass = removed / COD_PER_METHANE;
        biogas.set_mass_at(ch4, ch4_mass);
        perf.ch4_mass = ch4_mass;

        let y = self.config.methane_fraction;
        if let (Some(ch4_mw), Some(co2), Some(co2_mw)) = (
            components.molar_mass(METHANE),
            components.index_of(CARBON_DIOXIDE),
            components.molar_mass(CARBON_DIOXIDE),
        ) {
            let ch4_moles = ch4_mass / ch4_mw;
            let co2_moles = ch4_moles * (1.0 - y) / y;
            biogas.set_mass_at(co2, co2_moles * co2_mw);
            perf.co2_mass = co2_moles * co2_mw;
        }
    }
}

impl HasPorts for AnaerobicDigester {
    fn input_ports(&self) -> Vec<NamedPort> {
        vec![NamedPort::input("influent")]
    }

    fn output_ports(&self) -> Vec<NamedPort> {
        vec![NamedPort::output("digestate"), NamedPort::output("biogas").with_phase(Phase::Gas)]
    }
}

impl UnitOp for AnaerobicDigester {
    fn id(&self) -> &str {
        &self.id
    }

    fn run(&mut self, ins: &[&Stream], outs: &mut [Stream]) -> Result<(), UnitError> {
        check_ports(self, ins.len(), outs.len())?;
        let influent = ins[0];
        let (digestate, biogas) = outlet_pair(outs);

        digestate.copy_like(influent)?;
        biogas.copy_like(influent)?;
        biogas.empty();
        biogas.set_phase(Phase::Gas);

        let mut perf = DigesterPerformance::default();
        let pool = BiodegradablePool::from_stream(digestate, &self.config.biodegradable_ids[..]);
        let removed = self.config.cod_removal * pool.total();

        if pool.total() > 0.0 && removed > 0.0 {
            for (index, share) in pool.split(removed) {
                digestate.add_mass_at(index, -share);
            }
            perf.removed_cod = removed;

            match &self.config.biogas_mode {
                BiogasMode::Chemical => self.chemical_biogas(biogas, removed, &mut perf),
                BiogasMode::MassProxy { component } => {
                    let index = biogas
                        .components()
                        .index_of(component)
                        .ok_or_else(|| ComponentError::UnknownComponent(component.clone()))?;
                    biogas.set_mass_at(index, removed);
                }
            }
            perf.biogas_mass = biogas.f_mass();
        }

        tracing::debug!(
            unit = %self.id,
            removed_cod = perf.removed_cod,
            ch4 = perf.ch4_mass,
            co2 = perf.co2_mass,
            "digester evaluated"
        );
        self.last_run = Some(perf);
        Ok(())
    }
}
