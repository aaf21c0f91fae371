//! Influent generators for household greywater and blackwater.
//!
//! Per-capita daily loads are scaled by the population and converted to hourly
//! mass flows: `population * load / 24` for every substance, and
//! `population * L / 1000 / 24 * 1e6` g/h for the water itself. Generation is
//! deterministic and stateless.
//!
//! # Example
//!
//! ```
//! use sanitrain::library;
//! use sanitrain::models::greywater;
//!
//! let components = library::household();
//! let gw = greywater(&components, 24.0);
//!
//! // 24 people * 47 g COD/d = 47 g/h, 30 % soluble
//! assert!((gw.imass("S_F").unwrap() - 14.1).abs() < 1e-9);
//! assert!((gw.imass("H2O").unwrap() - 65_000.0).abs() < 1e-6);
//! ```

use super::{AMMONIUM, PARTICULATE_SUBSTRATE, PHOSPHATE, SOLUBLE_SUBSTRATE, WATER};
use crate::{Components, Stream, WATER_DENSITY_G_PER_M3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::rc::Rc;

const HOURS_PER_DAY: f64 = 24.0;
const LITERS_PER_M3: f64 = 1000.0;

/// Per-capita daily loads of one household wastewater fraction.
///
/// Nitrogen is booked on `S_NH4`, phosphorus on `S_PO4`, potassium on `S_K`
/// and sulfate on `S_SO4`. Trace substances are booked on the component with
/// the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerCapitaLoads {
    /// Water volume [L/cap/d]
    pub volume_l: f64,
    /// Total COD [g/cap/d]
    pub cod: f64,
    /// Share of the COD that is soluble (`S_F`); the rest is `X_B_Subst`
    pub soluble_cod_fraction: f64,
    /// Nitrogen [g N/cap/d]
    pub nitrogen: f64,
    /// Phosphorus [g P/cap/d]
    pub phosphorus: f64,
    /// Potassium [g K/cap/d]
    pub potassium: f64,
    /// Sulfate [g/cap/d]
    pub sulfate: f64,
    /// Trace pharmaceuticals by component id [g/cap/d]
    pub traces: BTreeMap<String, f64>,
}

impl Default for PerCapitaLoads {
    fn default() -> Self {
        Self::greywater()
    }
}

fn traces(values: [(&str, f64); 5]) -> BTreeMap<String, f64> {
    values.into_iter().map(|(id, v)| (id.to_string(), v)).collect()
}

impl PerCapitaLoads {
    /// Household greywater loads.
    pub fn greywater() -> Self {
        PerCapitaLoads {
            volume_l: 65.0,
            cod: 47.0,
            soluble_cod_fraction: 0.3,
            nitrogen: 1.0,
            phosphorus: 0.5,
            potassium: 1.0,
            sulfate: 2.9,
            traces: traces([
                ("Diclo", 6.8e-5),
                ("Meto", 6.8e-5),
                ("Sulfa", 8.228e-7),
                ("Benzo", 1.088e-3),
                ("Iome", 0.0),
            ]),
        }
    }

    /// Household blackwater loads (toilet water with faeces and urine).
    pub fn blackwater() -> Self {
        PerCapitaLoads {
            volume_l: 25.0,
            cod: 72.0,
            soluble_cod_fraction: 0.3,
            nitrogen: 11.0,
            phosphorus: 1.5,
            potassium: 3.0,
            sulfate: 2.0,
            traces: traces([
                ("Diclo", 1.5e-4),
                ("Meto", 2.0e-4),
                ("Sulfa", 4.0e-5),
                ("Benzo", 1.0e-4),
                ("Iome", 0.0),
            ]),
        }
    }

    /// Hourly volumetric flow for a population [m^3/h].
    pub fn flow_m3_h(&self, population: f64) -> f64 {
        population * self.volume_l / LITERS_PER_M3 / HOURS_PER_DAY
    }

    /// Builds the hourly influent stream for a population.
    ///
    /// Loads for components missing from the registry are skipped.
    pub fn to_stream(&self, id: &str, components: &Rc<Components>, population: f64) -> Stream {
        let gph = |g_cap_d: f64| population * g_cap_d / HOURS_PER_DAY;
        let cod = gph(self.cod);

        let mut masses: Vec<(&str, f64)> = vec![
            (PARTICULATE_SUBSTRATE, (1.0 - self.soluble_cod_fraction) * cod),
            (SOLUBLE_SUBSTRATE, self.soluble_cod_fraction * cod),
            (AMMONIUM, gph(self.nitrogen)),
            (PHOSPHATE, gph(self.phosphorus)),
            ("S_K", gph(self.potassium)),
            ("S_SO4", gph(self.sulfate)),
        ];
        masses.extend(self.traces.iter().map(|(cid, &load)| (cid.as_str(), gph(load))));
        masses.push((WATER, self.flow_m3_h(population) * WATER_DENSITY_G_PER_M3));

        let stream = Stream::with_masses(id, components, &masses);
        tracing::debug!(
            stream = id,
            population,
            total_kg_h = stream.f_mass() / 1000.0,
            "generated influent"
        );
        stream
    }
}

/// Greywater influent for a population, with the default loads.
pub fn greywater(components: &Rc<Components>, population: f64) -> Stream {
    PerCapitaLoads::greywater().to_stream("greywater", components, population)
}

/// Blackwater influent for a population, with the default loads.
pub fn blackwater(components: &Rc<Components>, population: f64) -> Stream {
    PerCapitaLoads::blackwater().to_stream("blackwater", components, population)
}

/// Builds a liquid stream from a volumetric flow and concentrations.
///
/// Concentrations are in mg/L (= g/m^3). Water makes up the remaining mass of
/// the flow; if the solutes alone outweigh it, no water is added.
///
/// # Arguments
///
/// * `flow_m3_d` - Volumetric flow [m^3/d]
/// * `concentrations` - `(component id, mg/L)` pairs; unregistered ids are skipped
pub fn influent_from_concentrations(
    id: &str,
    components: &Rc<Components>,
    flow_m3_d: f64,
    concentrations: &[(&str, f64)],
) -> Stream {
    let flow_m3_h = flow_m3_d / HOURS_PER_DAY;
    let masses: Vec<(&str, f64)> = concentrations
        .iter()
        .filter(|(cid, _)| components.contains(cid))
        .map(|&(cid, c)| (cid, c * flow_m3_h))
        .collect();
    let solutes: f64 = masses.iter().map(|(_, m)| m).sum();

    let mut stream = Stream::with_masses(id, components, &masses);
    let water = (flow_m3_h * WATER_DENSITY_G_PER_M3 - solutes).max(0.0);
    if let Some(i) = components.index_of(WATER) {
        stream.add_mass_at(i, water);
    }
    stream
}
