//! Prebuilt household treatment trains.
//!
//! - [`household_system`]: greywater → MBR and blackwater → AD, side by side
//! - [`greywater_system`]: greywater → MBR only
//!
//! ```
//! use sanitrain::config::TrainConfig;
//! use sanitrain::library;
//! use sanitrain::trains::household_system;
//!
//! let config = TrainConfig { population: 100.0, ..TrainConfig::default() };
//! let mut train = household_system(&library::household(), &config).unwrap();
//! train.simulate().unwrap();
//!
//! let [gw, bw] = train.removal_summaries();
//! assert!(gw.get(sanitrain::Indicator::Cod).unwrap() > 90.0);
//! assert!(bw.get(sanitrain::Indicator::Cod).unwrap() > 50.0);
//! ```

use crate::config::TrainConfig;
use crate::models::{AnaerobicDigester, MbrConfig, MembraneBioreactor, PerCapitaLoads};
use crate::report::{RemovalSummary, StreamSummary};
use crate::system::{StreamId, System, SystemError, UnitHandle};
use crate::{Components, Stream};
use std::fmt::Write as _;
use std::rc::Rc;

/// Greywater → MBR and blackwater → AD in one system.
#[derive(Debug)]
pub struct HouseholdTrain {
    /// The wired system
    pub system: System,
    /// Connected population
    pub population: f64,
    /// Greywater feed
    pub greywater: StreamId,
    /// Blackwater feed
    pub blackwater: StreamId,
    /// MBR permeate
    pub mbr_effluent: StreamId,
    /// MBR waste sludge
    pub mbr_sludge: StreamId,
    /// Digester liquid outlet
    pub digestate: StreamId,
    /// Digester gas outlet
    pub biogas: StreamId,
    /// Membrane bioreactor
    pub mbr: UnitHandle<MembraneBioreactor>,
    /// Anaerobic digester
    pub digester: UnitHandle<AnaerobicDigester>,
}

/// Builds the household system from a configuration.
pub fn household_system(
    components: &Rc<Components>,
    config: &TrainConfig,
) -> Result<HouseholdTrain, SystemError> {
    let mut system =
        System::new("Household_System", components).with_recycle_settings(config.recycle);

    let population = config.population;
    let greywater =
        system.add_feed(config.greywater.to_stream("greywater", components, population));
    let blackwater =
        system.add_feed(config.blackwater.to_stream("blackwater", components, population));

    let mbr_effluent = system.add_stream("mbr_effluent");
    let mbr_sludge = system.add_stream("mbr_sludge");
    let mbr = system.add_unit(
        MembraneBioreactor::new("U_MBR", config.mbr.clone())?,
        &[greywater],
        &[mbr_effluent, mbr_sludge],
    )?;

    let digestate = system.add_stream("digestate");
    let biogas = system.add_stream("biogas");
    let digester = system.add_unit(
        AnaerobicDigester::new("U_AD", config.digester.clone())?,
        &[blackwater],
        &[digestate, biogas],
    )?;

    Ok(HouseholdTrain {
        system,
        population: config.population,
        greywater,
        blackwater,
        mbr_effluent,
        mbr_sludge,
        digestate,
        biogas,
        mbr,
        digester,
    })
}

impl HouseholdTrain {
    /// Runs the system.
    pub fn simulate(&mut self) -> Result<(), SystemError> {
        self.system.simulate()
    }

    /// Gets a stream of the train.
    pub fn stream(&self, id: StreamId) -> &Stream {
        self.system.stream(id)
    }

    /// Summaries of both feeds.
    pub fn influent_report(&self) -> String {
        let mut out = String::new();
        for (id, label) in [
            (self.greywater, "Influent Greywater (pre-simulation)"),
            (self.blackwater, "Influent Blackwater (pre-simulation)"),
        ] {
            let _ = writeln!(out, "{}", StreamSummary::new(self.stream(id), label));
        }
        out
    }

    /// Summaries of the four outlets.
    pub fn outlet_report(&self) -> String {
        let mut out = String::new();
        for (id, label) in [
            (self.mbr_effluent, "MBR Effluent"),
            (self.mbr_sludge, "MBR Sludge"),
            (self.digestate, "AD Digestate"),
            (self.biogas, "AD Biogas"),
        ] {
            let _ = writeln!(out, "{}", StreamSummary::new(self.stream(id), label));
        }
        out
    }

    /// Indicator removals of the greywater and blackwater trains.
    pub fn removal_summaries(&self) -> [RemovalSummary; 2] {
        [
            RemovalSummary::new(
                "Greywater→MBR",
                self.stream(self.greywater),
                self.stream(self.mbr_effluent),
            ),
            RemovalSummary::new(
                "Blackwater→AD",
                self.stream(self.blackwater),
                self.stream(self.digestate),
            ),
        ]
    }
}

/// Greywater → MBR on its own.
#[derive(Debug)]
pub struct GreywaterTrain {
    /// The wired system
    pub system: System,
    /// Greywater feed
    pub greywater: StreamId,
    /// MBR permeate
    pub effluent: StreamId,
    /// MBR waste sludge
    pub sludge: StreamId,
    /// Membrane bioreactor
    pub mbr: UnitHandle<MembraneBioreactor>,
}

/// Builds the greywater-only system.
pub fn greywater_system(
    components: &Rc<Components>,
    loads: &PerCapitaLoads,
    population: f64,
    mbr: MbrConfig,
) -> Result<GreywaterTrain, SystemError> {
    let mut system = System::new("GW_to_MBR", components);
    let greywater = system.add_feed(loads.to_stream("greywater", components, population));
    let effluent = system.add_stream("mbr_effluent");
    let sludge = system.add_stream("mbr_sludge");
    let mbr =
        system.add_unit(MembraneBioreactor::new("U_MBR", mbr)?, &[greywater], &[effluent, sludge])?;
    Ok(GreywaterTrain { system, greywater, effluent, sludge, mbr })
}
