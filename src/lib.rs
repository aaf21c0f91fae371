//! # Sanitrain: Typed Mass-Balance Modeling for Household Wastewater Trains
//!
//! A small process-modeling framework for steady-state wastewater treatment
//! trains: greywater and blackwater sources, a membrane bioreactor (MBR), an
//! anaerobic digester (AD), mixers and splitters, wired into a [`System`] that
//! orders the units and converges recycle loops.
//!
//! ## Layers
//!
//! - **Component layer**: a compiled, immutable [`Components`] registry shared
//!   by every stream through an `Rc`.
//! - **Stream layer**: [`Stream`] carries per-component mass flows (g/h) and
//!   derives the usual wastewater indicators (COD, TN, TP, TSS).
//! - **Graph layer**: unit operations implement [`UnitOp`]; the
//!   [`System`](system::System) owns units and streams and runs them.
//!
//! ## Example
//!
//! ```
//! use sanitrain::library;
//! use sanitrain::models::{MembraneBioreactor, MbrConfig, PerCapitaLoads};
//! use sanitrain::system::System;
//!
//! let components = library::household();
//! let greywater = PerCapitaLoads::greywater().to_stream("greywater", &components, 100.0);
//!
//! let mut system = System::new("GW_to_MBR", &components);
//! let feed = system.add_feed(greywater);
//! let effluent = system.add_stream("mbr_effluent");
//! let sludge = system.add_stream("mbr_sludge");
//! let mbr = MembraneBioreactor::new("U_MBR", MbrConfig::default()).unwrap();
//! let mbr = system.add_unit(mbr, &[feed], &[effluent, sludge]).unwrap();
//!
//! system.simulate().unwrap();
//!
//! let removed = system.unit(mbr).unwrap().last_run().unwrap().removed_cod;
//! assert!(removed > 0.0);
//! assert!(system.stream(effluent).cod().unwrap() < system.stream(feed).cod().unwrap());
//! ```
//!
//! The registry can only be used by streams once it has been compiled:
//!
//! ```compile_fail
//! use sanitrain::{Components, Open, Stream};
//!
//! let open = Components::<Open>::new();
//! let stream = Stream::new("s", &std::rc::Rc::new(open)); // Compile error!
//! ```
//!
//! ## Optional Features
//!
//! - **`solvers`** (default): Newton recycle convergence with an LU solve from
//!   `nalgebra`. Without it, only Wegstein and direct substitution are
//!   available.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::str::FromStr;

pub mod config;
pub mod library;
pub mod models;
pub mod report;
pub mod solvers;
pub mod system;
pub mod trains;

pub use system::{StreamId, System, SystemError, UnitHandle, UnitId};

/// Density used to convert liquid mass flow into volumetric flow [g/m^3].
pub const WATER_DENSITY_G_PER_M3: f64 = 1.0e6;

// Component Layer: Registry

/// Errors raised by registry and stream lookups that cannot be skipped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ComponentError {
    /// The identifier is not part of the compiled registry
    #[error("Unknown component '{0}'")]
    UnknownComponent(String),
    /// A molar operation was requested for a component without molar mass
    #[error("Component '{0}' has no molar mass")]
    MissingMolarMass(String),
    /// Two streams built on different registries were combined
    #[error("Streams '{0}' and '{1}' do not share a component registry")]
    RegistryMismatch(String, String),
}

/// Physical phase of a component or stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Liquid (the default for wastewater streams)
    #[default]
    Liquid,
    /// Gas (biogas)
    Gas,
    /// Solid
    Solid,
}

impl Phase {
    /// Single-letter phase tag (`l`, `g`, `s`).
    pub fn symbol(&self) -> char {
        match self {
            Phase::Liquid => 'l',
            Phase::Gas => 'g',
            Phase::Solid => 's',
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Particle size class of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticleSize {
    /// Truly dissolved
    Dissolved,
    /// Colloidal
    Colloidal,
    /// Settleable / filterable particulate
    Particulate,
}

/// Biological degradability of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Degradability {
    /// Readily biodegradable
    Readily,
    /// Slowly biodegradable
    Slowly,
    /// Undegradable
    Undegradable,
}

/// A component definition with the metadata streams need for indicators.
///
/// Masses are carried in "measured" units: organic components in g COD,
/// ammonium in g N, phosphate in g P, everything else in g of substance. The
/// `i_*` factors convert one measured gram into the indicator it contributes to.
///
/// # Examples
///
/// ```
/// use sanitrain::{Component, Degradability};
///
/// let s_f = Component::dissolved("S_F")
///     .with_degradability(Degradability::Readily)
///     .with_organic(true)
///     .with_cod(1.0)
///     .with_nitrogen(0.03352);
///
/// assert!(s_f.organic);
/// assert!(!s_f.is_particulate());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    /// Identifier (e.g. `S_F`, `X_B_Subst`, `CH4`)
    pub id: String,
    /// Reference phase
    pub phase: Phase,
    /// Particle size class
    pub particle_size: ParticleSize,
    /// Degradability class
    pub degradability: Degradability,
    /// Whether the component is organic
    pub organic: bool,
    /// Molar mass [g/mol]
    pub molar_mass: Option<f64>,
    /// g COD per measured g
    pub i_cod: f64,
    /// g N per measured g
    pub i_n: f64,
    /// g P per measured g
    pub i_p: f64,
    /// g suspended mass per measured g (only used for particulates)
    pub i_mass: f64,
}

impl Component {
    fn base(id: &str, phase: Phase, particle_size: ParticleSize) -> Self {
        Component {
            id: id.to_string(),
            phase,
            particle_size,
            degradability: Degradability::Undegradable,
            organic: false,
            molar_mass: None,
            i_cod: 0.0,
            i_n: 0.0,
            i_p: 0.0,
            i_mass: 1.0,
        }
    }

    /// Creates an undegradable, inorganic dissolved placeholder component.
    pub fn dissolved(id: &str) -> Self {
        Self::base(id, Phase::Liquid, ParticleSize::Dissolved)
    }

    /// Creates a particulate component.
    pub fn particulate(id: &str) -> Self {
        Self::base(id, Phase::Liquid, ParticleSize::Particulate)
    }

    /// Creates a gas-phase chemical with a known molar mass.
    pub fn gas(id: &str, molar_mass: f64) -> Self {
        Self::base(id, Phase::Gas, ParticleSize::Dissolved).with_molar_mass(molar_mass)
    }

    /// Sets the degradability class.
    pub fn with_degradability(mut self, degradability: Degradability) -> Self {
        self.degradability = degradability;
        self
    }

    /// Sets the organic flag.
    pub fn with_organic(mut self, organic: bool) -> Self {
        self.organic = organic;
        self
    }

    /// Sets the molar mass [g/mol].
    pub fn with_molar_mass(mut self, molar_mass: f64) -> Self {
        self.molar_mass = Some(molar_mass);
        self
    }

    /// Sets the COD content factor.
    pub fn with_cod(mut self, i_cod: f64) -> Self {
        self.i_cod = i_cod;
        self
    }

    /// Sets the nitrogen content factor.
    pub fn with_nitrogen(mut self, i_n: f64) -> Self {
        self.i_n = i_n;
        self
    }

    /// Sets the phosphorus content factor.
    pub fn with_phosphorus(mut self, i_p: f64) -> Self {
        self.i_p = i_p;
        self
    }

    /// Sets the suspended-mass factor.
    pub fn with_mass_ratio(mut self, i_mass: f64) -> Self {
        self.i_mass = i_mass;
        self
    }

    /// Whether this component counts towards suspended solids.
    pub fn is_particulate(&self) -> bool {
        self.particle_size == ParticleSize::Particulate
    }
}

/// Phantom type marker for a registry that still accepts components.
#[derive(Debug, Clone, Copy)]
pub struct Open;

/// Phantom type marker for a compiled, immutable registry.
#[derive(Debug, Clone, Copy)]
pub struct Compiled;

/// Registry of the components streams may carry.
///
/// The type parameter `S` tracks whether the registry is still being built
/// (`Open`) or has been compiled. Only `Components<Compiled>` can back a
/// [`Stream`], and compiling hands the registry out behind an `Rc` so every
/// stream shares one instance.
///
/// # Examples
///
/// ```
/// use sanitrain::{Component, Components, Open};
///
/// let mut open = Components::<Open>::new();
/// open.append(Component::dissolved("S_SO4"));
/// open.append(Component::dissolved("S_SO4")); // already present, ignored
/// open.append(Component::gas("CH4", 16.04).with_cod(4.0));
///
/// let components = open.compile();
/// assert_eq!(components.len(), 2);
/// assert_eq!(components.molar_mass("CH4"), Some(16.04));
/// assert_eq!(components.index_of("Iome"), None);
/// ```
#[derive(Debug, Clone)]
pub struct Components<S = Compiled> {
    components: Vec<Component>,
    index: HashMap<String, usize>,
    _state: PhantomData<S>,
}

impl Components<Open> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Components { components: Vec::new(), index: HashMap::new(), _state: PhantomData }
    }

    /// Appends a component unless one with the same id already exists.
    ///
    /// Returns whether the component was added.
    pub fn append(&mut self, component: Component) -> bool {
        if self.index.contains_key(&component.id) {
            return false;
        }
        self.index.insert(component.id.clone(), self.components.len());
        self.components.push(component);
        true
    }

    /// Compiles the registry, freezing its contents.
    pub fn compile(self) -> Rc<Components<Compiled>> {
        tracing::debug!(count = self.components.len(), "compiled component registry");
        Rc::new(Components { components: self.components, index: self.index, _state: PhantomData })
    }
}

impl Default for Components<Open> {
    fn default() -> Self {
        Self::new()
    }
}

// Lookups available in both states
impl<S> Components<S> {
    /// Number of registered components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Checks whether an identifier is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Position of a component in every stream's mass vector.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Gets a component definition.
    pub fn get(&self, id: &str) -> Option<&Component> {
        self.index_of(id).map(|i| &self.components[i])
    }

    /// Gets a component by position.
    pub fn at(&self, index: usize) -> &Component {
        &self.components[index]
    }

    /// Iterates over the registered ids in registry order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(|c| c.id.as_str())
    }

    /// Iterates over the component definitions.
    pub fn iter(&self) -> impl Iterator<Item = &Component> {
        self.components.iter()
    }
}

impl Components<Compiled> {
    /// Molar mass of a component, if it is registered and has one.
    pub fn molar_mass(&self, id: &str) -> Option<f64> {
        self.get(id).and_then(|c| c.molar_mass)
    }

    /// Returns an open copy that can be extended and compiled again.
    pub fn uncompile(&self) -> Components<Open> {
        Components {
            components: self.components.clone(),
            index: self.index.clone(),
            _state: PhantomData,
        }
    }
}

// Stream Layer

/// Aggregate concentration indicators of a liquid stream [mg/L].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Indicator {
    /// Chemical oxygen demand
    #[serde(rename = "COD")]
    Cod,
    /// Total nitrogen
    #[serde(rename = "TN")]
    TotalNitrogen,
    /// Total phosphorus
    #[serde(rename = "TP")]
    TotalPhosphorus,
    /// Total suspended solids
    #[serde(rename = "TSS")]
    TotalSuspendedSolids,
}

impl Indicator {
    /// All indicators in report order.
    pub const ALL: [Indicator; 4] = [
        Indicator::Cod,
        Indicator::TotalNitrogen,
        Indicator::TotalPhosphorus,
        Indicator::TotalSuspendedSolids,
    ];

    /// Short label used in reports.
    pub fn label(&self) -> &'static str {
        match self {
            Indicator::Cod => "COD",
            Indicator::TotalNitrogen => "TN",
            Indicator::TotalPhosphorus => "TP",
            Indicator::TotalSuspendedSolids => "TSS",
        }
    }

    /// Measured-to-indicator factor of a component, zero if it does not count.
    fn factor(&self, component: &Component) -> f64 {
        match self {
            Indicator::Cod => component.i_cod,
            Indicator::TotalNitrogen => component.i_n,
            Indicator::TotalPhosphorus => component.i_p,
            Indicator::TotalSuspendedSolids => {
                if component.is_particulate() {
                    component.i_mass
                } else {
                    0.0
                }
            }
        }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Indicator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "COD" => Ok(Indicator::Cod),
            "TN" => Ok(Indicator::TotalNitrogen),
            "TP" => Ok(Indicator::TotalPhosphorus),
            "TSS" => Ok(Indicator::TotalSuspendedSolids),
            other => Err(format!("Unknown indicator '{}'", other)),
        }
    }
}

/// A material stream with per-component mass flows.
///
/// Mass flows are in g/h and indexed in registry order. The total mass flow is
/// never stored; it is always the sum of the component flows.
///
/// # Invariants
///
/// - The mass vector has exactly one entry per registered component
/// - All streams combined by a unit share the same registry (`Rc::ptr_eq`)
///
/// # Examples
///
/// ```
/// use sanitrain::{library, Stream, Phase};
///
/// let components = library::household();
/// let mut gas = Stream::new("biogas", &components);
/// gas.set_phase(Phase::Gas);
/// gas.set_imass("CH4", 160.4).unwrap();
///
/// assert!((gas.imol("CH4").unwrap() - 10.0).abs() < 1e-9);
/// assert_eq!(gas.imass("unknown"), None);
/// assert_eq!(gas.cod(), None); // indicators are liquid-only
/// ```
#[derive(Debug, Clone)]
pub struct Stream {
    id: String,
    phase: Phase,
    components: Rc<Components>,
    mass: Vec<f64>,
}

impl Stream {
    /// Creates an empty liquid stream.
    pub fn new(id: impl Into<String>, components: &Rc<Components>) -> Self {
        Stream {
            id: id.into(),
            phase: Phase::Liquid,
            components: Rc::clone(components),
            mass: vec![0.0; components.len()],
        }
    }

    /// Creates a liquid stream from `(id, g/h)` pairs.
    ///
    /// Identifiers missing from the registry are skipped.
    pub fn with_masses(
        id: impl Into<String>,
        components: &Rc<Components>,
        masses: &[(&str, f64)],
    ) -> Self {
        let mut stream = Self::new(id, components);
        for &(cid, value) in masses {
            match components.index_of(cid) {
                Some(i) => stream.mass[i] += value,
                None => tracing::trace!(
                    component = cid,
                    stream = %stream.id,
                    "skipping unregistered component"
                ),
            }
        }
        stream
    }

    /// Stream identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Renames the stream.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    /// The registry backing this stream.
    pub fn components(&self) -> &Rc<Components> {
        &self.components
    }

    /// Phase tag.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Sets the phase tag.
    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    fn check_registry(&self, other: &Stream) -> Result<(), ComponentError> {
        if Rc::ptr_eq(&self.components, &other.components) {
            Ok(())
        } else {
            Err(ComponentError::RegistryMismatch(self.id.clone(), other.id.clone()))
        }
    }

    /// Copies phase and composition from another stream, keeping this id.
    pub fn copy_like(&mut self, other: &Stream) -> Result<(), ComponentError> {
        self.check_registry(other)?;
        self.phase = other.phase;
        self.mass.copy_from_slice(&other.mass);
        Ok(())
    }

    /// Copies another stream scaled by `factor`, keeping this id.
    pub fn copy_scaled(&mut self, other: &Stream, factor: f64) -> Result<(), ComponentError> {
        self.check_registry(other)?;
        self.phase = other.phase;
        for (dst, src) in self.mass.iter_mut().zip(&other.mass) {
            *dst = src * factor;
        }
        Ok(())
    }

    /// Adds every component flow of another stream to this one.
    pub fn add_from(&mut self, other: &Stream) -> Result<(), ComponentError> {
        self.check_registry(other)?;
        for (dst, src) in self.mass.iter_mut().zip(&other.mass) {
            *dst += src;
        }
        Ok(())
    }

    /// Zeroes every component flow. The phase is left unchanged.
    pub fn empty(&mut self) {
        self.mass.iter_mut().for_each(|m| *m = 0.0);
    }

    /// Whether all component flows are zero.
    pub fn is_empty(&self) -> bool {
        self.mass.iter().all(|&m| m == 0.0)
    }

    /// Mass flow of a component [g/h], `None` if unregistered.
    pub fn imass(&self, id: &str) -> Option<f64> {
        self.components.index_of(id).map(|i| self.mass[i])
    }

    /// Sets the mass flow of a component [g/h].
    pub fn set_imass(&mut self, id: &str, value: f64) -> Result<(), ComponentError> {
        let i = self
            .components
            .index_of(id)
            .ok_or_else(|| ComponentError::UnknownComponent(id.to_string()))?;
        self.mass[i] = value;
        Ok(())
    }

    /// Molar flow of a component [mol/h], `None` if unregistered or without molar mass.
    pub fn imol(&self, id: &str) -> Option<f64> {
        let mw = self.components.molar_mass(id)?;
        self.imass(id).map(|m| m / mw)
    }

    /// Sets the molar flow of a component [mol/h].
    pub fn set_imol(&mut self, id: &str, moles: f64) -> Result<(), ComponentError> {
        if !self.components.contains(id) {
            return Err(ComponentError::UnknownComponent(id.to_string()));
        }
        let mw = self
            .components
            .molar_mass(id)
            .ok_or_else(|| ComponentError::MissingMolarMass(id.to_string()))?;
        self.set_imass(id, moles * mw)
    }

    /// Mass flow at a registry position [g/h].
    pub fn mass_at(&self, index: usize) -> f64 {
        self.mass[index]
    }

    /// Sets the mass flow at a registry position [g/h].
    pub fn set_mass_at(&mut self, index: usize, value: f64) {
        self.mass[index] = value;
    }

    /// Adds to the mass flow at a registry position [g/h].
    pub fn add_mass_at(&mut self, index: usize, delta: f64) {
        self.mass[index] += delta;
    }

    /// All component mass flows in registry order [g/h].
    pub fn masses(&self) -> &[f64] {
        &self.mass
    }

    /// Overwrites all component mass flows.
    ///
    /// # Panics
    ///
    /// Panics if `masses` does not have one entry per registered component.
    pub fn set_masses(&mut self, masses: &[f64]) {
        assert_eq!(masses.len(), self.mass.len(), "Mass vector length mismatch");
        self.mass.copy_from_slice(masses);
    }

    /// Moves `amount` of component `index` from this stream into `other`.
    pub fn transfer_to(&mut self, other: &mut Stream, index: usize, amount: f64) {
        self.mass[index] -= amount;
        other.mass[index] += amount;
    }

    /// Total mass flow [g/h].
    pub fn f_mass(&self) -> f64 {
        self.mass.iter().sum()
    }

    /// Volumetric flow of a liquid stream [m^3/h], `None` for gases.
    pub fn f_vol(&self) -> Option<f64> {
        match self.phase {
            Phase::Gas => None,
            _ => Some(self.f_mass() / WATER_DENSITY_G_PER_M3),
        }
    }

    /// Indicator load [g/h] regardless of phase.
    pub fn indicator_load(&self, indicator: Indicator) -> f64 {
        self.components.iter().zip(&self.mass).map(|(c, m)| m * indicator.factor(c)).sum()
    }

    /// Indicator concentration [mg/L].
    ///
    /// `None` for gas streams and streams without volume.
    pub fn indicator(&self, indicator: Indicator) -> Option<f64> {
        let volume = self.f_vol()?;
        if volume <= 0.0 {
            return None;
        }
        Some(self.indicator_load(indicator) / volume)
    }

    /// Chemical oxygen demand [mg/L].
    pub fn cod(&self) -> Option<f64> {
        self.indicator(Indicator::Cod)
    }

    /// Total nitrogen [mg/L].
    pub fn tn(&self) -> Option<f64> {
        self.indicator(Indicator::TotalNitrogen)
    }

    /// Total phosphorus [mg/L].
    pub fn tp(&self) -> Option<f64> {
        self.indicator(Indicator::TotalPhosphorus)
    }

    /// Total suspended solids [mg/L].
    pub fn tss(&self) -> Option<f64> {
        self.indicator(Indicator::TotalSuspendedSolids)
    }

    /// Component flows whose magnitude exceeds `tolerance`, in registry order.
    pub fn nonzero_masses(&self, tolerance: f64) -> impl Iterator<Item = (&str, f64)> {
        self.components
            .ids()
            .zip(self.mass.iter().copied())
            .filter(move |(_, m)| m.abs() > tolerance)
    }
}

// Graph Layer: Unit Operations

/// A named port with runtime identification.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedPort {
    /// Port name (e.g. "influent", "effluent", "biogas")
    pub name: String,
    /// Direction: true for input, false for output
    pub is_input: bool,
    /// Phase the port carries
    pub phase: Phase,
}

impl NamedPort {
    /// Creates a new liquid input port.
    pub fn input(name: &str) -> Self {
        NamedPort { name: name.to_string(), is_input: true, phase: Phase::Liquid }
    }

    /// Creates a new liquid output port.
    pub fn output(name: &str) -> Self {
        NamedPort { name: name.to_string(), is_input: false, phase: Phase::Liquid }
    }

    /// Sets the port phase.
    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }
}

/// Port-based interface shared by all units.
///
/// The number of ports a unit declares is the number of streams the
/// [`System`] hands to [`UnitOp::run`].
pub trait HasPorts {
    /// Returns all input ports for this unit.
    fn input_ports(&self) -> Vec<NamedPort>;

    /// Returns all output ports for this unit.
    fn output_ports(&self) -> Vec<NamedPort>;

    /// Gets a specific output port index by name.
    fn output_index(&self, name: &str) -> Option<usize> {
        self.output_ports().iter().position(|p| p.name == name)
    }

    /// Gets the total number of ports.
    fn port_count(&self) -> (usize, usize) {
        (self.input_ports().len(), self.output_ports().len())
    }
}

/// Errors raised while configuring or running a unit operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UnitError {
    /// A configured fraction is outside its admissible range
    #[error("{unit}: {name} = {value} is outside {range}")]
    FractionOutOfRange { unit: String, name: &'static str, value: f64, range: &'static str },
    /// Wrong number of streams handed to the unit
    #[error(
        "{unit}: expected {expected_ins} inlet(s) and {expected_outs} outlet(s), got {ins} and {outs}"
    )]
    PortMismatch {
        unit: String,
        expected_ins: usize,
        expected_outs: usize,
        ins: usize,
        outs: usize,
    },
    /// A required configuration value is missing or inconsistent
    #[error("{unit}: {reason}")]
    InvalidConfiguration { unit: String, reason: String },
    /// Component lookup failure
    #[error(transparent)]
    Component(#[from] ComponentError),
}

/// A steady-state unit operation.
///
/// Each evaluation reads the inlet streams and overwrites the outlet streams.
/// Between evaluations a unit keeps only its configuration and the
/// performance figures of its last run.
///
/// # Examples
///
/// ```
/// use sanitrain::{HasPorts, NamedPort, Stream, UnitError, UnitOp};
///
/// /// Passes its inlet through unchanged.
/// struct Pipe;
///
/// impl HasPorts for Pipe {
///     fn input_ports(&self) -> Vec<NamedPort> {
///         vec![NamedPort::input("inlet")]
///     }
///     fn output_ports(&self) -> Vec<NamedPort> {
///         vec![NamedPort::output("outlet")]
///     }
/// }
///
/// impl UnitOp for Pipe {
///     fn id(&self) -> &str {
///         "pipe"
///     }
///     fn run(&mut self, ins: &[&Stream], outs: &mut [Stream]) -> Result<(), UnitError> {
///         outs[0].copy_like(ins[0])?;
///         Ok(())
///     }
/// }
/// ```
pub trait UnitOp: HasPorts {
    /// Unique unit identifier (e.g. `U_MBR`).
    fn id(&self) -> &str;

    /// Runs one evaluation pass.
    fn run(&mut self, ins: &[&Stream], outs: &mut [Stream]) -> Result<(), UnitError>;
}

/// Checks the stream counts handed to a unit against its declared ports.
pub fn check_ports<U: UnitOp + ?Sized>(
    unit: &U,
    ins: usize,
    outs: usize,
) -> Result<(), UnitError> {
    let (expected_ins, expected_outs) = unit.port_count();
    if ins == expected_ins && outs == expected_outs {
        Ok(())
    } else {
        Err(UnitError::PortMismatch {
            unit: unit.id().to_string(),
            expected_ins,
            expected_outs,
            ins,
            outs,
        })
    }
}

/// Validates that `value` lies within `[0, 1]`.
pub fn check_fraction(unit: &str, name: &'static str, value: f64) -> Result<f64, UnitError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(UnitError::FractionOutOfRange {
            unit: unit.to_string(),
            name,
            value,
            range: "[0, 1]",
        })
    }
}

// Conservation Checks

/// A balance that does not close within tolerance.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{quantity} balance not satisfied: in = {inflow:.6e}, out = {outflow:.6e} (tolerance: {tolerance:.1e})")]
pub struct BalanceViolation {
    /// What was balanced (e.g. "mass", "COD", "S_NH4")
    pub quantity: String,
    /// Total in [g/h]
    pub inflow: f64,
    /// Total out [g/h]
    pub outflow: f64,
    /// Relative tolerance used
    pub tolerance: f64,
}

fn check_balance(
    quantity: &str,
    inflow: f64,
    outflow: f64,
    tolerance: f64,
) -> Result<(), BalanceViolation> {
    if (inflow - outflow).abs() <= tolerance * inflow.abs().max(1.0) {
        Ok(())
    } else {
        Err(BalanceViolation { quantity: quantity.to_string(), inflow, outflow, tolerance })
    }
}

/// Validates that total mass flow closes between inlets and outlets.
///
/// # Arguments
///
/// * `tolerance` - Relative tolerance (scaled by the inflow, floored at 1 g/h)
pub fn validate_mass_conservation(
    ins: &[&Stream],
    outs: &[&Stream],
    tolerance: f64,
) -> Result<(), BalanceViolation> {
    let inflow: f64 = ins.iter().map(|s| s.f_mass()).sum();
    let outflow: f64 = outs.iter().map(|s| s.f_mass()).sum();
    check_balance("mass", inflow, outflow, tolerance)
}

/// Validates that the load of an indicator closes between inlets and outlets.
pub fn validate_indicator_conservation(
    ins: &[&Stream],
    outs: &[&Stream],
    indicator: Indicator,
    tolerance: f64,
) -> Result<(), BalanceViolation> {
    let inflow: f64 = ins.iter().map(|s| s.indicator_load(indicator)).sum();
    let outflow: f64 = outs.iter().map(|s| s.indicator_load(indicator)).sum();
    check_balance(indicator.label(), inflow, outflow, tolerance)
}

/// Validates that a single component closes between inlets and outlets.
///
/// Unregistered components trivially close.
pub fn validate_component_conservation(
    ins: &[&Stream],
    outs: &[&Stream],
    id: &str,
    tolerance: f64,
) -> Result<(), BalanceViolation> {
    let inflow: f64 = ins.iter().filter_map(|s| s.imass(id)).sum();
    let outflow: f64 = outs.iter().filter_map(|s| s.imass(id)).sum();
    check_balance(id, inflow, outflow, tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Rc<Components> {
        let mut open = Components::<Open>::new();
        open.append(Component::dissolved("H2O").with_molar_mass(18.015));
        open.append(
            Component::dissolved("S_F")
                .with_degradability(Degradability::Readily)
                .with_organic(true)
                .with_cod(1.0)
                .with_nitrogen(0.03),
        );
        open.append(Component::particulate("X_B_Subst").with_cod(1.0).with_mass_ratio(0.75));
        open.append(Component::gas("CH4", 16.04).with_cod(4.0));
        open.compile()
    }

    #[test]
    fn test_append_is_idempotent() {
        let mut open = Components::<Open>::new();
        assert!(open.append(Component::dissolved("S_SO4")));
        assert!(!open.append(Component::particulate("S_SO4")));
        let components = open.compile();
        assert_eq!(components.len(), 1);
        assert!(!components.get("S_SO4").unwrap().is_particulate());
    }

    #[test]
    fn test_uncompile_extends_copy() {
        let base = registry();
        let mut open = base.uncompile();
        open.append(Component::dissolved("Diclo"));
        let extended = open.compile();
        assert_eq!(extended.len(), base.len() + 1);
        assert!(!base.contains("Diclo"));
        assert_eq!(extended.index_of("S_F"), base.index_of("S_F"));
    }

    #[test]
    fn test_stream_total_is_sum_of_components() {
        let components = registry();
        let stream = Stream::with_masses(
            "s",
            &components,
            &[("H2O", 1.0e6), ("S_F", 30.0), ("X_B_Subst", 70.0), ("nope", 5.0)],
        );
        assert_eq!(stream.f_mass(), 1.0e6 + 100.0);
        assert_eq!(stream.imass("nope"), None);
    }

    #[test]
    fn test_indicators_mg_per_l() {
        let components = registry();
        // 1 m3/h of water carrying 100 g/h COD -> ~100 mg/L
        let masses = [("H2O", 1.0e6), ("S_F", 40.0), ("X_B_Subst", 60.0)];
        let stream = Stream::with_masses("s", &components, &masses);
        let volume = stream.f_vol().unwrap();
        assert!((stream.cod().unwrap() - 100.0 / volume).abs() < 1e-9);
        assert!((stream.tss().unwrap() - 45.0 / volume).abs() < 1e-9);
        assert!((stream.tn().unwrap() - 1.2 / volume).abs() < 1e-9);
        assert_eq!(stream.tp().unwrap(), 0.0);
    }

    #[test]
    fn test_indicators_unavailable_for_gas_and_empty() {
        let components = registry();
        let mut gas = Stream::with_masses("g", &components, &[("CH4", 10.0)]);
        gas.set_phase(Phase::Gas);
        assert_eq!(gas.cod(), None);
        assert_eq!(gas.indicator_load(Indicator::Cod), 40.0);

        let empty = Stream::new("e", &components);
        assert_eq!(empty.cod(), None);
    }

    #[test]
    fn test_molar_flows() {
        let components = registry();
        let mut s = Stream::new("s", &components);
        s.set_imol("CH4", 2.0).unwrap();
        assert!((s.imass("CH4").unwrap() - 32.08).abs() < 1e-12);
        assert_eq!(s.imol("S_F"), None);
        assert_eq!(s.set_imol("S_F", 1.0), Err(ComponentError::MissingMolarMass("S_F".into())));
        assert_eq!(s.set_imol("CO2", 1.0), Err(ComponentError::UnknownComponent("CO2".into())));
    }

    #[test]
    fn test_copy_like_rejects_foreign_registry() {
        let a = registry();
        let b = registry();
        let src = Stream::with_masses("src", &a, &[("S_F", 1.0)]);
        let mut dst = Stream::new("dst", &b);
        assert!(matches!(dst.copy_like(&src), Err(ComponentError::RegistryMismatch(_, _))));
    }

    #[test]
    fn test_copy_like_keeps_id() {
        let components = registry();
        let mut src = Stream::with_masses("src", &components, &[("S_F", 1.0)]);
        src.set_phase(Phase::Gas);
        let mut dst = Stream::new("dst", &components);
        dst.copy_like(&src).unwrap();
        assert_eq!(dst.id(), "dst");
        assert_eq!(dst.phase(), Phase::Gas);
        assert_eq!(dst.imass("S_F"), Some(1.0));
    }

    #[test]
    fn test_indicator_from_str() {
        assert_eq!("tss".parse::<Indicator>(), Ok(Indicator::TotalSuspendedSolids));
        assert!("BOD".parse::<Indicator>().is_err());
    }

    #[test]
    fn test_check_fraction() {
        assert_eq!(check_fraction("U", "COD_removal", 0.5), Ok(0.5));
        assert!(check_fraction("U", "COD_removal", 1.2).is_err());
        assert!(check_fraction("U", "COD_removal", -0.1).is_err());
        assert!(check_fraction("U", "COD_removal", f64::NAN).is_err());
    }

    #[test]
    fn test_balance_helpers() {
        let components = registry();
        let inlet = Stream::with_masses("in", &components, &[("S_F", 100.0)]);
        let a = Stream::with_masses("a", &components, &[("S_F", 60.0)]);
        let b = Stream::with_masses("b", &components, &[("X_B_Subst", 40.0)]);

        assert!(validate_mass_conservation(&[&inlet], &[&a, &b], 1e-12).is_ok());
        let cod = validate_indicator_conservation(&[&inlet], &[&a, &b], Indicator::Cod, 1e-12);
        assert!(cod.is_ok());
        let err = validate_component_conservation(&[&inlet], &[&a, &b], "S_F", 1e-12).unwrap_err();
        assert_eq!(err.quantity, "S_F");
        assert_eq!(err.outflow, 60.0);
    }
}
