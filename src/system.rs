//! System orchestration: unit graph, evaluation order and recycle loops.
//!
//! A [`System`] owns every stream and unit of a treatment train. Units are
//! wired by stream ids: each stream is either a feed or the outlet of exactly
//! one unit. Evaluation order is a topological order of the unit graph;
//! recycle loops are broken at tear streams, either declared with
//! [`System::set_recycle`] or detected automatically, and converged with the
//! [`RecycleSolver`](crate::solvers::RecycleSolver).
//!
//! # Example
//!
//! ```
//! use sanitrain::{library, Stream, System};
//! use sanitrain::models::{Mixer, Splitter};
//!
//! let components = library::household();
//! let mut system = System::new("loop", &components);
//!
//! let feed = system.add_feed(Stream::with_masses("feed", &components, &[("H2O", 1000.0)]));
//! let recycle = system.add_stream("recycle");
//! let mixed = system.add_stream("mixed");
//! let product = system.add_stream("product");
//!
//! system.add_unit(Mixer::<2>::new("M1").unwrap(), &[feed, recycle], &[mixed]).unwrap();
//! let splitter = Splitter::new("S1", [0.5, 0.5]).unwrap();
//! system.add_unit(splitter, &[mixed], &[recycle, product]).unwrap();
//!
//! assert_eq!(system.find_tear_streams(), vec![recycle]);
//! system.simulate().unwrap();
//!
//! // At steady state the product equals the feed and the recycle carries as much again
//! assert!((system.stream(product).f_mass() - 1000.0).abs() < 1e-4);
//! assert!((system.stream(recycle).f_mass() - 1000.0).abs() < 1e-4);
//! ```

use crate::solvers::{RecycleError, RecycleSettings, RecycleSolution};
use crate::{Components, Stream, UnitError, UnitOp, check_ports};
use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

/// Identifier of a stream within a system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub usize);

/// Identifier of a unit within a system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub usize);

/// Typed handle to a unit owned by a [`System`].
///
/// Returned by [`System::add_unit`] so the concrete unit (and its last-run
/// performance) can be read back after simulation.
pub struct UnitHandle<U> {
    id: UnitId,
    _unit: PhantomData<fn() -> U>,
}

impl<U> UnitHandle<U> {
    /// Untyped identifier of the unit.
    pub fn id(&self) -> UnitId {
        self.id
    }
}

impl<U> Clone for UnitHandle<U> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<U> Copy for UnitHandle<U> {}

impl<U> fmt::Debug for UnitHandle<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UnitHandle").field(&self.id.0).finish()
    }
}

/// Errors raised while wiring or simulating a system.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SystemError {
    /// A stream id that does not belong to this system
    #[error("Unknown stream id {0}")]
    UnknownStream(usize),
    /// Two units declare the same unit id
    #[error("Duplicate unit '{0}'")]
    DuplicateUnit(String),
    /// A stream is already the outlet of another unit
    #[error("Stream '{stream}' is produced by both '{first}' and '{second}'")]
    StreamProducedTwice { stream: String, first: String, second: String },
    /// A feed stream was wired as a unit outlet
    #[error("Feed stream '{stream}' cannot be an outlet of '{unit}'")]
    FeedAsOutlet { stream: String, unit: String },
    /// A unit consumes its own outlet
    #[error("Unit '{unit}' consumes its own outlet '{stream}'")]
    SelfLoop { unit: String, stream: String },
    /// A declared recycle stream is not produced by any unit
    #[error("Recycle stream '{0}' is not produced by any unit")]
    InvalidRecycle(String),
    /// The tear streams do not break every cycle
    #[error("Units {0:?} form a cycle that is not broken by a recycle stream")]
    UnresolvedCycle(Vec<String>),
    /// A unit rejected its configuration or streams
    #[error(transparent)]
    Unit(#[from] UnitError),
    /// A unit failed during simulation
    #[error("Unit '{unit}' failed: {source}")]
    UnitFailed {
        unit: String,
        #[source]
        source: UnitError,
    },
    /// Recycle convergence failed
    #[error(transparent)]
    Recycle(#[from] RecycleError),
}

/// Object-safe view of a unit that can be downcast back to its type.
trait DynUnit: UnitOp {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<U: UnitOp + 'static> DynUnit for U {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct UnitSlot {
    unit: Box<dyn DynUnit>,
    ins: Vec<StreamId>,
    outs: Vec<StreamId>,
}

/// A treatment train: streams, units and their wiring.
pub struct System {
    name: String,
    components: Rc<Components>,
    streams: Vec<Stream>,
    /// Producing unit of each stream, `None` for feeds and unconnected streams
    producers: Vec<Option<UnitId>>,
    feeds: HashSet<StreamId>,
    units: Vec<UnitSlot>,
    recycles: Vec<StreamId>,
    recycle_settings: RecycleSettings,
    last_solution: Option<RecycleSolution>,
}

impl fmt::Debug for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("System")
            .field("name", &self.name)
            .field("streams", &self.streams.iter().map(Stream::id).collect::<Vec<_>>())
            .field("units", &self.units.iter().map(|u| u.unit.id()).collect::<Vec<_>>())
            .finish()
    }
}

impl System {
    /// Creates an empty system on a compiled registry.
    pub fn new(name: &str, components: &Rc<Components>) -> Self {
        System {
            name: name.to_string(),
            components: Rc::clone(components),
            streams: Vec::new(),
            producers: Vec::new(),
            feeds: HashSet::new(),
            units: Vec::new(),
            recycles: Vec::new(),
            recycle_settings: RecycleSettings::default(),
            last_solution: None,
        }
    }

    /// Sets the recycle convergence settings.
    pub fn with_recycle_settings(mut self, settings: RecycleSettings) -> Self {
        self.recycle_settings = settings;
        self
    }

    /// System name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The registry shared by every stream of the system.
    pub fn components(&self) -> &Rc<Components> {
        &self.components
    }

    /// Adds a feed stream. Feeds are never overwritten by units.
    pub fn add_feed(&mut self, stream: Stream) -> StreamId {
        let id = self.push_stream(stream);
        self.feeds.insert(id);
        id
    }

    /// Adds an empty stream to be produced by a unit.
    pub fn add_stream(&mut self, id: &str) -> StreamId {
        self.push_stream(Stream::new(id, &self.components))
    }

    fn push_stream(&mut self, stream: Stream) -> StreamId {
        self.streams.push(stream);
        self.producers.push(None);
        StreamId(self.streams.len() - 1)
    }

    fn check_stream(&self, id: StreamId) -> Result<(), SystemError> {
        if id.0 < self.streams.len() { Ok(()) } else { Err(SystemError::UnknownStream(id.0)) }
    }

    /// Adds a unit wired to inlet and outlet streams.
    ///
    /// # Errors
    ///
    /// Fails if a stream id is unknown, the stream counts do not match the
    /// unit's ports, the unit id is taken, an outlet is a feed or already
    /// produced by another unit, or the unit consumes its own outlet.
    pub fn add_unit<U: UnitOp + 'static>(
        &mut self,
        unit: U,
        ins: &[StreamId],
        outs: &[StreamId],
    ) -> Result<UnitHandle<U>, SystemError> {
        for &s in ins.iter().chain(outs) {
            self.check_stream(s)?;
        }
        check_ports(&unit, ins.len(), outs.len())?;
        if self.units.iter().any(|slot| slot.unit.id() == unit.id()) {
            return Err(SystemError::DuplicateUnit(unit.id().to_string()));
        }
        for &s in outs {
            let stream = self.streams[s.0].id().to_string();
            if self.feeds.contains(&s) {
                return Err(SystemError::FeedAsOutlet { stream, unit: unit.id().to_string() });
            }
            if let Some(first) = self.producers[s.0] {
                return Err(SystemError::StreamProducedTwice {
                    stream,
                    first: self.units[first.0].unit.id().to_string(),
                    second: unit.id().to_string(),
                });
            }
            if ins.contains(&s) {
                return Err(SystemError::SelfLoop { unit: unit.id().to_string(), stream });
            }
        }

        let id = UnitId(self.units.len());
        for &s in outs {
            self.producers[s.0] = Some(id);
        }
        tracing::debug!(system = %self.name, unit = unit.id(), "added unit");
        self.units.push(UnitSlot { unit: Box::new(unit), ins: ins.to_vec(), outs: outs.to_vec() });
        Ok(UnitHandle { id, _unit: PhantomData })
    }

    /// Declares the tear streams of the recycle loops.
    ///
    /// Without a declaration, tear streams are detected on every simulation.
    pub fn set_recycle(&mut self, streams: &[StreamId]) -> Result<(), SystemError> {
        for &s in streams {
            self.check_stream(s)?;
            if self.producers[s.0].is_none() {
                return Err(SystemError::InvalidRecycle(self.streams[s.0].id().to_string()));
            }
        }
        self.recycles = streams.to_vec();
        Ok(())
    }

    /// Number of units.
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Number of streams.
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Gets a unit by handle, `None` if the handle belongs to another system.
    pub fn unit<U: UnitOp + 'static>(&self, handle: UnitHandle<U>) -> Option<&U> {
        self.units.get(handle.id.0)?.unit.as_any().downcast_ref::<U>()
    }

    /// Gets a mutable unit by handle, `None` if the handle belongs to another system.
    pub fn unit_mut<U: UnitOp + 'static>(&mut self, handle: UnitHandle<U>) -> Option<&mut U> {
        self.units.get_mut(handle.id.0)?.unit.as_any_mut().downcast_mut::<U>()
    }

    /// Unit identifier string (e.g. `U_MBR`).
    pub fn unit_name(&self, id: UnitId) -> Option<&str> {
        self.units.get(id.0).map(|slot| slot.unit.id())
    }

    /// Gets a stream.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this system.
    pub fn stream(&self, id: StreamId) -> &Stream {
        &self.streams[id.0]
    }

    /// Gets a mutable stream (e.g. to change a feed between simulations).
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this system.
    pub fn stream_mut(&mut self, id: StreamId) -> &mut Stream {
        &mut self.streams[id.0]
    }

    /// Finds a stream by its string id.
    pub fn find_stream(&self, id: &str) -> Option<StreamId> {
        self.streams.iter().position(|s| s.id() == id).map(StreamId)
    }

    /// Iterates over all streams in insertion order.
    pub fn streams(&self) -> impl Iterator<Item = &Stream> {
        self.streams.iter()
    }

    /// Feed streams in insertion order.
    pub fn feeds(&self) -> Vec<StreamId> {
        let mut feeds: Vec<StreamId> = self.feeds.iter().copied().collect();
        feeds.sort();
        feeds
    }

    /// Streams not consumed by any unit (system products), in insertion order.
    pub fn products(&self) -> Vec<StreamId> {
        let consumed: HashSet<StreamId> =
            self.units.iter().flat_map(|slot| slot.ins.iter().copied()).collect();
        (0..self.streams.len())
            .map(StreamId)
            .filter(|s| self.producers[s.0].is_some() && !consumed.contains(s))
            .collect()
    }

    /// Solution of the last recycle convergence, if the system has loops.
    pub fn last_recycle_solution(&self) -> Option<&RecycleSolution> {
        self.last_solution.as_ref()
    }

    /// Unit adjacency: producer -> consumers, optionally ignoring some streams.
    fn adjacency(&self, ignore: &[StreamId]) -> HashMap<UnitId, Vec<UnitId>> {
        let mut adjacency: HashMap<UnitId, Vec<UnitId>> = HashMap::new();
        for (c, slot) in self.units.iter().enumerate() {
            for s in slot.ins.iter().filter(|s| !ignore.contains(s)) {
                if let Some(p) = self.producers[s.0] {
                    adjacency.entry(p).or_default().push(UnitId(c));
                }
            }
        }
        adjacency
    }

    /// Detects cycles in the unit graph using depth-first search.
    ///
    /// Returns a list of cycles found, where each cycle is a vector of unit IDs
    /// forming a closed loop.
    pub fn detect_cycles(&self) -> Vec<Vec<UnitId>> {
        let adjacency = self.adjacency(&[]);
        let mut cycles = Vec::new();
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        fn dfs(
            node: UnitId,
            adjacency: &HashMap<UnitId, Vec<UnitId>>,
            visited: &mut HashSet<UnitId>,
            rec_stack: &mut HashSet<UnitId>,
            path: &mut Vec<UnitId>,
            cycles: &mut Vec<Vec<UnitId>>,
        ) {
            visited.insert(node);
            rec_stack.insert(node);
            path.push(node);

            if let Some(neighbors) = adjacency.get(&node) {
                for &neighbor in neighbors {
                    if !visited.contains(&neighbor) {
                        dfs(neighbor, adjacency, visited, rec_stack, path, cycles);
                    } else if rec_stack.contains(&neighbor) {
                        // Found a cycle - extract it from path
                        if let Some(cycle_start) = path.iter().position(|&id| id == neighbor) {
                            cycles.push(path[cycle_start..].to_vec());
                        }
                    }
                }
            }

            path.pop();
            rec_stack.remove(&node);
        }

        for unit in (0..self.units.len()).map(UnitId) {
            if !visited.contains(&unit) {
                dfs(unit, &adjacency, &mut visited, &mut rec_stack, &mut path, &mut cycles);
            }
        }

        cycles
    }

    /// Finds tear streams for recycle loops.
    ///
    /// For each cycle, the stream closing the loop (from the last unit back
    /// to the first) is torn.
    pub fn find_tear_streams(&self) -> Vec<StreamId> {
        let mut tears = Vec::new();
        for cycle in self.detect_cycles() {
            let (Some(&from), Some(&to)) = (cycle.last(), cycle.first()) else {
                continue;
            };
            let closing = self.units[from.0]
                .outs
                .iter()
                .find(|s| self.units[to.0].ins.contains(s))
                .copied();
            if let Some(s) = closing {
                if !tears.contains(&s) {
                    tears.push(s);
                }
            }
        }
        tears
    }

    /// Tear streams used by [`simulate`](Self::simulate): the declared
    /// recycles, or the detected ones.
    pub fn tear_streams(&self) -> Vec<StreamId> {
        if self.recycles.is_empty() { self.find_tear_streams() } else { self.recycles.clone() }
    }

    /// Topological evaluation order with the given streams torn.
    ///
    /// Ties are broken by insertion order.
    pub fn evaluation_order(&self, tears: &[StreamId]) -> Result<Vec<UnitId>, SystemError> {
        let adjacency = self.adjacency(tears);
        let mut in_degree = vec![0usize; self.units.len()];
        for consumers in adjacency.values() {
            for c in consumers {
                in_degree[c.0] += 1;
            }
        }

        let mut ready: VecDeque<UnitId> =
            (0..self.units.len()).filter(|&u| in_degree[u] == 0).map(UnitId).collect();
        let mut order = Vec::with_capacity(self.units.len());
        while let Some(u) = ready.pop_front() {
            order.push(u);
            if let Some(consumers) = adjacency.get(&u) {
                let mut released = Vec::new();
                for c in consumers {
                    in_degree[c.0] -= 1;
                    if in_degree[c.0] == 0 {
                        released.push(*c);
                    }
                }
                released.sort();
                ready.extend(released);
            }
        }

        if order.len() < self.units.len() {
            let stuck = (0..self.units.len())
                .filter(|u| !order.contains(&UnitId(*u)))
                .map(|u| self.units[u].unit.id().to_string())
                .collect();
            return Err(SystemError::UnresolvedCycle(stuck));
        }
        Ok(order)
    }

    /// Runs every unit once in the given order.
    fn run_pass(&mut self, order: &[UnitId]) -> Result<(), SystemError> {
        for &u in order {
            let slot = &self.units[u.0];
            let inlets: Vec<Stream> = slot.ins.iter().map(|s| self.streams[s.0].clone()).collect();
            let mut outlets: Vec<Stream> =
                slot.outs.iter().map(|s| self.streams[s.0].clone()).collect();
            let refs: Vec<&Stream> = inlets.iter().collect();

            let slot = &mut self.units[u.0];
            slot.unit.run(&refs, &mut outlets).map_err(|source| SystemError::UnitFailed {
                unit: slot.unit.id().to_string(),
                source,
            })?;

            for (s, outlet) in slot.outs.iter().zip(outlets) {
                self.streams[s.0] = outlet;
            }
        }
        Ok(())
    }

    fn read_tears(&self, tears: &[StreamId]) -> Vec<f64> {
        tears.iter().flat_map(|s| self.streams[s.0].masses().iter().copied()).collect()
    }

    fn write_tears(&mut self, tears: &[StreamId], values: &[f64]) {
        let n = self.components.len();
        for (k, s) in tears.iter().enumerate() {
            self.streams[s.0].set_masses(&values[k * n..(k + 1) * n]);
        }
    }

    /// Simulates the system to steady state.
    ///
    /// Without recycle loops every unit runs once in topological order. With
    /// loops, the tear streams are converged first and a final pass makes
    /// every stream consistent with the converged values.
    pub fn simulate(&mut self) -> Result<(), SystemError> {
        let tears = self.tear_streams();
        let order = self.evaluation_order(&tears)?;
        tracing::info!(
            system = %self.name,
            units = self.units.len(),
            tears = tears.len(),
            "simulating system"
        );

        if tears.is_empty() {
            self.run_pass(&order)?;
            self.last_solution = None;
        } else {
            let mut solver = self.recycle_settings.solver();
            let guess = self.read_tears(&tears);
            let solution = solver.try_solve(guess, |x| {
                self.write_tears(&tears, x);
                self.run_pass(&order)?;
                Ok::<_, SystemError>(self.read_tears(&tears))
            })?;
            self.write_tears(&tears, &solution.tear_values);
            self.run_pass(&order)?;
            tracing::info!(
                system = %self.name,
                iterations = solution.iterations,
                residual = solution.residual,
                "recycle converged"
            );
            self.last_solution = Some(solution);
        }

        tracing::info!(system = %self.name, "simulation finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library;
    use crate::models::{MbrConfig, MembraneBioreactor, Mixer, Splitter};
    use crate::solvers::SolverMethod;
    use crate::validate_mass_conservation;

    fn mbr(id: &str, cod_removal: f64) -> MembraneBioreactor {
        let config = MbrConfig::default().with_cod_removal(cod_removal).with_solids_capture(0.0);
        MembraneBioreactor::new(id, config).unwrap()
    }

    #[test]
    fn test_system_creation() {
        let components = library::household();
        let system = System::new("empty", &components);
        assert_eq!(system.unit_count(), 0);
        assert_eq!(system.stream_count(), 0);
        assert!(system.detect_cycles().is_empty());
    }

    #[test]
    fn test_producers_run_before_consumers() {
        let components = library::household();
        let mut system = System::new("chain", &components);
        let feed = system.add_feed(Stream::with_masses(
            "feed",
            &components,
            &[("H2O", 1.0e6), ("S_F", 1000.0)],
        ));
        let mid = system.add_stream("mid");
        let sludge1 = system.add_stream("sludge1");
        let out = system.add_stream("out");
        let sludge2 = system.add_stream("sludge2");

        // Consumer registered first
        let second = system.add_unit(mbr("U2", 0.5), &[mid], &[out, sludge2]).unwrap();
        let first = system.add_unit(mbr("U1", 0.5), &[feed], &[mid, sludge1]).unwrap();

        assert_eq!(system.evaluation_order(&[]).unwrap(), vec![first.id(), second.id()]);
        system.simulate().unwrap();

        assert!((system.stream(mid).imass("S_F").unwrap() - 500.0).abs() < 1e-9);
        assert!((system.stream(out).imass("S_F").unwrap() - 250.0).abs() < 1e-9);
        assert_eq!(system.stream(out).id(), "out");
        assert_eq!(system.products(), vec![sludge1, out, sludge2]);
        assert!(system.last_recycle_solution().is_none());
    }

    fn recycle_system(method: SolverMethod) -> (System, [StreamId; 5]) {
        let components = library::household();
        let settings = RecycleSettings { method, ..RecycleSettings::default() };
        let mut system = System::new("recycle", &components).with_recycle_settings(settings);

        let feed = system.add_feed(Stream::with_masses(
            "feed",
            &components,
            &[("H2O", 1.0e6), ("S_F", 1000.0)],
        ));
        let recycle = system.add_stream("recycle");
        let mixed = system.add_stream("mixed");
        let effluent = system.add_stream("effluent");
        let sludge = system.add_stream("sludge");
        let product = system.add_stream("product");

        system.add_unit(Mixer::<2>::new("M1").unwrap(), &[feed, recycle], &[mixed]).unwrap();
        system.add_unit(mbr("U_MBR", 0.5), &[mixed], &[effluent, sludge]).unwrap();
        system
            .add_unit(Splitter::new("S1", [0.4, 0.6]).unwrap(), &[effluent], &[recycle, product])
            .unwrap();
        (system, [feed, recycle, mixed, sludge, product])
    }

    #[test]
    fn test_recycle_detection() {
        let (system, [_, recycle, ..]) = recycle_system(SolverMethod::Wegstein);
        let cycles = system.detect_cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), 3);
        assert_eq!(system.find_tear_streams(), vec![recycle]);
        assert!(system.evaluation_order(&[]).is_err());
        let order = system.evaluation_order(&[recycle]).unwrap();
        assert_eq!(order, vec![UnitId(0), UnitId(1), UnitId(2)]);
    }

    fn check_recycle_steady_state(
        system: &System,
        [feed, recycle, _, sludge, product]: [StreamId; 5],
    ) {
        // Water: r = 0.4 (F + r) -> r = 2/3 F
        let r_water = system.stream(recycle).imass("H2O").unwrap();
        assert!((r_water - 1.0e6 * 2.0 / 3.0).abs() < 1e-2, "recycle water {}", r_water);
        // S_F: r = 0.4 * 0.5 (F + r) -> r = F / 4
        let r_sf = system.stream(recycle).imass("S_F").unwrap();
        assert!((r_sf - 250.0).abs() < 1e-5, "recycle S_F {}", r_sf);
        // Sludge receives half of the mixed COD as biomass
        let biomass = system.stream(sludge).imass("X_B_Subst").unwrap();
        assert!((biomass - 625.0).abs() < 1e-5);

        validate_mass_conservation(
            &[system.stream(feed)],
            &[system.stream(sludge), system.stream(product)],
            1e-8,
        )
        .unwrap();
    }

    #[test]
    fn test_recycle_converges_wegstein() {
        let (mut system, ids) = recycle_system(SolverMethod::Wegstein);
        system.simulate().unwrap();
        check_recycle_steady_state(&system, ids);
        assert!(system.last_recycle_solution().unwrap().converged);
    }

    #[test]
    fn test_recycle_converges_substitution() {
        let (mut system, ids) = recycle_system(SolverMethod::Substitution);
        system.simulate().unwrap();
        check_recycle_steady_state(&system, ids);
    }

    #[test]
    #[cfg(feature = "solvers")]
    fn test_recycle_converges_newton() {
        let (mut system, ids) = recycle_system(SolverMethod::Newton);
        system.simulate().unwrap();
        check_recycle_steady_state(&system, ids);
        assert!(system.last_recycle_solution().unwrap().iterations <= 10);
    }

    #[test]
    fn test_declared_recycle_must_break_cycle() {
        let (mut system, [_, _, _, _, product]) = recycle_system(SolverMethod::Wegstein);
        system.set_recycle(&[product]).unwrap();
        let err = system.simulate().unwrap_err();
        assert!(matches!(err, SystemError::UnresolvedCycle(units) if units.len() == 3));
    }

    #[test]
    fn test_recycle_must_be_produced() {
        let (mut system, [feed, ..]) = recycle_system(SolverMethod::Wegstein);
        assert_eq!(system.set_recycle(&[feed]), Err(SystemError::InvalidRecycle("feed".into())));
    }

    #[test]
    fn test_stream_produced_twice_is_rejected() {
        let components = library::household();
        let mut system = System::new("bad", &components);
        let a = system.add_feed(Stream::new("a", &components));
        let b = system.add_feed(Stream::new("b", &components));
        let eff = system.add_stream("eff");
        let s1 = system.add_stream("s1");
        let s2 = system.add_stream("s2");

        system.add_unit(mbr("U1", 0.5), &[a], &[eff, s1]).unwrap();
        let err = system.add_unit(mbr("U2", 0.5), &[b], &[eff, s2]).unwrap_err();
        assert_eq!(
            err,
            SystemError::StreamProducedTwice {
                stream: "eff".into(),
                first: "U1".into(),
                second: "U2".into()
            }
        );
        assert_eq!(system.unit_count(), 1);
    }

    #[test]
    fn test_wiring_errors() {
        let components = library::household();
        let mut system = System::new("bad", &components);
        let a = system.add_feed(Stream::new("a", &components));
        let s = system.add_stream("s");

        let err = system.add_unit(mbr("U1", 0.5), &[s], &[a, s]).unwrap_err();
        assert!(matches!(err, SystemError::FeedAsOutlet { .. }));

        let t = system.add_stream("t");
        let err = system.add_unit(mbr("U1", 0.5), &[t], &[s, t]).unwrap_err();
        assert!(matches!(err, SystemError::SelfLoop { .. }));

        let err = system.add_unit(mbr("U1", 0.5), &[a], &[s]).unwrap_err();
        assert!(matches!(err, SystemError::Unit(UnitError::PortMismatch { .. })));

        let err = system.add_unit(mbr("U1", 0.5), &[StreamId(99)], &[s, t]).unwrap_err();
        assert_eq!(err, SystemError::UnknownStream(99));

        system.add_unit(mbr("U1", 0.5), &[a], &[s, t]).unwrap();
        let u = system.add_stream("u");
        let v = system.add_stream("v");
        let err = system.add_unit(mbr("U1", 0.5), &[s], &[u, v]).unwrap_err();
        assert_eq!(err, SystemError::DuplicateUnit("U1".into()));
    }

    #[test]
    fn test_typed_unit_access() {
        let components = library::household();
        let mut system = System::new("typed", &components);
        let feed = system.add_feed(Stream::with_masses("feed", &components, &[("S_F", 10.0)]));
        let eff = system.add_stream("eff");
        let sl = system.add_stream("sl");
        let handle = system.add_unit(mbr("U1", 0.5), &[feed], &[eff, sl]).unwrap();

        assert!(system.unit(handle).unwrap().last_run().is_none());
        system.simulate().unwrap();
        assert!((system.unit(handle).unwrap().last_run().unwrap().removed_cod - 5.0).abs() < 1e-12);
        assert_eq!(system.unit_name(handle.id()), Some("U1"));
        assert_eq!(system.find_stream("sl"), Some(sl));
    }

    #[test]
    fn test_unit_failure_names_unit() {
        let components = library::household();
        let other = library::household();
        let mut system = System::new("mismatch", &components);
        // Feed built on a different registry instance
        let feed = system.add_feed(Stream::with_masses("feed", &other, &[("S_F", 1.0)]));
        let eff = system.add_stream("eff");
        let sl = system.add_stream("sl");
        system.add_unit(mbr("U1", 0.5), &[feed], &[eff, sl]).unwrap();

        let err = system.simulate().unwrap_err();
        assert!(matches!(err, SystemError::UnitFailed { ref unit, .. } if unit == "U1"));
    }
}
