//! Mixer model combining multiple inlet streams.
//!
//! # Example
//!
//! ```
//! use sanitrain::{library, Stream, UnitOp};
//! use sanitrain::models::Mixer;
//!
//! let components = library::household();
//! let a = Stream::with_masses("a", &components, &[("H2O", 100.0), ("S_F", 1.0)]);
//! let b = Stream::with_masses("b", &components, &[("H2O", 50.0)]);
//!
//! let mut mixer: Mixer<2> = Mixer::new("M1").unwrap();
//! let mut outs = [Stream::new("mixed", &components)];
//! mixer.run(&[&a, &b], &mut outs).unwrap();
//!
//! assert_eq!(outs[0].imass("H2O"), Some(150.0));
//! ```

use crate::*;

/// Mixer combining `N` inlets into one outlet, component by component.
///
/// The outlet is a gas only when every inlet is a gas.
#[derive(Debug, Clone)]
pub struct Mixer<const N: usize> {
    id: String,
}

impl<const N: usize> Mixer<N> {
    /// Creates a mixer with `N` inlets. At least one inlet is required.
    pub fn new(id: &str) -> Result<Self, UnitError> {
        if N == 0 {
            return Err(UnitError::InvalidConfiguration {
                unit: id.to_string(),
                reason: "a mixer needs at least one inlet".to_string(),
            });
        }
        Ok(Mixer { id: id.to_string() })
    }

    /// Gets number of inlets (compile-time constant).
    pub const fn n_inlets(&self) -> usize {
        N
    }
}

impl<const N: usize> HasPorts for Mixer<N> {
    fn input_ports(&self) -> Vec<NamedPort> {
        (0..N).map(|i| NamedPort::input(&format!("inlet_{}", i))).collect()
    }

    fn output_ports(&self) -> Vec<NamedPort> {
        vec![NamedPort::output("outlet")]
    }
}

impl<const N: usize> UnitOp for Mixer<N> {
    fn id(&self) -> &str {
        &self.id
    }

    fn run(&mut self, ins: &[&Stream], outs: &mut [Stream]) -> Result<(), UnitError> {
        check_ports(self, ins.len(), outs.len())?;
        let outlet = &mut outs[0];
        outlet.copy_like(ins[0])?;
        for inlet in &ins[1..] {
            outlet.add_from(inlet)?;
        }
        let all_gas = ins.iter().all(|s| s.phase() == Phase::Gas);
        outlet.set_phase(if all_gas { Phase::Gas } else { Phase::Liquid });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library;

    #[test]
    fn test_mixer_creation() {
        let mixer: Mixer<3> = Mixer::new("M1").unwrap();
        assert_eq!(mixer.n_inlets(), 3);
        assert_eq!(mixer.port_count(), (3, 1));
        assert!(Mixer::<0>::new("M0").is_err());
    }

    #[test]
    fn test_mixer_computation() {
        let components = library::household();
        let a = Stream::with_masses("a", &components, &[("H2O", 1000.0), ("S_F", 3.0)]);
        let b = Stream::with_masses("b", &components, &[("H2O", 500.0), ("S_NH4", 2.0)]);
        let mut mixer: Mixer<2> = Mixer::new("M1").unwrap();
        let mut outs = [Stream::new("out", &components)];
        mixer.run(&[&a, &b], &mut outs).unwrap();

        assert_eq!(outs[0].imass("H2O"), Some(1500.0));
        assert_eq!(outs[0].imass("S_F"), Some(3.0));
        assert_eq!(outs[0].imass("S_NH4"), Some(2.0));
        validate_mass_conservation(&[&a, &b], &[&outs[0]], 1e-12).unwrap();
    }

    #[test]
    fn test_mixer_phase() {
        let components = library::household();
        let mut gas = Stream::with_masses("g", &components, &[("CH4", 1.0)]);
        gas.set_phase(Phase::Gas);
        let liquid = Stream::with_masses("l", &components, &[("H2O", 1.0)]);

        let mut mixer: Mixer<2> = Mixer::new("M1").unwrap();
        let mut outs = [Stream::new("out", &components)];
        mixer.run(&[&gas, &liquid], &mut outs).unwrap();
        assert_eq!(outs[0].phase(), Phase::Liquid);

        mixer.run(&[&gas, &gas], &mut outs).unwrap();
        assert_eq!(outs[0].phase(), Phase::Gas);
    }
}
