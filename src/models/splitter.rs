//! Splitter model dividing one stream into multiple outlets.
//!
//! # Example
//!
//! ```
//! use sanitrain::models::Splitter;
//!
//! let splitter = Splitter::new("S1", [0.5, 0.3, 0.2]).unwrap();
//! assert_eq!(splitter.split_fraction(1), 0.3);
//!
//! // Fractions must sum to one
//! assert!(Splitter::new("S2", [0.6, 0.5]).is_err());
//! ```

use crate::*;

/// Splitter dividing one stream into `N` outlets of identical composition.
#[derive(Debug, Clone)]
pub struct Splitter<const N: usize> {
    id: String,
    split_fractions: [f64; N],
}

impl<const N: usize> Splitter<N> {
    /// Creates a splitter. Each fraction must lie in `[0, 1]` and the
    /// fractions must sum to 1 within 1e-6.
    pub fn new(id: &str, fractions: [f64; N]) -> Result<Self, UnitError> {
        for &f in &fractions {
            check_fraction(id, "split_fraction", f)?;
        }
        let sum: f64 = fractions.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(UnitError::InvalidConfiguration {
                unit: id.to_string(),
                reason: format!("split fractions must sum to 1.0, got {}", sum),
            });
        }
        Ok(Splitter { id: id.to_string(), split_fractions: fractions })
    }

    /// Gets number of outlets (compile-time constant).
    pub const fn n_outlets(&self) -> usize {
        N
    }

    /// Gets split fraction for outlet i.
    pub fn split_fraction(&self, i: usize) -> f64 {
        self.split_fractions[i]
    }

    /// Gets all split fractions.
    pub fn split_fractions(&self) -> &[f64; N] {
        &self.split_fractions
    }
}

impl<const N: usize> HasPorts for Splitter<N> {
    fn input_ports(&self) -> Vec<NamedPort> {
        vec![NamedPort::input("inlet")]
    }

    fn output_ports(&self) -> Vec<NamedPort> {
        (0..N).map(|i| NamedPort::output(&format!("outlet_{}", i))).collect()
    }
}

impl<const N: usize> UnitOp for Splitter<N> {
    fn id(&self) -> &str {
        &self.id
    }

    fn run(&mut self, ins: &[&Stream], outs: &mut [Stream]) -> Result<(), UnitError> {
        check_ports(self, ins.len(), outs.len())?;
        for (outlet, &fraction) in outs.iter_mut().zip(&self.split_fractions) {
            outlet.copy_scaled(ins[0], fraction)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library;

    #[test]
    fn test_splitter_creation() {
        let splitter = Splitter::new("S1", [0.5, 0.3, 0.2]).unwrap();
        assert_eq!(splitter.n_outlets(), 3);
        assert_eq!(splitter.split_fraction(0), 0.5);
        assert_eq!(splitter.port_count(), (1, 3));
    }

    #[test]
    fn test_splitter_computation() {
        let components = library::household();
        let inlet = Stream::with_masses("in", &components, &[("H2O", 100.0), ("S_F", 10.0)]);
        let mut splitter = Splitter::new("S1", [0.3, 0.7]).unwrap();
        let mut outs = [Stream::new("a", &components), Stream::new("b", &components)];
        splitter.run(&[&inlet], &mut outs).unwrap();

        assert!((outs[0].imass("H2O").unwrap() - 30.0).abs() < 1e-12);
        assert!((outs[1].imass("S_F").unwrap() - 7.0).abs() < 1e-12);
        // Same composition in every outlet
        assert!((outs[0].cod().unwrap() - inlet.cod().unwrap()).abs() < 1e-9);
        validate_mass_conservation(&[&inlet], &[&outs[0], &outs[1]], 1e-12).unwrap();
    }

    #[test]
    fn test_splitter_invalid_fractions() {
        let err = Splitter::new("S1", [0.6, 0.5]).unwrap_err(); // Sum > 1.0
        assert!(matches!(err, UnitError::InvalidConfiguration { .. }));
        let err = Splitter::new("S1", [1.2, -0.2]).unwrap_err();
        assert!(matches!(err, UnitError::FractionOutOfRange { .. }));
    }
}
