//! Plain-text stream and removal reports.
//!
//! # Example
//!
//! ```
//! use sanitrain::{library, Stream};
//! use sanitrain::report::{StreamSummary, percent_removal};
//!
//! let components = library::household();
//! let s = Stream::with_masses("eff", &components, &[("H2O", 1.0e6), ("S_F", 40.0)]);
//!
//! let text = StreamSummary::new(&s, "MBR Effluent").to_string();
//! assert!(text.starts_with("--- MBR Effluent ---"));
//! assert!(text.contains("  S_F: 40"));
//!
//! assert_eq!(percent_removal(Some(100.0), Some(40.0)), Some(60.0));
//! ```

use crate::{Indicator, Phase, Stream};
use std::fmt;

/// Component flows at or below this magnitude are not listed [g/h].
pub const DEFAULT_TOLERANCE: f64 = 1e-12;

/// Formats a number with six significant digits, switching to exponent
/// notation for very large or small magnitudes.
pub fn sig6(value: f64) -> String {
    if value == 0.0 || !value.is_finite() {
        return format!("{}", value);
    }
    let exp = value.abs().log10().floor() as i32;
    if !(-5..6).contains(&exp) {
        let text = format!("{:.5e}", value);
        return match text.split_once('e') {
            Some((mantissa, exponent)) if mantissa.contains('.') => format!(
                "{}e{}",
                mantissa.trim_end_matches('0').trim_end_matches('.'),
                exponent
            ),
            _ => text,
        };
    }
    let decimals = (5 - exp).max(0) as usize;
    let text = format!("{:.*}", decimals, value);
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    }
}

/// Human-readable summary of one stream.
///
/// Lists the total mass flow, the phase, the liquid indicators and every
/// component flow above the tolerance.
#[derive(Debug, Clone, Copy)]
pub struct StreamSummary<'a> {
    stream: &'a Stream,
    label: &'a str,
    tolerance: f64,
}

impl<'a> StreamSummary<'a> {
    /// Creates a summary with the default tolerance.
    pub fn new(stream: &'a Stream, label: &'a str) -> Self {
        StreamSummary { stream, label, tolerance: DEFAULT_TOLERANCE }
    }

    /// Sets the tolerance below which component flows are omitted.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }
}

impl fmt::Display for StreamSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.stream;
        writeln!(f, "--- {} ---", self.label)?;
        writeln!(f, "ID: {}", s.id())?;
        writeln!(f, "Total mass flow: {} kg/hr", sig6(s.f_mass() / 1000.0))?;
        writeln!(f, "Phase: {}", s.phase())?;

        if s.phase() != Phase::Gas {
            for indicator in Indicator::ALL {
                if let Some(value) = s.indicator(indicator) {
                    writeln!(f, "{}: {} mg/L", indicator, sig6(value))?;
                }
            }
        }

        writeln!(f, "Component mass rates (g/hr):")?;
        let mut printed_any = false;
        for (id, mass) in s.nonzero_masses(self.tolerance) {
            writeln!(f, "  {}: {}", id, sig6(mass))?;
            printed_any = true;
        }
        if !printed_any {
            writeln!(f, "  (all components ~0)")?;
        }
        Ok(())
    }
}

/// Percent removal `100 * (in - out) / in`.
///
/// `None` when either value is unavailable or the influent value is zero.
pub fn percent_removal(vin: Option<f64>, vout: Option<f64>) -> Option<f64> {
    let (vin, vout) = (vin?, vout?);
    if vin == 0.0 {
        return None;
    }
    Some(100.0 * (vin - vout) / vin)
}

/// Percent removal of an indicator concentration between two streams.
pub fn percent_removal_of(
    influent: &Stream,
    effluent: &Stream,
    indicator: Indicator,
) -> Option<f64> {
    percent_removal(influent.indicator(indicator), effluent.indicator(indicator))
}

/// Removal percentages of all indicators for one treatment train.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovalSummary {
    /// Train label, e.g. `Greywater→MBR`
    pub label: String,
    /// Available removals in report order
    pub removals: Vec<(Indicator, f64)>,
}

impl RemovalSummary {
    /// Computes the removals between an influent and an effluent.
    ///
    /// Indicators without a value are left out.
    pub fn new(label: &str, influent: &Stream, effluent: &Stream) -> Self {
        let removals = Indicator::ALL
            .into_iter()
            .filter_map(|ind| percent_removal_of(influent, effluent, ind).map(|r| (ind, r)))
            .collect();
        RemovalSummary { label: label.to_string(), removals }
    }

    /// Removal of one indicator, if available.
    pub fn get(&self, indicator: Indicator) -> Option<f64> {
        self.removals.iter().find(|(ind, _)| *ind == indicator).map(|(_, r)| *r)
    }
}

impl fmt::Display for RemovalSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (indicator, removal) in &self.removals {
            writeln!(f, "[{}] {} removal: {:.2}%", self.label, indicator, removal)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library;

    #[test]
    fn test_sig6() {
        assert_eq!(sig6(0.0), "0");
        assert_eq!(sig6(40.0), "40");
        assert_eq!(sig6(123.456789), "123.457");
        assert_eq!(sig6(0.0015), "0.0015");
        assert_eq!(sig6(27083333.33), "2.70833e7");
        assert_eq!(sig6(-2.5), "-2.5");
        assert_eq!(sig6(1.0e6), "1e6");
        assert_eq!(sig6(3.2e-7), "3.2e-7");
    }

    #[test]
    fn test_percent_removal() {
        assert_eq!(percent_removal(Some(100.0), Some(40.0)), Some(60.0));
        assert_eq!(percent_removal(Some(0.0), Some(40.0)), None);
        assert_eq!(percent_removal(None, Some(1.0)), None);
        assert_eq!(percent_removal(Some(1.0), None), None);
        // Negative when the effluent is more concentrated
        assert_eq!(percent_removal(Some(50.0), Some(100.0)), Some(-100.0));
    }

    #[test]
    fn test_liquid_summary() {
        let components = library::household();
        let s = Stream::with_masses("eff", &components, &[("H2O", 1.0e6), ("S_F", 40.0)]);
        let text = StreamSummary::new(&s, "Effluent").to_string();

        assert!(text.contains("ID: eff"));
        assert!(text.contains("Total mass flow: 1000.04 kg/hr"));
        assert!(text.contains("Phase: l"));
        assert!(text.contains("COD: "));
        assert!(text.contains("TSS: 0 mg/L"));
        assert!(text.contains("Component mass rates (g/hr):\n  H2O: 1e6\n  S_F: 40\n"));
    }

    #[test]
    fn test_gas_summary_has_no_indicators() {
        let components = library::household();
        let mut gas = Stream::with_masses("biogas", &components, &[("CH4", 150.0)]);
        gas.set_phase(Phase::Gas);
        let text = StreamSummary::new(&gas, "AD Biogas").to_string();

        assert!(text.contains("Phase: g"));
        assert!(!text.contains("mg/L"));
        assert!(text.contains("  CH4: 150"));
    }

    #[test]
    fn test_empty_summary() {
        let components = library::household();
        let s = Stream::new("sludge", &components);
        let text = StreamSummary::new(&s, "Sludge").to_string();
        assert!(text.contains("  (all components ~0)"));
        assert!(!text.contains("COD"));
    }

    #[test]
    fn test_removal_summary() {
        let components = library::household();
        let inf = Stream::with_masses("in", &components, &[("H2O", 1.0e6), ("S_F", 100.0)]);
        // Same total flow, so the concentration ratio equals the load ratio
        let eff = Stream::with_masses("out", &components, &[("H2O", 1.0e6 + 60.0), ("S_F", 40.0)]);
        let summary = RemovalSummary::new("Greywater→MBR", &inf, &eff);

        let cod = summary.get(Indicator::Cod).unwrap();
        assert!((cod - 60.0).abs() < 1e-9);
        // TSS is zero in the influent
        assert_eq!(summary.get(Indicator::TotalSuspendedSolids), None);
        assert!(summary.to_string().starts_with("[Greywater→MBR] COD removal: 60.0"));
    }
}
