//! TOML configuration of the household train.
//!
//! Every section has defaults, so partial files are valid:
//!
//! ```
//! use sanitrain::config::TrainConfig;
//!
//! let config = TrainConfig::from_toml_str(
//!     r#"
//!     population = 250
//!
//!     [mbr]
//!     cod_removal = 0.9
//!
//!     [digester.biogas_mode]
//!     mode = "mass_proxy"
//!     component = "CH4"
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.population, 250.0);
//! assert_eq!(config.mbr.cod_removal, 0.9);
//! assert_eq!(config.mbr.nh4_removal, 0.2);
//! assert_eq!(config.digester.cod_removal, 0.60);
//! ```

use crate::UnitError;
use crate::models::{DigesterConfig, MbrConfig, PerCapitaLoads};
use crate::solvers::RecycleSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O failure while reading a file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed TOML or mismatched types
    #[error("Parse error: {0}")]
    Parse(String),

    /// A value outside its admissible range
    #[error("Invalid value '{key}': {value} - {reason}")]
    InvalidValue {
        /// Configuration key
        key: String,
        /// Offending value
        value: String,
        /// Why it was rejected
        reason: String,
    },
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

fn invalid(key: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn unit_invalid(section: &str, err: UnitError) -> ConfigError {
    match err {
        UnitError::FractionOutOfRange { name, value, range, .. } => {
            invalid(&format!("{}.{}", section, name), value, &format!("must lie in {}", range))
        }
        other => invalid(section, "", &other.to_string()),
    }
}

/// Household train configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Connected population
    pub population: f64,
    /// Per-capita greywater loads
    pub greywater: PerCapitaLoads,
    /// Per-capita blackwater loads
    pub blackwater: PerCapitaLoads,
    /// Greywater MBR settings
    pub mbr: MbrConfig,
    /// Blackwater digester settings
    pub digester: DigesterConfig,
    /// Recycle convergence settings
    pub recycle: RecycleSettings,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            population: 10_000.0,
            greywater: PerCapitaLoads::greywater(),
            blackwater: PerCapitaLoads::blackwater(),
            mbr: MbrConfig::default().with_nh4_removal(0.2),
            digester: DigesterConfig::default(),
            recycle: RecycleSettings::default(),
        }
    }
}

impl TrainConfig {
    /// Parses and validates a TOML document.
    ///
    /// The document is layered over [`TrainConfig::default`] key by key, so
    /// a partial section keeps the household defaults of the keys it omits.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let overrides: toml::Table = toml::from_str(text)?;
        let mut merged = toml::Value::try_from(TrainConfig::default())
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        merge_values(&mut merged, toml::Value::Table(overrides));
        let config = merged.try_into::<TrainConfig>()?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Self::from_toml_str(&text)
    }

    /// Serializes the configuration to TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Checks population, loads, unit fractions and solver settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.population.is_finite() && self.population >= 0.0) {
            return Err(invalid("population", self.population, "must be a non-negative number"));
        }
        for (section, loads) in [("greywater", &self.greywater), ("blackwater", &self.blackwater)] {
            validate_loads(section, loads)?;
        }
        self.mbr.validate("mbr").map_err(|e| unit_invalid("mbr", e))?;
        self.digester.validate("digester").map_err(|e| unit_invalid("digester", e))?;
        if self.recycle.max_iterations == 0 {
            return Err(invalid("recycle.max_iterations", 0, "must be at least 1"));
        }
        if !(self.recycle.tolerance > 0.0) {
            return Err(invalid("recycle.tolerance", self.recycle.tolerance, "must be positive"));
        }
        Ok(())
    }
}

/// Overlays `overrides` onto `base`. Tables merge per key; any other value
/// replaces the base value whole.
fn merge_values(base: &mut toml::Value, overrides: toml::Value) {
    match (base, overrides) {
        (toml::Value::Table(base), toml::Value::Table(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(&key) {
                    Some(slot) => merge_values(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn validate_loads(section: &str, loads: &PerCapitaLoads) -> Result<(), ConfigError> {
    let named = [
        ("volume_l", loads.volume_l),
        ("cod", loads.cod),
        ("nitrogen", loads.nitrogen),
        ("phosphorus", loads.phosphorus),
        ("potassium", loads.potassium),
        ("sulfate", loads.sulfate),
    ];
    let traces = loads.traces.iter().map(|(k, v)| (k.as_str(), *v));
    for (key, value) in named.into_iter().chain(traces) {
        if !(value.is_finite() && value >= 0.0) {
            let key = format!("{}.{}", section, key);
            return Err(invalid(&key, value, "loads must be non-negative"));
        }
    }
    if !(0.0..=1.0).contains(&loads.soluble_cod_fraction) {
        return Err(invalid(
            &format!("{}.soluble_cod_fraction", section),
            loads.soluble_cod_fraction,
            "must lie in [0, 1]",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BiogasMode;
    use crate::solvers::SolverMethod;

    #[test]
    fn test_defaults() {
        let config = TrainConfig::default();
        assert_eq!(config.population, 10_000.0);
        assert_eq!(config.mbr.cod_removal, 0.85);
        assert_eq!(config.mbr.nh4_removal, 0.2);
        assert_eq!(config.digester.biogas_mode, BiogasMode::Chemical);
        assert_eq!(config.recycle.method, SolverMethod::Wegstein);
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(TrainConfig::from_toml_str("").unwrap(), TrainConfig::default());
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = TrainConfig::default();
        config.population = 42.0;
        config.recycle.method = SolverMethod::Substitution;
        let text = config.to_toml_string().unwrap();
        assert_eq!(TrainConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_invalid_fraction_is_rejected() {
        let err = TrainConfig::from_toml_str("[mbr]\nsolids_capture = 1.2").unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "mbr.solids_capture")
        );
        assert!(err.to_string().contains("1.2"));

        let err = TrainConfig::from_toml_str("[digester]\nmethane_fraction = 1.0").unwrap_err();
        let expected = "digester.methane_fraction";
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == expected));
    }

    #[test]
    fn test_invalid_population_and_loads() {
        let err = TrainConfig::from_toml_str("population = -5").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "population"));

        let err = TrainConfig::from_toml_str("[blackwater]\ncod = -1.0").unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "blackwater.cod")
        );
    }

    #[test]
    fn test_partial_blackwater_keeps_blackwater_defaults() {
        let config = TrainConfig::from_toml_str("[blackwater]\ncod = 80.0").unwrap();
        let defaults = PerCapitaLoads::blackwater();
        assert_eq!(config.blackwater.cod, 80.0);
        assert_eq!(config.blackwater.nitrogen, defaults.nitrogen);
        assert_eq!(config.blackwater.volume_l, defaults.volume_l);
        assert_eq!(config.blackwater.traces, defaults.traces);
        assert_eq!(config.greywater, PerCapitaLoads::greywater());
    }

    #[test]
    fn test_partial_mbr_keeps_household_nh4_removal() {
        let config = TrainConfig::from_toml_str("[mbr]\ncod_removal = 0.85").unwrap();
        assert_eq!(config.mbr.nh4_removal, 0.2);
        assert_eq!(config.mbr, TrainConfig::default().mbr);
    }

    #[test]
    fn test_partial_traces_keep_other_traces() {
        let config = TrainConfig::from_toml_str("[greywater.traces]\nDiclo = 1e-4").unwrap();
        let defaults = PerCapitaLoads::greywater();
        assert_eq!(config.greywater.traces["Diclo"], 1e-4);
        assert_eq!(config.greywater.traces.len(), defaults.traces.len());
        assert_eq!(config.greywater.traces["Meto"], defaults.traces["Meto"]);
    }

    #[test]
    fn test_lists_replace_defaults() {
        let config = TrainConfig::from_toml_str("[mbr]\nbiodegradable_ids = [\"S_F\"]").unwrap();
        assert_eq!(config.mbr.biodegradable_ids, vec!["S_F".to_string()]);
    }

    #[test]
    fn test_biogas_mode_override() {
        let config = TrainConfig::from_toml_str(
            "[digester.biogas_mode]\nmode = \"mass_proxy\"\ncomponent = \"CH4\"",
        )
        .unwrap();
        let proxy = BiogasMode::MassProxy { component: "CH4".to_string() };
        assert_eq!(config.digester.biogas_mode, proxy);
        assert_eq!(config.digester.cod_removal, 0.60);
    }

    #[test]
    fn test_duplicate_pool_ids_rejected() {
        let err = TrainConfig::from_toml_str("[mbr]\nbiodegradable_ids = [\"S_F\", \"S_F\"]")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "mbr"));
        assert!(err.to_string().contains("more than once"));

        let text = "[digester]\nbiodegradable_ids = [\"X_B_Subst\", \"X_B_Subst\"]";
        let err = TrainConfig::from_toml_str(text).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "digester"));
    }

    #[test]
    fn test_parse_error() {
        let err = TrainConfig::from_toml_str("population = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = TrainConfig::from_file("/nonexistent/sanitrain.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_config_error_display() {
        let err = invalid("recycle.tolerance", -1.0, "must be positive");
        assert!(err.to_string().contains("recycle.tolerance"));
    }
}
