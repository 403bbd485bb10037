//! Serializable configuration for the filter and the simulation harness.
//!
//! A [RunConfig] bundles the [FilterConfig] (tuning of the particle filter itself) and the
//! [SimulationConfig] (how the synthetic scenario is generated). Configurations can be read from and
//! written to JSON, YAML or TOML; the format is chosen by file extension.
//!
//! ```
//! use landmark_pf::config::RunConfig;
//!
//! let cfg: RunConfig = toml::from_str(r#"
//!     [filter]
//!     num_particles = 250
//!     resampling_strategy = "systematic"
//!
//!     [simulation]
//!     steps = 40
//! "#).unwrap();
//! assert_eq!(cfg.filter.num_particles, 250);
//! assert_eq!(cfg.simulation.delta_t, 0.1);
//! ```
use crate::error::{FilterError, Result, check_std};
use crate::particle::{ParticleAveragingStrategy, ParticleResamplingStrategy};

use serde::{Deserialize, Serialize};

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Particle filter tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Number of particles, fixed for the filter lifetime
    pub num_particles: usize,
    /// Standard deviations of the initial pose prior (x m, y m, theta rad)
    pub initial_std: [f64; 3],
    /// Process noise standard deviations added at every prediction (x m, y m, theta rad)
    pub process_noise_std: [f64; 3],
    /// Maximum landmark distance considered by the measurement model (m)
    pub sensor_range: f64,
    /// Landmark measurement standard deviations (x m, y m)
    pub landmark_std: [f64; 2],
    pub resampling_strategy: ParticleResamplingStrategy,
    pub averaging_strategy: ParticleAveragingStrategy,
    /// Seed for the filter's random number generator
    pub seed: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            num_particles: 100,
            initial_std: [0.3, 0.3, 0.01],
            process_noise_std: [0.3, 0.3, 0.01],
            sensor_range: 50.0,
            landmark_std: [0.3, 0.3],
            resampling_strategy: ParticleResamplingStrategy::default(),
            averaging_strategy: ParticleAveragingStrategy::default(),
            seed: 42,
        }
    }
}

impl FilterConfig {
    /// Check every parameter without building a filter.
    pub fn validate(&self) -> Result<()> {
        if self.num_particles == 0 {
            return Err(FilterError::InvalidParticleCount(0));
        }
        check_std("initial_std_x", self.initial_std[0])?;
        check_std("initial_std_y", self.initial_std[1])?;
        check_std("initial_std_theta", self.initial_std[2])?;
        check_std("process_noise_std_x", self.process_noise_std[0])?;
        check_std("process_noise_std_y", self.process_noise_std[1])?;
        check_std("process_noise_std_theta", self.process_noise_std[2])?;
        if !(self.sensor_range.is_finite() && self.sensor_range >= 0.0) {
            return Err(FilterError::InvalidSensorRange(self.sensor_range));
        }
        for (name, value) in [
            ("landmark_std_x", self.landmark_std[0]),
            ("landmark_std_y", self.landmark_std[1]),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(FilterError::DegenerateMeasurementNoise { name, value });
            }
        }
        Ok(())
    }
}

/// Synthetic scenario parameters.
///
/// The vehicle drives at constant speed with a sinusoidal yaw rate through a square map of randomly
/// placed landmarks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of filter cycles
    pub steps: usize,
    /// Time between cycles (s)
    pub delta_t: f64,
    /// Forward velocity (m/s)
    pub velocity: f64,
    /// Peak yaw rate (rad/s)
    pub yaw_rate_amplitude: f64,
    /// Period of the yaw rate oscillation (s)
    pub yaw_rate_period: f64,
    /// True starting pose
    pub initial_pose: [f64; 3],
    /// Noise of the initial (GPS-like) pose estimate handed to the filter
    pub gps_std: [f64; 3],
    /// Number of landmarks to generate when no map file is given
    pub num_landmarks: usize,
    /// Landmarks are placed uniformly in `[-half_extent, half_extent]` around the start
    pub map_half_extent: f64,
    /// Range of the simulated sensor (m)
    pub sensor_range: f64,
    /// Observation noise standard deviations in the body frame (m)
    pub observation_std: [f64; 2],
    /// Noise on the reported velocity (m/s) and yaw rate (rad/s)
    pub control_noise_std: [f64; 2],
    /// Seed for scenario generation
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            steps: 200,
            delta_t: 0.1,
            velocity: 5.0,
            yaw_rate_amplitude: 0.2,
            yaw_rate_period: 20.0,
            initial_pose: [0.0, 0.0, 0.0],
            gps_std: [0.3, 0.3, 0.01],
            num_landmarks: 40,
            map_half_extent: 100.0,
            sensor_range: 50.0,
            observation_std: [0.3, 0.3],
            control_noise_std: [0.05, 0.005],
            seed: 7,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.delta_t.is_finite() && self.delta_t > 0.0) {
            return Err(FilterError::InvalidTimeStep(self.delta_t));
        }
        if !(self.sensor_range.is_finite() && self.sensor_range >= 0.0) {
            return Err(FilterError::InvalidSensorRange(self.sensor_range));
        }
        if !(self.yaw_rate_period.is_finite() && self.yaw_rate_period > 0.0) {
            return Err(FilterError::Config(format!(
                "yaw_rate_period must be positive, got {}",
                self.yaw_rate_period
            )));
        }
        if !(self.map_half_extent.is_finite() && self.map_half_extent > 0.0) {
            return Err(FilterError::Config(format!(
                "map_half_extent must be positive, got {}",
                self.map_half_extent
            )));
        }
        check_std("gps_std_x", self.gps_std[0])?;
        check_std("gps_std_y", self.gps_std[1])?;
        check_std("gps_std_theta", self.gps_std[2])?;
        check_std("observation_std_x", self.observation_std[0])?;
        check_std("observation_std_y", self.observation_std[1])?;
        check_std("control_noise_std_velocity", self.control_noise_std[0])?;
        check_std("control_noise_std_yaw_rate", self.control_noise_std[1])?;
        Ok(())
    }
}

/// Complete configuration for a simulation run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub filter: FilterConfig,
    pub simulation: SimulationConfig,
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        self.filter.validate()?;
        self.simulation.validate()
    }
    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(|e| FilterError::Config(e.to_string()))
    }
    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(|e| FilterError::Config(e.to_string()))
    }
    /// Write the configuration as YAML.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(|e| FilterError::Config(e.to_string()))?;
        file.write_all(s.as_bytes())?;
        Ok(())
    }
    /// Read the configuration from YAML.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(|e| FilterError::Config(e.to_string()))
    }
    /// Write the configuration as TOML.
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(|e| FilterError::Config(e.to_string()))?;
        file.write_all(s.as_bytes())?;
        Ok(())
    }
    /// Read the configuration from TOML.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(|e| FilterError::Config(e.to_string()))
    }
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(unsupported(p)),
        }
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(unsupported(p)),
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

fn unsupported(path: &Path) -> FilterError {
    FilterError::Config(format!(
        "unsupported configuration file extension: {}",
        path.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(RunConfig::default().validate().is_ok());
    }
    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = RunConfig::default();
        cfg.filter.num_particles = 0;
        assert!(matches!(cfg.validate(), Err(FilterError::InvalidParticleCount(0))));

        let mut cfg = RunConfig::default();
        cfg.filter.landmark_std = [0.3, 0.0];
        assert!(matches!(
            cfg.validate(),
            Err(FilterError::DegenerateMeasurementNoise { .. })
        ));

        let mut cfg = RunConfig::default();
        cfg.simulation.delta_t = -0.1;
        assert!(matches!(cfg.validate(), Err(FilterError::InvalidTimeStep(_))));
    }
    #[test]
    fn test_partial_file_uses_defaults() {
        let cfg: RunConfig = serde_json::from_str(r#"{"filter": {"num_particles": 12}}"#).unwrap();
        assert_eq!(cfg.filter.num_particles, 12);
        assert_eq!(cfg.filter.landmark_std, [0.3, 0.3]);
        assert_eq!(cfg.simulation, SimulationConfig::default());
    }
    #[test]
    fn test_wrong_array_length_rejected() {
        let result: std::result::Result<RunConfig, _> =
            serde_json::from_str(r#"{"filter": {"process_noise_std": [0.3, 0.3]}}"#);
        assert!(result.is_err());
    }
    #[test]
    fn test_file_round_trip() {
        let mut cfg = RunConfig::default();
        cfg.filter.resampling_strategy = ParticleResamplingStrategy::Multinomial;
        cfg.simulation.steps = 17;
        for ext in ["json", "yaml", "toml"] {
            let path = std::env::temp_dir().join(format!("landmark_pf_config_test.{}", ext));
            cfg.to_file(&path).unwrap();
            let loaded = RunConfig::from_file(&path).unwrap();
            assert_eq!(loaded, cfg, "round trip through {}", ext);
            let _ = std::fs::remove_file(&path);
        }
    }
    #[test]
    fn test_unsupported_extension() {
        let path = std::env::temp_dir().join("landmark_pf_config_test.ini");
        assert!(matches!(
            RunConfig::default().to_file(&path),
            Err(FilterError::Config(_))
        ));
    }
}
