//! Simulation utilities for exercising the particle filter.
//!
//! This module provides:
//! - Synthetic scenario generation: a random landmark map, a ground-truth CTRV trajectory, noisy
//!   control inputs and noisy body-frame landmark observations (`Scenario`)
//! - A closed-loop driver that runs the full estimation cycle over a scenario (`run_filter`)
//! - A dead reckoning baseline integrating the noisy controls only (`dead_reckoning`)
//! - Per-step `StepRecord`s with CSV import/export and an `ErrorSummary`
use crate::config::{FilterConfig, RunConfig, SimulationConfig};
use crate::error::{FilterError, Result, check_std};
use crate::map::{Landmark, LandmarkMap};
use crate::measurements::LandmarkObservation;
use crate::particle::{ParticleFilter, SenseAxis};
use crate::{ControlInput, Pose, forward, transform_to_body, wrap_to_pi};

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use std::f64::consts::PI;
use std::fmt::{self, Display};
use std::path::Path;

/// One time step of a synthetic scenario.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulatedStep {
    /// Time since the start of the scenario (s)
    pub time: f64,
    /// Ground-truth pose at `time`
    pub true_pose: Pose,
    /// Noisy control reported for the interval ending at `time` (zero for the first step)
    pub control: ControlInput,
    /// Noisy body-frame observations of the landmarks within sensor range
    pub observations: Vec<LandmarkObservation>,
}

/// A landmark map, an initial pose estimate and the per-step sensor stream.
#[derive(Clone, Debug)]
pub struct Scenario {
    pub map: LandmarkMap,
    /// Noisy GPS-style estimate of the first true pose
    pub initial_estimate: Pose,
    pub steps: Vec<SimulatedStep>,
}

/// Place `num_landmarks` landmarks uniformly in a square of half-width `half_extent` around
/// `center`. Ids are assigned from 1.
///
/// # Errors
/// [FilterError::Config] if `half_extent` is not finite and positive.
pub fn generate_landmark_map<R: Rng + ?Sized>(
    num_landmarks: usize,
    half_extent: f64,
    center: (f64, f64),
    rng: &mut R,
) -> Result<LandmarkMap> {
    if !(half_extent.is_finite() && half_extent > 0.0) {
        return Err(FilterError::Config(format!(
            "map half extent must be positive, got {}",
            half_extent
        )));
    }
    let landmarks = (0..num_landmarks)
        .map(|i| {
            Landmark::new(
                i as i32 + 1,
                center.0 + rng.random_range(-half_extent..=half_extent),
                center.1 + rng.random_range(-half_extent..=half_extent),
            )
        })
        .collect();
    LandmarkMap::new(landmarks)
}

/// Observe every landmark within `sensor_range` of `pose`.
///
/// Observations are in the body frame with independent Gaussian noise of standard deviations
/// `std` on each axis, and carry no id.
pub fn observe_landmarks<R: Rng + ?Sized>(
    pose: &Pose,
    map: &LandmarkMap,
    sensor_range: f64,
    std: [f64; 2],
    rng: &mut R,
) -> Result<Vec<LandmarkObservation>> {
    let noise_x = gaussian("observation_std_x", std[0])?;
    let noise_y = gaussian("observation_std_y", std[1])?;
    Ok(map
        .within_range(pose.x, pose.y, sensor_range)
        .map(|landmark| {
            let (x, y) = transform_to_body(pose, landmark.x, landmark.y);
            LandmarkObservation::new(x + noise_x.sample(rng), y + noise_y.sample(rng))
        })
        .collect())
}

fn gaussian(name: &'static str, std: f64) -> Result<Normal<f64>> {
    check_std(name, std)?;
    Normal::new(0.0, std).map_err(|_| FilterError::InvalidStandardDeviation { name, value: std })
}

/// Generate a scenario from `config`.
///
/// If `map` is `None` a random map is generated around the initial pose. The yaw rate follows
/// $\omega(t) = A \sin(2\pi t / T)$.
pub fn generate_scenario(config: &SimulationConfig, map: Option<LandmarkMap>) -> Result<Scenario> {
    config.validate()?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut true_pose = Pose::from(config.initial_pose);
    let map = match map {
        Some(map) => map,
        None => generate_landmark_map(
            config.num_landmarks,
            config.map_half_extent,
            (true_pose.x, true_pose.y),
            &mut rng,
        )?,
    };
    let gps = [
        gaussian("gps_std_x", config.gps_std[0])?,
        gaussian("gps_std_y", config.gps_std[1])?,
        gaussian("gps_std_theta", config.gps_std[2])?,
    ];
    let initial_estimate = Pose::new(
        true_pose.x + gps[0].sample(&mut rng),
        true_pose.y + gps[1].sample(&mut rng),
        true_pose.theta + gps[2].sample(&mut rng),
    );
    let velocity_noise = gaussian("control_noise_std_velocity", config.control_noise_std[0])?;
    let yaw_rate_noise = gaussian("control_noise_std_yaw_rate", config.control_noise_std[1])?;

    let mut steps = Vec::with_capacity(config.steps);
    for k in 0..config.steps {
        let time = k as f64 * config.delta_t;
        let control = if k == 0 {
            ControlInput::default()
        } else {
            let previous_time = time - config.delta_t;
            let yaw_rate = config.yaw_rate_amplitude
                * (2.0 * PI * previous_time / config.yaw_rate_period).sin();
            forward(&mut true_pose, config.velocity, yaw_rate, config.delta_t);
            ControlInput {
                velocity: config.velocity + velocity_noise.sample(&mut rng),
                yaw_rate: yaw_rate + yaw_rate_noise.sample(&mut rng),
            }
        };
        let observations = observe_landmarks(
            &true_pose,
            &map,
            config.sensor_range,
            config.observation_std,
            &mut rng,
        )?;
        steps.push(SimulatedStep {
            time,
            true_pose,
            control,
            observations,
        });
    }
    debug!(
        "generated scenario: {} steps, {} landmarks",
        steps.len(),
        map.len()
    );
    Ok(Scenario {
        map,
        initial_estimate,
        steps,
    })
}

/// Filter output and error for a single step, flattened for CSV.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: usize,
    pub time: f64,
    pub true_x: f64,
    pub true_y: f64,
    pub true_theta: f64,
    pub est_x: f64,
    pub est_y: f64,
    pub est_theta: f64,
    /// Horizontal distance between estimate and truth (m)
    pub position_error: f64,
    /// Heading error wrapped to ±π (rad)
    pub heading_error: f64,
    /// Effective sample size after the weight update
    pub effective_sample_size: f64,
    pub best_weight: f64,
    pub num_observations: usize,
    /// Landmark ids associated by the best particle, space separated
    pub associations: String,
    pub sense_x: String,
    pub sense_y: String,
}

impl StepRecord {
    fn new(step: usize, truth: &SimulatedStep, estimate: Pose) -> Self {
        StepRecord {
            step,
            time: truth.time,
            true_x: truth.true_pose.x,
            true_y: truth.true_pose.y,
            true_theta: truth.true_pose.theta,
            est_x: estimate.x,
            est_y: estimate.y,
            est_theta: estimate.theta,
            position_error: crate::distance(
                estimate.x,
                estimate.y,
                truth.true_pose.x,
                truth.true_pose.y,
            ),
            heading_error: wrap_to_pi(estimate.theta - truth.true_pose.theta),
            effective_sample_size: 1.0,
            best_weight: 1.0,
            num_observations: truth.observations.len(),
            associations: String::new(),
            sense_x: String::new(),
            sense_y: String::new(),
        }
    }
}

/// Aggregate error statistics over a run.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ErrorSummary {
    pub steps: usize,
    pub rmse_x: f64,
    pub rmse_y: f64,
    pub rmse_theta: f64,
    pub mean_position_error: f64,
    pub max_position_error: f64,
}
impl Display for ErrorSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} steps: RMSE x {:.4} m, y {:.4} m, theta {:.4} rad; position error mean {:.4} m, max {:.4} m",
            self.steps,
            self.rmse_x,
            self.rmse_y,
            self.rmse_theta,
            self.mean_position_error,
            self.max_position_error
        )
    }
}

/// Sequence of step records from one run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SimulationResult {
    pub records: Vec<StepRecord>,
}

impl SimulationResult {
    pub fn summary(&self) -> ErrorSummary {
        let n = self.records.len();
        if n == 0 {
            return ErrorSummary::default();
        }
        ErrorSummary {
            steps: n,
            rmse_x: rms(&self.records, |r| r.est_x - r.true_x),
            rmse_y: rms(&self.records, |r| r.est_y - r.true_y),
            rmse_theta: rms(&self.records, |r| r.heading_error),
            mean_position_error: self.records.iter().map(|r| r.position_error).sum::<f64>()
                / n as f64,
            max_position_error: self
                .records
                .iter()
                .map(|r| r.position_error)
                .fold(0.0, f64::max),
        }
    }
    /// Writes the records to a CSV file with a header row.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
    /// Reads records previously written by [SimulationResult::to_csv].
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for result in rdr.deserialize() {
            let record: StepRecord = result?;
            records.push(record);
        }
        Ok(SimulationResult { records })
    }
}

fn rms(records: &[StepRecord], error: impl Fn(&StepRecord) -> f64) -> f64 {
    let sum_of_squares: f64 = records.iter().map(|r| error(r).powi(2)).sum();
    (sum_of_squares / records.len() as f64).sqrt()
}

/// Run the particle filter over a scenario.
///
/// The first step initializes the filter from the scenario's initial estimate; every later step
/// predicts with that step's control, then updates and resamples. The recorded estimate is taken
/// after resampling.
pub fn run_filter(config: &FilterConfig, scenario: &Scenario) -> Result<SimulationResult> {
    config.validate()?;
    let mut pf = ParticleFilter::with_seed(config.num_particles, config.seed)?
        .with_resampling_strategy(config.resampling_strategy)
        .with_averaging_strategy(config.averaging_strategy);
    let mut records = Vec::with_capacity(scenario.steps.len());
    let mut previous_time: Option<f64> = None;
    for (i, step) in scenario.steps.iter().enumerate() {
        match previous_time {
            None => pf.initialize(scenario.initial_estimate, config.initial_std)?,
            Some(t) => pf.predict(
                step.time - t,
                config.process_noise_std,
                step.control.velocity,
                step.control.yaw_rate,
            )?,
        }
        pf.update_weights(
            config.sensor_range,
            config.landmark_std,
            &step.observations,
            &scenario.map,
        )?;
        let effective_sample_size = pf.effective_sample_size();
        pf.resample()?;

        let mut record = StepRecord::new(i, step, pf.get_estimate()?);
        record.effective_sample_size = effective_sample_size;
        if let Some(best) = pf.best_particle() {
            record.best_weight = best.weight;
            record.associations = best.get_associations();
            record.sense_x = best.get_sense_coord(SenseAxis::X);
            record.sense_y = best.get_sense_coord(SenseAxis::Y);
        }
        if i % 50 == 0 {
            info!(
                "step {}/{}: position error {:.3} m, heading error {:.4} rad, N_eff {:.1}",
                i,
                scenario.steps.len(),
                record.position_error,
                record.heading_error,
                effective_sample_size
            );
        }
        records.push(record);
        previous_time = Some(step.time);
    }
    Ok(SimulationResult { records })
}

/// Integrate the noisy controls from the initial estimate without any measurement updates.
pub fn dead_reckoning(scenario: &Scenario) -> SimulationResult {
    let mut pose = scenario.initial_estimate;
    let mut records = Vec::with_capacity(scenario.steps.len());
    let mut previous_time: Option<f64> = None;
    for (i, step) in scenario.steps.iter().enumerate() {
        if let Some(t) = previous_time {
            forward(
                &mut pose,
                step.control.velocity,
                step.control.yaw_rate,
                step.time - t,
            );
        }
        records.push(StepRecord::new(i, step, pose));
        previous_time = Some(step.time);
    }
    SimulationResult { records }
}

/// Generate a scenario and run the filter over it.
pub fn run_simulation(
    config: &RunConfig,
    map: Option<LandmarkMap>,
) -> Result<(Scenario, SimulationResult)> {
    config.validate()?;
    let scenario = generate_scenario(&config.simulation, map)?;
    let result = run_filter(&config.filter, &scenario)?;
    info!("particle filter: {}", result.summary());
    Ok((scenario, result))
}
