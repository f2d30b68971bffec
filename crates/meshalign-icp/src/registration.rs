use std::{sync::Arc, time::Instant};

use glam::DVec3;
use meshalign_3d::{pointcloud::PointCloud, transforms::RigidTransform};
use parking_lot::RwLock;

use crate::{
    config::{ConfigError, RegistrationConfig, StopPolicy},
    correspondence::{find_correspondences, Correspondence},
    estimator::{EstimateError, RigidMotionEstimator},
    index::{build_index, NearestNeighborIndex, Neighbor},
    kdtree::KdTreeError,
    parallel::ParallelError,
};

/// Errors raised by the registration loop itself.
///
/// Numerical problems inside one iteration are not errors, they are
/// reported through [`StepOutcome::Skipped`].
#[derive(thiserror::Error, Debug)]
pub enum RegistrationError {
    /// The reference index could not be built.
    #[error(transparent)]
    Index(#[from] KdTreeError),

    /// `tick` was called while no session is active.
    #[error("registration loop is not active")]
    NotActive,

    /// Batch query dispatch failed.
    #[error(transparent)]
    Parallel(#[from] ParallelError),

    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Shared, read-only view of the cumulative transform.
///
/// Readers always see a whole transform, either the one before or the one
/// after an iteration.
#[derive(Debug, Clone, Default)]
pub struct TransformHandle(Arc<RwLock<RigidTransform>>);

impl TransformHandle {
    /// The latest published transform.
    pub fn get(&self) -> RigidTransform {
        *self.0.read()
    }

    fn publish(&self, transform: RigidTransform) {
        *self.0.write() = transform;
    }
}

/// State of a [`RegistrationLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// No session: no index and no moving cloud are held.
    Idle,
    /// A session is active and every tick runs one iteration.
    Iterating,
}

/// How an iteration ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The estimate was updated and published.
    Applied,
    /// The estimate was updated and the update was below the convergence
    /// tolerances. The session has ended.
    Converged,
    /// The iteration budget is spent. The session has ended.
    IterationLimit,
    /// No update could be computed, the previous estimate stays in place.
    Skipped(EstimateError),
}

impl StepOutcome {
    /// Whether this outcome ended the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepOutcome::Converged | StepOutcome::IterationLimit)
    }
}

/// Summary of one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    /// 1-based iteration number within the session.
    pub iteration: usize,
    /// Correspondences that took part in the estimate.
    pub correspondences: usize,
    /// Correspondences removed by outlier rejection.
    pub rejected: usize,
    /// RMS distance of the used correspondences before the update.
    pub rmse: f64,
    /// Rotation angle of the applied update, in radians.
    pub delta_angle: f64,
    /// Translation change of the cumulative transform.
    pub delta_translation: f64,
    /// What happened.
    pub outcome: StepOutcome,
}

struct Session {
    index: Box<dyn NearestNeighborIndex>,
    moving: Vec<DVec3>,
    neighbors: Vec<Neighbor>,
    iteration: usize,
    estimate: RigidTransform,
}

// rmse of a skipped iteration, applied ones take it from the estimate
fn rmse(correspondences: &[Correspondence]) -> f64 {
    if correspondences.is_empty() {
        return 0.0;
    }
    let sum = correspondences.iter().map(|c| c.distance_sq).sum::<f64>();
    (sum / correspondences.len() as f64).sqrt()
}

/// Iterative closest point registration driven one step per host frame.
///
/// The loop never blocks: the host calls [`RegistrationLoop::tick`] once per
/// frame and every call runs exactly one iteration. External readers follow
/// the estimate through a [`TransformHandle`].
///
/// # Example
///
/// ```
/// use meshalign_3d::{pointcloud::PointCloud, transforms::RigidTransform};
/// use meshalign_icp::{RegistrationConfig, RegistrationLoop};
///
/// let reference = PointCloud::new(vec![
///     [0.0, 0.0, 0.0],
///     [1.0, 0.0, 0.0],
///     [0.0, 1.0, 0.0],
///     [0.0, 0.0, 1.0],
/// ])?;
///
/// let mut registration = RegistrationLoop::new(RegistrationConfig::default())?;
/// let handle = registration.transform_handle();
///
/// registration.activate(&reference, &reference, RigidTransform::IDENTITY)?;
/// let report = registration.tick()?;
/// assert_eq!(report.iteration, 1);
/// assert!(handle.get().translation.length() < 1e-9);
///
/// registration.deactivate();
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct RegistrationLoop {
    config: RegistrationConfig,
    estimator: RigidMotionEstimator,
    handle: TransformHandle,
    session: Option<Session>,
}

impl RegistrationLoop {
    /// Create an idle loop.
    pub fn new(config: RegistrationConfig) -> Result<Self, RegistrationError> {
        config.validate()?;
        Ok(Self {
            estimator: RigidMotionEstimator::from_config(&config),
            config,
            handle: TransformHandle::default(),
            session: None,
        })
    }

    /// The configuration in use.
    pub fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> LoopState {
        if self.session.is_some() {
            LoopState::Iterating
        } else {
            LoopState::Idle
        }
    }

    /// A handle through which other components read the published transform.
    pub fn transform_handle(&self) -> TransformHandle {
        self.handle.clone()
    }

    /// The latest published transform.
    pub fn current_transform(&self) -> RigidTransform {
        self.handle.get()
    }

    /// Iterations run in the active session, or `None` when idle.
    pub fn iteration(&self) -> Option<usize> {
        self.session.as_ref().map(|s| s.iteration)
    }

    /// Start a session.
    ///
    /// Builds the index over `reference`, captures `moving`, and publishes
    /// `initial`, the pose of the moving cloud in the reference frame. An
    /// active session is replaced.
    pub fn activate(
        &mut self,
        reference: &PointCloud,
        moving: &PointCloud,
        initial: RigidTransform,
    ) -> Result<(), RegistrationError> {
        if self.session.is_some() {
            log::info!("replacing active registration session");
        }
        // release the old index before building the new one
        self.session = None;

        let start = Instant::now();
        let index = build_index(self.config.backend, reference.points())?;
        log::info!(
            "registration active: {} reference points, {} moving points, index built in {:?}",
            reference.len(),
            moving.len(),
            start.elapsed()
        );

        self.handle.publish(initial);
        self.session = Some(Session {
            index,
            moving: moving.iter().collect(),
            neighbors: Vec::with_capacity(moving.len()),
            iteration: 0,
            estimate: initial,
        });
        Ok(())
    }

    /// End the session and release the index and scratch buffers.
    ///
    /// The published transform keeps its last value.
    pub fn deactivate(&mut self) {
        if let Some(session) = self.session.take() {
            log::info!(
                "registration stopped after {} iterations",
                session.iteration
            );
        }
    }

    /// Run exactly one iteration.
    pub fn tick(&mut self) -> Result<StepReport, RegistrationError> {
        let session = self.session.as_mut().ok_or(RegistrationError::NotActive)?;
        let start = Instant::now();
        session.iteration += 1;

        let mut correspondences = find_correspondences(
            session.index.as_ref(),
            &session.moving,
            &session.estimate,
            self.config.execution,
            &mut session.neighbors,
        )?;
        let rejected = self.config.outlier_rejection.apply(&mut correspondences);

        let mut report = StepReport {
            iteration: session.iteration,
            correspondences: correspondences.len(),
            rejected,
            rmse: 0.0,
            delta_angle: 0.0,
            delta_translation: 0.0,
            outcome: StepOutcome::Applied,
        };

        match self.estimator.estimate(&correspondences, &session.estimate) {
            Ok(estimate) => {
                report.rmse = estimate.rmse;
                report.delta_angle = estimate.delta.rotation_angle();
                report.delta_translation = estimate
                    .updated
                    .translation
                    .distance(session.estimate.translation);

                session.estimate = estimate.updated;
                self.handle.publish(estimate.updated);
            }
            Err(e) => {
                log::warn!("iteration {} skipped: {e}", session.iteration);
                report.rmse = rmse(&correspondences);
                report.outcome = StepOutcome::Skipped(e);
            }
        }

        if let StopPolicy::Converge {
            max_iterations,
            rotation_tolerance,
            translation_tolerance,
        } = self.config.stop
        {
            if report.outcome == StepOutcome::Applied
                && report.delta_angle < rotation_tolerance
                && report.delta_translation < translation_tolerance
            {
                report.outcome = StepOutcome::Converged;
            } else if session.iteration >= max_iterations {
                report.outcome = StepOutcome::IterationLimit;
            }
        }

        log::debug!(
            "iteration {}: {} correspondences ({} rejected), rmse {:.6}, delta angle {:.3e} rad, \
             delta translation {:.3e}, {:?}",
            report.iteration,
            report.correspondences,
            report.rejected,
            report.rmse,
            report.delta_angle,
            report.delta_translation,
            start.elapsed()
        );

        match report.outcome {
            StepOutcome::Converged => {
                log::info!("registration converged after {} iterations", report.iteration);
                self.deactivate();
            }
            StepOutcome::IterationLimit => {
                log::info!("registration reached {} iterations", report.iteration);
                self.deactivate();
            }
            _ => {}
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexBackend;
    use glam::DQuat;

    fn grid() -> Result<PointCloud, Box<dyn std::error::Error>> {
        let mut points = Vec::new();
        for x in 0..6 {
            for y in 0..5 {
                for z in 0..4 {
                    points.push([x as f64 * 0.3, y as f64 * 0.4 + 0.1 * x as f64, z as f64 * 0.5]);
                }
            }
        }
        Ok(PointCloud::new(points)?)
    }

    #[test]
    fn test_tick_when_idle() -> Result<(), RegistrationError> {
        let mut registration = RegistrationLoop::new(RegistrationConfig::default())?;
        assert_eq!(registration.state(), LoopState::Idle);
        assert!(matches!(
            registration.tick(),
            Err(RegistrationError::NotActive)
        ));
        Ok(())
    }

    #[test]
    fn test_invalid_config() {
        let config = RegistrationConfig {
            min_correspondences: 1,
            ..Default::default()
        };
        assert!(matches!(
            RegistrationLoop::new(config),
            Err(RegistrationError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[test]
    fn test_activate_publishes_initial() -> Result<(), Box<dyn std::error::Error>> {
        let cloud = grid()?;
        let mut registration = RegistrationLoop::new(RegistrationConfig::default())?;
        let handle = registration.transform_handle();

        let initial = RigidTransform::new(DQuat::from_rotation_z(0.1), DVec3::new(0.2, 0.0, 0.0));
        registration.activate(&cloud, &cloud, initial)?;

        assert_eq!(registration.state(), LoopState::Iterating);
        assert_eq!(registration.iteration(), Some(0));
        assert_eq!(handle.get(), initial);
        Ok(())
    }

    #[test]
    fn test_one_iteration_per_tick() -> Result<(), Box<dyn std::error::Error>> {
        let cloud = grid()?;
        let mut registration = RegistrationLoop::new(RegistrationConfig::default())?;
        registration.activate(&cloud, &cloud, RigidTransform::IDENTITY)?;

        for expected in 1..=4 {
            let report = registration.tick()?;
            assert_eq!(report.iteration, expected);
            assert_eq!(report.correspondences, cloud.len());
            assert_eq!(report.outcome, StepOutcome::Applied);
            assert!(report.rmse < 1e-12);
        }
        assert_eq!(registration.iteration(), Some(4));
        assert!(registration.current_transform().translation.length() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_small_offset_is_corrected() -> Result<(), Box<dyn std::error::Error>> {
        let reference = grid()?;
        let offset = RigidTransform::new(DQuat::from_rotation_y(0.02), DVec3::new(0.03, -0.02, 0.01));
        let moving = reference.transformed(&offset.inverse());

        for backend in [IndexBackend::Flat, IndexBackend::Tree] {
            let config = RegistrationConfig {
                backend,
                ..Default::default()
            };
            let mut registration = RegistrationLoop::new(config)?;
            registration.activate(&reference, &moving, RigidTransform::IDENTITY)?;

            for _ in 0..20 {
                registration.tick()?;
            }

            let estimate = registration.current_transform();
            assert!(estimate.angle_to(&offset) < 1e-6);
            assert!(estimate.translation.abs_diff_eq(offset.translation, 1e-6));
        }
        Ok(())
    }

    #[test]
    fn test_converge_policy_deactivates() -> Result<(), Box<dyn std::error::Error>> {
        let cloud = grid()?;
        let config = RegistrationConfig {
            stop: StopPolicy::Converge {
                max_iterations: 10,
                rotation_tolerance: 1e-9,
                translation_tolerance: 1e-9,
            },
            ..Default::default()
        };
        let mut registration = RegistrationLoop::new(config)?;
        registration.activate(&cloud, &cloud, RigidTransform::IDENTITY)?;

        let report = registration.tick()?;
        assert_eq!(report.outcome, StepOutcome::Converged);
        assert!(report.outcome.is_terminal());
        assert_eq!(registration.state(), LoopState::Idle);
        assert!(matches!(
            registration.tick(),
            Err(RegistrationError::NotActive)
        ));
        Ok(())
    }

    #[test]
    fn test_iteration_limit() -> Result<(), Box<dyn std::error::Error>> {
        let cloud = grid()?;
        let config = RegistrationConfig {
            stop: StopPolicy::Converge {
                max_iterations: 2,
                rotation_tolerance: 0.0,
                translation_tolerance: 0.0,
            },
            ..Default::default()
        };
        let mut registration = RegistrationLoop::new(config)?;
        let offset = RigidTransform::new(DQuat::IDENTITY, DVec3::new(0.05, 0.0, 0.0));
        registration.activate(&cloud, &cloud.transformed(&offset), RigidTransform::IDENTITY)?;

        assert_eq!(registration.tick()?.outcome, StepOutcome::Applied);
        assert_eq!(registration.tick()?.outcome, StepOutcome::IterationLimit);
        assert_eq!(registration.state(), LoopState::Idle);
        Ok(())
    }

    #[test]
    fn test_degenerate_iteration_is_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let reference = grid()?;
        let moving = PointCloud::new(vec![[0.0, 0.0, 0.0], [0.3, 0.1, 0.0]])?;
        let mut registration = RegistrationLoop::new(RegistrationConfig::default())?;
        let initial = RigidTransform::new(DQuat::IDENTITY, DVec3::new(0.01, 0.0, 0.0));
        registration.activate(&reference, &moving, initial)?;

        let report = registration.tick()?;
        assert!(matches!(
            report.outcome,
            StepOutcome::Skipped(EstimateError::InsufficientCorrespondences { found: 2, .. })
        ));
        assert!((report.rmse - 0.01).abs() < 1e-12);
        assert_eq!(registration.current_transform(), initial);
        assert_eq!(registration.state(), LoopState::Iterating);
        Ok(())
    }

    #[test]
    fn test_report_rmse_before_update() -> Result<(), Box<dyn std::error::Error>> {
        let cloud = grid()?;
        let offset = RigidTransform::new(DQuat::IDENTITY, DVec3::new(0.05, 0.0, 0.0));
        let mut registration = RegistrationLoop::new(RegistrationConfig::default())?;
        registration.activate(&cloud, &cloud.transformed(&offset), RigidTransform::IDENTITY)?;

        let first = registration.tick()?;
        assert_eq!(first.outcome, StepOutcome::Applied);
        assert!((first.rmse - 0.05).abs() < 1e-12);

        let second = registration.tick()?;
        assert!(second.rmse < 1e-9);
        Ok(())
    }

    #[test]
    fn test_deactivate_keeps_transform() -> Result<(), Box<dyn std::error::Error>> {
        let cloud = grid()?;
        let mut registration = RegistrationLoop::new(RegistrationConfig::default())?;
        let initial = RigidTransform::new(DQuat::IDENTITY, DVec3::new(0.0, 0.01, 0.0));
        registration.activate(&cloud, &cloud, initial)?;
        registration.tick()?;
        let published = registration.current_transform();

        registration.deactivate();
        assert_eq!(registration.state(), LoopState::Idle);
        assert_eq!(registration.iteration(), None);
        assert_eq!(registration.current_transform(), published);

        // deactivating twice is harmless
        registration.deactivate();
        Ok(())
    }
}
