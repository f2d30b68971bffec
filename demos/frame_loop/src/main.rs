use argh::FromArgs;
use glam::{DQuat, DVec3};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use meshalign::icp::{RegistrationConfig, RegistrationLoop};
use meshalign::k3d::{pointcloud::PointCloud, transforms::RigidTransform};

#[derive(FromArgs, Debug)]
/// Drive a registration loop from a simulated frame loop
struct Args {
    /// number of points in the reference cloud
    #[argh(option, short = 'n', default = "5000")]
    points: usize,

    /// number of frames to simulate
    #[argh(option, short = 'f', default = "60")]
    frames: usize,

    /// rotation of the moving cloud away from the reference, in degrees
    #[argh(option, short = 'a', default = "3.0")]
    angle_deg: f64,

    /// frame period in milliseconds
    #[argh(option, default = "16")]
    frame_ms: u64,

    /// path to a JSON registration config
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let config = match &args.config {
        Some(path) => RegistrationConfig::from_path(path)?,
        None => RegistrationConfig::default(),
    };
    log::info!("config: {config:?}");

    // a noisy sphere shell stands in for the captured environment mesh
    let mut rng = StdRng::seed_from_u64(0);
    let reference = (0..args.points)
        .map(|_| {
            let dir = DVec3::new(
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
            )
            .normalize_or(DVec3::X);
            let radius = 2.0 + rng.random_range(-0.05..0.05);
            (dir * radius * DVec3::new(1.0, 0.6, 0.8)).to_array()
        })
        .collect::<Vec<_>>();
    let reference = PointCloud::new(reference)?;

    let drift = RigidTransform::new(
        DQuat::from_axis_angle(DVec3::new(0.2, 1.0, 0.1).normalize(), args.angle_deg.to_radians()),
        DVec3::new(0.05, -0.02, 0.03),
    );
    let moving = reference.transformed(&drift.inverse());
    println!(
        "reference: #{} points, drift: {:.3} deg, {:?}",
        reference.len(),
        drift.rotation_angle().to_degrees(),
        drift.translation
    );

    let mut registration = RegistrationLoop::new(config)?;
    let handle = registration.transform_handle();
    registration.activate(&reference, &moving, RigidTransform::IDENTITY)?;

    let cancel_token = Arc::new(AtomicBool::new(false));
    ctrlc::set_handler({
        let cancel_token = cancel_token.clone();
        move || {
            println!("Received Ctrl-C signal. Stopping registration.");
            cancel_token.store(true, Ordering::SeqCst);
        }
    })?;

    let frame_period = Duration::from_millis(args.frame_ms);
    for frame in 0..args.frames {
        if cancel_token.load(Ordering::SeqCst) {
            break;
        }
        let frame_start = Instant::now();

        let report = registration.tick()?;
        let estimate = handle.get();
        println!(
            "frame {frame:4}: {:5} pairs, rmse {:.6}, error {:.2e} rad / {:.2e}, {:?}",
            report.correspondences,
            report.rmse,
            estimate.angle_to(&drift),
            estimate.translation.distance(drift.translation),
            report.outcome
        );

        if report.outcome.is_terminal() {
            break;
        }

        // wait for the next frame boundary
        if let Some(rest) = frame_period.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    registration.deactivate();

    let estimate = handle.get();
    println!(
        "final rotation error {:.3e} rad, translation error {:.3e}",
        estimate.angle_to(&drift),
        estimate.translation.distance(drift.translation)
    );

    Ok(())
}
