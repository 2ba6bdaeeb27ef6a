//! Full calibration run against a simulated noisy detector.

use approx::assert_relative_eq;
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::Normal;
use sensor_acq::mock::{MockEvent, MockFrameSource};
use sensor_acq::{
    run_calibration, AcquisitionOptions, CalibrationPlan, CalibrationStore, ExposureCondition,
    PixelShape, Roi, SourceSpeed,
};
use sensor_math::{Illumination, NoiseModel};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const SENSOR: (usize, usize) = (48, 64);
const FRAMES: usize = 12;

/// Detector used to synthesize frames
struct SimDetector {
    flux_e: f64,
    dark_e: f64,
    gain: f64,
    bias: f64,
    read_noise: f64,
    rng: ChaCha8Rng,
}

impl SimDetector {
    fn frames(&mut self, condition: &ExposureCondition, count: usize) -> Vec<MockEvent> {
        let signal = (condition.illumination.flag() * self.flux_e + self.dark_e) * condition.exposure;
        let noise = Normal::new(signal, (signal + self.read_noise.powi(2)).sqrt()).unwrap();
        (0..count)
            .map(|_| {
                let frame = Array2::from_shape_simple_fn(SENSOR, || {
                    self.rng.sample(noise) / self.gain + self.bias
                });
                MockEvent::Frame(frame)
            })
            .collect()
    }
}

fn plan(options: AcquisitionOptions) -> CalibrationPlan {
    CalibrationPlan::new(
        NoiseModel::Full,
        vec![
            ExposureCondition::dark(0.0),
            ExposureCondition::dark(4.0),
            ExposureCondition::dark(16.0),
            ExposureCondition::flat(0.05),
            ExposureCondition::flat(0.1),
            ExposureCondition::flat(0.2),
        ],
        FRAMES,
    )
    .with_non_negative(true)
    .with_acquisition(options)
}

#[test]
fn test_full_calibration_recovers_detector() {
    let mut sim = SimDetector {
        flux_e: 4000.0,
        dark_e: 40.0,
        gain: 2.0,
        bias: 200.0,
        read_noise: 10.0,
        rng: ChaCha8Rng::seed_from_u64(31337),
    };
    let mut source = MockFrameSource::new(vec![]).with_graceful_stop();
    let options = AcquisitionOptions::default()
        .with_skip(1)
        .with_timeout(Duration::from_millis(100));

    let calibration = run_calibration::<u16, _, _>(&mut source, &plan(options), |source, condition| {
        // one warm-up frame for the skip, then the measured burst
        source.set_script(sim.frames(condition, FRAMES + 1));
        source.set_speed(Some(SourceSpeed::new(10.0, condition.exposure)));
        Ok(())
    })
    .unwrap();

    assert_eq!(calibration.conditions.len(), 6);
    assert!(calibration.conditions.iter().all(|c| c.frames == FRAMES));
    assert_eq!(calibration.conditions[0].sample.count(), FRAMES * SENSOR.0 * SENSOR.1);

    let fit = calibration.fit;
    assert_relative_eq!(fit.bias, 200.0, epsilon = 1.0);
    assert_relative_eq!(fit.flux, 2000.0, max_relative = 0.02);
    assert_relative_eq!(fit.dark_current, 20.0, max_relative = 0.1);

    let params = calibration.parameters.expect("photon transfer should succeed");
    assert_relative_eq!(params.gain, 2.0, max_relative = 0.05);
    assert_relative_eq!(params.read_noise, 10.0, max_relative = 0.15);

    // Read noise alone at zero exposure: 10 e- / 2 e-/ADU
    assert_relative_eq!(calibration.conditions[0].temporal_noise, 5.0, epsilon = 0.5);

    let dir = std::env::temp_dir().join(format!(
        "sensor_cal_e2e_{}",
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    let store = CalibrationStore::with_path(dir);
    store.save("SIM 64", "0001", &calibration).unwrap();
    let loaded = store.load("SIM 64", "0001").unwrap().unwrap();
    assert_eq!(loaded.conditions.len(), calibration.conditions.len());
    assert_eq!(loaded.model, NoiseModel::Full);
    std::fs::remove_dir_all(store.root_path()).unwrap();
}

#[test]
fn test_calibration_through_roi() {
    let mut sim = SimDetector {
        flux_e: 1000.0,
        dark_e: 0.0,
        gain: 1.0,
        bias: 100.0,
        read_noise: 4.0,
        rng: ChaCha8Rng::seed_from_u64(5),
    };
    let roi = Roi::new(PixelShape::new(SENSOR.1, SENSOR.0), (2, 2), (4, 2), (16, 8)).unwrap();
    let mut source = MockFrameSource::new(vec![]).with_roi(roi);

    let plan = CalibrationPlan::new(
        NoiseModel::Reduced,
        vec![ExposureCondition::dark(0.0), ExposureCondition::flat(1.0)],
        4,
    )
    .with_acquisition(AcquisitionOptions::default().with_timeout(Duration::from_millis(100)));

    let calibration = run_calibration::<f32, _, _>(&mut source, &plan, |source, condition| {
        source.set_script(sim.frames(condition, 4));
        Ok(())
    })
    .unwrap();

    let sample = calibration.conditions[1].sample;
    assert_eq!(sample.count(), 4 * 16 * 8);
    assert_eq!(sample.illumination(), Illumination::Flat);
    assert_relative_eq!(calibration.fit.flux, 1000.0, epsilon = 10.0);
}

#[test]
fn test_configure_failure_stops_the_run() {
    let mut source = MockFrameSource::repeating(Array2::zeros((2, 2)));
    let plan = plan(AcquisitionOptions::default().with_timeout(Duration::from_millis(10)));

    let mut seen = 0;
    let err = run_calibration::<u16, _, _>(&mut source, &plan, |_, _| {
        seen += 1;
        if seen == 3 {
            Err(sensor_acq::AcquisitionError::Hardware("shutter jammed".to_string()))
        } else {
            Ok(())
        }
    })
    .unwrap_err();

    assert!(matches!(err, sensor_acq::AcquisitionError::Hardware(_)));
    assert_eq!(seen, 3);
    assert!(!source.is_active());
}
