use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use peaktrack::{
    ByFrameSolver, Coord, DetectionParameters, Frame, Metadata, PeakTable, StackDetector, TrackingParameters,
};

fn noisy_frame(size: usize, spots: &[(f64, f64)], seed: u64) -> Frame {
    let mut rng = StdRng::seed_from_u64(seed);
    let data = DMatrix::from_fn(size, size, |i, j| {
        let mut v = 10.0 + rng.gen_range(-1.0..1.0);
        for &(y, x) in spots {
            let d2 = (i as f64 - y).powi(2) + (j as f64 - x).powi(2);
            v += 200.0 * (-d2 / 4.0).exp();
        }
        v
    });
    Frame::new(data)
}

fn detect_moving_spots(n_t: usize) -> PeakTable {
    let mut metadata = Metadata::new(n_t, 1, 0.1);
    metadata.physical_size_y = Some(0.1);
    let frames: Vec<Frame> = (0..n_t)
        .map(|t| {
            let shift = 0.5 * t as f64;
            noisy_frame(45, &[(12.0 + shift, 12.0), (32.0, 30.0 - shift)], 100 + t as u64)
        })
        .collect();

    let params = DetectionParameters {
        w_s: 0.9,
        peak_radius: 0.2,
        ..DetectionParameters::default()
    };
    StackDetector::new(&params, &metadata).unwrap().run(&frames).unwrap()
}

#[test]
fn detection_then_brownian_tracking() {
    let peaks = detect_moving_spots(3);
    assert_eq!(peaks.len(), 6);
    assert_eq!(peaks.t_stamps(), vec![0, 1, 2]);
    assert_eq!(peaks.n_labels(), 6);

    let params = TrackingParameters::Brownian {
        max_speed: 0.5,
        penalty: 1.05,
        coords: vec![Coord::X, Coord::Y],
    };
    let mut solver = ByFrameSolver::from_parameters(peaks, &params).unwrap();
    let tracks = solver.track().unwrap();

    assert_eq!(tracks.n_labels(), 2);
    for label in 0..2 {
        let rows: Vec<_> = tracks.rows().iter().filter(|r| r.label == label).collect();
        assert_eq!(rows.len(), 3);
        let xs: Vec<f64> = rows.iter().map(|r| r.x).collect();
        let ys: Vec<f64> = rows.iter().map(|r| r.y).collect();
        // Each track stays on one spot: spots are 2 units apart in x.
        assert!(xs.iter().all(|x| (x - xs[0]).abs() < 0.2));
        assert!(ys.iter().all(|y| (y - ys[0]).abs() < 0.2));
    }
}

#[test]
fn table_survives_json_round_trip() {
    let peaks = detect_moving_spots(2);
    let path = std::env::temp_dir().join(format!("peaktrack-e2e-{}.json", std::process::id()));
    peaks.to_json_file(&path).unwrap();
    let loaded = PeakTable::from_json_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded, peaks);
    let mut solver = ByFrameSolver::for_brownian_motion(loaded, 0.5, 1.05, Coord::xyz()).unwrap();
    assert_eq!(solver.track().unwrap().n_labels(), 2);
}
