//! Peak detection over a whole `T × Z` image stack.

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use tracing::info;

use crate::config::DetectionParameters;
use crate::detection::{Peak, PeakDetector};
use crate::error::{Result, TrackingError};
use crate::frame::{Frame, Metadata};
use crate::progress::{CancellationToken, ProgressEvent, ProgressSink};
use crate::table::{PeakRecord, PeakTable};

/// Runs a [`PeakDetector`] on every frame of a stack and gathers the results
/// into one [`PeakTable`].
pub struct StackDetector<'a> {
    detector: PeakDetector,
    metadata: Metadata,
    parallel: bool,
    num_threads: Option<usize>,
    progress: Option<&'a dyn ProgressSink>,
    cancel: CancellationToken,
}

impl<'a> StackDetector<'a> {
    /// Convert physical parameters to pixels and build the frame detector.
    pub fn new(params: &DetectionParameters, metadata: &Metadata) -> Result<Self> {
        params.validate()?;
        metadata.validate()?;

        let w_s = (params.w_s / metadata.physical_size_x).round();
        if !(w_s >= 1.0) {
            return Err(TrackingError::InvalidParameter(format!(
                "window of {} maps to {} pixels",
                params.w_s, w_s
            )));
        }
        let peak_radius = params.peak_radius / metadata.physical_size_x;
        let detector = PeakDetector::new(w_s as usize, peak_radius, params.threshold, params.max_peaks)?;

        Ok(Self {
            detector,
            metadata: metadata.clone(),
            parallel: params.parallel,
            num_threads: params.num_threads,
            progress: None,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_progress(mut self, sink: &'a dyn ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn detector(&self) -> &PeakDetector {
        &self.detector
    }

    /// Detect peaks on every frame, frames ordered `t * SizeZ + z`.
    pub fn run(&self, frames: &[Frame]) -> Result<PeakTable> {
        let n_stack = self.metadata.n_frames();
        if frames.len() != n_stack {
            return Err(TrackingError::InvalidInput(format!(
                "metadata announces {} frames (SizeT × SizeZ), got {}",
                n_stack,
                frames.len()
            )));
        }
        info!(
            n_frames = n_stack,
            w_s = self.detector.w_s,
            peak_radius = self.detector.peak_radius,
            "Initializing peak detection"
        );

        let mut all_peaks = if self.parallel {
            match self.num_threads {
                Some(n) => {
                    let pool = rayon::ThreadPoolBuilder::new()
                        .num_threads(n)
                        .build()
                        .map_err(|e| TrackingError::InvalidParameter(format!("thread pool: {}", e)))?;
                    pool.install(|| self.detect_parallel(frames))?
                }
                None => self.detect_parallel(frames)?,
            }
        } else {
            let completed = AtomicUsize::new(0);
            frames
                .iter()
                .enumerate()
                .map(|(i, frame)| self.detect_one(i, frame, &completed))
                .collect::<Result<Vec<_>>>()?
        };

        // Restore frame order regardless of completion order.
        all_peaks.sort_by_key(|(i, _)| *i);

        let table = self.build_table(&all_peaks);
        info!(n_peaks = table.len(), "Terminating peak detection");
        Ok(table)
    }

    fn detect_parallel(&self, frames: &[Frame]) -> Result<Vec<(usize, Vec<Peak>)>> {
        let completed = AtomicUsize::new(0);
        frames
            .par_iter()
            .enumerate()
            .map(|(i, frame)| self.detect_one(i, frame, &completed))
            .collect()
    }

    fn detect_one(&self, index: usize, frame: &Frame, completed: &AtomicUsize) -> Result<(usize, Vec<Peak>)> {
        self.cancel.check()?;
        let peaks = self.detector.detect_cancellable(frame, &self.cancel)?;
        let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(sink) = self.progress {
            sink.report(&ProgressEvent::Detection {
                completed: done,
                total: self.metadata.n_frames(),
                frame: index,
                n_peaks: peaks.len(),
            });
        }
        Ok((index, peaks))
    }

    fn build_table(&self, all_peaks: &[(usize, Vec<Peak>)]) -> PeakTable {
        let meta = &self.metadata;
        let mut rows = Vec::new();
        let mut label = 0;

        for (index, peaks) in all_peaks {
            let t_stamp = index / meta.size_z;
            let z = (index % meta.size_z) as f64;
            for peak in peaks {
                rows.push(PeakRecord {
                    t_stamp,
                    label,
                    t: t_stamp as f64 * meta.time_increment.unwrap_or(1.0),
                    z: z * meta.physical_size_z.unwrap_or(1.0),
                    y: peak.y * meta.physical_size_y.unwrap_or(1.0),
                    x: peak.x * meta.physical_size_x,
                    w: peak.w * meta.physical_size_x,
                    intensity: peak.intensity,
                });
                label += 1;
            }
        }

        if rows.is_empty() {
            return PeakTable::empty();
        }
        PeakTable::new(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::tests::synthetic_frame;
    use approx::assert_abs_diff_eq;
    use nalgebra::DMatrix;
    use std::sync::Mutex;

    fn params() -> DetectionParameters {
        DetectionParameters {
            w_s: 0.9,
            peak_radius: 0.2,
            threshold: 27.0,
            max_peaks: 100,
            parallel: true,
            num_threads: None,
        }
    }

    fn metadata(size_t: usize, size_z: usize) -> Metadata {
        Metadata::new(size_t, size_z, 0.1)
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressSink for Recorder {
        fn report(&self, event: &ProgressEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_parameters_converted_to_pixels() {
        let stack = StackDetector::new(&params(), &metadata(1, 1)).unwrap();
        assert_eq!(stack.detector().w_s, 9);
        assert_abs_diff_eq!(stack.detector().peak_radius, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_frame_count_must_match_metadata() {
        let stack = StackDetector::new(&params(), &metadata(2, 1)).unwrap();
        let frames = vec![synthetic_frame(30, 30, &[], 1)];
        assert!(matches!(stack.run(&frames), Err(TrackingError::InvalidInput(_))));
    }

    #[test]
    fn test_empty_stack_gives_empty_table() {
        let stack = StackDetector::new(&params(), &metadata(2, 1)).unwrap();
        let frames = vec![Frame::new(DMatrix::from_element(30, 30, 3.0)); 2];
        let table = stack.run(&frames).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_rows_ordered_and_scaled() {
        let mut meta = metadata(2, 2);
        meta.physical_size_y = Some(0.2);
        meta.physical_size_z = Some(0.5);
        meta.time_increment = Some(3.0);

        let frames: Vec<Frame> = (0..4)
            .map(|i| synthetic_frame(36, 36, &[(15.0 + i as f64, 18.0, 2.0, 200.0)], i as u64))
            .collect();
        let recorder = Recorder::default();
        let stack = StackDetector::new(&params(), &meta).unwrap().with_progress(&recorder);
        let table = stack.run(&frames).unwrap();

        assert_eq!(table.len(), 4);
        let rows = table.rows();
        let t_stamps: Vec<usize> = rows.iter().map(|r| r.t_stamp).collect();
        assert_eq!(t_stamps, vec![0, 0, 1, 1]);
        let labels: Vec<usize> = rows.iter().map(|r| r.label).collect();
        assert_eq!(labels, vec![0, 1, 2, 3]);

        assert_abs_diff_eq!(rows[3].t, 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(rows[3].z, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(rows[1].z, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(rows[0].z, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(rows[2].y, 17.0 * 0.2, epsilon = 0.02);
        assert_abs_diff_eq!(rows[2].x, 18.0 * 0.1, epsilon = 0.01);
        assert_abs_diff_eq!(rows[2].w, 0.2, epsilon = 0.01);

        assert_eq!(recorder.events.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_sequential_matches_parallel() {
        let frames: Vec<Frame> = (0..3)
            .map(|i| synthetic_frame(32, 32, &[(12.0, 14.0 + i as f64, 2.0, 150.0)], 40 + i as u64))
            .collect();
        let mut sequential = params();
        sequential.parallel = false;
        let mut pooled = params();
        pooled.num_threads = Some(2);

        let a = StackDetector::new(&sequential, &metadata(3, 1)).unwrap().run(&frames).unwrap();
        let b = StackDetector::new(&pooled, &metadata(3, 1)).unwrap().run(&frames).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_cancellation_discards_results() {
        let frames = vec![synthetic_frame(30, 30, &[(15.0, 15.0, 2.0, 100.0)], 9); 3];
        let token = CancellationToken::new();
        token.cancel();
        let stack = StackDetector::new(&params(), &metadata(3, 1))
            .unwrap()
            .with_cancellation(token);
        assert!(matches!(stack.run(&frames), Err(TrackingError::Cancelled)));
    }
}
