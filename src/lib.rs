pub mod config;
pub mod cost;
pub mod detection;
pub mod error;
pub mod frame;
pub mod gaussian;
pub mod lapjv;
pub mod matrix;
pub mod progress;
pub mod stack;
pub mod table;
pub mod track;
pub mod tracker;
pub mod utils;

// Re-export main types
pub use crate::config::{Config, DetectionParameters, TrackingParameters};
pub use crate::cost::{CostFunction, CostFunctions};
pub use crate::detection::{Peak, PeakDetector};
pub use crate::error::{Result, TrackingError};
pub use crate::frame::{Frame, Metadata};
pub use crate::matrix::CostMatrix;
pub use crate::progress::{CancellationToken, LogProgress, ProgressEvent, ProgressSink};
pub use crate::stack::StackDetector;
pub use crate::table::{Coord, PeakRecord, PeakTable};
pub use crate::tracker::ByFrameSolver;
