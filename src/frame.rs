//! Single 2-D frames of an image stack and the stack metadata.

use nalgebra::DMatrix;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackingError};

/// One 2-D intensity image. Rows are the `y` axis, columns the `x` axis.
///
/// The optional mask marks invalid pixels with `true`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub data: DMatrix<f64>,
    pub mask: Option<DMatrix<bool>>,
}

impl Frame {
    pub fn new(data: DMatrix<f64>) -> Self {
        Self { data, mask: None }
    }

    /// Build a frame from row-major raw pixels of any numeric type.
    pub fn from_pixels<T: ToPrimitive + Copy>(rows: usize, cols: usize, pixels: &[T]) -> Result<Self> {
        if pixels.len() != rows * cols {
            return Err(TrackingError::InvalidInput(format!(
                "expected {} pixels for a {}x{} frame, got {}",
                rows * cols,
                rows,
                cols,
                pixels.len()
            )));
        }
        let mut values = Vec::with_capacity(pixels.len());
        for p in pixels {
            let v = p.to_f64().ok_or_else(|| {
                TrackingError::InvalidInput("pixel value not representable as f64".to_string())
            })?;
            values.push(v);
        }
        Ok(Self::new(DMatrix::from_row_slice(rows, cols, &values)))
    }

    /// Build a frame from nested rows, as found in JSON stacks.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let n_rows = rows.len();
        let n_cols = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != n_cols) {
            return Err(TrackingError::InvalidInput("ragged frame rows".to_string()));
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        Self::from_pixels(n_rows, n_cols, &flat)
    }

    /// Attach an invalid-pixel mask of the same shape.
    pub fn with_mask(mut self, mask: DMatrix<bool>) -> Result<Self> {
        if mask.shape() != self.data.shape() {
            return Err(TrackingError::InvalidInput(format!(
                "mask shape {:?} does not match frame shape {:?}",
                mask.shape(),
                self.data.shape()
            )));
        }
        self.mask = Some(mask);
        Ok(self)
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    pub fn is_masked(&self, row: usize, col: usize) -> bool {
        self.mask.as_ref().map_or(false, |m| m[(row, col)])
    }
}

/// Stack metadata. Field names follow the OME convention on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Metadata {
    pub size_t: usize,
    pub size_z: usize,
    /// Pixel size along x, required to convert physical parameters to pixels.
    pub physical_size_x: f64,
    #[serde(default)]
    pub physical_size_y: Option<f64>,
    #[serde(default)]
    pub physical_size_z: Option<f64>,
    #[serde(default)]
    pub time_increment: Option<f64>,
}

impl Metadata {
    pub fn new(size_t: usize, size_z: usize, physical_size_x: f64) -> Self {
        Self {
            size_t,
            size_z,
            physical_size_x,
            physical_size_y: None,
            physical_size_z: None,
            time_increment: None,
        }
    }

    pub fn n_frames(&self) -> usize {
        self.size_t * self.size_z
    }

    pub fn validate(&self) -> Result<()> {
        if self.size_t == 0 || self.size_z == 0 {
            return Err(TrackingError::InvalidInput(
                "SizeT and SizeZ must be at least 1".to_string(),
            ));
        }
        if !(self.physical_size_x.is_finite() && self.physical_size_x > 0.0) {
            return Err(TrackingError::InvalidInput(format!(
                "PhysicalSizeX must be positive, got {}",
                self.physical_size_x
            )));
        }
        Ok(())
    }
}
