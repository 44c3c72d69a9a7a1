//! Scans and regions of interest.
//!
//! A `Scan` holds one intensity plane per available channel, all sharing one
//! shape. An `Roi` is a boolean mask over that shape; the same ROI is applied
//! to every scan of a film.

use std::collections::BTreeMap;

use nalgebra::DMatrix;

use crate::domain::Channel;
use crate::error::DoseError;

/// Multi-channel pixel intensities for one exposure state. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Scan {
    rows: usize,
    cols: usize,
    bit_depth: u8,
    planes: BTreeMap<Channel, DMatrix<f64>>,
}

impl Scan {
    /// Build a scan from channel planes.
    ///
    /// Every plane must share one shape and hold finite values in
    /// `[0, 2^bit_depth - 1]`.
    pub fn new(bit_depth: u8, planes: Vec<(Channel, DMatrix<f64>)>) -> Result<Self, DoseError> {
        if !(1..=32).contains(&bit_depth) {
            return Err(DoseError::InvalidScan(format!(
                "bit depth must be within 1..=32, got {bit_depth}"
            )));
        }
        let Some((_, first)) = planes.first() else {
            return Err(DoseError::InvalidScan("scan has no channel planes".to_string()));
        };
        let (rows, cols) = first.shape();
        if rows == 0 || cols == 0 {
            return Err(DoseError::InvalidScan("scan has an empty pixel grid".to_string()));
        }

        let max_value = max_intensity(bit_depth);
        let mut map = BTreeMap::new();
        for (channel, plane) in planes {
            if plane.shape() != (rows, cols) {
                return Err(DoseError::InvalidScan(format!(
                    "channel {channel} plane is {:?}, expected {:?}",
                    plane.shape(),
                    (rows, cols)
                )));
            }
            if let Some(((r, c), v)) = first_bad_value(&plane, max_value) {
                return Err(DoseError::InvalidScan(format!(
                    "channel {channel} pixel ({r}, {c}) has value {v} outside [0, {max_value}]"
                )));
            }
            if map.insert(channel, plane).is_some() {
                return Err(DoseError::InvalidScan(format!("channel {channel} supplied twice")));
            }
        }

        Ok(Self {
            rows,
            cols,
            bit_depth,
            planes: map,
        })
    }

    /// Single-channel scan from row vectors (convenient for small inputs).
    pub fn from_rows(bit_depth: u8, channel: Channel, rows: &[Vec<f64>]) -> Result<Self, DoseError> {
        let n_rows = rows.len();
        let n_cols = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.iter().any(|r| r.len() != n_cols) {
            return Err(DoseError::InvalidScan("ragged pixel rows".to_string()));
        }
        let plane = DMatrix::from_fn(n_rows, n_cols, |r, c| rows[r][c]);
        Self::new(bit_depth, vec![(channel, plane)])
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn bit_depth(&self) -> u8 {
        self.bit_depth
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.planes.keys().copied().collect()
    }

    pub fn plane(&self, channel: Channel) -> Result<&DMatrix<f64>, DoseError> {
        self.planes.get(&channel).ok_or_else(|| {
            DoseError::InvalidScan(format!("scan has no {channel} channel (has {:?})", self.channels()))
        })
    }
}

fn max_intensity(bit_depth: u8) -> f64 {
    2f64.powi(i32::from(bit_depth)) - 1.0
}

fn first_bad_value(plane: &DMatrix<f64>, max_value: f64) -> Option<((usize, usize), f64)> {
    for r in 0..plane.nrows() {
        for c in 0..plane.ncols() {
            let v = plane[(r, c)];
            if !(v.is_finite() && v >= 0.0 && v <= max_value) {
                return Some(((r, c), v));
            }
        }
    }
    None
}

/// Named region of interest: a boolean mask over a pixel grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Roi {
    name: String,
    mask: DMatrix<bool>,
    count: usize,
}

impl Roi {
    pub fn new(name: impl Into<String>, mask: DMatrix<bool>) -> Result<Self, DoseError> {
        let name = name.into();
        let count = mask.iter().filter(|&&m| m).count();
        if count == 0 {
            return Err(DoseError::InvalidScan(format!("ROI '{name}' selects no pixels")));
        }
        Ok(Self { name, mask, count })
    }

    /// Bounding rectangle in ImageJ convention: `right` and `bottom` exclusive.
    pub fn rect(
        name: impl Into<String>,
        left: usize,
        right: usize,
        top: usize,
        bottom: usize,
        shape: (usize, usize),
    ) -> Result<Self, DoseError> {
        let name = name.into();
        let (rows, cols) = shape;
        if left >= right || top >= bottom || right > cols || bottom > rows {
            return Err(DoseError::InvalidScan(format!(
                "ROI '{name}' ({left}, {right}, {top}, {bottom}) is empty or outside a {rows}x{cols} image"
            )));
        }
        let mask = DMatrix::from_fn(rows, cols, |r, c| r >= top && r < bottom && c >= left && c < right);
        Self::new(name, mask)
    }

    /// ROI covering every pixel.
    pub fn full(name: impl Into<String>, shape: (usize, usize)) -> Result<Self, DoseError> {
        Self::new(name, DMatrix::from_element(shape.0, shape.1, true))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> (usize, usize) {
        self.mask.shape()
    }

    /// Number of selected pixels.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        row < self.mask.nrows() && col < self.mask.ncols() && self.mask[(row, col)]
    }

    /// Selected pixel coordinates in row-major order.
    pub fn pixels(&self) -> Vec<(usize, usize)> {
        let (rows, cols) = self.mask.shape();
        let mut out = Vec::with_capacity(self.count);
        for r in 0..rows {
            for c in 0..cols {
                if self.mask[(r, c)] {
                    out.push((r, c));
                }
            }
        }
        out
    }

    /// Values of `plane` under the mask, in `pixels()` order.
    pub fn gather(&self, plane: &DMatrix<f64>) -> Result<Vec<f64>, DoseError> {
        if plane.shape() != self.mask.shape() {
            return Err(DoseError::InvalidScan(format!(
                "ROI '{}' is {:?} but the scan is {:?}",
                self.name,
                self.mask.shape(),
                plane.shape()
            )));
        }
        Ok(self.pixels().into_iter().map(|rc| plane[rc]).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_rejects_values_above_bit_depth() {
        let err = Scan::from_rows(8, Channel::Red, &[vec![10.0, 256.0]]).unwrap_err();
        assert!(matches!(err, DoseError::InvalidScan(_)));
        assert!(Scan::from_rows(8, Channel::Red, &[vec![10.0, 255.0]]).is_ok());
    }

    #[test]
    fn scan_rejects_mismatched_planes() {
        let err = Scan::new(
            16,
            vec![
                (Channel::Red, DMatrix::from_element(2, 2, 1.0)),
                (Channel::Green, DMatrix::from_element(2, 3, 1.0)),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, DoseError::InvalidScan(_)));
    }

    #[test]
    fn missing_channel_is_reported() {
        let scan = Scan::from_rows(16, Channel::Red, &[vec![1.0]]).unwrap();
        assert!(scan.plane(Channel::Red).is_ok());
        assert!(scan.plane(Channel::Blue).is_err());
    }

    #[test]
    fn rect_roi_uses_exclusive_bounds() {
        let roi = Roi::rect("strip", 1, 3, 0, 2, (4, 4)).unwrap();
        assert_eq!(roi.len(), 4);
        assert_eq!(roi.pixels(), vec![(0, 1), (0, 2), (1, 1), (1, 2)]);
        assert!(!roi.contains(0, 3));
        assert!(Roi::rect("bad", 2, 2, 0, 1, (4, 4)).is_err());
        assert!(Roi::rect("bad", 0, 5, 0, 1, (4, 4)).is_err());
    }

    #[test]
    fn gather_checks_shape() {
        let roi = Roi::full("all", (2, 2)).unwrap();
        let plane = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(roi.gather(&plane).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert!(roi.gather(&DMatrix::from_element(3, 2, 0.0)).is_err());
    }
}
