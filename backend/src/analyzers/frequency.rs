//! Frequency-domain analyzer.
//!
//! Two independent spectra of the luminance grid are checked for
//! high-frequency anomalies and fused:
//!
//! - the centred 2-D Fourier magnitude, compared outside and across a central
//!   low-frequency window spanning 40%..60% of each axis;
//! - the orthonormal 2-D DCT-II, whose bottom-right quadrant is summarised by
//!   its coefficient of variation.

use ndarray::{Array2, s};
use rustdct::DctPlanner;
use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use shared::ModelKind;

use super::{Analyzer, Assessment};
use crate::error::AnalyzerError;
use crate::imaging::{DecodedImage, gray_to_array};

const EPSILON: f64 = 1e-10;
const LOW_FREQ_WINDOW: (f64, f64) = (0.4, 0.6);

#[derive(Debug, Clone, Copy, Default)]
pub struct FrequencyAnalyzer;

impl FrequencyAnalyzer {
    pub fn new() -> Self {
        log::info!("Frequency analyzer initialized");
        Self
    }
}

impl Analyzer for FrequencyAnalyzer {
    fn kind(&self) -> ModelKind {
        ModelKind::Frequency
    }

    fn assess(&self, image: &DecodedImage) -> Result<Assessment, AnalyzerError> {
        let grid = gray_to_array(&image.luma8()?);

        let fft = fft_anomaly(&grid);
        let dct_anomaly = dct_anomaly(&grid)?;
        let score = fft.anomaly * 0.6 + dct_anomaly * 0.4;

        Ok(Assessment::new(score)
            .with("fft_anomaly", fft.anomaly)
            .with("dct_anomaly", dct_anomaly)
            .with("high_freq_power", fft.high_freq_power)
            .with("total_power", fft.total_power))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FftAnomaly {
    pub anomaly: f64,
    pub high_freq_power: f64,
    pub total_power: f64,
}

pub fn fft_anomaly(grid: &Array2<f64>) -> FftAnomaly {
    let magnitude = centered_magnitude(grid);
    let (height, width) = magnitude.dim();
    let rows = window(height);
    let cols = window(width);

    let mut high_sum = 0.0;
    let mut high_count = 0usize;
    for ((row, col), &value) in magnitude.indexed_iter() {
        if !(rows.contains(&row) && cols.contains(&col)) {
            high_sum += value;
            high_count += 1;
        }
    }

    // The window always stops short of the last row, so high_count > 0.
    let high_freq_power = high_sum / high_count as f64;
    let total_power = magnitude.sum() / magnitude.len() as f64;
    let hf_ratio = high_freq_power / (total_power + EPSILON);

    FftAnomaly {
        anomaly: (hf_ratio * 2.0).min(1.0),
        high_freq_power,
        total_power,
    }
}

fn window(len: usize) -> std::ops::Range<usize> {
    let (start, end) = LOW_FREQ_WINDOW;
    (len as f64 * start) as usize..(len as f64 * end) as usize
}

/// |FFT2| with the zero-frequency bin moved to `(rows / 2, cols / 2)`.
pub fn centered_magnitude(grid: &Array2<f64>) -> Array2<f64> {
    let (height, width) = grid.dim();
    if height == 0 || width == 0 {
        return Array2::zeros((height, width));
    }
    let mut planner = FftPlanner::<f64>::new();

    let mut rows: Vec<Complex<f64>> = grid.iter().map(|&v| Complex::new(v, 0.0)).collect();
    planner.plan_fft_forward(width).process(&mut rows);

    let mut cols = transpose(&rows, height, width);
    planner.plan_fft_forward(height).process(&mut cols);

    let mut shifted = Array2::<f64>::zeros((height, width));
    for col in 0..width {
        for row in 0..height {
            let target = ((row + height / 2) % height, (col + width / 2) % width);
            shifted[target] = cols[col * height + row].norm();
        }
    }
    shifted
}

pub fn dct_anomaly(grid: &Array2<f64>) -> Result<f64, AnalyzerError> {
    let coefficients = dct2_ortho(grid)?;
    let (height, width) = coefficients.dim();
    let block = coefficients.slice(s![height / 2.., width / 2..]).mapv(f64::abs);

    let mean = block
        .mean()
        .ok_or_else(|| AnalyzerError::Transform("empty high-frequency DCT block".to_string()))?;
    let std = block.std(0.0);
    let cv = std / (mean + EPSILON);
    Ok((cv / 10.0).min(1.0))
}

/// Separable orthonormal DCT-II over both axes.
pub fn dct2_ortho(grid: &Array2<f64>) -> Result<Array2<f64>, AnalyzerError> {
    let (height, width) = grid.dim();
    if height == 0 || width == 0 {
        return Err(AnalyzerError::EmptyImage {
            width: width as u32,
            height: height as u32,
        });
    }
    let mut planner = DctPlanner::<f64>::new();

    let mut rows: Vec<f64> = grid.iter().copied().collect();
    let row_dct = planner.plan_dct2(width);
    for row in rows.chunks_exact_mut(width) {
        row_dct.process_dct2(row);
        orthonormalize(row);
    }

    let mut cols = transpose(&rows, height, width);
    let col_dct = planner.plan_dct2(height);
    for col in cols.chunks_exact_mut(height) {
        col_dct.process_dct2(col);
        orthonormalize(col);
    }

    let restored = transpose(&cols, width, height);
    Array2::from_shape_vec((height, width), restored)
        .map_err(|e| AnalyzerError::Transform(e.to_string()))
}

fn orthonormalize(coefficients: &mut [f64]) {
    let n = coefficients.len() as f64;
    let dc = (1.0 / n).sqrt();
    let ac = (2.0 / n).sqrt();
    for (k, value) in coefficients.iter_mut().enumerate() {
        *value *= if k == 0 { dc } else { ac };
    }
}

/// Row-major `rows x cols` buffer into row-major `cols x rows`.
fn transpose<T: Copy>(data: &[T], rows: usize, cols: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(data.len());
    for col in 0..cols {
        for row in 0..rows {
            out.push(data[row * cols + col]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_flat_image_has_no_high_frequency_content() {
        let image = DecodedImage::new(RgbImage::from_pixel(256, 256, Rgb([128, 128, 128])));
        let result = FrequencyAnalyzer::new().predict(&image);

        assert!(result.error.is_none());
        assert!(result.extra["high_freq_power"] < 1e-6);
        assert!(result.extra["fft_anomaly"] < 1e-6);
        assert!(result.extra["dct_anomaly"] < 0.05);
        assert!(result.score < 0.05);
        assert!(!result.is_fake);
    }

    #[test]
    fn test_pixel_checkerboard_saturates_fft_branch() {
        let image = DecodedImage::new(RgbImage::from_fn(64, 64, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        }));
        let result = FrequencyAnalyzer::new().predict(&image);

        assert_eq!(result.extra["fft_anomaly"], 1.0);
        assert!(result.score >= 0.6);
        assert!(result.is_fake);
    }

    #[test]
    fn test_centered_magnitude_moves_dc_to_center() {
        let grid = Array2::from_elem((6, 4), 2.0);
        let magnitude = centered_magnitude(&grid);
        assert!((magnitude[[3, 2]] - 48.0).abs() < 1e-9);
        let off_center: f64 = magnitude.sum() - magnitude[[3, 2]];
        assert!(off_center.abs() < 1e-9);
    }

    #[test]
    fn test_dct_is_orthonormal() {
        let grid = Array2::from_shape_fn((8, 5), |(r, c)| (r * 5 + c) as f64 % 7.0);
        let coefficients = dct2_ortho(&grid).unwrap();
        let energy_in: f64 = grid.iter().map(|v| v * v).sum();
        let energy_out: f64 = coefficients.iter().map(|v| v * v).sum();
        assert!((energy_in - energy_out).abs() < 1e-9 * energy_in);

        let dc = coefficients[[0, 0]];
        assert!((dc - grid.sum() / (40.0f64).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_window_bounds() {
        assert_eq!(window(256), 102..153);
        assert_eq!(window(1), 0..0);
        assert_eq!(window(10), 4..6);
    }
}
