//! Dense histogram-of-oriented-gradients descriptor.
//!
//! Central-difference gradients, unsigned orientations in `[0, 180)` degrees
//! hard-binned per cell (cell histograms are mean magnitudes), and L2-Hys
//! normalisation over overlapping blocks of cells.

use ndarray::{Array1, Array2, Array3, s};

use crate::error::AnalyzerError;

const BLOCK_EPSILON: f64 = 1e-5;
const HYS_CLIP: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HogParams {
    pub orientations: usize,
    /// (rows, columns)
    pub pixels_per_cell: (usize, usize),
    /// (rows, columns)
    pub cells_per_block: (usize, usize),
}

impl Default for HogParams {
    fn default() -> Self {
        Self {
            orientations: 9,
            pixels_per_cell: (8, 8),
            cells_per_block: (2, 2),
        }
    }
}

/// Flattened block descriptor in (block row, block column, cell row, cell
/// column, orientation) order.
pub fn descriptor(gray: &Array2<f64>, params: &HogParams) -> Result<Array1<f64>, AnalyzerError> {
    let (cell_rows, cell_cols) = params.pixels_per_cell;
    let (block_rows, block_cols) = params.cells_per_block;
    if params.orientations == 0 || cell_rows == 0 || cell_cols == 0 {
        return Err(AnalyzerError::Transform(format!(
            "invalid descriptor parameters {:?}",
            params
        )));
    }

    let (height, width) = gray.dim();
    let n_cells = (height / cell_rows, width / cell_cols);
    if n_cells.0 < block_rows || n_cells.1 < block_cols || block_rows == 0 || block_cols == 0 {
        return Err(AnalyzerError::TooSmall(format!(
            "{}x{} grid yields {}x{} cells, need a {}x{} block",
            width, height, n_cells.1, n_cells.0, block_cols, block_rows
        )));
    }

    let (magnitude, orientation) = gradients(gray);
    let histograms = cell_histograms(&magnitude, &orientation, params, n_cells);
    Ok(normalized_blocks(&histograms, params.cells_per_block))
}

/// Magnitude and unsigned orientation (degrees) of central-difference
/// gradients. Border rows/columns get a zero gradient along their axis.
fn gradients(gray: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
    let (height, width) = gray.dim();
    let mut g_row = Array2::<f64>::zeros((height, width));
    let mut g_col = Array2::<f64>::zeros((height, width));

    if height > 2 {
        let diff = &gray.slice(s![2.., ..]) - &gray.slice(s![..-2, ..]);
        g_row.slice_mut(s![1..-1, ..]).assign(&diff);
    }
    if width > 2 {
        let diff = &gray.slice(s![.., 2..]) - &gray.slice(s![.., ..-2]);
        g_col.slice_mut(s![.., 1..-1]).assign(&diff);
    }

    let magnitude = ndarray::Zip::from(&g_col)
        .and(&g_row)
        .map_collect(|&gc, &gr| gc.hypot(gr));
    let orientation = ndarray::Zip::from(&g_row)
        .and(&g_col)
        .map_collect(|&gr, &gc| gr.atan2(gc).to_degrees().rem_euclid(180.0));
    (magnitude, orientation)
}

fn orientation_bin(theta: f64, per_bin: f64, orientations: usize) -> Option<usize> {
    let mut bin = (theta / per_bin).floor().max(0.0) as usize;
    while bin > 0 && theta < per_bin * bin as f64 {
        bin -= 1;
    }
    while theta >= per_bin * (bin + 1) as f64 {
        bin += 1;
    }
    (bin < orientations).then_some(bin)
}

fn cell_histograms(
    magnitude: &Array2<f64>,
    orientation: &Array2<f64>,
    params: &HogParams,
    n_cells: (usize, usize),
) -> Array3<f64> {
    let (cell_rows, cell_cols) = params.pixels_per_cell;
    let per_bin = 180.0 / params.orientations as f64;
    let mut histograms = Array3::<f64>::zeros((n_cells.0, n_cells.1, params.orientations));

    for row in 0..n_cells.0 * cell_rows {
        for col in 0..n_cells.1 * cell_cols {
            if let Some(bin) =
                orientation_bin(orientation[[row, col]], per_bin, params.orientations)
            {
                histograms[[row / cell_rows, col / cell_cols, bin]] += magnitude[[row, col]];
            }
        }
    }

    let cell_area = (cell_rows * cell_cols) as f64;
    histograms.mapv_inplace(|total| total / cell_area);
    histograms
}

fn normalized_blocks(histograms: &Array3<f64>, cells_per_block: (usize, usize)) -> Array1<f64> {
    let (n_cell_rows, n_cell_cols, orientations) = histograms.dim();
    let (block_rows, block_cols) = cells_per_block;
    let n_blocks = (n_cell_rows - block_rows + 1, n_cell_cols - block_cols + 1);

    let mut features =
        Vec::with_capacity(n_blocks.0 * n_blocks.1 * block_rows * block_cols * orientations);
    for r in 0..n_blocks.0 {
        for c in 0..n_blocks.1 {
            let block = histograms.slice(s![r..r + block_rows, c..c + block_cols, ..]);
            features.extend(l2_hys(block.iter().copied()));
        }
    }
    Array1::from(features)
}

fn l2_hys(block: impl Iterator<Item = f64>) -> Vec<f64> {
    let eps_sq = BLOCK_EPSILON * BLOCK_EPSILON;
    let values: Vec<f64> = block.collect();

    let norm = (values.iter().map(|v| v * v).sum::<f64>() + eps_sq).sqrt();
    let clipped: Vec<f64> = values.iter().map(|v| (v / norm).min(HYS_CLIP)).collect();
    let renorm = (clipped.iter().map(|v| v * v).sum::<f64>() + eps_sq).sqrt();
    clipped.into_iter().map(|v| v / renorm).collect()
}
