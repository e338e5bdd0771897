use rand::Rng;
use rayon::prelude::*;
use serde_derive::{Deserialize, Serialize};

/// Dense row-major storage for layer weights and gradient accumulators.
///
/// Row-major is load-bearing: row `r` is the contiguous weight slice of
/// output neuron `r`, which makes a row the unit of lock-free partitioning
/// for parallel accumulation and flushing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Mat {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Mat {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Mat {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Uniform random values in `[0, 0.1)`, initialized row by row in
    /// parallel. Rows are disjoint, so no synchronization is needed.
    pub fn random(rows: usize, cols: usize) -> Self {
        let mut data = vec![0.0; rows * cols];
        data.par_chunks_mut(cols).for_each(|row| {
            let mut rng = rand::thread_rng();
            for cell in row {
                *cell = rng.gen::<f64>() / 10.0;
            }
        });
        Mat { rows, cols, data }
    }

    /// Builds from row vectors. Callers validate rectangularity first.
    pub fn from_rows(rows: &[Vec<f64>]) -> Self {
        let cols = rows.first().map_or(0, Vec::len);
        debug_assert!(rows.iter().all(|row| row.len() == cols));
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            data.extend_from_slice(row);
        }
        Mat {
            rows: rows.len(),
            cols,
            data,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn iter_rows(&self) -> std::slice::Chunks<'_, f64> {
        self.data.chunks(self.cols)
    }

    pub fn par_rows(&self) -> impl IndexedParallelIterator<Item = &[f64]> {
        self.data.par_chunks(self.cols)
    }

    pub fn par_rows_mut(&mut self) -> impl IndexedParallelIterator<Item = &mut [f64]> {
        self.data.par_chunks_mut(self.cols)
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.iter_rows().map(<[f64]>::to_vec).collect()
    }
}
