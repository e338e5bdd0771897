use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::matrix::Mat;

use itertools::multizip;
use rayon::prelude::*;
use serde_derive::{Deserialize, Serialize};

/// A fully connected layer of a feedforward network.
///
/// The layer carries gradient accumulators shaped exactly like its weights
/// and bias. `backward` only accumulates into them; weights never move
/// until `flush` applies the accumulated update by subtraction and clears
/// the accumulators, so several backward passes fold into one update.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DenseLayer {
    /// The incoming weights, one row per output neuron.
    weights: Mat,
    bias: Vec<f64>,
    weight_grad: Mat,
    bias_grad: Vec<f64>,
}

impl DenseLayer {
    /// Initializes a new, untrained layer.
    ///
    /// Weights start as uniform random values in `[0, 0.1)`; bias and both
    /// gradient accumulators start at zero.
    ///
    /// Arguments:
    ///
    ///  * `inputs` - the number of inputs to this layer.
    ///  * `outputs` - the number of outputs from this layer.
    pub fn new(inputs: usize, outputs: usize) -> Result<DenseLayer> {
        if inputs < 1 {
            return Err(Error::InvalidDimension(format!(
                "layer needs at least 1 input, got {}",
                inputs
            )));
        }
        if outputs < 1 {
            return Err(Error::InvalidDimension(format!(
                "layer needs at least 1 output, got {}",
                outputs
            )));
        }
        Ok(DenseLayer {
            weights: Mat::random(outputs, inputs),
            bias: vec![0.0; outputs],
            weight_grad: Mat::zeros(outputs, inputs),
            bias_grad: vec![0.0; outputs],
        })
    }

    pub fn input_len(&self) -> usize {
        self.weights.cols()
    }

    pub fn output_len(&self) -> usize {
        self.weights.rows()
    }

    /// Evaluates the layer on a batch of samples.
    ///
    /// Each output is `bias[o] + Σ_k weights[o][k] * input[k]`. The result
    /// preserves sample order, and the layer itself is never mutated.
    ///
    /// Arguments:
    ///
    ///  * `inputs` - the batch, one vector of `input_len()` values per
    ///               sample. Must not be empty.
    pub fn forward(&self, inputs: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        self.forward_with_cancel(inputs, &CancelToken::new())
    }

    /// Like [`forward`](DenseLayer::forward), but each sample task checks
    /// `cancel` before starting and aborts with `Error::Cancelled`.
    pub fn forward_with_cancel(
        &self,
        inputs: &[Vec<f64>],
        cancel: &CancelToken,
    ) -> Result<Vec<Vec<f64>>> {
        self.validate_forward(inputs)?;
        inputs
            .par_iter()
            .map(|sample| {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let outputs: Vec<f64> = self
                    .weights
                    .par_rows()
                    .zip(self.bias.par_iter())
                    .map(|(row, bias)| {
                        let mut sum = *bias;
                        for (weight, input) in row.iter().zip(sample.iter()) {
                            sum += weight * input;
                        }
                        sum
                    })
                    .collect();
                Ok(outputs)
            })
            .collect()
    }

    /// Backpropagates a batch of output errors through the layer.
    ///
    /// Scales each error by `learning_rate` and accumulates it into the
    /// gradient accumulators; the weights and bias themselves stay
    /// untouched until [`flush`](DenseLayer::flush). Returns the error
    /// batch propagated to this layer's inputs,
    /// `Σ_o output_errors[s][o] * weights[o][k]`, in sample order.
    ///
    /// Arguments:
    ///
    ///  * `inputs` - the batch this layer saw on the forward pass.
    ///  * `output_errors` - one vector of `output_len()` error values per
    ///                      sample.
    ///  * `learning_rate` - the scale applied to accumulated gradients.
    pub fn backward(
        &mut self,
        inputs: &[Vec<f64>],
        output_errors: &[Vec<f64>],
        learning_rate: f64,
    ) -> Result<Vec<Vec<f64>>> {
        self.backward_with_cancel(inputs, output_errors, learning_rate, &CancelToken::new())
    }

    /// Like [`backward`](DenseLayer::backward), but each row and sample
    /// task checks `cancel` before starting. A cancelled call may leave
    /// partial sums in the accumulators; callers abandoning the batch
    /// should not flush them.
    pub fn backward_with_cancel(
        &mut self,
        inputs: &[Vec<f64>],
        output_errors: &[Vec<f64>],
        learning_rate: f64,
        cancel: &CancelToken,
    ) -> Result<Vec<Vec<f64>>> {
        self.validate_backward(inputs, output_errors)?;

        // Gradient accumulation is partitioned by output row: every task
        // exclusively owns one accumulator row and one bias cell. Each cell
        // sums its samples in batch order no matter how tasks are
        // scheduled, so the result is deterministic.
        self.weight_grad
            .par_rows_mut()
            .zip(self.bias_grad.par_iter_mut())
            .enumerate()
            .try_for_each(|(row, (grad_row, bias_grad))| {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                for (sample, errors) in multizip((inputs, output_errors)) {
                    let scaled = errors[row] * learning_rate;
                    *bias_grad += scaled;
                    for (grad, &input) in grad_row.iter_mut().zip(sample.iter()) {
                        *grad += scaled * input;
                    }
                }
                Ok(())
            })?;

        // Input errors are partitioned by sample: every task owns the
        // vector it is filling in and only reads the shared weights.
        let input_len = self.input_len();
        output_errors
            .par_iter()
            .map(|errors| {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let mut input_errors = vec![0.0; input_len];
                for (weight_row, &error) in self.weights.iter_rows().zip(errors.iter()) {
                    for (sum, &weight) in input_errors.iter_mut().zip(weight_row.iter()) {
                        *sum += error * weight;
                    }
                }
                Ok(input_errors)
            })
            .collect()
    }

    /// Applies every accumulated gradient by subtraction and zeroes the
    /// accumulators. With all-zero accumulators this is an exact no-op.
    ///
    /// Rows are independent, so the update runs one parallel task per
    /// output neuron.
    pub fn flush(&mut self) {
        self.weights
            .par_rows_mut()
            .zip(self.weight_grad.par_rows_mut())
            .zip(self.bias.par_iter_mut().zip(self.bias_grad.par_iter_mut()))
            .for_each(|((weight_row, grad_row), (bias, bias_grad))| {
                *bias -= *bias_grad;
                *bias_grad = 0.0;
                for (weight, grad) in weight_row.iter_mut().zip(grad_row.iter_mut()) {
                    *weight -= *grad;
                    *grad = 0.0;
                }
            });
    }

    /// The weight matrix as row vectors, one row per output neuron.
    pub fn weights(&self) -> Vec<Vec<f64>> {
        self.weights.to_rows()
    }

    pub fn bias(&self) -> &[f64] {
        &self.bias
    }

    /// The accumulated, not-yet-applied weight gradient.
    pub fn weight_gradient(&self) -> Vec<Vec<f64>> {
        self.weight_grad.to_rows()
    }

    pub fn bias_gradient(&self) -> &[f64] {
        &self.bias_grad
    }

    /// Replaces the weight matrix, e.g. when reloading a persisted model.
    /// The replacement must match the layer's shape exactly; on mismatch
    /// the layer is left unchanged.
    pub fn set_weights(&mut self, rows: &[Vec<f64>]) -> Result<()> {
        if rows.len() != self.output_len() {
            return Err(Error::DimensionMismatch(format!(
                "weight assignment has {} rows, layer has {} outputs",
                rows.len(),
                self.output_len()
            )));
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != self.input_len() {
                return Err(Error::DimensionMismatch(format!(
                    "weight row {} has width {}, layer expects {}",
                    i,
                    row.len(),
                    self.input_len()
                )));
            }
        }
        self.weights = Mat::from_rows(rows);
        Ok(())
    }

    /// Replaces the bias vector; the same shape rules as
    /// [`set_weights`](DenseLayer::set_weights) apply.
    pub fn set_bias(&mut self, bias: &[f64]) -> Result<()> {
        if bias.len() != self.output_len() {
            return Err(Error::DimensionMismatch(format!(
                "bias assignment has length {}, layer has {} outputs",
                bias.len(),
                self.output_len()
            )));
        }
        self.bias = bias.to_vec();
        Ok(())
    }

    fn validate_forward(&self, inputs: &[Vec<f64>]) -> Result<()> {
        if inputs.is_empty() {
            return Err(Error::DimensionMismatch(
                "forward needs at least one input sample".to_string(),
            ));
        }
        for (i, sample) in inputs.iter().enumerate() {
            if sample.len() != self.input_len() {
                return Err(Error::DimensionMismatch(format!(
                    "input sample {} has width {}, layer expects {}",
                    i,
                    sample.len(),
                    self.input_len()
                )));
            }
        }
        Ok(())
    }

    fn validate_backward(&self, inputs: &[Vec<f64>], output_errors: &[Vec<f64>]) -> Result<()> {
        self.validate_forward(inputs)?;
        if output_errors.len() != inputs.len() {
            return Err(Error::DimensionMismatch(format!(
                "got {} error samples for {} input samples",
                output_errors.len(),
                inputs.len()
            )));
        }
        for (i, errors) in output_errors.iter().enumerate() {
            if errors.len() != self.output_len() {
                return Err(Error::DimensionMismatch(format!(
                    "error sample {} has width {}, layer expects {}",
                    i,
                    errors.len(),
                    self.output_len()
                )));
            }
        }
        Ok(())
    }
}
