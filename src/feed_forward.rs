//! A [Feedforward neural network]
//! (https://en.wikipedia.org/wiki/Feedforward_neural_network) built from
//! fully connected layers, evaluated and trained in parallel batches.
//!
//! # Example
//!
//! Let's fit a small network to a three-bit XOR table:
//!
//! ```
//! # use ffnn::feed_forward::Network;
//! let inputs = vec![
//!     vec![0.0, 0.0, 0.0],
//!     vec![0.0, 1.0, 0.0],
//!     vec![0.0, 1.0, 1.0],
//!     vec![1.0, 0.0, 0.0],
//!     vec![1.0, 0.0, 1.0],
//!     vec![1.0, 1.0, 1.0],
//! ];
//! let targets = vec![
//!     vec![0.0],
//!     vec![1.0],
//!     vec![0.0],
//!     vec![1.0],
//!     vec![0.0],
//!     vec![1.0],
//! ];
//!
//! // Two chunks of samples per epoch, 100 epochs of gradient descent.
//! let mut network = Network::new(&[3, 2, 1]).unwrap();
//! network.train(&inputs, &targets, 0.01, 100, 2).unwrap();
//!
//! let prediction = network.run(&[0.0, 1.0, 0.0]).unwrap();
//! assert_eq!(prediction.len(), 1);
//! ```

use crate::cancel::CancelToken;
use crate::dense::DenseLayer;
use crate::error::{Error, Result};

use log::debug;
use rayon::prelude::*;
use serde_derive::{Deserialize, Serialize};

/// A feedforward neural network: a chain of [`DenseLayer`]s.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Network {
    shape: Vec<usize>,
    layers: Vec<DenseLayer>,
}

impl Network {
    /// Creates a new, untrained network.
    ///
    /// Arguments:
    ///
    ///  * `shape` - the width of each layer of neurons, input first. Must
    ///              contain at least an input and an output width, all
    ///              nonzero.
    pub fn new(shape: &[usize]) -> Result<Network> {
        if shape.len() < 2 {
            return Err(Error::InvalidDimension(format!(
                "network shape needs at least 2 widths, got {}",
                shape.len()
            )));
        }
        let mut layers = Vec::with_capacity(shape.len() - 1);
        for i in 0..(shape.len() - 1) {
            layers.push(DenseLayer::new(shape[i], shape[i + 1])?);
        }
        Ok(Network {
            shape: shape.to_vec(),
            layers,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// The width of the input layer.
    pub fn input_len(&self) -> usize {
        self.shape[0]
    }

    /// The width of the output layer.
    pub fn output_len(&self) -> usize {
        self.shape[self.shape.len() - 1]
    }

    pub fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }

    /// Mutable access to the layers, e.g. for loading persisted weights.
    /// Layer shapes are fixed, so the chain cannot be broken this way.
    pub fn layers_mut(&mut self) -> &mut [DenseLayer] {
        &mut self.layers
    }

    /// Evaluates the network on a batch, returning every layer's output
    /// batch, indexed `[layer][sample][output]`. The final level is the
    /// network's prediction; the whole tensor feeds
    /// [`backward`](Network::backward).
    pub fn forward(&self, inputs: &[Vec<f64>]) -> Result<Vec<Vec<Vec<f64>>>> {
        self.forward_with_cancel(inputs, &CancelToken::new())
    }

    /// Cancellable [`forward`](Network::forward).
    pub fn forward_with_cancel(
        &self,
        inputs: &[Vec<f64>],
        cancel: &CancelToken,
    ) -> Result<Vec<Vec<Vec<f64>>>> {
        self.validate_forward(inputs)?;
        let mut outputs: Vec<Vec<Vec<f64>>> = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let batch = match outputs.last() {
                Some(previous) => layer.forward_with_cancel(previous, cancel)?,
                None => layer.forward_with_cancel(inputs, cancel)?,
            };
            outputs.push(batch);
        }
        Ok(outputs)
    }

    /// Feeds a batch of prediction errors back through every layer,
    /// accumulating gradients; nothing is applied until
    /// [`flush`](Network::flush).
    ///
    /// The error signal starts as `outputs[last] - targets`, computed one
    /// parallel task per sample, and each layer's backward pass hands the
    /// propagated errors to the layer before it. The first layer works on
    /// the raw `inputs` and its propagated errors are discarded.
    ///
    /// Arguments:
    ///
    ///  * `inputs` - the batch given to [`forward`](Network::forward).
    ///  * `targets` - the desired final outputs, one per sample.
    ///  * `outputs` - the tensor [`forward`](Network::forward) returned.
    ///  * `learning_rate` - the scale applied to accumulated gradients.
    pub fn backward(
        &mut self,
        inputs: &[Vec<f64>],
        targets: &[Vec<f64>],
        outputs: &[Vec<Vec<f64>>],
        learning_rate: f64,
    ) -> Result<()> {
        self.backward_with_cancel(inputs, targets, outputs, learning_rate, &CancelToken::new())
    }

    /// Cancellable [`backward`](Network::backward). A cancelled call may
    /// leave partial sums in some layers' accumulators; callers abandoning
    /// the batch should not flush them.
    pub fn backward_with_cancel(
        &mut self,
        inputs: &[Vec<f64>],
        targets: &[Vec<f64>],
        outputs: &[Vec<Vec<f64>>],
        learning_rate: f64,
        cancel: &CancelToken,
    ) -> Result<()> {
        self.validate_backward(inputs, targets, outputs)?;

        let mut errors: Vec<Vec<f64>> = outputs[self.layers.len() - 1]
            .par_iter()
            .zip(targets.par_iter())
            .map(|(output, target)| {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                Ok(output
                    .iter()
                    .zip(target.iter())
                    .map(|(&o, &t)| o - t)
                    .collect())
            })
            .collect::<Result<_>>()?;

        for i in (0..self.layers.len()).rev() {
            let layer_inputs = if i == 0 {
                inputs
            } else {
                outputs[i - 1].as_slice()
            };
            errors =
                self.layers[i].backward_with_cancel(layer_inputs, &errors, learning_rate, cancel)?;
        }
        Ok(())
    }

    /// Applies every layer's accumulated gradients. Layers are independent,
    /// so ordering is immaterial.
    pub fn flush(&mut self) {
        for layer in &mut self.layers {
            layer.flush();
        }
    }

    /// Trains the network by chunked gradient descent.
    ///
    /// Runs `iterations` epochs. Each epoch splits the batch into
    /// consecutive chunks of `chunk_size` samples (the final chunk may be
    /// shorter) and runs forward, backward, and flush on each chunk in
    /// order. The chunk walk is sequential and identical every epoch, so
    /// training is reproducible for fixed starting weights.
    ///
    /// Arguments:
    ///
    ///  * `inputs` - the full training batch.
    ///  * `targets` - the desired output for each sample.
    ///  * `learning_rate` - the gradient descent step scale.
    ///  * `iterations` - the number of epochs over the whole batch.
    ///  * `chunk_size` - samples per weight update. Must be at least 1;
    ///                   larger than the batch means one chunk per epoch.
    pub fn train(
        &mut self,
        inputs: &[Vec<f64>],
        targets: &[Vec<f64>],
        learning_rate: f64,
        iterations: usize,
        chunk_size: usize,
    ) -> Result<()> {
        self.train_with_cancel(
            inputs,
            targets,
            learning_rate,
            iterations,
            chunk_size,
            &CancelToken::new(),
        )
    }

    /// Cancellable [`train`](Network::train); the token is checked before
    /// every chunk and inside the batch operations themselves. Updates
    /// flushed before the cancellation stay applied.
    pub fn train_with_cancel(
        &mut self,
        inputs: &[Vec<f64>],
        targets: &[Vec<f64>],
        learning_rate: f64,
        iterations: usize,
        chunk_size: usize,
        cancel: &CancelToken,
    ) -> Result<()> {
        if chunk_size < 1 {
            return Err(Error::InvalidDimension(
                "chunk size must be at least 1".to_string(),
            ));
        }
        self.validate_train(inputs, targets)?;
        for epoch in 0..iterations {
            for (input_chunk, target_chunk) in
                inputs.chunks(chunk_size).zip(targets.chunks(chunk_size))
            {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let outputs = self.forward_with_cancel(input_chunk, cancel)?;
                self.backward_with_cancel(
                    input_chunk,
                    target_chunk,
                    &outputs,
                    learning_rate,
                    cancel,
                )?;
                self.flush();
            }
            debug!("epoch {}/{} complete", epoch + 1, iterations);
        }
        Ok(())
    }

    /// Feeds a single `input` through the network, returning the final
    /// layer's output.
    pub fn run(&self, input: &[f64]) -> Result<Vec<f64>> {
        let mut outputs = self.forward(&[input.to_vec()])?;
        let mut final_batch = outputs.swap_remove(self.layers.len() - 1);
        Ok(final_batch.swap_remove(0))
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
                    "input sample {} has width {}, network expects {}",
                    i,
                    sample.len(),
                    self.input_len()
                )));
            }
        }
        Ok(())
    }

    fn validate_train(&self, inputs: &[Vec<f64>], targets: &[Vec<f64>]) -> Result<()> {
        self.validate_forward(inputs)?;
        if targets.len() != inputs.len() {
            return Err(Error::DimensionMismatch(format!(
                "got {} target samples for {} input samples",
                targets.len(),
                inputs.len()
            )));
        }
        for (i, target) in targets.iter().enumerate() {
            if target.len() != self.output_len() {
                return Err(Error::DimensionMismatch(format!(
                    "target sample {} has width {}, network outputs {}",
                    i,
                    target.len(),
                    self.output_len()
                )));
            }
        }
        Ok(())
    }

    fn validate_backward(
        &self,
        inputs: &[Vec<f64>],
        targets: &[Vec<f64>],
        outputs: &[Vec<Vec<f64>>],
    ) -> Result<()> {
        self.validate_train(inputs, targets)?;
        if outputs.len() != self.layers.len() {
            return Err(Error::DimensionMismatch(format!(
                "output tensor has {} levels, network has {} layers",
                outputs.len(),
                self.layers.len()
            )));
        }
        for (level, batch) in outputs.iter().enumerate() {
            if batch.len() != inputs.len() {
                return Err(Error::DimensionMismatch(format!(
                    "output level {} has {} samples, the batch has {}",
                    level,
                    batch.len(),
                    inputs.len()
                )));
            }
            for (i, sample) in batch.iter().enumerate() {
                if sample.len() != self.shape[level + 1] {
                    return Err(Error::DimensionMismatch(format!(
                        "output level {} sample {} has width {}, layer {} outputs {}",
                        level,
                        i,
                        sample.len(),
                        level,
                        self.shape[level + 1]
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    fn xor_batch() -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
        let inputs = vec![
            vec![0.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 1.0, 1.0],
            vec![1.0, 0.0, 0.0],
            vec![1.0, 0.0, 1.0],
            vec![1.0, 1.0, 1.0],
        ];
        let targets = vec![
            vec![0.0],
            vec![1.0],
            vec![0.0],
            vec![1.0],
            vec![0.0],
            vec![1.0],
        ];
        (inputs, targets)
    }

    /// Mean squared prediction error over a batch.
    fn mse(network: &Network, inputs: &[Vec<f64>], targets: &[Vec<f64>]) -> f64 {
        let outputs = network.forward(inputs).unwrap();
        let final_level = &outputs[outputs.len() - 1];
        let mut error = 0.0;
        let mut count = 0;
        for (output, target) in final_level.iter().zip(targets.iter()) {
            for (&o, &t) in output.iter().zip(target.iter()) {
                error += (o - t) * (o - t);
                count += 1;
            }
        }
        error / count as f64
    }

    /// A [2, 2, 1] network with hand-picked weights for exact arithmetic.
    fn fixed_network() -> Network {
        let mut network = Network::new(&[2, 2, 1]).unwrap();
        let layers = network.layers_mut();
        layers[0]
            .set_weights(&[vec![1.0, 0.0], vec![0.0, 1.0]])
            .unwrap();
        layers[0].set_bias(&[0.0, 0.0]).unwrap();
        layers[1].set_weights(&[vec![1.0, -1.0]]).unwrap();
        layers[1].set_bias(&[0.0]).unwrap();
        network
    }

    #[test]
    fn new_builds_layers_from_shape() {
        let network = Network::new(&[3, 2, 1]).unwrap();
        assert_eq!(network.shape(), &[3, 2, 1]);
        assert_eq!(network.input_len(), 3);
        assert_eq!(network.output_len(), 1);
        assert_eq!(network.layers().len(), 2);
        assert_eq!(network.layers()[0].input_len(), 3);
        assert_eq!(network.layers()[0].output_len(), 2);
        assert_eq!(network.layers()[1].input_len(), 2);
        assert_eq!(network.layers()[1].output_len(), 1);
    }

    #[test]
    fn new_rejects_bad_shapes() {
        assert!(matches!(
            Network::new(&[]),
            Err(Error::InvalidDimension(_))
        ));
        assert!(matches!(
            Network::new(&[3]),
            Err(Error::InvalidDimension(_))
        ));
        assert!(matches!(
            Network::new(&[3, 0, 1]),
            Err(Error::InvalidDimension(_))
        ));
    }

    #[test]
    fn forward_chains_layer_outputs() {
        let mut network = Network::new(&[3, 2, 1]).unwrap();
        let layers = network.layers_mut();
        layers[0]
            .set_weights(&[vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]])
            .unwrap();
        layers[1].set_weights(&[vec![1.0, 1.0]]).unwrap();
        layers[1].set_bias(&[0.5]).unwrap();

        let outputs = network.forward(&[vec![1.0, 2.0, 3.0]]).unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0], vec![vec![1.0, 2.0]]);
        assert_eq!(outputs[1], vec![vec![3.5]]);

        assert_eq!(network.run(&[1.0, 2.0, 3.0]).unwrap(), vec![3.5]);
    }

    #[test]
    fn forward_rejects_bad_batches() {
        let network = Network::new(&[3, 2, 1]).unwrap();
        assert!(matches!(
            network.forward(&[]),
            Err(Error::DimensionMismatch(_))
        ));
        assert!(matches!(
            network.forward(&[vec![1.0, 2.0]]),
            Err(Error::DimensionMismatch(_))
        ));
    }

    #[test]
    fn backward_accumulates_through_every_layer() {
        let mut network = fixed_network();
        let inputs = vec![vec![1.0, 2.0]];
        let targets = vec![vec![0.0]];

        let outputs = network.forward(&inputs).unwrap();
        assert_eq!(outputs[0], vec![vec![1.0, 2.0]]);
        assert_eq!(outputs[1], vec![vec![-1.0]]);

        network.backward(&inputs, &targets, &outputs, 0.1).unwrap();

        // Output layer: error = -1.0.
        let last = &network.layers()[1];
        assert_close(last.bias_gradient()[0], -0.1);
        assert_close(last.weight_gradient()[0][0], -0.1);
        assert_close(last.weight_gradient()[0][1], -0.2);

        // Hidden layer sees the propagated errors [-1.0, 1.0].
        let first = &network.layers()[0];
        assert_close(first.bias_gradient()[0], -0.1);
        assert_close(first.bias_gradient()[1], 0.1);
        assert_close(first.weight_gradient()[0][0], -0.1);
        assert_close(first.weight_gradient()[0][1], -0.2);
        assert_close(first.weight_gradient()[1][0], 0.1);
        assert_close(first.weight_gradient()[1][1], 0.2);

        // Nothing applied yet.
        assert_eq!(last.weights(), vec![vec![1.0, -1.0]]);

        network.flush();
        let last = &network.layers()[1];
        assert_close(last.weights()[0][0], 1.1);
        assert_close(last.weights()[0][1], -0.8);
        assert_close(last.bias()[0], 0.1);
        assert!(last.bias_gradient().iter().all(|&g| g == 0.0));
    }

    #[test]
    fn backward_rejects_bad_tensors() {
        let mut network = fixed_network();
        let inputs = vec![vec![1.0, 2.0]];
        let targets = vec![vec![0.0]];
        let outputs = network.forward(&inputs).unwrap();

        // Too few levels.
        let truncated = outputs[..1].to_vec();
        assert!(matches!(
            network.backward(&inputs, &targets, &truncated, 0.1),
            Err(Error::DimensionMismatch(_))
        ));

        // A level with the wrong sample count.
        let mut uneven = outputs.clone();
        uneven[0].push(vec![0.0, 0.0]);
        assert!(matches!(
            network.backward(&inputs, &targets, &uneven, 0.1),
            Err(Error::DimensionMismatch(_))
        ));

        // A level whose samples have the wrong width.
        let mut narrow = outputs.clone();
        narrow[0][0].pop();
        assert!(matches!(
            network.backward(&inputs, &targets, &narrow, 0.1),
            Err(Error::DimensionMismatch(_))
        ));

        // Mismatched target count and width.
        assert!(matches!(
            network.backward(&inputs, &[], &outputs, 0.1),
            Err(Error::DimensionMismatch(_))
        ));
        assert!(matches!(
            network.backward(&inputs, &[vec![0.0, 0.0]], &outputs, 0.1),
            Err(Error::DimensionMismatch(_))
        ));

        // Failed validation left every accumulator untouched.
        for layer in network.layers() {
            assert!(layer.bias_gradient().iter().all(|&g| g == 0.0));
            assert!(layer
                .weight_gradient()
                .iter()
                .all(|row| row.iter().all(|&g| g == 0.0)));
        }
    }

    #[test]
    fn single_layer_network_trains() {
        let mut network = Network::new(&[3, 1]).unwrap();
        let inputs = vec![vec![1.0, 2.0, 3.0], vec![3.0, 2.0, 1.0]];
        let targets = vec![vec![1.0], vec![3.0]];

        let before = mse(&network, &inputs, &targets);
        network.train(&inputs, &targets, 0.01, 100, 2).unwrap();
        let after = mse(&network, &inputs, &targets);
        assert!(after < before);
    }

    #[test]
    fn train_monotonically_reduces_toy_error() {
        // The two-sample regression batch the engine was first tried on.
        let mut network = Network::new(&[3, 2, 1]).unwrap();
        let inputs = vec![vec![1.0, 2.0, 3.0], vec![3.0, 2.0, 1.0]];
        let targets = vec![vec![1.0], vec![3.0]];

        let mut last = mse(&network, &inputs, &targets);
        for _ in 0..10 {
            network.train(&inputs, &targets, 0.01, 10, 2).unwrap();
            let current = mse(&network, &inputs, &targets);
            assert!(current < last);
            last = current;
        }
    }

    #[test]
    fn train_reduces_loss_on_xor_batch() {
        let (inputs, targets) = xor_batch();
        let mut network = Network::new(&[3, 2, 1]).unwrap();

        network.train(&inputs, &targets, 0.01, 1, 2).unwrap();
        let after_first = mse(&network, &inputs, &targets);
        network.train(&inputs, &targets, 0.01, 99, 2).unwrap();
        let after_hundred = mse(&network, &inputs, &targets);

        assert!(after_hundred < after_first);
    }

    #[test]
    fn train_handles_uneven_and_oversized_chunks() {
        let (inputs, targets) = xor_batch();

        // 6 samples in chunks of 4 leaves a final chunk of 2.
        let mut network = Network::new(&[3, 2, 1]).unwrap();
        let before = mse(&network, &inputs, &targets);
        network.train(&inputs, &targets, 0.01, 50, 4).unwrap();
        assert!(mse(&network, &inputs, &targets) < before);

        // A chunk larger than the batch degenerates to full-batch descent.
        let mut network = Network::new(&[3, 2, 1]).unwrap();
        let before = mse(&network, &inputs, &targets);
        network.train(&inputs, &targets, 0.01, 50, 100).unwrap();
        assert!(mse(&network, &inputs, &targets) < before);
    }

    #[test]
    fn train_rejects_bad_arguments() {
        let (inputs, targets) = xor_batch();
        let mut network = Network::new(&[3, 2, 1]).unwrap();

        assert!(matches!(
            network.train(&inputs, &targets, 0.01, 10, 0),
            Err(Error::InvalidDimension(_))
        ));
        assert!(matches!(
            network.train(&inputs, &targets[..3], 0.01, 10, 2),
            Err(Error::DimensionMismatch(_))
        ));
        assert!(matches!(
            network.train(&[], &[], 0.01, 10, 2),
            Err(Error::DimensionMismatch(_))
        ));
        assert!(matches!(
            network.train(&inputs, &inputs, 0.01, 10, 2),
            Err(Error::DimensionMismatch(_))
        ));
    }

    #[test]
    fn train_is_reproducible_for_fixed_weights() {
        let inputs = vec![vec![1.0, 2.0], vec![0.0, 1.0], vec![-1.0, 0.5]];
        let targets = vec![vec![1.0], vec![0.0], vec![0.5]];
        let mut first = fixed_network();
        let mut second = fixed_network();

        first.train(&inputs, &targets, 0.01, 25, 2).unwrap();
        second.train(&inputs, &targets, 0.01, 25, 2).unwrap();

        for (a, b) in first.layers().iter().zip(second.layers().iter()) {
            assert_eq!(a.weights(), b.weights());
            assert_eq!(a.bias(), b.bias());
        }
    }

    #[test]
    fn cancelled_train_changes_nothing() {
        let (inputs, targets) = xor_batch();
        let mut network = Network::new(&[3, 2, 1]).unwrap();
        let weights = network.layers()[0].weights();

        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(
            network.train_with_cancel(&inputs, &targets, 0.01, 10, 2, &token),
            Err(Error::Cancelled)
        ));
        assert_eq!(network.layers()[0].weights(), weights);
    }
}
