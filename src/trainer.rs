//! Utilities for training feedforward networks.
//!
//! # Example
//!
//! ```
//! # use ffnn::trainer::*;
//! let examples = [
//!     ([0.0, 0.0, 0.0], [0.0]),
//!     ([0.0, 1.0, 0.0], [1.0]),
//!     ([0.0, 1.0, 1.0], [0.0]),
//!     ([1.0, 0.0, 0.0], [1.0]),
//!     ([1.0, 0.0, 1.0], [0.0]),
//!     ([1.0, 1.0, 1.0], [1.0]),
//! ];
//!
//! let network = Trainer::new(&[3, 2, 1])
//!     .learning_rate(0.01)
//!     .learning_mode(LearningMode::Batch(2))
//!     .logging(Logging::Silent)
//!     .stop_condition(StopCondition::Iterations(100))
//!     .train(&examples[..])
//!     .unwrap();
//!
//! let out = network.run(&[1.0, 1.0, 1.0]).unwrap();
//! assert_eq!(out.len(), 1);
//! ```

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::feed_forward::Network;

use itertools::izip;
use log::info;
use std::time::{Duration, Instant};

/// A builder for training new networks.
#[derive(Clone, Debug)]
pub struct Trainer {
    shape: Vec<usize>,
    learning_mode: LearningMode,
    learning_rate: f64,
    logging: Logging,
    stop_condition: StopCondition,
    cancel: Option<CancelToken>,
}

impl Trainer {
    /// Creates a new Trainer instance.
    ///
    /// Arguments:
    ///
    ///  * `shape` - the width of each layer of neurons, input first. Must
    ///              contain at least an input and an output width.
    ///
    /// The trainer is initialized with some default values. These defaults
    /// are:
    ///
    /// * A stochastic learning mode.
    /// * A learning rate of 0.1.
    /// * Stops after 1000 training iterations.
    /// * Logs on training completion.
    pub fn new(shape: &[usize]) -> Self {
        Trainer {
            shape: shape.into(),
            learning_mode: LearningMode::Stochastic,
            learning_rate: 0.1,
            logging: Logging::Completion,
            stop_condition: StopCondition::Iterations(1000),
            cancel: None,
        }
    }

    /// Sets the `LearningMode` to use for training.
    pub fn learning_mode(mut self, mode: LearningMode) -> Self {
        self.learning_mode = mode;
        self
    }

    /// Sets the learning rate to use during gradient descent.
    pub fn learning_rate(mut self, rate: f64) -> Self {
        self.learning_rate = rate;
        self
    }

    /// Sets the type of logging to be emitted during training.
    pub fn logging(mut self, logging: Logging) -> Self {
        self.logging = logging;
        self
    }

    /// Sets the condition to finish training.
    pub fn stop_condition<C>(mut self, condition: C) -> Self
    where
        C: Into<StopCondition>,
    {
        self.stop_condition = condition.into();
        self
    }

    /// Attaches a token that lets another thread abort training. Updates
    /// already flushed when the token fires stay applied.
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Trains a network using the provided labelled data.
    ///
    /// The provided `examples` should be a list of labelled data, where
    /// each element takes the form `(network input, expected output)`.
    /// Every iteration walks the examples in chunks of the learning mode's
    /// size, running one forward/backward/flush cycle per chunk, and scores
    /// the iteration by mean squared error.
    ///
    /// Returns:
    ///   A fully trained network, or an error if invalid training
    ///   parameters were provided.
    pub fn train<I, O>(self, examples: &[(I, O)]) -> Result<Network>
    where
        I: AsRef<[f64]>,
        O: AsRef<[f64]>,
    {
        self.validate(examples)?;
        let mut network = Network::new(&self.shape)?;

        let inputs: Vec<Vec<f64>> = examples.iter().map(|(i, _)| i.as_ref().to_vec()).collect();
        let targets: Vec<Vec<f64>> = examples.iter().map(|(_, o)| o.as_ref().to_vec()).collect();

        let chunk_size = match self.learning_mode {
            LearningMode::Stochastic => 1,
            LearningMode::Batch(size) => size,
        };
        let cancel = self.cancel.clone().unwrap_or_default();

        let start_time = Instant::now();
        let mut iteration = 0;
        let mut training_error;
        loop {
            training_error = 0.0;
            for (input_chunk, target_chunk) in
                inputs.chunks(chunk_size).zip(targets.chunks(chunk_size))
            {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let outputs = network.forward_with_cancel(input_chunk, &cancel)?;
                for (prediction, target) in izip!(&outputs[outputs.len() - 1], target_chunk) {
                    training_error += mean_square_error(prediction, target);
                }
                network.backward_with_cancel(
                    input_chunk,
                    target_chunk,
                    &outputs,
                    self.learning_rate,
                    &cancel,
                )?;
                network.flush();
            }
            training_error /= 2.0 * examples.len() as f64;
            iteration += 1;

            self.logging.iteration(iteration, training_error);
            if self
                .stop_condition
                .should_stop(iteration, training_error, start_time)
            {
                break;
            }
        }
        self.logging.completion(iteration, training_error, start_time);
        Ok(network)
    }

    /// Verifies that all provided inputs to the `Trainer` are valid,
    /// returning an error if something is wrong.
    fn validate<I, O>(&self, examples: &[(I, O)]) -> Result<()>
    where
        I: AsRef<[f64]>,
        O: AsRef<[f64]>,
    {
        if self.shape.len() < 2 {
            return Err(Error::InvalidDimension(format!(
                "network shape needs at least 2 widths, got {}",
                self.shape.len()
            )));
        }
        for width in &self.shape {
            if *width == 0 {
                return Err(Error::InvalidDimension(
                    "network shape contains an empty layer".to_string(),
                ));
            }
        }
        if let LearningMode::Batch(0) = self.learning_mode {
            return Err(Error::InvalidDimension(
                "batch size must be at least 1".to_string(),
            ));
        }
        if examples.is_empty() {
            return Err(Error::DimensionMismatch(
                "training needs at least one example".to_string(),
            ));
        }
        let input_len = self.shape[0];
        let output_len = self.shape[self.shape.len() - 1];
        for (i, (input, output)) in examples.iter().enumerate() {
            if input.as_ref().len() != input_len {
                return Err(Error::DimensionMismatch(format!(
                    "example {} input has width {}, network expects {}",
                    i,
                    input.as_ref().len(),
                    input_len
                )));
            }
            if output.as_ref().len() != output_len {
                return Err(Error::DimensionMismatch(format!(
                    "example {} output has width {}, network outputs {}",
                    i,
                    output.as_ref().len(),
                    output_len
                )));
            }
        }
        Ok(())
    }
}

/// The learning mode to use for training.
#[derive(Copy, Clone, Debug)]
pub enum LearningMode {
    /// Apply weight updates after every training example.
    Stochastic,
    /// Apply weight updates in chunks of the provided size. A size larger
    /// than the example count degenerates to full-batch descent.
    Batch(usize),
}

/// Logging frequency to use during training. Messages go through
/// [`log::info!`], so they are silent unless a logger is installed.
#[derive(Copy, Clone, Debug)]
pub enum Logging {
    /// No logs will be emitted.
    Silent,
    /// A summary will be emitted at completion.
    Completion,
    /// A summary will be emitted after every `n` training iterations.
    Iterations(usize),
}

impl Logging {
    /// Performs logging at the current `iteration` of training.
    fn iteration(&self, iteration: usize, training_error: f64) {
        if let Logging::Iterations(freq) = *self {
            if freq > 0 && iteration % freq == 0 {
                info!("iteration {}: mse = {:.6}", iteration, training_error);
            }
        }
    }

    /// Performs logging at the end of training.
    fn completion(&self, iterations: usize, training_error: f64, start_time: Instant) {
        if let Logging::Silent = *self {
            return;
        }
        info!(
            "trained for {} iterations in {:.2?}, final mse = {:.6}",
            iterations,
            start_time.elapsed(),
            training_error
        );
    }
}

/// When to stop training.
#[derive(Copy, Clone, Debug)]
pub enum StopCondition {
    /// Stops after the provided number of training iterations.
    Iterations(usize),
    /// Stops when the training error drops below the provided threshold.
    ErrorThreshold(f64),
    /// Stops after the provided duration.
    Duration(Duration),
}

impl From<Duration> for StopCondition {
    fn from(duration: Duration) -> StopCondition {
        StopCondition::Duration(duration)
    }
}

impl StopCondition {
    /// Returns true if training is complete.
    fn should_stop(&self, iteration: usize, training_error: f64, start_time: Instant) -> bool {
        match *self {
            StopCondition::Iterations(iterations) => iteration >= iterations,
            StopCondition::ErrorThreshold(threshold) => training_error < threshold,
            StopCondition::Duration(duration) => start_time.elapsed() > duration,
        }
    }
}

/// Computes the mean squared error between `actual` and `expected`.
fn mean_square_error(actual: &[f64], expected: &[f64]) -> f64 {
    assert_eq!(actual.len(), expected.len());
    let mut error = 0.0;
    for (&a, &e) in actual.iter().zip(expected.iter()) {
        error += (a - e) * (a - e);
    }
    error / actual.len() as f64
}
