use ffnn::error::Result;
use ffnn::trainer::{LearningMode, Logging, StopCondition, Trainer};

type Input = [f64; 3];
type Output = [f64; 1];

/// Three-bit XOR: each output is the parity of the input bits.
const EXAMPLES: [(Input, Output); 6] = [
    ([0.0, 0.0, 0.0], [0.0]),
    ([0.0, 1.0, 0.0], [1.0]),
    ([0.0, 1.0, 1.0], [0.0]),
    ([1.0, 0.0, 0.0], [1.0]),
    ([1.0, 0.0, 1.0], [0.0]),
    ([1.0, 1.0, 1.0], [1.0]),
];

fn main() -> Result<()> {
    env_logger::init();

    let network = Trainer::new(&[3, 2, 1])
        .learning_rate(0.01)
        .learning_mode(LearningMode::Batch(2))
        .logging(Logging::Iterations(10))
        .stop_condition(StopCondition::Iterations(100))
        .train(&EXAMPLES[..])?;

    let mut total_error = 0.0;
    for (input, expected) in &EXAMPLES {
        let output = network.run(&input[..])?;
        total_error += (output[0] - expected[0]).powi(2);
        println!("{:?} -> {:+.4} (expected {})", input, output[0], expected[0]);
    }
    println!("mse: {:.6}", total_error / EXAMPLES.len() as f64);
    Ok(())
}
