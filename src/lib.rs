pub mod cancel;
pub mod dense;
pub mod error;
pub mod feed_forward;
pub mod trainer;

mod matrix;
