pub mod engine;

pub use engine::{BatchStep, CommandEngine};
