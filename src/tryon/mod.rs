pub mod generator;

pub use generator::{GeneratedView, TryOnGenerator};
