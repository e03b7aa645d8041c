//! Cooperative async primitives.
//!
//! - [`ObservableValue`]: a shared, monotonic value that tasks can await
//!   until it reaches a threshold, used for GPU fence completion
//! - [`AtLeast`]: the future returned by [`ObservableValue::at_least`]

mod observable;

pub use observable::{AtLeast, ObservableValue};
