//! Kinetic models: summand expressions, target-model files and evaluation.

pub mod expr;
pub mod model;
pub mod target;

pub use expr::{BoundExpression, Expression};
pub use model::KineticModel;
pub use target::{TargetModel, TargetModelSpec};
