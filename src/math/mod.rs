//! Mathematical utilities: decay basis, SVD, least squares and axis grids.

pub mod basis;
pub mod grid;
pub mod ols;
pub mod svd;

pub use basis::*;
pub use grid::*;
pub use ols::*;
pub use svd::*;
