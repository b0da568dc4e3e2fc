//! Terminal plots.

pub mod ascii;

pub use ascii::{Series, render_das_plot, render_fit_plot, render_plot};
