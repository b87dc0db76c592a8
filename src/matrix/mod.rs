//! Design matrix: sparse assembly and the products the solver needs.

pub mod builder;
pub mod ops;

pub use builder::*;
pub use ops::*;
