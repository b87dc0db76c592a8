//! Geometry: affine transforms, streamline tangents, response tensors and
//! discretization spheres.

pub mod affine;
pub mod sphere;
pub mod tangent;
pub mod tensor;

pub use affine::*;
pub use sphere::*;
pub use tangent::*;
pub use tensor::*;
