pub mod deed;
pub mod lenient;

pub use deed::*;
