pub mod deed;
pub mod engine;
pub mod extraction;
pub mod files;
pub mod structuring;
pub mod validation;
pub mod vision;
