pub mod conversion;
pub mod loader;
pub mod normalize;
