pub mod inference;
pub mod layers;
pub mod sequential;
pub mod topology;
pub mod weights;
