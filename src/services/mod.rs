pub mod generation;
pub mod payments;
pub mod training;
