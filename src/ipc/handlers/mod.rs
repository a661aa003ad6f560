pub mod core;
pub mod predictions;
pub mod subjects;
