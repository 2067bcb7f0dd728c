pub mod eta;
pub mod geo;
pub mod order;
