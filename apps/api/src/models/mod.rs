pub mod milestone;
pub mod shield;
pub mod streak;
