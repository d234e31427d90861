pub mod bucket;
pub mod period;
pub mod range;
pub mod ranges;
pub mod summary;
