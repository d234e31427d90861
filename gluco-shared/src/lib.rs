pub mod pagination;
pub mod record;
pub mod status;
pub mod types;
