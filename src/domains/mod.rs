pub mod core;
pub mod export;
