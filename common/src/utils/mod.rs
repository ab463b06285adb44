pub mod config;
pub mod hashing;
