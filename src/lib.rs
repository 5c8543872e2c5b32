// Library exports for the steward fleet supervisor

pub mod cli;
pub mod config;
pub mod error;
pub mod insights;
pub mod process;
pub mod security;
pub mod supervisor;
