//! Command handlers

pub mod api;
pub mod parser;
pub mod probe;
pub mod run;

pub use parser::*;
