pub mod commands;
pub mod dataset;
