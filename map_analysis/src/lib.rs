pub mod analysis;
pub mod config;
pub mod data_handling;
pub mod helper_functions;
pub mod map;
pub mod models;
