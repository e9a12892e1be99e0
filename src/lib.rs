pub mod api;
pub mod catalog;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod integration;
pub mod model;
pub mod session;

pub use api::Error;
pub use integration::Integration;
