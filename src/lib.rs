pub mod api;
pub mod config;
pub mod error;
pub mod hotspot;
pub mod response;
pub mod services;
pub mod system;
