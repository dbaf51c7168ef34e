pub mod adapters;
pub mod config_manager;
pub mod demand;
pub mod models;
pub mod observability;
pub mod openrtb;
pub mod parsing;
pub mod uuidutil;
