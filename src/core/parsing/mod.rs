pub mod cache;
pub mod config;
pub mod deps;
pub mod fetchers;
pub mod hooks;
pub mod iputil;
pub mod merge;
pub mod parser;
pub mod validator;
