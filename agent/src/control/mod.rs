//! Control surface: lifecycle and graph-edit operations over HTTP

pub mod commands;
mod server;

pub use server::start_server;
