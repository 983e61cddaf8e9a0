//! Command handlers

pub mod config;
pub mod element;
pub mod import;
pub mod status;
