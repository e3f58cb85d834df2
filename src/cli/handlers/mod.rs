// src/cli/handlers/mod.rs

pub mod alias;
pub mod command;
pub mod commons;
pub mod echo;
pub mod extension;
pub mod flowdep;
pub mod parameter;
