// src/core/mod.rs

//! # Resolution Engine
//!
//! Profiles are stacked and merged into a [`config::Config`]; dotted command paths are
//! resolved through the resolver chains into cached [`command::Command`]s; command lines
//! are parsed level by level with remembered parameters and run by a [`session::Session`].

pub mod arg_parser;
pub mod cache;
pub mod command;
pub mod command_resolution;
pub mod config;
pub mod context_resolver;
pub mod flow;
pub mod merger;
pub mod metadata;
pub mod migration;
pub mod paths;
pub mod profile;
pub mod profile_stack;
pub mod resolver;
pub mod resolvers;
pub mod session;
