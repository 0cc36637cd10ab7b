//! taskplan library
//!
//! Epic -> Feature -> Task tracking that keeps a SQLite store and a tree of
//! markdown files in lockstep. This module exports the core components for
//! testing and integration.

pub mod cli;
pub mod config;
pub mod creator;
pub mod db;
pub mod error;
pub mod keygen;
pub mod keys;
pub mod paths;
pub mod render;
pub mod types;
pub mod validator;
pub mod workflow;
