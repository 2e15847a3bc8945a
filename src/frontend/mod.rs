//! Frontend components
//!
//! This module contains the lexer, parser, CLI, and configuration components
//! that form the user-facing interface of strata.

pub mod cli;
pub mod config;
pub mod lexer;
pub mod parser;

pub use cli::main as cli_main;
pub use config::Config;
pub use parser::{parse_program, Parser};
