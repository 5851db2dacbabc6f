pub mod analyzer;
pub mod command;
pub mod parser;
pub mod runtime;
pub mod engine;
