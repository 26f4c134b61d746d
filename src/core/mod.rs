pub mod config;
pub mod hooks;
pub mod lessons;
pub mod lifecycle;
pub mod memory;
pub mod orchestrator;
pub mod reporter;
pub mod runtime;
pub mod scheduler;
pub mod terminal;
