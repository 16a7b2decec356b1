pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod ir;
pub mod model;
pub mod network;
pub mod output;
pub mod parser;
pub mod sched;
pub mod sim;
pub mod stats;
