pub mod aggregator;
pub mod app;
pub mod baseline;
pub mod cli;
pub mod config;
pub mod fingerprint;
pub mod logging;
pub mod normalizer;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod runner;
pub mod scheduler;
pub mod stealth;
pub mod target;
pub mod tools;

#[cfg(test)]
mod tests;
