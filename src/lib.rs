pub mod cli;
pub mod config;
pub mod env;
pub mod error;
pub mod fallback;
pub mod git;
pub mod github;
pub mod orchestrator;
pub mod process;
pub mod prompts;
pub mod report;
pub mod results;
pub mod rules;
pub mod runner;
pub mod scope;
pub mod submission;
