pub mod agent;
pub mod config;
pub mod conversation;
pub mod credits;
pub mod generator;
pub mod model;
pub mod registry;
pub mod stream;
pub mod supervisor;
pub mod workflow;
