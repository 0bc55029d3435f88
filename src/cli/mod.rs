mod args;
mod commands;
mod conversation;
mod sessions;
mod stages;
mod util;

pub use args::Cli;
