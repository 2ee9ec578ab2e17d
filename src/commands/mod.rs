pub mod base_commands;
pub mod cache_cmd;
pub mod completions_cmd;
pub mod fetch_cmd;
