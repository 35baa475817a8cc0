pub mod compact_cmd;
pub mod config_cmd;
pub mod run_cmd;
pub mod tools_cmd;
