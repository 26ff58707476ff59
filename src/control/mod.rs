// file: src/control/mod.rs
// version: 1.0.0
// guid: b114f353-a803-4652-b5c1-92ddacfa7ec0

//! Local control-tool invocation and config generation for the agent-based flavor

pub mod config_gen;
pub mod invoker;

pub use config_gen::{BaseConfig, BaseConfigRequest, ConfigGenerator, NodePatch};
pub use invoker::{classify_exit, ControlTool, Talosctl};
