//! 公共库
//!
//! 相关节点定义: ComfyUI/comfy/comfy_types/node_typing.py

mod prompt_server;
pub use prompt_server::PromptServer;

pub mod category;
pub mod config;
pub mod node;
pub mod utils;
