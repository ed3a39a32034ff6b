//! ComfyUI 节点定义相关

pub mod types;
