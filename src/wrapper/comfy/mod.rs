//! ComfyUI 宿主 API 封装
//!
//! 对 `comfy`, `nodes`, `folder_paths` 等 Python 模块的调用集中在这里

pub mod clip;
pub mod folder_paths;
pub mod lora;
pub mod model_management;
pub mod node_helpers;
pub mod sampler;
pub mod vae;
