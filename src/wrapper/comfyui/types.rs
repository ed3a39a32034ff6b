//! 类型定义
//! 相关节点定义: ComfyUI/comfy/comfy_types/node_typing.py

use pyo3::{ffi::c_str, Bound, PyAny, PyResult, Python};

pub const NODE_INT: &str = "INT";
pub const NODE_FLOAT: &str = "FLOAT";
pub const NODE_STRING: &str = "STRING";
pub const NODE_IMAGE: &str = "IMAGE";
pub const NODE_MASK: &str = "MASK";
pub const NODE_MODEL: &str = "MODEL";
pub const NODE_CLIP: &str = "CLIP";
pub const NODE_CONDITIONING: &str = "CONDITIONING";
pub const NODE_VAE: &str = "VAE";
pub const NODE_LATENT: &str = "LATENT";

/// bmab 自定义类型
pub const NODE_BMAB_BIND: &str = "BMAB bind";
pub const NODE_BMAB_LORA: &str = "BMAB lora";
pub const NODE_SEED: &str = "SEED";

pub const NODE_INT_MAX: u64 = 0xffffffffffffffffu64;

/// 任意类型
pub fn any_type(py: Python<'_>) -> PyResult<Bound<'_, PyAny>> {
    let code = c_str!(
        r#"
class AlwaysEqualProxy(str):
    def __eq__(self, _):
        return True
    def __ne__(self, _):
        return False
    def __hash__(self):
        return hash(str(self))
"#
    );

    let globals = pyo3::types::PyDict::new(py);
    py.run(code, Some(&globals), None)?;
    py.eval(c_str!("AlwaysEqualProxy('*')"), Some(&globals), None)
}
