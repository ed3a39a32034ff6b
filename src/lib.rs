//! BMAB nodes for ComfyUI
//!
//! - sampler: 提示词编码, 采样与 hires. fix
//! - segment: Segment Anything mask 预测

#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

#[cfg(feature = "accelerate")]
extern crate accelerate_src;

use pyo3::{
    pymodule,
    types::{PyDict, PyDictMethods, PyModule, PyModuleMethods},
    Bound, PyResult, Python,
};

pub mod bind;
pub mod core;
pub mod error;
pub mod prompt;
pub mod sampler;
pub mod segment;
pub mod wrapper;

/// A Python module implemented in Rust.
#[pymodule]
#[pyo3(name = "comfyui_bmab")] // 需要与包名保持一致
fn py_init(py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    // 初始化全局日志, 同时接收 log 宏的记录
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .try_init();

    m.add_submodule(&wrapper::submodule(py)?)?;
    m.add_submodule(&bind::submodule(py)?)?;
    m.add_submodule(&sampler::submodule(py)?)?;
    m.add_submodule(&segment::submodule(py)?)?;

    // 注册 ComfyUI NODE_CLASS_MAPPINGS/NODE_DISPLAY_NAME_MAPPINGS
    let node_mapping = PyDict::new(py);
    let name_mapping = PyDict::new(py);
    let nodes = sampler::node_register(py)?
        .into_iter()
        .chain(segment::node_register(py)?);
    for node in nodes {
        node_mapping.set_item(node.0, node.1)?;
        name_mapping.set_item(node.0, node.2)?;
    }

    m.add("NODE_CLASS_MAPPINGS", node_mapping)?;
    m.add("NODE_DISPLAY_NAME_MAPPINGS", name_mapping)?;
    Ok(())
}
