//! 节点之间传递的数据对象

mod bmab_bind;
mod lora_bind;

pub use bmab_bind::BMABBind;
pub use lora_bind::{BMABLoraBind, LoraItem};

use pyo3::{
    types::{PyModule, PyModuleMethods},
    Bound, PyResult, Python,
};

/// bind 模块
pub fn submodule(py: Python<'_>) -> PyResult<Bound<'_, PyModule>> {
    let submodule = PyModule::new(py, "bind")?;
    submodule.add_class::<BMABBind>()?;
    submodule.add_class::<BMABLoraBind>()?;
    Ok(submodule)
}
