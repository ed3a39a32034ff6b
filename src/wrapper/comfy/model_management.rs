//! comfy.model_management

use pyo3::{
    types::{PyAnyMethods, PyModule},
    Bound, PyAny, Python,
};

use crate::error::Error;

fn module(py: Python<'_>) -> Result<Bound<'_, PyModule>, Error> {
    Ok(PyModule::import(py, "comfy.model_management")?)
}

/// 宿主当前使用的 torch 设备
pub fn get_torch_device(py: Python<'_>) -> Result<Bound<'_, PyAny>, Error> {
    Ok(module(py)?.getattr("get_torch_device")?.call0()?)
}

/// 将模型加载到 GPU
pub fn load_model_gpu<'py>(py: Python<'py>, patcher: &Bound<'py, PyAny>) -> Result<(), Error> {
    module(py)?.getattr("load_model_gpu")?.call1((patcher,))?;
    Ok(())
}

/// 释放显存
///
/// 先回收 Python 对象, 再清理 torch 缓存
pub fn torch_gc(py: Python<'_>) -> Result<(), Error> {
    PyModule::import(py, "gc")?.getattr("collect")?.call0()?;
    module(py)?.getattr("soft_empty_cache")?.call0()?;
    Ok(())
}
