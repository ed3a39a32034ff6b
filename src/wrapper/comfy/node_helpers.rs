//! node_helpers
//!
//! 宿主的 CONDITIONING / LATENT 数据结构:
//! - CONDITIONING: `[[cond, {"pooled_output": pooled}]]`
//! - LATENT: `{"samples": tensor}`

use candle_core::Tensor;
use pyo3::{
    types::{PyAnyMethods, PyDict, PyDictMethods, PyList},
    Bound, PyAny, Python,
};

use crate::{error::Error, wrapper::torch::tensor::TensorWrapper};

/// 条件
#[derive(Debug)]
pub struct Conditioning<'py> {
    pub cond: Bound<'py, PyAny>,
    pub pooled: Option<Bound<'py, PyAny>>,
}

impl<'py> Conditioning<'py> {
    pub fn new(cond: Bound<'py, PyAny>, pooled: Option<Bound<'py, PyAny>>) -> Self {
        Self { cond, pooled }
    }

    /// 由 candle 张量构建
    pub fn from_tensors(
        py: Python<'py>,
        cond: Tensor,
        pooled: Option<Tensor>,
    ) -> Result<Self, Error> {
        let cond = TensorWrapper::from_tensor(cond).to_py_tensor(py)?;
        let pooled = match pooled {
            Some(pooled) => Some(TensorWrapper::from_tensor(pooled).to_py_tensor(py)?),
            None => None,
        };
        Ok(Self { cond, pooled })
    }

    /// Convert Rust's conditioning to Python type
    pub fn into_py(self, py: Python<'py>) -> Result<Bound<'py, PyList>, Error> {
        let extra = PyDict::new(py);
        match self.pooled {
            Some(pooled) => extra.set_item("pooled_output", pooled)?,
            None => extra.set_item("pooled_output", py.None())?,
        }

        let item = PyList::new(py, [self.cond, extra.into_any()])?;
        Ok(PyList::new(py, [item])?)
    }
}

/// samples 包装为 LATENT 字典
pub fn latent_from_samples<'py>(
    py: Python<'py>,
    samples: Bound<'py, PyAny>,
) -> Result<Bound<'py, PyDict>, Error> {
    let dict = PyDict::new(py);
    dict.set_item("samples", samples)?;
    Ok(dict)
}

/// 从 LATENT 字典中取出 samples
pub fn latent_samples<'py>(latent: &Bound<'py, PyAny>) -> Result<Bound<'py, PyAny>, Error> {
    Ok(latent.get_item("samples")?)
}
