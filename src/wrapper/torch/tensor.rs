//! torch.Tensor 与 candle Tensor 相互转换
//! 依赖:
//! - python: torch

use candle_core::{DType, Device, Tensor};
use numpy::{PyArray, PyArrayDyn, PyArrayMethods, PyUntypedArrayMethods};
use pyo3::{types::PyAnyMethods, Bound, IntoPyObject, PyAny, PyErr, Python};

use crate::error::Error;

/// f32 张量包装
///
/// 宿主侧的张量可能位于 GPU 或为 fp16, 转换时统一拷贝为 CPU 上的 f32
pub struct TensorWrapper {
    tensor: Tensor,
}

impl TensorWrapper {
    pub fn new(py_any: &Bound<'_, PyAny>, device: &Device) -> Result<Self, Error> {
        let tensor = Self::torch_to_candle(py_any, device)?;
        Ok(Self { tensor })
    }

    pub fn from_tensor(tensor: Tensor) -> Self {
        Self { tensor }
    }

    pub fn into_tensor(self) -> Tensor {
        self.tensor
    }

    /// 从 Python torch.Tensor 转为 Rust candle_core::Tensor
    fn torch_to_candle(torch_tensor: &Bound<'_, PyAny>, device: &Device) -> Result<Tensor, Error> {
        // detach -> cpu -> f32 -> 连续内存 -> numpy
        let np = torch_tensor
            .call_method0("detach")?
            .call_method0("cpu")?
            .call_method0("float")?
            .call_method0("contiguous")?
            .call_method0("numpy")?;

        let arr = np
            .downcast::<PyArrayDyn<f32>>()
            .map_err(|e| Error::PyDowncastError(e.to_string()))?;

        let shape = arr.shape().to_vec();
        let data = arr.to_vec()?;

        let tensor = Tensor::from_vec(data, shape, device)?;
        Ok(tensor)
    }

    /// 转换为python对象
    ///
    /// ```python,ignore
    /// import torch
    /// tensor = torch.from_numpy(data)
    /// ```
    pub fn to_py_tensor<'py>(self, py: Python<'py>) -> Result<Bound<'py, PyAny>, Error> {
        let data = self.into_pyobject(py)?;

        let torch = py.import("torch")?;
        let tensor = torch.getattr("from_numpy")?.call1((data,))?;
        Ok(tensor)
    }
}

impl<'py> IntoPyObject<'py> for TensorWrapper {
    type Target = PyArrayDyn<f32>; // the Python type
    type Output = Bound<'py, Self::Target>;
    type Error = PyErr;

    fn into_pyobject(self, py: Python<'py>) -> Result<Self::Output, Self::Error> {
        let tensor = self.into_tensor();
        let shape = tensor.dims().to_vec();

        let data = tensor
            .to_device(&Device::Cpu)
            .and_then(|t| t.to_dtype(DType::F32))
            .and_then(|t| t.flatten_all())
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| Error::TensorErr(e))?;

        // 创建数组并重新排列维度
        let array = PyArray::from_vec(py, data).reshape(shape)?;
        Ok(array)
    }
}
