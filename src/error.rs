//! 错误处理

use pyo3::{exceptions::PyRuntimeError, PyErr};

#[allow(unused)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // 标准库错误处理
    #[error("io error, {0}")]
    Io(#[from] std::io::Error),
    // std::sync::poison
    #[error("lock error, {0}")]
    LockError(String),
    #[error("strum error, {0}")]
    ParseEnumString(String),

    #[error("serde json error, {0}")]
    SerdeJsonError(#[from] serde_json::Error),
    #[error("regex error, {0}")]
    RegexError(#[from] regex::Error),
    #[error("http error, {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("the list is empty")]
    ListEmpty,

    #[error("py error, {0}")]
    PyErr(#[from] pyo3::PyErr),
    #[error("pythonize error, {0}")]
    PythonizeError(#[from] pythonize::PythonizeError),
    #[error("py downcast error, {0}")]
    PyDowncastError(String),

    #[error("tensor error, {0}")]
    TensorErr(#[from] candle_core::Error),
    #[error("invalid tensor shape, {0}")]
    InvalidTensorShape(String),
    #[error("numpy error, {0}")]
    NotContiguousError(#[from] numpy::NotContiguousError),

    #[error("image error, {0}")]
    ImageError(#[from] image::ImageError),
    #[error("creating image buffer error")]
    ImageBuffer,

    #[error("model not initialized, {0}")]
    ModelNotInitialized(String),
    #[error("missing input, {0}")]
    MissingInput(String),
    #[error("invalid parameter, {0}")]
    InvalidParameter(String),
    #[error("file not found, {0}")]
    FileNotFound(String),
}

/// 宿主抛出的 Python 异常原样返回, 其余错误转换为 RuntimeError
impl From<Error> for PyErr {
    fn from(e: Error) -> Self {
        match e {
            Error::PyErr(e) => e,
            e => PyErr::new::<PyRuntimeError, _>(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use pyo3::{exceptions::PyValueError, Python};

    use super::*;

    #[test]
    fn test_error_message() -> anyhow::Result<()> {
        let e = Error::InvalidParameter("steps must be positive".to_string());
        assert_eq!(e.to_string(), "invalid parameter, steps must be positive");

        let e = Error::ParseEnumString("unknown".to_string());
        assert_eq!(e.to_string(), "strum error, unknown");

        let e = Error::ModelNotInitialized("unknown sam model type vit_x".to_string());
        assert_eq!(e.to_string(), "model not initialized, unknown sam model type vit_x");
        Ok(())
    }

    #[test]
    #[ignore]
    fn test_py_err_passthrough() -> anyhow::Result<()> {
        Python::with_gil(|py| {
            let err: PyErr = Error::PyErr(PyValueError::new_err("shape mismatch")).into();
            assert!(err.is_instance_of::<PyValueError>(py));

            let err: PyErr = Error::ListEmpty.into();
            assert!(err.is_instance_of::<PyRuntimeError>(py));
        });
        Ok(())
    }
}
