//! python 原生对象或函数封装

use pyo3::{
    exceptions::PyValueError,
    pyfunction,
    types::{PyAnyMethods, PyModule},
    Bound, PyAny, PyErr, PyResult, Python,
};

/// 按 `module.Type` 路径导入 Python 类型
pub fn import_type<'py>(py: Python<'py>, type_path: &str) -> PyResult<Bound<'py, PyAny>> {
    let (module, name) = type_path.rsplit_once('.').ok_or_else(|| {
        PyErr::new::<PyValueError, _>(format!("invalid type path: {type_path}"))
    })?;
    PyModule::import(py, module)?.getattr(name)
}

/// Python `isinstance` wrapper, 类型以 `module.Type` 形式给出
#[pyfunction]
pub fn isinstance<'py>(
    py: Python<'py>,
    py_any: &Bound<'py, PyAny>,
    type_path: &str,
) -> PyResult<bool> {
    let py_type = import_type(py, type_path)?;
    isinstance2(py, py_any, &py_type)
}

/// Python `isinstance` function wrapper
#[pyfunction]
pub fn isinstance2<'py>(
    py: Python<'py>,
    py_any: &Bound<'py, PyAny>,
    py_type: &Bound<'py, PyAny>,
) -> PyResult<bool> {
    let builtins = PyModule::import(py, "builtins")?;
    let isinstance_fn = builtins.getattr("isinstance")?;

    isinstance_fn.call1((py_any, py_type))?.extract()
}

#[cfg(test)]
mod tests {
    use pyo3::types::{PyInt, PyString};

    use super::*;

    #[test]
    #[ignore]
    fn test_isinstance() -> anyhow::Result<()> {
        Python::with_gil(|py| {
            let binding = PyString::new(py, "this is a str.");
            let py_any = binding.as_any();
            assert!(isinstance(py, py_any, "builtins.str").unwrap());
            assert!(!isinstance(py, py_any, "builtins.int").unwrap());
            assert!(isinstance(py, py_any, "str").is_err());
        });

        Ok(())
    }

    #[test]
    #[ignore]
    fn test_isinstance2() -> anyhow::Result<()> {
        Python::with_gil(|py| {
            let binding = PyString::new(py, "this is a str.");
            let py_any = binding.as_any();

            let binding = py_any.get_type();
            let py_type = binding.as_any();
            assert!(isinstance2(py, py_any, py_type).unwrap());

            let binding = PyInt::new(py, 1);
            assert!(!isinstance2(py, binding.as_any(), py_type).unwrap());
        });

        Ok(())
    }
}
