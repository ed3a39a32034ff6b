//! BMAB SAM Release

use log::{debug, error};
use pyo3::{
    pyclass, pymethods,
    types::{PyAnyMethods, PyDict, PyDictMethods, PyType},
    Bound, Py, PyAny, PyResult, Python,
};

use crate::{
    core::{category::CATEGORY_SEGMENT, PromptServer},
    segment::sam,
    wrapper::comfyui::types::any_type,
};

/// 释放 SAM 模型占用的显存
#[pyclass(subclass)]
pub struct BMABSamRelease {}

impl PromptServer for BMABSamRelease {}

#[pymethods]
impl BMABSamRelease {
    #[new]
    fn new() -> Self {
        Self {}
    }

    #[classattr]
    #[pyo3(name = "OUTPUT_NODE")]
    fn output_node() -> bool {
        true
    }

    #[classattr]
    #[pyo3(name = "RETURN_TYPES")]
    fn return_types() {}

    #[classattr]
    #[pyo3(name = "CATEGORY")]
    const CATEGORY: &'static str = CATEGORY_SEGMENT;

    #[classattr]
    #[pyo3(name = "DESCRIPTION")]
    fn description() -> &'static str {
        "Release the Segment Anything model once the input is ready."
    }

    #[classattr]
    #[pyo3(name = "FUNCTION")]
    const FUNCTION: &'static str = "release";

    #[classmethod]
    #[pyo3(name = "INPUT_TYPES")]
    fn input_types(_cls: &Bound<'_, PyType>) -> PyResult<Py<PyDict>> {
        Python::with_gil(|py| {
            let dict = PyDict::new(py);
            dict.set_item("required", {
                let required = PyDict::new(py);
                required.set_item(
                    "any",
                    (any_type(py)?, {
                        let any = PyDict::new(py);
                        any.set_item("tooltip", "release after this input is computed")?;
                        any
                    }),
                )?;
                required
            })?;
            Ok(dict.into())
        })
    }

    #[pyo3(name = "release")]
    fn release<'py>(
        &mut self,
        py: Python<'py>,
        any: Bound<'py, PyAny>,
    ) -> PyResult<Bound<'py, PyDict>> {
        debug!("BMABSamRelease input: {}", any.get_type());
        match sam::release(py) {
            Ok(()) => Ok(PyDict::new(py)),
            Err(e) => {
                error!("BMABSamRelease error, {e}");
                if let Err(send_err) =
                    self.send_error(py, "BMABSamRelease".to_string(), e.to_string())
                {
                    error!("send error failed, {send_err}");
                };
                Err(e.into())
            }
        }
    }
}
