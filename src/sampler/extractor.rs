//! BMAB Extractor
//!
//! 从 BMAB bind 中取出各个字段

use log::error;
use pyo3::{
    pyclass, pymethods,
    types::{PyDict, PyDictMethods, PyType},
    Bound, Py, PyAny, PyRef, PyResult, Python,
};

use crate::{
    bind::BMABBind,
    core::{category::CATEGORY_SAMPLER, PromptServer},
    error::Error,
    wrapper::{
        comfy::{node_helpers::latent_from_samples, vae::Vae},
        comfyui::types::{
            NODE_BMAB_BIND, NODE_CONDITIONING, NODE_IMAGE, NODE_LATENT, NODE_MODEL, NODE_SEED,
            NODE_VAE,
        },
    },
};

type ExtractOutput<'py> = (
    Bound<'py, PyAny>,
    Bound<'py, PyAny>,
    Bound<'py, PyAny>,
    Bound<'py, PyAny>,
    Option<Bound<'py, PyAny>>,
    Option<Bound<'py, PyAny>>,
    u64,
);

/// BMAB Extractor
#[pyclass(subclass)]
pub struct BMABExtractor {}

impl PromptServer for BMABExtractor {}

#[pymethods]
impl BMABExtractor {
    #[new]
    fn new() -> Self {
        Self {}
    }

    #[classattr]
    #[pyo3(name = "RETURN_TYPES")]
    fn return_types() -> (
        &'static str,
        &'static str,
        &'static str,
        &'static str,
        &'static str,
        &'static str,
        &'static str,
    ) {
        (
            NODE_MODEL,
            NODE_CONDITIONING,
            NODE_CONDITIONING,
            NODE_VAE,
            NODE_LATENT,
            NODE_IMAGE,
            NODE_SEED,
        )
    }

    #[classattr]
    #[pyo3(name = "RETURN_NAMES")]
    fn return_names() -> (
        &'static str,
        &'static str,
        &'static str,
        &'static str,
        &'static str,
        &'static str,
        &'static str,
    ) {
        (
            "model", "positive", "negative", "vae", "latent", "image", "seed",
        )
    }

    #[classattr]
    #[pyo3(name = "CATEGORY")]
    const CATEGORY: &'static str = CATEGORY_SAMPLER;

    #[classattr]
    #[pyo3(name = "DESCRIPTION")]
    fn description() -> &'static str {
        "Extract model, conditioning, vae, latent, image and seed from a BMAB bind."
    }

    #[classattr]
    #[pyo3(name = "FUNCTION")]
    const FUNCTION: &'static str = "extract";

    #[classmethod]
    #[pyo3(name = "INPUT_TYPES")]
    fn input_types(_cls: &Bound<'_, PyType>) -> PyResult<Py<PyDict>> {
        Python::with_gil(|py| {
            let dict = PyDict::new(py);
            dict.set_item("required", {
                let required = PyDict::new(py);
                required.set_item("bind", (NODE_BMAB_BIND,))?;
                required
            })?;
            Ok(dict.into())
        })
    }

    #[pyo3(name = "extract")]
    fn extract<'py>(
        &mut self,
        py: Python<'py>,
        bind: PyRef<'py, BMABBind>,
    ) -> PyResult<ExtractOutput<'py>> {
        match self.extract_bind(py, &bind) {
            Ok(v) => Ok(v),
            Err(e) => {
                error!("BMABExtractor error, {e}");
                if let Err(send_err) =
                    self.send_error(py, "BMABExtractor".to_string(), e.to_string())
                {
                    error!("send error failed, {send_err}");
                };
                Err(e.into())
            }
        }
    }
}

impl BMABExtractor {
    /// 存在像素时重新编码 latent
    fn extract_bind<'py>(
        &self,
        py: Python<'py>,
        bind: &BMABBind,
    ) -> Result<ExtractOutput<'py>, Error> {
        let latent = match bind.pixels(py) {
            Some(pixels) => {
                let samples = Vae::new(bind.vae(py)).encode(&pixels)?;
                Some(latent_from_samples(py, samples)?.into_any())
            }
            None => bind.latent_image(py),
        };

        Ok((
            bind.model(py),
            bind.positive(py),
            bind.negative(py),
            bind.vae(py),
            latent,
            bind.pixels(py),
            bind.seed,
        ))
    }
}
