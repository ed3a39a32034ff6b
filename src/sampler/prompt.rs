//! BMAB Prompt
//!
//! 使用新的提示词重新编码 bind 的正向条件

use log::{error, info};
use pyo3::{
    pyclass, pymethods,
    types::{PyDict, PyDictMethods, PyType},
    Bound, Py, PyRef, PyResult, Python,
};

use crate::{
    bind::BMABBind,
    core::{category::CATEGORY_SAMPLER, PromptServer},
    error::Error,
    sampler::common::{encode_conditioning, expand_prompt, parse_weight_options, weight_inputs},
    wrapper::{
        comfy::clip::Clip,
        comfyui::types::{NODE_BMAB_BIND, NODE_STRING},
    },
};

/// BMAB Prompt
#[pyclass(subclass)]
pub struct BMABPrompt {}

impl PromptServer for BMABPrompt {}

#[pymethods]
impl BMABPrompt {
    #[new]
    fn new() -> Self {
        Self {}
    }

    #[classattr]
    #[pyo3(name = "RETURN_TYPES")]
    fn return_types() -> (&'static str,) {
        (NODE_BMAB_BIND,)
    }

    #[classattr]
    #[pyo3(name = "RETURN_NAMES")]
    fn return_names() -> (&'static str,) {
        ("bind",)
    }

    #[classattr]
    #[pyo3(name = "CATEGORY")]
    const CATEGORY: &'static str = CATEGORY_SAMPLER;

    #[classattr]
    #[pyo3(name = "DESCRIPTION")]
    fn description() -> &'static str {
        "Replace the positive prompt of a BMAB bind."
    }

    #[classattr]
    #[pyo3(name = "FUNCTION")]
    const FUNCTION: &'static str = "prompt";

    #[classmethod]
    #[pyo3(name = "INPUT_TYPES")]
    fn input_types(_cls: &Bound<'_, PyType>) -> PyResult<Py<PyDict>> {
        Python::with_gil(|py| {
            let dict = PyDict::new(py);
            dict.set_item("required", {
                let required = PyDict::new(py);
                required.set_item("bind", (NODE_BMAB_BIND,))?;
                required.set_item(
                    "text",
                    (NODE_STRING, {
                        let text = PyDict::new(py);
                        text.set_item("multiline", true)?;
                        text.set_item("dynamicPrompts", true)?;
                        text
                    }),
                )?;
                weight_inputs(&required)?;
                required
            })?;
            Ok(dict.into())
        })
    }

    #[pyo3(name = "prompt")]
    fn prompt<'py>(
        &mut self,
        py: Python<'py>,
        bind: PyRef<'py, BMABBind>,
        text: String,
        token_normalization: String,
        weight_interpretation: String,
    ) -> PyResult<(BMABBind,)> {
        let results = self.encode(
            py,
            &bind,
            text,
            &token_normalization,
            &weight_interpretation,
        );

        match results {
            Ok(v) => Ok((v,)),
            Err(e) => {
                error!("BMABPrompt error, {e}");
                if let Err(send_err) = self.send_error(py, "BMABPrompt".to_string(), e.to_string())
                {
                    error!("send error failed, {send_err}");
                };
                Err(e.into())
            }
        }
    }
}

impl BMABPrompt {
    fn encode(
        &self,
        py: Python<'_>,
        bind: &BMABBind,
        text: String,
        token_normalization: &str,
        weight_interpretation: &str,
    ) -> Result<BMABBind, Error> {
        let (normalization, interpretation) =
            parse_weight_options(token_normalization, weight_interpretation)?;
        info!("BMABPrompt seed: {}, {normalization}, {interpretation}", bind.seed);

        let mut bind = bind.copy(py);
        let prompt = expand_prompt(py, &text, bind.seed)?;
        bind.prompt = text;

        let clip = Clip::new(bind.clip(py)).clone_clip()?;
        let positive = encode_conditioning(py, &clip, &prompt, normalization, interpretation)?;

        bind.clip = clip.into_any().unbind();
        bind.positive = positive.unbind();
        Ok(bind)
    }
}
