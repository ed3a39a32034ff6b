//! BMAB KSampler

use log::{error, info};
use pyo3::{
    pyclass, pymethods,
    types::{PyDict, PyDictMethods, PyType},
    Bound, Py, PyAny, PyRef, PyResult, Python,
};

use crate::{
    bind::{BMABBind, BMABLoraBind},
    core::{category::CATEGORY_SAMPLER, PromptServer},
    error::Error,
    sampler::common::{apply_loras, sample_and_decode, sampler_inputs},
    wrapper::{
        comfy::sampler::KSamplerParams,
        comfyui::types::{NODE_BMAB_BIND, NODE_BMAB_LORA, NODE_IMAGE},
    },
};

/// BMAB KSampler
#[pyclass(subclass)]
pub struct BMABKSampler {}

impl PromptServer for BMABKSampler {}

#[pymethods]
impl BMABKSampler {
    #[new]
    fn new() -> Self {
        Self {}
    }

    #[classattr]
    #[pyo3(name = "RETURN_TYPES")]
    fn return_types() -> (&'static str, &'static str) {
        (NODE_BMAB_BIND, NODE_IMAGE)
    }

    #[classattr]
    #[pyo3(name = "RETURN_NAMES")]
    fn return_names() -> (&'static str, &'static str) {
        ("BMAB bind", "image")
    }

    #[classattr]
    #[pyo3(name = "CATEGORY")]
    const CATEGORY: &'static str = CATEGORY_SAMPLER;

    #[classattr]
    #[pyo3(name = "DESCRIPTION")]
    fn description() -> &'static str {
        "Sample the latent of a BMAB bind and decode it into pixels."
    }

    #[classattr]
    #[pyo3(name = "FUNCTION")]
    const FUNCTION: &'static str = "sample";

    #[classmethod]
    #[pyo3(name = "INPUT_TYPES")]
    fn input_types(_cls: &Bound<'_, PyType>) -> PyResult<Py<PyDict>> {
        Python::with_gil(|py| {
            let dict = PyDict::new(py);
            dict.set_item("required", {
                let required = PyDict::new(py);
                required.set_item("bind", (NODE_BMAB_BIND,))?;
                sampler_inputs(py, &required, 8.0, 1.0)?;
                required
            })?;
            dict.set_item("optional", {
                let optional = PyDict::new(py);
                optional.set_item("lora", (NODE_BMAB_LORA,))?;
                optional
            })?;
            Ok(dict.into())
        })
    }

    #[allow(clippy::too_many_arguments)]
    #[pyo3(
        name = "sample",
        signature = (bind, steps, cfg, sampler_name, scheduler, denoise=1.0, lora=None)
    )]
    fn sample<'py>(
        &mut self,
        py: Python<'py>,
        bind: PyRef<'py, BMABBind>,
        steps: u32,
        cfg: f32,
        sampler_name: String,
        scheduler: String,
        denoise: f32,
        lora: Option<PyRef<'py, BMABLoraBind>>,
    ) -> PyResult<(BMABBind, Bound<'py, PyAny>)> {
        let mut bind = bind.copy(py);
        let params = KSamplerParams {
            seed: bind.seed,
            steps,
            cfg,
            sampler_name,
            scheduler,
            denoise,
            force_full_denoise: false,
        };

        match self.ksample(py, &mut bind, &params, lora.as_deref()) {
            Ok(pixels) => Ok((bind, pixels)),
            Err(e) => {
                error!("BMABKSampler error, {e}");
                if let Err(send_err) =
                    self.send_error(py, "BMABKSampler".to_string(), e.to_string())
                {
                    error!("send error failed, {send_err}");
                };
                Err(e.into())
            }
        }
    }
}

impl BMABKSampler {
    fn ksample<'py>(
        &self,
        py: Python<'py>,
        bind: &mut BMABBind,
        params: &KSamplerParams,
        lora: Option<&BMABLoraBind>,
    ) -> Result<Bound<'py, PyAny>, Error> {
        info!(
            "BMABKSampler seed: {}, sampler: {}, scheduler: {}, steps: {}, cfg: {}, denoise: {}",
            params.seed,
            params.sampler_name,
            params.scheduler,
            params.steps,
            params.cfg,
            params.denoise
        );

        let latent = bind
            .latent_image(py)
            .ok_or_else(|| Error::MissingInput("latent image of the bind".to_string()))?;

        apply_loras(py, bind, lora)?;
        let pixels = sample_and_decode(py, bind, &latent, params)?;

        bind.pixels = Some(pixels.clone().unbind());
        Ok(pixels)
    }
}

#[cfg(test)]
mod tests {
    use pyo3::types::PyAnyMethods;

    use super::*;
    use crate::sampler::common::host;

    #[test]
    #[ignore]
    fn test_ksample_requires_latent() -> anyhow::Result<()> {
        Python::with_gil(|py| -> anyhow::Result<()> {
            let vae = host::install(py)?;
            let mut bind = host::bind(py, &vae, None, None)?;
            let params = KSamplerParams {
                seed: bind.seed,
                steps: 20,
                cfg: 8.0,
                sampler_name: "euler".to_string(),
                scheduler: "normal".to_string(),
                denoise: 1.0,
                force_full_denoise: false,
            };

            let err = BMABKSampler::new()
                .ksample(py, &mut bind, &params, None)
                .unwrap_err();
            assert!(matches!(err, Error::MissingInput(_)), "{err}");
            assert!(bind.pixels.is_none());
            Ok(())
        })
    }

    #[test]
    #[ignore]
    fn test_sample_keeps_input_bind() -> anyhow::Result<()> {
        Python::with_gil(|py| -> anyhow::Result<()> {
            let vae = host::install(py)?;
            let input = Py::new(py, host::bind(py, &vae, Some("noise"), None)?)?;

            let (output, pixels) = BMABKSampler::new().sample(
                py,
                input.borrow(py),
                20,
                8.0,
                "euler".to_string(),
                "normal".to_string(),
                1.0,
                None,
            )?;

            let expected = "pixels(sampled(noise, 42, 1.0, False))";
            assert_eq!(pixels.extract::<String>()?, expected);
            assert_eq!(
                host::text(py, output.pixels.as_ref())?.as_deref(),
                Some(expected)
            );

            let input = input.borrow(py);
            assert!(input.pixels.is_none());
            assert_eq!(input.seed, 42);
            Ok(())
        })
    }
}
