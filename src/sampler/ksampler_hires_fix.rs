//! BMAB KSampler Hires. Fix
//!
//! 将像素重新编码为 latent 后以较低的 denoise 再次采样

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
        comfy::{node_helpers::latent_from_samples, sampler::KSamplerParams, vae::Vae},
        comfyui::types::{NODE_BMAB_BIND, NODE_BMAB_LORA, NODE_IMAGE},
    },
};

/// BMAB KSampler Hires. Fix
#[pyclass(subclass)]
pub struct BMABKSamplerHiresFix {}

impl PromptServer for BMABKSamplerHiresFix {}

#[pymethods]
impl BMABKSamplerHiresFix {
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
        "Re-encode the image (or the pixels of the bind) and sample it again."
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
                sampler_inputs(py, &required, 4.0, 0.4)?;
                required
            })?;
            dict.set_item("optional", {
                let optional = PyDict::new(py);
                optional.set_item("image", (NODE_IMAGE,))?;
                optional.set_item("lora", (NODE_BMAB_LORA,))?;
                optional
            })?;
            Ok(dict.into())
        })
    }

    #[allow(clippy::too_many_arguments)]
    #[pyo3(
        name = "sample",
        signature = (bind, steps, cfg, sampler_name, scheduler, denoise=0.4, image=None, lora=None)
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
        image: Option<Bound<'py, PyAny>>,
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
            force_full_denoise: true,
        };

        match self.hires_fix(py, &mut bind, &params, image, lora.as_deref()) {
            Ok(pixels) => Ok((bind, pixels)),
            Err(e) => {
                error!("BMABKSamplerHiresFix error, {e}");
                if let Err(send_err) =
                    self.send_error(py, "BMABKSamplerHiresFix".to_string(), e.to_string())
                {
                    error!("send error failed, {send_err}");
                };
                Err(e.into())
            }
        }
    }
}

impl BMABKSamplerHiresFix {
    fn hires_fix<'py>(
        &self,
        py: Python<'py>,
        bind: &mut BMABBind,
        params: &KSamplerParams,
        image: Option<Bound<'py, PyAny>>,
        lora: Option<&BMABLoraBind>,
    ) -> Result<Bound<'py, PyAny>, Error> {
        info!(
            "BMABKSamplerHiresFix seed: {}, sampler: {}, scheduler: {}, steps: {}, denoise: {}",
            params.seed, params.sampler_name, params.scheduler, params.steps, params.denoise
        );

        // 输入图像优先
        let pixels = image.or_else(|| bind.pixels(py)).ok_or_else(|| {
            Error::MissingInput("image or pixels of the bind is required".to_string())
        })?;
        let samples = Vae::new(bind.vae(py)).encode(&pixels)?;
        let latent = latent_from_samples(py, samples)?.into_any();

        apply_loras(py, bind, lora)?;
        let pixels = sample_and_decode(py, bind, &latent, params)?;

        bind.pixels = Some(pixels.clone().unbind());
        Ok(pixels)
    }
}
