//! BMAB Integrator
//!
//! 汇总模型, CLIP, VAE 与提示词, 编码正负条件后生成 BMAB bind

use log::{error, info};
use pyo3::{
    pyclass, pymethods,
    types::{PyDict, PyDictMethods, PyType},
    Bound, Py, PyAny, PyResult, Python,
};

use crate::{
    bind::BMABBind,
    core::{category::CATEGORY_SAMPLER, PromptServer},
    error::Error,
    sampler::common::{encode_conditioning, expand_prompt, parse_weight_options, weight_inputs},
    wrapper::{
        comfy::clip::Clip,
        comfyui::types::{
            NODE_BMAB_BIND, NODE_CLIP, NODE_IMAGE, NODE_INT, NODE_INT_MAX, NODE_LATENT,
            NODE_MODEL, NODE_SEED, NODE_STRING, NODE_VAE,
        },
    },
};

/// clip 最后一层的取值范围
const CLIP_LAYER_MIN: i64 = -24;
const CLIP_LAYER_MAX: i64 = -1;

/// BMAB Integrator
#[pyclass(subclass)]
pub struct BMABIntegrator {}

impl PromptServer for BMABIntegrator {}

#[pymethods]
impl BMABIntegrator {
    #[new]
    fn new() -> Self {
        Self {}
    }

    #[classattr]
    #[pyo3(name = "RETURN_TYPES")]
    fn return_types() -> (&'static str, &'static str) {
        (NODE_BMAB_BIND, NODE_SEED)
    }

    #[classattr]
    #[pyo3(name = "RETURN_NAMES")]
    fn return_names() -> (&'static str, &'static str) {
        ("BMAB bind", "seed")
    }

    #[classattr]
    #[pyo3(name = "CATEGORY")]
    const CATEGORY: &'static str = CATEGORY_SAMPLER;

    #[classattr]
    #[pyo3(name = "DESCRIPTION")]
    fn description() -> &'static str {
        "Encode the prompts and bundle model, clip, vae, conditioning and seed into a BMAB bind. \
         stop_at_clip_layer is applied to a copy of the clip before encoding, so it also \
         affects the conditioning produced here."
    }

    #[classattr]
    #[pyo3(name = "FUNCTION")]
    const FUNCTION: &'static str = "integrate_inputs";

    #[classmethod]
    #[pyo3(name = "INPUT_TYPES")]
    fn input_types(_cls: &Bound<'_, PyType>) -> PyResult<Py<PyDict>> {
        Python::with_gil(|py| {
            let dict = PyDict::new(py);
            dict.set_item("required", {
                let required = PyDict::new(py);
                required.set_item("model", (NODE_MODEL,))?;
                required.set_item("clip", (NODE_CLIP,))?;
                required.set_item("vae", (NODE_VAE,))?;
                required.set_item(
                    "seed",
                    (NODE_INT, {
                        let seed = PyDict::new(py);
                        seed.set_item("default", 0)?;
                        seed.set_item("min", 0)?;
                        seed.set_item("max", NODE_INT_MAX)?;
                        seed
                    }),
                )?;
                required.set_item(
                    "stop_at_clip_layer",
                    (NODE_INT, {
                        let stop_at_clip_layer = PyDict::new(py);
                        stop_at_clip_layer.set_item("default", -2)?;
                        stop_at_clip_layer.set_item("min", CLIP_LAYER_MIN)?;
                        stop_at_clip_layer.set_item("max", CLIP_LAYER_MAX)?;
                        stop_at_clip_layer.set_item("step", 1)?;
                        stop_at_clip_layer
                    }),
                )?;
                weight_inputs(&required)?;
                required.set_item(
                    "prompt",
                    (NODE_STRING, {
                        let prompt = PyDict::new(py);
                        prompt.set_item("multiline", true)?;
                        prompt.set_item("dynamicPrompts", true)?;
                        prompt
                    }),
                )?;
                required.set_item(
                    "negative_prompt",
                    (NODE_STRING, {
                        let negative_prompt = PyDict::new(py);
                        negative_prompt.set_item("multiline", true)?;
                        negative_prompt.set_item("dynamicPrompts", true)?;
                        negative_prompt
                    }),
                )?;
                required
            })?;
            dict.set_item("optional", {
                let optional = PyDict::new(py);
                optional.set_item("seed_in", (NODE_SEED,))?;
                optional.set_item("latent", (NODE_LATENT,))?;
                optional.set_item("image", (NODE_IMAGE,))?;
                optional
            })?;
            Ok(dict.into())
        })
    }

    #[allow(clippy::too_many_arguments)]
    #[pyo3(
        name = "integrate_inputs",
        signature = (model, clip, vae, seed, stop_at_clip_layer, token_normalization, weight_interpretation, prompt, negative_prompt, seed_in=None, latent=None, image=None)
    )]
    fn integrate_inputs<'py>(
        &mut self,
        py: Python<'py>,
        model: Bound<'py, PyAny>,
        clip: Bound<'py, PyAny>,
        vae: Bound<'py, PyAny>,
        seed: u64,
        stop_at_clip_layer: i64,
        token_normalization: String,
        weight_interpretation: String,
        prompt: String,
        negative_prompt: String,
        seed_in: Option<u64>,
        latent: Option<Bound<'py, PyAny>>,
        image: Option<Bound<'py, PyAny>>,
    ) -> PyResult<(BMABBind, u64)> {
        let results = self.integrate(
            py,
            model,
            clip,
            vae,
            seed_in.unwrap_or(seed),
            stop_at_clip_layer,
            &token_normalization,
            &weight_interpretation,
            prompt,
            negative_prompt,
            latent,
            image,
        );

        match results {
            Ok(v) => Ok(v),
            Err(e) => {
                error!("BMABIntegrator error, {e}");
                if let Err(send_err) =
                    self.send_error(py, "BMABIntegrator".to_string(), e.to_string())
                {
                    error!("send error failed, {send_err}");
                };
                Err(e.into())
            }
        }
    }
}

impl BMABIntegrator {
    #[allow(clippy::too_many_arguments)]
    fn integrate<'py>(
        &self,
        py: Python<'py>,
        model: Bound<'py, PyAny>,
        clip: Bound<'py, PyAny>,
        vae: Bound<'py, PyAny>,
        seed: u64,
        stop_at_clip_layer: i64,
        token_normalization: &str,
        weight_interpretation: &str,
        prompt: String,
        negative_prompt: String,
        latent: Option<Bound<'py, PyAny>>,
        image: Option<Bound<'py, PyAny>>,
    ) -> Result<(BMABBind, u64), Error> {
        if !(CLIP_LAYER_MIN..=CLIP_LAYER_MAX).contains(&stop_at_clip_layer) {
            return Err(Error::InvalidParameter(format!(
                "stop_at_clip_layer must be in [{CLIP_LAYER_MIN}, {CLIP_LAYER_MAX}], got {stop_at_clip_layer}"
            )));
        }
        let (normalization, interpretation) =
            parse_weight_options(token_normalization, weight_interpretation)?;
        info!(
            "BMABIntegrator seed: {seed}, clip layer: {stop_at_clip_layer}, \
             {normalization}, {interpretation}"
        );

        let prompt = expand_prompt(py, &prompt, seed)?;

        // 克隆后再修改 clip layer, 上游的 clip 保持不变
        let clip = Clip::new(clip).clone_clip()?;
        clip.clip_layer(stop_at_clip_layer)?;

        let positive = encode_conditioning(py, &clip, &prompt, normalization, interpretation)?;
        let negative =
            encode_conditioning(py, &clip, &negative_prompt, normalization, interpretation)?;

        let bind = BMABBind {
            model: model.unbind(),
            clip: clip.into_any().unbind(),
            vae: vae.unbind(),
            prompt,
            negative_prompt,
            positive: positive.unbind(),
            negative: negative.unbind(),
            latent_image: latent.map(Bound::unbind),
            pixels: image.as_ref().map(|image| image.clone().unbind()),
            seed,
            source_image: image.map(Bound::unbind),
        };
        Ok((bind, seed))
    }
}
