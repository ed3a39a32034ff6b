//! 采样节点共用的逻辑

use log::info;
use pyo3::{
    types::{PyDict, PyDictMethods},
    Bound, PyAny, PyResult, Python,
};

use crate::{
    bind::{BMABBind, BMABLoraBind},
    core::config::BmabConfig,
    error::Error,
    prompt::{encode_prompt, parse_prompt, TokenNormalization, WeightInterpretation, Wildcards},
    wrapper::{
        comfy::{
            clip::Clip,
            lora::load_lora_for_models,
            node_helpers::latent_samples,
            sampler::{
                common_ksampler, sampler_names, scheduler_names, KSamplerParams, MAX_CFG,
                MAX_STEPS,
            },
            vae::Vae,
        },
        comfyui::types::{NODE_FLOAT, NODE_INT},
    },
};

/// 解析权重相关的下拉框
pub fn parse_weight_options(
    token_normalization: &str,
    weight_interpretation: &str,
) -> Result<(TokenNormalization, WeightInterpretation), Error> {
    let normalization = token_normalization
        .parse::<TokenNormalization>()
        .map_err(|e| Error::ParseEnumString(format!("{token_normalization}: {e}")))?;
    let interpretation = weight_interpretation
        .parse::<WeightInterpretation>()
        .map_err(|e| Error::ParseEnumString(format!("{weight_interpretation}: {e}")))?;
    Ok((normalization, interpretation))
}

/// 展开动态提示词, 仅在包含通配符时加载通配符目录
pub fn expand_prompt(py: Python<'_>, text: &str, seed: u64) -> Result<String, Error> {
    let wildcards = if text.contains("__") {
        Wildcards::load(&BmabConfig::load(py)?.wildcards_dir)?
    } else {
        Wildcards::default()
    };
    parse_prompt(text, seed, &wildcards)
}

/// 编码为 CONDITIONING
pub fn encode_conditioning<'py>(
    py: Python<'py>,
    clip: &Clip<'py>,
    text: &str,
    normalization: TokenNormalization,
    interpretation: WeightInterpretation,
) -> Result<Bound<'py, PyAny>, Error> {
    let conditioning = encode_prompt(clip, text, normalization, interpretation)?;
    Ok(conditioning.into_py(py)?.into_any())
}

/// 依次应用 lora, 结果写回 bind
pub fn apply_loras(
    py: Python<'_>,
    bind: &mut BMABBind,
    lora: Option<&BMABLoraBind>,
) -> Result<(), Error> {
    let Some(lora) = lora else {
        return Ok(());
    };

    let mut model = bind.model(py);
    let mut clip = bind.clip(py);
    for item in lora.items() {
        info!(
            "apply lora {}, strength model: {}, clip: {}",
            item.name, item.strength_model, item.strength_clip
        );
        (model, clip) = load_lora_for_models(
            py,
            &model,
            &clip,
            &item.name,
            item.strength_model,
            item.strength_clip,
        )?;
    }

    bind.model = model.unbind();
    bind.clip = clip.unbind();
    Ok(())
}

/// 采样并解码为像素
pub fn sample_and_decode<'py>(
    py: Python<'py>,
    bind: &BMABBind,
    latent: &Bound<'py, PyAny>,
    params: &KSamplerParams,
) -> Result<Bound<'py, PyAny>, Error> {
    let samples = common_ksampler(
        py,
        &bind.model(py),
        &bind.positive(py),
        &bind.negative(py),
        latent,
        params,
    )?;

    Vae::new(bind.vae(py)).decode(&latent_samples(&samples)?)
}

/// 采样参数输入: steps, cfg, sampler_name, scheduler, denoise
pub fn sampler_inputs(
    py: Python<'_>,
    required: &Bound<'_, PyDict>,
    cfg_default: f32,
    denoise_default: f32,
) -> PyResult<()> {
    required.set_item(
        "steps",
        (NODE_INT, {
            let steps = PyDict::new(py);
            steps.set_item("default", 20)?;
            steps.set_item("min", 1)?;
            steps.set_item("max", MAX_STEPS)?;
            steps
        }),
    )?;
    required.set_item(
        "cfg",
        (NODE_FLOAT, {
            let cfg = PyDict::new(py);
            cfg.set_item("default", cfg_default)?;
            cfg.set_item("min", 0.0)?;
            cfg.set_item("max", MAX_CFG)?;
            cfg.set_item("step", 0.1)?;
            cfg.set_item("round", 0.01)?;
            cfg
        }),
    )?;
    required.set_item("sampler_name", (sampler_names(py)?,))?;
    required.set_item("scheduler", (scheduler_names(py)?,))?;
    required.set_item(
        "denoise",
        (NODE_FLOAT, {
            let denoise = PyDict::new(py);
            denoise.set_item("default", denoise_default)?;
            denoise.set_item("min", 0.0)?;
            denoise.set_item("max", 1.0)?;
            denoise.set_item("step", 0.01)?;
            denoise
        }),
    )?;
    Ok(())
}

/// 权重下拉框: token_normalization, weight_interpretation
pub fn weight_inputs(required: &Bound<'_, PyDict>) -> PyResult<()> {
    required.set_item("token_normalization", (TokenNormalization::choices(),))?;
    required.set_item("weight_interpretation", (WeightInterpretation::choices(),))?;
    Ok(())
}

/// 测试用的宿主替身: `nodes.common_ksampler` 与 VAE 以字符串代替张量
#[cfg(test)]
pub(crate) mod host {
    use pyo3::{
        ffi::c_str,
        types::{PyAnyMethods, PyDict, PyDictMethods, PyString},
        Bound, Py, PyAny, Python,
    };

    use crate::bind::BMABBind;

    pub fn install(py: Python<'_>) -> anyhow::Result<Bound<'_, PyAny>> {
        let globals = PyDict::new(py);
        py.run(
            c_str!(
                r#"
import sys
import types

class Vae:
    def __init__(self):
        self.encoded = []

    def encode(self, pixels):
        self.encoded.append(pixels)
        return "latent(" + pixels + ")"

    def decode(self, samples):
        return "pixels(" + samples + ")"

def common_ksampler(model, seed, steps, cfg, sampler_name, scheduler, positive, negative,
                    latent, denoise=1.0, force_full_denoise=False):
    samples = "sampled(%s, %s, %s, %s)" % (latent["samples"], seed, denoise, force_full_denoise)
    return ({"samples": samples},)

nodes = types.ModuleType("nodes")
nodes.common_ksampler = common_ksampler
sys.modules["nodes"] = nodes
vae = Vae()
"#
            ),
            Some(&globals),
            None,
        )?;
        Ok(globals
            .get_item("vae")?
            .ok_or_else(|| anyhow::anyhow!("vae not defined"))?)
    }

    pub fn bind(
        py: Python<'_>,
        vae: &Bound<'_, PyAny>,
        latent: Option<&str>,
        pixels: Option<&str>,
    ) -> anyhow::Result<BMABBind> {
        let obj = |s: &str| PyString::new(py, s).into_any().unbind();
        let latent = match latent {
            Some(samples) => {
                let dict = PyDict::new(py);
                dict.set_item("samples", samples)?;
                Some(dict.into_any().unbind())
            }
            None => None,
        };
        Ok(BMABBind {
            model: obj("model"),
            clip: obj("clip"),
            vae: vae.clone().unbind(),
            prompt: "1girl".to_string(),
            negative_prompt: "lowres".to_string(),
            positive: obj("positive"),
            negative: obj("negative"),
            latent_image: latent,
            pixels: pixels.map(obj),
            seed: 42,
            source_image: None,
        })
    }

    pub fn text(py: Python<'_>, value: Option<&Py<PyAny>>) -> anyhow::Result<Option<String>> {
        Ok(match value {
            Some(v) => Some(v.bind(py).extract()?),
            None => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_weight_options() -> anyhow::Result<()> {
        let (n, i) = parse_weight_options("length+mean", "down_weight")?;
        assert_eq!(n, TokenNormalization::LengthMean);
        assert_eq!(i, WeightInterpretation::DownWeight);

        let err = parse_weight_options("none", "A1112").unwrap_err();
        assert!(matches!(err, Error::ParseEnumString(_)));
        assert!(err.to_string().contains("A1112"));
        Ok(())
    }
}
