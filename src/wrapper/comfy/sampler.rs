//! 采样器
//!
//! 相关定义:
//! - ComfyUI/comfy/samplers.py `KSampler.SAMPLERS`, `KSampler.SCHEDULERS`
//! - ComfyUI/nodes.py `common_ksampler`

use pyo3::{
    types::{PyAnyMethods, PyDict, PyDictMethods, PyModule},
    Bound, PyAny, Python,
};

use crate::error::Error;

fn ksampler_class(py: Python<'_>) -> Result<Bound<'_, PyAny>, Error> {
    Ok(PyModule::import(py, "comfy.samplers")?.getattr("KSampler")?)
}

/// 可用的采样器名称
pub fn sampler_names(py: Python<'_>) -> Result<Vec<String>, Error> {
    Ok(ksampler_class(py)?.getattr("SAMPLERS")?.extract()?)
}

/// 可用的调度器名称
pub fn scheduler_names(py: Python<'_>) -> Result<Vec<String>, Error> {
    Ok(ksampler_class(py)?.getattr("SCHEDULERS")?.extract()?)
}

/// 最大采样步数
pub const MAX_STEPS: u32 = 10000;
/// 最大 cfg
pub const MAX_CFG: f32 = 100.0;

/// 采样参数
#[derive(Debug, Clone, PartialEq)]
pub struct KSamplerParams {
    pub seed: u64,
    pub steps: u32,
    pub cfg: f32,
    pub sampler_name: String,
    pub scheduler: String,
    pub denoise: f32,
    pub force_full_denoise: bool,
}

impl KSamplerParams {
    pub fn validate(&self) -> Result<(), Error> {
        if !(1..=MAX_STEPS).contains(&self.steps) {
            return Err(Error::InvalidParameter(format!(
                "steps must be in [1, {MAX_STEPS}], got {}",
                self.steps
            )));
        }
        if !(0.0..=1.0).contains(&self.denoise) {
            return Err(Error::InvalidParameter(format!(
                "denoise must be in [0, 1], got {}",
                self.denoise
            )));
        }
        if !(0.0..=MAX_CFG).contains(&self.cfg) {
            return Err(Error::InvalidParameter(format!(
                "cfg must be in [0, {MAX_CFG}], got {}",
                self.cfg
            )));
        }
        Ok(())
    }
}

/// nodes.common_ksampler
///
/// 返回新的 LATENT 字典
pub fn common_ksampler<'py>(
    py: Python<'py>,
    model: &Bound<'py, PyAny>,
    positive: &Bound<'py, PyAny>,
    negative: &Bound<'py, PyAny>,
    latent: &Bound<'py, PyAny>,
    params: &KSamplerParams,
) -> Result<Bound<'py, PyAny>, Error> {
    params.validate()?;

    let kwargs = PyDict::new(py);
    kwargs.set_item("denoise", params.denoise)?;
    kwargs.set_item("force_full_denoise", params.force_full_denoise)?;

    let output = PyModule::import(py, "nodes")?.getattr("common_ksampler")?.call(
        (
            model,
            params.seed,
            params.steps,
            params.cfg,
            params.sampler_name.as_str(),
            params.scheduler.as_str(),
            positive,
            negative,
            latent,
        ),
        Some(&kwargs),
    )?;

    Ok(output.get_item(0)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> KSamplerParams {
        KSamplerParams {
            seed: 0,
            steps: 20,
            cfg: 8.0,
            sampler_name: "euler".to_string(),
            scheduler: "normal".to_string(),
            denoise: 1.0,
            force_full_denoise: false,
        }
    }

    #[test]
    fn test_validate() -> anyhow::Result<()> {
        assert!(params().validate().is_ok());

        let mut p = params();
        p.steps = 0;
        assert!(p.validate().is_err());

        let mut p = params();
        p.denoise = 1.5;
        assert!(p.validate().is_err());

        let mut p = params();
        p.cfg = -1.0;
        assert!(p.validate().is_err());

        let mut p = params();
        p.steps = MAX_STEPS;
        p.cfg = MAX_CFG;
        assert!(p.validate().is_ok());

        let mut p = params();
        p.steps = MAX_STEPS + 1;
        assert!(p.validate().is_err());

        let mut p = params();
        p.cfg = 100.5;
        assert!(p.validate().is_err());
        Ok(())
    }

    #[test]
    #[ignore]
    fn test_sampler_names() -> anyhow::Result<()> {
        Python::with_gil(|py| -> anyhow::Result<()> {
            let samplers = sampler_names(py)?;
            assert!(samplers.contains(&"euler".to_string()));
            let schedulers = scheduler_names(py)?;
            assert!(schedulers.contains(&"normal".to_string()));
            Ok(())
        })
    }
}
