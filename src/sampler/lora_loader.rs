//! BMAB Lora Loader
//!
//! 构建 lora 列表, 由采样节点在采样前依次应用

use log::{error, info};
use pyo3::{
    pyclass, pymethods,
    types::{PyDict, PyDictMethods, PyType},
    Bound, Py, PyRef, PyResult, Python,
};

use crate::{
    bind::BMABLoraBind,
    core::{category::CATEGORY_SAMPLER, PromptServer},
    error::Error,
    wrapper::{
        comfy::folder_paths::FolderPaths,
        comfyui::types::{NODE_BMAB_LORA, NODE_FLOAT},
    },
};

const STRENGTH_MIN: f32 = -100.0;
const STRENGTH_MAX: f32 = 100.0;

/// BMAB Lora Loader
#[pyclass(subclass)]
pub struct BMABLoraLoader {}

impl PromptServer for BMABLoraLoader {}

#[pymethods]
impl BMABLoraLoader {
    #[new]
    fn new() -> Self {
        Self {}
    }

    #[classattr]
    #[pyo3(name = "RETURN_TYPES")]
    fn return_types() -> (&'static str,) {
        (NODE_BMAB_LORA,)
    }

    #[classattr]
    #[pyo3(name = "RETURN_NAMES")]
    fn return_names() -> (&'static str,) {
        ("lora",)
    }

    #[classattr]
    #[pyo3(name = "CATEGORY")]
    const CATEGORY: &'static str = CATEGORY_SAMPLER;

    #[classattr]
    #[pyo3(name = "DESCRIPTION")]
    fn description() -> &'static str {
        "Append a lora to the chain applied by the BMAB samplers."
    }

    #[classattr]
    #[pyo3(name = "FUNCTION")]
    const FUNCTION: &'static str = "load_lora";

    #[classmethod]
    #[pyo3(name = "INPUT_TYPES")]
    fn input_types(_cls: &Bound<'_, PyType>) -> PyResult<Py<PyDict>> {
        Python::with_gil(|py| {
            let dict = PyDict::new(py);
            dict.set_item("required", {
                let required = PyDict::new(py);
                required.set_item(
                    "lora_name",
                    (FolderPaths::get_filename_list(py, "loras")?,),
                )?;
                for name in ["strength_model", "strength_clip"] {
                    required.set_item(
                        name,
                        (NODE_FLOAT, {
                            let strength = PyDict::new(py);
                            strength.set_item("default", 1.0)?;
                            strength.set_item("min", STRENGTH_MIN)?;
                            strength.set_item("max", STRENGTH_MAX)?;
                            strength.set_item("step", 0.01)?;
                            strength
                        }),
                    )?;
                }
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

    #[pyo3(
        name = "load_lora",
        signature = (lora_name, strength_model, strength_clip, lora=None)
    )]
    fn load_lora<'py>(
        &mut self,
        py: Python<'py>,
        lora_name: String,
        strength_model: f32,
        strength_clip: f32,
        lora: Option<PyRef<'py, BMABLoraBind>>,
    ) -> PyResult<(BMABLoraBind,)> {
        let results = self.append(lora_name, strength_model, strength_clip, lora.as_deref());

        match results {
            Ok(v) => Ok((v,)),
            Err(e) => {
                error!("BMABLoraLoader error, {e}");
                if let Err(send_err) =
                    self.send_error(py, "BMABLoraLoader".to_string(), e.to_string())
                {
                    error!("send error failed, {send_err}");
                };
                Err(e.into())
            }
        }
    }
}

impl BMABLoraLoader {
    /// 在输入链的副本末尾追加 lora
    fn append(
        &self,
        lora_name: String,
        strength_model: f32,
        strength_clip: f32,
        lora: Option<&BMABLoraBind>,
    ) -> Result<BMABLoraBind, Error> {
        if lora_name.is_empty() {
            return Err(Error::InvalidParameter("lora name is empty".to_string()));
        }
        if !(STRENGTH_MIN..=STRENGTH_MAX).contains(&strength_model)
            || !(STRENGTH_MIN..=STRENGTH_MAX).contains(&strength_clip)
        {
            return Err(Error::InvalidParameter(format!(
                "lora strength must be in [{STRENGTH_MIN}, {STRENGTH_MAX}]"
            )));
        }

        let mut chain = lora.map(BMABLoraBind::copy).unwrap_or_default();
        chain.append(lora_name, strength_model, strength_clip);
        info!("BMABLoraLoader chain length: {}", chain.len());
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_to_chain() -> anyhow::Result<()> {
        let loader = BMABLoraLoader {};

        let first = loader.append("a.safetensors".to_string(), 1.0, 0.5, None)?;
        let second = loader.append("b.safetensors".to_string(), 0.3, 0.3, Some(&first))?;

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 2);
        assert_eq!(second.items()[0].name, "a.safetensors");
        assert_eq!(second.items()[1].name, "b.safetensors");
        assert_eq!(second.items()[1].strength_model, 0.3);
        Ok(())
    }

    #[test]
    fn test_invalid_lora() -> anyhow::Result<()> {
        let loader = BMABLoraLoader {};
        assert!(loader.append(String::new(), 1.0, 1.0, None).is_err());
        assert!(loader.append("a".to_string(), 1000.0, 1.0, None).is_err());
        Ok(())
    }
}
