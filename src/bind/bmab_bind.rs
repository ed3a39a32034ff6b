//! BMAB bind
//!
//! 在节点之间传递模型, CLIP, VAE, 提示词, 条件, latent, 像素与种子

use pyo3::{pyclass, pymethods, Bound, Py, PyAny, Python};

/// BMAB bind
///
/// 节点不会原地修改输入的 bind, 而是复制后修改并返回副本,
/// 宿主对象 (模型, 张量等) 在副本之间共享
#[pyclass(name = "BMABBind")]
#[derive(Debug)]
pub struct BMABBind {
    #[pyo3(get, set)]
    pub model: Py<PyAny>,
    #[pyo3(get, set)]
    pub clip: Py<PyAny>,
    #[pyo3(get, set)]
    pub vae: Py<PyAny>,
    #[pyo3(get, set)]
    pub prompt: String,
    #[pyo3(get, set)]
    pub negative_prompt: String,
    /// CONDITIONING
    #[pyo3(get, set)]
    pub positive: Py<PyAny>,
    /// CONDITIONING
    #[pyo3(get, set)]
    pub negative: Py<PyAny>,
    /// LATENT
    #[pyo3(get, set)]
    pub latent_image: Option<Py<PyAny>>,
    /// IMAGE
    #[pyo3(get, set)]
    pub pixels: Option<Py<PyAny>>,
    #[pyo3(get, set)]
    pub seed: u64,
    /// 输入的原始图像
    #[pyo3(get, set)]
    pub source_image: Option<Py<PyAny>>,
}

#[pymethods]
impl BMABBind {
    #[allow(clippy::too_many_arguments)]
    #[new]
    #[pyo3(signature = (model, clip, vae, prompt, negative_prompt, positive, negative, latent_image=None, seed=0, source_image=None))]
    fn py_new(
        py: Python<'_>,
        model: Py<PyAny>,
        clip: Py<PyAny>,
        vae: Py<PyAny>,
        prompt: String,
        negative_prompt: String,
        positive: Py<PyAny>,
        negative: Py<PyAny>,
        latent_image: Option<Py<PyAny>>,
        seed: u64,
        source_image: Option<Py<PyAny>>,
    ) -> Self {
        let pixels = source_image.as_ref().map(|image| image.clone_ref(py));
        Self {
            model,
            clip,
            vae,
            prompt,
            negative_prompt,
            positive,
            negative,
            latent_image,
            pixels,
            seed,
            source_image,
        }
    }

    /// 浅拷贝
    pub fn copy(&self, py: Python<'_>) -> Self {
        let clone = |v: &Py<PyAny>| v.clone_ref(py);
        Self {
            model: clone(&self.model),
            clip: clone(&self.clip),
            vae: clone(&self.vae),
            prompt: self.prompt.clone(),
            negative_prompt: self.negative_prompt.clone(),
            positive: clone(&self.positive),
            negative: clone(&self.negative),
            latent_image: self.latent_image.as_ref().map(clone),
            pixels: self.pixels.as_ref().map(clone),
            seed: self.seed,
            source_image: self.source_image.as_ref().map(clone),
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "BMABBind(seed={}, prompt={:?}, negative_prompt={:?}, latent={}, pixels={})",
            self.seed,
            self.prompt,
            self.negative_prompt,
            self.latent_image.is_some(),
            self.pixels.is_some()
        )
    }
}

impl BMABBind {
    pub fn model<'py>(&self, py: Python<'py>) -> Bound<'py, PyAny> {
        self.model.bind(py).clone()
    }

    pub fn clip<'py>(&self, py: Python<'py>) -> Bound<'py, PyAny> {
        self.clip.bind(py).clone()
    }

    pub fn vae<'py>(&self, py: Python<'py>) -> Bound<'py, PyAny> {
        self.vae.bind(py).clone()
    }

    pub fn positive<'py>(&self, py: Python<'py>) -> Bound<'py, PyAny> {
        self.positive.bind(py).clone()
    }

    pub fn negative<'py>(&self, py: Python<'py>) -> Bound<'py, PyAny> {
        self.negative.bind(py).clone()
    }

    pub fn latent_image<'py>(&self, py: Python<'py>) -> Option<Bound<'py, PyAny>> {
        self.latent_image.as_ref().map(|v| v.bind(py).clone())
    }

    pub fn pixels<'py>(&self, py: Python<'py>) -> Option<Bound<'py, PyAny>> {
        self.pixels.as_ref().map(|v| v.bind(py).clone())
    }
}

#[cfg(test)]
mod tests {
    use pyo3::types::{PyAnyMethods, PyString};

    use super::*;

    #[test]
    #[ignore]
    fn test_copy() -> anyhow::Result<()> {
        Python::with_gil(|py| -> anyhow::Result<()> {
            let obj = |s: &str| PyString::new(py, s).into_any().unbind();
            let bind = BMABBind::py_new(
                py,
                obj("model"),
                obj("clip"),
                obj("vae"),
                "1girl".to_string(),
                "lowres".to_string(),
                obj("positive"),
                obj("negative"),
                None,
                42,
                Some(obj("image")),
            );
            assert!(bind.pixels.is_some());

            let mut copied = bind.copy(py);
            copied.prompt = "1boy".to_string();
            copied.seed = 7;
            copied.pixels = None;

            assert_eq!(bind.prompt, "1girl");
            assert_eq!(bind.seed, 42);
            assert!(bind.pixels.is_some());
            // 宿主对象共享
            assert!(copied.model(py).is(&bind.model(py)));
            assert_eq!(copied.clip(py).extract::<String>()?, "clip");
            Ok(())
        })
    }
}
