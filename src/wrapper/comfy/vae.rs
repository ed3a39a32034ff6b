//! VAE Object for comfyui
//!

use pyo3::{types::PyAnyMethods, Bound, PyAny};

use crate::error::Error;

/// VAE
#[derive(Debug)]
pub struct Vae<'py> {
    vae: Bound<'py, PyAny>,
}

impl<'py> Vae<'py> {
    pub fn new(vae: Bound<'py, PyAny>) -> Self {
        Self { vae }
    }

    /// 像素 -> latent samples
    pub fn encode(&self, pixels: &Bound<'py, PyAny>) -> Result<Bound<'py, PyAny>, Error> {
        Ok(self.vae.call_method1("encode", (pixels,))?)
    }

    /// latent samples -> 像素
    pub fn decode(&self, samples: &Bound<'py, PyAny>) -> Result<Bound<'py, PyAny>, Error> {
        Ok(self.vae.call_method1("decode", (samples,))?)
    }
}
