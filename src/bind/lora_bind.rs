//! BMAB lora
//!
//! 按顺序应用的 lora 列表

use pyo3::{pyclass, pymethods, Bound, PyAny, PyResult, Python};
use pythonize::{depythonize, pythonize};
use serde::{Deserialize, Serialize};

/// 单个 lora
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraItem {
    pub name: String,
    pub strength_model: f32,
    pub strength_clip: f32,
}

/// BMAB lora
#[pyclass(name = "BMABLoraBind")]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BMABLoraBind {
    loras: Vec<LoraItem>,
}

#[pymethods]
impl BMABLoraBind {
    #[new]
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个 lora
    pub fn append(&mut self, name: String, strength_model: f32, strength_clip: f32) {
        self.loras.push(LoraItem {
            name,
            strength_model,
            strength_clip,
        });
    }

    /// [(name, strength_model, strength_clip)]
    #[getter]
    fn loras(&self) -> Vec<(String, f32, f32)> {
        self.loras
            .iter()
            .map(|l| (l.name.clone(), l.strength_model, l.strength_clip))
            .collect()
    }

    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// [{"name": ..., "strength_model": ..., "strength_clip": ...}]
    fn to_list<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyAny>> {
        Ok(pythonize(py, &self.loras)?)
    }

    #[staticmethod]
    fn from_list(loras: &Bound<'_, PyAny>) -> PyResult<Self> {
        let loras: Vec<LoraItem> = depythonize(loras)?;
        Ok(Self { loras })
    }

    fn __len__(&self) -> usize {
        self.loras.len()
    }

    fn __repr__(&self) -> String {
        let names: Vec<&str> = self.loras.iter().map(|l| l.name.as_str()).collect();
        format!("BMABLoraBind({names:?})")
    }
}

impl BMABLoraBind {
    pub fn items(&self) -> &[LoraItem] {
        &self.loras
    }

    pub fn len(&self) -> usize {
        self.loras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loras.is_empty()
    }
}
