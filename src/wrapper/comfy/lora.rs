//! LoRA 加载
//!
//! 相关定义:
//! - ComfyUI/comfy/utils.py `load_torch_file`
//! - ComfyUI/comfy/sd.py `load_lora_for_models`

use std::{path::PathBuf, sync::Mutex};

use lazy_static::lazy_static;
use log::info;
use pyo3::{
    types::{PyAnyMethods, PyDict, PyDictMethods, PyModule},
    Bound, Py, PyAny, Python,
};

use crate::{error::Error, wrapper::comfy::folder_paths::FolderPaths};

lazy_static! {
    /// 最近一次加载的 lora 文件
    static ref LOADED_LORA: Mutex<Option<(PathBuf, Py<PyAny>)>> = Mutex::new(None);
}

/// 读取 lora 权重, 相同路径复用上一次的结果
fn load_lora_file<'py>(py: Python<'py>, path: &PathBuf) -> Result<Bound<'py, PyAny>, Error> {
    let mut loaded = LOADED_LORA
        .lock()
        .map_err(|e| Error::LockError(e.to_string()))?;

    if let Some((loaded_path, lora)) = loaded.as_ref() {
        if loaded_path == path {
            return Ok(lora.bind(py).clone());
        }
    }
    // 先释放旧的权重
    *loaded = None;

    let kwargs = PyDict::new(py);
    kwargs.set_item("safe_load", true)?;
    let lora = PyModule::import(py, "comfy.utils")?
        .getattr("load_torch_file")?
        .call((path.to_string_lossy().to_string(),), Some(&kwargs))?;

    *loaded = Some((path.clone(), lora.clone().unbind()));
    Ok(lora)
}

/// 将 lora 应用到模型和 CLIP 上, 返回打过补丁的 (model, clip)
pub fn load_lora_for_models<'py>(
    py: Python<'py>,
    model: &Bound<'py, PyAny>,
    clip: &Bound<'py, PyAny>,
    lora_name: &str,
    strength_model: f32,
    strength_clip: f32,
) -> Result<(Bound<'py, PyAny>, Bound<'py, PyAny>), Error> {
    if strength_model == 0.0 && strength_clip == 0.0 {
        return Ok((model.clone(), clip.clone()));
    }

    let path = FolderPaths::get_full_path(py, "loras", lora_name)?
        .ok_or_else(|| Error::FileNotFound(format!("lora {lora_name}")))?;
    info!("load lora: {}", path.display());

    let lora = load_lora_file(py, &path)?;
    let output = PyModule::import(py, "comfy.sd")?
        .getattr("load_lora_for_models")?
        .call1((model, clip, lora, strength_model, strength_clip))?;

    Ok((output.get_item(0)?, output.get_item(1)?))
}
