//! Segment Anything
//!
//! 按框预测 mask, 模型在第一次使用时加载并常驻显存, 直到显式释放.
//! 依赖:
//! - python: segment_anything

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    sync::Mutex,
};

use image::{GrayImage, Luma, RgbImage};
use lazy_static::lazy_static;
use log::{info, warn};
use numpy::{PyArray, PyArray2, PyArrayMethods};
use pyo3::{
    types::{PyAnyMethods, PyDict, PyDictMethods, PyModule},
    Bound, Py, PyAny, Python,
};

use crate::{
    core::config::BmabConfig,
    error::Error,
    wrapper::comfy::model_management::{get_torch_device, torch_gc},
};

/// 框 [x1, y1, x2, y2]
pub type BoundingBox = [f32; 4];

lazy_static! {
    static ref SAM_MODEL: Mutex<Option<Py<PyAny>>> = Mutex::new(None);
}

fn loaded_model(py: Python<'_>) -> Result<Option<Bound<'_, PyAny>>, Error> {
    let model = SAM_MODEL
        .lock()
        .map_err(|e| Error::LockError(e.to_string()))?;
    Ok(model.as_ref().map(|m| m.bind(py).clone()))
}

/// 从 huggingface 下载模型文件
pub fn download_model(repo: &str, filename: &str, target: &Path) -> Result<(), Error> {
    let url = format!("https://huggingface.co/{repo}/resolve/main/{filename}");
    info!("download {url} -> {}", target.display());

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    let client = reqwest::blocking::Client::builder().timeout(None).build()?;
    let mut response = client.get(&url).send()?.error_for_status()?;

    // 先写入临时文件, 避免中断后留下不完整的模型
    let part = target.with_extension("part");
    let mut file = File::create(&part)?;
    response.copy_to(&mut file)?;
    drop(file);
    fs::rename(&part, target)?;
    Ok(())
}

/// 模型文件不存在时下载
fn ensure_checkpoint(py: Python<'_>, config: &BmabConfig) -> Result<PathBuf, Error> {
    let checkpoint = config.sam_checkpoint();
    if checkpoint.is_file() {
        return Ok(checkpoint);
    }

    let repo = config.sam_repo.clone();
    let filename = config.sam_model.clone();
    let target = checkpoint.clone();
    // 下载期间释放 GIL
    py.allow_threads(move || download_model(&repo, &filename, &target))?;
    Ok(checkpoint)
}

/// 加载 SAM 模型, 已加载时直接返回
pub fn sam_init(py: Python<'_>) -> Result<Bound<'_, PyAny>, Error> {
    if let Some(model) = loaded_model(py)? {
        return Ok(model);
    }

    let config = BmabConfig::load(py)?;
    let checkpoint = ensure_checkpoint(py, &config)?;
    let model_type = config.sam_model_type();
    info!("load sam model {model_type}: {}", checkpoint.display());

    let builder = PyModule::import(py, "segment_anything")?
        .getattr("sam_model_registry")?
        .get_item(model_type)
        .map_err(|e| {
            Error::ModelNotInitialized(format!("unknown sam model type {model_type}, {e}"))
        })?;

    let kwargs = PyDict::new(py);
    kwargs.set_item("checkpoint", checkpoint.to_string_lossy().to_string())?;
    let sam = builder.call((), Some(&kwargs))?;

    let kwargs = PyDict::new(py);
    kwargs.set_item("device", get_torch_device(py)?)?;
    sam.call_method("to", (), Some(&kwargs))?;
    sam.call_method0("eval")?;

    let mut model = SAM_MODEL
        .lock()
        .map_err(|e| Error::LockError(e.to_string()))?;
    *model = Some(sam.clone().unbind());
    Ok(sam)
}

/// 释放 SAM 模型
pub fn release(py: Python<'_>) -> Result<(), Error> {
    let model = SAM_MODEL
        .lock()
        .map_err(|e| Error::LockError(e.to_string()))?
        .take();
    if model.is_none() {
        return Ok(());
    }
    drop(model);

    info!("release sam model");
    torch_gc(py)
}

/// 解析 JSON 格式的框列表 `[[x1, y1, x2, y2], ...]`
pub fn parse_boxes(text: &str) -> Result<Vec<BoundingBox>, Error> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let boxes: Vec<BoundingBox> = serde_json::from_str(text)?;
    for b in &boxes {
        if b.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidParameter(format!("invalid box {b:?}")));
        }
    }
    Ok(boxes)
}

/// 合并 mask
pub fn union_mask(target: &mut GrayImage, mask: &GrayImage) -> Result<(), Error> {
    if target.dimensions() != mask.dimensions() {
        return Err(Error::InvalidParameter(format!(
            "mask size {:?} does not match {:?}",
            mask.dimensions(),
            target.dimensions()
        )));
    }

    for (dst, src) in target.pixels_mut().zip(mask.pixels()) {
        if src.0[0] > 0 {
            *dst = Luma([255]);
        }
    }
    Ok(())
}

/// RGB 图像转换为 HWC uint8 numpy 数组
fn image_to_numpy<'py>(py: Python<'py>, image: &RgbImage) -> Result<Bound<'py, PyAny>, Error> {
    let (width, height) = image.dimensions();
    let array = PyArray::from_vec(py, image.as_raw().clone())
        .reshape([height as usize, width as usize, 3])?;
    Ok(array.into_any())
}

/// 按框预测, 返回第一个 mask
fn predict_box_mask<'py>(
    py: Python<'py>,
    predictor: &Bound<'py, PyAny>,
    bbox: &BoundingBox,
    size: (u32, u32),
) -> Result<GrayImage, Error> {
    let coords: Vec<i64> = bbox.iter().map(|v| *v as i64).collect();

    let kwargs = PyDict::new(py);
    kwargs.set_item("box", PyArray::from_vec(py, coords))?;
    kwargs.set_item("multimask_output", false)?;
    let output = predictor.call_method("predict", (), Some(&kwargs))?;

    let masks = output.get_item(0)?.get_item(0)?;
    let masks = masks
        .downcast::<PyArray2<bool>>()
        .map_err(|e| Error::PyDowncastError(e.to_string()))?;
    let readonly = masks.readonly();
    let array = readonly.as_array();

    let (width, height) = size;
    if array.dim() != (height as usize, width as usize) {
        return Err(Error::InvalidTensorShape(format!(
            "mask shape {:?} does not match image size {width}x{height}",
            array.dim()
        )));
    }

    let mut mask = GrayImage::new(width, height);
    for ((y, x), v) in array.indexed_iter() {
        if *v {
            mask.put_pixel(x as u32, y as u32, Luma([255]));
        }
    }
    Ok(mask)
}

/// 创建 predictor 并设置图像
fn predictor<'py>(py: Python<'py>, image: &RgbImage) -> Result<Bound<'py, PyAny>, Error> {
    let sam = sam_init(py)?;
    let predictor = PyModule::import(py, "segment_anything")?
        .getattr("SamPredictor")?
        .call1((sam,))?;
    predictor.call_method1("set_image", (image_to_numpy(py, image)?, "RGB"))?;
    Ok(predictor)
}

/// 所有框的 mask 并集, 与图像尺寸相同
pub fn sam_predict(
    py: Python<'_>,
    image: &RgbImage,
    boxes: &[BoundingBox],
) -> Result<GrayImage, Error> {
    let size = image.dimensions();
    let mut result = GrayImage::new(size.0, size.1);
    match boxes {
        [] => {
            warn!("no boxes, return empty mask");
            return Ok(result);
        }
        [bbox] => return sam_predict_box(py, image, bbox),
        _ => {}
    }

    let predictor = predictor(py, image)?;
    for bbox in boxes {
        let mask = predict_box_mask(py, &predictor, bbox, size)?;
        union_mask(&mut result, &mask)?;
    }
    Ok(result)
}

/// 单个框的 mask
pub fn sam_predict_box(
    py: Python<'_>,
    image: &RgbImage,
    bbox: &BoundingBox,
) -> Result<GrayImage, Error> {
    let predictor = predictor(py, image)?;
    predict_box_mask(py, &predictor, bbox, image.dimensions())
}
