//! CLIP Object for comfyui
//!
//! 相关定义: ComfyUI/comfy/sd.py `class CLIP`

use std::collections::BTreeMap;

use pyo3::{
    types::{PyAnyMethods, PyDict, PyDictMethods, PyFloat, PyList, PyListMethods, PyTuple},
    Bound, PyAny, Python,
};

use crate::{
    error::Error,
    wrapper::{comfy::model_management, python::isinstance},
};

/// (token, weight)
pub type WeightedToken<'py> = (Bound<'py, PyAny>, f32);

/// (token, weight, word_id)
pub type TokenWithWordId<'py> = (Bound<'py, PyAny>, f32, u32);

/// 文本编码器结构
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipKind {
    /// clip_l + clip_g
    Sdxl,
    /// clip_g
    SdxlRefiner,
    /// 单一 clip, SD1.x 为 clip_l, SD2.x 为 clip_h
    Other,
}

/// CLIP
#[derive(Debug, Clone)]
pub struct Clip<'py> {
    clip: Bound<'py, PyAny>,
}

impl<'py> Clip<'py> {
    pub fn new(clip: Bound<'py, PyAny>) -> Self {
        Self { clip }
    }

    pub fn py(&self) -> Python<'py> {
        self.clip.py()
    }

    pub fn into_any(self) -> Bound<'py, PyAny> {
        self.clip
    }

    /// clip.clone(), 修改 clip layer 前需要克隆, 避免影响上游节点
    pub fn clone_clip(&self) -> Result<Self, Error> {
        Ok(Self::new(self.clip.call_method0("clone")?))
    }

    /// 设置 clip 的最后一层
    pub fn clip_layer(&self, layer_idx: i64) -> Result<(), Error> {
        self.clip.call_method1("clip_layer", (layer_idx,))?;
        Ok(())
    }

    /// 分词
    pub fn tokenize(&self, text: &str) -> Result<Bound<'py, PyAny>, Error> {
        Ok(self.clip.call_method1("tokenize", (text,))?)
    }

    /// encode_from_tokens(tokens, return_pooled=True)
    pub fn encode_from_tokens(
        &self,
        tokens: &Bound<'py, PyAny>,
    ) -> Result<(Bound<'py, PyAny>, Option<Bound<'py, PyAny>>), Error> {
        let kwargs = PyDict::new(self.py());
        kwargs.set_item("return_pooled", true)?;

        let output = self
            .clip
            .call_method("encode_from_tokens", (tokens,), Some(&kwargs))?;
        split_output(&output)
    }

    /// 带 word id 的分词结果
    ///
    /// 返回 {clip 名称: [chunk: [(token, weight, word_id)]]}
    pub fn tokenize_with_word_ids(
        &self,
        text: &str,
    ) -> Result<BTreeMap<String, Vec<Vec<TokenWithWordId<'py>>>>, Error> {
        let kwargs = PyDict::new(self.py());
        kwargs.set_item("return_word_ids", true)?;

        let tokenized = self.clip.call_method("tokenize", (text,), Some(&kwargs))?;
        let tokenized = tokenized
            .downcast::<PyDict>()
            .map_err(|e| Error::PyDowncastError(e.to_string()))?;

        let mut results = BTreeMap::new();
        for (key, chunks) in tokenized.iter() {
            let key = key.extract::<String>()?;
            let mut chunks_rs = Vec::new();
            for chunk in chunks.try_iter()? {
                let mut chunk_rs = Vec::new();
                for item in chunk?.try_iter()? {
                    let item = item?;
                    let token = item.get_item(0)?;
                    let weight = item.get_item(1)?.extract::<f32>()?;
                    let word_id = item.get_item(2)?.extract::<u32>()?;
                    chunk_rs.push((token, weight, word_id));
                }
                chunks_rs.push(chunk_rs);
            }
            results.insert(key, chunks_rs);
        }

        Ok(results)
    }

    /// 文本编码器结构
    pub fn kind(&self) -> Result<ClipKind, Error> {
        let py = self.py();
        let model = self.clip.getattr("cond_stage_model")?;

        if isinstance(py, &model, "comfy.sdxl_clip.SDXLClipModel")? {
            return Ok(ClipKind::Sdxl);
        }
        if isinstance(py, &model, "comfy.sdxl_clip.SDXLRefinerClipModel")? {
            return Ok(ClipKind::SdxlRefiner);
        }
        Ok(ClipKind::Other)
    }

    /// encode_from_tokens({key: chunks})
    pub fn encode_tokens(
        &self,
        key: &str,
        chunks: &[Vec<WeightedToken<'py>>],
    ) -> Result<Bound<'py, PyAny>, Error> {
        let py = self.py();
        let tokens = PyDict::new(py);
        tokens.set_item(key, chunks_to_py(py, chunks)?)?;

        Ok(self.clip.call_method1("encode_from_tokens", (tokens,))?)
    }

    /// 使用 cond_stage_model 的指定分支编码, 如 `clip_l`, `clip_g`
    pub fn encode_token_weights(
        &self,
        branch: &str,
        chunks: &[Vec<WeightedToken<'py>>],
    ) -> Result<(Bound<'py, PyAny>, Option<Bound<'py, PyAny>>), Error> {
        let py = self.py();
        let model = self.clip.getattr("cond_stage_model")?;

        if model.hasattr("reset_clip_options")? {
            model.call_method0("reset_clip_options")?;
        }
        let layer_idx = self.clip.getattr("layer_idx")?;
        if !layer_idx.is_none() {
            if model.hasattr("set_clip_options")? {
                let options = PyDict::new(py);
                options.set_item("layer", &layer_idx)?;
                model.call_method1("set_clip_options", (options,))?;
            } else {
                model.call_method1("clip_layer", (&layer_idx,))?;
            }
        }
        model_management::load_model_gpu(py, &self.clip.getattr("patcher")?)?;

        let output = model
            .getattr(branch)?
            .call_method1("encode_token_weights", (chunks_to_py(py, chunks)?,))?;
        split_output(&output)
    }
}

/// [[(token, weight)]] 转换为 Python 列表
fn chunks_to_py<'py>(
    py: Python<'py>,
    chunks: &[Vec<WeightedToken<'py>>],
) -> Result<Bound<'py, PyList>, Error> {
    let list = PyList::empty(py);
    for chunk in chunks {
        let chunk_py = PyList::empty(py);
        for (token, weight) in chunk {
            let weight = PyFloat::new(py, *weight as f64).into_any();
            let pair = PyTuple::new(py, [token.clone(), weight])?;
            chunk_py.append(pair)?;
        }
        list.append(chunk_py)?;
    }
    Ok(list)
}

/// 拆分 (cond, pooled, ...) 形式的返回值
fn split_output<'py>(
    output: &Bound<'py, PyAny>,
) -> Result<(Bound<'py, PyAny>, Option<Bound<'py, PyAny>>), Error> {
    if !output.is_instance_of::<PyTuple>() && !output.is_instance_of::<PyList>() {
        return Ok((output.clone(), None));
    }

    let cond = output.get_item(0)?;
    let pooled = if output.len()? > 1 {
        Some(output.get_item(1)?).filter(|v| !v.is_none())
    } else {
        None
    };
    Ok((cond, pooled))
}
