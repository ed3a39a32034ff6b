//! 提示词编码
//!
//! 根据权重解释方式选择宿主编码或带权重的高级编码, 输出 CONDITIONING

use std::collections::BTreeMap;

use candle_core::{Device, Tensor, D};
use log::debug;
use pyo3::{types::PyInt, Bound, PyAny};

use crate::{
    error::Error,
    prompt::{
        advanced::{advanced_encode_from_tokens, TokenEncoder, MASK_TOKEN_ID},
        weight::{TokenNormalization, WeightInterpretation},
    },
    wrapper::{
        comfy::{
            clip::{Clip, ClipKind, TokenWithWordId, WeightedToken},
            node_helpers::Conditioning,
        },
        torch::tensor::TensorWrapper,
    },
};

/// 权重上限
const W_MAX: f32 = 1.0;
/// pooled 输出不受权重影响
const APPLY_TO_POOLED: bool = false;
/// SDXL clip_l 与 clip_g 的平衡系数, 0.5 时两者权重均为 1
const CLIP_BALANCE: f32 = 0.5;

/// 编码分支
#[derive(Debug, Clone, PartialEq, Eq)]
enum Branch {
    /// encode_from_tokens({key: ...})
    Tokens(String),
    /// cond_stage_model.clip_l
    ClipL,
    /// cond_stage_model.clip_g
    ClipG,
}

/// 使用宿主 CLIP 的编码器
struct ClipEncoder<'a, 'py> {
    clip: &'a Clip<'py>,
    branch: Branch,
}

impl<'a, 'py> ClipEncoder<'a, 'py> {
    fn new(clip: &'a Clip<'py>, branch: Branch) -> Self {
        Self { clip, branch }
    }
}

impl<'py> TokenEncoder for ClipEncoder<'_, 'py> {
    type Token = Bound<'py, PyAny>;

    fn encode(
        &mut self,
        chunks: &[Vec<WeightedToken<'py>>],
    ) -> Result<(Tensor, Option<Tensor>), Error> {
        let (emb, pooled) = match &self.branch {
            Branch::Tokens(key) => (self.clip.encode_tokens(key, chunks)?, None),
            Branch::ClipL => self.clip.encode_token_weights("clip_l", chunks)?,
            Branch::ClipG => self.clip.encode_token_weights("clip_g", chunks)?,
        };

        let emb = TensorWrapper::new(&emb, &Device::Cpu)?.into_tensor();
        let pooled = match pooled {
            Some(pooled) => Some(TensorWrapper::new(&pooled, &Device::Cpu)?.into_tensor()),
            None => None,
        };
        Ok((emb, pooled))
    }

    fn mask_token(&self) -> Self::Token {
        PyInt::new(self.clip.py(), MASK_TOKEN_ID).into_any()
    }
}

fn branch_tokens<'a, 'py>(
    tokenized: &'a BTreeMap<String, Vec<Vec<TokenWithWordId<'py>>>>,
    key: &str,
) -> Result<&'a [Vec<TokenWithWordId<'py>>], Error> {
    tokenized
        .get(key)
        .map(Vec::as_slice)
        .ok_or_else(|| Error::MissingInput(format!("tokens for clip {key}")))
}

/// 单一 clip 的分词键, SD1.x 为 "l", SD2.x 为 "h"
fn single_branch_key<V>(tokenized: &BTreeMap<String, V>) -> Result<String, Error> {
    let mut keys = tokenized.keys();
    match (keys.next(), keys.next()) {
        (Some(key), None) => Ok(key.clone()),
        _ if tokenized.contains_key("l") => Ok("l".to_string()),
        _ => Err(Error::InvalidParameter(format!(
            "cannot choose clip tokens from {:?}",
            tokenized.keys().collect::<Vec<_>>()
        ))),
    }
}

/// 合并 SDXL 的 clip_l 与 clip_g 输出
pub fn prepare_xl(embs_l: &Tensor, embs_g: &Tensor, clip_balance: f32) -> Result<Tensor, Error> {
    let l_w = 1.0 - (clip_balance - 0.5).max(0.0) * 2.0;
    let g_w = 1.0 - (0.5 - clip_balance).max(0.0) * 2.0;

    let embs_l = embs_l.affine(l_w as f64, 0.0)?;
    let embs_g = embs_g.affine(g_w as f64, 0.0)?;
    Ok(Tensor::cat(&[&embs_l, &embs_g], D::Minus1)?)
}

/// 编码提示词
pub fn encode_prompt<'py>(
    clip: &Clip<'py>,
    text: &str,
    normalization: TokenNormalization,
    interpretation: WeightInterpretation,
) -> Result<Conditioning<'py>, Error> {
    if interpretation == WeightInterpretation::Original {
        let tokens = clip.tokenize(text)?;
        let (cond, pooled) = clip.encode_from_tokens(&tokens)?;
        return Ok(Conditioning::new(cond, pooled));
    }

    let py = clip.py();
    let tokenized = clip.tokenize_with_word_ids(text)?;
    let kind = clip.kind()?;
    debug!("advanced encode, clip: {kind:?}, {normalization}, {interpretation}");

    match kind {
        ClipKind::Sdxl => {
            let (embs_l, _) = advanced_encode_from_tokens(
                &mut ClipEncoder::new(clip, Branch::ClipL),
                branch_tokens(&tokenized, "l")?,
                normalization,
                interpretation,
                W_MAX,
                APPLY_TO_POOLED,
            )?;
            let (embs_g, pooled) = advanced_encode_from_tokens(
                &mut ClipEncoder::new(clip, Branch::ClipG),
                branch_tokens(&tokenized, "g")?,
                normalization,
                interpretation,
                W_MAX,
                APPLY_TO_POOLED,
            )?;
            let embs = prepare_xl(&embs_l, &embs_g, CLIP_BALANCE)?;
            Conditioning::from_tensors(py, embs, Some(pooled))
        }
        ClipKind::SdxlRefiner => {
            let (embs_g, pooled) = advanced_encode_from_tokens(
                &mut ClipEncoder::new(clip, Branch::ClipG),
                branch_tokens(&tokenized, "g")?,
                normalization,
                interpretation,
                W_MAX,
                APPLY_TO_POOLED,
            )?;
            Conditioning::from_tensors(py, embs_g, Some(pooled))
        }
        ClipKind::Other => {
            // 单一 clip 时宿主不使用 pooled 输出
            let key = single_branch_key(&tokenized)?;
            let (embs, _) = advanced_encode_from_tokens(
                &mut ClipEncoder::new(clip, Branch::Tokens(key.clone())),
                branch_tokens(&tokenized, &key)?,
                normalization,
                interpretation,
                W_MAX,
                APPLY_TO_POOLED,
            )?;
            Conditioning::from_tensors(py, embs, None)
        }
    }
}
