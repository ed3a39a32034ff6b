//! 提示词权重
//!
//! token 权重的归一化方式与权重解释方式

use std::collections::HashMap;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

/// token 权重归一化方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, EnumIter)]
pub enum TokenNormalization {
    #[strum(to_string = "none")]
    None,
    /// 词内 token 的平均权重为 1
    #[strum(to_string = "mean")]
    Mean,
    /// 按词长度分摊权重
    #[strum(to_string = "length")]
    Length,
    #[strum(to_string = "length+mean")]
    LengthMean,
}

impl TokenNormalization {
    /// 节点下拉框选项
    pub fn choices() -> Vec<String> {
        Self::iter().map(|v| v.to_string()).collect()
    }

    fn divides_length(&self) -> bool {
        matches!(self, Self::Length | Self::LengthMean)
    }

    fn shifts_mean(&self) -> bool {
        matches!(self, Self::Mean | Self::LengthMean)
    }

    /// 依次应用 length / mean 归一化
    pub fn apply(&self, weights: &[Vec<f32>], word_ids: &[Vec<u32>]) -> Vec<Vec<f32>> {
        let mut weights = weights.to_vec();
        if self.divides_length() {
            weights = divide_length(&weights, word_ids);
        }
        if self.shifts_mean() {
            weights = shift_mean_weight(&weights, word_ids);
        }
        weights
    }
}

/// 权重解释方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, EnumIter)]
pub enum WeightInterpretation {
    /// 宿主自带的 tokenize/encode_from_tokens
    #[strum(to_string = "original")]
    Original,
    #[strum(to_string = "comfy")]
    Comfy,
    #[strum(to_string = "A1111")]
    A1111,
    #[strum(to_string = "compel")]
    Compel,
    #[strum(to_string = "comfy++")]
    ComfyPlusPlus,
    #[strum(to_string = "down_weight")]
    DownWeight,
}

impl WeightInterpretation {
    /// 节点下拉框选项
    pub fn choices() -> Vec<String> {
        Self::iter().map(|v| v.to_string()).collect()
    }
}

fn norm_mag(w: f32, n: usize) -> f32 {
    let d = w - 1.0;
    1.0 + d.signum() * d.abs() / (n as f32).sqrt()
}

/// 将词的权重分摊到组成它的每个 token 上
///
/// word id 为 0 的 token (起止符与填充) 权重为 1.0
pub fn divide_length(weights: &[Vec<f32>], word_ids: &[Vec<u32>]) -> Vec<Vec<f32>> {
    let mut counts: HashMap<u32, usize> = HashMap::new();
    for id in word_ids.iter().flatten() {
        *counts.entry(*id).or_insert(0) += 1;
    }

    weights
        .iter()
        .zip(word_ids)
        .map(|(ws, ids)| {
            ws.iter()
                .zip(ids)
                .map(|(w, id)| {
                    if *id == 0 {
                        1.0
                    } else {
                        norm_mag(*w, counts.get(id).copied().unwrap_or(1))
                    }
                })
                .collect()
        })
        .collect()
}

/// 平移词 token 的权重, 使其均值为 1
pub fn shift_mean_weight(weights: &[Vec<f32>], word_ids: &[Vec<u32>]) -> Vec<Vec<f32>> {
    let word_weights: Vec<f32> = weights
        .iter()
        .flatten()
        .zip(word_ids.iter().flatten())
        .filter(|(_, id)| **id != 0)
        .map(|(w, _)| *w)
        .collect();
    if word_weights.is_empty() {
        return weights.to_vec();
    }

    let mean = word_weights.iter().sum::<f32>() / word_weights.len() as f32;
    let delta = 1.0 - mean;

    weights
        .iter()
        .zip(word_ids)
        .map(|(ws, ids)| {
            ws.iter()
                .zip(ids)
                .map(|(w, id)| if *id == 0 { *w } else { w + delta })
                .collect()
        })
        .collect()
}

/// 按最大权重缩放, 结果不超过 w_max
pub fn scale_to_norm(weights: &[Vec<f32>], word_ids: &[Vec<u32>], w_max: f32) -> Vec<Vec<f32>> {
    let top = weights
        .iter()
        .flatten()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max);
    if !top.is_finite() || top == 0.0 {
        return weights.to_vec();
    }
    let w_max = top.min(w_max);

    weights
        .iter()
        .zip(word_ids)
        .map(|(ws, ids)| {
            ws.iter()
                .zip(ids)
                .map(|(w, id)| if *id == 0 { w_max } else { w / top * w_max })
                .collect()
        })
        .collect()
}
