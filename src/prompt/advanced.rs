//! 带权重的提示词编码
//!
//! 在 embedding 空间中解释 token 权重, 支持 comfy / A1111 / compel / comfy++ / down_weight.
//! 编码器通过 [`TokenEncoder`] 抽象, 算法本身只依赖 candle 张量.

use std::collections::{BTreeMap, HashSet};

use candle_core::{DType, Tensor, D};

use crate::{
    error::Error,
    prompt::weight::{scale_to_norm, TokenNormalization, WeightInterpretation},
};

/// 单次编码的最大 chunk 数
const BATCH_SIZE: usize = 32;

/// 掩码 token 在 CLIP 词表中的 id
pub const MASK_TOKEN_ID: u32 = 266;

/// 文本编码器
pub trait TokenEncoder {
    type Token: Clone;

    /// 编码若干个 chunk, 返回 ([1, chunks * len, dim], pooled)
    fn encode(
        &mut self,
        chunks: &[Vec<(Self::Token, f32)>],
    ) -> Result<(Tensor, Option<Tensor>), Error>;

    /// 用于遮盖词的 token
    fn mask_token(&self) -> Self::Token;
}

type Chunks<T> = Vec<Vec<(T, f32)>>;

/// [1, n, 1] 的逐 token 系数
fn token_column(values: Vec<f32>, base: &Tensor) -> Result<Tensor, Error> {
    let n = values.len();
    let column = Tensor::from_vec(values, (1, n, 1), base.device())?.to_dtype(base.dtype())?;
    Ok(column)
}

/// 第一个 chunk 末尾的 embedding, [1, dim]
fn end_row(emb: &Tensor, length: usize) -> Result<Tensor, Error> {
    Ok(emb.get(0)?.narrow(0, length - 1, 1)?)
}

/// A1111 方式: embedding 直接乘以权重
pub fn from_zero(weights: &[Vec<f32>], base: &Tensor) -> Result<Tensor, Error> {
    let column = token_column(weights.iter().flatten().copied().collect(), base)?;
    Ok(base.broadcast_mul(&column)?)
}

/// 将指定 word id 的 token 替换为掩码, 同时返回展平后的掩码
pub fn mask_word_id<T: Clone>(
    chunks: &[Vec<(T, f32)>],
    word_ids: &[Vec<u32>],
    target_id: u32,
    mask_token: &(T, f32),
) -> (Chunks<T>, Vec<f32>) {
    let masked = chunks
        .iter()
        .zip(word_ids)
        .map(|(chunk, ids)| {
            chunk
                .iter()
                .zip(ids)
                .map(|(t, id)| {
                    if *id == target_id {
                        mask_token.clone()
                    } else {
                        t.clone()
                    }
                })
                .collect()
        })
        .collect();

    let mask = word_ids
        .iter()
        .flatten()
        .map(|id| if *id == target_id { 1.0 } else { 0.0 })
        .collect();

    (masked, mask)
}

/// 按展平索引替换为掩码 token
pub fn mask_inds<T: Clone>(
    chunks: &[Vec<(T, f32)>],
    inds: &HashSet<usize>,
    mask_token: &(T, f32),
) -> Chunks<T> {
    let clip_len = chunks.first().map(|c| c.len()).unwrap_or(0);
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            chunk
                .iter()
                .enumerate()
                .map(|(j, t)| {
                    if inds.contains(&(i * clip_len + j)) {
                        mask_token.clone()
                    } else {
                        t.clone()
                    }
                })
                .collect()
        })
        .collect()
}

/// 分批编码多组提示词
///
/// chunks 为 `num_chunks` 个一组的提示词拼接, 输出 [组数, length * num_chunks, dim]
pub fn batched_clip_encode<E: TokenEncoder>(
    encoder: &mut E,
    chunks: &[Vec<(E::Token, f32)>],
    length: usize,
    num_chunks: usize,
) -> Result<Tensor, Error> {
    if chunks.is_empty() || num_chunks == 0 {
        return Err(Error::ListEmpty);
    }

    let mut embs = Vec::with_capacity(chunks.len().div_ceil(BATCH_SIZE));
    for group in chunks.chunks(BATCH_SIZE) {
        let (emb, _) = encoder.encode(group)?;
        let dim = emb.dim(D::Minus1)?;
        embs.push(emb.reshape((group.len(), length, dim))?);
    }

    let embs = Tensor::cat(&embs, 0)?;
    let dim = embs.dim(D::Minus1)?;
    Ok(embs.reshape((chunks.len() / num_chunks, length * num_chunks, dim))?)
}

/// 降权
///
/// 从最小的权重开始逐级累积遮盖权重小于 1 的 token, 再按权重差值混合各级编码结果.
/// 返回 (embedding, 最后一级遮盖后的 chunks)
pub fn down_weight<E: TokenEncoder>(
    encoder: &mut E,
    chunks: &[Vec<(E::Token, f32)>],
    weights: &[Vec<f32>],
    base: &Tensor,
    length: usize,
) -> Result<(Tensor, Chunks<E::Token>), Error> {
    let flat: Vec<f32> = weights.iter().flatten().copied().collect();
    let mut levels: Vec<f32> = flat.iter().copied().filter(|w| *w < 1.0).collect();
    levels.sort_by(|a, b| a.total_cmp(b));
    levels.dedup();

    if levels.is_empty() {
        return Ok((base.clone(), chunks.to_vec()));
    }

    let mask_token = (encoder.mask_token(), 1.0);
    let mut masked_current = chunks.to_vec();
    let mut masked_chunks = Vec::with_capacity(chunks.len() * levels.len());
    for level in &levels {
        let inds: HashSet<usize> = flat
            .iter()
            .enumerate()
            .filter(|(_, w)| *w == level)
            .map(|(i, _)| i)
            .collect();
        masked_current = mask_inds(&masked_current, &inds, &mask_token);
        masked_chunks.extend(masked_current.iter().cloned());
    }

    let embs = batched_clip_encode(encoder, &masked_chunks, length, chunks.len())?;
    let embs = Tensor::cat(&[base, &embs], 0)?;

    // diff([0, w_1, ..., w_k, 1])
    let mut points = Vec::with_capacity(levels.len() + 2);
    points.push(0.0);
    points.extend(levels.iter().copied());
    points.push(1.0);
    let mix: Vec<f32> = points.windows(2).map(|p| p[1] - p[0]).collect();
    let mix = Tensor::from_vec(mix, (levels.len() + 1, 1, 1), base.device())?
        .to_dtype(embs.dtype())?;

    let weighted = embs.broadcast_mul(&mix)?.sum_keepdim(0)?;
    Ok((weighted, masked_current))
}

/// 升权
///
/// 逐个遮盖权重不为 1 的词, 以 `(w - 1) * (base - masked)` 作为该词的增量.
/// 返回 (增量, pooled)
pub fn from_masked<E: TokenEncoder>(
    encoder: &mut E,
    chunks: &[Vec<(E::Token, f32)>],
    weights: &[Vec<f32>],
    word_ids: &[Vec<u32>],
    base: &Tensor,
    length: usize,
) -> Result<(Tensor, Tensor), Error> {
    let pooled_base = end_row(base, length)?;

    // 每个词首次出现时的权重
    let mut first_weights: BTreeMap<u32, f32> = BTreeMap::new();
    for (id, w) in word_ids.iter().flatten().zip(weights.iter().flatten()) {
        first_weights.entry(*id).or_insert(*w);
    }
    let weight_dict: Vec<(u32, f32)> = first_weights
        .into_iter()
        .filter(|(_, w)| *w != 1.0)
        .collect();

    if weight_dict.is_empty() {
        return Ok((base.zeros_like()?, pooled_base));
    }

    let weight_column = token_column(weights.iter().flatten().copied().collect(), base)?;
    let mask_token = (encoder.mask_token(), 1.0);

    let mut masked_chunks = Vec::with_capacity(chunks.len() * weight_dict.len());
    let mut masks = Vec::with_capacity(weight_dict.len());
    let mut ws = Vec::with_capacity(weight_dict.len());
    for (id, w) in &weight_dict {
        let (masked, mask) = mask_word_id(chunks, word_ids, *id, &mask_token);
        masked_chunks.extend(masked);
        masks.push(token_column(mask, base)?);
        ws.push(*w);
    }

    let embs = batched_clip_encode(encoder, &masked_chunks, length, chunks.len())?;
    let masks = Tensor::cat(&masks, 0)?;

    let embs = base.broadcast_sub(&embs)?;
    let pooled = end_row(&embs, length)?;

    let embs = embs.broadcast_mul(&masks)?.sum_keepdim(0)?;

    let ws = Tensor::from_vec(ws, (weight_dict.len(), 1), base.device())?
        .to_dtype(base.dtype())?
        .affine(1.0, -1.0)?;
    let pooled = pooled
        .broadcast_sub(&pooled_base)?
        .broadcast_mul(&ws)?
        .mean_keepdim(0)?;

    let contribution = weight_column.affine(1.0, -1.0)?.broadcast_mul(&embs)?;
    Ok((contribution, (pooled_base + pooled)?))
}

/// 按权重解释方式编码带权重的 token
///
/// tokenized: [chunk: [(token, weight, word_id)]], 所有 chunk 长度一致.
/// 返回 (embedding, pooled)
pub fn advanced_encode_from_tokens<E: TokenEncoder>(
    encoder: &mut E,
    tokenized: &[Vec<(E::Token, f32, u32)>],
    normalization: TokenNormalization,
    interpretation: WeightInterpretation,
    w_max: f32,
    apply_to_pooled: bool,
) -> Result<(Tensor, Tensor), Error> {
    let length = tokenized.first().map(|c| c.len()).unwrap_or(0);
    if length == 0 {
        return Err(Error::ListEmpty);
    }
    if tokenized.iter().any(|c| c.len() != length) {
        return Err(Error::InvalidTensorShape(
            "token chunks have different lengths".to_string(),
        ));
    }

    let tokens: Vec<Vec<E::Token>> = tokenized
        .iter()
        .map(|c| c.iter().map(|(t, _, _)| t.clone()).collect())
        .collect();
    let weights: Vec<Vec<f32>> = tokenized
        .iter()
        .map(|c| c.iter().map(|(_, w, _)| *w).collect())
        .collect();
    let word_ids: Vec<Vec<u32>> = tokenized
        .iter()
        .map(|c| c.iter().map(|(_, _, id)| *id).collect())
        .collect();

    let weights = normalization.apply(&weights, &word_ids);

    let with_weights = |f: &dyn Fn(f32) -> f32| -> Chunks<E::Token> {
        tokens
            .iter()
            .zip(&weights)
            .map(|(ts, ws)| ts.iter().cloned().zip(ws.iter().map(|w| f(*w))).collect())
            .collect()
    };
    let unweighted = with_weights(&|_| 1.0);

    if interpretation == WeightInterpretation::Comfy {
        let weighted = with_weights(&|w| w);
        let (emb, pooled) = encoder.encode(&weighted)?;
        let pooled = match pooled {
            Some(pooled) => pooled,
            None => end_row(&emb, length)?,
        };
        return Ok((emb, pooled));
    }

    let (base, pooled_base) = encoder.encode(&unweighted)?;
    let pooled_base = match pooled_base {
        Some(pooled) => pooled,
        None => end_row(&base, length)?,
    };

    let (weighted, pooled) = match interpretation {
        WeightInterpretation::A1111 => {
            let weighted = from_zero(&weights, &base)?;
            let base_mean = base.to_dtype(DType::F32)?.mean_all()?.to_scalar::<f32>()?;
            let weighted_mean = weighted
                .to_dtype(DType::F32)?
                .mean_all()?
                .to_scalar::<f32>()?;
            let weighted = if weighted_mean != 0.0 {
                weighted.affine((base_mean / weighted_mean) as f64, 0.0)?
            } else {
                weighted
            };
            (weighted, pooled_base.clone())
        }
        WeightInterpretation::Compel => {
            let positive = with_weights(&|w| if w >= 1.0 { w } else { 1.0 });
            let (emb, _) = encoder.encode(&positive)?;
            let (weighted, _) = down_weight(encoder, &positive, &weights, &emb, length)?;
            let pooled = end_row(&weighted, length)?;
            (weighted, pooled)
        }
        WeightInterpretation::ComfyPlusPlus => {
            let (weighted, _) = down_weight(encoder, &unweighted, &weights, &base, length)?;
            let up_weights: Vec<Vec<f32>> = weights
                .iter()
                .map(|ws| ws.iter().map(|w| if *w > 1.0 { *w } else { 1.0 }).collect())
                .collect();
            let (embs, pooled) =
                from_masked(encoder, &unweighted, &up_weights, &word_ids, &base, length)?;
            ((weighted + embs)?, pooled)
        }
        WeightInterpretation::DownWeight => {
            let weights = scale_to_norm(&weights, &word_ids, w_max);
            let (weighted, _) = down_weight(encoder, &unweighted, &weights, &base, length)?;
            let pooled = end_row(&weighted, length)?;
            (weighted, pooled)
        }
        WeightInterpretation::Comfy | WeightInterpretation::Original => {
            return Err(Error::InvalidParameter(format!(
                "{interpretation} is not an advanced weight interpretation"
            )))
        }
    };

    if apply_to_pooled {
        Ok((weighted, pooled))
    } else {
        Ok((weighted, pooled_base))
    }
}

#[cfg(test)]
mod tests {
    use candle_core::Device;

    use super::*;

    const DIM: usize = 4;

    /// 每个 token 的 embedding 为 [id, id, id, id] * weight, pooled 取 None
    struct FakeEncoder {
        calls: usize,
    }

    impl TokenEncoder for FakeEncoder {
        type Token = u32;

        fn encode(
            &mut self,
            chunks: &[Vec<(u32, f32)>],
        ) -> Result<(Tensor, Option<Tensor>), Error> {
            self.calls += 1;
            let data: Vec<f32> = chunks
                .iter()
                .flatten()
                .flat_map(|(t, w)| std::iter::repeat_n(*t as f32 * w, DIM))
                .collect();
            let n = data.len() / DIM;
            Ok((Tensor::from_vec(data, (1, n, DIM), &Device::Cpu)?, None))
        }

        fn mask_token(&self) -> u32 {
            MASK_TOKEN_ID
        }
    }

    fn first_column(t: &Tensor) -> anyhow::Result<Vec<f32>> {
        Ok(t.get(0)?.narrow(1, 0, 1)?.flatten_all()?.to_vec1::<f32>()?)
    }

    fn assert_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-4, "{a:?} != {b:?}");
        }
    }

    // [start, 10, 20, end]
    fn tokenized(w1: f32, w2: f32) -> Vec<Vec<(u32, f32, u32)>> {
        vec![vec![(1, 1.0, 0), (10, w1, 1), (20, w2, 2), (2, 1.0, 0)]]
    }

    #[test]
    fn test_mask_inds() -> anyhow::Result<()> {
        let chunks = vec![vec![(1u32, 1.0), (2, 1.0)], vec![(3, 1.0), (4, 1.0)]];
        let inds = HashSet::from([1, 2]);
        let masked = mask_inds(&chunks, &inds, &(0, 1.0));
        assert_eq!(
            masked,
            vec![vec![(1, 1.0), (0, 1.0)], vec![(0, 1.0), (4, 1.0)]]
        );
        Ok(())
    }

    #[test]
    fn test_mask_word_id() -> anyhow::Result<()> {
        let chunks = vec![vec![(5u32, 1.0), (6, 1.2), (7, 1.2)]];
        let word_ids = vec![vec![0, 1, 1]];
        let (masked, mask) = mask_word_id(&chunks, &word_ids, 1, &(0, 1.0));
        assert_eq!(masked, vec![vec![(5, 1.0), (0, 1.0), (0, 1.0)]]);
        assert_eq!(mask, vec![0.0, 1.0, 1.0]);
        Ok(())
    }

    #[test]
    fn test_batched_clip_encode() -> anyhow::Result<()> {
        let mut encoder = FakeEncoder { calls: 0 };
        // 40 组提示词, 每组 2 个 chunk, 每个 chunk 3 个 token
        let chunks: Vec<Vec<(u32, f32)>> = (0..80)
            .map(|i| vec![(i, 1.0), (i, 1.0), (i, 1.0)])
            .collect();

        let embs = batched_clip_encode(&mut encoder, &chunks, 3, 2)?;
        assert_eq!(embs.dims(), &[40, 6, DIM]);
        assert_eq!(encoder.calls, 3);

        let second = embs.get(1)?.narrow(1, 0, 1)?.flatten_all()?.to_vec1::<f32>()?;
        assert_close(&second, &[2.0, 2.0, 2.0, 3.0, 3.0, 3.0]);
        Ok(())
    }

    #[test]
    fn test_comfy() -> anyhow::Result<()> {
        let mut encoder = FakeEncoder { calls: 0 };
        let (emb, pooled) = advanced_encode_from_tokens(
            &mut encoder,
            &tokenized(1.5, 0.5),
            TokenNormalization::None,
            WeightInterpretation::Comfy,
            1.0,
            false,
        )?;
        assert_close(&first_column(&emb)?, &[1.0, 15.0, 10.0, 2.0]);
        assert_eq!(pooled.dims(), &[1, DIM]);
        assert_close(&pooled.flatten_all()?.to_vec1::<f32>()?, &[2.0; DIM]);
        assert_eq!(encoder.calls, 1);
        Ok(())
    }

    #[test]
    fn test_a1111() -> anyhow::Result<()> {
        let mut encoder = FakeEncoder { calls: 0 };
        let (emb, _) = advanced_encode_from_tokens(
            &mut encoder,
            &tokenized(2.0, 1.0),
            TokenNormalization::None,
            WeightInterpretation::A1111,
            1.0,
            false,
        )?;
        // base mean = 33 / 4, weighted mean = 43 / 4
        let scale = 33.0 / 43.0;
        assert_close(
            &first_column(&emb)?,
            &[scale, 20.0 * scale, 20.0 * scale, 2.0 * scale],
        );
        Ok(())
    }

    #[test]
    fn test_down_weight() -> anyhow::Result<()> {
        let mut encoder = FakeEncoder { calls: 0 };
        let (emb, pooled) = advanced_encode_from_tokens(
            &mut encoder,
            &tokenized(0.5, 1.0),
            TokenNormalization::None,
            WeightInterpretation::DownWeight,
            1.0,
            false,
        )?;
        // 0.5 * base + 0.5 * masked, token 10 -> 266
        let mixed = 0.5 * 10.0 + 0.5 * MASK_TOKEN_ID as f32;
        assert_close(&first_column(&emb)?, &[1.0, mixed, 20.0, 2.0]);
        // pooled 取 base 的结束符
        assert_close(&pooled.flatten_all()?.to_vec1::<f32>()?, &[2.0; DIM]);
        Ok(())
    }

    #[test]
    fn test_down_weight_cumulative() -> anyhow::Result<()> {
        let mut encoder = FakeEncoder { calls: 0 };
        let chunks = vec![vec![(10u32, 1.0), (20, 1.0), (30, 1.0)]];
        let weights = vec![vec![0.25, 0.5, 1.0]];
        let (base, _) = encoder.encode(&chunks)?;

        let (emb, masked) = down_weight(&mut encoder, &chunks, &weights, &base, 3)?;
        let m = MASK_TOKEN_ID as f32;
        // base * 0.25 + mask(10) * 0.25 + mask(10, 20) * 0.5
        assert_close(
            &first_column(&emb)?,
            &[
                0.25 * 10.0 + 0.75 * m,
                0.5 * 20.0 + 0.5 * m,
                30.0,
            ],
        );
        assert_eq!(
            masked,
            vec![vec![(MASK_TOKEN_ID, 1.0), (MASK_TOKEN_ID, 1.0), (30, 1.0)]]
        );
        Ok(())
    }

    #[test]
    fn test_down_weight_no_change() -> anyhow::Result<()> {
        let mut encoder = FakeEncoder { calls: 0 };
        let chunks = vec![vec![(10u32, 1.0), (20, 1.0)]];
        let weights = vec![vec![1.0, 1.5]];
        let (base, _) = encoder.encode(&chunks)?;

        let (emb, masked) = down_weight(&mut encoder, &chunks, &weights, &base, 2)?;
        assert_eq!(encoder.calls, 1);
        assert_close(&first_column(&emb)?, &[10.0, 20.0]);
        assert_eq!(masked, chunks);
        Ok(())
    }

    #[test]
    fn test_comfy_plus_plus() -> anyhow::Result<()> {
        let mut encoder = FakeEncoder { calls: 0 };
        let (emb, _) = advanced_encode_from_tokens(
            &mut encoder,
            &tokenized(1.5, 1.0),
            TokenNormalization::None,
            WeightInterpretation::ComfyPlusPlus,
            1.0,
            false,
        )?;
        // token 10: base + (1.5 - 1) * (10 - 266)
        let up = 10.0 + 0.5 * (10.0 - MASK_TOKEN_ID as f32);
        assert_close(&first_column(&emb)?, &[1.0, up, 20.0, 2.0]);
        Ok(())
    }

    #[test]
    fn test_from_masked_without_weights() -> anyhow::Result<()> {
        let mut encoder = FakeEncoder { calls: 0 };
        let chunks = vec![vec![(10u32, 1.0), (20, 1.0)]];
        let (base, _) = encoder.encode(&chunks)?;

        let (embs, pooled) = from_masked(
            &mut encoder,
            &chunks,
            &[vec![1.0, 1.0]],
            &[vec![1, 2]],
            &base,
            2,
        )?;
        assert_close(&embs.flatten_all()?.to_vec1::<f32>()?, &[0.0; 2 * DIM]);
        assert_close(&pooled.flatten_all()?.to_vec1::<f32>()?, &[20.0; DIM]);
        assert_eq!(encoder.calls, 1);
        Ok(())
    }

    #[test]
    fn test_compel() -> anyhow::Result<()> {
        let mut encoder = FakeEncoder { calls: 0 };
        let (emb, _) = advanced_encode_from_tokens(
            &mut encoder,
            &tokenized(2.0, 0.5),
            TokenNormalization::None,
            WeightInterpretation::Compel,
            1.0,
            false,
        )?;
        // 升权直接编码, 降权部分与遮盖结果混合
        let mixed = 0.5 * 20.0 + 0.5 * MASK_TOKEN_ID as f32;
        assert_close(&first_column(&emb)?, &[1.0, 20.0, mixed, 2.0]);
        Ok(())
    }

    #[test]
    fn test_invalid_input() -> anyhow::Result<()> {
        let mut encoder = FakeEncoder { calls: 0 };
        let result = advanced_encode_from_tokens(
            &mut encoder,
            &tokenized(1.0, 1.0),
            TokenNormalization::None,
            WeightInterpretation::Original,
            1.0,
            false,
        );
        assert!(result.is_err());

        let uneven = vec![vec![(1u32, 1.0, 0), (2, 1.0, 0)], vec![(1, 1.0, 0)]];
        let result = advanced_encode_from_tokens(
            &mut encoder,
            &uneven,
            TokenNormalization::None,
            WeightInterpretation::Comfy,
            1.0,
            false,
        );
        assert!(result.is_err());
        Ok(())
    }
}
