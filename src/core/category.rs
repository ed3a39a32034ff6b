//! 节点分类

/// 采样器
pub const CATEGORY_SAMPLER: &str = "BMAB/sampler";
/// 分割
pub const CATEGORY_SEGMENT: &str = "BMAB/segment";
