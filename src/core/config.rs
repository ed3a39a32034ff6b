//! 插件配置
//!
//! 模型目录等路径默认跟随 ComfyUI 的 `folder_paths.models_dir`,
//! 可以通过环境变量覆盖:
//! - `BMAB_MODELS_DIR`: bmab 模型目录, 默认 `<models_dir>/bmab`
//! - `BMAB_WILDCARDS_DIR`: 通配符目录, 默认 `<BMAB_MODELS_DIR>/wildcard`
//! - `BMAB_SAM_REPO`: SAM 模型下载仓库, 默认 `portu-sim/bmab`
//! - `BMAB_SAM_MODEL`: SAM 模型文件, 默认 `sam_vit_b_01ec64.pth`

use std::path::{Path, PathBuf};

use pyo3::Python;

use crate::{error::Error, wrapper::comfy::folder_paths::FolderPaths};

pub const DEFAULT_SAM_REPO: &str = "portu-sim/bmab";
pub const DEFAULT_SAM_MODEL: &str = "sam_vit_b_01ec64.pth";

#[derive(Debug, Clone, PartialEq)]
pub struct BmabConfig {
    /// bmab 模型目录
    pub models_dir: PathBuf,
    /// 通配符目录
    pub wildcards_dir: PathBuf,
    /// huggingface 仓库
    pub sam_repo: String,
    /// SAM 模型文件名
    pub sam_model: String,
}

impl BmabConfig {
    /// 从 ComfyUI 宿主加载配置
    pub fn load(py: Python<'_>) -> Result<Self, Error> {
        let host_models_dir = FolderPaths::models_dir(py)?;
        Ok(Self::resolve(&host_models_dir, |key| std::env::var(key).ok()))
    }

    /// 解析配置, `lookup` 用于读取环境变量
    pub fn resolve<F>(host_models_dir: &Path, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let models_dir = non_empty("BMAB_MODELS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| host_models_dir.join("bmab"));
        let wildcards_dir = non_empty("BMAB_WILDCARDS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| models_dir.join("wildcard"));

        Self {
            models_dir,
            wildcards_dir,
            sam_repo: non_empty("BMAB_SAM_REPO").unwrap_or_else(|| DEFAULT_SAM_REPO.to_string()),
            sam_model: non_empty("BMAB_SAM_MODEL")
                .unwrap_or_else(|| DEFAULT_SAM_MODEL.to_string()),
        }
    }

    /// SAM 模型类型, 由文件名推断
    pub fn sam_model_type(&self) -> &'static str {
        if self.sam_model.contains("vit_h") {
            "vit_h"
        } else if self.sam_model.contains("vit_l") {
            "vit_l"
        } else {
            "vit_b"
        }
    }

    /// SAM 模型完整路径
    pub fn sam_checkpoint(&self) -> PathBuf {
        self.models_dir.join(&self.sam_model)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_resolve_default() -> anyhow::Result<()> {
        let config = BmabConfig::resolve(Path::new("/comfy/models"), |_| None);

        assert_eq!(config.models_dir, PathBuf::from("/comfy/models/bmab"));
        assert_eq!(
            config.wildcards_dir,
            PathBuf::from("/comfy/models/bmab/wildcard")
        );
        assert_eq!(config.sam_repo, DEFAULT_SAM_REPO);
        assert_eq!(config.sam_model_type(), "vit_b");
        assert_eq!(
            config.sam_checkpoint(),
            PathBuf::from("/comfy/models/bmab/sam_vit_b_01ec64.pth")
        );
        Ok(())
    }

    #[test]
    fn test_resolve_env() -> anyhow::Result<()> {
        let env = HashMap::from([
            ("BMAB_MODELS_DIR", "/data/bmab"),
            ("BMAB_SAM_MODEL", "sam_vit_h_4b8939.pth"),
            ("BMAB_WILDCARDS_DIR", "  "),
        ]);
        let config =
            BmabConfig::resolve(Path::new("/comfy/models"), |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.models_dir, PathBuf::from("/data/bmab"));
        // 空值视为未设置
        assert_eq!(config.wildcards_dir, PathBuf::from("/data/bmab/wildcard"));
        assert_eq!(config.sam_model_type(), "vit_h");
        Ok(())
    }
}
