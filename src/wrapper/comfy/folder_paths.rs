//! 文件夹路径
//!
//! 封装 ComfyUI 的 `folder_paths` 模块, 以便遵循用户的 extra_model_paths 配置

use std::path::PathBuf;

use pyo3::{
    types::{PyAnyMethods, PyModule},
    Bound, PyAny, Python,
};

use crate::error::Error;

pub struct FolderPaths;

impl FolderPaths {
    fn module(py: Python<'_>) -> Result<Bound<'_, PyModule>, Error> {
        Ok(PyModule::import(py, "folder_paths")?)
    }

    /// 模型根目录
    pub fn models_dir(py: Python<'_>) -> Result<PathBuf, Error> {
        let models_dir: String = Self::module(py)?.getattr("models_dir")?.extract()?;
        Ok(PathBuf::from(models_dir))
    }

    /// 获取文件名列表
    pub fn get_filename_list(py: Python<'_>, folder_name: &str) -> Result<Vec<String>, Error> {
        let list = Self::module(py)?
            .getattr("get_filename_list")?
            .call1((folder_name,))?
            .extract::<Vec<String>>()?;
        Ok(list)
    }

    /// 获取完整文件路径
    pub fn get_full_path(
        py: Python<'_>,
        folder_name: &str,
        filename: &str,
    ) -> Result<Option<PathBuf>, Error> {
        let path: Bound<'_, PyAny> = Self::module(py)?
            .getattr("get_full_path")?
            .call1((folder_name, filename))?;

        if path.is_none() {
            return Ok(None);
        }
        Ok(Some(PathBuf::from(path.extract::<String>()?)))
    }
}
