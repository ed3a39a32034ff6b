//! 目录操作

use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

/// 递归搜索指定扩展名的文件
///
/// 返回相对于搜索目录的路径, 已排序
pub fn recursive_search(
    directory: &Path,
    extension: &str,
    excluded_dir_names: &[&str],
) -> Vec<PathBuf> {
    if !directory.is_dir() {
        return Vec::new();
    }

    let extension = extension.trim_start_matches('.').to_lowercase();
    let walker = WalkDir::new(directory)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| !is_excluded_dir(e, excluded_dir_names));

    let mut files = walker
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.to_lowercase() == extension)
                .unwrap_or(false)
        })
        .filter_map(|e| e.path().strip_prefix(directory).ok().map(Path::to_path_buf))
        .collect::<Vec<_>>();

    files.sort();
    files
}

/// 检查是否为排除目录
fn is_excluded_dir(entry: &DirEntry, excluded_names: &[&str]) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }

    entry
        .file_name()
        .to_str()
        .map(|name| excluded_names.contains(&name))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_recursive_search() -> anyhow::Result<()> {
        let root = std::env::temp_dir().join(format!("bmab_dir_test_{}", std::process::id()));
        fs::create_dir_all(root.join("hair"))?;
        fs::create_dir_all(root.join(".git"))?;
        fs::write(root.join("color.txt"), "red")?;
        fs::write(root.join("hair").join("style.TXT"), "long")?;
        fs::write(root.join("readme.md"), "-")?;
        fs::write(root.join(".git").join("skip.txt"), "-")?;

        let files = recursive_search(&root, ".txt", &[".git"]);
        assert_eq!(
            files,
            vec![PathBuf::from("color.txt"), PathBuf::from("hair/style.TXT")]
        );

        fs::remove_dir_all(&root)?;
        Ok(())
    }

    #[test]
    fn test_recursive_search_missing_dir() {
        let files = recursive_search(Path::new("/path/does/not/exist"), "txt", &[]);
        assert!(files.is_empty());
    }
}
