//! 动态提示词
//!
//! - `{a|b|c}`: 随机选择其中一项, 支持嵌套
//! - `__name__`: 从通配符文件 `<wildcards_dir>/name.txt` 中随机选择一行

use std::{collections::HashMap, fs, path::Path};

use log::{debug, warn};
use rand::{seq::IndexedRandom, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use regex::{Captures, Regex};

use crate::{core::utils::directory::recursive_search, error::Error};

/// 最大展开轮数, 通配符文件中可能继续包含通配符
const MAX_PASSES: usize = 16;

/// 通配符
#[derive(Debug, Clone, Default)]
pub struct Wildcards {
    entries: HashMap<String, Vec<String>>,
}

impl Wildcards {
    /// 没有候选项的通配符会被丢弃
    pub fn new(mut entries: HashMap<String, Vec<String>>) -> Self {
        entries.retain(|_, lines| !lines.is_empty());
        Self { entries }
    }

    /// 加载目录下所有 `.txt` 通配符文件, 目录不存在时为空
    pub fn load(dir: &Path) -> Result<Self, Error> {
        let mut entries = HashMap::new();
        for file in recursive_search(dir, "txt", &[]) {
            let name = file
                .with_extension("")
                .to_string_lossy()
                .replace('\\', "/");

            let content = fs::read_to_string(dir.join(&file))?;
            let lines: Vec<String> = content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string)
                .collect();
            if !lines.is_empty() {
                entries.insert(name, lines);
            }
        }

        debug!("loaded {} wildcards from {}", entries.len(), dir.display());
        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 展开动态提示词
///
/// 相同的 (text, seed) 总是得到相同的结果
pub fn parse_prompt(text: &str, seed: u64, wildcards: &Wildcards) -> Result<String, Error> {
    let group_re = Regex::new(r"\{([^{}]*)\}")?;
    let wildcard_re = Regex::new(r"__([\w\-./]+?)__")?;

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut text = text.to_string();

    for _ in 0..MAX_PASSES {
        let mut changed = false;

        text = wildcard_re
            .replace_all(&text, |caps: &Captures| {
                match wildcards.get(&caps[1]).and_then(|lines| lines.choose(&mut rng)) {
                    Some(line) => {
                        changed = true;
                        line.clone()
                    }
                    None => {
                        warn!("wildcard not found: {}", &caps[1]);
                        caps[0].to_string()
                    }
                }
            })
            .into_owned();

        // 只匹配不含括号的组, 即最内层
        text = group_re
            .replace_all(&text, |caps: &Captures| {
                changed = true;
                let options: Vec<&str> = caps[1].split('|').collect();
                options[rng.random_range(0..options.len())].to_string()
            })
            .into_owned();

        if !changed {
            break;
        }
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wildcards() -> Wildcards {
        Wildcards::new(HashMap::from([
            (
                "hair".to_string(),
                vec!["red hair".to_string(), "blue hair".to_string()],
            ),
            (
                "style/outfit".to_string(),
                vec!["{dress|suit} with __hair__".to_string()],
            ),
        ]))
    }

    #[test]
    fn test_plain_text() -> anyhow::Result<()> {
        let text = "1girl, (masterpiece:1.2), solo";
        assert_eq!(parse_prompt(text, 42, &Wildcards::default())?, text);
        Ok(())
    }

    #[test]
    fn test_deterministic() -> anyhow::Result<()> {
        let text = "{a|b|c|d|e|f|g}, {1|2|3|4|5|6}, __hair__";
        let w = wildcards();
        for seed in 0..16 {
            assert_eq!(parse_prompt(text, seed, &w)?, parse_prompt(text, seed, &w)?);
        }

        // 不同的种子应该能覆盖到不同的结果
        let results: std::collections::HashSet<String> = (0..32)
            .map(|seed| parse_prompt(text, seed, &w))
            .collect::<Result<_, _>>()?;
        assert!(results.len() > 1);
        Ok(())
    }

    #[test]
    fn test_groups() -> anyhow::Result<()> {
        for seed in 0..16 {
            let result = parse_prompt("a {cat|dog}", seed, &Wildcards::default())?;
            assert!(result == "a cat" || result == "a dog", "{result}");

            let result = parse_prompt("{x|{y|z}}", seed, &Wildcards::default())?;
            assert!(["x", "y", "z"].contains(&result.as_str()), "{result}");

            let result = parse_prompt("a{ b|}", seed, &Wildcards::default())?;
            assert!(result == "a b" || result == "a", "{result}");
        }
        Ok(())
    }

    #[test]
    fn test_wildcards() -> anyhow::Result<()> {
        let w = wildcards();
        for seed in 0..16 {
            let result = parse_prompt("__style/outfit__", seed, &w)?;
            assert!(
                [
                    "dress with red hair",
                    "dress with blue hair",
                    "suit with red hair",
                    "suit with blue hair"
                ]
                .contains(&result.as_str()),
                "{result}"
            );
        }

        // 未知通配符保持原样
        assert_eq!(parse_prompt("__unknown__, 1girl", 0, &w)?, "__unknown__, 1girl");
        Ok(())
    }

    #[test]
    fn test_self_reference_is_bounded() -> anyhow::Result<()> {
        let w = Wildcards::new(HashMap::from([(
            "loop".to_string(),
            vec!["x __loop__".to_string()],
        )]));
        let result = parse_prompt("__loop__", 0, &w)?;
        assert!(result.starts_with("x x"));
        assert!(result.ends_with("__loop__"));
        Ok(())
    }

    #[test]
    fn test_empty_wildcard_kept_verbatim() -> anyhow::Result<()> {
        let w = Wildcards::new(HashMap::from([
            ("x".to_string(), Vec::new()),
            ("y".to_string(), vec!["y1".to_string()]),
        ]));
        assert_eq!(w.len(), 1);
        assert!(w.get("x").is_none());
        assert_eq!(parse_prompt("__x__, __y__", 0, &w)?, "__x__, y1");
        Ok(())
    }

    #[test]
    fn test_load_wildcards() -> anyhow::Result<()> {
        let root = std::env::temp_dir().join(format!("bmab_wildcards_{}", std::process::id()));
        fs::create_dir_all(root.join("style"))?;
        fs::write(root.join("hair.txt"), "# colors\nred hair\n\n  blue hair  \n")?;
        fs::write(root.join("style").join("outfit.txt"), "dress\n")?;
        fs::write(root.join("empty.txt"), "# nothing\n")?;

        let w = Wildcards::load(&root)?;
        assert_eq!(w.len(), 2);
        assert_eq!(
            w.get("hair"),
            Some(&["red hair".to_string(), "blue hair".to_string()][..])
        );
        assert_eq!(w.get("style/outfit"), Some(&["dress".to_string()][..]));
        assert!(w.get("empty").is_none());

        fs::remove_dir_all(&root)?;

        assert!(Wildcards::load(&root)?.is_empty());
        Ok(())
    }
}
