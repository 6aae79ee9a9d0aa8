//! Content Key - 内容寻址缓存 key
//!
//! 由规范化后的文本和可选的 scope（如 app id / voice id）计算得出。
//! 缓存条目只以 ContentKey 作为身份，消息 ID 不参与。

use serde::{Deserialize, Serialize};

/// 缓存 key 的十六进制长度（md5 摘要）
pub const CONTENT_KEY_LEN: usize = 32;

/// 内容寻址 key
///
/// 不变量: 相同的 (text, scope) 总是得到相同的 key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentKey(String);

impl ContentKey {
    /// 计算文本的缓存 key
    ///
    /// scope 以长度前缀写入摘要，`None` 与 `Some("")` 得到不同的 key
    pub fn compute(text: &str, scope: Option<&str>) -> Self {
        let normalized = normalize_text(text);

        let mut context = md5::Context::new();
        match scope {
            Some(scope) => {
                context.consume([1u8]);
                context.consume((scope.len() as u64).to_le_bytes());
                context.consume(scope.as_bytes());
            }
            None => context.consume([0u8]),
        }
        context.consume(normalized.as_bytes());

        Self(format!("{:x}", context.compute()))
    }

    /// 从字符串解析（只接受 32 位小写十六进制）
    pub fn parse(value: &str) -> Option<Self> {
        let valid = value.len() == CONTENT_KEY_LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 文本规范化：去除首尾空白，内部连续空白折叠为一个空格
fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_compute_is_deterministic() {
        let a = ContentKey::compute("Hello world", Some("app-1"));
        let b = ContentKey::compute("Hello world", Some("app-1"));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), CONTENT_KEY_LEN);
    }

    #[test]
    fn test_whitespace_is_normalized() {
        let a = ContentKey::compute("  Hello   world\n", None);
        let b = ContentKey::compute("Hello world", None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_scope_changes_key() {
        let none = ContentKey::compute("Hello world", None);
        let empty = ContentKey::compute("Hello world", Some(""));
        let app = ContentKey::compute("Hello world", Some("app-1"));
        assert_ne!(none, empty);
        assert_ne!(empty, app);
    }

    #[test]
    fn test_scope_boundary_does_not_alias() {
        let a = ContentKey::compute("b c", Some("a"));
        let b = ContentKey::compute("c", Some("a b"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_distinct_texts_do_not_collide() {
        let keys: HashSet<ContentKey> = (0..5000)
            .map(|i| ContentKey::compute(&format!("message number {}", i), Some("voice")))
            .collect();
        assert_eq!(keys.len(), 5000);
    }

    #[test]
    fn test_parse() {
        let key = ContentKey::compute("Hello", None);
        assert_eq!(ContentKey::parse(key.as_str()), Some(key));
        assert!(ContentKey::parse("not-a-key").is_none());
        assert!(ContentKey::parse(&"A".repeat(CONTENT_KEY_LEN)).is_none());
    }
}
