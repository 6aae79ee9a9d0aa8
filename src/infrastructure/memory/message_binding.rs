//! In-Memory Message Audio Binding
//!
//! 传输层消息 ID 与逻辑消息 ID 的显式映射表

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;

use crate::domain::{ContentKey, MessageKey};

/// 消息 - 音频绑定表
pub struct MessageAudioBinding {
    /// transport_id -> logical_id
    aliases: DashMap<MessageKey, MessageKey>,
    /// logical_id -> Set<transport_id>
    reverse: DashMap<MessageKey, HashSet<MessageKey>>,
    /// logical_id -> ContentKey
    content_keys: DashMap<MessageKey, ContentKey>,
}

impl MessageAudioBinding {
    pub fn new() -> Self {
        Self {
            aliases: DashMap::new(),
            reverse: DashMap::new(),
            content_keys: DashMap::new(),
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 绑定传输层 ID 到逻辑 ID
    ///
    /// 返回之前绑定的逻辑 ID（与新值相同时返回 None）
    pub fn bind(&self, transport_id: &MessageKey, logical_id: &MessageKey) -> Option<MessageKey> {
        if transport_id == logical_id {
            return None;
        }

        let previous = self
            .aliases
            .insert(transport_id.clone(), logical_id.clone())
            .filter(|previous| previous != logical_id);

        if let Some(previous) = &previous {
            if let Some(mut ids) = self.reverse.get_mut(previous) {
                ids.remove(transport_id);
            }
            self.reverse.remove_if(previous, |_, ids| ids.is_empty());
        }

        self.reverse
            .entry(logical_id.clone())
            .or_default()
            .insert(transport_id.clone());

        tracing::debug!(
            transport_id = %transport_id,
            logical_id = %logical_id,
            "Message binding registered"
        );
        previous
    }

    /// 解析为逻辑 ID，未绑定时返回原 ID
    pub fn resolve(&self, raw_id: &MessageKey) -> MessageKey {
        self.aliases
            .get(raw_id)
            .map(|logical| logical.clone())
            .unwrap_or_else(|| raw_id.clone())
    }

    /// 逻辑 ID 下登记的所有传输层 ID
    pub fn aliases_of(&self, logical_id: &MessageKey) -> Vec<MessageKey> {
        self.reverse
            .get(logical_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_bound(&self, transport_id: &MessageKey) -> bool {
        self.aliases.contains_key(transport_id)
    }

    /// 记录逻辑消息的音频将缓存到哪个 ContentKey
    pub fn set_content_key(&self, logical_id: &MessageKey, key: ContentKey) {
        self.content_keys.insert(logical_id.clone(), key);
    }

    pub fn content_key(&self, logical_id: &MessageKey) -> Option<ContentKey> {
        self.content_keys.get(logical_id).map(|key| key.clone())
    }

    /// 消息结束后移除所有别名和 ContentKey
    pub fn unbind_message(&self, logical_id: &MessageKey) {
        if let Some((_, transport_ids)) = self.reverse.remove(logical_id) {
            for transport_id in transport_ids {
                self.aliases
                    .remove_if(&transport_id, |_, logical| logical == logical_id);
            }
        }
        self.content_keys.remove(logical_id);
    }
}

impl Default for MessageAudioBinding {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_falls_back_to_raw_id() {
        let binding = MessageAudioBinding::new();
        let raw = MessageKey::new("chatcmpl-1");
        assert_eq!(binding.resolve(&raw), raw);
    }

    #[test]
    fn test_bind_is_idempotent_and_reversible() {
        let binding = MessageAudioBinding::new();
        let transport = MessageKey::new("chatcmpl-1");
        let logical = MessageKey::new("msg-1");

        assert!(binding.bind(&transport, &logical).is_none());
        assert!(binding.bind(&transport, &logical).is_none());
        assert_eq!(binding.resolve(&transport), logical);

        assert_eq!(binding.aliases_of(&logical), vec![transport.clone()]);

        binding.set_content_key(&logical, ContentKey::compute("hi", None));
        binding.unbind_message(&logical);
        assert!(binding.aliases_of(&logical).is_empty());

        assert_eq!(binding.resolve(&transport), transport);
        assert!(binding.content_key(&logical).is_none());
    }

    #[test]
    fn test_rebind_moves_alias() {
        let binding = MessageAudioBinding::new();
        let transport = MessageKey::new("t");
        let first = MessageKey::new("a");
        let second = MessageKey::new("b");

        binding.bind(&transport, &first);
        assert_eq!(binding.bind(&transport, &second), Some(first.clone()));

        // 解绑旧的逻辑 ID 不影响新的绑定
        binding.unbind_message(&first);
        assert_eq!(binding.resolve(&transport), second);
    }
}
