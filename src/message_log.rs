use std::collections::HashSet;

use tracing::warn;

use crate::model::ChatMessage;

/// 合并结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// 追加到尾部（正常推送顺序）
    Appended,
    /// 乱序到达，按 seq 插入中间
    Inserted,
    /// 相同 id 已存在，丢弃
    Duplicate,
}

/// 单个会话的有序消息日志
///
/// 不变量：按 `seq` 升序；`id` 在日志内唯一。
/// REST 回退发送与推送回声可能各送达一次同一消息，
/// 以 `id` 为唯一去重键实现 at-least-once 下的恰好一次合并。
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: Vec<ChatMessage>,
    ids: HashSet<u64>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.entries
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.entries.last()
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.entries.last().map(|m| m.seq)
    }

    pub fn first_seq(&self) -> Option<u64> {
        self.entries.first().map(|m| m.seq)
    }

    pub fn contains_id(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }

    /// 第一条 seq >= 给定值的下标（未读锚点定位）
    pub fn first_index_at_or_after(&self, seq: u64) -> Option<usize> {
        self.entries.iter().position(|m| m.seq >= seq)
    }

    /// 合并一条实时到达的消息
    ///
    /// 推送通道假定按服务端顺序投递，常态是尾部追加；
    /// 若传输乱序，按 seq 二分定位插入，保持顺序不变量。
    pub fn merge_incoming(&mut self, message: ChatMessage) -> MergeOutcome {
        if !self.ids.insert(message.id) {
            return MergeOutcome::Duplicate;
        }

        match self.entries.last() {
            Some(last) if message.seq < last.seq => {
                let pos = self
                    .entries
                    .partition_point(|m| m.seq <= message.seq);
                warn!(
                    seq = message.seq,
                    last_seq = last.seq,
                    "⚠️ out-of-order push delivery, inserting by seq"
                );
                self.entries.insert(pos, message);
                MergeOutcome::Inserted
            }
            _ => {
                self.entries.push(message);
                MergeOutcome::Appended
            }
        }
    }

    /// 向前翻页：把更旧的一页（升序）接到日志头部
    ///
    /// 已存在的 id 防御性过滤。返回实际接入条数。
    pub fn prepend_page(&mut self, older: Vec<ChatMessage>) -> usize {
        let fresh: Vec<ChatMessage> = older
            .into_iter()
            .filter(|m| self.ids.insert(m.id))
            .collect();
        let count = fresh.len();
        if count > 0 {
            self.entries.splice(0..0, fresh);
        }
        count
    }

    /// 顺序不变量检查（相邻 seq 严格递增）
    pub fn is_ordered(&self) -> bool {
        self.entries.windows(2).all(|w| w[0].seq < w[1].seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MessageKind, MessageDto};

    fn msg(id: u64, seq: u64) -> ChatMessage {
        MessageDto {
            id: Some(id),
            chat_room_id: Some(1),
            message_seq: Some(seq),
            sender_id: Some("a@desk.io".into()),
            content: Some(format!("m{seq}")),
            ..Default::default()
        }
        .normalize()
        .unwrap()
    }

    #[test]
    fn duplicate_id_merges_exactly_once() {
        let mut log = MessageLog::new();
        assert_eq!(log.merge_incoming(msg(1, 1)), MergeOutcome::Appended);
        assert_eq!(log.merge_incoming(msg(1, 1)), MergeOutcome::Duplicate);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn order_invariant_holds_after_mixed_operations() {
        let mut log = MessageLog::new();
        log.merge_incoming(msg(5, 5));
        log.merge_incoming(msg(6, 6));
        // 向前接入更旧的一页
        log.prepend_page(vec![msg(3, 3), msg(4, 4)]);
        // 乱序推送
        log.merge_incoming(msg(8, 8));
        assert_eq!(log.merge_incoming(msg(7, 7)), MergeOutcome::Inserted);
        assert!(log.is_ordered());
        assert_eq!(log.first_seq(), Some(3));
        assert_eq!(log.last_seq(), Some(8));
    }

    #[test]
    fn prepend_filters_already_known_ids() {
        let mut log = MessageLog::new();
        log.merge_incoming(msg(4, 4));
        let added = log.prepend_page(vec![msg(3, 3), msg(4, 4)]);
        assert_eq!(added, 1);
        assert_eq!(log.len(), 2);
        assert!(log.is_ordered());
    }

    #[test]
    fn anchor_lookup_finds_first_unread() {
        let mut log = MessageLog::new();
        for s in 1..=5 {
            log.merge_incoming(msg(s, s));
        }
        assert_eq!(log.first_index_at_or_after(3), Some(2));
        assert_eq!(log.first_index_at_or_after(9), None);
    }

    #[test]
    fn normalized_kind_survives_merge() {
        let mut log = MessageLog::new();
        let mut m = msg(1, 1);
        m.kind = MessageKind::TicketPreview { ticket_id: 77 };
        log.merge_incoming(m);
        assert!(log.last().unwrap().is_ticket_preview());
    }
}
