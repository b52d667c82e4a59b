use crate::model::{ChatMessage, ChatRoom};

/// 已读状态跟踪
///
/// 未读数不存储在消息上，而是由参与者读游标推导：
/// - 1:1 会话：仅对当前用户发出的消息有定义，对端游标 >= seq 则为 0，否则 1
/// - 群聊：除发送者外、游标 < seq 的活跃参与者数
///
/// 参与者游标缺失时（会话元数据尚未加载），以服务端随消息
/// 下发的 unread 提示为种子。
#[derive(Debug, Clone)]
pub struct ReadTracker {
    current_user: String,
}

impl ReadTracker {
    pub fn new(current_user: impl Into<String>) -> Self {
        Self {
            current_user: current_user.into(),
        }
    }

    pub fn current_user(&self) -> &str {
        &self.current_user
    }

    /// 某条消息还有多少接收者未读
    pub fn unread_count(&self, room: &ChatRoom, msg: &ChatMessage) -> u32 {
        if room.participants.is_empty() {
            return msg.unread_hint.unwrap_or(0);
        }

        if room.is_group {
            room.active_others(&msg.sender_id)
                .filter(|p| p.last_read_seq < msg.seq)
                .count() as u32
        } else {
            // 1:1：仅对自己发的消息有意义
            if msg.sender_id != self.current_user {
                return 0;
            }
            match room.direct_peer(&self.current_user) {
                Some(peer) if peer.last_read_seq < msg.seq => 1,
                Some(_) => 0,
                None => msg.unread_hint.unwrap_or(0),
            }
        }
    }

    /// 当前用户是否已读该消息
    pub fn is_read_by_me(&self, room: &ChatRoom, msg: &ChatMessage) -> bool {
        if msg.sender_id == self.current_user {
            return true;
        }
        room.participant(&self.current_user)
            .map(|p| p.last_read_seq >= msg.seq)
            .unwrap_or(false)
    }
}
