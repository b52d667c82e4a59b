use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::ChatMessage;

/// 参与者成员状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MembershipStatus {
    Active,
    Left,
}

/// 会话参与者
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// 用户ID（邮箱）
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub department: Option<String>,
    /// 已确认读到的最高消息序号（读游标）
    #[serde(default)]
    pub last_read_seq: u64,
    pub status: MembershipStatus,
}

impl Participant {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            department: None,
            last_read_seq: 0,
            status: MembershipStatus::Active,
        }
    }

    pub fn with_cursor(mut self, last_read_seq: u64) -> Self {
        self.last_read_seq = last_read_seq;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == MembershipStatus::Active
    }
}

/// 列表展示用的最后消息预览（反规范化，可能滞后）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPreview {
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// 会话（1:1 或群聊）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub id: u64,
    pub is_group: bool,
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub last_preview: Option<RoomPreview>,
}

impl ChatRoom {
    pub fn new(id: u64, is_group: bool, participants: Vec<Participant>) -> Self {
        Self {
            id,
            is_group,
            participants,
            last_preview: None,
        }
    }

    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn participant_mut(&mut self, user_id: &str) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.user_id == user_id)
    }

    /// 乐观推进读游标（单调不减）
    pub fn advance_cursor(&mut self, user_id: &str, seq: u64) {
        if let Some(p) = self.participant_mut(user_id) {
            if seq > p.last_read_seq {
                p.last_read_seq = seq;
            }
        }
    }

    /// 以服务端游标为准进行对账
    ///
    /// 冲突时服务端胜出：即便低于本地乐观值也直接覆盖。
    pub fn reconcile_cursor(&mut self, user_id: &str, server_seq: u64) {
        if let Some(p) = self.participant_mut(user_id) {
            p.last_read_seq = server_seq;
        }
    }

    /// 除 sender 外仍在会话中的参与者
    pub fn active_others<'a>(&'a self, sender_id: &'a str) -> impl Iterator<Item = &'a Participant> {
        self.participants
            .iter()
            .filter(move |p| p.is_active() && p.user_id != sender_id)
    }

    /// 1:1 会话中的对端
    pub fn direct_peer(&self, current_user: &str) -> Option<&Participant> {
        if self.is_group {
            return None;
        }
        self.participants.iter().find(|p| p.user_id != current_user)
    }

    /// 预览为空或明显滞后时，从日志尾部消息机会性重算
    pub fn refresh_preview(&mut self, last_message: Option<&ChatMessage>) {
        let Some(msg) = last_message else { return };
        let stale = match &self.last_preview {
            None => true,
            Some(p) => p.text.is_empty() || p.timestamp < msg.created_at,
        };
        if stale {
            let text = if msg.is_ticket_preview() {
                "[티켓 미리보기]".to_string()
            } else {
                msg.body.clone()
            };
            self.last_preview = Some(RoomPreview {
                text,
                timestamp: msg.created_at,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> ChatRoom {
        ChatRoom::new(
            1,
            false,
            vec![
                Participant::new("me@desk.io", "나").with_cursor(5),
                Participant::new("peer@desk.io", "상대").with_cursor(3),
            ],
        )
    }

    #[test]
    fn cursor_advance_is_monotonic() {
        let mut r = room();
        r.advance_cursor("me@desk.io", 10);
        r.advance_cursor("me@desk.io", 7); // 回退被忽略
        assert_eq!(r.participant("me@desk.io").unwrap().last_read_seq, 10);
    }

    #[test]
    fn server_reconcile_overrides_optimistic_cursor() {
        let mut r = room();
        r.advance_cursor("me@desk.io", 10);
        r.reconcile_cursor("me@desk.io", 8);
        assert_eq!(r.participant("me@desk.io").unwrap().last_read_seq, 8);
    }

    #[test]
    fn active_others_excludes_left_members() {
        let mut r = room();
        r.is_group = true;
        r.participants.push({
            let mut p = Participant::new("gone@desk.io", "퇴장");
            p.status = MembershipStatus::Left;
            p
        });
        let others: Vec<_> = r.active_others("me@desk.io").collect();
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].user_id, "peer@desk.io");
    }
}
