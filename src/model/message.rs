use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// 消息类型（后端 ChatMessageType 对应）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WireMessageType {
    Text,
    TicketPreview,
    System,
}

impl Default for WireMessageType {
    fn default() -> Self {
        WireMessageType::Text
    }
}

/// 附件 DTO
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentDto {
    pub id: Option<u64>,
    pub file_name: String,
    #[serde(default)]
    pub file_size: Option<u64>,
}

/// 消息 DTO（REST 分页响应和推送事件共用的线格式）
///
/// 注意：推送事件可能是纯触发通知（id 为 null 且无内容），
/// 此类负载不得进入消息日志，见 `model::event`。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: Option<u64>,
    #[serde(default)]
    pub chat_room_id: Option<u64>,
    #[serde(default)]
    pub message_seq: Option<u64>,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub sender_nickname: Option<String>,
    #[serde(default)]
    pub message_type: Option<WireMessageType>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub ticket_id: Option<u64>,
    #[serde(default)]
    pub created_at: Option<String>,
    /// AI 判定当前上下文应生成工单草稿
    #[serde(default)]
    pub ticket_trigger: Option<bool>,
    /// 服务端预计算的未读人数（可选提示）
    #[serde(default)]
    pub unread_count: Option<u32>,
    #[serde(default)]
    pub is_read: Option<bool>,
    #[serde(default)]
    pub files: Vec<AttachmentDto>,
}

/// 文件引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Option<u64>,
    pub name: String,
    pub size: Option<u64>,
}

/// 消息变体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// 普通文本
    Text,
    /// 工单预览链接（content 为空，携带 ticket_id）
    TicketPreview { ticket_id: u64 },
}

/// 规范化消息（内存中的统一形态）
///
/// 不变量：`id` 为服务端分配的稳定标识；`seq` 在同一会话内严格递增，
/// 作为排序与已读游标比较的权威依据。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: u64,
    pub room_id: u64,
    pub seq: u64,
    pub sender_id: String,
    pub sender_name: String,
    pub kind: MessageKind,
    pub body: String,
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
    /// 服务端随消息下发的未读提示（参与者游标缺失时作为种子）
    pub unread_hint: Option<u32>,
}

/// 宽容的时间戳解析：RFC3339 优先，其次后端 LocalDateTime（视为 UTC）
fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    match raw {
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|_| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").map(|n| n.and_utc())
            })
            .unwrap_or_else(|_| Utc::now()),
        None => Utc::now(),
    }
}

impl MessageDto {
    /// 规范化为内存消息
    ///
    /// `id` 为 null 的负载是客户端临时占位或纯触发通知，返回 None。
    pub fn normalize(&self) -> Option<ChatMessage> {
        let id = self.id?;

        let kind = match self.message_type.unwrap_or_default() {
            WireMessageType::TicketPreview => MessageKind::TicketPreview {
                ticket_id: self.ticket_id.unwrap_or(0),
            },
            _ => MessageKind::Text,
        };

        let sender_id = self.sender_id.clone().unwrap_or_default();
        let sender_name = self
            .sender_nickname
            .clone()
            .unwrap_or_else(|| sender_id.clone());

        Some(ChatMessage {
            id,
            room_id: self.chat_room_id.unwrap_or(0),
            seq: self.message_seq.unwrap_or(0),
            sender_id,
            sender_name,
            kind,
            body: self.content.clone().unwrap_or_default(),
            attachments: self
                .files
                .iter()
                .map(|f| Attachment {
                    id: f.id,
                    name: f.file_name.clone(),
                    size: f.file_size,
                })
                .collect(),
            created_at: parse_timestamp(self.created_at.as_deref()),
            unread_hint: self.unread_count,
        })
    }
}

impl ChatMessage {
    /// 是否为工单预览消息
    pub fn is_ticket_preview(&self) -> bool {
        matches!(self.kind, MessageKind::TicketPreview { .. })
    }
}

/// 发送请求体（WS publish 与 REST 发送共用）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<u64>,
    pub message_type: WireMessageType,
    pub ai_enabled: bool,
}

impl SendMessageRequest {
    /// 普通文本发送
    pub fn text(content: impl Into<String>, ai_enabled: bool) -> Self {
        Self {
            content: content.into(),
            ticket_id: None,
            message_type: WireMessageType::Text,
            ai_enabled,
        }
    }
}
