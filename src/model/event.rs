use serde::{Deserialize, Serialize};

use super::message::{ChatMessage, MessageDto};

/// 推送负载的规范化结果
///
/// 一个推送帧可能同时携带消息与工单触发标记；也可能是纯触发通知
/// （ticketTrigger == true 且 id == null），后者不得进入消息日志，
/// 只产生副作用（弹出工单确认）。
#[derive(Debug, Clone, PartialEq)]
pub struct PushOutcome {
    /// 可并入日志的消息（纯触发通知时为 None）
    pub message: Option<ChatMessage>,
    /// 是否需要弹出工单草稿确认
    pub ticket_prompt: bool,
}

impl PushOutcome {
    /// 从线格式负载规范化
    pub fn from_dto(dto: &MessageDto) -> Self {
        Self {
            message: dto.normalize(),
            ticket_prompt: dto.ticket_trigger.unwrap_or(false),
        }
    }

    /// 解析并规范化一条推送 JSON
    pub fn parse(payload: &str) -> serde_json::Result<Self> {
        let dto: MessageDto = serde_json::from_str(payload)?;
        Ok(Self::from_dto(&dto))
    }
}

/// 会话层向宿主（UI）发出的副作用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SideEffect {
    /// AI 判定应生成工单草稿，询问用户
    TicketPrompt,
    /// 推送通道状态变化（true = 已连接）
    ConnectionChanged(bool),
    /// 重连次数耗尽，等待手动重试
    ConnectionExhausted,
    /// 需要用户感知的发送失败
    SendFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_only_payload_has_no_message() {
        let out = PushOutcome::parse(r#"{"ticketTrigger":true}"#).unwrap();
        assert!(out.message.is_none());
        assert!(out.ticket_prompt);
    }

    #[test]
    fn message_with_trigger_keeps_both() {
        let out = PushOutcome::parse(
            r#"{"id":3,"chatRoomId":1,"messageSeq":9,"senderId":"a@desk.io","content":"hi","ticketTrigger":true}"#,
        )
        .unwrap();
        assert!(out.message.is_some());
        assert!(out.ticket_prompt);
        assert_eq!(out.message.unwrap().seq, 9);
    }

    #[test]
    fn plain_message_has_no_prompt() {
        let out =
            PushOutcome::parse(r#"{"id":4,"chatRoomId":1,"messageSeq":10,"content":"x"}"#).unwrap();
        assert!(out.message.is_some());
        assert!(!out.ticket_prompt);
    }
}
