use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::error::{ClientError, Result};
use crate::model::{ChatRoom, MembershipStatus, MessageDto, Participant, SendMessageRequest};

/// 分页响应（后端 PageResponseDTO 对应）
///
/// `has_more` 的判定容忍异构响应形态：显式 next 标志优先，
/// 其次比较当前页/总页数，最后退化为"取满一页"启发式。
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    /// 消息列表（服务端为最新在前）
    #[serde(default)]
    pub dto_list: Vec<MessageDto>,
    #[serde(default)]
    pub total_count: u64,
    /// 显式"还有下一页"标志
    #[serde(default)]
    pub next: Option<bool>,
    #[serde(default)]
    pub current: Option<u32>,
    #[serde(default)]
    pub total_page: Option<u32>,
}

impl MessagePage {
    /// 边界适配器：归一出唯一的 has_more 判定
    pub fn resolve_has_more(&self, requested_size: u32) -> bool {
        if let Some(next) = self.next {
            return next;
        }
        if let (Some(current), Some(total)) = (self.current, self.total_page) {
            return current < total;
        }
        self.dto_list.len() as u32 == requested_size
    }
}

/// 会话参与者 DTO
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantDto {
    pub email: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub last_read_seq: Option<u64>,
    #[serde(default)]
    pub left: Option<bool>,
}

/// 会话 DTO（后端 ChatRoomDTO 对应）
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDto {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub participant_info: Vec<ParticipantDto>,
}

impl RoomDto {
    pub fn into_room(self) -> ChatRoom {
        let participants = self
            .participant_info
            .into_iter()
            .map(|p| {
                let mut participant =
                    Participant::new(p.email.clone(), p.nickname.unwrap_or(p.email));
                participant.department = p.department;
                participant.last_read_seq = p.last_read_seq.unwrap_or(0);
                if p.left.unwrap_or(false) {
                    participant.status = MembershipStatus::Left;
                }
                participant
            })
            .collect();
        ChatRoom::new(self.id, self.is_group, participants)
    }
}

/// 后端消息网关契约
///
/// 分页器与会话只依赖该 trait，测试用内存桩替换。
#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// 拉取会话元数据（参与者、读游标）
    async fn fetch_room(&self, room_id: u64) -> Result<ChatRoom>;

    /// 拉取一页消息（最新在前）
    async fn fetch_messages(&self, room_id: u64, page: u32, size: u32) -> Result<MessagePage>;

    /// REST 发送（WS 不可用时的回退路径）
    async fn send_message(&self, room_id: u64, req: &SendMessageRequest) -> Result<MessageDto>;

    /// 上报读游标（尽力而为）
    async fn mark_read(&self, room_id: u64, message_seq: u64) -> Result<()>;

    /// 退出会话
    async fn leave_room(&self, room_id: u64) -> Result<()>;

    /// 邀请参与者
    async fn invite_users(&self, room_id: u64, emails: &[String]) -> Result<()>;
}

/// reqwest 实现
pub struct RestGateway {
    http: reqwest::Client,
    base_url: Url,
    bearer: String,
}

impl RestGateway {
    pub fn new(base_url: Url, bearer: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            bearer: bearer.into(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    fn check(endpoint: &str, status: StatusCode) -> Result<()> {
        if status.is_success() {
            Ok(())
        } else {
            Err(ClientError::UnexpectedStatus {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            })
        }
    }
}

#[async_trait]
impl MessageGateway for RestGateway {
    async fn fetch_room(&self, room_id: u64) -> Result<ChatRoom> {
        let url = self.endpoint(&format!("api/chat/rooms/{room_id}"))?;
        let resp = self.http.get(url).bearer_auth(&self.bearer).send().await?;
        Self::check("rooms/{id}", resp.status())?;
        let dto: RoomDto = resp.json().await?;
        Ok(dto.into_room())
    }

    async fn fetch_messages(&self, room_id: u64, page: u32, size: u32) -> Result<MessagePage> {
        let url = self.endpoint(&format!("api/chat/rooms/{room_id}/messages"))?;
        debug!(room_id, page, size, "fetching message page");
        let resp = self
            .http
            .get(url)
            .query(&[("page", page), ("size", size)])
            .bearer_auth(&self.bearer)
            .send()
            .await?;
        Self::check("rooms/{id}/messages", resp.status())?;
        Ok(resp.json().await?)
    }

    async fn send_message(&self, room_id: u64, req: &SendMessageRequest) -> Result<MessageDto> {
        let url = self.endpoint(&format!("api/chat/rooms/{room_id}/messages"))?;
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.bearer)
            .json(req)
            .send()
            .await?;
        Self::check("rooms/{id}/messages", resp.status())?;
        Ok(resp.json().await?)
    }

    async fn mark_read(&self, room_id: u64, message_seq: u64) -> Result<()> {
        let url = self.endpoint(&format!("api/chat/rooms/{room_id}/read"))?;
        let resp = self
            .http
            .put(url)
            .bearer_auth(&self.bearer)
            .json(&json!({ "messageSeq": message_seq }))
            .send()
            .await?;
        Self::check("rooms/{id}/read", resp.status())
    }

    async fn leave_room(&self, room_id: u64) -> Result<()> {
        let url = self.endpoint(&format!("api/chat/rooms/{room_id}/leave"))?;
        let resp = self.http.post(url).bearer_auth(&self.bearer).send().await?;
        Self::check("rooms/{id}/leave", resp.status())
    }

    async fn invite_users(&self, room_id: u64, emails: &[String]) -> Result<()> {
        let url = self.endpoint(&format!("api/chat/rooms/{room_id}/invite"))?;
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.bearer)
            .json(&json!({ "inviteeEmails": emails }))
            .send()
            .await?;
        Self::check("rooms/{id}/invite", resp.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_more_prefers_explicit_flag() {
        let page = MessagePage {
            next: Some(false),
            current: Some(1),
            total_page: Some(9),
            ..Default::default()
        };
        assert!(!page.resolve_has_more(20));
    }

    #[test]
    fn has_more_compares_page_numbers() {
        let page = MessagePage {
            current: Some(2),
            total_page: Some(3),
            ..Default::default()
        };
        assert!(page.resolve_has_more(20));

        let last = MessagePage {
            current: Some(3),
            total_page: Some(3),
            ..Default::default()
        };
        assert!(!last.resolve_has_more(20));
    }

    #[test]
    fn has_more_falls_back_to_full_page_heuristic() {
        let full = MessagePage {
            dto_list: vec![MessageDto::default(); 20],
            ..Default::default()
        };
        assert!(full.resolve_has_more(20));

        let short = MessagePage {
            dto_list: vec![MessageDto::default(); 7],
            ..Default::default()
        };
        assert!(!short.resolve_has_more(20));
    }
}
