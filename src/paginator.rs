use std::sync::Arc;

use tracing::{debug, info};

use crate::api::MessageGateway;
use crate::error::Result;
use crate::message_log::MessageLog;
use crate::model::ChatMessage;

/// 未读锚定回填的页数上限（限定最坏情况的初始加载成本）
pub const MAX_ANCHOR_PAGES: u32 = 5;

/// 历史分页器
///
/// 规范日志为最旧在前；服务端每页最新在前，合并前必须反转。
/// 同一会话同一时刻至多一个分页请求在途。
pub struct HistoryPaginator {
    gateway: Arc<dyn MessageGateway>,
    room_id: u64,
    page_size: u32,
    current_page: u32,
    has_more: bool,
    in_flight: bool,
}

impl HistoryPaginator {
    pub fn new(gateway: Arc<dyn MessageGateway>, room_id: u64, page_size: u32) -> Self {
        Self {
            gateway,
            room_id,
            page_size,
            current_page: 0,
            has_more: true,
            in_flight: false,
        }
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    /// 拉取一页并反转为升序
    async fn fetch_page_ascending(&mut self, page: u32) -> Result<(Vec<ChatMessage>, bool)> {
        let response = self
            .gateway
            .fetch_messages(self.room_id, page, self.page_size)
            .await?;
        let has_more = response.resolve_has_more(self.page_size);
        let mut messages: Vec<ChatMessage> = response
            .dto_list
            .iter()
            .filter_map(|dto| dto.normalize())
            .collect();
        messages.reverse();
        Ok((messages, has_more))
    }

    /// 初始加载：第 1 页起，必要时继续回填直到覆盖首条未读
    ///
    /// `unread_anchor_seq`：查看者读游标的下一条（首条未读）的 seq。
    /// 回填最多 MAX_ANCHOR_PAGES 页或历史耗尽。
    pub async fn initial_load(
        &mut self,
        log: &mut MessageLog,
        unread_anchor_seq: Option<u64>,
    ) -> Result<()> {
        self.in_flight = true;
        let result = self.initial_load_inner(log, unread_anchor_seq).await;
        self.in_flight = false;
        result
    }

    async fn initial_load_inner(
        &mut self,
        log: &mut MessageLog,
        unread_anchor_seq: Option<u64>,
    ) -> Result<()> {
        let (first_page, has_more) = self.fetch_page_ascending(1).await?;
        log.prepend_page(first_page);
        self.current_page = 1;
        self.has_more = has_more;

        if let Some(anchor) = unread_anchor_seq {
            let mut fetched = 1;
            while self.has_more
                && fetched < MAX_ANCHOR_PAGES
                && log.first_seq().map(|s| s > anchor).unwrap_or(false)
            {
                let next = self.current_page + 1;
                let (older, has_more) = self.fetch_page_ascending(next).await?;
                if older.is_empty() {
                    self.has_more = false;
                    break;
                }
                log.prepend_page(older);
                self.current_page = next;
                self.has_more = has_more;
                fetched += 1;
            }
            debug!(
                anchor,
                pages = fetched,
                first_seq = log.first_seq(),
                "initial backfill for unread anchor done"
            );
        }
        Ok(())
    }

    /// 向前翻页（用户滚到顶部附近时触发）
    ///
    /// 在途或历史耗尽时抑制；返回接入的消息条数。
    pub async fn load_older(&mut self, log: &mut MessageLog) -> Result<usize> {
        if self.in_flight || !self.has_more {
            return Ok(0);
        }

        self.in_flight = true;
        let next = self.current_page + 1;
        let result = self.fetch_page_ascending(next).await;
        self.in_flight = false;

        let (older, has_more) = result?;
        if older.is_empty() {
            self.has_more = false;
            info!(room_id = self.room_id, "history exhausted");
            return Ok(0);
        }

        let inserted = log.prepend_page(older);
        self.current_page = next;
        self.has_more = has_more;
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MessagePage;
    use crate::error::Result;
    use crate::model::{ChatRoom, MessageDto, SendMessageRequest};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// 内存桩网关：seq 1..=total 的消息按最新在前分页
    struct StubGateway {
        total: u64,
        fetch_count: Mutex<u32>,
    }

    impl StubGateway {
        fn new(total: u64) -> Self {
            Self {
                total,
                fetch_count: Mutex::new(0),
            }
        }

        fn fetches(&self) -> u32 {
            *self.fetch_count.lock()
        }
    }

    #[async_trait]
    impl MessageGateway for StubGateway {
        async fn fetch_room(&self, room_id: u64) -> Result<ChatRoom> {
            Ok(ChatRoom::new(room_id, false, Vec::new()))
        }

        async fn fetch_messages(&self, _room: u64, page: u32, size: u32) -> Result<MessagePage> {
            *self.fetch_count.lock() += 1;
            // 第 page 页：seq 从高到低
            let top = self.total as i64 - (page as i64 - 1) * size as i64;
            let dto_list = (0..size as i64)
                .map(|i| top - i)
                .filter(|s| *s >= 1)
                .map(|s| MessageDto {
                    id: Some(s as u64),
                    chat_room_id: Some(1),
                    message_seq: Some(s as u64),
                    sender_id: Some("peer@desk.io".into()),
                    content: Some(format!("m{s}")),
                    ..Default::default()
                })
                .collect::<Vec<_>>();
            Ok(MessagePage {
                dto_list,
                total_count: self.total,
                next: Some((page as u64 * size as u64) < self.total),
                ..Default::default()
            })
        }

        async fn send_message(&self, _: u64, _: &SendMessageRequest) -> Result<MessageDto> {
            unreachable!("not used in paginator tests")
        }

        async fn mark_read(&self, _: u64, _: u64) -> Result<()> {
            Ok(())
        }

        async fn leave_room(&self, _: u64) -> Result<()> {
            Ok(())
        }

        async fn invite_users(&self, _: u64, _: &[String]) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn initial_load_backfills_to_unread_anchor() {
        // 120 条消息，读游标 100 → 首条未读 seq 101，页大小 20
        let gateway = Arc::new(StubGateway::new(120));
        let mut paginator = HistoryPaginator::new(gateway.clone(), 1, 20);
        let mut log = MessageLog::new();

        paginator.initial_load(&mut log, Some(101)).await.unwrap();

        // 第 1 页覆盖 101..=120，锚点已含，无需继续回填
        assert_eq!(gateway.fetches(), 1);
        assert!(log.first_index_at_or_after(101).is_some());
        assert_eq!(log.first_seq(), Some(101));
    }

    #[tokio::test]
    async fn initial_load_fetches_older_pages_until_anchor_covered() {
        // 游标 55 → 首条未读 56，需要 4 页（101-120, 81-100, 61-80, 41-60）
        let gateway = Arc::new(StubGateway::new(120));
        let mut paginator = HistoryPaginator::new(gateway.clone(), 1, 20);
        let mut log = MessageLog::new();

        paginator.initial_load(&mut log, Some(56)).await.unwrap();

        assert_eq!(gateway.fetches(), 4);
        assert_eq!(log.first_seq(), Some(41));
        assert!(log.is_ordered());
    }

    #[tokio::test]
    async fn anchor_backfill_is_bounded() {
        // 游标 0 → 锚点 1，需要 6 页才能覆盖，但上限 5 页
        let gateway = Arc::new(StubGateway::new(120));
        let mut paginator = HistoryPaginator::new(gateway.clone(), 1, 20);
        let mut log = MessageLog::new();

        paginator.initial_load(&mut log, Some(1)).await.unwrap();

        // 5 页 × 20 条只覆盖到 seq 21，锚点 1 仍在更早的历史里
        assert_eq!(gateway.fetches(), MAX_ANCHOR_PAGES);
        assert_eq!(log.first_seq(), Some(21));
        // 上限生效后不再继续回填
        assert!(paginator.has_more());
    }

    #[tokio::test]
    async fn load_older_stops_when_exhausted() {
        let gateway = Arc::new(StubGateway::new(30));
        let mut paginator = HistoryPaginator::new(gateway.clone(), 1, 20);
        let mut log = MessageLog::new();

        paginator.initial_load(&mut log, None).await.unwrap();
        assert_eq!(paginator.load_older(&mut log).await.unwrap(), 10);
        assert!(!paginator.has_more());

        // 历史耗尽后不再发请求
        let before = gateway.fetches();
        assert_eq!(paginator.load_older(&mut log).await.unwrap(), 0);
        assert_eq!(paginator.load_older(&mut log).await.unwrap(), 0);
        assert_eq!(gateway.fetches(), before);
    }

    #[tokio::test]
    async fn pages_merge_in_ascending_order() {
        let gateway = Arc::new(StubGateway::new(60));
        let mut paginator = HistoryPaginator::new(gateway, 1, 20);
        let mut log = MessageLog::new();

        paginator.initial_load(&mut log, None).await.unwrap();
        paginator.load_older(&mut log).await.unwrap();
        paginator.load_older(&mut log).await.unwrap();

        assert_eq!(log.len(), 60);
        assert!(log.is_ordered());
        assert_eq!(log.first_seq(), Some(1));
        assert_eq!(log.last_seq(), Some(60));
    }
}
