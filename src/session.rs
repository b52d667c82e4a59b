use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::MessageGateway;
use crate::connection::{ChatWsClient, ConnectionEvent};
use crate::error::{ClientError, Result};
use crate::message_log::{MergeOutcome, MessageLog};
use crate::model::{ChatMessage, ChatRoom, PushOutcome, SendMessageRequest, SideEffect};
use crate::paginator::HistoryPaginator;
use crate::read_state::ReadTracker;
use crate::viewport::{ScrollAction, Viewport, VisibleSlice};

/// 会话状态机（取代散落的布尔标志）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// 初始加载中
    Initializing,
    /// 正常收发
    Ready,
    /// 向前翻页在途
    LoadingOlder,
    /// 初始加载失败
    Error,
}

/// 单个会话的视图会话
///
/// 独占持有消息日志、分页器、读状态与视口；推送连接构造注入，
/// 生命周期与本会话绑定。切换房间 = 丢弃本会话并新建，
/// 在途请求的效果随之废弃。
pub struct ChatSession {
    room: ChatRoom,
    tracker: ReadTracker,
    state: SessionState,
    log: MessageLog,
    paginator: HistoryPaginator,
    viewport: Viewport,
    gateway: Arc<dyn MessageGateway>,
    ws: ChatWsClient,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    effects: mpsc::UnboundedSender<SideEffect>,
    ai_enabled: bool,
    connected: bool,
    closed: bool,
}

impl ChatSession {
    /// 打开会话：拉元数据、初始加载（未读锚定）、连接推送通道。
    ///
    /// 返回会话与推送事件接收端；宿主负责把事件泵回 `handle_event`。
    pub async fn open(
        gateway: Arc<dyn MessageGateway>,
        ws: ChatWsClient,
        room_id: u64,
        current_user: impl Into<String>,
        page_size: u32,
        effects: mpsc::UnboundedSender<SideEffect>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ConnectionEvent>)> {
        let current_user = current_user.into();
        let tracker = ReadTracker::new(current_user.clone());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let room = gateway.fetch_room(room_id).await?;
        let my_cursor = room
            .participant(&current_user)
            .map(|p| p.last_read_seq)
            .unwrap_or(0);

        let mut session = Self {
            room,
            tracker,
            state: SessionState::Initializing,
            log: MessageLog::new(),
            paginator: HistoryPaginator::new(Arc::clone(&gateway), room_id, page_size),
            viewport: Viewport::default(),
            gateway,
            ws,
            events_tx: events_tx.clone(),
            effects,
            ai_enabled: false,
            connected: false,
            closed: false,
        };

        // 首条未读 = 自己游标的下一条；锚定回填有页数上限
        if let Err(e) = session
            .paginator
            .initial_load(&mut session.log, Some(my_cursor + 1))
            .await
        {
            session.state = SessionState::Error;
            return Err(e);
        }

        // 初始滚动：有未读则居中首条未读，否则贴底
        let unread_index = session
            .log
            .last_seq()
            .filter(|last| *last > my_cursor)
            .and_then(|_| session.log.first_index_at_or_after(my_cursor + 1));
        session
            .viewport
            .anchor_initial(session.log.len(), unread_index);

        // 初始读上报：日志尾部的 seq，尽力而为
        if let Some(last_seq) = session.log.last_seq() {
            session.mark_read_async(last_seq);
        }
        session.refresh_preview();

        session.ws.connect(room_id, events_tx);
        session.state = SessionState::Ready;
        info!(
            room_id,
            loaded = session.log.len(),
            anchored = unread_index.is_some(),
            "chat session opened"
        );
        Ok((session, events_rx))
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn room(&self) -> &ChatRoom {
        &self.room
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.log.messages()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn ai_enabled(&self) -> bool {
        self.ai_enabled
    }

    /// AI 消息处理开关（发送负载携带 aiEnabled）
    pub fn set_ai_enabled(&mut self, enabled: bool) {
        self.ai_enabled = enabled;
    }

    /// 某条消息的未读人数（视图徽标用）
    pub fn unread_count_for(&self, message: &ChatMessage) -> u32 {
        self.tracker.unread_count(&self.room, message)
    }

    /// 当前应物化的消息区间
    pub fn visible_slice(&self) -> VisibleSlice {
        self.viewport.visible_slice(self.log.len())
    }

    pub fn viewport_mut(&mut self) -> &mut Viewport {
        &mut self.viewport
    }

    /// 推送通道事件入口
    pub async fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => {
                self.connected = true;
                let _ = self.effects.send(SideEffect::ConnectionChanged(true));
            }
            ConnectionEvent::Disconnected => {
                self.connected = false;
                let _ = self.effects.send(SideEffect::ConnectionChanged(false));
            }
            ConnectionEvent::Exhausted => {
                self.connected = false;
                let _ = self.effects.send(SideEffect::ConnectionExhausted);
            }
            ConnectionEvent::Push(dto) => {
                let outcome = PushOutcome::from_dto(&dto);
                self.apply_push(outcome);
            }
        }
    }

    /// 实时消息合并（恰好一次），触发通知只产生副作用
    fn apply_push(&mut self, outcome: PushOutcome) {
        if outcome.ticket_prompt {
            let _ = self.effects.send(SideEffect::TicketPrompt);
        }
        let Some(message) = outcome.message else {
            return;
        };

        let seq = message.seq;
        let sender = message.sender_id.clone();
        let mine = sender == self.tracker.current_user();

        match self.log.merge_incoming(message) {
            MergeOutcome::Duplicate => return,
            outcome => debug!(seq, ?outcome, "push merged"),
        }

        // 发送者视为已读自己的消息
        self.room.advance_cursor(&sender, seq);

        if !mine {
            // 对端消息：上报并乐观推进自己的游标
            self.mark_read_async(seq);
        }

        if self.viewport.arrival_policy(self.log.len()) == ScrollAction::StickToBottom {
            self.viewport.scroll_to_bottom(self.log.len());
        }
        self.refresh_preview();
    }

    /// 发送文本消息：推送通道优先，失败透明回退 REST。
    /// REST 也失败时通过副作用向用户呈现，消息不静默丢失。
    pub async fn send_text(&mut self, content: impl Into<String>) -> Result<()> {
        if self.closed {
            return Err(ClientError::SessionClosed(self.room.id));
        }
        let request = SendMessageRequest::text(content, self.ai_enabled);

        // 重连耗尽后的下一次用户发送重新武装连接
        self.ws.retry(self.events_tx.clone());

        if self.ws.send(self.room.id, &request) {
            return Ok(());
        }

        debug!(room_id = self.room.id, "push channel unavailable, REST fallback");
        match self.gateway.send_message(self.room.id, &request).await {
            Ok(dto) => {
                // 回退路径的响应与稍后的推送回声按 id 去重
                self.apply_push(PushOutcome::from_dto(&dto));
                Ok(())
            }
            Err(e) => {
                let _ = self.effects.send(SideEffect::SendFailed(e.to_string()));
                Err(ClientError::SendFailed(e.to_string()))
            }
        }
    }

    /// 滚动事件：接近顶部时向前翻页（带锚点保持）
    pub async fn on_scroll(&mut self, scroll_top: f64) -> Result<()> {
        let near_top = self.viewport.on_scroll(scroll_top);
        if near_top {
            self.load_older().await?;
        }
        Ok(())
    }

    /// 向前翻页：状态机保证同会话同时至多一次
    pub async fn load_older(&mut self) -> Result<()> {
        if self.closed {
            return Err(ClientError::SessionClosed(self.room.id));
        }
        if self.state != SessionState::Ready || !self.paginator.has_more() {
            return Ok(());
        }

        self.state = SessionState::LoadingOlder;
        let anchor = self.viewport.record_anchor(self.log.len());

        let result = self.paginator.load_older(&mut self.log).await;
        self.state = SessionState::Ready;

        match result {
            Ok(inserted) => {
                if inserted > 0 {
                    // 先修正滚动偏移，再由宿主重算可视范围
                    self.viewport.apply_anchor(anchor, inserted, self.log.len());
                }
                Ok(())
            }
            Err(e) => {
                // 日志保持不变，翻页停在当前位置
                warn!(room_id = self.room.id, error = %e, "older page load failed");
                Err(e)
            }
        }
    }

    /// 退出会话（用户可见的失败语义）
    pub async fn leave(&mut self) -> Result<()> {
        self.gateway.leave_room(self.room.id).await?;
        self.close();
        Ok(())
    }

    /// 邀请参与者（群聊）
    pub async fn invite(&mut self, emails: &[String]) -> Result<()> {
        self.gateway.invite_users(self.room.id, emails).await
    }

    /// 重连耗尽后的手动重试
    pub fn retry_connection(&mut self) {
        self.ws.retry(self.events_tx.clone());
    }

    /// 销毁会话：拆除推送连接，废弃在途请求的效果
    pub fn close(&mut self) {
        self.closed = true;
        self.ws.disconnect();
        self.connected = false;
    }

    /// 读上报 fire-and-forget：失败只记录，不阻塞消息展示
    fn mark_read_async(&mut self, seq: u64) {
        let gateway = Arc::clone(&self.gateway);
        let room_id = self.room.id;
        tokio::spawn(async move {
            if let Err(e) = gateway.mark_read(room_id, seq).await {
                warn!(room_id, seq, error = %e, "mark-read failed (best effort)");
            }
        });
        // 本地乐观推进，不等服务端回声
        let me = self.tracker.current_user().to_string();
        self.room.advance_cursor(&me, seq);
    }

    /// 服务端游标对账（冲突时服务端胜出）
    pub fn reconcile_cursor(&mut self, user_id: &str, server_seq: u64) {
        self.room.reconcile_cursor(user_id, server_seq);
    }

    fn refresh_preview(&mut self) {
        let last = self.log.last().cloned();
        self.room.refresh_preview(last.as_ref());
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if !self.closed {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MessagePage;
    use crate::connection::WsConfig;
    use crate::error::Result;
    use crate::model::{MessageDto, Participant};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use url::Url;

    /// 内存桩网关：固定会话 + seq 1..=total 的历史分页
    struct StubGateway {
        total: u64,
        my_cursor: u64,
        fail_send: bool,
        send_count: Mutex<u32>,
        marked: Mutex<Vec<u64>>,
    }

    impl StubGateway {
        fn new(total: u64, my_cursor: u64) -> Self {
            Self {
                total,
                my_cursor,
                fail_send: false,
                send_count: Mutex::new(0),
                marked: Mutex::new(Vec::new()),
            }
        }

        fn failing_send(mut self) -> Self {
            self.fail_send = true;
            self
        }
    }

    #[async_trait]
    impl MessageGateway for StubGateway {
        async fn fetch_room(&self, room_id: u64) -> Result<ChatRoom> {
            Ok(ChatRoom::new(
                room_id,
                false,
                vec![
                    Participant::new("me@desk.io", "나").with_cursor(self.my_cursor),
                    Participant::new("peer@desk.io", "상대").with_cursor(self.total),
                ],
            ))
        }

        async fn fetch_messages(&self, _room: u64, page: u32, size: u32) -> Result<MessagePage> {
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

        async fn send_message(&self, _: u64, req: &SendMessageRequest) -> Result<MessageDto> {
            *self.send_count.lock() += 1;
            if self.fail_send {
                return Err(ClientError::Transport("connection reset".into()));
            }
            Ok(MessageDto {
                id: Some(900),
                chat_room_id: Some(1),
                message_seq: Some(self.total + 1),
                sender_id: Some("me@desk.io".into()),
                content: Some(req.content.clone()),
                ..Default::default()
            })
        }

        async fn mark_read(&self, _: u64, seq: u64) -> Result<()> {
            self.marked.lock().push(seq);
            Ok(())
        }

        async fn leave_room(&self, _: u64) -> Result<()> {
            Ok(())
        }

        async fn invite_users(&self, _: u64, _: &[String]) -> Result<()> {
            Ok(())
        }
    }

    fn ws() -> ChatWsClient {
        // 不可达端点：测试只走 REST 回退路径
        ChatWsClient::new(WsConfig::new(
            Url::parse("ws://127.0.0.1:9/ws").unwrap(),
            "test-token",
        ))
    }

    async fn open(
        gateway: Arc<StubGateway>,
    ) -> (
        ChatSession,
        mpsc::UnboundedReceiver<ConnectionEvent>,
        mpsc::UnboundedReceiver<SideEffect>,
    ) {
        let (effects_tx, effects_rx) = mpsc::unbounded_channel();
        let (session, events_rx) =
            ChatSession::open(gateway, ws(), 1, "me@desk.io", 20, effects_tx)
                .await
                .unwrap();
        (session, events_rx, effects_rx)
    }

    fn peer_push(id: u64, seq: u64) -> ConnectionEvent {
        ConnectionEvent::Push(MessageDto {
            id: Some(id),
            chat_room_id: Some(1),
            message_seq: Some(seq),
            sender_id: Some("peer@desk.io".into()),
            content: Some("new".into()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn open_anchors_at_first_unread_and_reports_read() {
        let gateway = Arc::new(StubGateway::new(120, 100));
        let (session, _events, _effects) = open(Arc::clone(&gateway)).await;

        assert_eq!(session.state(), SessionState::Ready);
        // 游标 100 → 首页 101..=120 已覆盖首条未读
        assert_eq!(session.messages().first().map(|m| m.seq), Some(101));
        // 读游标乐观推进到日志尾部
        assert_eq!(
            session.room().participant("me@desk.io").unwrap().last_read_seq,
            120
        );

        // fire-and-forget 的读上报落到网关
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(gateway.marked.lock().contains(&120));
    }

    #[tokio::test]
    async fn send_falls_back_to_rest_and_dedups_push_echo() {
        let gateway = Arc::new(StubGateway::new(5, 5));
        let (mut session, _events, _effects) = open(Arc::clone(&gateway)).await;

        // 推送通道未连上：回退 REST，恰好一次
        session.send_text("hello").await.unwrap();
        assert_eq!(*gateway.send_count.lock(), 1);
        assert_eq!(session.messages().last().map(|m| m.seq), Some(6));
        let len = session.messages().len();

        // 稍后的推送回声（同 id）不产生第二份
        session
            .handle_event(ConnectionEvent::Push(MessageDto {
                id: Some(900),
                chat_room_id: Some(1),
                message_seq: Some(6),
                sender_id: Some("me@desk.io".into()),
                content: Some("hello".into()),
                ..Default::default()
            }))
            .await;
        assert_eq!(session.messages().len(), len);
    }

    #[tokio::test]
    async fn failed_send_surfaces_side_effect() {
        let gateway = Arc::new(StubGateway::new(5, 5).failing_send());
        let (mut session, _events, mut effects) = open(Arc::clone(&gateway)).await;

        let err = session.send_text("hello").await.unwrap_err();
        assert!(matches!(err, ClientError::SendFailed(_)));
        // 失败的消息不进日志
        assert_eq!(session.messages().last().map(|m| m.seq), Some(5));

        let mut saw_failure = false;
        while let Ok(effect) = effects.try_recv() {
            if matches!(effect, SideEffect::SendFailed(_)) {
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn peer_push_merges_and_advances_cursors() {
        let gateway = Arc::new(StubGateway::new(5, 5));
        let (mut session, _events, _effects) = open(gateway).await;

        session.handle_event(peer_push(6, 6)).await;

        assert_eq!(session.messages().last().map(|m| m.seq), Some(6));
        // 发送者视为已读自己的消息
        assert_eq!(
            session.room().participant("peer@desk.io").unwrap().last_read_seq,
            6
        );
        // 自己的游标乐观推进（读上报同时在途）
        assert_eq!(
            session.room().participant("me@desk.io").unwrap().last_read_seq,
            6
        );
    }

    #[tokio::test]
    async fn trigger_only_push_prompts_without_logging() {
        let gateway = Arc::new(StubGateway::new(5, 5));
        let (mut session, _events, mut effects) = open(gateway).await;
        let len = session.messages().len();

        session
            .handle_event(ConnectionEvent::Push(MessageDto {
                ticket_trigger: Some(true),
                ..Default::default()
            }))
            .await;

        assert_eq!(session.messages().len(), len);
        let mut saw_prompt = false;
        while let Ok(effect) = effects.try_recv() {
            if effect == SideEffect::TicketPrompt {
                saw_prompt = true;
            }
        }
        assert!(saw_prompt);
    }

    #[tokio::test]
    async fn closed_session_rejects_operations() {
        let gateway = Arc::new(StubGateway::new(5, 5));
        let (mut session, _events, _effects) = open(gateway).await;

        session.close();
        assert!(matches!(
            session.send_text("x").await,
            Err(ClientError::SessionClosed(1))
        ));
        assert!(matches!(
            session.load_older().await,
            Err(ClientError::SessionClosed(1))
        ));
    }

    #[tokio::test]
    async fn scroll_near_top_loads_older_with_anchor() {
        let gateway = Arc::new(StubGateway::new(60, 60));
        let (mut session, _events, _effects) = open(gateway).await;
        assert_eq!(session.messages().len(), 20);

        session.viewport_mut().set_container_height(400.0);
        session.on_scroll(40.0).await.unwrap();

        assert_eq!(session.messages().len(), 40);
        assert_eq!(session.messages().first().map(|m| m.seq), Some(21));
        // 锚点修正：scroll_top 加上新接入 20 行的高度
        assert_eq!(session.viewport_mut().scroll_top(), 40.0 + 20.0 * 80.0);
        assert_eq!(session.state(), SessionState::Ready);
    }
}
