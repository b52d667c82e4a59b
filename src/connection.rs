use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use http::header::AUTHORIZATION;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{ClientError, Result};
use crate::model::{MessageDto, SendMessageRequest};
use crate::stomp::{self, Frame};

/// 重连固定退避
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// 重连次数上限
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
/// 心跳（毫秒，双向）
pub const HEARTBEAT_MS: (u32, u32) = (4000, 4000);

/// 推送连接配置
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// WebSocket 端点（含 /ws 路径）
    pub endpoint: Url,
    pub bearer: String,
    pub heartbeat: (u32, u32),
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl WsConfig {
    pub fn new(endpoint: Url, bearer: impl Into<String>) -> Self {
        Self {
            endpoint,
            bearer: bearer.into(),
            heartbeat: HEARTBEAT_MS,
            reconnect_delay: RECONNECT_DELAY,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    /// 重连次数耗尽，等待手动 retry
    Exhausted,
}

/// 推送通道事件（交给会话层处理）
#[derive(Debug)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    /// 已解析的推送负载
    Push(MessageDto),
    /// 重连耗尽，等待手动 retry
    Exhausted,
}

/// 有界重连策略
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    attempts: u32,
    max_attempts: u32,
    delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            delay,
        }
    }

    /// 连接成功后归零
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// 下一次重试的退避；超出上限返回 None
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.delay)
    }
}

struct Shared {
    status: ConnectionStatus,
    room_id: Option<u64>,
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    closed: bool,
}

/// 推送通道客户端（会话专属，构造注入，不做模块级单例）
///
/// 同一客户端同一时刻至多一条活动连接：相同房间的重复
/// connect 为 no-op，不同房间先拆除旧会话。
pub struct ChatWsClient {
    config: WsConfig,
    shared: Arc<Mutex<Shared>>,
    task: Option<JoinHandle<()>>,
}

impl ChatWsClient {
    pub fn new(config: WsConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Mutex::new(Shared {
                status: ConnectionStatus::Idle,
                room_id: None,
                outbound: None,
                closed: false,
            })),
            task: None,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.lock().status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// 建立到指定房间的推送连接（幂等）
    pub fn connect(&mut self, room_id: u64, events: mpsc::UnboundedSender<ConnectionEvent>) {
        {
            let shared = self.shared.lock();
            if shared.room_id == Some(room_id)
                && matches!(
                    shared.status,
                    ConnectionStatus::Connected
                        | ConnectionStatus::Connecting
                        | ConnectionStatus::Reconnecting
                )
            {
                return;
            }
        }
        // 换房：先拆除旧会话
        self.disconnect();

        {
            let mut shared = self.shared.lock();
            shared.room_id = Some(room_id);
            shared.status = ConnectionStatus::Connecting;
            shared.closed = false;
        }

        let config = self.config.clone();
        let shared = Arc::clone(&self.shared);
        self.task = Some(tokio::spawn(run_loop(config, room_id, shared, events)));
    }

    /// 重连耗尽后的手动重试：归零计数并重新连接
    pub fn retry(&mut self, events: mpsc::UnboundedSender<ConnectionEvent>) {
        let room_id = {
            let shared = self.shared.lock();
            if shared.status != ConnectionStatus::Exhausted {
                return;
            }
            shared.room_id
        };
        if let Some(room_id) = room_id {
            self.shared.lock().status = ConnectionStatus::Idle;
            self.connect(room_id, events);
        }
    }

    /// 经推送通道发送；无活动连接时同步返回 false（调用方回退 REST）。
    /// 任何内部失败都折算为 false，不跨边界抛出。
    pub fn send(&self, room_id: u64, request: &SendMessageRequest) -> bool {
        let shared = self.shared.lock();
        if shared.status != ConnectionStatus::Connected || shared.room_id != Some(room_id) {
            return false;
        }
        let Some(outbound) = shared.outbound.as_ref() else {
            return false;
        };
        let body = match serde_json::to_string(request) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "failed to encode outgoing message");
                return false;
            }
        };
        let frame = Frame::send(&format!("/app/chat/send/{room_id}"), body);
        outbound.send(frame).is_ok()
    }

    /// 拆除连接（房间切换或会话销毁）
    pub fn disconnect(&mut self) {
        {
            let mut shared = self.shared.lock();
            shared.closed = true;
            shared.status = ConnectionStatus::Idle;
            shared.room_id = None;
            // 丢弃发送端：读写循环看到通道关闭后发 DISCONNECT 并退出
            shared.outbound = None;
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ChatWsClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

enum SessionEnd {
    /// 主动断开
    Closed,
    /// 连接中途掉线（可重连）
    Dropped,
}

/// 连接生命周期循环：connect → 订阅 → 读写，掉线后固定退避重连，
/// 上限 5 次；认证类握手失败不重试。
async fn run_loop(
    config: WsConfig,
    room_id: u64,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) {
    let mut policy = ReconnectPolicy::new(config.max_reconnect_attempts, config.reconnect_delay);

    loop {
        if shared.lock().closed {
            return;
        }

        match run_session(&config, room_id, &shared, &events, &mut policy).await {
            Ok(SessionEnd::Closed) => {
                debug!(room_id, "push channel closed");
                return;
            }
            Ok(SessionEnd::Dropped) | Err(ClientError::Transport(_)) | Err(ClientError::Protocol(_)) => {
                let _ = events.send(ConnectionEvent::Disconnected);
            }
            Err(ClientError::HandshakeAuth(msg)) => {
                // 认证失败不重试：调用方需重新认证后再 connect
                error!(room_id, %msg, "handshake authentication failed, not retrying");
                let mut s = shared.lock();
                s.status = ConnectionStatus::Idle;
                s.outbound = None;
                let _ = events.send(ConnectionEvent::Disconnected);
                return;
            }
            Err(e) => {
                warn!(room_id, error = %e, "push channel error");
                let _ = events.send(ConnectionEvent::Disconnected);
            }
        }

        {
            let mut s = shared.lock();
            s.outbound = None;
            if s.closed {
                s.status = ConnectionStatus::Idle;
                return;
            }
            s.status = ConnectionStatus::Reconnecting;
        }

        match policy.next_delay() {
            Some(delay) => {
                info!(
                    room_id,
                    attempt = policy.attempts(),
                    max = config.max_reconnect_attempts,
                    "scheduling reconnect"
                );
                tokio::time::sleep(delay).await;
            }
            None => {
                // 重试耗尽：仅记录日志并显式上报状态
                error!(room_id, "reconnect attempts exhausted");
                shared.lock().status = ConnectionStatus::Exhausted;
                let _ = events.send(ConnectionEvent::Exhausted);
                return;
            }
        }
    }
}

async fn run_session(
    config: &WsConfig,
    room_id: u64,
    shared: &Arc<Mutex<Shared>>,
    events: &mpsc::UnboundedSender<ConnectionEvent>,
    policy: &mut ReconnectPolicy,
) -> Result<SessionEnd> {
    // 握手请求不经过 REST 管线，Bearer 凭证直接附在升级请求头上
    let mut request = config
        .endpoint
        .as_str()
        .into_client_request()
        .map_err(|e| ClientError::Transport(e.to_string()))?;
    request.headers_mut().insert(
        AUTHORIZATION,
        format!("Bearer {}", config.bearer)
            .parse()
            .map_err(|_| ClientError::Transport("invalid bearer token".into()))?,
    );

    let (ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| match e {
            tungstenite::Error::Http(resp) if resp.status().as_u16() == 401 || resp.status().as_u16() == 403 => {
                ClientError::HandshakeAuth(format!("upgrade rejected: {}", resp.status()))
            }
            other => ClientError::Transport(other.to_string()),
        })?;
    let (mut sink, mut stream) = ws.split();

    // STOMP 握手
    let host = config.endpoint.host_str().unwrap_or("desk");
    let connect = Frame::connect(host, &config.bearer, config.heartbeat);
    sink.send(WsMessage::Text(connect.serialize()))
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))?;

    let connected = wait_for_connected(&mut stream).await?;
    let server_heartbeat = stomp::parse_heartbeat_header(&connected);
    let (send_interval_ms, recv_timeout_ms) =
        stomp::negotiate_heartbeat(config.heartbeat, server_heartbeat);

    // 订阅会话专属 topic
    let subscription_id = format!("sub-{}", Uuid::new_v4());
    let subscribe = Frame::subscribe(&subscription_id, &format!("/topic/chat/{room_id}"));
    sink.send(WsMessage::Text(subscribe.serialize()))
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))?;

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
    {
        let mut s = shared.lock();
        if s.closed {
            return Ok(SessionEnd::Closed);
        }
        s.outbound = Some(outbound_tx);
        s.status = ConnectionStatus::Connected;
    }
    policy.reset();
    info!(room_id, %subscription_id, "push channel connected");
    let _ = events.send(ConnectionEvent::Connected);

    let mut heartbeat = interval(Duration::from_millis(send_interval_ms.max(1000) as u64));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let recv_timeout = Duration::from_millis((recv_timeout_ms as u64).max(1000) * 2);
    let mut last_received = Instant::now();

    loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(frame) => {
                        sink.send(WsMessage::Text(frame.serialize()))
                            .await
                            .map_err(|e| ClientError::Transport(e.to_string()))?;
                    }
                    None => {
                        // 发送端被 disconnect() 丢弃：礼貌收尾
                        let _ = sink.send(WsMessage::Text(Frame::disconnect().serialize())).await;
                        let _ = sink.close().await;
                        return Ok(SessionEnd::Closed);
                    }
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        last_received = Instant::now();
                        handle_inbound(&text, events);
                    }
                    Some(Ok(WsMessage::Ping(payload))) => {
                        last_received = Instant::now();
                        let _ = sink.send(WsMessage::Pong(payload)).await;
                    }
                    Some(Ok(WsMessage::Pong(_))) => {
                        last_received = Instant::now();
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        return Ok(SessionEnd::Dropped);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(ClientError::Transport(e.to_string()));
                    }
                }
            }
            _ = heartbeat.tick() => {
                if send_interval_ms > 0 {
                    sink.send(WsMessage::Text(stomp::HEARTBEAT.into()))
                        .await
                        .map_err(|e| ClientError::Transport(e.to_string()))?;
                }
                if recv_timeout_ms > 0 && last_received.elapsed() > recv_timeout {
                    // 静默断连：心跳超时按掉线处理
                    return Err(ClientError::Transport("heartbeat timeout".into()));
                }
            }
        }
    }
}

async fn wait_for_connected<S>(stream: &mut S) -> Result<Frame>
where
    S: StreamExt<Item = std::result::Result<WsMessage, tungstenite::Error>> + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(WsMessage::Text(text))) => match Frame::parse(&text)? {
                None => continue,
                Some(frame) if frame.command == "CONNECTED" => return Ok(frame),
                Some(frame) if frame.command == "ERROR" => {
                    let message = frame
                        .get_header("message")
                        .unwrap_or("broker rejected connection")
                        .to_string();
                    // 代理拒绝 CONNECT 多为凭证问题
                    return Err(ClientError::HandshakeAuth(message));
                }
                Some(frame) => {
                    return Err(ClientError::Protocol(format!(
                        "unexpected frame before CONNECTED: {}",
                        frame.command
                    )))
                }
            },
            Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => continue,
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(ClientError::Transport(e.to_string())),
            None => return Err(ClientError::Transport("closed during handshake".into())),
        }
    }
}

/// 入站帧处理：MESSAGE 解析为推送负载；解析失败只丢该条，连接保持
fn handle_inbound(text: &str, events: &mpsc::UnboundedSender<ConnectionEvent>) {
    let frame = match Frame::parse(text) {
        Ok(Some(frame)) => frame,
        Ok(None) => return, // 心跳
        Err(e) => {
            warn!(error = %e, "dropping malformed frame");
            return;
        }
    };

    match frame.command.as_str() {
        "MESSAGE" => match serde_json::from_str::<MessageDto>(&frame.body) {
            Ok(dto) => {
                let _ = events.send(ConnectionEvent::Push(dto));
            }
            Err(e) => {
                warn!(error = %e, "dropping unparseable push payload");
            }
        },
        "ERROR" => {
            warn!(
                message = frame.get_header("message").unwrap_or(""),
                "broker error frame"
            );
        }
        "RECEIPT" => {}
        other => debug!(command = other, "ignoring frame"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_policy_is_bounded() {
        let mut policy = ReconnectPolicy::new(5, Duration::from_secs(5));
        // 连续 5 次失败后不再安排重试
        for attempt in 1..=5 {
            assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
            assert_eq!(policy.attempts(), attempt);
        }
        assert_eq!(policy.next_delay(), None);
        assert_eq!(policy.next_delay(), None);
    }

    #[test]
    fn reconnect_policy_resets_on_success() {
        let mut policy = ReconnectPolicy::new(5, Duration::from_secs(5));
        policy.next_delay();
        policy.next_delay();
        policy.reset();
        assert_eq!(policy.attempts(), 0);
        assert!(policy.next_delay().is_some());
    }

    #[tokio::test]
    async fn send_without_connection_returns_false() {
        let config = WsConfig::new(Url::parse("ws://localhost:9/ws").unwrap(), "tok");
        let client = ChatWsClient::new(config);
        assert!(!client.send(1, &SendMessageRequest::text("hi", false)));
        assert!(!client.is_connected());
    }

    #[test]
    fn inbound_parse_failure_is_swallowed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let frame = Frame::new("MESSAGE").with_body("not-json");
        handle_inbound(&frame.serialize(), &tx);
        assert!(rx.try_recv().is_err());

        let ok = Frame::new("MESSAGE").with_body(r#"{"id":1,"messageSeq":2}"#);
        handle_inbound(&ok.serialize(), &tx);
        assert!(matches!(rx.try_recv(), Ok(ConnectionEvent::Push(_))));
    }
}
