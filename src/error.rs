use thiserror::Error;

/// 客户端错误类型
///
/// 传输层错误（断线、握手失败）可通过有界重连恢复；
/// 其余错误在组件边界处理，不向渲染层抛出。
#[derive(Debug, Error)]
pub enum ClientError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// HTTP 请求失败（REST 网关）
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// 后端返回非预期状态码
    #[error("Unexpected status {status} from {endpoint}")]
    UnexpectedStatus { endpoint: String, status: u16 },

    /// WebSocket 传输错误
    #[error("WebSocket transport error: {0}")]
    Transport(String),

    /// 握手认证失败（不重试，需要调用方重新认证）
    #[error("Handshake authentication failed: {0}")]
    HandshakeAuth(String),

    /// STOMP 协议错误
    #[error("STOMP protocol error: {0}")]
    Protocol(String),

    /// 入站消息解析失败（单条丢弃，连接保持）
    #[error("Failed to parse inbound payload: {0}")]
    Parse(#[from] serde_json::Error),

    /// 会话已关闭（切换房间后到达的过期响应）
    #[error("Session closed for room {0}")]
    SessionClosed(u64),

    /// 消息发送失败（WS 与 REST 回退均失败，需向用户呈现）
    #[error("Message send failed: {0}")]
    SendFailed(String),

    /// URL 解析错误
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// 是否可通过重连恢复
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ClientError>;
