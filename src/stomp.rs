use crate::error::{ClientError, Result};

/// STOMP 1.2 帧
///
/// 推送通道的线格式：原前端经 @stomp/stompjs 使用 STOMP over
/// SockJS，这里只实现客户端所需的最小子集
/// （CONNECT/CONNECTED/SUBSCRIBE/SEND/MESSAGE/ERROR/DISCONNECT）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// 心跳帧（单个 LF）
pub const HEARTBEAT: &str = "\n";

/// 头部值转义（STOMP 1.2：反斜杠、换行、回车、冒号）
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(ClientError::Protocol(format!(
                    "invalid header escape: \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

impl Frame {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// CONNECT：握手请求无法复用 API 客户端的请求管线，
    /// 凭证同时作为连接头携带。
    pub fn connect(host: &str, bearer: &str, heartbeat: (u32, u32)) -> Self {
        Frame::new("CONNECT")
            .header("accept-version", "1.2")
            .header("host", host)
            .header("Authorization", format!("Bearer {bearer}"))
            .header("heart-beat", format!("{},{}", heartbeat.0, heartbeat.1))
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new("SUBSCRIBE")
            .header("id", id)
            .header("destination", destination)
    }

    pub fn send(destination: &str, body: impl Into<String>) -> Self {
        let body = body.into();
        Frame::new("SEND")
            .header("destination", destination)
            .header("content-type", "application/json")
            .header("content-length", body.len().to_string())
            .with_body(body)
    }

    pub fn disconnect() -> Self {
        Frame::new("DISCONNECT")
    }

    /// 序列化为线格式
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.command);
        out.push('\n');
        for (name, value) in &self.headers {
            out.push_str(&escape(name));
            out.push(':');
            out.push_str(&escape(value));
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// 解析线格式；心跳帧返回 None
    pub fn parse(raw: &str) -> Result<Option<Frame>> {
        let raw = raw.trim_end_matches('\0');
        if raw.is_empty() || raw == "\n" || raw == "\r\n" {
            return Ok(None);
        }

        let (head, body) = raw
            .split_once("\n\n")
            .ok_or_else(|| ClientError::Protocol("missing frame header terminator".into()))?;

        let mut lines = head.lines();
        let command = lines
            .next()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ClientError::Protocol("empty frame command".into()))?
            .trim_end_matches('\r')
            .to_string();

        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ClientError::Protocol(format!("malformed header: {line}")))?;
            headers.push((unescape(name)?, unescape(value)?));
        }

        Ok(Some(Frame {
            command,
            headers,
            body: body.to_string(),
        }))
    }
}

/// 心跳协商（STOMP 1.2）
///
/// 返回 (发送间隔, 接收超时)，单位毫秒，0 表示关闭。
pub fn negotiate_heartbeat(client: (u32, u32), server: (u32, u32)) -> (u32, u32) {
    let (cx, cy) = client;
    let (sx, sy) = server;
    let send = if cx == 0 || sy == 0 { 0 } else { cx.max(sy) };
    let recv = if cy == 0 || sx == 0 { 0 } else { cy.max(sx) };
    (send, recv)
}

/// 解析 CONNECTED 帧的 heart-beat 头
pub fn parse_heartbeat_header(frame: &Frame) -> (u32, u32) {
    frame
        .get_header("heart-beat")
        .and_then(|v| {
            let (a, b) = v.split_once(',')?;
            Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
        })
        .unwrap_or((0, 0))
}
