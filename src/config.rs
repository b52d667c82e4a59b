use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::connection::WsConfig;

/// 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// REST API 基础地址（以 / 结尾）
    pub api_base_url: String,
    /// WebSocket 推送端点（含 /ws 路径）
    pub ws_url: String,
    /// Bearer 访问令牌
    pub token: String,
    /// 当前用户（邮箱）
    pub user_email: String,
    /// 历史分页大小
    pub page_size: u32,
    /// 重连间隔（秒）
    pub reconnect_delay_secs: u64,
    /// 重连次数上限
    pub max_reconnect_attempts: u32,
    /// 心跳（发送间隔, 期望接收间隔），毫秒
    pub heartbeat_ms: (u32, u32),
    /// 默认启用 AI 消息处理
    pub ai_enabled: bool,
    /// 日志级别
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/".to_string(),
            ws_url: "ws://localhost:8080/ws".to_string(),
            token: String::new(),
            user_email: String::new(),
            page_size: 20,
            reconnect_delay_secs: 5,
            max_reconnect_attempts: 5,
            heartbeat_ms: (4000, 4000),
            ai_enabled: false,
            log_level: "info".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析 API 基础地址（尾部补 /，保证 join 语义）
    pub fn api_url(&self) -> Result<Url> {
        let raw = if self.api_base_url.ends_with('/') {
            self.api_base_url.clone()
        } else {
            format!("{}/", self.api_base_url)
        };
        Url::parse(&raw).with_context(|| format!("无效的 API 地址: {}", self.api_base_url))
    }

    /// 推送连接配置
    pub fn ws_config(&self) -> Result<WsConfig> {
        let endpoint =
            Url::parse(&self.ws_url).with_context(|| format!("无效的 WS 地址: {}", self.ws_url))?;
        let mut ws = WsConfig::new(endpoint, self.token.clone());
        ws.heartbeat = self.heartbeat_ms;
        ws.reconnect_delay = std::time::Duration::from_secs(self.reconnect_delay_secs);
        ws.max_reconnect_attempts = self.max_reconnect_attempts;
        Ok(ws)
    }

    /// 从 TOML 文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("无法读取配置文件: {:?}", path.as_ref()))?;

        let toml_config: TomlConfig =
            toml::from_str(&content).with_context(|| "配置文件格式错误")?;

        Ok(toml_config.into())
    }

    /// 从环境变量合并（DESKCHAT_ 前缀）
    pub fn merge_from_env(&mut self) {
        if let Ok(url) = env::var("DESKCHAT_API_URL") {
            self.api_base_url = url;
        }
        if let Ok(url) = env::var("DESKCHAT_WS_URL") {
            self.ws_url = url;
        }
        if let Ok(token) = env::var("DESKCHAT_TOKEN") {
            self.token = token;
        }
        if let Ok(email) = env::var("DESKCHAT_USER") {
            self.user_email = email;
        }
        if let Ok(size) = env::var("DESKCHAT_PAGE_SIZE") {
            self.page_size = size.parse().unwrap_or(self.page_size);
        }
        if let Ok(level) = env::var("DESKCHAT_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    /// 从命令行参数合并配置
    pub fn merge_from_cli(&mut self, cli: &crate::cli::Cli) {
        if let Some(url) = &cli.api_url {
            self.api_base_url = url.clone();
        }
        if let Some(url) = &cli.ws_url {
            self.ws_url = url.clone();
        }
        if let Some(token) = &cli.token {
            self.token = token.clone();
        }
        if let Some(user) = &cli.user {
            self.user_email = user.clone();
        }
        if let Some(size) = cli.page_size {
            self.page_size = size;
        }
        if let Some(delay) = cli.reconnect_delay {
            self.reconnect_delay_secs = delay;
        }
        if let Some(max) = cli.max_reconnect {
            self.max_reconnect_attempts = max;
        }
        if cli.ai {
            self.ai_enabled = true;
        }
        if let Some(level) = cli.get_log_level() {
            self.log_level = level;
        }
    }

    /// 基本校验：地址可解析、凭证非空
    pub fn validate(&self) -> Result<()> {
        self.api_url()?;
        Url::parse(&self.ws_url).with_context(|| format!("无效的 WS 地址: {}", self.ws_url))?;
        if self.token.is_empty() {
            anyhow::bail!("缺少访问令牌（--token 或 DESKCHAT_TOKEN）");
        }
        if self.user_email.is_empty() {
            anyhow::bail!("缺少当前用户（--user 或 DESKCHAT_USER）");
        }
        if self.page_size == 0 {
            anyhow::bail!("page_size 必须大于 0");
        }
        Ok(())
    }

    /// 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    pub fn load(cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if let Some(config_file) = &cli.config_file {
            if Path::new(config_file).exists() {
                info!("📄 从配置文件加载: {}", config_file);
                Self::from_toml_file(config_file)?
            } else {
                tracing::warn!("⚠️ 配置文件不存在: {}", config_file);
                Self::new()
            }
        } else if Path::new("deskchat.toml").exists() {
            info!("📄 从默认配置文件加载: deskchat.toml");
            Self::from_toml_file("deskchat.toml")?
        } else {
            Self::new()
        };

        config.merge_from_env();
        config.merge_from_cli(cli);

        Ok(config)
    }
}

/// 早期日志配置（初始化日志系统前快速读取 [logging] 段）
#[derive(Debug, Default)]
pub struct EarlyLoggingConfig {
    pub level: Option<String>,
    pub format: Option<String>,
}

/// 快速读取配置文件的 [logging] 段（不加载完整配置）
pub fn load_early_logging_config(config_file: Option<&str>) -> EarlyLoggingConfig {
    let path = config_file.unwrap_or("deskchat.toml");
    let Ok(content) = fs::read_to_string(path) else {
        return EarlyLoggingConfig::default();
    };
    let Ok(toml_config) = toml::from_str::<TomlConfig>(&content) else {
        return EarlyLoggingConfig::default();
    };
    match toml_config.logging {
        Some(logging) => EarlyLoggingConfig {
            level: logging.level,
            format: logging.format,
        },
        None => EarlyLoggingConfig::default(),
    }
}

/// TOML 配置文件结构（用于反序列化）
#[derive(Debug, Deserialize)]
struct TomlConfig {
    server: Option<TomlServerConfig>,
    chat: Option<TomlChatConfig>,
    connection: Option<TomlConnectionConfig>,
    logging: Option<TomlLoggingConfig>,
}

#[derive(Debug, Deserialize)]
struct TomlServerConfig {
    api_url: Option<String>,
    ws_url: Option<String>,
    token: Option<String>,
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TomlChatConfig {
    page_size: Option<u32>,
    ai_enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct TomlConnectionConfig {
    reconnect_delay_secs: Option<u64>,
    max_reconnect_attempts: Option<u32>,
    heartbeat_send_ms: Option<u32>,
    heartbeat_recv_ms: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TomlLoggingConfig {
    level: Option<String>,
    format: Option<String>,
}

impl From<TomlConfig> for ClientConfig {
    fn from(toml: TomlConfig) -> Self {
        let mut config = Self::default();

        if let Some(server) = toml.server {
            if let Some(url) = server.api_url {
                config.api_base_url = url;
            }
            if let Some(url) = server.ws_url {
                config.ws_url = url;
            }
            if let Some(token) = server.token {
                config.token = token;
            }
            if let Some(user) = server.user {
                config.user_email = user;
            }
        }

        if let Some(chat) = toml.chat {
            if let Some(size) = chat.page_size {
                config.page_size = size;
            }
            if let Some(enabled) = chat.ai_enabled {
                config.ai_enabled = enabled;
            }
        }

        if let Some(conn) = toml.connection {
            if let Some(delay) = conn.reconnect_delay_secs {
                config.reconnect_delay_secs = delay;
            }
            if let Some(max) = conn.max_reconnect_attempts {
                config.max_reconnect_attempts = max;
            }
            if let Some(send) = conn.heartbeat_send_ms {
                config.heartbeat_ms.0 = send;
            }
            if let Some(recv) = conn.heartbeat_recv_ms {
                config.heartbeat_ms.1 = recv;
            }
        }

        if let Some(logging) = toml.logging {
            if let Some(level) = logging.level {
                config.log_level = level;
            }
        }

        config
    }
}
