use clap::{Parser, Subcommand};

// 确保 Parser trait 被使用
impl Cli {
    /// 解析命令行参数
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

/// DeskChat Client - 客服工单系统聊天客户端
#[derive(Parser, Debug, Default)]
#[command(name = "deskchat")]
#[command(version)]
#[command(about = "Desk 客服系统的实时聊天同步客户端", long_about = None)]
pub struct Cli {
    /// 配置文件路径
    #[arg(long, value_name = "FILE", help = "指定配置文件路径")]
    pub config_file: Option<String>,

    /// REST API 基础地址
    #[arg(long, value_name = "URL", help = "后端 API 基础地址")]
    pub api_url: Option<String>,

    /// WebSocket 推送端点
    #[arg(long, value_name = "URL", help = "WebSocket 推送端点（含 /ws 路径）")]
    pub ws_url: Option<String>,

    /// 访问令牌
    #[arg(long, value_name = "TOKEN", help = "Bearer 访问令牌（优先用环境变量）")]
    pub token: Option<String>,

    /// 当前用户（邮箱）
    #[arg(long, value_name = "EMAIL", help = "当前登录用户的邮箱")]
    pub user: Option<String>,

    /// 要打开的会话 ID
    #[arg(long, value_name = "ID", help = "启动后进入的会话 ID")]
    pub room: Option<u64>,

    /// 历史分页大小
    #[arg(long, value_name = "NUM", help = "每页拉取的历史消息条数")]
    pub page_size: Option<u32>,

    /// 重连间隔（秒）
    #[arg(long, value_name = "SECS", help = "推送通道断线重连间隔")]
    pub reconnect_delay: Option<u64>,

    /// 最大重连次数
    #[arg(long, value_name = "NUM", help = "重连次数上限，耗尽后等待手动重试")]
    pub max_reconnect: Option<u32>,

    /// 启用 AI 消息处理
    #[arg(long, help = "发送的消息交给 AI 处理（工单草稿建议）")]
    pub ai: bool,

    /// 日志级别
    #[arg(
        long,
        value_name = "LEVEL",
        help = "日志级别: trace, debug, info, warn, error"
    )]
    pub log_level: Option<String>,

    /// 日志格式
    #[arg(long, value_name = "FORMAT", help = "日志格式: pretty, json, compact")]
    pub log_format: Option<String>,

    /// 详细输出（可重复使用：-v, -vv, -vvv）
    #[arg(short, action = clap::ArgAction::Count, help = "详细输出级别")]
    pub verbose: u8,

    /// 静默模式
    #[arg(long, short = 'q', help = "静默模式（不输出日志）")]
    pub quiet: bool,

    /// 开发模式（等同于 --log-level debug --log-format pretty）
    #[arg(long, help = "启用开发模式")]
    pub dev: bool,

    /// 子命令
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 生成默认配置文件
    GenerateConfig {
        /// 输出文件路径
        #[arg(value_name = "PATH", default_value = "deskchat.toml")]
        path: String,
    },
    /// 验证配置文件
    ValidateConfig {
        /// 配置文件路径
        #[arg(value_name = "PATH", default_value = "deskchat.toml")]
        path: String,
    },
    /// 显示最终配置（合并后的配置）
    ShowConfig,
}

impl Cli {
    /// 获取日志级别（考虑 verbose 和 quiet）
    pub fn get_log_level(&self) -> Option<String> {
        if self.quiet {
            return Some("error".to_string());
        }

        if self.dev {
            return Some("debug".to_string());
        }

        if let Some(level) = &self.log_level {
            return Some(level.clone());
        }

        // 根据 verbose 级别设置
        match self.verbose {
            0 => None, // 使用默认或配置文件
            1 => Some("info".to_string()),
            2 => Some("debug".to_string()),
            _ => Some("trace".to_string()),
        }
    }

    /// 获取日志格式
    pub fn get_log_format(&self) -> Option<String> {
        if self.dev {
            return Some("pretty".to_string());
        }
        self.log_format.clone()
    }
}
