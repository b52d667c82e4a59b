use std::fs;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use deskchat_client::{
    cli::{Cli, Commands},
    config::{self, ClientConfig},
    logging,
    model::{ChatMessage, SideEffect},
    ChatSession, ChatWsClient, RestGateway, SessionState,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载 .env 文件（如果存在）
    let _ = dotenvy::dotenv();

    // 解析命令行参数
    let cli = Cli::parse();

    // 处理子命令
    if let Some(command) = &cli.command {
        match command {
            Commands::GenerateConfig { path } => {
                return generate_config(path);
            }
            Commands::ValidateConfig { path } => {
                return validate_config(path);
            }
            Commands::ShowConfig => {
                return show_config(&cli);
            }
        }
    }

    // 快速读取配置文件的 [logging] 段（不加载完整配置）
    let early_log = config::load_early_logging_config(cli.config_file.as_deref());

    // 合并日志配置（优先级：CLI > 配置文件 > 默认值）
    let log_level = cli
        .get_log_level()
        .or(early_log.level)
        .unwrap_or_else(|| "info".to_string());
    let log_format = cli.get_log_format().or(early_log.format);

    logging::init_logging(&log_level, log_format.as_deref(), cli.quiet)?;

    tracing::info!("🚀 DeskChat Client starting...");

    // 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    let config = ClientConfig::load(&cli).context("加载配置失败")?;
    if let Err(e) = config.validate() {
        tracing::error!("❌ 配置无效: {}", e);
        process::exit(1);
    }

    let Some(room_id) = cli.room else {
        tracing::error!("❌ 缺少会话 ID（--room <ID>）");
        process::exit(1);
    };

    tracing::info!("📊 Client Configuration:");
    tracing::info!("  - API: {}", config.api_base_url);
    tracing::info!("  - WS: {}", config.ws_url);
    tracing::info!("  - User: {}", config.user_email);
    tracing::info!("  - Room: {}", room_id);
    tracing::info!("  - Page Size: {}", config.page_size);

    if let Err(e) = run_chat(&config, room_id).await {
        tracing::error!("❌ 会话运行失败: {}", e);
        process::exit(1);
    }

    Ok(())
}

/// 终端聊天循环
async fn run_chat(config: &ClientConfig, room_id: u64) -> Result<()> {
    let gateway = Arc::new(RestGateway::new(config.api_url()?, config.token.clone()));
    let ws = ChatWsClient::new(config.ws_config()?);
    let (effects_tx, mut effects_rx) = mpsc::unbounded_channel();

    let (mut session, mut events_rx) = ChatSession::open(
        gateway,
        ws,
        room_id,
        config.user_email.clone(),
        config.page_size,
        effects_tx,
    )
    .await?;
    session.set_ai_enabled(config.ai_enabled);

    // 初始历史
    let mut printed_seq = 0;
    print_new_messages(session.messages(), &mut printed_seq);

    println!("--- 命令: /older /retry /invite <email,..> /leave /quit ---");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            event = events_rx.recv() => {
                let Some(event) = event else { break };
                session.handle_event(event).await;
                print_new_messages(session.messages(), &mut printed_seq);
            }
            effect = effects_rx.recv() => {
                let Some(effect) = effect else { break };
                match effect {
                    SideEffect::TicketPrompt => println!("💡 AI 建议生成工单草稿（查看工单面板）"),
                    SideEffect::ConnectionChanged(true) => println!("✅ 推送通道已连接"),
                    SideEffect::ConnectionChanged(false) => println!("⚠️ 推送通道断开，重连中..."),
                    SideEffect::ConnectionExhausted => {
                        println!("❌ 重连次数耗尽，输入 /retry 手动重试")
                    }
                    SideEffect::SendFailed(reason) => println!("❌ 发送失败: {}", reason),
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match line {
                    "/quit" => break,
                    "/older" => {
                        let before = session.messages().len();
                        if let Err(e) = session.load_older().await {
                            tracing::warn!("向前翻页失败: {}", e);
                        } else {
                            let added = session.messages().len() - before;
                            println!("--- 加载了 {} 条更早的消息 ---", added);
                        }
                    }
                    "/retry" => {
                        session.retry_connection();
                        println!("🔄 重新连接中...");
                    }
                    "/leave" => {
                        session.leave().await?;
                        println!("👋 已退出会话");
                        break;
                    }
                    _ if line.starts_with("/invite ") => {
                        let emails: Vec<String> = line["/invite ".len()..]
                            .split(',')
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect();
                        match session.invite(&emails).await {
                            Ok(()) => println!("✅ 已邀请 {} 人", emails.len()),
                            Err(e) => println!("❌ 邀请失败: {}", e),
                        }
                    }
                    text => {
                        if let Err(e) = session.send_text(text).await {
                            tracing::warn!("发送失败: {}", e);
                        } else {
                            print_new_messages(session.messages(), &mut printed_seq);
                        }
                    }
                }
            }
        }

        if session.state() == SessionState::Error {
            break;
        }
    }

    session.close();
    Ok(())
}

/// 打印 seq 超过已打印游标的新消息，并推进游标
///
/// 阈值在遍历前快照，遍历过程中只推进游标，
/// 同一条消息不会被重复打印。
fn print_new_messages(messages: &[ChatMessage], printed_seq: &mut u64) {
    let threshold = *printed_seq;
    for msg in messages.iter().filter(|m| m.seq > threshold) {
        println!("[{}] {}: {}", msg.seq, msg.sender_name, msg.body);
        *printed_seq = (*printed_seq).max(msg.seq);
    }
}

/// 生成默认配置文件
fn generate_config(path: &str) -> Result<()> {
    let default_config = r#"# DeskChat Client 配置文件
# 此文件由 deskchat generate-config 生成

[server]
api_url = "http://localhost:8080/"
ws_url = "ws://localhost:8080/ws"
# token = "在 .env 里用 DESKCHAT_TOKEN 配置更安全"
# user = "me@desk.io"

[chat]
page_size = 20
ai_enabled = false

[connection]
reconnect_delay_secs = 5
max_reconnect_attempts = 5
heartbeat_send_ms = 4000
heartbeat_recv_ms = 4000

[logging]
level = "info"
format = "compact"
"#;

    fs::write(path, default_config).with_context(|| format!("无法写入配置文件: {}", path))?;

    println!("✅ 配置文件已生成: {}", path);
    Ok(())
}

/// 验证配置文件
fn validate_config(path: &str) -> Result<()> {
    let config = ClientConfig::from_toml_file(path)
        .with_context(|| format!("配置文件验证失败: {}", path))?;

    println!("✅ 配置文件有效: {}", path);
    println!("📊 配置摘要:");
    println!("  - API: {}", config.api_base_url);
    println!("  - WS: {}", config.ws_url);
    println!("  - Page Size: {}", config.page_size);
    println!("  - Max Reconnect: {}", config.max_reconnect_attempts);

    Ok(())
}

/// 显示最终配置（合并后的配置）
fn show_config(cli: &Cli) -> Result<()> {
    // 初始化基本日志（用于显示配置）
    logging::init_logging("info", None, false)?;

    let config = ClientConfig::load(cli).context("加载配置失败")?;

    println!("📊 最终配置（合并后的配置）:");
    println!("{}", serde_json::to_string_pretty(&config)?);

    Ok(())
}
