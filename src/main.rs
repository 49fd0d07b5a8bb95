// remote-exec - 在目标主机上执行一条命令
//
// 用法: remote-exec [--config PATH] [--stream] <command...>

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use tracing::{error, info};

use remote_exec::services::storage;
use remote_exec::SshManager;

/// 命令行参数
#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    stream: bool,
    command: String,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut parsed = Args::default();
    let mut command = Vec::new();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" if command.is_empty() => {
                let path = args.next().context("--config 需要一个路径参数")?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--stream" | "-s" if command.is_empty() => parsed.stream = true,
            _ => command.push(arg),
        }
    }

    if command.is_empty() {
        bail!("用法: remote-exec [--config PATH] [--stream] <command...>");
    }
    parsed.command = command.join(" ");
    Ok(parsed)
}

async fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => storage::load_host_config_from(path)?,
        None => storage::load_host_config()?,
    };

    let manager = SshManager::global();
    let _status = manager.on_status_change(|connected| {
        let now = chrono::Local::now().format("%H:%M:%S");
        if connected {
            info!("[{}] SSH connected", now);
        } else {
            info!("[{}] SSH disconnected", now);
        }
    });

    manager
        .connect(config)
        .await
        .context("无法连接到目标主机")?;

    let result = if args.stream {
        match manager.exec_stream(&args.command).await {
            Ok(mut lines) => {
                let mut outcome = Ok(());
                while let Some(line) = lines.next().await {
                    match line {
                        Ok(line) => println!("{}", line),
                        Err(e) => {
                            outcome = Err(e);
                            break;
                        }
                    }
                }
                outcome
            }
            Err(e) => Err(e),
        }
    } else {
        manager.exec(&args.command).await.map(|stdout| print!("{}", stdout))
    };

    manager.disconnect().await;
    result.context("命令执行失败")
}

fn main() -> ExitCode {
    // 初始化日志系统
    // 可以通过 RUST_LOG 环境变量控制日志级别，例如：RUST_LOG=debug remote-exec uptime
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false) // 不显示 target（模块路径）
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(2);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("ssh-worker")
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create Tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
