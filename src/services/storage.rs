// 本地配置持久化服务

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ssh::SshConfig;

/// 获取配置目录路径
/// macOS: ~/Library/Application Support/remote-exec
/// Linux: ~/.config/remote-exec
/// Windows: C:\Users\<用户名>\AppData\Roaming\remote-exec
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("无法获取系统配置目录")?
        .join("remote-exec");
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir).context("无法创建配置目录")?;
    }
    Ok(config_dir)
}

/// 获取目标主机配置文件路径
pub fn get_host_file() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("host.json"))
}

/// 加载目标主机配置（默认路径）
pub fn load_host_config() -> Result<SshConfig> {
    load_host_config_from(&get_host_file()?)
}

/// 从指定文件加载目标主机配置
pub fn load_host_config_from(path: &Path) -> Result<SshConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("无法读取主机配置文件: {}", path.display()))?;
    let mut config: SshConfig =
        serde_json::from_str(&content).context("无法解析主机配置文件")?;
    config.private_key_path = expand_home(&config.private_key_path);
    config.validate().context("主机配置无效")?;
    Ok(config)
}

/// 展开私钥路径开头的 `~/`
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
