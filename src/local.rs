//! 本地辅助命令执行
//!
//! 远程通道之外的宿主机命令（容器列表、rsync 等）通过这里执行。
//! 支持可选的固定墙钟超时：到期后杀死子进程并等待其真正退出，
//! 返回的输出保证是最终结果。

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::RemoteDevError;

/// 超时轮询间隔
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 本地命令输出
#[derive(Debug, Clone)]
pub struct LocalOutput {
    /// 标准输出行
    pub stdout_lines: Vec<String>,
    /// 标准错误行
    pub stderr_lines: Vec<String>,
}

/// 执行本地命令
///
/// 命令按空白切分为程序与参数，标准输出和标准错误分别按行收集。
///
/// # 参数
/// - `cmd`: 完整命令字符串
/// - `timeout`: 可选墙钟超时；到期后子进程被杀死并等待退出
///
/// # 返回
/// - `Ok(LocalOutput)`: 命令完成（退出码不影响结果，由调用方检查输出）
/// - `Err(RemoteDevError)`: 进程无法启动或等待失败
pub fn run_local_cmd(cmd: &str, timeout: Option<Duration>) -> Result<LocalOutput, RemoteDevError> {
    let mut parts = cmd.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| RemoteDevError::LocalCommandFailed("空命令".to_string()))?;

    let mut child = Command::new(program)
        .args(parts)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| RemoteDevError::LocalCommandFailed(format!("{}: {}", program, e)))?;

    if let Some(timeout) = timeout {
        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        tracing::warn!("[Local] 命令超时，终止子进程: {}", cmd);
                        let _ = child.kill();
                        break;
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(RemoteDevError::LocalCommandFailed(format!(
                        "等待子进程失败: {}",
                        e
                    )));
                }
            }
        }
    }

    // kill 之后仍然等待子进程真正退出，输出才是最终结果
    let output = child
        .wait_with_output()
        .map_err(|e| RemoteDevError::LocalCommandFailed(format!("收集输出失败: {}", e)))?;

    Ok(LocalOutput {
        stdout_lines: as_lines(&output.stdout),
        stderr_lines: as_lines(&output.stderr),
    })
}

/// 字节流按行切分，丢弃末尾空行
fn as_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .split('\n')
        .map(|l| l.trim_end_matches('\r').to_string())
        .filter(|l| !l.is_empty())
        .collect()
}
