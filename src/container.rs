//! 容器生命周期控制
//!
//! 在任何会话使用容器之前确保其处于运行状态。
//!
//! ## 功能
//! - 通过容器 CLI 列出容器及其电源状态
//! - 目标处于停止状态时发出启动命令
//! - 启动后等待固定的稳定窗口（倒计时上报）

use std::time::Duration;

use crate::error::RemoteDevError;
use crate::local::run_local_cmd;
use crate::sink::SharedSink;

/// 列表输出中的停止状态标记
const STOPPED_MARKER: &str = "STOPPED";

/// 启动后的稳定窗口（秒）
const SETTLE_SECONDS: u64 = 5;

/// 容器生命周期控制器
pub struct ContainerLifecycleController {
    /// 容器命令行工具（`lxc` 或 `incus`）
    cli: String,
    /// 事件接收器
    sink: SharedSink,
}

impl ContainerLifecycleController {
    /// 创建控制器
    pub fn new(cli: impl Into<String>, sink: SharedSink) -> Self {
        Self {
            cli: cli.into(),
            sink,
        }
    }

    /// 确保容器处于运行状态
    ///
    /// 幂等：容器已在运行时不做任何事。列表或启动命令本身失败时
    /// 原样上抛，不做重试。
    ///
    /// # 返回
    /// - `Ok(true)`: 本次调用执行了启动
    /// - `Ok(false)`: 容器已在运行
    pub fn ensure_running(&self, container: &str) -> Result<bool, RemoteDevError> {
        let listing = run_local_cmd(&format!("{} list", self.cli), None)
            .map_err(|e| RemoteDevError::ContainerFailed(e.to_string()))?;

        let stopped = listing
            .stdout_lines
            .iter()
            .any(|line| line.contains(container) && line.contains(STOPPED_MARKER));

        if !stopped {
            return Ok(false);
        }

        tracing::info!("[Container] {} 处于停止状态，正在启动", container);
        self.sink
            .info(&format!("{} 处于停止状态，正在启动", container));

        run_local_cmd(&format!("{} start {}", self.cli, container), None)
            .map_err(|e| RemoteDevError::ContainerFailed(e.to_string()))?;

        self.sink.info("等待容器稳定...");
        for i in 0..SETTLE_SECONDS {
            std::thread::sleep(Duration::from_secs(1));
            self.sink.info(&format!("{}", SETTLE_SECONDS - i));
        }

        Ok(true)
    }
}
