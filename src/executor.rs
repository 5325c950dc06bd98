//! 远程命令执行
//!
//! 在已建立的通道上执行一条或一串 shell 命令，按行流式读取输出，
//! 分类严重级别并返回结构化结果。
//!
//! ## 功能
//! - 命令列表用 `&&` 无条件成功链接为单条复合命令
//! - 可选切换到会话远程工作目录执行
//! - 可选写入 stdin 负载并发送 EOF
//! - 标准输出与错误流交替非阻塞读取，行一就绪即上报
//! - 错误流上的警告行被容忍，其余行使 success 置 false
//! - 引用本地项目路径的错误行后追加可点击的本地文件交叉引用行
//!
//! 命令报告失败本身不会让本调用出错——只有传输层故障才会。
//! 是否中止属于上层策略。

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use ssh2::Session;
use std::io::Write as _;

use crate::classify::LineClassifier;
use crate::error::RemoteDevError;
use crate::paths::PathTranslator;
use crate::sink::SharedSink;

/// 无数据时的轮询休眠
const POLL_SLEEP: Duration = Duration::from_millis(10);

/// 命令请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    /// 命令列表，按序用 `&&` 链接（前一条成功才执行后一条）
    pub commands: Vec<String>,
    /// 是否先切换到会话的远程工作目录
    pub run_in_working_dir: bool,
    /// 失败时是否由调用方继续（本层从不因此报错，仅作标记传递）
    pub ignore_failures: bool,
    /// 是否在结果中单独返回错误流
    pub capture_stderr_separately: bool,
    /// 写入远程 stdin 的负载，写入后发送 EOF
    pub stdin_payload: Option<String>,
}

impl CommandRequest {
    /// 创建请求，其余标志取默认值
    pub fn new<S: Into<String>>(commands: impl IntoIterator<Item = S>) -> Self {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
            run_in_working_dir: false,
            ignore_failures: false,
            capture_stderr_separately: false,
            stdin_payload: None,
        }
    }

    /// 单条命令的便捷构造
    pub fn single(command: impl Into<String>) -> Self {
        Self::new([command.into()])
    }

    /// 在远程工作目录中执行
    pub fn in_working_dir(mut self) -> Self {
        self.run_in_working_dir = true;
        self
    }

    /// 失败时不中止
    pub fn ignoring_failures(mut self) -> Self {
        self.ignore_failures = true;
        self
    }

    /// 单独返回错误流
    pub fn with_stderr(mut self) -> Self {
        self.capture_stderr_separately = true;
        self
    }

    /// 设置 stdin 负载
    pub fn with_stdin(mut self, payload: impl Into<String>) -> Self {
        self.stdin_payload = Some(payload.into());
        self
    }
}

/// 命令结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// 标准输出行，按到达顺序
    pub stdout_lines: Vec<String>,
    /// 错误流行（仅当请求单独捕获时返回）
    pub stderr_lines: Option<Vec<String>>,
    /// 错误流上出现任何非警告行时为 false
    pub success: bool,
}

/// 把命令列表组合为单条复合命令
///
/// `working_dir` 给出时前缀目录切换。组合结果逐字等于
/// `cd <dir> && c1 && c2 && …`。
pub fn compose_command(commands: &[String], working_dir: Option<&str>) -> String {
    let chain = commands.join(" && ");
    match working_dir {
        Some(dir) => format!("cd {} && {}", dir, chain),
        None => chain,
    }
}

/// 命令执行器
///
/// 每个会话持有一个执行器实例，绑定该会话的远程工作目录。
pub struct CommandExecutor {
    /// 路径翻译器（用于交叉引用行）
    translator: Arc<dyn PathTranslator>,
    /// 行分类器
    classifier: Arc<dyn LineClassifier>,
    /// 事件接收器
    sink: SharedSink,
    /// 会话远程工作目录
    remote_root: String,
    /// 日志前缀（`user@host`）
    prompt: String,
}

impl CommandExecutor {
    /// 创建执行器
    pub fn new(
        translator: Arc<dyn PathTranslator>,
        classifier: Arc<dyn LineClassifier>,
        sink: SharedSink,
        remote_root: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            translator,
            classifier,
            sink,
            remote_root: remote_root.into(),
            prompt: prompt.into(),
        }
    }

    /// 执行命令请求
    ///
    /// 阻塞到两个流全部耗尽为止。远程命令没有超时机制，挂起的远程
    /// 命令会让调用方一直等待。
    pub fn run(
        &self,
        ssh: &Session,
        request: &CommandRequest,
    ) -> Result<CommandResult, RemoteDevError> {
        let composite = compose_command(
            &request.commands,
            request.run_in_working_dir.then_some(self.remote_root.as_str()),
        );
        self.sink.info(&format!("{} $ {}", self.prompt, composite));

        let mut channel = ssh.channel_session().map_err(|e| {
            RemoteDevError::ConnectionFailed(format!("创建通道失败: {}", e))
        })?;
        channel.exec(&composite).map_err(|e| {
            RemoteDevError::ConnectionFailed(format!("发送命令失败: {}", e))
        })?;

        if let Some(payload) = &request.stdin_payload {
            channel
                .write_all(payload.as_bytes())
                .map_err(|e| RemoteDevError::WriteFailed(e.to_string()))?;
            channel
                .send_eof()
                .map_err(|e| RemoteDevError::WriteFailed(format!("发送 EOF 失败: {}", e)))?;
        }

        let mut collector = OutputCollector::new(
            self.classifier.clone(),
            self.translator.clone(),
            self.sink.clone(),
            self.remote_root.clone(),
        );

        // 两个流交替非阻塞读取，行一就绪即上报
        ssh.set_blocking(false);
        let drain_result = {
            let mut out_stream = channel.stream(0);
            let mut err_stream = channel.stderr();
            let mut out_pending: Vec<u8> = Vec::new();
            let mut err_pending: Vec<u8> = Vec::new();
            let mut buf = [0u8; 4096];

            loop {
                let mut progressed = false;

                match out_stream.read(&mut buf) {
                    Ok(0) => {}
                    Ok(n) => {
                        progressed = true;
                        out_pending.extend_from_slice(&buf[..n]);
                        collector.flush_lines(&mut out_pending, StreamKind::Stdout);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => {
                        break Err(RemoteDevError::ConnectionFailed(format!(
                            "读取输出流失败: {}",
                            e
                        )));
                    }
                }

                match err_stream.read(&mut buf) {
                    Ok(0) => {}
                    Ok(n) => {
                        progressed = true;
                        err_pending.extend_from_slice(&buf[..n]);
                        collector.flush_lines(&mut err_pending, StreamKind::Stderr);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => {
                        break Err(RemoteDevError::ConnectionFailed(format!(
                            "读取错误流失败: {}",
                            e
                        )));
                    }
                }

                if !progressed {
                    if channel.eof() {
                        // 末尾无换行的残余内容也作为一行处理
                        collector.flush_tail(&mut out_pending, StreamKind::Stdout);
                        collector.flush_tail(&mut err_pending, StreamKind::Stderr);
                        break Ok(());
                    }
                    std::thread::sleep(POLL_SLEEP);
                }
            }
        };
        ssh.set_blocking(true);
        drain_result?;
        let _ = channel.wait_close();

        Ok(collector.into_result(request.capture_stderr_separately))
    }
}

/// 流类别
#[derive(Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    Stdout,
    Stderr,
}

/// 输出收集器
///
/// 对每一完成行做解码、分类、上报和交叉引用追加。解码失败的行
/// 记录后丢弃，执行继续。
struct OutputCollector {
    classifier: Arc<dyn LineClassifier>,
    translator: Arc<dyn PathTranslator>,
    sink: SharedSink,
    remote_root: String,
    stdout_lines: Vec<String>,
    stderr_lines: Vec<String>,
    success: bool,
}

impl OutputCollector {
    fn new(
        classifier: Arc<dyn LineClassifier>,
        translator: Arc<dyn PathTranslator>,
        sink: SharedSink,
        remote_root: String,
    ) -> Self {
        Self {
            classifier,
            translator,
            sink,
            remote_root,
            stdout_lines: Vec::new(),
            stderr_lines: Vec::new(),
            success: true,
        }
    }

    /// 把缓冲中所有完成的行取出处理
    fn flush_lines(&mut self, pending: &mut Vec<u8>, kind: StreamKind) {
        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = pending.drain(..=pos).collect();
            self.push_raw(&raw[..raw.len() - 1], kind);
        }
    }

    /// 流结束后处理末尾无换行的残余内容
    fn flush_tail(&mut self, pending: &mut Vec<u8>, kind: StreamKind) {
        if !pending.is_empty() {
            let raw = std::mem::take(pending);
            self.push_raw(&raw, kind);
        }
    }

    fn push_raw(&mut self, raw: &[u8], kind: StreamKind) {
        let raw = if raw.last() == Some(&b'\r') {
            &raw[..raw.len() - 1]
        } else {
            raw
        };
        match std::str::from_utf8(raw) {
            Ok(line) => self.push_line(line, kind),
            Err(e) => {
                let err = RemoteDevError::DecodeFailed(format!("非 UTF-8 输出: {}", e));
                tracing::error!("[CommandExecutor] {}", err);
                self.sink.error(&err.to_string());
            }
        }
    }

    fn push_line(&mut self, line: &str, kind: StreamKind) {
        match kind {
            StreamKind::Stdout => {
                self.sink.info(line);
                self.stdout_lines.push(line.to_string());
            }
            StreamKind::Stderr => {
                if self.classifier.is_warning(line) {
                    self.sink.warn(line);
                } else if !line.is_empty() {
                    self.success = false;
                    self.sink.error(line);
                }
                self.stderr_lines.push(line.to_string());

                if let Some(xref) = cross_reference(line, &self.remote_root, &*self.translator) {
                    self.sink.info(&xref);
                    self.stderr_lines.push(xref);
                }
            }
        }
    }

    fn into_result(self, capture_stderr: bool) -> CommandResult {
        CommandResult {
            stdout_lines: self.stdout_lines,
            stderr_lines: capture_stderr.then_some(self.stderr_lines),
            success: self.success,
        }
    }
}

/// 为引用远程工作目录路径的错误行生成本地交叉引用行
///
/// 纯展示辅助：原始行保持原样，引用行紧随其后插入，格式
/// `    --> /home/alice/project/src/main.rs:12` 可被终端识别为链接。
fn cross_reference(
    line: &str,
    remote_root: &str,
    translator: &dyn PathTranslator,
) -> Option<String> {
    let start = line.find(remote_root)?;
    let token: &str = line[start..]
        .split(|c: char| c.is_whitespace() || c == '"' || c == '\'')
        .next()?;
    let token = token.trim_end_matches([':', ',', ')']);

    // `path:行号[:列号]` 的后缀保留在引用行里
    let (path_part, suffix) = match token.find(':') {
        Some(pos) => (&token[..pos], &token[pos..]),
        None => (token, ""),
    };

    let local = translator.to_local(path_part).ok()?;
    Some(format!("    --> {}{}", local.display(), suffix))
}
