//! 交互式远程 Shell
//!
//! 提供一个实时远程 shell，把预置命令队列与捕获的键盘输入交错送入
//! 通道，同时持续排空远程输出，两个输入源互不阻塞。
//!
//! ## 并发模型
//! 唯一的后台线程负责逐字符捕获用户输入，通过单生产者/单消费者队列
//! 与主循环通信；通道 I/O 完全由主循环独占。主循环不会自行退出，
//! 只在通道关闭或外部中断时结束——这正是一个无限期人工终端会话
//! 的语义。

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::mpsc;
use std::time::Duration;

use ssh2::Session;

use crate::error::RemoteDevError;
use crate::sink::SharedSink;

/// 主循环轮询间隔
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// 交互状态
///
/// 仅在一次交互调用期间存活。
struct InteractiveState {
    /// 待发送的预置命令队列
    pending_commands: VecDeque<String>,
    /// 已捕获但尚未凑成整行的用户输入（原始字节，多字节字符可能
    /// 跨越多次捕获，只在整行就绪后解码）
    partial_user_input: Vec<u8>,
}

impl InteractiveState {
    fn new(preset: Vec<String>) -> Self {
        Self {
            pending_commands: preset.into(),
            partial_user_input: Vec::new(),
        }
    }

    /// 吸收一个捕获的输入字节
    fn absorb(&mut self, byte: u8) {
        self.partial_user_input.push(byte);
    }

    /// 取出下一条待发送的行
    ///
    /// 预置命令优先；其次是键盘输入中已凑齐（以换行结束）的一行；
    /// 两者都没有时返回 `None`，本轮不发送。
    fn next_line(&mut self) -> Option<String> {
        if let Some(cmd) = self.pending_commands.pop_front() {
            return Some(cmd);
        }
        let pos = self.partial_user_input.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.partial_user_input.drain(..=pos).collect();
        let mut end = raw.len() - 1;
        if end > 0 && raw[end - 1] == b'\r' {
            end -= 1;
        }
        Some(String::from_utf8_lossy(&raw[..end]).into_owned())
    }
}

/// 交互式 Shell
pub struct InteractiveShell {
    sink: SharedSink,
}

impl InteractiveShell {
    /// 创建交互式 Shell
    pub fn new(sink: SharedSink) -> Self {
        Self { sink }
    }

    /// 运行交互会话
    ///
    /// 打开一个带 PTY 的远程 shell 通道，先依次送入 `preset` 中的
    /// 命令，之后把用户的整行输入转发过去。阻塞到通道关闭为止。
    pub fn run(&self, ssh: &Session, preset: Vec<String>) -> Result<(), RemoteDevError> {
        let mut channel = ssh.channel_session().map_err(|e| {
            RemoteDevError::ConnectionFailed(format!("创建通道失败: {}", e))
        })?;
        channel
            .request_pty("xterm-256color", None, None)
            .map_err(|e| RemoteDevError::ConnectionFailed(format!("请求 PTY 失败: {}", e)))?;
        channel
            .shell()
            .map_err(|e| RemoteDevError::ConnectionFailed(format!("启动远程 Shell 失败: {}", e)))?;

        self.sink.info("交互式会话已建立，Ctrl+C 退出");

        let rx = spawn_keystroke_capture();
        let mut state = InteractiveState::new(preset);
        let mut stdout = std::io::stdout();
        let mut buf = [0u8; 4096];

        ssh.set_blocking(false);
        loop {
            std::thread::sleep(POLL_INTERVAL);

            // 排空当前可读的远程输出
            loop {
                match channel.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let _ = stdout.write_all(&buf[..n]);
                        let _ = stdout.flush();
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(_) => break,
                }
            }

            if channel.eof() {
                break;
            }

            // 把后台线程捕获的字节并入缓冲
            while let Ok(byte) = rx.try_recv() {
                state.absorb(byte);
            }

            if let Some(line) = state.next_line() {
                // 发送期间切回阻塞模式，等价于等待通道可写
                ssh.set_blocking(true);
                let sent = channel
                    .write_all(format!("{}\r\n", line).as_bytes())
                    .and_then(|_| channel.flush());
                ssh.set_blocking(false);
                if let Err(e) = sent {
                    ssh.set_blocking(true);
                    return Err(RemoteDevError::WriteFailed(e.to_string()));
                }
            }
        }
        ssh.set_blocking(true);

        let _ = channel.wait_close();
        self.sink.info("交互式会话已结束");
        Ok(())
    }
}

/// 启动键盘捕获线程
///
/// 线程逐字符阻塞读取标准输入并写入队列；队列另一端关闭后线程
/// 自行退出。通道句柄绝不进入该线程。
fn spawn_keystroke_capture() -> mpsc::Receiver<u8> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut byte = [0u8; 1];
        loop {
            match stdin.read(&mut byte) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if tx.send(byte[0]).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}
