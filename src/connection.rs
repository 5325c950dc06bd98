//! SSH 远程连接
//!
//! 管理单条 SSH 连接的生命周期：建立传输、主机密钥校验、认证、断开。
//!
//! ## 功能
//! - 连接状态管理（init→connecting→connected→disconnected/error）
//! - 直连 TCP 或经 ProxyCommand 隧道建立传输
//! - known_hosts 校验，未知主机密钥默认拒绝（无首次信任）
//! - SSH Agent 与默认身份文件认证链
//! - 错误分类提示（未配置密钥 / 主机不可达）

use std::fmt;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use parking_lot::RwLock;
use ssh2::Session;

use crate::config::HostProfile;
use crate::error::RemoteDevError;

/// 默认 SSH 端口
pub const DEFAULT_SSH_PORT: u16 = 22;

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// 初始状态
    #[default]
    Init,
    /// 正在连接
    Connecting,
    /// 已连接
    Connected,
    /// 已断开
    Disconnected,
    /// 错误状态
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl ConnectionState {
    /// 检查状态转换是否有效
    pub fn can_transition_to(&self, new_state: ConnectionState) -> bool {
        matches!(
            (self, new_state),
            (Self::Init, Self::Connecting)
                | (Self::Connecting, Self::Connected)
                | (Self::Connecting, Self::Error)
                | (Self::Connected, Self::Disconnected)
                | (Self::Disconnected, Self::Connecting)
                | (Self::Error, Self::Connecting)
        )
    }
}

/// SSH 连接管理器
///
/// 通道句柄归会话独占，所有操作串行使用同一条连接。
pub struct SshConnection {
    /// 解析后的主机参数
    profile: HostProfile,
    /// 登录用户名
    user: String,
    /// 当前状态
    state: RwLock<ConnectionState>,
    /// SSH 会话
    session: RwLock<Option<Session>>,
    /// ProxyCommand 子进程（直连时为空）
    proxy_child: RwLock<Option<Child>>,
    /// 错误信息
    error: RwLock<Option<String>>,
}

impl SshConnection {
    /// 创建连接管理器
    ///
    /// `default_user` 在配置文件未给出 User 时使用。
    pub fn new(profile: HostProfile, default_user: impl Into<String>) -> Self {
        let user = profile
            .user
            .clone()
            .unwrap_or_else(|| default_user.into());
        Self {
            profile,
            user,
            state: RwLock::new(ConnectionState::Init),
            session: RwLock::new(None),
            proxy_child: RwLock::new(None),
            error: RwLock::new(None),
        }
    }

    /// 当前状态
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, new_state: ConnectionState) {
        *self.state.write() = new_state;
    }

    fn fail(&self, err: RemoteDevError) -> RemoteDevError {
        self.set_state(ConnectionState::Error);
        *self.error.write() = Some(err.to_string());
        err
    }

    /// 登录用户名
    pub fn user(&self) -> &str {
        &self.user
    }

    /// 实际主机名
    pub fn hostname(&self) -> &str {
        &self.profile.hostname
    }

    /// 有效端口
    pub fn effective_port(&self) -> u16 {
        self.profile.port.unwrap_or(DEFAULT_SSH_PORT)
    }

    /// 是否已连接
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// 获取 SSH 会话句柄
    pub fn ssh(&self) -> Result<Session, RemoteDevError> {
        self.session
            .read()
            .clone()
            .ok_or(RemoteDevError::SessionClosed)
    }

    /// 建立连接并完成认证
    pub fn connect(&self) -> Result<(), RemoteDevError> {
        let current = self.state();
        if !current.can_transition_to(ConnectionState::Connecting) {
            return Err(RemoteDevError::ConnectionFailed(format!(
                "无法从 {} 状态开始连接",
                current
            )));
        }
        self.set_state(ConnectionState::Connecting);
        *self.error.write() = None;

        let mut session = Session::new()
            .map_err(|e| self.fail(RemoteDevError::ConnectionFailed(format!(
                "创建 SSH 会话失败: {}",
                e
            ))))?;

        // 建立底层传输：ProxyCommand 优先，否则直连 TCP
        if let Some(proxy) = self.profile.proxy_command.clone() {
            let stream = self.open_proxy_stream(&proxy)?;
            session.set_tcp_stream(stream);
        } else {
            let addr = format!("{}:{}", self.profile.hostname, self.effective_port());
            tracing::info!("[SshConnection] 正在连接到 {}", addr);
            let tcp = TcpStream::connect(&addr).map_err(|e| {
                tracing::error!(
                    "[SshConnection] 主机不可达，服务器是否已开机? {}: {}",
                    addr,
                    e
                );
                self.fail(RemoteDevError::ConnectionFailed(format!(
                    "主机不可达: {}: {}",
                    addr, e
                )))
            })?;
            session.set_tcp_stream(tcp);
        }

        session.handshake().map_err(|e| {
            self.fail(RemoteDevError::ConnectionFailed(format!(
                "SSH 握手失败: {}",
                e
            )))
        })?;

        self.verify_host_key(&session)?;
        self.authenticate(&session)?;

        *self.session.write() = Some(session);
        self.set_state(ConnectionState::Connected);
        tracing::info!(
            "[SshConnection] 已连接: {}@{}",
            self.user,
            self.profile.hostname
        );
        Ok(())
    }

    /// 通过 ProxyCommand 建立传输
    ///
    /// 用 socketpair 把子进程的 stdin/stdout 接到一个流式套接字上，
    /// 两个转发线程负责搬运字节。
    fn open_proxy_stream(&self, proxy: &str) -> Result<UnixStream, RemoteDevError> {
        let cmd = proxy
            .replace("%h", &self.profile.hostname)
            .replace("%p", &self.effective_port().to_string());
        tracing::info!("[SshConnection] 经 ProxyCommand 连接: {}", cmd);

        let (local, remote) = UnixStream::pair().map_err(|e| {
            self.fail(RemoteDevError::ConnectionFailed(format!(
                "创建 socketpair 失败: {}",
                e
            )))
        })?;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&cmd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| {
                self.fail(RemoteDevError::ConnectionFailed(format!(
                    "启动 ProxyCommand 失败: {}",
                    e
                )))
            })?;

        let mut child_stdin = child.stdin.take().ok_or_else(|| {
            RemoteDevError::ConnectionFailed("ProxyCommand 缺少 stdin".to_string())
        })?;
        let mut child_stdout = child.stdout.take().ok_or_else(|| {
            RemoteDevError::ConnectionFailed("ProxyCommand 缺少 stdout".to_string())
        })?;

        let mut sock_read = remote.try_clone().map_err(|e| {
            RemoteDevError::ConnectionFailed(format!("克隆 socketpair 失败: {}", e))
        })?;
        let mut sock_write = remote;

        std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match sock_read.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if child_stdin.write_all(&buf[..n]).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match child_stdout.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if sock_write.write_all(&buf[..n]).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        *self.proxy_child.write() = Some(child);
        Ok(local)
    }

    /// 校验远程主机密钥
    ///
    /// 未知或不匹配的主机密钥一律拒绝，不做首次信任。
    fn verify_host_key(&self, session: &Session) -> Result<(), RemoteDevError> {
        let (host_key, _key_type) = session.host_key().ok_or_else(|| {
            self.fail(RemoteDevError::HostKeyRejected(
                "无法获取主机密钥".to_string(),
            ))
        })?;

        let mut known_hosts = session.known_hosts().map_err(|e| {
            self.fail(RemoteDevError::HostKeyRejected(format!(
                "获取 known_hosts 失败: {}",
                e
            )))
        })?;

        if let Some(path) = known_hosts_path() {
            if path.exists() {
                if let Err(e) = known_hosts.read_file(&path, ssh2::KnownHostFileKind::OpenSSH) {
                    tracing::warn!("[SshConnection] 读取 known_hosts 失败: {}", e);
                }
            }
        }

        match known_hosts.check_port(&self.profile.hostname, self.effective_port(), host_key) {
            ssh2::CheckResult::Match => Ok(()),
            ssh2::CheckResult::NotFound => Err(self.fail(RemoteDevError::HostKeyRejected(
                format!("主机密钥未知: {}", self.profile.hostname),
            ))),
            ssh2::CheckResult::Mismatch => {
                tracing::error!(
                    "[SshConnection] 主机密钥不匹配: {}，可能存在中间人攻击",
                    self.profile.hostname
                );
                Err(self.fail(RemoteDevError::HostKeyRejected(format!(
                    "主机密钥不匹配: {}",
                    self.profile.hostname
                ))))
            }
            ssh2::CheckResult::Failure => Err(self.fail(RemoteDevError::HostKeyRejected(
                "known_hosts 检查失败".to_string(),
            ))),
        }
    }

    /// 执行认证：先 SSH Agent，再逐个尝试默认身份文件
    fn authenticate(&self, session: &Session) -> Result<(), RemoteDevError> {
        if self.try_agent_auth(session) {
            tracing::info!("[SshConnection] Agent 认证成功");
            return Ok(());
        }

        for key_path in default_identity_files() {
            if !key_path.exists() {
                continue;
            }
            match session.userauth_pubkey_file(&self.user, None, &key_path, None) {
                Ok(()) if session.authenticated() => {
                    tracing::info!("[SshConnection] 公钥认证成功: {:?}", key_path);
                    return Ok(());
                }
                Ok(()) => {}
                Err(e) => {
                    tracing::warn!("[SshConnection] 公钥认证失败: {:?}: {}", key_path, e);
                }
            }
        }

        tracing::error!("[SshConnection] 认证失败，是否已生成 SSH 密钥?");
        Err(self.fail(RemoteDevError::AuthFailed(
            "所有认证方式均失败，是否已生成 SSH 密钥?".to_string(),
        )))
    }

    fn try_agent_auth(&self, session: &Session) -> bool {
        let Ok(mut agent) = session.agent() else {
            return false;
        };
        if agent.connect().is_err() || agent.list_identities().is_err() {
            return false;
        }
        let Ok(identities) = agent.identities() else {
            return false;
        };
        for identity in identities {
            if agent.userauth(&self.user, &identity).is_ok() && session.authenticated() {
                return true;
            }
        }
        false
    }

    /// 断开连接
    ///
    /// 可重复调用；第二次之后为空操作。
    pub fn close(&self) {
        if let Some(session) = self.session.write().take() {
            let _ = session.disconnect(None, "会话结束", None);
            tracing::info!("[SshConnection] 已断开: {}", self.profile.hostname);
        }
        if let Some(mut child) = self.proxy_child.write().take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if self.state() == ConnectionState::Connected {
            self.set_state(ConnectionState::Disconnected);
        }
    }
}

impl Drop for SshConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// 默认 known_hosts 文件路径
fn known_hosts_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts"))
}

/// 默认身份文件列表，按优先级排列
pub fn default_identity_files() -> Vec<PathBuf> {
    let Some(home) = dirs::home_dir() else {
        return Vec::new();
    };
    let ssh_dir = home.join(".ssh");
    vec![
        ssh_dir.join("id_ed25519"),
        ssh_dir.join("id_rsa"),
        ssh_dir.join("id_ecdsa"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        assert!(ConnectionState::Init.can_transition_to(ConnectionState::Connecting));
        assert!(ConnectionState::Connecting.can_transition_to(ConnectionState::Connected));
        assert!(ConnectionState::Connecting.can_transition_to(ConnectionState::Error));
        assert!(ConnectionState::Connected.can_transition_to(ConnectionState::Disconnected));
        assert!(ConnectionState::Error.can_transition_to(ConnectionState::Connecting));
        assert!(!ConnectionState::Init.can_transition_to(ConnectionState::Connected));
        assert!(!ConnectionState::Connected.can_transition_to(ConnectionState::Connecting));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Init.to_string(), "init");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }

    #[test]
    fn test_user_falls_back_to_default() {
        let conn = SshConnection::new(
            HostProfile {
                hostname: "h".to_string(),
                ..Default::default()
            },
            "ubuntu",
        );
        assert_eq!(conn.user(), "ubuntu");
        assert_eq!(conn.effective_port(), DEFAULT_SSH_PORT);
        assert_eq!(conn.state(), ConnectionState::Init);
    }

    #[test]
    fn test_profile_user_and_port_preferred() {
        let conn = SshConnection::new(
            HostProfile {
                hostname: "h".to_string(),
                user: Some("admin".to_string()),
                port: Some(2222),
                proxy_command: None,
            },
            "ubuntu",
        );
        assert_eq!(conn.user(), "admin");
        assert_eq!(conn.effective_port(), 2222);
    }

    #[test]
    fn test_ssh_before_connect_is_session_closed() {
        let conn = SshConnection::new(
            HostProfile {
                hostname: "h".to_string(),
                ..Default::default()
            },
            "ubuntu",
        );
        assert!(matches!(conn.ssh(), Err(RemoteDevError::SessionClosed)));
    }
}
