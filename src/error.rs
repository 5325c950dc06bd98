//! 错误类型定义
//!
//! 定义远程会话核心相关的错误类型。
//!
//! ## 分类
//! - 传输类错误（连接、认证、主机密钥）——对当前会话致命
//! - 路径域错误——操作超出本地主目录范围，快速失败
//! - 镜像同步错误——部分同步不安全，必须抛出
//! - 解码错误——记录后继续执行
//! - 容器与本地命令错误——底层操作失败原样上抛

use thiserror::Error;

/// 远程会话错误类型
#[derive(Debug, Error)]
pub enum RemoteDevError {
    /// 连接失败（主机不可达、通道建立失败等）
    #[error("连接失败: {0}")]
    ConnectionFailed(String),

    /// SSH 认证失败
    #[error("SSH 认证失败: {0}")]
    AuthFailed(String),

    /// 主机密钥被拒绝（未知或不匹配）
    #[error("主机密钥被拒绝: {0}")]
    HostKeyRejected(String),

    /// 路径超出本地主目录范围
    #[error("路径超出主目录范围: {0}")]
    PathOutsideHome(String),

    /// 镜像同步失败
    #[error("镜像同步失败: {0}")]
    MirrorFailed(String),

    /// 远程输出解码失败
    #[error("输出解码失败: {0}")]
    DecodeFailed(String),

    /// 容器操作失败
    #[error("容器操作失败: {0}")]
    ContainerFailed(String),

    /// 本地命令执行失败
    #[error("本地命令执行失败: {0}")]
    LocalCommandFailed(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// 会话已关闭
    #[error("会话已关闭")]
    SessionClosed,

    /// 写入失败
    #[error("写入失败: {0}")]
    WriteFailed(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<RemoteDevError> for String {
    fn from(err: RemoteDevError) -> Self {
        err.to_string()
    }
}

impl serde::Serialize for RemoteDevError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
