//! 路径翻译
//!
//! 本地文件系统路径与容器内命名空间之间的纯映射，不做任何 I/O。
//!
//! ## 映射规则
//! 本地主目录前缀被替换为远程侧固定的暂存根（staging root），其余部分
//! 原样保留：
//!
//! ```text
//! /home/alice/project/src  ->  /home/ubuntu/from_host/alice/project/src
//! ```
//!
//! 映射对所有 `to_remote` 产出的路径严格可逆。

use std::path::{Path, PathBuf};

use crate::error::RemoteDevError;

/// 容器内的固定用户
pub const DEFAULT_REMOTE_USER: &str = "ubuntu";

/// 远程侧暂存目录名（所有来自宿主机的目录树都放在该前缀下）
pub const STAGING_DIR: &str = "from_host";

/// 路径翻译策略
///
/// 会话管理器通过该接口派生远程工作目录，策略可插拔。
pub trait PathTranslator: Send + Sync {
    /// 本地路径 -> 远程路径
    ///
    /// 前置条件：`local` 必须位于本地主目录之下，否则返回
    /// [`RemoteDevError::PathOutsideHome`]。
    fn to_remote(&self, local: &Path) -> Result<String, RemoteDevError>;

    /// 远程路径 -> 本地路径
    ///
    /// 对 `to_remote` 的任意产出严格可逆；远程侧开头的 `~` 会先被
    /// 解析为远程用户主目录。
    fn to_local(&self, remote: &str) -> Result<PathBuf, RemoteDevError>;

    /// 远程路径相对于给定基准目录的投影
    fn relative_to(&self, remote: &str, base: &str) -> Result<String, RemoteDevError>;

    /// 解析远程路径开头的 `~` 别名为远程用户主目录
    fn resolve_home_alias(&self, remote: &str) -> String;

    /// 远程用户主目录（如 `/home/ubuntu`）
    fn remote_home(&self) -> String;

    /// 本地主目录（映射域的本地边界）
    fn local_home(&self) -> PathBuf;
}

/// 默认翻译策略：主目录前缀替换为固定暂存根
pub struct StagedHomeTranslator {
    /// 本地主目录（如 `/home/alice`）
    local_home: PathBuf,
    /// 本地用户名（如 `alice`）
    local_user: String,
    /// 远程固定用户（如 `ubuntu`）
    remote_user: String,
}

impl StagedHomeTranslator {
    /// 用显式参数创建（测试和非标准主目录场景）
    pub fn new(
        local_home: impl Into<PathBuf>,
        local_user: impl Into<String>,
        remote_user: impl Into<String>,
    ) -> Self {
        Self {
            local_home: local_home.into(),
            local_user: local_user.into(),
            remote_user: remote_user.into(),
        }
    }

    /// 从当前环境探测本地主目录和用户名
    pub fn detect(remote_user: impl Into<String>) -> Result<Self, RemoteDevError> {
        let local_home = dirs::home_dir()
            .ok_or_else(|| RemoteDevError::ConfigError("无法确定本地主目录".to_string()))?;
        let local_user = whoami::username();
        Ok(Self::new(local_home, local_user, remote_user))
    }

    /// 远程暂存根（如 `/home/ubuntu/from_host/alice`）
    fn staging_root(&self) -> String {
        format!(
            "/home/{}/{}/{}",
            self.remote_user, STAGING_DIR, self.local_user
        )
    }
}

impl PathTranslator for StagedHomeTranslator {
    fn to_remote(&self, local: &Path) -> Result<String, RemoteDevError> {
        let rest = local.strip_prefix(&self.local_home).map_err(|_| {
            RemoteDevError::PathOutsideHome(format!(
                "{} 不在本地主目录 {} 之下",
                local.display(),
                self.local_home.display()
            ))
        })?;

        let root = self.staging_root();
        if rest.as_os_str().is_empty() {
            Ok(root)
        } else {
            Ok(format!("{}/{}", root, rest.to_string_lossy()))
        }
    }

    fn to_local(&self, remote: &str) -> Result<PathBuf, RemoteDevError> {
        let remote = self.resolve_home_alias(remote);
        let root = self.staging_root();

        // 前缀必须落在路径段边界上，`…/alicexyz` 不属于 `…/alice`
        let rest = remote
            .strip_prefix(&root)
            .filter(|r| r.is_empty() || r.starts_with('/'))
            .ok_or_else(|| {
                RemoteDevError::PathOutsideHome(format!("{} 不在远程暂存根 {} 之下", remote, root))
            })?;

        let rest = rest.trim_start_matches('/');
        if rest.is_empty() {
            Ok(self.local_home.clone())
        } else {
            Ok(self.local_home.join(rest))
        }
    }

    fn relative_to(&self, remote: &str, base: &str) -> Result<String, RemoteDevError> {
        let remote = self.resolve_home_alias(remote);
        let base = self.resolve_home_alias(base);

        let rest = remote
            .strip_prefix(&base)
            .filter(|r| r.is_empty() || r.starts_with('/'))
            .ok_or_else(|| {
                RemoteDevError::PathOutsideHome(format!("{} 不在基准目录 {} 之下", remote, base))
            })?;

        Ok(rest.trim_start_matches('/').to_string())
    }

    fn resolve_home_alias(&self, remote: &str) -> String {
        if remote == "~" {
            self.remote_home()
        } else if let Some(rest) = remote.strip_prefix("~/") {
            format!("{}/{}", self.remote_home(), rest)
        } else {
            remote.to_string()
        }
    }

    fn remote_home(&self) -> String {
        format!("/home/{}", self.remote_user)
    }

    fn local_home(&self) -> PathBuf {
        self.local_home.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translator() -> StagedHomeTranslator {
        StagedHomeTranslator::new("/home/alice", "alice", "ubuntu")
    }

    #[test]
    fn test_to_remote_basic() {
        let t = translator();
        assert_eq!(
            t.to_remote(Path::new("/home/alice/project/src")).unwrap(),
            "/home/ubuntu/from_host/alice/project/src"
        );
    }

    #[test]
    fn test_to_remote_home_root() {
        let t = translator();
        assert_eq!(
            t.to_remote(Path::new("/home/alice")).unwrap(),
            "/home/ubuntu/from_host/alice"
        );
    }

    #[test]
    fn test_to_remote_outside_home_rejected() {
        let t = translator();
        let err = t.to_remote(Path::new("/tmp/scratch")).unwrap_err();
        assert!(matches!(err, RemoteDevError::PathOutsideHome(_)));
        let err = t.to_remote(Path::new("/home/bob/project")).unwrap_err();
        assert!(matches!(err, RemoteDevError::PathOutsideHome(_)));
    }

    #[test]
    fn test_round_trip_invertible() {
        let t = translator();
        for local in [
            "/home/alice",
            "/home/alice/project",
            "/home/alice/Documents/git_repos/a/b/c",
        ] {
            let remote = t.to_remote(Path::new(local)).unwrap();
            assert_eq!(t.to_local(&remote).unwrap(), PathBuf::from(local));
        }
    }

    #[test]
    fn test_to_local_resolves_home_alias() {
        let t = translator();
        assert_eq!(
            t.to_local("~/from_host/alice/project").unwrap(),
            PathBuf::from("/home/alice/project")
        );
    }

    #[test]
    fn test_to_local_requires_segment_boundary() {
        let t = translator();
        // 暂存根的字符串前缀相同但路径段不同
        let err = t
            .to_local("/home/ubuntu/from_host/alicexyz/project")
            .unwrap_err();
        assert!(matches!(err, RemoteDevError::PathOutsideHome(_)));

        let err = t
            .relative_to("/home/ubuntu/from_host/alice/projectx", "/home/ubuntu/from_host/alice/project")
            .unwrap_err();
        assert!(matches!(err, RemoteDevError::PathOutsideHome(_)));
    }

    #[test]
    fn test_relative_to() {
        let t = translator();
        assert_eq!(
            t.relative_to(
                "/home/ubuntu/from_host/alice/project/src/main.rs",
                "/home/ubuntu/from_host/alice/project"
            )
            .unwrap(),
            "src/main.rs"
        );
    }

    #[test]
    fn test_resolve_home_alias() {
        let t = translator();
        assert_eq!(t.resolve_home_alias("~"), "/home/ubuntu");
        assert_eq!(t.resolve_home_alias("~/Documents"), "/home/ubuntu/Documents");
        assert_eq!(t.resolve_home_alias("/opt/data"), "/opt/data");
    }
}
