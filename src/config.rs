//! 会话配置
//!
//! 提供会话参数结构和 SSH 配置文件查询。
//!
//! ## 功能
//! - `SessionConfig` 会话参数（主机、容器、本地工作目录）
//! - 本地工作目录必须位于主目录之下的前置校验
//! - 解析 `~/.ssh/config`，为逻辑主机别名解析
//!   hostname / username / port / proxycommand

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::RemoteDevError;
use crate::paths::DEFAULT_REMOTE_USER;

/// 默认容器命令行工具
pub const DEFAULT_CONTAINER_CLI: &str = "lxc";

/// 会话配置
///
/// 一次会话绑定一个（主机, 容器, 本地工作目录）三元组。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// SSH 逻辑主机别名（如 `incus_doc-dev`）
    pub remote_host: String,
    /// 远程用户名（默认 `ubuntu`）
    pub user: String,
    /// 容器名
    pub container: String,
    /// 本地工作目录，必须位于本地主目录之下
    pub local_root: PathBuf,
    /// SSH 配置文件路径（默认 `~/.ssh/config`）
    pub ssh_config_path: PathBuf,
    /// 容器命令行工具（`lxc` 或 `incus`）
    pub container_cli: String,
}

impl SessionConfig {
    /// 创建配置，其余字段取默认值
    pub fn new(
        remote_host: impl Into<String>,
        container: impl Into<String>,
        local_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            remote_host: remote_host.into(),
            user: DEFAULT_REMOTE_USER.to_string(),
            container: container.into(),
            local_root: local_root.into(),
            ssh_config_path: default_ssh_config_path(),
            container_cli: DEFAULT_CONTAINER_CLI.to_string(),
        }
    }

    /// 设置远程用户名
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// 设置 SSH 配置文件路径
    pub fn with_ssh_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssh_config_path = path.into();
        self
    }

    /// 设置容器命令行工具
    pub fn with_container_cli(mut self, cli: impl Into<String>) -> Self {
        self.container_cli = cli.into();
        self
    }

    /// 校验本地工作目录位于给定主目录之下
    ///
    /// 远程路径派生依赖该前提，必须在任何远程操作之前执行。
    pub fn validate_local_root(&self, local_home: &Path) -> Result<(), RemoteDevError> {
        if self.local_root.starts_with(local_home) {
            Ok(())
        } else {
            Err(RemoteDevError::PathOutsideHome(format!(
                "本地工作目录 {} 必须位于主目录 {} 之下",
                self.local_root.display(),
                local_home.display()
            )))
        }
    }
}

/// 默认 SSH 配置文件路径
pub fn default_ssh_config_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".ssh").join("config"))
        .unwrap_or_else(|| PathBuf::from("~/.ssh/config"))
}

// ============================================================================
// SSH 配置文件查询
// ============================================================================

/// 主机连接参数
///
/// 从 SSH 配置文件为逻辑主机别名解析出的连接参数。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostProfile {
    /// 实际主机名（HostName，缺省为别名本身）
    pub hostname: String,
    /// 用户名（User）
    pub user: Option<String>,
    /// 端口（Port）
    pub port: Option<u16>,
    /// 代理命令（ProxyCommand）
    pub proxy_command: Option<String>,
}

/// SSH 配置文件查询器
///
/// 只解析本核心需要的四个关键字；同一关键字以首个匹配为准
/// （first match wins），与 OpenSSH 语义一致。
pub struct SshConfigLookup;

impl SshConfigLookup {
    /// 为逻辑主机别名解析连接参数
    ///
    /// 配置文件不存在时返回仅含别名本身的默认参数。
    pub fn lookup(path: &Path, alias: &str) -> Result<HostProfile, RemoteDevError> {
        let mut profile = HostProfile {
            hostname: alias.to_string(),
            ..Default::default()
        };

        if !path.exists() {
            return Ok(profile);
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            RemoteDevError::ConfigError(format!("读取 SSH 配置文件失败: {}", e))
        })?;

        Self::apply_content(&content, alias, &mut profile);
        Ok(profile)
    }

    /// 从配置内容填充参数（纯函数，便于测试）
    pub fn apply_content(content: &str, alias: &str, profile: &mut HostProfile) {
        let mut in_matching_block = false;
        let mut hostname_set = false;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = Self::parse_line(line) else {
                continue;
            };

            if key == "host" {
                in_matching_block = value
                    .split_whitespace()
                    .any(|pattern| Self::pattern_matches(pattern, alias));
                continue;
            }

            if !in_matching_block {
                continue;
            }

            match key.as_str() {
                "hostname" if !hostname_set => {
                    profile.hostname = value;
                    hostname_set = true;
                }
                "user" if profile.user.is_none() => profile.user = Some(value),
                "port" if profile.port.is_none() => profile.port = value.parse().ok(),
                "proxycommand" if profile.proxy_command.is_none() => {
                    profile.proxy_command = Some(value)
                }
                _ => {}
            }
        }
    }

    /// 解析单行配置，返回 (小写关键字, 值)
    fn parse_line(line: &str) -> Option<(String, String)> {
        if let Some(pos) = line.find(char::is_whitespace) {
            let key = line[..pos].trim().to_lowercase();
            if !key.contains('=') {
                return Some((key, line[pos..].trim().to_string()));
            }
        }

        let pos = line.find('=')?;
        Some((
            line[..pos].trim().to_lowercase(),
            line[pos + 1..].trim().to_string(),
        ))
    }

    /// Host 模式匹配，支持 `*` 和 `?` 通配符
    fn pattern_matches(pattern: &str, alias: &str) -> bool {
        fn glob(p: &[u8], a: &[u8]) -> bool {
            match (p.first(), a.first()) {
                (None, None) => true,
                (Some(b'*'), _) => {
                    glob(&p[1..], a) || (!a.is_empty() && glob(p, &a[1..]))
                }
                (Some(b'?'), Some(_)) => glob(&p[1..], &a[1..]),
                (Some(pc), Some(ac)) if pc == ac => glob(&p[1..], &a[1..]),
                _ => false,
            }
        }
        glob(pattern.as_bytes(), alias.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# 开发容器
Host incus_doc-dev
    HostName 10.40.119.159
    User ubuntu
    Port 2222
    ProxyCommand ssh -W %h:%p jumpbox

Host incus_*
    User fallback
    Port 22

Host *
    ForwardAgent yes
"#;

    #[test]
    fn test_lookup_exact_host() {
        let mut profile = HostProfile {
            hostname: "incus_doc-dev".to_string(),
            ..Default::default()
        };
        SshConfigLookup::apply_content(SAMPLE, "incus_doc-dev", &mut profile);

        assert_eq!(profile.hostname, "10.40.119.159");
        assert_eq!(profile.user.as_deref(), Some("ubuntu"));
        assert_eq!(profile.port, Some(2222));
        assert_eq!(
            profile.proxy_command.as_deref(),
            Some("ssh -W %h:%p jumpbox")
        );
    }

    #[test]
    fn test_lookup_first_match_wins() {
        let mut profile = HostProfile {
            hostname: "incus_other".to_string(),
            ..Default::default()
        };
        SshConfigLookup::apply_content(SAMPLE, "incus_other", &mut profile);

        // 只命中通配块，hostname 保持别名本身
        assert_eq!(profile.hostname, "incus_other");
        assert_eq!(profile.user.as_deref(), Some("fallback"));
        assert_eq!(profile.port, Some(22));
        assert!(profile.proxy_command.is_none());
    }

    #[test]
    fn test_pattern_matching() {
        assert!(SshConfigLookup::pattern_matches("incus_*", "incus_doc-dev"));
        assert!(SshConfigLookup::pattern_matches("*", "anything"));
        assert!(SshConfigLookup::pattern_matches("host?", "host1"));
        assert!(!SshConfigLookup::pattern_matches("incus_*", "lxd_doc-dev"));
    }

    #[test]
    fn test_lookup_missing_file_returns_alias() {
        let profile =
            SshConfigLookup::lookup(Path::new("/nonexistent/ssh_config"), "myhost").unwrap();
        assert_eq!(profile.hostname, "myhost");
        assert!(profile.user.is_none());
    }

    #[test]
    fn test_validate_local_root() {
        let config = SessionConfig::new("h", "c", "/home/alice/project");
        assert!(config.validate_local_root(Path::new("/home/alice")).is_ok());
        assert!(matches!(
            config.validate_local_root(Path::new("/home/bob")),
            Err(RemoteDevError::PathOutsideHome(_))
        ));
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::new("incus_doc-dev", "doc-dev", "/home/alice/p");
        assert_eq!(config.user, "ubuntu");
        assert_eq!(config.container_cli, "lxc");
        let config = config.with_container_cli("incus").with_user("admin");
        assert_eq!(config.container_cli, "incus");
        assert_eq!(config.user, "admin");
    }
}
