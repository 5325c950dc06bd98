//! remotedev - 远程容器开发会话引擎
//!
//! 把一台远程主机上的系统容器当作本地工作区的延伸：本地主目录下的
//! 路径按固定规则映射到容器内的暂存区，命令在容器内执行、输出实时
//! 回流并附带指回本地文件的交叉引用，目录用 rsync 双向镜像，需要时
//! 可进入实时交互终端。
//!
//! ## 模块结构
//! - `error` - 错误类型定义
//! - `sink` - 事件接收器（进度与输出的观察端口）
//! - `classify` - 输出行分类（警告 / 传输失败标记）
//! - `config` - 会话配置与 SSH 配置文件查询
//! - `paths` - 本地路径与容器内路径的纯映射
//! - `local` - 本地命令执行（带超时）
//! - `container` - 容器生命周期控制
//! - `connection` - SSH 连接（认证、主机密钥校验、ProxyCommand）
//! - `executor` - 远程命令执行与输出整理
//! - `mirror` - 目录镜像同步
//! - `interactive` - 交互式远程 Shell
//! - `manager` - 会话编排
//! - `logging` - 日志初始化
//!
//! ## 使用示例
//! ```ignore
//! use remotedev::{SessionConfig, SessionManager, CommandRequest};
//!
//! let manager = SessionManager::new("ubuntu")?;
//! let session = manager.open(SessionConfig::new(
//!     "incus_doc-dev",
//!     "doc-dev",
//!     "/home/alice/Documents/git_repos/docs",
//! ))?;
//! session.run_in_working_dir(["make clean", "make html"])?;
//! session.close();
//! ```

pub mod classify;
pub mod config;
pub mod connection;
pub mod container;
pub mod error;
pub mod executor;
pub mod interactive;
pub mod local;
pub mod logging;
pub mod manager;
pub mod mirror;
pub mod paths;
pub mod sink;


// 重新导出常用类型
pub use classify::{LineClassifier, SubstringClassifier};
pub use config::{HostProfile, SessionConfig, SshConfigLookup, DEFAULT_CONTAINER_CLI};
pub use connection::{ConnectionState, SshConnection, DEFAULT_SSH_PORT};
pub use container::ContainerLifecycleController;
pub use error::RemoteDevError;
pub use executor::{compose_command, CommandExecutor, CommandRequest, CommandResult};
pub use interactive::InteractiveShell;
pub use local::{run_local_cmd, LocalOutput};
pub use manager::{EmptyScope, Session, SessionManager};
pub use mirror::{MirrorDirection, MirrorJob, MirrorSynchronizer};
pub use paths::{PathTranslator, StagedHomeTranslator, DEFAULT_REMOTE_USER, STAGING_DIR};
pub use sink::{default_sink, EventSink, SharedSink, TracingSink};
