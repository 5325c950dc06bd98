//! 会话管理
//!
//! 编排一次完整的远程容器开发会话：校验并派生工作目录、确保容器
//! 运行、解析 SSH 配置、建立连接，然后把命令执行、目录镜像和交互
//! 终端统一挂到同一个会话对象上。
//!
//! ## 功能
//! - `SessionManager` 持有可插拔的路径翻译器 / 行分类器 / 事件接收器
//! - `open` 按固定顺序完成会话准备（失败即中止，不做部分会话）
//! - `Session` 暴露 run / sync / interactive / empty_folders
//! - 会话关闭恰好一次（显式 `close` 或 Drop 兜底）

use std::path::Path;
use std::sync::Arc;

use crate::classify::{LineClassifier, SubstringClassifier};
use crate::config::{SessionConfig, SshConfigLookup};
use crate::connection::SshConnection;
use crate::container::ContainerLifecycleController;
use crate::error::RemoteDevError;
use crate::executor::{CommandExecutor, CommandRequest, CommandResult};
use crate::interactive::InteractiveShell;
use crate::mirror::{MirrorJob, MirrorSynchronizer};
use crate::paths::{PathTranslator, StagedHomeTranslator};
use crate::sink::{default_sink, SharedSink};

/// 清空目录的作用侧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyScope {
    /// 仅本地
    Local,
    /// 仅远程
    Remote,
    /// 两侧
    Both,
}

/// 会话管理器
///
/// 三个协作件都可替换，默认值覆盖常规场景。
pub struct SessionManager {
    translator: Arc<dyn PathTranslator>,
    classifier: Arc<dyn LineClassifier>,
    sink: SharedSink,
}

impl SessionManager {
    /// 用默认协作件创建管理器
    ///
    /// 翻译器从当前环境探测本地主目录和用户名。
    pub fn new(remote_user: impl Into<String>) -> Result<Self, RemoteDevError> {
        Ok(Self {
            translator: Arc::new(StagedHomeTranslator::detect(remote_user)?),
            classifier: Arc::new(SubstringClassifier::default()),
            sink: default_sink(),
        })
    }

    /// 替换路径翻译器
    pub fn with_translator(mut self, translator: Arc<dyn PathTranslator>) -> Self {
        self.translator = translator;
        self
    }

    /// 替换行分类器
    pub fn with_classifier(mut self, classifier: Arc<dyn LineClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// 替换事件接收器
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// 打开会话
    ///
    /// 顺序固定：校验本地目录在主目录之下、派生远程工作目录、确保
    /// 容器运行、解析 SSH 配置、建立连接。任何一步失败都直接上抛，
    /// 不会留下半开的会话。
    pub fn open(&self, config: SessionConfig) -> Result<Session, RemoteDevError> {
        config.validate_local_root(&self.translator.local_home())?;
        let remote_root = self.translator.to_remote(&config.local_root)?;

        let controller =
            ContainerLifecycleController::new(config.container_cli.clone(), self.sink.clone());
        controller.ensure_running(&config.container)?;

        let profile = SshConfigLookup::lookup(&config.ssh_config_path, &config.remote_host)?;
        let connection = SshConnection::new(profile, config.user.clone());
        connection.connect()?;

        let prompt = format!("{}@{}", connection.user(), config.remote_host);
        let executor = CommandExecutor::new(
            self.translator.clone(),
            self.classifier.clone(),
            self.sink.clone(),
            remote_root.clone(),
            prompt,
        );
        let mirror = MirrorSynchronizer::new(
            config.container_cli.clone(),
            config.container.clone(),
            config.remote_host.clone(),
            self.translator.clone(),
            self.classifier.clone(),
            self.sink.clone(),
        );
        let shell = InteractiveShell::new(self.sink.clone());

        tracing::info!(
            "[Session] 会话已就绪: {} (容器 {}, 远程目录 {})",
            config.remote_host,
            config.container,
            remote_root
        );

        Ok(Session {
            config,
            connection,
            executor,
            mirror,
            shell,
            remote_root,
            sink: self.sink.clone(),
            closed: false,
        })
    }
}

/// 一次已建立的远程容器会话
///
/// 所有远程操作共用同一条底层连接；会话对象销毁时连接随之关闭。
pub struct Session {
    config: SessionConfig,
    connection: SshConnection,
    executor: CommandExecutor,
    mirror: MirrorSynchronizer,
    shell: InteractiveShell,
    remote_root: String,
    sink: SharedSink,
    closed: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("remote_root", &self.remote_root)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// 会话配置
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// 会话的远程工作目录（打开时派生，之后不变）
    pub fn remote_root(&self) -> &str {
        &self.remote_root
    }

    /// 执行命令请求
    pub fn run(&self, request: &CommandRequest) -> Result<CommandResult, RemoteDevError> {
        self.executor.run(&self.connection.ssh()?, request)
    }

    /// 在远程工作目录中依次执行一组命令
    pub fn run_in_working_dir<S: Into<String>>(
        &self,
        commands: impl IntoIterator<Item = S>,
    ) -> Result<CommandResult, RemoteDevError> {
        self.run(&CommandRequest::new(commands).in_working_dir())
    }

    /// 执行一次目录镜像同步
    pub fn sync(&self, job: &MirrorJob) -> Result<(), RemoteDevError> {
        self.mirror.sync(&self.connection.ssh()?, &self.executor, job)
    }

    /// 进入交互式远程 Shell
    ///
    /// `in_working_dir` 为真时先把切换目录命令排进预置队列，再接
    /// `preset` 中的命令。阻塞到远端 shell 退出为止。
    pub fn interactive(
        &self,
        preset: Vec<String>,
        in_working_dir: bool,
    ) -> Result<(), RemoteDevError> {
        let preset = interactive_preset(&self.remote_root, in_working_dir, preset);
        self.shell.run(&self.connection.ssh()?, preset)
    }

    /// 清空工作目录下的若干子目录
    ///
    /// `folders` 为相对于工作目录的子目录名；目录本身保留，仅清空
    /// 内容。远程侧失败不中断后续目录。
    pub fn empty_folders(
        &self,
        folders: &[&str],
        scope: EmptyScope,
    ) -> Result<(), RemoteDevError> {
        for folder in folders {
            if scope != EmptyScope::Remote {
                let local = self.config.local_root.join(folder);
                empty_local_folder(&local)?;
                self.sink.info(&format!("已清空本地目录 {}", local.display()));
            }
            if scope != EmptyScope::Local {
                let remote = format!("{}/{}", self.remote_root, folder);
                self.run(&CommandRequest::single(format!("rm -rf {}/*", remote))
                    .ignoring_failures())?;
                self.sink.info(&format!("已清空远程目录 {}", remote));
            }
        }
        Ok(())
    }

    /// 关闭会话
    ///
    /// 消耗会话对象，连接随之断开。不调用时由 Drop 兜底，连接
    /// 最多关闭一次。
    pub fn close(mut self) {
        self.closed = true;
        self.connection.close();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            self.connection.close();
        }
    }
}

/// 构造交互会话的预置命令队列
fn interactive_preset(remote_root: &str, in_working_dir: bool, extra: Vec<String>) -> Vec<String> {
    let mut preset = Vec::with_capacity(extra.len() + 1);
    if in_working_dir {
        preset.push(format!("cd {}", remote_root));
    }
    preset.extend(extra);
    preset
}

/// 清空本地目录内容（保留目录本身）
///
/// 目录不存在时新建，调用之后目录一定存在且为空。
fn empty_local_folder(dir: &Path) -> Result<(), RemoteDevError> {
    if !dir.exists() {
        return std::fs::create_dir_all(dir).map_err(|e| {
            RemoteDevError::LocalCommandFailed(format!("创建 {} 失败: {}", dir.display(), e))
        });
    }
    let entries = std::fs::read_dir(dir)
        .map_err(|e| RemoteDevError::LocalCommandFailed(format!("读取目录失败: {}", e)))?;
    for entry in entries {
        let entry = entry
            .map_err(|e| RemoteDevError::LocalCommandFailed(format!("读取目录失败: {}", e)))?;
        let path = entry.path();
        let removed = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        removed.map_err(|e| {
            RemoteDevError::LocalCommandFailed(format!("删除 {} 失败: {}", path.display(), e))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interactive_preset_prepends_cd() {
        let preset = interactive_preset(
            "/home/ubuntu/from_host/alice/project",
            true,
            vec!["make".to_string()],
        );
        assert_eq!(
            preset,
            vec!["cd /home/ubuntu/from_host/alice/project", "make"]
        );

        let preset = interactive_preset("/ignored", false, vec!["make".to_string()]);
        assert_eq!(preset, vec!["make"]);
    }

    #[test]
    fn test_open_rejects_root_outside_home() {
        let manager = SessionManager::new("ubuntu")
            .unwrap()
            .with_translator(Arc::new(StagedHomeTranslator::new(
                "/home/alice",
                "alice",
                "ubuntu",
            )));
        let config = SessionConfig::new("incus_doc-dev", "doc-dev", "/tmp/scratch");

        // 任何远程操作之前就被拒绝
        let err = manager.open(config).unwrap_err();
        assert!(matches!(err, RemoteDevError::PathOutsideHome(_)));
    }

    #[test]
    fn test_empty_local_folder_keeps_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("b.txt"), "y").unwrap();

        empty_local_folder(dir.path()).unwrap();

        assert!(dir.path().exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_empty_local_folder_creates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");
        assert!(!target.exists());

        empty_local_folder(&target).unwrap();

        assert!(target.is_dir());
        assert_eq!(std::fs::read_dir(&target).unwrap().count(), 0);
    }
}
