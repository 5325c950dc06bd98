//! 目录镜像同步
//!
//! 通过外部单向树复制工具（rsync）在本地与容器之间做单向同步。
//! 传输不走裸网络端点，而是经一个临时生成的委托脚本把 rsync 的
//! 远程 shell 调用转为容器 exec 调用。
//!
//! ## 功能
//! - 双向同步（本地→远程 / 远程→本地），可选删除目标侧多余文件
//! - 远程路径开头的 `~` 解析为远程用户主目录
//! - 本地→远程前先在远程建立目标目录树
//! - 按行解析工具输出，出现失败标记即判定失败（基于文本而非退出码，
//!   已知的脆弱点，规则集中在 `classify` 模块）
//! - 无论成败都记录本次 (本地, 远程) 目录对

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use ssh2::Session;
use tempfile::NamedTempFile;

use crate::classify::LineClassifier;
use crate::error::RemoteDevError;
use crate::executor::{CommandExecutor, CommandRequest};
use crate::paths::PathTranslator;
use crate::sink::SharedSink;

/// 同步方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorDirection {
    /// 本地 -> 远程
    ToRemote,
    /// 远程 -> 本地
    FromRemote,
}

/// 镜像任务
///
/// 方向与删除标志完全决定传输工具的调用方式，没有其他隐藏状态。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorJob {
    /// 同步方向
    pub direction: MirrorDirection,
    /// 本地目录
    pub local_dir: PathBuf,
    /// 远程目录（允许以 `~` 开头）
    pub remote_dir: String,
    /// 是否删除目标侧多余文件
    pub delete: bool,
}

impl MirrorJob {
    /// 创建任务
    pub fn new(
        direction: MirrorDirection,
        local_dir: impl Into<PathBuf>,
        remote_dir: impl Into<String>,
        delete: bool,
    ) -> Self {
        Self {
            direction,
            local_dir: local_dir.into(),
            remote_dir: remote_dir.into(),
            delete,
        }
    }
}

/// 镜像同步器
pub struct MirrorSynchronizer {
    /// 容器命令行工具（委托脚本中使用）
    cli: String,
    /// 容器名
    container: String,
    /// 远程主机别名（仅用于日志）
    host: String,
    /// 路径翻译器（解析 `~` 别名）
    translator: Arc<dyn PathTranslator>,
    /// 行分类器
    classifier: Arc<dyn LineClassifier>,
    /// 事件接收器
    sink: SharedSink,
}

impl MirrorSynchronizer {
    /// 创建同步器
    pub fn new(
        cli: impl Into<String>,
        container: impl Into<String>,
        host: impl Into<String>,
        translator: Arc<dyn PathTranslator>,
        classifier: Arc<dyn LineClassifier>,
        sink: SharedSink,
    ) -> Self {
        Self {
            cli: cli.into(),
            container: container.into(),
            host: host.into(),
            translator,
            classifier,
            sink,
        }
    }

    /// 执行一次镜像同步
    ///
    /// 委托脚本每次调用新建，不跨调用共享。工具输出中出现失败标记时
    /// 返回 [`RemoteDevError::MirrorFailed`]——部分镜像不能静默继续。
    pub fn sync(
        &self,
        ssh: &Session,
        executor: &CommandExecutor,
        job: &MirrorJob,
    ) -> Result<(), RemoteDevError> {
        let remote_dir = self.translator.resolve_home_alias(&job.remote_dir);
        let local_dir = job.local_dir.to_string_lossy().to_string();

        if job.direction == MirrorDirection::ToRemote {
            // 目标目录树不存在时 rsync 会失败，先建好
            executor.run(ssh, &CommandRequest::single(format!("mkdir -p {}", remote_dir)))?;
        }

        let shim = write_exec_shim(&self.cli)?;
        let shim_path = shim.path().to_string_lossy().to_string();
        let args = build_rsync_args(
            job.direction,
            &local_dir,
            &remote_dir,
            job.delete,
            &shim_path,
            &self.container,
        );

        let result = self.run_rsync(&args);

        // 无论成败都记录本次目录对
        let pair = match job.direction {
            MirrorDirection::ToRemote => {
                format!("rsync: 本地 {} -> {}:{}", local_dir, self.host, remote_dir)
            }
            MirrorDirection::FromRemote => {
                format!("rsync: {}:{} -> 本地 {}", self.host, remote_dir, local_dir)
            }
        };
        self.sink.info(&pair);
        tracing::info!("[Mirror] {}", pair);

        result
    }

    /// 运行 rsync 并按行解析输出
    ///
    /// 错误流由独立线程排空：两个管道任意一个写满都会让子进程阻塞，
    /// 顺序读取会在另一个管道上相互等待。
    fn run_rsync(&self, args: &[String]) -> Result<(), RemoteDevError> {
        let mut child = Command::new("rsync")
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RemoteDevError::MirrorFailed(format!("启动 rsync 失败: {}", e)))?;

        let stderr_worker = child.stderr.take().map(|stderr| {
            let classifier = self.classifier.clone();
            let sink = self.sink.clone();
            std::thread::spawn(move || {
                let mut failed = false;
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    let line = line.replace('\r', "");
                    if classifier.is_transfer_failure(&line) {
                        failed = true;
                        sink.error(&format!("rsync 失败: {}", line));
                    } else {
                        sink.warn(&line);
                    }
                }
                failed
            })
        });

        let mut success = true;

        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines() {
                let line = match line {
                    Ok(l) => l.replace('\r', ""),
                    Err(e) => {
                        self.sink.error(&format!("读取 rsync 输出失败: {}", e));
                        continue;
                    }
                };
                if self.classifier.is_transfer_failure(&line) {
                    success = false;
                    self.sink.error(&format!("rsync 失败: {}", line));
                } else {
                    self.sink.info(&line);
                }
            }
        }

        if let Some(worker) = stderr_worker {
            if worker.join().unwrap_or(false) {
                success = false;
            }
        }

        // 成败判定基于输出文本，退出码不参与（见模块说明）
        let _ = child
            .wait()
            .map_err(|e| RemoteDevError::MirrorFailed(format!("等待 rsync 失败: {}", e)))?;

        if success {
            Ok(())
        } else {
            Err(RemoteDevError::MirrorFailed(
                "rsync 输出包含失败标记，同步中止".to_string(),
            ))
        }
    }
}

/// 生成委托执行脚本
///
/// rsync 以 `<container> <命令...>` 的形式调用该脚本，脚本把调用
/// 转发为容器 exec。脚本文件每次新建，随返回的句柄一起存活。
fn write_exec_shim(cli: &str) -> Result<NamedTempFile, RemoteDevError> {
    use std::os::unix::fs::PermissionsExt;

    let mut file = NamedTempFile::new()
        .map_err(|e| RemoteDevError::MirrorFailed(format!("创建委托脚本失败: {}", e)))?;

    let script = format!(
        "#!/bin/sh\nctn=\"${{1}}\"\nshift\nexec {} exec \"${{ctn}}\" -- \"$@\"\n",
        cli
    );
    file.write_all(script.as_bytes())
        .map_err(|e| RemoteDevError::MirrorFailed(format!("写入委托脚本失败: {}", e)))?;
    file.flush()
        .map_err(|e| RemoteDevError::MirrorFailed(format!("写入委托脚本失败: {}", e)))?;

    std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o755))
        .map_err(|e| RemoteDevError::MirrorFailed(format!("设置脚本权限失败: {}", e)))?;

    Ok(file)
}

/// 构造 rsync 参数
///
/// 两个方向都使用归档、压缩与详细进度；仅当 `delete` 为真时追加
/// 删除多余文件的标志。
fn build_rsync_args(
    direction: MirrorDirection,
    local_dir: &str,
    remote_dir: &str,
    delete: bool,
    shim_path: &str,
    container: &str,
) -> Vec<String> {
    let remote_spec = format!("{}:{}/", container, remote_dir);
    let local_spec = format!("{}/", local_dir);

    let mut args = vec!["-avPz".to_string(), "-e".to_string(), shim_path.to_string()];
    match direction {
        MirrorDirection::ToRemote => {
            args.push(local_spec);
            args.push(remote_spec);
        }
        MirrorDirection::FromRemote => {
            args.push(remote_spec);
            args.push(local_spec);
        }
    }
    if delete {
        args.push("--delete".to_string());
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsync_args_to_remote_with_delete() {
        let args = build_rsync_args(
            MirrorDirection::ToRemote,
            "/home/alice/project",
            "/home/ubuntu/from_host/alice/project",
            true,
            "/tmp/shim",
            "doc-dev",
        );
        assert_eq!(
            args,
            vec![
                "-avPz",
                "-e",
                "/tmp/shim",
                "/home/alice/project/",
                "doc-dev:/home/ubuntu/from_host/alice/project/",
                "--delete",
            ]
        );
    }

    #[test]
    fn test_rsync_args_from_remote_keep() {
        let args = build_rsync_args(
            MirrorDirection::FromRemote,
            "/home/alice/project",
            "/home/ubuntu/from_host/alice/project",
            false,
            "/tmp/shim",
            "doc-dev",
        );
        assert_eq!(
            args,
            vec![
                "-avPz",
                "-e",
                "/tmp/shim",
                "doc-dev:/home/ubuntu/from_host/alice/project/",
                "/home/alice/project/",
            ]
        );
        assert!(!args.contains(&"--delete".to_string()));
    }

    #[test]
    fn test_exec_shim_content_and_mode() {
        use std::os::unix::fs::PermissionsExt;

        let shim = write_exec_shim("incus").unwrap();
        let content = std::fs::read_to_string(shim.path()).unwrap();
        assert!(content.starts_with("#!/bin/sh\n"));
        assert!(content.contains("exec incus exec \"${ctn}\" -- \"$@\""));

        let mode = std::fs::metadata(shim.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[test]
    fn test_rsync_heavy_stderr_drained_without_hang() {
        use std::os::unix::fs::PermissionsExt;
        use std::time::{Duration, Instant};

        use crate::classify::SubstringClassifier;
        use crate::paths::StagedHomeTranslator;
        use crate::sink::default_sink;

        // 假 rsync：先往错误流写远超管道缓冲的内容，之后才写标准输出。
        // 错误流没人读时子进程会在这里阻塞。
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("rsync");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             i=0\n\
             while [ $i -lt 3200 ]; do\n\
             \techo \"rsync error: cannot read file $i (permission denied) ......................\" 1>&2\n\
             \ti=$((i+1))\n\
             done\n\
             echo done\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let old_path = std::env::var("PATH").unwrap_or_default();
        std::env::set_var("PATH", format!("{}:{}", dir.path().display(), old_path));

        let sync = MirrorSynchronizer::new(
            "lxc",
            "doc-dev",
            "incus_doc-dev",
            Arc::new(StagedHomeTranslator::new("/home/alice", "alice", "ubuntu")),
            Arc::new(SubstringClassifier::default()),
            default_sink(),
        );

        let handle = std::thread::spawn(move || sync.run_rsync(&["-avPz".to_string()]));
        let deadline = Instant::now() + Duration::from_secs(5);
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
        }
        std::env::set_var("PATH", old_path);

        assert!(handle.is_finished(), "rsync 输出排空不应卡死");
        assert!(matches!(
            handle.join().unwrap(),
            Err(RemoteDevError::MirrorFailed(_))
        ));
    }

    #[test]
    fn test_mirror_job_serde() {
        let job = MirrorJob::new(MirrorDirection::ToRemote, "/home/a/p", "~/x", true);
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"to_remote\""));
        let back: MirrorJob = serde_json::from_str(&json).unwrap();
        assert!(back.delete);
        assert_eq!(back.remote_dir, "~/x");
    }
}
