//! 可观测性端口
//!
//! 各组件通过注入的 `EventSink` 上报分级事件，而不是直接调用全局日志。
//! 默认实现 `TracingSink` 将事件转发到 tracing。

use std::sync::Arc;

/// 分级事件接收器
///
/// 组件产生的每一行输出（命令回显、rsync 进度、倒计时等）都会实时
/// 推送到该接收器。
pub trait EventSink: Send + Sync {
    /// 普通信息行
    fn info(&self, line: &str);
    /// 警告行（被容忍、不影响成功判定）
    fn warn(&self, line: &str);
    /// 错误行
    fn error(&self, line: &str);
}

/// 默认接收器：转发到 tracing
pub struct TracingSink;

impl EventSink for TracingSink {
    fn info(&self, line: &str) {
        tracing::info!("{}", line);
    }

    fn warn(&self, line: &str) {
        tracing::warn!("{}", line);
    }

    fn error(&self, line: &str) {
        tracing::error!("{}", line);
    }
}

/// 共享接收器类型
pub type SharedSink = Arc<dyn EventSink>;

/// 创建默认接收器
pub fn default_sink() -> SharedSink {
    Arc::new(TracingSink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// 测试用接收器：按级别收集所有行
    pub struct CollectingSink {
        pub lines: Mutex<Vec<(String, String)>>,
    }

    impl CollectingSink {
        pub fn new() -> Self {
            Self {
                lines: Mutex::new(Vec::new()),
            }
        }
    }

    impl EventSink for CollectingSink {
        fn info(&self, line: &str) {
            self.lines.lock().push(("info".to_string(), line.to_string()));
        }

        fn warn(&self, line: &str) {
            self.lines.lock().push(("warn".to_string(), line.to_string()));
        }

        fn error(&self, line: &str) {
            self.lines.lock().push(("error".to_string(), line.to_string()));
        }
    }

    #[test]
    fn test_collecting_sink_levels() {
        let sink = CollectingSink::new();
        sink.info("a");
        sink.warn("b");
        sink.error("c");
        let lines = sink.lines.lock();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], ("info".to_string(), "a".to_string()));
        assert_eq!(lines[2], ("error".to_string(), "c".to_string()));
    }
}
