//! 输出行分类
//!
//! 远程错误流和传输工具输出都依赖文本片段匹配来判定成败，这种启发式
//! 在工具版本和 locale 之间并不稳定。所有匹配规则集中在这一个接口后面，
//! 以便将来替换为退出码或结构化输出检查而不影响调用方。

/// 行分类接口
pub trait LineClassifier: Send + Sync {
    /// 错误流上的该行是否为可容忍的警告
    fn is_warning(&self, line: &str) -> bool;

    /// 传输工具输出的该行是否表示传输失败
    fn is_transfer_failure(&self, line: &str) -> bool;
}

/// 默认的子串匹配分类器
pub struct SubstringClassifier {
    /// 警告标记（错误流包含该子串时不判为失败）
    warning_marker: &'static str,
    /// 传输失败标记
    failure_markers: &'static [&'static str],
}

impl Default for SubstringClassifier {
    fn default() -> Self {
        Self {
            warning_marker: "WARNING",
            failure_markers: &["rsync error", "failed"],
        }
    }
}

impl LineClassifier for SubstringClassifier {
    fn is_warning(&self, line: &str) -> bool {
        line.contains(self.warning_marker)
    }

    fn is_transfer_failure(&self, line: &str) -> bool {
        self.failure_markers.iter().any(|m| line.contains(m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_marker_tolerated() {
        let c = SubstringClassifier::default();
        assert!(c.is_warning("WARNING: remote host identification has changed"));
        assert!(!c.is_warning("error: no such file"));
        assert!(!c.is_warning(""));
    }

    #[test]
    fn test_transfer_failure_markers() {
        let c = SubstringClassifier::default();
        assert!(c.is_transfer_failure("rsync error: some files could not be transferred"));
        assert!(c.is_transfer_failure("rsync: send_files failed to open"));
        assert!(!c.is_transfer_failure("sent 1,234 bytes  received 56 bytes"));
    }
}
