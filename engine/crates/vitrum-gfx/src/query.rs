/// 非阻塞读取的 query 结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GfxQueryResult {
    Ready(u64),
    /// GPU 还没有写入结果
    NotReady,
}

impl GfxQueryResult {
    /// occlusion query 是否有 sample 通过
    ///
    /// 结果未就绪时保守地认为有 sample 通过
    #[inline]
    pub fn any_samples_passed(self) -> bool {
        match self {
            Self::Ready(samples) => samples > 0,
            Self::NotReady => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ready_counts_as_visible() {
        assert!(GfxQueryResult::NotReady.any_samples_passed());
        assert!(GfxQueryResult::Ready(12).any_samples_passed());
        assert!(!GfxQueryResult::Ready(0).any_samples_passed());
    }
}
