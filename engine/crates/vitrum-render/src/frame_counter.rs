use std::{fmt::Display, ops::Deref};

/// 帧标签（A/B/C）
///
/// 表示当前处于 frames in flight 的哪一个 slot，通过 `Deref` 转换为索引 0/1/2。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLabel {
    A,
    B,
    C,
}

impl FrameLabel {
    const INDEX: [usize; 3] = [0, 1, 2];
    pub const ALL: [FrameLabel; 3] = [Self::A, Self::B, Self::C];

    #[inline]
    pub fn from_usize(idx: usize) -> Self {
        match idx {
            0 => Self::A,
            1 => Self::B,
            2 => Self::C,
            _ => panic!("Invalid frame index: {idx}"),
        }
    }
}

impl Deref for FrameLabel {
    type Target = usize;
    #[inline]
    fn deref(&self) -> &Self::Target {
        match self {
            Self::A => &Self::INDEX[0],
            Self::B => &Self::INDEX[1],
            Self::C => &Self::INDEX[2],
        }
    }
}

impl Display for FrameLabel {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
            Self::C => write!(f, "C"),
        }
    }
}

/// 帧计数器
///
/// `frame_id` 单调递增，slot 为 `frame_id % slot_count`
pub struct FrameCounter {
    /// 当前的帧序号，一直累加
    frame_id: u64,
    slot_count: usize,
}

// new & init
impl FrameCounter {
    pub const MAX_SLOTS: usize = 3;

    pub fn new(init_frame_id: u64, slot_count: usize) -> Self {
        assert!(
            (1..=Self::MAX_SLOTS).contains(&slot_count),
            "slot count {slot_count} out of range"
        );
        Self {
            frame_id: init_frame_id,
            slot_count,
        }
    }
}

// update
impl FrameCounter {
    #[inline]
    pub fn next_frame(&mut self) {
        self.frame_id = self.frame_id.wrapping_add(1);
    }
}

// getters
impl FrameCounter {
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }
    #[inline]
    pub fn slot_index(&self) -> usize {
        (self.frame_id % self.slot_count as u64) as usize
    }
    #[inline]
    pub fn frame_label(&self) -> FrameLabel {
        FrameLabel::from_usize(self.slot_index())
    }
    /// 所有 slot 的标签
    #[inline]
    pub fn frame_labels(&self) -> &'static [FrameLabel] {
        &FrameLabel::ALL[..self.slot_count]
    }
    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}{}]", self.frame_id, self.frame_label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_rotation_is_modulo() {
        // 2 不是 2^n - 1，按位与会得到错误的 slot 序列
        let mut counter = FrameCounter::new(0, 2);
        let slots = (0..6)
            .map(|_| {
                let slot = counter.slot_index();
                counter.next_frame();
                slot
            })
            .collect::<Vec<_>>();
        assert_eq!(slots, vec![0, 1, 0, 1, 0, 1]);

        let mut counter = FrameCounter::new(0, 3);
        let labels = (0..4)
            .map(|_| {
                let label = counter.frame_label();
                counter.next_frame();
                label
            })
            .collect::<Vec<_>>();
        assert_eq!(labels, vec![FrameLabel::A, FrameLabel::B, FrameLabel::C, FrameLabel::A]);
    }

    #[test]
    fn test_frame_name() {
        let counter = FrameCounter::new(42, 2);
        assert_eq!(counter.frame_name(), "[F42A]");
        assert_eq!(counter.frame_labels(), &[FrameLabel::A, FrameLabel::B]);
        assert_eq!(*FrameLabel::C, 2);
    }

    #[test]
    fn test_single_slot() {
        let mut counter = FrameCounter::new(0, 1);
        counter.next_frame();
        assert_eq!(counter.slot_index(), 0);
    }
}
