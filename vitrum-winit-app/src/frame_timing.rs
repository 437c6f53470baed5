use std::time::{Duration, Instant};

/// 帧间隔以及累计时间，每帧开始时 tick 一次
#[derive(Debug)]
pub struct FrameTiming {
    last_tick: Instant,

    delta: Duration,
    elapsed: Duration,
    frame_count: u64,
}

impl Default for FrameTiming {
    fn default() -> Self {
        Self {
            last_tick: Instant::now(),
            delta: Duration::ZERO,
            elapsed: Duration::ZERO,
            frame_count: 0,
        }
    }
}

// update
impl FrameTiming {
    pub fn tick(&mut self) {
        let now = Instant::now();
        self.advance(now.duration_since(self.last_tick));
        self.last_tick = now;
    }

    fn advance(&mut self, delta: Duration) {
        self.delta = delta;
        self.elapsed += delta;
        self.frame_count += 1;
    }

    /// 窗口最小化之类的停顿之后调用，避免下一帧出现很大的 delta
    pub fn reset_tick(&mut self) {
        self.last_tick = Instant::now();
    }
}

// getters
impl FrameTiming {
    #[inline]
    pub fn delta(&self) -> Duration {
        self.delta
    }

    /// 上一帧的时间（秒）
    #[inline]
    pub fn delta_s(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    #[inline]
    pub fn elapsed_s(&self) -> f32 {
        self.elapsed.as_secs_f32()
    }

    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// 当前帧率，第一帧之前为 0
    #[inline]
    pub fn fps(&self) -> f32 {
        if self.delta.is_zero() { 0.0 } else { 1.0 / self.delta.as_secs_f32() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance() {
        let mut timing = FrameTiming::default();
        assert_eq!(timing.fps(), 0.0);

        timing.advance(Duration::from_millis(20));
        timing.advance(Duration::from_millis(10));
        assert_eq!(timing.frame_count(), 2);
        assert_eq!(timing.delta(), Duration::from_millis(10));
        assert!((timing.elapsed_s() - 0.03).abs() < 1e-6);
        assert!((timing.fps() - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_tick_counts_frames() {
        let mut timing = FrameTiming::default();
        timing.tick();
        timing.tick();
        assert_eq!(timing.frame_count(), 2);
    }
}
