use super::PoolPos;

#[derive(Clone, Copy, Default)]
struct Frame {
    pin_count: u32,
    referenced: bool,
}

/// ClockReplacer picks victim buffers for the buffer manager using the clock (second chance) policy.
pub(in crate::buffer) struct ClockReplacer {
    frames: Vec<Frame>,
    clock_hand: PoolPos,
    unpinned: usize,
}

impl ClockReplacer {
    pub fn new(pool_size: usize) -> Self {
        Self {
            frames: vec![Frame::default(); pool_size],
            clock_hand: 0,
            unpinned: pool_size,
        }
    }

    pub fn pin(&mut self, buffer: PoolPos) {
        let frame = &mut self.frames[buffer];
        frame.pin_count += 1;
        frame.referenced = true;
        if frame.pin_count == 1 {
            self.unpinned -= 1;
        }
    }

    pub fn unpin(&mut self, buffer: PoolPos) {
        let frame = &mut self.frames[buffer];
        frame.pin_count -= 1;
        if frame.pin_count == 0 {
            self.unpinned += 1;
        }
    }

    /// Returns None if all buffers are currently pinned, else the next unpinned buffer
    /// whose reference bit has already been cleared by the clock hand.
    pub fn find_free_buffer(&mut self) -> Option<PoolPos> {
        if self.unpinned == 0 {
            return None;
        }
        loop {
            let pos = self.clock_hand;
            self.clock_hand = (self.clock_hand + 1) % self.frames.len();
            let frame = &mut self.frames[pos];
            if frame.pin_count != 0 {
                continue;
            }
            if frame.referenced {
                frame.referenced = false;
            } else {
                return Some(pos);
            }
        }
    }
}
