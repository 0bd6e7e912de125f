//! Physical memory: reference-counted page frames.
//!
//! Frame `n` lives at physical address `n * PAGE_SIZE`. Frame 0 is reserved
//! so that no valid mapping ever points at physical address zero. Backing
//! storage for a frame is materialized on first allocation and reused after
//! the frame is freed.
use alloc::{boxed::Box, vec::Vec};
use exos::{
    KernelError,
    addressing::{PAGE_SHIFT, PAGE_SIZE, Pa},
};

struct Frame {
    data: Box<[u8; PAGE_SIZE]>,
    refcnt: usize,
}

pub(crate) struct PhysMem {
    frames: Vec<Option<Frame>>,
    free: Vec<usize>,
    npages: usize,
}

impl PhysMem {
    pub(crate) fn new(npages: usize) -> Self {
        let mut frames = Vec::new();
        frames.resize_with(npages, || None);
        // Hand out low frames first.
        let free = (1..npages).rev().collect();
        Self {
            frames,
            free,
            npages,
        }
    }

    /// Allocates a zeroed frame with a reference count of zero.
    pub(crate) fn alloc(&mut self) -> Result<Pa, KernelError> {
        let n = self.free.pop().ok_or(KernelError::NoMemory)?;
        match &mut self.frames[n] {
            Some(frame) => {
                frame.data.fill(0);
                frame.refcnt = 0;
            }
            slot @ None => {
                *slot = Some(Frame {
                    data: Box::new([0; PAGE_SIZE]),
                    refcnt: 0,
                });
            }
        }
        Pa::new(n << PAGE_SHIFT).ok_or(KernelError::NoMemory)
    }

    fn frame(&self, pa: Pa) -> Option<&Frame> {
        self.frames.get(pa.frame_number())?.as_ref()
    }

    fn frame_mut(&mut self, pa: Pa) -> Option<&mut Frame> {
        self.frames.get_mut(pa.frame_number())?.as_mut()
    }

    pub(crate) fn incref(&mut self, pa: Pa) {
        if let Some(frame) = self.frame_mut(pa) {
            frame.refcnt += 1;
        }
    }

    /// Drops one reference to the frame at `pa`, freeing it on the last one.
    pub(crate) fn decref(&mut self, pa: Pa) {
        let n = pa.frame_number();
        let freed = match self.frame_mut(pa) {
            Some(frame) => {
                frame.refcnt = frame.refcnt.saturating_sub(1);
                frame.refcnt == 0
            }
            None => false,
        };
        if freed {
            self.free.push(n);
        }
    }

    pub(crate) fn refcount(&self, pa: Pa) -> usize {
        self.frame(pa).map(|f| f.refcnt).unwrap_or(0)
    }

    pub(crate) fn bytes(&self, pa: Pa) -> Option<&[u8; PAGE_SIZE]> {
        self.frame(pa).map(|f| &*f.data)
    }

    pub(crate) fn bytes_mut(&mut self, pa: Pa) -> Option<&mut [u8; PAGE_SIZE]> {
        self.frame_mut(pa).map(|f| &mut *f.data)
    }

    pub(crate) fn free_pages(&self) -> usize {
        self.free.len()
    }

    pub(crate) fn npages(&self) -> usize {
        self.npages
    }
}
