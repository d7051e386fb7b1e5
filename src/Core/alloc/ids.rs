use parking_lot::Mutex;
use std::collections::HashSet;

/// Never handed out; marks "no buffer".
pub const INVALID_BUFFER_ID: u32 = 0;

/// Hands out buffer ids unique among the live buffers of one allocator.
///
/// Ids start at 1 and keep increasing; after `u32::MAX` they wrap back to 1,
/// skipping ids still in use.
#[derive(Debug)]
pub struct BufferIdGenerator {
    state: Mutex<IdState>,
}

#[derive(Debug)]
struct IdState {
    last_id: u32,
    in_use: HashSet<u32>,
}

impl BufferIdGenerator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(IdState {
                last_id: INVALID_BUFFER_ID,
                in_use: HashSet::new(),
            }),
        }
    }

    /// Next free id, `None` once every id is taken.
    pub fn allocate(&self) -> Option<u32> {
        let mut state = self.state.lock();
        if state.in_use.len() >= (u32::MAX - 1) as usize {
            return None;
        }

        let mut candidate = state.last_id;
        loop {
            candidate = if candidate == u32::MAX { 1 } else { candidate + 1 };
            if state.in_use.insert(candidate) {
                state.last_id = candidate;
                return Some(candidate);
            }
        }
    }

    /// Return `id` to the pool. Returns false if it was not in use.
    pub fn free(&self, id: u32) -> bool {
        self.state.lock().in_use.remove(&id)
    }

    pub fn is_in_use(&self, id: u32) -> bool {
        self.state.lock().in_use.contains(&id)
    }

    pub fn in_use(&self) -> usize {
        self.state.lock().in_use.len()
    }

    /// Restart the sequence just after `last_id`. Used to exercise wrap-around.
    pub fn seed(&self, last_id: u32) {
        self.state.lock().last_id = last_id;
    }
}

impl Default for BufferIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
