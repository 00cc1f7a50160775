use crate::message::BufferEvent;
use crate::traits::{BufferEngine, SharedBuffer};
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

#[derive(Debug, Default)]
struct BufferState {
    text: String,
    flags: BTreeMap<String, bool>,
    inserts: usize,
}

type Buffers = Rc<RefCell<BTreeMap<String, BufferState>>>;

/// Text buffers shared in process by every engine made from the same hub.
///
/// Edits are visible to other engines immediately, so buffers are always
/// synced and opening one queues its `Synced` event right away.
#[derive(Clone, Default)]
pub struct MemoryBufferHub {
    buffers: Buffers,
}

impl MemoryBufferHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engine(&self) -> MemoryBufferEngine {
        MemoryBufferEngine {
            buffers: self.buffers.clone(),
            events: VecDeque::new(),
        }
    }

    pub fn text(&self, buffer_id: &str) -> String {
        self.buffers
            .borrow()
            .get(buffer_id)
            .map(|b| b.text.clone())
            .unwrap_or_default()
    }

    /// How many non-empty inserts the buffer received, from anyone.
    pub fn insert_count(&self, buffer_id: &str) -> usize {
        self.buffers
            .borrow()
            .get(buffer_id)
            .map(|b| b.inserts)
            .unwrap_or(0)
    }
}

pub struct MemoryBufferEngine {
    buffers: Buffers,
    events: VecDeque<BufferEvent>,
}

impl MemoryBufferEngine {
    /// Queues another `Synced` for an already opened buffer, like a rejoin would.
    pub fn resync(&mut self, buffer_id: &str) {
        self.events.push_back(BufferEvent::Synced {
            buffer_id: buffer_id.to_owned(),
        });
    }
}

impl BufferEngine for MemoryBufferEngine {
    type Buffer = MemoryBuffer;

    fn open_buffer(&mut self, buffer_id: &str) -> MemoryBuffer {
        self.buffers
            .borrow_mut()
            .entry(buffer_id.to_owned())
            .or_default();
        self.resync(buffer_id);
        MemoryBuffer {
            buffer_id: buffer_id.to_owned(),
            buffers: self.buffers.clone(),
        }
    }

    fn poll_event(&mut self) -> Option<BufferEvent> {
        self.events.pop_front()
    }
}

pub struct MemoryBuffer {
    buffer_id: String,
    buffers: Buffers,
}

impl MemoryBuffer {
    pub fn buffer_id(&self) -> &str {
        &self.buffer_id
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut BufferState) -> R) -> R {
        let mut buffers = self.buffers.borrow_mut();
        f(buffers.entry(self.buffer_id.clone()).or_default())
    }
}

impl SharedBuffer for MemoryBuffer {
    fn len(&self) -> usize {
        self.with_state(|s| s.text.chars().count())
    }

    fn text(&self) -> String {
        self.with_state(|s| s.text.clone())
    }

    /// Offsets past the end append.
    fn insert(&mut self, offset: usize, text: &str) {
        if text.is_empty() {
            return;
        }
        self.with_state(|s| {
            let byte_offset = s
                .text
                .char_indices()
                .nth(offset)
                .map(|(i, _)| i)
                .unwrap_or_else(|| s.text.len());
            s.text.insert_str(byte_offset, text);
            s.inserts += 1;
        })
    }

    fn shared_flag(&self, name: &str) -> bool {
        self.with_state(|s| s.flags.get(name).copied().unwrap_or(false))
    }

    fn set_shared_flag(&mut self, name: &str, value: bool) {
        self.with_state(|s| {
            s.flags.insert(name.to_owned(), value);
        })
    }
}
