//! The multi-stage `buffer` → `waiting` → `ready` queue described in
//! §4.2 of the design: it decouples arrival order from service order so
//! work can be dispatched to the I/O queue while still honoring FIFO,
//! LIFO, sorted, or strict-order delivery.

use crate::record::{FileRecord, RecordArena, RecordId};
use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QueueFlags: u8 {
        /// Track the sync/async service balance.
        const BALANCE = 1 << 0;
        /// Buffer files before adding them to the queue.
        const BUFFER  = 1 << 1;
        /// Use LIFO (stack/DFS) ordering.
        const LIFO    = 1 << 2;
        /// Maintain a strict delivery order.
        const ORDER   = 1 << 3;
    }
}

type LinkFn = fn(&mut FileRecord) -> &mut Option<RecordId>;

fn queue_link(r: &mut FileRecord) -> &mut Option<RecordId> {
    &mut r.queue_link
}

fn ready_link(r: &mut FileRecord) -> &mut Option<RecordId> {
    &mut r.ready_link
}

/// A singly-linked chain of records, threaded through one of a record's
/// link fields (selected by the `LinkFn` passed to each operation).
#[derive(Debug, Default, Clone, Copy)]
struct SList {
    head: Option<RecordId>,
    tail: Option<RecordId>,
}

impl SList {
    const fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    fn append(&mut self, arena: &mut RecordArena, id: RecordId, link: LinkFn) {
        *link(arena.get_mut(id)) = None;
        match self.tail {
            Some(tail) => *link(arena.get_mut(tail)) = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
    }

    fn prepend(&mut self, arena: &mut RecordArena, id: RecordId, link: LinkFn) {
        *link(arena.get_mut(id)) = self.head;
        if self.head.is_none() {
            self.tail = Some(id);
        }
        self.head = Some(id);
    }

    fn pop_front(&mut self, arena: &mut RecordArena, link: LinkFn) -> Option<RecordId> {
        let head = self.head?;
        let next = *link(arena.get_mut(head));
        self.head = next;
        if next.is_none() {
            self.tail = None;
        }
        Some(head)
    }

    /// Append `other` onto `self`, leaving `other` empty.
    fn extend(&mut self, arena: &mut RecordArena, other: &mut Self, link: LinkFn) {
        let Some(other_head) = other.head else {
            return;
        };
        match self.tail {
            Some(tail) => *link(arena.get_mut(tail)) = Some(other_head),
            None => self.head = Some(other_head),
        }
        self.tail = other.tail;
        other.head = None;
        other.tail = None;
    }
}

/// One of the two queues a traversal drives: the file queue (things waiting
/// to be visited) or the directory queue (things waiting to be opened and
/// read).
pub struct Queue {
    flags: QueueFlags,
    buffer: SList,
    waiting: SList,
    ready: SList,
    size: usize,
    ioqueued: usize,
    imbalance: i64,
}

impl Queue {
    #[must_use]
    pub const fn new(flags: QueueFlags) -> Self {
        Self {
            flags,
            buffer: SList {
                head: None,
                tail: None,
            },
            waiting: SList {
                head: None,
                tail: None,
            },
            ready: SList {
                head: None,
                tail: None,
            },
            size: 0,
            ioqueued: 0,
            imbalance: 0,
        }
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub const fn ioqueued(&self) -> usize {
        self.ioqueued
    }

    #[must_use]
    pub const fn flags(&self) -> QueueFlags {
        self.flags
    }

    /// Add a new record to the queue (§4.2 "Push").
    pub fn push(&mut self, arena: &mut RecordArena, id: RecordId) {
        if self.flags.contains(QueueFlags::BUFFER) {
            self.buffer.append(arena, id, queue_link);
        } else if self.flags.contains(QueueFlags::LIFO) {
            self.waiting.prepend(arena, id, queue_link);
            if self.flags.contains(QueueFlags::ORDER) {
                self.ready.prepend(arena, id, ready_link);
            }
        } else {
            self.waiting.append(arena, id, queue_link);
            if self.flags.contains(QueueFlags::ORDER) {
                self.ready.append(arena, id, ready_link);
            }
        }
        self.size += 1;
    }

    /// Sort the buffer by name before it's flushed (§9 "buffered flush sort").
    pub fn sort_buffer(&mut self, arena: &mut RecordArena) {
        if self.buffer.is_empty() {
            return;
        }
        let mut items = Vec::new();
        let mut cur = self.buffer.head;
        while let Some(id) = cur {
            let next = *queue_link(arena.get_mut(id));
            items.push(id);
            cur = next;
        }
        items.sort_by(|&a, &b| arena.get(a).name.cmp(&arena.get(b).name));

        self.buffer = SList {
            head: None,
            tail: None,
        };
        for id in items {
            self.buffer.append(arena, id, queue_link);
        }
    }

    /// Move buffered records onto `waiting` (and `ready`, if `ORDER`) (§4.2 "Flush").
    pub fn flush(&mut self, arena: &mut RecordArena) {
        if !self.flags.contains(QueueFlags::BUFFER) {
            return;
        }

        if self.flags.contains(QueueFlags::ORDER) {
            // Ready order must match the order items enter `waiting`.
            let mut cur = self.buffer.head;
            if self.flags.contains(QueueFlags::LIFO) {
                let mut prepended = SList {
                    head: None,
                    tail: None,
                };
                while let Some(id) = cur {
                    cur = *queue_link(arena.get_mut(id));
                    prepended.append(arena, id, ready_link);
                }
                prepended.extend(arena, &mut self.ready, ready_link);
                self.ready = prepended;
            } else {
                while let Some(id) = cur {
                    cur = *queue_link(arena.get_mut(id));
                    self.ready.append(arena, id, ready_link);
                }
            }
        }

        if self.flags.contains(QueueFlags::LIFO) {
            let mut combined = SList {
                head: None,
                tail: None,
            };
            combined.extend(arena, &mut self.buffer, queue_link);
            combined.extend(arena, &mut self.waiting, queue_link);
            self.waiting = combined;
        } else {
            self.waiting.extend(arena, &mut self.buffer, queue_link);
        }
    }

    /// Whether async dispatch is currently permitted (§4.2 "Balance").
    #[must_use]
    pub const fn balanced(&self) -> bool {
        if self.flags.contains(QueueFlags::BALANCE) {
            self.imbalance >= 0
        } else {
            true
        }
    }

    pub fn rebalance(&mut self, was_async: bool) {
        if was_async {
            self.imbalance -= 1;
        } else {
            self.imbalance += 1;
        }
    }

    /// Peek the next item that would be serviced, without removing it.
    #[must_use]
    pub fn waiting_peek(&self) -> Option<RecordId> {
        if !self.flags.contains(QueueFlags::BUFFER) || self.flags.contains(QueueFlags::ORDER) {
            return self.waiting.head;
        }
        let (prefix, suffix) = if self.flags.contains(QueueFlags::LIFO) {
            (&self.buffer, &self.waiting)
        } else {
            (&self.waiting, &self.buffer)
        };
        prefix.head.or(suffix.head)
    }

    #[must_use]
    pub const fn ready_peek(&self) -> Option<RecordId> {
        self.ready.head
    }

    #[must_use]
    pub const fn waiting_head(&self) -> Option<RecordId> {
        self.waiting.head
    }

    /// Detach the next waiting record so it can be serviced, marking it
    /// in-flight if the service will be asynchronous.
    pub fn detach(&mut self, arena: &mut RecordArena, id: RecordId, is_async: bool) {
        debug_assert!(!arena.get(id).ioqueued);

        if Some(id) == self.buffer.head {
            debug_assert!(!self.flags.contains(QueueFlags::ORDER));
            self.buffer.pop_front(arena, queue_link);
        } else if Some(id) == self.waiting.head {
            self.waiting.pop_front(arena, queue_link);
        } else {
            debug_assert!(false, "detached record was not buffered or waiting");
        }

        if is_async {
            arena.get_mut(id).ioqueued = true;
            self.ioqueued += 1;
        }
        self.rebalance(is_async);
    }

    /// Reattach a serviced record, making it ready.
    pub fn attach(&mut self, arena: &mut RecordArena, id: RecordId, was_async: bool) {
        if was_async {
            debug_assert!(arena.get(id).ioqueued);
            arena.get_mut(id).ioqueued = false;
            self.ioqueued -= 1;
        } else {
            debug_assert!(!arena.get(id).ioqueued);
        }

        if !self.flags.contains(QueueFlags::ORDER) {
            self.ready.append(arena, id, ready_link);
        }
    }

    /// Make a record ready immediately, with no actual service performed.
    pub fn skip(&mut self, arena: &mut RecordArena, id: RecordId) {
        self.detach(arena, id, false);
        self.attach(arena, id, false);
    }

    /// Pop the next record to actually service, preferring completed
    /// (`ready`) work over `waiting` work (§4.2 "Pop").
    pub fn pop(&mut self, arena: &mut RecordArena) -> Option<RecordId> {
        debug_assert!(self.buffer.is_empty());

        let ready_file = self.ready.pop_front(arena, ready_link);
        let file = if ready_file.is_none() || ready_file == self.waiting.head {
            self.waiting.pop_front(arena, queue_link).or(ready_file)
        } else {
            ready_file
        };

        if file.is_some() {
            self.size -= 1;
        }
        file
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filetype::FileType;

    fn new_record(arena: &mut RecordArena, name: &str) -> RecordId {
        let id = arena.insert(FileRecord {
            parent: None,
            root: RecordId::DANGLING,
            queue_link: None,
            ready_link: None,
            lru_prev: None,
            lru_next: None,
            depth: 0,
            refcount: 1,
            pincount: 0,
            in_lru: false,
            fd: None,
            ioqueued: false,
            dir: None,
            file_type: FileType::Unknown,
            dev: None,
            ino: None,
            stat: crate::record::StatCache::new(),
            name: name.into(),
            nameoff: 0,
            namelen: name.len(),
        });
        arena.get_mut(id).root = id;
        id
    }

    #[test]
    fn fifo_push_pop_order() {
        let mut arena = RecordArena::new();
        let mut q = Queue::new(QueueFlags::empty());
        let a = new_record(&mut arena, "a");
        let b = new_record(&mut arena, "b");
        q.push(&mut arena, a);
        q.push(&mut arena, b);
        assert_eq!(q.pop(&mut arena), Some(a));
        assert_eq!(q.pop(&mut arena), Some(b));
        assert_eq!(q.pop(&mut arena), None);
    }

    #[test]
    fn lifo_buffered_flush_reverses_arrival_into_stack_order() {
        let mut arena = RecordArena::new();
        let mut q = Queue::new(QueueFlags::BUFFER | QueueFlags::LIFO);
        let a = new_record(&mut arena, "a");
        let b = new_record(&mut arena, "b");
        q.push(&mut arena, a);
        q.push(&mut arena, b);
        q.flush(&mut arena);
        // LIFO: last flushed buffer is prepended, so buffer order (a, b)
        // becomes waiting order (a, b) at the front -- popped a first, then b.
        assert_eq!(q.pop(&mut arena), Some(a));
        assert_eq!(q.pop(&mut arena), Some(b));
    }

    #[test]
    fn balance_blocks_async_dispatch_until_sync_catches_up() {
        let mut q = Queue::new(QueueFlags::BALANCE);
        assert!(q.balanced());
        q.rebalance(true);
        assert!(!q.balanced());
        q.rebalance(false);
        assert!(q.balanced());
    }

    #[test]
    fn sort_buffer_orders_by_name() {
        let mut arena = RecordArena::new();
        let mut q = Queue::new(QueueFlags::BUFFER);
        let c = new_record(&mut arena, "c");
        let a = new_record(&mut arena, "a");
        let b = new_record(&mut arena, "b");
        q.push(&mut arena, c);
        q.push(&mut arena, a);
        q.push(&mut arena, b);
        q.sort_buffer(&mut arena);
        q.flush(&mut arena);
        assert_eq!(q.pop(&mut arena), Some(a));
        assert_eq!(q.pop(&mut arena), Some(b));
        assert_eq!(q.pop(&mut arena), Some(c));
    }
}
