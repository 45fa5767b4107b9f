// File: src/heap.rs
//
// The heap manager: allocation, string interning, and the tracing
// mark-sweep collector. Every heap object is owned exactly once, by the
// intrusive singly-linked list threaded through `Obj::next`; `GcRef`
// handles held by the stack, frames, globals, upvalues, and the compiler
// are all non-owning.
//
// Allocation itself never triggers collection (unlike the C original's
// `reallocate`, which can run the collector mid-allocation). Instead a
// freshly allocated object is always unreachable from any root until its
// caller roots it (pushes it on the VM stack, stores it in a constant
// pool, etc); only after that should the caller call `should_collect` /
// run a collection. This sidesteps the "keep temporaries on the VM stack
// around risky allocations" dance the reference implementation needs —
// concatenation here copies source bytes into a plain `Vec<u8>` before
// ever touching the heap, so the operand strings don't need protecting.

use std::cell::Cell;
use std::ptr::NonNull;

use crate::object::{fnv1a_hash, GcRef, Obj, ObjKind, ObjString, ObjUpvalue, UpvalueLocation};
use crate::table::Table;
use crate::value::Value;

const GC_HEAP_GROW_FACTOR: usize = 2;
const INITIAL_GC_THRESHOLD: usize = 1024 * 1024;

pub struct Heap {
    objects: Option<GcRef<Obj>>,
    pub strings: Table,
    bytes_allocated: usize,
    next_gc: usize,
    gray_stack: Vec<GcRef<Obj>>,
    /// Build-time toggle: run the collector on every allocation. Exists so
    /// root-marking bugs show up immediately instead of only under memory
    /// pressure.
    pub stress_gc: bool,
    pub log_gc: bool,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            objects: None,
            strings: Table::new(),
            bytes_allocated: 0,
            next_gc: INITIAL_GC_THRESHOLD,
            gray_stack: Vec::new(),
            stress_gc: false,
            log_gc: false,
        }
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn should_collect(&self) -> bool {
        self.stress_gc || self.bytes_allocated > self.next_gc
    }

    pub fn alloc(&mut self, kind: ObjKind) -> GcRef<Obj> {
        let obj = Box::new(Obj { marked: Cell::new(false), next: Cell::new(self.objects), kind });
        let ptr = NonNull::new(Box::into_raw(obj)).expect("Box::into_raw is never null");
        let gc_ref = GcRef::from_raw(ptr);
        self.objects = Some(gc_ref);
        self.bytes_allocated += std::mem::size_of::<Obj>();
        if self.log_gc {
            eprintln!("alloc {:p} {}", gc_ref.as_ptr(), gc_ref.type_name());
        }
        gc_ref
    }

    /// `copyString`: clones the given bytes, reusing an interned copy if
    /// one already exists.
    pub fn copy_string(&mut self, bytes: &[u8]) -> GcRef<Obj> {
        let hash = fnv1a_hash(bytes);
        if let Some(existing) = self.strings.find_string(bytes, hash) {
            return existing;
        }
        let obj = self.alloc(ObjKind::String(ObjString { bytes: bytes.to_vec().into_boxed_slice(), hash }));
        self.strings.set(obj, Value::Null);
        obj
    }

    /// `takeString`: takes ownership of an already-built buffer, avoiding a
    /// copy when no interned twin exists.
    pub fn take_string(&mut self, bytes: Vec<u8>) -> GcRef<Obj> {
        let hash = fnv1a_hash(&bytes);
        if let Some(existing) = self.strings.find_string(&bytes, hash) {
            return existing;
        }
        let obj = self.alloc(ObjKind::String(ObjString { bytes: bytes.into_boxed_slice(), hash }));
        self.strings.set(obj, Value::Null);
        obj
    }

    pub fn new_upvalue(&mut self, stack_slot: usize) -> GcRef<Obj> {
        self.alloc(ObjKind::Upvalue(ObjUpvalue {
            location: std::cell::RefCell::new(UpvalueLocation::Stack(stack_slot)),
            next_open: Cell::new(None),
        }))
    }

    pub fn mark_value(&mut self, value: &Value) {
        if let Value::Obj(obj) = value {
            self.mark_object(*obj);
        }
    }

    pub fn mark_object(&mut self, obj: GcRef<Obj>) {
        if obj.marked.get() {
            return;
        }
        obj.marked.set(true);
        if self.log_gc {
            eprintln!("mark {:p} {}", obj.as_ptr(), obj.type_name());
        }
        self.gray_stack.push(obj);
    }

    fn blacken(&mut self, obj: GcRef<Obj>) {
        match &obj.kind {
            ObjKind::String(_) | ObjKind::Native(_) => {}
            ObjKind::Function(func) => {
                if let Some(name) = func.name {
                    self.mark_object(name);
                }
                let constants: Vec<Value> = func.chunk.constants.clone();
                for c in &constants {
                    self.mark_value(c);
                }
            }
            ObjKind::Closure(closure) => {
                self.mark_object(closure.function);
                let upvalues = closure.upvalues.clone();
                for uv in upvalues {
                    self.mark_object(uv);
                }
            }
            ObjKind::Upvalue(up) => {
                if let UpvalueLocation::Closed(v) = &*up.location.borrow() {
                    let v = *v;
                    self.mark_value(&v);
                }
            }
            ObjKind::Class(class) => {
                self.mark_object(class.name);
                let entries: Vec<(GcRef<Obj>, Value)> = class.methods.borrow().iter().collect();
                for (k, v) in entries {
                    self.mark_object(k);
                    self.mark_value(&v);
                }
            }
            ObjKind::Instance(instance) => {
                self.mark_object(instance.class);
                let entries: Vec<(GcRef<Obj>, Value)> = instance.fields.borrow().iter().collect();
                for (k, v) in entries {
                    self.mark_object(k);
                    self.mark_value(&v);
                }
            }
            ObjKind::BoundMethod(bound) => {
                let receiver = bound.receiver;
                self.mark_value(&receiver);
                self.mark_object(bound.method);
            }
        }
    }

    fn trace_references(&mut self) {
        while let Some(obj) = self.gray_stack.pop() {
            self.blacken(obj);
        }
    }

    fn sweep(&mut self) {
        let mut previous: Option<GcRef<Obj>> = None;
        let mut current = self.objects;
        while let Some(obj) = current {
            if obj.marked.get() {
                obj.marked.set(false);
                previous = Some(obj);
                current = obj.next.get();
            } else {
                let unreached = obj;
                current = obj.next.get();
                match previous {
                    Some(p) => p.next.set(current),
                    None => self.objects = current,
                }
                if self.log_gc {
                    eprintln!("free {:p} {}", unreached.as_ptr(), unreached.type_name());
                }
                // SAFETY: `unreached` has just been unlinked from the only
                // list that tracks ownership, and the trace above proved
                // nothing reachable still points to it.
                unsafe {
                    drop(Box::from_raw(unreached.as_ptr()));
                }
            }
        }
    }

    /// Runs the trace/sweep tail of a collection once roots are marked.
    /// Callers (VM for run-time GC, Compiler for compile-time GC) mark
    /// their own roots first, since they're the ones who know what's live.
    pub fn finish_collect(&mut self) {
        self.trace_references();
        self.strings.remove_white();
        self.sweep();
        self.next_gc = self.bytes_allocated.max(INITIAL_GC_THRESHOLD) * GC_HEAP_GROW_FACTOR;
    }
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let mut current = self.objects;
        while let Some(obj) = current {
            let next = obj.next.get();
            // SAFETY: teardown walks the same list `sweep` would, once,
            // with no other references to these objects outstanding.
            unsafe {
                drop(Box::from_raw(obj.as_ptr()));
            }
            current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_returns_the_same_allocation_for_equal_bytes() {
        let mut heap = Heap::new();
        let a = heap.copy_string(b"hello");
        let b = heap.copy_string(b"hello");
        assert_eq!(a.as_ptr(), b.as_ptr());
    }

    #[test]
    fn unreferenced_strings_are_collected() {
        let mut heap = Heap::new();
        {
            let _s = heap.copy_string(b"transient");
        }
        // nothing roots `_s`; a collection with no extra roots should free it.
        heap.finish_collect();
        assert!(heap.strings.find_string(b"transient", fnv1a_hash(b"transient")).is_none());
    }

    #[test]
    fn a_rooted_string_survives_collection() {
        let mut heap = Heap::new();
        let s = heap.copy_string(b"kept");
        heap.mark_object(s);
        heap.finish_collect();
        assert!(heap.strings.find_string(b"kept", fnv1a_hash(b"kept")).is_some());
    }

    #[test]
    fn stress_gc_forces_collection_regardless_of_the_byte_threshold() {
        let mut heap = Heap::new();
        heap.stress_gc = true;
        assert!(heap.should_collect());

        let kept = heap.copy_string(b"kept");
        heap.mark_object(kept);
        heap.finish_collect();
        assert!(heap.strings.find_string(b"kept", fnv1a_hash(b"kept")).is_some());

        let _ = heap.copy_string(b"transient");
        heap.finish_collect();
        assert!(heap.strings.find_string(b"transient", fnv1a_hash(b"transient")).is_none());
    }
}
