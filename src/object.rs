// File: src/object.rs
//
// Heap object model. Every heap allocation shares one header (`Obj`): a
// mark bit for the collector and an intrusive "next" link threading every
// live object into the heap's allocation list, exactly as in a C mark-sweep
// collector. `GcRef<T>` is the Rust stand-in for the raw `Obj*` the
// reference implementation passes around: a `Copy` handle into the heap
// that the heap itself owns. Nothing outside `Heap` ever frees one.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::ptr::NonNull;

use crate::chunk::Chunk;
use crate::table::Table;
use crate::value::Value;

/// A non-owning handle to a heap-allocated object. Equality is pointer
/// identity, matching the interning invariant: two `GcRef`s are equal iff
/// they refer to the same allocation.
pub struct GcRef<T> {
    ptr: NonNull<T>,
}

impl<T> GcRef<T> {
    pub(crate) fn from_raw(ptr: NonNull<T>) -> Self {
        GcRef { ptr }
    }

    pub(crate) fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }
}

impl<T> Clone for GcRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for GcRef<T> {}

impl<T> PartialEq for GcRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}
impl<T> Eq for GcRef<T> {}

impl<T> std::ops::Deref for GcRef<T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: the heap keeps every reachable object alive for as long
        // as a GcRef to it can be observed; unreachable ones are only
        // freed by `Heap::sweep`, which runs with no other borrows live.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> fmt::Debug for GcRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GcRef({:p})", self.ptr.as_ptr())
    }
}

pub type NativeFn = fn(&[Value]) -> Result<Value, String>;

pub struct ObjString {
    pub bytes: Box<[u8]>,
    pub hash: u32,
}

impl ObjString {
    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

pub struct ObjFunction {
    pub arity: u8,
    pub upvalue_count: u8,
    pub chunk: Chunk,
    pub name: Option<GcRef<Obj>>,
}

impl ObjFunction {
    pub fn new(name: Option<GcRef<Obj>>) -> Self {
        ObjFunction { arity: 0, upvalue_count: 0, chunk: Chunk::new(), name }
    }
}

pub struct ObjNative {
    pub name: GcRef<Obj>,
    pub function: NativeFn,
}

pub struct ObjClosure {
    pub function: GcRef<Obj>,
    pub upvalues: Vec<GcRef<Obj>>,
}

/// Where an upvalue currently gets its value from: a live stack slot while
/// the enclosing call frame is on the stack, or its own cell once closed.
pub enum UpvalueLocation {
    Stack(usize),
    Closed(Value),
}

pub struct ObjUpvalue {
    pub location: RefCell<UpvalueLocation>,
    /// Link to the next open upvalue, sorted by decreasing stack slot.
    /// Only meaningful while `location` is `Stack(_)`.
    pub next_open: Cell<Option<GcRef<Obj>>>,
}

pub struct ObjClass {
    pub name: GcRef<Obj>,
    pub methods: RefCell<Table>,
}

pub struct ObjInstance {
    pub class: GcRef<Obj>,
    pub fields: RefCell<Table>,
}

pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: GcRef<Obj>,
}

pub enum ObjKind {
    String(ObjString),
    Function(ObjFunction),
    Native(ObjNative),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Class(ObjClass),
    Instance(ObjInstance),
    BoundMethod(ObjBoundMethod),
}

pub struct Obj {
    pub marked: Cell<bool>,
    pub next: Cell<Option<GcRef<Obj>>>,
    pub kind: ObjKind,
}

impl Obj {
    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            ObjKind::String(_) => "string",
            ObjKind::Function(_) => "function",
            ObjKind::Native(_) => "native function",
            ObjKind::Closure(_) => "function",
            ObjKind::Upvalue(_) => "upvalue",
            ObjKind::Class(_) => "class",
            ObjKind::Instance(_) => "instance",
            ObjKind::BoundMethod(_) => "bound method",
        }
    }

    pub fn as_string(&self) -> Option<&ObjString> {
        match &self.kind {
            ObjKind::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&ObjFunction> {
        match &self.kind {
            ObjKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&ObjClosure> {
        match &self.kind {
            ObjKind::Closure(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&ObjClass> {
        match &self.kind {
            ObjKind::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&ObjInstance> {
        match &self.kind {
            ObjKind::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_bound_method(&self) -> Option<&ObjBoundMethod> {
        match &self.kind {
            ObjKind::BoundMethod(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_native(&self) -> Option<&ObjNative> {
        match &self.kind {
            ObjKind::Native(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_upvalue(&self) -> Option<&ObjUpvalue> {
        match &self.kind {
            ObjKind::Upvalue(u) => Some(u),
            _ => None,
        }
    }
}

/// FNV-1a over raw bytes, matching the reference hash used for string
/// interning (offset basis 2166136261, prime 16777619).
pub fn fnv1a_hash(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}
