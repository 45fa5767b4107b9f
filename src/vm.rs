// File: src/vm.rs
//
// The stack-based virtual machine. Owns the value stack, the call-frame
// array, the globals table, and the heap. A call frame holds a closure and
// its own instruction pointer; `run` is the single dispatch loop that walks
// every opcode the compiler can emit.

use crate::chunk::OpCode;
use crate::compiler;
use crate::errors::{Diagnostic, TraceFrame};
use crate::heap::Heap;
use crate::natives;
use crate::object::{
    GcRef, NativeFn, Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjInstance, ObjKind, UpvalueLocation,
};
use crate::table::Table;
use crate::value::{values_equal, Value};

const FRAMES_MAX: usize = 64;
const STACK_MAX: usize = FRAMES_MAX * 256;

struct CallFrame {
    closure: GcRef<Obj>,
    ip: usize,
    /// Index into the VM value stack where this frame's window starts;
    /// slot 0 is the callee itself (or `this`, for methods).
    slot_base: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

pub struct Vm<'out> {
    heap: Heap,
    frames: Vec<CallFrame>,
    stack: Vec<Value>,
    globals: Table,
    open_upvalues: Option<GcRef<Obj>>,
    init_string: GcRef<Obj>,
    diagnostics: Vec<Diagnostic>,
    stdout: &'out mut dyn std::io::Write,
}

impl<'out> Vm<'out> {
    pub fn new(stdout: &'out mut dyn std::io::Write) -> Self {
        let mut heap = Heap::new();
        let init_string = heap.copy_string(b"init");
        let mut vm = Vm {
            heap,
            frames: Vec::with_capacity(FRAMES_MAX),
            stack: Vec::with_capacity(STACK_MAX),
            globals: Table::new(),
            open_upvalues: None,
            init_string,
            diagnostics: Vec::new(),
            stdout,
        };
        vm.define_native("clock", natives::clock);
        vm
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Build-time/debug toggle: force a collection at every allocation
    /// point that checks `should_collect()`. Exists so root-marking bugs
    /// surface immediately instead of only under real memory pressure.
    pub fn set_stress_gc(&mut self, enabled: bool) {
        self.heap.stress_gc = enabled;
    }

    fn define_native(&mut self, name: &str, function: NativeFn) {
        let name_obj = self.heap.copy_string(name.as_bytes());
        let native = self.heap.alloc(ObjKind::Native(crate::object::ObjNative { name: name_obj, function }));
        self.globals.set(name_obj, Value::Obj(native));
    }

    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let result = compiler::compile(source, &mut self.heap);
        self.diagnostics.extend(result.diagnostics);
        let Some(function) = result.function else {
            return InterpretResult::CompileError;
        };

        let closure = self.heap.alloc(ObjKind::Closure(ObjClosure { function, upvalues: Vec::new() }));
        self.stack.push(Value::Obj(closure));
        self.call(closure, 0);

        match self.run() {
            Ok(()) => InterpretResult::Ok,
            Err(()) => InterpretResult::RuntimeError,
        }
    }

    // ---- stack helpers -------------------------------------------------

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("value stack underflow")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    // ---- error reporting -------------------------------------------------

    fn runtime_error(&mut self, message: String) {
        let mut trace = Vec::new();
        for frame in self.frames.iter().rev() {
            let closure = frame.closure.as_closure().expect("call frame always holds a closure");
            let function = closure.function.as_function().expect("closure always wraps a function");
            let line = function.chunk.lines.get(frame.ip.saturating_sub(1)).copied().unwrap_or(0);
            let name = function.name.map(|n| n.as_string().unwrap().as_str().to_string()).unwrap_or_default();
            trace.push(TraceFrame { name, line });
        }
        self.diagnostics.push(Diagnostic::Runtime { message, trace });
        self.stack.clear();
        self.frames.clear();
    }

    // ---- call machinery -------------------------------------------------

    fn call_value(&mut self, callee: Value, arg_count: u8) -> bool {
        let Some(obj) = callee.as_obj() else {
            self.runtime_error("Can only call functions and classes.".to_string());
            return false;
        };
        match &obj.kind {
            ObjKind::Closure(_) => self.call(obj, arg_count),
            ObjKind::Native(native) => {
                let base = self.stack.len() - arg_count as usize;
                let args = self.stack[base..].to_vec();
                match (native.function)(&args) {
                    Ok(result) => {
                        self.stack.truncate(base - 1);
                        self.push(result);
                        true
                    }
                    Err(message) => {
                        self.runtime_error(message);
                        false
                    }
                }
            }
            ObjKind::Class(class) => {
                let instance = self.heap.alloc(ObjKind::Instance(ObjInstance {
                    class: obj,
                    fields: std::cell::RefCell::new(Table::new()),
                }));
                let base = self.stack.len() - arg_count as usize - 1;
                self.stack[base] = Value::Obj(instance);

                let initializer = class.methods.borrow().get(self.init_string);
                if let Some(initializer) = initializer {
                    let Some(init_obj) = initializer.as_obj() else { unreachable!() };
                    return self.call(init_obj, arg_count);
                }
                if arg_count != 0 {
                    self.runtime_error(format!("Expected 0 arguments but got {}.", arg_count));
                    return false;
                }
                true
            }
            ObjKind::BoundMethod(bound) => {
                let base = self.stack.len() - arg_count as usize - 1;
                self.stack[base] = bound.receiver;
                self.call(bound.method, arg_count)
            }
            _ => {
                self.runtime_error("Can only call functions and classes.".to_string());
                false
            }
        }
    }

    fn call(&mut self, closure_obj: GcRef<Obj>, arg_count: u8) -> bool {
        let closure = closure_obj.as_closure().expect("call target must be a closure");
        let function = closure.function.as_function().expect("closure always wraps a function");
        if arg_count != function.arity {
            self.runtime_error(format!("Expected {} arguments but got {}.", function.arity, arg_count));
            return false;
        }
        if self.frames.len() == FRAMES_MAX {
            self.runtime_error("Stack overflow.".to_string());
            return false;
        }
        let slot_base = self.stack.len() - arg_count as usize - 1;
        self.frames.push(CallFrame { closure: closure_obj, ip: 0, slot_base });
        true
    }

    fn invoke_from_class(&mut self, class: GcRef<Obj>, name: GcRef<Obj>, arg_count: u8) -> bool {
        let method = class.as_class().expect("invoke target must be a class").methods.borrow().get(name);
        match method {
            Some(m) => {
                let Some(obj) = m.as_obj() else { unreachable!() };
                self.call(obj, arg_count)
            }
            None => {
                self.runtime_error(format!("Undefined property '{}'.", name.as_string().unwrap().as_str()));
                false
            }
        }
    }

    fn invoke(&mut self, name: GcRef<Obj>, arg_count: u8) -> bool {
        let receiver = self.peek(arg_count as usize);
        let Some(receiver_obj) = receiver.as_obj() else {
            self.runtime_error("Only instances have methods.".to_string());
            return false;
        };
        let Some(instance) = receiver_obj.as_instance() else {
            self.runtime_error("Only instances have methods.".to_string());
            return false;
        };

        let field = instance.fields.borrow().get(name);
        if let Some(field) = field {
            let base = self.stack.len() - arg_count as usize - 1;
            self.stack[base] = field;
            return self.call_value(field, arg_count);
        }

        self.invoke_from_class(instance.class, name, arg_count)
    }

    fn bind_method(&mut self, class: GcRef<Obj>, name: GcRef<Obj>) -> bool {
        let method = class.as_class().expect("bind target must be a class").methods.borrow().get(name);
        let Some(method) = method else {
            self.runtime_error(format!("Undefined property '{}'.", name.as_string().unwrap().as_str()));
            return false;
        };
        let Some(method_obj) = method.as_obj() else { unreachable!() };
        let receiver = self.peek(0);
        let bound = self.heap.alloc(ObjKind::BoundMethod(ObjBoundMethod { receiver, method: method_obj }));
        self.pop();
        self.push(Value::Obj(bound));
        true
    }

    // ---- upvalues -------------------------------------------------

    fn capture_upvalue(&mut self, stack_slot: usize) -> GcRef<Obj> {
        let mut previous: Option<GcRef<Obj>> = None;
        let mut current = self.open_upvalues;

        while let Some(upvalue) = current {
            let this_slot = match &*upvalue.as_upvalue().unwrap().location.borrow() {
                UpvalueLocation::Stack(s) => *s,
                UpvalueLocation::Closed(_) => unreachable!("open list only holds open upvalues"),
            };
            if this_slot == stack_slot {
                return upvalue;
            }
            if this_slot < stack_slot {
                break;
            }
            previous = Some(upvalue);
            current = upvalue.as_upvalue().unwrap().next_open.get();
        }

        let created = self.heap.new_upvalue(stack_slot);
        created.as_upvalue().unwrap().next_open.set(current);

        match previous {
            Some(p) => p.as_upvalue().unwrap().next_open.set(Some(created)),
            None => self.open_upvalues = Some(created),
        }
        created
    }

    fn close_upvalues(&mut self, from_slot: usize) {
        while let Some(upvalue) = self.open_upvalues {
            let up = upvalue.as_upvalue().unwrap();
            let slot = match &*up.location.borrow() {
                UpvalueLocation::Stack(s) => *s,
                UpvalueLocation::Closed(_) => unreachable!(),
            };
            if slot < from_slot {
                break;
            }
            let value = self.stack[slot];
            *up.location.borrow_mut() = UpvalueLocation::Closed(value);
            self.open_upvalues = up.next_open.get();
        }
    }

    // ---- GC hook -------------------------------------------------

    fn collect_if_needed(&mut self) {
        if !self.heap.should_collect() {
            return;
        }
        for value in &self.stack {
            self.heap.mark_value(value);
        }
        for frame in &self.frames {
            self.heap.mark_object(frame.closure);
        }
        let mut current = self.open_upvalues;
        while let Some(uv) = current {
            self.heap.mark_object(uv);
            current = uv.as_upvalue().unwrap().next_open.get();
        }
        let globals: Vec<(GcRef<Obj>, Value)> = self.globals.iter().collect();
        for (key, value) in globals {
            self.heap.mark_object(key);
            self.heap.mark_value(&value);
        }
        self.heap.mark_object(self.init_string);
        self.heap.finish_collect();
    }

    // ---- the dispatch loop -------------------------------------------------

    fn run(&mut self) -> Result<(), ()> {
        loop {
            let op = self.read_op();
            match op {
                OpCode::Constant => {
                    let value = self.read_constant();
                    self.push(value);
                }
                OpCode::Null => self.push(Value::Null),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frame().slot_base;
                    self.push(self.stack[base + slot]);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frame().slot_base;
                    self.stack[base + slot] = self.peek(0);
                }
                OpCode::GetGlobal => {
                    let name = self.read_string();
                    match self.globals.get(name) {
                        Some(v) => self.push(v),
                        None => {
                            self.runtime_error(format!(
                                "Undefined variable '{}'.",
                                name.as_string().unwrap().as_str()
                            ));
                            return Err(());
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string();
                    let value = self.peek(0);
                    self.globals.set(name, value);
                    self.pop();
                }
                OpCode::SetGlobal => {
                    let name = self.read_string();
                    if self.globals.set(name, self.peek(0)) {
                        self.globals.delete(name);
                        self.runtime_error(format!(
                            "Undefined variable '{}'.",
                            name.as_string().unwrap().as_str()
                        ));
                        return Err(());
                    }
                }
                OpCode::GetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let closure = self.frame().closure.as_closure().unwrap();
                    let upvalue = closure.upvalues[slot];
                    let value = match &*upvalue.as_upvalue().unwrap().location.borrow() {
                        UpvalueLocation::Stack(s) => self.stack[*s],
                        UpvalueLocation::Closed(v) => *v,
                    };
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let value = self.peek(0);
                    let closure = self.frame().closure.as_closure().unwrap();
                    let upvalue = closure.upvalues[slot];
                    let up = upvalue.as_upvalue().unwrap();
                    let target_slot = match &*up.location.borrow() {
                        UpvalueLocation::Stack(s) => Some(*s),
                        UpvalueLocation::Closed(_) => None,
                    };
                    match target_slot {
                        Some(s) => self.stack[s] = value,
                        None => *up.location.borrow_mut() = UpvalueLocation::Closed(value),
                    }
                }
                OpCode::GetProperty => {
                    let name = self.read_string();
                    let Some(receiver) = self.peek(0).as_obj() else {
                        self.runtime_error("Only instances have properties.".to_string());
                        return Err(());
                    };
                    let Some(instance) = receiver.as_instance() else {
                        self.runtime_error("Only instances have properties.".to_string());
                        return Err(());
                    };
                    let field = instance.fields.borrow().get(name);
                    if let Some(value) = field {
                        self.pop();
                        self.push(value);
                    } else if !self.bind_method(instance.class, name) {
                        return Err(());
                    }
                }
                OpCode::SetProperty => {
                    let name = self.read_string();
                    let Some(receiver) = self.peek(1).as_obj() else {
                        self.runtime_error("Only instances have fields.".to_string());
                        return Err(());
                    };
                    let Some(instance) = receiver.as_instance() else {
                        self.runtime_error("Only instances have fields.".to_string());
                        return Err(());
                    };
                    instance.fields.borrow_mut().set(name, self.peek(0));
                    let value = self.pop();
                    self.pop();
                    self.push(value);
                }
                OpCode::GetSuper => {
                    let name = self.read_string();
                    let superclass_val = self.pop();
                    let Some(superclass) = superclass_val.as_obj() else { unreachable!() };
                    if !self.bind_method(superclass, name) {
                        return Err(());
                    }
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(values_equal(&a, &b)));
                }
                OpCode::SwitchEqual => {
                    let case_value = self.pop();
                    let subject = self.peek(0);
                    self.push(Value::Bool(values_equal(&subject, &case_value)));
                }
                OpCode::Greater => {
                    if !self.binary_compare(|a, b| a > b) {
                        return Err(());
                    }
                }
                OpCode::Less => {
                    if !self.binary_compare(|a, b| a < b) {
                        return Err(());
                    }
                }
                OpCode::Add => {
                    if self.peek(0).is_string() && self.peek(1).is_string() {
                        self.concatenate();
                        self.collect_if_needed();
                    } else if self.peek(0).is_number() && self.peek(1).is_number() {
                        let b = self.pop().as_number().unwrap();
                        let a = self.pop().as_number().unwrap();
                        self.push(Value::Number(a + b));
                    } else {
                        self.runtime_error("Operands must be two numbers or two strings.".to_string());
                        return Err(());
                    }
                }
                OpCode::Subtract => {
                    if !self.binary_number(|a, b| a - b) {
                        return Err(());
                    }
                }
                OpCode::Multiply => {
                    if !self.binary_number(|a, b| a * b) {
                        return Err(());
                    }
                }
                OpCode::Divide => {
                    if !self.binary_number(|a, b| a / b) {
                        return Err(());
                    }
                }
                OpCode::Modulo => {
                    if !self.binary_modulo() {
                        return Err(());
                    }
                }
                OpCode::Not => {
                    let v = self.pop();
                    self.push(Value::Bool(v.is_falsey()));
                }
                OpCode::Negate => {
                    if !self.peek(0).is_number() {
                        self.runtime_error("Operand must be a number.".to_string());
                        return Err(());
                    }
                    let n = self.pop().as_number().unwrap();
                    self.push(Value::Number(-n));
                }
                OpCode::Print => {
                    let value = self.pop();
                    let _ = writeln!(self.stdout, "{}", value);
                }
                OpCode::Jump => {
                    let offset = self.read_u16();
                    self.frame_mut().ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16();
                    if self.peek(0).is_falsey() {
                        self.frame_mut().ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16();
                    self.frame_mut().ip -= offset as usize;
                }
                OpCode::LoopIfFalse => {
                    let offset = self.read_u16();
                    let falsey = self.peek(0).is_falsey();
                    if falsey {
                        self.frame_mut().ip -= offset as usize;
                    }
                    self.pop();
                }
                OpCode::LoopIfTrue => {
                    let offset = self.read_u16();
                    let truthy = !self.peek(0).is_falsey();
                    if truthy {
                        self.frame_mut().ip -= offset as usize;
                    }
                    self.pop();
                }
                OpCode::Call => {
                    let arg_count = self.read_byte();
                    let callee = self.peek(arg_count as usize);
                    if !self.call_value(callee, arg_count) {
                        return Err(());
                    }
                }
                OpCode::Invoke => {
                    let method = self.read_string();
                    let arg_count = self.read_byte();
                    if !self.invoke(method, arg_count) {
                        return Err(());
                    }
                }
                OpCode::SuperInvoke => {
                    let method = self.read_string();
                    let arg_count = self.read_byte();
                    let superclass_val = self.pop();
                    let Some(superclass) = superclass_val.as_obj() else { unreachable!() };
                    if !self.invoke_from_class(superclass, method, arg_count) {
                        return Err(());
                    }
                }
                OpCode::Closure => {
                    let function_val = self.read_constant();
                    let Some(function) = function_val.as_obj() else { unreachable!() };
                    let upvalue_count = function.as_function().unwrap().upvalue_count;
                    let mut upvalues = Vec::with_capacity(upvalue_count as usize);
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte() != 0;
                        let index = self.read_byte() as usize;
                        if is_local {
                            let base = self.frame().slot_base;
                            upvalues.push(self.capture_upvalue(base + index));
                        } else {
                            let closure = self.frame().closure.as_closure().unwrap();
                            upvalues.push(closure.upvalues[index]);
                        }
                    }
                    let closure = self.heap.alloc(ObjKind::Closure(ObjClosure { function, upvalues }));
                    self.push(Value::Obj(closure));
                    self.collect_if_needed();
                }
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let slot_base = self.frame().slot_base;
                    self.close_upvalues(slot_base);
                    self.frames.pop();
                    if self.frames.is_empty() {
                        self.pop();
                        return Ok(());
                    }
                    self.stack.truncate(slot_base);
                    self.push(result);
                }
                OpCode::Class => {
                    let name = self.read_string();
                    let class = self
                        .heap
                        .alloc(ObjKind::Class(ObjClass { name, methods: std::cell::RefCell::new(Table::new()) }));
                    self.push(Value::Obj(class));
                    self.collect_if_needed();
                }
                OpCode::Inherit => {
                    let Some(superclass_obj) = self.peek(1).as_obj() else {
                        self.runtime_error("Superclass must be a class.".to_string());
                        return Err(());
                    };
                    let Some(super_class) = superclass_obj.as_class() else {
                        self.runtime_error("Superclass must be a class.".to_string());
                        return Err(());
                    };
                    let subclass_obj = self.peek(0).as_obj().expect("OP_INHERIT subclass is always a class value");
                    let sub_class = subclass_obj.as_class().expect("OP_INHERIT subclass is always a class");
                    sub_class.methods.borrow_mut().add_all(&super_class.methods.borrow());
                    self.pop();
                }
                OpCode::Method => {
                    let name = self.read_string();
                    let method = self.peek(0);
                    let class_val = self.peek(1);
                    let class = class_val.as_obj().unwrap().as_class().unwrap();
                    class.methods.borrow_mut().set(name, method);
                    self.pop();
                }
            }
        }
    }

    // ---- instruction decoding helpers -------------------------------------------------

    fn frame(&self) -> &CallFrame {
        self.frames.last().expect("run loop always has an active frame")
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("run loop always has an active frame")
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().unwrap();
        let closure = frame.closure.as_closure().unwrap();
        let function = closure.function.as_function().unwrap();
        let byte = function.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_op(&mut self) -> OpCode {
        let byte = self.read_byte();
        OpCode::from_u8(byte).expect("compiler never emits an unknown opcode")
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte() as u16;
        let lo = self.read_byte() as u16;
        (hi << 8) | lo
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        let frame = self.frames.last().unwrap();
        let closure = frame.closure.as_closure().unwrap();
        closure.function.as_function().unwrap().chunk.constants[index]
    }

    fn read_string(&mut self) -> GcRef<Obj> {
        self.read_constant().as_obj().expect("string constant")
    }

    fn binary_number(&mut self, op: impl Fn(f64, f64) -> f64) -> bool {
        if !self.peek(0).is_number() || !self.peek(1).is_number() {
            self.runtime_error("Operands must be numbers.".to_string());
            return false;
        }
        let b = self.pop().as_number().unwrap();
        let a = self.pop().as_number().unwrap();
        self.push(Value::Number(op(a, b)));
        true
    }

    fn binary_compare(&mut self, op: impl Fn(f64, f64) -> bool) -> bool {
        if !self.peek(0).is_number() || !self.peek(1).is_number() {
            self.runtime_error("Operands must be numbers.".to_string());
            return false;
        }
        let b = self.pop().as_number().unwrap();
        let a = self.pop().as_number().unwrap();
        self.push(Value::Bool(op(a, b)));
        true
    }

    /// `%`: truncates both operands to integers first, then applies the
    /// host's integer remainder (sign follows the dividend, as Rust's `%`
    /// on `i64` already does).
    fn binary_modulo(&mut self) -> bool {
        if !self.peek(0).is_number() || !self.peek(1).is_number() {
            self.runtime_error("Operands must be numbers.".to_string());
            return false;
        }
        let b = self.pop().as_number().unwrap().trunc() as i64;
        let a = self.pop().as_number().unwrap().trunc() as i64;
        if b == 0 {
            self.runtime_error("Cannot modulo by zero.".to_string());
            return false;
        }
        self.push(Value::Number((a % b) as f64));
        true
    }

    fn concatenate(&mut self) {
        let b_bytes = self.peek(0).as_obj().unwrap().as_string().unwrap().bytes.clone();
        let a_bytes = self.peek(1).as_obj().unwrap().as_string().unwrap().bytes.clone();
        let mut bytes = Vec::with_capacity(a_bytes.len() + b_bytes.len());
        bytes.extend_from_slice(&a_bytes);
        bytes.extend_from_slice(&b_bytes);
        let result = self.heap.take_string(bytes);
        self.pop();
        self.pop();
        self.push(Value::Obj(result));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_capture(source: &str) -> (InterpretResult, String) {
        let mut out: Vec<u8> = Vec::new();
        let result = {
            let mut vm = Vm::new(&mut out);
            vm.interpret(source)
        };
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn prints_arithmetic_result() {
        let (result, output) = run_capture("print 1 + 2 * 3;");
        assert!(matches!(result, InterpretResult::Ok));
        assert_eq!(output, "7\n");
    }

    #[test]
    fn closures_capture_enclosing_locals() {
        let source = r#"
            fun makeCounter() {
                var count = 0;
                fun increment() {
                    count = count + 1;
                    return count;
                }
                return increment;
            }
            var counter = makeCounter();
            print counter();
            print counter();
        "#;
        let (result, output) = run_capture(source);
        assert!(matches!(result, InterpretResult::Ok));
        assert_eq!(output, "1\n2\n");
    }

    #[test]
    fn classes_support_init_and_inheritance() {
        let source = r#"
            class Animal {
                init(name) {
                    this.name = name;
                }
                speak() {
                    print this.name + " makes a sound.";
                }
            }
            class Dog < Animal {
                speak() {
                    super.speak();
                    print this.name + " barks.";
                }
            }
            var d = Dog("Rex");
            d.speak();
        "#;
        let (result, output) = run_capture(source);
        assert!(matches!(result, InterpretResult::Ok));
        assert_eq!(output, "Rex makes a sound.\nRex barks.\n");
    }

    #[test]
    fn calling_a_non_callable_is_a_runtime_error() {
        let (result, _) = run_capture("var x = 1; x();");
        assert!(matches!(result, InterpretResult::RuntimeError));
    }

    #[test]
    fn do_while_runs_body_at_least_once() {
        let source = r#"
            var i = 0;
            do {
                print i;
                i = i + 1;
            } while (i < 3);
        "#;
        let (result, output) = run_capture(source);
        assert!(matches!(result, InterpretResult::Ok));
        assert_eq!(output, "0\n1\n2\n");
    }

    #[test]
    fn repeat_until_runs_body_at_least_once() {
        let source = r#"
            var i = 0;
            repeat {
                print i;
                i = i + 1;
            } until (i >= 3);
        "#;
        let (result, output) = run_capture(source);
        assert!(matches!(result, InterpretResult::Ok));
        assert_eq!(output, "0\n1\n2\n");
    }

    #[test]
    fn reading_a_local_in_its_own_initializer_is_a_compile_error_not_a_panic() {
        let (result, _) = run_capture("{ var a = a; }");
        assert!(matches!(result, InterpretResult::CompileError));
    }

    #[test]
    fn modulo_truncates_before_applying_the_host_remainder() {
        let (result, output) = run_capture("print 7.5 % 2;");
        assert!(matches!(result, InterpretResult::Ok));
        assert_eq!(output, "1\n");
    }

    #[test]
    fn modulo_by_zero_is_a_runtime_error() {
        let (result, _) = run_capture("print 1 % 0;");
        assert!(matches!(result, InterpretResult::RuntimeError));
    }

    #[test]
    fn stress_gc_keeps_nested_function_names_reachable() {
        let mut out: Vec<u8> = Vec::new();
        let result = {
            let mut vm = Vm::new(&mut out);
            vm.set_stress_gc(true);
            vm.interpret(
                r#"
                fun outer() {
                    fun inner() { return 1; }
                    return inner();
                }
                print outer();
                "#,
            )
        };
        assert!(matches!(result, InterpretResult::Ok));
        assert_eq!(String::from_utf8(out).unwrap(), "1\n");
    }
}
