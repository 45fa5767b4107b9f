// File: src/debug.rs
//
// Bytecode disassembler. Not on the execution path; exists so a human (or
// the compile-time `DEBUG_PRINT_CODE` style build flag) can inspect what
// the compiler actually emitted.

use crate::chunk::{Chunk, OpCode};

pub fn disassemble_chunk(chunk: &Chunk, name: &str) -> String {
    let mut out = format!("== {} ==\n", name);
    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(chunk, offset, &mut out);
    }
    out
}

pub fn disassemble_instruction(chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    use std::fmt::Write;

    write!(out, "{:04} ", offset).ok();
    if offset > 0 && chunk.lines[offset] == chunk.lines[offset - 1] {
        out.push_str("   | ");
    } else {
        write!(out, "{:4} ", chunk.lines[offset]).ok();
    }

    let byte = chunk.code[offset];
    let Some(op) = OpCode::from_u8(byte) else {
        writeln!(out, "Unknown opcode {}", byte).ok();
        return offset + 1;
    };

    match op {
        OpCode::Constant | OpCode::GetGlobal | OpCode::DefineGlobal | OpCode::SetGlobal
        | OpCode::Class | OpCode::GetProperty | OpCode::SetProperty | OpCode::Method
        | OpCode::GetSuper => constant_instruction(op_name(op), chunk, offset, out),
        OpCode::GetLocal | OpCode::SetLocal | OpCode::GetUpvalue | OpCode::SetUpvalue
        | OpCode::Call => byte_instruction(op_name(op), chunk, offset, out),
        OpCode::Jump | OpCode::JumpIfFalse => jump_instruction(op_name(op), 1, chunk, offset, out),
        OpCode::Loop | OpCode::LoopIfFalse | OpCode::LoopIfTrue => {
            jump_instruction(op_name(op), -1, chunk, offset, out)
        }
        OpCode::Invoke | OpCode::SuperInvoke => invoke_instruction(op_name(op), chunk, offset, out),
        OpCode::Closure => closure_instruction(chunk, offset, out),
        _ => simple_instruction(op_name(op), offset, out),
    }
}

fn op_name(op: OpCode) -> &'static str {
    use OpCode::*;
    match op {
        Constant => "OP_CONSTANT",
        Null => "OP_NULL",
        True => "OP_TRUE",
        False => "OP_FALSE",
        Pop => "OP_POP",
        GetLocal => "OP_GET_LOCAL",
        SetLocal => "OP_SET_LOCAL",
        GetGlobal => "OP_GET_GLOBAL",
        DefineGlobal => "OP_DEFINE_GLOBAL",
        SetGlobal => "OP_SET_GLOBAL",
        GetUpvalue => "OP_GET_UPVALUE",
        SetUpvalue => "OP_SET_UPVALUE",
        GetProperty => "OP_GET_PROPERTY",
        SetProperty => "OP_SET_PROPERTY",
        GetSuper => "OP_GET_SUPER",
        Equal => "OP_EQUAL",
        SwitchEqual => "OP_SWITCH_EQUAL",
        Greater => "OP_GREATER",
        Less => "OP_LESS",
        Add => "OP_ADD",
        Subtract => "OP_SUBTRACT",
        Multiply => "OP_MULTIPLY",
        Divide => "OP_DIVIDE",
        Modulo => "OP_MODULO",
        Not => "OP_NOT",
        Negate => "OP_NEGATE",
        Print => "OP_PRINT",
        Jump => "OP_JUMP",
        JumpIfFalse => "OP_JUMP_IF_FALSE",
        Loop => "OP_LOOP",
        LoopIfFalse => "OP_LOOP_IF_FALSE",
        LoopIfTrue => "OP_LOOP_IF_TRUE",
        Call => "OP_CALL",
        Invoke => "OP_INVOKE",
        SuperInvoke => "OP_SUPER_INVOKE",
        Closure => "OP_CLOSURE",
        CloseUpvalue => "OP_CLOSE_UPVALUE",
        Return => "OP_RETURN",
        Class => "OP_CLASS",
        Inherit => "OP_INHERIT",
        Method => "OP_METHOD",
    }
}

fn simple_instruction(name: &str, offset: usize, out: &mut String) -> usize {
    use std::fmt::Write;
    writeln!(out, "{}", name).ok();
    offset + 1
}

fn byte_instruction(name: &str, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    use std::fmt::Write;
    let slot = chunk.code[offset + 1];
    writeln!(out, "{:-16} {:4}", name, slot).ok();
    offset + 2
}

fn constant_instruction(name: &str, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    use std::fmt::Write;
    let index = chunk.code[offset + 1] as usize;
    let value = chunk.constants.get(index).map(|v| v.to_string()).unwrap_or_default();
    writeln!(out, "{:-16} {:4} '{}'", name, index, value).ok();
    offset + 2
}

fn invoke_instruction(name: &str, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    use std::fmt::Write;
    let index = chunk.code[offset + 1] as usize;
    let argc = chunk.code[offset + 2];
    let value = chunk.constants.get(index).map(|v| v.to_string()).unwrap_or_default();
    writeln!(out, "{:-16} ({} args) {:4} '{}'", name, argc, index, value).ok();
    offset + 3
}

fn jump_instruction(name: &str, sign: i32, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    use std::fmt::Write;
    let hi = chunk.code[offset + 1] as u16;
    let lo = chunk.code[offset + 2] as u16;
    let distance = (hi << 8) | lo;
    let target = offset as i32 + 3 + sign * distance as i32;
    writeln!(out, "{:-16} {:4} -> {}", name, offset, target).ok();
    offset + 3
}

fn closure_instruction(chunk: &Chunk, mut offset: usize, out: &mut String) -> usize {
    use std::fmt::Write;
    offset += 1;
    let index = chunk.code[offset] as usize;
    offset += 1;
    let value = chunk.constants.get(index).map(|v| v.to_string()).unwrap_or_default();
    writeln!(out, "{:-16} {:4} '{}'", "OP_CLOSURE", index, value).ok();

    let upvalue_count = chunk
        .constants
        .get(index)
        .and_then(|v| v.as_obj())
        .and_then(|o| o.as_function().map(|f| f.upvalue_count))
        .unwrap_or(0);
    for _ in 0..upvalue_count {
        let is_local = chunk.code[offset];
        offset += 1;
        let index = chunk.code[offset];
        offset += 1;
        writeln!(
            out,
            "{:04}      |                     {} {}",
            offset - 2,
            if is_local != 0 { "local" } else { "upvalue" },
            index
        )
        .ok();
    }
    offset
}
