// File: src/compiler.rs
//
// Single-pass Pratt compiler: there is no intermediate AST. Each grammar
// rule both resolves precedence and emits bytecode in the same walk, via
// a token-kind-indexed {prefix, infix, precedence} rule table threaded
// with a `can_assign` flag so a bare `=` can only ever be consumed by a
// prefix rule that is itself an assignment target (variable, property).

use crate::chunk::OpCode;
use crate::errors::{Diagnostic, SourceLocation};
use crate::heap::Heap;
use crate::lexer::{Scanner, Token, TokenKind};
use crate::object::{GcRef, Obj, ObjFunction};
use crate::value::Value;

const MAX_LOCALS: usize = 256;
const MAX_CONSTANTS: usize = 256;
const MAX_PARAMETERS: usize = 255;
const MAX_ARGUMENTS: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == != is equals
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * / %
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call => Primary,
            Primary => Primary,
        }
    }
}

type ParseFn = fn(&mut Parser, bool);

struct ParseRule {
    prefix: Option<ParseFn>,
    infix: Option<ParseFn>,
    precedence: Precedence,
}

fn rule(kind: TokenKind) -> ParseRule {
    use TokenKind::*;
    let r = |prefix: Option<ParseFn>, infix: Option<ParseFn>, precedence: Precedence| ParseRule {
        prefix,
        infix,
        precedence,
    };
    match kind {
        LeftParen => r(Some(Parser::grouping), Some(Parser::call), Precedence::Call),
        Dot => r(None, Some(Parser::dot), Precedence::Call),
        Minus => r(Some(Parser::unary), Some(Parser::binary), Precedence::Term),
        Plus => r(None, Some(Parser::binary), Precedence::Term),
        Slash => r(None, Some(Parser::binary), Precedence::Factor),
        Star => r(None, Some(Parser::binary), Precedence::Factor),
        Percent => r(None, Some(Parser::binary), Precedence::Factor),
        Bang => r(Some(Parser::unary), None, Precedence::None),
        BangEqual => r(None, Some(Parser::binary), Precedence::Equality),
        EqualEqual => r(None, Some(Parser::binary), Precedence::Equality),
        Is => r(None, Some(Parser::binary), Precedence::Equality),
        Equals => r(None, Some(Parser::binary), Precedence::Equality),
        Greater => r(None, Some(Parser::binary), Precedence::Comparison),
        GreaterEqual => r(None, Some(Parser::binary), Precedence::Comparison),
        Less => r(None, Some(Parser::binary), Precedence::Comparison),
        LessEqual => r(None, Some(Parser::binary), Precedence::Comparison),
        Identifier => r(Some(Parser::variable), None, Precedence::None),
        String => r(Some(Parser::string), None, Precedence::None),
        Number => r(Some(Parser::number), None, Precedence::None),
        And => r(None, Some(Parser::and_), Precedence::And),
        Or => r(None, Some(Parser::or_), Precedence::Or),
        False => r(Some(Parser::literal), None, Precedence::None),
        True => r(Some(Parser::literal), None, Precedence::None),
        Null => r(Some(Parser::literal), None, Precedence::None),
        This => r(Some(Parser::this_), None, Precedence::None),
        Super => r(Some(Parser::super_), None, Precedence::None),
        _ => r(None, None, Precedence::None),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

struct Local {
    name: String,
    depth: i32, // -1 while uninitialized
    is_captured: bool,
}

#[derive(Clone, Copy)]
struct UpvalueSlot {
    is_local: bool,
    index: u8,
}

struct Compiler {
    enclosing: Option<Box<Compiler>>,
    function: ObjFunction,
    kind: FunctionKind,
    locals: Vec<Local>,
    upvalues: Vec<UpvalueSlot>,
    scope_depth: i32,
}

impl Compiler {
    fn new(kind: FunctionKind, name: Option<GcRef<Obj>>, enclosing: Option<Box<Compiler>>) -> Self {
        // Slot 0 is reserved: `this` for methods/initializers, an
        // unnameable sentinel local for plain functions and the script.
        let slot_zero_name = if matches!(kind, FunctionKind::Method | FunctionKind::Initializer) {
            "this"
        } else {
            ""
        };
        Compiler {
            enclosing,
            function: ObjFunction::new(name),
            kind,
            locals: vec![Local { name: slot_zero_name.to_string(), depth: 0, is_captured: false }],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

struct ClassCompiler {
    enclosing: Option<Box<ClassCompiler>>,
    has_superclass: bool,
}

/// The parser doubles as the compiler driver: it owns the single lookahead
/// token pair and the stack of nested function/class compilers.
pub struct Parser<'src> {
    scanner: Scanner<'src>,
    current: Token,
    previous: Token,
    had_error: bool,
    panic_mode: bool,
    diagnostics: Vec<Diagnostic>,
    compiler: Box<Compiler>,
    class_compiler: Option<Box<ClassCompiler>>,
    /// Upvalue descriptors for the function `end_compiler` just finished,
    /// stashed here because by the time the enclosing compiler needs to
    /// emit them after `OP_CLOSURE`, the nested `Compiler` that owned them
    /// no longer exists.
    pending_upvalues: Vec<UpvalueSlot>,
    heap: &'src mut Heap,
}

pub struct CompileResult {
    pub function: Option<GcRef<Obj>>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Compiles a full program into a top-level script function, or reports
/// why it couldn't.
pub fn compile(source: &str, heap: &mut Heap) -> CompileResult {
    let mut parser = Parser {
        scanner: Scanner::new(source),
        current: Token { kind: TokenKind::Eof, lexeme: String::new(), line: 0 },
        previous: Token { kind: TokenKind::Eof, lexeme: String::new(), line: 0 },
        had_error: false,
        panic_mode: false,
        diagnostics: Vec::new(),
        compiler: Box::new(Compiler::new(FunctionKind::Script, None, None)),
        class_compiler: None,
        pending_upvalues: Vec::new(),
        heap,
    };

    parser.advance();
    while !parser.check(TokenKind::Eof) {
        parser.declaration();
    }
    parser.consume(TokenKind::Eof, "Expect end of expression.");

    let had_error = parser.had_error;
    let function = parser.end_compiler();
    CompileResult { function: if had_error { None } else { Some(function) }, diagnostics: parser.diagnostics }
}

impl<'src> Parser<'src> {
    // ---- token stream plumbing -------------------------------------

    fn advance(&mut self) {
        std::mem::swap(&mut self.previous, &mut self.current);
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme.clone();
            self.error_at_current(&message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn error_at_current(&mut self, message: &str) {
        let token = self.current.clone();
        self.error_at(&token, message);
    }

    fn error(&mut self, message: &str) {
        let token = self.previous.clone();
        self.error_at(&token, message);
    }

    fn error_at(&mut self, token: &Token, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let lexeme = if token.kind == TokenKind::Eof { "end".to_string() } else { token.lexeme.clone() };
        self.diagnostics.push(Diagnostic::Compile {
            message: message.to_string(),
            lexeme,
            location: SourceLocation::new(token.line),
        });
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Function
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => self.advance(),
            }
        }
    }

    // ---- bytecode emission helpers ----------------------------------

    fn current_chunk(&mut self) -> &mut crate::chunk::Chunk {
        &mut self.compiler.function.chunk
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.current_chunk().write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_op_byte(&mut self, op: OpCode, byte: u8) {
        self.emit_op(op);
        self.emit_byte(byte);
    }

    /// Interns `name`, appends it to the current chunk's constant pool
    /// (rooting it immediately), then checks whether that allocation
    /// pushed the heap over its GC threshold. Rooting before checking is
    /// what keeps this safe: the constant is already reachable through
    /// the compiler chain by the time a collection could possibly run.
    fn identifier_constant(&mut self, name: &str) -> u8 {
        let s = self.heap.copy_string(name.as_bytes());
        let index = self.current_chunk().add_constant(Value::Obj(s));
        self.maybe_collect_garbage();
        if index >= MAX_CONSTANTS {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        index as u8
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.current_chunk().add_constant(value);
        self.maybe_collect_garbage();
        if index >= MAX_CONSTANTS {
            self.error("Too many constants in one chunk.");
            return;
        }
        self.emit_op_byte(OpCode::Constant, index as u8);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_chunk().code.len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.current_chunk().code.len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
            return;
        }
        let chunk = self.current_chunk();
        chunk.code[offset] = ((jump >> 8) & 0xff) as u8;
        chunk.code[offset + 1] = (jump & 0xff) as u8;
    }

    fn emit_loop(&mut self, op: OpCode, loop_start: usize) {
        self.emit_op(op);
        let offset = self.current_chunk().code.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        self.emit_byte(((offset >> 8) & 0xff) as u8);
        self.emit_byte((offset & 0xff) as u8);
    }

    fn maybe_collect_garbage(&mut self) {
        if self.heap.should_collect() {
            mark_compiler_chain(self.heap, &self.compiler);
            self.heap.finish_collect();
        }
    }

    // ---- scope / locals ----------------------------------------------

    fn begin_scope(&mut self) {
        self.compiler.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.compiler.scope_depth -= 1;
        while let Some(local) = self.compiler.locals.last() {
            if local.depth <= self.compiler.scope_depth {
                break;
            }
            if self.compiler.locals.last().unwrap().is_captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
            self.compiler.locals.pop();
        }
    }

    fn declare_variable(&mut self) {
        if self.compiler.scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme.clone();
        for local in self.compiler.locals.iter().rev() {
            if local.depth != -1 && local.depth < self.compiler.scope_depth {
                break;
            }
            if local.name == name {
                self.error("Already a variable with this name in this scope.");
            }
        }
        self.add_local(name);
    }

    fn add_local(&mut self, name: String) {
        if self.compiler.locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.compiler.locals.push(Local { name, depth: -1, is_captured: false });
    }

    fn mark_initialized(&mut self) {
        if self.compiler.scope_depth == 0 {
            return;
        }
        let depth = self.compiler.scope_depth;
        self.compiler.locals.last_mut().unwrap().depth = depth;
    }

    /// Returns the matching local's slot plus whether it's initialized
    /// (`depth != -1`). Callers must report "can't read local variable in
    /// its own initializer" when the flag is false, matching `resolveLocal`
    /// in the reference compiler.
    fn resolve_local(compiler: &Compiler, name: &str) -> Option<(usize, bool)> {
        compiler
            .locals
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, local)| if local.name == name { Some((i, local.depth != -1)) } else { None })
    }

    /// Returns the upvalue slot plus whether the captured local was found
    /// uninitialized (depth `-1`) in the enclosing compiler that owns it.
    fn resolve_upvalue(compiler: &mut Compiler, name: &str) -> Option<(u8, bool)> {
        let enclosing = compiler.enclosing.as_mut()?;
        if let Some((local_index, initialized)) = Self::resolve_local(enclosing, name) {
            enclosing.locals[local_index].is_captured = true;
            let index = Self::add_upvalue(compiler, local_index as u8, true);
            return Some((index, !initialized));
        }
        if let Some((upvalue_index, needs_error)) = Self::resolve_upvalue(enclosing, name) {
            let index = Self::add_upvalue(compiler, upvalue_index, false);
            return Some((index, needs_error));
        }
        None
    }

    fn add_upvalue(compiler: &mut Compiler, index: u8, is_local: bool) -> u8 {
        for (i, uv) in compiler.upvalues.iter().enumerate() {
            if uv.index == index && uv.is_local == is_local {
                return i as u8;
            }
        }
        compiler.upvalues.push(UpvalueSlot { is_local, index });
        compiler.function.upvalue_count = compiler.upvalues.len() as u8;
        (compiler.upvalues.len() - 1) as u8
    }

    // ---- declarations --------------------------------------------------

    fn declaration(&mut self) {
        if self.matches(TokenKind::Class) {
            self.class_declaration();
        } else if self.matches(TokenKind::Fun) || self.matches(TokenKind::Function) {
            self.fun_declaration();
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous.lexeme.clone();
        let name_constant = self.identifier_constant(&class_name);
        self.declare_variable();

        self.emit_op_byte(OpCode::Class, name_constant);
        self.define_variable(name_constant);

        let mut class_compiler =
            Box::new(ClassCompiler { enclosing: self.class_compiler.take(), has_superclass: false });

        if self.matches(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            let superclass_name = self.previous.clone();
            self.variable_from_token(&superclass_name, false);

            if superclass_name.lexeme == class_name {
                self.error("A class can't inherit from itself.");
            }

            self.begin_scope();
            self.add_local("super".to_string());
            self.define_variable(0);

            self.named_variable(&class_name, false);
            self.emit_op(OpCode::Inherit);
            class_compiler.has_superclass = true;
        }

        self.class_compiler = Some(class_compiler);

        self.named_variable(&class_name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop); // the class value pushed for the `named_variable` call above

        if self.class_compiler.as_ref().unwrap().has_superclass {
            self.end_scope();
        }
        self.class_compiler = self.class_compiler.take().unwrap().enclosing;
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name = self.previous.lexeme.clone();
        let constant = self.identifier_constant(&name);
        let kind = if name == "init" { FunctionKind::Initializer } else { FunctionKind::Method };
        self.function(kind);
        self.emit_op_byte(OpCode::Method, constant);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    fn function(&mut self, kind: FunctionKind) {
        let name = self.heap.copy_string(self.previous.lexeme.as_bytes());
        let new_compiler = Box::new(Compiler::new(kind, Some(name), None));
        let enclosing = std::mem::replace(&mut self.compiler, new_compiler);
        self.compiler.enclosing = Some(enclosing);
        // `name` is reachable through `self.compiler.function.name` as of the
        // line above, so it's safe to check for collection now.
        self.maybe_collect_garbage();

        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                if self.compiler.function.arity as usize >= MAX_PARAMETERS {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    self.compiler.function.arity += 1;
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let function_ref = self.end_compiler();

        let index = self.current_chunk().add_constant(Value::Obj(function_ref));
        self.maybe_collect_garbage();
        if index >= MAX_CONSTANTS {
            self.error("Too many constants in one chunk.");
        }
        self.emit_op_byte(OpCode::Closure, index as u8);
        self.emit_pending_upvalues();
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.matches(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Null);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.compiler.scope_depth > 0 {
            return 0;
        }
        let name = self.previous.lexeme.clone();
        self.identifier_constant(&name)
    }

    fn define_variable(&mut self, global: u8) {
        if self.compiler.scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op_byte(OpCode::DefineGlobal, global);
    }

    // ---- statements ----------------------------------------------------

    fn statement(&mut self) {
        if self.matches(TokenKind::Print) {
            self.print_statement();
        } else if self.matches(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::Do) {
            self.do_while_statement();
        } else if self.matches(TokenKind::Repeat) {
            self.repeat_until_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::Switch) {
            self.switch_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");
        if self.check(TokenKind::Then) {
            self.advance();
        }

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.matches(TokenKind::Elf) {
            self.if_statement();
        } else if self.matches(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().code.len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(OpCode::Loop, loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    /// `do <stmt> while (cond);` — runs the body once unconditionally,
    /// then loops back while the condition stays truthy.
    fn do_while_statement(&mut self) {
        let loop_start = self.current_chunk().code.len();
        self.statement();
        self.consume(TokenKind::While, "Expect 'while' after 'do' body.");
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");
        self.consume(TokenKind::Semicolon, "Expect ';' after 'do/while' statement.");
        self.emit_loop(OpCode::LoopIfTrue, loop_start);
    }

    /// `repeat <stmt> until (cond);` — runs the body once unconditionally,
    /// then loops back while the condition stays falsey.
    fn repeat_until_statement(&mut self) {
        let loop_start = self.current_chunk().code.len();
        self.statement();
        self.consume(TokenKind::Until, "Expect 'until' after 'repeat' body.");
        self.consume(TokenKind::LeftParen, "Expect '(' after 'until'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");
        self.consume(TokenKind::Semicolon, "Expect ';' after 'repeat/until' statement.");
        self.emit_loop(OpCode::LoopIfFalse, loop_start);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.matches(TokenKind::Semicolon) {
            // no initializer
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk().code.len();
        let mut exit_jump: Option<usize> = None;
        if !self.matches(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.matches(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_chunk().code.len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(OpCode::Loop, loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(OpCode::Loop, loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }

        self.end_scope();
    }

    fn switch_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'switch'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after switch subject.");
        self.consume(TokenKind::Colon, "Expect ':' after switch subject.");

        let mut end_jumps = Vec::new();
        while self.matches(TokenKind::Case) {
            self.expression();
            self.consume(TokenKind::Colon, "Expect ':' after case value.");
            self.emit_op(OpCode::SwitchEqual);
            let false_jump = self.emit_jump(OpCode::JumpIfFalse);
            self.emit_op(OpCode::Pop); // discard the SwitchEqual comparison result
            self.statement();
            end_jumps.push(self.emit_jump(OpCode::Jump));
            self.patch_jump(false_jump);
            self.emit_op(OpCode::Pop);
        }

        if self.matches(TokenKind::Default) {
            self.consume(TokenKind::Colon, "Expect ':' after 'default'.");
            self.statement();
        }

        for jump in end_jumps {
            self.patch_jump(jump);
        }
        self.emit_op(OpCode::Pop); // the switch subject
    }

    fn return_statement(&mut self) {
        if self.compiler.kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }

        if self.matches(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.compiler.kind == FunctionKind::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    fn emit_return(&mut self) {
        if self.compiler.kind == FunctionKind::Initializer {
            self.emit_op_byte(OpCode::GetLocal, 0);
        } else {
            self.emit_op(OpCode::Null);
        }
        self.emit_op(OpCode::Return);
    }

    // ---- expressions ---------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = rule(self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= rule(self.current.kind).precedence {
            self.advance();
            let infix = rule(self.previous.kind).infix.expect("infix rule must exist for this precedence");
            infix(self, can_assign);
        }

        if can_assign && self.matches(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn number(&mut self, _can_assign: bool) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or(0.0);
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self, _can_assign: bool) {
        let s = self.heap.copy_string(self.previous.lexeme.as_bytes());
        self.emit_constant(Value::Obj(s));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::Null => self.emit_op(OpCode::Null),
            _ => unreachable!(),
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self, _can_assign: bool) {
        let kind = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match kind {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => unreachable!(),
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        let operator_rule = rule(operator);
        self.parse_precedence(operator_rule.precedence.next());
        match operator {
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            TokenKind::Percent => self.emit_op(OpCode::Modulo),
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::EqualEqual | TokenKind::Is | TokenKind::Equals => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            _ => unreachable!(),
        }
    }

    fn and_(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self, _can_assign: bool) {
        let argc = self.argument_list();
        self.emit_op_byte(OpCode::Call, argc);
    }

    fn argument_list(&mut self) -> u8 {
        let mut argc: usize = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if argc >= MAX_ARGUMENTS {
                    self.error("Can't have more than 255 arguments.");
                } else {
                    argc += 1;
                }
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        argc as u8
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.previous.lexeme.clone();
        let constant = self.identifier_constant(&name);

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_op_byte(OpCode::SetProperty, constant);
        } else if self.matches(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.emit_op_byte(OpCode::Invoke, constant);
            self.emit_byte(argc);
        } else {
            self.emit_op_byte(OpCode::GetProperty, constant);
        }
    }

    fn this_(&mut self, _can_assign: bool) {
        if self.class_compiler.is_none() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        let token = self.previous.clone();
        self.variable_from_token(&token, false);
    }

    fn super_(&mut self, _can_assign: bool) {
        match &self.class_compiler {
            None => self.error("Can't use 'super' outside of a class."),
            Some(cc) if !cc.has_superclass => {
                self.error("Can't use 'super' in a class with no superclass.")
            }
            _ => {}
        }

        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let method = self.previous.lexeme.clone();
        let constant = self.identifier_constant(&method);

        self.named_variable("this", false);
        if self.matches(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.named_variable("super", false);
            self.emit_op_byte(OpCode::SuperInvoke, constant);
            self.emit_byte(argc);
        } else {
            self.named_variable("super", false);
            self.emit_op_byte(OpCode::GetSuper, constant);
        }
    }

    fn variable(&mut self, can_assign: bool) {
        let token = self.previous.clone();
        self.variable_from_token(&token, can_assign);
    }

    fn variable_from_token(&mut self, token: &Token, can_assign: bool) {
        let name = token.lexeme.clone();
        self.named_variable(&name, can_assign);
    }

    fn named_variable(&mut self, name: &str, can_assign: bool) {
        let (get_op, set_op, slot) = if let Some((local, initialized)) = Self::resolve_local(&self.compiler, name) {
            if !initialized {
                self.error("Can't read local variable in its own initializer.");
            }
            (OpCode::GetLocal, OpCode::SetLocal, local as u8)
        } else if let Some((upvalue, needs_error)) = Self::resolve_upvalue(&mut self.compiler, name) {
            if needs_error {
                self.error("Can't read local variable in its own initializer.");
            }
            (OpCode::GetUpvalue, OpCode::SetUpvalue, upvalue)
        } else {
            let constant = self.identifier_constant(name);
            (OpCode::GetGlobal, OpCode::SetGlobal, constant)
        };

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_op_byte(set_op, slot);
        } else {
            self.emit_op_byte(get_op, slot);
        }
    }

    // ---- compiler stack management -------------------------------------

    fn end_compiler(&mut self) -> GcRef<Obj> {
        self.emit_return();

        let placeholder = Box::new(Compiler::new(FunctionKind::Script, None, None));
        let finished = std::mem::replace(&mut self.compiler, placeholder);
        self.pending_upvalues = finished.upvalues.clone();

        if let Some(enclosing) = finished.enclosing {
            self.compiler = enclosing;
        }

        self.heap.alloc(crate::object::ObjKind::Function(finished.function))
    }

    fn emit_pending_upvalues(&mut self) {
        let upvalues = std::mem::take(&mut self.pending_upvalues);
        for uv in upvalues {
            self.emit_byte(if uv.is_local { 1 } else { 0 });
            self.emit_byte(uv.index);
        }
    }
}

fn mark_compiler_chain(heap: &mut Heap, compiler: &Compiler) {
    for v in &compiler.function.chunk.constants {
        heap.mark_value(v);
    }
    if let Some(name) = compiler.function.name {
        heap.mark_object(name);
    }
    if let Some(enclosing) = &compiler.enclosing {
        mark_compiler_chain(heap, enclosing);
    }
}
