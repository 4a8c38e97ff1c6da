//! # Compiler
//!
//! Lowers the syntax tree to sandbox bytecode. Name binding is settled
//! here: every name must be a capability, an intrinsic, or a local the
//! program assigns somewhere. Anything else fails before a single
//! instruction runs.

use crate::ast::{BoolOp, Expr, FPart, Stmt, StmtKind, Target};
use crate::bindings::{self, Binding, Capability};
use crate::error::{self, Error, Result};
use crate::opcode::{CompareOp, Method, Opcode, Program, Slot};
use crate::parser;
use crate::value::Value;

/// Compile program text to bytecode
pub fn compile(source: &str) -> Result<Program> {
    let stmts = parser::parse(source).map_err(|e| e.with_operation("compiler::compile"))?;

    let mut compiler = Compiler {
        code: Vec::new(),
        lines: Vec::new(),
        locals: Vec::new(),
        line: 1,
        loops: Vec::new(),
    };
    compiler.declare_block(&stmts)?;
    compiler.block(&stmts)?;
    compiler.emit(Opcode::Halt);

    tracing::debug!(
        opcodes = compiler.code.len(),
        locals = compiler.locals.len(),
        "compiled sandbox program"
    );

    Ok(Program {
        code: compiler.code,
        lines: compiler.lines,
        locals: compiler.locals,
        source: source.to_string(),
    })
}

struct LoopContext {
    continue_target: usize,
    breaks: Vec<usize>,
}

struct Compiler {
    code: Vec<Opcode>,
    lines: Vec<usize>,
    locals: Vec<String>,
    line: usize,
    loops: Vec<LoopContext>,
}

impl Compiler {
    fn fail(&self, err: Error) -> Error {
        err.with_operation("compiler::compile")
            .at_line(self.line)
    }

    fn emit(&mut self, op: Opcode) -> usize {
        self.code.push(op);
        self.lines.push(self.line);
        self.code.len() - 1
    }

    fn here(&self) -> usize {
        self.code.len()
    }

    /// Point a previously emitted jump at `target`
    fn patch(&mut self, at: usize, target: usize) {
        match &mut self.code[at] {
            Opcode::Jump(t)
            | Opcode::JumpIfFalse(t)
            | Opcode::JumpIfFalseOrPop(t)
            | Opcode::JumpIfTrueOrPop(t)
            | Opcode::ForIter(t) => *t = target,
            _ => {}
        }
    }

    // =========================================================================
    // Local declaration pass
    // =========================================================================

    fn declare_block(&mut self, stmts: &[Stmt]) -> Result<()> {
        for stmt in stmts {
            self.line = stmt.line;
            match &stmt.kind {
                StmtKind::Assign { targets, value } => {
                    for target in targets {
                        self.declare_target(target)?;
                    }
                    self.declare_expr(value)?;
                }
                StmtKind::AugAssign { name, value, .. } => {
                    self.declare_name(name)?;
                    self.declare_expr(value)?;
                }
                StmtKind::Expr(expr) => self.declare_expr(expr)?,
                StmtKind::If { branches, orelse } => {
                    for (cond, body) in branches {
                        self.declare_expr(cond)?;
                        self.declare_block(body)?;
                    }
                    self.declare_block(orelse)?;
                }
                StmtKind::For { target, iter, body } => {
                    self.declare_target(target)?;
                    self.declare_expr(iter)?;
                    self.declare_block(body)?;
                }
                StmtKind::While { cond, body } => {
                    self.declare_expr(cond)?;
                    self.declare_block(body)?;
                }
                StmtKind::Break | StmtKind::Continue | StmtKind::Pass => {}
            }
        }
        Ok(())
    }

    fn declare_target(&mut self, target: &Target) -> Result<()> {
        for name in target.names() {
            self.declare_name(name)?;
        }
        Ok(())
    }

    fn declare_name(&mut self, name: &str) -> Result<()> {
        if bindings::is_reserved(name) {
            return Err(self.fail(error::read_only_binding(name)));
        }
        if Capability::from_name(name).is_none() && !self.locals.iter().any(|l| l == name) {
            self.locals.push(name.to_string());
        }
        Ok(())
    }

    /// Comprehension variables are the only bindings inside expressions
    fn declare_expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::ListComp {
                element,
                target,
                iter,
                conditions,
            } => {
                self.declare_target(target)?;
                self.declare_expr(element)?;
                self.declare_expr(iter)?;
                for cond in conditions {
                    self.declare_expr(cond)?;
                }
            }
            Expr::List(items) | Expr::Tuple(items) => {
                for item in items {
                    self.declare_expr(item)?;
                }
            }
            Expr::FString(parts) => {
                for part in parts {
                    if let FPart::Value { expr, .. } = part {
                        self.declare_expr(expr)?;
                    }
                }
            }
            Expr::Unary { operand, .. } => self.declare_expr(operand)?,
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.declare_expr(left)?;
                self.declare_expr(right)?;
            }
            Expr::Compare { left, rest } => {
                self.declare_expr(left)?;
                for (_, right) in rest {
                    self.declare_expr(right)?;
                }
            }
            Expr::IfElse { cond, then, orelse } => {
                self.declare_expr(cond)?;
                self.declare_expr(then)?;
                self.declare_expr(orelse)?;
            }
            Expr::Index { value, index } => {
                self.declare_expr(value)?;
                self.declare_expr(index)?;
            }
            Expr::Slice { value, start, end } => {
                self.declare_expr(value)?;
                for bound in [start, end].into_iter().flatten() {
                    self.declare_expr(bound)?;
                }
            }
            Expr::Call { args, kwargs, .. } => {
                for arg in args.iter().chain(kwargs.iter().map(|(_, v)| v)) {
                    self.declare_expr(arg)?;
                }
            }
            Expr::MethodCall {
                receiver,
                args,
                kwargs,
                ..
            } => {
                self.declare_expr(receiver)?;
                for arg in args.iter().chain(kwargs.iter().map(|(_, v)| v)) {
                    self.declare_expr(arg)?;
                }
            }
            Expr::Int(_) | Expr::Str(_) | Expr::Bool(_) | Expr::None | Expr::Name(_) => {}
        }
        Ok(())
    }

    fn resolve(&self, name: &str) -> Result<Binding> {
        bindings::resolve(name, &self.locals).ok_or_else(|| self.fail(error::unknown_name(name)))
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn block(&mut self, stmts: &[Stmt]) -> Result<()> {
        for stmt in stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<()> {
        self.line = stmt.line;
        match &stmt.kind {
            StmtKind::Assign { targets, value } => {
                self.expr(value)?;
                for (i, target) in targets.iter().enumerate() {
                    if i + 1 < targets.len() {
                        self.emit(Opcode::Dup);
                    }
                    self.store(target)?;
                }
            }
            StmtKind::AugAssign { name, op, value } => {
                self.load_name(name)?;
                self.expr(value)?;
                self.emit(Opcode::Binary(*op));
                self.store(&Target::Name(name.clone()))?;
            }
            StmtKind::Expr(expr) => {
                if !self.list_mutation(expr)? {
                    self.expr(expr)?;
                    self.emit(Opcode::Pop);
                }
            }
            StmtKind::If { branches, orelse } => {
                let mut ends = Vec::new();
                for (cond, body) in branches {
                    self.line = stmt.line;
                    self.expr(cond)?;
                    let skip = self.emit(Opcode::JumpIfFalse(0));
                    self.block(body)?;
                    self.line = stmt.line;
                    ends.push(self.emit(Opcode::Jump(0)));
                    let next = self.here();
                    self.patch(skip, next);
                }
                self.block(orelse)?;
                let end = self.here();
                for at in ends {
                    self.patch(at, end);
                }
            }
            StmtKind::While { cond, body } => {
                let start = self.here();
                self.expr(cond)?;
                let exit = self.emit(Opcode::JumpIfFalse(0));
                self.loops.push(LoopContext {
                    continue_target: start,
                    breaks: Vec::new(),
                });
                self.block(body)?;
                self.line = stmt.line;
                self.emit(Opcode::Jump(start));
                let end = self.here();
                self.patch(exit, end);
                self.finish_loop(end);
            }
            StmtKind::For { target, iter, body } => {
                self.expr(iter)?;
                self.emit(Opcode::GetIter);
                let start = self.emit(Opcode::ForIter(0));
                self.store(target)?;
                self.loops.push(LoopContext {
                    continue_target: start,
                    breaks: Vec::new(),
                });
                self.block(body)?;
                self.line = stmt.line;
                self.emit(Opcode::Jump(start));
                let end = self.here();
                self.patch(start, end);
                self.finish_loop(end);
                self.emit(Opcode::PopIter);
            }
            StmtKind::Break => {
                if self.loops.is_empty() {
                    return Err(self.fail(error::parse_error(self.line, "'break' outside loop")));
                }
                let at = self.emit(Opcode::Jump(0));
                if let Some(ctx) = self.loops.last_mut() {
                    ctx.breaks.push(at);
                }
            }
            StmtKind::Continue => {
                let target = match self.loops.last() {
                    Some(ctx) => ctx.continue_target,
                    None => {
                        return Err(self.fail(error::parse_error(self.line, "'continue' not properly in loop")));
                    }
                };
                self.emit(Opcode::Jump(target));
            }
            StmtKind::Pass => {}
        }
        Ok(())
    }

    fn finish_loop(&mut self, end: usize) {
        if let Some(ctx) = self.loops.pop() {
            for at in ctx.breaks {
                self.patch(at, end);
            }
        }
    }

    /// `name.append(x)` / `name.extend(xs)` mutate the named list in place
    fn list_mutation(&mut self, expr: &Expr) -> Result<bool> {
        let (receiver, method, args, kwargs) = match expr {
            Expr::MethodCall {
                receiver,
                method,
                args,
                kwargs,
            } if method == "append" || method == "extend" => (receiver, method, args, kwargs),
            _ => return Ok(false),
        };

        let slot = match receiver.as_ref() {
            Expr::Name(name) => match self.resolve(name)? {
                Binding::Local(slot) => Slot::Local(slot),
                Binding::Capability(Capability::Result) => Slot::Result,
                _ => return Err(self.fail(error::read_only_binding(name))),
            },
            _ => {
                return Err(self.fail(Error::unsupported(format!(
                    "{}() needs a variable as its receiver; assign the list to a name first",
                    method
                ))));
            }
        };
        if !kwargs.is_empty() {
            return Err(self.fail(error::invalid_argument(format!(
                "{}() takes no keyword arguments",
                method
            ))));
        }
        if args.len() != 1 {
            return Err(self.fail(error::arity(method, "exactly 1", args.len())));
        }

        self.expr(&args[0])?;
        if method == "append" {
            self.emit(Opcode::Append(slot));
        } else {
            self.emit(Opcode::Extend(slot));
        }
        Ok(true)
    }

    fn load_name(&mut self, name: &str) -> Result<()> {
        match self.resolve(name)? {
            Binding::Local(slot) => {
                self.emit(Opcode::LoadLocal(slot));
            }
            Binding::Capability(cap) if !cap.is_callable() => {
                self.emit(Opcode::LoadCapability(cap));
            }
            Binding::Capability(_) | Binding::Builtin(_) => {
                return Err(self.fail(error::type_mismatch(format!(
                    "'{}' is a function and can only be called",
                    name
                ))));
            }
        }
        Ok(())
    }

    fn store(&mut self, target: &Target) -> Result<()> {
        match target {
            Target::Name(name) => match self.resolve(name)? {
                Binding::Local(slot) => {
                    self.emit(Opcode::StoreLocal(slot));
                }
                Binding::Capability(Capability::Result) => {
                    self.emit(Opcode::StoreResult);
                }
                _ => return Err(self.fail(error::read_only_binding(name))),
            },
            Target::Tuple(items) => {
                self.emit(Opcode::Unpack(items.len()));
                for item in items {
                    self.store(item)?;
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Int(i) => {
                self.emit(Opcode::Const(Value::Int(*i)));
            }
            Expr::Str(s) => {
                self.emit(Opcode::Const(Value::from(s.as_str())));
            }
            Expr::Bool(b) => {
                self.emit(Opcode::Const(Value::Bool(*b)));
            }
            Expr::None => {
                self.emit(Opcode::Const(Value::None));
            }
            Expr::Name(name) => self.load_name(name)?,
            Expr::FString(parts) => {
                for part in parts {
                    match part {
                        FPart::Literal(s) => {
                            self.emit(Opcode::Const(Value::from(s.as_str())));
                        }
                        FPart::Value { expr, repr } => {
                            self.expr(expr)?;
                            self.emit(Opcode::Format { repr: *repr });
                        }
                    }
                }
                self.emit(Opcode::BuildString(parts.len()));
            }
            Expr::List(items) | Expr::Tuple(items) => {
                for item in items {
                    self.expr(item)?;
                }
                self.emit(Opcode::BuildList(items.len()));
            }
            Expr::Unary { op, operand } => {
                self.expr(operand)?;
                self.emit(Opcode::Unary(*op));
            }
            Expr::Binary { op, left, right } => {
                self.expr(left)?;
                self.expr(right)?;
                self.emit(Opcode::Binary(*op));
            }
            Expr::Compare { left, rest } => self.compare(left, rest)?,
            Expr::Logical { op, left, right } => {
                self.expr(left)?;
                let jump = match op {
                    BoolOp::And => self.emit(Opcode::JumpIfFalseOrPop(0)),
                    BoolOp::Or => self.emit(Opcode::JumpIfTrueOrPop(0)),
                };
                self.expr(right)?;
                let end = self.here();
                self.patch(jump, end);
            }
            Expr::IfElse { cond, then, orelse } => {
                self.expr(cond)?;
                let skip = self.emit(Opcode::JumpIfFalse(0));
                self.expr(then)?;
                let done = self.emit(Opcode::Jump(0));
                let other = self.here();
                self.patch(skip, other);
                self.expr(orelse)?;
                let end = self.here();
                self.patch(done, end);
            }
            Expr::Index { value, index } => {
                self.expr(value)?;
                self.expr(index)?;
                self.emit(Opcode::Index);
            }
            Expr::Slice { value, start, end } => {
                self.expr(value)?;
                if let Some(start) = start {
                    self.expr(start)?;
                }
                if let Some(end) = end {
                    self.expr(end)?;
                }
                self.emit(Opcode::Slice {
                    has_start: start.is_some(),
                    has_end: end.is_some(),
                });
            }
            Expr::Call { func, args, kwargs } => self.call(func, args, kwargs)?,
            Expr::MethodCall {
                receiver,
                method,
                args,
                kwargs,
            } => {
                if method == "append" || method == "extend" {
                    return Err(self.fail(Error::unsupported(format!(
                        "{}() can only be used as a statement",
                        method
                    ))));
                }
                let resolved = Method::from_name(method)
                    .ok_or_else(|| self.fail(error::unknown_method(method)))?;
                if !kwargs.is_empty() {
                    return Err(self.fail(error::invalid_argument(
                        "keyword arguments are only accepted by print()",
                    )));
                }
                self.check_arity(method, resolved.arity(), args.len())?;
                self.expr(receiver)?;
                for arg in args {
                    self.expr(arg)?;
                }
                self.emit(Opcode::CallMethod {
                    method: resolved,
                    argc: args.len(),
                });
            }
            Expr::ListComp {
                element,
                target,
                iter,
                conditions,
            } => {
                self.emit(Opcode::BuildList(0));
                self.expr(iter)?;
                self.emit(Opcode::GetIter);
                let start = self.emit(Opcode::ForIter(0));
                self.store(target)?;
                for cond in conditions {
                    self.expr(cond)?;
                    self.emit(Opcode::JumpIfFalse(start));
                }
                self.expr(element)?;
                self.emit(Opcode::AppendTop);
                self.emit(Opcode::Jump(start));
                let end = self.here();
                self.patch(start, end);
                self.emit(Opcode::PopIter);
            }
        }
        Ok(())
    }

    /// `a < b < c` evaluates `b` once and short-circuits like `and`
    fn compare(&mut self, left: &Expr, rest: &[(CompareOp, Expr)]) -> Result<()> {
        self.expr(left)?;
        let mut cleanups = Vec::new();
        for (i, (op, right)) in rest.iter().enumerate() {
            self.expr(right)?;
            if i + 1 < rest.len() {
                self.emit(Opcode::Dup);
                self.emit(Opcode::Rot3);
                self.emit(Opcode::Compare(*op));
                cleanups.push(self.emit(Opcode::JumpIfFalseOrPop(0)));
            } else {
                self.emit(Opcode::Compare(*op));
            }
        }

        if !cleanups.is_empty() {
            let done = self.emit(Opcode::Jump(0));
            let cleanup = self.here();
            for at in cleanups {
                self.patch(at, cleanup);
            }
            self.emit(Opcode::Swap);
            self.emit(Opcode::Pop);
            let end = self.here();
            self.patch(done, end);
        }
        Ok(())
    }

    fn check_arity(&self, name: &str, (min, max): (usize, usize), got: usize) -> Result<()> {
        if got >= min && got <= max {
            return Ok(());
        }
        let expected = if min == max {
            format!("exactly {}", min)
        } else if max == usize::MAX {
            format!("at least {}", min)
        } else {
            format!("{} to {}", min, max)
        };
        Err(self.fail(error::arity(name, &expected, got)))
    }

    fn call(&mut self, func: &str, args: &[Expr], kwargs: &[(String, Expr)]) -> Result<()> {
        match self.resolve(func)? {
            Binding::Capability(Capability::Print) => {
                let mut sep = None;
                let mut end = None;
                for (key, value) in kwargs {
                    match key.as_str() {
                        "sep" => sep = Some(value),
                        "end" => end = Some(value),
                        other => {
                            return Err(self.fail(error::invalid_argument(format!(
                                "print() got an unexpected keyword argument '{}'",
                                other
                            ))));
                        }
                    }
                }
                for arg in args {
                    self.expr(arg)?;
                }
                if let Some(sep) = sep {
                    self.expr(sep)?;
                }
                if let Some(end) = end {
                    self.expr(end)?;
                }
                self.emit(Opcode::Print {
                    argc: args.len(),
                    has_sep: sep.is_some(),
                    has_end: end.is_some(),
                });
            }
            Binding::Capability(Capability::Delegate) => {
                if !kwargs.is_empty() {
                    return Err(self.fail(error::invalid_argument(
                        "keyword arguments are only accepted by print()",
                    )));
                }
                self.check_arity(func, (2, 2), args.len())?;
                for arg in args {
                    self.expr(arg)?;
                }
                self.emit(Opcode::Delegate);
            }
            Binding::Builtin(builtin) => {
                if !kwargs.is_empty() {
                    return Err(self.fail(error::invalid_argument(
                        "keyword arguments are only accepted by print()",
                    )));
                }
                self.check_arity(builtin.name(), builtin.arity(), args.len())?;
                for arg in args {
                    self.expr(arg)?;
                }
                self.emit(Opcode::CallBuiltin {
                    builtin,
                    argc: args.len(),
                });
            }
            Binding::Capability(cap) => {
                return Err(self.fail(error::type_mismatch(format!(
                    "'{}' is not callable",
                    cap.name()
                ))));
            }
            Binding::Local(_) => {
                return Err(self.fail(error::type_mismatch(format!(
                    "'{}' is a variable and cannot be called",
                    func
                ))));
            }
        }
        Ok(())
    }
}
