//! # Sandbox Interpreter
//!
//! Executes compiled programs against an execution environment.
//!
//! The interpreter is synchronous and has no host access. When the
//! program calls `ask_llm`, `run()` returns
//! [`ExecutionResult::NeedsDelegation`]; the driver performs the worker
//! inference and calls [`Interpreter::provide_delegation_response`], then
//! `run()` again to continue from the same instruction.
//!
//! Async drivers use [`Interpreter::run_slice`] instead, which also
//! returns after a short slice of compute so the caller can yield and
//! check for cancellation between slices.

use crate::bindings::Capability;
use crate::builtins;
use crate::error::{self, Error, Result};
use crate::opcode::{Opcode, Program, Slot};
use crate::ops::{self, IterState};
use crate::stack::Stack;
use crate::value::Value;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Steps between clock reads
const CLOCK_INTERVAL: usize = 256;

/// Resource limits for one program execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxLimits {
    /// Instructions executed before the run is aborted
    pub max_steps: usize,
    /// `ask_llm` calls allowed per run
    pub max_delegations: usize,
    /// Largest string (bytes) or list (items) a program may build
    pub max_value_len: usize,
    /// Captured output lines kept for the report
    pub max_output_lines: usize,
    /// Captured output bytes kept for the report
    pub max_output_bytes: usize,
    /// Interpreter time allowed per run, in milliseconds. Time spent
    /// waiting on delegations does not count.
    pub max_compute_ms: u64,
    /// Largest program text accepted, in bytes
    pub max_program_len: usize,
    /// Operand stack depth
    pub max_stack_depth: usize,
    /// Nested loop depth
    pub max_iter_depth: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_steps: 1_000_000,
            max_delegations: 1024,
            max_value_len: 64 * 1024 * 1024,
            max_output_lines: 1000,
            max_output_bytes: 1024 * 1024,
            max_compute_ms: 60_000,
            max_program_len: 64 * 1024,
            max_stack_depth: crate::stack::MAX_STACK_SIZE,
            max_iter_depth: 256,
        }
    }
}

impl SandboxLimits {
    /// Reject program text over the size limit
    pub fn check_program(&self, source: &str) -> Result<()> {
        if source.len() > self.max_program_len {
            return Err(error::value_too_large(source.len(), self.max_program_len)
                .with_operation("sandbox::check_program"));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("max_steps", self.max_steps),
            ("max_value_len", self.max_value_len),
            ("max_program_len", self.max_program_len),
            ("max_stack_depth", self.max_stack_depth),
            ("max_iter_depth", self.max_iter_depth),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(Error::config_invalid(format!("{} must be greater than zero", name))
                    .with_context("field", name));
            }
        }
        if self.max_compute_ms == 0 {
            return Err(Error::config_invalid("max_compute_ms must be greater than zero")
                .with_context("field", "max_compute_ms"));
        }
        Ok(())
    }
}

/// The bindings a program runs against
#[derive(Debug, Clone)]
pub struct Environment {
    /// `document`
    pub document: Arc<str>,
    /// `result`; `None` means absent
    pub result: Value,
    /// Captured `print` output, one entry per line
    pub output: Vec<String>,
    /// Lines dropped after the line or byte cap was reached
    pub dropped_output: usize,
}

impl Environment {
    pub fn new(document: impl Into<Arc<str>>) -> Self {
        Self {
            document: document.into(),
            result: Value::None,
            output: Vec::new(),
            dropped_output: 0,
        }
    }
}

/// A pending `ask_llm` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DelegationRequest {
    pub fragment: String,
    pub query: String,
    /// 1-based call number within the run
    pub index: usize,
    /// Source line of the call
    pub line: usize,
}

/// Outcome of `run()`
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    /// The program finished; carries the final `result` value
    Complete(Value),
    /// The program is suspended on an `ask_llm` call
    NeedsDelegation(DelegationRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Ready,
    Running,
    WaitingDelegation,
    Completed,
    Failed,
}

enum Flow {
    Continue,
    Halt,
    Delegate(DelegationRequest),
}

type OutputCallback = Box<dyn FnMut(&str) + Send>;

/// Bytecode interpreter for one program execution
pub struct Interpreter {
    program: Arc<Program>,
    limits: SandboxLimits,
    env: Environment,
    stack: Stack,
    iters: Vec<IterState>,
    locals: Vec<Option<Value>>,
    pc: usize,
    steps: usize,
    delegations: usize,
    state: ExecutionState,
    compute: Duration,
    pending_line: String,
    output_bytes: usize,
    output_callback: Option<OutputCallback>,
}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("state", &self.state)
            .field("pc", &self.pc)
            .field("steps", &self.steps)
            .field("delegations", &self.delegations)
            .field("compute", &self.compute)
            .field("stack_len", &self.stack.len())
            .field("output_lines", &self.env.output.len())
            .finish_non_exhaustive()
    }
}

impl Interpreter {
    pub fn new(program: Program, document: impl Into<Arc<str>>) -> Self {
        Self::with_environment(program, Environment::new(document))
    }

    pub fn with_environment(program: Program, env: Environment) -> Self {
        let limits = SandboxLimits::default();
        let locals = vec![None; program.locals.len()];
        Self {
            program: Arc::new(program),
            stack: Stack::with_max_depth(limits.max_stack_depth),
            limits,
            env,
            iters: Vec::new(),
            locals,
            pc: 0,
            steps: 0,
            delegations: 0,
            state: ExecutionState::Ready,
            compute: Duration::ZERO,
            pending_line: String::new(),
            output_bytes: 0,
            output_callback: None,
        }
    }

    pub fn with_limits(mut self, limits: SandboxLimits) -> Self {
        self.stack = Stack::with_max_depth(limits.max_stack_depth);
        self.limits = limits;
        self
    }

    /// Receive each captured output line as it is printed
    pub fn with_output_callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.output_callback = Some(Box::new(callback));
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn delegations(&self) -> usize {
        self.delegations
    }

    /// Interpreter time spent so far, excluding delegation waits
    pub fn compute_time(&self) -> Duration {
        self.compute
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn result(&self) -> &Value {
        &self.env.result
    }

    pub fn output(&self) -> &[String] {
        &self.env.output
    }

    pub fn into_environment(mut self) -> Environment {
        self.flush_output();
        self.env
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Run until the program completes or suspends on a delegation
    pub fn run(&mut self) -> Result<ExecutionResult> {
        loop {
            if let Some(result) = self.drive(None)? {
                return Ok(result);
            }
        }
    }

    /// Like [`run`](Self::run), but returns `Ok(None)` once roughly
    /// `slice` of compute has passed. Call again to continue.
    pub fn run_slice(&mut self, slice: Duration) -> Result<Option<ExecutionResult>> {
        self.drive(Some(slice))
    }

    fn drive(&mut self, slice: Option<Duration>) -> Result<Option<ExecutionResult>> {
        match self.state {
            ExecutionState::Completed => {
                return Ok(Some(ExecutionResult::Complete(self.env.result.clone())));
            }
            ExecutionState::Failed => {
                return Err(Error::unexpected("program already failed").with_operation("interpreter::run"));
            }
            ExecutionState::WaitingDelegation => {
                return Err(Error::unexpected("waiting for a delegation response")
                    .with_operation("interpreter::run"));
            }
            ExecutionState::Ready | ExecutionState::Running => {}
        }
        self.state = ExecutionState::Running;

        let started = Instant::now();
        let outcome = self.step_until(started, slice);
        self.compute += started.elapsed();
        outcome
    }

    fn step_until(&mut self, started: Instant, slice: Option<Duration>) -> Result<Option<ExecutionResult>> {
        let budget = Duration::from_millis(self.limits.max_compute_ms);
        let program = Arc::clone(&self.program);
        loop {
            let pc = self.pc;
            let Some(op) = program.code.get(pc) else {
                return Ok(Some(self.complete()));
            };

            self.steps += 1;
            let elapsed = (self.steps % CLOCK_INTERVAL == 0).then(|| started.elapsed());
            let flow = if self.steps > self.limits.max_steps {
                Err(error::step_limit_exceeded(self.limits.max_steps))
            } else if elapsed.is_some_and(|elapsed| self.compute + elapsed > budget) {
                Err(error::time_limit_exceeded(self.limits.max_compute_ms))
            } else {
                self.pc += 1;
                self.execute(op, pc)
            };

            match flow {
                Ok(Flow::Continue) => {}
                Ok(Flow::Halt) => return Ok(Some(self.complete())),
                Ok(Flow::Delegate(request)) => {
                    self.state = ExecutionState::WaitingDelegation;
                    return Ok(Some(ExecutionResult::NeedsDelegation(request)));
                }
                Err(err) => {
                    self.state = ExecutionState::Failed;
                    self.flush_output();
                    let line = program.line_at(pc).unwrap_or(0);
                    tracing::debug!(pc, line, error = %err, "sandbox program failed");
                    return Err(err
                        .with_operation("interpreter::run")
                        .at_line(line));
                }
            }

            if let (Some(slice), Some(elapsed)) = (slice, elapsed) {
                if elapsed >= slice {
                    return Ok(None);
                }
            }
        }
    }

    /// Resume a suspended `ask_llm` call with the worker's reply
    pub fn provide_delegation_response(&mut self, reply: impl Into<String>) -> Result<()> {
        if self.state != ExecutionState::WaitingDelegation {
            return Err(Error::unexpected("no delegation is pending")
                .with_operation("interpreter::provide_delegation_response"));
        }
        self.stack.push(Value::from(reply.into()))?;
        self.state = ExecutionState::Running;
        Ok(())
    }

    fn complete(&mut self) -> ExecutionResult {
        self.flush_output();
        self.state = ExecutionState::Completed;
        ExecutionResult::Complete(self.env.result.clone())
    }

    fn check_size(&self, value: &Value) -> Result<()> {
        let size = value.size();
        if size > self.limits.max_value_len {
            return Err(error::value_too_large(size, self.limits.max_value_len));
        }
        Ok(())
    }

    fn push_checked(&mut self, value: Value) -> Result<()> {
        self.check_size(&value)?;
        self.stack.push(value)
    }

    fn slot_mut(&mut self, slot: Slot) -> Result<&mut Value> {
        match slot {
            Slot::Result => Ok(&mut self.env.result),
            Slot::Local(index) => {
                let name = self.program.locals.get(index).cloned().unwrap_or_default();
                match self.locals.get_mut(index) {
                    Some(Some(value)) => Ok(value),
                    _ => Err(error::unassigned_local(name)),
                }
            }
        }
    }

    fn execute(&mut self, op: &Opcode, pc: usize) -> Result<Flow> {
        let max_len = self.limits.max_value_len;
        match op {
            Opcode::Const(value) => self.stack.push(value.clone())?,
            Opcode::LoadLocal(index) => match self.locals.get(*index) {
                Some(Some(value)) => {
                    let value = value.clone();
                    self.stack.push(value)?;
                }
                _ => {
                    let name = self.program.locals.get(*index).cloned().unwrap_or_default();
                    return Err(error::unassigned_local(name));
                }
            },
            Opcode::StoreLocal(index) => {
                let value = self.stack.pop()?;
                match self.locals.get_mut(*index) {
                    Some(slot) => *slot = Some(value),
                    None => return Err(Error::unexpected(format!("invalid local slot {}", index))),
                }
            }
            Opcode::LoadCapability(Capability::Document) => {
                self.stack.push(Value::Str(Arc::clone(&self.env.document)))?;
            }
            Opcode::LoadCapability(Capability::Result) => {
                self.stack.push(self.env.result.clone())?;
            }
            Opcode::LoadCapability(cap) => {
                return Err(Error::unexpected(format!("'{}' cannot be loaded as a value", cap.name())));
            }
            Opcode::StoreResult => {
                self.env.result = self.stack.pop()?;
            }

            Opcode::Pop => {
                self.stack.pop()?;
            }
            Opcode::Dup => self.stack.dup()?,
            Opcode::Swap => self.stack.swap()?,
            Opcode::Rot3 => self.stack.rot(3)?,

            Opcode::Unary(op) => {
                let operand = self.stack.pop()?;
                self.stack.push(ops::unary(*op, operand)?)?;
            }
            Opcode::Binary(op) => {
                let right = self.stack.pop()?;
                let left = self.stack.pop()?;
                self.stack.push(ops::binary(*op, left, right, max_len)?)?;
            }
            Opcode::Compare(op) => {
                let right = self.stack.pop()?;
                let left = self.stack.pop()?;
                self.stack.push(Value::Bool(ops::compare(*op, &left, &right)?))?;
            }
            Opcode::Index => {
                let index = self.stack.pop()?;
                let value = self.stack.pop()?;
                self.stack.push(ops::get_index(&value, &index)?)?;
            }
            Opcode::Slice { has_start, has_end } => {
                let end = if *has_end { Some(self.stack.pop()?) } else { None };
                let start = if *has_start { Some(self.stack.pop()?) } else { None };
                let value = self.stack.pop()?;
                self.stack.push(ops::get_slice(&value, start, end)?)?;
            }

            Opcode::BuildList(n) => {
                let items = self.stack.pop_n(*n)?;
                self.stack.push(Value::list(items))?;
            }
            Opcode::BuildString(n) => {
                let parts = self.stack.pop_n(*n)?;
                let mut out = String::new();
                for part in &parts {
                    match part {
                        Value::Str(s) => out.push_str(s),
                        other => out.push_str(&other.to_string()),
                    }
                }
                self.push_checked(Value::from(out))?;
            }
            Opcode::Format { repr } => {
                let value = self.stack.pop()?;
                let text = if *repr { value.repr() } else { value.to_string() };
                self.push_checked(Value::from(text))?;
            }
            Opcode::AppendTop => {
                let item = self.stack.pop()?;
                match self.stack.peek_mut()? {
                    Value::List(items) => {
                        if items.len() >= max_len {
                            return Err(error::value_too_large(items.len() + 1, max_len));
                        }
                        Arc::make_mut(items).push(item);
                    }
                    other => {
                        return Err(error::type_mismatch(format!(
                            "cannot append to '{}'",
                            other.type_name()
                        )));
                    }
                }
            }
            Opcode::Append(slot) | Opcode::Extend(slot) => {
                let value = self.stack.pop()?;
                let extra = match op {
                    Opcode::Extend(_) => ops::to_items(&value, max_len)?,
                    _ => vec![value],
                };
                let method = if matches!(op, Opcode::Extend(_)) { "extend" } else { "append" };
                match self.slot_mut(*slot)? {
                    Value::List(items) => {
                        if items.len() + extra.len() > max_len {
                            return Err(error::value_too_large(items.len() + extra.len(), max_len));
                        }
                        Arc::make_mut(items).extend(extra);
                    }
                    other => {
                        return Err(error::type_mismatch(format!(
                            "'{}' object has no attribute '{}'",
                            other.type_name(),
                            method
                        )));
                    }
                }
            }
            Opcode::Unpack(n) => {
                let value = self.stack.pop()?;
                let items = ops::to_items(&value, max_len)?;
                if items.len() != *n {
                    return Err(error::invalid_argument(format!(
                        "expected {} values to unpack, got {}",
                        n,
                        items.len()
                    )));
                }
                for item in items.into_iter().rev() {
                    self.stack.push(item)?;
                }
            }

            Opcode::CallBuiltin { builtin, argc } => {
                let args = self.stack.pop_n(*argc)?;
                self.stack.push(builtins::call_builtin(*builtin, args, max_len)?)?;
            }
            Opcode::CallMethod { method, argc } => {
                let args = self.stack.pop_n(*argc)?;
                let receiver = self.stack.pop()?;
                self.stack.push(builtins::call_method(*method, receiver, args, max_len)?)?;
            }
            Opcode::Print { argc, has_sep, has_end } => {
                let end = if *has_end { self.stack.pop()? } else { Value::None };
                let sep = if *has_sep { self.stack.pop()? } else { Value::None };
                let args = self.stack.pop_n(*argc)?;
                let sep = print_option(sep, "sep", " ")?;
                let end = print_option(end, "end", "\n")?;
                let text = args.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(&sep);
                self.write_output(&text)?;
                self.write_output(&end)?;
                self.stack.push(Value::None)?;
            }
            Opcode::Delegate => {
                let query = self.stack.pop()?;
                let fragment = self.stack.pop()?;
                if self.delegations >= self.limits.max_delegations {
                    return Err(error::delegation_limit_exceeded(self.limits.max_delegations));
                }
                self.delegations += 1;
                return Ok(Flow::Delegate(DelegationRequest {
                    fragment: fragment.to_string(),
                    query: query.to_string(),
                    index: self.delegations,
                    line: self.program.line_at(pc).unwrap_or(0),
                }));
            }

            Opcode::Jump(target) => self.pc = *target,
            Opcode::JumpIfFalse(target) => {
                if !self.stack.pop()?.truthy() {
                    self.pc = *target;
                }
            }
            Opcode::JumpIfFalseOrPop(target) => {
                if self.stack.peek()?.truthy() {
                    self.stack.pop()?;
                } else {
                    self.pc = *target;
                }
            }
            Opcode::JumpIfTrueOrPop(target) => {
                if self.stack.peek()?.truthy() {
                    self.pc = *target;
                } else {
                    self.stack.pop()?;
                }
            }
            Opcode::GetIter => {
                let iterable = self.stack.pop()?;
                if self.iters.len() >= self.limits.max_iter_depth {
                    return Err(error::stack_overflow().with_context("stack", "iterator"));
                }
                self.iters.push(IterState::new(iterable)?);
            }
            Opcode::ForIter(target) => {
                let next = match self.iters.last_mut() {
                    Some(iter) => iter.next(),
                    None => return Err(error::stack_underflow().with_context("stack", "iterator")),
                };
                match next {
                    Some(item) => self.stack.push(item)?,
                    None => self.pc = *target,
                }
            }
            Opcode::PopIter => {
                if self.iters.pop().is_none() {
                    return Err(error::stack_underflow().with_context("stack", "iterator"));
                }
            }
            Opcode::Halt => return Ok(Flow::Halt),
        }
        Ok(Flow::Continue)
    }

    // =========================================================================
    // Output capture
    // =========================================================================

    fn write_output(&mut self, text: &str) -> Result<()> {
        let mut rest = text;
        while let Some(newline) = rest.find('\n') {
            self.append_pending(&rest[..newline])?;
            let line = std::mem::take(&mut self.pending_line);
            self.emit_line(line);
            rest = &rest[newline + 1..];
        }
        self.append_pending(rest)
    }

    /// An unterminated line is a value like any other
    fn append_pending(&mut self, text: &str) -> Result<()> {
        let size = self.pending_line.len() + text.len();
        if size > self.limits.max_value_len {
            return Err(error::value_too_large(size, self.limits.max_value_len));
        }
        self.pending_line.push_str(text);
        Ok(())
    }

    fn flush_output(&mut self) {
        if !self.pending_line.is_empty() {
            let line = std::mem::take(&mut self.pending_line);
            self.emit_line(line);
        }
    }

    fn emit_line(&mut self, line: String) {
        let fits = self.env.output.len() < self.limits.max_output_lines
            && self.output_bytes + line.len() <= self.limits.max_output_bytes;
        if !fits {
            if self.env.dropped_output == 0 {
                tracing::debug!(
                    lines = self.env.output.len(),
                    bytes = self.output_bytes,
                    "output cap reached, dropping further lines"
                );
            }
            self.env.dropped_output += 1;
            return;
        }
        tracing::info!(target: "rlm::program", "{}", line);
        if let Some(callback) = self.output_callback.as_mut() {
            callback(&line);
        }
        self.output_bytes += line.len();
        self.env.output.push(line);
    }
}

fn print_option(value: Value, name: &str, default: &str) -> Result<String> {
    match value {
        Value::None => Ok(default.to_string()),
        Value::Str(s) => Ok(s.to_string()),
        other => Err(error::type_mismatch(format!(
            "{} must be None or a string, not {}",
            name,
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use rlm_error::ErrorKind;
    use std::sync::Mutex;

    fn run_to_end(source: &str, document: &str) -> Result<(Value, Interpreter)> {
        let program = compile(source)?;
        let mut interp = Interpreter::new(program, document);
        match interp.run()? {
            ExecutionResult::Complete(value) => Ok((value, interp)),
            ExecutionResult::NeedsDelegation(req) => panic!("unexpected delegation {:?}", req),
        }
    }

    fn eval(source: &str) -> Value {
        run_to_end(source, "").unwrap().0
    }

    #[test]
    fn test_document_lookup() {
        let (value, _) = run_to_end("result = document.split(':')[1].strip()", "SECRET: 123").unwrap();
        assert_eq!(value, Value::from("123"));
    }

    #[test]
    fn test_result_starts_absent() {
        let (value, interp) = run_to_end("x = 1", "doc").unwrap();
        assert!(value.is_none());
        assert_eq!(interp.state(), ExecutionState::Completed);
    }

    #[test]
    fn test_arithmetic_and_control_flow() {
        assert_eq!(eval("result = 7 / 2 + 10 % 4 * 3"), Value::Int(9));
        assert_eq!(eval("n = 0\nwhile True:\n    n += 1\n    if n >= 5:\n        break\nresult = n"), Value::Int(5));
        assert_eq!(
            eval("total = 0\nfor i in range(10):\n    if i % 2:\n        continue\n    total += i\nresult = total"),
            Value::Int(20)
        );
        assert_eq!(eval("x = 3\nresult = 'big' if x > 2 else 'small'"), Value::from("big"));
        assert_eq!(eval("result = 1 < 2 < 3"), Value::Bool(true));
        assert_eq!(eval("result = 3 < 2 < 5"), Value::Bool(false));
        assert_eq!(eval("result = 0 or 'fallback'"), Value::from("fallback"));
        assert_eq!(eval("result = 'x' and ''"), Value::from(""));
    }

    #[test]
    fn test_collections() {
        assert_eq!(
            eval("parts = [p.strip().upper() for p in 'a, b ,c'.split(',') if p.strip() != 'b']\nresult = '-'.join(parts)"),
            Value::from("A-C")
        );
        assert_eq!(eval("xs = []\nfor i in range(3):\n    xs.append(i * i)\nresult = xs"), Value::list(vec![Value::Int(0), Value::Int(1), Value::Int(4)]));
        assert_eq!(eval("a, b = 1, 2\na, b = b, a\nresult = [a, b]"), Value::list(vec![Value::Int(2), Value::Int(1)]));
        assert_eq!(
            eval("out = ''\nfor i, c in enumerate('ab'):\n    out += f'{i}{c}'\nresult = out"),
            Value::from("0a1b")
        );
        assert_eq!(eval("result = []\nresult.extend('xy')\nresult = len(result)"), Value::Int(2));
    }

    #[test]
    fn test_fstring_rendering() {
        assert_eq!(eval("x = 'v'\nresult = f'[{x}] [{x!r}] {len(x) + 1}'"), Value::from("[v] ['v'] 2"));
    }

    #[test]
    fn test_delegation_suspends_and_resumes() {
        let source = "\
size = 5
for i in range(0, len(document), size):
    answer = ask_llm(document[i:i + size], 'find it')
    if answer != 'NOT_FOUND':
        result = answer
        break
";
        let program = compile(source).unwrap();
        let mut interp = Interpreter::new(program, "aaaaabbbbbccccc");

        let mut fragments = Vec::new();
        let value = loop {
            match interp.run().unwrap() {
                ExecutionResult::Complete(value) => break value,
                ExecutionResult::NeedsDelegation(req) => {
                    assert_eq!(req.query, "find it");
                    assert_eq!(req.line, 3);
                    fragments.push(req.fragment.clone());
                    let reply = if req.fragment == "bbbbb" { "FOUND_B" } else { "NOT_FOUND" };
                    interp.provide_delegation_response(reply).unwrap();
                }
            }
        };

        assert_eq!(value, Value::from("FOUND_B"));
        assert_eq!(fragments, vec!["aaaaa", "bbbbb"]);
        assert_eq!(interp.delegations(), 2);
    }

    #[test]
    fn test_resume_requires_pending_delegation() {
        let program = compile("x = 1").unwrap();
        let mut interp = Interpreter::new(program, "");
        assert!(interp.provide_delegation_response("x").is_err());

        let program = compile("x = ask_llm(document, 'q')").unwrap();
        let mut interp = Interpreter::new(program, "doc");
        assert!(matches!(interp.run().unwrap(), ExecutionResult::NeedsDelegation(_)));
        assert!(interp.run().is_err());
    }

    #[test]
    fn test_runtime_errors_carry_line() {
        let cases = [
            ("x = 1\ny = x + 'a'", ErrorKind::TypeMismatch, "2"),
            ("x = [1]\n\ny = x[5]", ErrorKind::IndexOutOfRange, "3"),
            ("y = 1 // 0", ErrorKind::DivisionByZero, "1"),
            ("if False:\n    z = 1\nresult = z", ErrorKind::UnknownName, "3"),
            ("result = int('abc')", ErrorKind::InvalidArgument, "1"),
        ];
        for (source, kind, line) in cases {
            let err = run_to_end(source, "").unwrap_err();
            assert_eq!(err.kind(), kind, "{}", source);
            assert_eq!(err.context_value("line"), Some(line), "{}", source);
        }
    }

    #[test]
    fn test_step_limit() {
        let program = compile("while True:\n    pass").unwrap();
        let limits = SandboxLimits {
            max_steps: 1000,
            ..SandboxLimits::default()
        };
        let mut interp = Interpreter::new(program, "").with_limits(limits);
        let err = interp.run().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StepLimitExceeded);
        assert_eq!(interp.state(), ExecutionState::Failed);
    }

    #[test]
    fn test_delegation_limit() {
        let program = compile("for i in range(10):\n    ask_llm('x', 'q')").unwrap();
        let limits = SandboxLimits {
            max_delegations: 2,
            ..SandboxLimits::default()
        };
        let mut interp = Interpreter::new(program, "").with_limits(limits);
        let err = loop {
            match interp.run() {
                Ok(ExecutionResult::NeedsDelegation(_)) => interp.provide_delegation_response("NOT_FOUND").unwrap(),
                Ok(ExecutionResult::Complete(_)) => panic!("should hit the limit"),
                Err(err) => break err,
            }
        };
        assert_eq!(err.kind(), ErrorKind::DelegationLimitExceeded);
        assert_eq!(interp.delegations(), 2);
    }

    #[test]
    fn test_value_cap() {
        let program = compile("x = 'a' * 100\nx = x + x").unwrap();
        let limits = SandboxLimits {
            max_value_len: 150,
            ..SandboxLimits::default()
        };
        let err = Interpreter::new(program, "").with_limits(limits).run().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueTooLarge);
        assert_eq!(err.context_value("line"), Some("2"));
    }

    #[test]
    fn test_print_is_captured() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let program = compile("print('a', 1, None)\nprint('x', end='')\nprint('y', sep='-')\nprint('p', 'q', sep='-')").unwrap();
        let mut interp = Interpreter::new(program, "").with_output_callback(move |line| {
            sink.lock().unwrap().push(line.to_string());
        });
        interp.run().unwrap();

        assert_eq!(interp.output(), &["a 1 None", "xy", "p-q"]);
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_output_cap() {
        let program = compile("for i in range(20):\n    print(i)").unwrap();
        let limits = SandboxLimits {
            max_output_lines: 5,
            ..SandboxLimits::default()
        };
        let mut interp = Interpreter::new(program, "").with_limits(limits);
        interp.run().unwrap();
        let env = interp.into_environment();
        assert_eq!(env.output.len(), 5);
        assert_eq!(env.dropped_output, 15);
    }

    #[test]
    fn test_unterminated_output_is_capped() {
        let program = compile("for i in range(5000):\n    print(document, end='')").unwrap();
        let limits = SandboxLimits {
            max_value_len: 64 * 1024,
            ..SandboxLimits::default()
        };
        let mut interp = Interpreter::new(program, "x".repeat(1024)).with_limits(limits);
        let err = interp.run().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueTooLarge);
        assert_eq!(err.line(), Some(2));
        assert_eq!(interp.state(), ExecutionState::Failed);
    }

    #[test]
    fn test_output_byte_cap() {
        let program = compile("for i in range(100):\n    print(document)").unwrap();
        let limits = SandboxLimits {
            max_output_bytes: 4096,
            ..SandboxLimits::default()
        };
        let mut interp = Interpreter::new(program, "y".repeat(1000)).with_limits(limits);
        interp.run().unwrap();
        let env = interp.into_environment();
        assert_eq!(env.output.len(), 4);
        assert_eq!(env.dropped_output, 96);
    }

    #[test]
    fn test_compute_time_limit() {
        let program = compile("while True:\n    pass").unwrap();
        let limits = SandboxLimits {
            max_steps: usize::MAX,
            max_compute_ms: 50,
            ..SandboxLimits::default()
        };
        let mut interp = Interpreter::new(program, "").with_limits(limits);
        let err = interp.run().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimeLimitExceeded);
        assert!(err.kind().is_program_fault());
        assert!(interp.compute_time() >= Duration::from_millis(50));
    }

    #[test]
    fn test_run_slice_returns_between_slices() {
        let program = compile("n = 0\nwhile n < 200000:\n    n += 1\nresult = n").unwrap();
        let mut interp = Interpreter::new(program, "");

        let mut slices = 0;
        let value = loop {
            match interp.run_slice(Duration::ZERO).unwrap() {
                Some(ExecutionResult::Complete(value)) => break value,
                Some(ExecutionResult::NeedsDelegation(req)) => panic!("unexpected delegation {:?}", req),
                None => {
                    assert_eq!(interp.state(), ExecutionState::Running);
                    slices += 1;
                }
            }
        };
        assert_eq!(value, Value::Int(200000));
        assert!(slices > 1);
    }

    #[test]
    fn test_debug_skips_callback() {
        let (_, interp) = run_to_end("x = 1", "").unwrap();
        let debug = format!("{:?}", interp.with_output_callback(|_| {}));
        assert!(debug.contains("Completed"));
        assert!(!debug.contains("callback"));
    }

    #[test]
    fn test_wide_ranges_do_not_wrap() {
        assert_eq!(
            eval("result = range(-9000000000000000000, 9000000000000000000, 3)[-1]"),
            Value::Int(8_999_999_999_999_999_997)
        );
        let err = run_to_end("r = range(-9223372036854775807 - 1, 9223372036854775807)\nresult = len(r)", "").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.line(), Some(2));
    }

    #[test]
    fn test_document_is_shared_not_copied() {
        let doc: Arc<str> = Arc::from("shared text");
        let program = compile("result = document").unwrap();
        let mut interp = Interpreter::with_environment(program, Environment::new(Arc::clone(&doc)));
        match interp.run().unwrap() {
            ExecutionResult::Complete(Value::Str(s)) => assert!(Arc::ptr_eq(&s, &doc)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_limits_validation() {
        assert!(SandboxLimits::default().validate().is_ok());
        let limits = SandboxLimits {
            max_steps: 0,
            ..SandboxLimits::default()
        };
        assert_eq!(limits.validate().unwrap_err().kind(), ErrorKind::ConfigInvalid);
        let limits = SandboxLimits {
            max_compute_ms: 0,
            ..SandboxLimits::default()
        };
        assert_eq!(limits.validate().unwrap_err().context_value("field"), Some("max_compute_ms"));
        assert!(SandboxLimits::default().check_program(&"x".repeat(70 * 1024)).is_err());
    }
}
