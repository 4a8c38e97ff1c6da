//! # Operand Stack
//!
//! A bounded LIFO stack of sandbox values. The bound is the operand
//! depth limit from `SandboxLimits`.

use crate::error::{self, Result};
use crate::value::Value;

/// Default operand depth; expressions in generated programs stay far below it
pub const MAX_STACK_SIZE: usize = 256;

#[derive(Debug, Clone)]
pub struct Stack {
    data: Vec<Value>,
    max_depth: usize,
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

impl Stack {
    pub fn new() -> Self {
        Self::with_max_depth(MAX_STACK_SIZE)
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Stack { data: Vec::with_capacity(16), max_depth }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn push(&mut self, value: Value) -> Result<()> {
        if self.data.len() >= self.max_depth {
            return Err(error::stack_overflow());
        }
        self.data.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Value> {
        self.data.pop().ok_or_else(error::stack_underflow)
    }

    /// Pop the top `n` values in push order (call arguments, list items)
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<Value>> {
        if n > self.data.len() {
            return Err(error::stack_underflow());
        }
        Ok(self.data.split_off(self.data.len() - n))
    }

    pub fn peek(&self) -> Result<&Value> {
        self.data.last().ok_or_else(error::stack_underflow)
    }

    /// Top value, for in-place `append`/`extend`
    pub fn peek_mut(&mut self) -> Result<&mut Value> {
        self.data.last_mut().ok_or_else(error::stack_underflow)
    }

    /// Chained assignment and chained comparison reuse the top value
    pub fn dup(&mut self) -> Result<()> {
        let value = self.peek()?.clone();
        self.push(value)
    }

    pub fn swap(&mut self) -> Result<()> {
        if self.data.len() < 2 {
            return Err(error::stack_underflow());
        }
        let len = self.data.len();
        self.data.swap(len - 1, len - 2);
        Ok(())
    }

    /// Move the top value down to position `n`: `[a, b, c]` becomes `[c, a, b]`
    pub fn rot(&mut self, n: usize) -> Result<()> {
        if n > self.data.len() || n == 0 {
            return Err(error::stack_underflow());
        }
        let start = self.data.len() - n;
        self.data[start..].rotate_right(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_push_pop() {
        let mut stack = Stack::new();
        stack.push(Value::Int(1)).unwrap();
        stack.push(Value::from("hello")).unwrap();
        stack.push(Value::None).unwrap();

        assert_eq!(stack.len(), 3);
        assert_eq!(stack.pop().unwrap(), Value::None);
        assert_eq!(stack.pop().unwrap(), Value::from("hello"));
        assert_eq!(stack.pop().unwrap(), Value::Int(1));
        assert!(stack.is_empty());
    }

    #[test]
    fn test_pop_n_keeps_order() {
        let mut stack = Stack::new();
        for i in 1..=4 {
            stack.push(Value::Int(i)).unwrap();
        }
        let top = stack.pop_n(3).unwrap();
        assert_eq!(top, vec![Value::Int(2), Value::Int(3), Value::Int(4)]);
        assert_eq!(stack.len(), 1);
        assert!(stack.pop_n(2).is_err_and(|e| e.kind() == ErrorKind::StackUnderflow));
    }

    #[test]
    fn test_dup_and_swap() {
        let mut stack = Stack::new();
        stack.push(Value::Int(1)).unwrap();
        stack.push(Value::Int(2)).unwrap();
        stack.dup().unwrap();
        assert_eq!(stack.len(), 3);

        stack.pop().unwrap();
        stack.swap().unwrap();
        assert_eq!(stack.pop().unwrap(), Value::Int(1));
        assert_eq!(stack.pop().unwrap(), Value::Int(2));
    }

    #[test]
    fn test_rot() {
        let mut stack = Stack::new();
        stack.push(Value::Int(1)).unwrap();
        stack.push(Value::Int(2)).unwrap();
        stack.push(Value::Int(3)).unwrap();
        stack.rot(3).unwrap(); // [1,2,3] -> [3,1,2]

        assert_eq!(stack.pop().unwrap(), Value::Int(2));
        assert_eq!(stack.pop().unwrap(), Value::Int(1));
        assert_eq!(stack.pop().unwrap(), Value::Int(3));
    }

    #[test]
    fn test_peek_mut() {
        let mut stack = Stack::new();
        stack.push(Value::Int(1)).unwrap();
        *stack.peek_mut().unwrap() = Value::Int(5);
        assert_eq!(stack.peek().unwrap(), &Value::Int(5));
    }

    #[test]
    fn test_underflow() {
        let mut stack = Stack::new();
        assert!(stack.pop().is_err_and(|e| e.kind() == ErrorKind::StackUnderflow));
        assert!(stack.peek().is_err_and(|e| e.kind() == ErrorKind::StackUnderflow));
        assert!(stack.swap().is_err_and(|e| e.kind() == ErrorKind::StackUnderflow));
    }

    #[test]
    fn test_overflow() {
        let mut stack = Stack::with_max_depth(8);
        for i in 0..8 {
            stack.push(Value::Int(i)).unwrap();
        }
        assert!(stack
            .push(Value::Int(999))
            .is_err_and(|e| e.kind() == ErrorKind::StackOverflow));
        assert_eq!(stack.pop_n(8).unwrap().len(), 8);
        assert!(stack.is_empty());
    }
}
