//! # Sandbox Schema for Controller Code Generation
//!
//! A structured description of what a controller-written program may use:
//! the bound capabilities, the language intrinsics and methods, and the
//! rules of the language subset. It is rendered into the controller's
//! system prompt so that the generated program matches what the compiler
//! accepts.

use crate::bindings::Capability;
use crate::interpreter::SandboxLimits;
use crate::opcode::{Builtin, Method};
use serde::Serialize;

/// Everything a controller needs to know to write a valid program
#[derive(Debug, Clone, Serialize)]
pub struct SandboxSchema {
    pub version: &'static str,
    pub description: &'static str,
    pub capabilities: Vec<NameSpec>,
    pub intrinsics: Vec<NameSpec>,
    pub methods: Vec<NameSpec>,
    pub rules: Vec<&'static str>,
    pub limits: SandboxLimits,
    pub example: &'static str,
}

/// One bound name and how to use it
#[derive(Debug, Clone, Serialize)]
pub struct NameSpec {
    pub name: &'static str,
    pub signature: &'static str,
    pub description: &'static str,
}

impl Default for SandboxSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxSchema {
    pub fn new() -> Self {
        Self::with_limits(SandboxLimits::default())
    }

    pub fn with_limits(limits: SandboxLimits) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            description: "Programs are written in a small subset of Python and run in a sandbox. \
                          Only the names listed below exist; there is no file system, network, \
                          import or reflection.",
            capabilities: Capability::ALL.iter().map(capability_spec).collect(),
            intrinsics: Builtin::ALL.iter().map(|b| builtin_spec(*b)).collect(),
            methods: Method::ALL.iter().map(|m| method_spec(*m)).collect(),
            rules: RULES.to_vec(),
            limits,
            example: EXAMPLE,
        }
    }

    /// Render as a prompt-friendly reference
    pub fn to_prompt(&self) -> String {
        let mut out = String::new();

        out.push_str("## Sandbox language\n\n");
        out.push_str(self.description);
        out.push_str("\n\n");

        out.push_str("### Bound names\n\n");
        for spec in &self.capabilities {
            out.push_str(&format!("- `{}`: {}\n", spec.signature, spec.description));
        }

        out.push_str("\n### Built-in functions\n\n");
        for spec in &self.intrinsics {
            out.push_str(&format!("- `{}`: {}\n", spec.signature, spec.description));
        }

        out.push_str("\n### String and list methods\n\n");
        for spec in &self.methods {
            out.push_str(&format!("- `{}`: {}\n", spec.signature, spec.description));
        }

        out.push_str("\n### Rules\n\n");
        for rule in &self.rules {
            out.push_str(&format!("- {}\n", rule));
        }
        out.push_str(&format!(
            "- A program may run at most {} steps and make at most {} `ask_llm` calls.\n",
            self.limits.max_steps, self.limits.max_delegations
        ));
        out.push_str(&format!(
            "- Blocks, brackets and operator chains may nest at most {} levels deep.\n",
            crate::parser::MAX_NESTING_DEPTH
        ));

        out.push_str("\n### Example\n\n");
        out.push_str(self.example);
        out.push('\n');

        out
    }

    /// Render as JSON for structured consumption
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

const RULES: &[&str] = &[
    "Statements: assignment (including `a, b = x, y`), `+=`, `-=`, `*=`, `if`/`elif`/`else`, \
     `for x in ...`, `while`, `break`, `continue`, `pass`.",
    "Values are integers, strings, lists, `True`, `False` and `None`. There are no floats or dicts.",
    "Arithmetic is integer only: `+ - * / // %`; `/` rounds down like `//`.",
    "Strings support indexing and slicing (`s[i]`, `s[a:b]`, negative indices, no step), `in`, \
     `+` and `*`. f-strings may embed expressions but not format specs.",
    "List comprehensions with one `for` and optional `if` clauses are allowed.",
    "`append` and `extend` work only as statements on a variable, e.g. `hits.append(x)`.",
    "`def`, `class`, `lambda`, `import`, `try`, `with`, dicts and attribute access are not available.",
    "`document`, `ask_llm`, `print` and the built-in functions cannot be reassigned.",
    "Only `print` accepts keyword arguments (`sep=`, `end=`).",
];

const EXAMPLE: &str = "\
```python
size = 4000
for i in range(0, len(document), size):
    answer = ask_llm(document[i:i + size], 'What is the SECRET value?')
    if answer != 'NOT_FOUND':
        result = answer
        break
```";

fn capability_spec(cap: &Capability) -> NameSpec {
    let signature = match cap {
        Capability::Document => "document",
        Capability::Delegate => "ask_llm(fragment, query)",
        Capability::Result => "result",
        Capability::Print => "print(*values, sep=' ', end='\\n')",
    };
    NameSpec {
        name: cap.name(),
        signature,
        description: cap.description(),
    }
}

fn builtin_spec(builtin: Builtin) -> NameSpec {
    let (signature, description) = match builtin {
        Builtin::Len => ("len(x)", "number of characters in a string or items in a list"),
        Builtin::Range => ("range(stop) / range(start, stop[, step])", "integer sequence for loops"),
        Builtin::Str => ("str(x)", "string form of a value"),
        Builtin::Int => ("int(x)", "parse a decimal string or convert a bool"),
        Builtin::Bool => ("bool(x)", "truthiness of a value"),
        Builtin::Min => ("min(a, b, ...) / min(list)", "smallest value"),
        Builtin::Max => ("max(a, b, ...) / max(list)", "largest value"),
        Builtin::Abs => ("abs(n)", "absolute value"),
        Builtin::Enumerate => ("enumerate(x)", "list of (index, item) pairs"),
        Builtin::List => ("list(x)", "list of the items or characters of x"),
    };
    NameSpec {
        name: builtin.name(),
        signature,
        description,
    }
}

fn method_spec(method: Method) -> NameSpec {
    let (signature, description) = match method {
        Method::Strip => ("s.strip([chars])", "remove leading and trailing whitespace"),
        Method::Lstrip => ("s.lstrip([chars])", "remove leading whitespace"),
        Method::Rstrip => ("s.rstrip([chars])", "remove trailing whitespace"),
        Method::Lower => ("s.lower()", "lowercase copy"),
        Method::Upper => ("s.upper()", "uppercase copy"),
        Method::Find => ("s.find(sub)", "index of sub, or -1"),
        Method::Startswith => ("s.startswith(prefix)", "True when s starts with prefix"),
        Method::Endswith => ("s.endswith(suffix)", "True when s ends with suffix"),
        Method::Split => ("s.split([sep[, maxsplit]])", "list of pieces; whitespace when sep is omitted"),
        Method::Splitlines => ("s.splitlines()", "list of lines"),
        Method::Replace => ("s.replace(old, new[, count])", "copy with occurrences replaced"),
        Method::Count => ("x.count(item)", "occurrences in a string or list"),
        Method::Join => ("sep.join(list)", "concatenate strings with sep between them"),
        Method::Isdigit => ("s.isdigit()", "True when s is non-empty and all digits"),
        Method::Index => ("x.index(item)", "position of item; error when missing"),
    };
    NameSpec {
        name: method.name(),
        signature,
        description,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_covers_every_binding() {
        let schema = SandboxSchema::new();
        assert_eq!(schema.capabilities.len(), Capability::ALL.len());
        assert_eq!(schema.intrinsics.len(), Builtin::ALL.len());
        assert_eq!(schema.methods.len(), Method::ALL.len());
    }

    #[test]
    fn test_prompt_mentions_contract() {
        let prompt = SandboxSchema::new().to_prompt();
        assert!(prompt.contains("ask_llm(fragment, query)"));
        assert!(prompt.contains("`result`"));
        assert!(prompt.contains("NOT_FOUND"));
        assert!(prompt.contains("1000000 steps"));
        assert!(prompt.contains("at most 100 levels deep"));
        for builtin in Builtin::ALL {
            assert!(prompt.contains(builtin.name()), "{}", builtin.name());
        }
    }

    #[test]
    fn test_example_compiles() {
        let example = EXAMPLE
            .trim_start_matches("```python\n")
            .trim_end_matches("```");
        assert!(crate::compiler::compile(example).is_ok());
    }

    #[test]
    fn test_to_json() {
        let json: serde_json::Value = serde_json::from_str(&SandboxSchema::new().to_json()).unwrap();
        assert_eq!(json["capabilities"][1]["name"], "ask_llm");
        assert_eq!(json["limits"]["max_delegations"], 1024);
        assert_eq!(json["limits"]["max_compute_ms"], 60_000);
    }
}
