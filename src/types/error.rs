//! Structured engine errors and stack rendering.

use std::fmt;

/// An engine-originated error projected into host data.
///
/// `kind` is the constructor name (`"TypeError"`, `"SyntaxError"`, …),
/// `stack` is rendered in the `Error.prototype.stack` shape (see
/// [`render_stack`]). On transfer the wire representation is a tagged
/// object: `{ kind, message, stack }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorValue {
    pub kind: String,
    pub message: String,
    pub stack: String,
}

impl ErrorValue {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            stack: String::new(),
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = stack.into();
        self
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

/// One frame of a rendered stack trace.
#[derive(Debug, Clone, Default)]
pub struct StackFrame {
    /// Function name; empty renders as `<anonymous>`.
    pub function: String,
    /// Script or resource name; empty renders as `[eval]` when `eval` is
    /// set, `[unknown]` otherwise.
    pub script: String,
    /// 1-based line, or `None` when the engine has no position.
    pub line: Option<u32>,
    /// 1-based column.
    pub column: Option<u32>,
    pub constructor: bool,
    pub eval: bool,
    pub wasm: bool,
}

impl StackFrame {
    pub fn named(function: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            script: script.into(),
            ..Self::default()
        }
    }
}

fn render_position(frame: &StackFrame, out: &mut String) {
    if let Some(line) = frame.line {
        match frame.column {
            Some(column) => out.push_str(&format!("{line}:{column}")),
            None => out.push_str(&format!("{line}")),
        }
    }
}

/// Render frames in the same manner as `Error.prototype.stack`:
/// `    at <fn or <anonymous>> (<script or [eval]>:<line>:<col>)`, with
/// `new ` prefixed for constructor frames and `<WASM>` in place of the
/// script for wasm frames.
pub fn render_stack(frames: &[StackFrame]) -> String {
    let mut out = String::new();
    for (index, frame) in frames.iter().enumerate() {
        out.push_str(if index == 0 { "    at " } else { "\n    at " });

        if frame.wasm {
            let has_name = !frame.function.is_empty() || !frame.script.is_empty();
            if has_name {
                if !frame.script.is_empty() {
                    out.push_str(&frame.script);
                    if !frame.function.is_empty() {
                        out.push('.');
                        out.push_str(&frame.function);
                    }
                } else {
                    out.push_str(&frame.function);
                }
                out.push_str(" (<WASM>");
            }
            render_position(frame, &mut out);
            if has_name {
                out.push(')');
            }
            continue;
        }

        if frame.constructor {
            out.push_str("new ");
        }
        if frame.function.is_empty() {
            out.push_str("<anonymous>");
        } else {
            out.push_str(&frame.function);
        }
        out.push_str(" (");
        if !frame.script.is_empty() {
            out.push_str(&frame.script);
        } else if frame.eval {
            out.push_str("[eval]");
        } else {
            out.push_str("[unknown]");
        }
        if frame.line.is_some() {
            out.push(':');
        }
        render_position(frame, &mut out);
        out.push(')');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_plain_frames() {
        let frames = [
            StackFrame {
                function: "inner".into(),
                script: "main.js".into(),
                line: Some(3),
                column: Some(7),
                ..StackFrame::default()
            },
            StackFrame {
                line: Some(1),
                column: Some(1),
                eval: true,
                ..StackFrame::default()
            },
        ];
        assert_eq!(
            render_stack(&frames),
            "    at inner (main.js:3:7)\n    at <anonymous> ([eval]:1:1)"
        );
    }

    #[test]
    fn renders_constructor_and_wasm_frames() {
        let frames = [
            StackFrame {
                function: "Widget".into(),
                script: "widget.js".into(),
                line: Some(12),
                column: Some(4),
                constructor: true,
                ..StackFrame::default()
            },
            StackFrame {
                function: "compute".into(),
                script: String::new(),
                line: Some(8),
                column: Some(2),
                wasm: true,
                ..StackFrame::default()
            },
        ];
        assert_eq!(
            render_stack(&frames),
            "    at new Widget (widget.js:12:4)\n    at compute (<WASM>8:2)"
        );
    }

    #[test]
    fn unknown_script_without_eval() {
        let frames = [StackFrame::named("f", "")];
        assert_eq!(render_stack(&frames), "    at f ([unknown])");
    }
}
