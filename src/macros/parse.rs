//! Recursive-descent parser for macro text.
//!
//! Parse outcomes are plain `Result`s carrying the byte offset and a
//! message; the preset validator aggregates them per mapping. Symbols are
//! resolved against the global symbol table at parse time, so a typo in a
//! key name surfaces at load, not mid-macro.

use crate::error::Error;
use crate::keys::SymbolTable;
use crate::macros::ast::{MouseDir, Node, NodeId, Program, Sym, Value};

pub fn parse(source: &str, symbols: &SymbolTable) -> Result<Program, Error> {
    let tokens = lex(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        nodes: Vec::new(),
        symbols,
    };
    let root = parser.parse_chain()?;
    if let Some(t) = parser.peek() {
        return Err(err(t.pos, "trailing input after macro"));
    }
    if root.is_empty() {
        return Err(err(0, "empty macro"));
    }
    Ok(Program {
        source: source.to_string(),
        nodes: parser.nodes,
        root,
    })
}

fn err(position: usize, message: impl Into<String>) -> Error {
    Error::MacroParse {
        position,
        message: message.into(),
    }
}

// --- Lexer ---

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Var(String),
    LParen,
    RParen,
    Comma,
    Dot,
    Assign,
}

#[derive(Clone, Debug)]
struct Spanned {
    tok: Tok,
    pos: usize,
}

fn lex(src: &str) -> Result<Vec<Spanned>, Error> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        let pos = i;
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            '(' => {
                out.push(Spanned {
                    tok: Tok::LParen,
                    pos,
                });
                i += 1;
            }
            ')' => {
                out.push(Spanned {
                    tok: Tok::RParen,
                    pos,
                });
                i += 1;
            }
            ',' => {
                out.push(Spanned {
                    tok: Tok::Comma,
                    pos,
                });
                i += 1;
            }
            '.' => {
                out.push(Spanned { tok: Tok::Dot, pos });
                i += 1;
            }
            '=' => {
                out.push(Spanned {
                    tok: Tok::Assign,
                    pos,
                });
                i += 1;
            }
            '$' => {
                i += 1;
                let start = i;
                while i < bytes.len() && is_ident_char(bytes[i] as char) {
                    i += 1;
                }
                if start == i {
                    return Err(err(pos, "`$` must be followed by a variable name"));
                }
                out.push(Spanned {
                    tok: Tok::Var(src[start..i].to_string()),
                    pos,
                });
            }
            '"' | '\'' => {
                let quote = c;
                i += 1;
                let start = i;
                while i < bytes.len() && bytes[i] as char != quote {
                    i += 1;
                }
                if i >= bytes.len() {
                    return Err(err(pos, "unterminated string literal"));
                }
                out.push(Spanned {
                    tok: Tok::Str(src[start..i].to_string()),
                    pos,
                });
                i += 1;
            }
            '-' | '0'..='9' => {
                let start = i;
                if c == '-' {
                    i += 1;
                    if i >= bytes.len() || !(bytes[i] as char).is_ascii_digit() {
                        return Err(err(pos, "`-` must start a number"));
                    }
                }
                while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                    i += 1;
                }
                let mut is_float = false;
                if i + 1 < bytes.len()
                    && bytes[i] as char == '.'
                    && (bytes[i + 1] as char).is_ascii_digit()
                {
                    is_float = true;
                    i += 1;
                    while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                        i += 1;
                    }
                }
                // Exponent notation, so canonical float printing reparses.
                if i < bytes.len() && matches!(bytes[i] as char, 'e' | 'E') {
                    let mut j = i + 1;
                    if j < bytes.len() && matches!(bytes[j] as char, '+' | '-') {
                        j += 1;
                    }
                    if j < bytes.len() && (bytes[j] as char).is_ascii_digit() {
                        is_float = true;
                        i = j;
                        while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text = &src[start..i];
                let tok = if is_float {
                    let value: f64 = text
                        .parse()
                        .map_err(|_| err(pos, format!("bad number `{text}`")))?;
                    if !value.is_finite() {
                        return Err(err(pos, format!("number `{text}` out of range")));
                    }
                    Tok::Float(value)
                } else {
                    Tok::Int(
                        text.parse()
                            .map_err(|_| err(pos, format!("bad number `{text}`")))?,
                    )
                };
                out.push(Spanned { tok, pos });
            }
            c if is_ident_start(c) => {
                let start = i;
                while i < bytes.len() && is_ident_char(bytes[i] as char) {
                    i += 1;
                }
                out.push(Spanned {
                    tok: Tok::Ident(src[start..i].to_string()),
                    pos,
                });
            }
            other => {
                return Err(err(pos, format!("unexpected character `{other}`")));
            }
        }
    }
    Ok(out)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

// --- Parser ---

/// A single parsed argument before binding: positional or `name=value`.
struct Arg {
    name: Option<String>,
    value: ArgValue,
    pos: usize,
}

enum ArgValue {
    Scalar(Value),
    Seq(Vec<NodeId>),
    /// An omitted argument between commas, e.g. `if_eq(a,b,,key(x))`.
    Empty,
}

struct Parser<'a> {
    tokens: Vec<Spanned>,
    pos: usize,
    nodes: Vec<Node>,
    symbols: &'a SymbolTable,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Spanned> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn here(&self) -> usize {
        self.peek().map(|t| t.pos).unwrap_or(0)
    }

    fn expect(&mut self, want: Tok, what: &str) -> Result<usize, Error> {
        match self.next() {
            Some(t) if t.tok == want => Ok(t.pos),
            Some(t) => Err(err(t.pos, format!("expected {what}"))),
            None => Err(err(0, format!("expected {what}, found end of macro"))),
        }
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// A dot-separated chain of calls.
    fn parse_chain(&mut self) -> Result<Vec<NodeId>, Error> {
        let mut seq = Vec::new();
        loop {
            seq.push(self.parse_call()?);
            match self.peek() {
                Some(t) if t.tok == Tok::Dot => {
                    self.pos += 1;
                }
                _ => break,
            }
        }
        Ok(seq)
    }

    fn parse_call(&mut self) -> Result<NodeId, Error> {
        let (name, name_pos) = match self.next() {
            Some(Spanned {
                tok: Tok::Ident(name),
                pos,
            }) => (name, pos),
            Some(t) => return Err(err(t.pos, "expected a macro call")),
            None => return Err(err(0, "expected a macro call, found end of macro")),
        };
        self.expect(Tok::LParen, "`(`")?;
        let args = self.parse_args()?;
        self.build_node(&name, name_pos, args)
    }

    fn parse_args(&mut self) -> Result<Vec<Arg>, Error> {
        let mut args = Vec::new();
        // Zero-argument call.
        if matches!(self.peek(), Some(t) if t.tok == Tok::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.parse_arg()?);
            match self.next() {
                Some(t) if t.tok == Tok::Comma => continue,
                Some(t) if t.tok == Tok::RParen => break,
                Some(t) => return Err(err(t.pos, "expected `,` or `)`")),
                None => return Err(err(0, "unclosed `(`")),
            }
        }
        Ok(args)
    }

    fn parse_arg(&mut self) -> Result<Arg, Error> {
        let pos = self.here();
        // Omitted argument slot.
        if matches!(self.peek(), Some(t) if t.tok == Tok::Comma || t.tok == Tok::RParen) {
            return Ok(Arg {
                name: None,
                value: ArgValue::Empty,
                pos,
            });
        }
        // Keyword argument: ident `=` value.
        let mut name = None;
        if let (
            Some(Spanned {
                tok: Tok::Ident(id), ..
            }),
            Some(Spanned {
                tok: Tok::Assign, ..
            }),
        ) = (self.tokens.get(self.pos), self.tokens.get(self.pos + 1))
        {
            name = Some(id.clone());
            self.pos += 2;
        }
        let value = self.parse_value()?;
        Ok(Arg { name, value, pos })
    }

    fn parse_value(&mut self) -> Result<ArgValue, Error> {
        match self.peek().cloned() {
            Some(Spanned {
                tok: Tok::Ident(_), ..
            }) if matches!(
                self.tokens.get(self.pos + 1),
                Some(Spanned {
                    tok: Tok::LParen,
                    ..
                })
            ) =>
            {
                // Nested macro argument, possibly a dotted chain.
                Ok(ArgValue::Seq(self.parse_chain()?))
            }
            Some(Spanned {
                tok: Tok::Ident(id),
                ..
            }) => {
                self.pos += 1;
                Ok(ArgValue::Scalar(Value::Text(id)))
            }
            Some(Spanned {
                tok: Tok::Int(i), ..
            }) => {
                self.pos += 1;
                Ok(ArgValue::Scalar(Value::Int(i)))
            }
            Some(Spanned {
                tok: Tok::Float(f), ..
            }) => {
                self.pos += 1;
                Ok(ArgValue::Scalar(Value::Float(f)))
            }
            Some(Spanned {
                tok: Tok::Str(s), ..
            }) => {
                self.pos += 1;
                Ok(ArgValue::Scalar(Value::Text(s)))
            }
            Some(Spanned {
                tok: Tok::Var(name),
                ..
            }) => {
                self.pos += 1;
                Ok(ArgValue::Scalar(Value::Var(name)))
            }
            Some(t) => Err(err(t.pos, "expected an argument")),
            None => Err(err(0, "expected an argument, found end of macro")),
        }
    }

    // --- Argument binding ---

    /// Binds positional and keyword args onto named slots. Unknown
    /// keywords, duplicates and excess positionals are errors.
    fn bind(
        &self,
        call: &str,
        args: Vec<Arg>,
        slots: &[&str],
    ) -> Result<Vec<Option<(ArgValue, usize)>>, Error> {
        let mut bound: Vec<Option<(ArgValue, usize)>> = Vec::new();
        bound.resize_with(slots.len(), || None);
        let mut positional = 0usize;
        for arg in args {
            let idx = match &arg.name {
                Some(name) => slots.iter().position(|s| *s == name.as_str()).ok_or_else(|| {
                    err(
                        arg.pos,
                        format!("`{call}` has no parameter named `{name}`"),
                    )
                })?,
                None => {
                    let idx = positional;
                    positional += 1;
                    if idx >= slots.len() {
                        return Err(err(
                            arg.pos,
                            format!("too many arguments for `{call}`"),
                        ));
                    }
                    idx
                }
            };
            if bound[idx].is_some() {
                return Err(err(
                    arg.pos,
                    format!("duplicate argument `{}` for `{call}`", slots[idx]),
                ));
            }
            bound[idx] = Some((arg.value, arg.pos));
        }
        Ok(bound)
    }

    fn sym(&self, call: &str, slot: (ArgValue, usize)) -> Result<Sym, Error> {
        let (value, pos) = slot;
        match value {
            ArgValue::Scalar(Value::Text(name)) => {
                let (ty, code) = self
                    .symbols
                    .lookup(&name)
                    .ok_or_else(|| err(pos, format!("unknown symbol `{name}`")))?;
                Ok(Sym { name, ty, code })
            }
            _ => Err(err(pos, format!("`{call}` expects a symbol name"))),
        }
    }

    fn scalar(&self, call: &str, slot: (ArgValue, usize)) -> Result<Value, Error> {
        match slot.0 {
            ArgValue::Scalar(v) => Ok(v),
            _ => Err(err(slot.1, format!("`{call}` expects a value here"))),
        }
    }

    fn int_like(&self, call: &str, slot: (ArgValue, usize)) -> Result<Value, Error> {
        let pos = slot.1;
        match self.scalar(call, slot)? {
            v @ (Value::Int(_) | Value::Var(_)) => Ok(v),
            _ => Err(err(pos, format!("`{call}` expects an integer here"))),
        }
    }

    fn number_like(&self, call: &str, slot: (ArgValue, usize)) -> Result<Value, Error> {
        let pos = slot.1;
        match self.scalar(call, slot)? {
            v @ (Value::Int(_) | Value::Float(_) | Value::Var(_)) => Ok(v),
            _ => Err(err(pos, format!("`{call}` expects a number here"))),
        }
    }

    fn branch(&self, call: &str, slot: Option<(ArgValue, usize)>) -> Result<Vec<NodeId>, Error> {
        match slot {
            None => Ok(Vec::new()),
            Some((ArgValue::Empty, _)) => Ok(Vec::new()),
            Some((ArgValue::Seq(seq), _)) => Ok(seq),
            Some((ArgValue::Scalar(_), pos)) => {
                Err(err(pos, format!("`{call}` expects a macro here")))
            }
        }
    }

    fn required(
        &self,
        call: &str,
        call_pos: usize,
        slot: Option<(ArgValue, usize)>,
        what: &str,
    ) -> Result<(ArgValue, usize), Error> {
        match slot {
            Some((ArgValue::Empty, pos)) => {
                Err(err(pos, format!("`{call}` is missing its {what}")))
            }
            Some(s) => Ok(s),
            None => Err(err(call_pos, format!("`{call}` is missing its {what}"))),
        }
    }

    fn var_name(&self, call: &str, slot: (ArgValue, usize)) -> Result<String, Error> {
        let pos = slot.1;
        match self.scalar(call, slot)? {
            Value::Text(name) => Ok(name),
            _ => Err(err(pos, format!("`{call}` expects a variable name"))),
        }
    }

    fn mouse_dir(&self, call: &str, slot: (ArgValue, usize)) -> Result<MouseDir, Error> {
        let pos = slot.1;
        match self.scalar(call, slot)? {
            Value::Text(name) => MouseDir::parse(&name)
                .ok_or_else(|| err(pos, format!("unknown direction `{name}`"))),
            _ => Err(err(pos, format!("`{call}` expects a direction"))),
        }
    }

    fn build_node(&mut self, name: &str, pos: usize, args: Vec<Arg>) -> Result<NodeId, Error> {
        // Short forms from the original language.
        let canonical = match name {
            "k" => "key",
            "w" => "wait",
            "r" => "repeat",
            "m" => "modify",
            "h" => "hold",
            other => other,
        };
        let node = match canonical {
            "key" | "key_down" | "key_up" => {
                let mut b = self.bind(canonical, args, &["symbol"])?;
                let sym = self.required(canonical, pos, b.remove(0), "symbol")?;
                let sym = self.sym(canonical, sym)?;
                match canonical {
                    "key" => Node::Key { sym },
                    "key_down" => Node::KeyDown { sym },
                    _ => Node::KeyUp { sym },
                }
            }
            "wait" => {
                let mut b = self.bind(canonical, args, &["time", "max"])?;
                let min = self.required(canonical, pos, b.remove(0), "time")?;
                let min = self.int_like(canonical, min)?;
                let max = match b.remove(0) {
                    Some((ArgValue::Empty, _)) | None => None,
                    Some(slot) => Some(self.int_like(canonical, slot)?),
                };
                Node::Wait { min, max }
            }
            "repeat" => {
                let mut b = self.bind(canonical, args, &["repeats", "macro"])?;
                let count = self.required(canonical, pos, b.remove(0), "repeat count")?;
                let count = self.int_like(canonical, count)?;
                let body_slot = b.remove(0);
                if body_slot.is_none() {
                    return Err(err(pos, "`repeat` is missing its macro"));
                }
                let body = self.branch(canonical, body_slot)?;
                if body.is_empty() {
                    return Err(err(pos, "`repeat` is missing its macro"));
                }
                Node::Repeat { count, body }
            }
            "modify" => {
                let mut b = self.bind(canonical, args, &["modifier", "macro"])?;
                let modifier = self.required(canonical, pos, b.remove(0), "modifier")?;
                let modifier = self.sym(canonical, modifier)?;
                let body = self.branch(canonical, b.remove(0))?;
                if body.is_empty() {
                    return Err(err(pos, "`modify` is missing its macro"));
                }
                Node::Modify { modifier, body }
            }
            "hold" => {
                let mut b = self.bind(canonical, args, &["macro"])?;
                let body = self.branch(canonical, b.remove(0))?;
                if body.is_empty() {
                    return Err(err(pos, "`hold` is missing its macro"));
                }
                Node::Hold { body }
            }
            "hold_keys" => {
                if args.is_empty() {
                    return Err(err(pos, "`hold_keys` needs at least one symbol"));
                }
                let mut syms = Vec::with_capacity(args.len());
                for arg in args {
                    if arg.name.is_some() {
                        return Err(err(arg.pos, "`hold_keys` takes positional symbols only"));
                    }
                    syms.push(self.sym("hold_keys", (arg.value, arg.pos))?);
                }
                Node::HoldKeys { syms }
            }
            "mod_tap" => {
                let mut b =
                    self.bind(canonical, args, &["default", "modifier", "tapping_term"])?;
                let default = self.required(canonical, pos, b.remove(0), "default symbol")?;
                let default = self.sym(canonical, default)?;
                let modifier = self.required(canonical, pos, b.remove(0), "modifier")?;
                let modifier = self.sym(canonical, modifier)?;
                let term_ms = match b.remove(0) {
                    Some((ArgValue::Empty, _)) | None => None,
                    Some(slot) => Some(self.int_like(canonical, slot)?),
                };
                Node::ModTap {
                    default,
                    modifier,
                    term_ms,
                }
            }
            "mouse" => {
                let mut b =
                    self.bind(canonical, args, &["direction", "speed", "acceleration"])?;
                let dir = self.required(canonical, pos, b.remove(0), "direction")?;
                let dir = self.mouse_dir(canonical, dir)?;
                let speed = self.required(canonical, pos, b.remove(0), "speed")?;
                let speed = self.int_like(canonical, speed)?;
                let accel = match b.remove(0) {
                    Some((ArgValue::Empty, _)) | None => None,
                    Some(slot) => Some(self.number_like(canonical, slot)?),
                };
                Node::Mouse { dir, speed, accel }
            }
            "mouse_xy" => {
                let mut b = self.bind(canonical, args, &["x", "y", "acceleration"])?;
                let x = self.required(canonical, pos, b.remove(0), "x speed")?;
                let x = self.int_like(canonical, x)?;
                let y = self.required(canonical, pos, b.remove(0), "y speed")?;
                let y = self.int_like(canonical, y)?;
                let accel = match b.remove(0) {
                    Some((ArgValue::Empty, _)) | None => None,
                    Some(slot) => Some(self.number_like(canonical, slot)?),
                };
                Node::MouseXy { x, y, accel }
            }
            "wheel" => {
                let mut b = self.bind(canonical, args, &["direction", "speed"])?;
                let dir = self.required(canonical, pos, b.remove(0), "direction")?;
                let dir = self.mouse_dir(canonical, dir)?;
                let speed = self.required(canonical, pos, b.remove(0), "speed")?;
                let speed = self.int_like(canonical, speed)?;
                Node::Wheel { dir, speed }
            }
            "event" => {
                let mut b = self.bind(canonical, args, &["type", "code", "value"])?;
                let ty = self.required(canonical, pos, b.remove(0), "event type")?;
                let ty = self.scalar(canonical, ty)?;
                let code = self.required(canonical, pos, b.remove(0), "event code")?;
                let code = self.scalar(canonical, code)?;
                let value = self.required(canonical, pos, b.remove(0), "event value")?;
                let value = self.int_like(canonical, value)?;
                Node::Event { ty, code, value }
            }
            "set" => {
                let mut b = self.bind(canonical, args, &["variable", "value"])?;
                let name = self.required(canonical, pos, b.remove(0), "variable name")?;
                let name = self.var_name(canonical, name)?;
                let value = self.required(canonical, pos, b.remove(0), "value")?;
                let value = self.scalar(canonical, value)?;
                Node::Set { name, value }
            }
            "add" => {
                let mut b = self.bind(canonical, args, &["variable", "value"])?;
                let name = self.required(canonical, pos, b.remove(0), "variable name")?;
                let name = self.var_name(canonical, name)?;
                let delta = self.required(canonical, pos, b.remove(0), "value")?;
                let delta = self.int_like(canonical, delta)?;
                Node::Add { name, delta }
            }
            "if_eq" => {
                let mut b = self.bind(canonical, args, &["value_1", "value_2", "then", "else"])?;
                let a = self.required(canonical, pos, b.remove(0), "first value")?;
                let a = self.scalar(canonical, a)?;
                let bv = self.required(canonical, pos, b.remove(0), "second value")?;
                let bv = self.scalar(canonical, bv)?;
                let then = self.branch(canonical, b.remove(0))?;
                let otherwise = self.branch(canonical, b.remove(0))?;
                Node::IfEq {
                    a,
                    b: bv,
                    then,
                    otherwise,
                }
            }
            "if_tap" => {
                let mut b = self.bind(canonical, args, &["then", "else", "timeout"])?;
                let then = self.branch(canonical, b.remove(0))?;
                let otherwise = self.branch(canonical, b.remove(0))?;
                let timeout_ms = match b.remove(0) {
                    Some((ArgValue::Empty, _)) | None => Value::Int(300),
                    Some(slot) => self.int_like(canonical, slot)?,
                };
                Node::IfTap {
                    then,
                    otherwise,
                    timeout_ms,
                }
            }
            "if_single" => {
                let mut b = self.bind(canonical, args, &["then", "else", "timeout"])?;
                let then = self.branch(canonical, b.remove(0))?;
                let otherwise = self.branch(canonical, b.remove(0))?;
                let timeout_ms = match b.remove(0) {
                    Some((ArgValue::Empty, _)) | None => None,
                    Some(slot) => Some(self.int_like(canonical, slot)?),
                };
                Node::IfSingle {
                    then,
                    otherwise,
                    timeout_ms,
                }
            }
            "if_capslock" | "if_numlock" => {
                let mut b = self.bind(canonical, args, &["then", "else"])?;
                let then = self.branch(canonical, b.remove(0))?;
                let otherwise = self.branch(canonical, b.remove(0))?;
                if canonical == "if_capslock" {
                    Node::IfCapslock { then, otherwise }
                } else {
                    Node::IfNumlock { then, otherwise }
                }
            }
            other => {
                return Err(err(pos, format!("unknown macro call `{other}`")));
            }
        };
        Ok(self.push(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SymbolTable;

    fn parse_ok(src: &str) -> Program {
        let symbols = SymbolTable::with_defaults();
        parse(src, &symbols).expect(src)
    }

    fn parse_err(src: &str) -> Error {
        let symbols = SymbolTable::with_defaults();
        parse(src, &symbols).expect_err(src)
    }

    #[test]
    fn simple_chain() {
        let p = parse_ok("key(a).wait(10).key(b)");
        assert_eq!(p.root.len(), 3);
        assert!(matches!(p.node(p.root[0]), Node::Key { sym } if sym.code == 30));
        assert!(matches!(
            p.node(p.root[1]),
            Node::Wait {
                min: Value::Int(10),
                max: None
            }
        ));
    }

    #[test]
    fn short_names_normalize() {
        let long = parse_ok("key(a).wait(5).repeat(2,key(b))");
        let short = parse_ok("k(a).w(5).r(2,k(b))");
        assert_eq!(long.nodes, short.nodes);
    }

    #[test]
    fn keyword_arguments_bind() {
        let positional = parse_ok("repeat(3,key(a))");
        let keyworded = parse_ok("repeat(macro=key(a),repeats=3)");
        assert_eq!(positional.nodes, keyworded.nodes);
    }

    #[test]
    fn nested_chains_as_arguments() {
        let p = parse_ok("modify(Shift_L,key(a).key(b))");
        match p.node(p.root[0]) {
            Node::Modify { modifier, body } => {
                assert_eq!(modifier.code, 42);
                assert_eq!(body.len(), 2);
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn empty_branch_slots() {
        let p = parse_ok("if_eq($mode,1,,key(x))");
        match p.node(p.root[0]) {
            Node::IfEq {
                a,
                then,
                otherwise,
                ..
            } => {
                assert_eq!(a, &Value::Var("mode".into()));
                assert!(then.is_empty());
                assert_eq!(otherwise.len(), 1);
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn hold_keys_variadic() {
        let p = parse_ok("hold_keys(Control_L,Shift_L,a)");
        match p.node(p.root[0]) {
            Node::HoldKeys { syms } => {
                assert_eq!(
                    syms.iter().map(|s| s.code).collect::<Vec<_>>(),
                    vec![29, 42, 30]
                );
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn errors_carry_positions() {
        match parse_err("key(nosuchkey)") {
            Error::MacroParse { position, message } => {
                assert_eq!(position, 4);
                assert!(message.contains("nosuchkey"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(matches!(
            parse_err("key(a)extra"),
            Error::MacroParse { .. }
        ));
        assert!(matches!(parse_err("frobnicate(1)"), Error::MacroParse { .. }));
        assert!(matches!(parse_err(""), Error::MacroParse { .. }));
        assert!(matches!(parse_err("key(a"), Error::MacroParse { .. }));
        assert!(matches!(
            parse_err("repeat(2,key(a),extra)"),
            Error::MacroParse { .. }
        ));
        assert!(matches!(
            parse_err("wait(time=1,time=2)"),
            Error::MacroParse { .. }
        ));
    }

    #[test]
    fn print_round_trips() {
        let symbols = SymbolTable::with_defaults();
        for src in [
            "key(a)",
            "key_down(Control_L).key_up(Control_L)",
            "wait(10,20)",
            "repeat(4,key(a).wait(2))",
            "modify(Shift_L,key(b))",
            "hold(key(space))",
            "hold_keys(Control_L,c)",
            "mod_tap(a,Shift_L,150)",
            "mouse(left,4,0.5)",
            "mouse_xy(2,-3)",
            "wheel(down,2)",
            "event(2,8,-1)",
            "set(mode,1).add(count,-1)",
            "if_eq($mode,1,key(a),key(b))",
            "if_tap(key(a),key(b),300)",
            "if_single(key(a),,500)",
            "if_capslock(key(a),key(b))",
            "if_numlock(,key(b))",
        ] {
            let first = parse(src, &symbols).expect(src);
            let printed = first.print();
            let second = parse(&printed, &symbols).expect(&printed);
            assert_eq!(first.nodes, second.nodes, "round trip failed for `{src}`");
            assert_eq!(first.root, second.root);
        }
    }
}
