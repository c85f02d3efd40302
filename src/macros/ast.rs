//! Macro AST: an arena of nodes indexed by [`NodeId`], plus the canonical
//! printer. Child sequences are id vectors into the arena, so task frames
//! can hold plain indices instead of references into the tree.

use std::fmt::Write as _;

/// Index of a node in [`Program::nodes`].
pub type NodeId = usize;

/// A literal or late-bound argument value. `$name` references resolve
/// against the shared variable store at the point of use.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
    Var(String),
}

impl Value {
    pub fn print(&self) -> String {
        match self {
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format!("{f:?}"),
            Value::Text(s) => s.clone(),
            Value::Var(name) => format!("${name}"),
        }
    }
}

/// A resolved input symbol: the spelling the user wrote plus the kernel
/// `(type, code)` it names. Printing keeps the original spelling.
#[derive(Clone, Debug, PartialEq)]
pub struct Sym {
    pub name: String,
    pub ty: u16,
    pub code: u16,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MouseDir {
    Up,
    Down,
    Left,
    Right,
}

impl MouseDir {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "up" => Some(MouseDir::Up),
            "down" => Some(MouseDir::Down),
            "left" => Some(MouseDir::Left),
            "right" => Some(MouseDir::Right),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MouseDir::Up => "up",
            MouseDir::Down => "down",
            MouseDir::Left => "left",
            MouseDir::Right => "right",
        }
    }

    /// (REL code, sign) for pointer motion.
    pub fn rel_axis(&self) -> (u16, i64) {
        use crate::event::{REL_X, REL_Y};
        match self {
            MouseDir::Up => (REL_Y, -1),
            MouseDir::Down => (REL_Y, 1),
            MouseDir::Left => (REL_X, -1),
            MouseDir::Right => (REL_X, 1),
        }
    }

    /// (REL code, sign) for wheel motion.
    pub fn wheel_axis(&self) -> (u16, i64) {
        use crate::event::{REL_HWHEEL, REL_WHEEL};
        match self {
            MouseDir::Up => (REL_WHEEL, 1),
            MouseDir::Down => (REL_WHEEL, -1),
            MouseDir::Left => (REL_HWHEEL, -1),
            MouseDir::Right => (REL_HWHEEL, 1),
        }
    }
}

/// One macro operation. Child sequences are arena indices.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    /// Press, sleep half the key gap, release, sleep the other half.
    Key { sym: Sym },
    KeyDown { sym: Sym },
    KeyUp { sym: Sym },
    /// Suspend for `min` ms, or a uniform sample in [min, max].
    Wait { min: Value, max: Option<Value> },
    Repeat { count: Value, body: Vec<NodeId> },
    /// key_down(modifier), run body, key_up(modifier).
    Modify { modifier: Sym, body: Vec<NodeId> },
    /// Run body in a loop while the trigger is held.
    Hold { body: Vec<NodeId> },
    /// key_down each in order, wait for release, key_up in reverse.
    HoldKeys { syms: Vec<Sym> },
    ModTap {
        default: Sym,
        modifier: Sym,
        term_ms: Option<Value>,
    },
    Mouse {
        dir: MouseDir,
        speed: Value,
        accel: Option<Value>,
    },
    MouseXy {
        x: Value,
        y: Value,
        accel: Option<Value>,
    },
    Wheel { dir: MouseDir, speed: Value },
    /// Raw event emission; type and code accept names or numbers.
    Event { ty: Value, code: Value, value: Value },
    Set { name: String, value: Value },
    Add { name: String, delta: Value },
    IfEq {
        a: Value,
        b: Value,
        then: Vec<NodeId>,
        otherwise: Vec<NodeId>,
    },
    IfTap {
        then: Vec<NodeId>,
        otherwise: Vec<NodeId>,
        timeout_ms: Value,
    },
    IfSingle {
        then: Vec<NodeId>,
        otherwise: Vec<NodeId>,
        timeout_ms: Option<Value>,
    },
    IfCapslock {
        then: Vec<NodeId>,
        otherwise: Vec<NodeId>,
    },
    IfNumlock {
        then: Vec<NodeId>,
        otherwise: Vec<NodeId>,
    },
}

/// A parsed macro: the original text plus the node arena and root sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    pub source: String,
    pub nodes: Vec<Node>,
    pub root: Vec<NodeId>,
}

impl Program {
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Canonical re-print. Parsing the output yields a structurally equal
    /// program (long node names, positional arguments, no whitespace).
    pub fn print(&self) -> String {
        self.print_seq(&self.root)
    }

    fn print_seq(&self, seq: &[NodeId]) -> String {
        seq.iter()
            .map(|&id| self.print_node(id))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn print_node(&self, id: NodeId) -> String {
        let mut out = String::new();
        match self.node(id) {
            Node::Key { sym } => {
                let _ = write!(out, "key({})", sym.name);
            }
            Node::KeyDown { sym } => {
                let _ = write!(out, "key_down({})", sym.name);
            }
            Node::KeyUp { sym } => {
                let _ = write!(out, "key_up({})", sym.name);
            }
            Node::Wait { min, max } => match max {
                Some(max) => {
                    let _ = write!(out, "wait({},{})", min.print(), max.print());
                }
                None => {
                    let _ = write!(out, "wait({})", min.print());
                }
            },
            Node::Repeat { count, body } => {
                let _ = write!(out, "repeat({},{})", count.print(), self.print_seq(body));
            }
            Node::Modify { modifier, body } => {
                let _ = write!(out, "modify({},{})", modifier.name, self.print_seq(body));
            }
            Node::Hold { body } => {
                let _ = write!(out, "hold({})", self.print_seq(body));
            }
            Node::HoldKeys { syms } => {
                let names: Vec<_> = syms.iter().map(|s| s.name.as_str()).collect();
                let _ = write!(out, "hold_keys({})", names.join(","));
            }
            Node::ModTap {
                default,
                modifier,
                term_ms,
            } => match term_ms {
                Some(t) => {
                    let _ = write!(
                        out,
                        "mod_tap({},{},{})",
                        default.name,
                        modifier.name,
                        t.print()
                    );
                }
                None => {
                    let _ = write!(out, "mod_tap({},{})", default.name, modifier.name);
                }
            },
            Node::Mouse { dir, speed, accel } => match accel {
                Some(a) => {
                    let _ = write!(out, "mouse({},{},{})", dir.name(), speed.print(), a.print());
                }
                None => {
                    let _ = write!(out, "mouse({},{})", dir.name(), speed.print());
                }
            },
            Node::MouseXy { x, y, accel } => match accel {
                Some(a) => {
                    let _ = write!(out, "mouse_xy({},{},{})", x.print(), y.print(), a.print());
                }
                None => {
                    let _ = write!(out, "mouse_xy({},{})", x.print(), y.print());
                }
            },
            Node::Wheel { dir, speed } => {
                let _ = write!(out, "wheel({},{})", dir.name(), speed.print());
            }
            Node::Event { ty, code, value } => {
                let _ = write!(
                    out,
                    "event({},{},{})",
                    ty.print(),
                    code.print(),
                    value.print()
                );
            }
            Node::Set { name, value } => {
                let _ = write!(out, "set({},{})", name, value.print());
            }
            Node::Add { name, delta } => {
                let _ = write!(out, "add({},{})", name, delta.print());
            }
            Node::IfEq {
                a,
                b,
                then,
                otherwise,
            } => {
                let _ = write!(
                    out,
                    "if_eq({},{},{},{})",
                    a.print(),
                    b.print(),
                    self.print_seq(then),
                    self.print_seq(otherwise)
                );
            }
            Node::IfTap {
                then,
                otherwise,
                timeout_ms,
            } => {
                let _ = write!(
                    out,
                    "if_tap({},{},{})",
                    self.print_seq(then),
                    self.print_seq(otherwise),
                    timeout_ms.print()
                );
            }
            Node::IfSingle {
                then,
                otherwise,
                timeout_ms,
            } => match timeout_ms {
                Some(t) => {
                    let _ = write!(
                        out,
                        "if_single({},{},{})",
                        self.print_seq(then),
                        self.print_seq(otherwise),
                        t.print()
                    );
                }
                None => {
                    let _ = write!(
                        out,
                        "if_single({},{})",
                        self.print_seq(then),
                        self.print_seq(otherwise)
                    );
                }
            },
            Node::IfCapslock { then, otherwise } => {
                let _ = write!(
                    out,
                    "if_capslock({},{})",
                    self.print_seq(then),
                    self.print_seq(otherwise)
                );
            }
            Node::IfNumlock { then, otherwise } => {
                let _ = write!(
                    out,
                    "if_numlock({},{})",
                    self.print_seq(then),
                    self.print_seq(otherwise)
                );
            }
        }
        out
    }
}
