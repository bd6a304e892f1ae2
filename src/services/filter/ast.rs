use serde_json::Value;

use super::builtins::Builtin;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StrSegment {
    Text(String),
    Interp(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKey {
    /// `{a: ..}`, `{"a": ..}` and the shorthand `{a}`
    Name(String),
    /// `{$x}`: key `x`, value `$x`
    Var(String),
    /// `{(expr): ..}` or an interpolated string key
    Computed(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectEntry {
    pub key: ObjectKey,
    /// `None` for shorthand entries, which take the value of `.key` or `$key`
    pub value: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeShape {
    pub nodes: usize,
    pub height: usize,
}

/// Parsed filter expression. Variables and builtins are resolved during
/// parsing, so every tree that reaches the interpreter is well-formed.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Identity,
    RecurseAll,
    Empty,
    Literal(Value),
    Str {
        format: Option<String>,
        parts: Vec<StrSegment>,
    },
    Format(String),
    Var(String),
    Index {
        target: Box<Expr>,
        key: Box<Expr>,
    },
    Slice {
        target: Box<Expr>,
        from: Option<Box<Expr>>,
        to: Option<Box<Expr>>,
    },
    Iterate(Box<Expr>),
    Try {
        body: Box<Expr>,
        handler: Option<Box<Expr>>,
    },
    Pipe(Box<Expr>, Box<Expr>),
    Comma(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Alt(Box<Expr>, Box<Expr>),
    Array(Option<Box<Expr>>),
    Object(Vec<ObjectEntry>),
    If {
        branches: Vec<(Expr, Expr)>,
        otherwise: Option<Box<Expr>>,
    },
    Reduce {
        source: Box<Expr>,
        var: String,
        init: Box<Expr>,
        update: Box<Expr>,
    },
    Foreach {
        source: Box<Expr>,
        var: String,
        init: Box<Expr>,
        update: Box<Expr>,
        extract: Option<Box<Expr>>,
    },
    Bind {
        source: Box<Expr>,
        var: String,
        body: Box<Expr>,
    },
    Call(Builtin, Vec<Expr>),
}

impl Expr {
    pub fn boxed(self) -> Box<Expr> {
        Box::new(self)
    }

    pub fn pipe(lhs: Expr, rhs: Expr) -> Expr {
        Expr::Pipe(lhs.boxed(), rhs.boxed())
    }

    pub fn field(name: impl Into<String>) -> Expr {
        Expr::Index {
            target: Expr::Identity.boxed(),
            key: Expr::Literal(Value::String(name.into())).boxed(),
        }
    }

    pub fn index(target: Expr, key: Expr) -> Expr {
        Expr::Index {
            target: target.boxed(),
            key: key.boxed(),
        }
    }

    /// Direct subexpressions, in no particular order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Identity
            | Expr::RecurseAll
            | Expr::Empty
            | Expr::Literal(_)
            | Expr::Format(_)
            | Expr::Var(_)
            | Expr::Array(None) => Vec::new(),
            Expr::Str { parts, .. } => parts
                .iter()
                .filter_map(|part| match part {
                    StrSegment::Interp(expr) => Some(expr),
                    StrSegment::Text(_) => None,
                })
                .collect(),
            Expr::Index { target, key } => vec![target.as_ref(), key.as_ref()],
            Expr::Slice { target, from, to } => {
                let mut children = vec![target.as_ref()];
                children.extend(from.as_deref());
                children.extend(to.as_deref());
                children
            }
            Expr::Iterate(inner) | Expr::Neg(inner) | Expr::Array(Some(inner)) => vec![inner.as_ref()],
            Expr::Try { body, handler } => {
                let mut children = vec![body.as_ref()];
                children.extend(handler.as_deref());
                children
            }
            Expr::Pipe(lhs, rhs)
            | Expr::Comma(lhs, rhs)
            | Expr::Arith(_, lhs, rhs)
            | Expr::Compare(_, lhs, rhs)
            | Expr::And(lhs, rhs)
            | Expr::Or(lhs, rhs)
            | Expr::Alt(lhs, rhs) => vec![lhs.as_ref(), rhs.as_ref()],
            Expr::Object(entries) => entries
                .iter()
                .flat_map(|entry| {
                    let key = match &entry.key {
                        ObjectKey::Computed(expr) => Some(expr),
                        ObjectKey::Name(_) | ObjectKey::Var(_) => None,
                    };
                    key.into_iter().chain(entry.value.as_ref())
                })
                .collect(),
            Expr::If {
                branches,
                otherwise,
            } => {
                let mut children: Vec<&Expr> =
                    branches.iter().flat_map(|(cond, then)| [cond, then]).collect();
                children.extend(otherwise.as_deref());
                children
            }
            Expr::Reduce {
                source,
                init,
                update,
                ..
            } => vec![source.as_ref(), init.as_ref(), update.as_ref()],
            Expr::Foreach {
                source,
                init,
                update,
                extract,
                ..
            } => {
                let mut children = vec![source.as_ref(), init.as_ref(), update.as_ref()];
                children.extend(extract.as_deref());
                children
            }
            Expr::Bind { source, body, .. } => vec![source.as_ref(), body.as_ref()],
            Expr::Call(_, args) => args.iter().collect(),
        }
    }

    /// Node count and height of the tree, measured without recursion.
    pub fn shape(&self) -> TreeShape {
        let mut shape = TreeShape { nodes: 0, height: 0 };
        let mut pending = vec![(self, 1usize)];
        while let Some((expr, level)) = pending.pop() {
            shape.nodes += 1;
            shape.height = shape.height.max(level);
            pending.extend(expr.children().into_iter().map(|child| (child, level + 1)));
        }
        shape
    }

    /// `if cond then . else empty end`
    pub fn select(cond: Expr) -> Expr {
        Expr::If {
            branches: vec![(cond, Expr::Identity)],
            otherwise: Some(Expr::Empty.boxed()),
        }
    }
}
