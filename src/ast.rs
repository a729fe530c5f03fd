use crate::error::Span;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;

/// A parsed program: the top-level block plus the two definition tables
/// the evaluator resolves calls and infix operators against.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub body: Block,
    pub functions: HashMap<String, FunctionDef>,
    /// Keyed by operator symbol, e.g. `` `*` ``.
    pub infix_ops: HashMap<String, FunctionDef>,
}

/// A user function. Infix operator definitions reuse this shape with the
/// symbol as `name` and exactly two parameters.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub return_type: Type,
    pub params: Vec<Param>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Int,
    Double,
    Bool,
    String,
    Void,
    Array(Box<Type>),
}

impl Type {
    pub fn default_value(&self) -> Value {
        match self {
            Type::Int => Value::Int(0),
            Type::Double => Value::Double(0.0),
            Type::Bool => Value::Bool(false),
            Type::String => Value::String(String::new()),
            Type::Void => Value::Void,
            Type::Array(_) => Value::Array(Vec::new()),
        }
    }

    /// Convert `value` to this type. Only int and double convert into each
    /// other; everything else has to match already.
    pub fn coerce(&self, value: Value) -> Result<Value, String> {
        match (self, value) {
            (Type::Int, Value::Int(n)) => Ok(Value::Int(n)),
            (Type::Int, Value::Double(d)) => Ok(Value::Int(d as i64)),
            (Type::Double, Value::Double(d)) => Ok(Value::Double(d)),
            (Type::Double, Value::Int(n)) => Ok(Value::Double(n as f64)),
            (Type::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
            (Type::String, Value::String(s)) => Ok(Value::String(s)),
            (Type::Array(element), Value::Array(items)) => items
                .into_iter()
                .map(|item| element.coerce(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            (ty, value) => Err(format!("expected {}, found {}", ty, value.type_name())),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Double => write!(f, "double"),
            Type::Bool => write!(f, "bool"),
            Type::String => write!(f, "string"),
            Type::Void => write!(f, "void"),
            Type::Array(element) => write!(f, "{}[]", element),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Block(Block),
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
        span: Span,
    },
    While {
        condition: Expr,
        body: Box<Stmt>,
        span: Span,
    },
    DoWhile {
        body: Box<Stmt>,
        condition: Expr,
        span: Span,
    },
    For {
        initializer: Option<Box<Stmt>>,
        condition: Option<Expr>,
        increment: Option<Expr>,
        body: Box<Stmt>,
        span: Span,
    },
    Break {
        span: Span,
    },
    Continue {
        span: Span,
    },
    Return {
        value: Option<Expr>,
        span: Span,
    },
    Expression {
        expr: Expr,
        span: Span,
    },
    Declarations {
        declarations: Vec<Declaration>,
        span: Span,
    },
    Empty {
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> &Span {
        match self {
            Stmt::Block(block) => &block.span,
            Stmt::If { span, .. } => span,
            Stmt::While { span, .. } => span,
            Stmt::DoWhile { span, .. } => span,
            Stmt::For { span, .. } => span,
            Stmt::Break { span } => span,
            Stmt::Continue { span } => span,
            Stmt::Return { span, .. } => span,
            Stmt::Expression { span, .. } => span,
            Stmt::Declarations { span, .. } => span,
            Stmt::Empty { span } => span,
        }
    }
}

/// One declarator of a declaration list, e.g. `a[3] = {1, 2, 3}` in
/// `int n, a[3] = {1, 2, 3};`.
#[derive(Debug, Clone)]
pub struct Declaration {
    /// Element type for arrays.
    pub ty: Type,
    pub name: String,
    pub array: Option<ArraySize>,
    pub initializer: Option<Initializer>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ArraySize {
    /// `a[n]`
    Sized(Expr),
    /// `a[]`, length taken from the initializer list.
    Unsized,
}

#[derive(Debug, Clone)]
pub enum Initializer {
    Expr(Expr),
    List(Vec<Expr>),
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal {
        value: Value,
        span: Span,
    },
    Variable {
        name: String,
        span: Span,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
        span: Span,
    },
    /// `a += b` and friends.
    CompoundAssign {
        target: Box<Expr>,
        operator: BinaryOp,
        value: Box<Expr>,
        span: Span,
    },
    Binary {
        left: Box<Expr>,
        operator: BinaryOp,
        right: Box<Expr>,
        span: Span,
    },
    Unary {
        operator: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    Logical {
        left: Box<Expr>,
        operator: LogicalOp,
        right: Box<Expr>,
        span: Span,
    },
    Call {
        name: String,
        args: Vec<Expr>,
        span: Span,
    },
    /// Application of a user-defined infix operator.
    InfixOp {
        symbol: String,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> &Span {
        match self {
            Expr::Literal { span, .. } => span,
            Expr::Variable { span, .. } => span,
            Expr::Index { span, .. } => span,
            Expr::Assign { span, .. } => span,
            Expr::CompoundAssign { span, .. } => span,
            Expr::Binary { span, .. } => span,
            Expr::Unary { span, .. } => span,
            Expr::Logical { span, .. } => span,
            Expr::Call { span, .. } => span,
            Expr::InfixOp { span, .. } => span,
        }
    }

    /// Whether this expression denotes a storage location.
    pub fn is_lvalue(&self) -> bool {
        matches!(self, Expr::Variable { .. } | Expr::Index { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    Arithmetic,
    Relational,
    Bitwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
}

impl BinaryOp {
    pub fn class(self) -> OpClass {
        match self {
            BinaryOp::Add
            | BinaryOp::Subtract
            | BinaryOp::Multiply
            | BinaryOp::Divide
            | BinaryOp::Modulo => OpClass::Arithmetic,
            BinaryOp::Equal
            | BinaryOp::NotEqual
            | BinaryOp::Less
            | BinaryOp::LessEqual
            | BinaryOp::Greater
            | BinaryOp::GreaterEqual => OpClass::Relational,
            BinaryOp::BitAnd
            | BinaryOp::BitOr
            | BinaryOp::BitXor
            | BinaryOp::ShiftLeft
            | BinaryOp::ShiftRight => OpClass::Bitwise,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::ShiftLeft => "<<",
            BinaryOp::ShiftRight => ">>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Plus,
    Not,
    BitNot,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Negate => "-",
            UnaryOp::Plus => "+",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}
