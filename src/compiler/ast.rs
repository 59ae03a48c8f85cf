use std::rc::Rc;

use crate::assembly::instruction::Mnemonic;
use crate::compiler::builder::scope::Variable;
use crate::compiler::source::SourceRange;
use crate::compiler::types::{BitField, StructLayout, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogicalAnd,
    LogicalOr,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::LogicalAnd | BinaryOp::LogicalOr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Logical not
    Not,
    /// Arithmetic negation
    Negate,
    /// Address of an l-value
    Ref,
}

/// Kind of an embedded binary file. The pool label of an entry is marked at
/// the kind's offset inside the blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Bytes,
    Image,
}

impl FileKind {
    pub fn label_offset(&self) -> u16 {
        match self {
            FileKind::Bytes => 0,
            // Images carry their dimension header word first.
            FileKind::Image => 1,
        }
    }
}

/// One line of an `asm { … }` block.
#[derive(Debug, Clone)]
pub enum AsmItem {
    Instruction {
        mnemonic: String,
        resolved: Option<Mnemonic>,
        operand: Option<AsmOperand>,
        range: SourceRange,
    },
    Label(String),
}

#[derive(Debug, Clone)]
pub enum AsmOperand {
    Int(i32),
    /// `@name`: the home pointer of a source variable
    Variable {
        name: String,
        variable: Option<Rc<Variable>>,
    },
    /// A label defined elsewhere in the same block
    LabelRef(String),
}

#[derive(Debug, Clone)]
pub struct Expression {
    pub kind: ExpressionKind,
    pub range: SourceRange,
    /// Filled in during `initialize`
    pub ty: Type,
}

impl Expression {
    pub fn new(kind: ExpressionKind, range: SourceRange) -> Expression {
        Expression {
            kind,
            range,
            ty: Type::Unknown,
        }
    }

    /// Whether the expression names a stable machine address.
    pub fn is_lvalue(&self) -> bool {
        matches!(
            self.kind,
            ExpressionKind::Identifier { .. }
                | ExpressionKind::Index { .. }
                | ExpressionKind::Member { .. }
        )
    }

    /// Whether evaluation is free of side effects and may be dropped or
    /// duplicated.
    pub fn is_pure(&self) -> bool {
        match &self.kind {
            ExpressionKind::Integer(_)
            | ExpressionKind::Bool(_)
            | ExpressionKind::Char(_)
            | ExpressionKind::Str(_)
            | ExpressionKind::Identifier { .. }
            | ExpressionKind::SizeOf(_) => true,
            ExpressionKind::Binary { lhs, rhs, .. } => lhs.is_pure() && rhs.is_pure(),
            ExpressionKind::Unary { expr, .. } => expr.is_pure(),
            ExpressionKind::Index { target, index } => target.is_pure() && index.is_pure(),
            ExpressionKind::Member { target, .. } => target.is_pure(),
            ExpressionKind::StructInit { fields, .. } => {
                fields.iter().all(|(_, value)| value.is_pure())
            }
            ExpressionKind::CreatePointer { .. } => true,
            ExpressionKind::Call { .. }
            | ExpressionKind::Asm { .. }
            | ExpressionKind::IncludeFile { .. } => false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExpressionKind {
    Integer(i32),
    Bool(bool),
    Char(char),
    Str(String),
    Identifier {
        name: String,
        variable: Option<Rc<Variable>>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expression>,
    },
    Call {
        name: String,
        args: Vec<Expression>,
        /// Index into the builder's function table
        function: Option<usize>,
    },
    Index {
        target: Box<Expression>,
        index: Box<Expression>,
    },
    Member {
        target: Box<Expression>,
        field: String,
        /// (word offset, field type, bit-field position), resolved against
        /// the target's struct layout
        resolved: Option<(u16, Type, Option<BitField>)>,
    },
    StructInit {
        fields: Vec<(String, Expression)>,
        layout: Option<Rc<StructLayout>>,
    },
    SizeOf(Box<Expression>),
    CreatePointer {
        address: Box<Expression>,
        bank: Box<Expression>,
        /// The fixed symbol, created once the address is known constant
        pointer: Option<crate::assembly::symbols::Pointer>,
    },
    IncludeFile {
        path: String,
        kind: FileKind,
        /// Pool entry, created during initialize
        pointer: Option<crate::assembly::symbols::Pointer>,
    },
    Asm {
        items: Vec<AsmItem>,
    },
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub kind: StatementKind,
    pub range: SourceRange,
}

impl Statement {
    pub fn new(kind: StatementKind, range: SourceRange) -> Statement {
        Statement { kind, range }
    }
}

#[derive(Debug, Clone)]
pub enum StatementKind {
    Declaration {
        name: String,
        declared: Option<Type>,
        value: Option<Expression>,
        variable: Option<Rc<Variable>>,
    },
    Assignment {
        target: Expression,
        value: Expression,
    },
    Expression(Expression),
    If {
        condition: Expression,
        then_body: Vec<Statement>,
        else_body: Vec<Statement>,
    },
    While {
        condition: Expression,
        body: Vec<Statement>,
    },
    For {
        init: Option<Box<Statement>>,
        condition: Option<Expression>,
        step: Option<Box<Statement>>,
        body: Vec<Statement>,
    },
    Break,
    Continue,
    Return(Option<Expression>),
    Function {
        name: String,
        parameters: Vec<(String, Type)>,
        return_type: Type,
        body: Vec<Statement>,
        /// Index into the builder's function table
        function: Option<usize>,
    },
    Struct {
        name: String,
        /// (name, type, declared bit width)
        members: Vec<(String, Type, Option<u16>)>,
    },
    Import {
        path: String,
        body: Vec<Statement>,
    },
}
