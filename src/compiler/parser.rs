use std::str::FromStr;

use crate::assembly::instruction::Mnemonic;
use crate::compiler::ast::{
    AsmItem, AsmOperand, BinaryOp, Expression, ExpressionKind, FileKind, Statement, StatementKind,
    UnaryOp,
};
use crate::compiler::diagnostics::{Diagnostics, Message};
use crate::compiler::lexer::token::{Token, TokenKind};
use crate::compiler::lexer::Lexer;
use crate::compiler::source::SourceRange;
use crate::compiler::types::Type;

/// Recursive-descent parser with a two-token window.
///
/// Unlike a batch parser it does not stop at the first problem: every error
/// lands in the diagnostics and parsing resumes at the next statement
/// boundary, so one run reports as much as possible.
pub struct Parser<'a> {
    lexer: &'a mut Lexer,
    diagnostics: &'a mut Diagnostics,
    current: Token,
    peek: Token,
    /// Range of the most recently consumed token
    last_range: SourceRange,
}

impl<'a> Parser<'a> {
    pub fn new(lexer: &'a mut Lexer, diagnostics: &'a mut Diagnostics) -> Self {
        let mut parser = Self {
            lexer,
            diagnostics,
            current: Token::eof(),
            peek: Token::eof(),
            last_range: SourceRange::default(),
        };
        parser.advance();
        parser.advance();
        parser
    }

    fn advance(&mut self) {
        self.last_range = self.current.range;
        let next = loop {
            match self.lexer.next_token() {
                Ok(token) => break token,
                Err(error) => {
                    self.diagnostics.error(
                        SourceRange::at(error.position()),
                        Message::Parse(error.to_string()),
                    );
                }
            }
        };
        self.current = std::mem::replace(&mut self.peek, next);
    }

    fn current_is(&self, kind: &TokenKind) -> bool {
        self.current.kind == *kind
    }

    /// Consume the current token when it matches.
    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.current_is(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> bool {
        if self.eat(kind) {
            return true;
        }
        self.diagnostics.error(
            self.current.range,
            Message::Parse(format!("expected {}, found {}", kind, self.current.kind)),
        );
        false
    }

    fn unexpected(&mut self) {
        self.diagnostics.error(
            self.current.range,
            Message::Parse(format!("unexpected {}", self.current.kind)),
        );
    }

    /// Skip ahead to something that can plausibly start a statement.
    fn synchronize(&mut self) {
        loop {
            match self.current.kind {
                TokenKind::Eof => return,
                TokenKind::Semicolon | TokenKind::BraceRight => {
                    self.advance();
                    return;
                }
                _ => self.advance(),
            }
        }
    }

    #[tracing::instrument(skip(self))]
    pub fn parse_program(&mut self) -> Vec<Statement> {
        let mut statements = Vec::new();
        while !self.current_is(&TokenKind::Eof) {
            match self.parse_statement(true) {
                Some(statement) => statements.push(statement),
                None => self.synchronize(),
            }
        }
        statements
    }

    fn parse_statement(&mut self, top_level: bool) -> Option<Statement> {
        let statement = match &self.current.kind {
            TokenKind::Struct => self.parse_struct(),
            TokenKind::Import => self.parse_import(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Break => {
                let range = self.current.range;
                self.advance();
                Some(Statement::new(StatementKind::Break, range))
            }
            TokenKind::Continue => {
                let range = self.current.range;
                self.advance();
                Some(Statement::new(StatementKind::Continue, range))
            }
            _ => self.parse_simple_statement(top_level),
        }?;
        self.eat(&TokenKind::Semicolon);
        Some(statement)
    }

    /// Declarations, assignments and expression statements; the pieces a
    /// `for` header may also contain. Does not consume a trailing semicolon.
    fn parse_simple_statement(&mut self, top_level: bool) -> Option<Statement> {
        match (&self.current.kind, &self.peek.kind) {
            (TokenKind::Var, _) => self.parse_var_declaration(),
            (
                TokenKind::Int | TokenKind::Bool | TokenKind::CharType | TokenKind::Void,
                _,
            )
            | (TokenKind::Identifier(_), TokenKind::Identifier(_)) => {
                self.parse_typed_declaration(top_level)
            }
            _ => self.parse_expression_statement(),
        }
    }

    /// `var name = value`
    fn parse_var_declaration(&mut self) -> Option<Statement> {
        let start = self.current.range;
        self.advance();
        let name = self.parse_identifier()?;
        self.expect(&TokenKind::Assign);
        let value = self.parse_expression()?;
        Some(Statement::new(
            StatementKind::Declaration {
                name,
                declared: None,
                value: Some(value),
                variable: None,
            },
            start.to(self.last_range),
        ))
    }

    /// `<type> name …`: a function definition when `(` follows the name, a
    /// variable declaration otherwise.
    fn parse_typed_declaration(&mut self, top_level: bool) -> Option<Statement> {
        let start = self.current.range;
        let ty = self.parse_type()?;
        let name = self.parse_identifier()?;

        if self.current_is(&TokenKind::ParenLeft) {
            if !top_level {
                self.diagnostics.error(
                    start,
                    Message::Parse("functions can only be defined at the top level".to_string()),
                );
            }
            return self.parse_function(ty, name, start);
        }

        let value = if self.eat(&TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        Some(Statement::new(
            StatementKind::Declaration {
                name,
                declared: Some(ty),
                value,
                variable: None,
            },
            start.to(self.last_range),
        ))
    }

    fn parse_function(&mut self, return_type: Type, name: String, start: SourceRange) -> Option<Statement> {
        self.expect(&TokenKind::ParenLeft);
        let mut parameters = Vec::new();
        while !self.current_is(&TokenKind::ParenRight) && !self.current_is(&TokenKind::Eof) {
            let ty = self.parse_type()?;
            let parameter = self.parse_identifier()?;
            parameters.push((parameter, ty));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::ParenRight);
        let body = self.parse_block()?;
        Some(Statement::new(
            StatementKind::Function {
                name,
                parameters,
                return_type,
                body,
                function: None,
            },
            start.to(self.last_range),
        ))
    }

    /// `struct Name { <type> field [: bits] … }`
    fn parse_struct(&mut self) -> Option<Statement> {
        let start = self.current.range;
        self.advance();
        let name = self.parse_identifier()?;
        self.expect(&TokenKind::BraceLeft);
        let mut members = Vec::new();
        while !self.current_is(&TokenKind::BraceRight) && !self.current_is(&TokenKind::Eof) {
            let ty = self.parse_type()?;
            let member = self.parse_identifier()?;
            let bits = if self.eat(&TokenKind::Colon) {
                match self.current.kind.clone() {
                    TokenKind::Integer(width) if width >= 0 => {
                        self.advance();
                        Some(width as u16)
                    }
                    _ => {
                        self.unexpected();
                        None
                    }
                }
            } else {
                None
            };
            members.push((member, ty, bits));
            self.eat(&TokenKind::Semicolon);
        }
        self.expect(&TokenKind::BraceRight);
        Some(Statement::new(
            StatementKind::Struct { name, members },
            start.to(self.last_range),
        ))
    }

    /// `import "path"`; the compiler driver inlines the file's statements.
    fn parse_import(&mut self) -> Option<Statement> {
        let start = self.current.range;
        self.advance();
        match self.current.kind.clone() {
            TokenKind::Str(path) => {
                self.advance();
                Some(Statement::new(
                    StatementKind::Import {
                        path,
                        body: Vec::new(),
                    },
                    start.to(self.last_range),
                ))
            }
            _ => {
                self.unexpected();
                None
            }
        }
    }

    fn parse_if(&mut self) -> Option<Statement> {
        let start = self.current.range;
        self.advance();
        self.expect(&TokenKind::ParenLeft);
        let condition = self.parse_expression()?;
        self.expect(&TokenKind::ParenRight);
        let then_body = self.parse_block_or_single()?;
        let else_body = if self.eat(&TokenKind::Else) {
            if self.current_is(&TokenKind::If) {
                vec![self.parse_if()?]
            } else {
                self.parse_block_or_single()?
            }
        } else {
            Vec::new()
        };
        Some(Statement::new(
            StatementKind::If {
                condition,
                then_body,
                else_body,
            },
            start.to(self.last_range),
        ))
    }

    fn parse_while(&mut self) -> Option<Statement> {
        let start = self.current.range;
        self.advance();
        self.expect(&TokenKind::ParenLeft);
        let condition = self.parse_expression()?;
        self.expect(&TokenKind::ParenRight);
        let body = self.parse_block_or_single()?;
        Some(Statement::new(
            StatementKind::While { condition, body },
            start.to(self.last_range),
        ))
    }

    /// `for (init; condition; step) body`, every header piece optional.
    fn parse_for(&mut self) -> Option<Statement> {
        let start = self.current.range;
        self.advance();
        self.expect(&TokenKind::ParenLeft);

        let init = if self.current_is(&TokenKind::Semicolon) {
            None
        } else {
            Some(Box::new(self.parse_simple_statement(false)?))
        };
        self.expect(&TokenKind::Semicolon);

        let condition = if self.current_is(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(&TokenKind::Semicolon);

        let step = if self.current_is(&TokenKind::ParenRight) {
            None
        } else {
            Some(Box::new(self.parse_simple_statement(false)?))
        };
        self.expect(&TokenKind::ParenRight);

        let body = self.parse_block_or_single()?;
        Some(Statement::new(
            StatementKind::For {
                init,
                condition,
                step,
                body,
            },
            start.to(self.last_range),
        ))
    }

    /// `return`, with a value when one starts on the same line.
    fn parse_return(&mut self) -> Option<Statement> {
        let start = self.current.range;
        self.advance();
        let same_line = self.current.range.start.line == start.start.line;
        let value = if same_line && self.starts_expression() {
            Some(self.parse_expression()?)
        } else {
            None
        };
        Some(Statement::new(
            StatementKind::Return(value),
            start.to(self.last_range),
        ))
    }

    fn starts_expression(&self) -> bool {
        matches!(
            self.current.kind,
            TokenKind::Identifier(_)
                | TokenKind::Integer(_)
                | TokenKind::Str(_)
                | TokenKind::Char(_)
                | TokenKind::True
                | TokenKind::False
                | TokenKind::ParenLeft
                | TokenKind::BraceLeft
                | TokenKind::Bang
                | TokenKind::Minus
                | TokenKind::Ref
                | TokenKind::Asm
                | TokenKind::SizeOf
                | TokenKind::CreatePointer
                | TokenKind::IncludeBytes
                | TokenKind::IncludeImage
        )
    }

    /// Expression-led statements: assignment (plain or compound), postfix
    /// increment, or a bare expression evaluated for effect.
    fn parse_expression_statement(&mut self) -> Option<Statement> {
        let start = self.current.range;
        let target = self.parse_expression()?;

        let op = match self.current.kind {
            TokenKind::Assign => None,
            TokenKind::PlusAssign => Some(BinaryOp::Add),
            TokenKind::MinusAssign => Some(BinaryOp::Sub),
            TokenKind::StarAssign => Some(BinaryOp::Mul),
            TokenKind::SlashAssign => Some(BinaryOp::Div),
            TokenKind::AmpAssign => Some(BinaryOp::And),
            TokenKind::PipeAssign => Some(BinaryOp::Or),
            TokenKind::CaretAssign => Some(BinaryOp::Xor),
            TokenKind::ShlAssign => Some(BinaryOp::Shl),
            TokenKind::ShrAssign => Some(BinaryOp::Shr),
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let op = if self.current_is(&TokenKind::PlusPlus) {
                    BinaryOp::Add
                } else {
                    BinaryOp::Sub
                };
                self.advance();
                let range = start.to(self.last_range);
                let one = Expression::new(ExpressionKind::Integer(1), range);
                let value = Expression::new(
                    ExpressionKind::Binary {
                        op,
                        lhs: Box::new(target.clone()),
                        rhs: Box::new(one),
                    },
                    range,
                );
                return Some(Statement::new(
                    StatementKind::Assignment { target, value },
                    range,
                ));
            }
            _ => {
                return Some(Statement::new(
                    StatementKind::Expression(target),
                    start.to(self.last_range),
                ));
            }
        };

        self.advance();
        let value = self.parse_expression()?;
        let range = start.to(self.last_range);
        let value = match op {
            // Compound assignment reads the target, applies the operator,
            // stores back.
            Some(op) => Expression::new(
                ExpressionKind::Binary {
                    op,
                    lhs: Box::new(target.clone()),
                    rhs: Box::new(value),
                },
                range,
            ),
            None => value,
        };
        Some(Statement::new(
            StatementKind::Assignment { target, value },
            range,
        ))
    }

    fn parse_block(&mut self) -> Option<Vec<Statement>> {
        self.expect(&TokenKind::BraceLeft);
        let mut statements = Vec::new();
        while !self.current_is(&TokenKind::BraceRight) && !self.current_is(&TokenKind::Eof) {
            match self.parse_statement(false) {
                Some(statement) => statements.push(statement),
                None => self.synchronize(),
            }
        }
        self.expect(&TokenKind::BraceRight);
        Some(statements)
    }

    fn parse_block_or_single(&mut self) -> Option<Vec<Statement>> {
        if self.current_is(&TokenKind::BraceLeft) {
            self.parse_block()
        } else {
            Some(vec![self.parse_statement(false)?])
        }
    }

    fn parse_identifier(&mut self) -> Option<String> {
        match self.current.kind.clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Some(name)
            }
            _ => {
                self.unexpected();
                None
            }
        }
    }

    /// `int`, `bool`, `char`, `void`, a struct name, or any of those with
    /// `[]` (pointer) and `[N]` (fixed array) suffixes.
    fn parse_type(&mut self) -> Option<Type> {
        let mut ty = match self.current.kind.clone() {
            TokenKind::Int => Type::Int,
            TokenKind::Bool => Type::Bool,
            TokenKind::CharType => Type::Char,
            TokenKind::Void => Type::Void,
            TokenKind::Identifier(name) => Type::Named(name),
            _ => {
                self.unexpected();
                return None;
            }
        };
        self.advance();

        while self.current_is(&TokenKind::BracketLeft) {
            match self.peek.kind.clone() {
                TokenKind::BracketRight => {
                    self.advance();
                    self.advance();
                    ty = Type::pointer_to(ty, 0);
                }
                TokenKind::Integer(length) if length >= 0 => {
                    self.advance();
                    self.advance();
                    self.expect(&TokenKind::BracketRight);
                    ty = Type::Array {
                        element: Box::new(ty),
                        length: length as u16,
                    };
                }
                _ => break,
            }
        }
        Some(ty)
    }

    // --- Expressions ---

    pub fn parse_expression(&mut self) -> Option<Expression> {
        self.parse_binary(0)
    }

    /// Binding power of the operator the current token stands for.
    fn binary_op(&self) -> Option<(BinaryOp, u8)> {
        let entry = match self.current.kind {
            TokenKind::OrOr => (BinaryOp::LogicalOr, 1),
            TokenKind::AndAnd => (BinaryOp::LogicalAnd, 2),
            TokenKind::Pipe => (BinaryOp::Or, 3),
            TokenKind::Caret => (BinaryOp::Xor, 4),
            TokenKind::Amp => (BinaryOp::And, 5),
            TokenKind::Eq => (BinaryOp::Eq, 6),
            TokenKind::Ne => (BinaryOp::Ne, 6),
            TokenKind::Lt => (BinaryOp::Lt, 7),
            TokenKind::Le => (BinaryOp::Le, 7),
            TokenKind::Gt => (BinaryOp::Gt, 7),
            TokenKind::Ge => (BinaryOp::Ge, 7),
            TokenKind::Shl => (BinaryOp::Shl, 8),
            TokenKind::Shr => (BinaryOp::Shr, 8),
            TokenKind::Plus => (BinaryOp::Add, 9),
            TokenKind::Minus => (BinaryOp::Sub, 9),
            TokenKind::Star => (BinaryOp::Mul, 10),
            TokenKind::Slash => (BinaryOp::Div, 10),
            TokenKind::Percent => (BinaryOp::Mod, 10),
            _ => return None,
        };
        Some(entry)
    }

    fn parse_binary(&mut self, min_power: u8) -> Option<Expression> {
        let mut lhs = self.parse_unary()?;
        while let Some((op, power)) = self.binary_op() {
            if power < min_power {
                break;
            }
            self.advance();
            let rhs = self.parse_binary(power + 1)?;
            let range = lhs.range.to(rhs.range);
            lhs = Expression::new(
                ExpressionKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                range,
            );
        }
        Some(lhs)
    }

    fn parse_unary(&mut self) -> Option<Expression> {
        let start = self.current.range;
        let op = match self.current.kind {
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Minus => Some(UnaryOp::Negate),
            TokenKind::Ref => Some(UnaryOp::Ref),
            _ => None,
        };
        match op {
            Some(op) => {
                self.advance();
                let expr = self.parse_unary()?;
                let range = start.to(expr.range);
                Some(Expression::new(
                    ExpressionKind::Unary {
                        op,
                        expr: Box::new(expr),
                    },
                    range,
                ))
            }
            None => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Option<Expression> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&TokenKind::BracketLeft) {
                let index = self.parse_expression()?;
                self.expect(&TokenKind::BracketRight);
                let range = expr.range.to(self.last_range);
                expr = Expression::new(
                    ExpressionKind::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    },
                    range,
                );
            } else if self.eat(&TokenKind::Dot) {
                let field = self.parse_identifier()?;
                let range = expr.range.to(self.last_range);
                expr = Expression::new(
                    ExpressionKind::Member {
                        target: Box::new(expr),
                        field,
                        resolved: None,
                    },
                    range,
                );
            } else {
                return Some(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Option<Expression> {
        let start = self.current.range;
        match self.current.kind.clone() {
            TokenKind::Integer(value) => {
                self.advance();
                Some(Expression::new(ExpressionKind::Integer(value), start))
            }
            TokenKind::True => {
                self.advance();
                Some(Expression::new(ExpressionKind::Bool(true), start))
            }
            TokenKind::False => {
                self.advance();
                Some(Expression::new(ExpressionKind::Bool(false), start))
            }
            TokenKind::Char(c) => {
                self.advance();
                Some(Expression::new(ExpressionKind::Char(c), start))
            }
            TokenKind::Str(text) => {
                self.advance();
                Some(Expression::new(ExpressionKind::Str(text), start))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                if self.current_is(&TokenKind::ParenLeft) {
                    let args = self.parse_arguments()?;
                    Some(Expression::new(
                        ExpressionKind::Call {
                            name,
                            args,
                            function: None,
                        },
                        start.to(self.last_range),
                    ))
                } else {
                    Some(Expression::new(
                        ExpressionKind::Identifier {
                            name,
                            variable: None,
                        },
                        start,
                    ))
                }
            }
            TokenKind::ParenLeft => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(&TokenKind::ParenRight);
                Some(expr)
            }
            TokenKind::BraceLeft => self.parse_struct_init(),
            TokenKind::SizeOf => {
                self.advance();
                self.expect(&TokenKind::ParenLeft);
                let inner = self.parse_expression()?;
                self.expect(&TokenKind::ParenRight);
                Some(Expression::new(
                    ExpressionKind::SizeOf(Box::new(inner)),
                    start.to(self.last_range),
                ))
            }
            TokenKind::CreatePointer => {
                self.advance();
                self.expect(&TokenKind::ParenLeft);
                let address = self.parse_expression()?;
                let bank = if self.eat(&TokenKind::Comma) {
                    self.parse_expression()?
                } else {
                    Expression::new(ExpressionKind::Integer(0), start)
                };
                self.expect(&TokenKind::ParenRight);
                Some(Expression::new(
                    ExpressionKind::CreatePointer {
                        address: Box::new(address),
                        bank: Box::new(bank),
                        pointer: None,
                    },
                    start.to(self.last_range),
                ))
            }
            TokenKind::IncludeBytes | TokenKind::IncludeImage => {
                let kind = if self.current_is(&TokenKind::IncludeBytes) {
                    FileKind::Bytes
                } else {
                    FileKind::Image
                };
                self.advance();
                self.expect(&TokenKind::ParenLeft);
                let path = match self.current.kind.clone() {
                    TokenKind::Str(path) => {
                        self.advance();
                        path
                    }
                    _ => {
                        self.unexpected();
                        return None;
                    }
                };
                self.expect(&TokenKind::ParenRight);
                Some(Expression::new(
                    ExpressionKind::IncludeFile {
                        path,
                        kind,
                        pointer: None,
                    },
                    start.to(self.last_range),
                ))
            }
            TokenKind::Asm => self.parse_asm(),
            _ => {
                self.unexpected();
                None
            }
        }
    }

    fn parse_arguments(&mut self) -> Option<Vec<Expression>> {
        self.expect(&TokenKind::ParenLeft);
        let mut args = Vec::new();
        while !self.current_is(&TokenKind::ParenRight) && !self.current_is(&TokenKind::Eof) {
            args.push(self.parse_expression()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::ParenRight);
        Some(args)
    }

    /// `{ field: value, … }`
    fn parse_struct_init(&mut self) -> Option<Expression> {
        let start = self.current.range;
        self.expect(&TokenKind::BraceLeft);
        let mut fields = Vec::new();
        while !self.current_is(&TokenKind::BraceRight) && !self.current_is(&TokenKind::Eof) {
            let name = self.parse_identifier()?;
            self.expect(&TokenKind::Colon);
            let value = self.parse_expression()?;
            fields.push((name, value));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::BraceRight);
        Some(Expression::new(
            ExpressionKind::StructInit {
                fields,
                layout: None,
            },
            start.to(self.last_range),
        ))
    }

    /// `asm { MNEMONIC [operand] … }` with local labels. An identifier line
    /// followed by `:` defines a label; an identifier operand that is not a
    /// known mnemonic references one.
    fn parse_asm(&mut self) -> Option<Expression> {
        let start = self.current.range;
        self.advance();
        self.expect(&TokenKind::BraceLeft);
        let mut items = Vec::new();

        while !self.current_is(&TokenKind::BraceRight) && !self.current_is(&TokenKind::Eof) {
            let item_range = self.current.range;
            let word = match self.current.kind.clone() {
                TokenKind::Identifier(word) => word,
                _ => {
                    self.unexpected();
                    self.advance();
                    continue;
                }
            };

            if self.peek.kind == TokenKind::Colon {
                self.advance();
                self.advance();
                items.push(AsmItem::Label(word));
                continue;
            }
            self.advance();

            let operand = match self.current.kind.clone() {
                TokenKind::Integer(value) => {
                    self.advance();
                    Some(AsmOperand::Int(value))
                }
                TokenKind::At => {
                    self.advance();
                    let name = self.parse_identifier()?;
                    Some(AsmOperand::Variable {
                        name,
                        variable: None,
                    })
                }
                TokenKind::Identifier(name)
                    if Mnemonic::from_str(&name).is_err() && self.peek.kind != TokenKind::Colon =>
                {
                    self.advance();
                    Some(AsmOperand::LabelRef(name))
                }
                _ => None,
            };
            items.push(AsmItem::Instruction {
                mnemonic: word,
                resolved: None,
                operand,
                range: item_range,
            });
            self.eat(&TokenKind::Semicolon);
        }

        self.expect(&TokenKind::BraceRight);
        Some(Expression::new(
            ExpressionKind::Asm { items },
            start.to(self.last_range),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> (Vec<Statement>, Diagnostics) {
        let mut diagnostics = Diagnostics::new();
        let mut lexer = Lexer::new(input);
        let program = Parser::new(&mut lexer, &mut diagnostics).parse_program();
        (program, diagnostics)
    }

    fn parse_clean(input: &str) -> Vec<Statement> {
        let (program, diagnostics) = parse(input);
        assert!(diagnostics.is_empty(), "unexpected: {}", diagnostics);
        program
    }

    #[test]
    fn test_var_declaration() {
        let program = parse_clean("var a = 2;");
        assert_eq!(program.len(), 1);
        match &program[0].kind {
            StatementKind::Declaration { name, declared, value, .. } => {
                assert_eq!(name, "a");
                assert!(declared.is_none());
                assert!(matches!(
                    value.as_ref().unwrap().kind,
                    ExpressionKind::Integer(2)
                ));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_typed_declarations() {
        let program = parse_clean("int x = 1\nint[5] buffer\nint[] view = 0");
        assert_eq!(program.len(), 3);
        match &program[1].kind {
            StatementKind::Declaration { declared, value, .. } => {
                assert_eq!(
                    declared.clone().unwrap(),
                    Type::Array {
                        element: Box::new(Type::Int),
                        length: 5
                    }
                );
                assert!(value.is_none());
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        let program = parse_clean("var x = 1 + 2 * 3 == 7;");
        match &program[0].kind {
            StatementKind::Declaration { value, .. } => {
                let ExpressionKind::Binary { op, lhs, .. } = &value.as_ref().unwrap().kind else {
                    panic!("expected a binary expression");
                };
                assert_eq!(*op, BinaryOp::Eq);
                let ExpressionKind::Binary { op, rhs, .. } = &lhs.kind else {
                    panic!("expected nested addition");
                };
                assert_eq!(*op, BinaryOp::Add);
                assert!(matches!(
                    rhs.kind,
                    ExpressionKind::Binary {
                        op: BinaryOp::Mul,
                        ..
                    }
                ));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_compound_assignment_desugars() {
        let program = parse_clean("a -= 2;");
        match &program[0].kind {
            StatementKind::Assignment { value, .. } => {
                assert!(matches!(
                    value.kind,
                    ExpressionKind::Binary {
                        op: BinaryOp::Sub,
                        ..
                    }
                ));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_postfix_increment_desugars() {
        let program = parse_clean("v++;");
        match &program[0].kind {
            StatementKind::Assignment { value, .. } => {
                assert!(matches!(
                    value.kind,
                    ExpressionKind::Binary {
                        op: BinaryOp::Add,
                        ..
                    }
                ));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_function_definition() {
        let program = parse_clean("void f(int x, int[] data) { x = 1 }");
        match &program[0].kind {
            StatementKind::Function {
                name,
                parameters,
                return_type,
                body,
                ..
            } => {
                assert_eq!(name, "f");
                assert_eq!(parameters.len(), 2);
                assert_eq!(parameters[1].1, Type::pointer_to(Type::Int, 0));
                assert_eq!(*return_type, Type::Void);
                assert_eq!(body.len(), 1);
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_if_else_chain() {
        let program = parse_clean("if (a) { } else if (b) { } else { c = 1 }");
        match &program[0].kind {
            StatementKind::If { else_body, .. } => {
                assert_eq!(else_body.len(), 1);
                assert!(matches!(else_body[0].kind, StatementKind::If { .. }));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_for_loop_header() {
        let program = parse_clean("for (; v < 10; v++) { v += 1 }");
        match &program[0].kind {
            StatementKind::For {
                init,
                condition,
                step,
                body,
            } => {
                assert!(init.is_none());
                assert!(condition.is_some());
                assert!(step.is_some());
                assert_eq!(body.len(), 1);
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_asm_block() {
        let program = parse_clean("void inc(int amount) { asm { AIN @r\nBIN @amount\nADD\nSTA @r } }");
        let StatementKind::Function { body, .. } = &program[0].kind else {
            panic!("expected a function");
        };
        let StatementKind::Expression(expr) = &body[0].kind else {
            panic!("expected an expression statement");
        };
        let ExpressionKind::Asm { items } = &expr.kind else {
            panic!("expected an asm block");
        };
        assert_eq!(items.len(), 4);
        assert!(matches!(
            &items[0],
            AsmItem::Instruction {
                operand: Some(AsmOperand::Variable { .. }),
                ..
            }
        ));
        assert!(matches!(
            &items[2],
            AsmItem::Instruction { operand: None, .. }
        ));
    }

    #[test]
    fn test_asm_labels() {
        let program = parse_clean("asm { top:\nADD\nJMP top }");
        let StatementKind::Expression(expr) = &program[0].kind else {
            panic!("expected an expression statement");
        };
        let ExpressionKind::Asm { items } = &expr.kind else {
            panic!("expected an asm block");
        };
        assert!(matches!(&items[0], AsmItem::Label(name) if name == "top"));
        assert!(matches!(
            &items[2],
            AsmItem::Instruction {
                operand: Some(AsmOperand::LabelRef(name)),
                ..
            } if name == "top"
        ));
    }

    #[test]
    fn test_struct_with_bitfields() {
        let program = parse_clean("struct Flags { int live : 1; int kind : 3\nint word }");
        match &program[0].kind {
            StatementKind::Struct { name, members } => {
                assert_eq!(name, "Flags");
                assert_eq!(members.len(), 3);
                assert_eq!(members[0].2, Some(1));
                assert_eq!(members[2].2, None);
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_error_recovery_keeps_going() {
        let (program, diagnostics) = parse("var = ;\nvar ok = 1;");
        assert!(diagnostics.has_errors());
        assert!(program
            .iter()
            .any(|s| matches!(&s.kind, StatementKind::Declaration { name, .. } if name == "ok")));
    }

    #[test]
    fn test_create_pointer_defaults_bank() {
        let program = parse_clean("var p = create_pointer(0xD26F, 1);");
        match &program[0].kind {
            StatementKind::Declaration { value, .. } => {
                assert!(matches!(
                    value.as_ref().unwrap().kind,
                    ExpressionKind::CreatePointer { .. }
                ));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }
}
