use std::collections::HashMap;

use crate::assembly::instruction::Mnemonic;
use crate::assembly::symbols::{Label, SymbolRef};
use crate::charset::CHARSET;
use crate::compiler::ast::{
    AsmItem, AsmOperand, BinaryOp, Expression, ExpressionKind, UnaryOp,
};
use crate::compiler::builder::Builder;
use crate::compiler::diagnostics::Message;
use crate::compiler::types::{BitField, Type};

/// Truncate a folded value to the machine's word.
pub(crate) fn wrap16(value: i32) -> u16 {
    value as u16
}

/// Canonical signed interpretation of a folded 16-bit result.
fn fold_wrap(value: i64) -> i32 {
    ((value & 0xFFFF) as u16) as i16 as i32
}

/// What a comparison inspects after the operand difference is computed.
enum CompareTest {
    CarrySet,
    CarryClear,
    Zero,
    NotZero,
}

impl Expression {
    /// Resolve names, infer the type and register usages. `suggested` is the
    /// type the surrounding context expects, used where the expression has no
    /// type of its own (struct initializers, assembly blocks, pointers).
    pub fn initialize(&mut self, b: &mut Builder, suggested: Option<&Type>) {
        let range = self.range;
        match &mut self.kind {
            ExpressionKind::Integer(_) => self.ty = Type::Int,
            ExpressionKind::Bool(_) => self.ty = Type::Bool,
            ExpressionKind::Char(c) => {
                if CHARSET.encode(*c).is_none() {
                    b.error(range, Message::BadCharacter(*c));
                }
                self.ty = Type::Char;
            }
            ExpressionKind::Str(text) => {
                for c in text.clone().chars() {
                    if CHARSET.encode(c).is_none() {
                        b.error(range, Message::BadCharacter(c));
                    }
                }
                self.ty = Type::pointer_to(Type::Char, 0);
            }
            ExpressionKind::Identifier { name, variable } => {
                match b.lookup_variable(name) {
                    Some(found) => {
                        found.register_usage();
                        self.ty = found.ty().clone();
                        *variable = Some(found);
                    }
                    None => {
                        let name = name.clone();
                        b.error(range, Message::UnknownVariable(name));
                        self.ty = Type::Unknown;
                    }
                }
            }
            ExpressionKind::Binary { op, lhs, rhs } => {
                let op = *op;
                lhs.initialize(b, None);
                rhs.initialize(b, None);
                for side in [&*lhs, &*rhs] {
                    let numeric =
                        side.ty.is_numeric() || matches!(side.ty, Type::Pointer { .. });
                    if !numeric {
                        b.error(
                            side.range,
                            Message::TypeMismatch {
                                expected: "a numeric value".to_string(),
                                found: side.ty.to_string(),
                            },
                        );
                    }
                }
                self.ty = if op.is_comparison() || op.is_logical() {
                    Type::Bool
                } else if matches!(lhs.ty, Type::Pointer { .. }) {
                    lhs.ty.clone()
                } else {
                    Type::Int
                };
            }
            ExpressionKind::Unary { op, expr } => {
                let op = *op;
                expr.initialize(b, None);
                self.ty = match op {
                    UnaryOp::Not => Type::Bool,
                    UnaryOp::Negate => Type::Int,
                    UnaryOp::Ref => {
                        if !expr.is_lvalue() {
                            b.error(range, Message::Unsupported("`ref` of a non-l-value"));
                        }
                        Type::Reference(Box::new(expr.ty.clone()))
                    }
                };
            }
            ExpressionKind::Call {
                name,
                args,
                function,
            } => {
                match b.find_function(name) {
                    Some(index) => {
                        *function = Some(index);
                        b.functions[index].references += 1;
                        let parameter_types: Vec<Type> = b.functions[index]
                            .parameter_types
                            .iter()
                            .map(|(_, ty)| ty.clone())
                            .collect();
                        if parameter_types.len() != args.len() {
                            let message = Message::ArgumentCount(
                                name.clone(),
                                parameter_types.len(),
                                args.len(),
                            );
                            b.error(range, message);
                        }
                        self.ty = b.functions[index].return_type.clone();
                        for (index, arg) in args.iter_mut().enumerate() {
                            let expected = parameter_types.get(index).cloned();
                            arg.initialize(b, expected.as_ref());
                            if let Some(expected) = expected {
                                if !expected.accepts(&arg.ty) {
                                    b.error(
                                        arg.range,
                                        Message::TypeMismatch {
                                            expected: expected.to_string(),
                                            found: arg.ty.to_string(),
                                        },
                                    );
                                }
                            }
                        }
                    }
                    None => {
                        b.error(range, Message::UnknownFunction(name.clone()));
                        for arg in args.iter_mut() {
                            arg.initialize(b, None);
                        }
                        self.ty = Type::Unknown;
                    }
                }
            }
            ExpressionKind::Index { target, index } => {
                target.initialize(b, None);
                index.initialize(b, Some(&Type::Int));
                if !index.ty.is_numeric() {
                    b.error(
                        index.range,
                        Message::TypeMismatch {
                            expected: "an integer index".to_string(),
                            found: index.ty.to_string(),
                        },
                    );
                }
                self.ty = match target.ty.element() {
                    Some(element) => element.clone(),
                    None => {
                        if target.ty != Type::Unknown {
                            b.error(target.range, Message::NotIndexable);
                        }
                        Type::Unknown
                    }
                };
            }
            ExpressionKind::Member {
                target,
                field,
                resolved,
            } => {
                target.initialize(b, None);
                match &target.ty {
                    Type::Struct(layout) => match layout.field(field) {
                        Some(found) => {
                            *resolved = Some((found.offset, found.ty.clone(), found.bits));
                            self.ty = found.ty.clone();
                        }
                        None => {
                            let message =
                                Message::UnknownField(layout.name.clone(), field.clone());
                            b.error(range, message);
                            self.ty = Type::Unknown;
                        }
                    },
                    Type::Unknown => self.ty = Type::Unknown,
                    other => {
                        let found = other.to_string();
                        b.error(
                            target.range,
                            Message::TypeMismatch {
                                expected: "a struct value".to_string(),
                                found,
                            },
                        );
                        self.ty = Type::Unknown;
                    }
                }
            }
            ExpressionKind::StructInit { fields, layout } => {
                let expected = match suggested {
                    Some(Type::Struct(found)) => Some(found.clone()),
                    _ => None,
                };
                match expected {
                    Some(found) => {
                        for (name, value) in fields.iter_mut() {
                            match found.field(name) {
                                Some(field) => {
                                    let field_ty = field.ty.clone();
                                    value.initialize(b, Some(&field_ty));
                                }
                                None => {
                                    let message = Message::UnknownField(
                                        found.name.clone(),
                                        name.clone(),
                                    );
                                    b.error(value.range, message);
                                    value.initialize(b, None);
                                }
                            }
                        }
                        self.ty = Type::Struct(found.clone());
                        *layout = Some(found);
                    }
                    None => {
                        b.error(
                            range,
                            Message::Unsupported("struct initializer outside a struct context"),
                        );
                        for (_, value) in fields.iter_mut() {
                            value.initialize(b, None);
                        }
                    }
                }
            }
            ExpressionKind::SizeOf(inner) => {
                inner.initialize(b, None);
                self.ty = Type::Int;
            }
            ExpressionKind::CreatePointer {
                address,
                bank,
                pointer,
            } => {
                address.initialize(b, Some(&Type::Int));
                bank.initialize(b, Some(&Type::Int));
                let bank_value = match bank.const_value() {
                    Some(value) if (0..=255).contains(&value) => value as u8,
                    _ => {
                        b.error(range, Message::Unsupported("bank must be a small constant"));
                        0
                    }
                };
                match address.const_value() {
                    Some(value) => {
                        let fixed =
                            b.symbols
                                .create_fixed_pointer(None, wrap16(value), bank_value);
                        *pointer = Some(fixed);
                    }
                    None => b.error(range, Message::NonConstantPointer),
                }
                let element = suggested
                    .and_then(Type::element)
                    .cloned()
                    .unwrap_or(Type::Int);
                self.ty = Type::pointer_to(element, bank_value);
            }
            ExpressionKind::IncludeFile {
                path,
                kind,
                pointer,
            } => {
                let (path, kind) = (path.clone(), *kind);
                *pointer = Some(b.include_file(&path, kind, range));
                self.ty = Type::pointer_to(Type::Int, 0);
            }
            ExpressionKind::Asm { items } => {
                let mut labels: Vec<&str> = Vec::new();
                for item in items.iter() {
                    if let AsmItem::Label(name) = item {
                        if labels.contains(&name.as_str()) {
                            b.error(range, Message::DuplicateDeclaration(name.clone()));
                        }
                        labels.push(name.as_str());
                    }
                }
                let labels: Vec<String> = labels.into_iter().map(str::to_string).collect();

                for item in items.iter_mut() {
                    let AsmItem::Instruction {
                        mnemonic,
                        resolved,
                        operand,
                        range: item_range,
                    } = item
                    else {
                        continue;
                    };
                    match mnemonic.parse::<Mnemonic>() {
                        Ok(found) => *resolved = Some(found),
                        Err(_) => {
                            let message = Message::UnknownMnemonic(mnemonic.clone());
                            b.error(*item_range, message);
                        }
                    }
                    match operand {
                        Some(AsmOperand::Variable { name, variable }) => {
                            match b.lookup_variable(name) {
                                Some(found) => {
                                    found.register_usage();
                                    *variable = Some(found);
                                }
                                None => {
                                    let message = Message::UnknownVariable(name.clone());
                                    b.error(*item_range, message);
                                }
                            }
                        }
                        Some(AsmOperand::LabelRef(name)) => {
                            if !labels.iter().any(|label| label == name) {
                                let message = Message::UnknownAsmLabel(name.clone());
                                b.error(*item_range, message);
                            }
                        }
                        _ => (),
                    }
                }
                self.ty = suggested.cloned().unwrap_or(Type::Unknown);
            }
        }
    }

    /// The value this expression folds to at compile time, if any.
    pub fn const_value(&self) -> Option<i32> {
        match &self.kind {
            ExpressionKind::Integer(value) => Some(*value),
            ExpressionKind::Bool(value) => Some(*value as i32),
            ExpressionKind::Char(c) => CHARSET.encode(*c).map(|code| code as i32),
            ExpressionKind::SizeOf(inner) => match inner.ty {
                Type::Unknown | Type::Named(_) => None,
                ref ty => Some(ty.size() as i32),
            },
            ExpressionKind::Identifier { variable, .. } => {
                variable.as_ref().and_then(|v| v.constant_value())
            }
            ExpressionKind::Unary { op, expr } => {
                let value = expr.const_value()? as i64;
                match op {
                    UnaryOp::Not => Some((value == 0) as i32),
                    UnaryOp::Negate => Some(fold_wrap(-value)),
                    UnaryOp::Ref => None,
                }
            }
            ExpressionKind::Binary { op, lhs, rhs } => {
                let l = lhs.const_value()?;
                let r = rhs.const_value()?;
                let (lu, ru) = (wrap16(l) as i64, wrap16(r) as i64);
                let (ls, rs) = (fold_wrap(l as i64), fold_wrap(r as i64));
                let value = match op {
                    BinaryOp::Add => lu + ru,
                    BinaryOp::Sub => lu - ru,
                    BinaryOp::Mul => lu * ru,
                    BinaryOp::Div => {
                        if ru == 0 {
                            return None;
                        }
                        lu / ru
                    }
                    BinaryOp::Mod => {
                        if ru == 0 {
                            return None;
                        }
                        lu % ru
                    }
                    BinaryOp::And => lu & ru,
                    BinaryOp::Or => lu | ru,
                    BinaryOp::Xor => lu ^ ru,
                    BinaryOp::Shl => {
                        if ru >= 16 {
                            0
                        } else {
                            lu << ru
                        }
                    }
                    BinaryOp::Shr => {
                        if ru >= 16 {
                            0
                        } else {
                            lu >> ru
                        }
                    }
                    BinaryOp::Eq => (lu == ru) as i64,
                    BinaryOp::Ne => (lu != ru) as i64,
                    BinaryOp::Lt => (ls < rs) as i64,
                    BinaryOp::Le => (ls <= rs) as i64,
                    BinaryOp::Gt => (ls > rs) as i64,
                    BinaryOp::Ge => (ls >= rs) as i64,
                    BinaryOp::LogicalAnd => (lu != 0 && ru != 0) as i64,
                    BinaryOp::LogicalOr => (lu != 0 || ru != 0) as i64,
                };
                Some(fold_wrap(value))
            }
            _ => None,
        }
    }

    /// Rewrite the expression into a simpler equivalent: constant folding
    /// plus a few algebraic identities.
    pub fn optimize(&mut self) {
        match &mut self.kind {
            ExpressionKind::Binary { lhs, rhs, .. } => {
                lhs.optimize();
                rhs.optimize();
            }
            ExpressionKind::Unary { expr, .. } => expr.optimize(),
            ExpressionKind::Call { args, .. } => {
                for arg in args {
                    arg.optimize();
                }
            }
            ExpressionKind::Index { target, index } => {
                target.optimize();
                index.optimize();
            }
            ExpressionKind::Member { target, .. } => target.optimize(),
            ExpressionKind::StructInit { fields, .. } => {
                for (_, value) in fields {
                    value.optimize();
                }
            }
            ExpressionKind::SizeOf(inner) => inner.optimize(),
            _ => (),
        }

        let foldable = matches!(
            self.kind,
            ExpressionKind::Binary { .. }
                | ExpressionKind::Unary { .. }
                | ExpressionKind::Identifier { .. }
                | ExpressionKind::SizeOf(_)
        );
        if foldable {
            if let Some(value) = self.const_value() {
                self.kind = ExpressionKind::Integer(value);
                return;
            }
        }

        if let ExpressionKind::Binary { op, lhs, rhs } = &self.kind {
            let op = *op;
            let lhs_const = lhs.const_value();
            let rhs_const = rhs.const_value();
            let keep_lhs = matches!(
                (op, rhs_const),
                (
                    BinaryOp::Add | BinaryOp::Sub | BinaryOp::Or | BinaryOp::Xor
                        | BinaryOp::Shl
                        | BinaryOp::Shr,
                    Some(0)
                ) | (BinaryOp::Mul | BinaryOp::Div, Some(1))
            );
            let keep_rhs = matches!(
                (op, lhs_const),
                (BinaryOp::Add | BinaryOp::Or | BinaryOp::Xor, Some(0))
                    | (BinaryOp::Mul, Some(1))
            );
            let zero = matches!(
                (op, lhs_const, rhs_const),
                (BinaryOp::Mul | BinaryOp::And, _, Some(0)) if lhs.is_pure()
            ) || matches!(
                (op, lhs_const, rhs_const),
                (BinaryOp::Mul | BinaryOp::And, Some(0), _) if rhs.is_pure()
            );

            if zero {
                self.kind = ExpressionKind::Integer(0);
            } else if keep_lhs {
                let inner = (**lhs).clone();
                self.kind = inner.kind;
            } else if keep_rhs {
                let inner = (**rhs).clone();
                self.kind = inner.kind;
            }
        }
    }

    /// Whether emitting this expression clobbers register B.
    pub fn overwrites_b(&self) -> bool {
        match &self.kind {
            ExpressionKind::Integer(_)
            | ExpressionKind::Bool(_)
            | ExpressionKind::Char(_)
            | ExpressionKind::Str(_)
            | ExpressionKind::SizeOf(_)
            | ExpressionKind::CreatePointer { .. }
            | ExpressionKind::IncludeFile { .. }
            | ExpressionKind::Identifier { .. } => false,
            _ => true,
        }
    }

    /// The concrete pointer this l-value lives at, when it is known at
    /// compile time. Bit-field members return their host word plus the bit
    /// position.
    pub(crate) fn constant_place(&self) -> Option<(SymbolRef, Option<BitField>)> {
        match &self.kind {
            ExpressionKind::Identifier { variable, .. } => variable
                .as_ref()
                .map(|v| (v.pointer().with_offset(0), None)),
            ExpressionKind::Member {
                target, resolved, ..
            } => {
                let (offset, _, bits) = resolved.as_ref()?;
                let (base, base_bits) = target.constant_place()?;
                if base_bits.is_some() {
                    return None;
                }
                Some((
                    SymbolRef {
                        id: base.id,
                        offset: base.offset + offset,
                    },
                    *bits,
                ))
            }
            ExpressionKind::Index { target, index } => {
                if !matches!(target.ty, Type::Array { .. }) {
                    return None;
                }
                let (base, base_bits) = target.constant_place()?;
                if base_bits.is_some() {
                    return None;
                }
                let element = self.ty.size().max(1);
                let index = index.const_value()?;
                Some((
                    SymbolRef {
                        id: base.id,
                        offset: base.offset + wrap16(index) * element,
                    },
                    None,
                ))
            }
            _ => None,
        }
    }

    /// Bank of the address this l-value resolves to.
    pub(crate) fn address_bank(&self) -> u8 {
        match &self.kind {
            ExpressionKind::Index { target, .. } => match &target.ty {
                Type::Pointer { bank, .. } => *bank,
                _ => target.address_bank(),
            },
            ExpressionKind::Member { target, .. } => target.address_bank(),
            _ => 0,
        }
    }

    /// Emit code leaving the address of this l-value in A.
    pub fn store_address_in_a(&self, b: &mut Builder) {
        match &self.kind {
            ExpressionKind::Identifier { variable, .. } => match variable {
                Some(variable) => {
                    let pointer = variable.pointer();
                    b.buffer().emit_ref(Mnemonic::LDIA, pointer);
                }
                None => b.buffer().emit_data(Mnemonic::LDIA, 0),
            },
            ExpressionKind::Member {
                target, resolved, ..
            } => {
                let offset = resolved.as_ref().map(|(offset, _, _)| *offset).unwrap_or(0);
                if let Some((base, _)) = target.constant_place() {
                    let host = SymbolRef {
                        id: base.id,
                        offset: base.offset + offset,
                    };
                    b.buffer().emit_ref(Mnemonic::LDIA, host);
                } else {
                    target.store_address_in_a(b);
                    if offset != 0 {
                        b.buffer().emit_data(Mnemonic::LDIB, offset);
                        b.buffer().emit(Mnemonic::ADD);
                    }
                }
            }
            ExpressionKind::Index { target, index } => {
                let element = self.ty.size().max(1);
                // Arrays contribute the address of their storage; pointers
                // contribute the address value they hold.
                if matches!(target.ty, Type::Array { .. }) {
                    target.store_address_in_a(b);
                } else {
                    target.build_into_a(b);
                }
                match index.const_value() {
                    Some(0) => (),
                    Some(value) => {
                        b.buffer()
                            .emit_data(Mnemonic::LDIB, wrap16(value).wrapping_mul(element));
                        b.buffer().emit(Mnemonic::ADD);
                    }
                    None => {
                        let base = b.get_temporary();
                        b.buffer().emit_ref(Mnemonic::STA, base);
                        index.build_into_a(b);
                        if element > 1 {
                            b.buffer().emit_data(Mnemonic::LDIB, element);
                            b.buffer().emit(Mnemonic::MULT);
                        }
                        b.buffer().emit(Mnemonic::SWP);
                        b.buffer().emit_ref(Mnemonic::AIN, base);
                        b.buffer().emit(Mnemonic::ADD);
                        b.release_temporary(base);
                    }
                }
            }
            _ => {
                b.error(self.range, Message::NotAssignable);
                b.buffer().emit_data(Mnemonic::LDIA, 0);
            }
        }
    }

    /// Emit code leaving the expression's value in A.
    pub fn build_into_a(&self, b: &mut Builder) {
        match &self.kind {
            ExpressionKind::Integer(value) => {
                b.buffer().emit_data(Mnemonic::LDIA, wrap16(*value));
            }
            ExpressionKind::Bool(value) => {
                b.buffer().emit_data(Mnemonic::LDIA, *value as u16);
            }
            ExpressionKind::Char(c) => {
                let code = CHARSET.encode(*c).unwrap_or(0);
                b.buffer().emit_data(Mnemonic::LDIA, code);
            }
            ExpressionKind::Str(text) => {
                let pointer = b.intern_string(text);
                b.buffer().emit_ref(Mnemonic::LDIA, pointer);
            }
            ExpressionKind::Identifier { variable, .. } => match variable {
                Some(variable) => match variable.ty() {
                    Type::Array { .. } => {
                        let pointer = variable.pointer();
                        b.buffer().emit_ref(Mnemonic::LDIA, pointer);
                    }
                    Type::Struct(_) => {
                        b.error(self.range, Message::Unsupported("struct used as a value"));
                        b.buffer().emit_data(Mnemonic::LDIA, 0);
                    }
                    _ => b.emit_load_a(variable.pointer().into()),
                },
                None => b.buffer().emit_data(Mnemonic::LDIA, 0),
            },
            ExpressionKind::Binary { op, lhs, rhs } => self.build_binary(b, *op, lhs, rhs),
            ExpressionKind::Unary { op, expr } => match op {
                UnaryOp::Not => {
                    expr.build_into_a(b);
                    let yes = b.symbols.create_label(None);
                    let end = b.symbols.create_label(None);
                    b.buffer().emit_ref(Mnemonic::JMPZ, yes);
                    b.buffer().emit_data(Mnemonic::LDIA, 0);
                    b.buffer().emit_ref(Mnemonic::JMP, end);
                    b.buffer().mark(yes);
                    b.buffer().emit_data(Mnemonic::LDIA, 1);
                    b.buffer().mark(end);
                }
                UnaryOp::Negate => {
                    expr.build_into_a(b);
                    b.buffer().emit(Mnemonic::SWP);
                    b.buffer().emit_data(Mnemonic::LDIA, 0);
                    b.buffer().emit(Mnemonic::SUB);
                }
                UnaryOp::Ref => expr.store_address_in_a(b),
            },
            ExpressionKind::Call { .. } => self.build_call(b, false),
            ExpressionKind::Index { .. } => {
                if !self.ty.is_word() {
                    b.error(
                        self.range,
                        Message::Unsupported("multi-word value in an expression"),
                    );
                    return;
                }
                if let Some((place, None)) = self.constant_place() {
                    b.emit_load_a(place);
                } else {
                    self.store_address_in_a(b);
                    self.emit_banked_a_load(b);
                }
            }
            ExpressionKind::Member { resolved, .. } => {
                let bits = resolved.as_ref().and_then(|(_, _, bits)| *bits);
                if let Some((place, _)) = self.constant_place() {
                    b.emit_load_a(place);
                } else {
                    self.store_address_in_a(b);
                    self.emit_banked_a_load(b);
                }
                if let Some(bits) = bits {
                    let shifted = (bits.mask() as u32) << bits.offset;
                    b.buffer().emit_data(Mnemonic::LDIB, shifted as u16);
                    b.buffer().emit(Mnemonic::AND);
                    if bits.offset > 0 {
                        b.buffer().emit_data(Mnemonic::LDIB, bits.offset);
                        b.buffer().emit(Mnemonic::BSR);
                    }
                }
            }
            ExpressionKind::StructInit { .. } => {
                b.error(
                    self.range,
                    Message::Unsupported("struct initializer in value position"),
                );
            }
            ExpressionKind::SizeOf(inner) => {
                b.buffer()
                    .emit_data(Mnemonic::LDIA, inner.ty.size());
            }
            ExpressionKind::CreatePointer { pointer, .. } => match pointer {
                Some(pointer) => b.buffer().emit_ref(Mnemonic::LDIA, *pointer),
                None => b.buffer().emit_data(Mnemonic::LDIA, 0),
            },
            ExpressionKind::IncludeFile { pointer, .. } => match pointer {
                Some(pointer) => b.buffer().emit_ref(Mnemonic::LDIA, *pointer),
                None => b.buffer().emit_data(Mnemonic::LDIA, 0),
            },
            ExpressionKind::Asm { items } => build_asm(b, items),
        }
    }

    /// Emit the expression for its effect only.
    pub fn build_void(&self, b: &mut Builder) {
        match &self.kind {
            ExpressionKind::Call { .. } => self.build_call(b, true),
            ExpressionKind::Asm { items } => build_asm(b, items),
            _ if self.is_pure() => (),
            _ => self.build_into_a(b),
        }
    }

    /// `A = mem[A]` through the l-value's bank.
    fn emit_banked_a_load(&self, b: &mut Builder) {
        let bank = self.address_bank();
        if bank != 0 {
            b.buffer().emit_data(Mnemonic::BNK, bank as u16);
        }
        b.buffer().emit(Mnemonic::LDAIN);
        if bank != 0 {
            b.buffer().emit_data(Mnemonic::BNK, 0);
        }
    }

    fn build_binary(&self, b: &mut Builder, op: BinaryOp, lhs: &Expression, rhs: &Expression) {
        match op {
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt
            | BinaryOp::Ge => build_comparison(b, op, lhs, rhs),
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => build_logical(b, op, lhs, rhs),
            BinaryOp::Mod => build_modulo(b, lhs, rhs),
            BinaryOp::Xor => build_xor(b, lhs, rhs),
            _ => {
                let mnemonic = match op {
                    BinaryOp::Add => Mnemonic::ADD,
                    BinaryOp::Sub => Mnemonic::SUB,
                    BinaryOp::Mul => Mnemonic::MULT,
                    BinaryOp::Div => Mnemonic::DIV,
                    BinaryOp::And => Mnemonic::AND,
                    BinaryOp::Or => Mnemonic::OR,
                    BinaryOp::Shl => Mnemonic::BSL,
                    BinaryOp::Shr => Mnemonic::BSR,
                    _ => unreachable!("handled above"),
                };
                if !rhs.overwrites_b() {
                    lhs.build_into_a(b);
                    if load_b_from(b, rhs) {
                        b.buffer().emit(mnemonic);
                        return;
                    }
                }
                lhs.build_into_a(b);
                let saved = b.get_temporary();
                b.buffer().emit_ref(Mnemonic::STA, saved);
                rhs.build_into_a(b);
                b.buffer().emit(Mnemonic::SWP);
                b.buffer().emit_ref(Mnemonic::AIN, saved);
                b.buffer().emit(mnemonic);
                b.release_temporary(saved);
            }
        }
    }

    fn build_call(&self, b: &mut Builder, is_void: bool) {
        let ExpressionKind::Call {
            name,
            args,
            function,
        } = &self.kind
        else {
            return;
        };
        let Some(index) = *function else { return };

        let (entry, return_type, parameters) = {
            let def = &b.functions[index];
            (def.entry, def.return_type.clone(), def.parameters.clone())
        };

        // Arguments go left-to-right into the callee's own stack slots; the
        // trampoline spill below preserves them together with every other
        // slot of the caller's frame.
        for (parameter, arg) in parameters.iter().zip(args.iter()) {
            let ty = parameter.ty().clone();
            set_value_at(b, parameter.pointer().with_offset(0), &ty, None, arg);
        }

        let ret = b.symbols.create_label(None);
        b.buffer().emit_ref(Mnemonic::LDIA, entry);
        b.buffer().comment(&format!("call {}", name));
        b.buffer().emit(Mnemonic::SWPC);
        b.buffer().emit_ref(Mnemonic::LDIB, ret);
        let sp = b.sp_cell;
        b.buffer().emit_ref(Mnemonic::AIN, sp);
        let call = b.call_label;
        b.buffer().emit_ref(Mnemonic::JMP, call);
        b.buffer().mark(ret);
        b.call_used = true;

        if !is_void && return_type != Type::Void {
            let ret_cell = b.ret_cell;
            b.emit_load_a(ret_cell.into());
        }
    }
}

/// Load B with a value that is free of side effects, without touching A.
/// Returns false when the operand is not that simple.
fn load_b_from(b: &mut Builder, expr: &Expression) -> bool {
    if let Some(value) = expr.const_value() {
        b.buffer().emit_data(Mnemonic::LDIB, wrap16(value));
        return true;
    }
    match &expr.kind {
        ExpressionKind::Identifier {
            variable: Some(variable),
            ..
        } if variable.ty().size() >= 1 && !matches!(variable.ty(), Type::Array { .. } | Type::Struct(_)) => {
            b.emit_load_b(variable.pointer().into());
            true
        }
        ExpressionKind::Str(text) => {
            let pointer = b.intern_string(text);
            b.buffer().emit_ref(Mnemonic::LDIB, pointer);
            true
        }
        ExpressionKind::CreatePointer {
            pointer: Some(pointer),
            ..
        } => {
            b.buffer().emit_ref(Mnemonic::LDIB, *pointer);
            true
        }
        _ => false,
    }
}

/// Comparisons are sign-aware: both operands are biased by 0x8000 and the
/// carry of the unsigned subtraction is inspected. Equality skips the bias.
fn build_comparison(b: &mut Builder, op: BinaryOp, lhs: &Expression, rhs: &Expression) {
    let (first, second, test, biased) = match op {
        BinaryOp::Lt => (lhs, rhs, CompareTest::CarryClear, true),
        BinaryOp::Ge => (lhs, rhs, CompareTest::CarrySet, true),
        BinaryOp::Gt => (rhs, lhs, CompareTest::CarryClear, true),
        BinaryOp::Le => (rhs, lhs, CompareTest::CarrySet, true),
        BinaryOp::Eq => (lhs, rhs, CompareTest::Zero, false),
        BinaryOp::Ne => (lhs, rhs, CompareTest::NotZero, false),
        _ => unreachable!("not a comparison"),
    };

    first.build_into_a(b);
    if biased {
        b.buffer().emit_data(Mnemonic::LDIB, 0x8000);
        b.buffer().emit(Mnemonic::ADD);
    }
    let saved = b.get_temporary();
    b.buffer().emit_ref(Mnemonic::STA, saved);
    second.build_into_a(b);
    if biased {
        b.buffer().emit_data(Mnemonic::LDIB, 0x8000);
        b.buffer().emit(Mnemonic::ADD);
    }
    b.buffer().emit(Mnemonic::SWP);
    b.buffer().emit_ref(Mnemonic::AIN, saved);
    b.buffer().emit(Mnemonic::SUB);
    b.release_temporary(saved);

    let taken = b.symbols.create_label(None);
    let end = b.symbols.create_label(None);
    let (jump, on_jump, otherwise) = match test {
        CompareTest::CarrySet => (Mnemonic::JMPC, 1, 0),
        CompareTest::CarryClear => (Mnemonic::JMPC, 0, 1),
        CompareTest::Zero => (Mnemonic::JMPZ, 1, 0),
        CompareTest::NotZero => (Mnemonic::JMPZ, 0, 1),
    };
    b.buffer().emit_ref(jump, taken);
    b.buffer().emit_data(Mnemonic::LDIA, otherwise);
    b.buffer().emit_ref(Mnemonic::JMP, end);
    b.buffer().mark(taken);
    b.buffer().emit_data(Mnemonic::LDIA, on_jump);
    b.buffer().mark(end);
}

fn build_logical(b: &mut Builder, op: BinaryOp, lhs: &Expression, rhs: &Expression) {
    let falsy = b.symbols.create_label(None);
    let end = b.symbols.create_label(None);
    match op {
        BinaryOp::LogicalAnd => {
            lhs.build_into_a(b);
            b.buffer().emit_ref(Mnemonic::JMPZ, falsy);
            rhs.build_into_a(b);
            b.buffer().emit_ref(Mnemonic::JMPZ, falsy);
            b.buffer().emit_data(Mnemonic::LDIA, 1);
            b.buffer().emit_ref(Mnemonic::JMP, end);
        }
        BinaryOp::LogicalOr => {
            let try_rhs = b.symbols.create_label(None);
            lhs.build_into_a(b);
            b.buffer().emit_ref(Mnemonic::JMPZ, try_rhs);
            b.buffer().emit_data(Mnemonic::LDIA, 1);
            b.buffer().emit_ref(Mnemonic::JMP, end);
            b.buffer().mark(try_rhs);
            rhs.build_into_a(b);
            b.buffer().emit_ref(Mnemonic::JMPZ, falsy);
            b.buffer().emit_data(Mnemonic::LDIA, 1);
            b.buffer().emit_ref(Mnemonic::JMP, end);
        }
        _ => unreachable!("not a logical operator"),
    }
    b.buffer().mark(falsy);
    b.buffer().emit_data(Mnemonic::LDIA, 0);
    b.buffer().mark(end);
}

/// `a % b` on a machine without a remainder: a - (a / b) * b.
fn build_modulo(b: &mut Builder, lhs: &Expression, rhs: &Expression) {
    let left = b.get_temporary();
    let right = b.get_temporary();
    lhs.build_into_a(b);
    b.buffer().emit_ref(Mnemonic::STA, left);
    rhs.build_into_a(b);
    b.buffer().emit_ref(Mnemonic::STA, right);
    b.buffer().emit_ref(Mnemonic::AIN, left);
    b.buffer().emit_ref(Mnemonic::BIN, right);
    b.buffer().emit(Mnemonic::DIV);
    b.buffer().emit_ref(Mnemonic::BIN, right);
    b.buffer().emit(Mnemonic::MULT);
    b.buffer().emit(Mnemonic::SWP);
    b.buffer().emit_ref(Mnemonic::AIN, left);
    b.buffer().emit(Mnemonic::SUB);
    b.release_temporary(right);
    b.release_temporary(left);
}

/// `a ^ b` from AND, OR and NOT: (a | b) & !(a & b).
fn build_xor(b: &mut Builder, lhs: &Expression, rhs: &Expression) {
    let left = b.get_temporary();
    let right = b.get_temporary();
    let nand = b.get_temporary();
    lhs.build_into_a(b);
    b.buffer().emit_ref(Mnemonic::STA, left);
    rhs.build_into_a(b);
    b.buffer().emit_ref(Mnemonic::STA, right);
    b.buffer().emit_ref(Mnemonic::AIN, left);
    b.buffer().emit_ref(Mnemonic::BIN, right);
    b.buffer().emit(Mnemonic::AND);
    b.buffer().emit(Mnemonic::NOT);
    b.buffer().emit_ref(Mnemonic::STA, nand);
    b.buffer().emit_ref(Mnemonic::AIN, left);
    b.buffer().emit_ref(Mnemonic::BIN, right);
    b.buffer().emit(Mnemonic::OR);
    b.buffer().emit_ref(Mnemonic::BIN, nand);
    b.buffer().emit(Mnemonic::AND);
    b.release_temporary(nand);
    b.release_temporary(right);
    b.release_temporary(left);
}

/// Emit an `asm { … }` block. Mnemonics pass through as written; `@name`
/// operands resolve to the variable's home pointer and local labels resolve
/// within the block.
fn build_asm(b: &mut Builder, items: &[AsmItem]) {
    let mut labels: HashMap<&str, Label> = HashMap::new();
    for item in items {
        if let AsmItem::Label(name) = item {
            let label = b.symbols.create_label(Some(name.as_str()));
            labels.insert(name.as_str(), label);
        }
    }

    for item in items {
        match item {
            AsmItem::Label(name) => {
                if let Some(label) = labels.get(name.as_str()) {
                    b.buffer().mark(*label);
                }
            }
            AsmItem::Instruction {
                resolved, operand, ..
            } => {
                let Some(mnemonic) = *resolved else { continue };
                match operand {
                    None => b.buffer().emit(mnemonic),
                    Some(AsmOperand::Int(value)) => {
                        b.buffer().emit_data(mnemonic, wrap16(*value));
                    }
                    Some(AsmOperand::Variable { variable, .. }) => {
                        if let Some(variable) = variable {
                            let pointer = variable.pointer();
                            b.buffer().emit_ref(mnemonic, pointer);
                        }
                    }
                    Some(AsmOperand::LabelRef(name)) => {
                        if let Some(label) = labels.get(name.as_str()) {
                            b.buffer().emit_ref(mnemonic, *label);
                        }
                    }
                }
            }
        }
    }
}

/// The canonical store: place `value` into the location `dest` of type
/// `dest_ty`. Struct initializers recurse field by field, addressable
/// multi-word sources copy word-wise, pointer cells get their bank word
/// written, bit-fields go through a masked read-modify-write.
pub(crate) fn set_value_at(
    b: &mut Builder,
    dest: SymbolRef,
    dest_ty: &Type,
    bits: Option<BitField>,
    value: &Expression,
) {
    if let Some(bits) = bits {
        build_bitfield_write(b, dest, bits, value);
        return;
    }

    if let ExpressionKind::StructInit { fields, layout } = &value.kind {
        let Some(layout) = layout else { return };
        let layout = layout.clone();
        for (name, field_value) in fields {
            let Some(field) = layout.field(name) else {
                continue;
            };
            let field_dest = SymbolRef {
                id: dest.id,
                offset: dest.offset + field.offset,
            };
            set_value_at(b, field_dest, &field.ty.clone(), field.bits, field_value);
        }
        return;
    }

    if let Type::Pointer { .. } = dest_ty {
        // A pointer cell is two words: address, then bank.
        if value.ty.size() == 2 {
            if let Some((source, None)) = value.constant_place() {
                for word in 0..2 {
                    b.emit_load_a(SymbolRef {
                        id: source.id,
                        offset: source.offset + word,
                    });
                    b.emit_store_a(SymbolRef {
                        id: dest.id,
                        offset: dest.offset + word,
                    });
                }
                return;
            }
        }
        value.build_into_a(b);
        b.emit_store_a(dest);
        let bank = match &value.ty {
            Type::Pointer { bank, .. } => *bank,
            _ => dest_ty.address_bank(),
        };
        b.buffer().emit_data(Mnemonic::LDIA, bank as u16);
        b.emit_store_a(SymbolRef {
            id: dest.id,
            offset: dest.offset + 1,
        });
        return;
    }

    if dest_ty.size() > 1 {
        match value.constant_place() {
            Some((source, None)) if value.ty.size() == dest_ty.size() => {
                for word in 0..dest_ty.size() {
                    b.emit_load_a(SymbolRef {
                        id: source.id,
                        offset: source.offset + word,
                    });
                    b.emit_store_a(SymbolRef {
                        id: dest.id,
                        offset: dest.offset + word,
                    });
                }
            }
            _ => b.error(
                value.range,
                Message::Unsupported("copy of a multi-word value"),
            ),
        }
        return;
    }

    value.build_into_a(b);
    b.emit_store_a(dest);
}

/// Masked read-modify-write of a bit-field member. A constant right side is
/// folded straight into the mask; anything else is shifted into place through
/// the scratch cell first.
fn build_bitfield_write(b: &mut Builder, host: SymbolRef, bits: BitField, value: &Expression) {
    let mask = bits.mask();
    let shifted_mask = ((mask as u32) << bits.offset) as u16;

    if let Some(constant) = value.const_value() {
        let field = ((wrap16(constant) & mask) as u32) << bits.offset;
        b.emit_load_a(host);
        b.buffer().emit_data(Mnemonic::LDIB, !shifted_mask);
        b.buffer().emit(Mnemonic::AND);
        if field != 0 {
            b.buffer().emit_data(Mnemonic::LDIB, field as u16);
            b.buffer().emit(Mnemonic::OR);
        }
        b.emit_store_a(host);
        return;
    }

    value.build_into_a(b);
    b.buffer().emit_data(Mnemonic::LDIB, mask);
    b.buffer().emit(Mnemonic::AND);
    if bits.offset > 0 {
        b.buffer().emit_data(Mnemonic::LDIB, bits.offset);
        b.buffer().emit(Mnemonic::BSL);
    }
    let scratch = b.scratch_cell;
    b.buffer().emit_ref(Mnemonic::STA, scratch);
    b.emit_load_a(host);
    b.buffer().emit_data(Mnemonic::LDIB, !shifted_mask);
    b.buffer().emit(Mnemonic::AND);
    b.buffer().emit_ref(Mnemonic::BIN, scratch);
    b.buffer().emit(Mnemonic::OR);
    b.emit_store_a(host);
}
