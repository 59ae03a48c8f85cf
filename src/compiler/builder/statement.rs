use crate::assembly::instruction::Mnemonic;
use crate::compiler::ast::{Expression, ExpressionKind, Statement, StatementKind};
use crate::compiler::builder::expression::set_value_at;
use crate::compiler::builder::{Builder, LoopLabels};
use crate::compiler::diagnostics::Message;
use crate::compiler::types::{StructLayout, Type};

impl Statement {
    /// First pass: register structs and functions so later phases resolve
    /// forward references.
    pub fn declare(&mut self, b: &mut Builder) {
        let range = self.range;
        match &mut self.kind {
            StatementKind::Struct { name, members } => {
                for (_, ty, _) in members.iter_mut() {
                    b.resolve_type(ty, range);
                }
                match StructLayout::build(name, members.clone()) {
                    Ok(layout) => b.register_struct(layout, range),
                    Err(member) => b.error(range, Message::BitFieldOverflow(member)),
                }
            }
            StatementKind::Function {
                name,
                parameters,
                return_type,
                body,
                function,
            } => {
                for (_, ty) in parameters.iter_mut() {
                    b.resolve_type(ty, range);
                }
                b.resolve_type(return_type, range);
                let index =
                    b.register_function(name, parameters.clone(), return_type.clone(), range);
                *function = Some(index);
                for statement in body {
                    statement.declare(b);
                }
            }
            StatementKind::Import { body, .. } => {
                for statement in body {
                    statement.declare(b);
                }
            }
            _ => (),
        }
    }

    /// Second pass: resolve names, place variables, infer and check types.
    pub fn initialize(&mut self, b: &mut Builder) {
        let range = self.range;
        match &mut self.kind {
            StatementKind::Declaration {
                name,
                declared,
                value,
                variable,
            } => {
                if let Some(declared) = declared {
                    b.resolve_type(declared, range);
                }
                if let Some(value) = value {
                    value.initialize(b, declared.as_ref());
                }

                let mut ty = match (declared.as_ref(), value.as_ref()) {
                    (Some(declared), _) => declared.clone(),
                    (None, Some(value)) => value.ty.clone(),
                    (None, None) => Type::Unknown,
                };
                // A bank-neutral pointer annotation adopts the bank of its
                // initializer so device pointers keep addressing their bank.
                let adopted = match (&ty, value.as_ref()) {
                    (
                        Type::Pointer { element, bank: 0 },
                        Some(Expression {
                            ty: Type::Pointer { bank, .. },
                            ..
                        }),
                    ) if *bank != 0 => Some(Type::Pointer {
                        element: element.clone(),
                        bank: *bank,
                    }),
                    _ => None,
                };
                if let Some(adopted) = adopted {
                    ty = adopted;
                }

                if let (Some(declared), Some(value)) = (declared.as_ref(), value.as_ref()) {
                    if !declared.accepts(&value.ty) {
                        b.error(
                            value.range,
                            Message::TypeMismatch {
                                expected: declared.to_string(),
                                found: value.ty.to_string(),
                            },
                        );
                    }
                }
                if ty == Type::Void {
                    b.error(
                        range,
                        Message::TypeMismatch {
                            expected: "a value".to_string(),
                            found: Type::Void.to_string(),
                        },
                    );
                    ty = Type::Unknown;
                }

                let created = b.declare_variable(name, ty, range);
                if let Some(value) = value {
                    if value.is_pure() {
                        if let Some(constant) = value.const_value() {
                            created.set_initial(constant);
                        }
                    }
                }
                *variable = Some(created);
            }
            StatementKind::Assignment { target, value } => {
                target.initialize(b, None);
                value.initialize(b, Some(&target.ty.clone()));
                if !target.is_lvalue() {
                    b.error(target.range, Message::NotAssignable);
                }
                if !target.ty.accepts(&value.ty) {
                    b.error(
                        value.range,
                        Message::TypeMismatch {
                            expected: target.ty.to_string(),
                            found: value.ty.to_string(),
                        },
                    );
                }
                if let ExpressionKind::Identifier {
                    variable: Some(variable),
                    ..
                } = &target.kind
                {
                    variable.clear_constant();
                }
            }
            StatementKind::Expression(expression) => expression.initialize(b, None),
            StatementKind::If {
                condition,
                then_body,
                else_body,
            } => {
                condition.initialize(b, Some(&Type::Bool));
                for body in [then_body, else_body] {
                    b.blocks.push(None);
                    for statement in body {
                        statement.initialize(b);
                    }
                    b.blocks.pop();
                }
            }
            StatementKind::While { condition, body } => {
                condition.initialize(b, Some(&Type::Bool));
                b.blocks.push(None);
                b.loop_depth += 1;
                for statement in body {
                    statement.initialize(b);
                }
                b.loop_depth -= 1;
                b.blocks.pop();
            }
            StatementKind::For {
                init,
                condition,
                step,
                body,
            } => {
                b.blocks.push(None);
                if let Some(init) = init {
                    init.initialize(b);
                }
                if let Some(condition) = condition {
                    condition.initialize(b, Some(&Type::Bool));
                }
                if let Some(step) = step {
                    step.initialize(b);
                }
                b.blocks.push(None);
                b.loop_depth += 1;
                for statement in body {
                    statement.initialize(b);
                }
                b.loop_depth -= 1;
                b.blocks.pop();
                b.blocks.pop();
            }
            StatementKind::Break => {
                if b.loop_depth == 0 {
                    b.error(range, Message::OutsideLoop("break"));
                }
            }
            StatementKind::Continue => {
                if b.loop_depth == 0 {
                    b.error(range, Message::OutsideLoop("continue"));
                }
            }
            StatementKind::Return(value) => {
                let expected = b
                    .blocks
                    .current_function()
                    .map(|index| b.functions[index].return_type.clone());
                match &expected {
                    None => b.error(range, Message::ReturnOutsideFunction),
                    Some(expected) => {
                        if let Some(value) = value {
                            value.initialize(b, Some(&expected.clone()));
                            if !expected.accepts(&value.ty) {
                                b.error(
                                    value.range,
                                    Message::TypeMismatch {
                                        expected: expected.to_string(),
                                        found: value.ty.to_string(),
                                    },
                                );
                            }
                        }
                    }
                }
            }
            StatementKind::Function { body, function, .. } => {
                let Some(index) = *function else { return };
                b.blocks.push(Some(index));
                let parameter_types = b.functions[index].parameter_types.clone();
                for (name, ty) in parameter_types {
                    let parameter = b.declare_variable(&name, ty, range);
                    b.functions[index].parameters.push(parameter);
                }
                for statement in body {
                    statement.initialize(b);
                }
                b.blocks.pop();
            }
            StatementKind::Struct { .. } => (),
            StatementKind::Import { body, .. } => {
                for statement in body {
                    statement.initialize(b);
                }
            }
        }
    }

    /// Third pass: constant folding over every contained expression.
    pub fn optimize(&mut self) {
        match &mut self.kind {
            StatementKind::Declaration { value, .. } => {
                if let Some(value) = value {
                    value.optimize();
                }
            }
            StatementKind::Assignment { target, value } => {
                target.optimize();
                value.optimize();
            }
            StatementKind::Expression(expression) => expression.optimize(),
            StatementKind::If {
                condition,
                then_body,
                else_body,
            } => {
                condition.optimize();
                for statement in then_body.iter_mut().chain(else_body.iter_mut()) {
                    statement.optimize();
                }
            }
            StatementKind::While { condition, body } => {
                condition.optimize();
                for statement in body {
                    statement.optimize();
                }
            }
            StatementKind::For {
                init,
                condition,
                step,
                body,
            } => {
                if let Some(init) = init {
                    init.optimize();
                }
                if let Some(condition) = condition {
                    condition.optimize();
                }
                if let Some(step) = step {
                    step.optimize();
                }
                for statement in body {
                    statement.optimize();
                }
            }
            StatementKind::Return(Some(value)) => value.optimize(),
            StatementKind::Function { body, .. } | StatementKind::Import { body, .. } => {
                for statement in body {
                    statement.optimize();
                }
            }
            _ => (),
        }
    }

    /// Fourth pass: emission.
    pub fn build(&mut self, b: &mut Builder) {
        let range = self.range;
        match &mut self.kind {
            StatementKind::Declaration {
                name,
                value,
                variable,
                ..
            } => {
                let Some(variable) = variable else { return };
                let unused = variable.usages() == 0
                    && value.as_ref().map(|v| v.is_pure()).unwrap_or(true);
                if unused {
                    b.diagnostics
                        .debug(range, Message::UnusedVariable(name.clone()));
                    return;
                }
                if let Some(value) = value {
                    let ty = variable.ty().clone();
                    set_value_at(b, variable.pointer().with_offset(0), &ty, None, value);
                }
            }
            StatementKind::Assignment { target, value } => match target.constant_place() {
                Some((place, bits)) => {
                    let ty = target.ty.clone();
                    set_value_at(b, place, &ty, bits, value);
                }
                None => build_computed_store(b, target, value),
            },
            StatementKind::Expression(expression) => expression.build_void(b),
            StatementKind::If {
                condition,
                then_body,
                else_body,
            } => {
                // Dead branches of a constant condition are pruned.
                if let Some(constant) = condition.const_value() {
                    let taken = if constant != 0 { then_body } else { else_body };
                    b.blocks.push(None);
                    for statement in taken {
                        statement.build(b);
                    }
                    b.blocks.pop();
                    return;
                }

                let otherwise = b.symbols.create_label(None);
                condition.build_into_a(b);
                b.buffer().emit_ref(Mnemonic::JMPZ, otherwise);
                b.blocks.push(None);
                for statement in then_body.iter_mut() {
                    statement.build(b);
                }
                b.blocks.pop();
                if else_body.is_empty() {
                    b.buffer().mark(otherwise);
                } else {
                    let end = b.symbols.create_label(None);
                    b.buffer().emit_ref(Mnemonic::JMP, end);
                    b.buffer().mark(otherwise);
                    b.blocks.push(None);
                    for statement in else_body.iter_mut() {
                        statement.build(b);
                    }
                    b.blocks.pop();
                    b.buffer().mark(end);
                }
            }
            StatementKind::While { condition, body } => {
                let constant = condition.const_value();
                if constant == Some(0) {
                    return;
                }
                let start = b.symbols.create_label(None);
                let end = b.symbols.create_label(None);
                b.buffer().mark(start);
                if constant.is_none() {
                    condition.build_into_a(b);
                    b.buffer().emit_ref(Mnemonic::JMPZ, end);
                }
                b.loop_stack.push(LoopLabels {
                    continue_label: start,
                    break_label: end,
                });
                b.blocks.push(None);
                for statement in body {
                    statement.build(b);
                }
                b.blocks.pop();
                b.loop_stack.pop();
                b.buffer().emit_ref(Mnemonic::JMP, start);
                b.buffer().mark(end);
            }
            StatementKind::For {
                init,
                condition,
                step,
                body,
            } => {
                b.blocks.push(None);
                if let Some(init) = init {
                    init.build(b);
                }
                let test = b.symbols.create_label(None);
                let advance = b.symbols.create_label(None);
                let end = b.symbols.create_label(None);
                b.buffer().mark(test);
                if let Some(condition) = condition {
                    match condition.const_value() {
                        Some(0) => {
                            // Loop body is dead; still leave the init behind.
                            b.buffer().mark(advance);
                            b.buffer().mark(end);
                            b.blocks.pop();
                            return;
                        }
                        Some(_) => (),
                        None => {
                            condition.build_into_a(b);
                            b.buffer().emit_ref(Mnemonic::JMPZ, end);
                        }
                    }
                }
                b.loop_stack.push(LoopLabels {
                    continue_label: advance,
                    break_label: end,
                });
                b.blocks.push(None);
                for statement in body {
                    statement.build(b);
                }
                b.blocks.pop();
                b.loop_stack.pop();
                b.buffer().mark(advance);
                if let Some(step) = step {
                    step.build(b);
                }
                b.buffer().emit_ref(Mnemonic::JMP, test);
                b.buffer().mark(end);
                b.blocks.pop();
            }
            StatementKind::Break => {
                if let Some(labels) = b.loop_stack.last().copied() {
                    b.buffer().emit_ref(Mnemonic::JMP, labels.break_label);
                }
            }
            StatementKind::Continue => {
                if let Some(labels) = b.loop_stack.last().copied() {
                    b.buffer().emit_ref(Mnemonic::JMP, labels.continue_label);
                }
            }
            StatementKind::Return(value) => {
                if b.blocks.current_function().is_none() {
                    return;
                }
                if let Some(value) = value {
                    value.build_into_a(b);
                }
                let target = b.return_label;
                b.buffer().emit_ref(Mnemonic::JMP, target);
            }
            StatementKind::Function { body, function, .. } => {
                let Some(index) = *function else { return };
                if b.functions[index].references == 0 {
                    // Never called; the body is dropped at layout time.
                    return;
                }
                let (buffer_index, entry) = {
                    let def = &b.functions[index];
                    (def.buffer_index, def.entry)
                };
                let previous = b.select_buffer(buffer_index);
                b.blocks.push(Some(index));
                b.buffer().mark(entry);
                for statement in body {
                    statement.build(b);
                }
                let target = b.return_label;
                b.buffer().emit_ref(Mnemonic::JMP, target);
                b.blocks.pop();
                b.restore_buffer(previous);
            }
            StatementKind::Struct { .. } => (),
            StatementKind::Import { body, .. } => {
                for statement in body {
                    statement.build(b);
                }
            }
        }
    }
}

/// Store through a runtime-computed address: the value travels via a
/// temporary to B while A carries the destination address. Bit-field members
/// get the masked read-modify-write in its addressed form.
fn build_computed_store(b: &mut Builder, target: &Expression, value: &Expression) {
    if !target.is_lvalue() {
        // Already diagnosed during initialize.
        return;
    }
    if !target.ty.is_word() {
        b.error(
            target.range,
            Message::Unsupported("store of a multi-word value through a computed address"),
        );
        return;
    }

    let bits = match &target.kind {
        ExpressionKind::Member { resolved, .. } => {
            resolved.as_ref().and_then(|(_, _, bits)| *bits)
        }
        _ => None,
    };
    let bank = target.address_bank() as u16;

    match bits {
        None => {
            value.build_into_a(b);
            let saved = b.get_temporary();
            b.buffer().emit_ref(Mnemonic::STA, saved);
            target.store_address_in_a(b);
            b.buffer().emit_ref(Mnemonic::BIN, saved);
            if bank != 0 {
                b.buffer().emit_data(Mnemonic::BNK, bank);
            }
            b.buffer().emit(Mnemonic::STAOUT);
            if bank != 0 {
                b.buffer().emit_data(Mnemonic::BNK, 0);
            }
            b.release_temporary(saved);
        }
        Some(bits) => {
            let mask = bits.mask();
            let shifted_mask = ((mask as u32) << bits.offset) as u16;
            let field = b.get_temporary();
            let address = b.get_temporary();

            value.build_into_a(b);
            b.buffer().emit_data(Mnemonic::LDIB, mask);
            b.buffer().emit(Mnemonic::AND);
            if bits.offset > 0 {
                b.buffer().emit_data(Mnemonic::LDIB, bits.offset);
                b.buffer().emit(Mnemonic::BSL);
            }
            b.buffer().emit_ref(Mnemonic::STA, field);

            target.store_address_in_a(b);
            b.buffer().emit_ref(Mnemonic::STA, address);
            if bank != 0 {
                b.buffer().emit_data(Mnemonic::BNK, bank);
            }
            b.buffer().emit(Mnemonic::LDAIN);
            if bank != 0 {
                b.buffer().emit_data(Mnemonic::BNK, 0);
            }
            b.buffer().emit_data(Mnemonic::LDIB, !shifted_mask);
            b.buffer().emit(Mnemonic::AND);
            b.buffer().emit_ref(Mnemonic::BIN, field);
            b.buffer().emit(Mnemonic::OR);
            b.buffer().emit(Mnemonic::SWP);
            b.buffer().emit_ref(Mnemonic::AIN, address);
            if bank != 0 {
                b.buffer().emit_data(Mnemonic::BNK, bank);
            }
            b.buffer().emit(Mnemonic::STAOUT);
            if bank != 0 {
                b.buffer().emit_data(Mnemonic::BNK, 0);
            }
            b.release_temporary(address);
            b.release_temporary(field);
        }
    }
}
