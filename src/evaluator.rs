use crate::ast::{
    ArraySize, BinaryOp, Declaration, Expr, FunctionDef, Initializer, LogicalOp, Program, Stmt,
    Type,
};
use crate::config::Config;
use crate::environment::{Environment, FrameId};
use crate::error::{CmmError, Span};
use crate::natives::{NativeContext, NativeFn, NativeRegistry};
use crate::operators::{evaluate_binary_op, evaluate_unary_op};
use crate::stack::ensure_sufficient_stack;
use crate::value::Value;
use std::io::{BufRead, Write};

/// How a statement finished. Anything but `Normal` unwinds enclosing
/// statements until a loop or function call consumes it.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    Normal,
    /// `None` for a bare `return;`.
    Return(Option<Value>),
    Break,
    Continue,
}

/// A resolved storage location: a binding plus the array indices applied
/// to it, outermost first.
#[derive(Debug)]
struct Place {
    frame: FrameId,
    name: String,
    indices: Vec<(i64, Span)>,
    span: Span,
}

pub struct Evaluator<'p> {
    program: &'p Program,
    natives: NativeRegistry,
    env: Environment,
    io: NativeContext,
    config: Config,
    call_depth: usize,
}

impl<'p> Evaluator<'p> {
    pub fn new(program: &'p Program) -> Self {
        Self {
            program,
            natives: NativeRegistry::standard(),
            env: Environment::new(),
            io: NativeContext::stdio(),
            config: Config::default(),
            call_depth: 0,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_natives(mut self, natives: NativeRegistry) -> Self {
        self.natives = natives;
        self
    }

    pub fn with_input(mut self, input: Box<dyn BufRead>) -> Self {
        self.io.set_input(input);
        self
    }

    pub fn with_output(mut self, output: Box<dyn Write>) -> Self {
        self.io.set_output(output);
        self
    }

    /// Register an extra native before running.
    pub fn register_native(&mut self, name: &str, function: NativeFn) {
        self.natives.register(name, function);
    }

    /// Run the program and produce its exit status.
    ///
    /// The top-level block runs first, in the top-level frame. A `return`
    /// there ends the program with the returned int as status. Otherwise
    /// `main()` is called if the program defines one, and its int result
    /// becomes the status. Anything else exits with 0.
    #[tracing::instrument(level = "debug", skip_all, fields(args = args.len()))]
    pub fn interpret(&mut self, args: &[String]) -> Result<i32, CmmError> {
        self.io.args = args.to_vec();
        let result = self.run_program();
        if let Err(err) = self.io.flush() {
            tracing::warn!(error = %err, "failed to flush program output");
        }
        result
    }

    fn run_program(&mut self) -> Result<i32, CmmError> {
        let program = self.program;
        let outcome = self.execute_statements(Environment::GLOBAL, &program.body.statements)?;
        if let ExecutionResult::Return(value) = outcome {
            return Ok(value.as_ref().map_or(0, exit_status));
        }

        if let Some(main) = program.functions.get("main") {
            tracing::debug!("entering main");
            let value = self.call_user_function(main, Vec::new(), main.span)?;
            return Ok(exit_status(&value));
        }
        Ok(0)
    }

    pub fn execute_statement(
        &mut self,
        frame: FrameId,
        stmt: &Stmt,
    ) -> Result<ExecutionResult, CmmError> {
        ensure_sufficient_stack(|| self.execute_statement_inner(frame, stmt))
    }

    fn execute_statement_inner(
        &mut self,
        frame: FrameId,
        stmt: &Stmt,
    ) -> Result<ExecutionResult, CmmError> {
        match stmt {
            Stmt::Block(block) => self.execute_block(frame, &block.statements),
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                if self.evaluate_condition(frame, condition)? {
                    self.execute_statement(frame, then_branch)
                } else if let Some(else_stmt) = else_branch {
                    self.execute_statement(frame, else_stmt)
                } else {
                    Ok(ExecutionResult::Normal)
                }
            }
            Stmt::While {
                condition, body, ..
            } => {
                while self.evaluate_condition(frame, condition)? {
                    match self.execute_statement(frame, body)? {
                        ExecutionResult::Break => break,
                        ExecutionResult::Return(value) => {
                            return Ok(ExecutionResult::Return(value))
                        }
                        ExecutionResult::Normal | ExecutionResult::Continue => {}
                    }
                }
                Ok(ExecutionResult::Normal)
            }
            Stmt::DoWhile {
                body, condition, ..
            } => {
                loop {
                    match self.execute_statement(frame, body)? {
                        ExecutionResult::Break => break,
                        ExecutionResult::Return(value) => {
                            return Ok(ExecutionResult::Return(value))
                        }
                        ExecutionResult::Normal | ExecutionResult::Continue => {}
                    }
                    if !self.evaluate_condition(frame, condition)? {
                        break;
                    }
                }
                Ok(ExecutionResult::Normal)
            }
            Stmt::For {
                initializer,
                condition,
                increment,
                body,
                ..
            } => {
                // The initializer's declarations live in a frame of their own.
                let loop_frame = self.env.push(frame);
                let result = self.execute_for(
                    loop_frame,
                    initializer.as_deref(),
                    condition.as_ref(),
                    increment.as_ref(),
                    body,
                );
                self.env.pop(loop_frame);
                result
            }
            Stmt::Break { .. } => Ok(ExecutionResult::Break),
            Stmt::Continue { .. } => Ok(ExecutionResult::Continue),
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => Some(self.evaluate_expression(frame, expr)?),
                    None => None,
                };
                Ok(ExecutionResult::Return(value))
            }
            Stmt::Expression { expr, .. } => {
                self.evaluate_expression(frame, expr)?;
                Ok(ExecutionResult::Normal)
            }
            Stmt::Declarations { declarations, .. } => {
                for declaration in declarations {
                    self.execute_declaration(frame, declaration)?;
                }
                Ok(ExecutionResult::Normal)
            }
            Stmt::Empty { .. } => Ok(ExecutionResult::Normal),
        }
    }

    fn execute_statements(
        &mut self,
        frame: FrameId,
        statements: &[Stmt],
    ) -> Result<ExecutionResult, CmmError> {
        for statement in statements {
            match self.execute_statement(frame, statement)? {
                ExecutionResult::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(ExecutionResult::Normal)
    }

    fn execute_block(
        &mut self,
        parent: FrameId,
        statements: &[Stmt],
    ) -> Result<ExecutionResult, CmmError> {
        let frame = self.env.push(parent);
        let result = self.execute_statements(frame, statements);
        self.env.pop(frame);
        result
    }

    fn execute_for(
        &mut self,
        frame: FrameId,
        initializer: Option<&Stmt>,
        condition: Option<&Expr>,
        increment: Option<&Expr>,
        body: &Stmt,
    ) -> Result<ExecutionResult, CmmError> {
        if let Some(init) = initializer {
            self.execute_statement(frame, init)?;
        }

        loop {
            if let Some(cond) = condition {
                if !self.evaluate_condition(frame, cond)? {
                    break;
                }
            }

            match self.execute_statement(frame, body)? {
                ExecutionResult::Break => break,
                ExecutionResult::Return(value) => return Ok(ExecutionResult::Return(value)),
                ExecutionResult::Normal | ExecutionResult::Continue => {}
            }

            if let Some(inc) = increment {
                self.evaluate_expression(frame, inc)?;
            }
        }
        Ok(ExecutionResult::Normal)
    }

    fn execute_declaration(
        &mut self,
        frame: FrameId,
        declaration: &Declaration,
    ) -> Result<(), CmmError> {
        let value = match &declaration.array {
            Some(size) => self.build_array(frame, declaration, size)?,
            None => match &declaration.initializer {
                Some(Initializer::Expr(expr)) => {
                    let value = self.evaluate_expression(frame, expr)?;
                    declaration.ty.coerce(value).map_err(|message| {
                        CmmError::runtime_error(
                            *expr.span(),
                            format!("Cannot initialize '{}': {}", declaration.name, message),
                        )
                    })?
                }
                Some(Initializer::List(_)) => {
                    return Err(CmmError::runtime_error(
                        declaration.span,
                        format!("Initializer list used for non-array '{}'", declaration.name),
                    ))
                }
                None => declaration.ty.default_value(),
            },
        };

        if !self.env.declare(frame, &declaration.name, value) {
            return Err(CmmError::runtime_error_with_help(
                declaration.span,
                format!(
                    "Variable '{}' is already declared in this scope",
                    declaration.name
                ),
                "Use a different name, or declare it in an inner block.".to_string(),
            ));
        }
        Ok(())
    }

    fn build_array(
        &mut self,
        frame: FrameId,
        declaration: &Declaration,
        size: &ArraySize,
    ) -> Result<Value, CmmError> {
        let element_type = &declaration.ty;
        let mut elements = match &declaration.initializer {
            Some(Initializer::List(exprs)) => {
                let mut elements = Vec::with_capacity(exprs.len());
                for expr in exprs {
                    let value = self.evaluate_expression(frame, expr)?;
                    let value = element_type.coerce(value).map_err(|message| {
                        CmmError::runtime_error(
                            *expr.span(),
                            format!("Invalid element for '{}': {}", declaration.name, message),
                        )
                    })?;
                    elements.push(value);
                }
                elements
            }
            Some(Initializer::Expr(expr)) => {
                let value = self.evaluate_expression(frame, expr)?;
                let array_type = Type::Array(Box::new(element_type.clone()));
                match array_type.coerce(value) {
                    Ok(Value::Array(elements)) => elements,
                    Ok(_) => Vec::new(),
                    Err(message) => {
                        return Err(CmmError::runtime_error(
                            *expr.span(),
                            format!("Cannot initialize '{}': {}", declaration.name, message),
                        ))
                    }
                }
            }
            None => Vec::new(),
        };

        let length = match size {
            ArraySize::Unsized => elements.len(),
            ArraySize::Sized(expr) => match self.evaluate_expression(frame, expr)? {
                Value::Int(n) if n >= 0 => n as usize,
                other => {
                    return Err(CmmError::runtime_error(
                        *expr.span(),
                        format!(
                            "Array size must be a non-negative int, found {}",
                            describe(&other)
                        ),
                    ))
                }
            },
        };

        if elements.len() > length {
            return Err(CmmError::runtime_error(
                declaration.span,
                format!(
                    "Too many initializers for '{}': {} given, length is {}",
                    declaration.name,
                    elements.len(),
                    length
                ),
            ));
        }
        elements.resize(length, element_type.default_value());
        Ok(Value::Array(elements))
    }

    fn evaluate_condition(&mut self, frame: FrameId, expr: &Expr) -> Result<bool, CmmError> {
        let value = self.evaluate_expression(frame, expr)?;
        value.truth().ok_or_else(|| {
            CmmError::runtime_error_with_help(
                *expr.span(),
                format!("Condition must be a bool or a number, found {}", value.type_name()),
                "Compare the value explicitly, e.g. `s != \"\"`.".to_string(),
            )
        })
    }

    pub fn evaluate_expression(&mut self, frame: FrameId, expr: &Expr) -> Result<Value, CmmError> {
        ensure_sufficient_stack(|| self.evaluate_expression_inner(frame, expr))
    }

    fn evaluate_expression_inner(
        &mut self,
        frame: FrameId,
        expr: &Expr,
    ) -> Result<Value, CmmError> {
        match expr {
            Expr::Literal { value, .. } => Ok(value.clone()),
            Expr::Variable { name, span } => self
                .env
                .get(frame, name)
                .cloned()
                .ok_or_else(|| undefined_variable(name, span)),
            Expr::Index { base, index, span } => {
                if is_place(base) {
                    let place = self.evaluate_lvalue(frame, expr)?;
                    return Ok(self.place_mut(&place)?.clone());
                }
                // Indexing a temporary, e.g. `f()[0]`.
                let container = self.evaluate_expression(frame, base)?;
                let i = self.evaluate_index(frame, index)?;
                match container {
                    Value::Array(items) => element_at(items, i, index.span()),
                    other => Err(not_indexable(&other, span)),
                }
            }
            Expr::Assign { target, value, .. } => {
                let value = self.evaluate_expression(frame, value)?;
                let place = self.evaluate_lvalue(frame, target)?;
                self.store(&place, value)
            }
            Expr::CompoundAssign {
                target,
                operator,
                value,
                span,
            } => self.evaluate_compound_assignment(frame, target, *operator, value, span),
            Expr::Binary {
                left,
                operator,
                right,
                span,
            } => {
                let left_val = self.evaluate_expression(frame, left)?;
                let right_val = self.evaluate_expression(frame, right)?;
                evaluate_binary_op(*operator, left_val, right_val, span)
            }
            Expr::Unary {
                operator,
                operand,
                span,
            } => {
                let operand_val = self.evaluate_expression(frame, operand)?;
                evaluate_unary_op(*operator, operand_val, span)
            }
            Expr::Logical {
                left,
                operator,
                right,
                ..
            } => {
                let left_truth = self.evaluate_condition(frame, left)?;
                let result = match operator {
                    LogicalOp::And => left_truth && self.evaluate_condition(frame, right)?,
                    LogicalOp::Or => left_truth || self.evaluate_condition(frame, right)?,
                };
                Ok(Value::Bool(result))
            }
            Expr::Call { name, args, span } => self.evaluate_call(frame, name, args, span),
            Expr::InfixOp {
                symbol,
                left,
                right,
                span,
            } => self.evaluate_infix_op(frame, symbol, left, right, span),
        }
    }

    fn evaluate_compound_assignment(
        &mut self,
        frame: FrameId,
        target: &Expr,
        operator: BinaryOp,
        value: &Expr,
        span: &Span,
    ) -> Result<Value, CmmError> {
        let place = self.evaluate_lvalue(frame, target)?;
        let current = self.place_mut(&place)?.clone();
        let rhs = self.evaluate_expression(frame, value)?;
        let result = evaluate_binary_op(operator, current, rhs, span)?;
        self.store(&place, result)
    }

    fn evaluate_index(&mut self, frame: FrameId, index: &Expr) -> Result<i64, CmmError> {
        match self.evaluate_expression(frame, index)? {
            Value::Int(i) => Ok(i),
            other => Err(CmmError::runtime_error(
                *index.span(),
                format!("Array index must be an int, found {}", other.type_name()),
            )),
        }
    }

    /// Resolve an lvalue expression to the location it denotes.
    fn evaluate_lvalue(&mut self, frame: FrameId, expr: &Expr) -> Result<Place, CmmError> {
        match expr {
            Expr::Variable { name, span } => {
                let owner = self
                    .env
                    .resolve(frame, name)
                    .ok_or_else(|| undefined_variable(name, span))?;
                Ok(Place {
                    frame: owner,
                    name: name.clone(),
                    indices: Vec::new(),
                    span: *span,
                })
            }
            Expr::Index { base, index, span } => {
                let mut place = self.evaluate_lvalue(frame, base)?;
                let i = self.evaluate_index(frame, index)?;
                place.indices.push((i, *index.span()));
                place.span = *span;
                Ok(place)
            }
            other => Err(CmmError::runtime_error(
                *other.span(),
                "Expression does not denote a storage location".to_string(),
            )),
        }
    }

    fn place_mut(&mut self, place: &Place) -> Result<&mut Value, CmmError> {
        let mut slot = self
            .env
            .local_mut(place.frame, &place.name)
            .ok_or_else(|| undefined_variable(&place.name, &place.span))?;

        for &(index, index_span) in &place.indices {
            slot = match slot {
                Value::Array(items) => {
                    let length = items.len();
                    usize::try_from(index)
                        .ok()
                        .and_then(|i| items.get_mut(i))
                        .ok_or_else(|| out_of_bounds(index, length, &index_span))?
                }
                other => return Err(not_indexable(other, &index_span)),
            };
        }
        Ok(slot)
    }

    fn store(&mut self, place: &Place, value: Value) -> Result<Value, CmmError> {
        let slot = self.place_mut(place)?;
        let stored = slot
            .convert_for_store(value)
            .map_err(|message| CmmError::runtime_error(place.span, message))?;
        *slot = stored.clone();
        Ok(stored)
    }

    fn evaluate_call(
        &mut self,
        frame: FrameId,
        name: &str,
        args: &[Expr],
        span: &Span,
    ) -> Result<Value, CmmError> {
        if let Some(native) = self.natives.get(name) {
            let args = self.evaluate_arguments(frame, args)?;
            return self.call_native_function(name, native, &args, span);
        }

        let program = self.program;
        if let Some(function) = program.functions.get(name) {
            let args = self.evaluate_arguments(frame, args)?;
            return self.call_user_function(function, args, *span);
        }

        Err(CmmError::runtime_error_with_help(
            *span,
            format!("Undefined function '{}'", name),
            "Functions must be defined at the top level of the program.".to_string(),
        ))
    }

    fn evaluate_arguments(&mut self, frame: FrameId, args: &[Expr]) -> Result<Vec<Value>, CmmError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.evaluate_expression(frame, arg)?);
        }
        Ok(values)
    }

    fn evaluate_infix_op(
        &mut self,
        frame: FrameId,
        symbol: &str,
        left: &Expr,
        right: &Expr,
        span: &Span,
    ) -> Result<Value, CmmError> {
        let program = self.program;
        let Some(operator) = program.infix_ops.get(symbol) else {
            return Err(CmmError::runtime_error_with_help(
                *span,
                format!("Unknown infix operator {}", symbol),
                format!(
                    "Define it with `infix <type> {}(<type> a, <type> b) {{ ... }}`.",
                    symbol
                ),
            ));
        };

        let left_val = self.evaluate_expression(frame, left)?;
        let right_val = self.evaluate_expression(frame, right)?;
        self.call_user_function(operator, vec![left_val, right_val], *span)
    }

    fn call_native_function(
        &mut self,
        name: &str,
        native: NativeFn,
        args: &[Value],
        span: &Span,
    ) -> Result<Value, CmmError> {
        tracing::trace!(native = name, args = args.len(), "calling native function");
        native(&mut self.io, args)
            .map_err(|message| CmmError::runtime_error(*span, format!("{}(): {}", name, message)))
    }

    /// Call a user function (or infix operator) with already evaluated
    /// arguments. The body runs in a fresh frame whose parent is the
    /// top-level frame, so callers' locals are invisible to it.
    fn call_user_function(
        &mut self,
        function: &FunctionDef,
        args: Vec<Value>,
        span: Span,
    ) -> Result<Value, CmmError> {
        if args.len() != function.params.len() {
            return Err(CmmError::runtime_error_with_help(
                span,
                format!(
                    "'{}' expects {} argument(s), got {}",
                    function.name,
                    function.params.len(),
                    args.len()
                ),
                format!("Check the definition of '{}'.", function.name),
            ));
        }
        if self.call_depth >= self.config.max_call_depth {
            return Err(CmmError::runtime_error_with_help(
                span,
                format!(
                    "Maximum call depth of {} exceeded",
                    self.config.max_call_depth
                ),
                "Check for unbounded recursion, or raise --max-call-depth.".to_string(),
            ));
        }

        tracing::debug!(
            function = function.name.as_str(),
            depth = self.call_depth,
            "calling user function"
        );

        let frame = self.env.push(Environment::GLOBAL);
        self.call_depth += 1;
        let result = ensure_sufficient_stack(|| self.run_function_body(frame, function, args, span));
        self.call_depth -= 1;
        self.env.pop(frame);
        result
    }

    fn run_function_body(
        &mut self,
        frame: FrameId,
        function: &FunctionDef,
        args: Vec<Value>,
        span: Span,
    ) -> Result<Value, CmmError> {
        for (param, arg) in function.params.iter().zip(args) {
            let value = param.ty.coerce(arg).map_err(|message| {
                CmmError::runtime_error(
                    span,
                    format!(
                        "Argument '{}' of '{}': {}",
                        param.name, function.name, message
                    ),
                )
            })?;
            if !self.env.declare(frame, &param.name, value) {
                return Err(CmmError::runtime_error(
                    param.span,
                    format!("Duplicate parameter '{}'", param.name),
                ));
            }
        }

        let outcome = self.execute_statements(frame, &function.body.statements)?;
        match outcome {
            ExecutionResult::Return(None) => Ok(function.return_type.default_value()),
            // `return g();` with a void `g` is fine in a void function.
            ExecutionResult::Return(Some(Value::Void)) if function.return_type == Type::Void => {
                Ok(Value::Void)
            }
            ExecutionResult::Return(Some(_)) if function.return_type == Type::Void => {
                Err(CmmError::runtime_error(
                    span,
                    format!("Void function '{}' returned a value", function.name),
                ))
            }
            ExecutionResult::Return(Some(value)) => {
                function.return_type.coerce(value).map_err(|message| {
                    CmmError::runtime_error(
                        span,
                        format!("'{}' returns {}: {}", function.name, function.return_type, message),
                    )
                })
            }
            ExecutionResult::Normal | ExecutionResult::Break | ExecutionResult::Continue => {
                Ok(function.return_type.default_value())
            }
        }
    }
}

/// Status for a value returned from the top level or `main`. Ints are
/// truncated to `i32`; the operating system keeps only the low 8 bits of
/// that, so `return 256;` exits with 0 on Unix.
fn exit_status(value: &Value) -> i32 {
    match value {
        Value::Int(n) => *n as i32,
        Value::Bool(b) => i32::from(*b),
        _ => 0,
    }
}

fn is_place(expr: &Expr) -> bool {
    match expr {
        Expr::Variable { .. } => true,
        Expr::Index { base, .. } => is_place(base),
        _ => false,
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Int(n) => n.to_string(),
        other => other.type_name().to_string(),
    }
}

fn element_at(mut items: Vec<Value>, index: i64, span: &Span) -> Result<Value, CmmError> {
    let length = items.len();
    match usize::try_from(index) {
        Ok(i) if i < length => Ok(items.swap_remove(i)),
        _ => Err(out_of_bounds(index, length, span)),
    }
}

fn undefined_variable(name: &str, span: &Span) -> CmmError {
    CmmError::runtime_error_with_help(
        *span,
        format!("Undefined variable '{}'", name),
        "Variables must be declared before use.".to_string(),
    )
}

fn out_of_bounds(index: i64, length: usize, span: &Span) -> CmmError {
    CmmError::runtime_error(
        *span,
        format!("Index {} is out of bounds for array of length {}", index, length),
    )
}

fn not_indexable(value: &Value, span: &Span) -> CmmError {
    CmmError::runtime_error(
        *span,
        format!("Cannot index into a value of type {}", value.type_name()),
    )
}
