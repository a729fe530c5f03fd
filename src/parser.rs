use crate::ast::{
    ArraySize, BinaryOp, Block, Declaration, Expr, FunctionDef, Initializer, LogicalOp, Param,
    Program, Stmt, Type, UnaryOp,
};
use crate::error::{CmmError, Span, Warning};
use crate::lexer::{Keyword, Lexer, Token, TokenType};
use crate::stack::ensure_sufficient_stack;
use crate::value::Value;

/// Deepest syntax tree the parser builds. The evaluator walks the tree and
/// the tree is dropped recursively, so this also bounds their stack use.
pub const MAX_NESTING_DEPTH: usize = 1000;

/// Recursive-descent parser that pulls tokens from the lexer one at a time.
pub struct Parser {
    lexer: Lexer,
    current: Token,
    previous_span: Span,
    loop_depth: usize,
    nesting: usize,
}

impl Parser {
    pub fn new(lexer: Lexer) -> Self {
        Self {
            lexer,
            current: Token::new(TokenType::Eof, String::new(), Span::default()),
            previous_span: Span::default(),
            loop_depth: 0,
            nesting: 0,
        }
    }

    pub fn take_warnings(&mut self) -> Vec<Warning> {
        self.lexer.take_warnings()
    }

    pub fn parse(&mut self) -> Result<Program, CmmError> {
        self.nesting = 0;
        self.current = self.fetch()?;
        let start = self.current.span.start;
        let mut program = Program::default();

        while !self.is_at_end() {
            if self.check_keyword(Keyword::Infix) {
                let definition = self.infix_definition()?;
                if program.infix_ops.contains_key(&definition.name) {
                    return Err(CmmError::parse_error(
                        definition.span,
                        format!("Infix operator {} is already defined", definition.name),
                    ));
                }
                program.infix_ops.insert(definition.name.clone(), definition);
            } else if self.is_type_start() {
                let start = self.current.span.start;
                let ty = self.parse_type()?;
                let (name, name_span) =
                    self.consume_identifier("Expected a name after the type")?;

                if self.check(&TokenType::LeftParen) {
                    let definition = self.function_definition(ty, name, start)?;
                    if program.functions.contains_key(&definition.name) {
                        return Err(CmmError::parse_error(
                            definition.span,
                            format!("Function '{}' is already defined", definition.name),
                        ));
                    }
                    program.functions.insert(definition.name.clone(), definition);
                } else {
                    let declarations = self.declarators_from(ty, name, name_span, start)?;
                    self.consume(TokenType::Semicolon, "Expected ';' after declaration")?;
                    program.body.statements.push(declarations);
                }
            } else {
                let statement = self.statement()?;
                program.body.statements.push(statement);
            }
        }

        program.body.span = Span::new(start, self.previous_span.end.max(start));
        Ok(program)
    }

    // ------------------------------------------------------------------
    // Definitions
    // ------------------------------------------------------------------

    fn function_definition(
        &mut self,
        return_type: Type,
        name: String,
        start: usize,
    ) -> Result<FunctionDef, CmmError> {
        let params = self.parameter_list()?;
        let body = self.function_body()?;

        Ok(FunctionDef {
            name,
            return_type,
            params,
            body,
            span: Span::new(start, self.previous_span.end),
        })
    }

    fn infix_definition(&mut self) -> Result<FunctionDef, CmmError> {
        let start = self.advance()?.span.start; // 'infix'
        let return_type = self.parse_type()?;

        let symbol = match &self.current.token_type {
            TokenType::InfixOp(symbol) => symbol.clone(),
            _ => {
                return Err(CmmError::parse_error_with_help(
                    self.current.span,
                    format!(
                        "Expected an infix operator symbol, found {}",
                        self.current.describe()
                    ),
                    "Infix operator symbols start with one of ` ? : $ # \\ @, e.g. `*` or @+@."
                        .to_string(),
                ));
            }
        };
        let symbol_span = self.advance()?.span;

        let params = self.parameter_list()?;
        if params.len() != 2 {
            return Err(CmmError::parse_error(
                symbol_span,
                format!(
                    "Infix operator {} must take exactly two parameters, found {}",
                    symbol,
                    params.len()
                ),
            ));
        }
        let body = self.function_body()?;

        Ok(FunctionDef {
            name: symbol,
            return_type,
            params,
            body,
            span: Span::new(start, self.previous_span.end),
        })
    }

    fn parameter_list(&mut self) -> Result<Vec<Param>, CmmError> {
        self.consume(TokenType::LeftParen, "Expected '(' before parameters")?;

        let mut params = Vec::new();
        if !self.check(&TokenType::RightParen) {
            loop {
                params.push(self.parameter()?);
                if !self.match_type(&TokenType::Comma)? {
                    break;
                }
            }
        }

        self.consume(TokenType::RightParen, "Expected ')' after parameters")?;
        Ok(params)
    }

    fn parameter(&mut self) -> Result<Param, CmmError> {
        let start = self.current.span.start;
        let mut ty = self.parse_type()?;
        if ty == Type::Void {
            return Err(CmmError::parse_error(
                self.previous_span,
                "Parameters cannot have type void".to_string(),
            ));
        }
        let (name, _) = self.consume_identifier("Expected a parameter name")?;
        if self.match_type(&TokenType::LeftBracket)? {
            self.consume(TokenType::RightBracket, "Expected ']' in array parameter")?;
            ty = Type::Array(Box::new(ty));
        }

        Ok(Param {
            name,
            ty,
            span: Span::new(start, self.previous_span.end),
        })
    }

    fn function_body(&mut self) -> Result<Block, CmmError> {
        let outer_loop_depth = std::mem::replace(&mut self.loop_depth, 0);
        let body = self.block();
        self.loop_depth = outer_loop_depth;
        body
    }

    fn parse_type(&mut self) -> Result<Type, CmmError> {
        let ty = match self.current.token_type {
            TokenType::Keyword(Keyword::Int) => Type::Int,
            TokenType::Keyword(Keyword::Double) => Type::Double,
            TokenType::Keyword(Keyword::Bool) => Type::Bool,
            TokenType::Keyword(Keyword::String) => Type::String,
            TokenType::Keyword(Keyword::Void) => Type::Void,
            _ => {
                return Err(CmmError::parse_error(
                    self.current.span,
                    format!("Expected a type, found {}", self.current.describe()),
                ));
            }
        };
        self.advance()?;
        Ok(ty)
    }

    fn is_type_start(&self) -> bool {
        matches!(
            self.current.token_type,
            TokenType::Keyword(
                Keyword::Int | Keyword::Double | Keyword::Bool | Keyword::String | Keyword::Void
            )
        )
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    fn declaration_list(&mut self) -> Result<Stmt, CmmError> {
        let start = self.current.span.start;
        let ty = self.parse_type()?;
        let (name, name_span) = self.consume_identifier("Expected a variable name")?;
        self.declarators_from(ty, name, name_span, start)
    }

    fn declarators_from(
        &mut self,
        ty: Type,
        name: String,
        name_span: Span,
        start: usize,
    ) -> Result<Stmt, CmmError> {
        if self.check(&TokenType::LeftParen) {
            return Err(CmmError::parse_error_with_help(
                name_span,
                format!("Cannot define function '{}' here", name),
                "Functions can only be defined at the top level.".to_string(),
            ));
        }
        if ty == Type::Void {
            return Err(CmmError::parse_error(
                name_span,
                format!("Variable '{}' cannot have type void", name),
            ));
        }

        let mut declarations = vec![self.declarator(ty.clone(), name, name_span)?];
        while self.match_type(&TokenType::Comma)? {
            let (name, name_span) =
                self.consume_identifier("Expected a variable name after ','")?;
            declarations.push(self.declarator(ty.clone(), name, name_span)?);
        }

        Ok(Stmt::Declarations {
            declarations,
            span: Span::new(start, self.previous_span.end),
        })
    }

    fn declarator(
        &mut self,
        ty: Type,
        name: String,
        name_span: Span,
    ) -> Result<Declaration, CmmError> {
        let array = if self.match_type(&TokenType::LeftBracket)? {
            if self.match_type(&TokenType::RightBracket)? {
                Some(ArraySize::Unsized)
            } else {
                let size = self.expression()?;
                self.consume(TokenType::RightBracket, "Expected ']' after array size")?;
                Some(ArraySize::Sized(size))
            }
        } else {
            None
        };

        let initializer = if self.match_type(&TokenType::Equal)? {
            if self.match_type(&TokenType::LeftBrace)? {
                let mut elements = vec![self.expression()?];
                while self.match_type(&TokenType::Comma)? {
                    elements.push(self.expression()?);
                }
                self.consume(TokenType::RightBrace, "Expected '}' after initializer list")?;
                Some(Initializer::List(elements))
            } else {
                Some(Initializer::Expr(self.expression()?))
            }
        } else {
            None
        };

        let span = Span::new(name_span.start, self.previous_span.end);
        match (&array, &initializer) {
            (Some(ArraySize::Unsized), Some(Initializer::List(_))) => {}
            (Some(ArraySize::Unsized), _) => {
                return Err(CmmError::parse_error_with_help(
                    span,
                    format!("Array '{}' needs a size or an initializer list", name),
                    format!("Write '{}[n]' or '{}[] = {{...}}'.", name, name),
                ));
            }
            (None, Some(Initializer::List(_))) => {
                return Err(CmmError::parse_error(
                    span,
                    format!("Initializer list used for non-array variable '{}'", name),
                ));
            }
            _ => {}
        }

        Ok(Declaration {
            ty,
            name,
            array,
            initializer,
            span,
        })
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn statement(&mut self) -> Result<Stmt, CmmError> {
        self.nested(Self::statement_kind)
    }

    fn statement_kind(&mut self) -> Result<Stmt, CmmError> {
        match self.current.token_type.clone() {
            TokenType::LeftBrace => Ok(Stmt::Block(self.block()?)),
            TokenType::Semicolon => {
                let span = self.advance()?.span;
                Ok(Stmt::Empty { span })
            }
            TokenType::Keyword(Keyword::If) => self.if_statement(),
            TokenType::Keyword(Keyword::While) => self.while_statement(),
            TokenType::Keyword(Keyword::Do) => self.do_while_statement(),
            TokenType::Keyword(Keyword::For) => self.for_statement(),
            TokenType::Keyword(keyword @ (Keyword::Break | Keyword::Continue)) => {
                self.jump_statement(keyword)
            }
            TokenType::Keyword(Keyword::Return) => self.return_statement(),
            TokenType::Keyword(Keyword::Infix) => Err(CmmError::parse_error_with_help(
                self.current.span,
                "Cannot define an infix operator here".to_string(),
                "Infix operators can only be defined at the top level.".to_string(),
            )),
            _ if self.is_type_start() => {
                let declarations = self.declaration_list()?;
                self.consume(TokenType::Semicolon, "Expected ';' after declaration")?;
                Ok(declarations)
            }
            _ => self.expression_statement(),
        }
    }

    fn block(&mut self) -> Result<Block, CmmError> {
        let start = self.current.span.start;
        self.consume_with_help(
            TokenType::LeftBrace,
            "Expected '{'",
            "Blocks and function bodies are enclosed in '{' and '}'.".to_string(),
        )?;

        let mut statements = Vec::new();
        while !self.check(&TokenType::RightBrace) && !self.is_at_end() {
            statements.push(self.statement()?);
        }

        self.consume_with_help(
            TokenType::RightBrace,
            "Expected '}' after block",
            "Block statements must be closed with '}' after the opening '{'.".to_string(),
        )?;

        Ok(Block {
            statements,
            span: Span::new(start, self.previous_span.end),
        })
    }

    fn if_statement(&mut self) -> Result<Stmt, CmmError> {
        let start = self.advance()?.span.start;

        self.consume_with_help(
            TokenType::LeftParen,
            "Expected '(' after 'if'",
            "If statements require parentheses around the condition: if (condition) { ... }"
                .to_string(),
        )?;
        let condition = self.expression()?;
        self.consume_with_help(
            TokenType::RightParen,
            "Expected ')' after if condition",
            "If conditions must be enclosed in parentheses: if (condition) { ... }".to_string(),
        )?;

        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.match_keyword(Keyword::Else)? {
            Some(Box::new(self.statement()?))
        } else {
            None
        };

        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
            span: Span::new(start, self.previous_span.end),
        })
    }

    fn while_statement(&mut self) -> Result<Stmt, CmmError> {
        let start = self.advance()?.span.start;

        self.consume(TokenType::LeftParen, "Expected '(' after 'while'")?;
        let condition = self.expression()?;
        self.consume(TokenType::RightParen, "Expected ')' after while condition")?;

        let body = Box::new(self.loop_body()?);

        Ok(Stmt::While {
            condition,
            body,
            span: Span::new(start, self.previous_span.end),
        })
    }

    fn do_while_statement(&mut self) -> Result<Stmt, CmmError> {
        let start = self.advance()?.span.start;

        let body = Box::new(self.loop_body()?);

        if !self.match_keyword(Keyword::While)? {
            return Err(CmmError::parse_error(
                self.current.span,
                format!(
                    "Expected 'while' after do body, found {}",
                    self.current.describe()
                ),
            ));
        }
        self.consume(TokenType::LeftParen, "Expected '(' after 'while'")?;
        let condition = self.expression()?;
        self.consume(TokenType::RightParen, "Expected ')' after while condition")?;
        self.consume(TokenType::Semicolon, "Expected ';' after do-while statement")?;

        Ok(Stmt::DoWhile {
            body,
            condition,
            span: Span::new(start, self.previous_span.end),
        })
    }

    fn for_statement(&mut self) -> Result<Stmt, CmmError> {
        let start = self.advance()?.span.start;

        self.consume(TokenType::LeftParen, "Expected '(' after 'for'")?;

        let initializer = if self.match_type(&TokenType::Semicolon)? {
            None
        } else if self.is_type_start() {
            let declarations = self.declaration_list()?;
            self.consume(TokenType::Semicolon, "Expected ';' after loop initializer")?;
            Some(Box::new(declarations))
        } else {
            Some(Box::new(self.expression_statement()?))
        };

        let condition = if !self.check(&TokenType::Semicolon) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenType::Semicolon, "Expected ';' after loop condition")?;

        let increment = if !self.check(&TokenType::RightParen) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenType::RightParen, "Expected ')' after for clauses")?;

        let body = Box::new(self.loop_body()?);

        Ok(Stmt::For {
            initializer,
            condition,
            increment,
            body,
            span: Span::new(start, self.previous_span.end),
        })
    }

    fn loop_body(&mut self) -> Result<Stmt, CmmError> {
        self.loop_depth += 1;
        let body = self.statement();
        self.loop_depth -= 1;
        body
    }

    fn jump_statement(&mut self, keyword: Keyword) -> Result<Stmt, CmmError> {
        let span = self.advance()?.span;
        if self.loop_depth == 0 {
            return Err(CmmError::parse_error(
                span,
                format!("'{}' outside of a loop", keyword),
            ));
        }
        self.consume(
            TokenType::Semicolon,
            &format!("Expected ';' after '{}'", keyword),
        )?;

        Ok(match keyword {
            Keyword::Break => Stmt::Break { span },
            _ => Stmt::Continue { span },
        })
    }

    fn return_statement(&mut self) -> Result<Stmt, CmmError> {
        let start = self.advance()?.span.start;

        let value = if self.check(&TokenType::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(TokenType::Semicolon, "Expected ';' after return value")?;

        Ok(Stmt::Return {
            value,
            span: Span::new(start, self.previous_span.end),
        })
    }

    fn expression_statement(&mut self) -> Result<Stmt, CmmError> {
        let start = self.current.span.start;
        let expr = self.expression()?;
        self.consume(TokenType::Semicolon, "Expected ';' after expression")?;

        Ok(Stmt::Expression {
            expr,
            span: Span::new(start, self.previous_span.end),
        })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn expression(&mut self) -> Result<Expr, CmmError> {
        self.nested(Self::assignment)
    }

    /// Parse one level deeper in the syntax tree.
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, CmmError>,
    ) -> Result<T, CmmError> {
        self.enter()?;
        let result = ensure_sufficient_stack(|| parse(self));
        self.nesting -= 1;
        result
    }

    /// Count one more level of nesting. Left-associative chains call this
    /// once per link, since each link deepens the tree by one.
    fn enter(&mut self) -> Result<(), CmmError> {
        if self.nesting >= MAX_NESTING_DEPTH {
            return Err(CmmError::parse_error_with_help(
                self.current.span,
                format!(
                    "Code is nested deeper than the maximum of {} levels",
                    MAX_NESTING_DEPTH
                ),
                "Split deeply nested code into functions or intermediate variables."
                    .to_string(),
            ));
        }
        self.nesting += 1;
        Ok(())
    }

    fn assignment(&mut self) -> Result<Expr, CmmError> {
        let expr = self.logical_or()?;

        let compound = match self.current.token_type {
            TokenType::Equal => Some(None),
            TokenType::PlusEqual => Some(Some(BinaryOp::Add)),
            TokenType::MinusEqual => Some(Some(BinaryOp::Subtract)),
            TokenType::StarEqual => Some(Some(BinaryOp::Multiply)),
            TokenType::SlashEqual => Some(Some(BinaryOp::Divide)),
            TokenType::PercentEqual => Some(Some(BinaryOp::Modulo)),
            TokenType::AmpEqual => Some(Some(BinaryOp::BitAnd)),
            TokenType::PipeEqual => Some(Some(BinaryOp::BitOr)),
            TokenType::CaretEqual => Some(Some(BinaryOp::BitXor)),
            TokenType::LessLessEqual => Some(Some(BinaryOp::ShiftLeft)),
            TokenType::GreaterGreaterEqual => Some(Some(BinaryOp::ShiftRight)),
            _ => None,
        };
        let Some(operator) = compound else {
            return Ok(expr);
        };

        let operator_span = self.advance()?.span;
        if !expr.is_lvalue() {
            return Err(CmmError::parse_error_with_help(
                operator_span,
                "Invalid assignment target".to_string(),
                "Only variables and array elements can be assigned to.".to_string(),
            ));
        }
        let value = self.expression()?;
        let span = expr.span().to(*value.span());

        Ok(match operator {
            None => Expr::Assign {
                target: Box::new(expr),
                value: Box::new(value),
                span,
            },
            Some(operator) => Expr::CompoundAssign {
                target: Box::new(expr),
                operator,
                value: Box::new(value),
                span,
            },
        })
    }

    fn logical_or(&mut self) -> Result<Expr, CmmError> {
        let mut expr = self.logical_and()?;

        let mut links = 0;
        while self.match_type(&TokenType::PipePipe)? {
            self.enter()?;
            links += 1;
            let right = self.logical_and()?;
            let span = expr.span().to(*right.span());
            expr = Expr::Logical {
                left: Box::new(expr),
                operator: LogicalOp::Or,
                right: Box::new(right),
                span,
            };
        }

        self.nesting -= links;
        Ok(expr)
    }

    fn logical_and(&mut self) -> Result<Expr, CmmError> {
        let mut expr = self.bit_or()?;

        let mut links = 0;
        while self.match_type(&TokenType::AmpAmp)? {
            self.enter()?;
            links += 1;
            let right = self.bit_or()?;
            let span = expr.span().to(*right.span());
            expr = Expr::Logical {
                left: Box::new(expr),
                operator: LogicalOp::And,
                right: Box::new(right),
                span,
            };
        }

        self.nesting -= links;
        Ok(expr)
    }

    fn bit_or(&mut self) -> Result<Expr, CmmError> {
        self.left_assoc(Self::bit_xor, |t| match t {
            TokenType::Pipe => Some(BinaryOp::BitOr),
            _ => None,
        })
    }

    fn bit_xor(&mut self) -> Result<Expr, CmmError> {
        self.left_assoc(Self::bit_and, |t| match t {
            TokenType::Caret => Some(BinaryOp::BitXor),
            _ => None,
        })
    }

    fn bit_and(&mut self) -> Result<Expr, CmmError> {
        self.left_assoc(Self::equality, |t| match t {
            TokenType::Amp => Some(BinaryOp::BitAnd),
            _ => None,
        })
    }

    fn equality(&mut self) -> Result<Expr, CmmError> {
        self.left_assoc(Self::comparison, |t| match t {
            TokenType::EqualEqual => Some(BinaryOp::Equal),
            TokenType::BangEqual => Some(BinaryOp::NotEqual),
            _ => None,
        })
    }

    fn comparison(&mut self) -> Result<Expr, CmmError> {
        self.left_assoc(Self::shift, |t| match t {
            TokenType::Less => Some(BinaryOp::Less),
            TokenType::LessEqual => Some(BinaryOp::LessEqual),
            TokenType::Greater => Some(BinaryOp::Greater),
            TokenType::GreaterEqual => Some(BinaryOp::GreaterEqual),
            _ => None,
        })
    }

    fn shift(&mut self) -> Result<Expr, CmmError> {
        self.left_assoc(Self::infix_application, |t| match t {
            TokenType::LessLess => Some(BinaryOp::ShiftLeft),
            TokenType::GreaterGreater => Some(BinaryOp::ShiftRight),
            _ => None,
        })
    }

    /// User-defined infix operators, all at one left-associative level.
    fn infix_application(&mut self) -> Result<Expr, CmmError> {
        let mut expr = self.term()?;

        let mut links = 0;
        while let Some(symbol) = self.current_infix_symbol() {
            self.advance()?;
            self.enter()?;
            links += 1;
            let right = self.term()?;
            let span = expr.span().to(*right.span());
            expr = Expr::InfixOp {
                symbol,
                left: Box::new(expr),
                right: Box::new(right),
                span,
            };
        }

        self.nesting -= links;
        Ok(expr)
    }

    fn term(&mut self) -> Result<Expr, CmmError> {
        self.left_assoc(Self::factor, |t| match t {
            TokenType::Plus => Some(BinaryOp::Add),
            TokenType::Minus => Some(BinaryOp::Subtract),
            _ => None,
        })
    }

    fn factor(&mut self) -> Result<Expr, CmmError> {
        self.left_assoc(Self::unary, |t| match t {
            TokenType::Star => Some(BinaryOp::Multiply),
            TokenType::Slash => Some(BinaryOp::Divide),
            TokenType::Percent => Some(BinaryOp::Modulo),
            _ => None,
        })
    }

    fn left_assoc(
        &mut self,
        operand: fn(&mut Self) -> Result<Expr, CmmError>,
        operator_for: fn(&TokenType) -> Option<BinaryOp>,
    ) -> Result<Expr, CmmError> {
        let mut expr = operand(self)?;

        let mut links = 0;
        while let Some(operator) = operator_for(&self.current.token_type) {
            let operator_token = self.advance()?;
            self.enter()?;
            links += 1;
            if self.is_at_end() {
                return Err(CmmError::parse_error(
                    operator_token.span,
                    format!("Expected expression after '{}'", operator.symbol()),
                ));
            }
            let right = operand(self)?;
            let span = expr.span().to(*right.span());
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
                span,
            };
        }

        self.nesting -= links;
        Ok(expr)
    }

    fn unary(&mut self) -> Result<Expr, CmmError> {
        let operator = match self.current.token_type {
            TokenType::Minus => UnaryOp::Negate,
            TokenType::Plus => UnaryOp::Plus,
            TokenType::Bang => UnaryOp::Not,
            TokenType::Tilde => UnaryOp::BitNot,
            _ => return self.postfix(),
        };
        let start = self.advance()?.span.start;
        let operand = self.nested(Self::unary)?;
        let span = Span::new(start, operand.span().end);

        Ok(Expr::Unary {
            operator,
            operand: Box::new(operand),
            span,
        })
    }

    fn postfix(&mut self) -> Result<Expr, CmmError> {
        let mut expr = self.primary()?;

        let mut links = 0;
        while self.match_type(&TokenType::LeftBracket)? {
            self.enter()?;
            links += 1;
            let index = self.expression()?;
            self.consume(TokenType::RightBracket, "Expected ']' after index")?;
            let span = Span::new(expr.span().start, self.previous_span.end);
            expr = Expr::Index {
                base: Box::new(expr),
                index: Box::new(index),
                span,
            };
        }

        self.nesting -= links;
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, CmmError> {
        let literal = match &self.current.token_type {
            TokenType::Integer(n) => Some(Value::Int(*n)),
            TokenType::Double(d) => Some(Value::Double(*d)),
            TokenType::Boolean(b) => Some(Value::Bool(*b)),
            TokenType::String(s) => Some(Value::String(s.clone())),
            _ => None,
        };
        if let Some(value) = literal {
            let span = self.advance()?.span;
            return Ok(Expr::Literal { value, span });
        }

        if let TokenType::Identifier(name) = &self.current.token_type {
            let name = name.clone();
            let name_span = self.advance()?.span;
            if self.match_type(&TokenType::LeftParen)? {
                return self.finish_call(name, name_span);
            }
            return Ok(Expr::Variable {
                name,
                span: name_span,
            });
        }

        if self.check(&TokenType::LeftParen) {
            let open = self.advance()?.span;
            if self.check(&TokenType::RightParen) {
                return Err(CmmError::parse_error(
                    open.to(self.current.span),
                    "Empty parentheses are not allowed".to_string(),
                ));
            }
            let expr = self.expression()?;
            self.consume(TokenType::RightParen, "Expected ')' after expression")?;
            return Ok(expr);
        }

        Err(CmmError::parse_error(
            self.current.span,
            format!("Expected expression, found {}", self.current.describe()),
        ))
    }

    fn finish_call(&mut self, name: String, name_span: Span) -> Result<Expr, CmmError> {
        let mut args = Vec::new();
        if !self.check(&TokenType::RightParen) {
            loop {
                args.push(self.expression()?);
                if !self.match_type(&TokenType::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expected ')' after arguments")?;

        Ok(Expr::Call {
            name,
            args,
            span: Span::new(name_span.start, self.previous_span.end),
        })
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    /// Pull the next token, surfacing lexical errors.
    fn fetch(&mut self) -> Result<Token, CmmError> {
        let token = self.lexer.next_token();
        if let TokenType::Error(message) = &token.token_type {
            return Err(CmmError::lex_error(token.span, message.clone()));
        }
        Ok(token)
    }

    fn advance(&mut self) -> Result<Token, CmmError> {
        let next = if self.is_at_end() {
            self.current.clone()
        } else {
            self.fetch()?
        };
        let token = std::mem::replace(&mut self.current, next);
        self.previous_span = token.span;
        Ok(token)
    }

    fn is_at_end(&self) -> bool {
        self.current.is_eof()
    }

    fn check(&self, token_type: &TokenType) -> bool {
        &self.current.token_type == token_type
    }

    fn check_keyword(&self, keyword: Keyword) -> bool {
        self.current.token_type == TokenType::Keyword(keyword)
    }

    fn match_type(&mut self, token_type: &TokenType) -> Result<bool, CmmError> {
        if self.check(token_type) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn match_keyword(&mut self, keyword: Keyword) -> Result<bool, CmmError> {
        self.match_type(&TokenType::Keyword(keyword))
    }

    fn current_infix_symbol(&self) -> Option<String> {
        match &self.current.token_type {
            TokenType::InfixOp(symbol) => Some(symbol.clone()),
            _ => None,
        }
    }

    fn consume(&mut self, token_type: TokenType, message: &str) -> Result<Token, CmmError> {
        if self.check(&token_type) {
            return self.advance();
        }

        Err(CmmError::parse_error(
            self.current.span,
            format!("{}, found {}", message, self.current.describe()),
        ))
    }

    fn consume_with_help(
        &mut self,
        token_type: TokenType,
        message: &str,
        help: String,
    ) -> Result<Token, CmmError> {
        if self.check(&token_type) {
            return self.advance();
        }

        Err(CmmError::parse_error_with_help(
            self.current.span,
            format!("{}, found {}", message, self.current.describe()),
            help,
        ))
    }

    fn consume_identifier(&mut self, message: &str) -> Result<(String, Span), CmmError> {
        if let TokenType::Identifier(name) = &self.current.token_type {
            let name = name.clone();
            let span = self.advance()?.span;
            return Ok((name, span));
        }

        Err(CmmError::parse_error(
            self.current.span,
            format!("{}, found {}", message, self.current.describe()),
        ))
    }
}
