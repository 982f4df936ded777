use std::collections::HashMap;
use std::fmt;
use std::fmt::Formatter;
use crate::ast::{BlockStatement, Expression, FunctionLiteral, Identifier, Program, Statement};
use crate::lexer::{Lexer, TokenSource};
use crate::token::{Token, TokenType};

#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Copy, Clone)]
pub enum Precedence {
    LOWEST,
    EQUALS, // ==
    LessGreater, // > <
    SUM, // +, -
    PRODUCT, // *, /
    PREFIX, // -X, !X
    CALL, // f(x)
    INDEX, // a[i]
}

impl fmt::Display for Precedence {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self {
            Precedence::LOWEST => write!(f, "LOWEST"),
            Precedence::EQUALS => write!(f, "EQUALS"),
            Precedence::LessGreater => write!(f, "LessGreater"),
            Precedence::SUM => write!(f, "SUM"),
            Precedence::PRODUCT => write!(f, "PRODUCT"),
            Precedence::PREFIX => write!(f, "PREFIX"),
            Precedence::CALL => write!(f, "CALL"),
            Precedence::INDEX => write!(f, "INDEX")
        }
    }
}

fn get_precedence(token: TokenType) -> Precedence {
    match token {
        TokenType::EQ | TokenType::NotEq => Precedence::EQUALS,
        TokenType::LT | TokenType::GT => Precedence::LessGreater,
        TokenType::PLUS | TokenType::MINUS => Precedence::SUM,
        TokenType::ASTERISK | TokenType::SLASH => Precedence::PRODUCT,
        TokenType::LPAREN => Precedence::CALL,
        TokenType::LBRACKET => Precedence::INDEX,
        _ => Precedence::LOWEST,
    }
}

/// Parse rule invoked when a token starts an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrefixRule {
    Identifier,
    Integer,
    String,
    Boolean,
    Null,
    Operator,
    Grouped,
    If,
    Function,
    Array,
    Hash,
}

/// Parse rule invoked when a token follows a complete left operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InfixRule {
    Operator,
    Call,
    Index,
}

fn prefix_rules() -> HashMap<TokenType, PrefixRule> {
    HashMap::from([
        (TokenType::IDENT, PrefixRule::Identifier),
        (TokenType::INT, PrefixRule::Integer),
        (TokenType::STRING, PrefixRule::String),
        (TokenType::TRUE, PrefixRule::Boolean),
        (TokenType::FALSE, PrefixRule::Boolean),
        (TokenType::NULL, PrefixRule::Null),
        (TokenType::BANG, PrefixRule::Operator),
        (TokenType::MINUS, PrefixRule::Operator),
        (TokenType::LPAREN, PrefixRule::Grouped),
        (TokenType::IF, PrefixRule::If),
        (TokenType::FUNCTION, PrefixRule::Function),
        (TokenType::LBRACKET, PrefixRule::Array),
        (TokenType::LBRACE, PrefixRule::Hash),
    ])
}

fn infix_rules() -> HashMap<TokenType, InfixRule> {
    HashMap::from([
        (TokenType::PLUS, InfixRule::Operator),
        (TokenType::MINUS, InfixRule::Operator),
        (TokenType::ASTERISK, InfixRule::Operator),
        (TokenType::SLASH, InfixRule::Operator),
        (TokenType::EQ, InfixRule::Operator),
        (TokenType::NotEq, InfixRule::Operator),
        (TokenType::LT, InfixRule::Operator),
        (TokenType::GT, InfixRule::Operator),
        (TokenType::LPAREN, InfixRule::Call),
        (TokenType::LBRACKET, InfixRule::Index),
    ])
}

/// Pratt parser over any [`TokenSource`].
///
/// Parsing never aborts: failed statements are dropped from the program,
/// a message is recorded, and the parser resumes at the next statement
/// boundary. Callers must check [`Parser::errors`] before trusting the AST.
pub struct Parser<L: TokenSource = Lexer> {
    l: L,
    errors: Vec<String>,

    cur_token: Token,
    peek_token: Token,

    prefix_rules: HashMap<TokenType, PrefixRule>,
    infix_rules: HashMap<TokenType, InfixRule>,
}

impl<L: TokenSource> Parser<L> {

    pub fn new(l: L) -> Self {
        let mut p = Parser {
            l,
            errors: Vec::new(),

            cur_token: Token::eof(),
            peek_token: Token::eof(),

            prefix_rules: prefix_rules(),
            infix_rules: infix_rules(),
        };

        // filling cur_token and peek_token
        p.next_token();
        p.next_token();

        p
    }

    fn next_token(&mut self) {
        self.cur_token = std::mem::replace(&mut self.peek_token, self.l.next_token());
    }

    fn cur_token_is(&self, t: TokenType) -> bool {
        self.cur_token.token_type == t
    }

    fn peek_token_is(&self, t: TokenType) -> bool {
        self.peek_token.token_type == t
    }

    fn expect_peek(&mut self, t: TokenType) -> Option<()> {
        if self.peek_token_is(t) {
            self.next_token();
            Some(())
        } else {
            self.peek_error(t);
            None
        }
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    fn peek_error(&mut self, t: TokenType) {
        self.errors.push(format!("expected next token to be {}, got {} instead",
            t, self.peek_token.token_type))
    }

    fn no_prefix_fn_error(&mut self, t: TokenType) {
        self.errors.push(format!("no prefix parse function for {} found", t))
    }

    pub fn parse_program(&mut self) -> Program {
        let mut p = Program {
            statements: Vec::new(),
        };

        while !self.cur_token_is(TokenType::EOF) {
            match self.parse_statement() {
                Some(s) => p.statements.push(s),
                None => {
                    self.synchronize();
                },
            }
            self.next_token();
        }
        p
    }

    /// Skips the rest of a broken statement so parsing can resume.
    /// Braces opened while skipping must be closed before a `;` or `}`
    /// counts as the boundary. Returns true when the statement broke on the
    /// `}` that closes the enclosing block, which stays the current token.
    fn synchronize(&mut self) -> bool {
        if self.cur_token_is(TokenType::RBRACE) {
            return true;
        }
        let mut depth = 0usize;
        while !self.peek_token_is(TokenType::EOF) {
            if depth == 0
                && (self.cur_token_is(TokenType::SEMICOLON) || self.peek_token_is(TokenType::RBRACE)) {
                return false;
            }
            self.next_token();
            match self.cur_token.token_type {
                TokenType::LBRACE => depth += 1,
                TokenType::RBRACE => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
        false
    }

    fn parse_statement(&mut self) -> Option<Statement> {
        match self.cur_token.token_type {
            TokenType::LET => self.parse_let_statement(),
            TokenType::RETURN => self.parse_return_statement(),
            _ => self.parse_expression_statement()
        }
    }

    fn parse_let_statement(&mut self) -> Option<Statement> {
        let token = self.cur_token.clone();
        self.expect_peek(TokenType::IDENT)?;

        let name = self.current_identifier();

        self.expect_peek(TokenType::ASSIGN)?;
        self.next_token();

        let value = self.parse_expression(Precedence::LOWEST)?;

        if self.peek_token_is(TokenType::SEMICOLON) {
            self.next_token();
        }
        Some(Statement::Let { token, name, value })
    }

    fn parse_return_statement(&mut self) -> Option<Statement> {
        let token = self.cur_token.clone();
        self.next_token();
        let value = self.parse_expression(Precedence::LOWEST)?;
        if self.peek_token_is(TokenType::SEMICOLON) {
            self.next_token();
        }
        Some(Statement::Return { token, value })
    }

    fn parse_expression_statement(&mut self) -> Option<Statement> {
        let token = self.cur_token.clone();
        let expression = self.parse_expression(Precedence::LOWEST)?;

        if self.peek_token_is(TokenType::SEMICOLON) {
            self.next_token();
        }
        Some(Statement::Expression { token, expression })
    }

    fn parse_expression(&mut self, precedence: Precedence) -> Option<Expression> {
        let cur_type = self.cur_token.token_type;
        let mut left_exp = match self.prefix_rules.get(&cur_type).copied() {
            Some(PrefixRule::Identifier) => Some(Expression::Identifier(self.current_identifier())),
            Some(PrefixRule::Integer) => self.parse_integer_literal(),
            Some(PrefixRule::String) => Some(Expression::String {
                token: self.cur_token.clone(),
                value: self.cur_token.literal.clone(),
            }),
            Some(PrefixRule::Boolean) => Some(Expression::Boolean {
                token: self.cur_token.clone(),
                value: self.cur_token_is(TokenType::TRUE),
            }),
            Some(PrefixRule::Null) => Some(Expression::Null { token: self.cur_token.clone() }),
            Some(PrefixRule::Operator) => self.parse_prefix_expression(),
            Some(PrefixRule::Grouped) => self.parse_grouped_expression(),
            Some(PrefixRule::If) => self.parse_if_expression(),
            Some(PrefixRule::Function) => self.parse_function_literal(),
            Some(PrefixRule::Array) => self.parse_array_literal(),
            Some(PrefixRule::Hash) => self.parse_hash_literal(),
            None => {
                self.no_prefix_fn_error(cur_type);
                None
            }
        }?;

        while !self.peek_token_is(TokenType::SEMICOLON) && precedence < self.peek_precedence() {
            let rule = match self.infix_rules.get(&self.peek_token.token_type).copied() {
                None => return Some(left_exp),
                Some(rule) => rule,
            };
            self.next_token();
            left_exp = match rule {
                InfixRule::Operator => self.parse_infix_expression(left_exp)?,
                InfixRule::Call => self.parse_call_expression(left_exp)?,
                InfixRule::Index => self.parse_index_expression(left_exp)?,
            };
        }
        Some(left_exp)
    }

    fn peek_precedence(&self) -> Precedence {
        get_precedence(self.peek_token.token_type)
    }

    fn cur_precedence(&self) -> Precedence {
        get_precedence(self.cur_token.token_type)
    }

    fn current_identifier(&self) -> Identifier {
        Identifier {
            token: self.cur_token.clone(),
            value: self.cur_token.literal.clone(),
        }
    }

    fn parse_integer_literal(&mut self) -> Option<Expression> {
        let token = self.cur_token.clone();
        match token.literal.parse::<i64>() {
            Ok(value) => Some(Expression::Integer { token, value }),
            Err(_) => {
                self.errors.push(format!("could not parse {} as integer", token.literal));
                None
            }
        }
    }

    fn parse_prefix_expression(&mut self) -> Option<Expression> {
        let token = self.cur_token.clone();
        let operator = token.literal.clone();
        self.next_token();
        let right = self.parse_expression(Precedence::PREFIX)?;
        Some(Expression::Prefix {
            token,
            operator,
            right: Box::new(right)
        })
    }

    fn parse_infix_expression(&mut self, left: Expression) -> Option<Expression> {
        let token = self.cur_token.clone();
        let operator = token.literal.clone();

        let precedence = self.cur_precedence();
        self.next_token();
        let right = self.parse_expression(precedence)?;
        Some(Expression::Infix {
            token,
            operator,
            left: Box::new(left),
            right: Box::new(right)
        })
    }

    fn parse_grouped_expression(&mut self) -> Option<Expression> {
        self.next_token();
        let exp = self.parse_expression(Precedence::LOWEST)?;
        self.expect_peek(TokenType::RPAREN)?;
        Some(exp)
    }

    fn parse_if_expression(&mut self) -> Option<Expression> {
        let token = self.cur_token.clone();
        self.expect_peek(TokenType::LPAREN)?;

        self.next_token();
        let condition = self.parse_expression(Precedence::LOWEST)?;
        self.expect_peek(TokenType::RPAREN)?;
        self.expect_peek(TokenType::LBRACE)?;

        let consequence = self.parse_block_statement();

        let alternative = if self.peek_token_is(TokenType::ELSE) {
            self.next_token();
            self.expect_peek(TokenType::LBRACE)?;
            Some(self.parse_block_statement())
        } else {
            None
        };

        Some(Expression::If {
            token,
            condition: Box::new(condition),
            consequence,
            alternative,
        })
    }

    fn parse_block_statement(&mut self) -> BlockStatement {
        let token = self.cur_token.clone();
        let mut statements = Vec::new();
        self.next_token();
        while !self.cur_token_is(TokenType::RBRACE) && !self.cur_token_is(TokenType::EOF) {
            match self.parse_statement() {
                Some(st) => statements.push(st),
                None => {
                    if self.synchronize() {
                        break;
                    }
                },
            }
            self.next_token();
        }
        BlockStatement { token, statements }
    }

    fn parse_function_literal(&mut self) -> Option<Expression> {
        let token = self.cur_token.clone();
        self.expect_peek(TokenType::LPAREN)?;
        let parameters = self.parse_function_parameters()?;

        self.expect_peek(TokenType::LBRACE)?;

        let body = self.parse_block_statement();

        Some(Expression::Function(FunctionLiteral { token, parameters, body }))
    }

    fn parse_function_parameters(&mut self) -> Option<Vec<Identifier>> {
        let mut params = Vec::new();
        if self.peek_token_is(TokenType::RPAREN) {
            self.next_token();
            return Some(params);
        }

        self.expect_peek(TokenType::IDENT)?;
        params.push(self.current_identifier());

        while self.peek_token_is(TokenType::COMMA) {
            self.next_token();
            self.expect_peek(TokenType::IDENT)?;
            params.push(self.current_identifier());
        }

        self.expect_peek(TokenType::RPAREN)?;
        Some(params)
    }

    fn parse_call_expression(&mut self, function: Expression) -> Option<Expression> {
        let token = self.cur_token.clone();
        let arguments = self.parse_expression_list(TokenType::RPAREN)?;
        Some(Expression::Call { token, function: Box::new(function), arguments })
    }

    fn parse_expression_list(&mut self, end: TokenType) -> Option<Vec<Expression>> {
        let mut list = Vec::new();
        if self.peek_token_is(end) {
            self.next_token();
            return Some(list)
        }
        self.next_token();
        list.push(self.parse_expression(Precedence::LOWEST)?);

        while self.peek_token_is(TokenType::COMMA) {
            self.next_token();
            self.next_token();
            list.push(self.parse_expression(Precedence::LOWEST)?);
        }
        self.expect_peek(end)?;
        Some(list)
    }

    fn parse_array_literal(&mut self) -> Option<Expression> {
        let token = self.cur_token.clone();
        let elements = self.parse_expression_list(TokenType::RBRACKET)?;
        Some(Expression::Array { token, elements })
    }

    fn parse_index_expression(&mut self, left: Expression) -> Option<Expression> {
        let token = self.cur_token.clone();
        self.next_token();
        let index = self.parse_expression(Precedence::LOWEST)?;

        self.expect_peek(TokenType::RBRACKET)?;

        Some(Expression::Index { token, left: Box::new(left), index: Box::new(index) })
    }

    fn parse_hash_literal(&mut self) -> Option<Expression> {
        let token = self.cur_token.clone();
        let mut pairs = Vec::new();

        while !self.peek_token_is(TokenType::RBRACE) {
            self.next_token();
            let key = self.parse_expression(Precedence::LOWEST)?;
            self.expect_peek(TokenType::COLON)?;

            self.next_token();

            let value = self.parse_expression(Precedence::LOWEST)?;
            if !self.peek_token_is(TokenType::RBRACE) {
                self.expect_peek(TokenType::COMMA)?;
            }

            pairs.push((key, value));
        }

        self.expect_peek(TokenType::RBRACE)?;
        Some(Expression::Hash { token, pairs })
    }
}
