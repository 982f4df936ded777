use std::fmt;
use std::fmt::Formatter;
use itertools::Itertools;
use crate::token::Token;

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Statement>
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for stmt in self.statements.iter() {
            write!(f, "{}", stmt)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Identifier {
    pub token: Token,
    pub value: String,
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockStatement {
    pub token: Token, // {
    pub statements: Vec<Statement>,
}

impl fmt::Display for BlockStatement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for stmt in self.statements.iter() {
            write!(f, "{}", stmt)?
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionLiteral {
    pub token: Token, // fn
    pub parameters: Vec<Identifier>,
    pub body: BlockStatement,
}

impl fmt::Display for FunctionLiteral {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "fn({}) {{ {} }}", self.parameters.iter().join(", "), self.body)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Let { token: Token, name: Identifier, value: Expression },
    Return { token: Token, value: Expression },
    Expression { token: Token, expression: Expression },
    /// A bare block at statement level. The parser only builds blocks as
    /// parts of `if` and `fn`, so this comes from trees assembled in code.
    Block(BlockStatement),
}

impl Statement {
    pub fn token_literal(&self) -> &str {
        match self {
            Statement::Let { token, .. }
            | Statement::Return { token, .. }
            | Statement::Expression { token, .. } => &token.literal,
            Statement::Block(block) => &block.token.literal,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Let { name, value, .. } => write!(f, "let {} = {};", name, value),
            Statement::Return { value, .. } => write!(f, "return {};", value),
            Statement::Expression { expression, .. } => write!(f, "{}", expression),
            Statement::Block(block) => write!(f, "{}", block),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Identifier(Identifier),
    Boolean { token: Token, value: bool },
    Integer { token: Token, value: i64 },
    String { token: Token, value: String },
    Null { token: Token },
    Array { token: Token, elements: Vec<Expression> },
    /// Key/value pairs in source order.
    Hash { token: Token, pairs: Vec<(Expression, Expression)> },
    Prefix {
        token: Token,
        operator: String,
        right: Box<Expression>,
    },
    Infix {
        token: Token,
        operator: String,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    If {
        token: Token,
        condition: Box<Expression>,
        consequence: BlockStatement,
        alternative: Option<BlockStatement>,
    },
    Function(FunctionLiteral),
    Call {
        token: Token, // (
        function: Box<Expression>,
        arguments: Vec<Expression>,
    },
    Index {
        token: Token, // [
        left: Box<Expression>,
        index: Box<Expression>,
    },
}

impl Expression {
    pub fn token(&self) -> &Token {
        match self {
            Expression::Identifier(ident) => &ident.token,
            Expression::Function(func) => &func.token,
            Expression::Boolean { token, .. }
            | Expression::Integer { token, .. }
            | Expression::String { token, .. }
            | Expression::Null { token }
            | Expression::Array { token, .. }
            | Expression::Hash { token, .. }
            | Expression::Prefix { token, .. }
            | Expression::Infix { token, .. }
            | Expression::If { token, .. }
            | Expression::Call { token, .. }
            | Expression::Index { token, .. } => token,
        }
    }

    pub fn token_literal(&self) -> &str {
        &self.token().literal
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Identifier(ident) => write!(f, "{}", ident),
            Expression::Boolean { value, .. } => write!(f, "{}", value),
            Expression::Integer { value, .. } => write!(f, "{}", value),
            Expression::String { value, .. } => write!(f, "{}", value),
            Expression::Null { .. } => write!(f, "null"),
            Expression::Array { elements, .. } => write!(f, "[{}]", elements.iter().join(", ")),
            Expression::Hash { pairs, .. } => {
                write!(f, "{{{}}}", pairs.iter()
                    .map(|(k, v)| format!("{}: {}", k, v))
                    .join(", "))
            },
            Expression::Prefix { operator, right, .. } => write!(f, "({}{})", operator, right),
            Expression::Infix { operator, left, right, .. } => {
                write!(f, "({} {} {})", left, operator, right)
            },
            Expression::If { condition, consequence, alternative, .. } => {
                write!(f, "if {} {{ {} }}", condition, consequence)?;
                if let Some(alt) = alternative {
                    write!(f, " else {{ {} }}", alt)?;
                }
                Ok(())
            },
            Expression::Function(func) => write!(f, "{}", func),
            Expression::Call { function, arguments, .. } => {
                write!(f, "{}({})", function, arguments.iter().join(", "))
            },
            Expression::Index { left, index, .. } => write!(f, "({}[{}])", left, index),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::ast::{Expression, Identifier, Program, Statement};
    use crate::token::{Token, TokenType};

    #[test]
    fn test_ast() {
        let program = Program {
            statements: vec![
                Statement::Let {
                    token: Token::new(TokenType::LET, "let"),
                    name: Identifier {
                        token: Token::new(TokenType::IDENT, "a"),
                        value: "a".to_string(),
                    },
                    value: Expression::Identifier(Identifier {
                        token: Token::new(TokenType::IDENT, "b"),
                        value: "b".to_string(),
                    }),
                }
            ],
        };

        assert_eq!(format!("{}", program), "let a = b;");
        assert_eq!(program.statements[0].token_literal(), "let");
    }

    #[test]
    fn test_expression_keeps_token() {
        let exp = Expression::Infix {
            token: Token::new(TokenType::PLUS, "+"),
            operator: "+".to_string(),
            left: Box::new(Expression::Integer { token: Token::new(TokenType::INT, "1"), value: 1 }),
            right: Box::new(Expression::Integer { token: Token::new(TokenType::INT, "2"), value: 2 }),
        };
        assert_eq!(exp.token_literal(), "+");
        assert_eq!(exp.to_string(), "(1 + 2)");
    }
}
