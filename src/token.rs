use std::fmt;
use std::fmt::Formatter;

#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Hash, Clone, Copy)]
pub enum TokenType {
    ILLEGAL,
    EOF,

    IDENT,
    INT,
    STRING,

    ASSIGN,
    PLUS,
    MINUS,
    BANG, // !
    ASTERISK,
    SLASH,

    LT,
    GT,
    EQ,
    NotEq,

    COMMA,
    SEMICOLON,
    COLON,

    LPAREN, // (
    RPAREN, // )
    LBRACE, // {
    RBRACE, // }
    LBRACKET, // [
    RBRACKET, // ]

    // keywords
    FUNCTION, // fn
    LET, // let
    TRUE, // true
    FALSE, // false
    NULL, // null
    IF, // if
    ELSE, // else
    RETURN, // return
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}",
            match &self {
                TokenType::ILLEGAL => "ILLEGAL",
                TokenType::EOF => "EOF",
                TokenType::IDENT => "IDENT",
                TokenType::INT => "INT",
                TokenType::STRING => "STRING",
                TokenType::ASSIGN => "=",
                TokenType::PLUS => "+",
                TokenType::MINUS => "-",
                TokenType::BANG => "!",
                TokenType::ASTERISK => "*",
                TokenType::SLASH => "/",
                TokenType::LT => "<",
                TokenType::GT => ">",
                TokenType::EQ => "==",
                TokenType::NotEq => "!=",
                TokenType::COMMA => ",",
                TokenType::SEMICOLON => ";",
                TokenType::COLON => ":",
                TokenType::LPAREN => "(",
                TokenType::RPAREN => ")",
                TokenType::LBRACE => "{",
                TokenType::RBRACE => "}",
                TokenType::LBRACKET => "[",
                TokenType::RBRACKET => "]",
                TokenType::FUNCTION => "FUNCTION",
                TokenType::LET => "LET",
                TokenType::TRUE => "TRUE",
                TokenType::FALSE => "FALSE",
                TokenType::NULL => "NULL",
                TokenType::IF => "IF",
                TokenType::ELSE => "ELSE",
                TokenType::RETURN => "RETURN",
            }
        )
    }
}

#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Hash, Clone)]
pub struct Token {
    pub token_type: TokenType,
    pub literal: String
}

impl Token {
    pub fn new(token_type: TokenType, literal: &str) -> Self {
        Token { token_type, literal: literal.to_string() }
    }

    pub fn eof() -> Self {
        Token::new(TokenType::EOF, "")
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}: {}}}", self.token_type, self.literal)
    }
}

pub fn look_up_ident(ident: &str) -> TokenType {
    match ident {
        "fn" => TokenType::FUNCTION,
        "let" => TokenType::LET,
        "true" => TokenType::TRUE,
        "false" => TokenType::FALSE,
        "null" => TokenType::NULL,
        "if" => TokenType::IF,
        "else" => TokenType::ELSE,
        "return" => TokenType::RETURN,
        _ => TokenType::IDENT,
    }
}
