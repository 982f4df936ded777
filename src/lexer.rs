use crate::token::{look_up_ident, Token, TokenType};

/// A lazily produced stream of tokens. Once the input is exhausted every
/// further call yields an EOF token.
pub trait TokenSource {
    fn next_token(&mut self) -> Token;
}

pub struct Lexer {
    input: Vec<char>,
    position: usize,
    read_position: usize,
    ch: char,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        let mut l = Lexer {
            input: input.chars().collect(),
            position: 0,
            read_position: 0,
            ch: '\0',
        };
        l.read_char();
        l
    }

    fn skip_white_space(&mut self) {
        while self.ch.is_ascii_whitespace() {
            self.read_char();
        }
    }

    fn read_char(&mut self) {
        self.ch = self.peek_char();
        self.position = self.read_position;
        self.read_position += 1;
    }

    fn peek_char(&self) -> char {
        self.input.get(self.read_position).copied().unwrap_or('\0')
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn slice(&self, start: usize) -> String {
        self.input[start..self.position.min(self.input.len())].iter().collect()
    }

    fn read_identifier(&mut self) -> String {
        let position = self.position;
        while is_letter(self.ch) || self.ch.is_ascii_digit() {
            self.read_char();
        }
        self.slice(position)
    }

    fn read_number(&mut self) -> String {
        let position = self.position;
        while self.ch.is_ascii_digit() {
            self.read_char();
        }
        self.slice(position)
    }

    fn read_string(&mut self) -> String {
        let position = self.position + 1;
        loop {
            self.read_char();
            if self.ch == '"' || self.is_at_end() {
                break;
            }
        }
        self.slice(position)
    }

    fn two_char_token(&mut self, token_type: TokenType) -> Token {
        let first = self.ch;
        self.read_char();
        Token {
            token_type,
            literal: format!("{}{}", first, self.ch),
        }
    }
}

impl TokenSource for Lexer {
    fn next_token(&mut self) -> Token {
        self.skip_white_space();

        if self.is_at_end() {
            return Token::eof();
        }

        let tok = match self.ch {
            '=' => if self.peek_char() == '=' {
                self.two_char_token(TokenType::EQ)
            } else {
                new_token(TokenType::ASSIGN, self.ch)
            },
            '!' => if self.peek_char() == '=' {
                self.two_char_token(TokenType::NotEq)
            } else {
                new_token(TokenType::BANG, self.ch)
            },
            '+' => new_token(TokenType::PLUS, self.ch),
            '-' => new_token(TokenType::MINUS, self.ch),
            '*' => new_token(TokenType::ASTERISK, self.ch),
            '/' => new_token(TokenType::SLASH, self.ch),
            '<' => new_token(TokenType::LT, self.ch),
            '>' => new_token(TokenType::GT, self.ch),
            ';' => new_token(TokenType::SEMICOLON, self.ch),
            ':' => new_token(TokenType::COLON, self.ch),
            ',' => new_token(TokenType::COMMA, self.ch),
            '{' => new_token(TokenType::LBRACE, self.ch),
            '}' => new_token(TokenType::RBRACE, self.ch),
            '(' => new_token(TokenType::LPAREN, self.ch),
            ')' => new_token(TokenType::RPAREN, self.ch),
            '[' => new_token(TokenType::LBRACKET, self.ch),
            ']' => new_token(TokenType::RBRACKET, self.ch),
            '"' => Token {
                token_type: TokenType::STRING,
                literal: self.read_string(),
            },
            _ => if is_letter(self.ch) {
                let literal = self.read_identifier();
                return Token {
                    token_type: look_up_ident(&literal),
                    literal,
                };
            } else if self.ch.is_ascii_digit() {
                let literal = self.read_number();
                return Token {
                    token_type: TokenType::INT,
                    literal,
                };
            } else {
                new_token(TokenType::ILLEGAL, self.ch)
            },
        };
        self.read_char();

        tok
    }
}

/// Replays a fixed list of tokens, then EOF forever.
impl TokenSource for std::vec::IntoIter<Token> {
    fn next_token(&mut self) -> Token {
        self.next().unwrap_or_else(Token::eof)
    }
}

fn is_letter(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn new_token(token_type: TokenType, ch: char) -> Token {
    Token {
        token_type,
        literal: ch.to_string(),
    }
}
