//! Hand-written lexer for the layered surface language
//!
//! Newlines are significant (they terminate statements) so they are produced
//! as tokens. Characters the language has no use for become `Unknown` tokens;
//! the parser decides whether that is an error, because the free-form annotation text
//! of a layer declaration may contain anything.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tok {
    Eof,
    Newline,

    Ident(String),
    Int(String),

    // Keywords.
    KwDef,
    KwIf,
    KwElse,
    KwWhile,
    KwReturn,
    KwBreak,
    KwContinue,
    KwTrue,
    KwFalse,

    // Delimiters.
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Semi,

    // Operators.
    Assign,
    Arrow,
    Plus,
    Minus,
    Star,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Bang,

    Unknown(char),
}

impl Tok {
    /// Operator spelling, used as the text of operator tokens in the tree.
    pub fn operator_symbol(&self) -> Option<&'static str> {
        Some(match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::AndAnd => "&&",
            Self::OrOr => "||",
            Self::Bang => "!",
            _ => return None,
        })
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Eof => "end of input".to_string(),
            Self::Newline => "newline".to_string(),
            Self::Ident(name) => format!("identifier '{}'", name),
            Self::Int(text) => format!("integer {}", text),
            Self::Unknown(ch) => format!("character '{}'", ch),
            other => match other.operator_symbol() {
                Some(symbol) => format!("'{}'", symbol),
                None => format!("{:?}", other),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexToken {
    pub kind: Tok,
    /// Byte offset of the first character.
    pub start: usize,
    pub end: usize,
}

pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    pub fn next_token(&mut self) -> LexToken {
        self.skip_blanks_and_comments();

        let start = self.pos;
        let Some(ch) = self.peek_char() else {
            return self.token(Tok::Eof, start);
        };

        if is_ident_start(ch) {
            return self.lex_ident_or_keyword();
        }

        if ch.is_ascii_digit() {
            while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                self.bump_char();
            }
            let text = self.src[start..self.pos].to_string();
            return self.token(Tok::Int(text), start);
        }

        self.bump_char();
        let kind = match ch {
            '\n' => Tok::Newline,
            '(' => Tok::LParen,
            ')' => Tok::RParen,
            '{' => Tok::LBrace,
            '}' => Tok::RBrace,
            ',' => Tok::Comma,
            ':' => Tok::Colon,
            ';' => Tok::Semi,
            '+' => Tok::Plus,
            '*' => Tok::Star,
            '-' => {
                if self.eat('>') { Tok::Arrow } else { Tok::Minus }
            }
            '=' => {
                if self.eat('=') { Tok::EqEq } else { Tok::Assign }
            }
            '!' => {
                if self.eat('=') { Tok::NotEq } else { Tok::Bang }
            }
            '<' => {
                if self.eat('=') { Tok::LtEq } else { Tok::Lt }
            }
            '>' => {
                if self.eat('=') { Tok::GtEq } else { Tok::Gt }
            }
            '&' => {
                if self.eat('&') { Tok::AndAnd } else { Tok::Unknown('&') }
            }
            '|' => {
                if self.eat('|') { Tok::OrOr } else { Tok::Unknown('|') }
            }
            other => Tok::Unknown(other),
        };

        self.token(kind, start)
    }

    /// Consumes raw text from `start` up to (not including) the next newline.
    ///
    /// Used for the annotation text of layer declarations, which has its own syntax
    /// owned by the layer. `start` must not be past the current position.
    pub fn take_rest_of_line(&mut self, start: usize) -> &'a str {
        let end = self.src[start..]
            .find('\n')
            .map_or(self.src.len(), |idx| start + idx);
        self.pos = end;
        self.src[start..end].trim()
    }

    fn token(&self, kind: Tok, start: usize) -> LexToken {
        LexToken { kind, start, end: self.pos }
    }

    fn lex_ident_or_keyword(&mut self) -> LexToken {
        let start = self.pos;
        while self.peek_char().is_some_and(is_ident_continue) {
            self.bump_char();
        }

        let text = &self.src[start..self.pos];
        let kind = match text {
            "def" => Tok::KwDef,
            "if" => Tok::KwIf,
            "else" => Tok::KwElse,
            "while" => Tok::KwWhile,
            "return" => Tok::KwReturn,
            "break" => Tok::KwBreak,
            "continue" => Tok::KwContinue,
            "true" => Tok::KwTrue,
            "false" => Tok::KwFalse,
            _ => Tok::Ident(text.to_string()),
        };
        self.token(kind, start)
    }

    fn skip_blanks_and_comments(&mut self) {
        loop {
            match self.peek_char() {
                Some(' ' | '\t' | '\r') => {
                    self.bump_char();
                }
                Some('#') => {
                    while self.peek_char().is_some_and(|c| c != '\n') {
                        self.bump_char();
                    }
                }
                _ => return,
            }
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek_char() == Some(expected) {
            self.bump_char();
            true
        } else {
            false
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump_char(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }
}

fn is_ident_start(ch: char) -> bool {
    ch == '_' || ch.is_ascii_alphabetic()
}

fn is_ident_continue(ch: char) -> bool {
    ch == '_' || ch.is_ascii_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Tok> {
        let mut lexer = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let token = lexer.next_token();
            if token.kind == Tok::Eof {
                return out;
            }
            out.push(token.kind);
        }
    }

    #[test]
    fn test_operators_and_keywords() {
        assert_eq!(
            kinds("if a >= 10 && !b { return }"),
            vec![
                Tok::KwIf,
                Tok::Ident("a".into()),
                Tok::GtEq,
                Tok::Int("10".into()),
                Tok::AndAnd,
                Tok::Bang,
                Tok::Ident("b".into()),
                Tok::LBrace,
                Tok::KwReturn,
                Tok::RBrace,
            ]
        );
    }

    #[test]
    fn test_comments_and_newlines() {
        assert_eq!(
            kinds("x = 1 # trailing\n# whole line\ny"),
            vec![
                Tok::Ident("x".into()),
                Tok::Assign,
                Tok::Int("1".into()),
                Tok::Newline,
                Tok::Newline,
                Tok::Ident("y".into()),
            ]
        );
    }

    #[test]
    fn test_take_rest_of_line() {
        let src = "f : liquid : {v:Int | v > 0} -> Int\nnext";
        let mut lexer = Lexer::new(src);
        for _ in 0..4 {
            lexer.next_token();
        }
        let brace = lexer.next_token();
        assert_eq!(brace.kind, Tok::LBrace);

        assert_eq!(lexer.take_rest_of_line(brace.start), "{v:Int | v > 0} -> Int");
        assert_eq!(lexer.next_token().kind, Tok::Newline);
        assert_eq!(lexer.next_token().kind, Tok::Ident("next".into()));
    }
}
