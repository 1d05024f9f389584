use crate::ast::Span;
use crate::bail_lex_at;
use crate::error::Result;
use crate::operators::lexer_operators;
use bitflags::bitflags;
use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_until},
    character::complete::{alpha1, alphanumeric1, char, digit0, digit1, multispace1, not_line_ending, one_of},
    combinator::{opt, recognize, value},
    multi::many0,
    sequence::{pair, tuple},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Number,
    Ident,
    Punct,
    /// `[[`
    AttrOpen,
    /// `]]`
    AttrClose,
    Eof,
}

bitflags! {
    pub struct TokenFlags: u8 {
        const FLOAT = 1 << 0;
        const INTEGER = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub span: Span,
    pub kind: TokenKind,
    pub flags: TokenFlags,
}

impl Token {
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.span.start..self.span.end]
    }
}

fn line_comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(tag("//"), not_line_ending))(input)
}

fn block_comment(input: &str) -> IResult<&str, &str> {
    recognize(tuple((tag("/*"), take_until("*/"), tag("*/"))))(input)
}

fn skip_trivia(input: &str) -> IResult<&str, ()> {
    value((), many0(alt((multispace1, line_comment, block_comment))))(input)
}

fn radix_integer(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((tag("0x"), tag("0X"), tag("0b"), tag("0B"), tag("0o"), tag("0O"))),
        alphanumeric1,
    ))(input)
}

// Maximal munch: [digits][.digits][e[+-]digits][fFdD]
fn decimal_number(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        alt((
            recognize(pair(char('.'), digit1)),
            recognize(pair(digit1, opt(pair(char('.'), digit0)))),
        )),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
        opt(one_of("fFdD")),
    )))(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(alt((alpha1, tag("_"))), many0(alt((alphanumeric1, tag("_"))))))(input)
}

fn punctuation(input: &str) -> IResult<&str, char> {
    one_of("(){}[];:,.")(input)
}

fn is_float_text(text: &str) -> bool {
    text.contains(|c| matches!(c, '.' | 'e' | 'E')) || text.ends_with(|c| matches!(c, 'f' | 'F' | 'd' | 'D'))
}

/// Lazy token stream over a source string.
pub struct Lexer<'a> {
    source: &'a str,
    cursor: usize,
    operators: Vec<&'static str>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer { source, cursor: 0, operators: lexer_operators() }
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    /// Returns the next token and advances past it. At the end of input
    /// this keeps returning `Eof`.
    pub fn next_token(&mut self) -> Result<Token> {
        let rest = &self.source[self.cursor..];
        let rest = match skip_trivia(rest) {
            Ok((rest, ())) => rest,
            Err(_) => rest,
        };
        let start = self.source.len() - rest.len();
        self.cursor = start;

        if rest.is_empty() {
            return Ok(Token { span: Span::new(start, start), kind: TokenKind::Eof, flags: TokenFlags::empty() });
        }
        if rest.starts_with("/*") {
            bail_lex_at!(Span::new(start, start + 2), "Unterminated block comment.");
        }

        let (kind, flags, len) = self.classify(rest)?;
        self.cursor = start + len;
        Ok(Token { span: Span::new(start, start + len), kind, flags })
    }

    fn classify(&self, rest: &str) -> Result<(TokenKind, TokenFlags, usize)> {
        let starts_number = rest.starts_with(|c: char| c.is_ascii_digit())
            || (rest.starts_with('.') && rest[1..].starts_with(|c: char| c.is_ascii_digit()));
        if starts_number {
            if let Ok((_, text)) = radix_integer(rest) {
                return Ok((TokenKind::Number, TokenFlags::INTEGER, text.len()));
            }
            if let Ok((_, text)) = decimal_number(rest) {
                let flags = if is_float_text(text) { TokenFlags::FLOAT } else { TokenFlags::INTEGER };
                return Ok((TokenKind::Number, flags, text.len()));
            }
        }
        if let Ok((_, text)) = identifier(rest) {
            return Ok((TokenKind::Ident, TokenFlags::empty(), text.len()));
        }
        if let Some(op) = self.operators.iter().find(|op| rest.starts_with(*op)) {
            let kind = match *op {
                "[[" => TokenKind::AttrOpen,
                "]]" => TokenKind::AttrClose,
                _ => TokenKind::Punct,
            };
            return Ok((kind, TokenFlags::empty(), op.len()));
        }
        if punctuation(rest).is_ok() {
            return Ok((TokenKind::Punct, TokenFlags::empty(), 1));
        }

        let start = self.source.len() - rest.len();
        let c = rest.chars().next().unwrap_or('\0');
        bail_lex_at!(Span::new(start, start + c.len_utf8()), "Unexpected character '{}'.", c)
    }
}

/// Lexes the whole input. The trailing `Eof` token is not included.
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        if token.kind == TokenKind::Eof {
            break;
        }
        tokens.push(token);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompilerError;

    fn texts(source: &str) -> Vec<&str> {
        tokenize(source).unwrap().iter().map(|t| t.text(source)).collect()
    }

    #[test]
    fn test_tokenize_declaration() {
        let source = "float4 color = x;";
        let tokens = tokenize(source).unwrap();
        assert_eq!(texts(source), vec!["float4", "color", "=", "x", ";"]);
        assert_eq!(tokens[0].kind, TokenKind::Ident);
        assert_eq!(tokens[2].kind, TokenKind::Punct);
        assert_eq!(tokens[4].span, Span::new(16, 17));
    }

    #[test]
    fn test_float_literal_formats() {
        for source in ["1.5", "1.5f", ".5", "2e10", "2.5E-3f", "3f", "4d", "1."] {
            let tokens = tokenize(source).unwrap();
            assert_eq!(tokens.len(), 1, "{}", source);
            assert_eq!(tokens[0].kind, TokenKind::Number);
            assert_eq!(tokens[0].flags, TokenFlags::FLOAT, "{}", source);
        }
    }

    #[test]
    fn test_integer_literal_formats() {
        for source in ["0", "42", "0x1F", "0b1010", "0o17"] {
            let tokens = tokenize(source).unwrap();
            assert_eq!(tokens.len(), 1, "{}", source);
            assert_eq!(tokens[0].flags, TokenFlags::INTEGER, "{}", source);
        }
    }

    #[test]
    fn test_exponent_needs_digits() {
        assert_eq!(texts("2e"), vec!["2", "e"]);
    }

    #[test]
    fn test_operators_maximal_munch() {
        assert_eq!(texts("a<<=b>>c++--d"), vec!["a", "<<=", "b", ">>", "c", "++", "--", "d"]);
        assert_eq!(texts("a&&b||!c"), vec!["a", "&&", "b", "||", "!", "c"]);
        assert_eq!(texts("x<=y"), vec!["x", "<=", "y"]);
    }

    #[test]
    fn test_tokenize_attributes() {
        let source = "[[vk_uniform(0, 1)]]";
        let tokens = tokenize(source).unwrap();
        assert_eq!(tokens.first().unwrap().kind, TokenKind::AttrOpen);
        assert_eq!(tokens.last().unwrap().kind, TokenKind::AttrClose);
        assert_eq!(texts(source), vec!["[[", "vk_uniform", "(", "0", ",", "1", ")", "]]"]);
    }

    #[test]
    fn test_tokenize_with_comments() {
        let source = "a // line\n/* block\n comment */ b";
        assert_eq!(texts(source), vec!["a", "b"]);
    }

    #[test]
    fn test_member_access_after_identifier() {
        assert_eq!(texts("v.xyz"), vec!["v", ".", "xyz"]);
    }

    #[test]
    fn test_eof_is_sticky() {
        let mut lexer = Lexer::new("x");
        assert_eq!(lexer.next_token().unwrap().kind, TokenKind::Ident);
        assert_eq!(lexer.next_token().unwrap().kind, TokenKind::Eof);
        assert_eq!(lexer.next_token().unwrap().kind, TokenKind::Eof);
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize("a $ b").unwrap_err();
        match &err {
            CompilerError::LexError(msg, _) => assert_eq!(msg, "Unexpected character '$'."),
            other => panic!("Expected lex error, got {:?}", other),
        }
        assert_eq!(err.span(), Some(Span::new(2, 3)));
    }

    #[test]
    fn test_unterminated_block_comment() {
        assert!(matches!(tokenize("a /* b"), Err(CompilerError::LexError(..))));
    }
}
