use crate::lexer::cursor::Cursor;
use crate::ops::Mnemonic;
use crate::span::{Idx, Span};

pub mod cursor;

/// A single token of B33 assembly source.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Token { kind, span }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LiteralKind {
    /// Plain digits
    Dec,
    /// `$` prefix
    Hex,
    /// `%` prefix
    Bin,
    Str { terminated: bool },
}

/// Token kinds are matched in a fixed priority order: comments, strings,
/// whitespace, newlines, numeric literals, punctuation, then identifiers.
/// Mnemonics are identifiers that resolve against the instruction table, so
/// a label like `LDAX` can never be cut short into `LDA` + `X`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenKind {
    Comment,
    /// Spaces and tabs. Newlines are significant and reported separately.
    Whitespace,
    Newline,
    Lit(LiteralKind),
    /// `#`
    Hash,
    /// `,`
    Comma,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// A recognized instruction or directive word.
    Instr(Mnemonic),
    /// Catch-all for labels and register names.
    Ident,
    /// Single unrecognized character.
    Undefined,
    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let desc = match self {
            TokenKind::Comment => "comment",
            TokenKind::Whitespace => "whitespace",
            TokenKind::Newline => "newline",
            TokenKind::Lit(LiteralKind::Dec) => "decimal literal",
            TokenKind::Lit(LiteralKind::Hex) => "hex literal",
            TokenKind::Lit(LiteralKind::Bin) => "binary literal",
            TokenKind::Lit(LiteralKind::Str { .. }) => "string literal",
            TokenKind::Hash => "`#`",
            TokenKind::Comma => "`,`",
            TokenKind::Plus => "`+`",
            TokenKind::Minus => "`-`",
            TokenKind::Instr(_) => "instruction",
            TokenKind::Ident => "identifier",
            TokenKind::Undefined => "unrecognized character",
            TokenKind::Eof => "end of file",
        };
        f.write_str(desc)
    }
}

/// Test if a character is considered to be inline whitespace.
pub(crate) fn is_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r')
}

pub(crate) fn is_id_start(c: char) -> bool {
    matches!(c, 'a'..='z' | 'A'..='Z' | '_')
}

pub(crate) fn is_id(c: char) -> bool {
    matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_')
}

impl Cursor<'_> {
    fn advance_token(&mut self) -> (TokenKind, u32) {
        let first_char = match self.bump() {
            Some(c) => c,
            None => return (TokenKind::Eof, 0),
        };
        let kind = match first_char {
            ';' => {
                self.take_while(|c| c != '\n');
                TokenKind::Comment
            }
            '"' => {
                self.take_while(|c| c != '"' && c != '\n');
                let terminated = self.first() == '"';
                if terminated {
                    self.bump();
                }
                TokenKind::Lit(LiteralKind::Str { terminated })
            }
            c if is_whitespace(c) => {
                self.take_while(is_whitespace);
                TokenKind::Whitespace
            }
            '\n' => TokenKind::Newline,
            '0'..='9' => {
                self.take_while(|c| c.is_ascii_digit());
                TokenKind::Lit(LiteralKind::Dec)
            }
            '$' => {
                self.take_while(|c| c.is_ascii_hexdigit());
                TokenKind::Lit(LiteralKind::Hex)
            }
            '%' => {
                self.take_while(|c| matches!(c, '0' | '1'));
                TokenKind::Lit(LiteralKind::Bin)
            }
            '#' => TokenKind::Hash,
            ',' => TokenKind::Comma,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            // Identifiers are scanned to their full extent before being
            // classified, so mnemonic recognition only fires when the word
            // ends at a token boundary.
            c if is_id_start(c) => {
                self.take_while(is_id);
                TokenKind::Ident
            }
            _ => TokenKind::Undefined,
        };
        let len = self.pos_in_token();
        self.reset_pos();
        (kind, len)
    }
}

/// Lazy, restartable stream of tokens with one-token lookahead.
///
/// Never fails: unrecognized characters come out as [`TokenKind::Undefined`].
#[derive(Clone)]
pub struct TokenStream<'a> {
    src: &'a str,
    cursor: Cursor<'a>,
    pos: u32,
    peeked: Option<Token>,
}

impl<'a> TokenStream<'a> {
    pub fn new(src: &'a str) -> Self {
        TokenStream {
            src,
            cursor: Cursor::new(src),
            pos: 0,
            peeked: None,
        }
    }

    /// Source text under a token's span.
    pub fn slice(&self, span: Span) -> &'a str {
        &self.src[span.as_range()]
    }

    /// Consume and return the next token.
    pub fn next(&mut self) -> Token {
        if let Some(tok) = self.peeked.take() {
            return tok;
        }
        self.lex()
    }

    /// Look at the next token without consuming it.
    pub fn peek(&mut self) -> Token {
        if self.peeked.is_none() {
            self.peeked = Some(self.lex());
        }
        self.peeked.unwrap()
    }

    fn lex(&mut self) -> Token {
        let (kind, len) = self.cursor.advance_token();
        let span = Span::new(Idx(self.pos), len as u16);
        self.pos += len;
        // Mnemonics resolve only after the full word is taken.
        let kind = match kind {
            TokenKind::Ident => match self.src[span.as_range()].parse::<Mnemonic>() {
                Ok(mnemonic) => TokenKind::Instr(mnemonic),
                Err(_) => TokenKind::Ident,
            },
            other => other,
        };
        Token::new(kind, span)
    }
}

/// Tokenize an entire input. Not used in assembly, more for debug purposes.
pub fn tokenize(input: &str) -> impl Iterator<Item = Token> + '_ {
    let mut stream = TokenStream::new(input);
    std::iter::from_fn(move || {
        let token = stream.next();
        if token.kind != TokenKind::Eof {
            Some(token)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::Mnemonic;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).map(|tok| tok.kind).collect()
    }

    #[test]
    fn lex_mnemonic_with_boundary() {
        assert_eq!(
            kinds("LDA #5"),
            vec![
                TokenKind::Instr(Mnemonic::Lda),
                TokenKind::Whitespace,
                TokenKind::Hash,
                TokenKind::Lit(LiteralKind::Dec),
            ]
        );
    }

    #[test]
    fn lex_label_starting_with_mnemonic() {
        // A label that merely begins with a mnemonic's letters stays whole.
        assert_eq!(kinds("LDAX"), vec![TokenKind::Ident]);
        assert_eq!(kinds("ENDING"), vec![TokenKind::Ident]);
    }

    #[test]
    fn lex_mnemonic_case_insensitive() {
        assert_eq!(kinds("lda"), vec![TokenKind::Instr(Mnemonic::Lda)]);
        assert_eq!(kinds("Sta"), vec![TokenKind::Instr(Mnemonic::Sta)]);
    }

    #[test]
    fn lex_number_bases() {
        assert_eq!(kinds("255"), vec![TokenKind::Lit(LiteralKind::Dec)]);
        assert_eq!(kinds("$2000"), vec![TokenKind::Lit(LiteralKind::Hex)]);
        assert_eq!(kinds("%1010"), vec![TokenKind::Lit(LiteralKind::Bin)]);
    }

    #[test]
    fn lex_indexed_suffix() {
        assert_eq!(
            kinds(",X++"),
            vec![
                TokenKind::Comma,
                TokenKind::Ident,
                TokenKind::Plus,
                TokenKind::Plus,
            ]
        );
    }

    #[test]
    fn lex_unknown_single_char() {
        // Unrecognized characters produce a token and advance by one.
        assert_eq!(
            kinds("@@"),
            vec![TokenKind::Undefined, TokenKind::Undefined]
        );
    }

    #[test]
    fn lex_comment_to_eol() {
        assert_eq!(
            kinds("; comment\nLDA"),
            vec![
                TokenKind::Comment,
                TokenKind::Newline,
                TokenKind::Instr(Mnemonic::Lda),
            ]
        );
    }

    #[test]
    fn lex_unterminated_string() {
        assert_eq!(
            kinds("\"abc"),
            vec![TokenKind::Lit(LiteralKind::Str { terminated: false })]
        );
    }

    #[test]
    fn peek_does_not_consume() {
        let mut stream = TokenStream::new("LDA B");
        let peeked = stream.peek();
        let next = stream.next();
        assert_eq!(peeked, next);
        assert_eq!(next.kind, TokenKind::Instr(Mnemonic::Lda));
    }
}
