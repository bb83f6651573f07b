// Formula tokenizer - a character-class driven scanner that turns
// formula text into a flat token sequence. Never fails: malformed input
// becomes an Error token in the stream and scanning continues, so a
// caller can still report position and context.

use serde::{Deserialize, Serialize};

/// Kind of a scanned token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    Num,
    Coord,
    Op,
    Name,
    Error,
    Str,
    Space,
}

/// Normalized operator identity. Multi-character comparison operators
/// collapse to single opcodes (`G`, `L`, `N`) and unary sign operators
/// get their own opcodes (`M`, `P`) disjoint from binary `+`/`-`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpCode {
    Plus,
    Minus,
    Multiply,
    Divide,
    Power,
    Concat,
    Percent,
    OpenParen,
    CloseParen,
    Comma,
    Colon,
    Bang,
    Less,
    Greater,
    Equal,
    GreaterEqual,
    LessEqual,
    NotEqual,
    UnaryMinus,
    UnaryPlus,
}

impl OpCode {
    /// Single-character internal identifier.
    pub fn as_char(&self) -> char {
        match self {
            OpCode::Plus => '+',
            OpCode::Minus => '-',
            OpCode::Multiply => '*',
            OpCode::Divide => '/',
            OpCode::Power => '^',
            OpCode::Concat => '&',
            OpCode::Percent => '%',
            OpCode::OpenParen => '(',
            OpCode::CloseParen => ')',
            OpCode::Comma => ',',
            OpCode::Colon => ':',
            OpCode::Bang => '!',
            OpCode::Less => '<',
            OpCode::Greater => '>',
            OpCode::Equal => '=',
            OpCode::GreaterEqual => 'G',
            OpCode::LessEqual => 'L',
            OpCode::NotEqual => 'N',
            OpCode::UnaryMinus => 'M',
            OpCode::UnaryPlus => 'P',
        }
    }

    /// Operator precedence, 1 = tightest. Unary operators carry a
    /// negative value; the converter compares them by absolute value
    /// with a strict threshold to get right-associativity.
    pub(crate) fn precedence(&self) -> i8 {
        match self {
            OpCode::Bang => 1,
            OpCode::Colon | OpCode::Comma => 2,
            OpCode::UnaryMinus | OpCode::UnaryPlus => -3,
            OpCode::Percent => 4,
            OpCode::Power => 5,
            OpCode::Multiply | OpCode::Divide => 6,
            OpCode::Plus | OpCode::Minus => 7,
            OpCode::Concat => 8,
            OpCode::Less
            | OpCode::Greater
            | OpCode::Equal
            | OpCode::GreaterEqual
            | OpCode::LessEqual
            | OpCode::NotEqual => 9,
            OpCode::OpenParen | OpCode::CloseParen => 0,
        }
    }
}

/// One scanned token. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    pub kind: TokenKind,
    pub opcode: Option<OpCode>,
}

impl Token {
    fn plain(kind: TokenKind, text: impl Into<String>) -> Token {
        Token {
            text: text.into(),
            kind,
            opcode: None,
        }
    }

    fn op(text: impl Into<String>, opcode: OpCode) -> Token {
        Token {
            text: text.into(),
            kind: TokenKind::Op,
            opcode: Some(opcode),
        }
    }

    fn error(text: impl Into<String>) -> Token {
        Token::plain(TokenKind::Error, text)
    }

    pub fn is_op(&self, opcode: OpCode) -> bool {
        self.opcode == Some(opcode)
    }
}

/// The tokenized formula. The postfix program addresses tokens by index
/// into this sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseInfo {
    pub tokens: Vec<Token>,
}

impl ParseInfo {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Token> {
        self.tokens.get(index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Idle,
    Num,
    NumExp1,
    NumExp2,
    Alpha,
    InCoord,
    AlphaNum,
    Str,
    StrQuote,
    Special,
}

fn is_op_char(c: char) -> bool {
    matches!(
        c,
        '+' | '-' | '*' | '/' | '^' | '&' | '%' | '(' | ')' | ',' | ':' | '!' | '<' | '>' | '='
    )
}

fn is_space_char(c: char) -> bool {
    c == ' ' || c == '\t'
}

/// Scan formula text (without any leading `=`) into tokens.
pub fn tokenize(text: &str) -> ParseInfo {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens: Vec<Token> = Vec::new();
    let mut state = State::Idle;
    let mut buf = String::new();
    let mut exp_sign_seen = false;
    let mut i = 0;

    loop {
        let ch = chars.get(i).copied();
        let mut advance = true;

        match state {
            State::Idle => match ch {
                None => break,
                Some(c) if c.is_ascii_digit() || c == '.' => {
                    buf.push(c);
                    state = State::Num;
                }
                Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                    buf.push(c);
                    state = State::Alpha;
                }
                Some('$') => {
                    buf.push('$');
                    state = State::InCoord;
                }
                Some('"') => {
                    state = State::Str;
                }
                Some('#') => {
                    buf.push('#');
                    state = State::Special;
                }
                Some(c) if is_space_char(c) => {
                    // Runs of spaces collapse into one token but the
                    // text keeps every character, so the original
                    // formatting can be reconstructed.
                    match tokens.last_mut() {
                        Some(tok) if tok.kind == TokenKind::Space => tok.text.push(c),
                        _ => tokens.push(Token::plain(TokenKind::Space, c)),
                    }
                }
                Some(c) if is_op_char(c) => {
                    emit_operator(&mut tokens, c);
                }
                Some(c) => {
                    tokens.push(Token::error(format!("Unexpected character '{}'", c)));
                }
            },

            State::Num => match ch {
                Some(c) if c.is_ascii_digit() || c == '.' => buf.push(c),
                Some('E') | Some('e') => {
                    buf.push('E');
                    exp_sign_seen = false;
                    state = State::NumExp1;
                }
                _ => {
                    finish_number(&mut tokens, &mut buf);
                    state = State::Idle;
                    advance = false;
                }
            },

            State::NumExp1 => match ch {
                Some(c) if c.is_ascii_digit() => {
                    buf.push(c);
                    state = State::NumExp2;
                }
                Some(c @ ('+' | '-')) if !exp_sign_seen => {
                    buf.push(c);
                    exp_sign_seen = true;
                }
                _ => {
                    tokens.push(Token::error(format!(
                        "Improperly formed number exponent '{}'",
                        buf
                    )));
                    buf.clear();
                    state = State::Idle;
                    advance = false;
                }
            },

            State::NumExp2 => match ch {
                Some(c) if c.is_ascii_digit() => buf.push(c),
                _ => {
                    finish_number(&mut tokens, &mut buf);
                    state = State::Idle;
                    advance = false;
                }
            },

            State::Alpha => match ch {
                Some(c) if c.is_ascii_alphabetic() => buf.push(c),
                Some(c @ ('_' | '.')) => {
                    buf.push(c);
                    state = State::AlphaNum;
                }
                Some(c) if c.is_ascii_digit() || c == '$' => {
                    buf.push(c);
                    state = State::InCoord;
                }
                _ => {
                    tokens.push(Token::plain(TokenKind::Name, buf.clone()));
                    buf.clear();
                    state = State::Idle;
                    advance = false;
                }
            },

            State::InCoord => match ch {
                Some(c) if c.is_ascii_digit() || c == '$' => buf.push(c),
                Some(c) if c.is_ascii_alphabetic() => {
                    // Letters after digits mean this was never a cell
                    // coordinate; it reverts to a general name.
                    buf.push(c);
                    if buf.chars().any(|b| b.is_ascii_digit()) {
                        state = State::AlphaNum;
                    }
                }
                Some(c @ ('_' | '.')) => {
                    buf.push(c);
                    state = State::AlphaNum;
                }
                _ => {
                    finish_coord_or_name(&mut tokens, &mut buf);
                    state = State::Idle;
                    advance = false;
                }
            },

            State::AlphaNum => match ch {
                Some(c) if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$') => buf.push(c),
                _ => {
                    tokens.push(Token::plain(TokenKind::Name, buf.clone()));
                    buf.clear();
                    state = State::Idle;
                    advance = false;
                }
            },

            State::Str => match ch {
                None => {
                    tokens.push(Token::error("Unterminated string literal"));
                    buf.clear();
                    state = State::Idle;
                    advance = false;
                }
                Some('"') => state = State::StrQuote,
                Some(c) => buf.push(c),
            },

            State::StrQuote => match ch {
                // A doubled quote is an escaped quote, not a terminator.
                Some('"') => {
                    buf.push('"');
                    state = State::Str;
                }
                _ => {
                    tokens.push(Token::plain(TokenKind::Str, buf.clone()));
                    buf.clear();
                    state = State::Idle;
                    advance = false;
                }
            },

            State::Special => match ch {
                Some(c @ ('!' | '?')) => {
                    buf.push(c);
                    // A literal error constant such as #REF! or #NAME?;
                    // emitted as a name so name lookup can map it to its
                    // value.
                    tokens.push(Token::plain(TokenKind::Name, buf.clone()));
                    buf.clear();
                    state = State::Idle;
                }
                Some(c) if c.is_ascii_alphanumeric() || c == '/' => {
                    buf.push(c);
                    // #N/A carries no terminator of its own.
                    if buf == "#N/A" {
                        tokens.push(Token::plain(TokenKind::Name, buf.clone()));
                        buf.clear();
                        state = State::Idle;
                    }
                }
                _ => {
                    tokens.push(Token::error(format!(
                        "Improperly formed special value '{}'",
                        buf
                    )));
                    buf.clear();
                    state = State::Idle;
                    advance = false;
                }
            },
        }

        if advance {
            i += 1;
        }
    }

    ParseInfo { tokens }
}

fn finish_number(tokens: &mut Vec<Token>, buf: &mut String) {
    match buf.parse::<f64>() {
        Ok(_) => tokens.push(Token::plain(TokenKind::Num, buf.clone())),
        Err(_) => tokens.push(Token::error(format!("Invalid number '{}'", buf))),
    }
    buf.clear();
}

fn finish_coord_or_name(tokens: &mut Vec<Token>, buf: &mut String) {
    use super::value::Coord;
    let kind = if Coord::parse(buf).is_some() {
        TokenKind::Coord
    } else {
        TokenKind::Name
    };
    tokens.push(Token::plain(kind, buf.clone()));
    buf.clear();
}

/// Operators expecting an operand on their left. A `+`/`-` directly
/// after one of these (or at the start) is a sign, not a binary op.
fn expects_left_operand(tok: &Token) -> bool {
    tok.kind == TokenKind::Op
        && !tok.is_op(OpCode::CloseParen)
        && !tok.is_op(OpCode::Percent)
}

fn emit_operator(tokens: &mut Vec<Token>, c: char) {
    // Two-character operators are synthesized by peeking back at the
    // previously emitted token: `<` `=` becomes `<=`, `<` `>` becomes
    // `<>`, `>` `=` becomes `>=`. An intervening space token breaks the
    // pair.
    if c == '=' || c == '>' {
        if let Some(last) = tokens.last() {
            let merged = match (last.opcode, c) {
                (Some(OpCode::Less), '=') => Some(("<=", OpCode::LessEqual)),
                (Some(OpCode::Less), '>') => Some(("<>", OpCode::NotEqual)),
                (Some(OpCode::Greater), '=') => Some((">=", OpCode::GreaterEqual)),
                _ => None,
            };
            if let Some((text, opcode)) = merged {
                tokens.pop();
                tokens.push(Token::op(text, opcode));
                return;
            }
        }
    }

    let prev = tokens
        .iter()
        .rev()
        .find(|t| t.kind != TokenKind::Space);
    let after_operator = prev.map(expects_left_operand).unwrap_or(true);

    if (c == '+' || c == '-') && after_operator {
        let opcode = if c == '-' {
            OpCode::UnaryMinus
        } else {
            OpCode::UnaryPlus
        };
        tokens.push(Token::op(c, opcode));
        return;
    }

    // Two value-expecting operators in a row is malformed, except that
    // `(` may follow anything and `()` is a legal empty argument list.
    let prev_is_open = prev.map(|t| t.is_op(OpCode::OpenParen)).unwrap_or(false);
    if after_operator
        && prev.is_some()
        && matches!(
            c,
            '*' | '/' | '^' | '&' | '%' | ':' | '!' | '<' | '>' | '='
        )
    {
        tokens.push(Token::error(format!("Improper operator sequence '{}'", c)));
        return;
    }
    if c == ')' && after_operator && prev.is_some() && !prev_is_open {
        tokens.push(Token::error("Improper operator sequence ')'"));
        return;
    }

    let opcode = match c {
        '+' => OpCode::Plus,
        '-' => OpCode::Minus,
        '*' => OpCode::Multiply,
        '/' => OpCode::Divide,
        '^' => OpCode::Power,
        '&' => OpCode::Concat,
        '%' => OpCode::Percent,
        '(' => OpCode::OpenParen,
        ')' => OpCode::CloseParen,
        ',' => OpCode::Comma,
        ':' => OpCode::Colon,
        '!' => OpCode::Bang,
        '<' => OpCode::Less,
        '>' => OpCode::Greater,
        _ => OpCode::Equal,
    };
    tokens.push(Token::op(c, opcode));
}
