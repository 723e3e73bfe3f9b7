//! Tokenizer for formula text.

use procsim_core::expr::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    LParen,
    RParen,
    Comma,
}

/// A token and the character offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub position: usize,
}

/// Split formula text into tokens.
///
/// Accepts `=` and `==` for equality, `<>` and `!=` for inequality, `&`/`&&`
/// and `|`/`||` for logic. Identifiers may contain letters, digits, `_`
/// and `.` after the first character.
pub fn tokenize(text: &str) -> Result<Vec<Spanned>, ParseError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let peek = chars.get(i + 1).copied();
        let (token, len) = match c {
            '0'..='9' | '.' => {
                let (value, len) = number(&chars[i..], start)?;
                (Token::Number(value), len)
            }
            c if c.is_alphabetic() || c == '_' => {
                let len = chars[i..]
                    .iter()
                    .take_while(|c| c.is_alphanumeric() || **c == '_' || **c == '.')
                    .count();
                (Token::Ident(chars[i..i + len].iter().collect()), len)
            }
            '+' => (Token::Plus, 1),
            '-' => (Token::Minus, 1),
            '*' => (Token::Star, 1),
            '/' => (Token::Slash, 1),
            '%' => (Token::Percent, 1),
            '^' => (Token::Caret, 1),
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            ',' | ';' => (Token::Comma, 1),
            '=' if peek == Some('=') => (Token::Eq, 2),
            '=' => (Token::Eq, 1),
            '!' if peek == Some('=') => (Token::Ne, 2),
            '!' => (Token::Not, 1),
            '<' if peek == Some('>') => (Token::Ne, 2),
            '<' if peek == Some('=') => (Token::Le, 2),
            '<' => (Token::Lt, 1),
            '>' if peek == Some('=') => (Token::Ge, 2),
            '>' => (Token::Gt, 1),
            '&' if peek == Some('&') => (Token::And, 2),
            '&' => (Token::And, 1),
            '|' if peek == Some('|') => (Token::Or, 2),
            '|' => (Token::Or, 1),
            other => {
                return Err(ParseError::new(start, format!("unexpected character `{other}`")));
            }
        };
        tokens.push(Spanned {
            token,
            position: start,
        });
        i += len;
    }
    Ok(tokens)
}

/// Scan a decimal number with optional fraction and exponent.
fn number(chars: &[char], position: usize) -> Result<(f64, usize), ParseError> {
    let mut len = chars.iter().take_while(|c| c.is_ascii_digit()).count();
    if chars.get(len) == Some(&'.') {
        len += 1;
        len += chars[len..].iter().take_while(|c| c.is_ascii_digit()).count();
    }
    if matches!(chars.get(len), Some('e' | 'E')) {
        let mut exp = len + 1;
        if matches!(chars.get(exp), Some('+' | '-')) {
            exp += 1;
        }
        let digits = chars[exp.min(chars.len())..]
            .iter()
            .take_while(|c| c.is_ascii_digit())
            .count();
        if digits > 0 {
            len = exp + digits;
        }
    }
    let text: String = chars[..len].iter().collect();
    text.parse::<f64>()
        .map(|v| (v, len))
        .map_err(|_| ParseError::new(position, format!("malformed number `{text}`")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<Token> {
        tokenize(text).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn numbers_and_operators() {
        assert_eq!(
            kinds("1 + 2.5*3e2"),
            vec![
                Token::Number(1.0),
                Token::Plus,
                Token::Number(2.5),
                Token::Star,
                Token::Number(300.0),
            ]
        );
    }

    #[test]
    fn two_character_operators() {
        assert_eq!(
            kinds("a<>b && c>=1 || !d"),
            vec![
                Token::Ident("a".into()),
                Token::Ne,
                Token::Ident("b".into()),
                Token::And,
                Token::Ident("c".into()),
                Token::Ge,
                Token::Number(1.0),
                Token::Or,
                Token::Not,
                Token::Ident("d".into()),
            ]
        );
    }

    #[test]
    fn exponent_without_digits_is_an_identifier_boundary() {
        assert_eq!(
            kinds("2e"),
            vec![Token::Number(2.0), Token::Ident("e".into())]
        );
    }

    #[test]
    fn positions_are_character_offsets() {
        let tokens = tokenize("  x * 2").unwrap();
        assert_eq!(tokens[0].position, 2);
        assert_eq!(tokens[1].position, 4);
        assert_eq!(tokens[2].position, 6);
    }

    #[test]
    fn unexpected_character_is_reported() {
        let err = tokenize("1 # 2").unwrap_err();
        assert_eq!(err.position, 2);
    }

    #[test]
    fn lone_dot_is_malformed() {
        assert!(tokenize(".").is_err());
    }
}
