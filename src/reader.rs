//! S-expression reader: turns a character stream into value trees.
//!
//! Token grammar: whitespace and `;`-to-end-of-line comments separate
//! tokens; `(`, `)` and `'` are self-delimiting; a `"`-delimited run is a
//! string literal with `\n \r \t \"` escapes (any other escaped character
//! degrades to the literal character); every other run of bytes is one
//! token. A token that a real-number parser accepts in full becomes a
//! scalar array, anything else a symbol. `'x` is sugar for `(quote x)`.
//!
//! The [`Reader`] is incremental: each `read` call yields one top-level
//! expression and carries a line counter for diagnostics. End of stream
//! inside a list or string reports [`ErrorKind::Incomplete`] so the caller
//! decides whether to stop (`load`) or keep reading (the REPL).

use nom::{
    branch::alt,
    bytes::complete::{is_not, take_while1},
    character::complete::char,
    combinator::{opt, recognize},
    multi::many0_count,
    sequence::pair,
    IResult, Parser,
};

use crate::value::Value;
use crate::{Error, ErrorKind};

/// Characters that terminate a bare token
fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '\'' | '"' | ';')
}

/// Whitespace and comments between tokens
fn blank(input: &str) -> IResult<&str, &str> {
    recognize(many0_count(alt((
        take_while1(|c: char| c.is_whitespace()),
        recognize(pair(char(';'), opt(is_not("\r\n")))),
    ))))
    .parse(input)
}

/// One bare token: a maximal run of non-delimiter bytes
fn token(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !is_delimiter(c)).parse(input)
}

/// Body of a string literal, after the opening quote. Returns the decoded
/// text and the remaining input past the closing quote, or None when the
/// input ends before the literal closes.
fn string_body(input: &str) -> Option<(String, &str)> {
    let mut text = String::new();
    let mut chars = input.chars();
    loop {
        match chars.next() {
            Some('"') => return Some((text, chars.as_str())),
            Some('\\') => match chars.next() {
                Some('n') => text.push('\n'),
                Some('r') => text.push('\r'),
                Some('t') => text.push('\t'),
                Some('"') => text.push('"'),
                // unknown escapes degrade to the literal character
                Some(other) => text.push(other),
                None => return None,
            },
            Some(ch) => text.push(ch),
            None => return None,
        }
    }
}

/// Incremental reader over a source string with a line counter.
pub struct Reader<'a> {
    rest: &'a str,
    line: usize,
    form_line: usize,
}

impl<'a> Reader<'a> {
    pub fn new(source: &'a str) -> Self {
        Reader {
            rest: source,
            line: 1,
            form_line: 1,
        }
    }

    /// Line on which the most recently read expression started (1-based).
    pub fn line(&self) -> usize {
        self.form_line
    }

    /// Consume up to `remaining`, counting the newlines passed over.
    fn advance(&mut self, remaining: &'a str) {
        let consumed = &self.rest[..self.rest.len() - remaining.len()];
        self.line += consumed.bytes().filter(|&b| b == b'\n').count();
        self.rest = remaining;
    }

    fn skip_blank(&mut self) {
        if let Ok((remaining, _)) = blank(self.rest) {
            self.advance(remaining);
        }
    }

    fn peek(&self) -> Option<char> {
        self.rest.chars().next()
    }

    fn bump(&mut self) {
        let mut chars = self.rest.chars();
        chars.next();
        self.advance(chars.as_str());
    }

    /// Read one expression. `Ok(None)` is a clean end of stream; an
    /// unterminated list or string is an [`ErrorKind::Incomplete`] error.
    pub fn read(&mut self) -> Result<Option<Value>, Error> {
        self.skip_blank();
        self.form_line = self.line;
        match self.peek() {
            None => Ok(None),
            Some(')') => {
                self.bump();
                Err(Error::syntax(format!(
                    "unexpected ')' at line {}",
                    self.line
                )))
            }
            Some(_) => self.read_value().map(Some),
        }
    }

    fn read_value(&mut self) -> Result<Value, Error> {
        match self.peek() {
            None => Err(Error::incomplete()),
            Some('(') => {
                self.bump();
                self.read_list()
            }
            Some('\'') => {
                self.bump();
                self.skip_blank();
                let quoted = self.read_value()?;
                Ok(Value::list(vec![Value::symbol("quote"), quoted]))
            }
            Some('"') => {
                self.bump();
                match string_body(self.rest) {
                    Some((text, remaining)) => {
                        self.advance(remaining);
                        Ok(Value::string(text))
                    }
                    None => Err(Error::incomplete()),
                }
            }
            Some(')') => {
                self.bump();
                Err(Error::syntax(format!(
                    "unexpected ')' at line {}",
                    self.line
                )))
            }
            Some(_) => match token(self.rest) {
                Ok((remaining, lexeme)) => {
                    self.advance(remaining);
                    // a full-token real is a scalar, anything else a symbol
                    match lexeme.parse::<f64>() {
                        Ok(x) => Ok(Value::scalar(x)),
                        Err(_) => Ok(Value::symbol(lexeme)),
                    }
                }
                Err(_) => Err(Error::syntax(format!("stray input at line {}", self.line))),
            },
        }
    }

    fn read_list(&mut self) -> Result<Value, Error> {
        let mut items = Vec::new();
        loop {
            self.skip_blank();
            match self.peek() {
                None => return Err(Error::incomplete()),
                Some(')') => {
                    self.bump();
                    return Ok(Value::list(items));
                }
                Some(_) => items.push(self.read_value()?),
            }
        }
    }
}

/// Read every top-level expression of `input`.
pub fn read_all(input: &str) -> Result<Vec<Value>, Error> {
    let mut reader = Reader::new(input);
    let mut forms = Vec::new();
    while let Some(form) = reader.read()? {
        forms.push(form);
    }
    Ok(forms)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Expected outcome of reading one input
    #[derive(Debug)]
    enum ReadResult {
        One(Value),
        Kind(ErrorKind),
        Empty,
    }
    use ReadResult::*;

    fn sym(s: &str) -> Value {
        Value::symbol(s)
    }

    fn run_read_tests(cases: Vec<(&str, ReadResult)>) {
        for (i, (input, expected)) in cases.iter().enumerate() {
            let test_id = format!("read test #{}", i + 1);
            let mut reader = Reader::new(input);
            match (reader.read(), expected) {
                (Ok(Some(actual)), One(value)) => {
                    assert_eq!(actual, *value, "{test_id}: value mismatch for {input:?}");
                }
                (Ok(None), Empty) => {}
                (Err(err), Kind(kind)) => {
                    assert_eq!(err.kind, *kind, "{test_id}: kind mismatch for {input:?}");
                }
                (got, want) => panic!("{test_id}: got {got:?}, expected {want:?} for {input:?}"),
            }
        }
    }

    #[test]
    fn test_reader_comprehensive() {
        let cases = vec![
            // numbers become scalar arrays
            ("42", One(Value::scalar(42.0))),
            ("-3.5", One(Value::scalar(-3.5))),
            ("1e3", One(Value::scalar(1000.0))),
            (".5", One(Value::scalar(0.5))),
            // everything else is a symbol
            ("foo", One(sym("foo"))),
            ("+", One(sym("+"))),
            ("\\", One(sym("\\"))),
            ("12abc", One(sym("12abc"))),
            ("<=", One(sym("<="))),
            // strings with escapes
            (r#""hello""#, One(Value::string("hello"))),
            (r#""a\nb""#, One(Value::string("a\nb"))),
            (r#""tab\there""#, One(Value::string("tab\there"))),
            (r#""say \"hi\"""#, One(Value::string("say \"hi\""))),
            // unknown escapes degrade to the literal character
            (r#""a\zb""#, One(Value::string("azb"))),
            ("\"\"", One(Value::string(""))),
            // lists
            ("()", One(Value::nil())),
            (
                "(a b)",
                One(Value::list(vec![sym("a"), sym("b")])),
            ),
            (
                "(+ 1 2)",
                One(Value::list(vec![
                    sym("+"),
                    Value::scalar(1.0),
                    Value::scalar(2.0),
                ])),
            ),
            (
                "((1) (2))",
                One(Value::list(vec![
                    Value::list(vec![Value::scalar(1.0)]),
                    Value::list(vec![Value::scalar(2.0)]),
                ])),
            ),
            // quote sugar
            (
                "'x",
                One(Value::list(vec![sym("quote"), sym("x")])),
            ),
            (
                "'(1)",
                One(Value::list(vec![
                    sym("quote"),
                    Value::list(vec![Value::scalar(1.0)]),
                ])),
            ),
            (
                "''x",
                One(Value::list(vec![
                    sym("quote"),
                    Value::list(vec![sym("quote"), sym("x")]),
                ])),
            ),
            // whitespace and comments separate tokens
            ("  42  ", One(Value::scalar(42.0))),
            ("; note\n42", One(Value::scalar(42.0))),
            ("( 1 ; inline\n 2 )", One(Value::list(vec![
                Value::scalar(1.0),
                Value::scalar(2.0),
            ]))),
            // self-delimiting tokens need no spacing
            ("(a(b))", One(Value::list(vec![
                sym("a"),
                Value::list(vec![sym("b")]),
            ]))),
            // end of stream
            ("", Empty),
            ("   ; only a comment", Empty),
            ("(1 2", Kind(ErrorKind::Incomplete)),
            ("\"open", Kind(ErrorKind::Incomplete)),
            ("(a (b c)", Kind(ErrorKind::Incomplete)),
            (")", Kind(ErrorKind::Syntax)),
        ];
        run_read_tests(cases);
    }

    #[test]
    fn reads_successive_forms_and_counts_lines() {
        let src = "(def a 1) ; first\n(def b\n  2)\nc\n";
        let mut reader = Reader::new(src);

        reader.read().unwrap().unwrap();
        assert_eq!(reader.line(), 1);
        reader.read().unwrap().unwrap();
        assert_eq!(reader.line(), 2);
        let last = reader.read().unwrap().unwrap();
        assert_eq!(last, sym("c"));
        assert_eq!(reader.line(), 4);
        assert!(reader.read().unwrap().is_none());
    }

    #[test]
    fn read_all_collects_top_level_forms() {
        let forms = read_all("1 2 (3)").unwrap();
        assert_eq!(forms.len(), 3);
        assert_eq!(forms[0], Value::scalar(1.0));
        assert_eq!(
            forms[2],
            Value::list(vec![Value::scalar(3.0)])
        );
    }

    #[test]
    fn newlines_inside_strings_advance_the_counter() {
        let mut reader = Reader::new("\"a\nb\"\nlast");
        reader.read().unwrap().unwrap();
        let v = reader.read().unwrap().unwrap();
        assert_eq!(v, sym("last"));
        assert_eq!(reader.line(), 3);
    }
}
