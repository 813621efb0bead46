//! Line oriented lexer shared by the JKL, 3DO, KEY and PUP text formats.
//!
//! Every significant line is trimmed and lowercased up front. Blank lines and
//! `#` comments never reach the parser.

use std::str::FromStr;

use crate::{DecodeError, Format, Vec2, Vec3};

mod grammar {
    use nom::{
        bytes::complete::{tag, take_while1},
        character::complete::{space0, space1},
        combinator::rest,
        sequence::{preceded, separated_pair},
        IResult,
    };

    pub fn section_marker(input: &str) -> IResult<&str, &str> {
        preceded(tag("section:"), preceded(space0, rest))(input)
    }

    pub fn keyword<'a>(input: &'a str, keyword: &str) -> IResult<&'a str, &'a str> {
        preceded(tag(keyword), preceded(space1, rest))(input)
    }

    pub fn assignment(input: &str) -> IResult<&str, (&str, &str)> {
        separated_pair(
            take_while1(|c: char| c != '='),
            tag("="),
            take_while1(|c: char| !c.is_whitespace() && c != ','),
        )(input)
    }
}

/// A significant line of a text asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// 1-based line number in the source text.
    pub number: usize,
    pub text: String,
}

/// Splits `text` into its significant lines.
pub fn lines(text: &str) -> Vec<Line> {
    text.lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                None
            } else {
                Some(Line {
                    number: index + 1,
                    text: line.to_lowercase(),
                })
            }
        })
        .collect()
}

impl Line {
    /// The section name when this line is a `SECTION: <NAME>` marker.
    pub fn section_marker(&self) -> Option<&str> {
        grammar::section_marker(&self.text).ok().map(|(_, name)| name.trim())
    }

    pub fn is_end(&self) -> bool {
        self.text == "end"
    }

    /// The remainder of the line after `keyword` and at least one space.
    pub fn keyword_value(&self, keyword: &str) -> Option<&str> {
        grammar::keyword(&self.text, keyword).ok().map(|(_, value)| value.trim())
    }

    /// Splits a `key=value` line.
    pub fn assignment(&self) -> Option<(&str, &str)> {
        grammar::assignment(&self.text).ok().map(|(_, pair)| pair)
    }

    /// Parses the count following `keyword`, or `None` if this line is not that keyword.
    pub fn declared_count(
        &self,
        keyword: &str,
        format: Format,
    ) -> Option<Result<usize, DecodeError>> {
        let value = self.keyword_value(keyword)?;
        let token = value.split_whitespace().next().unwrap_or(value);
        Some(token.parse().map_err(|_| DecodeError::InvalidField {
            format,
            line: self.number,
            field: "count",
            value: token.to_string(),
        }))
    }

    /// Tokenizes the line, treating commas as whitespace.
    pub fn fields(&self, format: Format) -> Fields<'_> {
        let mut tokens: Vec<&str> = self
            .text
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|token| !token.is_empty())
            .collect();

        // `12:name` carries the index and the first value in one token.
        if let Some(first) = tokens.first().copied() {
            if let Some(split) = first.find(':') {
                if split + 1 < first.len() {
                    let (index, value) = first.split_at(split + 1);
                    tokens.splice(0..1, [index, value]);
                }
            }
        }

        Fields {
            line: self.number,
            format,
            tokens,
        }
    }
}

/// The tokens of one data line with typed, position based accessors.
#[derive(Debug, Clone)]
pub struct Fields<'a> {
    line: usize,
    format: Format,
    tokens: Vec<&'a str>,
}

impl<'a> Fields<'a> {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[&'a str] {
        &self.tokens
    }

    pub fn get(&self, index: usize) -> Option<&'a str> {
        self.tokens.get(index).copied()
    }

    /// Fails unless at least `count` tokens are present.
    pub fn require(&self, count: usize, field: &'static str) -> Result<(), DecodeError> {
        if self.tokens.len() < count {
            Err(self.missing(field))
        } else {
            Ok(())
        }
    }

    pub fn str(&self, index: usize, field: &'static str) -> Result<&'a str, DecodeError> {
        self.get(index).ok_or_else(|| self.missing(field))
    }

    /// The leading `N:` index of the line.
    pub fn index(&self, field: &'static str) -> Result<i32, DecodeError> {
        let token = self.str(0, field)?;
        match token.strip_suffix(':') {
            Some(index) => parse_int(index)
                .and_then(|index| i32::try_from(index).ok())
                .ok_or_else(|| self.invalid(field, token)),
            None => Err(self.invalid(field, token)),
        }
    }

    pub fn int(&self, index: usize, field: &'static str) -> Result<i32, DecodeError> {
        let token = self.str(index, field)?;
        parse_int(token)
            .and_then(|value| i32::try_from(value).ok())
            .ok_or_else(|| self.invalid(field, token))
    }

    /// A flags word, usually written in hex.
    pub fn flags(&self, index: usize, field: &'static str) -> Result<u32, DecodeError> {
        let token = self.str(index, field)?;
        parse_int(token)
            .and_then(|value| u32::try_from(value).ok())
            .ok_or_else(|| self.invalid(field, token))
    }

    pub fn count(&self, index: usize, field: &'static str) -> Result<usize, DecodeError> {
        let token = self.str(index, field)?;
        token.parse().map_err(|_| self.invalid(field, token))
    }

    pub fn float(&self, index: usize, field: &'static str) -> Result<f32, DecodeError> {
        let token = self.str(index, field)?;
        token.parse().map_err(|_| self.invalid(field, token))
    }

    pub fn vec2(&self, index: usize, field: &'static str) -> Result<Vec2, DecodeError> {
        Ok([self.float(index, field)?, self.float(index + 1, field)?])
    }

    pub fn vec3(&self, index: usize, field: &'static str) -> Result<Vec3, DecodeError> {
        Ok([
            self.float(index, field)?,
            self.float(index + 1, field)?,
            self.float(index + 2, field)?,
        ])
    }

    pub fn missing(&self, field: &'static str) -> DecodeError {
        DecodeError::MissingField {
            format: self.format,
            line: self.line,
            field,
        }
    }

    pub fn invalid(&self, field: &'static str, value: &str) -> DecodeError {
        DecodeError::InvalidField {
            format: self.format,
            line: self.line,
            field,
            value: value.to_string(),
        }
    }
}

/// Parses a decimal or `0x` prefixed hexadecimal integer.
pub fn parse_int(token: &str) -> Option<i64> {
    let (negative, digits) = match token.strip_prefix('-') {
        Some(digits) => (true, digits),
        None => (false, token.strip_prefix('+').unwrap_or(token)),
    };
    let value = match digits.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i64>().ok()?,
    };
    Some(if negative { -value } else { value })
}

/// Cursor over significant lines.
///
/// Holds all decode state for one asset; a parser is never shared between decodes.
#[derive(Debug, Clone)]
pub struct LineParser<'a> {
    lines: &'a [Line],
    position: usize,
    current: Option<&'a Line>,
    section: Option<&'a str>,
    format: Format,
}

impl<'a> LineParser<'a> {
    pub fn new(lines: &'a [Line], format: Format) -> Self {
        Self {
            lines,
            position: 0,
            current: None,
            section: None,
            format,
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// True once every line has been consumed.
    pub fn is_done(&self) -> bool {
        self.position >= self.lines.len()
    }

    /// The line most recently returned by [`LineParser::next_line`].
    pub fn current(&self) -> Option<&'a Line> {
        self.current
    }

    /// The section most recently entered through [`LineParser::advance_to_next_section`].
    pub fn section(&self) -> Option<&'a str> {
        self.section
    }

    pub fn peek_line(&self) -> Option<&'a Line> {
        self.lines.get(self.position)
    }

    pub fn next_line(&mut self) -> Option<&'a Line> {
        let line = self.lines.get(self.position)?;
        self.position += 1;
        self.current = Some(line);
        Some(line)
    }

    pub fn expect_line(&mut self, expected: &'static str) -> Result<&'a Line, DecodeError> {
        self.next_line().ok_or(DecodeError::UnexpectedEof {
            format: self.format,
            expected,
        })
    }

    /// Consumes the next line, which must start with `keyword`, and returns its value.
    pub fn expect_keyword(&mut self, keyword: &'static str) -> Result<&'a str, DecodeError> {
        let line = self.expect_line(keyword)?;
        line.keyword_value(keyword).ok_or_else(|| self.unexpected(line, keyword))
    }

    /// Consumes the next line, which must equal `text` exactly.
    pub fn expect_exact(&mut self, text: &'static str) -> Result<&'a Line, DecodeError> {
        let line = self.expect_line(text)?;
        if line.text == text {
            Ok(line)
        } else {
            Err(self.unexpected(line, text))
        }
    }

    pub fn expect_value<T: FromStr>(&mut self, keyword: &'static str) -> Result<T, DecodeError> {
        let value = self.expect_keyword(keyword)?;
        let token = value.split_whitespace().next().unwrap_or(value);
        token.parse().map_err(|_| DecodeError::InvalidField {
            format: self.format,
            line: self.current.map(|line| line.number).unwrap_or_default(),
            field: keyword,
            value: value.to_string(),
        })
    }

    pub fn expect_count(&mut self, keyword: &'static str) -> Result<usize, DecodeError> {
        self.expect_value(keyword)
    }

    /// Skips ahead to the next `SECTION:` marker and enters it.
    ///
    /// Returns `None` once the stream is exhausted.
    pub fn advance_to_next_section(&mut self) -> Option<&'a str> {
        while let Some(line) = self.next_line() {
            if let Some(section) = line.section_marker() {
                self.section = Some(section);
                return Some(section);
            }
        }
        self.section = None;
        None
    }

    pub fn is_section_end(&self, line: &Line) -> bool {
        line.is_end() || line.section_marker().is_some()
    }

    /// True when the next line closes the current section, or no lines remain.
    pub fn at_section_end(&self) -> bool {
        self.peek_line().map_or(true, |line| self.is_section_end(line))
    }

    /// Consumes the next line unless it closes the current section.
    pub fn next_in_section(&mut self) -> Option<&'a Line> {
        if self.at_section_end() {
            None
        } else {
            self.next_line()
        }
    }

    /// Hands up to `count` lines to `per_line`, stopping early at the end of the section.
    ///
    /// Declared counts in the source assets do not always match their content, so a
    /// short run is not an error. Returns the number of lines processed.
    pub fn process_declared_count<F>(
        &mut self,
        count: usize,
        mut per_line: F,
    ) -> Result<usize, DecodeError>
    where
        F: FnMut(&'a Line) -> Result<(), DecodeError>,
    {
        let mut processed = 0;
        while processed < count {
            let line = match self.next_in_section() {
                Some(line) => line,
                None => break,
            };
            per_line(line)?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Consumes lines up to, but not including, the first one matching `is_boundary`.
    pub fn take_block<P>(&mut self, mut is_boundary: P) -> &'a [Line]
    where
        P: FnMut(&Line) -> bool,
    {
        let start = self.position;
        while let Some(line) = self.peek_line() {
            if is_boundary(line) {
                break;
            }
            self.next_line();
        }
        &self.lines[start..self.position]
    }

    pub fn unexpected(&self, line: &Line, expected: &'static str) -> DecodeError {
        DecodeError::UnexpectedLine {
            format: self.format,
            line: line.number,
            expected,
            found: line.text.clone(),
        }
    }
}
