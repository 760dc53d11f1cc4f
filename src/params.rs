// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Typed configuration trees
//!
//! A [`Params`] maps names to tagged values and is what table factories are
//! parameterized with. Trees can be built programmatically or parsed from a
//! small textual grammar of whitespace-separated `tag name value` triples:
//!
//! ```text
//! int    cache_size 400
//! bool   binary     true
//! float  fp_rate    0.01
//! string label      "hot set"
//! blob   magic      93b83811
//! class_dt base     array
//! config base_config {
//!     int block_size 4096
//! }
//! ```
//!
//! Tags are `bool`, `int`, `float`, `string`, `blob` (hex digits, or `empty`),
//! `class`/`class_dt` (validated against the dtable factory registry),
//! `class_ct`/`class_idx` (validated against the column-table and index class
//! registries), and `config` (a brace-delimited nested tree).

use crate::{
    dtable::factory::{ctable_classes, index_classes, registry},
    Blob, IStr,
};
use std::collections::BTreeMap;

/// Failure of a typed parameter fetch
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ParamError {
    /// No parameter under the requested name
    Missing,

    /// A parameter exists, but with a different tag
    WrongType,
}

impl std::fmt::Display for ParamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "parameter is missing"),
            Self::WrongType => write!(f, "parameter has mismatched type"),
        }
    }
}

impl std::error::Error for ParamError {}

/// Parse failure, reported as the offending line number (1-based)
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ParseError {
    pub line: usize,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "parse error in line {}", self.line)
    }
}

impl std::error::Error for ParseError {}

/// A single tagged configuration value
#[derive(Clone, Debug, PartialEq)]
pub enum Param {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(IStr),
    Blob(Blob),
    Config(Params),
}

impl From<bool> for Param {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Param {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Param {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Self::Str(IStr::new(value))
    }
}

impl From<IStr> for Param {
    fn from(value: IStr) -> Self {
        Self::Str(value)
    }
}

impl From<Blob> for Param {
    fn from(value: Blob) -> Self {
        Self::Blob(value)
    }
}

impl From<Params> for Param {
    fn from(value: Params) -> Self {
        Self::Config(value)
    }
}

/// A recursive name → [`Param`] mapping
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Params {
    values: BTreeMap<IStr, Param>,
}

impl Params {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<IStr>, value: impl Into<Param>) {
        self.values.insert(name.into(), value.into());
    }

    /// Stores a dtable class reference, validating it against the registry.
    pub fn set_class_dt(&mut self, name: impl Into<IStr>, class: &str) -> crate::Result<()> {
        if registry().lookup(class).is_none() {
            return Err(crate::Error::UnknownClass(IStr::new(class)));
        }
        self.set(name, class);
        Ok(())
    }

    /// Stores a column-table class reference, validating it against the
    /// column-table class registry.
    pub fn set_class_ct(&mut self, name: impl Into<IStr>, class: &str) -> crate::Result<()> {
        if !ctable_classes().contains(class) {
            return Err(crate::Error::UnknownClass(IStr::new(class)));
        }
        self.set(name, class);
        Ok(())
    }

    /// Stores an index class reference, validating it against the index class
    /// registry.
    pub fn set_class_idx(&mut self, name: impl Into<IStr>, class: &str) -> crate::Result<()> {
        if !index_classes().contains(class) {
            return Err(crate::Error::UnknownClass(IStr::new(class)));
        }
        self.set(name, class);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) {
        self.values.remove(&IStr::new(name));
    }

    pub fn reset(&mut self) {
        self.values.clear();
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(&IStr::new(name))
    }

    fn find(&self, name: &str) -> Result<&Param, ParamError> {
        self.values
            .get(&IStr::new(name))
            .ok_or(ParamError::Missing)
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, ParamError> {
        match self.find(name)? {
            Param::Bool(v) => Ok(*v),
            _ => Err(ParamError::WrongType),
        }
    }

    pub fn get_int(&self, name: &str) -> Result<i64, ParamError> {
        match self.find(name)? {
            Param::Int(v) => Ok(*v),
            _ => Err(ParamError::WrongType),
        }
    }

    pub fn get_float(&self, name: &str) -> Result<f64, ParamError> {
        match self.find(name)? {
            Param::Float(v) => Ok(*v),
            _ => Err(ParamError::WrongType),
        }
    }

    pub fn get_str(&self, name: &str) -> Result<IStr, ParamError> {
        match self.find(name)? {
            Param::Str(v) => Ok(v.clone()),
            _ => Err(ParamError::WrongType),
        }
    }

    pub fn get_blob(&self, name: &str) -> Result<Blob, ParamError> {
        match self.find(name)? {
            Param::Blob(v) => Ok(v.clone()),
            _ => Err(ParamError::WrongType),
        }
    }

    pub fn get_params(&self, name: &str) -> Result<Params, ParamError> {
        match self.find(name)? {
            Param::Config(v) => Ok(v.clone()),
            _ => Err(ParamError::WrongType),
        }
    }

    /// Like [`Params::get_bool`], but a missing name yields the default.
    pub fn get_bool_or(&self, name: &str, default: bool) -> Result<bool, ParamError> {
        match self.get_bool(name) {
            Err(ParamError::Missing) => Ok(default),
            other => other,
        }
    }

    /// Like [`Params::get_int`], but a missing name yields the default.
    pub fn get_int_or(&self, name: &str, default: i64) -> Result<i64, ParamError> {
        match self.get_int(name) {
            Err(ParamError::Missing) => Ok(default),
            other => other,
        }
    }

    /// Like [`Params::get_float`], but a missing name yields the default.
    pub fn get_float_or(&self, name: &str, default: f64) -> Result<f64, ParamError> {
        match self.get_float(name) {
            Err(ParamError::Missing) => Ok(default),
            other => other,
        }
    }

    /// Accepts a blob, or a string whose bytes are read as the blob.
    pub fn get_blob_or_string(&self, name: &str) -> Result<Blob, ParamError> {
        match self.find(name)? {
            Param::Blob(v) => Ok(v.clone()),
            Param::Str(v) => Ok(Blob::from(v.as_str())),
            _ => Err(ParamError::WrongType),
        }
    }

    /// Accepts an integer, or a blob of at most four bytes read as a
    /// big-endian unsigned integer.
    pub fn get_int_or_blob(&self, name: &str) -> Result<i64, ParamError> {
        match self.find(name)? {
            Param::Int(v) => Ok(*v),
            Param::Blob(v) if v.len() <= 4 => {
                let mut value = 0_u32;
                for byte in v.iter() {
                    value = (value << 8) | u32::from(*byte);
                }
                Ok(i64::from(value))
            }
            _ => Err(ParamError::WrongType),
        }
    }

    /// Fetches the sequence `prefix + i + postfix` for `i = 0, 1, ...`.
    ///
    /// With `variable` set, the sequence ends at the first missing name (and
    /// `count` is the maximum length); otherwise all `count` names must exist.
    /// A type mismatch fails either way.
    pub fn get_seq<T>(
        &self,
        prefix: &str,
        postfix: &str,
        count: usize,
        variable: bool,
        get: fn(&Self, &str) -> Result<T, ParamError>,
    ) -> Result<Vec<T>, ParamError> {
        let mut out = Vec::new();

        for i in 0..count {
            let name = format!("{prefix}{i}{postfix}");

            match get(self, &name) {
                Ok(value) => out.push(value),
                Err(ParamError::Missing) if variable => break,
                Err(e) => return Err(e),
            }
        }

        Ok(out)
    }

    /// Parses the textual grammar; see the module docs.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let mut tokens = Tokenizer::new(input);
        parse_tree(&mut tokens, true)
    }
}

struct Tokenizer<'a> {
    input: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Word(String),
    Quoted(String),
    Open,
    Close,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.chars().peekable(),
            line: 1,
        }
    }

    fn error(&self) -> ParseError {
        ParseError { line: self.line }
    }

    fn next(&mut self) -> Option<Token> {
        loop {
            match self.input.peek() {
                Some('\n') => {
                    self.line += 1;
                    self.input.next();
                }
                Some(c) if c.is_whitespace() => {
                    self.input.next();
                }
                Some('#') => {
                    // comment to end of line
                    while let Some(&c) = self.input.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.input.next();
                    }
                }
                _ => break,
            }
        }

        match self.input.peek()? {
            '{' => {
                self.input.next();
                Some(Token::Open)
            }
            '}' => {
                self.input.next();
                Some(Token::Close)
            }
            '"' => {
                self.input.next();
                let mut s = String::new();

                loop {
                    match self.input.next()? {
                        '"' => break,
                        '\\' => match self.input.next()? {
                            'n' => s.push('\n'),
                            't' => s.push('\t'),
                            c => s.push(c),
                        },
                        '\n' => {
                            self.line += 1;
                            s.push('\n');
                        }
                        c => s.push(c),
                    }
                }

                Some(Token::Quoted(s))
            }
            _ => {
                let mut s = String::new();

                while let Some(&c) = self.input.peek() {
                    if c.is_whitespace() || c == '{' || c == '}' || c == '"' {
                        break;
                    }
                    s.push(c);
                    self.input.next();
                }

                Some(Token::Word(s))
            }
        }
    }
}

fn parse_tree(tokens: &mut Tokenizer<'_>, top_level: bool) -> Result<Params, ParseError> {
    let mut params = Params::new();

    loop {
        let tag = match tokens.next() {
            None if top_level => return Ok(params),
            None => return Err(tokens.error()),
            Some(Token::Close) if !top_level => return Ok(params),
            Some(Token::Word(word)) => word,
            Some(_) => return Err(tokens.error()),
        };

        let name = match tokens.next() {
            Some(Token::Word(word)) => word,
            _ => return Err(tokens.error()),
        };

        let value = parse_value(tokens, &tag)?;
        params.set(name.as_str(), value);
    }
}

fn parse_value(tokens: &mut Tokenizer<'_>, tag: &str) -> Result<Param, ParseError> {
    if tag == "config" {
        return match tokens.next() {
            Some(Token::Open) => Ok(Param::Config(parse_tree(tokens, false)?)),
            _ => Err(tokens.error()),
        };
    }

    let (word, quoted) = match tokens.next() {
        Some(Token::Word(word)) => (word, false),
        Some(Token::Quoted(word)) => (word, true),
        _ => return Err(tokens.error()),
    };

    let err = tokens.error();

    match tag {
        "bool" if !quoted => match word.as_str() {
            "true" => Ok(Param::Bool(true)),
            "false" => Ok(Param::Bool(false)),
            _ => Err(err),
        },
        "int" if !quoted => {
            let parsed = if let Some(hex) = word.strip_prefix("0x") {
                i64::from_str_radix(hex, 16)
            } else {
                word.parse()
            };
            parsed.map(Param::Int).map_err(|_| err)
        }
        "float" if !quoted => word.parse().map(Param::Float).map_err(|_| err),
        "string" => Ok(Param::Str(IStr::new(&word))),
        "blob" if !quoted => parse_blob(&word).ok_or(err),
        "class" | "class_dt" if !quoted => {
            if registry().lookup(&word).is_none() {
                return Err(err);
            }
            Ok(Param::Str(IStr::new(&word)))
        }
        "class_ct" if !quoted => {
            if !ctable_classes().contains(&word) {
                return Err(err);
            }
            Ok(Param::Str(IStr::new(&word)))
        }
        "class_idx" if !quoted => {
            if !index_classes().contains(&word) {
                return Err(err);
            }
            Ok(Param::Str(IStr::new(&word)))
        }
        _ => Err(err),
    }
}

fn parse_blob(word: &str) -> Option<Param> {
    if word == "empty" {
        return Some(Param::Blob(Blob::empty()));
    }

    if word.len() % 2 != 0 {
        return None;
    }

    let mut bytes = Vec::with_capacity(word.len() / 2);

    for pair in word.as_bytes().chunks_exact(2) {
        let hex = std::str::from_utf8(pair).ok()?;
        bytes.push(u8::from_str_radix(hex, 16).ok()?);
    }

    Some(Param::Blob(bytes.into()))
}
