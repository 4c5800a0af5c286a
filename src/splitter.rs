//! Splits a JSON list or dict window into member boundaries without parsing
//! the members themselves.
//!
//! The scanner only counts brackets and skips strings, so a member's bytes
//! are touched once here and once more when (if ever) the member is decoded.
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::resource::{Resource, ResourceCursor};

/// Byte span of one raw member.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Boundary {
    pub offset: u64,
    pub length: u64,
}

impl Boundary {
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Element boundaries of the list at `offset`. `length` bounds the window,
/// `None` reads to the end of the resource.
pub fn split_list(resource: &dyn Resource, offset: u64, length: Option<u64>) -> Result<ListSplit<'_>> {
    Ok(ListSplit { scanner: Scanner::open(resource, offset, length, b'[', b']')? })
}

/// Entry keys and value boundaries of the dict at `offset`.
pub fn split_dict(resource: &dyn Resource, offset: u64, length: Option<u64>) -> Result<DictSplit<'_>> {
    Ok(DictSplit { scanner: Scanner::open(resource, offset, length, b'{', b'}')? })
}

pub struct ListSplit<'a> {
    scanner: Scanner<'a>,
}

impl Iterator for ListSplit<'_> {
    type Item = Result<Boundary>;

    fn next(&mut self) -> Option<Self::Item> {
        self.scanner.advance(false).map(|item| item.map(|(_, boundary)| boundary))
    }
}

pub struct DictSplit<'a> {
    scanner: Scanner<'a>,
}

impl Iterator for DictSplit<'_> {
    type Item = Result<(String, Boundary)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.scanner.advance(true).map(|item| item.map(|(key, boundary)| (key.unwrap_or_default(), boundary)))
    }
}

// ————————————————————————————————————————————————————————————————————————————
// SCANNER
// ————————————————————————————————————————————————————————————————————————————

enum Failure {
    /// confined to one member, scanning resumes at the next `,`
    Element(Error),
    /// ends the split
    Fatal(Error),
}

impl From<Error> for Failure {
    fn from(err: Error) -> Self {
        Failure::Fatal(err)
    }
}

impl Failure {
    fn into_error(self) -> Error {
        match self {
            Failure::Element(err) | Failure::Fatal(err) => err,
        }
    }
}

type Step<T> = std::result::Result<T, Failure>;

fn token(b: u8) -> String {
    if b.is_ascii_graphic() {
        char::from(b).to_string()
    } else {
        format!("\\x{b:02x}")
    }
}

fn end_of_input(offset: u64) -> Error {
    Error::invalid_resource(offset, "unexpected end of input")
}

struct Scanner<'a> {
    cursor: ResourceCursor<'a>,
    close: u8,
    done: bool,
    after_comma: bool,
    pending: Option<Error>,
}

impl<'a> Scanner<'a> {
    fn open(resource: &'a dyn Resource, offset: u64, length: Option<u64>, open: u8, close: u8) -> Result<Self> {
        let end = length.map_or(resource.len(), |length| offset + length);
        let mut scanner = Scanner {
            cursor: ResourceCursor::new(resource, offset, end),
            close,
            done: false,
            after_comma: false,
            pending: None,
        };
        let at = scanner.cursor.position();
        match scanner.cursor.peek_non_ws()? {
            Some(b) if b == open => {
                scanner.cursor.next_byte()?;
            }
            Some(b'n') => {
                scanner.literal(b"null")?;
                scanner.done = true;
            }
            Some(b) => return Err(Error::unexpected_token(scanner.cursor.position(), token(b))),
            None => return Err(end_of_input(at)),
        }
        Ok(scanner)
    }

    fn literal(&mut self, expected: &[u8]) -> Result<()> {
        let at = self.cursor.position();
        for &want in expected {
            match self.cursor.next_byte()? {
                Some(b) if b == want => {}
                Some(b) => return Err(Error::unexpected_token(self.cursor.position() - 1, token(b))),
                None => return Err(end_of_input(at)),
            }
        }
        Ok(())
    }

    fn advance(&mut self, keyed: bool) -> Option<Result<(Option<String>, Boundary)>> {
        if let Some(err) = self.pending.take() {
            self.done = true;
            return Some(Err(err));
        }
        if self.done {
            return None;
        }
        match self.step(keyed) {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(Failure::Fatal(err)) => {
                self.done = true;
                Some(Err(err))
            }
            Err(Failure::Element(err)) => {
                if let Err(failure) = self.resync() {
                    self.pending = Some(failure.into_error());
                }
                Some(Err(err))
            }
        }
    }

    fn step(&mut self, keyed: bool) -> Step<Option<(Option<String>, Boundary)>> {
        let at = self.cursor.position();
        let Some(b) = self.cursor.peek_non_ws()? else {
            return Err(Failure::Fatal(end_of_input(at)));
        };
        let at = self.cursor.position();
        if b == self.close {
            self.cursor.next_byte()?;
            self.done = true;
            if self.after_comma {
                return Err(Failure::Fatal(Error::unexpected_token(at, token(b))));
            }
            return Ok(None);
        }
        self.after_comma = false;

        let key = if keyed { Some(self.key()?) } else { None };

        let at = self.cursor.position();
        let Some(b) = self.cursor.peek_non_ws()? else {
            return Err(Failure::Fatal(end_of_input(at)));
        };
        let start = self.cursor.position();
        if b == b',' || b == self.close {
            return Err(Failure::Element(Error::unexpected_token(start, token(b))));
        }
        let end = self.value()?;
        self.delimiter()?;
        Ok(Some((key, Boundary { offset: start, length: end - start })))
    }

    fn key(&mut self) -> Step<String> {
        let at = self.cursor.position();
        if self.cursor.next_byte()? != Some(b'"') {
            return Err(Failure::Element(Error::unexpected_token(at, "expected key")));
        }
        let mut raw = vec![b'"'];
        self.string(Some(&mut raw))?;
        let key = serde_json::from_slice::<String>(&raw).map_err(|err| {
            Failure::Element(Error::invalid_resource(at, format!("invalid key: {err}")))
        })?;
        let at = self.cursor.position();
        match self.cursor.peek_non_ws()? {
            Some(b':') => {
                self.cursor.next_byte()?;
                Ok(key)
            }
            Some(b) => Err(Failure::Element(Error::unexpected_token(self.cursor.position(), token(b)))),
            None => Err(Failure::Fatal(end_of_input(at))),
        }
    }

    /// Consume a string body; the opening quote is already consumed.
    fn string(&mut self, mut sink: Option<&mut Vec<u8>>) -> Step<()> {
        loop {
            let at = self.cursor.position();
            let Some(b) = self.cursor.next_byte()? else {
                return Err(Failure::Fatal(end_of_input(at)));
            };
            if let Some(sink) = sink.as_deref_mut() {
                sink.push(b);
            }
            match b {
                b'"' => return Ok(()),
                b'\\' => {
                    let Some(escaped) = self.cursor.next_byte()? else {
                        return Err(Failure::Fatal(end_of_input(at)));
                    };
                    if let Some(sink) = sink.as_deref_mut() {
                        sink.push(escaped);
                    }
                }
                _ => {}
            }
        }
    }

    /// Scan one member up to the next depth-0 delimiter, left unconsumed.
    /// Returns the end of its last non-whitespace byte.
    fn value(&mut self) -> Step<u64> {
        let mut closers: Vec<u8> = Vec::new();
        let mut end = self.cursor.position();
        let mut gap = false;
        let mut stray = None;
        loop {
            let at = self.cursor.position();
            let Some(b) = self.cursor.peek()? else {
                return Err(Failure::Fatal(end_of_input(at)));
            };
            match b {
                b',' | b']' | b'}' if closers.is_empty() => break,
                b' ' | b'\t' | b'\n' | b'\r' => {
                    self.cursor.next_byte()?;
                    gap = true;
                    continue;
                }
                _ => {}
            }
            if gap && closers.is_empty() && stray.is_none() {
                stray = Some((at, b));
            }
            gap = false;
            self.cursor.next_byte()?;
            match b {
                b'"' => self.string(None)?,
                b'[' => closers.push(b']'),
                b'{' => closers.push(b'}'),
                b']' | b'}' => {
                    // a mismatched closer still closes, so the scan can find the delimiter
                    if closers.pop() != Some(b) && stray.is_none() {
                        stray = Some((at, b));
                    }
                }
                _ => {}
            }
            end = self.cursor.position();
        }
        match stray {
            Some((at, b)) => Err(Failure::Element(Error::unexpected_token(at, token(b)))),
            None => Ok(end),
        }
    }

    fn delimiter(&mut self) -> Step<()> {
        let at = self.cursor.position();
        match self.cursor.next_byte()? {
            Some(b',') => self.after_comma = true,
            Some(b) if b == self.close => self.done = true,
            Some(b) => {
                self.done = true;
                return Err(Failure::Fatal(Error::unexpected_token(at, token(b))));
            }
            None => return Err(Failure::Fatal(end_of_input(at))),
        }
        Ok(())
    }

    fn resync(&mut self) -> Step<()> {
        match self.value() {
            Ok(_) | Err(Failure::Element(_)) => {}
            Err(failure) => return Err(failure),
        }
        self.delimiter()
    }
}

// ------------------------------- Tests ------------------------------------ //
