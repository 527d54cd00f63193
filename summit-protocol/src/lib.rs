// Copyright 2026 Summit contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The wire framing and control-message model summit uses to embed
//! structured commands inside an otherwise-opaque terminal byte stream.
//!
//! A control frame looks like `ESC ^ - { <base64(json)> } - ESC \`. Every
//! other byte on the wire is opaque terminal data ([`Message::Text`]).

use std::collections::VecDeque;

use anyhow::{anyhow, Context};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `ESC`, the byte that kicks off every control frame.
pub const ESC: u8 = 0x1b;

const PREFIX: &[u8] = b"\x1b^-{";
const SUFFIX: &[u8] = b"}-\x1b\\";

/// A `{rows, cols, xpixel, ypixel}` terminal size, carried by the `ts`
/// command and by a `run` command's initial size.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    #[serde(rename = "Rows")]
    pub rows: u16,
    #[serde(rename = "Cols")]
    pub cols: u16,
    #[serde(rename = "X")]
    pub x: u16,
    #[serde(rename = "Y")]
    pub y: u16,
}

/// A structured control frame: an ordered key/value map whose canonical
/// `cmd` field names the command.
///
/// The map preserves insertion order so that repeated serialization is
/// byte-identical (required by the lexer round-trip property).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Command {
    fields: IndexMap<String, Value>,
}

impl Command {
    /// An empty command, with no fields at all (not even `cmd`). This is
    /// what an [`Message::End`] sentinel collapses to when a caller wants
    /// to treat it as a zero-field command.
    pub fn empty() -> Self {
        Command { fields: IndexMap::new() }
    }

    fn new(cmd: &str) -> Self {
        let mut fields = IndexMap::new();
        fields.insert("cmd".to_string(), Value::String(cmd.to_string()));
        Command { fields }
    }

    /// Build a `Command` from an already-parsed JSON object.
    pub fn from_fields(fields: IndexMap<String, Value>) -> Self {
        Command { fields }
    }

    pub fn fields(&self) -> &IndexMap<String, Value> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, val: impl Into<Value>) -> &mut Self {
        self.fields.insert(key.into(), val.into());
        self
    }

    /// The canonical `cmd` field, or `""` if this command has none (the
    /// zero-field case).
    pub fn cmd(&self) -> &str {
        match self.fields.get("cmd") {
            Some(Value::String(s)) => s.as_str(),
            _ => "",
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// `term` and `pty` are collectively the routing commands (§3).
    pub fn is_routing(&self) -> bool {
        matches!(self.cmd(), "term" | "pty")
    }

    pub fn is_status(&self) -> bool {
        self.cmd() == "status"
    }

    pub fn is_run(&self) -> bool {
        self.cmd() == "run"
    }

    pub fn is_log(&self) -> bool {
        self.cmd() == "log"
    }

    // -- typed constructors --

    pub fn term(id: impl Into<String>) -> Self {
        let mut c = Self::new("term");
        c.set("term", Value::String(id.into()));
        c
    }

    pub fn pty(id: impl Into<String>) -> Self {
        let mut c = Self::new("pty");
        c.set("pty", Value::String(id.into()));
        c
    }

    pub fn run(argv: Vec<String>, env: Vec<(String, String)>, ts: Size) -> Self {
        let mut c = Self::new("run");
        c.set("run", Value::Array(argv.into_iter().map(Value::String).collect()));
        c.set(
            "env",
            Value::Array(
                env.into_iter()
                    .map(|(k, v)| Value::Array(vec![Value::String(k), Value::String(v)]))
                    .collect(),
            ),
        );
        c.set("ts", serde_json::to_value(ts).expect("Size always serializes"));
        c
    }

    pub fn started() -> Self {
        Self::new("started")
    }

    pub fn status(code: i32) -> Self {
        let mut c = Self::new("status");
        c.set("status", Value::from(code));
        c
    }

    pub fn ts(size: Size) -> Self {
        let mut c = Self::new("ts");
        c.set("ts", serde_json::to_value(size).expect("Size always serializes"));
        c
    }

    pub fn log(text: impl Into<String>) -> Self {
        let mut c = Self::new("log");
        c.set("log", Value::String(text.into()));
        c
    }

    // -- typed accessors --

    pub fn term_id(&self) -> Option<&str> {
        self.get("term").and_then(Value::as_str)
    }

    pub fn pty_id(&self) -> Option<&str> {
        self.get("pty").and_then(Value::as_str)
    }

    pub fn run_argv(&self) -> Option<Vec<String>> {
        self.get("run")?.as_array()?.iter().map(|v| v.as_str().map(String::from)).collect()
    }

    pub fn run_env(&self) -> Option<Vec<(String, String)>> {
        self.get("env")?
            .as_array()?
            .iter()
            .map(|pair| {
                let pair = pair.as_array()?;
                let k = pair.first()?.as_str()?.to_string();
                let v = pair.get(1)?.as_str()?.to_string();
                Some((k, v))
            })
            .collect()
    }

    pub fn run_size(&self) -> Option<Size> {
        serde_json::from_value(self.get("ts")?.clone()).ok()
    }

    pub fn status_code(&self) -> Option<i32> {
        self.get("status")?.as_i64().map(|v| v as i32)
    }

    pub fn ts_size(&self) -> Option<Size> {
        serde_json::from_value(self.get("ts")?.clone()).ok()
    }

    pub fn log_text(&self) -> Option<&str> {
        self.get("log").and_then(Value::as_str)
    }
}

/// A frame emitted by the [`Lexer`].
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Opaque bytes, passed through untouched.
    Text(Vec<u8>),
    /// A parsed control frame.
    Command(Command),
    /// The 8-byte empty-body frame (`ESC^-{}-ESC\`), an explicit sentinel
    /// used as a stream terminator hint. Downstream consumers that don't
    /// care about the distinction can call [`Message::as_command`].
    End,
}

impl Message {
    /// Treat this message as a `Command`, collapsing [`Message::End`] into
    /// a zero-field command. Returns `None` for [`Message::Text`].
    pub fn as_command(&self) -> Option<Command> {
        match self {
            Message::Command(c) => Some(c.clone()),
            Message::End => Some(Command::empty()),
            Message::Text(_) => None,
        }
    }

    /// Serialize this message back to its on-wire byte form. Round-trips
    /// with the [`Lexer`]: `lex(m.to_wire()) == [m]`.
    pub fn to_wire(&self) -> Vec<u8> {
        match self {
            Message::Text(bytes) => bytes.clone(),
            Message::Command(cmd) => encode_command(cmd),
            Message::End => {
                let mut out = Vec::with_capacity(PREFIX.len() + SUFFIX.len());
                out.extend_from_slice(PREFIX);
                out.extend_from_slice(SUFFIX);
                out
            }
        }
    }
}

fn encode_command(cmd: &Command) -> Vec<u8> {
    let json = serde_json::to_vec(&cmd.fields).expect("Command fields always serialize");
    let body = STANDARD.encode(json);
    let mut out = Vec::with_capacity(PREFIX.len() + body.len() + SUFFIX.len());
    out.extend_from_slice(PREFIX);
    out.extend_from_slice(body.as_bytes());
    out.extend_from_slice(SUFFIX);
    out
}

fn is_base64_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'='
}

fn decode_body(body: &[u8]) -> anyhow::Result<Command> {
    let json = STANDARD.decode(body).context("base64 decoding frame body")?;
    let fields: IndexMap<String, Value> =
        serde_json::from_slice(&json).context("parsing frame body as a JSON object")?;
    Ok(Command::from_fields(fields))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Text,
    AfterEsc,
    AfterEscCaret,
    AfterEscCaretDash,
    Base64Body,
    AfterClose1,
    AfterClose2,
    AfterClose3,
}

/// A pushdown scanner that splits a byte stream into [`Message`]s.
///
/// Feed arbitrary byte chunks with [`Lexer::scan`]; pull parsed messages
/// out one at a time with [`Lexer::chunk`]. Partial input is preserved
/// across calls, so any split of a byte stream into chunks produces the
/// same message stream as feeding it all at once.
#[derive(Debug)]
pub struct Lexer {
    state: State,
    text: Vec<u8>,
    frame: Vec<u8>,
    body: Vec<u8>,
    out: VecDeque<Message>,
}

impl Default for Lexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Lexer {
    pub fn new() -> Self {
        Lexer {
            state: State::Text,
            text: Vec::new(),
            frame: Vec::new(),
            body: Vec::new(),
            out: VecDeque::new(),
        }
    }

    /// Feed more bytes into the scanner. Complete messages become
    /// available via [`Lexer::chunk`].
    pub fn scan(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.feed(b);
        }
    }

    /// Pop the next parsed message, or `None` if more input is needed.
    pub fn chunk(&mut self) -> Option<Message> {
        self.out.pop_front()
    }

    /// Flush any bytes accumulated so far as a final `Text` message, for
    /// callers that know no more input is coming (e.g. on EOF). Any
    /// in-progress frame attempt is treated as a framing error and
    /// reverted to text, per the usual recovery rule.
    pub fn flush(&mut self) {
        if self.state != State::Text {
            self.text.append(&mut self.frame);
            self.body.clear();
            self.state = State::Text;
        }
        self.flush_text();
    }

    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            self.out.push_back(Message::Text(std::mem::take(&mut self.text)));
        }
    }

    fn abort(&mut self, b: u8) {
        self.text.append(&mut self.frame);
        self.body.clear();
        self.state = State::Text;
        self.feed(b);
    }

    fn feed(&mut self, b: u8) {
        match self.state {
            State::Text => {
                if b == ESC {
                    self.flush_text();
                    self.frame.clear();
                    self.frame.push(b);
                    self.state = State::AfterEsc;
                } else {
                    self.text.push(b);
                }
            }
            State::AfterEsc => {
                self.frame.push(b);
                if b == b'^' {
                    self.state = State::AfterEscCaret;
                } else {
                    self.abort(b);
                }
            }
            State::AfterEscCaret => {
                self.frame.push(b);
                if b == b'-' {
                    self.state = State::AfterEscCaretDash;
                } else {
                    self.abort(b);
                }
            }
            State::AfterEscCaretDash => {
                self.frame.push(b);
                if b == b'{' {
                    self.body.clear();
                    self.state = State::Base64Body;
                } else {
                    self.abort(b);
                }
            }
            State::Base64Body => {
                if b == b'}' {
                    self.frame.push(b);
                    self.state = State::AfterClose1;
                } else if is_base64_char(b) {
                    self.frame.push(b);
                    self.body.push(b);
                } else {
                    self.abort(b);
                }
            }
            State::AfterClose1 => {
                self.frame.push(b);
                if b == b'-' {
                    self.state = State::AfterClose2;
                } else {
                    self.abort(b);
                }
            }
            State::AfterClose2 => {
                self.frame.push(b);
                if b == ESC {
                    self.state = State::AfterClose3;
                } else {
                    self.abort(b);
                }
            }
            State::AfterClose3 => {
                if b == b'\\' {
                    self.frame.push(b);
                    self.complete_frame();
                } else {
                    self.abort(b);
                }
            }
        }
    }

    fn complete_frame(&mut self) {
        if self.body.is_empty() {
            self.out.push_back(Message::End);
        } else {
            match decode_body(&self.body) {
                Ok(cmd) => self.out.push_back(Message::Command(cmd)),
                Err(_) => {
                    // Framing error (bad base64 or JSON): silently recover
                    // by treating the whole matched frame as opaque text.
                    self.text.append(&mut self.frame);
                }
            }
        }
        self.frame.clear();
        self.body.clear();
        self.state = State::Text;
    }
}

/// Parse an entire byte slice into a vector of messages, flushing any
/// trailing text at the end. Convenience wrapper around [`Lexer`] for
/// tests and one-shot decoding (e.g. `summit-mux -n`'s single frame).
pub fn lex_all(bytes: &[u8]) -> anyhow::Result<Vec<Message>> {
    let mut lexer = Lexer::new();
    lexer.scan(bytes);
    lexer.flush();
    let mut out = Vec::new();
    while let Some(m) = lexer.chunk() {
        out.push(m);
    }
    Ok(out)
}

/// A path: `term` followed by zero or more `pty` hops, in order from
/// outermost to innermost. See §3 "Address / path".
pub fn validate_path(path: &[Command]) -> anyhow::Result<()> {
    if let Some((first, rest)) = path.split_first() {
        if first.cmd() != "term" {
            return Err(anyhow!("a path must start with a term command"));
        }
        if rest.iter().any(|c| c.cmd() != "pty") {
            return Err(anyhow!("every hop after term must be a pty command"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn b64_empty_obj() -> &'static str {
        "e30="
    }

    #[test]
    fn empty_command_frame_round_trips() {
        let frame = format!("\x1b^-{{{}}}-\x1b\\", b64_empty_obj());
        let msgs = lex_all(frame.as_bytes()).unwrap();
        assert_eq!(msgs, vec![Message::Command(Command::empty())]);
    }

    #[test]
    fn s1_framing_literal() {
        // From spec.md §8 S1: b"hi\x1b^-{e30=}-\x1b\\bye"
        let input = b"hi\x1b^-{e30=}-\x1b\\bye";
        let msgs = lex_all(input).unwrap();
        assert_eq!(
            msgs,
            vec![
                Message::Text(b"hi".to_vec()),
                Message::Command(Command::empty()),
                Message::Text(b"bye".to_vec()),
            ]
        );
    }

    #[test]
    fn empty_frame_is_end_sentinel() {
        let input = b"\x1b^-{}-\x1b\\";
        let msgs = lex_all(input).unwrap();
        assert_eq!(msgs, vec![Message::End]);
        assert_eq!(msgs[0].as_command(), Some(Command::empty()));
    }

    #[test]
    fn lexer_round_trip_for_every_command() {
        let cases = vec![
            Command::term("5"),
            Command::pty("3"),
            Command::run(
                vec!["/bin/true".to_string()],
                vec![("TERM".to_string(), "xterm".to_string())],
                Size { rows: 24, cols: 80, x: 0, y: 0 },
            ),
            Command::started(),
            Command::status(0),
            Command::status(-1),
            Command::ts(Size { rows: 30, cols: 100, x: 0, y: 0 }),
            Command::log("diagnostic message"),
        ];

        for cmd in cases {
            let wire = Message::Command(cmd.clone()).to_wire();
            let got = lex_all(&wire).unwrap();
            assert_eq!(got, vec![Message::Command(cmd)]);
        }
    }

    #[test]
    fn frame_boundary_property() {
        // property 2: any byte sequence containing no valid frame lexes to
        // exactly one Text message equal to itself.
        let cases: Vec<&[u8]> = vec![
            b"just some ordinary bytes\n",
            b"\x1b not a frame",
            b"\x1b^not a frame either",
            b"\x1b^-{not-base64!!!}-\x1b\\", // '!' aborts the base64 body
        ];

        for case in cases {
            let mut lexer = Lexer::new();
            lexer.scan(case);
            lexer.flush();
            let mut got = Vec::new();
            while let Some(m) = lexer.chunk() {
                got.push(m);
            }
            assert_eq!(got, vec![Message::Text(case.to_vec())]);
        }
    }

    #[test]
    fn chunked_invariance() {
        let cmd = Command::run(
            vec!["/bin/echo".to_string(), "hi".to_string()],
            vec![],
            Size { rows: 24, cols: 80, x: 0, y: 0 },
        );
        let mut stream = Vec::new();
        stream.extend_from_slice(b"leading text");
        stream.extend_from_slice(&Message::Command(cmd.clone()).to_wire());
        stream.extend_from_slice(b"trailing text");

        let whole = lex_all(&stream).unwrap();

        for chunk_size in [1usize, 2, 3, 7, 16] {
            let mut lexer = Lexer::new();
            for chunk in stream.chunks(chunk_size) {
                lexer.scan(chunk);
            }
            lexer.flush();
            let mut got = Vec::new();
            while let Some(m) = lexer.chunk() {
                got.push(m);
            }
            assert_eq!(got, whole, "chunk_size={chunk_size}");
        }
    }

    #[test]
    fn malformed_base64_body_recovers_as_text() {
        // A frame whose closing sequence matches but whose body is not
        // valid base64/JSON should come back as opaque text rather than
        // erroring.
        let input = b"\x1b^-{????}-\x1b\\";
        let msgs = lex_all(input).unwrap();
        assert_eq!(msgs, vec![Message::Text(input.to_vec())]);
    }

    #[test]
    fn command_accessors() {
        let run = Command::run(
            vec!["/bin/sh".to_string()],
            vec![("A".to_string(), "B".to_string())],
            Size { rows: 1, cols: 2, x: 3, y: 4 },
        );
        assert!(run.is_run());
        assert_eq!(run.run_argv(), Some(vec!["/bin/sh".to_string()]));
        assert_eq!(run.run_env(), Some(vec![("A".to_string(), "B".to_string())]));
        assert_eq!(run.run_size(), Some(Size { rows: 1, cols: 2, x: 3, y: 4 }));

        let status = Command::status(7);
        assert!(status.is_status());
        assert_eq!(status.status_code(), Some(7));

        let term = Command::term("2");
        assert!(term.is_routing());
        assert_eq!(term.term_id(), Some("2"));

        let log = Command::log("hello");
        assert!(log.is_log());
        assert_eq!(log.log_text(), Some("hello"));
    }
}
