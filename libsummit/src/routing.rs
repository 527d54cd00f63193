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

//! The routing buffer (spec §4.4): a small ordering state machine that
//! accumulates the run of address-establishing `term`/`pty` commands
//! that prefix each payload, so a caller re-emits the addressing
//! overhead only when the route actually changes.

use std::sync::{Arc, RwLock};

use summit_protocol::{Command, Message};

/// A routing buffer. Single-threaded by itself; wrap in
/// [`Shared`] for the one structure §5 calls out as genuinely
/// shared between tasks (a session's from-PTY pump writes, other
/// tasks read `routing()`).
#[derive(Debug, Clone)]
pub struct RoutingBuffer {
    prefix: Vec<Command>,
    buffer: Vec<Command>,
    routing: Vec<Command>,
    buffering: bool,
    completed: bool,
    ignore_blank_term: bool,
}

impl RoutingBuffer {
    /// `prefix` is the fixed prefix this instance always prepends: for
    /// a session, `[term, pty(self_id)]`; for a mux's outbound side it
    /// may be empty; for a server-side terminal buffer,
    /// `[term(window_id)]`.
    pub fn new(prefix: Vec<Command>) -> Self {
        RoutingBuffer {
            buffer: prefix.clone(),
            routing: prefix.clone(),
            prefix,
            buffering: false,
            completed: true,
            ignore_blank_term: false,
        }
    }

    /// When set, a `term("")` arriving mid-frame is silently ignored
    /// rather than overwriting the buffered term slot.
    pub fn with_ignore_blank_term(mut self, ignore: bool) -> Self {
        self.ignore_blank_term = ignore;
        self
    }

    /// Feed one incoming message. Returns `true` if the caller should
    /// hold the message (it was absorbed as routing) and `false` if
    /// the caller should forward it, prefixed by [`RoutingBuffer::routing`].
    pub fn buffered(&mut self, m: &Message) -> bool {
        if let Message::Command(cmd) = m {
            if cmd.is_routing() {
                if !self.buffering {
                    self.buffering = true;
                    self.completed = false;
                }
                match cmd.cmd() {
                    "pty" => self.buffer.push(cmd.clone()),
                    "term" => {
                        let blank = cmd.term_id().unwrap_or("").is_empty();
                        if self.ignore_blank_term && blank {
                            // ignored per ignore_blank_term
                        } else if self.prefix.first().map(|c| c.cmd() == "term").unwrap_or(false) {
                            self.buffer[0] = cmd.clone();
                        }
                    }
                    _ => {}
                }
                return true;
            }
        }

        if !self.completed {
            self.routing = self.buffer.clone();
            self.buffer = self.prefix.clone();
            crate::test_hooks::emit("routing-buffer-commit");
        }
        self.buffering = false;
        self.completed = !matches!(m, Message::Command(c) if c.is_status());
        false
    }

    /// The routing run to emit immediately before the payload that was
    /// just passed to [`RoutingBuffer::buffered`] (when it returned
    /// `false`).
    pub fn routing(&self) -> &[Command] {
        &self.routing
    }

    /// Convenience: the routing run followed by `payload`, as the
    /// sequence of [`Message`]s a caller should actually write.
    pub fn emit(&self, payload: Message) -> Vec<Message> {
        let mut out: Vec<Message> = self.routing.iter().cloned().map(Message::Command).collect();
        out.push(payload);
        out
    }
}

/// A [`RoutingBuffer`] guarded by a `RwLock`, for the one case (§5)
/// where more than one task touches the same buffer: a session's
/// from-PTY pump writes while other tasks may read `routing()`.
#[derive(Debug, Clone)]
pub struct Shared(Arc<RwLock<RoutingBuffer>>);

impl Shared {
    pub fn new(buf: RoutingBuffer) -> Self {
        Shared(Arc::new(RwLock::new(buf)))
    }

    pub fn buffered(&self, m: &Message) -> bool {
        self.0.write().unwrap().buffered(m)
    }

    pub fn routing(&self) -> Vec<Command> {
        self.0.read().unwrap().routing().to_vec()
    }

    pub fn emit(&self, payload: Message) -> Vec<Message> {
        self.0.read().unwrap().emit(payload)
    }
}

#[cfg(test)]
mod test {
    use summit_protocol::Size;

    use super::*;

    fn text(s: &str) -> Message {
        Message::Text(s.as_bytes().to_vec())
    }

    #[test]
    fn s5_collapse() {
        let mut buf = RoutingBuffer::new(vec![]);

        assert!(buf.buffered(&Message::Command(Command::term("a"))));
        assert!(buf.buffered(&Message::Command(Command::pty("1"))));
        assert!(buf.buffered(&Message::Command(Command::pty("2"))));

        assert!(!buf.buffered(&text("x")));
        assert_eq!(
            buf.routing(),
            vec![Command::term("a"), Command::pty("1"), Command::pty("2")]
        );

        // No new routing messages before the second payload: same prefix
        // is still obliged to be emitted (per S5, "still gets the same
        // prefix").
        assert!(!buf.buffered(&text("y")));
        assert_eq!(
            buf.routing(),
            vec![Command::term("a"), Command::pty("1"), Command::pty("2")]
        );
    }

    #[test]
    fn idempotence_property() {
        // feeding the same routing message twice in a row should leave
        // Routing() unchanged after the next payload commit, compared to
        // feeding it once.
        let mut once = RoutingBuffer::new(vec![]);
        once.buffered(&Message::Command(Command::term("a")));
        once.buffered(&text("payload"));

        let mut twice = RoutingBuffer::new(vec![]);
        twice.buffered(&Message::Command(Command::term("a")));
        twice.buffered(&Message::Command(Command::term("a")));
        twice.buffered(&text("payload"));

        assert_eq!(once.routing(), twice.routing());
    }

    #[test]
    fn status_recommits_prefix_without_new_routing() {
        let mut buf = RoutingBuffer::new(vec![Command::term("w")]);
        buf.buffered(&Message::Command(Command::pty("3")));
        buf.buffered(&Message::Command(Command::status(0)));
        let first = buf.routing().to_vec();

        // No routing messages before the next payload: completed==false
        // after a status, so the same prefix should recommit.
        buf.buffered(&text("more"));
        assert_eq!(buf.routing(), first);
    }

    #[test]
    fn fixed_prefix_is_prepended_even_with_no_routing_input() {
        let mut buf = RoutingBuffer::new(vec![Command::term("w"), Command::pty("3")]);
        assert!(!buf.buffered(&text("hi")));
        assert_eq!(buf.routing(), vec![Command::term("w"), Command::pty("3")]);
    }

    #[test]
    fn ignore_blank_term_skips_overwrite() {
        let mut buf =
            RoutingBuffer::new(vec![Command::term("keep")]).with_ignore_blank_term(true);
        buf.buffered(&Message::Command(Command::term("")));
        buf.buffered(&text("payload"));
        assert_eq!(buf.routing(), vec![Command::term("keep")]);
    }

    #[test]
    fn emit_prepends_routing_run() {
        let mut buf = RoutingBuffer::new(vec![]);
        buf.buffered(&Message::Command(Command::term("a")));
        let payload = Message::Command(Command::ts(Size { rows: 1, cols: 1, x: 0, y: 0 }));
        buf.buffered(&payload);
        let emitted = buf.emit(payload.clone());
        assert_eq!(emitted, vec![Message::Command(Command::term("a")), payload]);
    }
}
