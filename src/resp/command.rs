//! Outbound commands.
//!
//! A command is an ordered list of binary-safe arguments, the first being
//! the command name. It always goes out as a multi-bulk array:
//! `*<argc>\r\n` followed by `$<len>\r\n<bytes>\r\n` for each argument.

use bytes::{Bytes, BytesMut};

/// Commands whose reply may be held back by the server until data arrives.
const BLOCKING_COMMANDS: &[&str] = &["BLPOP", "BRPOP", "BRPOPLPUSH"];

/// A command ready to be written to the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    /// Start a command with the given name.
    pub fn new(name: &str) -> Self {
        Command {
            args: vec![Bytes::copy_from_slice(name.as_bytes())],
        }
    }

    /// Append a binary argument.
    pub fn arg<A: AsRef<[u8]>>(mut self, arg: A) -> Self {
        self.args.push(Bytes::copy_from_slice(arg.as_ref()));
        self
    }

    /// Append an integer argument in its decimal form.
    pub fn arg_int(mut self, n: i64) -> Self {
        self.args.push(Bytes::from(n.to_string()));
        self
    }

    /// Append every argument from an iterator, in order.
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        self.args
            .extend(args.into_iter().map(|a| Bytes::copy_from_slice(a.as_ref())));
        self
    }

    /// The command name as sent.
    pub fn name(&self) -> &str {
        std::str::from_utf8(&self.args[0]).unwrap_or("?")
    }

    /// All arguments including the name.
    pub fn as_args(&self) -> &[Bytes] {
        &self.args
    }

    /// Whether the server may park this command waiting for data.
    pub fn is_blocking(&self) -> bool {
        BLOCKING_COMMANDS
            .iter()
            .any(|c| c.as_bytes().eq_ignore_ascii_case(&self.args[0]))
    }

    /// Number of bytes `encode_into` will write.
    pub fn encoded_len(&self) -> usize {
        let header = 1 + decimal_len(self.args.len()) + 2;
        self.args.iter().fold(header, |acc, a| {
            acc + 1 + decimal_len(a.len()) + 2 + a.len() + 2
        })
    }

    /// Encode the command into a fresh buffer.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Encode the command into an existing buffer.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(b"*");
        buf.extend_from_slice(self.args.len().to_string().as_bytes());
        buf.extend_from_slice(b"\r\n");
        for arg in &self.args {
            buf.extend_from_slice(b"$");
            buf.extend_from_slice(arg.len().to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
            buf.extend_from_slice(arg);
            buf.extend_from_slice(b"\r\n");
        }
    }
}

fn decimal_len(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}
