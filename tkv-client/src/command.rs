//! # Command Builder
//!
//! Purpose: Collect the binary arguments of one request in wire order.
//!
//! Builders take `self` by value so optional flags read top to bottom:
//!
//! ```text
//! Command::new("SET").arg(key).arg(value).flag_if(nx, "NX")
//! ```

use bytes::{Bytes, BytesMut};

use crate::resp::encode_command;

/// One request, as an ordered list of binary arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    /// Starts a command with its name.
    pub fn new(name: &'static str) -> Self {
        let mut args = Vec::with_capacity(4);
        args.push(Bytes::from_static(name.as_bytes()));
        Command { args }
    }

    /// Appends a binary argument.
    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(Bytes::copy_from_slice(arg.as_ref()));
        self
    }

    /// Appends every argument from `args` in order.
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        for arg in args {
            self.args.push(Bytes::copy_from_slice(arg.as_ref()));
        }
        self
    }

    /// Appends a signed integer in decimal.
    pub fn arg_int(mut self, value: i64) -> Self {
        self.args.push(Bytes::from(value.to_string()));
        self
    }

    /// Appends an unsigned integer in decimal.
    pub fn arg_uint(mut self, value: u64) -> Self {
        self.args.push(Bytes::from(value.to_string()));
        self
    }

    /// Appends a static keyword when `enabled`.
    pub fn flag_if(mut self, enabled: bool, flag: &'static str) -> Self {
        if enabled {
            self.args.push(Bytes::from_static(flag.as_bytes()));
        }
        self
    }

    /// Command name (first argument).
    pub fn name(&self) -> &[u8] {
        &self.args[0]
    }

    /// All arguments including the name.
    pub fn as_args(&self) -> &[Bytes] {
        &self.args
    }

    /// Encodes the request as a RESP2 array.
    pub fn encode(&self) -> Bytes {
        let size: usize = self.args.iter().map(|arg| arg.len() + 16).sum();
        let mut out = BytesMut::with_capacity(size + 16);
        encode_command(&self.args, &mut out);
        out.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_arguments_in_order() {
        let cmd = Command::new("SET")
            .arg(b"k")
            .arg("v")
            .flag_if(true, "NX")
            .flag_if(false, "XX")
            .arg_uint(10);
        let args: Vec<&[u8]> = cmd.as_args().iter().map(|a| &a[..]).collect();
        assert_eq!(args, vec![&b"SET"[..], &b"k"[..], &b"v"[..], &b"NX"[..], &b"10"[..]]);
        assert_eq!(cmd.name(), b"SET");
    }

    #[test]
    fn encodes_as_resp_array() {
        let cmd = Command::new("INCRBY").arg("n").arg_int(-3);
        assert_eq!(&cmd.encode()[..], b"*3\r\n$6\r\nINCRBY\r\n$1\r\nn\r\n$2\r\n-3\r\n");
    }
}
