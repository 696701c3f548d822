use std::io;

/// Reads a message out of an incoming frame, borrowing from it where possible.
pub trait Deserialize<'a>: Sized {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self>;
}
