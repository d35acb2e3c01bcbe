use std::fmt::Write;

use bytes::{BufMut, Bytes, BytesMut};

pub const SIMPLE_STRING: u8 = b'+';
pub const ERROR: u8 = b'-';
pub const INTEGER: u8 = b':';
pub const BULK_STRING: u8 = b'$';
pub const ARRAY: u8 = b'*';

/**
 * Single RESP token as written on the wire
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RESPToken<'a> {
    SimpleString(&'a [u8]),     // "+<STRING>\r\n"
    Error(&'a [u8]),            // "-<STRING>\r\n"
    Integer(i64),               // ":<INT>\r\n"
    BulkString(&'a [u8]),       // "$<SIZE>\r\n<BYTES>\r\n"
    Null,                       // "$-1\r\n"
    ArraySize(usize),           // "*<SIZE>\r\n"
    NullArray,                  // "*-1\r\n"
}

impl<'a> RESPToken<'a> {
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            RESPToken::SimpleString(s) => Self::encode_line(buf, SIMPLE_STRING, s),
            RESPToken::Error(s) => Self::encode_line(buf, ERROR, s),
            RESPToken::Integer(n) => Self::encode_number(buf, INTEGER, *n),
            RESPToken::BulkString(s) => {
                Self::encode_number(buf, BULK_STRING, s.len() as i64);
                buf.put_slice(s);
                buf.put_slice(b"\r\n");
            }
            RESPToken::Null => buf.put_slice(b"$-1\r\n"),
            RESPToken::ArraySize(size) => Self::encode_number(buf, ARRAY, *size as i64),
            RESPToken::NullArray => buf.put_slice(b"*-1\r\n"),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    fn encode_line(buf: &mut BytesMut, prefix: u8, line: &[u8]) {
        buf.reserve(line.len() + 3);
        buf.put_u8(prefix);
        buf.put_slice(line);
        buf.put_slice(b"\r\n");
    }

    fn encode_number(buf: &mut BytesMut, prefix: u8, n: i64) {
        buf.put_u8(prefix);
        // Writing into BytesMut grows the buffer and cannot fail
        let _ = write!(buf, "{}", n);
        buf.put_slice(b"\r\n");
    }
}

#[cfg(test)]
mod tests {
    use super::RESPToken;
    use rstest::rstest;

    #[rstest]
    #[case("PING", "+PING\r\n")]
    #[case("", "+\r\n")]
    #[case(" ", "+ \r\n")]
    #[case("Hello world", "+Hello world\r\n")]
    fn should_serialise_simple_string(#[case] simple: &str, #[case] expected_str: &str) {
        assert_eq!(expected_str.as_bytes(), &RESPToken::SimpleString(simple.as_bytes()).to_bytes()[..])
    }

    #[rstest]
    #[case("ERR", "-ERR\r\n")]
    #[case("ERR bad message", "-ERR bad message\r\n")]
    fn should_serialise_error(#[case] error: &str, #[case] expected_str: &str) {
        assert_eq!(expected_str.as_bytes(), &RESPToken::Error(error.as_bytes()).to_bytes()[..])
    }

    #[rstest]
    #[case(0, ":0\r\n")]
    #[case(-10, ":-10\r\n")]
    #[case(23, ":23\r\n")]
    fn should_serialise_int(#[case] int: i64, #[case] expected_str: &str) {
        assert_eq!(expected_str.as_bytes(), &RESPToken::Integer(int).to_bytes()[..])
    }

    #[rstest]
    #[case("", "$0\r\n\r\n")]
    #[case("GET", "$3\r\nGET\r\n")]
    #[case("a\r\nb", "$4\r\na\r\nb\r\n")]
    fn should_serialise_bulk_string(#[case] bulk: &str, #[case] expected_str: &str) {
        assert_eq!(expected_str.as_bytes(), &RESPToken::BulkString(bulk.as_bytes()).to_bytes()[..])
    }

    #[test]
    fn should_serialise_nulls() {
        assert_eq!(b"$-1\r\n", &RESPToken::Null.to_bytes()[..]);
        assert_eq!(b"*-1\r\n", &RESPToken::NullArray.to_bytes()[..]);
    }

    #[rstest]
    #[case(0, "*0\r\n")]
    #[case(1, "*1\r\n")]
    #[case(5, "*5\r\n")]
    fn should_serialise_array(#[case] size: usize, #[case] expected_str: &str) {
        assert_eq!(expected_str.as_bytes(), &RESPToken::ArraySize(size).to_bytes()[..])
    }
}
