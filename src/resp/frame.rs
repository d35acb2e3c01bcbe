use std::str::from_utf8;

use bytes::{Bytes, BytesMut};

use super::token::RESPToken;
use crate::error::RedisError;

/**
 * Fully decoded reply
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RESPFrame {
    Simple(Bytes),
    Error(Bytes),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<RESPFrame>),
}

impl RESPFrame {
    pub fn simple(s: &'static str) -> RESPFrame {
        RESPFrame::Simple(Bytes::from_static(s.as_bytes()))
    }

    pub fn bulk(s: &'static str) -> RESPFrame {
        RESPFrame::Bulk(Bytes::from_static(s.as_bytes()))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RESPFrame::Error(_))
    }

    /**
     * Serialises the frame; used for server-side fixtures and echoing frames back
     */
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            RESPFrame::Simple(s) => RESPToken::SimpleString(s).encode(buf),
            RESPFrame::Error(s) => RESPToken::Error(s).encode(buf),
            RESPFrame::Integer(n) => RESPToken::Integer(*n).encode(buf),
            RESPFrame::Bulk(s) => RESPToken::BulkString(s).encode(buf),
            RESPFrame::Null => RESPToken::Null.encode(buf),
            RESPFrame::Array(children) => {
                RESPToken::ArraySize(children.len()).encode(buf);
                for child in children {
                    child.encode(buf);
                }
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

/**
 * Conversion of a decoded reply into the caller's result type.
 * Error replies never reach this trait; they become `RedisError::Server` first.
 */
pub trait FromReply: Sized + Send + 'static {
    fn from_reply(frame: RESPFrame) -> Result<Self, RedisError>;
}

impl FromReply for RESPFrame {
    fn from_reply(frame: RESPFrame) -> Result<Self, RedisError> {
        Ok(frame)
    }
}

impl FromReply for () {
    fn from_reply(_frame: RESPFrame) -> Result<Self, RedisError> {
        Ok(())
    }
}

impl FromReply for Bytes {
    fn from_reply(frame: RESPFrame) -> Result<Self, RedisError> {
        match frame {
            RESPFrame::Simple(s) | RESPFrame::Bulk(s) => Ok(s),
            other => Err(RedisError::unexpected("string", other)),
        }
    }
}

impl FromReply for Option<Bytes> {
    fn from_reply(frame: RESPFrame) -> Result<Self, RedisError> {
        match frame {
            RESPFrame::Null => Ok(None),
            other => Bytes::from_reply(other).map(Some),
        }
    }
}

impl FromReply for String {
    fn from_reply(frame: RESPFrame) -> Result<Self, RedisError> {
        let bytes = Bytes::from_reply(frame)?;
        from_utf8(&bytes)
            .map(str::to_owned)
            .map_err(|_| RedisError::unexpected("utf-8 string", &bytes))
    }
}

impl FromReply for i64 {
    fn from_reply(frame: RESPFrame) -> Result<Self, RedisError> {
        match frame {
            RESPFrame::Integer(n) => Ok(n),
            RESPFrame::Simple(ref s) | RESPFrame::Bulk(ref s) => from_utf8(s)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| RedisError::unexpected("integer", &frame)),
            other => Err(RedisError::unexpected("integer", other)),
        }
    }
}

impl FromReply for bool {
    fn from_reply(frame: RESPFrame) -> Result<Self, RedisError> {
        i64::from_reply(frame).map(|n| n != 0)
    }
}

impl<T: FromReply> FromReply for Vec<T> {
    fn from_reply(frame: RESPFrame) -> Result<Self, RedisError> {
        match frame {
            RESPFrame::Array(children) => children.into_iter().map(T::from_reply).collect(),
            RESPFrame::Null => Ok(vec![]),
            other => Err(RedisError::unexpected("array", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn should_encode_nested_array() {
        let frame = RESPFrame::Array(vec![
            RESPFrame::Integer(1),
            RESPFrame::Array(vec![RESPFrame::bulk("a"), RESPFrame::Null]),
        ]);

        assert_eq!(&b"*2\r\n:1\r\n*2\r\n$1\r\na\r\n$-1\r\n"[..], &frame.to_bytes()[..]);
    }

    #[rstest]
    #[case(RESPFrame::Integer(42), 42)]
    #[case(RESPFrame::bulk("-7"), -7)]
    #[case(RESPFrame::simple("12"), 12)]
    fn should_convert_integers(#[case] frame: RESPFrame, #[case] expected: i64) {
        assert_eq!(expected, i64::from_reply(frame).unwrap())
    }

    #[rstest]
    #[case(RESPFrame::bulk("nope"))]
    #[case(RESPFrame::Null)]
    #[case(RESPFrame::Array(vec![]))]
    fn should_reject_non_integers(#[case] frame: RESPFrame) {
        assert!(matches!(i64::from_reply(frame), Err(RedisError::UnexpectedReply(_))))
    }

    #[test]
    fn should_convert_null_to_none() {
        assert_eq!(None, Option::<Bytes>::from_reply(RESPFrame::Null).unwrap());
        assert_eq!(
            Some(Bytes::from_static(b"v")),
            Option::<Bytes>::from_reply(RESPFrame::bulk("v")).unwrap()
        );
    }

    #[test]
    fn should_convert_arrays_elementwise() {
        let frame = RESPFrame::Array(vec![RESPFrame::bulk("a"), RESPFrame::simple("b")]);

        assert_eq!(vec!["a".to_owned(), "b".to_owned()], Vec::<String>::from_reply(frame).unwrap());
    }
}
