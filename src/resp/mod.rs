/**
 * RESP - Redis Serialisation Protocol
 * https://redis.io/docs/reference/protocol-spec/
 */

pub mod command;
pub mod frame;
pub mod parser;
pub mod reader;
pub mod sequence;
pub mod token;

pub use command::{Command, CommandName};
pub use frame::{FromReply, RESPFrame};
pub use parser::{RESPParser, ReplyDecoder};
pub use reader::{Cursor, Terminator, WireReader};
pub use sequence::{ByteSequence, Segments};
