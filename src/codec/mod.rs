//! Wire-primitive encoders and decoders.
//!
//! Every function here is pure: given a buffer and a value, append bytes;
//! given a cursor, consume bytes and return a value or a `DecodeError`.
//! Nothing in this module touches storage, the network, or crypto.

pub mod bytes;
pub mod number;
pub mod timestamp_list;
pub mod value;
pub mod varint;

pub use bytes::{decode_bytes, decode_bytes_owned, decode_node_id, encode_bytes, encode_node_id, NodeId};
pub use number::{decode_json, decode_number, encode_json, encode_number};
pub use timestamp_list::{decode_timestamp_list, encode_timestamp_list};
pub use value::{decode_value, encode_value, SqliteValue};
pub use varint::{decode_varuint, encode_varuint, varuint_encoded_len};
