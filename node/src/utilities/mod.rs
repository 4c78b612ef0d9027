pub(crate) mod encoding;
pub(crate) mod hash;
pub(crate) mod time;

pub use encoding::{from_base58, from_hex, to_base58, to_hex};
pub use hash::{blake2_256, HashType};
pub use time::HashgraphTime;
