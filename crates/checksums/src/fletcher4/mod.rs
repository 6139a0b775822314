mod checksum;
mod error;

pub use checksum::Fletcher4;
pub use error::ChecksumError;
