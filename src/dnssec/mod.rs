pub mod algorithm;
pub mod digest;
pub mod key_tag;
pub mod keys;
pub mod rdata;
pub mod signer;
pub mod store;

pub use algorithm::Algorithm;
pub use digest::DigestType;
pub use keys::KeyPair;
pub use signer::{Signer, SignerOptions};
pub use store::{RecordStore, SignedAnswer};
