mod crypto;

pub use crypto::{CredentialCodec, DerivedKey};

#[cfg(test)]
pub(crate) use crypto::test_codec;
