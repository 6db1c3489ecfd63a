//! # Decryptors
//!
//! Rewrite downloaded bytes before they are decoded. A decryptor sees only
//! the complete payload, so progressive partials are not delivered for
//! requests that carry one.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;

use crate::identifier::ResourceId;

pub trait DataDecryptor: Send + Sync {
    /// Decrypt a complete download. `None` fails the load as bad data.
    fn decrypt(&self, data: &Bytes, identifier: &ResourceId) -> Option<Bytes>;
}

type DecryptFn = dyn Fn(&Bytes, &ResourceId) -> Option<Bytes> + Send + Sync;

/// Decryptor backed by a closure
pub struct FnDecryptor {
    func: Box<DecryptFn>,
}

impl FnDecryptor {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Bytes, &ResourceId) -> Option<Bytes> + Send + Sync + 'static,
    {
        Self {
            func: Box::new(func),
        }
    }
}

impl DataDecryptor for FnDecryptor {
    fn decrypt(&self, data: &Bytes, identifier: &ResourceId) -> Option<Bytes> {
        (self.func)(data, identifier)
    }
}

/// Payloads served as standard base64 text
#[derive(Debug, Default, Clone, Copy)]
pub struct Base64Decryptor;

impl DataDecryptor for Base64Decryptor {
    fn decrypt(&self, data: &Bytes, _identifier: &ResourceId) -> Option<Bytes> {
        let text: Vec<u8> = data
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        STANDARD.decode(text).ok().map(Bytes::from)
    }
}
