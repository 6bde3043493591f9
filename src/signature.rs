//! Shared signature hashing for the Partition Engine (recursive, spec
//! §4.5 Step B) and the Acyclic Merger (shallow, spec §4.6).
//!
//! Both signatures are "finalized with a 256-bit hash" (spec §4.5); this
//! module owns the one `Sha256` accumulator both phases feed text into, so
//! the hashing policy lives in exactly one place.

use sha2::{Digest, Sha256};

/// A 256-bit structural signature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature([u8; 32]);

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..")
    }
}

impl Signature {
    /// Full lower-hex encoding of all 32 bytes. Used when a signature is
    /// folded into a *different* signature's input text (recursive
    /// signatures, dependent-partition tuples): unlike [`Debug`]'s
    /// truncated form, this preserves all 256 bits of entropy.
    #[must_use]
    pub fn to_hex(self) -> String {
        use std::fmt::Write;
        let mut out = String::with_capacity(64);
        for byte in &self.0 {
            let _ = write!(out, "{byte:02x}");
        }
        out
    }
}

/// Accumulates signature text and finalizes it into a [`Signature`].
///
/// Text fragments are appended with an internal separator so that, e.g.,
/// a member named `"ab"` followed by a member named `"c"` cannot hash the
/// same as one named `"a"` followed by `"bc"`.
#[derive(Default)]
pub struct SignatureBuilder {
    text: String,
}

impl SignatureBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: &str) -> &mut Self {
        self.text.push('\x1f');
        self.text.push_str(fragment);
        self
    }

    #[must_use]
    pub fn finish(&self) -> Signature {
        let mut hasher = Sha256::new();
        hasher.update(self.text.as_bytes());
        Signature(hasher.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn differing_fragments_hash_differently() {
        let mut a = SignatureBuilder::new();
        a.push("struct").push("x:int").push("y:int");
        let mut b = SignatureBuilder::new();
        b.push("struct").push("x:int");
        b.push("y:int");
        assert_eq!(a.finish(), b.finish());

        let mut c = SignatureBuilder::new();
        c.push("struct").push("xy:int");
        assert_ne!(a.finish(), c.finish());
    }
}
