//! Public-only derivation
//!
//! Non-hardened children can be derived from an extended public key alone, giving the
//! same public keys and chain codes as derivation from the secret key.

use crate::{
    curves::{CurveId, PublicKeyBytes},
    errors::Error,
    node::MAX_DEPTH,
    path::DerivationPath,
    step, ChainCode, ChildIndex, NonHardenedIndex,
};

/// Extended public key
///
/// Public counterpart of [`ExtendedKeyNode`](crate::ExtendedKeyNode), obtained with
/// [`public_extended_key`](crate::ExtendedKeyNode::public_extended_key). Only non-hardened
/// children can be derived from it.
///
/// ### Example
/// Derive a public key m/1/10 without access to the secret key
/// ```rust
/// use hd_keytree::CurveId;
///
/// # let entropy = b"do not use this seed :)".as_slice();
/// let master_key = hd_keytree::derive_master_key(CurveId::Secp256k1, entropy)?;
/// let master_public_key = master_key.public_extended_key()?;
///
/// let derived = master_public_key.derive_by_path("m/1/10")?;
/// assert_eq!(
///     derived.public_key(),
///     master_key.derive_by_path("m/1/10")?.public_key()?,
/// );
/// # Ok::<(), hd_keytree::errors::Error>(())
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtendedPublicKey {
    curve: CurveId,
    public_key: PublicKeyBytes,
    chain_code: ChainCode,
    depth: u8,
}

impl ExtendedPublicKey {
    pub(crate) fn new(
        curve: CurveId,
        public_key: PublicKeyBytes,
        chain_code: ChainCode,
        depth: u8,
    ) -> Self {
        Self {
            curve,
            public_key,
            chain_code,
            depth,
        }
    }

    /// Curve of the key
    pub fn curve(&self) -> CurveId {
        self.curve
    }

    /// Compressed public key
    pub fn public_key(&self) -> &PublicKeyBytes {
        &self.public_key
    }

    /// Chain code of the key
    pub fn chain_code(&self) -> &ChainCode {
        &self.chain_code
    }

    /// Depth of the key in the tree
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Derives a non-hardened child at `index`
    ///
    /// Returns [`Error::HardenedFromPublic`] if `index` is hardened
    pub fn derive_child(&self, index: impl Into<ChildIndex>) -> Result<Self, Error> {
        match index.into() {
            ChildIndex::NonHardened(i) => self.derive_non_hardened(i),
            ChildIndex::Hardened(i) => Err(Error::HardenedFromPublic(*i)),
        }
    }

    fn derive_non_hardened(&self, index: NonHardenedIndex) -> Result<Self, Error> {
        let depth = self
            .depth
            .checked_add(1)
            .filter(|depth| *depth <= MAX_DEPTH)
            .ok_or(Error::DepthExceeded { max: MAX_DEPTH })?;
        let (public_key, chain_code) =
            step::derive_child_public(&self.public_key, &self.chain_code, self.curve, index)?;
        tracing::trace!(depth, index = *index, curve = %self.curve, "derived child public key");
        Ok(Self {
            curve: self.curve,
            public_key,
            chain_code,
            depth,
        })
    }

    /// Derives a descendant at `path`
    ///
    /// Path must not contain hardened indexes
    pub fn derive_by_path(&self, path: &str) -> Result<Self, Error> {
        self.derive_path(&path.parse()?)
    }

    /// Derives a descendant at parsed `path`
    pub fn derive_path(&self, path: &DerivationPath) -> Result<Self, Error> {
        if usize::from(self.depth) + path.len() > usize::from(MAX_DEPTH) {
            return Err(Error::DepthExceeded { max: MAX_DEPTH });
        }
        path.iter()
            .try_fold(*self, |key, child_index| key.derive_child(child_index))
    }
}
