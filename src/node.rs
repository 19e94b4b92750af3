//! Nodes of the key tree
//!
//! A node owns its key material and refers to its parent weakly, so dropping a parent
//! never invalidates its children. Derived children inherit the curve of their parent.

use core::fmt;
use std::sync::{Arc, OnceLock, Weak};

use num_bigint::BigUint;
use num_traits::Zero;
use zeroize::Zeroizing;

use crate::{
    curves::{CurveId, PublicKeyBytes},
    errors::Error,
    path::DerivationPath,
    public::ExtendedPublicKey,
    step, ChainCode, ChildIndex, H,
};

/// Maximum depth of a node in the key tree, root being at depth 0
pub const MAX_DEPTH: u8 = 9;

/// Size of the seed that a node is built from: 32 bytes of secret key and 32 bytes of chain code
pub const SEED_LEN: usize = 64;

/// Extended secret key: a node of the key tree
///
/// Holds a secret scalar, a chain code, the depth in the tree, an optional curve binding
/// and a non-owning link to its parent. A node is never modified once constructed:
/// derivation and curve binding return new nodes.
///
/// `ExtendedKeyNode` is a reference-counted handle, cloning it is cheap and clones refer to
/// the same node (see [`ExtendedKeyNode::ptr_eq`]). It's safe to derive children of the
/// same node from many threads at once.
#[derive(Clone)]
pub struct ExtendedKeyNode {
    inner: Arc<Node>,
}

struct Node {
    secret_key: Zeroizing<[u8; 32]>,
    chain_code: ChainCode,
    depth: u8,
    child_index: Option<ChildIndex>,
    curve: Option<CurveId>,
    parent: Option<Weak<Node>>,
    public_key: OnceLock<PublicKeyBytes>,
}

impl Node {
    fn parent(&self) -> Option<Arc<Node>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Curve bound to the node or to the nearest ancestor that is still alive
    fn resolve_curve(&self) -> Option<CurveId> {
        if self.curve.is_some() {
            return self.curve;
        }
        let mut ancestor = self.parent();
        while let Some(node) = ancestor {
            if node.curve.is_some() {
                return node.curve;
            }
            ancestor = node.parent();
        }
        None
    }
}

impl ExtendedKeyNode {
    /// Constructs a root node from 64 bytes of key material
    ///
    /// First 32 bytes become the secret key, the last 32 bytes become the chain code.
    /// Returns [`Error::InvalidSeedLength`] if seed is not exactly [`SEED_LEN`] bytes long.
    ///
    /// The node has no curve bound, use [`set_curve`](Self::set_curve) before deriving
    /// children.
    pub fn from_seed(seed: &[u8]) -> Result<Self, Error> {
        Self::build(seed, None)
    }

    /// Constructs a node from 64 bytes of key material and attaches it below `parent`
    ///
    /// Node depth is `parent.depth() + 1`, [`Error::DepthExceeded`] is returned if it's
    /// above [`MAX_DEPTH`]. The node uses the curve of its ancestors, if any.
    pub fn with_parent(seed: &[u8], parent: &ExtendedKeyNode) -> Result<Self, Error> {
        Self::build(seed, Some(parent))
    }

    fn build(seed: &[u8], parent: Option<&ExtendedKeyNode>) -> Result<Self, Error> {
        if seed.len() != SEED_LEN {
            return Err(Error::InvalidSeedLength {
                expected: SEED_LEN,
                actual: seed.len(),
            });
        }
        let depth = match parent {
            Some(parent) => child_depth(parent.depth())?,
            None => 0,
        };

        let mut secret_key = Zeroizing::new([0u8; 32]);
        secret_key.copy_from_slice(&seed[..32]);
        let mut chain_code = ChainCode::default();
        chain_code.copy_from_slice(&seed[32..]);

        if let Some(curve) = parent.and_then(ExtendedKeyNode::curve) {
            ensure_valid_secret_key(curve, &secret_key)?;
        }

        Ok(Self::from_parts(Node {
            secret_key,
            chain_code,
            depth,
            child_index: None,
            curve: None,
            parent: parent.map(|p| Arc::downgrade(&p.inner)),
            public_key: OnceLock::new(),
        }))
    }

    fn from_parts(node: Node) -> Self {
        Self {
            inner: Arc::new(node),
        }
    }

    /// Binds the node to the curve with given identifier
    ///
    /// Identifiers are matched case-insensitively, see [`CurveId`] for accepted names.
    /// Returns a new node that differs from `self` only by the curve binding.
    ///
    /// Errors:
    /// * [`Error::InvalidCurve`] if the curve is not supported
    /// * [`Error::CurveAlreadyBound`] if the node or any of its ancestors already has a curve
    /// * [`Error::InvalidSecretKey`] if the secret key is not a valid scalar of the curve
    pub fn set_curve(&self, curve: &str) -> Result<Self, Error> {
        self.with_curve(curve.parse()?)
    }

    /// Binds the node to the curve
    ///
    /// Same as [`set_curve`](Self::set_curve), but takes a parsed identifier
    pub fn with_curve(&self, curve: CurveId) -> Result<Self, Error> {
        if let Some(bound) = self.curve() {
            return Err(Error::CurveAlreadyBound(bound));
        }
        ensure_valid_secret_key(curve, &self.inner.secret_key)?;

        Ok(Self::from_parts(Node {
            secret_key: self.inner.secret_key.clone(),
            chain_code: self.inner.chain_code,
            depth: self.inner.depth,
            child_index: self.inner.child_index,
            curve: Some(curve),
            parent: self.inner.parent.clone(),
            public_key: OnceLock::new(),
        }))
    }

    /// Curve of the node
    ///
    /// Resolved by walking up to the nearest ancestor with a curve bound. Derived children
    /// always carry the curve of the parent they were derived from. Returns `None` if no
    /// curve is bound.
    pub fn curve(&self) -> Option<CurveId> {
        self.inner.resolve_curve()
    }

    /// Secret key of the node, big-endian
    pub fn secret_key(&self) -> &[u8; 32] {
        &self.inner.secret_key
    }

    /// Chain code of the node
    pub fn chain_code(&self) -> &ChainCode {
        &self.inner.chain_code
    }

    /// Depth of the node, 0 for a root
    pub fn depth(&self) -> u8 {
        self.inner.depth
    }

    /// Index the node was derived at, `None` if it was constructed from a seed
    pub fn child_index(&self) -> Option<ChildIndex> {
        self.inner.child_index
    }

    /// Parent of the node, if it has one and it's still alive
    pub fn parent(&self) -> Option<ExtendedKeyNode> {
        self.inner.parent().map(|inner| Self { inner })
    }

    /// Whether both handles refer to the same node
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Compressed public key of the node
    ///
    /// Computed on first access and cached afterwards. Returns [`Error::CurveUnset`] if no
    /// curve is bound to the node.
    pub fn public_key(&self) -> Result<&PublicKeyBytes, Error> {
        if let Some(public_key) = self.inner.public_key.get() {
            return Ok(public_key);
        }
        let curve = self.curve().ok_or(Error::CurveUnset)?;
        let public_key = curve.compressed_public_key(&self.inner.secret_key)?;
        // concurrent first accesses compute the same value, whichever is stored first wins
        Ok(self.inner.public_key.get_or_init(|| public_key))
    }

    /// Extended public key of the node
    pub fn public_extended_key(&self) -> Result<ExtendedPublicKey, Error> {
        let curve = self.curve().ok_or(Error::CurveUnset)?;
        Ok(ExtendedPublicKey::new(
            curve,
            *self.public_key()?,
            self.inner.chain_code,
            self.inner.depth,
        ))
    }

    /// Derives a child at `index`
    ///
    /// When `hardened` is set, the effective index is `index + 2^31`. `index` itself must be
    /// below $2^{31}$, otherwise [`Error::IndexOutOfRange`] is returned.
    ///
    /// Returns a [retryable](Error::is_retryable) error if the child is not defined for this
    /// index, in which case the next index should be used (see
    /// [`derive_next_valid`](Self::derive_next_valid)).
    pub fn derive(&self, index: u32, hardened: bool) -> Result<Self, Error> {
        let child_index =
            ChildIndex::new(index, hardened).map_err(|_| Error::IndexOutOfRange(index))?;
        self.derive_child(child_index)
    }

    /// Derives a child at `child_index`
    ///
    /// Unlike [`derive`](Self::derive), index of a hardened child includes the $2^{31}$ offset
    pub fn derive_child(&self, child_index: impl Into<ChildIndex>) -> Result<Self, Error> {
        let child_index = child_index.into();
        let depth = child_depth(self.depth())?;
        let curve = self.curve().ok_or(Error::CurveUnset)?;
        let public_key = self.public_key()?;

        let child = step::derive_child_secret(
            &self.inner.secret_key,
            &self.inner.chain_code,
            public_key,
            &curve.group_order(),
            child_index,
        )?;
        tracing::trace!(depth, index = %child_index, %curve, "derived child key");

        Ok(Self::from_parts(Node {
            secret_key: child.secret_key,
            chain_code: child.chain_code,
            depth,
            child_index: Some(child_index),
            curve: Some(curve),
            parent: Some(Arc::downgrade(&self.inner)),
            public_key: OnceLock::new(),
        }))
    }

    /// Derives a descendant at `path`, e.g. `m/44'/0'/0'/0/1`
    ///
    /// Path `m` returns the node itself. Derivation stops at the first failing step and its
    /// error is returned, see [`DerivationPath`] for the path grammar.
    pub fn derive_by_path(&self, path: &str) -> Result<Self, Error> {
        self.derive_path(&path.parse()?)
    }

    /// Derives a descendant at parsed `path`
    pub fn derive_path(&self, path: &DerivationPath) -> Result<Self, Error> {
        if usize::from(self.depth()) + path.len() > usize::from(MAX_DEPTH) {
            return Err(Error::DepthExceeded { max: MAX_DEPTH });
        }
        path.iter()
            .try_fold(self.clone(), |node, child_index| node.derive_child(child_index))
    }

    /// Derives a child at the first index starting from `index` for which the child is defined
    ///
    /// Tries `index`, `index + 1`, ... while derivation fails with a
    /// [retryable](Error::is_retryable) error, making at most `max_attempts` attempts (and at
    /// least one). Returns the index that was used along with the child.
    pub fn derive_next_valid(
        &self,
        index: u32,
        hardened: bool,
        max_attempts: u32,
    ) -> Result<(u32, Self), Error> {
        first_defined(index, max_attempts, |candidate| {
            self.derive(candidate, hardened).map_err(|err| {
                if err.is_retryable() {
                    tracing::debug!(index = candidate, hardened, %err, "child key is not defined, trying next index");
                }
                err
            })
        })
    }
}

/// Calls `attempt` on `index`, `index + 1`, ... until it succeeds or fails with a
/// non-retryable error, at most `max_attempts` times (and at least once)
fn first_defined<T>(
    index: u32,
    max_attempts: u32,
    mut attempt: impl FnMut(u32) -> Result<T, Error>,
) -> Result<(u32, T), Error> {
    let mut last_err = Error::IndexOutOfRange(index);
    for candidate in (index..H).take(max_attempts.max(1) as usize) {
        match attempt(candidate) {
            Ok(value) => return Ok((candidate, value)),
            Err(err) if err.is_retryable() => last_err = err,
            Err(err) => return Err(err),
        }
    }
    Err(last_err)
}

impl fmt::Debug for ExtendedKeyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedKeyNode")
            .field("depth", &self.inner.depth)
            .field("child_index", &self.inner.child_index)
            .field("curve", &self.curve())
            .field("public_key", &self.inner.public_key.get().map(hex::encode))
            .finish_non_exhaustive()
    }
}

fn child_depth(parent_depth: u8) -> Result<u8, Error> {
    parent_depth
        .checked_add(1)
        .filter(|depth| *depth <= MAX_DEPTH)
        .ok_or(Error::DepthExceeded { max: MAX_DEPTH })
}

/// Secret key must be in `[1, n-1]`
fn ensure_valid_secret_key(curve: CurveId, secret_key: &[u8; 32]) -> Result<(), Error> {
    let value = BigUint::from_bytes_be(secret_key);
    if value.is_zero() || value >= curve.group_order() {
        return Err(Error::InvalidSecretKey);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> ExtendedKeyNode {
        let mut seed = [0u8; SEED_LEN];
        seed[31] = 1;
        seed[32..].copy_from_slice(&[0x5a; 32]);
        ExtendedKeyNode::from_seed(&seed)
            .unwrap()
            .with_curve(CurveId::Secp256k1)
            .unwrap()
    }

    #[test]
    fn seed_is_split_into_key_and_chain_code() {
        let mut seed = [0u8; SEED_LEN];
        seed[..32].copy_from_slice(&[1; 32]);
        seed[32..].copy_from_slice(&[2; 32]);
        let node = ExtendedKeyNode::from_seed(&seed).unwrap();
        assert_eq!(node.secret_key(), &[1; 32]);
        assert_eq!(node.chain_code(), &[2; 32]);
        assert_eq!(node.depth(), 0);
        assert_eq!(node.child_index(), None);
        assert_eq!(node.curve(), None);
        assert!(node.parent().is_none());
    }

    #[test]
    fn seed_length_is_checked() {
        for len in [0, 16, 32, 63, 65, 128] {
            assert_eq!(
                ExtendedKeyNode::from_seed(&vec![1u8; len]).map(|_| ()),
                Err(Error::InvalidSeedLength {
                    expected: 64,
                    actual: len
                })
            );
        }
    }

    #[test]
    fn unbound_node_cannot_derive() {
        let node = ExtendedKeyNode::from_seed(&[1u8; SEED_LEN]).unwrap();
        assert_eq!(node.public_key().map(|_| ()), Err(Error::CurveUnset));
        assert_eq!(node.derive(0, true).map(|_| ()), Err(Error::CurveUnset));
    }

    #[test]
    fn curve_binding_validates_secret_key() {
        let zero = ExtendedKeyNode::from_seed(&[0u8; SEED_LEN]).unwrap();
        assert_eq!(
            zero.set_curve("secp256k1").map(|_| ()),
            Err(Error::InvalidSecretKey)
        );
        let above_order = ExtendedKeyNode::from_seed(&[0xff; SEED_LEN]).unwrap();
        assert_eq!(
            above_order.with_curve(CurveId::Secp256k1).map(|_| ()),
            Err(Error::InvalidSecretKey)
        );
    }

    #[test]
    fn curve_is_bound_once() {
        let node = root();
        assert_eq!(
            node.set_curve("secp256k1").map(|_| ()),
            Err(Error::CurveAlreadyBound(CurveId::Secp256k1))
        );
        let child = node.derive(1, false).unwrap();
        assert_eq!(child.curve(), Some(CurveId::Secp256k1));
        assert_eq!(
            child.with_curve(CurveId::Secp256k1).map(|_| ()),
            Err(Error::CurveAlreadyBound(CurveId::Secp256k1))
        );
        assert_eq!(
            ExtendedKeyNode::from_seed(&[1u8; SEED_LEN])
                .unwrap()
                .set_curve("curve25519")
                .map(|_| ()),
            Err(Error::InvalidCurve("curve25519".into()))
        );
    }

    #[test]
    fn attached_node_resolves_curve_through_parent() {
        let parent = root();
        let node = ExtendedKeyNode::with_parent(&[3u8; SEED_LEN], &parent).unwrap();
        assert_eq!(node.depth(), 1);
        assert_eq!(node.curve(), Some(CurveId::Secp256k1));
        assert!(node.parent().unwrap().ptr_eq(&parent));
        assert_eq!(
            node.set_curve("k256").map(|_| ()),
            Err(Error::CurveAlreadyBound(CurveId::Secp256k1))
        );

        drop(parent);
        assert!(node.parent().is_none());
        assert_eq!(node.curve(), None);
    }

    #[test]
    fn derived_child_links_to_parent() {
        let parent = root();
        let child = parent.derive(7, true).unwrap();
        assert_eq!(child.depth(), 1);
        assert_eq!(child.child_index(), Some(ChildIndex::new(7, true).unwrap()));
        assert!(child.parent().unwrap().ptr_eq(&parent));

        drop(parent);
        assert!(child.parent().is_none());
        assert_eq!(child.curve(), Some(CurveId::Secp256k1));
    }

    #[test]
    fn index_must_fit_31_bits() {
        let node = root();
        assert_eq!(
            node.derive(H, true).map(|_| ()),
            Err(Error::IndexOutOfRange(H))
        );
        assert_eq!(
            node.derive(u32::MAX, false).map(|_| ()),
            Err(Error::IndexOutOfRange(u32::MAX))
        );
    }

    #[test]
    fn public_key_is_cached() {
        let node = root();
        let first = node.public_key().unwrap();
        let second = node.public_key().unwrap();
        assert!(core::ptr::eq(first, second));
        assert_eq!(
            first,
            &hex_literal::hex!("0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798")
        );
    }

    #[test]
    fn debug_hides_key_material() {
        let node = root();
        let debug = format!("{node:?}");
        assert!(!debug.contains(&hex::encode([0x5a; 32])));
        assert!(!debug.contains("secret"));
        assert!(!debug.contains("chain_code"));

        let public_key = hex::encode(node.public_key().unwrap());
        assert!(format!("{node:?}").contains(&public_key));
    }

    #[test]
    fn next_valid_index_is_used_directly_when_defined() {
        let node = root();
        let (index, child) = node.derive_next_valid(5, false, 3).unwrap();
        assert_eq!(index, 5);
        assert_eq!(child.secret_key(), node.derive(5, false).unwrap().secret_key());

        assert_eq!(
            node.derive_next_valid(H, false, 3).map(|_| ()),
            Err(Error::IndexOutOfRange(H))
        );
    }

    #[test]
    fn undefined_children_are_skipped() {
        let order = BigUint::from(7u8);
        let mut tried = vec![];
        let mut combine = |candidate: u32| {
            tried.push(candidate);
            step::combine_with_parent(&[candidate as u8], &[2], &order, candidate)
        };

        // (5 + 2) mod 7 is zero, index 6 gives key 1
        let (index, key) = first_defined(5, 10, &mut combine).unwrap();
        assert_eq!(index, 6);
        assert_eq!(key[31], 1);
        assert_eq!(tried, [5, 6]);
    }

    #[test]
    fn retries_are_bounded() {
        let order = BigUint::from(7u8);
        let mut tried = vec![];
        let result = first_defined(7, 3, |candidate| {
            tried.push(candidate);
            step::combine_with_parent(&[candidate as u8], &[2], &order, candidate)
        });
        assert_eq!(result.map(|_| ()), Err(Error::ChildExceedsOrder { index: 9 }));
        assert_eq!(tried, [7, 8, 9]);

        assert_eq!(
            first_defined(H - 1, 5, |i| Err::<(), _>(Error::ChildExceedsOrder { index: i })),
            Err(Error::ChildExceedsOrder { index: H - 1 })
        );
    }

    #[test]
    fn structural_errors_stop_retrying() {
        let mut tried = 0;
        let result = first_defined(0, 10, |candidate| {
            tried += 1;
            step::combine_with_parent(&[candidate as u8 + 1], &[2], &BigUint::zero(), candidate)
        });
        assert_eq!(result.map(|_| ()), Err(Error::CurveOrderInvalid));
        assert_eq!(tried, 1);
    }
}
