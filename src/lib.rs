//! BIP32: Hierarchical deterministic key tree
//!
//! [BIP32][bip32-spec] derives a tree of secret keys from a single seed. Every node of the
//! tree is an extended key (a secret scalar plus a chain code) and every child is computed
//! from its parent and a 32-bit index with HMAC-SHA512 and modular addition over the
//! curve group order. Hardened children (index $\ge 2^{31}$) are derived from the parent
//! secret key, non-hardened ones from the parent public key, which also makes them
//! derivable from [public data alone](ExtendedPublicKey).
//!
//! The tree is persistent: derivation never mutates a node, it always creates a new one.
//! Children keep a non-owning link to their parent. Tree depth is limited to
//! [`MAX_DEPTH`].
//!
//! Elliptic curve arithmetic is provided by [generic-ec](generic_ec), big-number arithmetic
//! by [num-bigint](num_bigint).
//!
//! ### Curves support
//! secp256k1 is always supported. secp256r1 is supported when `curve-secp256r1` feature
//! is enabled (it is by default). For secp256r1, master key generation follows
//! [SLIP10][slip10-spec].
//!
//! ### Features
//! * `curve-secp256r1` adds secp256r1 to the [supported curves](CurveId)
//! * `serde` implements serialization for child indexes, derivation paths and curve ids
//!
//! ### Examples
//!
//! Derive a master key from the seed, and then derive a child key m/1<sub>H</sub>/10:
//! ```rust
//! use hd_keytree::CurveId;
//!
//! let entropy = b"16-64 bytes of high entropy".as_slice();
//! let master_key = hd_keytree::derive_master_key(CurveId::Secp256k1, entropy)?;
//!
//! let child_key = master_key.derive_by_path("m/1'/10")?;
//! assert_eq!(child_key.depth(), 2);
//! # Ok::<(), hd_keytree::errors::Error>(())
//! ```
//!
//! A tree can also be grown from 64 bytes of key material directly, the first half being
//! the secret key and the second half the chain code:
//! ```rust
//! use hd_keytree::ExtendedKeyNode;
//!
//! # let seed = [7u8; 64];
//! let root = ExtendedKeyNode::from_seed(&seed)?.set_curve("secp256k1")?;
//! let child = root.derive(0, true)?.derive(1, false)?;
//! assert_eq!(child.public_key()?.len(), 33);
//! # Ok::<(), hd_keytree::errors::Error>(())
//! ```
//!
//! [bip32-spec]: https://github.com/bitcoin/bips/blob/master/bip-0032.mediawiki
//! [slip10-spec]: https://github.com/satoshilabs/slips/blob/master/slip-0010.md

#![forbid(missing_docs, unsafe_code)]

use core::{fmt, ops};

use generic_array::{
    typenum::{U32, U64},
    GenericArray,
};

pub mod curves;
pub mod errors;
mod master;
mod node;
mod path;
mod public;
pub mod step;

pub use curves::{CurveId, PublicKeyBytes};
pub use master::derive_master_key;
pub use node::{ExtendedKeyNode, MAX_DEPTH, SEED_LEN};
pub use path::DerivationPath;
pub use public::ExtendedPublicKey;

type HmacSha512 = hmac::Hmac<sha2::Sha512>;

/// Beginning of hardened child indexes
///
/// $H = 2^{31}$ defines the range of hardened indexes. All indexes $i$ such that $H \le i$ are hardened.
///
/// ## Example
/// Derive a child key with a path m/1<sub>H</sub>
/// ```rust
/// use hd_keytree::CurveId;
///
/// # let entropy = b"do not use this seed in prod :)".as_slice();
/// let master_key = hd_keytree::derive_master_key(CurveId::Secp256k1, entropy)?;
///
/// let hardened_child = master_key.derive_child(1 + hd_keytree::H)?;
/// assert_eq!(hardened_child.derive_child(1u32)?.depth(), 2);
/// #
/// # Ok::<(), hd_keytree::errors::Error>(())
/// ```
pub const H: u32 = 1 << 31;

/// Child index, whether hardened or not
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize), serde(into = "u32"))]
#[cfg_attr(feature = "serde", derive(serde::Deserialize), serde(from = "u32"))]
pub enum ChildIndex {
    /// Hardened index
    Hardened(HardenedIndex),
    /// Non-hardened index
    NonHardened(NonHardenedIndex),
}

/// Child index in range $2^{31} \le i < 2^{32}$ corresponding to a hardened wallet
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize), serde(into = "u32"))]
#[cfg_attr(feature = "serde", derive(serde::Deserialize), serde(try_from = "u32"))]
pub struct HardenedIndex(u32);

/// Child index in range $0 \le i < 2^{31}$ corresponding to a non-hardened wallet
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize), serde(into = "u32"))]
#[cfg_attr(feature = "serde", derive(serde::Deserialize), serde(try_from = "u32"))]
pub struct NonHardenedIndex(u32);

/// Chain code of extended key as defined in BIP32
pub type ChainCode = [u8; 32];

impl HardenedIndex {
    /// The smallest possible value of hardened index. Equals to $2^{31}$
    pub const MIN: Self = Self(H);
    /// The largest possible value of hardened index. Equals to $2^{32} - 1$
    pub const MAX: Self = Self(u32::MAX);

    /// Hardened index for the `index`-th hardened child, i.e. $H + index$
    ///
    /// Returns error if `index` $\ge 2^{31}$
    pub fn from_offset(index: u32) -> Result<Self, errors::OutOfRange> {
        if index < H {
            Ok(Self(index + H))
        } else {
            Err(errors::OutOfRange)
        }
    }

    /// Index without the hardened offset, i.e. $i - H$
    pub fn offset(self) -> u32 {
        self.0 - H
    }
}
impl NonHardenedIndex {
    /// The smallest possible value of non-hardened index. Equals to $0$
    pub const MIN: Self = Self(0);
    /// The largest possible value of non-hardened index. Equals to $2^{31} - 1$
    pub const MAX: Self = Self(H - 1);
}
impl ChildIndex {
    /// Builds an index from its position among the siblings and the hardened flag
    ///
    /// Returns error if `index` $\ge 2^{31}$
    pub fn new(index: u32, hardened: bool) -> Result<Self, errors::OutOfRange> {
        if hardened {
            HardenedIndex::from_offset(index).map(Self::Hardened)
        } else {
            NonHardenedIndex::try_from(index).map(Self::NonHardened)
        }
    }

    /// Whether the index is hardened
    pub fn is_hardened(self) -> bool {
        matches!(self, Self::Hardened(_))
    }
}
impl ops::Deref for HardenedIndex {
    type Target = u32;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl ops::Deref for NonHardenedIndex {
    type Target = u32;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl ops::Deref for ChildIndex {
    type Target = u32;
    fn deref(&self) -> &Self::Target {
        match self {
            Self::Hardened(i) => i,
            Self::NonHardened(i) => i,
        }
    }
}
impl From<u32> for ChildIndex {
    fn from(value: u32) -> Self {
        match value {
            H.. => Self::Hardened(HardenedIndex(value)),
            _ => Self::NonHardened(NonHardenedIndex(value)),
        }
    }
}
impl From<HardenedIndex> for ChildIndex {
    fn from(value: HardenedIndex) -> Self {
        Self::Hardened(value)
    }
}
impl From<NonHardenedIndex> for ChildIndex {
    fn from(value: NonHardenedIndex) -> Self {
        Self::NonHardened(value)
    }
}
impl TryFrom<u32> for HardenedIndex {
    type Error = errors::OutOfRange;
    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match ChildIndex::from(value) {
            ChildIndex::Hardened(v) => Ok(v),
            _ => Err(errors::OutOfRange),
        }
    }
}
impl TryFrom<u32> for NonHardenedIndex {
    type Error = errors::OutOfRange;
    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match ChildIndex::from(value) {
            ChildIndex::NonHardened(v) => Ok(v),
            _ => Err(errors::OutOfRange),
        }
    }
}
impl From<ChildIndex> for u32 {
    fn from(value: ChildIndex) -> Self {
        match value {
            ChildIndex::Hardened(v) => v.0,
            ChildIndex::NonHardened(v) => v.0,
        }
    }
}
impl From<HardenedIndex> for u32 {
    fn from(value: HardenedIndex) -> Self {
        value.0
    }
}
impl From<NonHardenedIndex> for u32 {
    fn from(value: NonHardenedIndex) -> Self {
        value.0
    }
}
/// Parses the index the way it appears in a derivation path: `7` or `7'`
impl core::str::FromStr for ChildIndex {
    type Err = errors::ParseChildIndexError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        path::parse_segment(s).map_err(|reason| errors::ParseChildIndexError { reason })
    }
}

/// Formats the index the way it appears in a derivation path: `7` or `7'`
impl fmt::Display for ChildIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hardened(i) => write!(f, "{}'", i.offset()),
            Self::NonHardened(i) => write!(f, "{}", i.0),
        }
    }
}

/// Splits array `I` of 64 bytes into two arrays `I_L = I[..32]` and `I_R = I[32..]`
fn split_into_two_halves(
    i: &GenericArray<u8, U64>,
) -> (&GenericArray<u8, U32>, &GenericArray<u8, U32>) {
    generic_array::sequence::Split::split(i)
}
