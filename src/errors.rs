//! When something goes wrong
//!
//! Every fallible operation of the crate returns [`Error`]. Failures fall into three
//! classes (see [`ErrorKind`]):
//!
//! * structural errors are caused by the inputs (seed, path, curve, depth) and only
//!   go away when the caller changes them
//! * retryable errors depend on the child index. BIP32 leaves the child key undefined
//!   for such an index, the documented recovery is to try the next one. They occur
//!   with negligible probability on real curves.
//! * fatal errors indicate a broken curve binding and must never be retried

use crate::curves::CurveId;

/// Class of an [`Error`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caused by the inputs, fixable only by changing them
    Structural,
    /// Child key is undefined for this index, try `index + 1`
    Retryable,
    /// Broken curve binding
    Fatal,
}

/// Error of key tree construction and derivation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Seed is not exactly 64 bytes long
    #[error("invalid seed length: expected {expected} bytes, got {actual}")]
    InvalidSeedLength {
        /// Required length
        expected: usize,
        /// Length that was provided
        actual: usize,
    },
    /// Master key entropy is not 16-64 bytes long
    #[error("invalid entropy length: expected 16 to 64 bytes, got {0}")]
    InvalidEntropyLength(usize),
    /// Child would be deeper than the tree allows
    #[error("derivation depth exceeds the maximum of {max}")]
    DepthExceeded {
        /// Maximum depth of the tree
        max: u8,
    },
    /// Derivation path doesn't follow `m(/index['])*`
    #[error("malformed derivation path `{path}`: {reason}")]
    MalformedPath {
        /// The path as provided by the caller
        path: String,
        /// What is wrong with it
        reason: &'static str,
    },
    /// Curve identifier is not in the supported curves table
    #[error("unsupported elliptic curve `{0}`")]
    InvalidCurve(String),
    /// Curve is already fixed for this node, either on the node itself or through an ancestor
    #[error("curve is already bound to {0}")]
    CurveAlreadyBound(CurveId),
    /// No curve is bound to the node nor to any of its ancestors
    #[error("no elliptic curve is bound to the key")]
    CurveUnset,
    /// Child index doesn't fit into 31 bits
    #[error("child index {0} is out of range, must be less than 2^31")]
    IndexOutOfRange(u32),
    /// Hardened child requested from a public key
    #[error("hardened child {0} cannot be derived from a public key")]
    HardenedFromPublic(u32),
    /// Secret scalar is outside of `[1, n-1]`
    #[error("secret key is not a valid scalar of the curve")]
    InvalidSecretKey,
    /// Bytes do not encode a point on the curve
    #[error("public key is not a valid point of the curve")]
    InvalidPublicKey,
    /// `I_L` is not less than the group order
    #[error("child key material exceeds the curve order at index {index}")]
    ChildExceedsOrder {
        /// Effective index (hardened offset included)
        index: u32,
    },
    /// Key material cannot be read as a 256-bit integer
    #[error("key material cannot be converted to a 256-bit integer")]
    KeyConversionFailed,
    /// Key material or the derived scalar is zero
    #[error("key material must be a positive integer")]
    NonPositiveKey,
    /// Derived public key is the point at infinity
    #[error("child public key is the point at infinity at index {index}")]
    ChildAtInfinity {
        /// Effective index (hardened offset included)
        index: u32,
    },
    /// Curve group order is zero
    #[error("curve group order is not positive")]
    CurveOrderInvalid,
}

impl Error {
    /// Class of the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ChildExceedsOrder { .. }
            | Self::KeyConversionFailed
            | Self::NonPositiveKey
            | Self::ChildAtInfinity { .. } => ErrorKind::Retryable,
            Self::CurveOrderInvalid => ErrorKind::Fatal,
            Self::InvalidSeedLength { .. }
            | Self::InvalidEntropyLength(_)
            | Self::DepthExceeded { .. }
            | Self::MalformedPath { .. }
            | Self::InvalidCurve(_)
            | Self::CurveAlreadyBound(_)
            | Self::CurveUnset
            | Self::IndexOutOfRange(_)
            | Self::HardenedFromPublic(_)
            | Self::InvalidSecretKey
            | Self::InvalidPublicKey => ErrorKind::Structural,
        }
    }

    /// Retry hint: derivation may succeed with the next child index
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }

    pub(crate) fn malformed_path(path: &str, reason: &'static str) -> Self {
        Self::MalformedPath {
            path: path.to_owned(),
            reason,
        }
    }
}

/// Value was out of range
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("out of range")]
pub struct OutOfRange;

/// Error returned by parsing child index
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid child index: {reason}")]
pub struct ParseChildIndexError {
    pub(crate) reason: &'static str,
}
