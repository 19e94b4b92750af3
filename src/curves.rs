//! Supported elliptic curves
//!
//! The key tree doesn't implement any curve arithmetic itself. Everything it needs from
//! a curve is collected here: the group order, the compressed public key of a secret
//! scalar, and the tweak `K + t·G` used by public derivation. Arithmetic is provided by
//! [generic-ec](generic_ec).
//!
//! Curves are kept in a static read-only table. secp256k1 is always available,
//! secp256r1 requires `curve-secp256r1` feature (enabled by default).

use core::fmt;

use generic_ec::{Curve, Point, Scalar, SecretScalar};
use hex_literal::hex;
use num_bigint::BigUint;

use crate::errors::Error;

/// Size of a compressed SEC1 public key in bytes
pub const PUBLIC_KEY_LEN: usize = 33;

/// Compressed SEC1 public key
pub type PublicKeyBytes = [u8; PUBLIC_KEY_LEN];

/// Identifier of a supported elliptic curve
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum CurveId {
    /// secp256k1, used by BIP32
    Secp256k1,
    /// secp256r1 aka NIST P-256
    #[cfg(feature = "curve-secp256r1")]
    Secp256r1,
}

/// Parameters of a curve in the table
struct CurveParams {
    id: CurveId,
    /// Canonical name followed by accepted aliases
    names: &'static [&'static str],
    /// Group order, big-endian
    order: [u8; 32],
    /// HMAC key of master key generation
    master_tag: &'static [u8],
}

static SECP256K1: CurveParams = CurveParams {
    id: CurveId::Secp256k1,
    names: &["secp256k1", "k256"],
    order: hex!("fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141"),
    master_tag: b"Bitcoin seed",
};

#[cfg(feature = "curve-secp256r1")]
static SECP256R1: CurveParams = CurveParams {
    id: CurveId::Secp256r1,
    names: &["secp256r1", "p256", "nist256p1", "prime256v1"],
    order: hex!("ffffffff00000000ffffffffffffffffbce6faada7179e84f3b9cac2fc632551"),
    master_tag: b"Nist256p1 seed",
};

static SUPPORTED_CURVES: &[&CurveParams] = &[
    &SECP256K1,
    #[cfg(feature = "curve-secp256r1")]
    &SECP256R1,
];

impl CurveId {
    fn params(self) -> &'static CurveParams {
        match self {
            Self::Secp256k1 => &SECP256K1,
            #[cfg(feature = "curve-secp256r1")]
            Self::Secp256r1 => &SECP256R1,
        }
    }

    /// Lists all curves enabled in this build
    pub fn supported() -> impl Iterator<Item = CurveId> {
        SUPPORTED_CURVES.iter().map(|params| params.id)
    }

    /// Canonical name of the curve
    pub fn name(self) -> &'static str {
        self.params().names[0]
    }

    /// Order $n$ of the curve group
    pub fn group_order(self) -> BigUint {
        BigUint::from_bytes_be(&self.params().order)
    }

    /// HMAC key used to derive a master key from entropy
    ///
    /// `"Bitcoin seed"` for secp256k1 as defined in BIP32, `"Nist256p1 seed"` for
    /// secp256r1 as defined in SLIP10.
    pub fn master_key_tag(self) -> &'static [u8] {
        self.params().master_tag
    }

    /// Computes compressed public key `k·G` of the secret scalar `k`
    ///
    /// Returns [`Error::InvalidSecretKey`] if `k` is not in `[1, n-1]`
    pub fn compressed_public_key(self, secret_key: &[u8; 32]) -> Result<PublicKeyBytes, Error> {
        match self {
            Self::Secp256k1 => {
                compressed_public_key::<generic_ec::curves::Secp256k1>(secret_key)
            }
            #[cfg(feature = "curve-secp256r1")]
            Self::Secp256r1 => {
                compressed_public_key::<generic_ec::curves::Secp256r1>(secret_key)
            }
        }
    }

    /// Computes `K + t·G` for a compressed point `K` and a tweak `t`
    ///
    /// `index` is only used to report retryable failures
    pub(crate) fn add_tweak(
        self,
        public_key: &PublicKeyBytes,
        tweak: &[u8; 32],
        index: u32,
    ) -> Result<PublicKeyBytes, Error> {
        match self {
            Self::Secp256k1 => {
                add_tweak::<generic_ec::curves::Secp256k1>(public_key, tweak, index)
            }
            #[cfg(feature = "curve-secp256r1")]
            Self::Secp256r1 => {
                add_tweak::<generic_ec::curves::Secp256r1>(public_key, tweak, index)
            }
        }
    }
}

impl fmt::Display for CurveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl core::str::FromStr for CurveId {
    type Err = Error;

    /// Looks the curve up by its name or alias, case-insensitive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        SUPPORTED_CURVES
            .iter()
            .find(|params| {
                params
                    .names
                    .iter()
                    .any(|name| name.eq_ignore_ascii_case(wanted))
            })
            .map(|params| params.id)
            .ok_or_else(|| Error::InvalidCurve(s.to_owned()))
    }
}

fn compressed_public_key<E: Curve>(secret_key: &[u8; 32]) -> Result<PublicKeyBytes, Error> {
    let mut scalar = Scalar::<E>::from_be_bytes(secret_key).map_err(|_| Error::InvalidSecretKey)?;
    if bool::from(subtle::ConstantTimeEq::ct_eq(&scalar, &Scalar::zero())) {
        return Err(Error::InvalidSecretKey);
    }
    let secret_scalar = SecretScalar::new(&mut scalar);
    let public_key = Point::generator() * &secret_scalar;
    encode_point(&public_key)
}

fn add_tweak<E: Curve>(
    public_key: &PublicKeyBytes,
    tweak: &[u8; 32],
    index: u32,
) -> Result<PublicKeyBytes, Error> {
    let parent = Point::<E>::from_bytes(public_key).map_err(|_| Error::InvalidPublicKey)?;
    if parent.is_zero() {
        return Err(Error::InvalidPublicKey);
    }
    let tweak = Scalar::<E>::from_be_bytes(tweak).map_err(|_| Error::ChildExceedsOrder { index })?;
    let child = parent + Point::generator() * tweak;
    if child.is_zero() {
        return Err(Error::ChildAtInfinity { index });
    }
    encode_point(&child)
}

fn encode_point<E: Curve>(point: &Point<E>) -> Result<PublicKeyBytes, Error> {
    let encoded = point.to_bytes(true);
    PublicKeyBytes::try_from(&encoded[..]).map_err(|_| Error::InvalidPublicKey)
}
