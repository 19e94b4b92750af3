//! Single step of child key derivation
//!
//! Functions of this module are pure: they take the parent key material and a child
//! index and produce the child key material, without touching the tree. Retrying with
//! another index after a [retryable](crate::errors::Error::is_retryable) failure is
//! always safe.
//!
//! Private derivation computes
//! * $I = \text{HMAC-SHA512}(c_{par}, 0x00 \| k_{par} \| i)$ for hardened index $i$
//! * $I = \text{HMAC-SHA512}(c_{par}, K_{par} \| i)$ for non-hardened index $i$
//!
//! and then $k_i = (I_L + k_{par}) \bmod n$, $c_i = I_R$.

use hmac::Mac as _;
use num_bigint::BigUint;
use num_traits::Zero;
use zeroize::Zeroizing;

use crate::{
    curves::{CurveId, PublicKeyBytes},
    errors::Error,
    ChainCode, ChildIndex, HardenedIndex, HmacSha512, NonHardenedIndex,
};

/// Size of HMAC message in both hardened and non-hardened derivation
pub const HMAC_PAYLOAD_LEN: usize = 37;

/// Child key material produced by a derivation step
pub struct DerivedSecret {
    /// Child secret scalar, big-endian
    pub secret_key: Zeroizing<[u8; 32]>,
    /// Child chain code
    pub chain_code: ChainCode,
}

/// HMAC message of hardened derivation: `0x00 ∥ k_par ∥ ser32(i)`
pub fn hardened_payload(
    parent_secret_key: &[u8; 32],
    child_index: HardenedIndex,
) -> Zeroizing<[u8; HMAC_PAYLOAD_LEN]> {
    let mut payload = Zeroizing::new([0u8; HMAC_PAYLOAD_LEN]);
    payload[1..33].copy_from_slice(parent_secret_key);
    payload[33..].copy_from_slice(&child_index.to_be_bytes());
    payload
}

/// HMAC message of non-hardened derivation: `K_par ∥ ser32(i)`
pub fn non_hardened_payload(
    parent_public_key: &PublicKeyBytes,
    child_index: NonHardenedIndex,
) -> [u8; HMAC_PAYLOAD_LEN] {
    let mut payload = [0u8; HMAC_PAYLOAD_LEN];
    payload[..33].copy_from_slice(parent_public_key);
    payload[33..].copy_from_slice(&child_index.to_be_bytes());
    payload
}

/// Computes HMAC-SHA512 and splits the output into `(I_L, I_R)`
pub fn hmac_sha512(key: &[u8], message: &[u8]) -> (Zeroizing<[u8; 32]>, ChainCode) {
    let i = HmacSha512::new_from_slice(key)
        .expect("this never fails: hmac can handle keys of any size")
        .chain_update(message)
        .finalize()
        .into_bytes();
    let (i_left, i_right) = crate::split_into_two_halves(&i);
    let mut left = Zeroizing::new([0u8; 32]);
    left.copy_from_slice(i_left);
    (left, (*i_right).into())
}

/// Derives child secret key and chain code from the parent key material
///
/// `parent_public_key` must be the compressed public key of `parent_secret_key`, it's
/// only used for non-hardened children.
///
/// Returns error if the child is not defined for given index (see [`combine_with_parent`])
pub fn derive_child_secret(
    parent_secret_key: &[u8; 32],
    parent_chain_code: &ChainCode,
    parent_public_key: &PublicKeyBytes,
    curve_order: &BigUint,
    child_index: ChildIndex,
) -> Result<DerivedSecret, Error> {
    let (i_left, i_right) = match child_index {
        ChildIndex::Hardened(i) => {
            hmac_sha512(parent_chain_code, &hardened_payload(parent_secret_key, i)[..])
        }
        ChildIndex::NonHardened(i) => {
            hmac_sha512(parent_chain_code, &non_hardened_payload(parent_public_key, i))
        }
    };
    let secret_key = combine_with_parent(&i_left[..], parent_secret_key, curve_order, *child_index)?;
    Ok(DerivedSecret {
        secret_key,
        chain_code: i_right,
    })
}

/// Computes `(I_L + k_par) mod n`, left-padded to 32 bytes
///
/// Both `I_L` and `k_par` are read as unsigned big-endian integers. Errors:
/// * [`Error::KeyConversionFailed`] if either doesn't fit into 256 bits, or if the
///   result doesn't
/// * [`Error::NonPositiveKey`] if either of them, or the result, is zero
/// * [`Error::CurveOrderInvalid`] if `n` is zero
/// * [`Error::ChildExceedsOrder`] if `I_L >= n`
///
/// `index` is the effective child index, it's only used for error reporting.
pub fn combine_with_parent(
    i_left: &[u8],
    parent_secret_key: &[u8],
    curve_order: &BigUint,
    index: u32,
) -> Result<Zeroizing<[u8; 32]>, Error> {
    let shift = to_positive_int(i_left)?;
    let parent = to_positive_int(parent_secret_key)?;

    if curve_order.is_zero() {
        return Err(Error::CurveOrderInvalid);
    }
    if &shift >= curve_order {
        return Err(Error::ChildExceedsOrder { index });
    }

    let child = (shift + parent) % curve_order;
    if child.is_zero() {
        return Err(Error::NonPositiveKey);
    }
    to_scalar_bytes(&child)
}

/// Derives child public key and chain code from the parent public key
///
/// Only non-hardened children can be derived this way.
pub fn derive_child_public(
    parent_public_key: &PublicKeyBytes,
    parent_chain_code: &ChainCode,
    curve: CurveId,
    child_index: NonHardenedIndex,
) -> Result<(PublicKeyBytes, ChainCode), Error> {
    let (i_left, i_right) = hmac_sha512(
        parent_chain_code,
        &non_hardened_payload(parent_public_key, child_index),
    );
    let child_public_key = curve.add_tweak(parent_public_key, &i_left, *child_index)?;
    Ok((child_public_key, i_right))
}

fn to_positive_int(bytes: &[u8]) -> Result<BigUint, Error> {
    if bytes.len() > 32 {
        return Err(Error::KeyConversionFailed);
    }
    let value = BigUint::from_bytes_be(bytes);
    if value.is_zero() {
        return Err(Error::NonPositiveKey);
    }
    Ok(value)
}

fn to_scalar_bytes(value: &BigUint) -> Result<Zeroizing<[u8; 32]>, Error> {
    let bytes = Zeroizing::new(value.to_bytes_be());
    if bytes.len() > 32 {
        return Err(Error::KeyConversionFailed);
    }
    let mut scalar = Zeroizing::new([0u8; 32]);
    scalar[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(scalar)
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;
    use crate::H;

    fn int(n: u8) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        bytes[31] = n;
        bytes
    }

    #[test]
    fn payload_layout() {
        let secret = [0xaa; 32];
        let payload = hardened_payload(&secret, HardenedIndex::from_offset(1).unwrap());
        assert_eq!(payload[0], 0);
        assert_eq!(&payload[1..33], &secret);
        assert_eq!(&payload[33..], &[0x80, 0, 0, 1]);

        let public = [0x02; 33];
        let payload = non_hardened_payload(&public, NonHardenedIndex::try_from(258).unwrap());
        assert_eq!(&payload[..33], &public);
        assert_eq!(&payload[33..], &[0, 0, 1, 2]);
    }

    #[test]
    fn hmac_sha512_rfc4231_case_2() {
        let (i_left, i_right) = hmac_sha512(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            *i_left,
            hex!("164b7a7bfcf819e2e395fbe73b56e0a387bd64222e831fd610270cd7ea250554")
        );
        assert_eq!(
            i_right,
            hex!("9758bf75c05a994a6d034f65f8f0e6fdcaeab1a34d4a6b4b636e070a38bce737")
        );
    }

    #[test]
    fn combine_adds_modulo_order() {
        let order = BigUint::from(11u32);
        assert_eq!(*combine_with_parent(&int(3), &int(4), &order, 0).unwrap(), int(7));
        assert_eq!(*combine_with_parent(&int(9), &int(5), &order, 0).unwrap(), int(3));
        // short inputs are read as big-endian integers too
        assert_eq!(*combine_with_parent(&[9], &[5], &order, 0).unwrap(), int(3));
    }

    #[test]
    fn combine_rejects_shift_above_order() {
        let order = BigUint::from(11u32);
        assert_eq!(
            combine_with_parent(&int(11), &int(1), &order, H + 4).map(|_| ()),
            Err(Error::ChildExceedsOrder { index: H + 4 })
        );
        assert_eq!(
            combine_with_parent(&int(200), &int(1), &order, 0).map(|_| ()),
            Err(Error::ChildExceedsOrder { index: 0 })
        );
    }

    #[test]
    fn combine_rejects_zero_keys() {
        let order = BigUint::from(11u32);
        for (shift, parent) in [(int(0), int(1)), (int(1), int(0))] {
            let err = combine_with_parent(&shift, &parent, &order, 0).map(|_| ()).unwrap_err();
            assert_eq!(err, Error::NonPositiveKey);
            assert!(err.is_retryable());
        }
        // shift + parent = n
        assert_eq!(
            combine_with_parent(&int(4), &int(7), &order, 0).map(|_| ()),
            Err(Error::NonPositiveKey)
        );
    }

    #[test]
    fn combine_rejects_zero_order() {
        let err = combine_with_parent(&int(1), &int(1), &BigUint::zero(), 0)
            .map(|_| ())
            .unwrap_err();
        assert_eq!(err, Error::CurveOrderInvalid);
        assert!(!err.is_retryable());
    }

    #[test]
    fn combine_rejects_oversized_integers() {
        let order = BigUint::from(11u32);
        assert_eq!(
            combine_with_parent(&[1u8; 33], &int(1), &order, 0).map(|_| ()),
            Err(Error::KeyConversionFailed)
        );

        // order wider than 256 bits lets the sum overflow a scalar
        let huge_order = BigUint::from(1u8) << 300usize;
        assert_eq!(
            combine_with_parent(&[0xff; 32], &[0xff; 32], &huge_order, 0).map(|_| ()),
            Err(Error::KeyConversionFailed)
        );
    }

    #[test]
    fn hardened_and_normal_children_differ() {
        let curve = CurveId::Secp256k1;
        let secret = int(1);
        let public = curve.compressed_public_key(&secret).unwrap();
        let chain_code = [0x42; 32];
        let order = curve.group_order();

        let hardened =
            derive_child_secret(&secret, &chain_code, &public, &order, ChildIndex::new(3, true).unwrap())
                .unwrap();
        let normal =
            derive_child_secret(&secret, &chain_code, &public, &order, ChildIndex::new(3, false).unwrap())
                .unwrap();
        assert_ne!(*hardened.secret_key, *normal.secret_key);
        assert_ne!(hardened.chain_code, normal.chain_code);
    }

    #[test]
    fn public_step_matches_secret_step() {
        for curve in CurveId::supported() {
            let secret = int(77);
            let public = curve.compressed_public_key(&secret).unwrap();
            let chain_code = [0x17; 32];
            let index = NonHardenedIndex::try_from(12).unwrap();

            let child =
                derive_child_secret(&secret, &chain_code, &public, &curve.group_order(), index.into())
                    .unwrap();
            let (child_public, child_chain_code) =
                derive_child_public(&public, &chain_code, curve, index).unwrap();

            assert_eq!(child_chain_code, child.chain_code);
            assert_eq!(
                child_public,
                curve.compressed_public_key(&child.secret_key).unwrap()
            );
        }
    }
}
