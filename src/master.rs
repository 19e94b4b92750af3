//! Master key generation
//!
//! Master key is derived from the entropy as $I = \text{HMAC-SHA512}(tag, entropy)$ where
//! the tag depends on the curve (see [`CurveId::master_key_tag`]). $I$ is exactly the
//! 64 bytes seed accepted by [`ExtendedKeyNode::from_seed`]: $I_L$ is the secret key and
//! $I_R$ is the chain code.
//!
//! If $I_L$ is zero or not less than the group order, [SLIP10][slip10-spec] prescribes to
//! recompute $I = \text{HMAC-SHA512}(tag, I)$ until it's valid. BIP32 declares such a master
//! key invalid instead. For secp256k1 both rules agree except with negligible probability.
//!
//! [slip10-spec]: https://github.com/satoshilabs/slips/blob/master/slip-0010.md

use num_bigint::BigUint;
use num_traits::Zero;
use zeroize::Zeroizing;

use crate::{curves::CurveId, errors::Error, node::ExtendedKeyNode, step, SEED_LEN};

/// Derives a master key bound to `curve` from the entropy
///
/// Entropy must be 16-64 bytes long, otherwise [`Error::InvalidEntropyLength`] is returned
pub fn derive_master_key(curve: CurveId, entropy: &[u8]) -> Result<ExtendedKeyNode, Error> {
    if !(16..=64).contains(&entropy.len()) {
        return Err(Error::InvalidEntropyLength(entropy.len()));
    }

    let tag = curve.master_key_tag();
    let order = curve.group_order();
    let (mut i_left, mut i_right) = step::hmac_sha512(tag, entropy);

    loop {
        let candidate = BigUint::from_bytes_be(&i_left[..]);
        if !candidate.is_zero() && candidate < order {
            break;
        }
        tracing::debug!(%curve, "master secret key is out of range, rehashing");

        let mut i = Zeroizing::new([0u8; SEED_LEN]);
        i[..32].copy_from_slice(&i_left[..]);
        i[32..].copy_from_slice(&i_right);
        (i_left, i_right) = step::hmac_sha512(tag, &i[..]);
    }

    let mut seed = Zeroizing::new([0u8; SEED_LEN]);
    seed[..32].copy_from_slice(&i_left[..]);
    seed[32..].copy_from_slice(&i_right);
    ExtendedKeyNode::from_seed(&seed[..])?.with_curve(curve)
}
