//! Taproot key-path primitives: BIP32 derivation of the internal key, the
//! BIP341 tweak with even-Y correction, and BIP340 Schnorr sign/verify.

use bitcoin::bip32::{DerivationPath, Xpriv};
use bitcoin::hashes::Hash;
use bitcoin::key::Parity;
use bitcoin::secp256k1::{schnorr, Message, PublicKey, SecretKey, XOnlyPublicKey};
use bitcoin::taproot::TapTweakHash;
use bitcoin::TapSighash;
use secp256k1::{Keypair, Secp256k1};

use super::*;

/// Auxiliary randomness fed to BIP340 signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuxRandPolicy {
    /// All-zero aux data, signatures are reproducible.
    #[default]
    Zero,
    /// 32 fresh random bytes per signature.
    Fresh,
}

impl AuxRandPolicy {
    pub fn aux_bytes(&self) -> [u8; 32] {
        match self {
            AuxRandPolicy::Zero => [0u8; 32],
            AuxRandPolicy::Fresh => rand::random::<[u8; 32]>(),
        }
    }
}

impl FromStr for AuxRandPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zero" => Ok(AuxRandPolicy::Zero),
            "fresh" => Ok(AuxRandPolicy::Fresh),
            other => Err(anyhow::anyhow!("unknown aux_rand policy {other}")),
        }
    }
}

/// Internal (untweaked) key pair. Never persisted.
#[derive(Clone, Copy)]
pub struct InternalKey {
    pub secret: SecretKey,
    pub x_only: XOnlyPublicKey,
}

impl InternalKey {
    pub fn from_secret(secret: SecretKey) -> Self {
        let secp = Secp256k1::signing_only();
        let (x_only, _) = secret.x_only_public_key(&secp);
        Self { secret, x_only }
    }
}

/// Tweaked key material, recomputed per signing operation.
#[derive(Clone, Copy)]
pub struct TweakedKey {
    pub secret: SecretKey,
    pub x_only: XOnlyPublicKey,
    pub tweak: [u8; 32],
    pub parity_corrected: bool,
}

pub fn derive_internal_keypair(
    seed: &[u8],
    path: &str,
    network: Network,
) -> Result<InternalKey, SwapError> {
    let derivation = DerivationPath::from_str(path)
        .map_err(|e| SwapError::KeyDerivation(format!("malformed path {path}: {e}")))?;
    let secp = Secp256k1::new();
    let master = Xpriv::new_master(network, seed)
        .map_err(|e| SwapError::KeyDerivation(format!("bad seed: {e}")))?;
    let child = master
        .derive_priv(&secp, &derivation)
        .map_err(|e| SwapError::KeyDerivation(format!("derive {path}: {e}")))?;

    Ok(InternalKey::from_secret(child.private_key))
}

/// BIP341 `TapTweak` tagged hash over the x-only key, key-path only (no merkle root).
pub fn compute_tweak(x_only: &XOnlyPublicKey) -> [u8; 32] {
    TapTweakHash::from_key_and_tweak(*x_only, None).to_byte_array()
}

/// Adds the tweak to the secret so the result signs for the taproot output key.
///
/// The internal secret is first normalised to its even-Y form, and the tweaked
/// secret is negated again when its point lands on an odd Y.
pub fn tweak_private_key(secret: &SecretKey, tweak: &[u8; 32]) -> Result<TweakedKey, SwapError> {
    let secp = Secp256k1::signing_only();
    let mut base = *secret;
    let (_, parity) = base.x_only_public_key(&secp);
    if parity == Parity::Odd {
        base = base.negate();
    }

    let scalar = secp256k1::Scalar::from_be_bytes(*tweak).map_err(|_| {
        SwapError::CryptoInvariantViolation("tweak exceeds curve order".to_string())
    })?;
    let tweaked = base
        .add_tweak(&scalar)
        .map_err(|_| SwapError::CryptoInvariantViolation("tweaked key is zero".to_string()))?;

    let (x_only, parity) = tweaked.x_only_public_key(&secp);
    let parity_corrected = parity == Parity::Odd;
    let secret = if parity_corrected {
        tweaked.negate()
    } else {
        tweaked
    };

    Ok(TweakedKey {
        secret,
        x_only,
        tweak: *tweak,
        parity_corrected,
    })
}

pub fn schnorr_sign(
    message_hash: &[u8; 32],
    secret: &SecretKey,
    aux_randomness: &[u8; 32],
) -> schnorr::Signature {
    let secp = Secp256k1::signing_only();
    let keypair = Keypair::from_secret_key(&secp, secret);
    secp.sign_schnorr_with_aux_rand(&Message::from_digest(*message_hash), &keypair, aux_randomness)
}

pub fn schnorr_verify(
    message_hash: &[u8; 32],
    x_only: &XOnlyPublicKey,
    signature: &schnorr::Signature,
) -> bool {
    let secp = Secp256k1::verification_only();
    secp.verify_schnorr(signature, &Message::from_digest(*message_hash), x_only)
        .is_ok()
}

/// Taproot output key committed to by a P2TR script, if it is one.
pub fn output_key_from_script(script_pubkey: &Script) -> Option<XOnlyPublicKey> {
    if !script_pubkey.is_p2tr() {
        return None;
    }
    XOnlyPublicKey::from_slice(&script_pubkey.as_bytes()[2..34]).ok()
}

/// Key-path signer over the tweaked key.
pub struct TaprootSigner {
    tweaked: TweakedKey,
    aux: AuxRandPolicy,
}

impl TaprootSigner {
    pub fn new(internal: &InternalKey, aux: AuxRandPolicy) -> Result<Self, SwapError> {
        let tweak = compute_tweak(&internal.x_only);
        let tweaked = tweak_private_key(&internal.secret, &tweak)?;
        Ok(Self { tweaked, aux })
    }

    pub fn output_key(&self) -> XOnlyPublicKey {
        self.tweaked.x_only
    }

    pub fn script_pubkey(&self) -> ScriptBuf {
        ScriptBuf::new_p2tr_tweaked(bitcoin::key::TweakedPublicKey::dangerous_assume_tweaked(
            self.tweaked.x_only,
        ))
    }

    pub fn sign(&self, sighash: &TapSighash) -> schnorr::Signature {
        let digest = sighash.to_byte_array();
        schnorr_sign(&digest, &self.tweaked.secret, &self.aux.aux_bytes())
    }

    /// Full compressed public key of the tweaked secret, always 0x02-prefixed.
    pub fn public_key(&self) -> PublicKey {
        let secp = Secp256k1::signing_only();
        PublicKey::from_secret_key(&secp, &self.tweaked.secret)
    }
}

/// Derivation path that matched the asset, kept for audit logs.
pub struct SelectedKey {
    pub path: String,
    pub internal: InternalKey,
}

/// Walks the configured paths in order and returns the first one whose taproot
/// output script equals `script_pubkey`.
pub fn select_signing_key(
    seed: &[u8],
    paths: &[String],
    network: Network,
    script_pubkey: &Script,
) -> Result<SelectedKey, SwapError> {
    let secp = Secp256k1::verification_only();
    for path in paths {
        let internal = derive_internal_keypair(seed, path, network)?;
        let candidate = ScriptBuf::new_p2tr(&secp, internal.x_only, None);
        if candidate.as_script() == script_pubkey {
            info!("signing key matched derivation path {}", path);
            return Ok(SelectedKey {
                path: path.clone(),
                internal,
            });
        }
        debug!("derivation path {} does not control the asset", path);
    }

    Err(SwapError::KeyDerivation(format!(
        "none of {} configured derivation paths controls the asset",
        paths.len()
    )))
}
