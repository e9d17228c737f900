//! Symmetric and asymmetric primitives underlying the blob format.
//!
//! Symmetric encryption matches NaCl `SecretBox` semantics exactly
//! (`XSalsa20Poly1305`, 24-byte nonce prepended, 16-byte tag appended). The
//! asymmetric channel composes three NaCl-equivalent primitives — anonymous
//! sealed-box, secret-box, and Ed25519 signing — rather than reaching for a
//! combined AEAD, because the wire format is frozen to this exact
//! composition for interop with the original implementation.

use crypto_box::{PublicKey, SecretKey};
use ed25519_dalek::ed25519::signature::{Signer, Verifier};
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use rand_core::{OsRng, RngCore};
use xsalsa20poly1305::aead::{Aead, KeyInit};
use xsalsa20poly1305::{Key, XSalsa20Poly1305};
use zeroize::ZeroizeOnDrop;

use crate::error::{CryptoBlobError, Result};

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 24;
const ENC_KEY_SIZE: usize = 32;
const SIGN_SECRET_SIZE: usize = 32;
const VERIFY_KEY_SIZE: usize = 32;
const SIGNATURE_SIZE: usize = 64;

/// Draws a fresh 32-byte symmetric key from a CSPRNG.
pub fn new_key() -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    key
}

/// Encrypts `plaintext` under `key`, returning `nonce ‖ ciphertext ‖ tag`.
pub fn encrypt(plaintext: &[u8], key: &[u8; KEY_SIZE]) -> Vec<u8> {
    let cipher = XSalsa20Poly1305::new(Key::from_slice(key));
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = xsalsa20poly1305::Nonce::from_slice(&nonce_bytes);
    let mut out = Vec::with_capacity(NONCE_SIZE + plaintext.len() + 16);
    out.extend_from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .expect("XSalsa20Poly1305 encryption is infallible for bounded inputs");
    out.extend_from_slice(&ciphertext);
    out
}

/// Reverses [`encrypt`]. Fails with `CryptoError` on any authentication or
/// framing failure.
pub fn decrypt(ciphertext: &[u8], key: &[u8; KEY_SIZE]) -> Result<Vec<u8>> {
    if ciphertext.len() < NONCE_SIZE {
        return Err(CryptoBlobError::CryptoError);
    }
    let (nonce_bytes, body) = ciphertext.split_at(NONCE_SIZE);
    let cipher = XSalsa20Poly1305::new(Key::from_slice(key));
    let nonce = xsalsa20poly1305::Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, body)
        .map_err(|_| CryptoBlobError::CryptoError)
}

/// Packed master-side key material: `public-encryption-key ‖ signing-secret-key`.
#[derive(ZeroizeOnDrop)]
pub struct WriterKey(pub [u8; ENC_KEY_SIZE + SIGN_SECRET_SIZE]);

/// Packed tenant-side key material: `private-encryption-key ‖ verify-key`.
#[derive(ZeroizeOnDrop)]
pub struct ReaderKey(pub [u8; ENC_KEY_SIZE + VERIFY_KEY_SIZE]);

/// Mints a fresh tenant channel: a Curve25519 keypair for the sealed-box and
/// an Ed25519 keypair for the signature, packed into the `writer_key` /
/// `reader_key` byte strings described in the format.
pub fn asymm_new_keypair() -> (WriterKey, ReaderKey) {
    let enc_secret = SecretKey::generate(&mut OsRng);
    let enc_public = enc_secret.public_key();
    let signing_key = SigningKey::generate(&mut OsRng);
    let verify_key = signing_key.verifying_key();

    let mut writer = [0u8; ENC_KEY_SIZE + SIGN_SECRET_SIZE];
    writer[..ENC_KEY_SIZE].copy_from_slice(enc_public.as_bytes());
    writer[ENC_KEY_SIZE..].copy_from_slice(&signing_key.to_bytes());

    let mut reader = [0u8; ENC_KEY_SIZE + VERIFY_KEY_SIZE];
    reader[..ENC_KEY_SIZE].copy_from_slice(enc_secret.as_bytes().as_slice());
    reader[ENC_KEY_SIZE..].copy_from_slice(verify_key.as_bytes());

    (WriterKey(writer), ReaderKey(reader))
}

/// Seals and signs `m` for the tenant holding the matching `reader_key`.
///
/// Output layout: `uint16_be(len(SK)) ‖ SK ‖ C`, where `SK` is the sealed
/// ephemeral key and `C` is `S‖m` encrypted under that ephemeral key.
pub fn asymm_encrypt(m: &[u8], writer_key: &WriterKey) -> Result<Vec<u8>> {
    let reader_public = PublicKey::from(
        <[u8; ENC_KEY_SIZE]>::try_from(&writer_key.0[..ENC_KEY_SIZE])
            .expect("fixed-size slice"),
    );
    let signing_bytes: [u8; 32] = writer_key.0[ENC_KEY_SIZE..]
        .try_into()
        .expect("fixed-size slice");
    let signing_key = SigningKey::from_bytes(&signing_bytes);

    let ephemeral_key = new_key();
    let sealed = crypto_box::seal(&mut OsRng, &reader_public, &ephemeral_key)
        .map_err(|_| CryptoBlobError::CryptoError)?;

    let signature: Signature = signing_key.sign(m);
    let mut signed_message = Vec::with_capacity(SIGNATURE_SIZE + m.len());
    signed_message.extend_from_slice(&signature.to_bytes());
    signed_message.extend_from_slice(m);

    let c = encrypt(&signed_message, &ephemeral_key);

    let mut out = Vec::with_capacity(2 + sealed.len() + c.len());
    out.extend_from_slice(&(sealed.len() as u16).to_be_bytes());
    out.extend_from_slice(&sealed);
    out.extend_from_slice(&c);
    Ok(out)
}

/// Reverses [`asymm_encrypt`] for the tenant holding `reader_key`.
pub fn asymm_decrypt(blob: &[u8], reader_key: &ReaderKey) -> Result<Vec<u8>> {
    if blob.len() < 2 {
        return Err(CryptoBlobError::CryptoError);
    }
    let sk_len = u16::from_be_bytes([blob[0], blob[1]]) as usize;
    if blob.len() < 2 + sk_len {
        return Err(CryptoBlobError::CryptoError);
    }
    let sealed = &blob[2..2 + sk_len];
    let c = &blob[2 + sk_len..];

    let private_bytes: [u8; ENC_KEY_SIZE] = reader_key.0[..ENC_KEY_SIZE]
        .try_into()
        .expect("fixed-size slice");
    let secret = SecretKey::from(private_bytes);
    let public = secret.public_key();

    let ephemeral_key_bytes =
        crypto_box::seal_open(&secret, &public, sealed).map_err(|_| CryptoBlobError::CryptoError)?;
    let ephemeral_key: [u8; KEY_SIZE] = ephemeral_key_bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoBlobError::CryptoError)?;

    let signed_message = decrypt(c, &ephemeral_key)?;
    if signed_message.len() < SIGNATURE_SIZE {
        return Err(CryptoBlobError::CryptoError);
    }
    let (sig_bytes, m) = signed_message.split_at(SIGNATURE_SIZE);
    let signature = Signature::from_bytes(sig_bytes.try_into().expect("fixed-size slice"));

    let verify_bytes: [u8; VERIFY_KEY_SIZE] = reader_key.0[ENC_KEY_SIZE..]
        .try_into()
        .expect("fixed-size slice");
    let verify_key =
        VerifyingKey::from_bytes(&verify_bytes).map_err(|_| CryptoBlobError::CryptoError)?;
    verify_key
        .verify(m, &signature)
        .map_err(|_| CryptoBlobError::CryptoError)?;

    Ok(m.to_vec())
}
