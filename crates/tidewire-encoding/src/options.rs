//! Per-channel encoding options.

use std::fmt;

use aes::{Aes128, Aes256};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::Rng;

use crate::EncodingError;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES block and IV size in bytes.
pub const IV_LEN: usize = 16;

/// Options that shape how payloads on one channel are encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelOptions {
    /// When set, payloads are encrypted before they leave the client and
    /// decrypted on arrival.
    pub cipher: Option<CipherParams>,
}

impl ChannelOptions {
    pub fn with_cipher(cipher: CipherParams) -> Self {
        Self {
            cipher: Some(cipher),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }
}

/// Key material for payload encryption.
///
/// Only AES in CBC mode with PKCS#7 padding is supported, with 128 or 256
/// bit keys. Each encryption draws a fresh random IV and prepends it to
/// the ciphertext.
#[derive(Clone, PartialEq, Eq)]
pub struct CipherParams {
    algorithm: &'static str,
    key: Vec<u8>,
    mode: &'static str,
}

impl CipherParams {
    /// Builds AES-CBC params from a raw key.
    ///
    /// # Errors
    /// [`EncodingError::InvalidKeyLength`] unless the key is 16 or 32
    /// bytes long.
    pub fn new(key: impl Into<Vec<u8>>) -> Result<Self, EncodingError> {
        let key = key.into();
        match key.len() {
            16 | 32 => Ok(Self {
                algorithm: "aes",
                key,
                mode: "cbc",
            }),
            other => Err(EncodingError::InvalidKeyLength(other * 8)),
        }
    }

    /// Builds params from a base64-encoded key, the form keys are usually
    /// shared in.
    pub fn from_base64_key(key: &str) -> Result<Self, EncodingError> {
        Self::new(BASE64_STANDARD.decode(key)?)
    }

    /// Generates params with a random key of `key_length` bits (128 or 256).
    pub fn generate(key_length: usize) -> Result<Self, EncodingError> {
        if key_length != 128 && key_length != 256 {
            return Err(EncodingError::InvalidKeyLength(key_length));
        }
        let mut key = vec![0u8; key_length / 8];
        rand::rng().fill(key.as_mut_slice());
        Self::new(key)
    }

    pub fn algorithm(&self) -> &str {
        self.algorithm
    }

    pub fn mode(&self) -> &str {
        self.mode
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Key length in bits.
    pub fn key_length(&self) -> usize {
        self.key.len() * 8
    }

    /// The encoding label this cipher writes, e.g. `cipher+aes-128-cbc`.
    pub fn label(&self) -> String {
        format!(
            "cipher+{}-{}-{}",
            self.algorithm,
            self.key_length(),
            self.mode
        )
    }

    /// Encrypts `plain` under a fresh random IV. Output is `iv ‖ ciphertext`.
    pub fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, EncodingError> {
        let iv: [u8; IV_LEN] = rand::random();
        self.encrypt_with_iv(plain, &iv)
    }

    /// Encrypts `plain` under the given IV. Output is `iv ‖ ciphertext`.
    pub fn encrypt_with_iv(
        &self,
        plain: &[u8],
        iv: &[u8; IV_LEN],
    ) -> Result<Vec<u8>, EncodingError> {
        let ciphertext = match self.key.len() {
            16 => Aes128CbcEnc::new_from_slices(&self.key, iv)
                .map_err(|_| EncodingError::InvalidKeyLength(self.key_length()))?
                .encrypt_padded_vec_mut::<Pkcs7>(plain),
            _ => Aes256CbcEnc::new_from_slices(&self.key, iv)
                .map_err(|_| EncodingError::InvalidKeyLength(self.key_length()))?
                .encrypt_padded_vec_mut::<Pkcs7>(plain),
        };

        let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
        out.extend_from_slice(iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypts `iv ‖ ciphertext` as produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, EncodingError> {
        if data.len() < IV_LEN * 2 || data.len() % IV_LEN != 0 {
            return Err(EncodingError::Decrypt(format!(
                "ciphertext length {} is not a whole number of blocks after the iv",
                data.len()
            )));
        }
        let (iv, ciphertext) = data.split_at(IV_LEN);

        let plain = match self.key.len() {
            16 => Aes128CbcDec::new_from_slices(&self.key, iv)
                .map_err(|_| EncodingError::InvalidKeyLength(self.key_length()))?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            _ => Aes256CbcDec::new_from_slices(&self.key, iv)
                .map_err(|_| EncodingError::InvalidKeyLength(self.key_length()))?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        };
        plain.map_err(|e| EncodingError::Decrypt(e.to_string()))
    }
}

impl fmt::Debug for CipherParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherParams")
            .field("algorithm", &self.algorithm)
            .field("key_length", &self.key_length())
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_reflects_key_length() {
        assert_eq!(
            CipherParams::new([7u8; 16]).unwrap().label(),
            "cipher+aes-128-cbc"
        );
        assert_eq!(
            CipherParams::new([7u8; 32]).unwrap().label(),
            "cipher+aes-256-cbc"
        );
    }

    #[test]
    fn test_rejects_other_key_lengths() {
        assert!(matches!(
            CipherParams::new([0u8; 24]),
            Err(EncodingError::InvalidKeyLength(192))
        ));
        assert!(CipherParams::generate(192).is_err());
        assert_eq!(CipherParams::generate(256).unwrap().key_length(), 256);
    }

    #[test]
    fn test_encrypt_prepends_iv_and_pads() {
        let params = CipherParams::new([1u8; 16]).unwrap();
        let iv = [9u8; IV_LEN];
        let out = params.encrypt_with_iv(b"sixteen byte msg", &iv).unwrap();
        assert_eq!(&out[..IV_LEN], &iv);
        // A full block of input gains a full block of padding.
        assert_eq!(out.len(), IV_LEN + 32);
    }

    #[test]
    fn test_encrypt_decrypt_with_both_key_sizes() {
        for key in [vec![3u8; 16], vec![4u8; 32]] {
            let params = CipherParams::new(key).unwrap();
            let sealed = params.encrypt(b"attack at dawn").unwrap();
            assert_eq!(params.decrypt(&sealed).unwrap(), b"attack at dawn");
        }
    }

    #[test]
    fn test_fresh_iv_per_encryption() {
        let params = CipherParams::new([5u8; 16]).unwrap();
        let a = params.encrypt(b"same").unwrap();
        let b = params.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails_to_decrypt_or_garbles() {
        let sealed = CipherParams::new([1u8; 16])
            .unwrap()
            .encrypt(b"secret payload")
            .unwrap();
        let other = CipherParams::new([2u8; 16]).unwrap();
        match other.decrypt(&sealed) {
            Err(EncodingError::Decrypt(_)) => {}
            Ok(plain) => assert_ne!(plain, b"secret payload"),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn test_truncated_ciphertext_is_rejected() {
        let params = CipherParams::new([1u8; 16]).unwrap();
        assert!(matches!(
            params.decrypt(&[0u8; 20]),
            Err(EncodingError::Decrypt(_))
        ));
    }

    #[test]
    fn test_debug_hides_key() {
        let params = CipherParams::new([0xAB; 16]).unwrap();
        let debug = format!("{params:?}");
        assert!(debug.contains("key_length: 128"));
        assert!(!debug.contains("171"));
    }

    #[test]
    fn test_from_base64_key() {
        let params = CipherParams::from_base64_key("AAECAwQFBgcICQoLDA0ODw==").unwrap();
        assert_eq!(params.key(), &(0u8..16).collect::<Vec<_>>()[..]);
    }
}
