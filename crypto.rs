//! Streaming AES-256-CBC encryption and decryption.
//!
//! This is the cipher used for every encrypted file inside an archive:
//! the `.scconfig` metadata file as well as text and vector assets.
//!
//! ## Format
//!
//! ```text
//! [block1][block2]...[blockN]
//! ```
//!
//! Raw CBC ciphertext with PKCS#7 padding and no header. The IV is not
//! stored in the file; it lives in the secret store next to the key.
//!
//! Input is read in 64KB chunks and only whole 16-byte blocks are handed to
//! the cipher, so memory use stays bounded regardless of file size.

use crate::error::{CryptoError, Result, ScribbleError};
use aes::Aes256;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zeroize::Zeroizing;

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;
/// AES-256 key size in bytes
pub const KEY_SIZE: usize = 32;
/// CBC initialization vector size in bytes
pub const IV_SIZE: usize = 16;

/// Read size for streaming; a multiple of `BLOCK_SIZE`
const CHUNK_SIZE: usize = 64 * 1024;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

fn check_material(key: &[u8], iv: &[u8]) -> std::result::Result<(), CryptoError> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyMaterial {
            what: "key",
            expected: KEY_SIZE,
            found: key.len(),
        });
    }
    if iv.len() != IV_SIZE {
        return Err(CryptoError::InvalidKeyMaterial {
            what: "iv",
            expected: IV_SIZE,
            found: iv.len(),
        });
    }
    Ok(())
}

/// Ciphertext length for a plaintext of `len` bytes.
/// Always at least one byte of padding, so aligned input grows by a full block.
pub fn padded_len(len: u64) -> u64 {
    (len / BLOCK_SIZE as u64 + 1) * BLOCK_SIZE as u64
}

/// Encrypts everything from `reader` into `writer`.
/// Returns the number of plaintext bytes consumed.
pub async fn encrypt_stream<R, W>(reader: &mut R, writer: &mut W, key: &[u8], iv: &[u8]) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    check_material(key, iv)?;
    let mut cipher = Aes256CbcEnc::new_from_slices(key, iv)
        .map_err(|e| CryptoError::CipherInitFailed(e.to_string()))?;

    let mut buffer = Zeroizing::new(vec![0u8; CHUNK_SIZE]);
    let mut pending = Zeroizing::new(Vec::with_capacity(CHUNK_SIZE + BLOCK_SIZE));
    let mut total_bytes = 0u64;

    loop {
        let n = reader
            .read(&mut buffer[..])
            .await
            .map_err(|e| ScribbleError::encryption(format!("reading plaintext: {e}")))?;
        if n == 0 {
            break;
        }
        total_bytes += n as u64;
        pending.extend_from_slice(&buffer[..n]);

        let whole = pending.len() - pending.len() % BLOCK_SIZE;
        if whole == 0 {
            continue;
        }
        for block in pending[..whole].chunks_exact_mut(BLOCK_SIZE) {
            cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        writer
            .write_all(&pending[..whole])
            .await
            .map_err(|e| ScribbleError::encryption(format!("writing ciphertext: {e}")))?;
        pending.drain(..whole);
    }

    // PKCS#7: 1..=16 bytes, each holding the pad length
    let pad = BLOCK_SIZE - pending.len();
    pending.resize(BLOCK_SIZE, pad as u8);
    cipher.encrypt_block_mut(GenericArray::from_mut_slice(&mut pending[..]));
    writer
        .write_all(&pending[..])
        .await
        .map_err(|e| ScribbleError::encryption(format!("writing ciphertext: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| ScribbleError::encryption(format!("flushing ciphertext: {e}")))?;

    Ok(total_bytes)
}

/// Decrypts everything from `reader` into `writer`, stripping the padding.
/// Returns the number of plaintext bytes written.
///
/// On error some plaintext may already have been written; the caller owns
/// the output and must discard it.
pub async fn decrypt_stream<R, W>(reader: &mut R, writer: &mut W, key: &[u8], iv: &[u8]) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    check_material(key, iv)?;
    let mut cipher = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|e| CryptoError::CipherInitFailed(e.to_string()))?;

    let mut buffer = vec![0u8; CHUNK_SIZE];
    // Blocks are decrypted in place here, so it holds plaintext too.
    let mut pending = Zeroizing::new(Vec::with_capacity(CHUNK_SIZE + BLOCK_SIZE));
    // Decrypted bytes not yet written. The last block is held back until EOF
    // because it carries the padding.
    let mut tail = Zeroizing::new(Vec::with_capacity(CHUNK_SIZE + BLOCK_SIZE));
    let mut total_bytes = 0u64;

    loop {
        let n = reader
            .read(&mut buffer)
            .await
            .map_err(|e| ScribbleError::decryption(format!("reading ciphertext: {e}")))?;
        if n == 0 {
            break;
        }
        pending.extend_from_slice(&buffer[..n]);

        let whole = pending.len() - pending.len() % BLOCK_SIZE;
        if whole == 0 {
            continue;
        }
        for block in pending[..whole].chunks_exact_mut(BLOCK_SIZE) {
            cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        tail.extend_from_slice(&pending[..whole]);
        pending.drain(..whole);

        let release = tail.len() - BLOCK_SIZE;
        if release > 0 {
            writer
                .write_all(&tail[..release])
                .await
                .map_err(|e| ScribbleError::decryption(format!("writing plaintext: {e}")))?;
            tail.drain(..release);
            total_bytes += release as u64;
        }
    }

    if !pending.is_empty() {
        return Err(ScribbleError::decryption(
            "ciphertext length is not a multiple of the block size",
        ));
    }
    if tail.len() != BLOCK_SIZE {
        return Err(ScribbleError::decryption("ciphertext is empty"));
    }

    let pad = tail[BLOCK_SIZE - 1] as usize;
    if pad == 0 || pad > BLOCK_SIZE || tail[BLOCK_SIZE - pad..].iter().any(|&b| b as usize != pad) {
        return Err(ScribbleError::decryption("invalid padding"));
    }

    let keep = BLOCK_SIZE - pad;
    writer
        .write_all(&tail[..keep])
        .await
        .map_err(|e| ScribbleError::decryption(format!("writing plaintext: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| ScribbleError::decryption(format!("flushing plaintext: {e}")))?;
    total_bytes += keep as u64;

    Ok(total_bytes)
}

/// Buffer-mode encryption for small payloads.
pub async fn encrypt_bytes(plaintext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    let mut reader = plaintext;
    let mut out = Vec::with_capacity(padded_len(plaintext.len() as u64) as usize);
    encrypt_stream(&mut reader, &mut out, key, iv).await?;
    Ok(out)
}

/// Buffer-mode decryption for small payloads.
pub async fn decrypt_bytes(ciphertext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    let mut reader = ciphertext;
    let mut out = Vec::with_capacity(ciphertext.len());
    decrypt_stream(&mut reader, &mut out, key, iv).await?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const KEY: [u8; KEY_SIZE] = [0x42; KEY_SIZE];
    const IV: [u8; IV_SIZE] = [0x24; IV_SIZE];

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).expect("valid hex"))
            .collect()
    }

    #[tokio::test]
    async fn test_round_trip_small() {
        let plaintext = b"hello world, this is a test message";
        let encrypted = encrypt_bytes(plaintext, &KEY, &IV).await.expect("encrypt");
        assert_eq!(encrypted.len() as u64, padded_len(plaintext.len() as u64));
        assert_ne!(&encrypted[..plaintext.len()], &plaintext[..]);

        let decrypted = decrypt_bytes(&encrypted, &KEY, &IV).await.expect("decrypt");
        assert_eq!(decrypted, plaintext);
    }

    #[tokio::test]
    async fn test_round_trip_spans_chunks() {
        let plaintext: Vec<u8> = (0..CHUNK_SIZE * 3 + 1000).map(|i| (i % 251) as u8).collect();
        let mut reader = &plaintext[..];
        let mut encrypted = Vec::new();
        let consumed = encrypt_stream(&mut reader, &mut encrypted, &KEY, &IV)
            .await
            .expect("encrypt");
        assert_eq!(consumed, plaintext.len() as u64);

        let mut reader = &encrypted[..];
        let mut decrypted = Vec::new();
        let written = decrypt_stream(&mut reader, &mut decrypted, &KEY, &IV)
            .await
            .expect("decrypt");
        assert_eq!(written, plaintext.len() as u64);
        assert_eq!(decrypted, plaintext);
    }

    #[tokio::test]
    async fn test_aligned_input_gets_full_padding_block() {
        let plaintext = [7u8; BLOCK_SIZE * 2];
        let encrypted = encrypt_bytes(&plaintext, &KEY, &IV).await.expect("encrypt");
        assert_eq!(encrypted.len(), BLOCK_SIZE * 3);

        let empty = encrypt_bytes(b"", &KEY, &IV).await.expect("encrypt");
        assert_eq!(empty.len(), BLOCK_SIZE);
        assert!(decrypt_bytes(&empty, &KEY, &IV).await.expect("decrypt").is_empty());
    }

    #[tokio::test]
    async fn test_known_answer_first_block() {
        // NIST SP 800-38A, F.2.5 CBC-AES256.Encrypt, block #1
        let key = hex("603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4");
        let iv = hex("000102030405060708090a0b0c0d0e0f");
        let plaintext = hex("6bc1bee22e409f96e93d7e117393172a");

        let encrypted = encrypt_bytes(&plaintext, &key, &iv).await.expect("encrypt");
        assert_eq!(&encrypted[..BLOCK_SIZE], &hex("f58c4c04d6e5f1ba779eabfb5f7bfbd6")[..]);
    }

    #[tokio::test]
    async fn test_rejects_bad_key_material() {
        let err = encrypt_bytes(b"data", &KEY[..16], &IV).await.unwrap_err();
        assert!(matches!(
            err,
            ScribbleError::Crypto(CryptoError::InvalidKeyMaterial { what: "key", found: 16, .. })
        ));

        let err = decrypt_bytes(&[0u8; 16], &KEY, &IV[..8]).await.unwrap_err();
        assert!(matches!(
            err,
            ScribbleError::Crypto(CryptoError::InvalidKeyMaterial { what: "iv", found: 8, .. })
        ));
    }

    #[tokio::test]
    async fn test_rejects_truncated_and_empty_ciphertext() {
        let encrypted = encrypt_bytes(b"some secret metadata", &KEY, &IV).await.expect("encrypt");

        let err = decrypt_bytes(&encrypted[..encrypted.len() - 3], &KEY, &IV)
            .await
            .unwrap_err();
        assert!(matches!(err, ScribbleError::Crypto(CryptoError::DecryptionFailed(_))));

        let err = decrypt_bytes(b"", &KEY, &IV).await.unwrap_err();
        assert!(matches!(err, ScribbleError::Crypto(CryptoError::DecryptionFailed(_))));
    }

    #[tokio::test]
    async fn test_rejects_inconsistent_padding() {
        // A final block that decrypts to ...0x03 0x03 0x02 has an inconsistent pad.
        let mut forged = [0u8; BLOCK_SIZE];
        forged[BLOCK_SIZE - 3] = 3;
        forged[BLOCK_SIZE - 2] = 3;
        forged[BLOCK_SIZE - 1] = 2;
        let mut cipher = Aes256CbcEnc::new_from_slices(&KEY, &IV).expect("cipher");
        cipher.encrypt_block_mut(GenericArray::from_mut_slice(&mut forged[..]));

        let err = decrypt_bytes(&forged, &KEY, &IV).await.unwrap_err();
        assert!(matches!(err, ScribbleError::Crypto(CryptoError::DecryptionFailed(_))));
    }

    #[tokio::test]
    async fn test_wrong_key_does_not_reveal_plaintext() {
        let plaintext = b"{\"project\":{\"name\":\"doc\"}}";
        let encrypted = encrypt_bytes(plaintext, &KEY, &IV).await.expect("encrypt");

        let wrong = [0x43u8; KEY_SIZE];
        match decrypt_bytes(&encrypted, &wrong, &IV).await {
            Err(err) => assert_eq!(err.code(), -13),
            Ok(out) => assert_ne!(out, plaintext),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_round_trip(
            plaintext in proptest::collection::vec(any::<u8>(), 0..4096),
            key in proptest::array::uniform32(any::<u8>()),
            iv in proptest::array::uniform16(any::<u8>()),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .build()
                .expect("runtime");
            let decrypted = rt.block_on(async {
                let encrypted = encrypt_bytes(&plaintext, &key, &iv).await?;
                decrypt_bytes(&encrypted, &key, &iv).await
            }).expect("round trip");
            prop_assert_eq!(decrypted, plaintext);
        }
    }
}
