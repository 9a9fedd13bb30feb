//! Round-trip and tamper-detection tests across every registered cipher.

use std::io::Cursor;
use std::sync::atomic::AtomicBool;

use fenc_core::{ErrorKind, FencError};
use fenc_crypto::{Cipher, CipherCategory, CipherParams, CipherRegistry, KeyMaterial, StreamOptions};
use proptest::prelude::*;

fn stream_roundtrip(cipher: &dyn Cipher, key: &KeyMaterial, data: &[u8], chunk: usize) -> Vec<u8> {
    let params = CipherParams::default();

    let mut sealed: Vec<u8> = Vec::new();
    let mut opts = StreamOptions::default().with_chunk_size(chunk);
    cipher
        .encrypt_stream(&mut Cursor::new(data), &mut sealed, Some(data.len() as u64), key, &params, &mut opts)
        .expect("encrypt stream");

    let mut opened: Vec<u8> = Vec::new();
    let mut opts = StreamOptions::default().with_chunk_size(chunk);
    cipher
        .decrypt_stream(&mut Cursor::new(&sealed), &mut opened, None, key, &params, &mut opts)
        .expect("decrypt stream");
    opened
}

#[test]
fn every_registered_algorithm_roundtrips_files() {
    let registry = CipherRegistry::with_builtin();
    for name in registry.names() {
        let cipher = registry.create(&name).unwrap();
        let key = cipher.generate_key(&CipherParams::default()).unwrap();
        for len in [0usize, 1, 15, 16, 17, 4095, 4096, 4097, 9000] {
            let data: Vec<u8> = (0..len).map(|i| (i * 13 + len) as u8).collect();
            for chunk in [1000usize, 4096] {
                assert_eq!(
                    stream_roundtrip(&cipher, &key, &data, chunk),
                    data,
                    "{name} len={len} chunk={chunk}"
                );
            }
        }
    }
}

#[test]
fn every_symmetric_and_aead_algorithm_roundtrips_data() {
    let registry = CipherRegistry::with_builtin();
    for name in registry.names() {
        let cipher = registry.create(&name).unwrap();
        if cipher.algorithm().category() == CipherCategory::Asymmetric {
            continue;
        }
        let key = cipher.generate_key(&CipherParams::default()).unwrap();
        for data in [&b""[..], &b"a"[..], &b"exactly sixteen!"[..], &b"not block aligned"[..]] {
            let ct = cipher.encrypt_data(data, &key, &CipherParams::default()).unwrap();
            assert_eq!(cipher.decrypt_data(&ct, &key, &CipherParams::default()).unwrap(), data, "{name}");
        }
    }
}

#[test]
fn multi_chunk_cbc_matches_one_shot() {
    let registry = CipherRegistry::with_builtin();
    let cipher = registry.create("AES-256-CBC").unwrap();
    let key = cipher.generate_key(&CipherParams::default()).unwrap();
    let data = vec![0xC3u8; 3 * 4096 + 5];

    let one_shot = cipher.encrypt_data(&data, &key, &CipherParams::default()).unwrap();

    let mut streamed: Vec<u8> = Vec::new();
    let mut opts = StreamOptions::default();
    cipher
        .encrypt_stream(&mut Cursor::new(&data), &mut streamed, None, &key, &CipherParams::default(), &mut opts)
        .unwrap();

    // Padding appears once: one block beyond the aligned length, not one per chunk.
    assert_eq!(streamed.len(), data.len() + (16 - data.len() % 16));
    assert_eq!(streamed, one_shot);
}

#[test]
fn cancelled_stream_reports_cancelled() {
    let registry = CipherRegistry::with_builtin();
    let cipher = registry.create("ChaCha20-Poly1305").unwrap();
    let key = cipher.generate_key(&CipherParams::default()).unwrap();
    let cancel = AtomicBool::new(true);
    let mut opts = StreamOptions::default().with_cancel(&cancel);
    let mut out: Vec<u8> = Vec::new();

    let err = cipher
        .encrypt_stream(&mut Cursor::new(vec![0u8; 10_000]), &mut out, None, &key, &CipherParams::default(), &mut opts)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(out.is_empty());
}

#[test]
fn unknown_algorithm_is_unsupported() {
    let err = CipherRegistry::with_builtin().create("Twofish-256").unwrap_err();
    assert!(matches!(err, FencError::UnsupportedAlgorithm(_)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn aes_and_chacha_roundtrip_arbitrary_data(
        data in proptest::collection::vec(any::<u8>(), 0..2048),
        which in 0usize..13
    ) {
        let registry = CipherRegistry::with_builtin();
        let names: Vec<String> = registry
            .names()
            .into_iter()
            .filter(|n| !n.starts_with("RSA-"))
            .collect();
        let cipher = registry.create(&names[which % names.len()]).unwrap();
        let key = cipher.generate_key(&CipherParams::default()).unwrap();
        let ct = cipher.encrypt_data(&data, &key, &CipherParams::default()).unwrap();
        prop_assert_eq!(cipher.decrypt_data(&ct, &key, &CipherParams::default()).unwrap(), data);
    }

    #[test]
    fn chacha_any_bit_flip_is_integrity_error(
        data in proptest::collection::vec(any::<u8>(), 0..512),
        bit in any::<usize>()
    ) {
        let cipher = CipherRegistry::with_builtin().create("ChaCha20-Poly1305").unwrap();
        let key = cipher.generate_key(&CipherParams::default()).unwrap();
        let mut ct = cipher.encrypt_data(&data, &key, &CipherParams::default()).unwrap();
        let bit = bit % (ct.len() * 8);
        ct[bit / 8] ^= 1 << (bit % 8);
        let err = cipher.decrypt_data(&ct, &key, &CipherParams::default()).unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn chacha_file_bit_flip_is_integrity_error(
        len in 0usize..10_000,
        bit in any::<usize>()
    ) {
        let cipher = CipherRegistry::with_builtin().create("ChaCha20-Poly1305").unwrap();
        let key = cipher.generate_key(&CipherParams::default()).unwrap();
        let data = vec![0x11u8; len];

        let mut sealed: Vec<u8> = Vec::new();
        cipher
            .encrypt_stream(&mut Cursor::new(&data), &mut sealed, None, &key, &CipherParams::default(), &mut StreamOptions::default())
            .unwrap();
        let bit = bit % (sealed.len() * 8);
        sealed[bit / 8] ^= 1 << (bit % 8);

        let mut opened: Vec<u8> = Vec::new();
        let err = cipher
            .decrypt_stream(&mut Cursor::new(&sealed), &mut opened, None, &key, &CipherParams::default(), &mut StreamOptions::default())
            .unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::Integrity);
    }
}
