//! Key manager: save/load, password protection, listing and deletion.

use std::sync::Arc;

use fenc_core::{ErrorKind, FencError};
use fenc_crypto::{Cipher, CipherParams, CipherRegistry, KeyMaterial};
use fenc_keys::{KeyManager, MAGIC};
use secrecy::SecretString;
use tempfile::TempDir;

fn manager(dir: &TempDir) -> KeyManager {
    KeyManager::new(dir.path().join("keys"), Arc::new(CipherRegistry::with_builtin()))
        .with_kdf_iterations(1000)
}

fn generate(algorithm: &str) -> KeyMaterial {
    CipherRegistry::with_builtin()
        .create(algorithm)
        .unwrap()
        .generate_key(&CipherParams::default())
        .unwrap()
}

#[test]
fn unprotected_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let km = manager(&tmp);
    let material = generate("AES-256-CBC");

    let path = km.save(&material, "work", None).unwrap();
    assert_eq!(path, tmp.path().join("keys").join("work.key"));
    assert!(km.exists("work"));

    let loaded = km.load("work", None).unwrap();
    assert_eq!(loaded.algorithm, "AES-256-CBC");
    assert_eq!(loaded.key.as_deref(), material.key.as_deref());
    assert_eq!(loaded.iv, material.iv);

    let raw = std::fs::read(&path).unwrap();
    assert!(!raw.starts_with(MAGIC));
    let _: serde_json::Value = serde_json::from_slice(&raw).unwrap();
}

#[test]
fn protected_roundtrip_and_errors() {
    let tmp = TempDir::new().unwrap();
    let km = manager(&tmp);
    let material = generate("ChaCha20-Poly1305");
    let password = SecretString::from("correct horse");

    let path = km.save(&material, "vault", Some(&password)).unwrap();
    let raw = std::fs::read(&path).unwrap();
    assert!(raw.starts_with(MAGIC));
    assert!(
        !raw.windows(9).any(|w| w == b"algorithm"),
        "protected record must not expose JSON"
    );

    let loaded = km.load("vault", Some(&password)).unwrap();
    assert_eq!(loaded.key.as_deref(), material.key.as_deref());

    let err = km.load("vault", None).unwrap_err();
    assert!(matches!(err, FencError::PasswordRequired(ref n) if n == "vault"));

    let err = km
        .load("vault", Some(&SecretString::from("wrong")))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WrongPassword);
}

#[test]
fn stored_iterations_override_manager_default() {
    let tmp = TempDir::new().unwrap();
    let material = generate("AES-128-CTR");
    let password = SecretString::from("pw");
    manager(&tmp).save(&material, "k", Some(&password)).unwrap();

    let other = KeyManager::new(tmp.path().join("keys"), Arc::new(CipherRegistry::with_builtin()))
        .with_kdf_iterations(5000);
    let loaded = other.load("k", Some(&password)).unwrap();
    assert_eq!(loaded.key.as_deref(), material.key.as_deref());
}

#[test]
fn tampered_protected_record_is_wrong_password() {
    let tmp = TempDir::new().unwrap();
    let km = manager(&tmp);
    let password = SecretString::from("pw");
    let path = km.save(&generate("AES-128-OFB"), "k", Some(&password)).unwrap();

    let mut raw = std::fs::read(&path).unwrap();
    let last = raw.len() - 1;
    raw[last] ^= 0x01;
    std::fs::write(&path, &raw).unwrap();

    let err = km.load("k", Some(&password)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WrongPassword);
}

#[test]
fn truncated_protected_record_is_storage_error() {
    let tmp = TempDir::new().unwrap();
    let km = manager(&tmp);
    std::fs::create_dir_all(km.dir()).unwrap();
    std::fs::write(km.dir().join("short.key"), b"ENCRYPTED:abc").unwrap();

    let err = km.load("short", Some(&SecretString::from("pw"))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
}

#[test]
fn save_new_never_replaces_a_record() {
    let tmp = TempDir::new().unwrap();
    let km = manager(&tmp);
    let first = generate("AES-128-CTR");
    let second = generate("AES-128-CTR");

    km.save_new(&first, "temp_report.pdf", None).unwrap();
    let err = km.save_new(&second, "temp_report.pdf", None).unwrap_err();
    assert!(matches!(&err, FencError::KeyExists(name) if name == "temp_report.pdf"));
    assert_eq!(err.kind(), ErrorKind::Input);

    let loaded = km.load("temp_report.pdf", None).unwrap();
    assert_eq!(loaded.key.as_deref(), first.key.as_deref());
}

#[test]
fn missing_key_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let err = manager(&tmp).load("ghost", None).unwrap_err();
    assert!(matches!(err, FencError::KeyNotFound(ref n) if n == "ghost"));
}

#[test]
fn save_rejects_inconsistent_material() {
    let tmp = TempDir::new().unwrap();
    let km = manager(&tmp);
    let mut material = generate("AES-256-CBC");
    material.key = Some(zeroize::Zeroizing::new(vec![0u8; 16]));

    let err = km.save(&material, "bad", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Input);
    assert!(!km.exists("bad"));

    let mut unknown = generate("AES-256-CBC");
    unknown.algorithm = "Serpent-256".into();
    let err = km.save(&unknown, "bad", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedAlgorithm);
}

#[test]
fn list_reports_metadata_only() {
    let tmp = TempDir::new().unwrap();
    let km = manager(&tmp);
    assert!(km.list().unwrap().is_empty());

    km.save(&generate("AES-192-CFB"), "beta", None).unwrap();
    km.save(&generate("ChaCha20-Poly1305"), "alpha", Some(&SecretString::from("pw")))
        .unwrap();
    std::fs::write(km.dir().join("notes.txt"), b"ignored").unwrap();

    let keys = km.list().unwrap();
    let names: Vec<&str> = keys.iter().map(|k| k.name.as_str()).collect();
    assert_eq!(names, ["alpha", "beta"]);

    assert!(keys[0].is_password_protected);
    assert_eq!(keys[0].algorithm, None);
    assert!(!keys[1].is_password_protected);
    assert_eq!(keys[1].algorithm.as_deref(), Some("AES-192-CFB"));
    assert_eq!(keys[1].path, km.dir().join("beta.key"));
}

#[test]
fn delete_reports_whether_a_record_existed() {
    let tmp = TempDir::new().unwrap();
    let km = manager(&tmp);
    km.save(&generate("AES-128-CBC"), "gone", None).unwrap();

    assert!(km.delete("gone").unwrap());
    assert!(!km.exists("gone"));
    assert!(!km.delete("gone").unwrap());
}

#[test]
fn names_are_sanitized_into_the_key_dir() {
    let tmp = TempDir::new().unwrap();
    let km = manager(&tmp);
    let path = km.save(&generate("AES-128-CBC"), "../../etc/evil key", None).unwrap();

    assert_eq!(path.parent().unwrap(), km.dir());
    assert!(km.load("../../etc/evil key", None).is_ok());
    assert!(matches!(km.save(&generate("AES-128-CBC"), "..", None), Err(FencError::Input(_))));
}

#[cfg(unix)]
#[test]
fn records_are_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = TempDir::new().unwrap();
    let km = manager(&tmp);
    let path = km.save(&generate("AES-256-CTR"), "private", None).unwrap();
    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
    assert!(!path.with_extension("tmp").exists());
}

#[test]
fn rsa_pair_with_encrypted_private_half() {
    let tmp = TempDir::new().unwrap();
    let km = manager(&tmp);
    let registry = CipherRegistry::with_builtin();
    let cipher = registry.create("RSA-1024").unwrap();
    let params = CipherParams::default().with_passphrase(SecretString::from("pem pass"));
    let material = cipher.generate_key(&params).unwrap();
    assert!(material.private_key_encrypted);

    km.save(&material, "rsa", None).unwrap();
    let loaded = km.load("rsa", None).unwrap();
    assert!(loaded.private_key_encrypted);
    assert_eq!(loaded.public_pem, material.public_pem);

    let data = b"envelope payload".to_vec();
    let ct = cipher.encrypt_data(&data, &loaded, &params).unwrap();
    assert_eq!(cipher.decrypt_data(&ct, &loaded, &params).unwrap(), data);
}
