//! Output naming and secure deletion.

use rand::RngCore;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fenc_core::{FencError, FencResult};

/// Suffix appended to encrypted files
pub const ENCRYPTED_SUFFIX: &str = ".enc";

/// Suffix appended on decrypt when the input does not end in `.enc`
pub const DECRYPTED_SUFFIX: &str = ".dec";

const STAGING_SUFFIX: &str = ".part";

const WIPE_BLOCK: usize = 64 * 1024;

/// `<file>.enc`, placed in `output_dir` when given.
pub fn encrypted_output_path(input: &Path, output_dir: Option<&Path>) -> FencResult<PathBuf> {
    let name = file_name(input)?;
    let out = format!("{name}{ENCRYPTED_SUFFIX}");
    Ok(place(input, output_dir, &out))
}

/// Strip a trailing `.enc`, or append `.dec` when there is none to strip.
pub fn decrypted_output_path(input: &Path, output_dir: Option<&Path>) -> FencResult<PathBuf> {
    let name = file_name(input)?;
    let out = match name.strip_suffix(ENCRYPTED_SUFFIX) {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => format!("{name}{DECRYPTED_SUFFIX}"),
    };
    Ok(place(input, output_dir, &out))
}

fn file_name(path: &Path) -> FencResult<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| FencError::input(format!("not a file path: {}", path.display())))
}

fn place(input: &Path, output_dir: Option<&Path>, name: &str) -> PathBuf {
    match output_dir {
        Some(dir) => dir.join(name),
        None => input.with_file_name(name),
    }
}

/// Hidden sibling of `output` that a job writes to before committing.
pub(crate) fn staging_path(output: &Path) -> FencResult<PathBuf> {
    let name = file_name(output)?;
    let tag: u32 = rand::random();
    Ok(output.with_file_name(format!(".{name}.{tag:08x}{STAGING_SUFFIX}")))
}

/// Whether `path` looks like a staging file left by a running job.
pub(crate) fn is_staging(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(STAGING_SUFFIX))
}

/// Move a finished staging file over its destination.
pub(crate) fn commit_staged(staged: &Path, output: &Path) -> FencResult<()> {
    std::fs::rename(staged, output).map_err(|e| {
        FencError::storage(format!("moving {} into place: {e}", output.display()))
    })
}

/// Overwrite a file with zeros, then 0xFF, then random bytes, syncing after
/// each pass, and unlink it.
pub fn secure_delete(path: &Path) -> FencResult<()> {
    let meta = std::fs::metadata(path)
        .map_err(|e| FencError::storage(format!("stat {}: {e}", path.display())))?;
    if !meta.is_file() {
        return Err(FencError::input(format!("not a regular file: {}", path.display())));
    }
    let len = meta.len();

    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| FencError::storage(format!("open {} for wiping: {e}", path.display())))?;

    let mut block = vec![0u8; WIPE_BLOCK];
    let mut rng = rand::thread_rng();
    for pass in 0..3u8 {
        file.seek(SeekFrom::Start(0))?;
        let mut remaining = len;
        while remaining > 0 {
            let n = remaining.min(WIPE_BLOCK as u64) as usize;
            match pass {
                0 => block[..n].fill(0x00),
                1 => block[..n].fill(0xFF),
                _ => rng.fill_bytes(&mut block[..n]),
            }
            file.write_all(&block[..n])?;
            remaining -= n as u64;
        }
        file.sync_all()?;
    }
    drop(file);

    std::fs::remove_file(path)
        .map_err(|e| FencError::storage(format!("unlink {}: {e}", path.display())))?;
    tracing::info!(path = %path.display(), bytes = len, "securely deleted");
    Ok(())
}

/// Best-effort removal of a staging file after a failed job.
pub(crate) fn discard_partial(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not remove partial output"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypted_name() {
        let p = encrypted_output_path(Path::new("/data/report.pdf"), None).unwrap();
        assert_eq!(p, PathBuf::from("/data/report.pdf.enc"));

        let p = encrypted_output_path(Path::new("/data/report.pdf"), Some(Path::new("/out"))).unwrap();
        assert_eq!(p, PathBuf::from("/out/report.pdf.enc"));
    }

    #[test]
    fn test_decrypted_name() {
        assert_eq!(
            decrypted_output_path(Path::new("/d/report.pdf.enc"), None).unwrap(),
            PathBuf::from("/d/report.pdf")
        );
        assert_eq!(
            decrypted_output_path(Path::new("/d/blob.bin"), None).unwrap(),
            PathBuf::from("/d/blob.bin.dec")
        );
        assert_eq!(
            decrypted_output_path(Path::new("/d/.enc"), Some(Path::new("/o"))).unwrap(),
            PathBuf::from("/o/.enc.dec")
        );
    }

    #[test]
    fn test_root_has_no_file_name() {
        assert!(encrypted_output_path(Path::new("/"), None).is_err());
    }

    #[test]
    fn test_staging_path_is_hidden_sibling() {
        let out = Path::new("/out/report.pdf");
        let staged = staging_path(out).unwrap();
        assert_eq!(staged.parent(), out.parent());
        let name = staged.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(".report.pdf."));
        assert!(name.ends_with(".part"));
        assert!(is_staging(&staged));
        assert!(!is_staging(out));
    }

    #[test]
    fn test_commit_staged_replaces_destination() {
        let tmp = tempfile::TempDir::new().unwrap();
        let out = tmp.path().join("plain.txt");
        std::fs::write(&out, b"old").unwrap();
        let staged = staging_path(&out).unwrap();
        std::fs::write(&staged, b"new").unwrap();

        commit_staged(&staged, &out).unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"new");
        assert!(!staged.exists());
    }

    #[test]
    fn test_secure_delete_removes_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("secret.txt");
        std::fs::write(&path, vec![0x5Au8; 200_000]).unwrap();

        secure_delete(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_secure_delete_missing_is_storage_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = secure_delete(&tmp.path().join("nope")).unwrap_err();
        assert_eq!(err.kind(), fenc_core::ErrorKind::Storage);
    }
}
