//! Chunked pump driving a `ChunkTransform` from a reader into a writer.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::atomic::Ordering;

use fenc_core::{FencError, FencResult};

use crate::cipher::{ChunkTransform, StreamOptions};

/// Read `reader` in `options.chunk_size` pieces, feed every piece through
/// `transform`, and write what it emits. Returns bytes written.
///
/// Progress is the cumulative share of `total` consumed; with an unknown or
/// zero total it jumps to 100 when the input is exhausted.
pub fn pump(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    total: Option<u64>,
    mut transform: Box<dyn ChunkTransform>,
    options: &mut StreamOptions<'_>,
) -> FencResult<u64> {
    if options.chunk_size == 0 {
        return Err(FencError::input("chunk size must be greater than zero"));
    }

    let mut buf = vec![0u8; options.chunk_size];
    let mut consumed: u64 = 0;
    let mut written: u64 = 0;

    loop {
        check_cancel(options)?;

        let n = read_full(reader, &mut buf)?;
        if n == 0 {
            break;
        }
        consumed += n as u64;

        let out = transform.update(&buf[..n])?;
        writer.write_all(&out)?;
        written += out.len() as u64;

        if let (Some(progress), Some(total)) = (options.progress.as_deref_mut(), total) {
            if total > 0 {
                progress((consumed as f64 / total as f64 * 100.0).min(100.0));
            }
        }

        if n < buf.len() {
            break;
        }
    }

    check_cancel(options)?;
    let tail = transform.finish()?;
    writer.write_all(&tail)?;
    written += tail.len() as u64;
    writer.flush()?;

    if let Some(progress) = options.progress.as_deref_mut() {
        progress(100.0);
    }

    Ok(written)
}

/// Stream `input` into a freshly created `output` through `transform`.
///
/// The output is left in place on failure; callers that need cleanup remove it.
pub fn transform_file(
    input: &Path,
    output: &Path,
    transform: Box<dyn ChunkTransform>,
    options: &mut StreamOptions<'_>,
) -> FencResult<u64> {
    let source = File::open(input)
        .map_err(|e| FencError::storage(format!("open {}: {e}", input.display())))?;
    let total = source.metadata().map(|m| m.len()).ok();
    let mut reader = BufReader::new(source);

    let sink = File::create(output)
        .map_err(|e| FencError::storage(format!("create {}: {e}", output.display())))?;
    let mut writer = BufWriter::new(sink);

    let written = pump(&mut reader, &mut writer, total, transform, options)?;
    writer
        .into_inner()
        .map_err(|e| FencError::Io(e.into_error()))?
        .sync_all()?;
    Ok(written)
}

fn check_cancel(options: &StreamOptions<'_>) -> FencResult<()> {
    match options.cancel {
        Some(flag) if flag.load(Ordering::Relaxed) => Err(FencError::Cancelled),
        _ => Ok(()),
    }
}

/// Fill `buf` unless the reader hits EOF first.
fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> FencResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::AtomicBool;

    /// Uppercases ASCII and appends a marker on finish.
    struct Upper;

    impl ChunkTransform for Upper {
        fn update(&mut self, chunk: &[u8]) -> FencResult<Vec<u8>> {
            Ok(chunk.to_ascii_uppercase())
        }

        fn finish(self: Box<Self>) -> FencResult<Vec<u8>> {
            Ok(b"!".to_vec())
        }
    }

    #[test]
    fn test_pump_applies_transform_and_tail() {
        let mut out: Vec<u8> = Vec::new();
        let mut opts = StreamOptions::default().with_chunk_size(3);
        let n = pump(&mut Cursor::new(b"hello world"), &mut out, Some(11), Box::new(Upper), &mut opts).unwrap();
        assert_eq!(out, b"HELLO WORLD!");
        assert_eq!(n, 12);
    }

    #[test]
    fn test_pump_progress_is_monotonic_and_ends_at_100() {
        let mut seen: Vec<f64> = Vec::new();
        let mut record = |p: f64| seen.push(p);
        let mut opts = StreamOptions::default().with_chunk_size(4).with_progress(&mut record);
        let mut out: Vec<u8> = Vec::new();
        pump(&mut Cursor::new(vec![0u8; 10]), &mut out, Some(10), Box::new(Upper), &mut opts).unwrap();
        drop(opts);

        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last().copied(), Some(100.0));
        assert!((seen[0] - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_pump_empty_input_reports_completion() {
        let mut seen: Vec<f64> = Vec::new();
        let mut record = |p: f64| seen.push(p);
        let mut opts = StreamOptions::default().with_progress(&mut record);
        let mut out: Vec<u8> = Vec::new();
        pump(&mut Cursor::new(Vec::<u8>::new()), &mut out, Some(0), Box::new(Upper), &mut opts).unwrap();
        drop(opts);

        assert_eq!(out, b"!");
        assert_eq!(seen, vec![100.0]);
    }

    #[test]
    fn test_pump_rejects_zero_chunk_size() {
        let mut opts = StreamOptions::default().with_chunk_size(0);
        let err = pump(&mut Cursor::new(b"x"), &mut Vec::<u8>::new(), None, Box::new(Upper), &mut opts).unwrap_err();
        assert_eq!(err.kind(), fenc_core::ErrorKind::Input);
    }

    #[test]
    fn test_pump_honours_cancel_flag() {
        let cancel = AtomicBool::new(true);
        let mut opts = StreamOptions::default().with_cancel(&cancel);
        let err = pump(&mut Cursor::new(b"data"), &mut Vec::<u8>::new(), None, Box::new(Upper), &mut opts).unwrap_err();
        assert!(matches!(err, FencError::Cancelled));
    }
}
