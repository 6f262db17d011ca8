//! Decompression of downloaded data products.
//!
//! Archive products arrive as `*.fits.gz` or `*.fits.Z`. Gzip members are
//! inflated in-process; `.Z` (LZW compress) has no maintained inflater in
//! the ecosystem, so those files are returned as-is with a warning.

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::{info, warn};

/// Suffixes of compressed products the archive serves.
const COMPRESSED_SUFFIXES: &[&str] = &[".fits.gz", ".fits.Z"];

/// Whether `filename` names a compressed archive product.
#[must_use]
pub fn is_compressed_product(filename: &str) -> bool {
    COMPRESSED_SUFFIXES
        .iter()
        .any(|suffix| filename.ends_with(suffix))
}

/// The path a compressed product inflates to (the name minus its final
/// extension), or `None` when the file is not a compressed product.
#[must_use]
pub fn inflated_path(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    if !is_compressed_product(name) {
        return None;
    }
    let stem = name.rsplit_once('.')?.0;
    Some(path.with_file_name(stem))
}

/// Inflates a single downloaded product in place, returning the path of the
/// decompressed file.
///
/// Non-compressed inputs and `.Z` files pass through unchanged; an already
/// existing decompressed sibling short-circuits the work. Inflation errors
/// are logged and the compressed path is returned so a partial batch still
/// yields usable results.
#[must_use]
pub fn unpack_product(path: &Path) -> PathBuf {
    let Some(target) = inflated_path(path) else {
        return path.to_path_buf();
    };
    if target.exists() {
        return target;
    }
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if name.ends_with(".Z") {
        warn!(
            path = %path.display(),
            "cannot inflate LZW-compressed file in-process; keeping it compressed"
        );
        return path.to_path_buf();
    }

    info!(path = %path.display(), "inflating compressed product");
    match inflate_gzip(path, &target) {
        Ok(()) => {
            // Mirror gunzip: the compressed original is replaced.
            let _ = std::fs::remove_file(path);
            target
        }
        Err(error) => {
            warn!(path = %path.display(), %error, "failed to inflate product");
            let _ = std::fs::remove_file(&target);
            path.to_path_buf()
        }
    }
}

/// Inflates every file in the batch, mapping compressed paths to their
/// decompressed counterparts.
#[must_use]
pub fn unpack_products(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    paths.iter().map(|path| unpack_product(path)).collect()
}

fn inflate_gzip(source: &Path, target: &Path) -> io::Result<()> {
    let input = BufReader::new(File::open(source)?);
    let mut decoder = GzDecoder::new(input);
    let mut output = BufWriter::new(File::create(target)?);
    io::copy(&mut decoder, &mut output)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tempfile::TempDir;

    fn write_gzip(path: &Path, payload: &[u8]) {
        let mut encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        encoder.write_all(payload).unwrap();
        encoder.finish().unwrap();
    }

    #[test]
    fn test_is_compressed_product() {
        assert!(is_compressed_product("NACO.2003-02-10.fits.gz"));
        assert!(is_compressed_product("NACO.2003-02-10.fits.Z"));
        assert!(!is_compressed_product("NACO.2003-02-10.fits"));
        assert!(!is_compressed_product("listing.csv.gz"));
    }

    #[test]
    fn test_inflated_path_strips_final_extension() {
        let path = Path::new("/data/NACO.2003-02-10.fits.gz");
        assert_eq!(
            inflated_path(path),
            Some(PathBuf::from("/data/NACO.2003-02-10.fits"))
        );
        assert!(inflated_path(Path::new("/data/NACO.fits")).is_none());
    }

    #[test]
    fn test_unpack_inflates_gzip_product() {
        let dir = TempDir::new().unwrap();
        let compressed = dir.path().join("UVES.2003-04-01.fits.gz");
        write_gzip(&compressed, b"SIMPLE  =                    T");

        let result = unpack_product(&compressed);
        assert_eq!(result, dir.path().join("UVES.2003-04-01.fits"));
        let contents = std::fs::read(&result).unwrap();
        assert_eq!(contents, b"SIMPLE  =                    T");
        assert!(!compressed.exists(), "compressed original is replaced");
    }

    #[test]
    fn test_unpack_skips_when_inflated_sibling_exists() {
        let dir = TempDir::new().unwrap();
        let compressed = dir.path().join("UVES.fits.gz");
        let inflated = dir.path().join("UVES.fits");
        write_gzip(&compressed, b"new contents");
        std::fs::write(&inflated, b"already here").unwrap();

        let result = unpack_product(&compressed);
        assert_eq!(result, inflated);
        assert_eq!(std::fs::read(&inflated).unwrap(), b"already here");
    }

    #[test]
    fn test_unpack_leaves_lzw_files_compressed() {
        let dir = TempDir::new().unwrap();
        let compressed = dir.path().join("MIDI.fits.Z");
        std::fs::write(&compressed, b"\x1f\x9dLZW").unwrap();

        let result = unpack_product(&compressed);
        assert_eq!(result, compressed);
    }

    #[test]
    fn test_unpack_corrupt_gzip_returns_compressed_path() {
        let dir = TempDir::new().unwrap();
        let compressed = dir.path().join("BAD.fits.gz");
        std::fs::write(&compressed, b"not gzip at all").unwrap();

        let result = unpack_product(&compressed);
        assert_eq!(result, compressed);
        assert!(!dir.path().join("BAD.fits").exists());
    }

    #[test]
    fn test_unpack_products_maps_batch() {
        let dir = TempDir::new().unwrap();
        let gz = dir.path().join("A.fits.gz");
        write_gzip(&gz, b"a");
        let plain = dir.path().join("B.fits");
        std::fs::write(&plain, b"b").unwrap();

        let result = unpack_products(vec![gz, plain.clone()]);
        assert_eq!(result, vec![dir.path().join("A.fits"), plain]);
    }
}
