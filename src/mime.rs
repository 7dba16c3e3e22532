//! Extension-based MIME detection.
//!
//! The agent only needs two answers from a file's type: something
//! reasonable to stamp on the remote object, and whether the content is
//! already compressed (compressing `.gz` input again wastes CPU and makes
//! parts smaller, not larger). A table keyed on the lowercased extension is
//! enough for both.

use std::path::Path;

const OCTET_STREAM: &str = "application/octet-stream";

/// MIME types considered already-compressed.
const COMPRESSED_TYPES: &[&str] = &[
    "application/x-bzip",
    "application/x-bzip2",
    "application/zip",
    "application/x-gzip",
    "application/gzip",
    "application/x-7z-compressed",
    "application/x-lzh-compressed",
    "application/x-xz",
    "application/x-rar-compressed",
    "application/zstd",
];

/// Best-effort MIME type from the file extension.
pub fn detect_mime(path: &Path) -> &'static str {
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.to_ascii_lowercase(),
        None => return OCTET_STREAM,
    };
    match ext.as_str() {
        "bz" => "application/x-bzip",
        "bz2" | "boz" => "application/x-bzip2",
        "zip" => "application/zip",
        "gz" => "application/x-gzip",
        "7z" => "application/x-7z-compressed",
        "lzh" | "lha" => "application/x-lzh-compressed",
        "xz" => "application/x-xz",
        "rar" => "application/x-rar-compressed",
        "zst" => "application/zstd",
        "gtar" | "tar" => "application/x-gtar",
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "tsv" => "text/tab-separated-values",
        "json" => "application/json",
        "xml" => "application/xml",
        "html" | "htm" => "text/html",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "tif" | "tiff" => "image/tiff",
        "mp4" => "video/mp4",
        "bam" => "application/octet-stream",
        _ => OCTET_STREAM,
    }
}

/// Whether `mime` names an already-compressed format.
pub fn is_compressed(mime: &str) -> bool {
    COMPRESSED_TYPES.contains(&mime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn known_extensions_map_to_types() {
        assert_eq!(detect_mime(&PathBuf::from("reads.fastq.gz")), "application/x-gzip");
        assert_eq!(detect_mime(&PathBuf::from("notes.TXT")), "text/plain");
        assert_eq!(detect_mime(&PathBuf::from("archive.7z")), "application/x-7z-compressed");
    }

    #[test]
    fn unknown_or_missing_extension_is_octet_stream() {
        assert_eq!(detect_mime(&PathBuf::from("Makefile")), OCTET_STREAM);
        assert_eq!(detect_mime(&PathBuf::from("data.weird")), OCTET_STREAM);
    }

    #[test]
    fn compressed_detection_follows_the_type() {
        assert!(is_compressed(detect_mime(&PathBuf::from("a.gz"))));
        assert!(is_compressed(detect_mime(&PathBuf::from("a.zip"))));
        assert!(!is_compressed(detect_mime(&PathBuf::from("a.txt"))));
        assert!(!is_compressed(detect_mime(&PathBuf::from("a.bin"))));
    }
}
