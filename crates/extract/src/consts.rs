/// Directory PhotoRec is told to write into; it appends `.1`, `.2`, ...
pub(crate) const RECUP_DIR: &str = "recup_dir";
/// PhotoRec's per-run report, not a recovered file.
pub(crate) const REPORT_XML: &str = "report.xml";
/// Category for files nobody could identify.
pub const NO_FILE_TYPE: &str = "no_file_type";
/// Category for kept, PhotoRec-flagged broken files.
pub const CORRUPTED: &str = "corrupted";

/// ext2/3/4 superblock magic (`0xEF53`, little-endian) at this byte offset.
pub(crate) const EXT_MAGIC_OFFSET: u64 = 1024 + 0x38;
pub(crate) const EXT_MAGIC: [u8; 2] = [0x53, 0xEF];

/// Leading bytes of common formats PhotoRec sometimes leaves without an
/// extension. Longest signatures first where prefixes overlap.
pub(crate) const SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "png"),
    (b"\xFF\xD8\xFF", "jpg"),
    (b"GIF87a", "gif"),
    (b"GIF89a", "gif"),
    (b"%PDF-", "pdf"),
    (b"PK\x03\x04", "zip"),
    (b"\x1F\x8B", "gz"),
    (b"BZh", "bz2"),
    (b"\xFD7zXZ\x00", "xz"),
    (b"7z\xBC\xAF\x27\x1C", "7z"),
    (b"Rar!\x1A\x07", "rar"),
    (b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1", "doc"),
    (b"ID3", "mp3"),
    (b"fLaC", "flac"),
    (b"OggS", "ogg"),
    (b"\x7FELF", "elf"),
    (b"SQLite format 3\x00", "sqlite"),
    (b"<?xml", "xml"),
];

/// Bytes read from the start of a file for sniffing.
pub(crate) const SNIFF_LEN: usize = 16;
