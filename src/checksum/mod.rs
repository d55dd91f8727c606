use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

const READ_BUFFER: usize = 8 * 1024;

/// Digest algorithm, picked from the width of the expected hex string.
///
/// The patch server publishes MD5 (32 hex chars); a 64 char digest is read as SHA-256.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DigestKind {
    Md5,
    Sha256,
}

impl DigestKind {
    pub fn for_expected(expected: &str) -> Self {
        if expected.trim().len() == 64 {
            DigestKind::Sha256
        } else {
            DigestKind::Md5
        }
    }
}

enum Hasher {
    Md5(md5::Context),
    Sha256(Sha256),
}

impl Hasher {
    fn new(kind: DigestKind) -> Self {
        match kind {
            DigestKind::Md5 => Hasher::Md5(md5::Context::new()),
            DigestKind::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(ctx) => ctx.consume(data),
            Hasher::Sha256(hasher) => hasher.update(data),
        }
    }

    fn finish_hex(self) -> String {
        match self {
            Hasher::Md5(ctx) => format!("{:x}", ctx.finalize()),
            Hasher::Sha256(hasher) => format!("{:x}", hasher.finalize()),
        }
    }
}

/// Stream `path` through the digest and return it as lowercase hex.
pub fn file_digest(path: &Path, kind: DigestKind) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Hasher::new(kind);
    let mut buf = [0u8; READ_BUFFER];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hasher.finish_hex())
}

pub fn digest_matches(actual: &str, expected: &str) -> bool {
    actual.eq_ignore_ascii_case(expected.trim())
}

/// Whether the file at `path` hashes to `expected` (hex, any case).
///
/// An unreadable or missing file is an error, never `false`.
pub fn validate(path: &Path, expected: &str) -> io::Result<bool> {
    let actual = file_digest(path, DigestKind::for_expected(expected))?;
    Ok(digest_matches(&actual, expected))
}
