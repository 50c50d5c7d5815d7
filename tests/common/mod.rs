#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::TempDir;

pub const INDEX_BODY: &str = "<h1>hello from index</h1>\n";

/// Document root with a readable file, an empty file, a private file and a
/// readable directory
pub fn document_root() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "index.html", INDEX_BODY.as_bytes(), 0o644);
    write_file(dir.path(), "empty.html", b"", 0o644);
    write_file(dir.path(), "secret", b"top secret\n", 0o600);

    let docs = dir.path().join("docs");
    fs::create_dir(&docs).unwrap();
    fs::set_permissions(&docs, fs::Permissions::from_mode(0o755)).unwrap();
    write_file(&docs, "guide.txt", b"read me\n", 0o644);

    dir
}

pub fn write_file(dir: &Path, name: &str, contents: &[u8], mode: u32) {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
}
