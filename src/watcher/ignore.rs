//! Fixed ignore list and binary/text classification for the file watcher.

use std::path::Path;

const IGNORED_DIR_NAMES: &[&str] = &[
    "node_modules",
    ".git",
    ".hg",
    ".svn",
    "target",
    "dist",
    "build",
    "out",
    ".next",
    ".nuxt",
    "__pycache__",
    ".venv",
    "venv",
    ".cache",
    "vendor",
    ".idea",
    ".vscode",
    ".terraform",
];

const IGNORED_FILE_SUFFIXES: &[&str] = &[
    ".lock", ".log", ".pyc", ".class", ".swp", "~",
];

const IGNORED_FILE_NAMES: &[&str] = &[
    "Cargo.lock",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "poetry.lock",
    "Gemfile.lock",
    ".DS_Store",
];

/// True if any path component names a directory we never watch, or the
/// file itself is a lockfile/dotfile/editor-swap file.
pub fn is_ignored(path: &Path) -> bool {
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if IGNORED_DIR_NAMES.contains(&name.as_ref()) {
            return true;
        }
        if name.starts_with('.') && name != "." && name != ".." {
            return true;
        }
    }

    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => {
            IGNORED_FILE_NAMES.contains(&name)
                || IGNORED_FILE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
        }
        None => false,
    }
}

const BINARY_EXTENSIONS: &[&str] = &[
    // images
    "png", "jpg", "jpeg", "gif", "bmp", "webp", "ico", "tiff",
    // audio/video
    "mp3", "wav", "flac", "ogg", "mp4", "mov", "avi", "mkv", "webm",
    // archives
    "zip", "tar", "gz", "bz2", "xz", "7z", "rar",
    // documents
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
    // fonts
    "woff", "woff2", "ttf", "otf", "eot",
    // executables and native binaries
    "exe", "dll", "so", "dylib", "bin", "wasm", "a", "o",
    // embedded/local databases
    "sqlite", "sqlite3", "db",
];

/// Binary/text classification is by extension, not content sniffing —
/// deliberate, so the same file always classifies the same way.
pub fn is_binary_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| BINARY_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
