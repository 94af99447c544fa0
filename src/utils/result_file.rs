use std::{fs, io, path::Path};

/// Writes the class index as bare decimal text, replacing any previous result.
pub fn write_result(path: impl AsRef<Path>, class_index: usize) -> io::Result<()> {
    fs::write(path, class_index.to_string())
}
