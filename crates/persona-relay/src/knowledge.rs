//! Persona loading.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use glob::{Pattern, glob};
use persona_relay_core::prompt::Persona;

/// Lists the persona documents in `dir`: every `*.txt` file, sorted by
/// file name.
pub fn persona_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let Some(dir_str) = dir.to_str() else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "knowledge directory is not valid UTF-8",
        ));
    };
    let pattern = format!("{}/*.txt", Pattern::escape(dir_str));
    let paths = glob(&pattern)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;

    let mut files = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(err) => warn!("skipping unreadable knowledge entry: {err}"),
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Loads the persona from the documents in `dir`.
///
/// Documents are trimmed and empty ones skipped. A directory without
/// documents yields an empty persona.
pub fn load_persona(dir: &Path) -> io::Result<Persona> {
    let files = persona_files(dir)?;
    if files.is_empty() {
        warn!("no persona documents found in {}", dir.display());
    }

    let mut documents = Vec::with_capacity(files.len());
    for path in &files {
        let text = fs::read_to_string(path)?;
        debug!("loaded {} ({} bytes)", path.display(), text.len());
        documents.push(text);
    }
    Ok(Persona::from_documents(documents))
}
