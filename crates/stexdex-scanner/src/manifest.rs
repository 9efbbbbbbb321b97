//! `META-INF/MANIFEST.MF` reading

use std::fs;
use std::io;
use std::path::Path;

use stexdex_core::ScanError;

pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";

/// Archive id declared in the manifest, if there is a manifest with an `id:` line.
pub fn read_archive_id(archive_dir: &Path) -> Result<Option<String>, ScanError> {
    let path = archive_dir.join(MANIFEST_PATH);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(ScanError::Manifest {
                path,
                message: err.to_string(),
            });
        }
    };
    Ok(parse_id(&text))
}

fn parse_id(text: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        (key.trim() == "id")
            .then(|| value.trim().to_string())
            .filter(|id| !id.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_id_line() {
        let text = "narration-base: http://mathhub.info\nid: smglom/sets\ndependencies: x\n";
        assert_eq!(parse_id(text), Some("smglom/sets".to_string()));
    }

    #[test]
    fn missing_or_empty_id() {
        assert_eq!(parse_id("title: Sets\n"), None);
        assert_eq!(parse_id("id:   \n"), None);
    }
}
