//! Structural validation of Debian package archives.
//!
//! A `.deb` is an `ar` archive:
//! - `debian-binary`: format version, `2.0\n`
//! - `control.tar[.gz|.xz|.zst]`: package metadata
//! - `data.tar[.gz|.xz|.zst|.bz2]`: installed files
//!
//! Only the first two are read; the data member just has to be present.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::debug;

/// Upper bound on the size of the control file we are willing to read.
const MAX_CONTROL_SIZE: u64 = 1024 * 1024;

/// Fields read from a package's control file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageMetadata {
    /// `Package` field.
    pub package: String,
    /// `Version` field.
    pub version: String,
    /// `Architecture` field.
    pub architecture: String,
}

/// Validate the archive at `path` and return its control metadata.
///
/// # Errors
///
/// Returns [`Error::InvalidArtifact`] if the file is not a well-formed
/// Debian package.
pub fn inspect(path: &Path) -> Result<PackageMetadata> {
    let invalid = |reason: String| Error::InvalidArtifact {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path)?;
    let mut archive = ar::Archive::new(BufReader::new(file));

    let mut saw_format = false;
    let mut control: Option<String> = None;
    let mut saw_data = false;

    while let Some(entry) = archive.next_entry() {
        let mut entry = entry.map_err(|e| invalid(format!("not an ar archive: {e}")))?;
        let name = String::from_utf8_lossy(entry.header().identifier())
            .trim_end_matches('/')
            .to_string();
        debug!("Archive member: {}", name);

        if !saw_format {
            if name != "debian-binary" {
                return Err(invalid(format!("first member is {name}, expected debian-binary")));
            }
            let mut version = String::new();
            entry
                .read_to_string(&mut version)
                .map_err(|e| invalid(format!("unreadable debian-binary: {e}")))?;
            if !version.trim().starts_with("2.") {
                return Err(invalid(format!("unsupported format version {}", version.trim())));
            }
            saw_format = true;
        } else if let Some(compression) = name.strip_prefix("control.tar") {
            let text = read_control(&mut entry, compression)
                .map_err(|e| invalid(format!("unreadable {name}: {e}")))?;
            control = Some(text.ok_or_else(|| invalid(format!("{name} has no control file")))?);
        } else if name.starts_with("data.tar") {
            saw_data = true;
        }
    }

    if !saw_format {
        return Err(invalid("empty archive".to_string()));
    }
    let control = control.ok_or_else(|| invalid("missing control.tar member".to_string()))?;
    if !saw_data {
        return Err(invalid("missing data.tar member".to_string()));
    }

    let fields = parse_control(&control);
    let field = |key: &str| {
        fields
            .get(key)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| invalid(format!("control file lacks {key}")))
    };

    Ok(PackageMetadata {
        package: field("Package")?,
        version: field("Version")?,
        architecture: field("Architecture")?,
    })
}

/// Decompress a control tarball and return the `control` file's text.
fn read_control<R: Read>(reader: R, compression: &str) -> std::io::Result<Option<String>> {
    let decoder: Box<dyn Read + '_> = match compression {
        "" => Box::new(reader),
        ".gz" => Box::new(GzDecoder::new(reader)),
        ".xz" => Box::new(xz2::read::XzDecoder::new(reader)),
        ".zst" => Box::new(zstd::stream::read::Decoder::new(reader)?),
        other => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unsupported compression {other}"),
            ))
        }
    };

    let mut tarball = tar::Archive::new(decoder);
    for entry in tarball.entries()? {
        let entry = entry?;
        let is_control = {
            let path = entry.path()?;
            path.file_name().is_some_and(|n| n == "control") && path.components().count() <= 2
        };
        if is_control {
            let mut text = String::new();
            entry.take(MAX_CONTROL_SIZE).read_to_string(&mut text)?;
            return Ok(Some(text));
        }
    }
    Ok(None)
}

/// Parse `Key: value` stanzas, folding continuation lines into the value.
fn parse_control(text: &str) -> HashMap<String, String> {
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut current: Option<String> = None;

    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(value) = current.as_ref().and_then(|key| fields.get_mut(key)) {
                value.push('\n');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_string();
            fields.insert(key.clone(), value.trim().to_string());
            current = Some(key);
        }
    }
    fields
}
