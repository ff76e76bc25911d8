use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::io::{Cursor, Write};
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

pub const ENTRY_FILE: &str = "index.py";
pub const REQUIREMENTS_FILE: &str = "requirements.txt";

/// Source of one function unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCode {
    pub name: String,
    pub entry: String,
    /// Dependency manifest; absent or empty means no dependencies.
    pub requirements: Option<String>,
}

impl FunctionCode {
    /// Zip the entry script and, if non-empty, the dependency manifest.
    pub fn package(&self) -> Result<Vec<u8>> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        writer
            .start_file(ENTRY_FILE, options)
            .with_context(|| format!("Failed to add {} for {}", ENTRY_FILE, self.name))?;
        writer.write_all(self.entry.as_bytes())?;

        if let Some(requirements) = self.requirements.as_deref().filter(|r| !r.trim().is_empty()) {
            writer
                .start_file(REQUIREMENTS_FILE, options)
                .with_context(|| format!("Failed to add {} for {}", REQUIREMENTS_FILE, self.name))?;
            writer.write_all(requirements.as_bytes())?;
        }

        let cursor = writer
            .finish()
            .with_context(|| format!("Failed to finish bundle for {}", self.name))?;
        Ok(cursor.into_inner())
    }
}

/// Short content digest for logs.
pub fn bundle_digest(bundle: &[u8]) -> String {
    let digest = Sha256::digest(bundle);
    hex::encode(&digest[..6])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn names_in(bundle: Vec<u8>) -> Vec<String> {
        let archive = zip::ZipArchive::new(Cursor::new(bundle)).unwrap();
        archive.file_names().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_package_entry_only() {
        let code = FunctionCode {
            name: "auth".into(),
            entry: "def handler(event, context):\n    return {}\n".into(),
            requirements: Some("  \n".into()),
        };
        let names = names_in(code.package().unwrap());
        assert_eq!(names, vec!["index.py"]);
    }

    #[test]
    fn test_package_with_requirements_roundtrips_content() {
        let code = FunctionCode {
            name: "payments".into(),
            entry: "import requests\n".into(),
            requirements: Some("requests==2.32.3\n".into()),
        };
        let bundle = code.package().unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bundle)).unwrap();
        assert_eq!(archive.len(), 2);

        let mut file = archive.by_name("requirements.txt").unwrap();
        assert_eq!(file.compression(), CompressionMethod::Deflated);
        let mut text = String::new();
        file.read_to_string(&mut text).unwrap();
        assert_eq!(text, "requests==2.32.3\n");
    }

    #[test]
    fn test_bundle_digest_is_stable() {
        assert_eq!(bundle_digest(b"abc"), "ba7816bf8f01");
        assert_eq!(bundle_digest(b"abc").len(), 12);
    }
}
