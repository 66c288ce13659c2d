//! Bundle reader/writer.
//!
//! A bundle is a gzip-compressed tar archive holding one `<name>.wasm` entry
//! per declared function plus an optional `Directive.yaml` manifest.  Entry
//! order is not significant.
//!
//! Zip bundles (`.wasm.zip`) produced by other toolchains are not readable
//! here.  They are recognised by their magic bytes and rejected with a
//! message asking for a `.tar.gz` repackage.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::error::{Result, SandboxError};

/// Archive entry holding the directive manifest.
pub const DIRECTIVE_ENTRY: &str = "Directive.yaml";

/// Suffix of every module entry.
pub const RUNNABLE_SUFFIX: &str = ".wasm";

/// Local file header signature that opens a zip archive.
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// One module inside a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleEntry {
    /// Entry name, including the `.wasm` suffix.
    pub name: String,
    /// Module bytes.
    pub raw: Vec<u8>,
}

impl BundleEntry {
    /// Create an entry, appending `.wasm` to `name` if it is missing.
    pub fn new(name: impl Into<String>, raw: Vec<u8>) -> Self {
        let mut name = name.into();
        if !name.ends_with(RUNNABLE_SUFFIX) {
            name.push_str(RUNNABLE_SUFFIX);
        }
        Self { name, raw }
    }

    /// The function this module implements: the entry name without `.wasm`.
    pub fn function_name(&self) -> &str {
        self.name.strip_suffix(RUNNABLE_SUFFIX).unwrap_or(&self.name)
    }
}

/// The contents of a bundle archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bundle {
    pub runnables: Vec<BundleEntry>,
    /// Raw `Directive.yaml` bytes, if the bundle carries one.
    pub directive: Option<Vec<u8>>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_runnable(mut self, name: impl Into<String>, raw: Vec<u8>) -> Self {
        self.runnables.push(BundleEntry::new(name, raw));
        self
    }

    pub fn with_directive(mut self, directive: impl Into<Vec<u8>>) -> Self {
        self.directive = Some(directive.into());
        self
    }

    /// Look up a module by function name.
    pub fn runnable(&self, function: &str) -> Option<&BundleEntry> {
        self.runnables.iter().find(|e| e.function_name() == function)
    }

    /// Write the bundle to `path`, replacing any existing file.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()?;

        tracing::info!(
            path = %path.as_ref().display(),
            runnables = self.runnables.len(),
            directive = self.directive.is_some(),
            "bundle written"
        );
        Ok(())
    }

    /// Read a bundle from `path`.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let bundle = Self::read_from(BufReader::new(file))?;

        tracing::debug!(
            path = %path.as_ref().display(),
            runnables = bundle.runnables.len(),
            "bundle read"
        );
        Ok(bundle)
    }

    /// Write the bundle as a `.tar.gz` stream.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut builder = tar::Builder::new(GzEncoder::new(writer, Compression::default()));

        for entry in &self.runnables {
            check_entry_name(&entry.name)?;
            append(&mut builder, &entry.name, &entry.raw)?;
        }
        if let Some(directive) = &self.directive {
            append(&mut builder, DIRECTIVE_ENTRY, directive)?;
        }

        builder.into_inner()?.finish()?;
        Ok(())
    }

    /// Read a bundle from a `.tar.gz` stream.
    ///
    /// Entries that are neither modules nor the manifest are skipped.  A zip
    /// stream is rejected before decompression starts.
    pub fn read_from<R: Read>(reader: R) -> Result<Self> {
        let mut reader = BufReader::new(reader);
        if reader.fill_buf()?.starts_with(ZIP_MAGIC) {
            return Err(SandboxError::Bundle {
                reason: "zip bundles (.wasm.zip) are not supported; repackage as .tar.gz".into(),
            });
        }

        let mut archive = tar::Archive::new(GzDecoder::new(reader));
        let mut bundle = Self::new();

        for entry in archive.entries()? {
            let mut entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }

            let path = entry.path()?.to_string_lossy().into_owned();
            let name = path.trim_start_matches("./").to_owned();

            let mut raw = Vec::new();
            entry.read_to_end(&mut raw)?;

            if name == DIRECTIVE_ENTRY {
                if bundle.directive.is_some() {
                    return Err(SandboxError::Bundle {
                        reason: format!("duplicate {DIRECTIVE_ENTRY}"),
                    });
                }
                bundle.directive = Some(raw);
            } else if name.ends_with(RUNNABLE_SUFFIX) {
                check_entry_name(&name)?;
                if bundle.runnables.iter().any(|e| e.name == name) {
                    return Err(SandboxError::Bundle {
                        reason: format!("duplicate entry `{name}`"),
                    });
                }
                bundle.runnables.push(BundleEntry { name, raw });
            } else {
                tracing::debug!(entry = %name, "skipping unrecognised bundle entry");
            }
        }

        Ok(bundle)
    }
}

/// Write `runnables` and an optional directive to a bundle at `path`.
pub fn write_bundle(path: impl AsRef<Path>, runnables: &[BundleEntry], directive: Option<&[u8]>) -> Result<()> {
    Bundle {
        runnables: runnables.to_vec(),
        directive: directive.map(<[u8]>::to_vec),
    }
    .write(path)
}

/// Read the bundle at `path`.
pub fn read_bundle(path: impl AsRef<Path>) -> Result<Bundle> {
    Bundle::read(path)
}

fn append<W: Write>(builder: &mut tar::Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_entry_type(tar::EntryType::Regular);
    builder.append_data(&mut header, name, data)?;
    Ok(())
}

fn check_entry_name(name: &str) -> Result<()> {
    let stem = name.strip_suffix(RUNNABLE_SUFFIX).unwrap_or(name);
    if stem.is_empty() || name.contains(['/', '\\']) {
        return Err(SandboxError::Bundle {
            reason: format!("invalid runnable name `{name}`"),
        });
    }
    Ok(())
}
