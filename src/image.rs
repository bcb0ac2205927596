//! Minimal module-image backend.
//!
//! A compact container format for compiled module units, used by the CLI
//! and the test-suite so the orchestrator runs end-to-end without an
//! external binary-format dependency. Real mocking stacks supply their
//! own loader and injector through the [`ModuleLoader`] and [`Injector`]
//! seams instead.
//!
//! Image layout, all integers little-endian:
//!
//! | offset | size | field                                     |
//! |--------|------|-------------------------------------------|
//! | 0      | 4    | magic `MWIM`                              |
//! | 4      | 2    | format version (currently 1)              |
//! | 6      | 1    | flags (bit 0: instrumentation marker)     |
//! | 7      | ..   | module name: u16 length + UTF-8 bytes     |
//! | ..     | ..   | references: u16 count, each length-prefixed |
//! | ..     | rest | opaque payload, untouched here            |

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;

use crate::module::{BinaryModule, FormatError, Injector, ModuleLoader, TransformError};

const MAGIC: &[u8; 4] = b"MWIM";
const FORMAT_VERSION: u16 = 1;
const FLAG_PATCHED: u8 = 0b0000_0001;

/// File extension for module images.
pub const IMAGE_EXTENSION: &str = "mwm";

/// A parsed module image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageModule {
    flags: u8,
    name: String,
    references: BTreeSet<String>,
    payload: Vec<u8>,
}

impl ImageModule {
    /// Build a fresh, unmarked image.
    pub fn build(
        name: impl Into<String>,
        references: impl IntoIterator<Item = String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            flags: 0,
            name: name.into(),
            references: references.into_iter().collect(),
            payload: payload.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the instrumentation marker is set.
    pub fn is_marked(&self) -> bool {
        self.flags & FLAG_PATCHED != 0
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn mark(&mut self) {
        self.flags |= FLAG_PATCHED;
    }

    /// Parse an image from raw bytes; `path` is only used in error
    /// reports.
    pub fn parse(path: &Path, bytes: &[u8]) -> Result<Self, FormatError> {
        let malformed = |reason: String| FormatError::Malformed {
            path: path.to_path_buf(),
            reason,
        };

        let mut reader = Reader::new(bytes);

        let magic = reader
            .take(MAGIC.len())
            .ok_or_else(|| malformed("truncated header".into()))?;
        if magic != MAGIC {
            return Err(malformed("missing image magic".into()));
        }

        let version = reader
            .u16()
            .ok_or_else(|| malformed("truncated header".into()))?;
        if version != FORMAT_VERSION {
            return Err(malformed(format!("unsupported format version {version}")));
        }

        let flags = reader
            .u8()
            .ok_or_else(|| malformed("truncated header".into()))?;

        let name = read_string(&mut reader).map_err(&malformed)?;

        let count = reader
            .u16()
            .ok_or_else(|| malformed("truncated reference table".into()))?;
        let mut references = BTreeSet::new();
        for _ in 0..count {
            references.insert(read_string(&mut reader).map_err(&malformed)?);
        }

        Ok(Self {
            flags,
            name,
            references,
            payload: reader.rest().to_vec(),
        })
    }

    /// Serialize the image to bytes.
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(16 + self.payload.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.push(self.flags);
        write_string(&mut out, &self.name)?;

        let count = u16::try_from(self.references.len())
            .map_err(|_| too_large("more than 65535 references"))?;
        out.extend_from_slice(&count.to_le_bytes());
        for reference in &self.references {
            write_string(&mut out, reference)?;
        }

        out.extend_from_slice(&self.payload);
        Ok(out)
    }
}

impl BinaryModule for ImageModule {
    fn references(&self) -> &BTreeSet<String> {
        &self.references
    }

    fn write(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.encode()?)
    }
}

/// Opens `.mwm` module images.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageLoader;

impl ModuleLoader for ImageLoader {
    type Module = ImageModule;

    fn open(&self, path: &Path) -> Result<ImageModule, FormatError> {
        let bytes = fs::read(path).map_err(|source| FormatError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        ImageModule::parse(path, &bytes)
    }

    fn extension(&self) -> &'static str {
        IMAGE_EXTENSION
    }
}

/// Marker-stamping injector for module images.
///
/// Sets the instrumentation flag in the image header. The flag doubles as
/// the already-patched probe, so a marked image is never stamped twice.
#[derive(Debug, Clone, Copy, Default)]
pub struct HookInjector;

impl Injector<ImageModule> for HookInjector {
    fn is_patched(&self, module: &ImageModule) -> bool {
        module.is_marked()
    }

    fn patch(&self, module: &mut ImageModule) -> Result<(), TransformError> {
        if module.is_marked() {
            return Err(TransformError::Rejected(format!(
                "{} is already instrumented",
                module.name()
            )));
        }
        module.mark();
        Ok(())
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        if end > self.bytes.len() {
            return None;
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    fn rest(self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }
}

fn read_string(reader: &mut Reader<'_>) -> Result<String, String> {
    let len = reader.u16().ok_or("truncated string length")? as usize;
    let bytes = reader.take(len).ok_or("truncated string")?;
    String::from_utf8(bytes.to_vec()).map_err(|_| "string is not valid UTF-8".to_string())
}

fn write_string(out: &mut Vec<u8>, s: &str) -> io::Result<()> {
    let len = u16::try_from(s.len()).map_err(|_| too_large("string longer than 65535 bytes"))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn too_large(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, what)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ImageModule {
        ImageModule::build(
            "core",
            ["alpha".to_string(), "beta".to_string()],
            b"payload bytes".to_vec(),
        )
    }

    #[test]
    fn encode_parse_round_trip() {
        let image = sample();
        let bytes = image.encode().unwrap();
        let parsed = ImageModule::parse(Path::new("core.mwm"), &bytes).unwrap();
        assert_eq!(parsed, image);
    }

    #[test]
    fn parse_rejects_bad_magic() {
        let mut bytes = sample().encode().unwrap();
        bytes[0] = b'X';
        let result = ImageModule::parse(Path::new("core.mwm"), &bytes);
        assert!(matches!(result, Err(FormatError::Malformed { .. })));
    }

    #[test]
    fn parse_rejects_unsupported_version() {
        let mut bytes = sample().encode().unwrap();
        bytes[4] = 9;
        let result = ImageModule::parse(Path::new("core.mwm"), &bytes);
        assert!(matches!(
            result,
            Err(FormatError::Malformed { reason, .. }) if reason.contains("version")
        ));
    }

    #[test]
    fn parse_rejects_truncated_image() {
        let bytes = sample().encode().unwrap();
        let result = ImageModule::parse(Path::new("core.mwm"), &bytes[..6]);
        assert!(matches!(result, Err(FormatError::Malformed { .. })));
    }

    #[test]
    fn injector_marks_once() {
        let mut image = sample();
        assert!(!HookInjector.is_patched(&image));

        HookInjector.patch(&mut image).unwrap();
        assert!(HookInjector.is_patched(&image));

        // A second application violates the transform contract.
        let result = HookInjector.patch(&mut image);
        assert!(matches!(result, Err(TransformError::Rejected(_))));
    }

    #[test]
    fn marking_preserves_payload_and_references() {
        let mut image = sample();
        HookInjector.patch(&mut image).unwrap();

        assert_eq!(image.payload(), b"payload bytes");
        assert_eq!(image.references().len(), 2);
        assert_eq!(image.name(), "core");
    }

    #[test]
    fn loader_reports_missing_file() {
        let temp = tempfile::tempdir().unwrap();
        let result = ImageLoader.open(&temp.path().join("absent.mwm"));
        assert!(matches!(result, Err(FormatError::Io { .. })));
    }
}
