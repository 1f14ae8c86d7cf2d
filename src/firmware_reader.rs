//! Firmware package reader for CFU updates.
//!
//! Reads the firmware package, a ZIP archive containing:
//! - `*.offer.bin` - 16-byte offer record (optionally followed by vendor data)
//! - `*.payload.bin` - payload image as a stream of address-prefixed sub-records
//! - `manifest.json` - optional metadata naming the two members explicitly
//!
//! Without a manifest, members are located by their file-name suffix.

use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::config::OFFER_RECORD_SIZE;
use crate::error::{CfuError, CfuResult};
use crate::report::OfferRecord;

/// Archive member holding package metadata, when present.
const MANIFEST_NAME: &str = "manifest.json";

/// Pattern locating the offer image when no manifest names it.
pub const OFFER_IMAGE_PATTERN: &str = "*.offer.bin";

/// Pattern locating the payload image when no manifest names it.
pub const PAYLOAD_IMAGE_PATTERN: &str = "*.payload.bin";

/// Contents of a CFU firmware package.
#[derive(Debug)]
pub struct FirmwarePackage {
    /// Offer image (`*.offer.bin` contents).
    pub offer: Vec<u8>,
    /// Payload image (`*.payload.bin` contents).
    pub payload: Vec<u8>,
}

impl FirmwarePackage {
    /// Typed view of the leading 16 bytes of the offer image.
    pub fn offer_record(&self) -> CfuResult<OfferRecord> {
        OfferRecord::parse(&self.offer)
    }

    /// Payload image view for chunked access.
    pub fn payload_image(&self) -> PayloadImage<'_> {
        PayloadImage::new(&self.payload)
    }
}

/// Borrowed view of a payload image.
///
/// Sub-records never straddle the chunk boundaries the build tooling
/// emits, so callers may frame chunk by chunk or hand the whole image
/// to the framer at once.
#[derive(Debug, Clone, Copy)]
pub struct PayloadImage<'a> {
    data: &'a [u8],
}

impl<'a> PayloadImage<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Total image size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The raw sub-record stream.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    /// Iterate the image in working chunks of at most `chunk_size` bytes.
    pub fn chunks(&self, chunk_size: usize) -> impl Iterator<Item = &'a [u8]> {
        self.data.chunks(chunk_size.max(1))
    }
}

/// Raw manifest.json structure for deserialization.
#[derive(Debug, Deserialize)]
struct RawManifest {
    manifest: ManifestInner,
}

#[derive(Debug, Deserialize)]
struct ManifestInner {
    component: ComponentManifest,
    /// Component the package targets; checked against the offer record.
    #[serde(default)]
    component_id: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct ComponentManifest {
    offer_file: String,
    payload_file: String,
}

/// Read and parse a firmware package archive.
///
/// # Arguments
/// * `path` - Path to the package ZIP file
///
/// # Returns
/// The offer and payload images, validated far enough that the offer
/// record parses and neither image is empty.
pub fn read_firmware_package<P: AsRef<Path>>(path: P) -> CfuResult<FirmwarePackage> {
    let file = std::fs::File::open(path.as_ref())?;
    let mut archive = zip::ZipArchive::new(file)?;

    let manifest = read_manifest(&mut archive)?;
    let (offer_name, payload_name) = match &manifest {
        Some(m) => (m.component.offer_file.clone(), m.component.payload_file.clone()),
        None => (
            find_member(&archive, OFFER_IMAGE_PATTERN)?,
            find_member(&archive, PAYLOAD_IMAGE_PATTERN)?,
        ),
    };

    let offer = read_member(&mut archive, &offer_name)?;
    let payload = read_member(&mut archive, &payload_name)?;

    if offer.len() < OFFER_RECORD_SIZE {
        return Err(CfuError::InvalidPackage {
            reason: format!(
                "offer image '{}' is {} bytes, need at least {}",
                offer_name,
                offer.len(),
                OFFER_RECORD_SIZE
            ),
        });
    }
    if payload.is_empty() {
        return Err(CfuError::InvalidPackage {
            reason: format!("payload image '{}' is empty", payload_name),
        });
    }

    if let Some(expected) = manifest.and_then(|m| m.component_id) {
        let record = OfferRecord::parse(&offer)?;
        if record.component_id != expected {
            return Err(CfuError::InvalidPackage {
                reason: format!(
                    "manifest targets component {} but offer record carries component {}",
                    expected, record.component_id
                ),
            });
        }
    }

    Ok(FirmwarePackage { offer, payload })
}

/// Read and parse the manifest.json from the archive, if it has one.
fn read_manifest(archive: &mut zip::ZipArchive<std::fs::File>) -> CfuResult<Option<ManifestInner>> {
    let mut manifest_file = match archive.by_name(MANIFEST_NAME) {
        Ok(file) => file,
        Err(_) => return Ok(None),
    };

    let mut contents = String::new();
    manifest_file.read_to_string(&mut contents)?;

    let raw: RawManifest = serde_json::from_str(&contents)?;
    Ok(Some(raw.manifest))
}

/// Locate an archive member by glob-lite pattern.
fn find_member(archive: &zip::ZipArchive<std::fs::File>, pattern: &str) -> CfuResult<String> {
    archive
        .file_names()
        .find(|name| glob_match(pattern, name))
        .map(str::to_string)
        .ok_or_else(|| CfuError::MissingImage {
            pattern: pattern.to_string(),
        })
}

/// Read a member from the zip archive by name.
fn read_member(archive: &mut zip::ZipArchive<std::fs::File>, name: &str) -> CfuResult<Vec<u8>> {
    let mut file = archive.by_name(name).map_err(|_| CfuError::MissingImage {
        pattern: name.to_string(),
    })?;

    let mut data = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut data)?;

    Ok(data)
}

/// Match `name` against a pattern where `*` stands for any run of
/// characters. No other metacharacters.
fn glob_match(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == name,
        Some((prefix, rest)) => {
            let remainder = match name.strip_prefix(prefix) {
                Some(r) => r,
                None => return false,
            };
            if rest.is_empty() {
                return true;
            }
            remainder
                .char_indices()
                .map(|(i, _)| i)
                .chain(std::iter::once(remainder.len()))
                .any(|start| glob_match(rest, &remainder[start..]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn offer_bytes(component_id: u8) -> Vec<u8> {
        let mut offer = vec![0u8; OFFER_RECORD_SIZE];
        offer[2] = component_id;
        offer[4..8].copy_from_slice(&0x0102_0304u32.to_le_bytes());
        offer
    }

    fn payload_bytes() -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0x1000u32.to_le_bytes());
        payload.push(3);
        payload.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        payload
    }

    fn create_test_zip(dir: &TempDir, members: &[(&str, &[u8])]) -> std::path::PathBuf {
        let zip_path = dir.path().join("firmware.zip");
        let file = std::fs::File::create(&zip_path).unwrap();
        let mut zip = ZipWriter::new(file);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Stored);

        for (name, data) in members {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }

        zip.finish().unwrap();
        zip_path
    }

    const VALID_MANIFEST: &str = r#"{
        "manifest": {
            "component": {
                "offer_file": "touchpad.offer.bin",
                "payload_file": "touchpad.payload.bin"
            },
            "component_id": 42
        }
    }"#;

    #[test]
    fn test_read_package_with_manifest() {
        let dir = TempDir::new().unwrap();
        let offer = offer_bytes(42);
        let payload = payload_bytes();
        let zip_path = create_test_zip(
            &dir,
            &[
                ("manifest.json", VALID_MANIFEST.as_bytes()),
                ("touchpad.offer.bin", &offer),
                ("touchpad.payload.bin", &payload),
            ],
        );

        let package = read_firmware_package(&zip_path).unwrap();
        assert_eq!(package.offer, offer);
        assert_eq!(package.payload, payload);
        assert_eq!(package.offer_record().unwrap().component_id, 42);
    }

    #[test]
    fn test_read_package_without_manifest_uses_patterns() {
        let dir = TempDir::new().unwrap();
        let offer = offer_bytes(7);
        let payload = payload_bytes();
        let zip_path = create_test_zip(
            &dir,
            &[
                ("fw/kbd.offer.bin", &offer[..]),
                ("fw/kbd.payload.bin", &payload),
            ],
        );

        let package = read_firmware_package(&zip_path).unwrap();
        assert_eq!(package.offer, offer);
        assert_eq!(package.payload, payload);
    }

    #[test]
    fn test_missing_payload_member() {
        let dir = TempDir::new().unwrap();
        let offer = offer_bytes(7);
        let zip_path = create_test_zip(&dir, &[("kbd.offer.bin", &offer[..])]);

        let result = read_firmware_package(&zip_path);
        assert!(matches!(
            result,
            Err(CfuError::MissingImage { pattern }) if pattern == PAYLOAD_IMAGE_PATTERN
        ));
    }

    #[test]
    fn test_manifest_naming_absent_member() {
        let dir = TempDir::new().unwrap();
        let zip_path = create_test_zip(&dir, &[("manifest.json", VALID_MANIFEST.as_bytes())]);

        let result = read_firmware_package(&zip_path);
        assert!(matches!(
            result,
            Err(CfuError::MissingImage { pattern }) if pattern == "touchpad.offer.bin"
        ));
    }

    #[test]
    fn test_component_id_mismatch() {
        let dir = TempDir::new().unwrap();
        let offer = offer_bytes(9);
        let payload = payload_bytes();
        let zip_path = create_test_zip(
            &dir,
            &[
                ("manifest.json", VALID_MANIFEST.as_bytes()),
                ("touchpad.offer.bin", &offer),
                ("touchpad.payload.bin", &payload),
            ],
        );

        let result = read_firmware_package(&zip_path);
        assert!(matches!(result, Err(CfuError::InvalidPackage { .. })));
    }

    #[test]
    fn test_short_offer_image() {
        let dir = TempDir::new().unwrap();
        let payload = payload_bytes();
        let zip_path = create_test_zip(
            &dir,
            &[
                ("kbd.offer.bin", &[0u8; 8][..]),
                ("kbd.payload.bin", &payload),
            ],
        );

        let result = read_firmware_package(&zip_path);
        assert!(matches!(result, Err(CfuError::InvalidPackage { .. })));
    }

    #[test]
    fn test_empty_payload_image() {
        let dir = TempDir::new().unwrap();
        let offer = offer_bytes(7);
        let zip_path = create_test_zip(
            &dir,
            &[("kbd.offer.bin", &offer[..]), ("kbd.payload.bin", &[][..])],
        );

        let result = read_firmware_package(&zip_path);
        assert!(matches!(result, Err(CfuError::InvalidPackage { .. })));
    }

    #[test]
    fn test_invalid_manifest_json() {
        let dir = TempDir::new().unwrap();
        let zip_path = create_test_zip(&dir, &[("manifest.json", b"{ invalid json }")]);

        let result = read_firmware_package(&zip_path);
        assert!(matches!(result, Err(CfuError::Json(_))));
    }

    #[test]
    fn test_nonexistent_file() {
        let result = read_firmware_package("/nonexistent/path/firmware.zip");
        assert!(matches!(result, Err(CfuError::Io(_))));
    }

    #[test]
    fn test_payload_image_chunks() {
        let data: Vec<u8> = (0..10).collect();
        let image = PayloadImage::new(&data);
        assert_eq!(image.len(), 10);

        let chunks: Vec<&[u8]> = image.chunks(4).collect();
        assert_eq!(chunks, vec![&data[0..4], &data[4..8], &data[8..10]]);

        // A zero chunk size is clamped rather than looping forever.
        assert_eq!(image.chunks(0).count(), 10);
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*.offer.bin", "touchpad.offer.bin"));
        assert!(glob_match("*.offer.bin", "fw/nested.offer.bin"));
        assert!(glob_match("manifest.json", "manifest.json"));
        assert!(!glob_match("*.offer.bin", "touchpad.payload.bin"));
        assert!(!glob_match("*.offer.bin", "offer.bin.bak"));
        assert!(glob_match("fw/*.payload.bin", "fw/kbd.payload.bin"));
        assert!(!glob_match("fw/*.payload.bin", "other/kbd.payload.bin"));
    }
}
