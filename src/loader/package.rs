//! Package inspector
//!
//! Pure read over an extension package archive: extracts the manifest,
//! validates compatibility (library version range, required feature flag,
//! entry points) and normalizes the metadata. No side effects.

use crate::core::error::{BridgeError, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Feature flag a package must declare to be loadable by the bridge
pub const EXTENSION_FEATURE: &str = "yomu.extension";

/// Supported extension library version range, inclusive. The library
/// version is the package version with its last segment dropped.
pub const LIB_VERSION_MIN: f64 = 1.3;
pub const LIB_VERSION_MAX: f64 = 1.5;

/// Raw manifest as embedded in the package
#[derive(Debug, Deserialize)]
struct PackageManifest {
    package: String,
    #[serde(default)]
    name: String,
    version: String,
    #[serde(default)]
    features: Vec<String>,
    #[serde(default)]
    source_class: Option<String>,
    #[serde(default)]
    factory_class: Option<String>,
    #[serde(default)]
    nsfw: Option<u8>,
}

/// Normalized, validated package metadata
#[derive(Debug, Clone)]
pub struct PackageMetadata {
    pub pkg: String,
    pub name: String,
    pub version: String,
    pub lib_version: f64,
    pub nsfw: bool,
    pub source_class: Option<String>,
    pub factory_class: Option<String>,
    /// SHA-256 of the first signing-block certificate, when present
    pub signature_hash: Option<String>,
}

/// Inspect and validate a package archive
pub fn inspect(package_path: &Path) -> Result<PackageMetadata> {
    let file = std::fs::File::open(package_path).map_err(|e| {
        BridgeError::Validation(format!(
            "cannot open package {}: {}",
            package_path.display(),
            e
        ))
    })?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| BridgeError::Validation(format!("not a package archive: {}", e)))?;

    let manifest = read_manifest(&mut archive)?;
    let lib_version = validate(&manifest)?;

    let source_class = normalize_class(&manifest.package, manifest.source_class.as_deref());
    let factory_class = normalize_class(&manifest.package, manifest.factory_class.as_deref());
    if source_class.is_none() && factory_class.is_none() {
        return Err(BridgeError::Validation(format!(
            "package {} declares no entry point class",
            manifest.package
        )));
    }

    let signature_hash = signing_block_hash(&mut archive);

    Ok(PackageMetadata {
        pkg: manifest.package,
        name: manifest.name,
        version: manifest.version,
        lib_version,
        nsfw: manifest.nsfw.unwrap_or(0) == 1,
        source_class,
        factory_class,
        signature_hash,
    })
}

fn read_manifest(archive: &mut zip::ZipArchive<std::fs::File>) -> Result<PackageManifest> {
    let mut entry = archive
        .by_name("manifest.json")
        .map_err(|_| BridgeError::Validation("manifest.json missing from package".into()))?;
    let mut raw = String::new();
    entry.read_to_string(&mut raw)?;
    serde_json::from_str(&raw)
        .map_err(|e| BridgeError::Validation(format!("invalid manifest.json: {}", e)))
}

/// Check the version marker and the feature flag, returning the parsed
/// library version
fn validate(manifest: &PackageManifest) -> Result<f64> {
    let marker = lib_version_marker(&manifest.version);
    let lib_version: f64 = marker.parse().map_err(|_| {
        BridgeError::Validation(format!(
            "unsupported extension library version: {:?} (from {})",
            marker, manifest.version
        ))
    })?;
    if !(LIB_VERSION_MIN..=LIB_VERSION_MAX).contains(&lib_version) {
        return Err(BridgeError::Validation(format!(
            "unsupported extension library version: {}. Supported range is {} - {}.",
            lib_version, LIB_VERSION_MIN, LIB_VERSION_MAX
        )));
    }

    if !manifest.features.iter().any(|f| f == EXTENSION_FEATURE) {
        return Err(BridgeError::Validation(format!(
            "package {} does not declare the {} feature",
            manifest.package, EXTENSION_FEATURE
        )));
    }

    Ok(lib_version)
}

/// The version string minus its last dot-segment: "1.4.2" -> "1.4"
fn lib_version_marker(version: &str) -> &str {
    version.rsplit_once('.').map_or(version, |(head, _)| head)
}

/// Expand a leading `.` class name against the package identity
fn normalize_class(pkg: &str, class: Option<&str>) -> Option<String> {
    let class = class?.trim();
    if class.is_empty() {
        return None;
    }
    if let Some(rest) = class.strip_prefix('.') {
        Some(format!("{}.{}", pkg, rest))
    } else {
        Some(class.to_string())
    }
}

/// SHA-256 of the first certificate entry in the signing block, if any
fn signing_block_hash(archive: &mut zip::ZipArchive<std::fs::File>) -> Option<String> {
    let cert_name = (0..archive.len()).find_map(|i| {
        let entry = archive.by_index(i).ok()?;
        let name = entry.name().to_string();
        let is_cert = name.starts_with("META-INF/")
            && (name.ends_with(".RSA") || name.ends_with(".DSA") || name.ends_with(".EC"));
        is_cert.then_some(name)
    })?;

    let mut entry = archive.by_name(&cert_name).ok()?;
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes).ok()?;

    let digest = Sha256::digest(&bytes);
    Some(format!("{:x}", digest))
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::io::Write;
    use std::path::Path;
    use zip::write::SimpleFileOptions;

    /// Build a package archive on disk for tests
    pub fn write_package(
        path: &Path,
        manifest: &serde_json::Value,
        payload: Option<&[u8]>,
        assets: &[(&str, &[u8])],
    ) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();

        writer.start_file("manifest.json", options).unwrap();
        writer
            .write_all(serde_json::to_string(manifest).unwrap().as_bytes())
            .unwrap();

        if let Some(payload) = payload {
            writer.start_file("code/extension.wasm", options).unwrap();
            writer.write_all(payload).unwrap();
        }

        for (name, data) in assets {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }

        writer.finish().unwrap();
    }

    pub fn manifest(pkg: &str, version: &str) -> serde_json::Value {
        serde_json::json!({
            "package": pkg,
            "name": "Example",
            "version": version,
            "features": [super::EXTENSION_FEATURE],
            "source_class": format!("{}.ExampleSource", pkg),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::{manifest, write_package};
    use super::*;
    use tempfile::TempDir;

    fn minimal_wasm() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&crate::loader::wasmbin::MAGIC);
        bytes.extend_from_slice(&crate::loader::wasmbin::VERSION);
        bytes
    }

    fn inspect_with_manifest(manifest: serde_json::Value) -> Result<PackageMetadata> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pkg.pkg");
        write_package(&path, &manifest, Some(&minimal_wasm()), &[]);
        inspect(&path)
    }

    #[test]
    fn test_inspect_valid_package() {
        let meta = inspect_with_manifest(manifest("com.example.foo", "1.4.2")).unwrap();
        assert_eq!(meta.pkg, "com.example.foo");
        assert_eq!(meta.version, "1.4.2");
        assert_eq!(meta.lib_version, 1.4);
        assert!(!meta.nsfw);
        assert_eq!(
            meta.source_class.as_deref(),
            Some("com.example.foo.ExampleSource")
        );
    }

    #[test]
    fn test_version_range_endpoints_accepted() {
        assert!(inspect_with_manifest(manifest("com.example.foo", "1.3.0")).is_ok());
        assert!(inspect_with_manifest(manifest("com.example.foo", "1.5.9")).is_ok());
    }

    #[test]
    fn test_version_outside_range_rejected() {
        for version in ["1.2.9", "1.6.0"] {
            let err = inspect_with_manifest(manifest("com.example.foo", version)).unwrap_err();
            match err {
                BridgeError::Validation(msg) => {
                    assert!(msg.contains("library version"), "message: {}", msg)
                }
                other => panic!("expected ValidationError, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_unparsable_version_names_offending_value() {
        let err = inspect_with_manifest(manifest("com.example.foo", "abc.def")).unwrap_err();
        match err {
            BridgeError::Validation(msg) => assert!(msg.contains("abc")),
            other => panic!("expected ValidationError, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_feature_flag_rejected() {
        let mut m = manifest("com.example.foo", "1.4.0");
        m["features"] = serde_json::json!(["some.other.feature"]);
        let err = inspect_with_manifest(m).unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
    }

    #[test]
    fn test_missing_entry_points_rejected() {
        let mut m = manifest("com.example.foo", "1.4.0");
        m.as_object_mut().unwrap().remove("source_class");
        let err = inspect_with_manifest(m).unwrap_err();
        match err {
            BridgeError::Validation(msg) => assert!(msg.contains("entry point")),
            other => panic!("expected ValidationError, got {:?}", other),
        }
    }

    #[test]
    fn test_relative_class_name_expanded() {
        let mut m = manifest("com.example.foo", "1.4.0");
        m["source_class"] = serde_json::json!(".RelativeSource");
        let meta = inspect_with_manifest(m).unwrap();
        assert_eq!(
            meta.source_class.as_deref(),
            Some("com.example.foo.RelativeSource")
        );
    }

    #[test]
    fn test_factory_only_package_accepted() {
        let mut m = manifest("com.example.foo", "1.4.0");
        m.as_object_mut().unwrap().remove("source_class");
        m["factory_class"] = serde_json::json!("com.example.foo.Factory");
        let meta = inspect_with_manifest(m).unwrap();
        assert_eq!(meta.factory_class.as_deref(), Some("com.example.foo.Factory"));
    }

    #[test]
    fn test_missing_manifest_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pkg.pkg");
        // An archive with no manifest entry at all
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        use std::io::Write;
        writer
            .start_file("assets/readme.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"no manifest here").unwrap();
        writer.finish().unwrap();

        let err = inspect(&path).unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
    }

    #[test]
    fn test_signature_hash_extracted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pkg.pkg");
        write_package(
            &path,
            &manifest("com.example.foo", "1.4.0"),
            Some(&minimal_wasm()),
            &[("META-INF/CERT.RSA", b"certificate-bytes")],
        );

        let meta = inspect(&path).unwrap();
        assert!(meta.signature_hash.is_some());
        assert_eq!(meta.signature_hash.unwrap().len(), 64);
    }
}
