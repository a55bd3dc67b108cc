//! Format converter
//!
//! Turns a validated package into a directly loadable module archive:
//! extracts the first embedded bytecode payload, re-emits it with sections
//! in canonical order and debug information stripped, applies the
//! compatibility patcher, then packs the result together with the package's
//! assets (signing metadata excluded). Structural faults that do not
//! prevent a usable module are recorded to a diagnostics file instead of
//! aborting.

use crate::core::error::{BridgeError, Result};
use crate::loader::package::PackageMetadata;
use crate::loader::patch::{patch_module, RewriteTable};
use crate::loader::wasmbin::{self, Section, SECTION_CUSTOM};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use zip::write::SimpleFileOptions;

/// File extension of produced module archives
pub const MODULE_EXT: &str = "mod";

/// Custom sections dropped during conversion
const DEBUG_SECTION_NAMES: [&str; 2] = ["name", "sourceMappingURL"];

/// Keep alphanumerics and `. - _ +`; everything else becomes `_`
pub fn sanitize_component(value: &str) -> String {
    let out: String = value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_' | '+') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() {
        "_".to_string()
    } else {
        out
    }
}

/// Deterministic archive base name: `{identity}-v{version}`, sanitized
pub fn module_base_name(pkg: &str, version: &str) -> String {
    format!(
        "{}-v{}",
        sanitize_component(pkg),
        sanitize_component(version)
    )
}

/// Convert a validated package into a module archive inside `out_dir`.
///
/// Returns the archive path. The archive is written to a temporary file and
/// atomically renamed into place so a concurrent load never observes a
/// half-written archive.
pub fn convert_package(
    package_path: &Path,
    metadata: &PackageMetadata,
    out_dir: &Path,
    rewrites: &RewriteTable,
) -> Result<PathBuf> {
    std::fs::create_dir_all(out_dir)?;

    let base_name = module_base_name(&metadata.pkg, &metadata.version);
    let module_path = out_dir.join(format!("{}.{}", base_name, MODULE_EXT));

    let payload = extract_payload(package_path)?;

    let mut diagnostics = Vec::new();
    let converted = rewrite_payload(&payload, &mut diagnostics)?;
    let patched = patch_module(&converted, rewrites)?;

    if !diagnostics.is_empty() {
        let report_path = out_dir.join(format!("{}-error.txt", base_name));
        error!(
            pkg = %metadata.pkg,
            report = %report_path.display(),
            "Conversion recorded {} diagnostic(s), see report file",
            diagnostics.len()
        );
        if let Err(e) = std::fs::write(&report_path, diagnostics.join("\n")) {
            warn!(error = %e, "Failed to write conversion diagnostics");
        }
    }

    write_archive(package_path, &module_path, &patched)?;

    info!(
        pkg = %metadata.pkg,
        module = %module_path.display(),
        "Converted package to module archive"
    );
    Ok(module_path)
}

/// Locate and read the first embedded bytecode payload
fn extract_payload(package_path: &Path) -> Result<Vec<u8>> {
    let file = std::fs::File::open(package_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| BridgeError::Validation(format!("not a package archive: {}", e)))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| BridgeError::Conversion(format!("unreadable package entry: {}", e)))?;
        if entry.is_dir() || !entry.name().ends_with(".wasm") {
            continue;
        }
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        return Ok(bytes);
    }

    Err(BridgeError::MissingPayload(format!(
        "no bytecode payload inside {}",
        package_path.display()
    )))
}

/// Re-emit the payload with known sections in canonical ascending order,
/// debug custom sections removed, and any tolerated structural fault pushed
/// onto `diagnostics`.
fn rewrite_payload(payload: &[u8], diagnostics: &mut Vec<String>) -> Result<Vec<u8>> {
    let module = wasmbin::parse_module(payload)?;
    diagnostics.extend(module.diagnostics);

    let (mut known, custom): (Vec<Section>, Vec<Section>) = module
        .sections
        .into_iter()
        .partition(|section| section.id != SECTION_CUSTOM);

    // Stable sort: duplicate ids keep their relative order
    known.sort_by_key(|section| section.id);

    let kept_custom: Vec<Section> = custom
        .into_iter()
        .filter(|section| match section.custom_name() {
            Some(name) => {
                let is_debug =
                    DEBUG_SECTION_NAMES.contains(&name.as_str()) || name.starts_with(".debug");
                !is_debug
            }
            None => {
                diagnostics.push("custom section with unreadable name dropped".to_string());
                false
            }
        })
        .collect();

    known.extend(kept_custom);
    Ok(wasmbin::encode_module(&known))
}

/// Pack the converted module plus the package's assets into the archive
fn write_archive(package_path: &Path, module_path: &Path, module_bytes: &[u8]) -> Result<()> {
    let tmp_path = module_path.with_extension(format!("{}.tmp", MODULE_EXT));

    let result = (|| -> Result<()> {
        let tmp = std::fs::File::create(&tmp_path)?;
        let mut writer = zip::ZipWriter::new(tmp);
        let options = SimpleFileOptions::default();

        writer
            .start_file("module.wasm", options)
            .map_err(|e| BridgeError::Conversion(format!("archive write failed: {}", e)))?;
        writer.write_all(module_bytes)?;

        copy_assets(package_path, &mut writer, options)?;

        writer
            .finish()
            .map_err(|e| BridgeError::Conversion(format!("archive write failed: {}", e)))?;
        Ok(())
    })();

    if let Err(e) = result {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e);
    }

    std::fs::rename(&tmp_path, module_path)?;
    Ok(())
}

/// Copy `assets/` entries from the package, skipping signing metadata
fn copy_assets(
    package_path: &Path,
    writer: &mut zip::ZipWriter<std::fs::File>,
    options: SimpleFileOptions,
) -> Result<()> {
    let file = std::fs::File::open(package_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| BridgeError::Validation(format!("not a package archive: {}", e)))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| BridgeError::Conversion(format!("unreadable package entry: {}", e)))?;
        let name = entry.name().to_string();
        if entry.is_dir() || name.starts_with("META-INF/") {
            continue;
        }
        if !name.starts_with("assets/") {
            continue;
        }

        writer
            .start_file(name.as_str(), options)
            .map_err(|e| BridgeError::Conversion(format!("archive write failed: {}", e)))?;
        std::io::copy(&mut entry, writer)?;
    }
    Ok(())
}
