//! Compatibility patcher
//!
//! Rewrites a converted module's import section so that references to
//! platform APIs absent on the host resolve against the shim namespace
//! instead. Import *module* strings are direct type references and are
//! replaced on exact match; import *field* strings are composite
//! descriptors and only the matching substring is replaced. Everything
//! outside the import section passes through byte-for-byte.
//!
//! The pass is pure and idempotent: strings already under the shim prefix
//! are never re-prefixed, and a module without any match is returned
//! unchanged, byte-for-byte.

use crate::core::error::{BridgeError, Result};
use crate::loader::wasmbin::{
    self, read_name, read_var_u32, write_name, write_var_u32, SECTION_IMPORT,
};

/// Substitution table: platform type paths to redirect into the shim
/// namespace. Injected configuration, not hardcoded logic.
#[derive(Debug, Clone)]
pub struct RewriteTable {
    shim_prefix: String,
    targets: Vec<String>,
}

impl RewriteTable {
    pub fn new(shim_prefix: impl Into<String>, targets: Vec<String>) -> Self {
        Self {
            shim_prefix: shim_prefix.into(),
            targets,
        }
    }

    /// The platform APIs known to be unavailable or semantically different
    /// on the host, redirected under `compat/replace`.
    pub fn platform_defaults() -> Self {
        Self::new(
            "compat/replace",
            vec![
                "platform/text/simple_date_format".to_string(),
                "platform/os/system_clock".to_string(),
                "platform/net/cookie_manager".to_string(),
            ],
        )
    }

    pub fn shim_prefix(&self) -> &str {
        &self.shim_prefix
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    fn shimmed(&self, target: &str) -> String {
        format!("{}/{}", self.shim_prefix, target)
    }

    /// Exact-match replacement for a direct type reference.
    /// Returns None when nothing changes.
    pub fn replace_direct(&self, reference: &str) -> Option<String> {
        if reference.starts_with(&format!("{}/", self.shim_prefix)) {
            return None;
        }
        self.targets
            .iter()
            .find(|target| reference == target.as_str())
            .map(|target| self.shimmed(target))
    }

    /// Substring replacement inside a composite descriptor, leaving the rest
    /// intact. Occurrences already preceded by the shim prefix are skipped.
    /// Returns None when nothing changes.
    pub fn replace_embedded(&self, descriptor: &str) -> Option<String> {
        let prefixed = format!("{}/", self.shim_prefix);
        let mut out = descriptor.to_string();
        let mut changed = false;

        for target in &self.targets {
            let mut rebuilt = String::with_capacity(out.len());
            let mut rest = out.as_str();
            loop {
                match rest.find(target.as_str()) {
                    Some(index) => {
                        rebuilt.push_str(&rest[..index]);
                        if rebuilt.ends_with(&prefixed) {
                            rebuilt.push_str(target);
                        } else {
                            rebuilt.push_str(&self.shimmed(target));
                            changed = true;
                        }
                        rest = &rest[index + target.len()..];
                    }
                    None => {
                        rebuilt.push_str(rest);
                        break;
                    }
                }
            }
            out = rebuilt;
        }

        if changed {
            Some(out)
        } else {
            None
        }
    }
}

/// One parsed import entry: the two strings plus the opaque tail describing
/// the imported item (kind byte and its immediates).
struct ImportEntry {
    module: String,
    field: String,
    tail: Vec<u8>,
}

/// Apply the substitution table to a module's import section.
///
/// Returns the input unchanged (same bytes) when no import matches.
pub fn patch_module(bytes: &[u8], table: &RewriteTable) -> Result<Vec<u8>> {
    let module = wasmbin::parse_module(bytes)?;

    let mut sections = module.sections;
    let mut changed = false;

    for section in sections.iter_mut() {
        if section.id != SECTION_IMPORT {
            continue;
        }

        let entries = parse_import_section(&section.payload)?;
        let mut rewritten = Vec::with_capacity(entries.len());
        let mut section_changed = false;

        for entry in entries {
            let module_name = match table.replace_direct(&entry.module) {
                Some(replacement) => {
                    section_changed = true;
                    replacement
                }
                None => entry.module,
            };
            let field_name = match table.replace_embedded(&entry.field) {
                Some(replacement) => {
                    section_changed = true;
                    replacement
                }
                None => entry.field,
            };
            rewritten.push(ImportEntry {
                module: module_name,
                field: field_name,
                tail: entry.tail,
            });
        }

        if section_changed {
            section.payload = encode_import_section(&rewritten);
            changed = true;
        }
    }

    if !changed {
        return Ok(bytes.to_vec());
    }
    Ok(wasmbin::encode_module(&sections))
}

fn parse_import_section(payload: &[u8]) -> Result<Vec<ImportEntry>> {
    let mut offset = 0;
    let count = read_var_u32(payload, &mut offset)?;
    let mut entries = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let module = read_name(payload, &mut offset)?;
        let field = read_name(payload, &mut offset)?;
        let tail_start = offset;
        skip_import_description(payload, &mut offset)?;
        entries.push(ImportEntry {
            module,
            field,
            tail: payload[tail_start..offset].to_vec(),
        });
    }

    if offset != payload.len() {
        return Err(BridgeError::Conversion(format!(
            "import section has {} trailing bytes",
            payload.len() - offset
        )));
    }
    Ok(entries)
}

/// Advance past one import description (kind byte + immediates)
fn skip_import_description(payload: &[u8], offset: &mut usize) -> Result<()> {
    let kind = *payload
        .get(*offset)
        .ok_or_else(|| BridgeError::Conversion("truncated import entry".into()))?;
    *offset += 1;

    match kind {
        // function: type index
        0x00 => {
            read_var_u32(payload, offset)?;
        }
        // table: reference type + limits
        0x01 => {
            *offset += 1;
            skip_limits(payload, offset)?;
        }
        // memory: limits
        0x02 => {
            skip_limits(payload, offset)?;
        }
        // global: value type + mutability
        0x03 => {
            *offset += 2;
        }
        other => {
            return Err(BridgeError::Conversion(format!(
                "unknown import kind: {:#04x}",
                other
            )));
        }
    }

    if *offset > payload.len() {
        return Err(BridgeError::Conversion("truncated import entry".into()));
    }
    Ok(())
}

fn skip_limits(payload: &[u8], offset: &mut usize) -> Result<()> {
    let flags = *payload
        .get(*offset)
        .ok_or_else(|| BridgeError::Conversion("truncated limits".into()))?;
    *offset += 1;
    read_var_u32(payload, offset)?;
    if flags & 0x01 != 0 {
        read_var_u32(payload, offset)?;
    }
    Ok(())
}

fn encode_import_section(entries: &[ImportEntry]) -> Vec<u8> {
    let mut payload = Vec::new();
    write_var_u32(&mut payload, entries.len() as u32);
    for entry in entries {
        write_name(&mut payload, &entry.module);
        write_name(&mut payload, &entry.field);
        payload.extend_from_slice(&entry.tail);
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::wasmbin::testutil::{custom_payload, module_with_sections};

    fn table() -> RewriteTable {
        RewriteTable::platform_defaults()
    }

    /// A function import entry with type index 0
    fn func_import(module: &str, field: &str) -> Vec<u8> {
        let mut out = Vec::new();
        write_name(&mut out, module);
        write_name(&mut out, field);
        out.push(0x00);
        write_var_u32(&mut out, 0);
        out
    }

    fn import_section(entries: &[Vec<u8>]) -> Vec<u8> {
        let mut payload = Vec::new();
        write_var_u32(&mut payload, entries.len() as u32);
        for entry in entries {
            payload.extend_from_slice(entry);
        }
        payload
    }

    fn module_with_imports(entries: &[Vec<u8>]) -> Vec<u8> {
        module_with_sections(&[
            (1, vec![0x00]),
            (SECTION_IMPORT, import_section(entries)),
            (0, custom_payload("producers", b"x")),
        ])
    }

    #[test]
    fn test_replace_direct() {
        let table = table();
        assert_eq!(
            table.replace_direct("platform/os/system_clock").as_deref(),
            Some("compat/replace/platform/os/system_clock")
        );
        assert_eq!(table.replace_direct("env"), None);
        // Already shimmed references are left alone
        assert_eq!(
            table.replace_direct("compat/replace/platform/os/system_clock"),
            None
        );
    }

    #[test]
    fn test_replace_embedded_keeps_rest_of_descriptor() {
        let table = table();
        let descriptor = "new:platform/text/simple_date_format(str)->handle";
        assert_eq!(
            table.replace_embedded(descriptor).as_deref(),
            Some("new:compat/replace/platform/text/simple_date_format(str)->handle")
        );
    }

    #[test]
    fn test_replace_embedded_is_idempotent() {
        let table = table();
        let descriptor = "new:platform/text/simple_date_format(str)->handle";
        let once = table.replace_embedded(descriptor).unwrap();
        assert_eq!(table.replace_embedded(&once), None);
    }

    #[test]
    fn test_patch_rewrites_listed_imports() {
        let bytes = module_with_imports(&[
            func_import("platform/os/system_clock", "now_millis"),
            func_import("env", "memcpy"),
        ]);

        let patched = patch_module(&bytes, &table()).unwrap();
        let module = wasmbin::parse_module(&patched).unwrap();
        let imports = parse_import_section(
            &module
                .sections
                .iter()
                .find(|s| s.id == SECTION_IMPORT)
                .unwrap()
                .payload,
        )
        .unwrap();

        assert_eq!(imports[0].module, "compat/replace/platform/os/system_clock");
        assert_eq!(imports[0].field, "now_millis");
        assert_eq!(imports[1].module, "env");
    }

    #[test]
    fn test_patch_is_idempotent_byte_for_byte() {
        let bytes = module_with_imports(&[
            func_import("platform/os/system_clock", "now_millis"),
            func_import(
                "env",
                "call:platform/net/cookie_manager.clear",
            ),
        ]);

        let once = patch_module(&bytes, &table()).unwrap();
        let twice = patch_module(&once, &table()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_patch_leaves_unmatched_module_byte_identical() {
        let bytes = module_with_imports(&[
            func_import("env", "memcpy"),
            func_import("wasi_snapshot_preview1", "fd_write"),
        ]);

        let patched = patch_module(&bytes, &table()).unwrap();
        assert_eq!(patched, bytes);
    }

    #[test]
    fn test_patch_preserves_non_import_sections() {
        let bytes = module_with_imports(&[func_import("platform/os/system_clock", "now_millis")]);
        let patched = patch_module(&bytes, &table()).unwrap();

        let before = wasmbin::parse_module(&bytes).unwrap();
        let after = wasmbin::parse_module(&patched).unwrap();
        assert_eq!(before.sections[0], after.sections[0]);
        assert_eq!(before.sections[2], after.sections[2]);
    }

    #[test]
    fn test_patch_rejects_malformed_import_section() {
        let bytes = module_with_sections(&[(SECTION_IMPORT, vec![0x01, 0xff])]);
        assert!(matches!(
            patch_module(&bytes, &table()),
            Err(BridgeError::Conversion(_))
        ));
    }

    #[test]
    fn test_non_function_import_kinds_pass_through() {
        // memory import: limits {flags=1, min=1, max=2}
        let mut memory_import = Vec::new();
        write_name(&mut memory_import, "env");
        write_name(&mut memory_import, "memory");
        memory_import.push(0x02);
        memory_import.extend_from_slice(&[0x01, 0x01, 0x02]);

        // global import: i32 mutable
        let mut global_import = Vec::new();
        write_name(&mut global_import, "platform/os/system_clock");
        write_name(&mut global_import, "tick_rate");
        global_import.push(0x03);
        global_import.extend_from_slice(&[0x7f, 0x01]);

        let bytes = module_with_imports(&[memory_import, global_import]);
        let patched = patch_module(&bytes, &table()).unwrap();

        let module = wasmbin::parse_module(&patched).unwrap();
        let imports = parse_import_section(
            &module
                .sections
                .iter()
                .find(|s| s.id == SECTION_IMPORT)
                .unwrap()
                .payload,
        )
        .unwrap();
        assert_eq!(imports[0].module, "env");
        assert_eq!(
            imports[1].module,
            "compat/replace/platform/os/system_clock"
        );
        assert_eq!(imports[1].tail, vec![0x03, 0x7f, 0x01]);
    }
}
