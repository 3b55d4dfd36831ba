//! Descriptor Reader
//!
//! Reads the scene descriptor that sits next to a script (same base name, descriptor
//! extension) and flattens its display list into the publicly scoped members, in
//! document order.

use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Result, TransformError};
use crate::type_map::{is_known_kind, map_kind};

// ═══════════════════════════════════════════════════════════════════════════════
// DOCUMENT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorDocument {
    #[serde(default)]
    pub display_list: Vec<DisplayItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DisplayItem {
    #[serde(default)]
    pub label: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub list: Vec<DisplayItem>,
}

/// Visibility of an object in the generated scene code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    Public,
    Class,
    Method,
    #[default]
    Local,
    NestedPrefab,
    LocalNestedPrefab,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicMember {
    pub label: String,
    pub type_name: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// READING
// ═══════════════════════════════════════════════════════════════════════════════

/// `scenes/Level.ts` → `scenes/Level.scene`
pub fn descriptor_path(source_path: &Path, descriptor_extension: &str) -> PathBuf {
    source_path.with_extension(descriptor_extension)
}

/// Reads the sibling descriptor of `source_path`.
///
/// A missing descriptor is an empty contribution, not an error.
pub fn read_public_members(
    source_path: &Path,
    descriptor_extension: &str,
    max_depth: usize,
) -> Result<Vec<PublicMember>> {
    let path = descriptor_path(source_path, descriptor_extension);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("No descriptor for {}", source_path.display());
            return Ok(Vec::new());
        }
        Err(source) => return Err(TransformError::Io { path, source }),
    };

    let document: DescriptorDocument = serde_json::from_str(&content)
        .map_err(|source| TransformError::MalformedDescriptor {
            path: path.clone(),
            source,
        })?;

    extract_public_members(&document, max_depth).map_err(|limit| {
        TransformError::DescriptorTooDeep {
            path: path.clone(),
            limit,
        }
    })
}

/// Pre-order walk of the display list. Fails with the budget when an item sits
/// deeper than `max_depth` levels.
pub fn extract_public_members(
    document: &DescriptorDocument,
    max_depth: usize,
) -> std::result::Result<Vec<PublicMember>, usize> {
    let mut members = Vec::new();
    collect_members(&document.display_list, 1, max_depth, &mut members)?;
    Ok(members)
}

fn collect_members(
    items: &[DisplayItem],
    depth: usize,
    max_depth: usize,
    members: &mut Vec<PublicMember>,
) -> std::result::Result<(), usize> {
    if items.is_empty() {
        return Ok(());
    }
    if depth > max_depth {
        return Err(max_depth);
    }

    for item in items {
        if item.scope == Scope::Public && !item.kind.is_empty() {
            if item.label.is_empty() {
                warn!("Skipping public {} item without a label", item.kind);
            } else {
                if !is_known_kind(&item.kind) {
                    debug!("Unknown kind '{}' for '{}', typing as any", item.kind, item.label);
                }
                members.push(PublicMember {
                    label: item.label.clone(),
                    type_name: map_kind(&item.kind).to_string(),
                });
            }
        }
        collect_members(&item.list, depth + 1, max_depth, members)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(json: &str) -> DescriptorDocument {
        serde_json::from_str(json).expect("descriptor json")
    }

    fn labels(members: &[PublicMember]) -> Vec<&str> {
        members.iter().map(|m| m.label.as_str()).collect()
    }

    #[test]
    fn test_descriptor_path() {
        assert_eq!(
            descriptor_path(Path::new("assets/scenes/Level.ts"), "scene"),
            PathBuf::from("assets/scenes/Level.scene")
        );
    }

    #[test]
    fn test_public_members_in_document_order() {
        let doc = parse(
            r#"{
                "displayList": [
                    { "label": "bg", "type": "Image", "scope": "PUBLIC" },
                    { "label": "hidden", "type": "Sprite", "scope": "LOCAL" },
                    { "label": "ui", "type": "Container", "scope": "PUBLIC", "list": [
                        { "label": "score", "type": "Text", "scope": "PUBLIC" },
                        { "label": "icon", "type": "Image", "scope": "CLASS" }
                    ]},
                    { "label": "layer", "type": "TilemapLayer", "scope": "PUBLIC" }
                ]
            }"#,
        );
        let members = extract_public_members(&doc, 48).unwrap();
        assert_eq!(labels(&members), vec!["bg", "ui", "score", "layer"]);
        assert_eq!(members[2].type_name, "Phaser.GameObjects.Text");
        assert_eq!(members[3].type_name, "Phaser.Tilemaps.TilemapLayer");
    }

    #[test]
    fn test_private_parent_still_traversed() {
        let doc = parse(
            r#"{ "displayList": [
                { "label": "group", "type": "Container", "scope": "METHOD", "list": [
                    { "label": "door", "type": "ArcadeSprite", "scope": "PUBLIC" }
                ]}
            ]}"#,
        );
        let members = extract_public_members(&doc, 48).unwrap();
        assert_eq!(
            members,
            vec![PublicMember {
                label: "door".to_string(),
                type_name: "Phaser.Physics.Arcade.Sprite".to_string(),
            }]
        );
    }

    #[test]
    fn test_empty_kind_and_unknown_scope_are_skipped() {
        let doc = parse(
            r#"{ "displayList": [
                { "label": "prefab", "scope": "PUBLIC", "prefabId": "abc" },
                { "label": "odd", "type": "Image", "scope": "SOMETHING_NEW" },
                { "label": "widget", "type": "FooWidget", "scope": "PUBLIC" }
            ]}"#,
        );
        let members = extract_public_members(&doc, 48).unwrap();
        assert_eq!(labels(&members), vec!["widget"]);
        assert_eq!(members[0].type_name, "any");
    }

    #[test]
    fn test_missing_display_list_is_empty() {
        let doc = parse(r#"{ "id": "x", "sceneType": "SCENE" }"#);
        assert!(extract_public_members(&doc, 48).unwrap().is_empty());
    }

    #[test]
    fn test_depth_budget() {
        let mut item = DisplayItem {
            label: "leaf".to_string(),
            kind: "Image".to_string(),
            scope: Scope::Public,
            list: vec![],
        };
        for _ in 0..5 {
            item = DisplayItem {
                label: "box".to_string(),
                kind: "Container".to_string(),
                scope: Scope::Local,
                list: vec![item],
            };
        }
        let doc = DescriptorDocument {
            display_list: vec![item],
        };
        assert_eq!(extract_public_members(&doc, 6).unwrap().len(), 1);
        assert_eq!(extract_public_members(&doc, 5), Err(5));
    }

    #[test]
    fn test_read_missing_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("Level.ts");
        let members = read_public_members(&script, "scene", 48).unwrap();
        assert!(members.is_empty());
    }

    #[test]
    fn test_read_malformed_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("Level.ts");
        let mut file = fs::File::create(dir.path().join("Level.scene")).unwrap();
        file.write_all(b"{ \"displayList\": [ ").unwrap();

        let err = read_public_members(&script, "scene", 48).unwrap_err();
        assert!(matches!(err, TransformError::MalformedDescriptor { .. }));
        assert_eq!(err.code(), "MALFORMED_DESCRIPTOR");
    }

    #[test]
    fn test_read_wrong_shape_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("Level.js");
        fs::write(dir.path().join("Level.scene"), r#"{ "displayList": 3 }"#).unwrap();

        let err = read_public_members(&script, "scene", 48).unwrap_err();
        assert!(matches!(err, TransformError::MalformedDescriptor { .. }));
    }
}
