//! Descriptor kind → engine type name.
//!
//! The table is closed but the mapping is open-world: any kind the table does not
//! know becomes `any`, so a new editor object type can never break a build.

use lazy_static::lazy_static;
use std::collections::HashMap;

/// Permissive fallback for kinds outside the table.
pub const ANY_TYPE: &str = "any";

lazy_static! {
    static ref KIND_TYPES: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        // Plain game objects
        m.insert("Image", "Phaser.GameObjects.Image");
        m.insert("Sprite", "Phaser.GameObjects.Sprite");
        m.insert("TileSprite", "Phaser.GameObjects.TileSprite");
        m.insert("NineSlice", "Phaser.GameObjects.NineSlice");
        m.insert("ThreeSlice", "Phaser.GameObjects.ThreeSlice");
        m.insert("Video", "Phaser.GameObjects.Video");
        m.insert("Container", "Phaser.GameObjects.Container");
        m.insert("Layer", "Phaser.GameObjects.Layer");
        m.insert("Text", "Phaser.GameObjects.Text");
        m.insert("BitmapText", "Phaser.GameObjects.BitmapText");
        m.insert("Rectangle", "Phaser.GameObjects.Rectangle");
        m.insert("Ellipse", "Phaser.GameObjects.Ellipse");
        m.insert("Triangle", "Phaser.GameObjects.Triangle");
        m.insert("Polygon", "Phaser.GameObjects.Polygon");
        m.insert(
            "RoundedRectangleGraphics",
            "Phaser.GameObjects.RoundedRectangleGraphics",
        );
        m.insert(
            "RoundedRectangleImage",
            "Phaser.GameObjects.RoundedRectangleImage",
        );
        m.insert("ParticleEmitter", "Phaser.GameObjects.Particles.ParticleEmitter");
        // Arcade physics
        m.insert("ArcadeImage", "Phaser.Physics.Arcade.Image");
        m.insert("ArcadeSprite", "Phaser.Physics.Arcade.Sprite");
        m.insert("Collider", "Phaser.Physics.Arcade.Collider");
        // Box2D bodies and shapes are declared globally by the plugin
        m.insert("b2Body", "b2Body");
        m.insert("b2OffsetPolygonShape", "b2OffsetPolygonShape");
        m.insert("b2BoxShape", "b2BoxShape");
        m.insert("b2PolygonShape", "b2PolygonShape");
        // Tilemaps
        m.insert("TilemapLayer", "Phaser.Tilemaps.TilemapLayer");
        m.insert("Tilemap", "Phaser.Tilemaps.Tilemap");
        m.insert("EditableTilemap", "Phaser.Tilemaps.Tilemap");
        // Spine plugin
        m.insert("SpineGameObject", "SpineGameObject");
        m
    };
}

pub fn map_kind(kind: &str) -> &'static str {
    KIND_TYPES.get(kind).copied().unwrap_or(ANY_TYPE)
}

/// Whether `kind` has a dedicated entry (used for debug logging only).
pub fn is_known_kind(kind: &str) -> bool {
    KIND_TYPES.contains_key(kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_object_kinds() {
        assert_eq!(map_kind("Image"), "Phaser.GameObjects.Image");
        assert_eq!(map_kind("Container"), "Phaser.GameObjects.Container");
        assert_eq!(map_kind("BitmapText"), "Phaser.GameObjects.BitmapText");
    }

    #[test]
    fn test_special_cased_kinds() {
        assert_eq!(map_kind("ArcadeSprite"), "Phaser.Physics.Arcade.Sprite");
        assert_eq!(
            map_kind("ParticleEmitter"),
            "Phaser.GameObjects.Particles.ParticleEmitter"
        );
        assert_eq!(map_kind("EditableTilemap"), "Phaser.Tilemaps.Tilemap");
        assert_eq!(map_kind("b2BoxShape"), "b2BoxShape");
    }

    #[test]
    fn test_unknown_kind_is_any() {
        assert_eq!(map_kind("FooWidget"), ANY_TYPE);
        assert_eq!(map_kind("image"), ANY_TYPE);
        assert!(!is_known_kind("FooWidget"));
    }
}
