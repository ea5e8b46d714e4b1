use uuid::Uuid;

use crate::graph::PlayColors;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Saturation and lightness used for every play color. Only the hue varies,
/// which keeps all plays readable against the fixed white font color.
const PLAY_COLOR_SATURATION: f64 = 0.65;
const PLAY_COLOR_LIGHTNESS: f64 = 0.40;

pub const PLAY_FONT_COLOR: &str = "#ffffff";

/// Generate a node id: the given type prefix followed by 8 hex chars of a v4 uuid.
pub fn generate_id(prefix: &str) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{prefix}{}", &uuid[..8])
}

/// Clean a name for use in a DOT label or attribute. Every value we emit is
/// double quoted, so converting double quotes to their HTML entity is enough.
/// See https://www.graphviz.org/doc/info/lang.html
pub fn clean_name(name: &str) -> String {
    name.trim().replace('"', "&#34;")
}

/// Derive the color pair for a play from its id. The mapping must be stable
/// across processes so that re-rendering the same playbook produces the same
/// diagram, hence the pinned FNV-1a fold instead of the std hasher.
pub fn play_colors(play_id: &str) -> PlayColors {
    let hue = (fnv1a(play_id.as_bytes()) % 360) as f64;
    PlayColors {
        main: hsl_to_hex(hue, PLAY_COLOR_SATURATION, PLAY_COLOR_LIGHTNESS),
        font: PLAY_FONT_COLOR.to_string(),
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn hsl_to_hex(hue: f64, saturation: f64, lightness: f64) -> String {
    let chroma = (1.0 - (2.0 * lightness - 1.0).abs()) * saturation;
    let hue_prime = hue / 60.0;
    let x = chroma * (1.0 - (hue_prime % 2.0 - 1.0).abs());

    let (r, g, b) = match hue_prime as u32 {
        0 => (chroma, x, 0.0),
        1 => (x, chroma, 0.0),
        2 => (0.0, chroma, x),
        3 => (0.0, x, chroma),
        4 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };

    let m = lightness - chroma / 2.0;
    let to_byte = |v: f64| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    format!("#{:02x}{:02x}{:02x}", to_byte(r), to_byte(g), to_byte(b))
}
