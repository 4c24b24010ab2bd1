//! GLSL shaders for the meshview mesh pipeline.
//!
//! The sources live in `shaders/` and are compiled to SPIR-V at build time.
//! The engine reads [`VERTEX_SHADER`] and [`FRAGMENT_SHADER`] from
//! [`shader_dir`].

use std::path::PathBuf;

/// Compiled vertex shader file name.
pub const VERTEX_SHADER: &str = "vertex.spv";
/// Compiled fragment shader file name.
pub const FRAGMENT_SHADER: &str = "fragment.spv";

/// Environment variable overriding the shader directory.
pub const SHADER_DIR_ENV: &str = "MESHVIEW_SHADER_DIR";

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// GLSL source of the mesh vertex shader.
pub const VERTEX_SOURCE: &str = include_str!("../shaders/mesh.vert");
/// GLSL source of the mesh fragment shader.
pub const FRAGMENT_SOURCE: &str = include_str!("../shaders/mesh.frag");

/// Directory the build script compiled the shaders into.
pub fn compiled_dir() -> PathBuf {
    PathBuf::from(env!("MESHVIEW_COMPILED_SHADER_DIR"))
}

/// Where to read compiled shaders from.
///
/// `MESHVIEW_SHADER_DIR` wins over the build output.
pub fn shader_dir() -> PathBuf {
    std::env::var_os(SHADER_DIR_ENV).map_or_else(compiled_dir, PathBuf::from)
}

/// Convert byte slice to u32 words (SPIR-V requires 4-byte alignment).
///
/// Returns `None` when the length is not a multiple of four.
pub fn bytes_to_spirv(bytes: &[u8]) -> Option<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

/// Whether the words start with the SPIR-V magic number.
pub fn has_spirv_magic(words: &[u32]) -> bool {
    words.first() == Some(&SPIRV_MAGIC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_are_little_endian() {
        let words = bytes_to_spirv(&[0x03, 0x02, 0x23, 0x07, 1, 0, 0, 0]).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 1]);
        assert!(has_spirv_magic(&words));
    }

    #[test]
    fn misaligned_bytes_are_rejected() {
        assert!(bytes_to_spirv(&[0x03, 0x02, 0x23]).is_none());
        assert!(!has_spirv_magic(&[]));
        assert!(!has_spirv_magic(&[0xDEAD_BEEF]));
    }

    #[test]
    fn build_output_holds_both_stages() {
        let dir = compiled_dir();
        for name in [VERTEX_SHADER, FRAGMENT_SHADER] {
            let path = dir.join(name);
            let bytes = std::fs::read(&path)
                .unwrap_or_else(|e| panic!("{} not readable: {e}", path.display()));
            let words = bytes_to_spirv(&bytes).unwrap();
            assert!(has_spirv_magic(&words), "{name} is not SPIR-V");
        }
    }

    #[test]
    fn vertex_inputs_match_mesh_layout() {
        assert!(VERTEX_SOURCE.contains("layout(location = 0) in vec3 inPosition"));
        assert!(VERTEX_SOURCE.contains("layout(location = 1) in vec3 inNormal"));
        assert!(VERTEX_SOURCE.contains("layout(location = 2) in vec2 inUv"));
        assert!(VERTEX_SOURCE.contains("layout(binding = 0) uniform"));
    }

    #[test]
    fn stages_agree_on_varyings() {
        for name in ["fragPosition", "fragNormal", "fragUv", "fragLightPosition"] {
            assert!(VERTEX_SOURCE.contains(name), "vertex stage lacks {name}");
            assert!(FRAGMENT_SOURCE.contains(name), "fragment stage lacks {name}");
        }
    }
}
