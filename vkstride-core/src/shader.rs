//! SPIR-V loading.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::error::BenchError;

const SPIRV_MAGIC: u32 = 0x0723_0203;
const WORD_BYTES: u64 = 4;

/// A validated SPIR-V binary, ready for `vkCreateShaderModule`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderCode {
    path: PathBuf,
    words: Vec<u32>,
}

impl ShaderCode {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn size_bytes(&self) -> usize {
        self.words.len() * WORD_BYTES as usize
    }
}

/// Read and sanity-check a SPIR-V file.
pub fn load_shader_code(path: impl AsRef<Path>) -> Result<ShaderCode, BenchError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| BenchError::ShaderOpen {
        path: path.to_path_buf(),
        source,
    })?;

    let size = bytes.len() as u64;
    if size % WORD_BYTES != 0 {
        return Err(BenchError::ShaderMisaligned {
            path: path.to_path_buf(),
            size,
        });
    }
    if bytes.is_empty() {
        return Err(BenchError::ShaderInvalid {
            path: path.to_path_buf(),
            reason: "empty file".into(),
        });
    }

    // read_spv also normalizes byte-swapped modules.
    let words = ash::util::read_spv(&mut Cursor::new(&bytes)).map_err(|e| {
        BenchError::ShaderInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    })?;

    if words[0] != SPIRV_MAGIC {
        return Err(BenchError::ShaderInvalid {
            path: path.to_path_buf(),
            reason: format!("bad magic {:#010x}", words[0]),
        });
    }

    tracing::debug!("Loaded {} ({} words)", path.display(), words.len());

    Ok(ShaderCode {
        path: path.to_path_buf(),
        words,
    })
}
