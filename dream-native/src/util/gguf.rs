//! GGUF header inspection
//!
//! Reads just enough of a GGUF file to reject obviously wrong files before
//! handing the path to llama.cpp, which otherwise fails with little context.

use common::DreamError;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, info, warn};

const GGUF_MAGIC: &[u8; 4] = b"GGUF";
const MAX_KEY_LEN: u64 = 1024;
const MAX_STRING_LEN: u64 = 1_000_000;
// Only the leading metadata keys are read; tokenizer arrays follow them.
const MAX_INSPECTED_KEYS: u64 = 16;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct GgufSummary {
    pub file_size: u64,
    pub version: u32,
    pub tensor_count: u64,
    pub kv_count: u64,
    pub architecture: Option<String>,
    pub name: Option<String>,
    pub keys: Vec<String>,
}

impl GgufSummary {
    pub fn size_mb(&self) -> f64 {
        self.file_size as f64 / (1024.0 * 1024.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ValueType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    Bool,
    String,
    Array,
    U64,
    I64,
    F64,
}

impl ValueType {
    fn from_u32(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => ValueType::U8,
            1 => ValueType::I8,
            2 => ValueType::U16,
            3 => ValueType::I16,
            4 => ValueType::U32,
            5 => ValueType::I32,
            6 => ValueType::F32,
            7 => ValueType::Bool,
            8 => ValueType::String,
            9 => ValueType::Array,
            10 => ValueType::U64,
            11 => ValueType::I64,
            12 => ValueType::F64,
            _ => return None,
        })
    }

    fn fixed_size(self) -> Option<u64> {
        match self {
            ValueType::U8 | ValueType::I8 | ValueType::Bool => Some(1),
            ValueType::U16 | ValueType::I16 => Some(2),
            ValueType::U32 | ValueType::I32 | ValueType::F32 => Some(4),
            ValueType::U64 | ValueType::I64 | ValueType::F64 => Some(8),
            ValueType::String | ValueType::Array => None,
        }
    }
}

struct HeaderReader<R> {
    inner: R,
}

impl<R: Read + Seek> HeaderReader<R> {
    fn read_bytes<const N: usize>(&mut self) -> Result<[u8; N], DreamError> {
        let mut bytes = [0u8; N];
        self.inner
            .read_exact(&mut bytes)
            .map_err(|e| DreamError::InvalidGguf(format!("truncated header: {}", e)))?;
        Ok(bytes)
    }

    fn read_u32(&mut self) -> Result<u32, DreamError> {
        Ok(u32::from_le_bytes(self.read_bytes::<4>()?))
    }

    fn read_u64(&mut self) -> Result<u64, DreamError> {
        Ok(u64::from_le_bytes(self.read_bytes::<8>()?))
    }

    fn read_string(&mut self, limit: u64) -> Result<String, DreamError> {
        let len = self.read_u64()?;
        if len > limit {
            return Err(DreamError::InvalidGguf(format!(
                "string length {} exceeds {}",
                len, limit
            )));
        }
        let mut bytes = vec![0u8; len as usize];
        self.inner
            .read_exact(&mut bytes)
            .map_err(|e| DreamError::InvalidGguf(format!("truncated string: {}", e)))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn skip(&mut self, n: u64) -> Result<(), DreamError> {
        let offset = i64::try_from(n)
            .map_err(|_| DreamError::InvalidGguf(format!("value length {} is out of range", n)))?;
        self.inner
            .seek(SeekFrom::Current(offset))
            .map_err(|e| DreamError::InvalidGguf(format!("seek failed: {}", e)))?;
        Ok(())
    }

    fn read_value_type(&mut self) -> Result<ValueType, DreamError> {
        let raw = self.read_u32()?;
        ValueType::from_u32(raw)
            .ok_or_else(|| DreamError::InvalidGguf(format!("unknown value type {}", raw)))
    }

    fn skip_value(&mut self, value_type: ValueType) -> Result<(), DreamError> {
        match value_type {
            ValueType::String => {
                let len = self.read_u64()?;
                self.skip(len)
            }
            ValueType::Array => {
                let element_type = self.read_value_type()?;
                let count = self.read_u64()?;
                match element_type.fixed_size() {
                    Some(size) => self.skip(size.saturating_mul(count)),
                    None => {
                        for _ in 0..count {
                            self.skip_value(element_type)?;
                        }
                        Ok(())
                    }
                }
            }
            fixed => self.skip(fixed.fixed_size().unwrap_or(0)),
        }
    }
}

/// Read the GGUF header and the leading metadata keys.
pub fn inspect(path: &Path) -> Result<GgufSummary, DreamError> {
    if !path.is_file() {
        return Err(DreamError::ModelNotFound(path.display().to_string()));
    }

    let file_size = std::fs::metadata(path)
        .map_err(|_| DreamError::ModelNotFound(path.display().to_string()))?
        .len();
    let file = File::open(path).map_err(|_| DreamError::ModelNotFound(path.display().to_string()))?;
    let mut reader = HeaderReader {
        inner: BufReader::new(file),
    };

    let magic = reader.read_bytes::<4>()?;
    if &magic != GGUF_MAGIC {
        return Err(DreamError::InvalidGguf(format!(
            "bad magic number {:?}",
            magic
        )));
    }

    let version = reader.read_u32()?;
    if version < 2 {
        return Err(DreamError::InvalidGguf(format!(
            "GGUF version {} is no longer supported",
            version
        )));
    }
    if version > 3 {
        warn!("Unusual GGUF version: {}", version);
    }

    let tensor_count = reader.read_u64()?;
    let kv_count = reader.read_u64()?;
    if tensor_count == 0 {
        return Err(DreamError::InvalidGguf("model has no tensors".to_string()));
    }

    let mut summary = GgufSummary {
        file_size,
        version,
        tensor_count,
        kv_count,
        architecture: None,
        name: None,
        keys: Vec::new(),
    };

    for _ in 0..kv_count.min(MAX_INSPECTED_KEYS) {
        let key = reader.read_string(MAX_KEY_LEN)?;
        let value_type = reader.read_value_type()?;

        if value_type == ValueType::String && (key == "general.architecture" || key == "general.name") {
            let value = reader.read_string(MAX_STRING_LEN)?;
            debug!("GGUF {} = {}", key, value);
            if key == "general.architecture" {
                summary.architecture = Some(value);
            } else {
                summary.name = Some(value);
            }
        } else {
            reader.skip_value(value_type)?;
        }
        summary.keys.push(key);
    }

    Ok(summary)
}

/// Everything that must hold before a file is handed to llama.cpp.
pub fn validate_model_file(
    path: &Path,
    min_size_bytes: u64,
    expected_sha256: Option<&str>,
) -> Result<GgufSummary, DreamError> {
    let summary = inspect(path)?;

    if summary.file_size < min_size_bytes {
        return Err(DreamError::InvalidGguf(format!(
            "file is {:.2} MB, expected at least {:.2} MB",
            summary.size_mb(),
            min_size_bytes as f64 / (1024.0 * 1024.0)
        )));
    }

    if let Some(expected) = expected_sha256 {
        let actual = sha256_file(path)?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(DreamError::InvalidGguf(format!(
                "checksum mismatch, expected {} got {}",
                expected, actual
            )));
        }
        info!("Checksum verification passed");
    }

    info!(
        "GGUF v{} with {} tensors, {} metadata keys ({:.2} MB)",
        summary.version,
        summary.tensor_count,
        summary.kv_count,
        summary.size_mb()
    );
    Ok(summary)
}

pub fn sha256_file(path: &Path) -> Result<String, DreamError> {
    let mut file = File::open(path).map_err(|_| DreamError::ModelNotFound(path.display().to_string()))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| DreamError::InvalidGguf(format!("read failed: {}", e)))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn push_string(out: &mut Vec<u8>, s: &str) {
        out.extend_from_slice(&(s.len() as u64).to_le_bytes());
        out.extend_from_slice(s.as_bytes());
    }

    /// Minimal GGUF v3 header with a few metadata entries.
    pub(crate) fn fake_gguf(padding: usize) -> NamedTempFile {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"GGUF");
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&1u64.to_le_bytes()); // tensors
        bytes.extend_from_slice(&4u64.to_le_bytes()); // kv pairs

        push_string(&mut bytes, "general.architecture");
        bytes.extend_from_slice(&8u32.to_le_bytes());
        push_string(&mut bytes, "gemma3n");

        push_string(&mut bytes, "gemma3n.context_length");
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&32768u32.to_le_bytes());

        push_string(&mut bytes, "tokenizer.ggml.tokens");
        bytes.extend_from_slice(&9u32.to_le_bytes());
        bytes.extend_from_slice(&8u32.to_le_bytes());
        bytes.extend_from_slice(&2u64.to_le_bytes());
        push_string(&mut bytes, "<bos>");
        push_string(&mut bytes, "hola");

        push_string(&mut bytes, "general.name");
        bytes.extend_from_slice(&8u32.to_le_bytes());
        push_string(&mut bytes, "Dream Assistant");

        bytes.extend(std::iter::repeat(0u8).take(padding));

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_inspect_reads_metadata() {
        let file = fake_gguf(0);
        let summary = inspect(file.path()).unwrap();
        assert_eq!(summary.version, 3);
        assert_eq!(summary.tensor_count, 1);
        assert_eq!(summary.kv_count, 4);
        assert_eq!(summary.architecture.as_deref(), Some("gemma3n"));
        assert_eq!(summary.name.as_deref(), Some("Dream Assistant"));
        assert_eq!(summary.keys.len(), 4);
        assert_eq!(summary.keys[2], "tokenizer.ggml.tokens");
    }

    #[test]
    fn test_missing_file() {
        let err = inspect(Path::new("/nonexistent/sister.gguf")).unwrap_err();
        assert!(matches!(err, DreamError::ModelNotFound(_)));
    }

    #[test]
    fn test_bad_magic() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"ONNX\x03\x00\x00\x00").unwrap();
        let err = inspect(file.path()).unwrap_err();
        assert_eq!(err.code().as_i32(), -2);
    }

    #[test]
    fn test_truncated_header() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"GGUF\x03\x00").unwrap();
        assert!(matches!(
            inspect(file.path()).unwrap_err(),
            DreamError::InvalidGguf(_)
        ));
    }

    #[test]
    fn test_oversized_array_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"GGUF");
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(&2u64.to_le_bytes());

        // u64 array whose byte length does not fit in a seek offset
        push_string(&mut bytes, "tokenizer.ggml.scores");
        bytes.extend_from_slice(&9u32.to_le_bytes());
        bytes.extend_from_slice(&10u32.to_le_bytes());
        bytes.extend_from_slice(&(u64::MAX / 4).to_le_bytes());

        push_string(&mut bytes, "general.name");
        bytes.extend_from_slice(&8u32.to_le_bytes());
        push_string(&mut bytes, "never read");

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        let err = inspect(file.path()).unwrap_err();
        assert!(err.to_string().contains("out of range"), "{}", err);
    }

    #[test]
    fn test_oversized_string_skip_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"GGUF");
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(&1u64.to_le_bytes());
        push_string(&mut bytes, "general.license");
        bytes.extend_from_slice(&8u32.to_le_bytes());
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        assert!(matches!(
            inspect(file.path()).unwrap_err(),
            DreamError::InvalidGguf(_)
        ));
    }

    #[test]
    fn test_size_floor() {
        let file = fake_gguf(0);
        let err = validate_model_file(file.path(), 50 * 1024 * 1024, None).unwrap_err();
        assert!(err.to_string().contains("expected at least"));

        let padded = fake_gguf(4096);
        assert!(validate_model_file(padded.path(), 4096, None).is_ok());
    }

    #[test]
    fn test_checksum() {
        let file = fake_gguf(0);
        let digest = sha256_file(file.path()).unwrap();
        assert_eq!(digest.len(), 64);
        assert!(validate_model_file(file.path(), 0, Some(&digest.to_uppercase())).is_ok());
        let err = validate_model_file(file.path(), 0, Some("deadbeef")).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }
}
