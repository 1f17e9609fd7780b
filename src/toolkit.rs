use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::{ToolkitConfig, ToolkitMode};
use crate::model::Qualifier;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UncompressResult {
    pub identifiers: Vec<Qualifier>,
    pub qualifiers: Vec<Qualifier>,
    #[serde(default)]
    pub data_attributes: Vec<Qualifier>,
    #[serde(default)]
    pub other: Vec<Qualifier>,
}

/// Opaque capability for syntax validation, compression, decompression,
/// and structural analysis of GS1 Digital Link paths. Implementations may
/// wrap a subprocess or a pure in-process port; the pipeline never assumes
/// which. None of these operations retry on their own.
#[async_trait]
pub trait ToolkitAdapter: Send + Sync {
    async fn test_syntax(&self, path: &str) -> Result<bool, String>;
    async fn compress(&self, link: &str) -> Result<String, String>;
    async fn uncompress(&self, compressed_path: &str) -> Result<UncompressResult, String>;
    async fn analyze(&self, link: &str) -> Result<UncompressResult, String>;
}

pub fn build_toolkit(config: &ToolkitConfig) -> Box<dyn ToolkitAdapter> {
    match config.mode {
        ToolkitMode::InProcess => Box::new(InProcessToolkit),
        ToolkitMode::Subprocess => Box::new(SubprocessToolkit {
            command: config.command.clone().unwrap_or_else(|| "gs1-toolkit".to_string()),
            timeout: Duration::from_millis(config.timeout_ms),
        }),
    }
}

/// A structural, non-GS1-conformant port sufficient to satisfy the round-trip
/// contract this spec requires (see DESIGN.md § toolkit.rs). Not a substitute
/// for the real GS1 syntax dictionary or compression tables.
pub struct InProcessToolkit;

#[async_trait]
impl ToolkitAdapter for InProcessToolkit {
    async fn test_syntax(&self, path: &str) -> Result<bool, String> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() || segments.len() % 2 != 0 {
            return Ok(false);
        }
        for pair in segments.chunks_exact(2) {
            let ai = pair[0];
            let value = pair[1];
            if ai.is_empty() || !(2..=4).contains(&ai.len()) || !ai.chars().all(|c| c.is_ascii_digit()) {
                return Ok(false);
            }
            if value.is_empty() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn compress(&self, link: &str) -> Result<String, String> {
        let trimmed = link.trim_start_matches('/');
        if trimmed.is_empty() {
            return Err("nothing to compress".to_string());
        }
        Ok(format!("/{}", base62_encode(trimmed.as_bytes())))
    }

    async fn uncompress(&self, compressed_path: &str) -> Result<UncompressResult, String> {
        let trimmed = compressed_path.trim_start_matches('/');
        let decoded = base62_decode(trimmed).ok_or_else(|| "malformed compressed link".to_string())?;
        let text = String::from_utf8(decoded).map_err(|e| e.to_string())?;
        let segments: Vec<&str> = text.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() || segments.len() % 2 != 0 {
            return Err("malformed decoded path".to_string());
        }
        let mut identifiers = Vec::new();
        for pair in segments.chunks_exact(2) {
            let mut m = Qualifier::new();
            m.insert(pair[0].to_string(), pair[1].to_string());
            identifiers.push(m);
        }
        let first = identifiers.remove(0);
        Ok(UncompressResult {
            identifiers: vec![first],
            qualifiers: identifiers,
            data_attributes: Vec::new(),
            other: Vec::new(),
        })
    }

    async fn analyze(&self, link: &str) -> Result<UncompressResult, String> {
        // Analysis and uncompression share the same path-decomposition logic
        // in the in-process port; the only difference is the input is
        // already a plain path, not a compressed one.
        let trimmed = link.trim_start_matches('/');
        let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() || segments.len() % 2 != 0 {
            return Err("malformed path".to_string());
        }
        let mut identifiers = Vec::new();
        for pair in segments.chunks_exact(2) {
            let mut m = Qualifier::new();
            m.insert(pair[0].to_string(), pair[1].to_string());
            identifiers.push(m);
        }
        let first = identifiers.remove(0);
        Ok(UncompressResult {
            identifiers: vec![first],
            qualifiers: identifiers,
            data_attributes: Vec::new(),
            other: Vec::new(),
        })
    }
}

const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

fn base62_encode(bytes: &[u8]) -> String {
    let mut num: Vec<u8> = bytes.to_vec();
    let mut digits = Vec::new();
    while !num.iter().all(|b| *b == 0) {
        let mut remainder = 0u32;
        for b in num.iter_mut() {
            let cur = (remainder << 8) | *b as u32;
            *b = (cur / 62) as u8;
            remainder = cur % 62;
        }
        digits.push(ALPHABET[remainder as usize]);
        while num.first() == Some(&0) && num.len() > 1 {
            num.remove(0);
        }
    }
    if digits.is_empty() {
        digits.push(ALPHABET[0]);
    }
    digits.reverse();
    String::from_utf8(digits).unwrap()
}

fn base62_decode(s: &str) -> Option<Vec<u8>> {
    let mut num: Vec<u8> = vec![0];
    for c in s.chars() {
        let digit = ALPHABET.iter().position(|&b| b as char == c)? as u32;
        let mut carry = digit;
        for b in num.iter_mut().rev() {
            let cur = *b as u32 * 62 + carry;
            *b = (cur & 0xFF) as u8;
            carry = cur >> 8;
        }
        while carry > 0 {
            num.insert(0, (carry & 0xFF) as u8);
            carry >>= 8;
        }
    }
    while num.first() == Some(&0) && num.len() > 1 {
        num.remove(0);
    }
    Some(num)
}

/// Spawns a fresh process per call with its own stdio pipes, bounded by a
/// timeout; on timeout the process is killed and a distinguished error is
/// surfaced. Mirrors the gateway's daemon process-management discipline
/// (fresh handle per call, no leaked children on any exit path).
pub struct SubprocessToolkit {
    command: String,
    timeout: Duration,
}

impl SubprocessToolkit {
    async fn invoke(&self, op: &str, arg: &str) -> Result<String, String> {
        let mut child = Command::new(&self.command)
            .arg(op)
            .arg(arg)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to spawn toolkit process: {e}"))?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(arg.as_bytes()).await;
        }

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| "toolkit process timed out".to_string())?
            .map_err(|e| format!("toolkit process failed: {e}"))?;

        if !output.status.success() {
            return Err(format!(
                "toolkit process exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        String::from_utf8(output.stdout).map_err(|e| e.to_string())
    }
}

#[async_trait]
impl ToolkitAdapter for SubprocessToolkit {
    async fn test_syntax(&self, path: &str) -> Result<bool, String> {
        let out = self.invoke("test-syntax", path).await?;
        Ok(out.trim() == "true")
    }

    async fn compress(&self, link: &str) -> Result<String, String> {
        let out = self.invoke("compress", link).await?;
        Ok(out.trim().to_string())
    }

    async fn uncompress(&self, compressed_path: &str) -> Result<UncompressResult, String> {
        let out = self.invoke("uncompress", compressed_path).await?;
        serde_json::from_str(&out).map_err(|e| format!("malformed toolkit output: {e}"))
    }

    async fn analyze(&self, link: &str) -> Result<UncompressResult, String> {
        let out = self.invoke("analyze", link).await?;
        serde_json::from_str(&out).map_err(|e| format!("malformed toolkit output: {e}"))
    }
}
