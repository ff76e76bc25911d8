//! Private key validation.
//!
//! Keys come from the ledger as free text and are often mangled on the way in
//! (escaped newlines, missing trailing newline, pasted public keys). They are
//! checked locally so a bad key surfaces as `ChannelError::KeyParse` instead of
//! an opaque authentication failure from the ssh client.

use crate::errors::ChannelError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

const OPENSSH_MAGIC: &[u8] = b"openssh-key-v1\0";

const SUPPORTED_LABELS: &[&str] = &[
    "OPENSSH PRIVATE KEY",
    "RSA PRIVATE KEY",
    "EC PRIVATE KEY",
    "DSA PRIVATE KEY",
    "PRIVATE KEY",
];

/// Kind of PEM armor found on a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    OpenSsh,
    Pem,
}

/// A key that passed local validation, normalized for writing to disk.
#[derive(Clone)]
pub struct PrivateKey {
    pem: String,
    format: KeyFormat,
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl PrivateKey {
    pub fn parse(raw: &str) -> Result<Self, ChannelError> {
        let normalized = normalize(raw);
        if normalized.trim().is_empty() {
            return Err(ChannelError::KeyParse("key is empty".into()));
        }

        let lines: Vec<&str> = normalized.lines().map(str::trim).collect();
        let begin = lines
            .iter()
            .position(|l| l.starts_with("-----BEGIN ") && l.ends_with("-----"))
            .ok_or_else(|| ChannelError::KeyParse("missing PEM header".into()))?;
        let label = &lines[begin]["-----BEGIN ".len()..lines[begin].len() - 5];

        if label == "ENCRYPTED PRIVATE KEY" {
            return Err(ChannelError::KeyParse(
                "passphrase-protected keys are not supported".into(),
            ));
        }
        if !SUPPORTED_LABELS.contains(&label) {
            return Err(ChannelError::KeyParse(format!(
                "unsupported key type '{}'",
                label
            )));
        }

        let footer = format!("-----END {}-----", label);
        let end = lines
            .iter()
            .skip(begin + 1)
            .position(|l| *l == footer)
            .map(|idx| idx + begin + 1)
            .ok_or_else(|| ChannelError::KeyParse("missing PEM footer".into()))?;

        let body_lines = &lines[begin + 1..end];
        if body_lines
            .iter()
            .any(|l| l.starts_with("Proc-Type:") && l.contains("ENCRYPTED"))
        {
            return Err(ChannelError::KeyParse(
                "passphrase-protected keys are not supported".into(),
            ));
        }

        let body: String = body_lines
            .iter()
            .filter(|l| !l.contains(':'))
            .copied()
            .collect();
        if body.is_empty() {
            return Err(ChannelError::KeyParse("key body is empty".into()));
        }
        let decoded = BASE64
            .decode(body.as_bytes())
            .map_err(|e| ChannelError::KeyParse(format!("key body is not base64: {}", e)))?;

        let format = if label == "OPENSSH PRIVATE KEY" {
            if !decoded.starts_with(OPENSSH_MAGIC) {
                return Err(ChannelError::KeyParse(
                    "not an OpenSSH private key".into(),
                ));
            }
            KeyFormat::OpenSsh
        } else {
            KeyFormat::Pem
        };

        let mut pem = lines[begin..=end].join("\n");
        pem.push('\n');
        Ok(Self { pem, format })
    }

    pub fn format(&self) -> KeyFormat {
        self.format
    }

    pub fn as_pem(&self) -> &str {
        &self.pem
    }
}

/// Undo common storage mangling: literal `\n` sequences and CRLF endings.
fn normalize(raw: &str) -> String {
    let unescaped = if !raw.contains('\n') && raw.contains("\\n") {
        raw.replace("\\n", "\n")
    } else {
        raw.to_string()
    };
    unescaped.replace("\r\n", "\n")
}
