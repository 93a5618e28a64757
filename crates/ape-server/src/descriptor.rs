//! Target method descriptors and the tab-separated description file.

use std::path::Path;

use serde::{Deserialize, Serialize};

pub const FLAG_ENTERED: i32 = 0x1;
pub const FLAG_EXITED: i32 = 0x2;
pub const FLAG_UNROLL: i32 = 0x4;
pub const FLAG_MASK: i32 = FLAG_ENTERED | FLAG_EXITED | FLAG_UNROLL;

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("flags {0:#x} outside mask {FLAG_MASK:#x}")]
    InvalidFlags(i32),

    #[error("line {line}: expected 4 tab-separated fields, found {found}")]
    FieldCount { line: usize, found: usize },

    #[error("line {line}: flags '{value}' is not an integer")]
    BadInteger { line: usize, value: String },

    #[error("line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: Box<DescriptorError>,
    },

    #[error("cannot read target method file: {0}")]
    Io(#[from] std::io::Error),
}

/// One traced method. Its position in the table is the method id used on
/// the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetMethodDescriptor {
    class: String,
    method: String,
    signature: String,
    flags: i32,
}

impl TargetMethodDescriptor {
    pub fn new(
        class: impl Into<String>,
        method: impl Into<String>,
        signature: impl Into<String>,
        flags: i32,
    ) -> Result<Self, DescriptorError> {
        if flags & !FLAG_MASK != 0 {
            return Err(DescriptorError::InvalidFlags(flags));
        }
        Ok(Self {
            class: class.into(),
            method: method.into(),
            signature: signature.into(),
            flags,
        })
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn flags(&self) -> i32 {
        self.flags
    }
}

impl std::fmt::Display for TargetMethodDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}{} [{:#x}]", self.class, self.method, self.signature, self.flags)
    }
}

/// Parse `class\tmethod\tsignature\tflags` lines. Blank lines and lines
/// starting with `//` are skipped; any other malformed line is an error.
pub fn parse_target_methods(text: &str) -> Result<Vec<TargetMethodDescriptor>, DescriptorError> {
    let mut methods = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        let [class, method, signature, flags] = fields[..] else {
            return Err(DescriptorError::FieldCount {
                line: line_no,
                found: fields.len(),
            });
        };
        let flags: i32 = flags.trim().parse().map_err(|_| DescriptorError::BadInteger {
            line: line_no,
            value: flags.to_string(),
        })?;
        let descriptor =
            TargetMethodDescriptor::new(class, method, signature, flags).map_err(|e| {
                DescriptorError::Line {
                    line: line_no,
                    source: Box::new(e),
                }
            })?;
        methods.push(descriptor);
    }
    Ok(methods)
}

pub fn load_target_methods(path: impl AsRef<Path>) -> Result<Vec<TargetMethodDescriptor>, DescriptorError> {
    let text = std::fs::read_to_string(path)?;
    parse_target_methods(&text)
}
