//! Compiled policy handles
//!
//! A handle pins one policy: its identifier, a fingerprint of the exact
//! source that was compiled, the compiled program, and the data bindings of
//! its libraries. Handles are built once at backend construction and shared
//! by reference for the life of the domain model.

use crate::cel::{self, CelError, Result};
use cel_interpreter::objects::Value as CelValue;
use cel_interpreter::Program;
use meridian_bundle::Mrn;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// BLAKE3 hash of a policy's source bytes
///
/// The fingerprint changes iff the source bytes change, so identical
/// policies in different domains share a fingerprint without sharing a
/// handle. Serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint a policy source
    pub fn of(source: &str) -> Self {
        Self(*blake3::hash(source.as_bytes()).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        if hex.len() != 64 || !hex.is_ascii() {
            return Err(serde::de::Error::custom("fingerprint must be 32 hex bytes"));
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(serde::de::Error::custom)?;
        }
        Ok(Self(bytes))
    }
}

/// Typed outcome of a policy evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyOutput {
    Bool(bool),
    Int(i64),
}

/// Compiles policy sources, screening unsafe built-ins
///
/// Policies are untrusted artifacts: any reference to a configured unsafe
/// capability (network egress and friends) is rejected before the source
/// ever reaches the interpreter. Mappers compile with the unrestricted set.
pub struct PolicyCompiler {
    banned: Vec<(String, Regex)>,
}

impl PolicyCompiler {
    /// A compiler that rejects the given built-ins
    pub fn new<I, S>(banned: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let banned = banned
            .into_iter()
            .map(|name| {
                let name = name.into();
                let pattern = format!(r"(^|[^A-Za-z0-9_.]){}\s*\(", regex::escape(&name));
                // The pattern escapes the name, so it always compiles.
                let regex = Regex::new(&pattern).unwrap_or_else(|_| Regex::new("$^").unwrap());
                (name, regex)
            })
            .collect();
        Self { banned }
    }

    /// A compiler with every built-in available
    pub fn unrestricted() -> Self {
        Self { banned: Vec::new() }
    }

    /// Compile one policy source into a shareable handle
    pub fn compile(
        &self,
        mrn: impl Into<Mrn>,
        source: &str,
        bindings: serde_json::Map<String, Value>,
    ) -> Result<PolicyHandle> {
        let mrn = mrn.into();

        for (name, pattern) in &self.banned {
            if pattern.is_match(source) {
                return Err(CelError::UnsafeBuiltin {
                    builtin: name.clone(),
                    policy: mrn,
                });
            }
        }

        let program = cel::compile(source)?;

        Ok(PolicyHandle {
            mrn,
            fingerprint: Fingerprint::of(source),
            program,
            bindings: Value::Object(bindings),
        })
    }
}

/// One compiled policy, shared by reference
pub struct PolicyHandle {
    mrn: Mrn,
    fingerprint: Fingerprint,
    program: Program,
    bindings: Value,
}

impl PolicyHandle {
    pub fn mrn(&self) -> &str {
        &self.mrn
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    fn execute(&self, input: &Value, token: &CancellationToken) -> Result<CelValue> {
        if token.is_cancelled() {
            return Err(CelError::Cancelled);
        }
        cel::execute(&self.program, &[("input", input), ("data", &self.bindings)])
    }

    /// Evaluate to the typed output sum
    pub fn evaluate(&self, input: &Value, token: &CancellationToken) -> Result<PolicyOutput> {
        match self.execute(input, token)? {
            CelValue::Bool(b) => Ok(PolicyOutput::Bool(b)),
            CelValue::Int(i) => Ok(PolicyOutput::Int(i)),
            CelValue::UInt(u) => i64::try_from(u)
                .map(PolicyOutput::Int)
                .map_err(|_| CelError::NonIntegerResult),
            _ => Err(CelError::NonBooleanResult),
        }
    }

    /// Evaluate expecting a boolean outcome
    pub fn evaluate_bool(&self, input: &Value, token: &CancellationToken) -> Result<bool> {
        match self.evaluate(input, token)? {
            PolicyOutput::Bool(b) => Ok(b),
            PolicyOutput::Int(_) => Err(CelError::NonBooleanResult),
        }
    }

    /// Evaluate expecting a signed integer outcome
    pub fn evaluate_int(&self, input: &Value, token: &CancellationToken) -> Result<i64> {
        match self.evaluate(input, token)? {
            PolicyOutput::Int(i) => Ok(i),
            PolicyOutput::Bool(_) => Err(CelError::NonIntegerResult),
        }
    }

    /// Evaluate to an arbitrary JSON value (mapper transformations)
    pub fn evaluate_value(&self, input: &Value, token: &CancellationToken) -> Result<Value> {
        Ok(cel::cel_to_json(&self.execute(input, token)?))
    }
}

impl fmt::Debug for PolicyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyHandle")
            .field("mrn", &self.mrn)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

// Thread safety: the program is immutable after compilation and only read
// during execution; bindings are plain JSON.
unsafe impl Send for PolicyHandle {}
unsafe impl Sync for PolicyHandle {}
