//! Cursor-scan reply decoding
//!
//! Backend versions disagree on the shape of a scan reply: older clients
//! return a positional array `[cursor, keys]`, newer ones a named-field
//! object `{cursor, keys}`. A `Scanner` binds one decoder to one store,
//! chosen once at startup by probing, so the rest of the engine never
//! branches on reply shape.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;
use types::errors::KvError;

use super::KvStore;

/// One decoded page of a cursor scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor to pass to the next call; zero means the scan is complete.
    pub cursor: u64,
    /// Keys found in this page (may be empty on any page).
    pub keys: Vec<String>,
}

/// Supported scan reply shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanShape {
    /// Positional array reply: `[cursor, [key, ...]]`.
    Array,
    /// Named-field object reply: `{"cursor": n, "keys": [key, ...]}`.
    Object,
}

impl ScanShape {
    /// Decode a raw reply in this shape.
    pub fn decode(&self, reply: &Value) -> Result<ScanPage, KvError> {
        match self {
            ScanShape::Array => decode_array(reply),
            ScanShape::Object => decode_object(reply),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ScanShape::Array => "array",
            ScanShape::Object => "object",
        }
    }
}

fn decode_cursor(value: &Value) -> Option<u64> {
    // Cursors arrive as numbers or decimal strings depending on the client.
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn decode_keys(value: &Value) -> Option<Vec<String>> {
    value.as_array().map(|entries| {
        entries
            .iter()
            .filter_map(|k| k.as_str().map(str::to_string))
            .collect()
    })
}

fn decode_array(reply: &Value) -> Result<ScanPage, KvError> {
    let parts = reply
        .as_array()
        .filter(|a| a.len() == 2)
        .ok_or_else(|| KvError::ReplyShape("expected [cursor, keys]".to_string()))?;
    let cursor = decode_cursor(&parts[0])
        .ok_or_else(|| KvError::ReplyShape("array reply cursor is not numeric".to_string()))?;
    let keys = decode_keys(&parts[1])
        .ok_or_else(|| KvError::ReplyShape("array reply keys is not a list".to_string()))?;
    Ok(ScanPage { cursor, keys })
}

fn decode_object(reply: &Value) -> Result<ScanPage, KvError> {
    let obj = reply
        .as_object()
        .ok_or_else(|| KvError::ReplyShape("expected {cursor, keys}".to_string()))?;
    let cursor = obj
        .get("cursor")
        .and_then(decode_cursor)
        .ok_or_else(|| KvError::ReplyShape("object reply missing cursor".to_string()))?;
    let keys = obj
        .get("keys")
        .and_then(decode_keys)
        .ok_or_else(|| KvError::ReplyShape("object reply missing keys".to_string()))?;
    Ok(ScanPage { cursor, keys })
}

/// Cursor scanner bound to one store and one reply shape.
pub struct Scanner {
    store: Arc<dyn KvStore>,
    shape: ScanShape,
}

impl Scanner {
    /// Probe the store and bind whichever reply shape decodes.
    ///
    /// Issues one scan and tries the array shape, then the object shape.
    /// Fails only when neither decodes, which means the backend speaks a
    /// protocol this engine does not know.
    pub async fn probe(store: Arc<dyn KvStore>, pattern: &str) -> Result<Self, KvError> {
        let reply = store.scan(0, pattern, 1).await?;
        for shape in [ScanShape::Array, ScanShape::Object] {
            if shape.decode(&reply).is_ok() {
                debug!(shape = shape.label(), "scan reply shape selected");
                return Ok(Self { store, shape });
            }
        }
        Err(KvError::ReplyShape(
            "scan reply matched no known shape".to_string(),
        ))
    }

    /// Build a scanner with a known shape (tests, fixed deployments).
    pub fn with_shape(store: Arc<dyn KvStore>, shape: ScanShape) -> Self {
        Self { store, shape }
    }

    /// The shape this scanner decodes.
    pub fn shape(&self) -> ScanShape {
        self.shape
    }

    /// One scan step.
    pub async fn next(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<ScanPage, KvError> {
        let reply = self.store.scan(cursor, pattern, count).await?;
        self.shape.decode(&reply)
    }

    /// Run a scan to completion and collect every matching key.
    pub async fn scan_all(&self, pattern: &str, count: usize) -> Result<Vec<String>, KvError> {
        let mut keys = Vec::new();
        let mut cursor = 0u64;
        loop {
            let page = self.next(cursor, pattern, count).await?;
            keys.extend(page.keys);
            if page.cursor == 0 {
                return Ok(keys);
            }
            cursor = page.cursor;
        }
    }
}
