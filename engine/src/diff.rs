//! Structural diff between JSON representations.
//!
//! Update journal entries carry a minimal JSON-Patch-style diff between the
//! previously persisted representation of a link and the new one, instead of
//! a full payload. An empty diff means nothing changed and suppresses the
//! entry entirely.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single patch operation, JSON-Pointer addressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
}

impl PatchOp {
    /// The path this operation addresses.
    pub fn path(&self) -> &str {
        match self {
            PatchOp::Add { path, .. } => path,
            PatchOp::Remove { path } => path,
            PatchOp::Replace { path, .. } => path,
        }
    }
}

/// Compute the operations that transform `base` into `next`.
///
/// Objects are diffed key by key, arrays index by index (removals emitted
/// deepest-first so they apply cleanly); everything else becomes a replace.
/// Returns an empty vec when the values are equal.
pub fn diff(base: &Value, next: &Value) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    diff_at("", base, next, &mut ops);
    ops
}

fn diff_at(path: &str, base: &Value, next: &Value, ops: &mut Vec<PatchOp>) {
    match (base, next) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, base_val) in a {
                let child = format!("{path}/{}", escape_pointer(key));
                match b.get(key) {
                    Some(next_val) => diff_at(&child, base_val, next_val, ops),
                    None => ops.push(PatchOp::Remove { path: child }),
                }
            }
            for (key, next_val) in b {
                if !a.contains_key(key) {
                    ops.push(PatchOp::Add {
                        path: format!("{path}/{}", escape_pointer(key)),
                        value: next_val.clone(),
                    });
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            let shared = a.len().min(b.len());
            for i in 0..shared {
                diff_at(&format!("{path}/{i}"), &a[i], &b[i], ops);
            }
            for (i, extra) in b.iter().enumerate().skip(shared) {
                ops.push(PatchOp::Add {
                    path: format!("{path}/{i}"),
                    value: extra.clone(),
                });
            }
            // Remove trailing elements highest index first.
            for i in (shared..a.len()).rev() {
                ops.push(PatchOp::Remove {
                    path: format!("{path}/{i}"),
                });
            }
        }
        _ => {
            if base != next {
                ops.push(PatchOp::Replace {
                    path: path.to_string(),
                    value: next.clone(),
                });
            }
        }
    }
}

/// Apply patch operations to a value, producing the patched result.
///
/// Used by tests and server-side replay to verify that a diff reconstructs
/// the new representation.
pub fn apply(base: &Value, ops: &[PatchOp]) -> Result<Value> {
    let mut result = base.clone();
    for op in ops {
        apply_one(&mut result, op)?;
    }
    Ok(result)
}

fn apply_one(value: &mut Value, op: &PatchOp) -> Result<()> {
    let path = op.path();
    if path.is_empty() {
        // Whole-document replacement.
        *value = match op {
            PatchOp::Add { value, .. } | PatchOp::Replace { value, .. } => value.clone(),
            PatchOp::Remove { .. } => Value::Null,
        };
        return Ok(());
    }
    let (parent_path, leaf) = split_pointer(path)?;
    let parent = value
        .pointer_mut(parent_path)
        .ok_or_else(|| Error::InvalidPatch(format!("missing path: {path}")))?;

    match (parent, op) {
        (Value::Object(map), PatchOp::Add { value, .. })
        | (Value::Object(map), PatchOp::Replace { value, .. }) => {
            map.insert(unescape_pointer(leaf), value.clone());
        }
        (Value::Object(map), PatchOp::Remove { .. }) => {
            map.remove(&unescape_pointer(leaf));
        }
        (Value::Array(items), PatchOp::Add { value, .. }) => {
            let index = parse_index(leaf, items.len() + 1, path)?;
            items.insert(index, value.clone());
        }
        (Value::Array(items), PatchOp::Replace { value, .. }) => {
            let index = parse_index(leaf, items.len(), path)?;
            items[index] = value.clone();
        }
        (Value::Array(items), PatchOp::Remove { .. }) => {
            let index = parse_index(leaf, items.len(), path)?;
            items.remove(index);
        }
        _ => {
            return Err(Error::InvalidPatch(format!(
                "cannot apply at non-container: {path}"
            )));
        }
    }
    Ok(())
}

fn split_pointer(path: &str) -> Result<(&str, &str)> {
    path.rsplit_once('/')
        .ok_or_else(|| Error::InvalidPatch(format!("not a pointer: {path}")))
}

fn parse_index(leaf: &str, bound: usize, path: &str) -> Result<usize> {
    let index: usize = leaf
        .parse()
        .map_err(|_| Error::InvalidPatch(format!("bad array index in: {path}")))?;
    if index >= bound {
        return Err(Error::InvalidPatch(format!("index out of range: {path}")));
    }
    Ok(index)
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn unescape_pointer(leaf: &str) -> String {
    leaf.replace("~1", "/").replace("~0", "~")
}
