//! Lock key resolution.
//!
//! A template such as `workflow:publish:{flow_id}` is resolved against the
//! call's arguments by a pure function; no reflection is involved.

use std::collections::{BTreeMap, HashMap};

use flowcast_types::error::LockError;

/// Named arguments a lock key template can refer to.
pub trait LockArgs {
    fn lock_arg(&self, name: &str) -> Option<String>;
}

impl LockArgs for () {
    fn lock_arg(&self, _name: &str) -> Option<String> {
        None
    }
}

impl LockArgs for HashMap<String, String> {
    fn lock_arg(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl LockArgs for BTreeMap<&str, String> {
    fn lock_arg(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl<const N: usize> LockArgs for [(&str, &str); N] {
    fn lock_arg(&self, name: &str) -> Option<String> {
        self.iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockKey {
    /// Used as is.
    Literal(String),
    /// `{name}` placeholders replaced by the call's arguments.
    Template(String),
}

impl LockKey {
    pub fn literal(key: impl Into<String>) -> Self {
        LockKey::Literal(key.into())
    }

    pub fn template(template: impl Into<String>) -> Self {
        LockKey::Template(template.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            LockKey::Literal(s) | LockKey::Template(s) => s,
        }
    }

    /// Resolve the key for one invocation.
    pub fn resolve<A: LockArgs + ?Sized>(&self, args: &A) -> Result<String, LockError> {
        match self {
            LockKey::Literal(key) => {
                if key.is_empty() {
                    return Err(LockError::KeyResolution {
                        template: key.clone(),
                        reason: "empty key".to_string(),
                    });
                }
                Ok(key.clone())
            }
            LockKey::Template(template) => resolve_template(template, args),
        }
    }
}

fn resolve_template<A: LockArgs + ?Sized>(template: &str, args: &A) -> Result<String, LockError> {
    let invalid = |reason: String| LockError::KeyResolution {
        template: template.to_string(),
        reason,
    };

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| invalid("unclosed '{'".to_string()))?;
        let name = after[..close].trim();
        if name.is_empty() {
            return Err(invalid("empty placeholder".to_string()));
        }
        let value = args
            .lock_arg(name)
            .ok_or_else(|| invalid(format!("missing argument '{name}'")))?;
        if value.is_empty() {
            return Err(invalid(format!("argument '{name}' is empty")));
        }
        out.push_str(&value);
        rest = &after[close + 1..];
    }
    if rest.contains('}') {
        return Err(invalid("unmatched '}'".to_string()));
    }
    out.push_str(rest);
    Ok(out)
}
