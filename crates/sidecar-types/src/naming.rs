//! Output naming for dumped, merged and cloned files.
//!
//! A [`Naming`] turns a set of string keys into a relative file name, either
//! through a `{key}` template or a caller-supplied function.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path};
use std::sync::Arc;

use crate::error::{TypeError, TypeResult};

/// Template used when no naming is given.
pub const DEFAULT_NAMING: &str = "{name}_{uid}_{start}_{stop}.sct";

/// Keys available to a naming template.
pub type NamingKeys = BTreeMap<String, String>;

/// Function form of a naming rule.
pub type NamingFn = Arc<dyn Fn(&NamingKeys) -> String + Send + Sync>;

/// A rule producing a relative file name from [`NamingKeys`].
#[derive(Clone)]
pub enum Naming {
    /// `str::format`-like template, e.g. `{name}_{start}_{stop}.sct`.
    Template(String),
    /// Arbitrary function over the keys.
    Func(NamingFn),
}

impl Naming {
    pub fn template(template: impl Into<String>) -> Self {
        Self::Template(template.into())
    }

    pub fn func<F>(f: F) -> Self
    where
        F: Fn(&NamingKeys) -> String + Send + Sync + 'static,
    {
        Self::Func(Arc::new(f))
    }

    /// Produce the name for `keys`.
    pub fn apply(&self, keys: &NamingKeys) -> TypeResult<String> {
        match self {
            Self::Template(t) => format_template(t, keys),
            Self::Func(f) => Ok(f(keys)),
        }
    }
}

impl Default for Naming {
    fn default() -> Self {
        Self::Template(DEFAULT_NAMING.to_string())
    }
}

impl fmt::Debug for Naming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Template(t) => f.debug_tuple("Template").field(t).finish(),
            Self::Func(_) => f.write_str("Func(..)"),
        }
    }
}

impl From<&str> for Naming {
    fn from(template: &str) -> Self {
        Self::Template(template.to_string())
    }
}

impl From<String> for Naming {
    fn from(template: String) -> Self {
        Self::Template(template)
    }
}

/// Substitute `{key}` placeholders. `{{` and `}}` are literal braces.
pub fn format_template(template: &str, keys: &NamingKeys) -> TypeResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut key = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(k) => key.push(k),
                        None => {
                            return Err(TypeError::Naming(format!(
                                "unclosed placeholder in {template:?}"
                            )))
                        }
                    }
                }
                let value = keys.get(&key).ok_or_else(|| {
                    TypeError::Naming(format!("unknown key {{{key}}} in {template:?}"))
                })?;
                out.push_str(value);
            }
            '}' => {
                return Err(TypeError::Naming(format!(
                    "unmatched '}}' in {template:?}"
                )))
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

/// Reversed path components as `{prefix}0` (file name), `{prefix}1`
/// (parent directory), and so on. Root and prefix components are skipped.
pub fn path_parts(path: &Path, prefix: &str) -> NamingKeys {
    let parts: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    parts
        .into_iter()
        .rev()
        .enumerate()
        .map(|(i, part)| (format!("{prefix}{i}"), part))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> NamingKeys {
        let mut keys = path_parts(Path::new("/a/b/c/target.sct"), "path");
        keys.insert("name".into(), "jets".into());
        keys.insert("start".into(), "100".into());
        keys.insert("stop".into(), "200".into());
        keys
    }

    #[test]
    fn path_parts_reversed() {
        let parts = path_parts(Path::new("/a/b/c/target.sct"), "path");
        assert_eq!(parts["path0"], "target.sct");
        assert_eq!(parts["path1"], "c");
        assert_eq!(parts["path3"], "a");
        assert!(!parts.contains_key("path4"));
    }

    #[test]
    fn template_substitutes_keys() {
        let name = Naming::from("{path2}/{path1}/{name}_{start}_{stop}.sct")
            .apply(&keys())
            .unwrap();
        assert_eq!(name, "b/c/jets_100_200.sct");
    }

    #[test]
    fn template_escapes_and_errors() {
        assert_eq!(format_template("{{{name}}}", &keys()).unwrap(), "{jets}");
        assert!(matches!(format_template("{nope}", &keys()), Err(TypeError::Naming(_))));
        assert!(matches!(format_template("{name", &keys()), Err(TypeError::Naming(_))));
        assert!(matches!(format_template("name}", &keys()), Err(TypeError::Naming(_))));
    }

    #[test]
    fn func_naming() {
        let naming = Naming::func(|k| format!("{}_{}.sct", &k["path0"][..3], k["start"]));
        assert_eq!(naming.apply(&keys()).unwrap(), "tar_100.sct");
    }
}
