//! Utilities for the JSON values merged and shaped during execution.

use std::fmt;

use apollo_compiler::ast;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
pub use serde_json_bytes::Value;

/// A JSON object.
pub type Object = Map<ByteString, Value>;

pub(crate) fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Extension trait for [`Value`].
pub(crate) trait ValueExt {
    /// Deep merge the JSON objects, array and override the values in `&mut self` if they already
    /// exists.
    fn deep_merge(&mut self, other: Self);

    /// Returns a reference to the value found at `path`, if any.
    fn get_path(&self, path: &Path) -> Option<&Value>;

    /// Returns a mutable reference to the value found at `path`, if any.
    fn get_path_mut(&mut self, path: &Path) -> Option<&mut Value>;

    /// Walks the response keys of `keys` through `self`, expanding every list it
    /// crosses, and calls `f` with each non-null object found at the end of the
    /// walk along with its absolute path.
    fn select_values_and_paths<'a, F>(&'a self, keys: &[String], f: F)
    where
        F: FnMut(&Path, &'a Object);
}

impl ValueExt for Value {
    fn deep_merge(&mut self, other: Self) {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => {
                for (key, value) in b.into_iter() {
                    match a.get_mut(key.as_str()) {
                        Some(existing) => existing.deep_merge(value),
                        None => {
                            a.insert(key, value);
                        }
                    }
                }
            }
            (Value::Array(a), Value::Array(mut b)) => {
                let shared = a.len().min(b.len());
                for (a_value, b_value) in a.iter_mut().zip(b.drain(..shared)) {
                    a_value.deep_merge(b_value);
                }
                a.extend(b);
            }
            (_, Value::Null) => {}
            (Value::Object(_), Value::Array(_)) => {
                failfast_debug!("trying to replace an object with an array");
            }
            (Value::Array(_), Value::Object(_)) => {
                failfast_debug!("trying to replace an array with an object");
            }
            (a, b) => {
                *a = b;
            }
        }
    }

    fn get_path(&self, path: &Path) -> Option<&Value> {
        let mut current = self;
        for element in path.iter() {
            current = match (element, current) {
                (PathElement::Key(key), Value::Object(object)) => object.get(key.as_str())?,
                (PathElement::Index(index), Value::Array(array)) => array.get(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    fn get_path_mut(&mut self, path: &Path) -> Option<&mut Value> {
        let mut current = self;
        for element in path.iter() {
            current = match (element, current) {
                (PathElement::Key(key), Value::Object(object)) => object.get_mut(key.as_str())?,
                (PathElement::Index(index), Value::Array(array)) => array.get_mut(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    fn select_values_and_paths<'a, F>(&'a self, keys: &[String], mut f: F)
    where
        F: FnMut(&Path, &'a Object),
    {
        iterate_path(&mut Path::empty(), keys, self, &mut f)
    }
}

fn iterate_path<'a, F>(parent: &mut Path, keys: &[String], data: &'a Value, f: &mut F)
where
    F: FnMut(&Path, &'a Object),
{
    match data {
        Value::Array(array) => {
            for (index, element) in array.iter().enumerate() {
                parent.push(PathElement::Index(index));
                iterate_path(parent, keys, element, f);
                parent.pop();
            }
        }
        Value::Object(object) => match keys.split_first() {
            None => f(parent, object),
            Some((key, rest)) => {
                if let Some(value) = object.get(key.as_str()) {
                    parent.push(PathElement::Key(key.clone()));
                    iterate_path(parent, rest, value, f);
                    parent.pop();
                }
            }
        },
        _ => {}
    }
}

/// Converts a constant GraphQL literal into JSON.
///
/// Variables have no constant value and convert to `None`.
pub(crate) fn from_ast_value(value: &ast::Value) -> Option<Value> {
    Some(match value {
        ast::Value::Null => Value::Null,
        ast::Value::Enum(name) => Value::String(name.as_str().into()),
        ast::Value::Variable(_) => return None,
        ast::Value::String(s) => Value::String(s.as_str().into()),
        ast::Value::Float(f) => {
            let number: f64 = f.as_str().parse().ok()?;
            Value::Number(serde_json::Number::from_f64(number)?)
        }
        ast::Value::Int(i) => match i.as_str().parse::<i64>() {
            Ok(number) => Value::Number(number.into()),
            Err(_) => {
                let number: f64 = i.as_str().parse().ok()?;
                Value::Number(serde_json::Number::from_f64(number)?)
            }
        },
        ast::Value::Boolean(b) => Value::Bool(*b),
        ast::Value::List(items) => Value::Array(
            items
                .iter()
                .map(|item| from_ast_value(item))
                .collect::<Option<Vec<_>>>()?,
        ),
        ast::Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, value)| Some((ByteString::from(name.as_str()), from_ast_value(value)?)))
                .collect::<Option<Object>>()?,
        ),
    })
}

/// A path element in a [`Path`].
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathElement {
    /// An index path element.
    Index(usize),

    /// A key path element.
    Key(String),
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::Index(index) => write!(f, "{index}"),
            PathElement::Key(key) => write!(f, "{key}"),
        }
    }
}

/// A path into the result document.
///
/// This can be composed of strings and numbers
#[derive(Clone, Debug, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn empty() -> Path {
        Path(Default::default())
    }

    pub fn from_keys<T: AsRef<str>>(keys: &[T]) -> Path {
        Path(
            keys.iter()
                .map(|key| PathElement::Key(key.as_ref().to_string()))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }

    pub fn push(&mut self, element: PathElement) {
        self.0.push(element)
    }

    pub fn pop(&mut self) -> Option<PathElement> {
        self.0.pop()
    }

    pub fn first(&self) -> Option<&PathElement> {
        self.0.first()
    }

    pub fn join(&self, other: impl AsRef<Self>) -> Self {
        let mut new = self.0.clone();
        new.extend(other.as_ref().0.iter().cloned());
        Path(new)
    }
}

impl AsRef<Path> for Path {
    fn as_ref(&self) -> &Path {
        self
    }
}

impl From<Vec<PathElement>> for Path {
    fn from(elements: Vec<PathElement>) -> Self {
        Path(elements)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in self.iter() {
            write!(f, "/{element}")?;
        }
        Ok(())
    }
}
