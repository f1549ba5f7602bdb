use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{TypeError, TypeResult};

/// Element type of a [`Column`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Bool,
    Int64,
    UInt64,
    Float64,
    Utf8,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int64 => write!(f, "int64"),
            Self::UInt64 => write!(f, "uint64"),
            Self::Float64 => write!(f, "float64"),
            Self::Utf8 => write!(f, "utf8"),
        }
    }
}

/// A typed column of values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Column {
    Bool(Vec<bool>),
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
    Float64(Vec<f64>),
    Utf8(Vec<String>),
}

macro_rules! each_column {
    ($col:expr, $v:ident => $body:expr) => {
        match $col {
            Column::Bool($v) => $body,
            Column::Int64($v) => $body,
            Column::UInt64($v) => $body,
            Column::Float64($v) => $body,
            Column::Utf8($v) => $body,
        }
    };
}

impl Column {
    /// An empty column of the given type.
    pub fn empty(ty: ColumnType) -> Self {
        match ty {
            ColumnType::Bool => Self::Bool(Vec::new()),
            ColumnType::Int64 => Self::Int64(Vec::new()),
            ColumnType::UInt64 => Self::UInt64(Vec::new()),
            ColumnType::Float64 => Self::Float64(Vec::new()),
            ColumnType::Utf8 => Self::Utf8(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        each_column!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Bool(_) => ColumnType::Bool,
            Self::Int64(_) => ColumnType::Int64,
            Self::UInt64(_) => ColumnType::UInt64,
            Self::Float64(_) => ColumnType::Float64,
            Self::Utf8(_) => ColumnType::Utf8,
        }
    }

    /// Rows `[start, stop)`. The caller guarantees the bounds.
    fn slice_unchecked(&self, start: usize, stop: usize) -> Self {
        match self {
            Self::Bool(v) => Self::Bool(v[start..stop].to_vec()),
            Self::Int64(v) => Self::Int64(v[start..stop].to_vec()),
            Self::UInt64(v) => Self::UInt64(v[start..stop].to_vec()),
            Self::Float64(v) => Self::Float64(v[start..stop].to_vec()),
            Self::Utf8(v) => Self::Utf8(v[start..stop].to_vec()),
        }
    }

    /// Append `other` to the end of this column. Types must match.
    pub fn append(&mut self, branch: &str, other: &Column) -> TypeResult<()> {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.extend_from_slice(b),
            (Self::Int64(a), Self::Int64(b)) => a.extend_from_slice(b),
            (Self::UInt64(a), Self::UInt64(b)) => a.extend_from_slice(b),
            (Self::Float64(a), Self::Float64(b)) => a.extend_from_slice(b),
            (Self::Utf8(a), Self::Utf8(b)) => a.extend_from_slice(b),
            (a, b) => {
                return Err(TypeError::TypeMismatch {
                    branch: branch.to_string(),
                    expected: a.column_type().to_string(),
                    actual: b.column_type().to_string(),
                })
            }
        }
        Ok(())
    }
}

/// How [`Batch::zip`] treats a branch present on both sides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictPolicy {
    /// The right-hand column replaces the left-hand one.
    #[default]
    LastWins,
    /// A duplicate branch is an error.
    Error,
}

/// An in-memory record batch: named columns of equal length.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    rows: usize,
    columns: BTreeMap<String, Column>,
}

impl Batch {
    /// Build a batch from named columns. All columns must have the same
    /// number of rows.
    pub fn new<I, S>(columns: I) -> TypeResult<Self>
    where
        I: IntoIterator<Item = (S, Column)>,
        S: Into<String>,
    {
        let mut map = BTreeMap::new();
        let mut rows = None;
        for (name, column) in columns {
            let name = name.into();
            match rows {
                None => rows = Some(column.len()),
                Some(expected) if expected != column.len() => {
                    return Err(TypeError::LengthMismatch {
                        branch: name,
                        expected,
                        actual: column.len(),
                    })
                }
                Some(_) => {}
            }
            if map.insert(name.clone(), column).is_some() {
                return Err(TypeError::DuplicateBranch(name));
            }
        }
        Ok(Self {
            rows: rows.unwrap_or(0),
            columns: map,
        })
    }

    /// A batch with rows but no columns.
    pub fn with_rows(rows: usize) -> Self {
        Self {
            rows,
            columns: BTreeMap::new(),
        }
    }

    /// An empty batch with the given schema.
    pub fn empty(schema: &BTreeMap<String, ColumnType>) -> Self {
        Self {
            rows: 0,
            columns: schema
                .iter()
                .map(|(name, ty)| (name.clone(), Column::empty(*ty)))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, branch: &str) -> Option<&Column> {
        self.columns.get(branch)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&String, &Column)> {
        self.columns.iter()
    }

    pub fn into_columns(self) -> BTreeMap<String, Column> {
        self.columns
    }

    pub fn branches(&self) -> BTreeSet<String> {
        self.columns.keys().cloned().collect()
    }

    pub fn schema(&self) -> BTreeMap<String, ColumnType> {
        self.columns
            .iter()
            .map(|(name, col)| (name.clone(), col.column_type()))
            .collect()
    }

    /// Rows `[start, stop)`.
    pub fn slice(&self, start: usize, stop: usize) -> TypeResult<Self> {
        if start > stop || stop > self.rows {
            return Err(TypeError::OutOfBounds {
                start: start as u64,
                stop: stop as u64,
                len: self.rows as u64,
            });
        }
        Ok(Self {
            rows: stop - start,
            columns: self
                .columns
                .iter()
                .map(|(name, col)| (name.clone(), col.slice_unchecked(start, stop)))
                .collect(),
        })
    }

    /// Vertically concatenate batches with identical schemas.
    pub fn concat(batches: &[Batch]) -> TypeResult<Self> {
        let Some(first) = batches.first() else {
            return Ok(Self::default());
        };
        let mut out = first.clone();
        for batch in &batches[1..] {
            out.append(batch)?;
        }
        Ok(out)
    }

    /// Append the rows of `other`. Schemas must be identical.
    pub fn append(&mut self, other: &Batch) -> TypeResult<()> {
        if self.branches() != other.branches() {
            return Err(TypeError::SchemaMismatch(format!(
                "cannot concatenate branches {:?} with {:?}",
                self.branches(),
                other.branches()
            )));
        }
        for (name, col) in self.columns.iter_mut() {
            if let Some(extra) = other.columns.get(name) {
                col.append(name, extra)?;
            }
        }
        self.rows += other.rows;
        Ok(())
    }

    /// Keep only `branches`. Every requested branch must exist.
    pub fn project(&self, branches: &BTreeSet<String>) -> TypeResult<Self> {
        let mut columns = BTreeMap::new();
        for name in branches {
            let col = self
                .columns
                .get(name)
                .ok_or_else(|| TypeError::MissingBranch(name.clone()))?;
            columns.insert(name.clone(), col.clone());
        }
        Ok(Self {
            rows: self.rows,
            columns,
        })
    }

    /// Rename every branch with `f`. Two branches mapping to the same name
    /// is an error.
    pub fn rename<F>(self, mut f: F) -> TypeResult<Self>
    where
        F: FnMut(&str) -> String,
    {
        let mut columns = BTreeMap::new();
        for (name, col) in self.columns {
            let renamed = f(&name);
            if columns.insert(renamed.clone(), col).is_some() {
                return Err(TypeError::DuplicateBranch(renamed));
            }
        }
        Ok(Self {
            rows: self.rows,
            columns,
        })
    }

    /// Horizontally merge `other` into this batch. Row counts must match.
    pub fn zip(mut self, other: Batch, policy: ConflictPolicy) -> TypeResult<Self> {
        if self.rows != other.rows && !(self.columns.is_empty() && self.rows == 0) {
            return Err(TypeError::LengthMismatch {
                branch: other.columns.keys().next().cloned().unwrap_or_default(),
                expected: self.rows,
                actual: other.rows,
            });
        }
        self.rows = other.rows;
        for (name, col) in other.columns {
            if policy == ConflictPolicy::Error && self.columns.contains_key(&name) {
                return Err(TypeError::DuplicateBranch(name));
            }
            self.columns.insert(name, col);
        }
        Ok(self)
    }
}
