//! Typed, null-aware columns.
//!
//! A [`Column`] holds one series of values where every row is either known
//! (`Some`) or null (`None`). Operators never mutate their operands; each one
//! returns a fresh column of the same length. Null propagates through
//! arithmetic and comparison, logical operators follow three-valued logic.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Not, Sub};

use chrono::NaiveDate;
use serde::Serialize;

use crate::config::DivisionPolicy;
use crate::error::{ColumnError, ColumnResult};

/// Declared element type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Float,
    Bool,
    Date,
    Text,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::Float => "float",
            DType::Bool => "bool",
            DType::Date => "date",
            DType::Text => "text",
        };
        f.write_str(name)
    }
}

/// Storage for each supported element type.
#[derive(Debug, Clone)]
pub enum ColumnData {
    Float(Vec<Option<f64>>),
    Bool(Vec<Option<bool>>),
    Date(Vec<Option<NaiveDate>>),
    Text(Vec<Option<String>>),
}

/// Known `NaN`s compare equal to each other so that equality stays reflexive.
impl PartialEq for ColumnData {
    fn eq(&self, other: &Self) -> bool {
        fn same_float(left: &Option<f64>, right: &Option<f64>) -> bool {
            match (left, right) {
                (Some(l), Some(r)) => l == r || (l.is_nan() && r.is_nan()),
                (None, None) => true,
                _ => false,
            }
        }

        match (self, other) {
            (ColumnData::Float(l), ColumnData::Float(r)) => {
                l.len() == r.len() && l.iter().zip(r).all(|(a, b)| same_float(a, b))
            }
            (ColumnData::Bool(l), ColumnData::Bool(r)) => l == r,
            (ColumnData::Date(l), ColumnData::Date(r)) => l == r,
            (ColumnData::Text(l), ColumnData::Text(r)) => l == r,
            _ => false,
        }
    }
}

/// Scalar types a column can be built from.
pub trait Element: Clone {
    const DTYPE: DType;

    fn wrap(values: Vec<Option<Self>>) -> ColumnData;

    fn unwrap(data: &ColumnData) -> Option<&[Option<Self>]>;

    /// Whether `self` stands for a null when loading with a sentinel.
    fn is_sentinel(&self, sentinel: &Self) -> bool;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const DTYPE: DType = DType::$variant;

            fn wrap(values: Vec<Option<Self>>) -> ColumnData {
                ColumnData::$variant(values)
            }

            fn unwrap(data: &ColumnData) -> Option<&[Option<Self>]> {
                match data {
                    ColumnData::$variant(values) => Some(values.as_slice()),
                    _ => None,
                }
            }

            fn is_sentinel(&self, sentinel: &Self) -> bool {
                self == sentinel
            }
        }
    };
}

impl_element!(bool, Bool);
impl_element!(NaiveDate, Date);
impl_element!(String, Text);

impl Element for f64 {
    const DTYPE: DType = DType::Float;

    fn wrap(values: Vec<Option<Self>>) -> ColumnData {
        ColumnData::Float(values)
    }

    fn unwrap(data: &ColumnData) -> Option<&[Option<Self>]> {
        match data {
            ColumnData::Float(values) => Some(values.as_slice()),
            _ => None,
        }
    }

    fn is_sentinel(&self, sentinel: &Self) -> bool {
        self == sentinel || (self.is_nan() && sentinel.is_nan())
    }
}

#[derive(Debug, Clone, Copy)]
enum Arithmetic {
    Add,
    Sub,
    Mul,
    Div,
}

impl Arithmetic {
    fn name(self) -> &'static str {
        match self {
            Arithmetic::Add => "add",
            Arithmetic::Sub => "sub",
            Arithmetic::Mul => "mul",
            Arithmetic::Div => "div",
        }
    }

    fn apply(
        self,
        left: f64,
        right: f64,
        row: usize,
        policy: DivisionPolicy,
    ) -> ColumnResult<Option<f64>> {
        let value = match self {
            Arithmetic::Add => left + right,
            Arithmetic::Sub => left - right,
            Arithmetic::Mul => left * right,
            Arithmetic::Div if right == 0.0 => {
                return match policy {
                    DivisionPolicy::Null => Ok(None),
                    DivisionPolicy::Error => Err(ColumnError::DivisionByZero { row }),
                };
            }
            Arithmetic::Div => left / right,
        };
        Ok(Some(value))
    }
}

#[derive(Debug, Clone, Copy)]
enum Comparison {
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
}

impl Comparison {
    fn name(self) -> &'static str {
        match self {
            Comparison::Lt => "lt",
            Comparison::Le => "le",
            Comparison::Eq => "equal",
            Comparison::Ne => "not_equal",
            Comparison::Ge => "ge",
            Comparison::Gt => "gt",
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Comparison::Lt => ordering.is_lt(),
            Comparison::Le => ordering.is_le(),
            Comparison::Eq => ordering.is_eq(),
            Comparison::Ne => ordering.is_ne(),
            Comparison::Ge => ordering.is_ge(),
            Comparison::Gt => ordering.is_gt(),
        }
    }
}

/// Immutable, typed sequence of nullable values.
///
/// Equality is element-wise over values and null positions.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    data: ColumnData,
}

impl Column {
    pub fn new<T: Element>(values: Vec<Option<T>>) -> Self {
        Self {
            data: T::wrap(values),
        }
    }

    /// Build from dense values plus a mask where `true` marks a null row.
    pub fn with_null_mask<T: Element>(values: Vec<T>, nulls: &[bool]) -> ColumnResult<Self> {
        if values.len() != nulls.len() {
            return Err(ColumnError::MaskLength {
                values: values.len(),
                mask: nulls.len(),
            });
        }

        let values = values
            .into_iter()
            .zip(nulls)
            .map(|(value, null)| (!null).then_some(value))
            .collect();
        Ok(Self::new(values))
    }

    /// Build from dense values where any value equal to `sentinel` is null.
    /// A `NaN` sentinel matches every `NaN`.
    pub fn with_sentinel<T: Element>(values: Vec<T>, sentinel: &T) -> Self {
        let values = values
            .into_iter()
            .map(|value| (!value.is_sentinel(sentinel)).then_some(value))
            .collect();
        Self::new(values)
    }

    /// Repeat one known value `len` times.
    pub fn full<T: Element>(value: T, len: usize) -> Self {
        Self::new(vec![Some(value); len])
    }

    pub fn nulls(dtype: DType, len: usize) -> Self {
        let data = match dtype {
            DType::Float => ColumnData::Float(vec![None; len]),
            DType::Bool => ColumnData::Bool(vec![None; len]),
            DType::Date => ColumnData::Date(vec![None; len]),
            DType::Text => ColumnData::Text(vec![None; len]),
        };
        Self { data }
    }

    pub fn dtype(&self) -> DType {
        match &self.data {
            ColumnData::Float(_) => DType::Float,
            ColumnData::Bool(_) => DType::Bool,
            ColumnData::Date(_) => DType::Date,
            ColumnData::Text(_) => DType::Text,
        }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            ColumnData::Float(values) => values.len(),
            ColumnData::Bool(values) => values.len(),
            ColumnData::Date(values) => values.len(),
            ColumnData::Text(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    /// Typed view of the rows, `None` when `T` is not this column's type.
    pub fn values<T: Element>(&self) -> Option<&[Option<T>]> {
        T::unwrap(&self.data)
    }

    /// Typed view of the rows, failing with a type mismatch otherwise.
    pub fn expect_values<T: Element>(&self, operation: &'static str) -> ColumnResult<&[Option<T>]> {
        T::unwrap(&self.data).ok_or(ColumnError::TypeMismatch {
            operation,
            left: self.dtype(),
            right: T::DTYPE,
        })
    }

    pub fn floats(&self) -> Option<&[Option<f64>]> {
        self.values()
    }

    pub fn bools(&self) -> Option<&[Option<bool>]> {
        self.values()
    }

    pub fn null_count(&self) -> usize {
        self.null_mask().into_iter().filter(|null| *null).count()
    }

    /// `true` at every null row.
    pub fn null_mask(&self) -> Vec<bool> {
        fn mask<T>(values: &[Option<T>]) -> Vec<bool> {
            values.iter().map(Option::is_none).collect()
        }

        match &self.data {
            ColumnData::Float(values) => mask(values),
            ColumnData::Bool(values) => mask(values),
            ColumnData::Date(values) => mask(values),
            ColumnData::Text(values) => mask(values),
        }
    }

    /// Boolean column that is never null.
    pub fn is_null(&self) -> Column {
        Column::new(self.null_mask().into_iter().map(Some).collect())
    }

    pub fn add(&self, rhs: &Column) -> ColumnResult<Column> {
        self.arithmetic(rhs, Arithmetic::Add, DivisionPolicy::Null)
    }

    pub fn sub(&self, rhs: &Column) -> ColumnResult<Column> {
        self.arithmetic(rhs, Arithmetic::Sub, DivisionPolicy::Null)
    }

    pub fn mul(&self, rhs: &Column) -> ColumnResult<Column> {
        self.arithmetic(rhs, Arithmetic::Mul, DivisionPolicy::Null)
    }

    /// Division where a zero divisor yields null.
    pub fn div(&self, rhs: &Column) -> ColumnResult<Column> {
        self.div_with(rhs, DivisionPolicy::Null)
    }

    pub fn div_with(&self, rhs: &Column, policy: DivisionPolicy) -> ColumnResult<Column> {
        self.arithmetic(rhs, Arithmetic::Div, policy)
    }

    pub fn add_scalar(&self, value: f64) -> ColumnResult<Column> {
        self.add(&Column::full(value, self.len()))
    }

    pub fn sub_scalar(&self, value: f64) -> ColumnResult<Column> {
        self.sub(&Column::full(value, self.len()))
    }

    pub fn mul_scalar(&self, value: f64) -> ColumnResult<Column> {
        self.mul(&Column::full(value, self.len()))
    }

    pub fn div_scalar(&self, value: f64) -> ColumnResult<Column> {
        self.div(&Column::full(value, self.len()))
    }

    pub fn neg(&self) -> ColumnResult<Column> {
        self.map_floats("neg", |value| -value)
    }

    pub fn abs(&self) -> ColumnResult<Column> {
        self.map_floats("abs", f64::abs)
    }

    /// Lag by `periods` rows; the first `periods` rows become null.
    pub fn shift(&self, periods: usize) -> Column {
        fn lag<T: Clone>(values: &[Option<T>], periods: usize) -> Vec<Option<T>> {
            let len = values.len();
            let head = periods.min(len);
            let mut shifted = vec![None; head];
            shifted.extend_from_slice(&values[..len - head]);
            shifted
        }

        let data = match &self.data {
            ColumnData::Float(values) => ColumnData::Float(lag(values, periods)),
            ColumnData::Bool(values) => ColumnData::Bool(lag(values, periods)),
            ColumnData::Date(values) => ColumnData::Date(lag(values, periods)),
            ColumnData::Text(values) => ColumnData::Text(lag(values, periods)),
        };
        Column { data }
    }

    /// Stretch a single-row column to `len` rows. A column that already has
    /// `len` rows is returned unchanged.
    pub fn broadcast(&self, len: usize) -> ColumnResult<Column> {
        fn repeat<T: Clone>(values: &[Option<T>], len: usize) -> Vec<Option<T>> {
            vec![values[0].clone(); len]
        }

        if self.len() == len {
            return Ok(self.clone());
        }
        if self.len() != 1 {
            return Err(ColumnError::LengthMismatch {
                left: self.len(),
                right: len,
            });
        }

        let data = match &self.data {
            ColumnData::Float(values) => ColumnData::Float(repeat(values, len)),
            ColumnData::Bool(values) => ColumnData::Bool(repeat(values, len)),
            ColumnData::Date(values) => ColumnData::Date(repeat(values, len)),
            ColumnData::Text(values) => ColumnData::Text(repeat(values, len)),
        };
        Ok(Column { data })
    }

    pub fn lt(&self, rhs: &Column) -> ColumnResult<Column> {
        self.compare(rhs, Comparison::Lt)
    }

    pub fn le(&self, rhs: &Column) -> ColumnResult<Column> {
        self.compare(rhs, Comparison::Le)
    }

    pub fn equal(&self, rhs: &Column) -> ColumnResult<Column> {
        self.compare(rhs, Comparison::Eq)
    }

    pub fn not_equal(&self, rhs: &Column) -> ColumnResult<Column> {
        self.compare(rhs, Comparison::Ne)
    }

    pub fn ge(&self, rhs: &Column) -> ColumnResult<Column> {
        self.compare(rhs, Comparison::Ge)
    }

    pub fn gt(&self, rhs: &Column) -> ColumnResult<Column> {
        self.compare(rhs, Comparison::Gt)
    }

    /// Three-valued AND: a known `false` on either side decides the row.
    pub fn and(&self, rhs: &Column) -> ColumnResult<Column> {
        self.logical(rhs, "and", |left, right| match (left, right) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        })
    }

    /// Three-valued OR: a known `true` on either side decides the row.
    pub fn or(&self, rhs: &Column) -> ColumnResult<Column> {
        self.logical(rhs, "or", |left, right| match (left, right) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        })
    }

    pub fn not(&self) -> ColumnResult<Column> {
        let values = self.expect_values::<bool>("not")?;
        Ok(Column::new(
            values.iter().map(|value| value.map(|v| !v)).collect(),
        ))
    }

    fn ensure_same_len(&self, rhs: &Column) -> ColumnResult<()> {
        if self.len() != rhs.len() {
            return Err(ColumnError::LengthMismatch {
                left: self.len(),
                right: rhs.len(),
            });
        }
        Ok(())
    }

    fn mismatch(&self, rhs: &Column, operation: &'static str) -> ColumnError {
        ColumnError::TypeMismatch {
            operation,
            left: self.dtype(),
            right: rhs.dtype(),
        }
    }

    fn map_floats(&self, operation: &'static str, op: impl Fn(f64) -> f64) -> ColumnResult<Column> {
        let values = self.expect_values::<f64>(operation)?;
        Ok(Column::new(
            values.iter().map(|value| value.map(&op)).collect(),
        ))
    }

    fn arithmetic(
        &self,
        rhs: &Column,
        op: Arithmetic,
        policy: DivisionPolicy,
    ) -> ColumnResult<Column> {
        let (ColumnData::Float(left), ColumnData::Float(right)) = (&self.data, &rhs.data) else {
            return Err(self.mismatch(rhs, op.name()));
        };
        self.ensure_same_len(rhs)?;

        let mut out = Vec::with_capacity(left.len());
        for (row, pair) in left.iter().zip(right).enumerate() {
            let value = match pair {
                (Some(l), Some(r)) => op.apply(*l, *r, row, policy)?,
                _ => None,
            };
            out.push(value);
        }
        Ok(Column::new(out))
    }

    fn compare(&self, rhs: &Column, op: Comparison) -> ColumnResult<Column> {
        fn zip_with<T>(
            left: &[Option<T>],
            right: &[Option<T>],
            op: Comparison,
            cmp: impl Fn(&T, &T) -> Option<Ordering>,
        ) -> Vec<Option<bool>> {
            left.iter()
                .zip(right)
                .map(|pair| match pair {
                    (Some(l), Some(r)) => cmp(l, r).map(|ordering| op.holds(ordering)),
                    _ => None,
                })
                .collect()
        }

        if self.dtype() != rhs.dtype() {
            return Err(self.mismatch(rhs, op.name()));
        }
        self.ensure_same_len(rhs)?;

        let values = match (&self.data, &rhs.data) {
            (ColumnData::Float(l), ColumnData::Float(r)) => zip_with(l, r, op, |a, b| a.partial_cmp(b)),
            (ColumnData::Bool(l), ColumnData::Bool(r)) => zip_with(l, r, op, |a, b| Some(a.cmp(b))),
            (ColumnData::Date(l), ColumnData::Date(r)) => zip_with(l, r, op, |a, b| Some(a.cmp(b))),
            (ColumnData::Text(l), ColumnData::Text(r)) => zip_with(l, r, op, |a, b| Some(a.cmp(b))),
            _ => return Err(self.mismatch(rhs, op.name())),
        };
        Ok(Column::new(values))
    }

    fn logical(
        &self,
        rhs: &Column,
        operation: &'static str,
        table: impl Fn(Option<bool>, Option<bool>) -> Option<bool>,
    ) -> ColumnResult<Column> {
        let (ColumnData::Bool(left), ColumnData::Bool(right)) = (&self.data, &rhs.data) else {
            return Err(self.mismatch(rhs, operation));
        };
        self.ensure_same_len(rhs)?;

        Ok(Column::new(
            left.iter()
                .zip(right)
                .map(|(l, r)| table(*l, *r))
                .collect(),
        ))
    }
}

macro_rules! impl_from_vec {
    ($($ty:ty),*) => {
        $(
            impl From<Vec<Option<$ty>>> for Column {
                fn from(values: Vec<Option<$ty>>) -> Self {
                    Column::new(values)
                }
            }

            impl From<Vec<$ty>> for Column {
                fn from(values: Vec<$ty>) -> Self {
                    Column::new(values.into_iter().map(Some).collect())
                }
            }
        )*
    };
}

impl_from_vec!(f64, bool, NaiveDate, String);

impl From<Vec<Option<&str>>> for Column {
    fn from(values: Vec<Option<&str>>) -> Self {
        Column::new(
            values
                .into_iter()
                .map(|value| value.map(str::to_owned))
                .collect(),
        )
    }
}

impl From<Vec<&str>> for Column {
    fn from(values: Vec<&str>) -> Self {
        Column::new(values.into_iter().map(|value| Some(value.to_owned())).collect())
    }
}

macro_rules! impl_binary_operator {
    ($trait:ident, $method:ident) => {
        impl $trait<&Column> for &Column {
            type Output = ColumnResult<Column>;

            fn $method(self, rhs: &Column) -> Self::Output {
                Column::$method(self, rhs)
            }
        }
    };
}

impl_binary_operator!(Add, add);
impl_binary_operator!(Sub, sub);
impl_binary_operator!(Mul, mul);
impl_binary_operator!(Div, div);

macro_rules! impl_scalar_operator {
    ($trait:ident, $method:ident, $scalar:ident) => {
        impl $trait<f64> for &Column {
            type Output = ColumnResult<Column>;

            fn $method(self, rhs: f64) -> Self::Output {
                Column::$scalar(self, rhs)
            }
        }
    };
}

impl_scalar_operator!(Add, add, add_scalar);
impl_scalar_operator!(Sub, sub, sub_scalar);
impl_scalar_operator!(Mul, mul, mul_scalar);
impl_scalar_operator!(Div, div, div_scalar);

impl Neg for &Column {
    type Output = ColumnResult<Column>;

    fn neg(self) -> Self::Output {
        Column::neg(self)
    }
}

impl Not for &Column {
    type Output = ColumnResult<Column>;

    fn not(self) -> Self::Output {
        Column::not(self)
    }
}
