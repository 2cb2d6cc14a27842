//! Typed column storage and its type-erased interface.
//!
//! Tables store heterogeneous columns behind `Box<dyn TypeErasedColumn>`. Each
//! concrete column is a [`Column<T>`], a dense vector of values that supports
//! constant-time append and swap-remove. Moving a row between two tables is a
//! safe move of `T` from one column into another; no bytes are copied by hand.
//!
//! # Type erasure
//!
//! [`TypeErasedColumn`] is the runtime descriptor used by table code: it knows
//! how to push a boxed value, drop a row, move a row into a sibling column of the
//! same element type and produce an empty column of its own type. These are the
//! move/drop hooks a table needs, carried by the trait object's vtable instead of
//! raw function pointers.
//!
//! # Aliasing
//!
//! Values live in `UnsafeCell`s so that a column reachable through a shared
//! `&World` can hand out `&mut T` to the one system that declared write access
//! to it. [`Column::get_unchecked_mut`] is `unsafe` for that reason: callers must
//! guarantee that no other reference to the same row is alive. The scheduler
//! upholds this through static access analysis.
//!
//! # Invariants
//! - Row indices passed in are always `< len()`. Out-of-range rows are a broken
//!   invariant and panic.
//! - A column never changes element type.

use std::{
    any::{Any, TypeId, type_name},
    cell::UnsafeCell,
};

use crate::engine::error::StorageError;


/// Dense storage for values of a single type `T`.
///
/// Rows are packed without gaps. Removing a row moves the last row into its
/// place, so row order is not stable across removals.

pub struct Column<T> {
    values: Vec<UnsafeCell<T>>,
}

// SAFETY: shared access to a column only yields `&T`, except through
// `get_unchecked_mut`, whose callers guarantee exclusive access to the row.
unsafe impl<T: Send + Sync> Sync for Column<T> {}

impl<T> Default for Column<T> {
    fn default() -> Self {
        Self { values: Vec::new() }
    }
}

impl<T: Send + Sync + 'static> Column<T> {
    /// Creates an empty column.
    pub fn new() -> Self { Self::default() }

    /// Returns the number of rows.
    #[inline]
    pub fn len(&self) -> usize { self.values.len() }

    /// Returns `true` if the column has no rows.
    #[inline]
    pub fn is_empty(&self) -> bool { self.values.is_empty() }

    /// Appends a value and returns its row.
    pub fn push(&mut self, value: T) -> usize {
        self.values.push(UnsafeCell::new(value));
        self.values.len() - 1
    }

    /// Returns a shared reference to the value at `row`.
    ///
    /// ## Panics
    /// Panics if `row` is out of range.
    #[inline]
    pub fn get(&self, row: usize) -> &T {
        let cell = self.cell(row);
        // SAFETY: writers through `get_unchecked_mut` guarantee that no
        // shared reference to this row coexists with their exclusive one.
        unsafe { &*cell.get() }
    }

    /// Returns a mutable reference to the value at `row`.
    ///
    /// ## Panics
    /// Panics if `row` is out of range.
    #[inline]
    pub fn get_mut(&mut self, row: usize) -> &mut T {
        let len = self.values.len();
        match self.values.get_mut(row) {
            Some(cell) => cell.get_mut(),
            None => panic!("row {row} out of range for column of {len} rows"),
        }
    }

    /// Returns a mutable reference to the value at `row` through a shared borrow.
    ///
    /// ## Safety
    /// The caller must guarantee that no other reference to this row exists for
    /// the lifetime of the returned reference.
    ///
    /// ## Panics
    /// Panics if `row` is out of range.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_unchecked_mut(&self, row: usize) -> &mut T {
        let cell = self.cell(row);
        // SAFETY: exclusivity is guaranteed by the caller.
        unsafe { &mut *cell.get() }
    }

    /// Removes the value at `row` and returns it, moving the last row into its place.
    ///
    /// ## Panics
    /// Panics if `row` is out of range.
    pub fn swap_remove(&mut self, row: usize) -> T {
        assert!(row < self.values.len(), "row {row} out of range for column of {} rows", self.values.len());
        self.values.swap_remove(row).into_inner()
    }

    /// Iterates over every value in row order.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len()).map(move |row| self.get(row))
    }

    #[inline]
    fn cell(&self, row: usize) -> &UnsafeCell<T> {
        match self.values.get(row) {
            Some(cell) => cell,
            None => panic!("row {row} out of range for column of {} rows", self.values.len()),
        }
    }
}

/// Runtime interface over a [`Column<T>`] whose `T` is not known statically.
///
/// ## Purpose
/// Lets tables move, drop and append rows of every column uniformly. Typed
/// access is recovered with [`downcast`] / [`downcast_mut`].

pub trait TypeErasedColumn: Any + Send + Sync + 'static {
    /// Returns the `TypeId` of the element type.
    fn element_type_id(&self) -> TypeId;

    /// Returns the element type name.
    fn element_type_name(&self) -> &'static str;

    /// Returns the number of rows.
    fn len(&self) -> usize;

    /// Returns `true` if the column has no rows.
    fn is_empty(&self) -> bool { self.len() == 0 }

    /// Upcasts to `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Upcasts to `Any` for mutable downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Appends a boxed value of the element type.
    fn push_dyn(&mut self, value: Box<dyn Any + Send>) -> Result<(), StorageError>;

    /// Replaces the value at `row` with a boxed value of the element type.
    fn replace_dyn(&mut self, row: usize, value: Box<dyn Any + Send>) -> Result<(), StorageError>;

    /// Drops the value at `row`, moving the last row into its place.
    fn swap_remove_dyn(&mut self, row: usize);

    /// Removes and returns the value at `row`, moving the last row into its place.
    fn take_dyn(&mut self, row: usize) -> Box<dyn Any + Send>;

    /// Moves the value at `row` to the end of `dst`, swap-removing it here.
    fn swap_move_dyn(&mut self, row: usize, dst: &mut dyn TypeErasedColumn) -> Result<(), StorageError>;

    /// Creates an empty column with the same element type.
    fn empty_like(&self) -> Box<dyn TypeErasedColumn>;
}

impl<T: Send + Sync + 'static> TypeErasedColumn for Column<T> {
    fn element_type_id(&self) -> TypeId { TypeId::of::<T>() }

    fn element_type_name(&self) -> &'static str { type_name::<T>() }

    fn len(&self) -> usize { self.values.len() }

    fn as_any(&self) -> &dyn Any { self }

    fn as_any_mut(&mut self) -> &mut dyn Any { self }

    fn push_dyn(&mut self, value: Box<dyn Any + Send>) -> Result<(), StorageError> {
        match value.downcast::<T>() {
            Ok(value) => {
                self.push(*value);
                Ok(())
            }
            Err(_) => Err(StorageError::TypeMismatch { expected: type_name::<T>() }),
        }
    }

    fn replace_dyn(&mut self, row: usize, value: Box<dyn Any + Send>) -> Result<(), StorageError> {
        match value.downcast::<T>() {
            Ok(value) => {
                *self.get_mut(row) = *value;
                Ok(())
            }
            Err(_) => Err(StorageError::TypeMismatch { expected: type_name::<T>() }),
        }
    }

    fn swap_remove_dyn(&mut self, row: usize) {
        drop(self.swap_remove(row));
    }

    fn take_dyn(&mut self, row: usize) -> Box<dyn Any + Send> {
        Box::new(self.swap_remove(row))
    }

    fn swap_move_dyn(&mut self, row: usize, dst: &mut dyn TypeErasedColumn) -> Result<(), StorageError> {
        let to = dst.element_type_name();
        let Some(dst) = dst.as_any_mut().downcast_mut::<Column<T>>() else {
            return Err(StorageError::ColumnMismatch { from: type_name::<T>(), to });
        };
        dst.push(self.swap_remove(row));
        Ok(())
    }

    fn empty_like(&self) -> Box<dyn TypeErasedColumn> {
        Box::new(Column::<T>::new())
    }
}

/// Downcasts a type-erased column to its concrete type.
#[inline]
pub fn downcast<T: Send + Sync + 'static>(column: &dyn TypeErasedColumn) -> Option<&Column<T>> {
    column.as_any().downcast_ref::<Column<T>>()
}

/// Mutably downcasts a type-erased column to its concrete type.
#[inline]
pub fn downcast_mut<T: Send + Sync + 'static>(column: &mut dyn TypeErasedColumn) -> Option<&mut Column<T>> {
    column.as_any_mut().downcast_mut::<Column<T>>()
}

/// Constructs an empty type-erased column for `T`.
///
/// Registered as the column factory of every data type.
pub fn new_column<T: Send + Sync + 'static>() -> Box<dyn TypeErasedColumn> {
    Box::new(Column::<T>::new())
}
