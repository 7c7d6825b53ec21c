//! Read access shared by every signal type.
//!
//! [`Readable`] lets a static [`DerivedSignal`](super::DerivedSignal) take a
//! tuple of mixed signal kinds as its source list.

/// A reactive value that can be read (and tracked) with `get()`.
pub trait Readable {
    /// What `get()` hands back.
    type Value;

    /// Read the current value, recording the read in the enclosing
    /// computation if there is one.
    fn get(&self) -> Self::Value;
}

/// A tuple of [`Readable`] sources, read together and positionally.
pub trait SourceTuple {
    /// The tuple of values produced by reading every source.
    type Values;

    /// Read every source, in order.
    fn read(&self) -> Self::Values;
}

macro_rules! impl_source_tuple {
    ($($name:ident $index:tt),+) => {
        impl<$($name: Readable),+> SourceTuple for ($($name,)+) {
            type Values = ($($name::Value,)+);

            fn read(&self) -> Self::Values {
                ($(self.$index.get(),)+)
            }
        }
    };
}

impl_source_tuple!(A 0);
impl_source_tuple!(A 0, B 1);
impl_source_tuple!(A 0, B 1, C 2);
impl_source_tuple!(A 0, B 1, C 2, D 3);
impl_source_tuple!(A 0, B 1, C 2, D 3, E 4);
impl_source_tuple!(A 0, B 1, C 2, D 3, E 4, F 5);
