//! Single-pass stream transforms.
//!
//! [`scan`] feeds every item of an input stream to a [`ScanObject`], in
//! order, and writes whatever the object emits to an output stream. Once
//! the input is exhausted the object is called with `None` so it can emit
//! trailing items (totals, buffered state) until it answers
//! [`ScanStep::Skip`] or [`ScanStep::Done`].

use std::marker::PhantomData;

use crate::error::Result;
use crate::item::Item;
use crate::stream::TypedStream;

/// What a scan object wants done with the current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStep<O> {
    /// Write this item to the output.
    Output(O),
    /// Write nothing. After the input is exhausted this ends the scan.
    Skip,
    /// Stop now, even if input items remain.
    Done,
}

/// Per-item logic for [`scan`].
pub trait ScanObject<I: Item, O: Item> {
    /// Called once before the first item.
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called with each input item, then with `None` at the end.
    fn operate(&mut self, input: Option<&I>) -> Result<ScanStep<O>>;
}

/// Runs `object` over all of `input`, from its first item, and appends the
/// emitted items at `output`'s cursor. Returns the number of items written.
pub fn scan<I, O, S>(input: &mut TypedStream<I>, object: &mut S, output: &mut TypedStream<O>) -> Result<u64>
where
    I: Item,
    O: Item,
    S: ScanObject<I, O>,
{
    object.initialize()?;
    input.seek(0)?;
    let mut written = 0;

    while let Some(item) = input.read_item()? {
        match object.operate(Some(&item))? {
            ScanStep::Output(out) => {
                output.write_item(&out)?;
                written += 1;
            }
            ScanStep::Skip => {}
            ScanStep::Done => return Ok(written),
        }
    }
    while let ScanStep::Output(out) = object.operate(None)? {
        output.write_item(&out)?;
        written += 1;
    }
    Ok(written)
}

/// Passes every item through unchanged.
pub struct IdentityScan<T>(PhantomData<T>);

impl<T> IdentityScan<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for IdentityScan<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> ScanObject<T, T> for IdentityScan<T> {
    fn operate(&mut self, input: Option<&T>) -> Result<ScanStep<T>> {
        Ok(match input {
            Some(item) => ScanStep::Output(*item),
            None => ScanStep::Done,
        })
    }
}

/// Copies every item of `from` to `to`'s cursor.
pub fn copy_stream<T: Item>(from: &mut TypedStream<T>, to: &mut TypedStream<T>) -> Result<u64> {
    scan(from, &mut IdentityScan::new(), to)
}
