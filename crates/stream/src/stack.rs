use crate::context::Context;
use crate::error::Result;
use crate::item::Item;
use crate::stream::TypedStream;

/// A LIFO stack kept in a stream: the top of the stack is the last item.
///
/// Push grows the stream by one with `truncate` and writes the new last
/// item; pop reads the last item and shrinks the stream by one.
#[derive(Debug)]
pub struct ExternalStack<T: Item> {
    stream: TypedStream<T>,
}

impl<T: Item> ExternalStack<T> {
    /// Uses `stream` as the stack. Existing items become the stack contents,
    /// bottom first.
    pub fn new(stream: TypedStream<T>) -> Self {
        Self { stream }
    }

    /// A stack on a scratch stream that disappears when dropped.
    pub fn temporary(ctx: &Context) -> Result<Self> {
        Ok(Self::new(TypedStream::temporary(ctx)?))
    }

    pub fn len(&self) -> u64 {
        self.stream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stream.is_empty()
    }

    pub fn push(&mut self, item: &T) -> Result<()> {
        let len = self.stream.len();
        self.stream.truncate(len + 1)?;
        self.stream.seek(len)?;
        self.stream.write_item(item)
    }

    pub fn pop(&mut self) -> Result<Option<T>> {
        let Some(item) = self.peek()? else {
            return Ok(None);
        };
        let len = self.stream.len();
        self.stream.truncate(len - 1)?;
        Ok(Some(item))
    }

    pub fn peek(&mut self) -> Result<Option<T>> {
        let len = self.stream.len();
        if len == 0 {
            return Ok(None);
        }
        self.stream.seek(len - 1)?;
        self.stream.read_item()
    }

    pub fn into_inner(self) -> TypedStream<T> {
        self.stream
    }

    pub fn stream_mut(&mut self) -> &mut TypedStream<T> {
        &mut self.stream
    }
}
