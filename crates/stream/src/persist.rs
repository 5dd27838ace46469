/// What happens to a stream's backing file when the stream is torn down.
///
/// Persistence belongs to the open stream, not to the file: the same file
/// can be written with [`Persistence::Persist`] and later reopened with
/// [`Persistence::Delete`] by whoever consumes it last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Persistence {
    /// Remove the file when the last handle goes away.
    Delete,
    /// Leave the file in place, header up to date.
    #[default]
    Persist,
    /// Release every block as soon as a forward read moves past it. Reading
    /// to the end truncates the stream to zero items; the file itself stays.
    DeleteBlocksOnRead,
}
