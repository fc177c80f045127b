/// Return value of progress, notify, and match callbacks.
///
/// Callbacks run synchronously on the calling thread; the operation checks
/// the value at its next checkpoint (next entry, next file, next delta).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Control {
    /// Keep going with the default behavior.
    #[default]
    Continue,
    /// Leave out the current item but keep going.
    Skip,
    /// Stop the whole operation.
    Abort,
}

impl Control {
    pub fn is_abort(self) -> bool {
        self == Self::Abort
    }
}
